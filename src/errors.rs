//! Core error model and error history ring
//!
//! Defines the typed error hierarchy shared by every component (parsing,
//! transport, TLS, crypto, autocrypt). Parse-time recoverable conditions are
//! not represented here — those are collected as [`ParseWarning`]s alongside
//! a successful parse, per the "never abort ingestion on a malformed field"
//! rule.

use std::collections::VecDeque;
use std::time::Instant;

use thiserror::Error;

/// Core error type
///
/// Covers the fatal error kinds a caller must react to. Recoverable parse
/// conditions never produce this type; see [`ParseWarning`].
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed input that could not be locally recovered from
    #[error("parse error: {0}")]
    Parse(String),
    /// Socket/subprocess I/O failure
    #[error("i/o error: {0}")]
    Io(String),
    /// TLS handshake or certificate verification failure
    #[error("tls error: {0}")]
    Tls(String),
    /// External PGP/SMIME binary failure, or a gated status-fd verdict
    #[error("crypto error: {0}")]
    Crypto(String),
    /// Autocrypt store or ingestion failure
    #[error("autocrypt error: {0}")]
    Autocrypt(String),
    /// A resource bound was hit (MIME depth, part count, buffer size)
    #[error("resource limit exceeded: {0}")]
    Limit(String),
    /// A blocking operation exceeded its deadline
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Configuration was missing or malformed
    #[error("configuration error: {0}")]
    Config(String),
    /// Anything else unexpected
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias used throughout the crate
pub type CoreResult<T> = Result<T, CoreError>;

/// A recoverable parse condition
///
/// Produced by the header, encoded-word, MIME, and envelope parsers when
/// they locally recover from malformed input (dropped field, skipped
/// parameter, part reclassified as a leaf). Never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    /// Which field/parameter/part triggered the warning
    pub context: String,
    /// Human-readable description of what was skipped or recovered
    pub detail: String,
}

impl ParseWarning {
    pub fn new(context: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.context, self.detail)
    }
}

/// Bounded ring of timestamped user-visible errors
///
/// Distinct from the transient status line; displayable on demand. Pushing
/// past `capacity` evicts the oldest entry.
#[derive(Debug)]
pub struct ErrorHistory {
    capacity: usize,
    entries: VecDeque<(Instant, String)>,
}

impl ErrorHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Record an error, evicting the oldest entry if at capacity
    pub fn push(&mut self, message: impl Into<String>) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((Instant::now(), message.into()));
    }

    /// Entries oldest-first
    pub fn entries(&self) -> impl Iterator<Item = &(Instant, String)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorHistory;

    #[test]
    fn evicts_oldest_entry_past_capacity() {
        let mut ring = ErrorHistory::new(2);
        ring.push("first");
        ring.push("second");
        ring.push("third");

        let messages: Vec<&str> = ring.entries().map(|(_, m)| m.as_str()).collect();
        assert_eq!(messages, vec!["second", "third"]);
    }

    #[test]
    fn empty_ring_reports_empty() {
        let ring = ErrorHistory::new(4);
        assert!(ring.is_empty());
        assert_eq!(ring.len(), 0);
    }
}
