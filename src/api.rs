//! Collaborator interface (§6)
//!
//! The five entry points a UI layer (pager, composer, folder browser —
//! all out of scope here) is allowed to call: parse a message stream into
//! an envelope and body tree, classify attachments, evaluate an Autocrypt
//! recommendation, protect an outgoing message, and unwrap an incoming
//! one. Thin orchestration over C1-C11; no new algorithms live here.

use std::io::{BufRead, Cursor};

use chrono::{DateTime, Utc};

use crate::autocrypt::{AutocryptStore, KeyImporter, Recommendation};
use crate::crypto::{CryptoDriver, DecryptionVerdict};
use crate::envelope::{parse_envelope, Envelope, EnvelopeFilters};
use crate::errors::{CoreError, CoreResult, ParseWarning};
use crate::mime::{parse_mime_from_lines, AttachmentPolicy, BodyArena, BodyId, MimeLimits};
use crate::passphrase::PassphraseCache;

/// The result of [`parse_message`]: an envelope plus its MIME body tree.
pub struct ParsedMessage {
    pub envelope: Envelope,
    pub arena: BodyArena,
    pub root: BodyId,
    pub warnings: Vec<ParseWarning>,
}

/// Parse a message stream into `(envelope, body tree)`.
///
/// Reads the top-level header block once, feeding the same lines to both
/// the envelope parser (C6) and the MIME tree builder (C5) so `From`/
/// `Subject`/etc. and `Content-Type`/etc. are each dispatched exactly
/// once, then continues reading the body to build the tree.
pub fn parse_message<R: BufRead>(reader: &mut R, filters: &mut EnvelopeFilters, limits: MimeLimits, default_charset: &str) -> CoreResult<ParsedMessage> {
    let (lines, header_len) = crate::header::read_all_headers_with_len(reader)?;
    let (envelope, mut warnings) = parse_envelope(&lines, filters);
    let (arena, root, mut mime_warnings) = parse_mime_from_lines(reader, &lines, header_len, limits, default_charset)?;
    warnings.append(&mut mime_warnings);
    Ok(ParsedMessage { envelope, arena, root, warnings })
}

/// Parse a message already fully buffered in memory.
pub fn parse_message_bytes(bytes: &[u8], filters: &mut EnvelopeFilters, limits: MimeLimits, default_charset: &str) -> CoreResult<ParsedMessage> {
    let mut cursor = Cursor::new(bytes);
    parse_message(&mut cursor, filters, limits, default_charset)
}

/// Classify every part of a parsed tree and return the total attachment
/// count, per §4.5's attachment policy.
pub fn classify_attachments(arena: &mut BodyArena, root: BodyId, policy: &AttachmentPolicy) -> u32 {
    arena.count_attachments(root, policy)
}

/// Evaluate the outbound Autocrypt recommendation for a composed message.
pub fn recommend(store: &AutocryptStore, from: &str, recipients: &[&str], now: DateTime<Utc>, importer: &dyn KeyImporter) -> CoreResult<(Recommendation, Vec<String>)> {
    store.recommend(from, recipients, now, importer)
}

/// What protection to apply to an outgoing message body.
pub enum ProtectMode<'a> {
    Sign { key_id: &'a str },
    Encrypt { recipients: &'a [&'a str] },
    SignAndEncrypt { key_id: &'a str, recipients: &'a [&'a str] },
}

/// A protected outgoing body, ready to splice into a `multipart/signed`
/// or `multipart/encrypted` wrapper. The caller supplies the boundary
/// string used when rendering the final MIME tree.
pub struct ProtectedBody {
    pub content_type: &'static str,
    pub protocol: String,
    pub micalg: Option<String>,
    pub control_part: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

/// Sign/encrypt a composed message body, returning a new protected body
/// per §4.9.
pub fn protect_outgoing(driver: &CryptoDriver, body: &[u8], mode: ProtectMode<'_>, cache: &mut PassphraseCache) -> CoreResult<ProtectedBody> {
    match mode {
        ProtectMode::Sign { key_id } => {
            let signature = driver.sign(body, key_id, cache)?;
            Ok(ProtectedBody {
                content_type: "multipart/signed",
                protocol: "application/pgp-signature".to_owned(),
                micalg: Some("pgp-sha256".to_owned()),
                control_part: Some(signature),
                payload: body.to_vec(),
            })
        }
        ProtectMode::Encrypt { recipients } => {
            let ciphertext = driver.encrypt(body, recipients)?;
            Ok(ProtectedBody {
                content_type: "multipart/encrypted",
                protocol: "application/pgp-encrypted".to_owned(),
                micalg: None,
                control_part: Some(b"Version: 1\n".to_vec()),
                payload: ciphertext,
            })
        }
        ProtectMode::SignAndEncrypt { key_id, recipients } => {
            let signature = driver.sign(body, key_id, cache)?;
            let mut signed = Vec::with_capacity(body.len() + signature.len() + 64);
            signed.extend_from_slice(body);
            signed.extend_from_slice(b"\n");
            signed.extend_from_slice(&signature);
            let ciphertext = driver.encrypt(&signed, recipients)?;
            Ok(ProtectedBody {
                content_type: "multipart/encrypted",
                protocol: "application/pgp-encrypted".to_owned(),
                micalg: None,
                control_part: Some(b"Version: 1\n".to_vec()),
                payload: ciphertext,
            })
        }
    }
}

/// The result of unwrapping a received part.
pub struct UnwrappedMessage {
    pub arena: BodyArena,
    pub root: BodyId,
    pub goodsig: bool,
    pub verdict: DecryptionVerdict,
    pub warnings: Vec<ParseWarning>,
}

/// Decrypt and/or verify a received part, recursing via C5 on success.
///
/// `detached_signature` is `Some` for a `multipart/signed` part (the
/// signature part's bytes); `None` for a plain `multipart/encrypted` or
/// combined sign+encrypt part, where verification happens after
/// decryption exposes an inner `multipart/signed` layer.
pub fn unwrap_incoming(
    driver: &CryptoDriver,
    ciphertext: &[u8],
    detached_signature: Option<&[u8]>,
    cache: &mut PassphraseCache,
    limits: MimeLimits,
    default_charset: &str,
) -> CoreResult<UnwrappedMessage> {
    let (clear, verdict) = driver.decrypt(ciphertext, cache)?;

    let goodsig = match detached_signature {
        Some(sig) => driver.verify(&clear, sig, None)?,
        None => false,
    };

    let mut cursor = Cursor::new(clear.as_slice());
    let (arena, root, warnings) = crate::mime::parse_mime(&mut cursor, limits, default_charset)
        .map_err(|e| CoreError::Crypto(format!("failed to parse decrypted body: {e}")))?;

    Ok(UnwrappedMessage { arena, root, goodsig, verdict, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EnvelopeFilters;

    #[test]
    fn parse_message_dispatches_envelope_and_mime_from_one_header_pass() {
        let raw = b"From: a@example.com\r\nSubject: hi\r\nContent-Type: text/plain; charset=us-ascii\r\n\r\nbody text\r\n";
        let mut filters = EnvelopeFilters::default();
        let parsed = parse_message_bytes(raw, &mut filters, MimeLimits::default(), "us-ascii").unwrap();
        assert_eq!(parsed.envelope.subject.as_deref(), Some("hi"));
        assert_eq!(parsed.arena.get(parsed.root).content_type, "text");
        assert_eq!(parsed.arena.get(parsed.root).subtype, "plain");
    }

    #[test]
    fn classify_attachments_counts_a_leaf_text_part() {
        let raw = b"Content-Type: text/plain\r\n\r\nhello\r\n";
        let mut filters = EnvelopeFilters::default();
        let mut parsed = parse_message_bytes(raw, &mut filters, MimeLimits::default(), "us-ascii").unwrap();
        let policy = AttachmentPolicy::default();
        let count = classify_attachments(&mut parsed.arena, parsed.root, &policy);
        assert_eq!(count, 0);
    }
}
