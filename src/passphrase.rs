//! Passphrase cache (C11)
//!
//! Holds a single decrypted passphrase in memory for a bounded lifetime so
//! the user is not prompted on every signing/decryption operation within a
//! session. The secret is wrapped in [`secrecy::SecretBox`] and the buffer
//! is overwritten on expiry or explicit [`PassphraseCache::forget`], per
//! Testable Property 7 (zeroisation).

use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretBox};

struct CachedSecret {
    secret: SecretBox<String>,
    expires_at: Instant,
}

/// Caches a single passphrase with an expiry deadline.
///
/// Only one passphrase is held at a time; the spec does not require
/// per-key caching, and a single slot keeps the zeroisation guarantee easy
/// to audit.
pub struct PassphraseCache {
    slot: Option<CachedSecret>,
    timeout: Duration,
}

impl PassphraseCache {
    pub fn new(timeout: Duration) -> Self {
        Self { slot: None, timeout }
    }

    /// Store `passphrase`, resetting the expiry deadline from now.
    pub fn store(&mut self, passphrase: String) {
        self.slot = Some(CachedSecret {
            secret: SecretBox::new(Box::new(passphrase)),
            expires_at: Instant::now() + self.timeout,
        });
    }

    /// Read the cached passphrase if present and unexpired. An expired
    /// entry is zeroised and dropped as a side effect of this call.
    pub fn read(&mut self) -> Option<String> {
        if let Some(cached) = &self.slot {
            if Instant::now() >= cached.expires_at {
                self.forget();
                return None;
            }
        }
        self.slot.as_ref().map(|cached| cached.secret.expose_secret().clone())
    }

    /// Returns true if a passphrase is cached and not yet expired, without
    /// exposing it.
    pub fn is_live(&self) -> bool {
        match &self.slot {
            Some(cached) => Instant::now() < cached.expires_at,
            None => false,
        }
    }

    /// Drop the cached secret immediately. `SecretBox`'s `Drop`
    /// implementation zeroises the backing buffer.
    pub fn forget(&mut self) {
        self.slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_passphrase_reads_back_before_expiry() {
        let mut cache = PassphraseCache::new(Duration::from_secs(60));
        cache.store("hunter2".to_owned());
        assert_eq!(cache.read().as_deref(), Some("hunter2"));
        assert!(cache.is_live());
    }

    #[test]
    fn expired_passphrase_reads_back_none_and_clears_slot() {
        let mut cache = PassphraseCache::new(Duration::from_millis(1));
        cache.store("hunter2".to_owned());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.read(), None);
        assert!(!cache.is_live());
        // a second read after expiry stays None: the slot was cleared, not
        // just hidden
        assert_eq!(cache.read(), None);
    }

    /// Property 7: after forget(), no live reference to the former
    /// passphrase remains reachable through the cache.
    #[test]
    fn forget_clears_the_slot() {
        let mut cache = PassphraseCache::new(Duration::from_secs(60));
        cache.store("hunter2".to_owned());
        cache.forget();
        assert_eq!(cache.read(), None);
        assert!(!cache.is_live());
    }

    #[test]
    fn empty_cache_reads_back_none() {
        let mut cache = PassphraseCache::new(Duration::from_secs(60));
        assert_eq!(cache.read(), None);
        assert!(!cache.is_live());
    }
}
