//! Configuration: per-account connection settings, TLS/crypto policy,
//! resource bounds, and Autocrypt settings
//!
//! All configuration is loaded from environment variables following the
//! pattern `MUTTCORE_<SEGMENT>_<KEY>`. Account segments are discovered by
//! scanning for `MUTTCORE_*_HOST` variables, exactly as the teacher
//! discovers IMAP accounts, generalized to the wider settings surface this
//! core needs.

use std::collections::BTreeMap;
use std::env;
use std::env::VarError;
use std::path::PathBuf;

use regex::Regex;
use secrecy::SecretString;

use crate::errors::{CoreError, CoreResult};

/// Per-account connection settings
#[derive(Debug, Clone)]
pub struct AccountConfig {
    pub account_id: String,
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub user: String,
    pub pass: SecretString,
    /// Shell command to run as a tunnel backend instead of a direct socket
    pub tunnel_command: Option<String>,
}

/// TLS negotiation policy, shared by every account unless overridden
#[derive(Debug, Clone)]
pub struct TlsPolicy {
    pub min_version: TlsVersion,
    pub max_version: TlsVersion,
    pub verify_partial_chains: bool,
    pub trust_store_path: PathBuf,
    pub client_cert_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    Tls12,
    Tls13,
}

/// External crypto binary policy
#[derive(Debug, Clone)]
pub struct CryptoPolicy {
    pub pgp_binary: PathBuf,
    pub smime_binary: PathBuf,
    pub passphrase_timeout_secs: u64,
}

/// Resource bounds enforced during parsing and networking
#[derive(Debug, Clone, Copy)]
pub struct ResourceBounds {
    pub mime_max_depth: u32,
    pub mime_max_parts: usize,
    pub connect_timeout_ms: u64,
    pub socket_timeout_ms: u64,
    pub error_history_capacity: usize,
}

/// Autocrypt feature settings
#[derive(Debug, Clone)]
pub struct AutocryptSettings {
    pub enabled: bool,
    pub database_path: PathBuf,
    pub assumed_prefer_encrypt: bool,
}

/// A single value threaded through every operation that needs configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub accounts: BTreeMap<String, AccountConfig>,
    pub tls: TlsPolicy,
    pub crypto: CryptoPolicy,
    pub resources: ResourceBounds,
    pub autocrypt: AutocryptSettings,
}

impl Config {
    /// Load all configuration from environment variables.
    ///
    /// Discovers accounts by scanning for `MUTTCORE_*_HOST` patterns. If
    /// none are found, a `default` account is required via
    /// `MUTTCORE_DEFAULT_HOST`, `_USER`, and `_PASS`.
    pub fn load_from_env() -> CoreResult<Self> {
        let account_pattern = Regex::new(r"^MUTTCORE_([A-Z0-9_]+)_HOST$")
            .map_err(|e| CoreError::Internal(format!("invalid account regex: {e}")))?;

        let mut account_segments: Vec<String> = env::vars()
            .filter_map(|(k, _)| account_pattern.captures(&k).and_then(|c| c.get(1).map(|m| m.as_str().to_owned())))
            .collect();

        if account_segments.is_empty() {
            account_segments.push("DEFAULT".to_owned());
        }
        account_segments.sort();
        account_segments.dedup();

        let mut accounts = BTreeMap::new();
        for seg in account_segments {
            let account = load_account(&seg)?;
            accounts.insert(account.account_id.clone(), account);
        }

        Ok(Self {
            accounts,
            tls: TlsPolicy {
                min_version: parse_tls_version_env("MUTTCORE_TLS_MIN_VERSION", TlsVersion::Tls12)?,
                max_version: parse_tls_version_env("MUTTCORE_TLS_MAX_VERSION", TlsVersion::Tls13)?,
                verify_partial_chains: parse_bool_env("MUTTCORE_TLS_VERIFY_PARTIAL_CHAINS", false)?,
                trust_store_path: parse_path_env(
                    "MUTTCORE_TLS_TRUST_STORE_PATH",
                    "~/.muttcore/trusted_certs.pem",
                ),
                client_cert_path: env::var("MUTTCORE_TLS_CLIENT_CERT_PATH").ok().map(PathBuf::from),
            },
            crypto: CryptoPolicy {
                pgp_binary: parse_path_env("MUTTCORE_CRYPTO_PGP_BINARY", "gpg"),
                smime_binary: parse_path_env("MUTTCORE_CRYPTO_SMIME_BINARY", "openssl"),
                passphrase_timeout_secs: parse_u64_env("MUTTCORE_CRYPTO_PASSPHRASE_TIMEOUT_SECS", 300)?,
            },
            resources: ResourceBounds {
                mime_max_depth: parse_u32_env("MUTTCORE_MIME_MAX_DEPTH", 30)?,
                mime_max_parts: parse_usize_env("MUTTCORE_MIME_MAX_PARTS", 5000)?,
                connect_timeout_ms: parse_u64_env("MUTTCORE_CONNECT_TIMEOUT_MS", 30_000)?,
                socket_timeout_ms: parse_u64_env("MUTTCORE_SOCKET_TIMEOUT_MS", 300_000)?,
                error_history_capacity: parse_usize_env("MUTTCORE_ERROR_HISTORY_CAPACITY", 64)?,
            },
            autocrypt: AutocryptSettings {
                enabled: parse_bool_env("MUTTCORE_AUTOCRYPT_ENABLED", true)?,
                database_path: parse_path_env("MUTTCORE_AUTOCRYPT_DATABASE_PATH", "~/.muttcore/autocrypt.db"),
                assumed_prefer_encrypt: parse_bool_env("MUTTCORE_AUTOCRYPT_ASSUMED_PREFER_ENCRYPT", false)?,
            },
        })
    }

    /// Get account configuration by ID
    pub fn get_account(&self, account_id: &str) -> CoreResult<&AccountConfig> {
        self.accounts
            .get(account_id)
            .ok_or_else(|| CoreError::Config(format!("account '{account_id}' is not configured")))
    }
}

/// Read `MUTTCORE_<SEGMENT>_HOST`, `_USER`, `_PASS`, `_PORT`, `_SECURE`,
/// and `_TUNNEL_COMMAND`. Normalizes the segment to lowercase
/// (`DEFAULT` becomes `default`).
fn load_account(segment: &str) -> CoreResult<AccountConfig> {
    let prefix = format!("MUTTCORE_{}_", sanitize_segment(segment));
    let host = required_env(&format!("{prefix}HOST"))?;
    let user = required_env(&format!("{prefix}USER"))?;
    let pass = required_env(&format!("{prefix}PASS"))?;

    Ok(AccountConfig {
        account_id: if segment == "DEFAULT" {
            "default".to_owned()
        } else {
            segment.to_ascii_lowercase()
        },
        host,
        port: parse_u16_env(&format!("{prefix}PORT"), 993)?,
        secure: parse_bool_env(&format!("{prefix}SECURE"), true)?,
        user,
        pass: SecretString::new(pass.into()),
        tunnel_command: env::var(format!("{prefix}TUNNEL_COMMAND")).ok(),
    })
}

fn required_env(key: &str) -> CoreResult<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(CoreError::Config(format!("missing required environment variable {key}"))),
    }
}

/// Non-alphanumeric characters are replaced with underscores; leading and
/// trailing underscores are trimmed.
fn sanitize_segment(seg: &str) -> String {
    let mut out = String::with_capacity(seg.len());
    for ch in seg.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push('_');
        }
    }
    out.trim_matches('_').to_owned()
}

fn parse_bool_env(key: &str, default: bool) -> CoreResult<bool> {
    match env::var(key) {
        Ok(v) => parse_bool_value(&v)
            .ok_or_else(|| CoreError::Config(format!("invalid boolean environment variable {key}: '{v}'"))),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => {
            Err(CoreError::Config(format!("environment variable {key} contains non-unicode data")))
        }
    }
}

fn parse_bool_value(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn parse_u16_env(key: &str, default: u16) -> CoreResult<u16> {
    match env::var(key) {
        Ok(v) => v.parse::<u16>().map_err(|_| CoreError::Config(format!("invalid u16 environment variable {key}: '{v}'"))),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => {
            Err(CoreError::Config(format!("environment variable {key} contains non-unicode data")))
        }
    }
}

fn parse_u32_env(key: &str, default: u32) -> CoreResult<u32> {
    match env::var(key) {
        Ok(v) => v.parse::<u32>().map_err(|_| CoreError::Config(format!("invalid u32 environment variable {key}: '{v}'"))),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => {
            Err(CoreError::Config(format!("environment variable {key} contains non-unicode data")))
        }
    }
}

fn parse_u64_env(key: &str, default: u64) -> CoreResult<u64> {
    match env::var(key) {
        Ok(v) => v.parse::<u64>().map_err(|_| CoreError::Config(format!("invalid u64 environment variable {key}: '{v}'"))),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => {
            Err(CoreError::Config(format!("environment variable {key} contains non-unicode data")))
        }
    }
}

fn parse_usize_env(key: &str, default: usize) -> CoreResult<usize> {
    match env::var(key) {
        Ok(v) => v
            .parse::<usize>()
            .map_err(|_| CoreError::Config(format!("invalid usize environment variable {key}: '{v}'"))),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => {
            Err(CoreError::Config(format!("environment variable {key} contains non-unicode data")))
        }
    }
}

fn parse_tls_version_env(key: &str, default: TlsVersion) -> CoreResult<TlsVersion> {
    match env::var(key) {
        Ok(v) => match v.trim() {
            "1.2" => Ok(TlsVersion::Tls12),
            "1.3" => Ok(TlsVersion::Tls13),
            other => Err(CoreError::Config(format!("invalid TLS version in {key}: '{other}'"))),
        },
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => {
            Err(CoreError::Config(format!("environment variable {key} contains non-unicode data")))
        }
    }
}

fn parse_path_env(key: &str, default: &str) -> PathBuf {
    PathBuf::from(env::var(key).unwrap_or_else(|_| default.to_owned()))
}
