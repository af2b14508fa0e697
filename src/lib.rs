//! mutt-core: message parsing, transport, and cryptography mediation for a
//! terminal mail user agent
//!
//! This crate is the CORE of an interactive terminal mail user agent: the
//! subsystems that parse Internet mail messages, negotiate with remote mail
//! stores over authenticated secure channels, and mediate end-to-end
//! cryptographic operations. Terminal drawing, menu navigation, and
//! configuration-file scripting are deliberately out of scope; the
//! remainder of an MUA is expected to consume this crate only through
//! [`api`].
//!
//! # Architecture
//!
//! - [`buffer`]: pooled growable byte buffers
//! - [`address`]: RFC5322 address list parsing and rendering
//! - [`header`]: RFC5322 header unfolding and raw line reading
//! - [`encoding`]: RFC2047 encoded-words and RFC2231 parameter reassembly
//! - [`mime`]: MIME body tree construction
//! - [`envelope`]: envelope header dispatch and date parsing
//! - [`config`]: environment-driven configuration
//! - [`connection`]: buffered transport abstraction (TCP, tunnel)
//! - [`tls`]: TLS negotiation and trust-on-first-use peer verification
//! - [`crypto`]: external PGP/SMIME driver and status-fd parsing
//! - [`autocrypt`]: Autocrypt peer/account store and recommendation
//! - [`passphrase`]: expiring in-memory passphrase cache
//! - [`models`]: shared message-header data model
//! - [`errors`]: core error model and error history ring
//! - [`api`]: the collaborator interface exposed to UI layers

pub mod address;
pub mod api;
pub mod autocrypt;
pub mod buffer;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod encoding;
pub mod envelope;
pub mod errors;
pub mod header;
pub mod mime;
pub mod models;
pub mod passphrase;
pub mod tls;
