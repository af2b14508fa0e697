//! Autocrypt store (C10)
//!
//! Persistent per-account/per-peer key state, header ingestion, gossip
//! ingestion, the outbound recommendation algorithm, and gossip emission.
//! Grounded on `examples/original_source/autocrypt/autocrypt.c` for the
//! table layout and the recommendation algorithm's step order, and on the
//! delta-chat `e2ee.rs` reference for the SQL-backed peerstate shape (the
//! one real Rust codebase in the pack that implements Autocrypt against a
//! SQL store). Key import and fingerprint extraction are delegated to the
//! external PGP binary C9 already drives, never to a linked OpenPGP crate,
//! matching both the teacher's "shell out" posture and the original's own
//! behavior.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection as SqlConnection, OptionalExtension};

use crate::address::{AddressKind, AddressList};
use crate::envelope::Envelope;
use crate::errors::{CoreError, CoreResult};

const GOSSIP_STALE_DAYS: i64 = 35;
const FUTURE_SKEW_DAYS: i64 = 7;

/// A locally owned identity capable of sending Autocrypt headers
#[derive(Debug, Clone)]
pub struct Account {
    pub email_addr: String,
    pub keyid: Option<String>,
    pub keydata: Option<String>,
    pub prefer_encrypt: bool,
    pub enabled: bool,
}

/// Per-peer key state, one row per correspondent
#[derive(Debug, Clone)]
pub struct Peer {
    pub email_addr: String,
    pub last_seen: Option<DateTime<Utc>>,
    pub autocrypt_timestamp: Option<DateTime<Utc>>,
    pub keyid: Option<String>,
    pub keydata: Option<String>,
    pub prefer_encrypt: bool,
    pub gossip_timestamp: Option<DateTime<Utc>>,
    pub gossip_keyid: Option<String>,
    pub gossip_keydata: Option<String>,
}

impl Peer {
    fn new(email_addr: String) -> Self {
        Self {
            email_addr,
            last_seen: None,
            autocrypt_timestamp: None,
            keyid: None,
            keydata: None,
            prefer_encrypt: false,
            gossip_timestamp: None,
            gossip_keyid: None,
            gossip_keydata: None,
        }
    }
}

/// Outbound recommendation for a composed message, per §4.10
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recommendation {
    Off,
    No,
    Discourage,
    Available,
    Yes,
}

/// A parsed `Autocrypt:` or `Autocrypt-Gossip:` header value
#[derive(Debug, Clone)]
pub struct AutocryptHeader {
    pub addr: String,
    pub prefer_encrypt: bool,
    pub keydata: String,
}

/// Parse one `Autocrypt:`/`Autocrypt-Gossip:` header value using the
/// relaxed-whitespace parameter parser from C4.
pub fn parse_autocrypt_header(value: &str) -> Option<AutocryptHeader> {
    let raw = crate::encoding::split_parameters(value, true);
    let mut addr = None;
    let mut prefer_encrypt = false;
    let mut keydata = None;
    for param in &raw {
        match param.name.to_ascii_lowercase().as_str() {
            "addr" => addr = Some(normalize_address(&param.value)),
            "prefer-encrypt" => prefer_encrypt = param.value.eq_ignore_ascii_case("mutual"),
            "keydata" => keydata = Some(param.value.split_whitespace().collect::<String>()),
            _ => {}
        }
    }
    Some(AutocryptHeader {
        addr: addr?,
        prefer_encrypt,
        keydata: keydata?,
    })
}

/// IDN-ASCII, lower-cased form used for every stored/compared address
pub fn normalize_address(addr: &str) -> String {
    let lower = addr.trim().to_ascii_lowercase();
    match lower.split_once('@') {
        Some((local, domain)) => match idna::domain_to_ascii(domain) {
            Ok(ascii_domain) => format!("{local}@{ascii_domain}"),
            Err(_) => lower,
        },
        None => lower,
    }
}

/// Key-import/fingerprint hook, delegated to the external PGP binary
/// (`gpg --import`, `gpg --with-colons -k`) rather than a linked OpenPGP
/// crate.
pub trait KeyImporter {
    /// Import `keydata` (base64, no armor) into the keyring, returning the
    /// resulting fingerprint to store as `keyid`.
    fn import(&self, keydata: &str) -> CoreResult<String>;

    /// Returns true if `keyid` names a key the keyring considers valid
    /// (not expired/revoked).
    fn is_valid(&self, keyid: &str) -> bool;
}

/// SQLite-backed store with the `account`, `peer`, `peer_history`, and
/// `gossip_history` tables from §4.10.
pub struct AutocryptStore {
    conn: SqlConnection,
}

impl AutocryptStore {
    pub fn open(path: &Path) -> CoreResult<Self> {
        let conn = SqlConnection::open(path)
            .map_err(|e| CoreError::Autocrypt(format!("failed to open database at {}: {e}", path.display())))?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store, used by tests and one-shot CLI invocations.
    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = SqlConnection::open_in_memory()
            .map_err(|e| CoreError::Autocrypt(format!("failed to open in-memory database: {e}")))?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> CoreResult<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS account (
                    email_addr TEXT PRIMARY KEY,
                    keyid TEXT,
                    keydata TEXT,
                    prefer_encrypt INTEGER NOT NULL DEFAULT 0,
                    enabled INTEGER NOT NULL DEFAULT 1
                );
                CREATE TABLE IF NOT EXISTS peer (
                    email_addr TEXT PRIMARY KEY,
                    last_seen INTEGER,
                    autocrypt_timestamp INTEGER,
                    keyid TEXT,
                    keydata TEXT,
                    prefer_encrypt INTEGER NOT NULL DEFAULT 0,
                    gossip_timestamp INTEGER,
                    gossip_keyid TEXT,
                    gossip_keydata TEXT
                );
                CREATE TABLE IF NOT EXISTS peer_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    email_addr TEXT NOT NULL,
                    message_id TEXT,
                    timestamp INTEGER NOT NULL,
                    keydata TEXT
                );
                CREATE TABLE IF NOT EXISTS gossip_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    email_addr TEXT NOT NULL,
                    message_id TEXT,
                    timestamp INTEGER NOT NULL,
                    gossip_keydata TEXT
                );",
            )
            .map_err(|e| CoreError::Autocrypt(format!("failed to initialise schema: {e}")))?;
        Ok(())
    }

    pub fn get_account(&self, email_addr: &str) -> CoreResult<Option<Account>> {
        self.conn
            .query_row(
                "SELECT email_addr, keyid, keydata, prefer_encrypt, enabled FROM account WHERE email_addr = ?1",
                params![normalize_address(email_addr)],
                |row| {
                    Ok(Account {
                        email_addr: row.get(0)?,
                        keyid: row.get(1)?,
                        keydata: row.get(2)?,
                        prefer_encrypt: row.get::<_, i64>(3)? != 0,
                        enabled: row.get::<_, i64>(4)? != 0,
                    })
                },
            )
            .optional()
            .map_err(|e| CoreError::Autocrypt(format!("account lookup failed: {e}")))
    }

    pub fn upsert_account(&self, account: &Account) -> CoreResult<()> {
        self.conn
            .execute(
                "INSERT INTO account (email_addr, keyid, keydata, prefer_encrypt, enabled)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(email_addr) DO UPDATE SET
                    keyid = excluded.keyid, keydata = excluded.keydata,
                    prefer_encrypt = excluded.prefer_encrypt, enabled = excluded.enabled",
                params![
                    normalize_address(&account.email_addr),
                    account.keyid,
                    account.keydata,
                    account.prefer_encrypt as i64,
                    account.enabled as i64,
                ],
            )
            .map_err(|e| CoreError::Autocrypt(format!("account upsert failed: {e}")))?;
        Ok(())
    }

    pub fn get_peer(&self, email_addr: &str) -> CoreResult<Option<Peer>> {
        self.conn
            .query_row(
                "SELECT email_addr, last_seen, autocrypt_timestamp, keyid, keydata, prefer_encrypt,
                        gossip_timestamp, gossip_keyid, gossip_keydata
                 FROM peer WHERE email_addr = ?1",
                params![normalize_address(email_addr)],
                row_to_peer,
            )
            .optional()
            .map_err(|e| CoreError::Autocrypt(format!("peer lookup failed: {e}")))
    }

    fn upsert_peer(&self, peer: &Peer) -> CoreResult<()> {
        self.conn
            .execute(
                "INSERT INTO peer (email_addr, last_seen, autocrypt_timestamp, keyid, keydata, prefer_encrypt,
                                   gossip_timestamp, gossip_keyid, gossip_keydata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(email_addr) DO UPDATE SET
                    last_seen = excluded.last_seen, autocrypt_timestamp = excluded.autocrypt_timestamp,
                    keyid = excluded.keyid, keydata = excluded.keydata, prefer_encrypt = excluded.prefer_encrypt,
                    gossip_timestamp = excluded.gossip_timestamp, gossip_keyid = excluded.gossip_keyid,
                    gossip_keydata = excluded.gossip_keydata",
                params![
                    normalize_address(&peer.email_addr),
                    peer.last_seen.map(|t| t.timestamp()),
                    peer.autocrypt_timestamp.map(|t| t.timestamp()),
                    peer.keyid,
                    peer.keydata,
                    peer.prefer_encrypt as i64,
                    peer.gossip_timestamp.map(|t| t.timestamp()),
                    peer.gossip_keyid,
                    peer.gossip_keydata,
                ],
            )
            .map_err(|e| CoreError::Autocrypt(format!("peer upsert failed: {e}")))?;
        Ok(())
    }

    fn insert_peer_history(&self, email_addr: &str, message_id: Option<&str>, timestamp: DateTime<Utc>, keydata: &str) -> CoreResult<()> {
        self.conn
            .execute(
                "INSERT INTO peer_history (email_addr, message_id, timestamp, keydata) VALUES (?1, ?2, ?3, ?4)",
                params![normalize_address(email_addr), message_id, timestamp.timestamp(), keydata],
            )
            .map_err(|e| CoreError::Autocrypt(format!("peer history insert failed: {e}")))?;
        Ok(())
    }

    fn insert_gossip_history(&self, email_addr: &str, message_id: Option<&str>, timestamp: DateTime<Utc>, keydata: &str) -> CoreResult<()> {
        self.conn
            .execute(
                "INSERT INTO gossip_history (email_addr, message_id, timestamp, gossip_keydata) VALUES (?1, ?2, ?3, ?4)",
                params![normalize_address(email_addr), message_id, timestamp.timestamp(), keydata],
            )
            .map_err(|e| CoreError::Autocrypt(format!("gossip history insert failed: {e}")))?;
        Ok(())
    }

    /// Ingest the `Autocrypt:` header(s) of an incoming message.
    ///
    /// Per §4.10: skip if >1 From address, if the message is
    /// `multipart/report`, or if the message is dated more than
    /// [`FUTURE_SKEW_DAYS`] ahead of `now`. If more than one valid
    /// `Autocrypt:` header names the From address, the message is treated
    /// as though none were present (RFC rule against header spoofing).
    pub fn process_autocrypt_header(
        &self,
        from_addresses: &AddressList,
        envelope: &Envelope,
        is_multipart_report: bool,
        autocrypt_headers: &[String],
        now: DateTime<Utc>,
        importer: &dyn KeyImporter,
    ) -> CoreResult<()> {
        let mailboxes: Vec<&str> = from_addresses
            .iter()
            .filter(|a| a.kind == AddressKind::Mailbox)
            .filter_map(|a| a.mailbox.as_deref())
            .collect();
        if mailboxes.len() != 1 || is_multipart_report {
            return Ok(());
        }
        let from = normalize_address(mailboxes[0]);

        let Some(date_sent) = envelope.date_parsed.as_ref().map(|d| d.when.with_timezone(&Utc)) else {
            return Ok(());
        };
        if date_sent > now + chrono::Duration::days(FUTURE_SKEW_DAYS) {
            return Ok(());
        }

        let mut valid_header: Option<AutocryptHeader> = None;
        let mut saw_multiple = false;
        for raw in autocrypt_headers {
            let Some(parsed) = parse_autocrypt_header(raw) else { continue };
            if parsed.addr != from {
                continue;
            }
            if valid_header.is_some() {
                saw_multiple = true;
                break;
            }
            valid_header = Some(parsed);
        }
        let valid_header = if saw_multiple { None } else { valid_header };

        let mut peer = self.get_peer(&from)?.unwrap_or_else(|| Peer::new(from.clone()));

        if let Some(ts) = peer.autocrypt_timestamp {
            if date_sent <= ts {
                return Ok(());
            }
        }

        let mut changed = false;
        if peer.last_seen.map(|ls| date_sent > ls).unwrap_or(true) {
            peer.last_seen = Some(date_sent);
            changed = true;
        }

        if let Some(header) = valid_header {
            peer.autocrypt_timestamp = Some(date_sent);
            peer.prefer_encrypt = header.prefer_encrypt;
            changed = true;
            if peer.keydata.as_deref() != Some(header.keydata.as_str()) {
                let keyid = importer.import(&header.keydata)?;
                peer.keyid = Some(keyid);
                peer.keydata = Some(header.keydata.clone());
                self.insert_peer_history(&from, envelope.message_id.as_deref(), date_sent, &header.keydata)?;
            }
        }

        if changed {
            self.upsert_peer(&peer)?;
        }
        Ok(())
    }

    /// Ingest an `Autocrypt-Gossip:` header found inside the
    /// protected-header section of a signed+encrypted multipart, for each
    /// recipient of the outer message.
    pub fn process_gossip_headers(
        &self,
        outer_recipients: &[&str],
        message_id: Option<&str>,
        gossip_headers: &[String],
        date_sent: DateTime<Utc>,
        importer: &dyn KeyImporter,
    ) -> CoreResult<()> {
        for recipient in outer_recipients {
            let recipient_norm = normalize_address(recipient);
            let Some(header) = gossip_headers
                .iter()
                .filter_map(|raw| parse_autocrypt_header(raw))
                .find(|h| h.addr == recipient_norm)
            else {
                continue;
            };

            let mut peer = self.get_peer(&recipient_norm)?.unwrap_or_else(|| Peer::new(recipient_norm.clone()));
            if let Some(ts) = peer.gossip_timestamp {
                if date_sent <= ts {
                    continue;
                }
            }

            let differs = peer.keydata.as_deref() != Some(header.keydata.as_str())
                && peer.gossip_keydata.as_deref() != Some(header.keydata.as_str());
            peer.gossip_timestamp = Some(date_sent);
            if differs {
                let keyid = importer.import(&header.keydata)?;
                peer.gossip_keyid = Some(keyid);
                peer.gossip_keydata = Some(header.keydata.clone());
                self.insert_gossip_history(&recipient_norm, message_id, date_sent, &header.keydata)?;
            }
            self.upsert_peer(&peer)?;
        }
        Ok(())
    }

    /// Outbound recommendation algorithm, per §4.10 and
    /// `mutt_autocrypt_ui_recommendation`.
    pub fn recommend(&self, from: &str, recipients: &[&str], now: DateTime<Utc>, importer: &dyn KeyImporter) -> CoreResult<(Recommendation, Vec<String>)> {
        let Some(account) = self.get_account(from)? else {
            return Ok((Recommendation::Off, Vec::new()));
        };
        if !account.enabled {
            return Ok((Recommendation::Off, Vec::new()));
        }

        let mut keylist = Vec::new();
        if let Some(keyid) = &account.keyid {
            keylist.push(keyid.clone());
        }

        if recipients.is_empty() {
            return Ok((Recommendation::No, keylist));
        }

        let mut all_encrypt = true;
        let mut has_discourage = false;

        for recipient in recipients {
            let Some(peer) = self.get_peer(recipient)? else {
                return Ok((Recommendation::No, Vec::new()));
            };

            let matching_key;
            if peer.keyid.as_deref().is_some_and(|k| importer.is_valid(k)) {
                matching_key = peer.keyid.clone().unwrap();

                let stale = match (peer.last_seen, peer.autocrypt_timestamp) {
                    (Some(last_seen), Some(ts)) => (last_seen - ts).num_days() > GOSSIP_STALE_DAYS,
                    _ => true,
                };
                if stale {
                    has_discourage = true;
                    all_encrypt = false;
                }
                if !account.prefer_encrypt || !peer.prefer_encrypt {
                    all_encrypt = false;
                }
            } else if peer.gossip_keyid.as_deref().is_some_and(|k| importer.is_valid(k)) {
                matching_key = peer.gossip_keyid.clone().unwrap();
                has_discourage = true;
                all_encrypt = false;
            } else {
                return Ok((Recommendation::No, Vec::new()));
            }

            keylist.push(matching_key);
        }

        let _ = now; // reserved: future-dated peers are excluded earlier during ingestion
        let rec = if all_encrypt {
            Recommendation::Yes
        } else if has_discourage {
            Recommendation::Discourage
        } else {
            Recommendation::Available
        };
        Ok((rec, keylist))
    }

    /// Synthesise `Autocrypt-Gossip:` header values for each recipient
    /// with a known key (preferring `keydata`, falling back to
    /// `gossip_keydata`).
    pub fn emit_gossip_headers(&self, recipients: &[&str]) -> CoreResult<Vec<String>> {
        let mut out = Vec::new();
        for recipient in recipients {
            let Some(peer) = self.get_peer(recipient)? else { continue };
            let keydata = peer.keydata.as_deref().or(peer.gossip_keydata.as_deref());
            let Some(keydata) = keydata else { continue };
            out.push(format_gossip_header(&peer.email_addr, keydata));
        }
        Ok(out)
    }
}

fn row_to_peer(row: &rusqlite::Row) -> rusqlite::Result<Peer> {
    Ok(Peer {
        email_addr: row.get(0)?,
        last_seen: row.get::<_, Option<i64>>(1)?.and_then(|t| DateTime::from_timestamp(t, 0)),
        autocrypt_timestamp: row.get::<_, Option<i64>>(2)?.and_then(|t| DateTime::from_timestamp(t, 0)),
        keyid: row.get(3)?,
        keydata: row.get(4)?,
        prefer_encrypt: row.get::<_, i64>(5)? != 0,
        gossip_timestamp: row.get::<_, Option<i64>>(6)?.and_then(|t| DateTime::from_timestamp(t, 0)),
        gossip_keyid: row.get(7)?,
        gossip_keydata: row.get(8)?,
    })
}

/// `addr=<email>` plus the base64 keydata wrapped at 75 chars per line,
/// each continuation line prefixed with a TAB.
fn format_gossip_header(addr: &str, keydata: &str) -> String {
    let mut out = format!("addr={addr}; keydata=\n");
    for chunk in keydata.as_bytes().chunks(75) {
        out.push('\t');
        out.push_str(std::str::from_utf8(chunk).unwrap_or(""));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct FakeImporter {
        valid: std::cell::RefCell<std::collections::HashSet<String>>,
    }

    impl FakeImporter {
        fn new() -> Self {
            Self { valid: std::cell::RefCell::new(std::collections::HashSet::new()) }
        }
    }

    impl KeyImporter for FakeImporter {
        fn import(&self, keydata: &str) -> CoreResult<String> {
            let keyid = format!("KEYID-{keydata}");
            self.valid.borrow_mut().insert(keyid.clone());
            Ok(keyid)
        }

        fn is_valid(&self, keyid: &str) -> bool {
            self.valid.borrow().contains(keyid)
        }
    }

    fn make_envelope(date: DateTime<Utc>, message_id: &str) -> Envelope {
        let mut env = Envelope::default();
        env.message_id = Some(message_id.to_owned());
        env.date_parsed = Some(crate::envelope::ParsedDate {
            when: date.with_timezone(&chrono::FixedOffset::east_opt(0).unwrap()),
            tz_was_missing: false,
        });
        env
    }

    /// Property 4: ingesting M1 then M2, or M2 then M1, yields identical
    /// peer state when M1.date_sent >= M2.date_sent.
    #[test]
    fn autocrypt_monotonicity_is_order_independent() {
        let importer = FakeImporter::new();
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 0, 0, 0).unwrap();
        let earlier = now - chrono::Duration::days(10);
        let later = now - chrono::Duration::days(5);

        let (from, _warnings) = AddressList::parse("peer@example.com");
        let header_early = format!("addr=peer@example.com; keydata={}", "AAAA");
        let header_late = format!("addr=peer@example.com; keydata={}", "BBBB");

        // forward order: later then earlier (earlier must be a no-op)
        let store_a = AutocryptStore::open_in_memory().unwrap();
        store_a
            .process_autocrypt_header(&from, &make_envelope(later, "m2"), false, &[header_late.clone()], now, &importer)
            .unwrap();
        store_a
            .process_autocrypt_header(&from, &make_envelope(earlier, "m1"), false, &[header_early.clone()], now, &importer)
            .unwrap();

        // reverse order: earlier then later
        let store_b = AutocryptStore::open_in_memory().unwrap();
        store_b
            .process_autocrypt_header(&from, &make_envelope(earlier, "m1"), false, &[header_early], now, &importer)
            .unwrap();
        store_b
            .process_autocrypt_header(&from, &make_envelope(later, "m2"), false, &[header_late], now, &importer)
            .unwrap();

        let peer_a = store_a.get_peer("peer@example.com").unwrap().unwrap();
        let peer_b = store_b.get_peer("peer@example.com").unwrap().unwrap();
        assert_eq!(peer_a.keydata, peer_b.keydata);
        assert_eq!(peer_a.autocrypt_timestamp, peer_b.autocrypt_timestamp);
        assert_eq!(peer_a.last_seen, peer_b.last_seen);
    }

    /// Property 5: a message dated more than 7 days in the future never
    /// alters any autocrypt timestamp.
    #[test]
    fn future_dated_message_does_not_update_peer_state() {
        let importer = FakeImporter::new();
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 0, 0, 0).unwrap();
        let far_future = now + chrono::Duration::days(40);
        let (from, _warnings) = AddressList::parse("peer@example.com");
        let header = "addr=peer@example.com; keydata=AAAA".to_owned();

        let store = AutocryptStore::open_in_memory().unwrap();
        store
            .process_autocrypt_header(&from, &make_envelope(far_future, "m1"), false, &[header], now, &importer)
            .unwrap();

        assert!(store.get_peer("peer@example.com").unwrap().is_none());
    }

    /// S4: Account A prefer_encrypt=true + valid key, Peer P
    /// prefer_encrypt=true + valid keyid + autocrypt_timestamp=last_seen =
    /// now-10d yields `yes`.
    #[test]
    fn s4_fresh_mutual_prefer_encrypt_yields_yes() {
        let importer = FakeImporter::new();
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 0, 0, 0).unwrap();
        let store = AutocryptStore::open_in_memory().unwrap();

        store
            .upsert_account(&Account {
                email_addr: "a@example.com".to_owned(),
                keyid: Some("KEYID-A".to_owned()),
                keydata: Some("AAAA".to_owned()),
                prefer_encrypt: true,
                enabled: true,
            })
            .unwrap();

        let keyid_p = importer.import("PPPP").unwrap();
        let ten_days_ago = now - chrono::Duration::days(10);
        store
            .upsert_peer(&Peer {
                email_addr: "p@example.com".to_owned(),
                last_seen: Some(ten_days_ago),
                autocrypt_timestamp: Some(ten_days_ago),
                keyid: Some(keyid_p),
                keydata: Some("PPPP".to_owned()),
                prefer_encrypt: true,
                gossip_timestamp: None,
                gossip_keyid: None,
                gossip_keydata: None,
            })
            .unwrap();

        let (rec, keys) = store.recommend("a@example.com", &["p@example.com"], now, &importer).unwrap();
        assert_eq!(rec, Recommendation::Yes);
        assert_eq!(keys.len(), 2);
    }

    /// S4: autocrypt_timestamp = now-40d but last_seen = now yields
    /// `discourage`.
    #[test]
    fn s4_stale_autocrypt_timestamp_yields_discourage() {
        let importer = FakeImporter::new();
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 0, 0, 0).unwrap();
        let store = AutocryptStore::open_in_memory().unwrap();

        store
            .upsert_account(&Account {
                email_addr: "a@example.com".to_owned(),
                keyid: Some("KEYID-A".to_owned()),
                keydata: Some("AAAA".to_owned()),
                prefer_encrypt: true,
                enabled: true,
            })
            .unwrap();

        let keyid_p = importer.import("PPPP").unwrap();
        store
            .upsert_peer(&Peer {
                email_addr: "p@example.com".to_owned(),
                last_seen: Some(now),
                autocrypt_timestamp: Some(now - chrono::Duration::days(40)),
                keyid: Some(keyid_p),
                keydata: Some("PPPP".to_owned()),
                prefer_encrypt: true,
                gossip_timestamp: None,
                gossip_keyid: None,
                gossip_keydata: None,
            })
            .unwrap();

        let (rec, _keys) = store.recommend("a@example.com", &["p@example.com"], now, &importer).unwrap();
        assert_eq!(rec, Recommendation::Discourage);
    }

    /// S4: only the peer's gossip_keyid is valid -> `discourage`.
    #[test]
    fn s4_gossip_only_key_yields_discourage() {
        let importer = FakeImporter::new();
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 0, 0, 0).unwrap();
        let store = AutocryptStore::open_in_memory().unwrap();

        store
            .upsert_account(&Account {
                email_addr: "a@example.com".to_owned(),
                keyid: Some("KEYID-A".to_owned()),
                keydata: Some("AAAA".to_owned()),
                prefer_encrypt: true,
                enabled: true,
            })
            .unwrap();

        let gossip_keyid = importer.import("GGGG").unwrap();
        store
            .upsert_peer(&Peer {
                email_addr: "p@example.com".to_owned(),
                last_seen: Some(now),
                autocrypt_timestamp: None,
                keyid: None,
                keydata: None,
                prefer_encrypt: true,
                gossip_timestamp: Some(now),
                gossip_keyid: Some(gossip_keyid),
                gossip_keydata: Some("GGGG".to_owned()),
            })
            .unwrap();

        let (rec, _keys) = store.recommend("a@example.com", &["p@example.com"], now, &importer).unwrap();
        assert_eq!(rec, Recommendation::Discourage);
    }

    #[test]
    fn disabled_account_yields_off() {
        let importer = FakeImporter::new();
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 0, 0, 0).unwrap();
        let store = AutocryptStore::open_in_memory().unwrap();
        store
            .upsert_account(&Account {
                email_addr: "a@example.com".to_owned(),
                keyid: None,
                keydata: None,
                prefer_encrypt: false,
                enabled: false,
            })
            .unwrap();
        let (rec, keys) = store.recommend("a@example.com", &["p@example.com"], now, &importer).unwrap();
        assert_eq!(rec, Recommendation::Off);
        assert!(keys.is_empty());
    }

    #[test]
    fn gossip_header_emission_wraps_at_75_chars_with_tab_prefix() {
        let header = format_gossip_header("p@example.com", &"A".repeat(150));
        let lines: Vec<&str> = header.lines().collect();
        assert_eq!(lines[0], "addr=p@example.com; keydata=");
        assert!(lines[1].starts_with('\t'));
        assert_eq!(lines[1].len() - 1, 75);
    }

    #[test]
    fn address_normalization_lowercases_and_ascii_folds() {
        assert_eq!(normalize_address("Foo@Example.COM"), "foo@example.com");
    }
}
