//! Shared message-header data model (§3)
//!
//! `MessageHeader` ties together an [`Envelope`](crate::envelope::Envelope),
//! a MIME body tree ([`BodyArena`](crate::mime::BodyArena)/
//! [`BodyId`](crate::mime::BodyId)), per-message status flags, a security
//! bitmap recording which crypto operations were applied, and the
//! backing-store location the message was read from. Grounded on
//! `examples/bradsjm-mail-imap-mcp-rs/src/models.rs` for struct layout and
//! doc-comment density, generalized from DTOs meant for JSON wire transfer
//! to the core's own in-process record.

use chrono::{DateTime, FixedOffset};

use crate::mime::BodyId;

/// Per-message status flags, one bit per named flag in §3.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderFlags(u32);

macro_rules! flag_accessor {
    ($bit:expr, $get:ident, $set:ident) => {
        pub fn $get(self) -> bool {
            self.0 & (1 << $bit) != 0
        }

        pub fn $set(&mut self, value: bool) {
            if value {
                self.0 |= 1 << $bit;
            } else {
                self.0 &= !(1 << $bit);
            }
        }
    };
}

impl HeaderFlags {
    flag_accessor!(0, read, set_read);
    flag_accessor!(1, new, set_new);
    flag_accessor!(2, replied, set_replied);
    flag_accessor!(3, flagged, set_flagged);
    flag_accessor!(4, deleted, set_deleted);
    flag_accessor!(5, purge, set_purge);
    flag_accessor!(6, trashed, set_trashed);
    flag_accessor!(7, expired, set_expired);
    flag_accessor!(8, superseded, set_superseded);
    flag_accessor!(9, tagged, set_tagged);
    flag_accessor!(10, mime, set_mime);
    flag_accessor!(11, collapsed, set_collapsed);
    flag_accessor!(12, limited, set_limited);
    flag_accessor!(13, subject_changed, set_subject_changed);
    flag_accessor!(14, searched, set_searched);
    flag_accessor!(15, matched, set_matched);
    flag_accessor!(16, attach_valid, set_attach_valid);
}

/// Which crypto application (if any) produced the part, and which
/// operations were applied to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CryptoApplication {
    #[default]
    None,
    Pgp,
    Smime,
}

/// Security bitmap, one bit per named operation in §3.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SecurityBitmap {
    pub application: CryptoApplication,
    flags: u16,
}

macro_rules! sec_flag_accessor {
    ($bit:expr, $get:ident, $set:ident) => {
        pub fn $get(self) -> bool {
            self.flags & (1 << $bit) != 0
        }

        pub fn $set(&mut self, value: bool) {
            if value {
                self.flags |= 1 << $bit;
            } else {
                self.flags &= !(1 << $bit);
            }
        }
    };
}

impl SecurityBitmap {
    sec_flag_accessor!(0, sign, set_sign);
    sec_flag_accessor!(1, encrypt, set_encrypt);
    sec_flag_accessor!(2, inline, set_inline);
    sec_flag_accessor!(3, goodsign, set_goodsign);
    sec_flag_accessor!(4, badsign, set_badsign);
    sec_flag_accessor!(5, oppencrypt, set_oppencrypt);
    sec_flag_accessor!(6, autocrypt, set_autocrypt);
}

/// Local timezone offset as mutt splits it: hours, minutes, and an
/// eastward/westward sign, kept separate so rendering never needs signed
/// arithmetic over a combined minute count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneOffset {
    pub zhours: u8,
    pub zminutes: u8,
    pub zoccident: bool,
}

impl ZoneOffset {
    pub fn from_fixed_offset(offset: &FixedOffset) -> Self {
        let total_seconds = offset.local_minus_utc();
        let zoccident = total_seconds < 0;
        let abs_seconds = total_seconds.unsigned_abs();
        Self {
            zhours: (abs_seconds / 3600) as u8,
            zminutes: ((abs_seconds % 3600) / 60) as u8,
            zoccident,
        }
    }
}

/// Where a message's backing bytes live: an offset/length span inside a
/// single-file store (mbox, MMDF) or a standalone file (MH, Maildir).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    SpanningFile { path: String, offset: u64, length: u64 },
    StandaloneFile { path: String },
}

/// A single message's header record, tying the envelope, MIME tree,
/// status flags, security bitmap, and backing-store location together.
#[derive(Debug, Clone)]
pub struct MessageHeader {
    pub flags: HeaderFlags,
    pub security: SecurityBitmap,
    pub date_sent: Option<DateTime<FixedOffset>>,
    pub received: Option<DateTime<FixedOffset>>,
    pub zone: Option<ZoneOffset>,
    pub envelope_index: usize,
    pub body: BodyId,
    pub thread_parent: Option<usize>,
    pub location: StoreLocation,
}

impl MessageHeader {
    pub fn new(envelope_index: usize, body: BodyId, location: StoreLocation) -> Self {
        Self {
            flags: HeaderFlags::default(),
            security: SecurityBitmap::default(),
            date_sent: None,
            received: None,
            zone: None,
            envelope_index,
            body,
            thread_parent: None,
            location,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_flags_round_trip_individually() {
        let mut flags = HeaderFlags::default();
        assert!(!flags.read());
        flags.set_read(true);
        assert!(flags.read());
        flags.set_flagged(true);
        assert!(flags.flagged());
        flags.set_read(false);
        assert!(!flags.read());
        assert!(flags.flagged());
    }

    #[test]
    fn security_bitmap_tracks_application_and_operations_independently() {
        let mut security = SecurityBitmap::default();
        security.application = CryptoApplication::Pgp;
        security.set_encrypt(true);
        security.set_goodsign(true);
        assert_eq!(security.application, CryptoApplication::Pgp);
        assert!(security.encrypt());
        assert!(security.goodsign());
        assert!(!security.badsign());
    }

    #[test]
    fn zone_offset_splits_negative_offset_as_occidental() {
        let offset = FixedOffset::west_opt(5 * 3600 + 30 * 60).unwrap();
        let zone = ZoneOffset::from_fixed_offset(&offset);
        assert!(zone.zoccident);
        assert_eq!(zone.zhours, 5);
        assert_eq!(zone.zminutes, 30);
    }

    #[test]
    fn zone_offset_splits_positive_offset_as_oriental() {
        let offset = FixedOffset::east_opt(9 * 3600).unwrap();
        let zone = ZoneOffset::from_fixed_offset(&offset);
        assert!(!zone.zoccident);
        assert_eq!(zone.zhours, 9);
        assert_eq!(zone.zminutes, 0);
    }
}
