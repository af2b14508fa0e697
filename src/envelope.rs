//! Envelope parser: header dispatch and date parsing (C6)
//!
//! Grounded on `examples/original_source/headers.c`'s `mutt_rfc822_parse_line`
//! dispatch (case-insensitive first-letter switch, then full-prefix match)
//! and the legacy timezone table used by its date parser.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::address::AddressList;
use crate::errors::ParseWarning;
use crate::header::HeaderLine;

/// A fully dispatched envelope
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub return_path: AddressList,
    pub from: AddressList,
    pub sender: AddressList,
    pub reply_to: AddressList,
    pub to: AddressList,
    pub cc: AddressList,
    pub bcc: AddressList,
    pub mail_followup_to: AddressList,
    pub subject: Option<String>,
    /// Byte offset into `subject` past any reply/forward prefix (`Re: `, `Fwd: `)
    pub real_subj: usize,
    /// Subject as modified by subject-rewrite rules, if any differ from `subject`
    pub disp_subj: Option<String>,
    pub message_id: Option<String>,
    pub supersedes: Option<String>,
    pub date: Option<String>,
    pub date_parsed: Option<ParsedDate>,
    pub x_label: Option<String>,
    pub spam: Option<String>,
    /// Reverse-chronological: last-seen first
    pub references: Vec<String>,
    pub in_reply_to: Vec<String>,
    pub userhdrs: Vec<(String, String)>,
    pub autocrypt: Vec<String>,
    pub autocrypt_gossip: Vec<String>,
    pub list_post: Option<String>,
    pub changed: ChangedFields,
}

/// Which envelope fields have been user-mutated and must be rewritten on
/// save, rather than re-derived from the original header block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangedFields {
    pub subject: bool,
    pub from: bool,
    pub to: bool,
    pub cc: bool,
    pub bcc: bool,
    pub reply_to: bool,
}

/// A parsed `Date:` field, retaining whether the timezone was genuinely
/// present (vs. defaulted to `+0000`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedDate {
    pub when: DateTime<FixedOffset>,
    pub tz_was_missing: bool,
}

/// Filters consulted while dispatching `List-Post:` / spam-tagging headers
#[derive(Debug, Clone, Default)]
pub struct EnvelopeFilters {
    pub auto_subscribe: bool,
    pub subscribed_lists: Vec<String>,
    pub unlist_patterns: Vec<regex::Regex>,
    pub spam_patterns: Vec<(regex::Regex, String)>,
    pub spam_separator: String,
}

/// Fold a sequence of unfolded header lines into an [`Envelope`].
///
/// Singleton fields (`Subject`, `Message-Id`, ...) are replaced on repeat;
/// list fields (`Received`, user headers) are appended. Unrecognised
/// fields become `userhdrs` entries verbatim.
pub fn parse_envelope(lines: &[HeaderLine], filters: &mut EnvelopeFilters) -> (Envelope, Vec<ParseWarning>) {
    let mut env = Envelope::default();
    let mut warnings = Vec::new();

    for line in lines {
        let HeaderLine::Field { name, value } = line else {
            continue;
        };
        dispatch(&mut env, name, value, filters, &mut warnings);
    }

    if let Some(subject) = &env.subject {
        env.real_subj = strip_reply_prefix(subject);
    }
    (env, warnings)
}

fn dispatch(env: &mut Envelope, name: &str, value: &str, filters: &mut EnvelopeFilters, warnings: &mut Vec<ParseWarning>) {
    let lower = name.to_ascii_lowercase();
    match lower.as_str() {
        "return-path" => env.return_path = parse_addr_field(value, warnings),
        "from" => env.from = parse_addr_field(value, warnings),
        "sender" => env.sender = parse_addr_field(value, warnings),
        "reply-to" => env.reply_to = parse_addr_field(value, warnings),
        "to" => env.to = parse_addr_field(value, warnings),
        "cc" => env.cc = parse_addr_field(value, warnings),
        "bcc" => env.bcc = parse_addr_field(value, warnings),
        "mail-followup-to" => env.mail_followup_to = parse_addr_field(value, warnings),
        "subject" => env.subject = Some(value.to_owned()),
        "message-id" => env.message_id = extract_one_msgid(value),
        "supersedes" => env.supersedes = extract_one_msgid(value),
        "date" => {
            env.date = Some(value.to_owned());
            match parse_date(value) {
                Ok(parsed) => env.date_parsed = Some(parsed),
                Err(msg) => warnings.push(ParseWarning::new("date", msg)),
            }
        }
        "x-label" => env.x_label = Some(value.to_owned()),
        "autocrypt" => env.autocrypt.push(value.to_owned()),
        "autocrypt-gossip" => env.autocrypt_gossip.push(value.to_owned()),
        "references" => {
            // stored reverse-chronologically: last-seen first, so reverse
            // the order found left-to-right in the header value
            let mut ids = extract_msgids(value);
            ids.reverse();
            env.references = ids;
        }
        "in-reply-to" => {
            let mut ids = extract_msgids(value);
            if ids.is_empty() {
                // relaxed fallback: accept bare tokens with no angle brackets
                ids = value.split_whitespace().map(str::to_owned).collect();
            }
            env.in_reply_to = ids;
        }
        "list-post" => {
            env.list_post = extract_mailto(value);
            if filters.auto_subscribe {
                maybe_auto_subscribe(env, filters);
            }
        }
        _ => {
            if lower.starts_with("content-") {
                // forwarded to the body node by the MIME parser, not stored here
                return;
            }
            env.userhdrs.push((name.to_owned(), value.to_owned()));
        }
    }

    if let Some(tag) = apply_spam_filters(name, value, filters) {
        env.spam = Some(match &env.spam {
            Some(existing) => format!("{existing}{}{tag}", filters.spam_separator),
            None => tag,
        });
    }
}

fn parse_addr_field(value: &str, warnings: &mut Vec<ParseWarning>) -> AddressList {
    let (list, mut addr_warnings) = AddressList::parse(value);
    warnings.append(&mut addr_warnings);
    list
}

/// Mirrors `mutt_auto_subscribe`: the first `List-Post:` mailbox seen for a
/// list is added to the subscribed set, unless it already is one or matches
/// an unlist pattern. `filters.subscribed_lists` doubles as the de-duplicating
/// cache the original keeps in a separate hash table.
fn maybe_auto_subscribe(env: &Envelope, filters: &mut EnvelopeFilters) {
    let Some(mailbox) = env.list_post.as_deref() else {
        return;
    };
    if filters.subscribed_lists.iter().any(|known| known.eq_ignore_ascii_case(mailbox)) {
        return;
    }
    if filters.unlist_patterns.iter().any(|re| re.is_match(mailbox)) {
        return;
    }
    filters.subscribed_lists.push(mailbox.to_owned());
}

/// Apply every configured spam-tagging regex against this header line,
/// per §4.6 — not limited to any fixed set of header names.
fn apply_spam_filters(name: &str, value: &str, filters: &EnvelopeFilters) -> Option<String> {
    let line = format!("{name}: {value}");
    filters
        .spam_patterns
        .iter()
        .find(|(re, _)| re.is_match(&line))
        .map(|(_, tag)| tag.clone())
}

fn extract_mailto(value: &str) -> Option<String> {
    value
        .split(',')
        .map(str::trim)
        .find_map(|entry| entry.trim_start_matches('<').trim_end_matches('>').strip_prefix("mailto:"))
        .map(str::to_owned)
}

/// Extract all `<...>` message-ids from a header value, in left-to-right
/// order as written.
fn extract_msgids(value: &str) -> Vec<String> {
    let mut ids = Vec::new();
    let mut rest = value;
    while let Some(start) = rest.find('<') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('>') else { break };
        ids.push(after[..end].to_owned());
        rest = &after[end + 1..];
    }
    ids
}

fn extract_one_msgid(value: &str) -> Option<String> {
    extract_msgids(value).into_iter().next()
}

/// Byte offset past a leading `Re:`/`Fwd:`/`Aw:` reply-prefix run (possibly
/// repeated, possibly bracketed like `[External] Re: ...`).
fn strip_reply_prefix(subject: &str) -> usize {
    let mut offset = 0;
    let mut rest = subject;
    loop {
        let trimmed_start = rest.len() - rest.trim_start().len();
        offset += trimmed_start;
        rest = rest.trim_start();

        let lower = rest.to_ascii_lowercase();
        let prefix_len = ["re:", "fwd:", "fw:", "aw:"]
            .iter()
            .find(|p| lower.starts_with(**p))
            .map(|p| p.len());

        match prefix_len {
            Some(len) => {
                offset += len;
                rest = &rest[len..];
            }
            None => break,
        }
    }
    offset
}

/// Legacy alphabetic timezone names, mapped to `(hours, minutes)` offsets
/// east of UTC. Grounded on `examples/original_source/headers.c`'s
/// `TimeZones` table.
const LEGACY_TIMEZONES: &[(&str, i32, i32)] = &[
    ("UT", 0, 0),
    ("UTC", 0, 0),
    ("GMT", 0, 0),
    ("Z", 0, 0),
    ("EST", -5, 0),
    ("EDT", -4, 0),
    ("CST", -6, 0),
    ("CDT", -5, 0),
    ("MST", -7, 0),
    ("MDT", -6, 0),
    ("PST", -8, 0),
    ("PDT", -7, 0),
    ("A", -1, 0),
    ("N", 1, 0),
    ("M", -12, 0),
    ("Y", 12, 0),
];

/// Parse `[weekday,] day month year HH:MM[:SS] tz` per §4.6.1.
///
/// Two-digit years under 50 map to 20xx, 50 and over map to 19xx. A missing
/// timezone defaults to `+0000` with [`ParsedDate::tz_was_missing`] set.
/// Commented timezones like `(MST)` are unwrapped before lookup.
pub fn parse_date(input: &str) -> Result<ParsedDate, String> {
    let cleaned = strip_weekday(input.trim());
    let tokens: Vec<&str> = cleaned.split_whitespace().collect();
    if tokens.len() < 4 {
        return Err(format!("date field has too few tokens: '{input}'"));
    }

    let day: u32 = tokens[0].parse().map_err(|_| format!("bad day in date: '{input}'"))?;
    let month = month_index(tokens[1]).ok_or_else(|| format!("unknown month in date: '{input}'"))?;
    let year = normalize_year(tokens[2]).map_err(|_| format!("bad year in date: '{input}'"))?;
    let (hour, minute, second) = parse_time_of_day(tokens[3])?;

    let tz_token = tokens.get(4).map(|t| unwrap_comment(t));
    let (offset, tz_was_missing) = match tz_token {
        Some(tok) => (resolve_timezone(&tok).ok_or_else(|| format!("unknown timezone in date: '{input}'"))?, false),
        None => (FixedOffset::east_opt(0).unwrap(), true),
    };

    let date =
        NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| format!("invalid calendar date in: '{input}'"))?;
    let time =
        NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(|| format!("invalid time of day in: '{input}'"))?;
    let naive = date.and_time(time);
    let when = offset
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| format!("ambiguous local time in: '{input}'"))?;

    Ok(ParsedDate { when, tz_was_missing })
}

fn strip_weekday(input: &str) -> &str {
    match input.split_once(',') {
        Some((_, rest)) => rest.trim_start(),
        None => input,
    }
}

fn month_index(token: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let lower = token.to_ascii_lowercase();
    MONTHS.iter().position(|m| lower.starts_with(m)).map(|i| i as u32 + 1)
}

fn normalize_year(token: &str) -> Result<i32, std::num::ParseIntError> {
    let year: i32 = token.parse()?;
    Ok(if token.len() <= 2 {
        if year < 50 {
            2000 + year
        } else {
            1900 + year
        }
    } else {
        year
    })
}

fn parse_time_of_day(token: &str) -> Result<(u32, u32, u32), String> {
    let parts: Vec<&str> = token.split(':').collect();
    if parts.len() < 2 {
        return Err(format!("malformed time of day: '{token}'"));
    }
    let hour: u32 = parts[0].parse().map_err(|_| format!("bad hour: '{token}'"))?;
    let minute: u32 = parts[1].parse().map_err(|_| format!("bad minute: '{token}'"))?;
    let second: u32 = match parts.get(2) {
        Some(s) => s.parse().map_err(|_| format!("bad second: '{token}'"))?,
        None => 0,
    };
    Ok((hour, minute, second))
}

/// Strip `(...)`  wrapping from a commented timezone like `(MST)`.
fn unwrap_comment(token: &str) -> String {
    token.trim_start_matches('(').trim_end_matches(')').to_owned()
}

fn resolve_timezone(token: &str) -> Option<FixedOffset> {
    if let Some(numeric) = parse_numeric_offset(token) {
        return Some(numeric);
    }
    LEGACY_TIMEZONES
        .iter()
        .find(|(name, _, _)| name.eq_ignore_ascii_case(token))
        .and_then(|(_, h, m)| {
            let signed_minutes = if *h < 0 { -m } else { *m };
            FixedOffset::east_opt(h * 3600 + signed_minutes * 60)
        })
}

fn parse_numeric_offset(token: &str) -> Option<FixedOffset> {
    let (sign, digits) = match token.as_bytes().first()? {
        b'+' => (1, &token[1..]),
        b'-' => (-1, &token[1..]),
        _ => return None,
    };
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[0..2].parse().ok()?;
    let minutes: i32 = digits[2..4].parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Helper retained for callers that want "now" clamped the way the
/// Autocrypt store clamps future-dated message timestamps (§3 invariant).
pub fn clamp_future(when: DateTime<FixedOffset>, now: DateTime<Utc>, max_skew_days: i64) -> DateTime<FixedOffset> {
    let limit = now + chrono::Duration::days(max_skew_days);
    if when > limit {
        limit.with_timezone(when.offset())
    } else {
        when
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::read_all_headers;
    use std::io::Cursor;

    fn lines(raw: &str) -> Vec<HeaderLine> {
        let mut cursor = Cursor::new(raw.as_bytes().to_vec());
        read_all_headers(&mut cursor).unwrap()
    }

    #[test]
    fn dispatches_singleton_and_repeated_fields() {
        let raw = "Subject: hello\r\nTo: a@example.com\r\nReceived: one\r\n\r\n";
        let (env, warnings) = parse_envelope(&lines(raw), &mut EnvelopeFilters::default());
        assert!(warnings.is_empty());
        assert_eq!(env.subject.as_deref(), Some("hello"));
        assert_eq!(env.to.addrs.len(), 1);
    }

    #[test]
    fn unrecognised_header_becomes_user_header() {
        let raw = "X-Mailer: custom\r\n\r\n";
        let (env, _) = parse_envelope(&lines(raw), &mut EnvelopeFilters::default());
        assert_eq!(env.userhdrs, vec![("X-Mailer".to_owned(), "custom".to_owned())]);
    }

    #[test]
    fn references_stored_reverse_chronologically() {
        let raw = "References: <first@x> <second@x> <third@x>\r\n\r\n";
        let (env, _) = parse_envelope(&lines(raw), &mut EnvelopeFilters::default());
        assert_eq!(env.references, vec!["third@x", "second@x", "first@x"]);
    }

    #[test]
    fn in_reply_to_falls_back_to_bare_tokens() {
        let raw = "In-Reply-To: bare-token-no-brackets\r\n\r\n";
        let (env, _) = parse_envelope(&lines(raw), &mut EnvelopeFilters::default());
        assert_eq!(env.in_reply_to, vec!["bare-token-no-brackets"]);
    }

    #[test]
    fn auto_subscribe_adds_new_list_post_mailbox_once() {
        let raw = "List-Post: <mailto:list@example.com>\r\n\r\n";
        let mut filters = EnvelopeFilters {
            auto_subscribe: true,
            ..EnvelopeFilters::default()
        };
        let (env, _) = parse_envelope(&lines(raw), &mut filters);
        assert_eq!(env.list_post.as_deref(), Some("list@example.com"));
        assert_eq!(filters.subscribed_lists, vec!["list@example.com".to_owned()]);

        // a second message for the same list must not duplicate the entry
        let (_, _) = parse_envelope(&lines(raw), &mut filters);
        assert_eq!(filters.subscribed_lists, vec!["list@example.com".to_owned()]);
    }

    #[test]
    fn auto_subscribe_skips_a_mailbox_matching_an_unlist_pattern() {
        let raw = "List-Post: <mailto:noreply@example.com>\r\n\r\n";
        let mut filters = EnvelopeFilters {
            auto_subscribe: true,
            unlist_patterns: vec![regex::Regex::new("^noreply@").unwrap()],
            ..EnvelopeFilters::default()
        };
        let _ = parse_envelope(&lines(raw), &mut filters);
        assert!(filters.subscribed_lists.is_empty());
    }

    #[test]
    fn spam_filter_matches_any_configured_header_not_just_x_spam() {
        let raw = "X-Custom-Spam: score=99\r\n\r\n";
        let mut filters = EnvelopeFilters {
            spam_patterns: vec![(regex::Regex::new("score=99").unwrap(), "Yes, score=99".to_owned())],
            spam_separator: ", ".to_owned(),
            ..EnvelopeFilters::default()
        };
        let (env, _) = parse_envelope(&lines(raw), &mut filters);
        assert_eq!(env.spam.as_deref(), Some("Yes, score=99"));
    }

    #[test]
    fn reply_prefix_offset_skips_repeated_re() {
        let raw = "Subject: Re: Re: original subject\r\n\r\n";
        let (env, _) = parse_envelope(&lines(raw), &mut EnvelopeFilters::default());
        let subject = env.subject.as_deref().unwrap();
        assert_eq!(&subject[env.real_subj..], "original subject");
    }

    #[test]
    fn numeric_timezone_offset_parses() {
        let parsed = parse_date("Mon, 5 Jan 2026 08:30:00 -0500").unwrap();
        assert!(!parsed.tz_was_missing);
        assert_eq!(parsed.when.offset().local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn legacy_alphabetic_timezone_resolves() {
        let parsed = parse_date("5 Jan 2026 08:30:00 PST").unwrap();
        assert_eq!(parsed.when.offset().local_minus_utc(), -8 * 3600);
    }

    #[test]
    fn commented_timezone_is_unwrapped() {
        let parsed = parse_date("5 Jan 2026 08:30:00 (MST)").unwrap();
        assert_eq!(parsed.when.offset().local_minus_utc(), -7 * 3600);
    }

    #[test]
    fn missing_timezone_defaults_to_utc_and_sets_flag() {
        let parsed = parse_date("5 Jan 2026 08:30:00").unwrap();
        assert!(parsed.tz_was_missing);
        assert_eq!(parsed.when.offset().local_minus_utc(), 0);
    }

    #[test]
    fn two_digit_year_pivot_at_fifty() {
        let recent = parse_date("5 Jan 26 08:30:00 +0000").unwrap();
        assert_eq!(recent.when.format("%Y").to_string(), "2026");
        let legacy = parse_date("5 Jan 99 08:30:00 +0000").unwrap();
        assert_eq!(legacy.when.format("%Y").to_string(), "1999");
    }
}
