//! Encoded-word (RFC2047) and parameter continuation (RFC2231) decoding (C4)
//!
//! Grounded on `examples/original_source/rfc2231.c`: continuations are
//! split off, sorted by `(attribute, index)`, and joined; a trailing `*`
//! marks a percent-encoded, charset-tagged value. Percent-decoding reuses
//! the `urlencoding` crate rather than a bespoke hex-digit loop; charset
//! conversion reuses `encoding_rs` (imported for this purpose the same way
//! the closest pack example, `mail-parser`, does under its `full_encoding`
//! feature).

use std::collections::BTreeMap;

use base64::Engine as _;
use regex::Regex;
use std::sync::OnceLock;

use crate::errors::ParseWarning;

fn encoded_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"=\?([^?\s]+)\?([BbQq])\?([^?]*)\?=").unwrap())
}

/// Decode a header value's RFC2047 encoded-words.
///
/// Consecutive encoded words in the same charset are concatenated without
/// the intervening whitespace; a run across different charsets keeps it,
/// per §4.4.
pub fn decode_encoded_words(input: &str) -> (String, Vec<ParseWarning>) {
    let re = encoded_word_re();
    let mut warnings = Vec::new();
    let mut out = String::new();
    let mut last_end = 0usize;
    let mut prev_was_encoded_charset: Option<String> = None;

    for caps in re.captures_iter(input) {
        let m = caps.get(0).unwrap();
        let between = &input[last_end..m.start()];
        let charset = caps.get(1).unwrap().as_str();
        let enc = caps.get(2).unwrap().as_str();
        let text = caps.get(3).unwrap().as_str();

        let is_pure_whitespace_gap = !between.is_empty() && between.chars().all(char::is_whitespace);
        let same_charset_run = prev_was_encoded_charset
            .as_deref()
            .is_some_and(|prev| prev.eq_ignore_ascii_case(charset));

        if prev_was_encoded_charset.is_some() && is_pure_whitespace_gap && same_charset_run {
            // drop the whitespace: adjacent encoded words in the same charset
        } else {
            out.push_str(between);
        }

        match decode_one_word(enc, text, charset) {
            Ok(decoded) => out.push_str(&decoded),
            Err(msg) => {
                warnings.push(ParseWarning::new("encoded-word", msg));
                out.push_str(m.as_str());
            }
        }

        prev_was_encoded_charset = Some(charset.to_owned());
        last_end = m.end();
    }
    out.push_str(&input[last_end..]);
    (out, warnings)
}

fn decode_one_word(enc: &str, text: &str, charset: &str) -> Result<String, String> {
    let raw_bytes = match enc.to_ascii_uppercase().as_str() {
        "Q" => decode_q(text),
        "B" => base64::engine::general_purpose::STANDARD
            .decode(text.as_bytes())
            .map_err(|e| format!("invalid base64 in encoded-word: {e}"))?,
        other => return Err(format!("unknown encoded-word encoding '{other}'")),
    };
    Ok(bytes_to_utf8(&raw_bytes, charset))
}

/// Q-encoding: underscore decodes to space, `=XX` is a hex-escaped byte.
fn decode_q(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                out.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() => {
                let hi = hex_val(bytes[i + 1]);
                let lo = hex_val(bytes[i + 2]);
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    out.push((hi << 4) | lo);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Convert raw bytes from `charset` to a UTF-8 `String`, falling back to a
/// lossy UTF-8 read if the label is unrecognised.
fn bytes_to_utf8(bytes: &[u8], charset: &str) -> String {
    match encoding_rs::Encoding::for_label(charset.as_bytes()) {
        Some(encoding) => {
            let (decoded, _, _) = encoding.decode(bytes);
            decoded.into_owned()
        }
        None => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// A single header parameter, prior to RFC2231 reassembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawParameter {
    pub name: String,
    pub value: String,
}

/// Split the `; name=value; ...` tail of a structured header field into raw
/// parameters, respecting quoted strings.
///
/// When `allow_value_spaces` is set (the relaxed Autocrypt-header variant
/// from §4.4), a value is the concatenation of all whitespace-separated
/// tokens between `=` and the next `;`, and no continuation syntax is
/// recognised.
pub fn split_parameters(rest: &str, allow_value_spaces: bool) -> Vec<RawParameter> {
    let mut params = Vec::new();
    let mut chars = rest.chars().peekable();

    loop {
        skip_while(&mut chars, |c| c.is_whitespace() || c == ';');
        if chars.peek().is_none() {
            break;
        }
        let name = take_while(&mut chars, |c| c != '=' && c != ';' && !c.is_whitespace());
        skip_while(&mut chars, |c| c.is_whitespace());
        if chars.peek() != Some(&'=') {
            // malformed: missing '='; skip to next ';' and continue
            skip_while(&mut chars, |c| c != ';');
            continue;
        }
        chars.next();
        skip_while(&mut chars, |c| c.is_whitespace());

        let value = if chars.peek() == Some(&'"') {
            take_quoted(&mut chars)
        } else if allow_value_spaces {
            take_while(&mut chars, |c| c != ';')
                .trim()
                .to_owned()
        } else {
            take_while(&mut chars, |c| c != ';' && !c.is_whitespace())
        };

        if !name.is_empty() {
            params.push(RawParameter {
                name: name.trim().to_owned(),
                value,
            });
        }
    }
    params
}

fn skip_while(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, pred: impl Fn(char) -> bool) {
    while let Some(&c) = chars.peek() {
        if pred(c) {
            chars.next();
        } else {
            break;
        }
    }
}

fn take_while(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, pred: impl Fn(char) -> bool) -> String {
    let mut out = String::new();
    while let Some(&c) = chars.peek() {
        if pred(c) {
            out.push(c);
            chars.next();
        } else {
            break;
        }
    }
    out
}

fn take_quoted(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    chars.next(); // opening quote
    let mut out = String::new();
    while let Some(c) = chars.next() {
        match c {
            '"' => break,
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            }
            c => out.push(c),
        }
    }
    out
}

/// A fully reassembled parameter: its decoded value and, if it was
/// charset-tagged, the charset label that was used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedParameter {
    pub value: String,
    pub charset: Option<String>,
}

/// Reassemble RFC2231 continuations and percent/charset-tagged values.
///
/// Malformed continuation indices are logged as warnings and skipped; the
/// rest of the parameter set is still decoded.
pub fn decode_rfc2231_parameters(
    raw: &[RawParameter],
) -> (BTreeMap<String, DecodedParameter>, Vec<ParseWarning>) {
    let mut plain: BTreeMap<String, DecodedParameter> = BTreeMap::new();
    let mut continuations: BTreeMap<String, Vec<(u32, bool, String)>> = BTreeMap::new();
    let mut warnings = Vec::new();

    for param in raw {
        match param.name.find('*') {
            None => {
                plain.insert(
                    param.name.clone(),
                    DecodedParameter {
                        value: param.value.clone(),
                        charset: None,
                    },
                );
            }
            Some(star_pos) => {
                let attr = param.name[..star_pos].to_owned();
                let suffix = &param.name[star_pos + 1..];
                if suffix.is_empty() {
                    // trailing '*': single percent-encoded, charset-tagged value
                    let (charset, pct_value) = rfc2231_get_charset(&param.value);
                    let decoded = pct_decode_and_convert(pct_value, charset.as_deref());
                    plain.insert(
                        attr,
                        DecodedParameter {
                            value: decoded,
                            charset,
                        },
                    );
                } else {
                    let encoded = suffix.ends_with('*');
                    let idx_str = if encoded { &suffix[..suffix.len() - 1] } else { suffix };
                    match idx_str.parse::<u32>() {
                        Ok(idx) => continuations
                            .entry(attr)
                            .or_default()
                            .push((idx, encoded, param.value.clone())),
                        Err(_) => warnings.push(ParseWarning::new(
                            "rfc2231",
                            format!("malformed continuation index in '{}'", param.name),
                        )),
                    }
                }
            }
        }
    }

    for (attr, mut segments) in continuations {
        segments.sort_by_key(|(idx, _, _)| *idx);
        let first_encoded = segments.first().map(|(_, enc, _)| *enc).unwrap_or(false);
        let mut charset: Option<String> = None;
        let mut raw_value = String::new();
        for (i, (_, encoded, value)) in segments.iter().enumerate() {
            if i == 0 && *encoded {
                let (cs, rest) = rfc2231_get_charset(value);
                charset = cs;
                raw_value.push_str(rest);
            } else {
                raw_value.push_str(value);
            }
        }
        let decoded = if first_encoded {
            pct_decode_and_convert(&raw_value, charset.as_deref())
        } else {
            raw_value
        };
        plain.insert(attr, DecodedParameter { value: decoded, charset });
    }

    (plain, warnings)
}

/// Split `charset'lang'value` into `(Some(charset), value)`, or
/// `(None, value)` if there is no `'` delimiter.
fn rfc2231_get_charset(value: &str) -> (Option<String>, &str) {
    let Some(first_tick) = value.find('\'') else {
        return (None, value);
    };
    let charset = &value[..first_tick];
    let after_charset = &value[first_tick + 1..];
    let rest = match after_charset.find('\'') {
        Some(second_tick) => &after_charset[second_tick + 1..],
        None => after_charset,
    };
    (Some(charset.to_owned()), rest)
}

fn pct_decode_and_convert(pct_value: &str, charset: Option<&str>) -> String {
    let decoded_bytes = urlencoding::decode_binary(pct_value.as_bytes()).into_owned();
    match charset {
        Some(cs) => bytes_to_utf8(&decoded_bytes, cs),
        None => String::from_utf8_lossy(&decoded_bytes).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// S1: encoded-word split parameter
    #[test]
    fn s1_encoded_word_concatenation_same_charset() {
        let (decoded, warnings) =
            decode_encoded_words("=?UTF-8?B?SGVsbG8s?= =?UTF-8?Q?_world?=");
        assert!(warnings.is_empty());
        assert_eq!(decoded, "Hello, world");
    }

    #[test]
    fn mixed_charset_run_keeps_whitespace() {
        let (decoded, _) = decode_encoded_words("=?UTF-8?Q?Hello?= =?ISO-8859-1?Q?world?=");
        assert_eq!(decoded, "Hello world");
    }

    #[test]
    fn plain_text_passes_through_untouched() {
        let (decoded, warnings) = decode_encoded_words("just plain text");
        assert!(warnings.is_empty());
        assert_eq!(decoded, "just plain text");
    }

    /// S2: RFC2231 continuation
    #[test]
    fn s2_rfc2231_continuation_reassembly() {
        let raw = vec![
            RawParameter {
                name: "title*0*".to_owned(),
                value: "us-ascii'en'This%20is%20".to_owned(),
            },
            RawParameter {
                name: "title*1*".to_owned(),
                value: "a%20long%20title".to_owned(),
            },
        ];
        let (decoded, warnings) = decode_rfc2231_parameters(&raw);
        assert!(warnings.is_empty());
        let title = decoded.get("title").expect("title present");
        assert_eq!(title.value, "This is a long title");
        assert_eq!(title.charset.as_deref(), Some("us-ascii"));
    }

    #[test]
    fn continuations_reassemble_out_of_order() {
        let raw = vec![
            RawParameter {
                name: "name*2".to_owned(),
                value: "ghi".to_owned(),
            },
            RawParameter {
                name: "name*0".to_owned(),
                value: "abc".to_owned(),
            },
            RawParameter {
                name: "name*1".to_owned(),
                value: "def".to_owned(),
            },
        ];
        let (decoded, _) = decode_rfc2231_parameters(&raw);
        assert_eq!(decoded.get("name").unwrap().value, "abcdefghi");
    }

    #[test]
    fn single_percent_charset_tagged_value() {
        let raw = vec![RawParameter {
            name: "filename*".to_owned(),
            value: "UTF-8''%e2%82%ac%20rates".to_owned(),
        }];
        let (decoded, _) = decode_rfc2231_parameters(&raw);
        assert_eq!(decoded.get("filename").unwrap().value, "\u{20ac} rates");
    }

    #[test]
    fn malformed_continuation_index_is_skipped_with_warning() {
        let raw = vec![RawParameter {
            name: "name*abc".to_owned(),
            value: "x".to_owned(),
        }];
        let (decoded, warnings) = decode_rfc2231_parameters(&raw);
        assert!(decoded.is_empty());
        assert!(!warnings.is_empty());
    }

    #[test]
    fn relaxed_mode_allows_whitespace_split_value() {
        let params = split_parameters("addr=alice@example.com; keydata=AAA BBB CCC", true);
        let keydata = params.iter().find(|p| p.name == "keydata").unwrap();
        assert_eq!(keydata.value, "AAA BBB CCC");
    }

    #[test]
    fn strict_mode_stops_value_at_whitespace() {
        let params = split_parameters("charset=us-ascii; boundary=abc123", false);
        let boundary = params.iter().find(|p| p.name == "boundary").unwrap();
        assert_eq!(boundary.value, "abc123");
    }

    #[test]
    fn quoted_values_preserve_internal_semicolons() {
        let params = split_parameters(r#"filename="a;b.txt""#, false);
        assert_eq!(params[0].value, "a;b.txt");
    }
}
