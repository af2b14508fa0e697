//! RFC5322 address list parsing and rendering (C2)
//!
//! Supports display-name / angle-addr, groups, quoted strings, and nested
//! comments (tracked by a depth counter). Parsing never mutates the mailbox
//! text; IDN conversion only happens on explicit [`AddressList::to_intl`] /
//! [`AddressList::to_local`] calls.

use crate::errors::ParseWarning;

/// What role this list node plays
///
/// Group syntax is preserved by a zero-mailbox sentinel marking group
/// boundaries, per spec §3: a [`AddressKind::GroupStart`] node carries the
/// group name in `personal`, member [`AddressKind::Mailbox`] nodes follow,
/// and a [`AddressKind::GroupEnd`] node (both fields `None`) closes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Mailbox,
    GroupStart,
    GroupEnd,
}

/// One node of an address list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub kind: AddressKind,
    /// `user@domain`; `None` for group sentinels
    pub mailbox: Option<String>,
    /// Display name, or the group name for a `GroupStart`
    pub personal: Option<String>,
    /// Set once `to_intl` has ASCII-normalised `mailbox`
    pub idn_checked: bool,
    /// Set once the mailbox has been converted for international display
    pub intl: bool,
}

impl Address {
    fn mailbox(mailbox: String, personal: Option<String>) -> Self {
        Self {
            kind: AddressKind::Mailbox,
            mailbox: Some(mailbox),
            personal,
            idn_checked: false,
            intl: false,
        }
    }

    fn group_start(name: Option<String>) -> Self {
        Self {
            kind: AddressKind::GroupStart,
            mailbox: None,
            personal: name,
            idn_checked: false,
            intl: false,
        }
    }

    fn group_end() -> Self {
        Self {
            kind: AddressKind::GroupEnd,
            mailbox: None,
            personal: None,
            idn_checked: false,
            intl: false,
        }
    }
}

/// An owned, ordered list of addresses (forward-linked conceptually; stored
/// as a `Vec` since lists here are short-lived and never cyclic)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressList {
    pub addrs: Vec<Address>,
}

impl AddressList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Address> {
        self.addrs.iter()
    }

    /// Parse an RFC5322 address field value (no folding — feed an already
    /// unfolded header value from C3).
    ///
    /// Malformed input yields a best-effort partial list plus parse
    /// warnings; callers decide whether to reject.
    pub fn parse(input: &str) -> (Self, Vec<ParseWarning>) {
        let mut p = Parser::new(input);
        let mut list = AddressList::new();
        let mut warnings = Vec::new();
        p.skip_cfws();
        while !p.at_end() {
            match p.parse_one_entry() {
                Ok(mut parsed) => list.addrs.append(&mut parsed),
                Err(msg) => {
                    warnings.push(ParseWarning::new("address", msg));
                    p.skip_to_next_comma();
                }
            }
            p.skip_cfws();
            if p.peek() == Some(',') {
                p.bump();
                p.skip_cfws();
            } else {
                break;
            }
        }
        (list, warnings)
    }

    /// Render the list back to RFC5322 text, preserving group syntax and
    /// re-quoting any display name containing characters outside the
    /// unquoted-atext set.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut in_group = false;
        let mut first_in_scope = true;
        for addr in &self.addrs {
            match addr.kind {
                AddressKind::GroupStart => {
                    if !first_in_scope {
                        out.push_str(", ");
                    }
                    let name = addr.personal.as_deref().unwrap_or("");
                    out.push_str(&quote_if_needed(name));
                    out.push(':');
                    in_group = true;
                    first_in_scope = true;
                }
                AddressKind::GroupEnd => {
                    out.push(';');
                    in_group = false;
                    first_in_scope = false;
                }
                AddressKind::Mailbox => {
                    if !first_in_scope {
                        out.push_str(", ");
                    }
                    render_mailbox(addr, &mut out);
                    first_in_scope = false;
                }
            }
            let _ = in_group;
        }
        out
    }

    /// Convert all mailboxes to ASCII (Unicode domain → Punycode) for the
    /// wire. Never invoked implicitly by `parse`.
    pub fn to_intl(&mut self) {
        for addr in &mut self.addrs {
            let Some(mailbox) = addr.mailbox.as_mut() else {
                continue;
            };
            let Some((local, domain)) = mailbox.rsplit_once('@') else {
                continue;
            };
            if domain.is_ascii() {
                continue;
            }
            if let Ok(ascii_domain) = idna::domain_to_ascii(domain) {
                *mailbox = format!("{local}@{ascii_domain}");
            }
            addr.idn_checked = true;
        }
    }

    /// Convert all mailboxes back to Unicode for local display.
    pub fn to_local(&mut self) {
        for addr in &mut self.addrs {
            let Some(mailbox) = addr.mailbox.as_mut() else {
                continue;
            };
            let Some((local, domain)) = mailbox.rsplit_once('@') else {
                continue;
            };
            if !domain.split('.').any(|label| label.starts_with("xn--")) {
                continue;
            }
            if let Ok((unicode_domain, _)) = idna::domain_to_unicode(domain) {
                *mailbox = format!("{local}@{unicode_domain}");
            }
            addr.intl = true;
        }
    }
}

fn render_mailbox(addr: &Address, out: &mut String) {
    let mailbox = addr.mailbox.as_deref().unwrap_or("");
    if let Some(personal) = addr.personal.as_deref().filter(|p| !p.is_empty()) {
        out.push_str(&quote_if_needed(personal));
        out.push_str(" <");
        out.push_str(mailbox);
        out.push('>');
    } else {
        out.push_str(mailbox);
    }
}

fn needs_quoting(s: &str) -> bool {
    !s.chars().all(|c| {
        c.is_ascii_alphanumeric()
            || matches!(
                c,
                '!' | '#'
                    | '$'
                    | '%'
                    | '&'
                    | '\''
                    | '*'
                    | '+'
                    | '-'
                    | '/'
                    | '='
                    | '?'
                    | '^'
                    | '_'
                    | '`'
                    | '{'
                    | '|'
                    | '}'
                    | '~'
                    | ' '
            )
    })
}

fn quote_if_needed(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    if !needs_quoting(s) {
        return s.to_owned();
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Hand-rolled recursive-descent scanner over the address field grammar
struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    _src: &'a str,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            _src: input,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    /// Skip whitespace and (possibly nested) comments
    fn skip_cfws(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('(') => {
                    self.skip_comment();
                }
                _ => break,
            }
        }
    }

    fn skip_comment(&mut self) {
        let mut depth = 0i32;
        loop {
            match self.bump() {
                Some('(') => depth += 1,
                Some(')') => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                Some('\\') => {
                    self.bump();
                }
                Some(_) => {}
                None => break,
            }
        }
    }

    fn skip_to_next_comma(&mut self) {
        while let Some(c) = self.peek() {
            if c == ',' {
                break;
            }
            self.bump();
        }
    }

    /// Parse a quoted-string, returning its unescaped content
    fn parse_quoted_string(&mut self) -> Result<String, String> {
        debug_assert_eq!(self.peek(), Some('"'));
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some(c) => out.push(c),
                    None => return Err("unterminated quoted-string".to_owned()),
                },
                Some(c) => out.push(c),
                None => return Err("unterminated quoted-string".to_owned()),
            }
        }
    }

    /// An unquoted atom run: letters/digits and atext punctuation, no
    /// whitespace
    fn parse_atom(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() || matches!(c, '(' | ')' | '<' | '>' | '@' | ',' | ';' | ':' | '"') {
                break;
            }
            out.push(c);
            self.bump();
        }
        out
    }

    /// A display-name phrase: a run of quoted-strings and atoms separated
    /// by CFWS, terminated by `:`, `<`, `@`, `,`, or `;`.
    fn parse_phrase(&mut self) -> String {
        let mut words = Vec::new();
        loop {
            self.skip_cfws();
            match self.peek() {
                Some('"') => match self.parse_quoted_string() {
                    Ok(s) => words.push(s),
                    Err(_) => break,
                },
                Some(c)
                    if !c.is_whitespace()
                        && !matches!(c, '(' | ')' | '<' | '>' | '@' | ',' | ';' | ':') =>
                {
                    words.push(self.parse_atom());
                }
                _ => break,
            }
        }
        words.join(" ")
    }

    /// A bare `local@domain` addr-spec, not including angle brackets
    fn parse_addr_spec(&mut self) -> Result<String, String> {
        let local = if self.peek() == Some('"') {
            self.parse_quoted_string()?
        } else {
            self.parse_atom()
        };
        if local.is_empty() {
            return Err("empty local-part".to_owned());
        }
        self.skip_cfws();
        if self.bump() != Some('@') {
            return Err("missing '@' in addr-spec".to_owned());
        }
        self.skip_cfws();
        let domain = self.parse_atom();
        if domain.is_empty() {
            return Err("empty domain".to_owned());
        }
        Ok(format!("{local}@{domain}"))
    }

    /// Parse one top-level entry: a group, or a mailbox (possibly with a
    /// display name), returning every [`Address`] node it produces.
    fn parse_one_entry(&mut self) -> Result<Vec<Address>, String> {
        let checkpoint = self.pos;
        let phrase = self.parse_phrase();
        self.skip_cfws();

        if self.peek() == Some(':') {
            // group: "name:" mailbox-list ";"
            self.bump();
            let mut out = vec![Address::group_start(Some(phrase))];
            self.skip_cfws();
            while self.peek() != Some(';') && !self.at_end() {
                match self.parse_mailbox_only() {
                    Ok(addr) => out.push(addr),
                    Err(msg) => return Err(msg),
                }
                self.skip_cfws();
                if self.peek() == Some(',') {
                    self.bump();
                    self.skip_cfws();
                } else {
                    break;
                }
            }
            if self.bump() != Some(';') {
                return Err("unterminated group: missing ';'".to_owned());
            }
            out.push(Address::group_end());
            return Ok(out);
        }

        if self.peek() == Some('<') {
            self.bump();
            self.skip_cfws();
            let spec = self.parse_addr_spec()?;
            self.skip_cfws();
            if self.bump() != Some('>') {
                return Err("unterminated angle-addr".to_owned());
            }
            let personal = if phrase.is_empty() { None } else { Some(phrase) };
            return Ok(vec![Address::mailbox(spec, personal)]);
        }

        // no phrase consumed meaningfully and no ':' or '<' — must be a
        // bare addr-spec; rewind and parse it directly.
        self.pos = checkpoint;
        let spec = self.parse_addr_spec()?;
        Ok(vec![Address::mailbox(spec, None)])
    }

    /// Parse a single mailbox (used inside group member lists: no nested
    /// groups allowed there).
    fn parse_mailbox_only(&mut self) -> Result<Address, String> {
        let checkpoint = self.pos;
        let phrase = self.parse_phrase();
        self.skip_cfws();
        if self.peek() == Some('<') {
            self.bump();
            self.skip_cfws();
            let spec = self.parse_addr_spec()?;
            self.skip_cfws();
            if self.bump() != Some('>') {
                return Err("unterminated angle-addr".to_owned());
            }
            let personal = if phrase.is_empty() { None } else { Some(phrase) };
            return Ok(Address::mailbox(spec, personal));
        }
        self.pos = checkpoint;
        let spec = self.parse_addr_spec()?;
        Ok(Address::mailbox(spec, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_addr_spec() {
        let (list, warnings) = AddressList::parse("user@example.com");
        assert!(warnings.is_empty());
        assert_eq!(list.addrs.len(), 1);
        assert_eq!(list.addrs[0].mailbox.as_deref(), Some("user@example.com"));
        assert_eq!(list.addrs[0].personal, None);
    }

    #[test]
    fn parses_display_name_angle_addr() {
        let (list, warnings) = AddressList::parse("\"Jane Doe\" <jane@example.com>");
        assert!(warnings.is_empty());
        assert_eq!(list.addrs.len(), 1);
        assert_eq!(list.addrs[0].personal.as_deref(), Some("Jane Doe"));
        assert_eq!(list.addrs[0].mailbox.as_deref(), Some("jane@example.com"));
    }

    #[test]
    fn parses_multiple_addresses() {
        let (list, _) = AddressList::parse("a@example.com, b@example.com");
        assert_eq!(list.addrs.len(), 2);
        assert_eq!(list.addrs[0].mailbox.as_deref(), Some("a@example.com"));
        assert_eq!(list.addrs[1].mailbox.as_deref(), Some("b@example.com"));
    }

    #[test]
    fn skips_nested_comments() {
        let (list, warnings) = AddressList::parse("user(this (nested) comment)@example.com");
        assert!(warnings.is_empty());
        assert_eq!(list.addrs[0].mailbox.as_deref(), Some("user@example.com"));
    }

    /// S6: empty group round-trips exactly
    #[test]
    fn empty_group_round_trips() {
        let input = "Undisclosed recipients:;";
        let (list, warnings) = AddressList::parse(input);
        assert!(warnings.is_empty());
        assert_eq!(list.addrs.len(), 2);
        assert_eq!(list.addrs[0].kind, AddressKind::GroupStart);
        assert_eq!(list.addrs[0].mailbox, None);
        assert_eq!(
            list.addrs[0].personal.as_deref(),
            Some("Undisclosed recipients")
        );
        assert_eq!(list.addrs[1].kind, AddressKind::GroupEnd);
        assert_eq!(list.render(), input);
    }

    #[test]
    fn group_with_members_round_trips() {
        let input = "A Group: one@example.com, two@example.com;";
        let (list, warnings) = AddressList::parse(input);
        assert!(warnings.is_empty());
        assert_eq!(list.render(), input);
    }

    #[test]
    fn quotes_personal_name_with_special_characters() {
        let mut list = AddressList::new();
        list.addrs.push(Address::mailbox(
            "user@example.com".to_owned(),
            Some("Doe, Jane".to_owned()),
        ));
        assert_eq!(list.render(), "\"Doe, Jane\" <user@example.com>");
    }

    #[test]
    fn malformed_input_yields_partial_list_and_warning() {
        let (list, warnings) = AddressList::parse("not an address @, good@example.com");
        assert!(!warnings.is_empty());
        assert!(list.addrs.iter().any(|a| a.mailbox.as_deref() == Some("good@example.com")));
    }
}
