//! MIME body tree construction (C5)
//!
//! Grounded on `examples/original_source/parse.c`'s `mutt_parse_part`/
//! `mutt_read_mime_header` recursion, redesigned per §9's guidance against
//! cyclic parent/child pointers: nodes live in a flat `Vec` inside
//! [`BodyArena`] and are addressed by [`BodyId`], a plain index. A node's
//! children are stored as a `Vec<BodyId>` rather than sibling pointers.

use std::io::{BufRead, Read};

use crate::encoding::{decode_encoded_words, decode_rfc2231_parameters, split_parameters, RawParameter};
use crate::errors::{CoreError, CoreResult, ParseWarning};
use crate::header::{read_header_line, HeaderLine};

/// Index into a [`BodyArena`]. Stable for the arena's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BodyId(usize);

/// Resource bounds enforced while building a tree, taken from `Config`.
#[derive(Debug, Clone, Copy)]
pub struct MimeLimits {
    pub max_depth: u32,
    pub max_parts: usize,
}

impl Default for MimeLimits {
    fn default() -> Self {
        Self {
            max_depth: 30,
            max_parts: 5000,
        }
    }
}

/// Which disposition classification a leaf received during attachment
/// counting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachClass {
    Root,
    Inline,
    Attach,
    None,
}

#[derive(Debug, Clone, Default)]
pub struct BodyNode {
    pub content_type: String,
    pub subtype: String,
    /// Non-standard `X-` subtype, preserved verbatim when the registered
    /// type/subtype pair is unrecognised
    pub xtype: Option<String>,
    pub parameters: Vec<(String, String)>,
    pub description: Option<String>,
    pub disposition: Option<String>,
    pub filename: Option<String>,
    pub d_filename: Option<String>,
    pub form_name: Option<String>,
    pub charset: Option<String>,
    pub encoding: String,
    /// Offset of this part's own header block
    pub hdr_offset: u64,
    /// Offset immediately past this part's headers, where its content begins
    pub offset: u64,
    /// Length of the encoded payload, including nested delimiters
    pub length: u64,
    pub parts: Vec<BodyId>,
    /// Unfolded header lines of the nested message, for `message/rfc822`
    pub mime_headers: Vec<(String, String)>,
    pub attach_count: u32,
    pub attach_qualifies: bool,
    pub attach_class: AttachClass,
    /// Set when traditional inline-PGP detection found a banner
    pub x_action: Option<String>,
    /// Depth at which the recursion bound forced a text/plain downgrade
    pub depth_capped: bool,
}

impl Default for AttachClass {
    fn default() -> Self {
        AttachClass::None
    }
}

impl BodyNode {
    fn new() -> Self {
        Self {
            content_type: "text".to_owned(),
            subtype: "plain".to_owned(),
            encoding: "7bit".to_owned(),
            ..Default::default()
        }
    }

    pub fn is_multipart(&self) -> bool {
        self.content_type.eq_ignore_ascii_case("multipart")
    }

    pub fn is_message(&self) -> bool {
        self.content_type.eq_ignore_ascii_case("message")
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Owns every [`BodyNode`] in a parsed tree
#[derive(Debug, Default)]
pub struct BodyArena {
    nodes: Vec<BodyNode>,
}

impl BodyArena {
    pub fn get(&self, id: BodyId) -> &BodyNode {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: BodyId) -> &mut BodyNode {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn insert(&mut self, node: BodyNode) -> BodyId {
        self.nodes.push(node);
        BodyId(self.nodes.len() - 1)
    }

    /// Depth-first attachment classification.
    ///
    /// `root_lists`/`inline_lists`/`attach_lists` are `(major, minor_regex)`
    /// allow/deny pairs; a part is counted if it matches an allow entry and
    /// no later deny entry for the same list. A `multipart/alternative`
    /// root's immediate children are treated as "root" parts.
    pub fn count_attachments(&mut self, root: BodyId, classify: &AttachmentPolicy) -> u32 {
        let is_alternative_root = {
            let node = self.get(root);
            node.is_multipart() && node.subtype.eq_ignore_ascii_case("alternative")
        };
        self.classify_recursive(root, classify, is_alternative_root)
    }

    fn classify_recursive(&mut self, id: BodyId, classify: &AttachmentPolicy, treat_as_root: bool) -> u32 {
        let children = self.get(id).parts.clone();
        if children.is_empty() {
            let class = if treat_as_root {
                AttachClass::Root
            } else {
                classify.classify(self.get(id))
            };
            let qualifies = !matches!(class, AttachClass::None);
            let node = self.get_mut(id);
            node.attach_class = class;
            node.attach_qualifies = qualifies;
            return u32::from(qualifies);
        }

        let mut total = 0;
        for child in children {
            total += self.classify_recursive(child, classify, treat_as_root);
        }
        let node = self.get_mut(id);
        node.attach_count = total;
        total
    }
}

/// Allow/deny regex lists for attachment classification, one set per
/// placement context
#[derive(Debug, Clone, Default)]
pub struct AttachmentPolicy {
    pub root_allow: Vec<(String, regex::Regex)>,
    pub root_deny: Vec<(String, regex::Regex)>,
    pub inline_allow: Vec<(String, regex::Regex)>,
    pub inline_deny: Vec<(String, regex::Regex)>,
    pub attach_allow: Vec<(String, regex::Regex)>,
    pub attach_deny: Vec<(String, regex::Regex)>,
}

impl AttachmentPolicy {
    fn classify(&self, node: &BodyNode) -> AttachClass {
        let is_inline = node
            .disposition
            .as_deref()
            .is_none_or(|d| d.eq_ignore_ascii_case("inline"));
        if is_inline && self.matches(&self.inline_allow, &self.inline_deny, node) {
            return AttachClass::Inline;
        }
        if self.matches(&self.attach_allow, &self.attach_deny, node) {
            return AttachClass::Attach;
        }
        AttachClass::None
    }

    fn matches(&self, allow: &[(String, regex::Regex)], deny: &[(String, regex::Regex)], node: &BodyNode) -> bool {
        let allowed = allow
            .iter()
            .any(|(major, minor)| node.content_type.eq_ignore_ascii_case(major) && minor.is_match(&node.subtype));
        if !allowed {
            return false;
        }
        !deny
            .iter()
            .any(|(major, minor)| node.content_type.eq_ignore_ascii_case(major) && minor.is_match(&node.subtype))
    }
}

const PGP_MESSAGE_BANNER: &str = "-----BEGIN PGP MESSAGE-----";
const PGP_SIGNED_BANNER: &str = "-----BEGIN PGP SIGNED MESSAGE-----";
const PGP_PUBKEY_BANNER: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----";

/// Wraps a reader to track total bytes consumed through it, via either
/// `Read::read` or `BufRead::consume`, so the tree builder can populate
/// each node's `hdr_offset`/`offset`/`length` (§3) as it descends.
struct CountingReader<R> {
    inner: R,
    position: u64,
}

impl<R> CountingReader<R> {
    fn new(inner: R, start: u64) -> Self {
        Self { inner, position: start }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: BufRead> BufRead for CountingReader<R> {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt);
        self.position += amt as u64;
    }
}

/// A reader that can report how many bytes have been consumed from it so
/// far. Only [`CountingReader`] implements this; the recursive tree
/// builder is generic over it so every level of the recursion can read
/// its own byte position without threading an explicit counter through
/// every call.
trait PositionedRead: BufRead {
    fn position(&self) -> u64;
}

impl<R: BufRead> PositionedRead for CountingReader<R> {
    fn position(&self) -> u64 {
        self.position
    }
}

/// Parse a MIME tree from a stream positioned at the start of a part's
/// headers (top-level message or a nested `message/rfc822`).
pub fn parse_mime<R: BufRead>(
    reader: &mut R,
    limits: MimeLimits,
    default_charset: &str,
) -> CoreResult<(BodyArena, BodyId, Vec<ParseWarning>)> {
    let mut arena = BodyArena::default();
    let mut warnings = Vec::new();
    let mut part_count = 0usize;
    let mut counted = CountingReader::new(reader, 0);
    let root = parse_part(&mut counted, &mut arena, 0, &limits, &mut part_count, default_charset, &mut warnings)?;
    Ok((arena, root, warnings))
}

/// Build the MIME tree for a top-level message whose header block was
/// already consumed by the caller (e.g. alongside envelope parsing via
/// [`crate::header::read_all_headers_with_len`]), continuing to read the
/// body from `reader`. `header_len` is the byte length of that
/// already-consumed header block, so this part's `offset` lines up with
/// where the caller's read actually left the stream rather than
/// restarting from zero.
pub fn parse_mime_from_lines<R: BufRead>(
    reader: &mut R,
    header_lines: &[crate::header::HeaderLine],
    header_len: u64,
    limits: MimeLimits,
    default_charset: &str,
) -> CoreResult<(BodyArena, BodyId, Vec<ParseWarning>)> {
    let mut arena = BodyArena::default();
    let mut warnings = Vec::new();
    let mut part_count = 1usize;
    let mut counted = CountingReader::new(reader, header_len);
    let root = parse_part_from_lines(&mut counted, &mut arena, header_lines, 0, &limits, &mut part_count, default_charset, &mut warnings)?;
    Ok((arena, root, warnings))
}

#[allow(clippy::too_many_arguments)]
fn parse_part_from_lines<R: PositionedRead>(
    reader: &mut R,
    arena: &mut BodyArena,
    header_lines: &[crate::header::HeaderLine],
    depth: u32,
    limits: &MimeLimits,
    part_count: &mut usize,
    default_charset: &str,
    warnings: &mut Vec<ParseWarning>,
) -> CoreResult<BodyId> {
    if *part_count > limits.max_parts {
        return Err(CoreError::Limit(format!(
            "MIME part count exceeded {} while parsing",
            limits.max_parts
        )));
    }
    let mut node = BodyNode::new();
    for line in header_lines {
        let HeaderLine::Field { name, value } = line else {
            continue;
        };
        apply_header(&mut node, name, value, warnings);
    }
    // The header block itself was read by the caller before this entry
    // point was reached; its own start is the beginning of the message.
    node.hdr_offset = 0;
    node.offset = reader.position();
    finish_node(reader, arena, node, depth, limits, part_count, default_charset, warnings)
}

#[allow(clippy::too_many_arguments)]
fn parse_part<R: PositionedRead>(
    reader: &mut R,
    arena: &mut BodyArena,
    depth: u32,
    limits: &MimeLimits,
    part_count: &mut usize,
    default_charset: &str,
    warnings: &mut Vec<ParseWarning>,
) -> CoreResult<BodyId> {
    *part_count += 1;
    if *part_count > limits.max_parts {
        return Err(CoreError::Limit(format!(
            "MIME part count exceeded {} while parsing",
            limits.max_parts
        )));
    }

    let mut node = BodyNode::new();
    node.hdr_offset = reader.position();
    while let Some(line) = read_header_line(reader)? {
        let HeaderLine::Field { name, value } = line else {
            continue;
        };
        apply_header(&mut node, &name, &value, warnings);
    }
    node.offset = reader.position();

    finish_node(reader, arena, node, depth, limits, part_count, default_charset, warnings)
}

#[allow(clippy::too_many_arguments)]
fn finish_node<R: PositionedRead>(
    reader: &mut R,
    arena: &mut BodyArena,
    mut node: BodyNode,
    depth: u32,
    limits: &MimeLimits,
    part_count: &mut usize,
    default_charset: &str,
    warnings: &mut Vec<ParseWarning>,
) -> CoreResult<BodyId> {
    if node.content_type.eq_ignore_ascii_case("text") && node.charset.is_none() {
        node.charset = Some(default_charset.to_owned());
    }
    strip_doubled_charset(&mut node, warnings);

    if depth > limits.max_depth {
        node.content_type = "text".to_owned();
        node.subtype = "plain".to_owned();
        node.parts.clear();
        node.depth_capped = true;
        warnings.push(ParseWarning::new(
            "mime",
            format!("recursion depth exceeded {}, downgraded to text/plain", limits.max_depth),
        ));
        return Ok(arena.insert(node));
    }

    if node.is_multipart() {
        let Some(boundary) = node.param("boundary").map(str::to_owned) else {
            warnings.push(ParseWarning::new("mime", "multipart with no boundary parameter"));
            return Ok(arena.insert(node));
        };
        let offset = node.offset;
        let id = arena.insert(node);
        let children = parse_multipart_children(
            reader,
            arena,
            &boundary,
            depth + 1,
            limits,
            part_count,
            default_charset,
            warnings,
        )?;
        let end = reader.position();
        let node = arena.get_mut(id);
        node.parts = children;
        node.length = end.saturating_sub(offset);
        return Ok(id);
    }

    if node.is_message() && node.subtype.eq_ignore_ascii_case("rfc822") {
        let offset = node.offset;
        let child = parse_part(reader, arena, depth + 1, limits, part_count, default_charset, warnings)?;
        let end = reader.position();
        let id = arena.insert(node);
        let node = arena.get_mut(id);
        node.parts = vec![child];
        node.length = end.saturating_sub(offset);
        return Ok(id);
    }

    if node.is_message() && node.subtype.eq_ignore_ascii_case("external-body") {
        // headers only, no body to scan or descend into
        return Ok(arena.insert(node));
    }

    detect_inline_pgp(reader, &mut node)?;
    if depth == 0 {
        // the true root of the parse has no enclosing multipart boundary
        // scan to size it later, so size it here by draining to EOF
        drain_to_eof(reader)?;
    }
    node.length = reader.position().saturating_sub(node.offset);
    Ok(arena.insert(node))
}

/// Consume the remainder of a reader, used to size a root-level leaf part
/// whose length nothing else will compute (a nested leaf's length is
/// fixed up by the enclosing [`parse_multipart_children`] boundary scan
/// instead).
fn drain_to_eof<R: Read>(reader: &mut R) -> CoreResult<()> {
    let mut sink = Vec::new();
    reader
        .read_to_end(&mut sink)
        .map_err(|e| CoreError::Parse(format!("body drain failed: {e}")))?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn parse_multipart_children<R: PositionedRead>(
    reader: &mut R,
    arena: &mut BodyArena,
    boundary: &str,
    depth: u32,
    limits: &MimeLimits,
    part_count: &mut usize,
    default_charset: &str,
    warnings: &mut Vec<ParseWarning>,
) -> CoreResult<Vec<BodyId>> {
    let open = format!("--{boundary}");
    let close = format!("--{boundary}--");
    let mut children = Vec::new();

    // skip preamble up to the first boundary line
    loop {
        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .map_err(|e| CoreError::Parse(format!("multipart preamble read failed: {e}")))?;
        if n == 0 {
            warnings.push(ParseWarning::new("mime", "multipart preamble ended without a boundary"));
            return Ok(children);
        }
        if line.trim_end() == open {
            break;
        }
    }

    loop {
        let child = parse_part(reader, arena, depth, limits, part_count, default_charset, warnings)?;
        children.push(child);
        let child_offset = arena.get(child).offset;

        // consume body lines until the next boundary or the final boundary
        loop {
            let line_start = reader.position();
            let mut line = String::new();
            let n = reader
                .read_line(&mut line)
                .map_err(|e| CoreError::Parse(format!("multipart body read failed: {e}")))?;
            let trimmed = line.trim_end();
            if n == 0 {
                warnings.push(ParseWarning::new(
                    "mime",
                    "multipart ended without a final boundary; last part's length is the residual bytes",
                ));
                arena.get_mut(child).length = line_start.saturating_sub(child_offset);
                return Ok(children);
            }
            if trimmed == close {
                arena.get_mut(child).length = line_start.saturating_sub(child_offset);
                return Ok(children);
            }
            if trimmed == open {
                arena.get_mut(child).length = line_start.saturating_sub(child_offset);
                break;
            }
        }
    }
}

fn apply_header(node: &mut BodyNode, name: &str, raw_value: &str, warnings: &mut Vec<ParseWarning>) {
    let (value, mut decode_warnings) = decode_encoded_words(raw_value);
    warnings.append(&mut decode_warnings);

    if name.eq_ignore_ascii_case("content-type") {
        let (major_subtype, rest) = split_once_semicolon(&value);
        if let Some((major, subtype)) = major_subtype.split_once('/') {
            node.content_type = major.trim().to_owned();
            node.subtype = subtype.trim().to_owned();
        } else if !major_subtype.trim().is_empty() {
            node.content_type = "application".to_owned();
            node.subtype = "octet-stream".to_owned();
            node.xtype = Some(major_subtype.trim().to_owned());
        }
        let raw_params = split_parameters(rest, false);
        apply_params(node, &raw_params, warnings);
    } else if name.eq_ignore_ascii_case("content-transfer-encoding") {
        node.encoding = value.trim().to_ascii_lowercase();
    } else if name.eq_ignore_ascii_case("content-description") {
        node.description = Some(value.trim().to_owned());
    } else if name.eq_ignore_ascii_case("content-disposition") {
        let (disp, rest) = split_once_semicolon(&value);
        node.disposition = Some(disp.trim().to_ascii_lowercase());
        let raw_params = split_parameters(rest, false);
        apply_disposition_params(node, &raw_params, warnings);
    }
}

fn apply_params(node: &mut BodyNode, raw: &[RawParameter], warnings: &mut Vec<ParseWarning>) {
    let (decoded, mut param_warnings) = decode_rfc2231_parameters(raw);
    warnings.append(&mut param_warnings);
    for (name, param) in decoded {
        if name.eq_ignore_ascii_case("charset") {
            node.charset = Some(param.value.clone());
        }
        if name.eq_ignore_ascii_case("name") {
            node.form_name = Some(param.value.clone());
        }
        node.parameters.push((name, param.value));
    }
}

fn apply_disposition_params(node: &mut BodyNode, raw: &[RawParameter], warnings: &mut Vec<ParseWarning>) {
    let (decoded, mut param_warnings) = decode_rfc2231_parameters(raw);
    warnings.append(&mut param_warnings);
    for (name, param) in decoded {
        if name.eq_ignore_ascii_case("filename") {
            node.d_filename = Some(param.value.clone());
            node.filename.get_or_insert(param.value);
        }
    }
}

fn split_once_semicolon(value: &str) -> (&str, &str) {
    match value.find(';') {
        Some(idx) => (&value[..idx], &value[idx + 1..]),
        None => (value, ""),
    }
}

/// A malformed `charset=charset=...` value strips one redundant layer.
fn strip_doubled_charset(node: &mut BodyNode, warnings: &mut Vec<ParseWarning>) {
    if let Some(charset) = &node.charset {
        if let Some(inner) = charset.strip_prefix("charset=") {
            warnings.push(ParseWarning::new("mime", "stripped doubled charset= prefix"));
            node.charset = Some(inner.to_owned());
        }
    }
}

/// Scan a text/plain part for a traditional inline-PGP banner and, on a
/// hit, tag it with an `x-action` rather than consuming the body (the
/// caller re-reads the part by offset/length when it acts on the tag).
fn detect_inline_pgp<R: Read>(reader: &mut R, node: &mut BodyNode) -> CoreResult<()> {
    if !node.content_type.eq_ignore_ascii_case("text") || !node.subtype.eq_ignore_ascii_case("plain") {
        return Ok(());
    }
    let mut sample = String::new();
    // bounded peek: enough to see a banner without buffering the whole body
    let mut limited = reader.take(8192);
    limited
        .read_to_string(&mut sample)
        .map_err(|e| CoreError::Parse(format!("inline PGP scan failed: {e}")))?;

    node.x_action = if sample.contains(PGP_MESSAGE_BANNER) {
        Some("pgp-decrypt".to_owned())
    } else if sample.contains(PGP_SIGNED_BANNER) {
        Some("pgp-verify".to_owned())
    } else if sample.contains(PGP_PUBKEY_BANNER) {
        Some("pgp-import-key".to_owned())
    } else {
        None
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(input: &str) -> (BodyArena, BodyId, Vec<ParseWarning>) {
        let mut cursor = Cursor::new(input.as_bytes().to_vec());
        parse_mime(&mut cursor, MimeLimits::default(), "us-ascii").unwrap()
    }

    #[test]
    fn leaf_part_defaults_to_text_plain() {
        let (arena, root, _) = parse("Subject: hi\r\n\r\nbody text\r\n");
        let node = arena.get(root);
        assert_eq!(node.content_type, "text");
        assert_eq!(node.subtype, "plain");
        assert_eq!(node.charset.as_deref(), Some("us-ascii"));
    }

    #[test]
    fn multipart_builds_children() {
        let input = "Content-Type: multipart/mixed; boundary=XYZ\r\n\r\n\
--XYZ\r\n\
Content-Type: text/plain\r\n\
\r\n\
first part\r\n\
--XYZ\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>second</p>\r\n\
--XYZ--\r\n";
        let (arena, root, warnings) = parse(input);
        assert!(warnings.is_empty());
        let node = arena.get(root);
        assert!(node.is_multipart());
        assert_eq!(node.parts.len(), 2);
        assert_eq!(arena.get(node.parts[0]).subtype, "plain");
        assert_eq!(arena.get(node.parts[1]).subtype, "html");
    }

    /// S3: missing final boundary
    #[test]
    fn s3_missing_final_boundary_tolerated() {
        let input = "Content-Type: multipart/mixed; boundary=XYZ\r\n\r\n\
--XYZ\r\n\
Content-Type: text/plain\r\n\
\r\n\
only part, no closing boundary\r\n";
        let (arena, root, warnings) = parse(input);
        assert!(!warnings.is_empty());
        let node = arena.get(root);
        assert_eq!(node.parts.len(), 1);
    }

    #[test]
    fn recursion_depth_cap_downgrades_to_text_plain() {
        // a nested message/rfc822 whose own content is itself a message,
        // which exceeds a max_depth of 0 on the inner recursion
        let nested_once = "Content-Type: message/rfc822\r\n\r\nContent-Type: text/plain\r\n\r\nleaf\r\n";
        let limits = MimeLimits {
            max_depth: 0,
            max_parts: 5000,
        };
        let mut cursor = Cursor::new(nested_once.as_bytes().to_vec());
        let (arena, root, warnings) = parse_mime(&mut cursor, limits, "us-ascii").unwrap();
        assert!(!warnings.is_empty());
        let node = arena.get(root);
        assert!(node.is_message());
        let inner = arena.get(node.parts[0]);
        assert!(inner.depth_capped);
        assert_eq!(inner.content_type, "text");
    }

    #[test]
    fn part_count_limit_is_enforced() {
        let mut boundary_body = String::from("Content-Type: multipart/mixed; boundary=B\r\n\r\n");
        for _ in 0..5 {
            boundary_body.push_str("--B\r\nContent-Type: text/plain\r\n\r\nx\r\n");
        }
        boundary_body.push_str("--B--\r\n");
        let mut cursor = Cursor::new(boundary_body.into_bytes());
        let limits = MimeLimits {
            max_depth: 30,
            max_parts: 3,
        };
        let err = parse_mime(&mut cursor, limits, "us-ascii").unwrap_err();
        assert!(matches!(err, CoreError::Limit(_)));
    }

    #[test]
    fn doubled_charset_parameter_is_stripped() {
        let input = "Content-Type: text/plain; charset=charset=utf-8\r\n\r\nbody\r\n";
        let (arena, root, warnings) = parse(input);
        assert_eq!(arena.get(root).charset.as_deref(), Some("utf-8"));
        assert!(warnings.iter().any(|w| w.detail.contains("doubled")));
    }

    #[test]
    fn detects_traditional_inline_pgp_message_banner() {
        let input = "Content-Type: text/plain\r\n\r\n-----BEGIN PGP MESSAGE-----\r\nhQE...\r\n-----END PGP MESSAGE-----\r\n";
        let (arena, root, _) = parse(input);
        assert_eq!(arena.get(root).x_action.as_deref(), Some("pgp-decrypt"));
    }

    #[test]
    fn rfc2231_filename_continuation_on_disposition() {
        let input = "Content-Type: application/octet-stream\r\n\
Content-Disposition: attachment; filename*0=\"long\"; filename*1=\"name.txt\"\r\n\
\r\n\
data\r\n";
        let (arena, root, _) = parse(input);
        assert_eq!(arena.get(root).filename.as_deref(), Some("longname.txt"));
    }

    #[test]
    fn leaf_part_at_top_level_gets_full_body_length() {
        let (arena, root, _) = parse("Content-Type: text/plain\r\n\r\nhello world\r\n");
        let node = arena.get(root);
        assert_eq!(node.offset, node.hdr_offset + "Content-Type: text/plain\r\n\r\n".len() as u64);
        assert_eq!(node.length, "hello world\r\n".len() as u64);
    }

    /// Property 3: every child's `offset..offset+length` span falls inside
    /// its parent's own span.
    #[test]
    fn multipart_children_offsets_and_lengths_fit_within_parent_span() {
        let input = "Content-Type: multipart/mixed; boundary=XYZ\r\n\r\n\
--XYZ\r\n\
Content-Type: text/plain\r\n\
\r\n\
first part\r\n\
--XYZ\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>second</p>\r\n\
--XYZ--\r\n";
        let (arena, root, _) = parse(input);
        let parent = arena.get(root);
        let parent_start = parent.offset;
        let parent_end = parent.offset + parent.length;
        assert!(parent.length > 0);
        for &child_id in &parent.parts {
            let child = arena.get(child_id);
            assert!(child.length > 0, "child must have a non-zero span");
            assert!(child.offset >= parent_start, "child offset must not precede parent's");
            assert!(
                child.offset + child.length <= parent_end,
                "child span must fit within parent span"
            );
            assert!(child.hdr_offset <= child.offset, "headers precede content");
        }
    }

    #[test]
    fn nested_message_rfc822_child_span_fits_within_parent() {
        let input = "Content-Type: message/rfc822\r\n\r\nSubject: inner\r\nContent-Type: text/plain\r\n\r\nleaf body\r\n";
        let (arena, root, _) = parse(input);
        let outer = arena.get(root);
        assert!(outer.is_message());
        assert_eq!(outer.parts.len(), 1);
        let inner = arena.get(outer.parts[0]);
        assert!(inner.offset >= outer.offset);
        assert!(inner.offset + inner.length <= outer.offset + outer.length);
    }

    #[test]
    fn attachment_counting_classifies_leaf() {
        let input = "Content-Type: multipart/mixed; boundary=XYZ\r\n\r\n\
--XYZ\r\n\
Content-Type: text/plain\r\n\
\r\n\
body\r\n\
--XYZ\r\n\
Content-Type: application/pdf\r\n\
Content-Disposition: attachment; filename=report.pdf\r\n\
\r\n\
%PDF\r\n\
--XYZ--\r\n";
        let (mut arena, root, _) = parse(input);
        let policy = AttachmentPolicy {
            attach_allow: vec![("application".to_owned(), regex::Regex::new(".*").unwrap())],
            ..Default::default()
        };
        let count = arena.count_attachments(root, &policy);
        assert_eq!(count, 1);
        let pdf_part = arena.get(root).parts[1];
        assert_eq!(arena.get(pdf_part).attach_class, AttachClass::Attach);
    }
}
