//! Lightweight HTML scanning and editing.
//!
//! WordPress output is not well-formed XML, and the transformer never needs a
//! full DOM: it needs to find elements, read their attributes and text, and
//! splice new markup in at precise places. [`Parsed`] scans a document into a
//! flat list of tags plus the element structure implied by them:
//!
//! ```text
//! <main id="inner-wrap"><article class="post"><h1>Title</h1></article></main>
//! ^-- tag 0            ^-- tag 1              ^2  ^3       ^-- 4      ^-- 5
//!
//! parent:    [None, Some(0), Some(1), -, -, -]
//! inner:     tag 0 -> 21..69, tag 1 -> 43..62, tag 2 -> 47..52
//! ```
//!
//! Tokenizing runs on a lenient `quick-xml` reader. HTML is looser than the
//! reader expects, so a few things are handled around it:
//!
//! | Input                              | Handling                                  |
//! |------------------------------------|-------------------------------------------|
//! | `1 < 2`, `<= 4`                    | `<` kept as text, reader restarted after it |
//! | `script`, `style`, `textarea` body | skipped up to the matching end tag        |
//! | `<p>a<p>b`, `<li>a<li>b`           | earlier element closed by the later one   |
//! | end tag with open elements above   | those elements close at the end tag       |
//!
//! Comments, doctypes and processing instructions produce no tags.
//!
//! Changes are collected as byte-range [`Edits`] and applied in one go,
//! leaving every untouched byte of the input exactly as it was.

use quick_xml::escape::{partial_escape, resolve_html5_entity};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::borrow::Cow;
use std::ops::Range;

/// Elements that never have content or an end tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose content is not markup.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea"];

/// Start tags that close an open `<p>`.
const CLOSES_PARAGRAPH: &[&str] = &[
    "address", "article", "aside", "blockquote", "details", "div", "dl", "fieldset", "figcaption",
    "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "main", "menu",
    "nav", "ol", "p", "pre", "section", "table", "ul",
];

/// Elements an implied `</p>` never looks past.
const BUTTON_SCOPE: &[&str] = &[
    "applet", "button", "caption", "html", "marquee", "object", "table", "td", "template", "th",
];

pub fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

/// One attribute as written in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    /// Lowercased name.
    pub name: String,
    /// Raw value, entities not decoded. Empty for bare attributes.
    pub value: String,
}

/// A start or end tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Lowercased element name.
    pub name: String,
    /// Byte offset of `<`.
    pub start: usize,
    /// Byte offset just past `>`.
    pub end: usize,
    pub attrs: Vec<Attr>,
    pub self_closing: bool,
    pub closing: bool,
}

impl Tag {
    /// Build a new start tag, not tied to any source position.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            start: 0,
            end: 0,
            attrs: Vec::new(),
            self_closing: false,
            closing: false,
        }
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|a| a.name == name)
    }

    pub fn set_attr(&mut self, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        match self.attrs.iter_mut().find(|a| a.name == name) {
            Some(a) => a.value = value.to_string(),
            None => self.attrs.push(Attr {
                name,
                value: value.to_string(),
            }),
        }
    }

    pub fn remove_attr(&mut self, name: &str) {
        self.attrs.retain(|a| a.name != name);
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or("").split_whitespace()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c == class)
    }

    /// Serialize the tag. Values are written double-quoted; a raw `"`
    /// inside a value becomes `&quot;`.
    pub fn render(&self) -> String {
        if self.closing {
            return format!("</{}>", self.name);
        }
        let mut elem = BytesStart::new(self.name.as_str());
        for attr in &self.attrs {
            let value = attr.value.replace('"', "&quot;");
            elem.push_attribute((attr.name.as_bytes(), value.as_bytes()));
        }
        let body = String::from_utf8_lossy(&elem);
        if self.self_closing {
            format!("<{body} />")
        } else {
            format!("<{body}>")
        }
    }
}

// =============================================================================
// Tokenizer
// =============================================================================

fn create_reader(src: &str) -> Reader<&[u8]> {
    let mut reader = Reader::from_str(src);
    reader.config_mut().trim_text(false);
    reader.config_mut().enable_all_checks(false);
    // Restarts drop the reader's own element stack.
    reader.config_mut().allow_unmatched_ends = true;
    reader
}

/// Lowercased element name, or `None` when the `<` does not open a tag.
fn element_name(raw: &[u8]) -> Option<String> {
    let raw = raw.trim_ascii();
    if !raw.first().is_some_and(|b| b.is_ascii_alphabetic()) {
        return None;
    }
    Some(String::from_utf8_lossy(raw).to_ascii_lowercase())
}

fn start_tag(elem: &BytesStart<'_>, start: usize, end: usize, self_closing: bool) -> Option<Tag> {
    let name = element_name(elem.name().as_ref())?;
    let mut attributes = elem.html_attributes();
    attributes.with_checks(false);
    let attrs = attributes
        .flatten()
        .map(|attr| Attr {
            name: String::from_utf8_lossy(attr.key.as_ref()).to_ascii_lowercase(),
            value: String::from_utf8_lossy(&attr.value).into_owned(),
        })
        .collect();
    Some(Tag {
        name,
        start,
        end,
        attrs,
        self_closing,
        closing: false,
    })
}

fn end_tag(name: String, start: usize, end: usize) -> Tag {
    Tag {
        name,
        start,
        end,
        attrs: Vec::new(),
        self_closing: false,
        closing: true,
    }
}

fn find_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let hay = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() || from >= hay.len() {
        return None;
    }
    (from..=hay.len().saturating_sub(needle.len()))
        .find(|&i| hay[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

/// End tag of a raw-text element whose body starts at `from`.
fn raw_text_end(src: &str, name: &str, from: usize) -> Option<Tag> {
    let start = find_ci(src, &format!("</{name}"), from)?;
    let end = start + src[start..].find('>')? + 1;
    Some(end_tag(name.to_string(), start, end))
}

/// Offset of the next `<` after the character at `from`.
fn next_markup(src: &str, from: usize) -> usize {
    let skip = src[from..].chars().next().map_or(0, char::len_utf8);
    src[from + skip..]
        .find('<')
        .map_or(src.len(), |rel| from + skip + rel)
}

/// Scan every start and end tag in document order.
pub fn scan(src: &str) -> Vec<Tag> {
    let mut tags = Vec::new();
    let mut base = 0;
    'restart: while base < src.len() {
        let mut reader = create_reader(&src[base..]);
        loop {
            let start = base + reader.buffer_position() as usize;
            let event = reader.read_event();
            let end = base + reader.buffer_position() as usize;
            match event {
                Ok(Event::Start(elem)) => {
                    let Some(tag) = start_tag(&elem, start, end, false) else {
                        base = next_markup(src, start);
                        continue 'restart;
                    };
                    if RAW_TEXT_ELEMENTS.contains(&tag.name.as_str()) {
                        let close = raw_text_end(src, &tag.name, end);
                        tags.push(tag);
                        match close {
                            Some(close) => {
                                base = close.end;
                                tags.push(close);
                            }
                            None => base = src.len(),
                        }
                        continue 'restart;
                    }
                    tags.push(tag);
                }
                Ok(Event::Empty(elem)) => match start_tag(&elem, start, end, true) {
                    Some(tag) => tags.push(tag),
                    None => {
                        base = next_markup(src, start);
                        continue 'restart;
                    }
                },
                Ok(Event::End(elem)) => match element_name(elem.name().as_ref()) {
                    Some(name) => tags.push(end_tag(name, start, end)),
                    None => {
                        base = next_markup(src, start);
                        continue 'restart;
                    }
                },
                Ok(Event::Eof) => break 'restart,
                Ok(_) => {}
                Err(err) => {
                    tracing::trace!(offset = start, %err, "markup treated as text");
                    base = next_markup(src, start);
                    continue 'restart;
                }
            }
        }
    }
    tags
}

/// Depth in `stack` of the open element that a new `name` start tag closes.
fn implied_close(tags: &[Tag], stack: &[usize], name: &str) -> Option<usize> {
    let (targets, boundary): (&[&str], &[&str]) = match name {
        "li" => (&["li"], &["ol", "ul"]),
        "dt" | "dd" => (&["dt", "dd"], &["dl"]),
        "tr" => (&["tr"], &["table", "thead", "tbody", "tfoot"]),
        "td" | "th" => (&["td", "th"], &["tr", "table"]),
        "thead" | "tbody" | "tfoot" => (&["thead", "tbody", "tfoot"], &["table"]),
        "option" => (&["option"], &["select", "datalist", "optgroup"]),
        _ if CLOSES_PARAGRAPH.contains(&name) => (&["p"], BUTTON_SCOPE),
        _ => return None,
    };
    for (depth, &open) in stack.iter().enumerate().rev() {
        let open_name = tags[open].name.as_str();
        if targets.contains(&open_name) {
            return Some(depth);
        }
        if boundary.contains(&open_name) {
            return None;
        }
    }
    None
}

/// A scanned document with element structure.
pub struct Parsed<'a> {
    pub src: &'a str,
    pub tags: Vec<Tag>,
    parent: Vec<Option<usize>>,
    inner_end: Vec<usize>,
    outer_end: Vec<usize>,
}

impl<'a> Parsed<'a> {
    pub fn parse(src: &'a str) -> Self {
        let tags = scan(src);
        let n = tags.len();
        let mut parent = vec![None; n];
        let mut inner_end = vec![src.len(); n];
        let mut outer_end = vec![src.len(); n];
        let mut stack: Vec<usize> = Vec::new();

        for (idx, tag) in tags.iter().enumerate() {
            if tag.closing {
                if let Some(depth) = stack.iter().rposition(|&open| tags[open].name == tag.name) {
                    for &open in &stack[depth + 1..] {
                        inner_end[open] = tag.start;
                        outer_end[open] = tag.start;
                    }
                    let open = stack[depth];
                    inner_end[open] = tag.start;
                    outer_end[open] = tag.end;
                    stack.truncate(depth);
                }
                continue;
            }
            if let Some(depth) = implied_close(&tags, &stack, &tag.name) {
                for &open in &stack[depth..] {
                    inner_end[open] = tag.start;
                    outer_end[open] = tag.start;
                }
                stack.truncate(depth);
            }
            parent[idx] = stack.last().copied();
            if tag.self_closing || is_void(&tag.name) {
                inner_end[idx] = tag.end;
                outer_end[idx] = tag.end;
            } else {
                stack.push(idx);
            }
        }

        Self {
            src,
            tags,
            parent,
            inner_end,
            outer_end,
        }
    }

    pub fn tag(&self, idx: usize) -> &Tag {
        &self.tags[idx]
    }

    pub fn parent(&self, idx: usize) -> Option<usize> {
        self.parent[idx]
    }

    /// Indices of all start tags.
    pub fn elements(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.tags.len()).filter(|&i| !self.tags[i].closing)
    }

    /// Indices of start tags with the given name.
    pub fn by_name<'s>(&'s self, name: &'s str) -> impl Iterator<Item = usize> + 's {
        self.elements().filter(move |&i| self.tags[i].name == name)
    }

    pub fn ancestors(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.parent[idx], move |&p| self.parent[p])
    }

    pub fn is_descendant_of(&self, idx: usize, ancestor: usize) -> bool {
        self.ancestors(idx).any(|a| a == ancestor)
    }

    /// Range covering the element from its start tag through its end tag.
    pub fn outer_range(&self, idx: usize) -> Range<usize> {
        self.tags[idx].start..self.outer_end[idx]
    }

    /// Range between the start tag and the end tag.
    pub fn inner_range(&self, idx: usize) -> Range<usize> {
        self.tags[idx].end..self.inner_end[idx]
    }

    pub fn outer(&self, idx: usize) -> &'a str {
        &self.src[self.outer_range(idx)]
    }

    pub fn inner(&self, idx: usize) -> &'a str {
        &self.src[self.inner_range(idx)]
    }

    /// Start tags matching a selector, in document order.
    pub fn select(&self, selector: &str) -> Vec<usize> {
        let Some(sel) = Selector::parse(selector) else {
            return Vec::new();
        };
        self.elements().filter(|&i| sel.matches(self, i)).collect()
    }

    pub fn select_first(&self, selector: &str) -> Option<usize> {
        let sel = Selector::parse(selector)?;
        self.elements().find(|&i| sel.matches(self, i))
    }

    /// Descendants of `root` matching a selector.
    pub fn select_within(&self, root: usize, selector: &str) -> Vec<usize> {
        self.select(selector)
            .into_iter()
            .filter(|&i| self.is_descendant_of(i, root))
            .collect()
    }

    pub fn exists(&self, selector: &str) -> bool {
        self.select_first(selector).is_some()
    }

    pub fn matches(&self, idx: usize, selector: &str) -> bool {
        Selector::parse(selector).is_some_and(|s| s.matches(self, idx))
    }

    /// Visible text of an element: tags dropped, script/style bodies
    /// skipped, entities decoded, whitespace collapsed.
    pub fn text(&self, idx: usize) -> String {
        self.text_filtered(idx, |_| false)
    }

    /// Like [`Parsed::text`], but whole subtrees for which `skip` returns
    /// true are left out.
    pub fn text_filtered(&self, idx: usize, skip: impl Fn(usize) -> bool) -> String {
        let range = self.inner_range(idx);
        let mut raw = String::new();
        let mut cursor = range.start;
        let mut i = idx + 1;
        while i < self.tags.len() && self.tags[i].start < range.end {
            let tag = &self.tags[i];
            if tag.start > cursor {
                raw.push_str(&self.src[cursor..tag.start]);
            }
            raw.push(' ');
            cursor = tag.end;
            if !tag.closing
                && (RAW_TEXT_ELEMENTS.contains(&tag.name.as_str()) || tag.name == "noscript" || skip(i))
            {
                cursor = self.outer_end[i].max(tag.end);
                while i + 1 < self.tags.len() && self.tags[i + 1].start < cursor {
                    i += 1;
                }
            }
            i += 1;
        }
        if cursor < range.end {
            raw.push_str(&self.src[cursor..range.end]);
        }
        collapse_whitespace(&decode_entities(&raw))
    }
}

// =============================================================================
// Selectors
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum AttrOp {
    Exists,
    Equals(String),
    Contains(String),
    StartsWith(String),
    Word(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Compound {
    name: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, AttrOp)>,
}

impl Compound {
    fn matches(&self, tag: &Tag) -> bool {
        if let Some(name) = &self.name
            && &tag.name != name
        {
            return false;
        }
        if let Some(id) = &self.id
            && tag.attr("id") != Some(id.as_str())
        {
            return false;
        }
        if !self.classes.iter().all(|c| tag.has_class(c)) {
            return false;
        }
        self.attrs.iter().all(|(name, op)| match (tag.attr(name), op) {
            (None, _) => false,
            (Some(_), AttrOp::Exists) => true,
            (Some(v), AttrOp::Equals(want)) => v == want,
            (Some(v), AttrOp::Contains(want)) => v.contains(want.as_str()),
            (Some(v), AttrOp::StartsWith(want)) => v.starts_with(want.as_str()),
            (Some(v), AttrOp::Word(want)) => v.split_whitespace().any(|w| w == want),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Combinator {
    Descendant,
    Child,
}

/// A CSS selector subset: type, `.class`, `#id`, `[attr]`, `[attr=v]`,
/// `[attr*=v]`, `[attr^=v]`, `[attr~=v]`, descendant and `>` combinators, and `,` lists.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    alternatives: Vec<Vec<(Combinator, Compound)>>,
}

impl Selector {
    pub fn parse(input: &str) -> Option<Self> {
        let mut alternatives = Vec::new();
        for alt in input.split(',') {
            let parts = parse_complex(alt.trim())?;
            if parts.is_empty() {
                return None;
            }
            alternatives.push(parts);
        }
        Some(Self { alternatives })
    }

    pub fn matches(&self, doc: &Parsed<'_>, idx: usize) -> bool {
        self.alternatives
            .iter()
            .any(|parts| match_from(doc, idx, parts, parts.len() - 1))
    }
}

fn match_from(doc: &Parsed<'_>, idx: usize, parts: &[(Combinator, Compound)], k: usize) -> bool {
    if !parts[k].1.matches(doc.tag(idx)) {
        return false;
    }
    if k == 0 {
        return true;
    }
    match parts[k].0 {
        Combinator::Child => doc
            .parent(idx)
            .is_some_and(|p| match_from(doc, p, parts, k - 1)),
        Combinator::Descendant => doc.ancestors(idx).any(|a| match_from(doc, a, parts, k - 1)),
    }
}

fn parse_complex(input: &str) -> Option<Vec<(Combinator, Compound)>> {
    let mut parts = Vec::new();
    let mut pending = Combinator::Descendant;
    let normalized = input.replace('>', " > ");
    for token in split_outside_brackets(&normalized) {
        if token == ">" {
            pending = Combinator::Child;
            continue;
        }
        parts.push((pending, parse_compound(&token)?));
        pending = Combinator::Descendant;
    }
    Some(parts)
}

fn split_outside_brackets(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in input.chars() {
        match c {
            '[' => {
                depth += 1;
                current.push(c);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn parse_compound(token: &str) -> Option<Compound> {
    let mut compound = Compound::default();
    let chars: Vec<char> = token.chars().collect();
    let mut i = 0;

    let read_ident = |i: &mut usize| -> String {
        let start = *i;
        while *i < chars.len() && (chars[*i].is_alphanumeric() || matches!(chars[*i], '-' | '_')) {
            *i += 1;
        }
        chars[start..*i].iter().collect()
    };

    if i < chars.len() && chars[i] == '*' {
        i += 1;
    } else if i < chars.len() && chars[i].is_alphabetic() {
        compound.name = Some(read_ident(&mut i).to_ascii_lowercase());
    }
    while i < chars.len() {
        match chars[i] {
            '.' => {
                i += 1;
                compound.classes.push(read_ident(&mut i));
            }
            '#' => {
                i += 1;
                compound.id = Some(read_ident(&mut i));
            }
            '[' => {
                let close = chars[i..].iter().position(|&c| c == ']')? + i;
                let body: String = chars[i + 1..close].iter().collect();
                compound.attrs.push(parse_attr_selector(&body)?);
                i = close + 1;
            }
            _ => return None,
        }
    }
    Some(compound)
}

fn parse_attr_selector(body: &str) -> Option<(String, AttrOp)> {
    let unquote = |v: &str| v.trim().trim_matches(|c| c == '"' || c == '\'').to_string();
    if let Some((name, value)) = body.split_once("*=") {
        return Some((name.trim().to_ascii_lowercase(), AttrOp::Contains(unquote(value))));
    }
    if let Some((name, value)) = body.split_once("^=") {
        return Some((name.trim().to_ascii_lowercase(), AttrOp::StartsWith(unquote(value))));
    }
    if let Some((name, value)) = body.split_once("~=") {
        return Some((name.trim().to_ascii_lowercase(), AttrOp::Word(unquote(value))));
    }
    if let Some((name, value)) = body.split_once('=') {
        return Some((name.trim().to_ascii_lowercase(), AttrOp::Equals(unquote(value))));
    }
    let name = body.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_ascii_lowercase(), AttrOp::Exists))
}

// =============================================================================
// Edits
// =============================================================================

/// A batch of non-overlapping byte-range replacements.
#[derive(Debug, Default)]
pub struct Edits {
    edits: Vec<(Range<usize>, String)>,
}

impl Edits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, range: Range<usize>, text: impl Into<String>) {
        self.edits.push((range, text.into()));
    }

    pub fn insert(&mut self, at: usize, text: impl Into<String>) {
        self.edits.push((at..at, text.into()));
    }

    pub fn remove(&mut self, range: Range<usize>) {
        self.edits.push((range, String::new()));
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Apply all edits. Inserts at an offset go before a replacement starting
    /// there and keep the order they were added in; an edit overlapping an
    /// earlier one is dropped.
    pub fn apply(mut self, src: &str) -> String {
        if self.edits.is_empty() {
            return src.to_string();
        }
        self.edits
            .sort_by_key(|(range, _)| (range.start, range.end > range.start));
        let mut out = String::with_capacity(src.len());
        let mut cursor = 0;
        for (range, text) in self.edits {
            if range.start < cursor {
                continue;
            }
            out.push_str(&src[cursor..range.start]);
            out.push_str(&text);
            cursor = range.end;
        }
        out.push_str(&src[cursor..]);
        out
    }
}

// =============================================================================
// Text helpers
// =============================================================================

/// Decode character references: numeric ones and every HTML5 named one.
/// Unknown names and a bare `&` stay as written.
pub fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest[1..]
            .find(';')
            .filter(|&semi| semi <= 32)
            .and_then(|semi| decode_entity(&rest[1..1 + semi]).map(|s| (s, semi + 2)));
        match decoded {
            Some((s, len)) => {
                out.push_str(&s);
                rest = &rest[len..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<Cow<'static, str>> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code).map(|c| Cow::Owned(c.to_string()));
    }
    resolve_html5_entity(name).map(Cow::Borrowed)
}

/// Escape text for use between tags.
pub fn escape_text(input: &str) -> String {
    partial_escape(input).into_owned()
}

/// Collapse runs of whitespace (including no-break spaces) to one space and trim.
pub fn collapse_whitespace(input: &str) -> String {
    input
        .split(|c: char| c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Scanner
    // =========================================================================

    #[test]
    fn scan_reads_attributes() {
        let tags = scan(r#"<img src="/a.png" alt='A "b"' loading=lazy async>"#);
        assert_eq!(tags.len(), 1);
        let t = &tags[0];
        assert_eq!(t.name, "img");
        assert_eq!(t.attr("src"), Some("/a.png"));
        assert_eq!(t.attr("alt"), Some(r#"A "b""#));
        assert_eq!(t.attr("loading"), Some("lazy"));
        assert!(t.has_attr("async"));
        assert_eq!(t.attr("async"), Some(""));
    }

    #[test]
    fn scan_skips_comments_and_doctype() {
        let tags = scan("<!DOCTYPE html><!-- <p>not</p> --><p>yes</p>");
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].name, "p");
        assert!(tags[1].closing);
    }

    #[test]
    fn scan_skips_script_bodies() {
        let tags = scan("<script>if (a < b) { x = '<div>'; }</script><div></div>");
        let names: Vec<_> = tags.iter().map(|t| (t.name.as_str(), t.closing)).collect();
        assert_eq!(
            names,
            vec![("script", false), ("script", true), ("div", false), ("div", true)]
        );
    }

    #[test]
    fn scan_ignores_stray_angle_brackets() {
        let tags = scan("<p>1 < 2 and 3 <= 4</p>");
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn scan_keeps_utf8_offsets_valid() {
        let src = "<p>héllo 📖</p><b>x</b>";
        let doc = Parsed::parse(src);
        let b = doc.select_first("b").unwrap();
        assert_eq!(doc.inner(b), "x");
        assert_eq!(doc.text(doc.select_first("p").unwrap()), "héllo 📖");
    }

    #[test]
    fn render_roundtrips_simple_tag() {
        let tags = scan(r#"<a href="/x" class="btn">"#);
        assert_eq!(tags[0].render(), r#"<a href="/x" class="btn">"#);
        let mut tag = tags[0].clone();
        tag.set_attr("rel", "noopener");
        tag.remove_attr("class");
        assert_eq!(tag.render(), r#"<a href="/x" rel="noopener">"#);
    }

    #[test]
    fn scan_reads_self_closing_and_uppercase_tags() {
        let tags = scan(r#"<BR/><Img SRC="x.png" /><P>t</P >"#);
        let summary: Vec<_> = tags
            .iter()
            .map(|t| (t.name.as_str(), t.self_closing, t.closing))
            .collect();
        assert_eq!(
            summary,
            vec![("br", true, false), ("img", true, false), ("p", false, false), ("p", false, true)]
        );
        assert_eq!(tags[1].attr("src"), Some("x.png"));
    }

    #[test]
    fn render_escapes_quotes_in_values() {
        let tag = Tag::new("meta").with_attr("content", r#"say "hi""#);
        assert_eq!(tag.render(), r#"<meta content="say &quot;hi&quot;">"#);
    }

    // =========================================================================
    // Structure
    // =========================================================================

    #[test]
    fn nesting_and_ranges() {
        let src = r#"<main id="inner-wrap"><article class="post"><h1>Title</h1></article></main>"#;
        let doc = Parsed::parse(src);
        let main = doc.select_first("main#inner-wrap").unwrap();
        let h1 = doc.select_first("h1").unwrap();
        assert!(doc.is_descendant_of(h1, main));
        assert_eq!(doc.inner(h1), "Title");
        assert_eq!(doc.outer(main), src);
    }

    #[test]
    fn unclosed_paragraphs_close_implicitly() {
        let doc = Parsed::parse("<div><p>one<p>two</div><span>after</span>");
        let div = doc.select_first("div").unwrap();
        assert_eq!(doc.outer(div), "<div><p>one<p>two</div>");
        let span = doc.select_first("span").unwrap();
        assert_eq!(doc.parent(span), None);
    }

    #[test]
    fn block_start_closes_open_paragraph() {
        let doc = Parsed::parse(
            r#"<div class="entry-content"><p>First para.<p>Second para.<ul><li>a<li>b</ul></div>"#,
        );
        let first = doc.select_first(".entry-content p").unwrap();
        assert_eq!(doc.text(first), "First para.");
        assert_eq!(doc.outer(first), "<p>First para.");
        assert_eq!(doc.select(".entry-content > p").len(), 2);
        let second = doc.select(".entry-content p")[1];
        assert_eq!(doc.text(second), "Second para.");
        let ul = doc.select_first("ul").unwrap();
        assert_eq!(doc.parent(ul), doc.select_first("div"));
        let items = doc.select("li");
        assert_eq!(doc.text(items[0]), "a");
        assert_eq!(doc.parent(items[1]), Some(ul));
    }

    #[test]
    fn table_cells_close_each_other() {
        let doc = Parsed::parse("<table><tr><td>1<td>2<tr><td>3</table><p>after");
        let rows = doc.select("tr");
        assert_eq!(rows.len(), 2);
        assert_eq!(doc.select_within(rows[0], "td").len(), 2);
        assert_eq!(doc.text(rows[1]), "3");
        let p = doc.select_first("p").unwrap();
        assert_eq!(doc.parent(p), None);
    }

    #[test]
    fn paragraph_inside_button_stays_open() {
        let doc = Parsed::parse("<p>x<button><div>y</div></button>z</p>");
        let p = doc.select_first("p").unwrap();
        assert_eq!(doc.text(p), "x y z");
    }

    #[test]
    fn void_elements_have_no_children() {
        let doc = Parsed::parse(r#"<p><img src="a"><span>x</span></p>"#);
        let span = doc.select_first("span").unwrap();
        let p = doc.select_first("p").unwrap();
        assert_eq!(doc.parent(span), Some(p));
    }

    // =========================================================================
    // Selectors
    // =========================================================================

    #[test]
    fn selector_class_id_and_attr() {
        let doc = Parsed::parse(
            r#"<link rel="stylesheet" href="/a.css"><a rel="tag" href="/category/rust/">Rust</a><div id="x" class="a b"></div>"#,
        );
        assert!(doc.exists("link[rel=stylesheet]"));
        assert!(doc.exists(r#"a[href*="/category/"]"#));
        assert!(doc.exists("div.a.b#x"));
        assert!(!doc.exists("div.c"));
        assert!(doc.exists("[rel^=sty]"));
    }

    #[test]
    fn selector_word_match() {
        let doc = Parsed::parse(r#"<a rel="category tag" href="/category/rust/">Rust</a><a rel="tagged">x</a>"#);
        assert_eq!(doc.select("a[rel~=tag]").len(), 1);
        assert!(doc.exists(r#"a[rel~=tag][href*="/category/"]"#));
    }

    #[test]
    fn selector_descendant_and_child() {
        let doc = Parsed::parse(
            r#"<figure class="wp-block-embed"><div class="wp-block-embed__wrapper">u</div></figure><article><div><div class="entry-content">c</div></div></article>"#,
        );
        assert_eq!(doc.select("figure.wp-block-embed > div.wp-block-embed__wrapper").len(), 1);
        assert_eq!(doc.select("article .entry-content").len(), 1);
        assert_eq!(doc.select("article > .entry-content").len(), 0);
    }

    #[test]
    fn selector_lists() {
        let doc = Parsed::parse("<h1>a</h1><h2>b</h2><h3>c</h3>");
        assert_eq!(doc.select("h1, h3").len(), 2);
    }

    #[test]
    fn invalid_selector_matches_nothing() {
        let doc = Parsed::parse("<p>x</p>");
        assert!(doc.select("p:first-child").is_empty());
    }

    // =========================================================================
    // Text
    // =========================================================================

    #[test]
    fn text_skips_scripts_and_decodes() {
        let doc = Parsed::parse(
            "<div>Fish &amp; chips<script>var x = 1;</script>\n\n<b>tonight</b>&nbsp;!</div>",
        );
        let div = doc.select_first("div").unwrap();
        assert_eq!(doc.text(div), "Fish & chips tonight !");
    }

    #[test]
    fn text_filtered_drops_subtrees() {
        let doc = Parsed::parse("<article><p>keep</p><nav><a>drop</a></nav><p>this</p></article>");
        let article = doc.select_first("article").unwrap();
        let text = doc.text_filtered(article, |i| doc.tag(i).name == "nav");
        assert_eq!(text, "keep this");
    }

    #[test]
    fn decode_numeric_entities() {
        assert_eq!(decode_entities("It&#8217;s &#x27;ok&#39;"), "It\u{2019}s 'ok'");
        assert_eq!(decode_entities("AT&T &bogus; &"), "AT&T &bogus; &");
    }

    #[test]
    fn decode_named_entities() {
        assert_eq!(
            decode_entities("Caf&eacute; &copy; r&eacute;sum&eacute; &rsquo;n&rsquo; &frac12;"),
            "Café © résumé \u{2019}n\u{2019} ½"
        );
        assert_eq!(decode_entities("&CloseCurlyQuote;"), "\u{2019}");
    }

    #[test]
    fn escaping() {
        assert_eq!(escape_text("<a & b>"), "&lt;a &amp; b&gt;");
        assert_eq!(escape_text("plain"), "plain");
    }

    // =========================================================================
    // Edits
    // =========================================================================

    #[test]
    fn edits_apply_in_position_order() {
        let mut edits = Edits::new();
        edits.insert(5, "!");
        edits.replace(0..1, "J");
        edits.insert(5, "?");
        assert_eq!(edits.apply("hello world"), "Jello!? world");
    }

    #[test]
    fn insert_goes_before_replacement_at_same_offset() {
        let mut edits = Edits::new();
        edits.replace(0..5, "HELLO");
        edits.insert(0, ">");
        assert_eq!(edits.apply("hello"), ">HELLO");
    }

    #[test]
    fn overlapping_edit_is_dropped() {
        let mut edits = Edits::new();
        edits.replace(0..5, "bye");
        edits.replace(2..4, "XX");
        assert_eq!(edits.apply("hello"), "bye");
    }
}
