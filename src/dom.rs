//! Markup parser – turns the rendered certificate markup into a small DOM.
//!
//! Supported elements:
//! - Structural: html, body, div, section, header, footer, main, article, p, h1-h6
//! - Phrasing: span, strong, b, em, i, u, small, br
//! - Replaced: img (base64 data URIs)
//! - Metadata (parsed, never rendered): head, style, title, meta, link, script
//!
//! Anything else is kept in the tree as [`Tag::Unknown`] and laid out like a `div`.

use std::collections::HashMap;

use crate::error::RasterError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    Html,
    Head,
    Body,
    Div,
    Section,
    Header,
    Footer,
    Main,
    Article,
    P,
    /// `h1` through `h6`.
    Heading(u8),
    Span,
    Strong,
    B,
    Em,
    I,
    U,
    Small,
    Br,
    Img,
    Style,
    Title,
    Meta,
    Link,
    Script,
    Unknown(String),
}

impl Tag {
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "html" => Tag::Html,
            "head" => Tag::Head,
            "body" => Tag::Body,
            "div" => Tag::Div,
            "section" => Tag::Section,
            "header" => Tag::Header,
            "footer" => Tag::Footer,
            "main" => Tag::Main,
            "article" => Tag::Article,
            "p" => Tag::P,
            "h1" => Tag::Heading(1),
            "h2" => Tag::Heading(2),
            "h3" => Tag::Heading(3),
            "h4" => Tag::Heading(4),
            "h5" => Tag::Heading(5),
            "h6" => Tag::Heading(6),
            "span" => Tag::Span,
            "strong" => Tag::Strong,
            "b" => Tag::B,
            "em" => Tag::Em,
            "i" => Tag::I,
            "u" => Tag::U,
            "small" => Tag::Small,
            "br" => Tag::Br,
            "img" => Tag::Img,
            "style" => Tag::Style,
            "title" => Tag::Title,
            "meta" => Tag::Meta,
            "link" => Tag::Link,
            "script" => Tag::Script,
            other => Tag::Unknown(other.to_string()),
        }
    }

    /// Elements that never render content.
    pub fn is_metadata(&self) -> bool {
        matches!(
            self,
            Tag::Head | Tag::Style | Tag::Title | Tag::Meta | Tag::Link | Tag::Script
        )
    }

    /// Content is taken verbatim up to the matching close tag.
    fn is_raw_text(&self) -> bool {
        matches!(self, Tag::Style | Tag::Script | Tag::Title)
    }
}

/// Elements without content or close tag (HTML void elements).
fn is_void(name: &str) -> bool {
    matches!(
        name,
        "area" | "base" | "br" | "col" | "embed" | "hr" | "img" | "input" | "link" | "meta"
            | "source" | "track" | "wbr"
    )
}

#[derive(Debug, Clone)]
pub enum DomNode {
    Element(ElementNode),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct ElementNode {
    pub tag: Tag,
    /// Lower-case tag name, as written.
    pub name: String,
    pub attributes: HashMap<String, String>,
    pub children: Vec<DomNode>,
}

impl ElementNode {
    pub fn new(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        Self {
            tag: Tag::from_name(&name),
            name,
            attributes: HashMap::new(),
            children: Vec::new(),
        }
    }

    pub fn classes(&self) -> Vec<&str> {
        self.attributes
            .get("class")
            .map(|c| c.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().contains(&class)
    }

    pub fn id(&self) -> Option<&str> {
        self.attributes.get("id").map(String::as_str)
    }

    pub fn inline_style(&self) -> Option<&str> {
        self.attributes.get("style").map(String::as_str)
    }

    pub fn src(&self) -> Option<&str> {
        self.attributes.get("src").map(String::as_str)
    }

    /// Concatenated text of all descendants.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }
}

fn collect_text(nodes: &[DomNode], out: &mut String) {
    for node in nodes {
        match node {
            DomNode::Text(t) => out.push_str(t),
            DomNode::Element(e) => collect_text(&e.children, out),
        }
    }
}

/// A parsed document.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub nodes: Vec<DomNode>,
}

impl Document {
    /// The `<html>` element, if written.
    pub fn html(&self) -> Option<&ElementNode> {
        self.nodes.iter().find_map(|n| match n {
            DomNode::Element(e) if e.tag == Tag::Html => Some(e),
            _ => None,
        })
    }

    /// The `<body>` element, searched through `<html>`.
    pub fn body(&self) -> Option<&ElementNode> {
        find_element(&self.nodes, &Tag::Body)
    }

    /// Nodes that make up the visible page: the body's children, or every
    /// top-level node for fragments.
    pub fn content(&self) -> &[DomNode] {
        match self.body() {
            Some(body) => &body.children,
            None => match self.html() {
                Some(html) => &html.children,
                None => &self.nodes,
            },
        }
    }

    /// Text of every `<style>` element, in document order.
    pub fn style_sheets(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_styles(&self.nodes, &mut out);
        out
    }

    pub fn title(&self) -> Option<String> {
        let title = find_element(&self.nodes, &Tag::Title)?.text_content();
        let title = title.trim();
        (!title.is_empty()).then(|| title.to_string())
    }

    /// True when nothing would render: no elements outside metadata and no text.
    pub fn is_blank(&self) -> bool {
        fn has_content(nodes: &[DomNode]) -> bool {
            nodes.iter().any(|n| match n {
                DomNode::Text(t) => !t.trim().is_empty(),
                DomNode::Element(e) if e.tag.is_metadata() => false,
                DomNode::Element(e) if matches!(e.tag, Tag::Html | Tag::Body) => {
                    has_content(&e.children)
                }
                DomNode::Element(_) => true,
            })
        }
        !has_content(&self.nodes)
    }
}

fn find_element<'a>(nodes: &'a [DomNode], tag: &Tag) -> Option<&'a ElementNode> {
    for node in nodes {
        if let DomNode::Element(e) = node {
            if &e.tag == tag {
                return Some(e);
            }
            if let Some(found) = find_element(&e.children, tag) {
                return Some(found);
            }
        }
    }
    None
}

fn collect_styles(nodes: &[DomNode], out: &mut Vec<String>) {
    for node in nodes {
        if let DomNode::Element(e) = node {
            if e.tag == Tag::Style {
                out.push(e.text_content());
            } else {
                collect_styles(&e.children, out);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Deepest element nesting accepted. Styling, layout and pagination all
/// recurse over the tree, so this also bounds their stack use.
pub const MAX_NESTING_DEPTH: usize = 128;

/// Parse a markup string into a [`Document`].
///
/// Hand-written recursive descent over the controlled subset the templates
/// use. Unbalanced close tags close the innermost open element.
///
/// # Errors
///
/// [`RasterError::TooDeep`] when elements nest past [`MAX_NESTING_DEPTH`].
pub fn parse_document(markup: &str) -> Result<Document, RasterError> {
    let mut parser = Parser::new(markup);
    let nodes = parser.parse_nodes();
    if parser.too_deep {
        return Err(RasterError::TooDeep {
            limit: MAX_NESTING_DEPTH,
        });
    }
    Ok(Document { nodes })
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    depth: usize,
    too_deep: bool,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            depth: 0,
            too_deep: false,
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    /// Move past the next occurrence of `needle`, or to the end.
    fn skip_past(&mut self, needle: &str) {
        match self.rest().find(needle) {
            Some(i) => self.pos += i + needle.len(),
            None => self.pos = self.input.len(),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn parse_nodes(&mut self) -> Vec<DomNode> {
        let mut nodes = Vec::new();
        while !self.eof() && !self.too_deep && !self.starts_with("</") {
            if let Some(node) = self.parse_node() {
                nodes.push(node);
            }
        }
        nodes
    }

    fn parse_node(&mut self) -> Option<DomNode> {
        if self.starts_with("<!--") {
            self.skip_past("-->");
            return None;
        }
        if self.starts_with("<!") || self.starts_with("<?") {
            self.skip_past(">");
            return None;
        }
        let opens_tag = self.starts_with("<")
            && self.rest()[1..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic());
        if opens_tag {
            Some(DomNode::Element(self.parse_element()))
        } else {
            self.parse_text()
        }
    }

    fn parse_text(&mut self) -> Option<DomNode> {
        let start = self.pos;
        // A stray '<' that does not open a tag is literal text.
        self.bump();
        while !self.eof() && !self.starts_with("<") {
            self.bump();
        }
        let raw = &self.input[start..self.pos];
        Some(DomNode::Text(decode_entities(raw)))
    }

    fn parse_name(&mut self) -> String {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | ':'))
        {
            self.bump();
        }
        self.input[start..self.pos].to_ascii_lowercase()
    }

    fn parse_element(&mut self) -> ElementNode {
        self.bump(); // '<'
        let name = self.parse_name();
        let mut elem = ElementNode::new(&name);

        loop {
            self.skip_whitespace();
            if self.eof() || self.starts_with(">") || self.starts_with("/>") {
                break;
            }
            let before = self.pos;
            let (key, value) = self.parse_attribute();
            if !key.is_empty() {
                elem.attributes.entry(key).or_insert(value);
            }
            if self.pos == before {
                // Junk such as a stray quote.
                self.bump();
            }
        }

        let self_closed = self.starts_with("/>");
        if self_closed {
            self.pos += 2;
        } else if self.starts_with(">") {
            self.pos += 1;
        }
        if self_closed || is_void(&name) {
            return elem;
        }

        if elem.tag.is_raw_text() {
            let close = format!("</{name}");
            let lower = self.rest().to_ascii_lowercase();
            let end = lower.find(&close).unwrap_or(lower.len());
            let body = &self.rest()[..end];
            elem.children.push(DomNode::Text(body.to_string()));
            self.pos += end;
        } else if self.depth >= MAX_NESTING_DEPTH {
            self.too_deep = true;
            return elem;
        } else {
            self.depth += 1;
            elem.children = self.parse_nodes();
            self.depth -= 1;
        }

        if self.starts_with("</") {
            self.pos += 2;
            self.parse_name();
            self.skip_past(">");
        }
        elem
    }

    fn parse_attribute(&mut self) -> (String, String) {
        let key = self.parse_name();
        self.skip_whitespace();
        if !self.starts_with("=") {
            return (key, String::new());
        }
        self.bump();
        self.skip_whitespace();
        (key, self.parse_attr_value())
    }

    fn parse_attr_value(&mut self) -> String {
        match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.bump();
                let start = self.pos;
                let len = self.rest().find(q).unwrap_or(self.rest().len());
                self.pos += len;
                let value = decode_entities(&self.input[start..self.pos]);
                self.bump();
                value
            }
            _ => {
                let start = self.pos;
                while self
                    .peek()
                    .is_some_and(|c| !c.is_whitespace() && c != '>' && !self.starts_with("/>"))
                {
                    self.bump();
                }
                decode_entities(&self.input[start..self.pos])
            }
        }
    }
}

/// Decode the character references templates produce: the common named
/// entities and decimal / hex numeric references.
pub fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| decode_reference(&rest[1..semi]).map(|c| (c, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &rest[semi + 1..];
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

fn decode_reference(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code);
    }
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{00A0}',
        "copy" => '\u{00A9}',
        "ordm" => '\u{00BA}',
        "ordf" => '\u{00AA}',
        _ => return None,
    };
    Some(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_element(doc: &Document) -> &ElementNode {
        match &doc.nodes[0] {
            DomNode::Element(e) => e,
            other => panic!("expected element, got {other:?}"),
        }
    }

    #[test]
    fn parse_nested_blocks() {
        let doc = parse_document(r#"<div class="frame main"><p>Hello</p></div>"#).unwrap();
        let div = first_element(&doc);
        assert_eq!(div.tag, Tag::Div);
        assert_eq!(div.classes(), vec!["frame", "main"]);
        assert_eq!(div.children.len(), 1);
    }

    #[test]
    fn void_elements_take_no_children() {
        let doc = parse_document(r#"<p>a<br>b<img src="x.png" alt=logo>c</p>"#).unwrap();
        let p = first_element(&doc);
        assert_eq!(p.children.len(), 5);
        match &p.children[3] {
            DomNode::Element(img) => {
                assert_eq!(img.tag, Tag::Img);
                assert_eq!(img.src(), Some("x.png"));
                assert_eq!(img.attributes.get("alt").map(String::as_str), Some("logo"));
            }
            other => panic!("expected img, got {other:?}"),
        }
    }

    #[test]
    fn style_content_is_raw_text() {
        let doc = parse_document(
            "<html><head><style>.a > b { color: red }</style><title>Cert</title></head><body><p>x</p></body></html>",
        )
        .unwrap();
        assert_eq!(doc.style_sheets(), vec![".a > b { color: red }".to_string()]);
        assert_eq!(doc.title().as_deref(), Some("Cert"));
        assert_eq!(doc.content().len(), 1);
    }

    #[test]
    fn doctype_and_comments_are_skipped() {
        let doc = parse_document("<!DOCTYPE html><!-- note --><div>x</div>").unwrap();
        assert_eq!(doc.nodes.len(), 1);
    }

    #[test]
    fn entities_decode() {
        assert_eq!(decode_entities("a &amp; b &#x27;c&#39; &lt;d&gt; &#x3D;"), "a & b 'c' <d> =");
        assert_eq!(decode_entities("R&D; &unknown;"), "R&D; &unknown;");
        assert_eq!(decode_entities("Emiss&atilde;o"), "Emiss&atilde;o");
    }

    #[test]
    fn blank_documents_are_detected() {
        assert!(parse_document("").unwrap().is_blank());
        assert!(parse_document("<html><head><style>p{}</style></head><body>  </body></html>").unwrap().is_blank());
        assert!(!parse_document("<body><div></div></body>").unwrap().is_blank());
    }

    #[test]
    fn nesting_is_bounded() {
        let nested = |n: usize| format!("{}x{}", "<div>".repeat(n), "</div>".repeat(n));
        assert!(parse_document(&nested(MAX_NESTING_DEPTH)).is_ok());
        assert!(matches!(
            parse_document(&nested(MAX_NESTING_DEPTH + 1)),
            Err(RasterError::TooDeep { limit: MAX_NESTING_DEPTH })
        ));
        assert!(parse_document(&"<div>".repeat(100_000)).is_err());
    }
}
