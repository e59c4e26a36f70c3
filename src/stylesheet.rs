//! `<style>` sheets: rule parsing, selector matching and the `@page` rule.
//!
//! Selectors are compound only (type, class, id, universal, or any mix such as
//! `div.frame#main`), comma lists expanded. Rules with combinators,
//! pseudo-classes or attribute selectors are dropped.

use crate::dom::ElementNode;
use crate::page_layout::{Orientation, PaperFormat};

/// One `property: value` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub property: String,
    pub value: String,
    pub important: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selector {
    pub tag: Option<String>,
    pub id: Option<String>,
    pub classes: Vec<String>,
}

/// `(ids, classes, types)`.
pub type Specificity = (u16, u16, u16);

impl Selector {
    /// Parse one compound selector; `None` when unsupported.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty()
            || text
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '>' | '+' | '~' | ':' | '[' | ']'))
        {
            return None;
        }

        let mut sel = Selector::default();
        let mut rest = text;
        // Leading type or universal.
        let type_len = rest
            .find(['.', '#'])
            .unwrap_or(rest.len());
        let head = &rest[..type_len];
        if !head.is_empty() && head != "*" {
            if !is_ident(head) {
                return None;
            }
            sel.tag = Some(head.to_ascii_lowercase());
        }
        rest = &rest[type_len..];

        while let Some(marker) = rest.chars().next() {
            let body = &rest[1..];
            let len = body.find(['.', '#']).unwrap_or(body.len());
            let name = &body[..len];
            if !is_ident(name) {
                return None;
            }
            match marker {
                '.' => sel.classes.push(name.to_string()),
                '#' if sel.id.is_none() => sel.id = Some(name.to_string()),
                _ => return None,
            }
            rest = &body[len..];
        }
        Some(sel)
    }

    pub fn specificity(&self) -> Specificity {
        (
            u16::from(self.id.is_some()),
            self.classes.len() as u16,
            u16::from(self.tag.is_some()),
        )
    }

    pub fn matches(&self, element: &ElementNode) -> bool {
        if let Some(tag) = &self.tag {
            if tag != &element.name {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if element.id() != Some(id.as_str()) {
                return false;
            }
        }
        self.classes.iter().all(|c| element.has_class(c))
    }
}

fn is_ident(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_'))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub selector: Selector,
    pub declarations: Vec<Declaration>,
    /// Position in the sheet, for cascade ties.
    pub order: usize,
}

/// `@page { size; margin }`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageRule {
    pub size: Option<PageSize>,
    /// `[top, right, bottom, left]` in points.
    pub margin: Option<[f32; 4]>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PageSize {
    Auto,
    /// `size: landscape`; keep the paper, pick the orientation.
    Orientation(Orientation),
    /// `size: A4` or `size: A4 landscape`.
    Named {
        format: PaperFormat,
        orientation: Option<Orientation>,
    },
    /// Two lengths (or one, for a square page), in points.
    Explicit { width: f32, height: f32 },
}

impl PageSize {
    pub fn parse(value: &str) -> Option<Self> {
        let words: Vec<&str> = value.split_whitespace().collect();
        match words.as_slice() {
            ["auto"] => Some(PageSize::Auto),
            [one] => {
                if let Some(o) = Orientation::from_name(one) {
                    Some(PageSize::Orientation(o))
                } else if let Some(format) = PaperFormat::from_name(one) {
                    Some(PageSize::Named {
                        format,
                        orientation: None,
                    })
                } else {
                    let side = parse_absolute(one)?;
                    Some(PageSize::Explicit {
                        width: side,
                        height: side,
                    })
                }
            }
            [a, b] => {
                let named = PaperFormat::from_name(a)
                    .zip(Orientation::from_name(b))
                    .or_else(|| PaperFormat::from_name(b).zip(Orientation::from_name(a)));
                if let Some((format, o)) = named {
                    return Some(PageSize::Named {
                        format,
                        orientation: Some(o),
                    });
                }
                Some(PageSize::Explicit {
                    width: parse_absolute(a)?,
                    height: parse_absolute(b)?,
                })
            }
            _ => None,
        }
    }
}

fn parse_absolute(value: &str) -> Option<f32> {
    match parse_length(value, 12.0, 12.0)? {
        Length::Pt(v) if v > 0.0 => Some(v),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stylesheet {
    pub rules: Vec<Rule>,
    pub page: PageRule,
}

impl Stylesheet {
    pub fn parse(css: &str) -> Self {
        let mut sheet = Stylesheet::default();
        let css = strip_comments(css);
        sheet.parse_block(&css);
        sheet
    }

    /// Concatenate several sheets in document order.
    pub fn from_sources<S: AsRef<str>>(sources: &[S]) -> Self {
        let joined: Vec<&str> = sources.iter().map(AsRef::as_ref).collect();
        Self::parse(&joined.join("\n"))
    }

    fn parse_block(&mut self, css: &str) {
        let mut rest = css;
        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }
            let Some(open) = rest.find(['{', ';']) else {
                break;
            };
            // `@import ...;` and friends.
            if rest.as_bytes()[open] == b';' {
                rest = &rest[open + 1..];
                continue;
            }
            let prelude = rest[..open].trim();
            let close = matching_brace(rest, open);
            let body = &rest[open + 1..close];
            rest = rest.get(close + 1..).unwrap_or("");

            if let Some(at) = prelude.strip_prefix('@') {
                self.parse_at_rule(at, body);
                continue;
            }

            let declarations = parse_declarations(body);
            for part in prelude.split(',') {
                match Selector::parse(part) {
                    Some(selector) => {
                        let order = self.rules.len();
                        self.rules.push(Rule {
                            selector,
                            declarations: declarations.clone(),
                            order,
                        });
                    }
                    None => log::debug!("ignoring unsupported selector {:?}", part.trim()),
                }
            }
        }
    }

    fn parse_at_rule(&mut self, at: &str, body: &str) {
        let (keyword, condition) = at.split_once(char::is_whitespace).unwrap_or((at, ""));
        match keyword.to_ascii_lowercase().as_str() {
            "page" => {
                for decl in parse_declarations(body) {
                    match decl.property.as_str() {
                        "size" => self.page.size = PageSize::parse(&decl.value),
                        "margin" => {
                            self.page.margin = parse_box_shorthand(&decl.value, |v| {
                                parse_absolute(v).or_else(|| (v.trim() == "0").then_some(0.0))
                            })
                        }
                        _ => {}
                    }
                }
            }
            "media" => {
                let condition = condition.to_ascii_lowercase();
                if condition.contains("print") || condition.contains("all") {
                    self.parse_block(body);
                }
            }
            _ => log::debug!("ignoring @{keyword} rule"),
        }
    }

    /// Declarations that apply to `element`, lowest priority first.
    pub fn matching_declarations(&self, element: &ElementNode) -> Vec<&Declaration> {
        let mut matched: Vec<(bool, Specificity, usize, &Declaration)> = self
            .rules
            .iter()
            .filter(|r| r.selector.matches(element))
            .flat_map(|r| {
                let spec = r.selector.specificity();
                r.declarations
                    .iter()
                    .map(move |d| (d.important, spec, r.order, d))
            })
            .collect();
        matched.sort_by_key(|&(important, spec, order, _)| (important, spec, order));
        matched.into_iter().map(|(.., d)| d).collect()
    }
}

fn strip_comments(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut rest = css;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        rest = match rest[start + 2..].find("*/") {
            Some(end) => &rest[start + 2 + end + 2..],
            None => "",
        };
    }
    out.push_str(rest);
    out
}

/// Index of the `}` closing the `{` at `open`, or the end of input.
fn matching_brace(s: &str, open: usize) -> usize {
    let mut depth = 0usize;
    for (i, b) in s.bytes().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return i;
                }
            }
            _ => {}
        }
    }
    s.len()
}

/// Parse `a: b; c: d !important` into declarations.
pub fn parse_declarations(body: &str) -> Vec<Declaration> {
    body.split(';')
        .filter_map(|decl| {
            let (prop, value) = decl.split_once(':')?;
            let prop = prop.trim().to_ascii_lowercase();
            let mut value = value.trim();
            if prop.is_empty() || value.is_empty() {
                return None;
            }
            let mut important = false;
            if let Some(stripped) = value.strip_suffix("!important") {
                important = true;
                value = stripped.trim_end();
            }
            Some(Declaration {
                property: prop,
                value: value.to_string(),
                important,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Lengths
// ---------------------------------------------------------------------------

/// CSS px are 1/96 in; PDF points are 1/72 in.
pub const PT_PER_PX: f32 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Length {
    Pt(f32),
    Percent(f32),
    Auto,
}

/// Parse a CSS length into points. `em` resolves against `font_size`,
/// `rem` against `root_font_size`, both in points.
pub fn parse_length(value: &str, font_size: f32, root_font_size: f32) -> Option<Length> {
    let v = value.trim().to_ascii_lowercase();
    if v == "auto" {
        return Some(Length::Auto);
    }
    if let Some(p) = v.strip_suffix('%') {
        return p.trim().parse().ok().map(Length::Percent);
    }
    let split = v
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(v.len());
    let (num, unit) = v.split_at(split);
    let n: f32 = num.trim().parse().ok()?;
    let pt = match unit {
        "px" => n * PT_PER_PX,
        "pt" => n,
        "mm" => n * 72.0 / 25.4,
        "cm" => n * 72.0 / 2.54,
        "in" => n * 72.0,
        "pc" => n * 12.0,
        "em" => n * font_size,
        "rem" => n * root_font_size,
        "" if n == 0.0 => 0.0,
        // Unitless non-zero lengths are treated as px, like quirks mode.
        "" => n * PT_PER_PX,
        _ => return None,
    };
    Some(Length::Pt(pt))
}

/// Expand a 1–4 value shorthand into `[top, right, bottom, left]`.
pub fn parse_box_shorthand<T: Copy>(
    value: &str,
    mut parse: impl FnMut(&str) -> Option<T>,
) -> Option<[T; 4]> {
    let parts: Vec<T> = value
        .split_whitespace()
        .map(&mut parse)
        .collect::<Option<_>>()?;
    match parts.as_slice() {
        [a] => Some([*a, *a, *a, *a]),
        [v, h] => Some([*v, *h, *v, *h]),
        [t, h, b] => Some([*t, *h, *b, *h]),
        [t, r, b, l] => Some([*t, *r, *b, *l]),
        _ => None,
    }
}
