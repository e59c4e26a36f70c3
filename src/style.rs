//! Style resolution – cascades tag defaults, inherited text properties,
//! `<style>` rules and `style=""` attributes into a flat [`ComputedStyle`].
//!
//! All lengths in a computed style are PDF points.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::dom::{DomNode, ElementNode, Tag};
use crate::stylesheet::{parse_box_shorthand, parse_length, Declaration, Length, Stylesheet};

/// Root font size (16px).
pub const ROOT_FONT_SIZE_PT: f32 = 12.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ComputedStyle {
    pub display: Display,
    pub flex_direction: FlexDirection,
    pub flex_wrap: FlexWrap,
    pub flex_grow: f32,
    pub flex_shrink: f32,
    pub justify_content: JustifyContent,
    pub align_items: AlignItems,
    pub gap: f32,

    pub width: Dimension,
    pub height: Dimension,
    pub min_height: Dimension,
    pub max_width: Dimension,

    /// `[top, right, bottom, left]`.
    pub margin: [Dimension; 4],
    pub padding: [f32; 4],

    pub border_width: f32,
    pub border_color: Color,

    pub font_size: f32,
    pub font_weight: FontWeight,
    pub font_style: FontStyle,
    pub font_family: FontFamily,
    pub color: Color,
    pub text_align: TextAlign,
    /// Multiple of `font_size`.
    pub line_height: f32,
    pub text_decoration: TextDecoration,
    pub text_transform: TextTransform,

    pub background_color: Color,

    pub page_break_before: bool,
    pub page_break_after: bool,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display: Display::Block,
            flex_direction: FlexDirection::Row,
            flex_wrap: FlexWrap::NoWrap,
            flex_grow: 0.0,
            flex_shrink: 1.0,
            justify_content: JustifyContent::Start,
            align_items: AlignItems::Stretch,
            gap: 0.0,
            width: Dimension::Auto,
            height: Dimension::Auto,
            min_height: Dimension::Auto,
            max_width: Dimension::Auto,
            margin: [Dimension::Pt(0.0); 4],
            padding: [0.0; 4],
            border_width: 0.0,
            border_color: Color::BLACK,
            font_size: ROOT_FONT_SIZE_PT,
            font_weight: FontWeight::Normal,
            font_style: FontStyle::Normal,
            font_family: FontFamily::SansSerif,
            color: Color::BLACK,
            text_align: TextAlign::Left,
            line_height: 1.2,
            text_decoration: TextDecoration::None,
            text_transform: TextTransform::None,
            background_color: Color::TRANSPARENT,
            page_break_before: false,
            page_break_after: false,
        }
    }
}

impl ComputedStyle {
    pub fn is_bold(&self) -> bool {
        self.font_weight == FontWeight::Bold
    }

    pub fn is_italic(&self) -> bool {
        self.font_style == FontStyle::Italic
    }

    /// Line box height in points.
    pub fn line_height_pt(&self) -> f32 {
        self.font_size * self.line_height
    }

    /// Copy only the inherited (text) properties of `parent`.
    fn inherit_from(&mut self, parent: &ComputedStyle) {
        self.font_size = parent.font_size;
        self.font_weight = parent.font_weight;
        self.font_style = parent.font_style;
        self.font_family = parent.font_family;
        self.color = parent.color;
        self.text_align = parent.text_align;
        self.line_height = parent.line_height;
        self.text_transform = parent.text_transform;
    }

    /// Style for an anonymous text run: text properties only, no box.
    pub fn for_text(&self) -> ComputedStyle {
        let mut s = ComputedStyle::default();
        s.inherit_from(self);
        s.display = Display::Inline;
        s.text_decoration = self.text_decoration;
        s
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Display {
    Block,
    Flex,
    Inline,
    InlineBlock,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlexDirection {
    Row,
    Column,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlexWrap {
    NoWrap,
    Wrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JustifyContent {
    Start,
    End,
    Center,
    SpaceBetween,
    SpaceAround,
    SpaceEvenly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignItems {
    Start,
    End,
    Center,
    Stretch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontWeight {
    Normal,
    Bold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontStyle {
    Normal,
    Italic,
}

/// The three builtin PDF families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FontFamily {
    #[default]
    SansSerif,
    Serif,
    Monospace,
}

impl FontFamily {
    /// First recognised family in a CSS `font-family` list.
    pub fn from_css(value: &str) -> Option<Self> {
        value.split(',').find_map(|name| {
            let name = name.trim().trim_matches(['"', '\'']).to_ascii_lowercase();
            match name.as_str() {
                "sans-serif" | "helvetica" | "arial" | "verdana" | "system-ui" | "roboto"
                | "open sans" | "liberation sans" => Some(FontFamily::SansSerif),
                "serif" | "times" | "times new roman" | "georgia" | "garamond"
                | "liberation serif" => Some(FontFamily::Serif),
                "monospace" | "courier" | "courier new" | "consolas" | "menlo" => {
                    Some(FontFamily::Monospace)
                }
                _ => None,
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlign {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextDecoration {
    None,
    Underline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextTransform {
    None,
    Uppercase,
    Lowercase,
}

impl TextTransform {
    pub fn apply(self, text: &str) -> String {
        match self {
            TextTransform::None => text.to_string(),
            TextTransform::Uppercase => text.to_uppercase(),
            TextTransform::Lowercase => text.to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dimension {
    Auto,
    Pt(f32),
    Percent(f32),
}

impl From<Length> for Dimension {
    fn from(l: Length) -> Self {
        match l {
            Length::Pt(v) => Dimension::Pt(v),
            Length::Percent(v) => Dimension::Percent(v),
            Length::Auto => Dimension::Auto,
        }
    }
}

impl Dimension {
    /// Resolve against a containing length; `None` for `auto`.
    pub fn resolve(self, container: f32) -> Option<f32> {
        match self {
            Dimension::Auto => None,
            Dimension::Pt(v) => Some(v),
            Dimension::Percent(p) => Some(container * p / 100.0),
        }
    }
}

/// RGBA colour (0.0 – 1.0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Self = Self {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };
    pub const WHITE: Self = Self {
        r: 1.0,
        g: 1.0,
        b: 1.0,
        a: 1.0,
    };
    pub const TRANSPARENT: Self = Self {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 0.0,
    };

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: r as f32 / 255.0,
            g: g as f32 / 255.0,
            b: b as f32 / 255.0,
            a: 1.0,
        }
    }

    pub fn is_transparent(&self) -> bool {
        self.a < 0.001
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#')?;
        if !hex.is_ascii() {
            return None;
        }
        let channel = |s: &str| u8::from_str_radix(s, 16).ok();
        let (r, g, b, a) = match hex.len() {
            3 | 4 => {
                let d: Vec<u8> = hex
                    .chars()
                    .map(|c| channel(&c.to_string().repeat(2)))
                    .collect::<Option<_>>()?;
                (d[0], d[1], d[2], d.get(3).copied().unwrap_or(255))
            }
            6 | 8 => (
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
                if hex.len() == 8 { channel(&hex[6..8])? } else { 255 },
            ),
            _ => return None,
        };
        let mut c = Color::rgb(r, g, b);
        c.a = a as f32 / 255.0;
        Some(c)
    }

    /// Hex, `rgb()` / `rgba()`, `transparent` or a common named colour.
    pub fn parse(value: &str) -> Option<Self> {
        let v = value.trim().to_ascii_lowercase();
        if v.starts_with('#') {
            return Self::from_hex(&v);
        }
        if let Some(args) = v
            .strip_prefix("rgba(")
            .or_else(|| v.strip_prefix("rgb("))
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let parts: Vec<&str> = args
                .split([',', ' ', '/'])
                .filter(|p| !p.is_empty())
                .collect();
            if parts.len() < 3 {
                return None;
            }
            let chan = |s: &str| -> Option<f32> {
                match s.strip_suffix('%') {
                    Some(p) => p.parse::<f32>().ok().map(|p| p / 100.0),
                    None => s.parse::<f32>().ok().map(|v| v / 255.0),
                }
            };
            let alpha = match parts.get(3) {
                Some(a) => match a.strip_suffix('%') {
                    Some(p) => p.parse::<f32>().ok()? / 100.0,
                    None => a.parse::<f32>().ok()?,
                },
                None => 1.0,
            };
            return Some(Self {
                r: chan(parts[0])?.clamp(0.0, 1.0),
                g: chan(parts[1])?.clamp(0.0, 1.0),
                b: chan(parts[2])?.clamp(0.0, 1.0),
                a: alpha.clamp(0.0, 1.0),
            });
        }
        let named = match v.as_str() {
            "transparent" => Self::TRANSPARENT,
            "black" => Self::BLACK,
            "white" => Self::WHITE,
            "red" => Self::rgb(255, 0, 0),
            "green" => Self::rgb(0, 128, 0),
            "blue" => Self::rgb(0, 0, 255),
            "yellow" => Self::rgb(255, 255, 0),
            "orange" => Self::rgb(255, 165, 0),
            "gray" | "grey" => Self::rgb(128, 128, 128),
            "silver" => Self::rgb(192, 192, 192),
            "maroon" => Self::rgb(128, 0, 0),
            "navy" => Self::rgb(0, 0, 128),
            "gold" => Self::rgb(255, 215, 0),
            "goldenrod" => Self::rgb(218, 165, 32),
            "darkgoldenrod" => Self::rgb(184, 134, 11),
            "darkred" => Self::rgb(139, 0, 0),
            "ivory" => Self::rgb(255, 255, 240),
            "beige" => Self::rgb(245, 245, 220),
            _ => return None,
        };
        Some(named)
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve the style of `element` under `parent`.
pub fn resolve_style(
    element: &ElementNode,
    sheet: &Stylesheet,
    parent: Option<&ComputedStyle>,
) -> ComputedStyle {
    let mut style = ComputedStyle::default();
    if let Some(p) = parent {
        style.inherit_from(p);
    }
    let parent_font = parent.map_or(ROOT_FONT_SIZE_PT, |p| p.font_size);
    apply_tag_defaults(&mut style, &element.tag, parent_font);

    let inline: Vec<Declaration> = element
        .inline_style()
        .map(crate::stylesheet::parse_declarations)
        .unwrap_or_default();
    let mut declarations = sheet.matching_declarations(element);
    // Inline declarations beat sheet rules, except `!important` ones.
    let split = declarations.iter().position(|d| d.important).unwrap_or(declarations.len());
    let important = declarations.split_off(split);
    declarations.extend(inline.iter().filter(|d| !d.important));
    declarations.extend(important);
    declarations.extend(inline.iter().filter(|d| d.important));

    // font-size first so em lengths elsewhere see the final size.
    for decl in declarations.iter().filter(|d| d.property == "font-size") {
        if let Some(size) = font_size_value(&decl.value, parent_font) {
            style.font_size = size;
        }
    }
    for decl in &declarations {
        apply_declaration(&mut style, &decl.property, &decl.value, parent);
    }
    style
}

fn font_size_value(value: &str, parent_font: f32) -> Option<f32> {
    let size = match value.trim() {
        "xx-small" => 7.0,
        "x-small" => 7.5,
        "small" => 9.75,
        "medium" => 12.0,
        "large" => 13.5,
        "x-large" => 18.0,
        "xx-large" => 24.0,
        "smaller" => parent_font / 1.2,
        "larger" => parent_font * 1.2,
        other => match parse_length(other, parent_font, ROOT_FONT_SIZE_PT)? {
            Length::Pt(v) => v,
            Length::Percent(p) => parent_font * p / 100.0,
            Length::Auto => return None,
        },
    };
    (size > 0.0).then_some(size)
}

/// User-agent defaults for each tag.
fn apply_tag_defaults(s: &mut ComputedStyle, tag: &Tag, parent_font: f32) {
    match tag {
        Tag::Heading(level) => {
            let scale = match level {
                1 => 2.0,
                2 => 1.5,
                3 => 1.17,
                4 => 1.0,
                5 => 0.83,
                _ => 0.67,
            };
            s.font_size = parent_font * scale;
            s.font_weight = FontWeight::Bold;
            let gap = s.font_size * 0.67;
            s.margin[0] = Dimension::Pt(gap);
            s.margin[2] = Dimension::Pt(gap);
        }
        Tag::P => {
            s.margin[0] = Dimension::Pt(parent_font);
            s.margin[2] = Dimension::Pt(parent_font);
        }
        Tag::Body => {
            s.margin = [Dimension::Pt(6.0); 4];
        }
        Tag::Span | Tag::Em | Tag::I | Tag::U | Tag::Strong | Tag::B | Tag::Small | Tag::Br => {
            s.display = Display::Inline;
            match tag {
                Tag::Strong | Tag::B => s.font_weight = FontWeight::Bold,
                Tag::Em | Tag::I => s.font_style = FontStyle::Italic,
                Tag::U => s.text_decoration = TextDecoration::Underline,
                Tag::Small => s.font_size = parent_font * 0.83,
                _ => {}
            }
        }
        Tag::Img => s.display = Display::InlineBlock,
        Tag::Head | Tag::Style | Tag::Title | Tag::Meta | Tag::Link | Tag::Script => {
            s.display = Display::None;
        }
        Tag::Html
        | Tag::Div
        | Tag::Section
        | Tag::Header
        | Tag::Footer
        | Tag::Main
        | Tag::Article
        | Tag::Unknown(_) => {}
    }
}

fn length(value: &str, s: &ComputedStyle) -> Option<Dimension> {
    parse_length(value, s.font_size, ROOT_FONT_SIZE_PT).map(Dimension::from)
}

fn length_pt(value: &str, s: &ComputedStyle) -> Option<f32> {
    match parse_length(value, s.font_size, ROOT_FONT_SIZE_PT)? {
        Length::Pt(v) => Some(v),
        _ => None,
    }
}

fn apply_declaration(s: &mut ComputedStyle, prop: &str, val: &str, parent: Option<&ComputedStyle>) {
    let val = val.trim();
    if val == "inherit" {
        if let Some(p) = parent {
            inherit_property(s, prop, p);
        }
        return;
    }
    match prop {
        "display" => {
            s.display = match val {
                "block" | "list-item" | "table" | "table-row" | "table-cell" => Display::Block,
                "flex" | "inline-flex" => Display::Flex,
                "inline" => Display::Inline,
                "inline-block" => Display::InlineBlock,
                "none" => Display::None,
                _ => s.display,
            }
        }
        "flex-direction" => {
            s.flex_direction = match val {
                "column" | "column-reverse" => FlexDirection::Column,
                "row" | "row-reverse" => FlexDirection::Row,
                _ => s.flex_direction,
            }
        }
        "flex-wrap" => {
            s.flex_wrap = if val == "nowrap" {
                FlexWrap::NoWrap
            } else {
                FlexWrap::Wrap
            }
        }
        "flex-grow" => s.flex_grow = val.parse().unwrap_or(s.flex_grow),
        "flex-shrink" => s.flex_shrink = val.parse().unwrap_or(s.flex_shrink),
        "flex" => {
            let mut parts = val.split_whitespace();
            match parts.next() {
                Some("none") => {
                    s.flex_grow = 0.0;
                    s.flex_shrink = 0.0;
                }
                Some("auto") => {
                    s.flex_grow = 1.0;
                    s.flex_shrink = 1.0;
                }
                Some(grow) => {
                    if let Ok(g) = grow.parse() {
                        s.flex_grow = g;
                    }
                    if let Some(Ok(shrink)) = parts.next().map(str::parse) {
                        s.flex_shrink = shrink;
                    }
                }
                None => {}
            }
        }
        "justify-content" => {
            s.justify_content = match val {
                "flex-start" | "start" | "left" => JustifyContent::Start,
                "flex-end" | "end" | "right" => JustifyContent::End,
                "center" => JustifyContent::Center,
                "space-between" => JustifyContent::SpaceBetween,
                "space-around" => JustifyContent::SpaceAround,
                "space-evenly" => JustifyContent::SpaceEvenly,
                _ => s.justify_content,
            }
        }
        "align-items" => {
            s.align_items = match val {
                "flex-start" | "start" => AlignItems::Start,
                "flex-end" | "end" => AlignItems::End,
                "center" => AlignItems::Center,
                "stretch" | "normal" => AlignItems::Stretch,
                _ => s.align_items,
            }
        }
        "gap" | "row-gap" | "column-gap" => {
            if let Some(v) = val.split_whitespace().next().and_then(|v| length_pt(v, s)) {
                s.gap = v;
            }
        }
        "width" => s.width = length(val, s).unwrap_or(s.width),
        "height" => s.height = length(val, s).unwrap_or(s.height),
        "min-height" => s.min_height = length(val, s).unwrap_or(s.min_height),
        "max-width" => {
            s.max_width = if val == "none" {
                Dimension::Auto
            } else {
                length(val, s).unwrap_or(s.max_width)
            }
        }
        "margin" => {
            if let Some(m) = parse_box_shorthand(val, |v| length(v, s)) {
                s.margin = m;
            }
        }
        "margin-top" | "margin-right" | "margin-bottom" | "margin-left" => {
            if let Some(v) = length(val, s) {
                s.margin[side_index(prop)] = v;
            }
        }
        "padding" => {
            if let Some(p) = parse_box_shorthand(val, |v| length_pt(v, s)) {
                s.padding = p;
            }
        }
        "padding-top" | "padding-right" | "padding-bottom" | "padding-left" => {
            if let Some(v) = length_pt(val, s) {
                s.padding[side_index(prop)] = v;
            }
        }
        "border" => apply_border_shorthand(s, val),
        "border-width" => {
            if let Some(v) = val.split_whitespace().next().and_then(|v| border_width(v, s)) {
                s.border_width = v;
            }
        }
        "border-color" => {
            if let Some(c) = Color::parse(val) {
                s.border_color = c;
            }
        }
        "border-style" => {
            if matches!(val, "none" | "hidden") {
                s.border_width = 0.0;
            }
        }
        "font-weight" => {
            s.font_weight = match val {
                "bold" | "bolder" | "600" | "700" | "800" | "900" => FontWeight::Bold,
                "normal" | "lighter" | "100" | "200" | "300" | "400" | "500" => FontWeight::Normal,
                _ => s.font_weight,
            }
        }
        "font-style" => {
            s.font_style = match val {
                "italic" | "oblique" => FontStyle::Italic,
                "normal" => FontStyle::Normal,
                _ => s.font_style,
            }
        }
        "font-family" => {
            if let Some(f) = FontFamily::from_css(val) {
                s.font_family = f;
            }
        }
        "color" => {
            if let Some(c) = Color::parse(val) {
                s.color = c;
            }
        }
        "background-color" => {
            if let Some(c) = Color::parse(val) {
                s.background_color = c;
            }
        }
        "background" => {
            // Only the colour component of the shorthand is honoured.
            if let Some(c) = val.split_whitespace().find_map(Color::parse) {
                s.background_color = c;
            } else if val == "none" {
                s.background_color = Color::TRANSPARENT;
            }
        }
        "text-align" => {
            s.text_align = match val {
                "left" | "start" | "justify" => TextAlign::Left,
                "center" => TextAlign::Center,
                "right" | "end" => TextAlign::Right,
                _ => s.text_align,
            }
        }
        "line-height" => {
            if val == "normal" {
                s.line_height = 1.2;
            } else if let Ok(factor) = val.parse::<f32>() {
                s.line_height = factor;
            } else if let Some(Length::Percent(p)) = parse_length(val, s.font_size, ROOT_FONT_SIZE_PT) {
                s.line_height = p / 100.0;
            } else if let Some(pt) = length_pt(val, s) {
                if s.font_size > 0.0 {
                    s.line_height = pt / s.font_size;
                }
            }
        }
        "text-decoration" | "text-decoration-line" => {
            s.text_decoration = if val.contains("underline") {
                TextDecoration::Underline
            } else {
                TextDecoration::None
            }
        }
        "text-transform" => {
            s.text_transform = match val {
                "uppercase" => TextTransform::Uppercase,
                "lowercase" => TextTransform::Lowercase,
                _ => TextTransform::None,
            }
        }
        "page-break-before" | "break-before" => {
            s.page_break_before = matches!(val, "always" | "page" | "left" | "right")
        }
        "page-break-after" | "break-after" => {
            s.page_break_after = matches!(val, "always" | "page" | "left" | "right")
        }
        _ => {}
    }
}

fn inherit_property(s: &mut ComputedStyle, prop: &str, p: &ComputedStyle) {
    match prop {
        "color" => s.color = p.color,
        "background-color" | "background" => s.background_color = p.background_color,
        "font-family" => s.font_family = p.font_family,
        "font-weight" => s.font_weight = p.font_weight,
        "font-style" => s.font_style = p.font_style,
        "font-size" => s.font_size = p.font_size,
        _ => {}
    }
}

fn side_index(prop: &str) -> usize {
    if prop.ends_with("top") {
        0
    } else if prop.ends_with("right") {
        1
    } else if prop.ends_with("bottom") {
        2
    } else {
        3
    }
}

fn border_width(value: &str, s: &ComputedStyle) -> Option<f32> {
    match value {
        "thin" => Some(0.75),
        "medium" => Some(2.25),
        "thick" => Some(3.75),
        other => length_pt(other, s),
    }
}

/// `border: <width> <style> <color>` in any order.
fn apply_border_shorthand(s: &mut ComputedStyle, val: &str) {
    if matches!(val, "none" | "0") {
        s.border_width = 0.0;
        return;
    }
    let mut width = None;
    let mut visible = true;
    for token in val.split_whitespace() {
        if let Some(w) = border_width(token, s) {
            width = Some(w);
        } else if let Some(c) = Color::parse(token) {
            s.border_color = c;
        } else if matches!(token, "none" | "hidden") {
            visible = false;
        }
    }
    s.border_width = if visible { width.unwrap_or(2.25) } else { 0.0 };
}

// ---------------------------------------------------------------------------
// Styled tree
// ---------------------------------------------------------------------------

/// A DOM node annotated with its computed style.
#[derive(Debug, Clone)]
pub enum StyledNode {
    Element {
        tag: Tag,
        style: ComputedStyle,
        children: Vec<StyledNode>,
        attrs: HashMap<String, String>,
    },
    Text {
        text: String,
        style: ComputedStyle,
    },
}

impl StyledNode {
    pub fn style(&self) -> &ComputedStyle {
        match self {
            StyledNode::Element { style, .. } | StyledNode::Text { style, .. } => style,
        }
    }

    pub fn is_inline(&self) -> bool {
        match self {
            StyledNode::Text { .. } => true,
            StyledNode::Element { tag, style, .. } => {
                *tag != Tag::Img && style.display == Display::Inline
            }
        }
    }
}

/// Build the styled tree under `parent_style`. Metadata and `display: none`
/// elements are dropped, as are whitespace-only text runs.
pub fn build_styled_tree(
    nodes: &[DomNode],
    sheet: &Stylesheet,
    parent_style: Option<&ComputedStyle>,
) -> Vec<StyledNode> {
    let mut result = Vec::new();
    for node in nodes {
        match node {
            DomNode::Element(e) => {
                if e.tag.is_metadata() {
                    continue;
                }
                let style = resolve_style(e, sheet, parent_style);
                if style.display == Display::None {
                    continue;
                }
                let children = build_styled_tree(&e.children, sheet, Some(&style));
                result.push(StyledNode::Element {
                    tag: e.tag.clone(),
                    style,
                    children,
                    attrs: e.attributes.clone(),
                });
            }
            DomNode::Text(text) => {
                if text.trim().is_empty() {
                    continue;
                }
                let style = parent_style.map(ComputedStyle::for_text).unwrap_or_default();
                result.push(StyledNode::Text {
                    text: text.clone(),
                    style,
                });
            }
        }
    }
    result
}

/// The styled `body` (or an anonymous body for fragments) and the sheet
/// background propagated from `html` / `body`.
pub struct StyledDocument {
    pub root: StyledNode,
    pub page_background: Option<Color>,
}

pub fn style_document(doc: &crate::dom::Document, sheet: &Stylesheet) -> StyledDocument {
    let html_style = doc
        .html()
        .map(|html| resolve_style(html, sheet, None))
        .unwrap_or_default();

    let (mut body_style, body_attrs) = match doc.body() {
        Some(body) => (
            resolve_style(body, sheet, Some(&html_style)),
            body.attributes.clone(),
        ),
        None => {
            let mut s = ComputedStyle::default();
            s.inherit_from(&html_style);
            (s, HashMap::new())
        }
    };
    let children = build_styled_tree(doc.content(), sheet, Some(&body_style));

    // The canvas takes html's background, else body's.
    let page_background = if !html_style.background_color.is_transparent() {
        Some(html_style.background_color)
    } else if !body_style.background_color.is_transparent() {
        let c = body_style.background_color;
        body_style.background_color = Color::TRANSPARENT;
        Some(c)
    } else {
        None
    };
    body_style.display = Display::Block;

    StyledDocument {
        root: StyledNode::Element {
            tag: Tag::Body,
            style: body_style,
            children,
            attrs: body_attrs,
        },
        page_background,
    }
}
