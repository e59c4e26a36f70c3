//! Page layout – the frozen, serialisable description of every page handed
//! from pagination to the PDF renderer, plus the paper geometry it is built on.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::style::FontFamily;

/// Standard paper sizes, portrait dimensions in points (1 pt = 1/72 inch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperFormat {
    A3,
    #[default]
    A4,
    A5,
    Letter,
    Legal,
}

impl PaperFormat {
    /// `(width, height)` in portrait orientation.
    pub fn portrait_size_pt(self) -> (f32, f32) {
        match self {
            PaperFormat::A3 => (841.89, 1190.55),
            PaperFormat::A4 => (595.28, 841.89),
            PaperFormat::A5 => (419.53, 595.28),
            PaperFormat::Letter => (612.0, 792.0),
            PaperFormat::Legal => (612.0, 1008.0),
        }
    }

    pub fn size_pt(self, orientation: Orientation) -> (f32, f32) {
        let (w, h) = self.portrait_size_pt();
        match orientation {
            Orientation::Portrait => (w, h),
            Orientation::Landscape => (h, w),
        }
    }

    /// Case-insensitive lookup of a CSS / print-dialog paper name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "a3" => Some(PaperFormat::A3),
            "a4" => Some(PaperFormat::A4),
            "a5" => Some(PaperFormat::A5),
            "letter" => Some(PaperFormat::Letter),
            "legal" => Some(PaperFormat::Legal),
            _ => None,
        }
    }
}

impl FromStr for PaperFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("unknown paper format {s:?}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

impl Orientation {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "portrait" => Some(Orientation::Portrait),
            "landscape" => Some(Orientation::Landscape),
            _ => None,
        }
    }
}

/// Margins in points.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PageMargins {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

impl PageMargins {
    pub fn uniform(v: f32) -> Self {
        Self {
            top: v,
            right: v,
            bottom: v,
            left: v,
        }
    }
}

/// A complete document layout ready for rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentLayout {
    #[serde(default = "DocumentLayout::default_title")]
    pub title: String,
    pub page_width_pt: f32,
    pub page_height_pt: f32,
    #[serde(default)]
    pub margins: PageMargins,
    /// Fill for the whole sheet, propagated from `html` / `body`.
    #[serde(default)]
    pub page_background: Option<[f32; 4]>,
    pub pages: Vec<PageLayout>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageLayout {
    pub page_index: usize,
    pub boxes: Vec<LayoutBox>,
}

/// A positioned rectangle with optional content. Coordinates are
/// page-absolute, origin top-left, in points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,

    pub background_color: Option<[f32; 4]>,
    pub border: Option<BorderStyle>,

    pub text: Option<TextContent>,
    pub image: Option<ImageContent>,

    pub children: Vec<LayoutBox>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BorderStyle {
    pub width: f32,
    pub color: [f32; 4],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextContent {
    pub lines: Vec<TextLine>,
    pub font_family: FontFamily,
    pub font_size: f32,
    pub bold: bool,
    pub italic: bool,
    pub color: [f32; 4],
    pub line_height: f32,
    pub underline: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextLine {
    pub text: String,
    /// Offset within the box, already accounting for alignment.
    pub x_offset: f32,
    /// Offset of the line box top from the box top.
    pub y_offset: f32,
    pub width: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageContent {
    pub src: String,
    pub width: f32,
    pub height: f32,
}

impl DocumentLayout {
    pub fn new(page_width_pt: f32, page_height_pt: f32) -> Self {
        Self {
            title: Self::default_title(),
            page_width_pt,
            page_height_pt,
            margins: PageMargins::default(),
            page_background: None,
            pages: Vec::new(),
        }
    }

    fn default_title() -> String {
        "certificate".to_string()
    }

    pub fn is_landscape(&self) -> bool {
        self.page_width_pt > self.page_height_pt
    }

    /// Drop every background fill, page and boxes alike.
    pub fn strip_backgrounds(&mut self) {
        fn strip(lbox: &mut LayoutBox) {
            lbox.background_color = None;
            lbox.children.iter_mut().for_each(strip);
        }
        self.page_background = None;
        for page in &mut self.pages {
            page.boxes.iter_mut().for_each(strip);
        }
    }

    /// True when any fill remains anywhere in the document.
    pub fn has_backgrounds(&self) -> bool {
        fn any(lbox: &LayoutBox) -> bool {
            lbox.background_color.is_some() || lbox.children.iter().any(any)
        }
        self.page_background.is_some() || self.pages.iter().any(|p| p.boxes.iter().any(any))
    }

    /// Every text line in document order.
    pub fn text_lines(&self) -> Vec<&str> {
        fn walk<'a>(lbox: &'a LayoutBox, out: &mut Vec<&'a str>) {
            if let Some(text) = &lbox.text {
                out.extend(text.lines.iter().map(|l| l.text.as_str()));
            }
            for child in &lbox.children {
                walk(child, out);
            }
        }
        let mut out = Vec::new();
        for page in &self.pages {
            for lbox in &page.boxes {
                walk(lbox, &mut out);
            }
        }
        out
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl LayoutBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            background_color: None,
            border: None,
            text: None,
            image: None,
            children: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landscape_swaps_dimensions() {
        let (w, h) = PaperFormat::A4.size_pt(Orientation::Landscape);
        assert!((w - 841.89).abs() < 0.01);
        assert!((h - 595.28).abs() < 0.01);
        assert_eq!(PaperFormat::from_name("LETTER"), Some(PaperFormat::Letter));
        assert_eq!(PaperFormat::from_name("b5"), None);
    }

    #[test]
    fn strip_backgrounds_is_recursive() {
        let mut layout = DocumentLayout::new(100.0, 50.0);
        layout.page_background = Some([1.0, 1.0, 1.0, 1.0]);
        let mut outer = LayoutBox::new(0.0, 0.0, 10.0, 10.0);
        let mut inner = LayoutBox::new(0.0, 0.0, 5.0, 5.0);
        inner.background_color = Some([1.0, 0.0, 0.0, 1.0]);
        outer.children.push(inner);
        layout.pages.push(PageLayout {
            page_index: 0,
            boxes: vec![outer],
        });

        assert!(layout.has_backgrounds());
        layout.strip_backgrounds();
        assert!(!layout.has_backgrounds());
        assert!(layout.is_landscape());
    }

    #[test]
    fn json_keeps_page_background() {
        let mut layout = DocumentLayout::new(842.0, 595.0);
        layout.page_background = Some([0.5, 0.5, 0.5, 1.0]);
        let back = DocumentLayout::from_json(&layout.to_json()).unwrap();
        assert_eq!(back.page_background, Some([0.5, 0.5, 0.5, 1.0]));
        assert_eq!(back.pages.len(), 0);
    }
}
