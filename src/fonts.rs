//! Text measurement for the builtin PDF fonts.
//!
//! Output uses the standard 14 fonts, so nothing is embedded. Advances come
//! from per-family width tables (in 1/1000 em) grouped by character class,
//! close enough to the real AFM metrics for wrapping and centring.

use std::collections::HashMap;

use crate::style::FontFamily;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct FontKey {
    pub family: FontFamily,
    pub bold: bool,
    pub italic: bool,
}

impl FontKey {
    pub fn new(family: FontFamily, bold: bool, italic: bool) -> Self {
        Self {
            family,
            bold,
            italic,
        }
    }
}

/// Vertical metrics and advance table of one face, in 1/1000 em.
#[derive(Debug, Clone)]
pub struct FontMetrics {
    pub ascender: f32,
    pub descender: f32,
    /// Fixed advance for monospaced faces.
    pub fixed_advance: Option<f32>,
    widths: CharWidths,
}

#[derive(Debug, Clone, Copy)]
struct CharWidths {
    space: f32,
    narrow: f32,
    medium: f32,
    lower: f32,
    wide_lower: f32,
    upper: f32,
    wide_upper: f32,
    digit: f32,
    other: f32,
}

impl FontMetrics {
    fn sans(bold: bool) -> Self {
        let k = if bold { 1.06 } else { 1.0 };
        Self {
            ascender: 718.0,
            descender: -207.0,
            fixed_advance: None,
            widths: CharWidths {
                space: 278.0,
                narrow: 240.0 * k,
                medium: 333.0 * k,
                lower: 540.0 * k,
                wide_lower: 833.0 * k,
                upper: 680.0 * k,
                wide_upper: 900.0 * k,
                digit: 556.0,
                other: 584.0 * k,
            },
        }
    }

    fn serif(bold: bool) -> Self {
        let k = if bold { 1.07 } else { 1.0 };
        Self {
            ascender: 683.0,
            descender: -217.0,
            fixed_advance: None,
            widths: CharWidths {
                space: 250.0,
                narrow: 278.0 * k,
                medium: 333.0 * k,
                lower: 470.0 * k,
                wide_lower: 722.0 * k,
                upper: 680.0 * k,
                wide_upper: 900.0 * k,
                digit: 500.0,
                other: 564.0 * k,
            },
        }
    }

    fn mono() -> Self {
        Self {
            ascender: 629.0,
            descender: -157.0,
            fixed_advance: Some(600.0),
            widths: CharWidths {
                space: 600.0,
                narrow: 600.0,
                medium: 600.0,
                lower: 600.0,
                wide_lower: 600.0,
                upper: 600.0,
                wide_upper: 600.0,
                digit: 600.0,
                other: 600.0,
            },
        }
    }

    /// Advance of `c` in 1/1000 em.
    pub fn advance(&self, c: char) -> f32 {
        if let Some(fixed) = self.fixed_advance {
            return fixed;
        }
        let w = &self.widths;
        // Fold accented Latin letters onto their base class.
        let base = fold_accent(c);
        match base {
            ' ' | '\u{00A0}' => w.space,
            'i' | 'j' | 'l' | '.' | ',' | ':' | ';' | '\'' | '!' | '|' | 'I' => w.narrow,
            'f' | 't' | 'r' | '(' | ')' | '[' | ']' | '-' | '"' | '/' => w.medium,
            'm' | 'w' => w.wide_lower,
            'M' | 'W' => w.wide_upper,
            '0'..='9' => w.digit,
            c if c.is_lowercase() => w.lower,
            c if c.is_uppercase() => w.upper,
            _ => w.other,
        }
    }
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
        'É' | 'È' | 'Ê' | 'Ë' => 'E',
        'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
        'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
        'Ç' => 'C',
        other => other,
    }
}

/// Registry of font metrics keyed by family and variant.
#[derive(Debug, Clone)]
pub struct FontManager {
    fonts: HashMap<FontKey, FontMetrics>,
}

impl FontManager {
    /// An empty registry. Lookups fall back to Helvetica metrics.
    pub fn new() -> Self {
        Self {
            fonts: HashMap::new(),
        }
    }

    /// Register (or replace) metrics for a face.
    pub fn register(&mut self, key: FontKey, metrics: FontMetrics) {
        self.fonts.insert(key, metrics);
    }

    /// Register all twelve builtin faces.
    pub fn with_builtin_fonts() -> Self {
        let mut mgr = Self::new();
        for bold in [false, true] {
            for italic in [false, true] {
                mgr.register(
                    FontKey::new(FontFamily::SansSerif, bold, italic),
                    FontMetrics::sans(bold),
                );
                mgr.register(
                    FontKey::new(FontFamily::Serif, bold, italic),
                    FontMetrics::serif(bold),
                );
                mgr.register(
                    FontKey::new(FontFamily::Monospace, bold, italic),
                    FontMetrics::mono(),
                );
            }
        }
        mgr
    }

    pub fn metrics(&self, key: &FontKey) -> FontMetrics {
        self.fonts
            .get(key)
            .or_else(|| self.fonts.get(&FontKey::new(key.family, key.bold, false)))
            .cloned()
            .unwrap_or_else(|| FontMetrics::sans(key.bold))
    }

    /// Width of `text` in points at `font_size` points.
    pub fn measure_text_width(&self, text: &str, font_size: f32, key: &FontKey) -> f32 {
        let metrics = self.metrics(key);
        text.chars().map(|c| metrics.advance(c)).sum::<f32>() * font_size / 1000.0
    }

    /// Distance from the top of the em box to the baseline, in points.
    pub fn ascender(&self, font_size: f32, key: &FontKey) -> f32 {
        self.metrics(key).ascender * font_size / 1000.0
    }
}

impl Default for FontManager {
    fn default() -> Self {
        Self::with_builtin_fonts()
    }
}

/// Word-wrap `text` to `max_width` points. Explicit `\n` breaks are kept.
/// A single word wider than the line is left on its own line.
pub fn wrap_text(
    text: &str,
    font_size: f32,
    key: &FontKey,
    max_width: f32,
    fonts: &FontManager,
) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let words: Vec<&str> = paragraph.split_whitespace().collect();
        if words.is_empty() {
            lines.push(String::new());
            continue;
        }
        if max_width <= 0.0 {
            lines.push(words.join(" "));
            continue;
        }

        let mut current = String::new();
        for word in words {
            if current.is_empty() {
                current.push_str(word);
                continue;
            }
            let candidate = format!("{current} {word}");
            if fonts.measure_text_width(&candidate, font_size, key) > max_width {
                lines.push(std::mem::take(&mut current));
                current.push_str(word);
            } else {
                current = candidate;
            }
        }
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sans() -> FontKey {
        FontKey::new(FontFamily::SansSerif, false, false)
    }

    #[test]
    fn monospace_is_fixed_pitch() {
        let mgr = FontManager::default();
        let key = FontKey::new(FontFamily::Monospace, false, false);
        assert_eq!(mgr.measure_text_width("iiiii", 10.0, &key), 30.0);
        assert_eq!(mgr.measure_text_width("MMMMM", 10.0, &key), 30.0);
    }

    #[test]
    fn bold_is_wider() {
        let mgr = FontManager::default();
        let regular = mgr.measure_text_width("Certificado", 12.0, &sans());
        let bold = mgr.measure_text_width(
            "Certificado",
            12.0,
            &FontKey::new(FontFamily::SansSerif, true, false),
        );
        assert!(bold > regular);
        assert!(mgr.measure_text_width("ill", 12.0, &sans()) < mgr.measure_text_width("mmm", 12.0, &sans()));
    }

    #[test]
    fn accents_measure_like_base_letters() {
        let mgr = FontManager::default();
        assert_eq!(
            mgr.measure_text_width("conclusão", 12.0, &sans()),
            mgr.measure_text_width("conclusao", 12.0, &sans())
        );
    }

    #[test]
    fn word_wrap_basic() {
        let mgr = FontManager::default();
        let lines = wrap_text("Hello world foo bar", 12.0, &sans(), 45.0, &mgr);
        assert!(lines.len() >= 2, "expected wrapping, got {lines:?}");
        assert!(lines.iter().all(|l| !l.starts_with(' ')));
    }

    #[test]
    fn explicit_breaks_survive() {
        let mgr = FontManager::default();
        let lines = wrap_text("one\ntwo", 12.0, &sans(), 500.0, &mgr);
        assert_eq!(lines, vec!["one", "two"]);
    }
}
