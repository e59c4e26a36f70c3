//! PDF renderer – turns a [`DocumentLayout`] into PDF bytes using
//! `printpdf` (v0.8 ops-based API).

use std::collections::{HashMap, HashSet};

use base64::{engine::general_purpose::STANDARD as BASE64_STD, Engine as _};
use printpdf::*;

use crate::error::RasterError;
use crate::page_layout::{BorderStyle, DocumentLayout, LayoutBox, TextContent};
use crate::style::FontFamily;

const MM_PER_PT: f32 = 0.352778;

/// A printpdf XObject together with the pixel dimensions of the source image.
struct ImageResource {
    xobj_id: XObjectId,
    px_width: u32,
    px_height: u32,
}

/// Render a layout into PDF bytes.
///
/// Images whose `src` is not a base64 data URI, or whose bytes cannot be
/// decoded, are skipped with a warning.
pub fn render_pdf(layout: &DocumentLayout) -> Result<Vec<u8>, RasterError> {
    if layout.page_width_pt <= 0.0 || layout.page_height_pt <= 0.0 {
        return Err(RasterError::Encode(format!(
            "invalid page size {}x{}pt",
            layout.page_width_pt, layout.page_height_pt
        )));
    }
    let page_w = Mm(layout.page_width_pt * MM_PER_PT);
    let page_h = Mm(layout.page_height_pt * MM_PER_PT);

    let mut doc = PdfDocument::new(&layout.title);
    let images = register_images(&mut doc, layout);

    let mut pages: Vec<PdfPage> = layout
        .pages
        .iter()
        .map(|page| {
            let mut ops = Vec::new();
            if let Some(bg) = layout.page_background {
                fill_rect(
                    &mut ops,
                    bg,
                    0.0,
                    0.0,
                    layout.page_width_pt,
                    layout.page_height_pt,
                );
            }
            for lbox in &page.boxes {
                render_box(&mut ops, lbox, layout.page_height_pt, &images);
            }
            PdfPage::new(page_w, page_h, ops)
        })
        .collect();

    if pages.is_empty() {
        pages.push(PdfPage::new(page_w, page_h, Vec::new()));
    }

    doc.with_pages(pages);
    let bytes = doc.save(&PdfSaveOptions::default(), &mut Vec::new());
    if bytes.is_empty() {
        return Err(RasterError::Encode("printpdf produced no bytes".into()));
    }
    Ok(bytes)
}

fn register_images(doc: &mut PdfDocument, layout: &DocumentLayout) -> HashMap<String, ImageResource> {
    let mut srcs: HashSet<&str> = HashSet::new();
    for page in &layout.pages {
        for lbox in &page.boxes {
            collect_image_srcs(lbox, &mut srcs);
        }
    }

    let mut resources = HashMap::new();
    let mut warnings: Vec<PdfWarnMsg> = Vec::new();
    for src in srcs {
        let bytes = match parse_data_uri(src) {
            Ok(b) => b,
            Err(e) => {
                log::warn!("skipping image: {e}");
                continue;
            }
        };
        let (px_width, px_height) = match ::image::load_from_memory(&bytes) {
            Ok(img) => (img.width(), img.height()),
            Err(e) => {
                log::warn!("skipping image: decode error: {e}");
                continue;
            }
        };
        let raw = match RawImage::decode_from_bytes(&bytes, &mut warnings) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("skipping image: pdf encode error: {e}");
                continue;
            }
        };
        resources.insert(
            src.to_string(),
            ImageResource {
                xobj_id: doc.add_image(&raw),
                px_width,
                px_height,
            },
        );
    }
    resources
}

/// Pick the standard-14 face for a family and variant.
fn builtin_font(family: FontFamily, bold: bool, italic: bool) -> BuiltinFont {
    match (family, bold, italic) {
        (FontFamily::SansSerif, false, false) => BuiltinFont::Helvetica,
        (FontFamily::SansSerif, true, false) => BuiltinFont::HelveticaBold,
        (FontFamily::SansSerif, false, true) => BuiltinFont::HelveticaOblique,
        (FontFamily::SansSerif, true, true) => BuiltinFont::HelveticaBoldOblique,
        (FontFamily::Serif, false, false) => BuiltinFont::TimesRoman,
        (FontFamily::Serif, true, false) => BuiltinFont::TimesBold,
        (FontFamily::Serif, false, true) => BuiltinFont::TimesItalic,
        (FontFamily::Serif, true, true) => BuiltinFont::TimesBoldItalic,
        (FontFamily::Monospace, false, false) => BuiltinFont::Courier,
        (FontFamily::Monospace, true, false) => BuiltinFont::CourierBold,
        (FontFamily::Monospace, false, true) => BuiltinFont::CourierOblique,
        (FontFamily::Monospace, true, true) => BuiltinFont::CourierBoldOblique,
    }
}

/// Windows-1252 bytes for `s`, one per glyph as builtin fonts expect
/// (WinAnsiEncoding). Unmappable characters become `?`.
fn winansi_bytes(s: &str) -> Vec<u8> {
    s
        .chars()
        .map(|c| match c {
            '\u{20AC}' => 0x80,
            '\u{201A}' => 0x82,
            '\u{201E}' => 0x84,
            '\u{2026}' => 0x85,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '\u{2022}' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\u{2122}' => 0x99,
            '\u{00A0}' => 0x20,
            c if (c as u32) < 256 => c as u8,
            _ => b'?',
        })
        .collect()
}

/// [`winansi_bytes`] smuggled through the `String` that printpdf 0.8's
/// builtin-font `TextItem::Text` takes; it has no byte-string variant.
///
/// The result is not valid UTF-8 when `s` has characters above U+007F. It
/// must only be handed to `Op::WriteTextBuiltinFont` and never read as text
/// here. printpdf copies the bytes verbatim into the content stream (checked
/// against 0.8: "conclusão" is written as `<636F6E636C7573E36F>`); revisit
/// this when upgrading printpdf.
fn winansi_text(s: &str) -> String {
    let bytes = winansi_bytes(s);
    if bytes.is_ascii() {
        return String::from_utf8_lossy(&bytes).into_owned();
    }
    // SAFETY: see above. The string is opaque to this crate and is consumed
    // only by printpdf's byte-wise serializer.
    #[allow(unsafe_code)]
    unsafe {
        String::from_utf8_unchecked(bytes)
    }
}

/// Decode a `data:<mime>;base64,<data>` URI.
fn parse_data_uri(src: &str) -> Result<Vec<u8>, String> {
    let Some(rest) = src.strip_prefix("data:") else {
        let preview: String = src.chars().take(80).collect();
        return Err(format!("image src must be a base64 data URI, got {preview:?}"));
    };
    let (header, data) = rest
        .split_once(',')
        .ok_or_else(|| "data URI is missing the `,` separator".to_string())?;
    if !header.contains(";base64") {
        return Err("only base64 data URIs are supported".to_string());
    }
    BASE64_STD
        .decode(data.trim())
        .map_err(|e| format!("base64 decode error: {e}"))
}

fn collect_image_srcs<'a>(lbox: &'a LayoutBox, srcs: &mut HashSet<&'a str>) {
    if let Some(img) = &lbox.image {
        srcs.insert(img.src.as_str());
    }
    for child in &lbox.children {
        collect_image_srcs(child, srcs);
    }
}

fn rgb(c: [f32; 4]) -> Color {
    Color::Rgb(Rgb {
        r: c[0],
        g: c[1],
        b: c[2],
        icc_profile: None,
    })
}

fn point(x: f32, y: f32) -> LinePoint {
    LinePoint {
        p: Point { x: Pt(x), y: Pt(y) },
        bezier: false,
    }
}

/// Corners of a rectangle in PDF space (origin bottom-left).
fn corners(x: f32, bottom: f32, width: f32, height: f32) -> Vec<LinePoint> {
    vec![
        point(x, bottom),
        point(x + width, bottom),
        point(x + width, bottom + height),
        point(x, bottom + height),
    ]
}

fn fill_rect(ops: &mut Vec<Op>, color: [f32; 4], x: f32, bottom: f32, width: f32, height: f32) {
    ops.push(Op::SetFillColor { col: rgb(color) });
    ops.push(Op::DrawPolygon {
        polygon: Polygon {
            rings: vec![PolygonRing {
                points: corners(x, bottom, width, height),
            }],
            mode: PaintMode::Fill,
            winding_order: WindingOrder::NonZero,
        },
    });
}

/// Stroke a border inset by half its width so it stays inside the box.
fn stroke_rect(ops: &mut Vec<Op>, border: &BorderStyle, x: f32, bottom: f32, width: f32, height: f32) {
    let inset = border.width / 2.0;
    ops.push(Op::SetOutlineColor {
        col: rgb(border.color),
    });
    ops.push(Op::SetOutlineThickness {
        pt: Pt(border.width),
    });
    ops.push(Op::DrawLine {
        line: Line {
            points: corners(
                x + inset,
                bottom + inset,
                (width - border.width).max(0.0),
                (height - border.width).max(0.0),
            ),
            is_closed: true,
        },
    });
}

fn render_text(ops: &mut Vec<Op>, lbox: &LayoutBox, text: &TextContent, top: f32) {
    let font = builtin_font(text.font_family, text.bold, text.italic);
    // Baseline sits roughly 0.75em below the top of the glyph box.
    let ascent = text.font_size * 0.75;

    for line in &text.lines {
        if line.text.is_empty() {
            continue;
        }
        let x = lbox.x + line.x_offset;
        let baseline = top - line.y_offset - ascent;

        ops.push(Op::StartTextSection);
        ops.push(Op::SetTextCursor {
            pos: Point {
                x: Pt(x),
                y: Pt(baseline),
            },
        });
        ops.push(Op::SetFontSizeBuiltinFont {
            size: Pt(text.font_size),
            font,
        });
        ops.push(Op::SetLineHeight {
            lh: Pt(text.line_height),
        });
        ops.push(Op::SetFillColor {
            col: rgb(text.color),
        });
        ops.push(Op::WriteTextBuiltinFont {
            items: vec![TextItem::Text(winansi_text(&line.text))],
            font,
        });
        ops.push(Op::EndTextSection);

        if text.underline {
            let y = baseline - text.font_size * 0.1;
            ops.push(Op::SetOutlineThickness { pt: Pt(0.5) });
            ops.push(Op::SetOutlineColor {
                col: rgb(text.color),
            });
            ops.push(Op::DrawLine {
                line: Line {
                    points: vec![point(x, y), point(x + line.width, y)],
                    is_closed: false,
                },
            });
        }
    }
}

/// Recursively render a box and its children. Layout coordinates have their
/// origin top-left, PDF's is bottom-left.
fn render_box(
    ops: &mut Vec<Op>,
    lbox: &LayoutBox,
    page_height: f32,
    images: &HashMap<String, ImageResource>,
) {
    let top = page_height - lbox.y;
    let bottom = top - lbox.height;

    if let Some(bg) = lbox.background_color {
        fill_rect(ops, bg, lbox.x, bottom, lbox.width, lbox.height);
    }
    if let Some(border) = &lbox.border {
        stroke_rect(ops, border, lbox.x, bottom, lbox.width, lbox.height);
    }
    if let Some(text) = &lbox.text {
        render_text(ops, lbox, text, top);
    }

    if let Some(res) = lbox.image.as_ref().and_then(|img| images.get(&img.src)) {
        // At 72 dpi one pixel is one point, so scale is target / pixels.
        let scale = |target: f32, px: u32| if px > 0 { target / px as f32 } else { 1.0 };
        ops.push(Op::UseXobject {
            id: res.xobj_id.clone(),
            transform: XObjectTransform {
                translate_x: Some(Pt(lbox.x)),
                translate_y: Some(Pt(bottom)),
                dpi: Some(72.0),
                scale_x: Some(scale(lbox.width, res.px_width)),
                scale_y: Some(scale(lbox.height, res.px_height)),
                rotate: None,
            },
        });
    }

    for child in &lbox.children {
        render_box(ops, child, page_height, images);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_layout::{PageLayout, TextLine};

    #[test]
    fn text_maps_to_winansi_bytes() {
        assert_eq!(winansi_bytes("conclusão"), b"conclus\xE3o");
        assert_eq!(winansi_bytes("Código – €"), b"C\xF3digo \x96 \x80");
        assert_eq!(winansi_bytes("日"), b"?");
        assert_eq!(winansi_text("Maria B"), "Maria B");
    }

    fn landscape() -> DocumentLayout {
        let mut layout = DocumentLayout::new(841.89, 595.28);
        layout.pages.push(PageLayout {
            page_index: 0,
            boxes: Vec::new(),
        });
        layout
    }

    #[test]
    fn renders_empty_page() {
        let bytes = render_pdf(&landscape()).unwrap();
        assert!(bytes.len() > 100);
        assert_eq!(&bytes[0..5], b"%PDF-");
    }

    #[test]
    fn renders_text_background_and_border() {
        let mut layout = landscape();
        layout.page_background = Some([0.96, 0.94, 0.88, 1.0]);
        let mut lbox = LayoutBox::new(40.0, 40.0, 300.0, 60.0);
        lbox.background_color = Some([1.0, 1.0, 1.0, 1.0]);
        lbox.border = Some(BorderStyle {
            width: 4.0,
            color: [0.72, 0.53, 0.04, 1.0],
        });
        lbox.text = Some(TextContent {
            lines: vec![TextLine {
                text: "Certificado de Conclusão".into(),
                x_offset: 10.0,
                y_offset: 2.0,
                width: 200.0,
            }],
            font_family: FontFamily::Serif,
            font_size: 24.0,
            bold: true,
            italic: false,
            color: [0.0, 0.0, 0.0, 1.0],
            line_height: 28.8,
            underline: true,
        });
        layout.pages[0].boxes.push(lbox);
        let bytes = render_pdf(&layout).unwrap();
        assert_eq!(&bytes[0..5], b"%PDF-");
    }

    #[test]
    fn rejects_degenerate_page() {
        let layout = DocumentLayout::new(0.0, 595.0);
        assert!(matches!(render_pdf(&layout), Err(RasterError::Encode(_))));
    }

    #[test]
    fn font_selection_follows_family() {
        assert!(matches!(
            builtin_font(FontFamily::Serif, true, true),
            BuiltinFont::TimesBoldItalic
        ));
        assert!(matches!(
            builtin_font(FontFamily::Monospace, false, false),
            BuiltinFont::Courier
        ));
    }

    #[test]
    fn data_uri_parsing() {
        assert_eq!(parse_data_uri("data:text/plain;base64,aGk=").unwrap(), b"hi");
        assert!(parse_data_uri("https://example.com/a.png").is_err());
        assert!(parse_data_uri("data:image/png,raw").is_err());
    }
}
