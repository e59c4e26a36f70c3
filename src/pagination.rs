//! Pagination – splits positioned boxes into pages.
//!
//! Handles:
//! - page boundaries for the resolved sheet size and margins
//! - `page-break-before` / `page-break-after` hints
//! - containers taller than a page, which are opened up so their children
//!   paginate individually

use crate::fonts::{FontKey, FontManager};
use crate::layout::{BoxContent, PositionedBox};
use crate::page_layout::*;
use crate::style::{Color, TextAlign, TextDecoration};

/// Recursively expand any pure-container box whose height exceeds a single
/// page so its children can be split across pages individually.
fn flatten_for_pagination<'a>(
    boxes: &'a [PositionedBox],
    content_height: f32,
) -> Vec<&'a PositionedBox> {
    let mut result = Vec::new();
    for pbox in boxes {
        if pbox.height > content_height
            && matches!(pbox.content, BoxContent::None)
            && !pbox.children.is_empty()
        {
            result.extend(flatten_for_pagination(&pbox.children, content_height));
        } else {
            result.push(pbox);
        }
    }
    result
}

fn rgba(c: Color) -> Option<[f32; 4]> {
    (!c.is_transparent()).then(|| c.to_array())
}

/// Convert positioned boxes into a paginated [`DocumentLayout`].
pub fn paginate(
    boxes: &[PositionedBox],
    page_width: f32,
    page_height: f32,
    margins: PageMargins,
    fonts: &FontManager,
) -> DocumentLayout {
    let mut doc = DocumentLayout::new(page_width, page_height);
    doc.margins = margins;

    let content_height = (page_height - margins.top - margins.bottom).max(1.0);
    let flat = flatten_for_pagination(boxes, content_height);

    let mut current = PageLayout {
        page_index: 0,
        boxes: Vec::new(),
    };
    // Document-space y at which the current page begins.
    let mut page_start_y = 0.0f32;

    for pbox in &flat {
        if pbox.page_break_before && !current.boxes.is_empty() {
            doc.pages.push(std::mem::replace(
                &mut current,
                PageLayout {
                    page_index: doc.pages.len() + 1,
                    boxes: Vec::new(),
                },
            ));
            page_start_y = pbox.y;
        }

        let bottom = (pbox.y - page_start_y).max(0.0) + pbox.height;
        if bottom > content_height && !current.boxes.is_empty() {
            doc.pages.push(std::mem::replace(
                &mut current,
                PageLayout {
                    page_index: doc.pages.len() + 1,
                    boxes: Vec::new(),
                },
            ));
            page_start_y = pbox.y;
        }

        let abs_y = margins.top + (pbox.y - page_start_y).max(0.0);
        current.boxes.push(build_layout_box(pbox, abs_y, fonts));

        if pbox.page_break_after {
            doc.pages.push(std::mem::replace(
                &mut current,
                PageLayout {
                    page_index: doc.pages.len() + 1,
                    boxes: Vec::new(),
                },
            ));
            page_start_y = pbox.y + pbox.height;
        }
    }

    if !current.boxes.is_empty() || doc.pages.is_empty() {
        doc.pages.push(current);
    }
    doc
}

/// Build a [`LayoutBox`] tree with page-absolute coordinates.
///
/// `x` is already absolute; children sit at `abs_y + (child.y - pbox.y)`.
fn build_layout_box(pbox: &PositionedBox, abs_y: f32, fonts: &FontManager) -> LayoutBox {
    let style = &pbox.style;
    let mut lb = LayoutBox::new(pbox.x, abs_y, pbox.width, pbox.height);

    lb.background_color = rgba(style.background_color);

    if style.border_width > 0.0 && !style.border_color.is_transparent() {
        lb.border = Some(BorderStyle {
            width: style.border_width,
            color: style.border_color.to_array(),
        });
    }

    match &pbox.content {
        BoxContent::Text { lines } => {
            let key = FontKey::new(style.font_family, style.is_bold(), style.is_italic());
            let line_height = style.line_height_pt();
            let half_leading = (line_height - style.font_size) / 2.0;
            let text_lines = lines
                .iter()
                .enumerate()
                .map(|(i, line)| {
                    let width = fonts.measure_text_width(line, style.font_size, &key);
                    let slack = (pbox.width - width).max(0.0);
                    let x_offset = match style.text_align {
                        TextAlign::Left => 0.0,
                        TextAlign::Center => slack / 2.0,
                        TextAlign::Right => slack,
                    };
                    TextLine {
                        text: line.clone(),
                        x_offset,
                        y_offset: i as f32 * line_height + half_leading,
                        width,
                    }
                })
                .collect();

            lb.text = Some(TextContent {
                lines: text_lines,
                font_family: style.font_family,
                font_size: style.font_size,
                bold: style.is_bold(),
                italic: style.is_italic(),
                color: style.color.to_array(),
                line_height,
                underline: style.text_decoration == TextDecoration::Underline,
            });
        }
        BoxContent::Image { src } => {
            lb.image = Some(ImageContent {
                src: src.clone(),
                width: pbox.width,
                height: pbox.height,
            });
        }
        BoxContent::None => {}
    }

    lb.children = pbox
        .children
        .iter()
        .map(|child| build_layout_box(child, abs_y + (child.y - pbox.y), fonts))
        .collect();
    lb
}
