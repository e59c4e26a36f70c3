//! Layout engine – builds a Taffy tree from the styled DOM, runs flexbox
//! layout and extracts positioned boxes in document coordinates (points).
//!
//! Block elements become column flex containers. Consecutive inline children
//! (text, `span`, `strong`, `br`, ...) are merged into one wrapped text leaf.

use std::collections::HashMap;

use taffy::prelude::*;

use crate::dom::Tag;
use crate::error::RasterError;
use crate::fonts::{wrap_text, FontKey, FontManager};
use crate::style::{self as css, ComputedStyle, StyledNode};
use crate::stylesheet::PT_PER_PX;

/// A positioned box in document coordinates (before page splitting).
#[derive(Debug, Clone)]
pub struct PositionedBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub style: ComputedStyle,
    pub content: BoxContent,
    pub children: Vec<PositionedBox>,
    pub page_break_before: bool,
    pub page_break_after: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoxContent {
    None,
    /// Pre-wrapped lines.
    Text { lines: Vec<String> },
    Image { src: String },
}

impl PositionedBox {
    /// Depth-first search for the first box satisfying `pred`.
    pub fn find(&self, pred: &dyn Fn(&PositionedBox) -> bool) -> Option<&PositionedBox> {
        if pred(self) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(pred))
    }
}

struct LayoutBuilder<'a> {
    taffy: TaffyTree<()>,
    fonts: &'a FontManager,
    node_styles: HashMap<NodeId, ComputedStyle>,
    node_content: HashMap<NodeId, BoxContent>,
}

/// Collected text of an inline subtree; `br` becomes `\n`.
fn collect_inline_text(node: &StyledNode, out: &mut String) {
    match node {
        StyledNode::Text { text, .. } => out.push_str(text),
        StyledNode::Element { tag: Tag::Br, .. } => out.push('\n'),
        StyledNode::Element { children, .. } => {
            children.iter().for_each(|c| collect_inline_text(c, out))
        }
    }
}

/// Collapse whitespace per line, keeping forced breaks.
fn normalise_whitespace(raw: &str) -> String {
    let lines: Vec<String> = raw
        .split('\n')
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect();
    let first = lines.iter().position(|l| !l.is_empty());
    let last = lines.iter().rposition(|l| !l.is_empty());
    match (first, last) {
        (Some(a), Some(b)) => lines[a..=b].join("\n"),
        _ => String::new(),
    }
}

fn dim_to_taffy(d: css::Dimension) -> Dimension {
    match d {
        css::Dimension::Auto => Dimension::Auto,
        css::Dimension::Pt(v) => Dimension::Length(v),
        css::Dimension::Percent(p) => Dimension::Percent(p / 100.0),
    }
}

fn margin_to_taffy(d: css::Dimension) -> LengthPercentageAuto {
    match d {
        css::Dimension::Auto => LengthPercentageAuto::Auto,
        css::Dimension::Pt(v) => LengthPercentageAuto::Length(v),
        css::Dimension::Percent(p) => LengthPercentageAuto::Percent(p / 100.0),
    }
}

fn text_align_self(align: css::TextAlign) -> Option<AlignSelf> {
    Some(match align {
        css::TextAlign::Left => AlignSelf::Start,
        css::TextAlign::Center => AlignSelf::Center,
        css::TextAlign::Right => AlignSelf::End,
    })
}

impl<'a> LayoutBuilder<'a> {
    fn new(fonts: &'a FontManager) -> Self {
        Self {
            taffy: TaffyTree::new(),
            fonts,
            node_styles: HashMap::new(),
            node_content: HashMap::new(),
        }
    }

    fn build_node(
        &mut self,
        styled: &StyledNode,
        avail_width: f32,
        in_flex: bool,
    ) -> Result<Option<NodeId>, RasterError> {
        match styled {
            StyledNode::Text { text, style } => {
                self.build_text_leaf(&normalise_whitespace(text), style, avail_width, !in_flex)
            }
            StyledNode::Element {
                tag: Tag::Img,
                style,
                attrs,
                ..
            } => {
                let src = attrs.get("src").map(String::as_str).unwrap_or("");
                self.build_image(src, style, avail_width).map(Some)
            }
            StyledNode::Element {
                style, children, ..
            } => self.build_element(style, children, avail_width).map(Some),
        }
    }

    /// A leaf holding wrapped text. `align` places it by `text-align` within a
    /// block container.
    fn build_text_leaf(
        &mut self,
        text: &str,
        style: &ComputedStyle,
        avail_width: f32,
        align: bool,
    ) -> Result<Option<NodeId>, RasterError> {
        let text = style.text_transform.apply(text);
        if text.trim().is_empty() {
            return Ok(None);
        }
        let key = FontKey::new(style.font_family, style.is_bold(), style.is_italic());
        let lines = wrap_text(&text, style.font_size, &key, avail_width, self.fonts);
        let width = lines
            .iter()
            .map(|l| self.fonts.measure_text_width(l, style.font_size, &key))
            .fold(0.0f32, f32::max);
        let height = lines.len() as f32 * style.line_height_pt();

        let leaf_style = Style {
            size: Size {
                width: Dimension::Length(width),
                height: Dimension::Length(height),
            },
            flex_shrink: 0.0,
            align_self: if align {
                text_align_self(style.text_align)
            } else {
                None
            },
            ..Default::default()
        };
        let node = self.taffy.new_leaf(leaf_style)?;
        self.node_styles.insert(node, style.clone());
        self.node_content.insert(node, BoxContent::Text { lines });
        Ok(Some(node))
    }

    /// Flush a run of inline siblings into one text leaf.
    fn build_inline_run(
        &mut self,
        run: &[&StyledNode],
        parent: &ComputedStyle,
        avail_width: f32,
    ) -> Result<Option<NodeId>, RasterError> {
        let mut raw = String::new();
        for node in run {
            collect_inline_text(node, &mut raw);
        }
        // A lone styled span keeps its own look; mixed runs take the parent's.
        let mut style = match run {
            [StyledNode::Element { style, .. }] => style.for_text(),
            _ => parent.for_text(),
        };
        style.text_align = parent.text_align;
        self.build_text_leaf(&normalise_whitespace(&raw), &style, avail_width, true)
    }

    fn build_element(
        &mut self,
        style: &ComputedStyle,
        children: &[StyledNode],
        parent_width: f32,
    ) -> Result<NodeId, RasterError> {
        // Width available to children, for wrapping at build time.
        let mut my_width = style.width.resolve(parent_width).unwrap_or(parent_width);
        if let Some(max) = style.max_width.resolve(parent_width) {
            my_width = my_width.min(max);
        }
        let inner_width = (my_width
            - style.padding[1]
            - style.padding[3]
            - 2.0 * style.border_width)
            .max(0.0);

        let is_flex = style.display == css::Display::Flex;
        let mut child_nodes = Vec::new();

        if is_flex {
            // Flex items are blockified; each child is its own item.
            let count = children.len().max(1);
            let item_width = if style.flex_direction == css::FlexDirection::Row {
                let gaps = style.gap * count.saturating_sub(1) as f32;
                ((inner_width - gaps) / count as f32).max(1.0)
            } else {
                inner_width
            };
            for child in children {
                let width = if style.flex_direction == css::FlexDirection::Row
                    && matches!(child, StyledNode::Text { .. })
                {
                    inner_width
                } else {
                    item_width
                };
                if let Some(id) = self.build_node(child, width, true)? {
                    child_nodes.push(id);
                }
            }
        } else {
            let mut run: Vec<&StyledNode> = Vec::new();
            for child in children {
                if child.is_inline() {
                    run.push(child);
                    continue;
                }
                if !run.is_empty() {
                    if let Some(id) = self.build_inline_run(&run, style, inner_width)? {
                        child_nodes.push(id);
                    }
                    run.clear();
                }
                if let Some(id) = self.build_node(child, inner_width, false)? {
                    child_nodes.push(id);
                }
            }
            if !run.is_empty() {
                if let Some(id) = self.build_inline_run(&run, style, inner_width)? {
                    child_nodes.push(id);
                }
            }
        }

        let node = self
            .taffy
            .new_with_children(self.computed_to_taffy(style), &child_nodes)?;
        self.node_styles.insert(node, style.clone());
        Ok(node)
    }

    fn build_image(
        &mut self,
        src: &str,
        style: &ComputedStyle,
        parent_width: f32,
    ) -> Result<NodeId, RasterError> {
        let resolved = resolve_image_size(src, style, parent_width);
        let effective = resolved.as_ref().unwrap_or(style);
        let node = self.taffy.new_leaf(self.computed_to_taffy(effective))?;
        self.node_styles.insert(node, effective.clone());
        self.node_content.insert(
            node,
            BoxContent::Image {
                src: src.to_string(),
            },
        );
        Ok(node)
    }

    fn computed_to_taffy(&self, s: &ComputedStyle) -> Style {
        let mut ts = Style {
            display: Display::Flex,
            ..Default::default()
        };

        match s.display {
            css::Display::Flex => {
                ts.flex_direction = match s.flex_direction {
                    css::FlexDirection::Row => FlexDirection::Row,
                    css::FlexDirection::Column => FlexDirection::Column,
                };
                ts.flex_wrap = match s.flex_wrap {
                    css::FlexWrap::NoWrap => FlexWrap::NoWrap,
                    css::FlexWrap::Wrap => FlexWrap::Wrap,
                };
                ts.justify_content = Some(match s.justify_content {
                    css::JustifyContent::Start => JustifyContent::Start,
                    css::JustifyContent::End => JustifyContent::End,
                    css::JustifyContent::Center => JustifyContent::Center,
                    css::JustifyContent::SpaceBetween => JustifyContent::SpaceBetween,
                    css::JustifyContent::SpaceAround => JustifyContent::SpaceAround,
                    css::JustifyContent::SpaceEvenly => JustifyContent::SpaceEvenly,
                });
                ts.align_items = Some(match s.align_items {
                    css::AlignItems::Start => AlignItems::Start,
                    css::AlignItems::End => AlignItems::End,
                    css::AlignItems::Center => AlignItems::Center,
                    css::AlignItems::Stretch => AlignItems::Stretch,
                });
            }
            css::Display::Block | css::Display::Inline | css::Display::InlineBlock => {
                // Vertical stacking, children fill the width.
                ts.flex_direction = FlexDirection::Column;
                ts.align_items = Some(AlignItems::Stretch);
            }
            css::Display::None => ts.display = Display::None,
        }

        ts.size = Size {
            width: dim_to_taffy(s.width),
            height: dim_to_taffy(s.height),
        };
        ts.min_size = Size {
            width: Dimension::Auto,
            height: dim_to_taffy(s.min_height),
        };
        ts.max_size = Size {
            width: dim_to_taffy(s.max_width),
            height: Dimension::Auto,
        };

        ts.flex_grow = s.flex_grow;
        ts.flex_shrink = s.flex_shrink;

        ts.margin = Rect {
            top: margin_to_taffy(s.margin[0]),
            right: margin_to_taffy(s.margin[1]),
            bottom: margin_to_taffy(s.margin[2]),
            left: margin_to_taffy(s.margin[3]),
        };
        ts.padding = Rect {
            top: LengthPercentage::Length(s.padding[0]),
            right: LengthPercentage::Length(s.padding[1]),
            bottom: LengthPercentage::Length(s.padding[2]),
            left: LengthPercentage::Length(s.padding[3]),
        };
        let border = LengthPercentage::Length(s.border_width);
        ts.border = Rect {
            top: border,
            right: border,
            bottom: border,
            left: border,
        };
        ts.gap = Size {
            width: LengthPercentage::Length(s.gap),
            height: LengthPercentage::Length(s.gap),
        };
        ts
    }

    fn extract(
        &self,
        node: NodeId,
        offset_x: f32,
        offset_y: f32,
    ) -> Result<PositionedBox, RasterError> {
        let layout = *self.taffy.layout(node)?;
        let style = self.node_styles.get(&node).cloned().unwrap_or_default();
        let content = self
            .node_content
            .get(&node)
            .cloned()
            .unwrap_or(BoxContent::None);

        let x = offset_x + layout.location.x;
        let y = offset_y + layout.location.y;

        let children = self
            .taffy
            .children(node)?
            .into_iter()
            .map(|child| self.extract(child, x, y))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PositionedBox {
            x,
            y,
            width: layout.size.width,
            height: layout.size.height,
            page_break_before: style.page_break_before,
            page_break_after: style.page_break_after,
            style,
            content,
            children,
        })
    }
}

/// Replace `auto` image dimensions using the intrinsic size of a base64 data
/// URI (CSS px, converted to points) and its aspect ratio.
///
/// `None` when nothing needs resolving or the image cannot be decoded.
fn resolve_image_size(
    src: &str,
    style: &ComputedStyle,
    parent_width: f32,
) -> Option<ComputedStyle> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    let known_w = style.width.resolve(parent_width);
    let known_h = match style.height {
        css::Dimension::Pt(v) => Some(v),
        _ => None,
    };
    if known_w.is_some() && known_h.is_some() {
        return None;
    }

    let (header, data) = src.strip_prefix("data:")?.split_once(',')?;
    if !header.contains(";base64") {
        return None;
    }
    let bytes = STANDARD.decode(data.trim()).ok()?;
    let img = match ::image::load_from_memory(&bytes) {
        Ok(img) => img,
        Err(e) => {
            log::warn!("cannot size image: {e}");
            return None;
        }
    };
    let (w, h) = (img.width() as f32 * PT_PER_PX, img.height() as f32 * PT_PER_PX);
    if w == 0.0 || h == 0.0 {
        return None;
    }
    let aspect = w / h;

    let mut s = style.clone();
    match (known_w, known_h) {
        (Some(w), None) => s.height = css::Dimension::Pt(w / aspect),
        (None, Some(h)) => s.width = css::Dimension::Pt(h * aspect),
        _ => {
            s.width = css::Dimension::Pt(w);
            s.height = css::Dimension::Pt(h);
        }
    }
    Some(s)
}

/// Lay out `root` (normally the styled `body`) inside a viewport of
/// `content_width` points whose left edge sits at `origin_x`.
pub fn compute_layout(
    root: &StyledNode,
    content_width: f32,
    origin_x: f32,
    fonts: &FontManager,
) -> Result<Vec<PositionedBox>, RasterError> {
    let mut builder = LayoutBuilder::new(fonts);
    let Some(root_id) = builder.build_node(root, content_width, false)? else {
        return Ok(Vec::new());
    };

    let viewport_style = Style {
        display: Display::Flex,
        flex_direction: FlexDirection::Column,
        size: Size {
            width: Dimension::Length(content_width),
            height: Dimension::Auto,
        },
        ..Default::default()
    };
    let viewport = builder.taffy.new_with_children(viewport_style, &[root_id])?;
    builder.taffy.compute_layout(
        viewport,
        Size {
            width: AvailableSpace::Definite(content_width),
            height: AvailableSpace::MaxContent,
        },
    )?;

    Ok(builder.extract(viewport, origin_x, 0.0)?.children)
}
