//! In-process rasterizer: markup → DOM → styles → layout → pages → PDF.

use log::debug;

use crate::dom::parse_document;
use crate::engine::PrintOptions;
use crate::error::RasterError;
use crate::fonts::FontManager;
use crate::layout::compute_layout;
use crate::page_layout::{DocumentLayout, Orientation, PageMargins};
use crate::pagination::paginate;
use crate::render::render_pdf;
use crate::style::style_document;
use crate::stylesheet::{PageSize, Stylesheet};

/// Resolved sheet geometry, in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSetup {
    pub width_pt: f32,
    pub height_pt: f32,
    pub margins: PageMargins,
}

impl PageSetup {
    pub fn content_width(&self) -> f32 {
        (self.width_pt - self.margins.left - self.margins.right).max(1.0)
    }
}

/// Bytes plus the layout they were drawn from.
#[derive(Debug, Clone)]
pub struct RasterOutput {
    pub pdf: Vec<u8>,
    pub layout: DocumentLayout,
}

/// Page size from `@page` when preferred and present, else from the options.
pub fn resolve_page_setup(sheet: &Stylesheet, options: &PrintOptions) -> PageSetup {
    let requested = if options.landscape {
        Orientation::Landscape
    } else {
        Orientation::Portrait
    };
    let from_options = options.format.size_pt(requested);

    let css_size = sheet
        .page
        .size
        .filter(|_| options.prefer_css_page_size);
    let (width_pt, height_pt) = match css_size {
        None | Some(PageSize::Auto) => from_options,
        Some(PageSize::Orientation(o)) => options.format.size_pt(o),
        Some(PageSize::Named {
            format,
            orientation,
        }) => format.size_pt(orientation.unwrap_or(requested)),
        Some(PageSize::Explicit { width, height }) => (width, height),
    };

    let margins = sheet
        .page
        .margin
        .map(|[top, right, bottom, left]| PageMargins {
            top,
            right,
            bottom,
            left,
        })
        .unwrap_or_default();

    PageSetup {
        width_pt,
        height_pt,
        margins,
    }
}

/// Lay `markup` out into pages without encoding.
pub fn lay_out(
    markup: &str,
    options: &PrintOptions,
    fonts: &FontManager,
) -> Result<DocumentLayout, RasterError> {
    let doc = parse_document(markup)?;
    if doc.is_blank() {
        return Err(RasterError::EmptyDocument);
    }

    let sheet = Stylesheet::from_sources(&doc.style_sheets());
    let setup = resolve_page_setup(&sheet, options);
    debug!(
        "page {}x{}pt, margins {:?}",
        setup.width_pt, setup.height_pt, setup.margins
    );

    let styled = style_document(&doc, &sheet);
    let boxes = compute_layout(
        &styled.root,
        setup.content_width(),
        setup.margins.left,
        fonts,
    )?;

    let mut layout = paginate(
        &boxes,
        setup.width_pt,
        setup.height_pt,
        setup.margins,
        fonts,
    );
    layout.page_background = styled.page_background.map(|c| c.to_array());
    if let Some(title) = options.title.clone().or_else(|| doc.title()) {
        layout.title = title;
    }
    if !options.print_background {
        layout.strip_backgrounds();
    }
    Ok(layout)
}

/// Lay out and encode `markup` as a PDF.
pub fn rasterize(
    markup: &str,
    options: &PrintOptions,
    fonts: &FontManager,
) -> Result<RasterOutput, RasterError> {
    let layout = lay_out(markup, options, fonts)?;
    let pdf = render_pdf(&layout)?;
    debug!("rasterized {} page(s), {} bytes", layout.pages.len(), pdf.len());
    Ok(RasterOutput { pdf, layout })
}
