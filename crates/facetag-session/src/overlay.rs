//! Overlay drawing: boxes, identity labels and attribute text.

use facetag_core::{BoundingBox, DetectionResult};
use image::{Rgba, RgbaImage, RgbImage};
use serde::Serialize;

const BOX_COLOR: Rgba<u8> = Rgba([0, 0, 255, 255]);
const BOX_THICKNESS: i64 = 2;
const TEXT_BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 128]);
/// Approximate glyph cell used to size text backgrounds.
const CHAR_WIDTH: u32 = 7;
const LINE_HEIGHT: u32 = 14;

/// Rendered size of the frame on screen (not its native resolution).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DisplaySize {
    pub width: u32,
    pub height: u32,
}

impl DisplaySize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Drawing surface the overlay renders onto.
pub trait Canvas {
    /// Set the internal coordinate system to `size`.
    fn resize(&mut self, size: DisplaySize);
    /// Erase everything.
    fn clear(&mut self);
    fn draw_box(&mut self, bbox: &BoundingBox, label: &str);
    /// Draw a block of text lines with its top-left corner at `anchor`.
    fn draw_text(&mut self, anchor: (f32, f32), lines: &[String]);
}

/// Text block under a face box.
pub fn annotation_lines(result: &DetectionResult) -> Vec<String> {
    let mut lines = vec![
        format!("Gender: {}", result.gender),
        format!("Age (guess): {} years", result.age.round() as i64),
    ];
    if let Some(expression) = result.dominant_expression {
        lines.push(format!(
            "Expression: {} – probability: {:.2}",
            expression.expression, expression.probability
        ));
    }
    lines
}

pub struct OverlayRenderer<C> {
    canvas: C,
}

impl<C: Canvas> OverlayRenderer<C> {
    pub fn new(canvas: C) -> Self {
        Self { canvas }
    }

    pub fn canvas(&self) -> &C {
        &self.canvas
    }

    pub fn into_canvas(self) -> C {
        self.canvas
    }

    /// Resize, clear, then draw every non-degenerate result.
    ///
    /// The clear happens even for an empty list; that is what removes boxes
    /// once no face is in view. Returns the number of faces drawn.
    pub fn render(&mut self, display: DisplaySize, results: &[DetectionResult]) -> usize {
        self.canvas.resize(display);
        self.canvas.clear();

        let mut drawn = 0;
        for result in results {
            let bbox = &result.bounding_box;
            if bbox.is_degenerate() {
                continue;
            }
            self.canvas.draw_box(bbox, &result.matched_label);
            self.canvas.draw_text(bbox.bottom_left(), &annotation_lines(result));
            drawn += 1;
        }
        drawn
    }

    /// Match the surface to new display dimensions and start blank.
    pub fn resync(&mut self, display: DisplaySize) {
        self.canvas.resize(display);
        self.canvas.clear();
    }

    pub fn clear(&mut self) {
        self.canvas.clear();
    }
}

/// Text that a raster canvas cannot rasterize itself; kept for the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextAnnotation {
    pub x: f32,
    pub y: f32,
    pub lines: Vec<String>,
}

/// Transparent RGBA overlay with box outlines and text backgrounds.
///
/// Text itself is recorded in [`RasterCanvas::annotations`].
#[derive(Debug, Clone)]
pub struct RasterCanvas {
    surface: RgbaImage,
    annotations: Vec<TextAnnotation>,
}

impl Default for RasterCanvas {
    fn default() -> Self {
        Self {
            surface: RgbaImage::new(0, 0),
            annotations: Vec::new(),
        }
    }
}

impl RasterCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn surface(&self) -> &RgbaImage {
        &self.surface
    }

    pub fn annotations(&self) -> &[TextAnnotation] {
        &self.annotations
    }

    /// Blend the overlay onto a frame scaled to the overlay's size.
    pub fn composite_onto(&self, frame: &RgbImage) -> RgbaImage {
        let (w, h) = self.surface.dimensions();
        let mut base = image::DynamicImage::ImageRgb8(frame.clone()).to_rgba8();
        if base.dimensions() != (w, h) && w > 0 && h > 0 {
            base = image::imageops::resize(&base, w, h, image::imageops::FilterType::Triangle);
        }
        image::imageops::overlay(&mut base, &self.surface, 0, 0);
        base
    }

    fn outline(&mut self, x0: i64, y0: i64, x1: i64, y1: i64) {
        let (right, bottom) = (x1.saturating_add(1), y1.saturating_add(1));
        let top_end = y0.saturating_add(BOX_THICKNESS);
        let left_end = x0.saturating_add(BOX_THICKNESS);
        let bottom_start = bottom.saturating_sub(BOX_THICKNESS);
        let right_start = right.saturating_sub(BOX_THICKNESS);
        self.fill(x0, y0, right, top_end, BOX_COLOR);
        self.fill(x0, bottom_start, right, bottom, BOX_COLOR);
        self.fill(x0, y0, left_end, bottom, BOX_COLOR);
        self.fill(right_start, y0, right, bottom, BOX_COLOR);
    }

    /// Fill the half-open rectangle `[x0, x1) × [y0, y1)`, clipped to the surface.
    fn fill(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgba<u8>) {
        let (w, h) = (self.surface.width() as i64, self.surface.height() as i64);
        let (x0, x1) = (x0.clamp(0, w), x1.clamp(0, w));
        let (y0, y1) = (y0.clamp(0, h), y1.clamp(0, h));
        for y in y0..y1 {
            for x in x0..x1 {
                self.surface.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

impl Canvas for RasterCanvas {
    fn resize(&mut self, size: DisplaySize) {
        if self.surface.dimensions() != (size.width, size.height) {
            self.surface = RgbaImage::new(size.width, size.height);
        }
    }

    fn clear(&mut self) {
        for pixel in self.surface.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
        self.annotations.clear();
    }

    fn draw_box(&mut self, bbox: &BoundingBox, label: &str) {
        let x0 = bbox.x.round() as i64;
        let y0 = bbox.y.round() as i64;
        let x1 = (bbox.x + bbox.width).round() as i64;
        let y1 = (bbox.y + bbox.height).round() as i64;
        self.outline(x0, y0, x1, y1);

        // Label plate sits on the top edge, inside the box.
        let plate_w = (label.chars().count() as i64).saturating_mul(CHAR_WIDTH as i64);
        self.fill(
            x0,
            y0,
            x0.saturating_add(plate_w),
            y0.saturating_add(LINE_HEIGHT as i64),
            BOX_COLOR,
        );
        self.annotations.push(TextAnnotation {
            x: bbox.x,
            y: bbox.y,
            lines: vec![label.to_string()],
        });
    }

    fn draw_text(&mut self, anchor: (f32, f32), lines: &[String]) {
        let x0 = anchor.0.round() as i64;
        let y0 = anchor.1.round() as i64;
        let widest = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) as i64;
        let w = widest.saturating_mul(CHAR_WIDTH as i64);
        let h = (lines.len() as i64).saturating_mul(LINE_HEIGHT as i64);
        self.fill(x0, y0, x0.saturating_add(w), y0.saturating_add(h), TEXT_BACKGROUND);
        self.annotations.push(TextAnnotation {
            x: anchor.0,
            y: anchor.1,
            lines: lines.to_vec(),
        });
    }
}
