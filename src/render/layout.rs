//! Drawing primitives over a printpdf page with a flowing vertical cursor.
//!
//! Coordinates are millimetres with printpdf's bottom-left origin. `y` is
//! the baseline of the next line and moves downwards; when content would
//! cross the bottom margin a fresh page is appended and the cursor resets.

use printpdf::path::PaintMode;
use printpdf::{Color, IndirectFontRef, Line, Mm, PdfDocumentReference, PdfLayerReference, Point, Rect, Rgb};

use super::fonts::Measurer;

pub const PAGE_W: f32 = 210.0;
pub const PAGE_H: f32 = 297.0;
pub const MARGIN_X: f32 = 15.0;
pub const MARGIN_TOP: f32 = 20.0;
pub const MARGIN_BOTTOM: f32 = 20.0;
pub const CONTENT_LEFT: f32 = MARGIN_X;
pub const CONTENT_RIGHT: f32 = PAGE_W - MARGIN_X;

pub const BLACK: (u8, u8, u8) = (0, 0, 0);
pub const WHITE: (u8, u8, u8) = (255, 255, 255);

fn rgb(c: (u8, u8, u8)) -> Color {
    Color::Rgb(Rgb::new(
        c.0 as f32 / 255.0,
        c.1 as f32 / 255.0,
        c.2 as f32 / 255.0,
        None,
    ))
}

pub struct Canvas<'a> {
    doc: &'a PdfDocumentReference,
    layer: PdfLayerReference,
    pub font: IndirectFontRef,
    pub bold: IndirectFontRef,
    measurer: Measurer<'a>,
    pub y: f32,
    pages: usize,
}

impl<'a> Canvas<'a> {
    pub fn new(
        doc: &'a PdfDocumentReference,
        layer: PdfLayerReference,
        font: IndirectFontRef,
        bold: IndirectFontRef,
        measurer: Measurer<'a>,
    ) -> Self {
        Self {
            doc,
            layer,
            font,
            bold,
            measurer,
            y: PAGE_H - MARGIN_TOP,
            pages: 1,
        }
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Starts a new page when fewer than `needed` mm remain above the bottom margin.
    pub fn ensure_space(&mut self, needed: f32) -> bool {
        if self.y - needed >= MARGIN_BOTTOM {
            return false;
        }
        let (page, layer) = self.doc.add_page(Mm(PAGE_W), Mm(PAGE_H), "Layer 1");
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.pages += 1;
        self.y = PAGE_H - MARGIN_TOP;
        true
    }

    pub fn width(&self, text: &str, size: f32) -> f32 {
        self.measurer.width_mm(text, size)
    }

    pub fn text(&self, text: &str, size: f32, x: f32, y: f32, bold: bool) {
        let font = if bold { &self.bold } else { &self.font };
        self.layer.use_text(text, size, Mm(x), Mm(y), font);
    }

    pub fn text_right(&self, text: &str, size: f32, x_right: f32, y: f32, bold: bool) {
        let x = (x_right - self.width(text, size)).max(0.0);
        self.text(text, size, x, y, bold);
    }

    pub fn text_center(&self, text: &str, size: f32, x_left: f32, w: f32, y: f32, bold: bool) {
        let x = x_left + ((w - self.width(text, size)) / 2.0).max(0.0);
        self.text(text, size, x, y, bold);
    }

    /// Sets the colour used for subsequent text and fills.
    pub fn set_fill(&self, c: (u8, u8, u8)) {
        self.layer.set_fill_color(rgb(c));
    }

    pub fn fill_rect(&self, x: f32, y_top: f32, w: f32, h: f32, c: (u8, u8, u8)) {
        self.set_fill(c);
        let rect = Rect::new(Mm(x), Mm(y_top - h), Mm(x + w), Mm(y_top)).with_mode(PaintMode::Fill);
        self.layer.add_rect(rect);
        self.set_fill(BLACK);
    }

    pub fn stroke_rect(&self, x: f32, y_top: f32, w: f32, h: f32, thickness: f32) {
        self.layer.set_outline_color(rgb(BLACK));
        self.layer.set_outline_thickness(thickness);
        let rect = Rect::new(Mm(x), Mm(y_top - h), Mm(x + w), Mm(y_top)).with_mode(PaintMode::Stroke);
        self.layer.add_rect(rect);
    }

    pub fn rule(&self, x1: f32, x2: f32, y: f32, thickness: f32) {
        self.layer.set_outline_color(rgb(BLACK));
        self.layer.set_outline_thickness(thickness);
        self.layer.add_line(Line {
            points: vec![
                (Point::new(Mm(x1), Mm(y)), false),
                (Point::new(Mm(x2), Mm(y)), false),
            ],
            is_closed: false,
        });
    }

    pub fn wrap(&self, input: &str, size: f32, max_width: f32) -> Vec<String> {
        wrap_text(&self.measurer, input, size, max_width)
    }
}

/// Word-wraps each line of `input` to `max_width` mm. Blank lines inside the
/// text are kept as empty lines; leading and trailing blank lines are not.
/// Words wider than the column are split by character.
pub fn wrap_text(measurer: &Measurer<'_>, input: &str, size: f32, max_width: f32) -> Vec<String> {
    let mut out = Vec::new();
    for raw in input.trim().lines() {
        let s = raw.trim();
        if s.is_empty() {
            out.push(String::new());
            continue;
        }
        out.extend(wrap_paragraph(measurer, s, size, max_width));
    }
    out
}

fn wrap_paragraph(measurer: &Measurer<'_>, s: &str, size: f32, max_width: f32) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in s.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", current, word)
        };
        if measurer.width_mm(&candidate, size) <= max_width {
            current = candidate;
            continue;
        }
        if !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
        if measurer.width_mm(word, size) <= max_width {
            current.push_str(word);
            continue;
        }

        let mut chunk = String::new();
        for ch in word.chars() {
            chunk.push(ch);
            if measurer.width_mm(&chunk, size) > max_width && chunk.chars().count() > 1 {
                chunk.pop();
                out.push(std::mem::take(&mut chunk));
                chunk.push(ch);
            }
        }
        current = chunk;
    }

    if !current.is_empty() {
        out.push(current);
    }
    out
}
