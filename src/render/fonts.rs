//! Font resolution for the invoice document.
//!
//! Optional TrueType files are looked up in the font directory in priority
//! order; the first one that parses wins. When none is usable the document
//! falls back to the PDF built-in Helvetica, which needs no embedding.

use std::path::Path;

/// Files tried in order. The first covers CJK text, the second Latin.
pub const FONT_PREFERENCE: [&str; 2] = ["NotoSansSC-Regular.ttf", "Roboto-Regular.ttf"];

// PDF font sizes are in points; layout coordinates are in millimetres.
const PT_TO_MM: f32 = 25.4 / 72.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FontSource {
    TrueType { file: &'static str, bytes: Vec<u8> },
    Builtin,
}

impl FontSource {
    pub fn name(&self) -> &str {
        match self {
            FontSource::TrueType { file, .. } => *file,
            FontSource::Builtin => "Helvetica",
        }
    }

    pub fn measurer(&self) -> Measurer<'_> {
        match self {
            FontSource::TrueType { bytes, .. } => match ttf_parser::Face::parse(bytes, 0) {
                Ok(face) => Measurer::Face(face),
                Err(_) => Measurer::Estimate,
            },
            FontSource::Builtin => Measurer::Estimate,
        }
    }
}

/// Walks the preference list. A missing or unparseable file is skipped.
pub fn resolve_font(font_dir: &Path) -> FontSource {
    for file in FONT_PREFERENCE {
        let path = font_dir.join(file);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(_) => continue,
        };
        if let Err(e) = ttf_parser::Face::parse(&bytes, 0) {
            tracing::warn!(path = %path.display(), error = %e, "font file unusable, trying next");
            continue;
        }
        tracing::debug!(font = file, "using embedded font");
        return FontSource::TrueType { file, bytes };
    }
    tracing::debug!(dir = %font_dir.display(), "no optional fonts found, using Helvetica");
    FontSource::Builtin
}

/// Text width in millimetres for right alignment and wrapping.
pub enum Measurer<'a> {
    Face(ttf_parser::Face<'a>),
    Estimate,
}

impl Measurer<'_> {
    pub fn width_mm(&self, text: &str, font_size_pt: f32) -> f32 {
        match self {
            Measurer::Face(face) => {
                let units_per_em = face.units_per_em() as f32;
                if units_per_em <= 0.0 {
                    return estimate_width_mm(text, font_size_pt);
                }
                let width_units: i32 = text
                    .chars()
                    .filter_map(|ch| face.glyph_index(ch))
                    .map(|gid| face.glyph_hor_advance(gid).unwrap_or(0) as i32)
                    .sum();
                (width_units as f32 / units_per_em) * font_size_pt * PT_TO_MM
            }
            Measurer::Estimate => estimate_width_mm(text, font_size_pt),
        }
    }
}

// Helvetica averages roughly half an em per glyph.
fn estimate_width_mm(text: &str, font_size_pt: f32) -> f32 {
    text.chars().count() as f32 * font_size_pt * 0.5 * PT_TO_MM
}
