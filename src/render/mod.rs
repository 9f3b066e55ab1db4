//! Fixed-layout A4 invoice document.

pub mod fonts;
pub mod format;
pub mod layout;

use std::io::{BufWriter, Cursor};
use std::path::Path;

use printpdf::lopdf::{self, Object, StringFormat};
use printpdf::{BuiltinFont, CustomPdfConformance, Mm, PdfConformance, PdfDocument, PdfDocumentReference};
use sha2::{Digest, Sha256};

use crate::error::{BillingError, Result};
use crate::models::{Client, Invoice};
use crate::settings::UserSettings;

use fonts::{resolve_font, FontSource};
use format::{format_amount, format_date, format_quantity, summary_row};
use layout::{Canvas, CONTENT_LEFT, CONTENT_RIGHT, PAGE_H, PAGE_W, WHITE};

/// Every binary document starts with these bytes.
pub const PDF_MAGIC: &[u8; 4] = b"%PDF";

const HEADER_BAND: (u8, u8, u8) = (51, 51, 51);
const TABLE_HEADER: (u8, u8, u8) = (12, 168, 67);
const HEADER_BAND_H: f32 = 35.0;

const COL_DESC_W: f32 = 90.0;
const COL_NUM_W: f32 = 30.0;
const CELL_PAD_X: f32 = 2.0;

pub struct RenderInput<'a> {
    pub invoice: &'a Invoice,
    pub client: &'a Client,
    pub settings: &'a UserSettings,
    pub message: &'a str,
}

/// Renders the invoice to PDF bytes. Identical inputs and fonts produce
/// identical bytes.
pub fn render_invoice(input: &RenderInput<'_>, font_dir: &Path) -> Result<Vec<u8>> {
    let font = resolve_font(font_dir);
    let fingerprint = fingerprint(input, &font)?;

    let (doc, page1, layer1) = PdfDocument::new(
        format!("Invoice {}", input.invoice.number.trim()),
        Mm(PAGE_W),
        Mm(PAGE_H),
        "Layer 1",
    );
    let doc = doc.with_conformance(PdfConformance::Custom(CustomPdfConformance {
        requires_icc_profile: false,
        requires_xmp_metadata: false,
        allows_default_fonts: true,
        ..Default::default()
    }));
    let (regular, bold) = add_fonts(&doc, &font)?;
    let layer = doc.get_page(page1).get_layer(layer1);

    let mut canvas = Canvas::new(&doc, layer, regular, bold, font.measurer());
    draw_header(&mut canvas, input.settings);
    draw_metadata(&mut canvas, input);
    draw_items(&mut canvas, input);
    draw_totals(&mut canvas, input);
    draw_message(&mut canvas, input.message);
    let pages = canvas.pages();
    drop(canvas);

    let mut writer = BufWriter::new(Vec::<u8>::new());
    doc.save(&mut writer).map_err(|e| BillingError::Render(e.to_string()))?;
    let raw = writer.into_inner().map_err(|e| BillingError::Render(e.to_string()))?;

    let bytes = normalize(&raw, &fingerprint)?;
    tracing::debug!(
        invoice_id = input.invoice.id,
        font = font.name(),
        pages,
        bytes = bytes.len(),
        "invoice document rendered"
    );
    Ok(bytes)
}

fn add_fonts(
    doc: &PdfDocumentReference,
    font: &FontSource,
) -> Result<(printpdf::IndirectFontRef, printpdf::IndirectFontRef)> {
    let render_err = |e: printpdf::Error| BillingError::Render(e.to_string());
    match font {
        FontSource::TrueType { bytes, .. } => {
            let regular = doc
                .add_external_font(Cursor::new(bytes.as_slice()))
                .map_err(render_err)?;
            // Single face; headings reuse it.
            Ok((regular.clone(), regular))
        }
        FontSource::Builtin => {
            let regular = doc.add_builtin_font(BuiltinFont::Helvetica).map_err(render_err)?;
            let bold = doc.add_builtin_font(BuiltinFont::HelveticaBold).map_err(render_err)?;
            Ok((regular, bold))
        }
    }
}

fn fingerprint(input: &RenderInput<'_>, font: &FontSource) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(&(
        input.invoice,
        input.client,
        input.settings,
        input.message,
        font.name(),
    ))
    .map_err(|e| BillingError::Render(e.to_string()))?;
    Ok(Sha256::digest(&payload)[..16].to_vec())
}

/// Pins the trailer id and strips generation timestamps and XMP metadata.
fn normalize(raw: &[u8], fingerprint: &[u8]) -> Result<Vec<u8>> {
    let render_err = |e: lopdf::Error| BillingError::Render(e.to_string());
    let mut doc = lopdf::Document::load_mem(raw).map_err(render_err)?;

    let id = Object::String(fingerprint.to_vec(), StringFormat::Hexadecimal);
    doc.trailer.set("ID", Object::Array(vec![id.clone(), id]));

    if let Ok(info_id) = doc.trailer.get(b"Info").and_then(Object::as_reference) {
        if let Ok(info) = doc.get_object_mut(info_id).and_then(Object::as_dict_mut) {
            info.remove(b"CreationDate");
            info.remove(b"ModDate");
        }
    }
    if let Ok(root_id) = doc.trailer.get(b"Root").and_then(Object::as_reference) {
        if let Ok(catalog) = doc.get_object_mut(root_id).and_then(Object::as_dict_mut) {
            catalog.remove(b"Metadata");
        }
    }
    doc.prune_objects();

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| BillingError::Render(e.to_string()))?;
    Ok(out)
}

fn draw_header(c: &mut Canvas<'_>, settings: &UserSettings) {
    c.fill_rect(0.0, PAGE_H, PAGE_W, HEADER_BAND_H, HEADER_BAND);
    c.set_fill(WHITE);
    c.text_right("INVOICE", 28.0, CONTENT_RIGHT, PAGE_H - 22.0, true);

    let mut y = PAGE_H - 13.0;
    c.text(settings.sender_display_name(), 11.0, CONTENT_LEFT, y, true);
    for line in [
        &settings.sender_address,
        &settings.sender_postal_code,
        &settings.sender_phone,
        &settings.sender_email,
    ] {
        if line.is_empty() {
            continue;
        }
        y -= 4.6;
        c.text(line, 9.0, CONTENT_LEFT, y, false);
    }
    c.set_fill(layout::BLACK);
    c.y = PAGE_H - HEADER_BAND_H - 10.0;
}

fn draw_metadata(c: &mut Canvas<'_>, input: &RenderInput<'_>) {
    let s = input.settings;
    let inv = input.invoice;
    let half = (CONTENT_RIGHT - CONTENT_LEFT) / 2.0;

    c.ensure_space(30.0);
    c.text(
        &format!("INVOICE TO {}", input.client.name.trim().to_uppercase()),
        11.0,
        CONTENT_LEFT,
        c.y,
        true,
    );
    c.text_right(&format!("INVOICE# {}", inv.number.trim()), 11.0, CONTENT_RIGHT, c.y, true);
    c.y -= 6.0;

    let mut left = c.wrap(&input.client.address, 10.0, half - 5.0);
    let contact = format!("{} {}", input.client.contact_person.trim(), input.client.email.trim());
    if !contact.trim().is_empty() {
        left.push(contact.trim().to_string());
    }
    let right = [
        format!("DATE {}", format_date(&inv.issue_date, &s.date_format, &s.timezone)),
        format!("DUE DATE {}", format_date(&inv.due_date, &s.date_format, &s.timezone))
            .trim_end()
            .to_string(),
        format!("TERMS {}", s.invoice_terms),
    ];

    let rows = left.len().max(right.len());
    for i in 0..rows {
        c.ensure_space(6.0);
        if let Some(l) = left.get(i) {
            c.text(l, 10.0, CONTENT_LEFT, c.y, false);
        }
        if let Some(r) = right.get(i) {
            c.text_right(r, 10.0, CONTENT_RIGHT, c.y, false);
        }
        c.y -= 6.0;
    }
    c.y -= 6.0;
}

fn draw_items(c: &mut Canvas<'_>, input: &RenderInput<'_>) {
    let currency = &input.settings.currency;
    let row = summary_row(input.invoice);
    let x_qty = CONTENT_LEFT + COL_DESC_W;
    let x_rate = x_qty + COL_NUM_W;
    let x_amount = x_rate + COL_NUM_W;

    let desc_lines = c.wrap(&row.description, 10.0, COL_DESC_W - 2.0 * CELL_PAD_X);
    let row_h = (desc_lines.len() as f32 * 5.0 + 5.0).max(10.0);
    c.ensure_space(8.0 + row_h + 4.0);

    // Header band; cursor sits on the band's top edge.
    let top = c.y + 4.0;
    c.fill_rect(CONTENT_LEFT, top, CONTENT_RIGHT - CONTENT_LEFT, 8.0, TABLE_HEADER);
    c.set_fill(WHITE);
    let base = top - 5.5;
    c.text("DESCRIPTION", 10.0, CONTENT_LEFT + CELL_PAD_X, base, true);
    c.text_center("QTY", 10.0, x_qty, COL_NUM_W, base, true);
    c.text_center("RATE", 10.0, x_rate, COL_NUM_W, base, true);
    c.text_center("AMOUNT", 10.0, x_amount, COL_NUM_W, base, true);
    c.set_fill(layout::BLACK);

    let row_top = top - 8.0;
    for (x, w) in [
        (CONTENT_LEFT, COL_DESC_W),
        (x_qty, COL_NUM_W),
        (x_rate, COL_NUM_W),
        (x_amount, COL_NUM_W),
    ] {
        c.stroke_rect(x, row_top, w, row_h, 0.3);
    }
    let base = row_top - 6.5;
    for (i, line) in desc_lines.iter().enumerate() {
        c.text(line, 10.0, CONTENT_LEFT + CELL_PAD_X, base - i as f32 * 5.0, false);
    }
    c.text_center(&format_quantity(row.quantity), 10.0, x_qty, COL_NUM_W, base, false);
    c.text_center(&format_amount(row.rate, currency), 10.0, x_rate, COL_NUM_W, base, false);
    c.text_center(&format_amount(row.amount, currency), 10.0, x_amount, COL_NUM_W, base, false);

    c.y = row_top - row_h - 8.0;
}

fn draw_totals(c: &mut Canvas<'_>, input: &RenderInput<'_>) {
    let inv = input.invoice;
    let currency = &input.settings.currency;
    let label_x = CONTENT_RIGHT - 80.0;
    let rows = [
        ("SUBTOTAL", format_amount(inv.subtotal, currency), false),
        ("DISCOUNT", format_amount(0.0, currency), false),
        ("TAX", format_amount(inv.tax_amount, currency), false),
        ("TOTAL", format_amount(inv.total, currency), true),
        ("BALANCE DUE", format_amount(inv.total, currency), true),
    ];

    c.ensure_space(rows.len() as f32 * 8.0);
    for (label, value, emphasis) in rows {
        if label == "TOTAL" {
            c.rule(label_x, CONTENT_RIGHT, c.y + 5.0, 0.4);
        }
        c.text(label, 10.0, label_x, c.y, emphasis);
        c.text_right(&value, 10.0, CONTENT_RIGHT, c.y, emphasis);
        c.y -= 8.0;
    }
    c.y -= 4.0;
}

fn draw_message(c: &mut Canvas<'_>, message: &str) {
    const BOX_W: f32 = 120.0;
    const LINE_H: f32 = 6.0;

    let lines = c.wrap(message, 10.0, BOX_W - 2.0 * CELL_PAD_X);
    c.ensure_space(LINE_H * 2.0 + 4.0);
    c.text("MESSAGE", 10.0, CONTENT_LEFT, c.y, true);
    c.y -= 3.0;
    c.rule(CONTENT_LEFT, CONTENT_LEFT + BOX_W, c.y, 0.3);
    c.y -= LINE_H;

    for line in &lines {
        if c.ensure_space(LINE_H) {
            c.rule(CONTENT_LEFT, CONTENT_LEFT + BOX_W, c.y + LINE_H - 3.0, 0.3);
        }
        c.text(line, 10.0, CONTENT_LEFT + CELL_PAD_X, c.y, false);
        c.y -= LINE_H;
    }
    c.rule(CONTENT_LEFT, CONTENT_LEFT + BOX_W, c.y + LINE_H - 3.0, 0.3);
}
