//! Regenerates an invoice's line items and totals from its linked time entries.

use rusqlite::{params, Connection};

use crate::aggregate::{aggregate_linked_entries, Aggregation};
use crate::error::{BillingError, Result};
use crate::invoices::{encode_items, read_invoice};
use crate::models::{Invoice, InvoiceId, InvoiceItem, UserId};

/// Rounds a currency amount to whole cents.
pub fn round_cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Totals {
    pub subtotal: f64,
    pub tax_amount: f64,
    pub total: f64,
}

pub fn compute_totals(items: &[InvoiceItem], tax_rate: f64) -> Totals {
    let subtotal = round_cents(items.iter().map(|i| i.amount).sum());
    let tax_amount = round_cents(subtotal * tax_rate);
    // Not re-rounded: total must equal subtotal + tax_amount exactly.
    Totals {
        subtotal,
        tax_amount,
        total: subtotal + tax_amount,
    }
}

/// One item per project group, ordered by project id.
pub fn build_line_items(groups: &Aggregation) -> Vec<InvoiceItem> {
    let mut ordered: Vec<_> = groups.values().collect();
    ordered.sort_by_key(|g| g.project_id);
    ordered
        .into_iter()
        .map(|g| InvoiceItem {
            description: g.description.clone(),
            quantity: g.hours,
            unit_price: g.rate,
            amount: round_cents(g.hours * g.rate),
        })
        .collect()
}

pub fn recalculate(conn: &Connection, user_id: UserId, invoice_id: InvoiceId, tax_rate: f64) -> Result<Invoice> {
    let groups = aggregate_linked_entries(conn, user_id, invoice_id)?;
    let items = build_line_items(&groups);
    let totals = compute_totals(&items, tax_rate);

    let affected = conn.execute(
        r#"UPDATE invoices
           SET subtotal = ?1, tax_rate = ?2, tax_amount = ?3, total = ?4, items_json = ?5
           WHERE id = ?6 AND user_id = ?7"#,
        params![
            totals.subtotal,
            tax_rate,
            totals.tax_amount,
            totals.total,
            encode_items(&items),
            invoice_id,
            user_id
        ],
    )?;
    if affected == 0 {
        return Err(BillingError::not_found("invoice", invoice_id));
    }

    tracing::debug!(
        user_id,
        invoice_id,
        items = items.len(),
        subtotal = totals.subtotal,
        total = totals.total,
        "invoice recalculated"
    );
    read_invoice(conn, user_id, invoice_id)
}

/// Replaces the invoice's linked entries with `entry_ids` and recalculates
/// with the invoice's stored tax rate. Ids owned by another user are skipped.
///
/// Callers run this inside one write transaction so the clear, link and
/// recalculation steps commit together.
pub fn set_time_entries(
    conn: &Connection,
    user_id: UserId,
    invoice_id: InvoiceId,
    entry_ids: &[i64],
) -> Result<Invoice> {
    let current = read_invoice(conn, user_id, invoice_id)?;

    conn.execute(
        "UPDATE time_entries SET invoice_id = NULL, invoiced = 0 WHERE user_id = ?1 AND invoice_id = ?2",
        params![user_id, invoice_id],
    )?;

    let mut stmt = conn.prepare(
        "UPDATE time_entries SET invoice_id = ?1, invoiced = 1 WHERE id = ?2 AND user_id = ?3",
    )?;
    let mut linked = 0usize;
    for &entry_id in entry_ids {
        let n = stmt.execute(params![invoice_id, entry_id, user_id])?;
        if n == 0 {
            tracing::debug!(user_id, invoice_id, entry_id, "time entry not linked: not found for user");
        }
        linked += n;
    }
    tracing::info!(user_id, invoice_id, requested = entry_ids.len(), linked, "time entries relinked");

    recalculate(conn, user_id, invoice_id, current.tax_rate)
}
