use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{BillingError, Result, ValidationError};
use crate::models::{Client, Invoice, InvoiceId, InvoiceItem, InvoiceStatus, NewInvoice, UserId};
use crate::recalc::compute_totals;

const INVOICE_COLUMNS: &str =
    "id, user_id, client_id, number, issue_date, due_date, subtotal, tax_rate, tax_amount, total, status, items_json";

struct InvoiceRow {
    invoice: Invoice,
    items_json: String,
}

fn map_invoice_row(r: &Row<'_>) -> rusqlite::Result<InvoiceRow> {
    let status: String = r.get(10)?;
    Ok(InvoiceRow {
        invoice: Invoice {
            id: r.get(0)?,
            user_id: r.get(1)?,
            client_id: r.get(2)?,
            number: r.get(3)?,
            issue_date: r.get(4)?,
            due_date: r.get(5)?,
            subtotal: r.get(6)?,
            tax_rate: r.get(7)?,
            tax_amount: r.get(8)?,
            total: r.get(9)?,
            status: InvoiceStatus::parse(&status).unwrap_or_default(),
            items: Vec::new(),
        },
        items_json: r.get(11)?,
    })
}

fn decode_items(invoice_id: InvoiceId, json: &str) -> std::result::Result<Vec<InvoiceItem>, BillingError> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(json).map_err(|source| BillingError::Serialization { invoice_id, source })
}

pub(crate) fn encode_items(items: &[InvoiceItem]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

/// Loads one invoice scoped to its owner. Malformed stored items fail this call.
pub fn read_invoice(conn: &Connection, user_id: UserId, id: InvoiceId) -> Result<Invoice> {
    let row = conn
        .query_row(
            &format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?1 AND user_id = ?2"),
            params![id, user_id],
            map_invoice_row,
        )
        .optional()?
        .ok_or_else(|| BillingError::not_found("invoice", id))?;

    let mut invoice = row.invoice;
    invoice.items = decode_items(id, &row.items_json)?;
    Ok(invoice)
}

/// Lists a user's invoices. Unreadable rows are logged and skipped; rows with
/// malformed items are kept with an empty item list.
pub fn list_invoices(conn: &Connection, user_id: UserId) -> Result<Vec<Invoice>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices WHERE user_id = ?1 ORDER BY id ASC"
    ))?;
    let rows = stmt.query_map(params![user_id], map_invoice_row)?;

    let mut out = Vec::new();
    for row in rows {
        let row = match row {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "skipping unreadable invoice row");
                continue;
            }
        };
        let mut invoice = row.invoice;
        invoice.items = decode_items(invoice.id, &row.items_json).unwrap_or_else(|e| {
            tracing::warn!(invoice_id = invoice.id, error = %e, "invoice items unreadable, listing without items");
            Vec::new()
        });
        out.push(invoice);
    }
    Ok(out)
}

pub fn insert_invoice(conn: &Connection, user_id: UserId, input: NewInvoice) -> Result<Invoice> {
    read_client(conn, user_id, input.client_id)?;

    let number = input.number.trim().to_string();
    let exists: i64 = conn.query_row(
        "SELECT COUNT(1) FROM invoices WHERE user_id = ?1 AND number = ?2",
        params![user_id, number],
        |r| r.get(0),
    )?;
    if exists > 0 {
        return Err(ValidationError::DuplicateNumber(number).into());
    }

    let totals = compute_totals(&input.items, input.tax_rate);
    let status = input.status.unwrap_or_default();
    conn.execute(
        r#"INSERT INTO invoices (user_id, client_id, number, issue_date, due_date, subtotal, tax_rate, tax_amount, total, status, items_json)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
        params![
            user_id,
            input.client_id,
            number,
            input.issue_date,
            input.due_date,
            totals.subtotal,
            input.tax_rate,
            totals.tax_amount,
            totals.total,
            status.as_str(),
            encode_items(&input.items),
        ],
    )?;
    let id = conn.last_insert_rowid();
    read_invoice(conn, user_id, id)
}

/// Clears the weak links from time entries, then removes the invoice.
pub fn delete_invoice(conn: &Connection, user_id: UserId, id: InvoiceId) -> Result<()> {
    conn.execute(
        "UPDATE time_entries SET invoice_id = NULL, invoiced = 0 WHERE user_id = ?1 AND invoice_id = ?2",
        params![user_id, id],
    )?;
    let affected = conn.execute(
        "DELETE FROM invoices WHERE id = ?1 AND user_id = ?2",
        params![id, user_id],
    )?;
    if affected == 0 {
        return Err(BillingError::not_found("invoice", id));
    }
    Ok(())
}

pub fn update_status(conn: &Connection, user_id: UserId, id: InvoiceId, status: InvoiceStatus) -> Result<()> {
    let affected = conn.execute(
        "UPDATE invoices SET status = ?1 WHERE id = ?2 AND user_id = ?3",
        params![status.as_str(), id, user_id],
    )?;
    if affected == 0 {
        return Err(BillingError::not_found("invoice", id));
    }
    Ok(())
}

pub fn read_client(conn: &Connection, user_id: UserId, client_id: i64) -> Result<Client> {
    conn.query_row(
        "SELECT id, name, email, contact_person, address FROM clients WHERE id = ?1 AND user_id = ?2",
        params![client_id, user_id],
        |r| {
            Ok(Client {
                id: r.get(0)?,
                name: r.get(1)?,
                email: r.get(2)?,
                contact_person: r.get(3)?,
                address: r.get(4)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| BillingError::not_found("client", client_id))
}
