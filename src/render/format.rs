//! Text formatting for amounts, quantities, dates and the summary table row.

use std::fmt::Write as _;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;

use crate::models::Invoice;
use crate::settings::DEFAULT_DATE_FORMAT;

pub fn format_amount(amount: f64, currency: &str) -> String {
    let currency = currency.trim();
    if currency.is_empty() {
        format!("{:.2}", amount)
    } else {
        format!("{:.2} {}", amount, currency)
    }
}

pub fn format_quantity(qty: f64) -> String {
    format!("{:.2}", qty)
}

/// Formats a stored calendar string for display.
///
/// Accepts `YYYY-MM-DD` and RFC 3339. Instants are shifted into `timezone`
/// when it names a known IANA zone; plain dates are calendar values and are
/// never shifted. Anything else is returned unchanged.
pub fn format_date(raw: &str, layout: &str, timezone: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    let layout = if layout.trim().is_empty() {
        DEFAULT_DATE_FORMAT
    } else {
        layout.trim()
    };
    let pattern = layout_to_strftime(layout);

    let mut out = String::new();
    let written = if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        write!(out, "{}", date.format(&pattern))
    } else if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        match Tz::from_str(timezone.trim()) {
            Ok(tz) => write!(out, "{}", instant.with_timezone(&tz).format(&pattern)),
            Err(_) => write!(out, "{}", instant.format(&pattern)),
        }
    } else {
        return raw.to_string();
    };

    match written {
        Ok(()) => out,
        Err(_) => {
            tracing::warn!(layout, "date layout not formattable, rendering raw date");
            raw.to_string()
        }
    }
}

// Reference-time layouts (2006-01-02) and token layouts (YYYY-MM-DD) both
// map onto strftime. Longest tokens first so "2006" wins over "2", etc.
const REFERENCE_TOKENS: &[(&str, &str)] = &[
    ("January", "%B"),
    ("Monday", "%A"),
    ("-07:00", "%:z"),
    ("2006", "%Y"),
    ("-0700", "%z"),
    ("Jan", "%b"),
    ("Mon", "%a"),
    ("MST", "%Z"),
    ("01", "%m"),
    ("02", "%d"),
    ("_2", "%e"),
    ("06", "%y"),
    ("15", "%H"),
    ("03", "%I"),
    ("04", "%M"),
    ("05", "%S"),
    ("PM", "%p"),
    ("1", "%-m"),
    ("2", "%-d"),
    ("3", "%-I"),
];

const WORD_TOKENS: &[(&str, &str)] = &[
    ("YYYY", "%Y"),
    ("MMMM", "%B"),
    ("dddd", "%A"),
    ("MMM", "%b"),
    ("ddd", "%a"),
    ("YY", "%y"),
    ("MM", "%m"),
    ("DD", "%d"),
    ("HH", "%H"),
    ("hh", "%I"),
    ("mm", "%M"),
    ("ss", "%S"),
    ("M", "%-m"),
    ("D", "%-d"),
];

fn is_word_layout(layout: &str) -> bool {
    layout.contains("YY") || layout.contains("DD")
}

pub fn layout_to_strftime(layout: &str) -> String {
    let tokens = if is_word_layout(layout) {
        WORD_TOKENS
    } else {
        REFERENCE_TOKENS
    };

    let mut out = String::with_capacity(layout.len() * 2);
    let mut rest = layout;
    'outer: while !rest.is_empty() {
        for (token, spec) in tokens {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(spec);
                rest = tail;
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        if let Some(ch) = chars.next() {
            if ch == '%' {
                out.push_str("%%");
            } else {
                out.push(ch);
            }
        }
        rest = chars.as_str();
    }
    out
}

/// The single aggregate row of the items table.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub description: String,
    pub quantity: f64,
    pub rate: f64,
    pub amount: f64,
}

/// Collapses all line items into one row. With a uniform rate the quantity
/// is the summed hours at that rate; mixed rates bill one unit at the
/// subtotal. The amount is always the invoice total.
pub fn summary_row(invoice: &Invoice) -> SummaryRow {
    let description = invoice
        .items
        .first()
        .map(|i| i.description.trim())
        .filter(|d| !d.is_empty())
        .unwrap_or("Invoice Summary")
        .to_string();

    let Some(first) = invoice.items.first() else {
        return SummaryRow {
            description,
            quantity: 0.0,
            rate: 0.0,
            amount: invoice.total,
        };
    };

    let uniform = invoice
        .items
        .iter()
        .all(|i| (i.unit_price - first.unit_price).abs() < 1e-9);
    let (quantity, rate) = if uniform {
        (invoice.items.iter().map(|i| i.quantity).sum(), first.unit_price)
    } else {
        (1.0, invoice.subtotal)
    };

    SummaryRow {
        description,
        quantity,
        rate,
        amount: invoice.total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InvoiceItem, InvoiceStatus};

    fn invoice(items: Vec<InvoiceItem>, subtotal: f64, total: f64) -> Invoice {
        Invoice {
            id: 1,
            user_id: 1,
            client_id: 1,
            number: "INV-1".into(),
            issue_date: "2025-03-04".into(),
            due_date: String::new(),
            tax_rate: 0.1,
            subtotal,
            tax_amount: total - subtotal,
            total,
            status: InvoiceStatus::Draft,
            items,
        }
    }

    fn item(desc: &str, qty: f64, rate: f64) -> InvoiceItem {
        InvoiceItem {
            description: desc.into(),
            quantity: qty,
            unit_price: rate,
            amount: qty * rate,
        }
    }

    #[test]
    fn amounts_have_two_decimals_and_currency() {
        assert_eq!(format_amount(330.0, "USD"), "330.00 USD");
        assert_eq!(format_amount(0.005, "EUR"), "0.01 EUR");
        assert_eq!(format_amount(12.5, " "), "12.50");
    }

    #[test]
    fn reference_and_token_layouts() {
        assert_eq!(format_date("2025-03-04", "2006-01-02", "UTC"), "2025-03-04");
        assert_eq!(format_date("2025-03-04", "02/01/2006", "UTC"), "04/03/2025");
        assert_eq!(format_date("2025-03-04", "Jan 2, 2006", "UTC"), "Mar 4, 2025");
        assert_eq!(format_date("2025-03-04", "DD.MM.YYYY", "UTC"), "04.03.2025");
        assert_eq!(format_date("2025-03-04", "", "UTC"), "2025-03-04");
    }

    #[test]
    fn instants_shift_into_timezone() {
        let raw = "2025-03-04T23:30:00Z";
        assert_eq!(format_date(raw, "2006-01-02", "Europe/Belgrade"), "2025-03-05");
        assert_eq!(format_date(raw, "2006-01-02", "UTC"), "2025-03-04");
        assert_eq!(format_date(raw, "2006-01-02", "Not/AZone"), "2025-03-04");
    }

    #[test]
    fn unparseable_dates_render_raw() {
        assert_eq!(format_date("next tuesday", "2006-01-02", "UTC"), "next tuesday");
        assert_eq!(format_date("", "2006-01-02", "UTC"), "");
    }

    #[test]
    fn percent_signs_stay_literal() {
        assert_eq!(layout_to_strftime("2006 % x"), "%Y %% x");
    }

    #[test]
    fn uniform_rate_sums_quantity() {
        let inv = invoice(vec![item("Design", 2.0, 100.0), item("Build", 1.5, 100.0)], 350.0, 385.0);
        let row = summary_row(&inv);
        assert_eq!(row.description, "Design");
        assert_eq!(row.quantity, 3.5);
        assert_eq!(row.rate, 100.0);
        assert_eq!(row.amount, 385.0);
    }

    #[test]
    fn mixed_rates_bill_one_unit_at_subtotal() {
        let inv = invoice(vec![item("Design", 2.0, 100.0), item("Ops", 1.0, 60.0)], 260.0, 286.0);
        let row = summary_row(&inv);
        assert_eq!(row.quantity, 1.0);
        assert_eq!(row.rate, 260.0);
        assert_eq!(row.amount, 286.0);
    }

    #[test]
    fn empty_invoice_is_a_zero_summary() {
        let row = summary_row(&invoice(Vec::new(), 0.0, 0.0));
        assert_eq!(row.description, "Invoice Summary");
        assert_eq!(row.quantity, 0.0);
        assert_eq!(row.amount, 0.0);
    }
}
