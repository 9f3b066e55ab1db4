//! Work-summary text for the invoice message block.

use rusqlite::{params, Connection};

use crate::models::{InvoiceId, TimeEntry, UserId};
use crate::settings::UserSettings;

/// Returns `explicit` when it has content, otherwise one line per linked
/// entry, otherwise the user's default message template.
pub fn build_message(
    conn: &Connection,
    user_id: UserId,
    invoice_id: InvoiceId,
    explicit: Option<&str>,
    settings: &UserSettings,
) -> String {
    if let Some(text) = explicit.map(str::trim).filter(|t| !t.is_empty()) {
        return text.to_string();
    }

    let entries = match linked_entries(conn, user_id, invoice_id) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(user_id, invoice_id, error = %e, "time entries unavailable for message, using template");
            return settings.default_message_template.clone();
        }
    };
    summarize_entries(&entries, &settings.default_message_template)
}

pub fn summarize_entries(entries: &[TimeEntry], fallback: &str) -> String {
    if entries.is_empty() {
        return fallback.to_string();
    }
    entries.iter().map(entry_line).collect::<Vec<_>>().join("\n")
}

fn entry_line(e: &TimeEntry) -> String {
    let start = e.start_time.trim();
    let end = e.end_time.trim();
    if !start.is_empty() && !end.is_empty() {
        format!("{} {}-{} {:.1}", e.date, start, end, e.hours())
    } else {
        format!("{} {:.1} hours", e.date, e.hours())
    }
}

fn linked_entries(conn: &Connection, user_id: UserId, invoice_id: InvoiceId) -> rusqlite::Result<Vec<TimeEntry>> {
    let mut stmt = conn.prepare(
        r#"SELECT id, project_id, invoice_id, date, COALESCE(start_time, ''), COALESCE(end_time, ''),
                  duration_seconds, COALESCE(description, ''), billable, invoiced
           FROM time_entries
           WHERE user_id = ?1 AND invoice_id = ?2
           ORDER BY date ASC, start_time ASC"#,
    )?;
    let rows = stmt.query_map(params![user_id, invoice_id], |r| {
        Ok(TimeEntry {
            id: r.get(0)?,
            project_id: r.get(1)?,
            invoice_id: r.get(2)?,
            date: r.get(3)?,
            start_time: r.get(4)?,
            end_time: r.get(5)?,
            duration_seconds: r.get(6)?,
            description: r.get(7)?,
            billable: r.get(8)?,
            invoiced: r.get(9)?,
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        match row {
            Ok(e) => out.push(e),
            Err(e) => tracing::warn!(invoice_id, error = %e, "skipping unreadable time entry row"),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{fixtures, Database};

    fn settings() -> UserSettings {
        UserSettings {
            default_message_template: "Thanks, see you next month.".into(),
            ..UserSettings::default()
        }
    }

    #[test]
    fn explicit_message_wins_after_trimming() {
        let db = Database::open_in_memory().unwrap();
        let msg = db
            .with_read("message", |conn| Ok(build_message(conn, 1, 1, Some("  Paid in full  "), &settings())))
            .unwrap();
        assert_eq!(msg, "Paid in full");
    }

    #[test]
    fn no_entries_uses_template_verbatim() {
        let db = Database::open_in_memory().unwrap();
        let msg = db
            .with_write("message", |conn| {
                let uid = fixtures::user(conn, "u");
                let cid = fixtures::client(conn, uid, "Acme", "");
                let inv = fixtures::invoice(conn, uid, cid, "INV-1", 0.0);
                Ok(build_message(conn, uid, inv, Some("   "), &settings()))
            })
            .unwrap();
        assert_eq!(msg, "Thanks, see you next month.");
    }

    #[test]
    fn lines_follow_date_then_start_time() {
        let db = Database::open_in_memory().unwrap();
        let msg = db
            .with_write("message", |conn| {
                let uid = fixtures::user(conn, "u");
                let cid = fixtures::client(conn, uid, "Acme", "");
                let pid = fixtures::project(conn, uid, cid, "Website", 100.0);
                let inv = fixtures::invoice(conn, uid, cid, "INV-1", 0.0);
                let late = fixtures::entry_with_times(conn, uid, pid, "2025-01-03", "13:00", "14:30", 5400);
                let early = fixtures::entry_with_times(conn, uid, pid, "2025-01-03", "09:00", "11:00", 7200);
                let first = fixtures::entry(conn, uid, pid, "2025-01-02", 1800);
                for e in [late, early, first] {
                    fixtures::link(conn, e, inv);
                }
                Ok(build_message(conn, uid, inv, None, &settings()))
            })
            .unwrap();
        assert_eq!(
            msg,
            "2025-01-02 0.5 hours\n2025-01-03 09:00-11:00 2.0\n2025-01-03 13:00-14:30 1.5"
        );
    }
}
