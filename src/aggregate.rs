//! Groups the billable time entries linked to an invoice by project.

use std::collections::HashMap;

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::models::{InvoiceId, UserId};

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectHours {
    pub project_id: i64,
    /// Service classification when set, otherwise the project name.
    pub description: String,
    pub hours: f64,
    pub rate: f64,
    pub currency: String,
}

/// Keyed by project id. Iteration order is unspecified; callers that emit
/// rows must sort.
pub type Aggregation = HashMap<i64, ProjectHours>;

pub fn aggregate_linked_entries(conn: &Connection, user_id: UserId, invoice_id: InvoiceId) -> Result<Aggregation> {
    let mut stmt = conn.prepare(
        r#"SELECT p.id, p.name, COALESCE(p.service_type, ''), COALESCE(p.hourly_rate, 0), COALESCE(p.currency, ''), te.duration_seconds
           FROM time_entries te
           JOIN projects p ON te.project_id = p.id
           WHERE te.user_id = ?1 AND te.invoice_id = ?2 AND te.billable = 1"#,
    )?;
    let rows = stmt.query_map(params![user_id, invoice_id], |r| {
        Ok((
            r.get::<_, i64>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
            r.get::<_, f64>(3)?,
            r.get::<_, String>(4)?,
            r.get::<_, i64>(5)?,
        ))
    })?;

    let mut groups: Aggregation = HashMap::new();
    for row in rows {
        let (project_id, name, service_type, rate, currency, seconds) = match row {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(invoice_id, error = %e, "skipping unreadable time entry row");
                continue;
            }
        };
        let group = groups.entry(project_id).or_insert_with(|| {
            let service_type = service_type.trim();
            ProjectHours {
                project_id,
                description: if service_type.is_empty() {
                    name.clone()
                } else {
                    service_type.to_string()
                },
                hours: 0.0,
                rate,
                currency,
            }
        });
        group.hours += seconds as f64 / 3600.0;
    }

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{fixtures, Database};

    #[test]
    fn groups_by_project_and_skips_non_billable() {
        let db = Database::open_in_memory().unwrap();
        let groups = db
            .with_write("aggregate", |conn| {
                let uid = fixtures::user(conn, "u");
                let cid = fixtures::client(conn, uid, "Acme", "ap@acme.test");
                let web = fixtures::project(conn, uid, cid, "Website", 100.0);
                let ops = fixtures::project(conn, uid, cid, "Ops", 80.0);
                conn.execute("UPDATE projects SET service_type = 'Consulting' WHERE id = ?1", params![ops])?;
                let inv = fixtures::invoice(conn, uid, cid, "INV-1", 0.0);

                for (pid, secs) in [(web, 3600), (web, 1800), (ops, 7200)] {
                    let e = fixtures::entry(conn, uid, pid, "2025-01-02", secs);
                    fixtures::link(conn, e, inv);
                }
                let unbillable = fixtures::entry(conn, uid, web, "2025-01-03", 36_000);
                conn.execute("UPDATE time_entries SET billable = 0 WHERE id = ?1", params![unbillable])?;
                fixtures::link(conn, unbillable, inv);

                aggregate_linked_entries(conn, uid, inv)
            })
            .unwrap();

        assert_eq!(groups.len(), 2);
        let web = groups.values().find(|g| g.description == "Website").unwrap();
        assert!((web.hours - 1.5).abs() < 1e-9);
        assert_eq!(web.rate, 100.0);
        let ops = groups.values().find(|g| g.description == "Consulting").unwrap();
        assert!((ops.hours - 2.0).abs() < 1e-9);
    }

    #[test]
    fn other_users_entries_are_invisible() {
        let db = Database::open_in_memory().unwrap();
        let groups = db
            .with_write("aggregate", |conn| {
                let owner = fixtures::user(conn, "owner");
                let other = fixtures::user(conn, "other");
                let cid = fixtures::client(conn, owner, "Acme", "");
                let pid = fixtures::project(conn, owner, cid, "Website", 100.0);
                let inv = fixtures::invoice(conn, owner, cid, "INV-1", 0.0);
                let e = fixtures::entry(conn, owner, pid, "2025-01-02", 3600);
                fixtures::link(conn, e, inv);
                aggregate_linked_entries(conn, other, inv)
            })
            .unwrap();
        assert!(groups.is_empty());
    }
}
