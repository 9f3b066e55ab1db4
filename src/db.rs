use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{Connection, TransactionBehavior};

use crate::error::{BillingError, Result};

const SCHEMA_VERSION: i64 = 2;

/// Process-wide storage handle. Every query is scoped by user id; the mutex only
/// serializes access to the single connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| BillingError::Storage {
                op: "open",
                message: e.to_string(),
            })?;
        }
        let conn = Connection::open(path).map_err(|e| retag("open", e.into()))?;
        Self::from_connection(conn, true)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| retag("open", e.into()))?;
        Self::from_connection(conn, false)
    }

    fn from_connection(conn: Connection, file_backed: bool) -> Result<Self> {
        configure_sqlite(&conn, file_backed).map_err(|e| retag("configure", e.into()))?;
        init_schema(&conn).map_err(|e| retag("init_schema", e.into()))?;
        apply_migrations(&conn).map_err(|e| retag("migrate", e.into()))?;
        tracing::debug!(file_backed, version = SCHEMA_VERSION, "database ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_read<T, F>(&self, op_name: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self.conn.lock().map_err(|_| BillingError::Storage {
            op: op_name,
            message: "db mutex poisoned".to_string(),
        })?;
        f(&guard).map_err(|e| retag(op_name, e))
    }

    /// Runs `f` as one unit of work: an IMMEDIATE transaction that commits on
    /// `Ok` and rolls back on `Err`.
    pub fn with_write<T, F>(&self, op_name: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut guard = self.conn.lock().map_err(|_| BillingError::Storage {
            op: op_name,
            message: "db mutex poisoned".to_string(),
        })?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| retag(op_name, e.into()))?;
        let out = f(&tx).map_err(|e| retag(op_name, e))?;
        tx.commit().map_err(|e| retag(op_name, e.into()))?;
        Ok(out)
    }
}

fn retag(op_name: &'static str, err: BillingError) -> BillingError {
    match err {
        BillingError::Storage { message, .. } => {
            tracing::error!(op = op_name, error = %message, "sqlite operation failed");
            BillingError::Storage {
                op: op_name,
                message,
            }
        }
        other => other,
    }
}

fn configure_sqlite(conn: &Connection, file_backed: bool) -> std::result::Result<(), rusqlite::Error> {
    if file_backed {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;\n\
             PRAGMA synchronous = NORMAL;\n",
        )?;
    }
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;\n\
         PRAGMA temp_store = MEMORY;\n",
    )?;
    conn.busy_timeout(Duration::from_millis(5000))?;
    Ok(())
}

fn init_schema(conn: &Connection) -> std::result::Result<(), rusqlite::Error> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            settings_json TEXT NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS clients (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            email TEXT NOT NULL DEFAULT '',
            contact_person TEXT NOT NULL DEFAULT '',
            address TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            client_id INTEGER REFERENCES clients(id) ON DELETE SET NULL,
            name TEXT NOT NULL,
            hourly_rate REAL NOT NULL DEFAULT 0,
            currency TEXT NOT NULL DEFAULT '',
            service_type TEXT
        );

        CREATE TABLE IF NOT EXISTS invoices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            client_id INTEGER NOT NULL,
            number TEXT NOT NULL,
            issue_date TEXT NOT NULL DEFAULT '',
            due_date TEXT NOT NULL DEFAULT '',
            subtotal REAL NOT NULL DEFAULT 0,
            tax_rate REAL NOT NULL DEFAULT 0,
            tax_amount REAL NOT NULL DEFAULT 0,
            total REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'draft',
            items_json TEXT NOT NULL DEFAULT '[]',
            UNIQUE(user_id, number)
        );

        CREATE TABLE IF NOT EXISTS time_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            invoice_id INTEGER REFERENCES invoices(id) ON DELETE SET NULL,
            date TEXT NOT NULL,
            start_time TEXT NOT NULL DEFAULT '',
            end_time TEXT NOT NULL DEFAULT '',
            duration_seconds INTEGER NOT NULL DEFAULT 0,
            description TEXT NOT NULL DEFAULT '',
            billable INTEGER NOT NULL DEFAULT 1,
            invoiced INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_time_entries_invoice ON time_entries(user_id, invoice_id);

        CREATE TABLE IF NOT EXISTS invoice_email_settings (
            user_id INTEGER PRIMARY KEY NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            provider TEXT NOT NULL DEFAULT 'manual',
            from_email TEXT NOT NULL DEFAULT '',
            reply_to TEXT NOT NULL DEFAULT '',
            subject_template TEXT NOT NULL DEFAULT '',
            body_template TEXT NOT NULL DEFAULT '',
            signature TEXT NOT NULL DEFAULT '',
            api_key TEXT NOT NULL DEFAULT '',
            smtp_host TEXT NOT NULL DEFAULT '',
            smtp_port INTEGER NOT NULL DEFAULT 587,
            smtp_username TEXT NOT NULL DEFAULT '',
            smtp_password TEXT NOT NULL DEFAULT '',
            smtp_use_tls INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT
        );
        "#,
    )
}

fn apply_migrations(conn: &Connection) -> std::result::Result<(), rusqlite::Error> {
    let v: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

    // v=0 means a fresh DB; init_schema already created the latest tables.
    if v == 0 {
        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
        return Ok(());
    }

    if v < 2 {
        let has_service_type: i64 = conn.query_row(
            "SELECT COUNT(1) FROM pragma_table_info('projects') WHERE name = 'service_type'",
            [],
            |r| r.get(0),
        )?;
        if has_service_type == 0 {
            conn.execute_batch("ALTER TABLE projects ADD COLUMN service_type TEXT;")?;
        }
        conn.execute_batch("PRAGMA user_version = 2;")?;
    }

    Ok(())
}
