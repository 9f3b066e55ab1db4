//! Public entry points of the billing engine.
//!
//! Each operation takes the caller's user id and scopes every query by it.
//! Multi-step writes run inside one `with_write` unit of work.

use base64::Engine as _;

use crate::config::EngineConfig;
use crate::db::Database;
use crate::delivery::{dispatch, DeliveryOutcome, DeliveryRequest};
use crate::error::Result;
use crate::invoices;
use crate::message::build_message;
use crate::models::{Client, Invoice, InvoiceId, InvoiceStatus, NewInvoice, UserId};
use crate::recalc;
use crate::render::{render_invoice, RenderInput};
use crate::settings::{self, DeliverySettings, UserSettings};

#[derive(Clone)]
pub struct InvoiceService {
    db: Database,
    config: EngineConfig,
}

/// Everything the renderer needs, captured in one read of the store.
struct DocumentParts {
    invoice: Invoice,
    client: Client,
    settings: UserSettings,
    message: String,
}

impl InvoiceService {
    pub fn new(db: Database, config: EngineConfig) -> Self {
        Self { db, config }
    }

    /// Opens the database named by the configuration.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let db = Database::open(&config.db_path)?;
        Ok(Self::new(db, config))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn recalculate(&self, user_id: UserId, invoice_id: InvoiceId, tax_rate: f64) -> Result<Invoice> {
        self.db.with_write("recalculate_invoice", |conn| {
            recalc::recalculate(conn, user_id, invoice_id, tax_rate)
        })
    }

    pub fn set_time_entries(&self, user_id: UserId, invoice_id: InvoiceId, entry_ids: &[i64]) -> Result<Invoice> {
        self.db.with_write("set_time_entries", |conn| {
            recalc::set_time_entries(conn, user_id, invoice_id, entry_ids)
        })
    }

    pub fn get_invoice(&self, user_id: UserId, invoice_id: InvoiceId) -> Result<Invoice> {
        self.db
            .with_read("get_invoice", |conn| invoices::read_invoice(conn, user_id, invoice_id))
    }

    pub fn list_invoices(&self, user_id: UserId) -> Result<Vec<Invoice>> {
        self.db
            .with_read("list_invoices", |conn| invoices::list_invoices(conn, user_id))
    }

    pub fn create_invoice(&self, user_id: UserId, input: NewInvoice) -> Result<Invoice> {
        let created = self
            .db
            .with_write("create_invoice", |conn| invoices::insert_invoice(conn, user_id, input))?;
        tracing::info!(user_id, invoice_id = created.id, number = %created.number, "invoice created");
        Ok(created)
    }

    pub fn delete_invoice(&self, user_id: UserId, invoice_id: InvoiceId) -> Result<()> {
        self.db.with_write("delete_invoice", |conn| {
            invoices::delete_invoice(conn, user_id, invoice_id)
        })?;
        tracing::info!(user_id, invoice_id, "invoice deleted");
        Ok(())
    }

    pub fn set_status(&self, user_id: UserId, invoice_id: InvoiceId, status: InvoiceStatus) -> Result<Invoice> {
        self.db.with_write("set_invoice_status", |conn| {
            invoices::update_status(conn, user_id, invoice_id, status)?;
            invoices::read_invoice(conn, user_id, invoice_id)
        })
    }

    /// The message block the document would show when no custom text is given.
    pub fn get_default_message(&self, user_id: UserId, invoice_id: InvoiceId) -> Result<String> {
        self.db.with_read("get_default_message", |conn| {
            invoices::read_invoice(conn, user_id, invoice_id)?;
            let settings = settings::read_user_settings(conn, user_id);
            Ok(build_message(conn, user_id, invoice_id, None, &settings))
        })
    }

    pub fn user_settings(&self, user_id: UserId) -> Result<UserSettings> {
        self.db
            .with_read("get_user_settings", |conn| Ok(settings::read_user_settings(conn, user_id)))
    }

    pub fn save_user_settings(&self, user_id: UserId, s: &UserSettings) -> Result<UserSettings> {
        self.db
            .with_write("save_user_settings", |conn| settings::write_user_settings(conn, user_id, s))
    }

    pub fn delivery_settings(&self, user_id: UserId) -> Result<DeliverySettings> {
        self.db
            .with_read("get_delivery_settings", |conn| settings::read_delivery_settings(conn, user_id))
    }

    pub fn save_delivery_settings(&self, user_id: UserId, s: &DeliverySettings) -> Result<()> {
        self.db
            .with_write("save_delivery_settings", |conn| settings::save_delivery_settings(conn, user_id, s))
    }

    /// Refreshes totals from linked time entries, then gathers what the
    /// renderer needs. A failed refresh falls back to the stored snapshot.
    fn prepare_document(&self, user_id: UserId, invoice_id: InvoiceId, message: Option<&str>) -> Result<DocumentParts> {
        self.db.with_write("prepare_document", |conn| {
            let stored = invoices::read_invoice(conn, user_id, invoice_id)?;
            let client = invoices::read_client(conn, user_id, stored.client_id)?;
            let settings = settings::read_user_settings(conn, user_id);
            let message = build_message(conn, user_id, invoice_id, message, &settings);

            let invoice = match recalc::recalculate(conn, user_id, invoice_id, stored.tax_rate) {
                Ok(fresh) => fresh,
                Err(e) => {
                    tracing::warn!(user_id, invoice_id, error = %e, "recalculation before render failed, using stored invoice");
                    stored
                }
            };
            Ok(DocumentParts {
                invoice,
                client,
                settings,
                message,
            })
        })
    }

    fn render_parts(&self, parts: &DocumentParts) -> Result<Vec<u8>> {
        render_invoice(
            &RenderInput {
                invoice: &parts.invoice,
                client: &parts.client,
                settings: &parts.settings,
                message: &parts.message,
            },
            &self.config.font_dir,
        )
    }

    /// Raw PDF bytes for the invoice.
    pub fn render_document(&self, user_id: UserId, invoice_id: InvoiceId, message: Option<&str>) -> Result<Vec<u8>> {
        let parts = self.prepare_document(user_id, invoice_id, message)?;
        self.render_parts(&parts)
    }

    /// The invoice document as standard base64.
    pub fn generate_document(&self, user_id: UserId, invoice_id: InvoiceId, message: Option<&str>) -> Result<String> {
        let bytes = self.render_document(user_id, invoice_id, message)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// Renders the invoice and sends it through the user's delivery channel.
    /// A draft invoice that was actually transmitted is marked sent.
    pub fn send_email(&self, user_id: UserId, invoice_id: InvoiceId) -> Result<DeliveryOutcome> {
        let delivery = self.delivery_settings(user_id)?;
        let parts = self.prepare_document(user_id, invoice_id, None)?;
        let document = self.render_parts(&parts)?;

        let outcome = dispatch(
            &delivery,
            &self.config.delivery,
            &DeliveryRequest {
                invoice: &parts.invoice,
                client: &parts.client,
                currency: &parts.settings.currency,
                document: &document,
            },
        )?;

        if outcome.transmitted() && parts.invoice.status == InvoiceStatus::Draft {
            if let Err(e) = self.db.with_write("mark_invoice_sent", |conn| {
                invoices::update_status(conn, user_id, invoice_id, InvoiceStatus::Sent)
            }) {
                tracing::warn!(user_id, invoice_id, error = %e, "invoice sent but status update failed");
            }
        }
        Ok(outcome)
    }
}
