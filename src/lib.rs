//! Invoice billing and delivery engine.
//!
//! Aggregates billable time entries into invoice line items, renders the
//! invoice as a PDF and delivers it by hand-off, transactional email API or
//! SMTP. Everything is reached through [`InvoiceService`].

pub mod aggregate;
pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod invoices;
pub mod logging;
pub mod message;
pub mod models;
pub mod recalc;
pub mod render;
pub mod service;
pub mod settings;

pub use config::{DeliveryConfig, EngineConfig};
pub use db::Database;
pub use delivery::DeliveryOutcome;
pub use error::{BillingError, ChannelError, DeliveryStage, Result, ValidationError};
pub use models::{Client, Invoice, InvoiceId, InvoiceItem, InvoiceStatus, NewInvoice, TimeEntry, UserId};
pub use service::InvoiceService;
pub use settings::{DeliverySettings, ProviderKind, UserSettings};
