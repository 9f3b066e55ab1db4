use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type InvoiceId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceItem {
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    #[default]
    Draft,
    Sent,
    Paid,
    Overdue,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
        }
    }

    pub fn parse(v: &str) -> Option<Self> {
        match v.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(InvoiceStatus::Draft),
            "sent" => Some(InvoiceStatus::Sent),
            "paid" => Some(InvoiceStatus::Paid),
            "overdue" => Some(InvoiceStatus::Overdue),
            _ => None,
        }
    }
}

/// Materialized invoice state as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: InvoiceId,
    pub user_id: UserId,
    pub client_id: i64,
    pub number: String,
    pub issue_date: String,
    pub due_date: String,
    pub tax_rate: f64,
    pub subtotal: f64,
    pub tax_amount: f64,
    pub total: f64,
    pub status: InvoiceStatus,
    pub items: Vec<InvoiceItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInvoice {
    pub client_id: i64,
    pub number: String,
    pub issue_date: String,
    #[serde(default)]
    pub due_date: String,
    #[serde(default)]
    pub tax_rate: f64,
    #[serde(default)]
    pub status: Option<InvoiceStatus>,
    #[serde(default)]
    pub items: Vec<InvoiceItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub contact_person: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
    pub id: i64,
    pub project_id: i64,
    pub invoice_id: Option<InvoiceId>,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub duration_seconds: i64,
    pub description: String,
    pub billable: bool,
    pub invoiced: bool,
}

impl TimeEntry {
    pub fn hours(&self) -> f64 {
        self.duration_seconds as f64 / 3600.0
    }
}
