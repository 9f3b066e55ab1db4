use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("stored line items for invoice {invoice_id} are malformed: {source}")]
    Serialization {
        invoice_id: i64,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage error during {op}: {message}")]
    Storage { op: &'static str, message: String },

    #[error("failed to render invoice document: {0}")]
    Render(String),
}

impl BillingError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        BillingError::NotFound { entity, id }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BillingError::NotFound { .. })
    }

    /// Stable label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            BillingError::NotFound { .. } => "not_found",
            BillingError::Validation(_) => "validation",
            BillingError::Channel(_) => "channel",
            BillingError::Serialization { .. } => "serialization",
            BillingError::Storage { .. } => "storage",
            BillingError::Render(_) => "render",
        }
    }
}

/// Missing or invalid delivery configuration, detected before any I/O.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("api key is missing")]
    MissingApiKey,
    #[error("smtp host is missing")]
    MissingSmtpHost,
    #[error("smtp username is missing")]
    MissingSmtpUsername,
    #[error("smtp password is missing")]
    MissingSmtpPassword,
    #[error("from address is missing")]
    MissingFromAddress,
    #[error("client email address is missing")]
    MissingRecipient,
    #[error("smtp port {0} is out of range")]
    InvalidPort(i64),
    #[error("invalid email address {0:?}")]
    InvalidAddress(String),
    #[error("invoice number {0:?} already exists")]
    DuplicateNumber(String),
}

impl ValidationError {
    /// Name of the offending setting, as shown to the user.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingApiKey => "api_key",
            ValidationError::MissingSmtpHost => "host",
            ValidationError::MissingSmtpUsername => "username",
            ValidationError::MissingSmtpPassword => "password",
            ValidationError::MissingFromAddress => "from",
            ValidationError::MissingRecipient => "recipient",
            ValidationError::InvalidPort(_) => "port",
            ValidationError::InvalidAddress(_) => "address",
            ValidationError::DuplicateNumber(_) => "number",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStage {
    Compose,
    Dial,
    Tls,
    Auth,
    MailFrom,
    RcptTo,
    Data,
    Write,
    Request,
    Response,
}

impl DeliveryStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStage::Compose => "compose",
            DeliveryStage::Dial => "dial",
            DeliveryStage::Tls => "tls",
            DeliveryStage::Auth => "auth",
            DeliveryStage::MailFrom => "mail-from",
            DeliveryStage::RcptTo => "rcpt-to",
            DeliveryStage::Data => "data",
            DeliveryStage::Write => "write",
            DeliveryStage::Request => "request",
            DeliveryStage::Response => "response",
        }
    }
}

impl fmt::Display for DeliveryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network or protocol failure of a delivery channel, tagged with the stage that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{channel} {stage} failed: {message}")]
pub struct ChannelError {
    pub channel: &'static str,
    pub stage: DeliveryStage,
    pub message: String,
}

impl ChannelError {
    pub fn new(channel: &'static str, stage: DeliveryStage, message: impl fmt::Display) -> Self {
        Self {
            channel,
            stage,
            message: message.to_string(),
        }
    }
}

impl From<rusqlite::Error> for BillingError {
    fn from(err: rusqlite::Error) -> Self {
        BillingError::Storage {
            op: "sqlite",
            message: sqlite_error_string(&err),
        }
    }
}

pub(crate) fn sqlite_error_string(err: &rusqlite::Error) -> String {
    match err {
        rusqlite::Error::SqliteFailure(code, msg) => {
            let message = msg.clone().unwrap_or_default();
            format!(
                "sqlite(code={:?}, extended_code={}, msg={})",
                code.code, code.extended_code, message
            )
        }
        other => other.to_string(),
    }
}
