//! Sends a rendered invoice through the user's configured channel.
//!
//! Every channel runs the same sequence: validate settings, compose the
//! email, stop if the channel is in dry-run mode, transmit. Validation
//! therefore always runs before any network I/O and before the dry-run
//! switch is consulted.

pub mod api;
pub mod smtp;
pub mod template;

use std::fmt;

use crate::config::DeliveryConfig;
use crate::error::{Result, ValidationError};
use crate::models::{Client, Invoice};
use crate::settings::{DeliverySettings, ProviderKind};

use template::{render_template, TemplateVars};

pub const DEFAULT_BODY: &str = "Please see attached invoice.";

/// What a caller needs to deliver one invoice.
pub struct DeliveryRequest<'a> {
    pub invoice: &'a Invoice,
    pub client: &'a Client,
    pub currency: &'a str,
    pub document: &'a [u8],
}

/// A composed email, independent of the wire format of any channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub reply_to: Option<String>,
    pub subject: String,
    pub body: String,
    pub attachment_name: String,
    pub attachment: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Nothing was sent; the caller hands the document to a local mail client.
    Handoff,
    /// Validation and composition succeeded; transmission was skipped.
    DryRun { provider: ProviderKind },
    Sent {
        provider: ProviderKind,
        message_id: Option<String>,
    },
}

impl DeliveryOutcome {
    pub fn transmitted(&self) -> bool {
        matches!(self, DeliveryOutcome::Sent { .. })
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryOutcome::Handoff => f.write_str("ready for manual sending"),
            DeliveryOutcome::DryRun { provider } => write!(f, "{} dry run, nothing sent", provider.as_str()),
            DeliveryOutcome::Sent {
                provider,
                message_id: Some(id),
            } => write!(f, "sent via {} ({})", provider.as_str(), id),
            DeliveryOutcome::Sent { provider, .. } => write!(f, "sent via {}", provider.as_str()),
        }
    }
}

pub trait DeliveryProvider {
    fn kind(&self) -> ProviderKind;

    /// Checks channel settings. Must not perform I/O.
    fn validate(&self, req: &DeliveryRequest<'_>) -> Result<()>;

    fn compose(&self, req: &DeliveryRequest<'_>) -> Result<Email>;

    fn dry_run(&self) -> bool {
        false
    }

    fn transmit(&self, email: &Email) -> Result<DeliveryOutcome>;
}

/// Hands the document back to the caller. Never fails.
pub struct ManualProvider;

impl DeliveryProvider for ManualProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Manual
    }

    fn validate(&self, _req: &DeliveryRequest<'_>) -> Result<()> {
        Ok(())
    }

    fn compose(&self, req: &DeliveryRequest<'_>) -> Result<Email> {
        Ok(Email {
            from: String::new(),
            to: req.client.email.trim().to_string(),
            reply_to: None,
            subject: format!("Invoice {}", req.invoice.number.trim()),
            body: DEFAULT_BODY.to_string(),
            attachment_name: attachment_name(&req.invoice.number),
            attachment: req.document.to_vec(),
        })
    }

    fn transmit(&self, _email: &Email) -> Result<DeliveryOutcome> {
        Ok(DeliveryOutcome::Handoff)
    }
}

pub fn provider_for<'a>(settings: &'a DeliverySettings, config: &'a DeliveryConfig) -> Box<dyn DeliveryProvider + 'a> {
    match settings.provider {
        ProviderKind::Manual => Box::new(ManualProvider),
        ProviderKind::Api => Box::new(api::ApiProvider::new(settings, config)),
        ProviderKind::Smtp => Box::new(smtp::SmtpProvider::new(settings, config)),
    }
}

pub fn dispatch(
    settings: &DeliverySettings,
    config: &DeliveryConfig,
    req: &DeliveryRequest<'_>,
) -> Result<DeliveryOutcome> {
    let provider = provider_for(settings, config);
    let kind = provider.kind();

    provider.validate(req).inspect_err(|e| {
        tracing::warn!(provider = kind.as_str(), invoice_id = req.invoice.id, error = %e, "delivery settings invalid");
    })?;
    let email = provider.compose(req)?;

    if provider.dry_run() {
        tracing::info!(
            provider = kind.as_str(),
            invoice_id = req.invoice.id,
            to = %email.to,
            "dry run enabled, skipping network call"
        );
        return Ok(DeliveryOutcome::DryRun { provider: kind });
    }

    let outcome = provider.transmit(&email).inspect_err(|e| {
        tracing::error!(provider = kind.as_str(), invoice_id = req.invoice.id, error = %e, "delivery failed");
    })?;
    tracing::info!(provider = kind.as_str(), invoice_id = req.invoice.id, %outcome, "delivery finished");
    Ok(outcome)
}

/// Subject and body from the user's templates, with fallbacks for blank results.
pub(crate) fn compose_text(settings: &DeliverySettings, req: &DeliveryRequest<'_>) -> (String, String) {
    let vars = TemplateVars::for_invoice(req.invoice, req.client, req.currency);
    let subject = render_template(&settings.subject_template, &vars).trim().to_string();
    let subject = if subject.is_empty() {
        format!("Invoice {}", req.invoice.number.trim())
    } else {
        subject
    };
    let body = render_template(&settings.body_template, &vars);
    let body = if body.trim().is_empty() {
        DEFAULT_BODY.to_string()
    } else {
        body
    };
    (subject, body)
}

pub(crate) fn recipient(req: &DeliveryRequest<'_>) -> std::result::Result<String, ValidationError> {
    let to = req.client.email.trim();
    if to.is_empty() {
        return Err(ValidationError::MissingRecipient);
    }
    Ok(to.to_string())
}

pub(crate) fn reply_to(settings: &DeliverySettings) -> Option<String> {
    Some(settings.reply_to.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn attachment_name(number: &str) -> String {
    let safe: String = number
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("INV-{}.pdf", safe)
}
