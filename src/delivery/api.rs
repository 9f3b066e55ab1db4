//! Transactional email API channel (Resend-compatible JSON over HTTPS).

use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::{compose_text, recipient, reply_to, DeliveryOutcome, DeliveryProvider, DeliveryRequest, Email};
use crate::config::DeliveryConfig;
use crate::error::{ChannelError, DeliveryStage, Result, ValidationError};
use crate::settings::{DeliverySettings, ProviderKind};

const CHANNEL: &str = "api";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
    attachments: Vec<AttachmentPayload<'a>>,
}

#[derive(Debug, Serialize)]
struct AttachmentPayload<'a> {
    filename: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct SendEmailResponse {
    #[serde(default)]
    id: Option<String>,
}

pub struct ApiProvider<'a> {
    settings: &'a DeliverySettings,
    config: &'a DeliveryConfig,
}

impl<'a> ApiProvider<'a> {
    pub fn new(settings: &'a DeliverySettings, config: &'a DeliveryConfig) -> Self {
        Self { settings, config }
    }

    fn endpoint(&self) -> String {
        format!("{}/emails", self.config.api_base_url.trim_end_matches('/'))
    }
}

impl DeliveryProvider for ApiProvider<'_> {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Api
    }

    fn validate(&self, req: &DeliveryRequest<'_>) -> Result<()> {
        if self.settings.api_key.trim().is_empty() {
            return Err(ValidationError::MissingApiKey.into());
        }
        recipient(req)?;
        Ok(())
    }

    fn compose(&self, req: &DeliveryRequest<'_>) -> Result<Email> {
        let (subject, body) = compose_text(self.settings, req);
        Ok(Email {
            from: self.settings.from_email.trim().to_string(),
            to: recipient(req)?,
            reply_to: reply_to(self.settings),
            subject,
            body,
            attachment_name: super::attachment_name(&req.invoice.number),
            attachment: req.document.to_vec(),
        })
    }

    fn dry_run(&self) -> bool {
        self.config.api_dry_run
    }

    fn transmit(&self, email: &Email) -> Result<DeliveryOutcome> {
        let payload = SendEmailRequest {
            from: &email.from,
            to: vec![email.to.as_str()],
            subject: &email.subject,
            text: &email.body,
            reply_to: email.reply_to.as_deref(),
            attachments: vec![AttachmentPayload {
                filename: &email.attachment_name,
                content: base64::engine::general_purpose::STANDARD.encode(&email.attachment),
            }],
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ChannelError::new(CHANNEL, DeliveryStage::Request, e))?;
        let resp = client
            .post(self.endpoint())
            .bearer_auth(self.settings.api_key.trim())
            .json(&payload)
            .send()
            .map_err(|e| ChannelError::new(CHANNEL, DeliveryStage::Request, e))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().unwrap_or_default();
            return Err(ChannelError::new(
                CHANNEL,
                DeliveryStage::Response,
                format!("{}: {}", status, detail.trim()),
            )
            .into());
        }
        let parsed: SendEmailResponse = resp
            .json()
            .map_err(|e| ChannelError::new(CHANNEL, DeliveryStage::Response, e))?;

        Ok(DeliveryOutcome::Sent {
            provider: ProviderKind::Api,
            message_id: parsed.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{client, invoice};
    use super::super::{dispatch, DEFAULT_BODY};
    use super::*;
    use crate::error::BillingError;

    fn api_settings(key: &str) -> DeliverySettings {
        DeliverySettings {
            provider: ProviderKind::Api,
            api_key: key.into(),
            from_email: "billing@example.test".into(),
            signature: "-- Jo".into(),
            ..DeliverySettings::default()
        }
    }

    #[test]
    fn missing_key_fails_before_dry_run() {
        let inv = invoice();
        let cl = client("ap@acme.test");
        let req = DeliveryRequest {
            invoice: &inv,
            client: &cl,
            currency: "USD",
            document: b"%PDF",
        };
        let err = dispatch(&api_settings("  "), &DeliveryConfig::dry_run(), &req).unwrap_err();
        assert!(matches!(err, BillingError::Validation(ValidationError::MissingApiKey)));
        assert_eq!(err.to_string(), "api key is missing");
    }

    #[test]
    fn missing_recipient_is_a_validation_error() {
        let inv = invoice();
        let cl = client("");
        let req = DeliveryRequest {
            invoice: &inv,
            client: &cl,
            currency: "USD",
            document: b"%PDF",
        };
        let err = dispatch(&api_settings("re_123"), &DeliveryConfig::dry_run(), &req).unwrap_err();
        assert!(matches!(err, BillingError::Validation(ValidationError::MissingRecipient)));
    }

    #[test]
    fn dry_run_composes_without_network() {
        let inv = invoice();
        let cl = client("ap@acme.test");
        let req = DeliveryRequest {
            invoice: &inv,
            client: &cl,
            currency: "USD",
            document: b"%PDF",
        };
        let settings = api_settings("re_123");
        let config = DeliveryConfig {
            api_base_url: "http://127.0.0.1:1".into(),
            ..DeliveryConfig::dry_run()
        };
        let outcome = dispatch(&settings, &config, &req).unwrap();
        assert_eq!(outcome, DeliveryOutcome::DryRun { provider: ProviderKind::Api });

        let email = ApiProvider::new(&settings, &config).compose(&req).unwrap();
        assert_eq!(email.to, "ap@acme.test");
        assert_eq!(email.attachment_name, "INV-2025-007.pdf");
        assert_eq!(email.body, DEFAULT_BODY);
    }

    #[test]
    fn unreachable_endpoint_is_a_request_failure() {
        let inv = invoice();
        let cl = client("ap@acme.test");
        let req = DeliveryRequest {
            invoice: &inv,
            client: &cl,
            currency: "USD",
            document: b"%PDF",
        };
        let config = DeliveryConfig {
            api_base_url: "http://127.0.0.1:1".into(),
            ..DeliveryConfig::default()
        };
        let err = dispatch(&api_settings("re_123"), &config, &req).unwrap_err();
        match err {
            BillingError::Channel(c) => {
                assert_eq!(c.channel, "api");
                assert_eq!(c.stage, DeliveryStage::Request);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
