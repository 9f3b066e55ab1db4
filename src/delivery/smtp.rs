//! Direct SMTP channel.
//!
//! The session is driven command by command so a failure can be reported
//! with the protocol stage it happened in.

use lettre::address::Address;
use lettre::message::header::{ContentTransferEncoding, ContentType};
use lettre::message::{Attachment, Body, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{SmtpConnection, TlsParameters};
use lettre::transport::smtp::commands::{Data, Mail, Rcpt};
use lettre::transport::smtp::extension::ClientId;
use lettre::Message;

use super::{compose_text, recipient, reply_to, DeliveryOutcome, DeliveryProvider, DeliveryRequest, Email};
use crate::config::DeliveryConfig;
use crate::error::{ChannelError, DeliveryStage, Result, ValidationError};
use crate::settings::{DeliverySettings, ProviderKind};

const CHANNEL: &str = "smtp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// TLS from the first byte (SMTPS).
    Implicit,
    /// Plain connection that must be upgraded with STARTTLS before AUTH.
    Starttls,
    Plain,
}

impl TlsMode {
    pub fn resolve(use_tls: bool, port: u16) -> Self {
        match (use_tls, port) {
            (true, 465) => TlsMode::Implicit,
            (true, _) => TlsMode::Starttls,
            (false, _) => TlsMode::Plain,
        }
    }
}

pub struct SmtpProvider<'a> {
    settings: &'a DeliverySettings,
    config: &'a DeliveryConfig,
}

impl<'a> SmtpProvider<'a> {
    pub fn new(settings: &'a DeliverySettings, config: &'a DeliveryConfig) -> Self {
        Self { settings, config }
    }

    fn port(&self) -> std::result::Result<u16, ValidationError> {
        u16::try_from(self.settings.smtp_port)
            .ok()
            .filter(|p| *p > 0)
            .ok_or(ValidationError::InvalidPort(self.settings.smtp_port))
    }
}

fn parse_mailbox(raw: &str) -> std::result::Result<Mailbox, ValidationError> {
    raw.trim()
        .parse::<Mailbox>()
        .map_err(|_| ValidationError::InvalidAddress(raw.trim().to_string()))
}

impl DeliveryProvider for SmtpProvider<'_> {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Smtp
    }

    fn validate(&self, req: &DeliveryRequest<'_>) -> Result<()> {
        let s = self.settings;
        if s.smtp_host.trim().is_empty() {
            return Err(ValidationError::MissingSmtpHost.into());
        }
        if s.smtp_username.trim().is_empty() {
            return Err(ValidationError::MissingSmtpUsername.into());
        }
        if s.smtp_password.is_empty() {
            return Err(ValidationError::MissingSmtpPassword.into());
        }
        if s.from_email.trim().is_empty() {
            return Err(ValidationError::MissingFromAddress.into());
        }
        self.port()?;
        parse_mailbox(&s.from_email)?;
        parse_mailbox(&recipient(req)?)?;
        if let Some(r) = reply_to(s) {
            parse_mailbox(&r)?;
        }
        Ok(())
    }

    fn compose(&self, req: &DeliveryRequest<'_>) -> Result<Email> {
        let (subject, mut body) = compose_text(self.settings, req);
        let signature = self.settings.signature.trim_end();
        if !signature.trim().is_empty() {
            body.push_str("\n\n");
            body.push_str(signature);
        }
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
        self.config.smtp_dry_run
    }

    fn transmit(&self, email: &Email) -> Result<DeliveryOutcome> {
        let message = build_message(email)?;
        let port = self.port()?;
        let mode = TlsMode::resolve(self.settings.smtp_use_tls, port);
        let message_id = message
            .headers()
            .get_raw("Message-ID")
            .map(|v| v.trim().to_string());

        let session = Session {
            host: self.settings.smtp_host.trim(),
            port,
            mode,
            credentials: Credentials::new(
                self.settings.smtp_username.trim().to_string(),
                self.settings.smtp_password.clone(),
            ),
            timeout: self.config.smtp_timeout,
        };
        tracing::debug!(host = session.host, port, ?mode, "opening smtp session");
        session.send(&message)?;

        Ok(DeliveryOutcome::Sent {
            provider: ProviderKind::Smtp,
            message_id,
        })
    }
}

/// Multipart message: a plain-text part and the base64 PDF attachment.
pub fn build_message(email: &Email) -> Result<Message> {
    let compose_err = |e: &dyn std::fmt::Display| ChannelError::new(CHANNEL, DeliveryStage::Compose, e);

    let from = parse_mailbox(&email.from)?;
    let to = parse_mailbox(&email.to)?;
    let domain = from.email.domain().to_string();

    let pdf_type = ContentType::parse("application/pdf").map_err(|e| compose_err(&e))?;
    let pdf_body = Body::new_with_encoding(email.attachment.clone(), ContentTransferEncoding::Base64)
        .map_err(|_| compose_err(&"attachment could not be encoded"))?;
    let attachment = Attachment::new(email.attachment_name.clone()).body(pdf_body, pdf_type);

    let mut builder = Message::builder()
        .from(from)
        .to(to)
        .subject(email.subject.clone())
        .message_id(Some(format!("<{}@{}>", uuid::Uuid::new_v4(), domain)));
    if let Some(r) = &email.reply_to {
        builder = builder.reply_to(parse_mailbox(r)?);
    }

    let message = builder
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(email.body.clone()))
                .singlepart(attachment),
        )
        .map_err(|e| compose_err(&e))?;
    Ok(message)
}

struct Session<'a> {
    host: &'a str,
    port: u16,
    mode: TlsMode,
    credentials: Credentials,
    timeout: std::time::Duration,
}

impl Session<'_> {
    fn send(&self, message: &Message) -> Result<()> {
        let fail = |stage: DeliveryStage, e: &dyn std::fmt::Display| ChannelError::new(CHANNEL, stage, e);

        let hello = ClientId::Domain("localhost".to_string());
        let tls_params = || TlsParameters::new(self.host.to_string()).map_err(|e| fail(DeliveryStage::Tls, &e));
        let implicit = match self.mode {
            TlsMode::Implicit => Some(tls_params()?),
            _ => None,
        };

        let mut conn = SmtpConnection::connect(
            (self.host, self.port),
            Some(self.timeout),
            &hello,
            implicit.as_ref(),
            None,
        )
        .map_err(|e| fail(DeliveryStage::Dial, &e))?;

        if self.mode == TlsMode::Starttls {
            // Credentials never go out over an unencrypted channel.
            if !conn.can_starttls() {
                return Err(fail(DeliveryStage::Tls, &"server does not offer STARTTLS").into());
            }
            conn.starttls(&tls_params()?, &hello)
                .map_err(|e| fail(DeliveryStage::Tls, &e))?;
        }

        conn.auth(&[Mechanism::Plain, Mechanism::Login], &self.credentials)
            .map_err(|e| fail(DeliveryStage::Auth, &e))?;

        let envelope = message.envelope();
        let sender: Option<Address> = envelope.from().cloned();
        conn.command(Mail::new(sender, vec![]))
            .map_err(|e| fail(DeliveryStage::MailFrom, &e))?;
        for rcpt in envelope.to() {
            conn.command(Rcpt::new(rcpt.clone(), vec![]))
                .map_err(|e| fail(DeliveryStage::RcptTo, &e))?;
        }
        conn.command(Data).map_err(|e| fail(DeliveryStage::Data, &e))?;
        conn.message(&message.formatted())
            .map_err(|e| fail(DeliveryStage::Write, &e))?;

        if let Err(e) = conn.quit() {
            tracing::warn!(host = self.host, error = %e, "smtp quit failed after message was accepted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{client, invoice};
    use super::super::dispatch;
    use super::*;
    use crate::error::BillingError;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};
    use std::time::{Duration, Instant};

    fn smtp_settings() -> DeliverySettings {
        DeliverySettings {
            provider: ProviderKind::Smtp,
            from_email: "billing@example.test".into(),
            smtp_host: "127.0.0.1".into(),
            smtp_port: 1,
            smtp_username: "billing".into(),
            smtp_password: "secret".into(),
            smtp_use_tls: false,
            signature: "Jo Freelancer".into(),
            ..DeliverySettings::default()
        }
    }

    fn send_with(settings: &DeliverySettings, config: &DeliveryConfig) -> Result<DeliveryOutcome> {
        let inv = invoice();
        let cl = client("ap@acme.test");
        let req = DeliveryRequest {
            invoice: &inv,
            client: &cl,
            currency: "USD",
            document: b"%PDF-1.3 test",
        };
        dispatch(settings, config, &req)
    }

    #[test]
    fn each_missing_field_is_named_before_dry_run() {
        let cases: [(fn(&mut DeliverySettings), &str); 4] = [
            (|s| s.smtp_host.clear(), "host"),
            (|s| s.smtp_username.clear(), "username"),
            (|s| s.smtp_password.clear(), "password"),
            (|s| s.from_email.clear(), "from"),
        ];
        for (clear, field) in cases {
            let mut settings = smtp_settings();
            clear(&mut settings);
            let err = send_with(&settings, &DeliveryConfig::dry_run()).unwrap_err();
            match err {
                BillingError::Validation(v) => assert_eq!(v.field(), field),
                other => panic!("expected validation error for {field}, got {other}"),
            }
        }
    }

    #[test]
    fn empty_host_wins_over_other_missing_fields() {
        let settings = DeliverySettings {
            provider: ProviderKind::Smtp,
            ..DeliverySettings::default()
        };
        let err = send_with(&settings, &DeliveryConfig::dry_run()).unwrap_err();
        assert_eq!(err.to_string(), "smtp host is missing");
    }

    #[test]
    fn dry_run_skips_the_connection() {
        let outcome = send_with(&smtp_settings(), &DeliveryConfig::dry_run()).unwrap();
        assert_eq!(outcome, DeliveryOutcome::DryRun { provider: ProviderKind::Smtp });
    }

    #[test]
    fn refused_connection_is_a_dial_failure() {
        let config = DeliveryConfig {
            smtp_timeout: std::time::Duration::from_secs(2),
            ..DeliveryConfig::default()
        };
        let err = send_with(&smtp_settings(), &config).unwrap_err();
        match err {
            BillingError::Channel(c) => {
                assert_eq!(c.channel, "smtp");
                assert_eq!(c.stage, DeliveryStage::Dial);
                assert!(c.to_string().starts_with("smtp dial failed: "));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn signature_is_appended_after_blank_line() {
        let inv = invoice();
        let cl = client("ap@acme.test");
        let req = DeliveryRequest {
            invoice: &inv,
            client: &cl,
            currency: "USD",
            document: b"%PDF",
        };
        let settings = smtp_settings();
        let config = DeliveryConfig::default();
        let email = SmtpProvider::new(&settings, &config).compose(&req).unwrap();
        assert_eq!(email.body, "Please see attached invoice.\n\nJo Freelancer");
    }

    #[test]
    fn mime_attachment_is_base64_with_short_lines() {
        let email = Email {
            from: "billing@example.test".into(),
            to: "ap@acme.test".into(),
            reply_to: None,
            subject: "Invoice 2025-007".into(),
            body: "Please see attached invoice.".into(),
            attachment_name: "INV-2025-007.pdf".into(),
            attachment: (0..4096u32).map(|i| (i % 251) as u8).collect(),
        };
        let raw = String::from_utf8(build_message(&email).unwrap().formatted()).unwrap();

        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("Content-Type: application/pdf"));
        assert!(raw.contains("Content-Transfer-Encoding: base64"));
        assert!(raw.contains("INV-2025-007.pdf"));
        assert!(raw.lines().all(|l| l.len() <= 78), "line over limit");
    }

    #[test]
    fn tls_mode_follows_flag_and_port() {
        assert_eq!(TlsMode::resolve(true, 465), TlsMode::Implicit);
        assert_eq!(TlsMode::resolve(true, 587), TlsMode::Starttls);
        assert_eq!(TlsMode::resolve(false, 465), TlsMode::Plain);
    }

    /// Scripted SMTP peer on a loopback port. Answers every command
    /// positively except the first one starting with `reject` (`.` targets
    /// the end of the message body). Returns the commands it received.
    fn scripted_server(features: &'static [&'static str], reject: Option<&'static str>) -> (u16, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        listener.set_nonblocking(true).unwrap();

        let handle = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(10);
            let stream = loop {
                match listener.accept() {
                    Ok((stream, _)) => break stream,
                    Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
                    Err(_) => return Vec::new(),
                }
            };
            stream.set_nonblocking(false).unwrap();
            stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut out = stream;
            let mut seen = Vec::new();
            let mut in_data = false;
            let _ = out.write_all(b"220 scripted ESMTP\r\n");

            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                let cmd = line.trim_end().to_string();
                if in_data && cmd != "." {
                    continue;
                }
                let upper = cmd.to_ascii_uppercase();
                seen.push(cmd);

                let reply = if reject.is_some_and(|r| upper.starts_with(r)) {
                    in_data = false;
                    "554 rejected\r\n".to_string()
                } else if in_data {
                    in_data = false;
                    "250 queued\r\n".to_string()
                } else if upper.starts_with("EHLO") {
                    let mut r = String::from("250-scripted\r\n");
                    for f in features {
                        r.push_str(&format!("250-{f}\r\n"));
                    }
                    r.push_str("250 HELP\r\n");
                    r
                } else if upper.starts_with("AUTH") {
                    "235 authenticated\r\n".to_string()
                } else if upper.starts_with("DATA") {
                    in_data = true;
                    "354 go ahead\r\n".to_string()
                } else if upper.starts_with("QUIT") {
                    let _ = out.write_all(b"221 bye\r\n");
                    break;
                } else {
                    "250 ok\r\n".to_string()
                };
                if out.write_all(reply.as_bytes()).is_err() {
                    break;
                }
            }
            seen
        });
        (port, handle)
    }

    fn plain_settings(port: u16) -> DeliverySettings {
        DeliverySettings {
            smtp_port: port as i64,
            ..smtp_settings()
        }
    }

    fn live_config() -> DeliveryConfig {
        DeliveryConfig {
            smtp_timeout: Duration::from_secs(5),
            ..DeliveryConfig::default()
        }
    }

    #[test]
    fn missing_starttls_fails_before_credentials_are_sent() {
        let (port, server) = scripted_server(&["AUTH PLAIN LOGIN"], None);
        let settings = DeliverySettings {
            smtp_use_tls: true,
            ..plain_settings(port)
        };

        let err = send_with(&settings, &live_config()).unwrap_err();
        let seen = server.join().unwrap();
        match err {
            BillingError::Channel(c) => assert_eq!(c.stage, DeliveryStage::Tls),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(seen, vec!["EHLO localhost".to_string()]);
        assert!(!seen.iter().any(|c| c.to_ascii_uppercase().starts_with("AUTH")));
    }

    #[test]
    fn plain_session_delivers_the_message() {
        let (port, server) = scripted_server(&["AUTH PLAIN LOGIN"], None);
        let outcome = send_with(&plain_settings(port), &live_config()).unwrap();
        let seen = server.join().unwrap();

        match outcome {
            DeliveryOutcome::Sent { provider, message_id } => {
                assert_eq!(provider, ProviderKind::Smtp);
                assert!(message_id.is_some_and(|id| id.ends_with("@example.test>")));
            }
            other => panic!("unexpected outcome: {other}"),
        }
        let verbs: Vec<String> = seen
            .iter()
            .map(|c| c.split([' ', ':']).next().unwrap_or_default().to_ascii_uppercase())
            .collect();
        assert_eq!(verbs, ["EHLO", "AUTH", "MAIL", "RCPT", "DATA", ".", "QUIT"]);
        assert!(seen.contains(&"MAIL FROM:<billing@example.test>".to_string()));
        assert!(seen.contains(&"RCPT TO:<ap@acme.test>".to_string()));
    }

    #[test]
    fn each_rejected_command_reports_its_stage() {
        let cases = [
            ("AUTH", DeliveryStage::Auth),
            ("MAIL", DeliveryStage::MailFrom),
            ("RCPT", DeliveryStage::RcptTo),
            ("DATA", DeliveryStage::Data),
            (".", DeliveryStage::Write),
        ];
        for (reject, stage) in cases {
            let (port, server) = scripted_server(&["AUTH PLAIN LOGIN"], Some(reject));
            let err = send_with(&plain_settings(port), &live_config()).unwrap_err();
            server.join().unwrap();
            match err {
                BillingError::Channel(c) => {
                    assert_eq!(c.stage, stage, "rejecting {reject}");
                    assert!(c.to_string().starts_with(&format!("smtp {stage} failed: ")));
                }
                other => panic!("rejecting {reject}: unexpected error {other}"),
            }
        }
    }
}
