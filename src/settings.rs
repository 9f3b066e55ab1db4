use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::UserId;

pub const DEFAULT_CURRENCY: &str = "USD";
pub const DEFAULT_DATE_FORMAT: &str = "2006-01-02";
pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_TERMS: &str = "Due upon receipt";
pub const DEFAULT_MESSAGE: &str = "Thank you for your business.";

/// Sender identity and formatting preferences, stored as `users.settings_json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSettings {
    pub currency: String,
    pub default_tax_rate: f64,
    pub language: String,
    pub date_format: String,
    pub timezone: String,
    pub sender_name: String,
    pub sender_company: String,
    pub sender_address: String,
    pub sender_postal_code: String,
    pub sender_phone: String,
    pub sender_email: String,
    pub invoice_terms: String,
    pub default_message_template: String,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            currency: DEFAULT_CURRENCY.to_string(),
            default_tax_rate: 0.0,
            language: "en-US".to_string(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            sender_name: String::new(),
            sender_company: String::new(),
            sender_address: String::new(),
            sender_postal_code: String::new(),
            sender_phone: String::new(),
            sender_email: String::new(),
            invoice_terms: DEFAULT_TERMS.to_string(),
            default_message_template: DEFAULT_MESSAGE.to_string(),
        }
    }
}

impl UserSettings {
    /// Trims sender fields and fills blanks with defaults.
    pub fn normalized(mut self) -> Self {
        fn fill(v: &mut String, default: &str) {
            let trimmed = v.trim().to_string();
            *v = if trimmed.is_empty() {
                default.to_string()
            } else {
                trimmed
            };
        }

        fill(&mut self.currency, DEFAULT_CURRENCY);
        fill(&mut self.date_format, DEFAULT_DATE_FORMAT);
        fill(&mut self.timezone, DEFAULT_TIMEZONE);
        fill(&mut self.language, "en-US");
        fill(&mut self.invoice_terms, DEFAULT_TERMS);
        fill(&mut self.default_message_template, DEFAULT_MESSAGE);
        for v in [
            &mut self.sender_name,
            &mut self.sender_company,
            &mut self.sender_address,
            &mut self.sender_postal_code,
            &mut self.sender_phone,
            &mut self.sender_email,
        ] {
            *v = v.trim().to_string();
        }
        if !self.default_tax_rate.is_finite() || self.default_tax_rate < 0.0 {
            self.default_tax_rate = 0.0;
        }
        self
    }

    /// Name shown in the document header.
    pub fn sender_display_name(&self) -> &str {
        if !self.sender_name.is_empty() {
            &self.sender_name
        } else if !self.sender_company.is_empty() {
            &self.sender_company
        } else {
            "Sender"
        }
    }
}

/// Reads settings for `user_id`. Never fails: missing rows or malformed JSON
/// degrade to defaults.
pub fn read_user_settings(conn: &Connection, user_id: UserId) -> UserSettings {
    let raw: std::result::Result<Option<String>, rusqlite::Error> = conn
        .query_row(
            "SELECT settings_json FROM users WHERE id = ?1",
            params![user_id],
            |r| r.get(0),
        )
        .optional();

    match raw {
        Ok(Some(json)) => match serde_json::from_str::<UserSettings>(&json) {
            Ok(s) => s.normalized(),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "settings_json unreadable, using defaults");
                UserSettings::default()
            }
        },
        Ok(None) => {
            tracing::warn!(user_id, "user not found, using default settings");
            UserSettings::default()
        }
        Err(e) => {
            tracing::warn!(user_id, error = %e, "failed to load settings, using defaults");
            UserSettings::default()
        }
    }
}

pub fn write_user_settings(conn: &Connection, user_id: UserId, settings: &UserSettings) -> Result<UserSettings> {
    let normalized = settings.clone().normalized();
    let json = serde_json::to_string(&normalized).unwrap_or_else(|_| "{}".to_string());
    let affected = conn.execute(
        "UPDATE users SET settings_json = ?1 WHERE id = ?2",
        params![json, user_id],
    )?;
    if affected == 0 {
        return Err(crate::error::BillingError::not_found("user", user_id));
    }
    Ok(normalized)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Manual,
    Api,
    Smtp,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Manual => "manual",
            ProviderKind::Api => "api",
            ProviderKind::Smtp => "smtp",
        }
    }

    /// Accepts the current tags plus the legacy `mailto`/`resend` names.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "" | "manual" | "mailto" => Some(ProviderKind::Manual),
            "api" | "resend" => Some(ProviderKind::Api),
            "smtp" => Some(ProviderKind::Smtp),
            _ => None,
        }
    }
}

/// Per-user delivery channel choice, credentials and templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverySettings {
    pub provider: ProviderKind,
    pub from_email: String,
    pub reply_to: String,
    pub subject_template: String,
    pub body_template: String,
    pub signature: String,
    pub api_key: String,
    pub smtp_host: String,
    pub smtp_port: i64,
    pub smtp_username: String,
    pub smtp_password: String,
    pub smtp_use_tls: bool,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Manual,
            from_email: String::new(),
            reply_to: String::new(),
            subject_template: String::new(),
            body_template: String::new(),
            signature: String::new(),
            api_key: String::new(),
            smtp_host: String::new(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
            smtp_use_tls: true,
        }
    }
}

pub fn read_delivery_settings(conn: &Connection, user_id: UserId) -> Result<DeliverySettings> {
    let row = conn
        .query_row(
            "SELECT provider, from_email, reply_to, subject_template, body_template, signature, api_key, \
             smtp_host, smtp_port, smtp_username, smtp_password, smtp_use_tls \
             FROM invoice_email_settings WHERE user_id = ?1",
            params![user_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    DeliverySettings {
                        provider: ProviderKind::Manual,
                        from_email: r.get(1)?,
                        reply_to: r.get(2)?,
                        subject_template: r.get(3)?,
                        body_template: r.get(4)?,
                        signature: r.get(5)?,
                        api_key: r.get(6)?,
                        smtp_host: r.get(7)?,
                        smtp_port: r.get(8)?,
                        smtp_username: r.get(9)?,
                        smtp_password: r.get(10)?,
                        smtp_use_tls: r.get::<_, i64>(11)? != 0,
                    },
                ))
            },
        )
        .optional()?;

    let Some((tag, mut settings)) = row else {
        return Ok(DeliverySettings::default());
    };
    settings.provider = ProviderKind::parse(&tag).unwrap_or_else(|| {
        tracing::warn!(user_id, provider = %tag, "unknown delivery provider, using manual");
        ProviderKind::Manual
    });
    Ok(settings)
}

pub fn save_delivery_settings(conn: &Connection, user_id: UserId, s: &DeliverySettings) -> Result<()> {
    conn.execute(
        r#"INSERT INTO invoice_email_settings (
            user_id, provider, from_email, reply_to, subject_template, body_template, signature, api_key,
            smtp_host, smtp_port, smtp_username, smtp_password, smtp_use_tls, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, datetime('now'))
        ON CONFLICT(user_id) DO UPDATE SET
            provider = excluded.provider,
            from_email = excluded.from_email,
            reply_to = excluded.reply_to,
            subject_template = excluded.subject_template,
            body_template = excluded.body_template,
            signature = excluded.signature,
            api_key = excluded.api_key,
            smtp_host = excluded.smtp_host,
            smtp_port = excluded.smtp_port,
            smtp_username = excluded.smtp_username,
            smtp_password = excluded.smtp_password,
            smtp_use_tls = excluded.smtp_use_tls,
            updated_at = excluded.updated_at"#,
        params![
            user_id,
            s.provider.as_str(),
            s.from_email.trim(),
            s.reply_to.trim(),
            s.subject_template,
            s.body_template,
            s.signature,
            s.api_key.trim(),
            s.smtp_host.trim(),
            s.smtp_port,
            s.smtp_username.trim(),
            s.smtp_password,
            s.smtp_use_tls as i32,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{fixtures, Database};

    #[test]
    fn missing_user_falls_back_to_defaults() {
        let db = Database::open_in_memory().unwrap();
        let s = db.with_read("settings", |conn| Ok(read_user_settings(conn, 42))).unwrap();
        assert_eq!(s.currency, "USD");
        assert_eq!(s.date_format, "2006-01-02");
        assert_eq!(s.invoice_terms, "Due upon receipt");
        assert_eq!(s.default_message_template, "Thank you for your business.");
    }

    #[test]
    fn partial_json_is_normalized() {
        let db = Database::open_in_memory().unwrap();
        let s = db
            .with_write("settings", |conn| {
                let uid = fixtures::user(conn, "ann");
                conn.execute(
                    "UPDATE users SET settings_json = ?1 WHERE id = ?2",
                    params![r#"{"currency":"EUR","senderName":"  Ann Lee  ","invoiceTerms":"  "}"#, uid],
                )?;
                Ok(read_user_settings(conn, uid))
            })
            .unwrap();
        assert_eq!(s.currency, "EUR");
        assert_eq!(s.sender_name, "Ann Lee");
        assert_eq!(s.invoice_terms, DEFAULT_TERMS);
        assert_eq!(s.sender_display_name(), "Ann Lee");
    }

    #[test]
    fn malformed_json_falls_back() {
        let db = Database::open_in_memory().unwrap();
        let s = db
            .with_write("settings", |conn| {
                let uid = fixtures::user(conn, "bob");
                conn.execute("UPDATE users SET settings_json = 'nope' WHERE id = ?1", params![uid])?;
                Ok(read_user_settings(conn, uid))
            })
            .unwrap();
        assert_eq!(s, UserSettings::default());
    }

    #[test]
    fn delivery_settings_default_to_manual_and_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.with_write("delivery", |conn| {
            let uid = fixtures::user(conn, "cat");
            assert_eq!(read_delivery_settings(conn, uid)?.provider, ProviderKind::Manual);

            let saved = DeliverySettings {
                provider: ProviderKind::Smtp,
                from_email: "me@example.com".into(),
                smtp_host: "smtp.example.com".into(),
                smtp_port: 465,
                smtp_username: "me".into(),
                smtp_password: "secret".into(),
                ..DeliverySettings::default()
            };
            save_delivery_settings(conn, uid, &saved)?;
            let fetched = read_delivery_settings(conn, uid)?;
            assert_eq!(fetched, saved);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn legacy_provider_tags_are_understood() {
        assert_eq!(ProviderKind::parse("mailto"), Some(ProviderKind::Manual));
        assert_eq!(ProviderKind::parse("Resend"), Some(ProviderKind::Api));
        assert_eq!(ProviderKind::parse("smtp"), Some(ProviderKind::Smtp));
        assert_eq!(ProviderKind::parse("pigeon"), None);
    }
}
