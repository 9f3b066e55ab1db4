//! Runtime configuration.
//!
//! Values come from the process environment (the CLI loads `.env` first):
//! - `FREELANCE_DB_PATH`: SQLite database file (default `freelance.db`)
//! - `FREELANCE_FONT_DIR`: directory probed for invoice fonts (default `fonts`)
//! - `FREELANCE_LOG`: default log filter when `RUST_LOG` is unset (default `info`)
//! - `RESEND_DRY_RUN`, `SMTP_DRY_RUN`: `1`/`true` skip the network call
//! - `RESEND_API_BASE`: base URL of the transactional email API
//! - `SMTP_TIMEOUT_SECS`: SMTP connect/command timeout

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://api.resend.com";
const DEFAULT_SMTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub db_path: PathBuf,
    pub font_dir: PathBuf,
    pub log_level: String,
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub api_dry_run: bool,
    pub smtp_dry_run: bool,
    pub api_base_url: String,
    pub smtp_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            api_dry_run: false,
            smtp_dry_run: false,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            smtp_timeout: Duration::from_secs(DEFAULT_SMTP_TIMEOUT_SECS),
        }
    }
}

impl DeliveryConfig {
    /// Both channels short-circuit before the network.
    pub fn dry_run() -> Self {
        Self {
            api_dry_run: true,
            smtp_dry_run: true,
            ..Self::default()
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("freelance.db"),
            font_dir: PathBuf::from("fonts"),
            log_level: "info".to_string(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let smtp_timeout = match get("SMTP_TIMEOUT_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    tracing::warn!(value = %raw, "invalid SMTP_TIMEOUT_SECS, using default");
                    defaults.delivery.smtp_timeout
                }
            },
            None => defaults.delivery.smtp_timeout,
        };

        Self {
            db_path: get("FREELANCE_DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            font_dir: get("FREELANCE_FONT_DIR").map(PathBuf::from).unwrap_or(defaults.font_dir),
            log_level: get("FREELANCE_LOG").unwrap_or(defaults.log_level),
            delivery: DeliveryConfig {
                api_dry_run: get("RESEND_DRY_RUN").map(|v| parse_flag(&v)).unwrap_or(false),
                smtp_dry_run: get("SMTP_DRY_RUN").map(|v| parse_flag(&v)).unwrap_or(false),
                api_base_url: get("RESEND_API_BASE").unwrap_or(defaults.delivery.api_base_url),
                smtp_timeout,
            },
        }
    }
}

fn parse_flag(v: &str) -> bool {
    v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> EngineConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let cfg = config_from(&[]);
        assert_eq!(cfg.db_path, PathBuf::from("freelance.db"));
        assert_eq!(cfg.font_dir, PathBuf::from("fonts"));
        assert!(!cfg.delivery.api_dry_run);
        assert!(!cfg.delivery.smtp_dry_run);
        assert_eq!(cfg.delivery.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(cfg.delivery.smtp_timeout, Duration::from_secs(30));
    }

    #[test]
    fn dry_run_flags_and_overrides() {
        let cfg = config_from(&[
            ("RESEND_DRY_RUN", "1"),
            ("SMTP_DRY_RUN", "true"),
            ("FREELANCE_DB_PATH", "/tmp/books.db"),
            ("SMTP_TIMEOUT_SECS", "5"),
        ]);
        assert!(cfg.delivery.api_dry_run);
        assert!(cfg.delivery.smtp_dry_run);
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/books.db"));
        assert_eq!(cfg.delivery.smtp_timeout, Duration::from_secs(5));
    }

    #[test]
    fn bad_timeout_falls_back() {
        let cfg = config_from(&[("SMTP_TIMEOUT_SECS", "soon"), ("SMTP_DRY_RUN", "0")]);
        assert_eq!(cfg.delivery.smtp_timeout, Duration::from_secs(30));
        assert!(!cfg.delivery.smtp_dry_run);
    }
}
