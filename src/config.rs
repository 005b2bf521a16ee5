//! Configuration module.
//!
//! Process settings come from environment variables with sensible defaults.
//! Monitors and notification settings come from a JSON file and are fixed
//! for the lifetime of the process.

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::Path;
use thiserror::Error;

use crate::db::MonitorTarget;
use crate::scheduler::DEFAULT_CONCURRENCY;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the check endpoint (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "uptime.db")
    pub db_path: String,
    /// Path to the JSON monitor file (default: "uptime.json")
    pub config_path: String,
    /// Name of this check location, recorded on latency samples (default: "local")
    pub location: String,
    /// Seconds between reconciliation runs (default: 60)
    pub interval_secs: u64,
    /// Run a single reconciliation and exit
    pub run_once: bool,
    pub cloudflare_zone_id: Option<String>,
    pub cloudflare_api_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "uptime.db".to_string(),
            config_path: "uptime.json".to_string(),
            location: "local".to_string(),
            interval_secs: 60,
            run_once: false,
            cloudflare_zone_id: None,
            cloudflare_api_token: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `UPTIME_HTTP_PORT`: HTTP port (default: 8080)
    /// - `UPTIME_DB_PATH`: Database file path (default: "uptime.db")
    /// - `UPTIME_CONFIG`: Monitor file path (default: "uptime.json")
    /// - `UPTIME_LOCATION`: Check location name (default: "local")
    /// - `UPTIME_INTERVAL_SECS`: Seconds between runs (default: 60)
    /// - `UPTIME_RUN_ONCE`: "1" or "true" to run once and exit
    /// - `CLOUDFLARE_ZONE_ID`, `CLOUDFLARE_API_TOKEN`: enable DNS discovery
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(port_str) = env::var("UPTIME_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http_port = port;
            }
        }

        if let Ok(db_path) = env::var("UPTIME_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Ok(config_path) = env::var("UPTIME_CONFIG") {
            cfg.config_path = config_path;
        }

        if let Ok(location) = env::var("UPTIME_LOCATION") {
            cfg.location = location;
        }

        if let Ok(interval_str) = env::var("UPTIME_INTERVAL_SECS") {
            if let Ok(interval) = interval_str.parse::<u64>() {
                cfg.interval_secs = interval.max(1);
            }
        }

        if let Ok(run_once) = env::var("UPTIME_RUN_ONCE") {
            cfg.run_once = matches!(run_once.as_str(), "1" | "true" | "yes");
        }

        cfg.cloudflare_zone_id = env::var("CLOUDFLARE_ZONE_ID").ok().filter(|v| !v.is_empty());
        cfg.cloudflare_api_token = env::var("CLOUDFLARE_API_TOKEN")
            .ok()
            .filter(|v| !v.is_empty());

        cfg
    }
}

/// Notification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    /// Apprise API server URL. Notifications are disabled without it.
    pub apprise_api_server: Option<String>,
    /// Apprise recipient URL. Notifications are disabled without it.
    pub recipient_url: Option<String>,
    /// Fixed UTC offset such as "+08:00" used in messages.
    pub time_zone: Option<String>,
    /// Minutes a status must persist before it is announced.
    pub grace_period: Option<u32>,
}

/// Parse a UTC offset of the form `+HH:MM`, `-HH:MM` or `+HHMM`.
fn parse_offset(tz: &str) -> Option<FixedOffset> {
    let (sign, rest) = match tz.as_bytes().first()? {
        b'+' => (1, &tz[1..]),
        b'-' => (-1, &tz[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Reconciliation configuration, read once from the monitor file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    #[serde(default)]
    pub monitors: Vec<MonitorTarget>,
    #[serde(default = "default_cooldown")]
    pub kv_write_cooldown_minutes: u32,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub notification: Option<NotificationConfig>,
}

fn default_cooldown() -> u32 {
    3
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            monitors: Vec::new(),
            kv_write_cooldown_minutes: default_cooldown(),
            concurrency: default_concurrency(),
            notification: None,
        }
    }
}

impl WorkerConfig {
    /// Read and validate the monitor file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".to_string()));
        }

        let mut seen = HashSet::new();
        for monitor in &self.monitors {
            if monitor.id.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "monitor {:?} has an empty id",
                    monitor.name
                )));
            }
            if !seen.insert(monitor.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate monitor id: {}",
                    monitor.id
                )));
            }
        }

        self.time_zone()?;
        Ok(())
    }

    pub fn grace_period(&self) -> Option<u32> {
        self.notification.as_ref().and_then(|n| n.grace_period)
    }

    /// Offset used when formatting notification timestamps.
    pub fn time_zone(&self) -> Result<FixedOffset, ConfigError> {
        let utc = FixedOffset::east_opt(0).ok_or_else(|| {
            ConfigError::Invalid("failed to build UTC offset".to_string())
        })?;
        match self.notification.as_ref().and_then(|n| n.time_zone.as_deref()) {
            None | Some("UTC") | Some("Etc/GMT") | Some("Z") => Ok(utc),
            Some(tz) => parse_offset(tz)
                .ok_or_else(|| ConfigError::Invalid(format!("unsupported time zone: {}", tz))),
        }
    }

    /// Apprise server and recipient, when both are configured.
    pub fn apprise(&self) -> Option<(&str, &str)> {
        let n = self.notification.as_ref()?;
        Some((n.apprise_api_server.as_deref()?, n.recipient_url.as_deref()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "uptime.db");
        assert_eq!(cfg.interval_secs, 60);
        assert!(!cfg.run_once);

        let worker = WorkerConfig::default();
        assert_eq!(worker.kv_write_cooldown_minutes, 3);
        assert_eq!(worker.concurrency, 6);
        assert_eq!(worker.grace_period(), None);
        assert!(worker.apprise().is_none());
    }

    #[test]
    fn test_worker_config_from_json() {
        let cfg = WorkerConfig::from_json(
            r#"{
                "kvWriteCooldownMinutes": 5,
                "monitors": [
                    {"id": "a", "name": "A", "target": "https://a.example/", "expectedCodes": [404]},
                    {"id": "b", "name": "B", "target": "https://b.example/", "method": "HEAD"}
                ],
                "notification": {
                    "appriseApiServer": "https://apprise.example/notify",
                    "recipientUrl": "tgram://token/chat",
                    "timeZone": "+08:00",
                    "gracePeriod": 5
                }
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.kv_write_cooldown_minutes, 5);
        assert_eq!(cfg.concurrency, 6);
        assert_eq!(cfg.monitors.len(), 2);
        assert_eq!(cfg.grace_period(), Some(5));
        assert_eq!(
            cfg.apprise(),
            Some(("https://apprise.example/notify", "tgram://token/chat"))
        );
        assert_eq!(cfg.time_zone().unwrap().local_minus_utc(), 8 * 3600);
    }

    #[test]
    fn test_worker_config_rejects_invalid() {
        let dup = r#"{"monitors": [
            {"id": "a", "name": "A", "target": "https://a.example/"},
            {"id": "a", "name": "A2", "target": "https://a2.example/"}
        ]}"#;
        assert!(matches!(WorkerConfig::from_json(dup), Err(ConfigError::Invalid(_))));

        let zero = r#"{"concurrency": 0}"#;
        assert!(matches!(WorkerConfig::from_json(zero), Err(ConfigError::Invalid(_))));

        let tz = r#"{"notification": {"timeZone": "Mars/Olympus"}}"#;
        assert!(matches!(WorkerConfig::from_json(tz), Err(ConfigError::Invalid(_))));

        assert!(matches!(WorkerConfig::from_json("{"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset("+08:00").map(|o| o.local_minus_utc()), Some(8 * 3600));
        assert_eq!(parse_offset("-0530").map(|o| o.local_minus_utc()), Some(-(5 * 3600 + 30 * 60)));
        assert!(parse_offset("08:00").is_none());
        assert!(parse_offset("+8").is_none());
        assert!(parse_offset("+25:00").is_none());
    }

    #[test]
    fn test_apprise_requires_both_fields() {
        let cfg = WorkerConfig {
            notification: Some(NotificationConfig {
                apprise_api_server: Some("https://apprise.example/notify".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(cfg.apprise().is_none());
    }
}
