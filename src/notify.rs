//! Notification hooks and the outbound notification transport.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::db::MonitorTarget;

/// Notification error types.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("notification rejected: {0}")]
    Rejected(String),
}

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Hooks invoked by the reconciler as targets change state.
///
/// Failures are logged by the caller and never affect the run.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Called on every up/down transition, including cause changes.
    async fn on_status_change(
        &self,
        target: &MonitorTarget,
        is_up: bool,
        incident_start: i64,
        now: i64,
        reason: &str,
    ) -> Result<(), NotifyError>;

    /// Called on every run while the target has an open incident.
    async fn on_incident_ongoing(
        &self,
        target: &MonitorTarget,
        incident_start: i64,
        now: i64,
        reason: &str,
    ) -> Result<(), NotifyError>;
}

/// Notifier that only records hook calls in the log.
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn on_status_change(
        &self,
        target: &MonitorTarget,
        is_up: bool,
        incident_start: i64,
        now: i64,
        reason: &str,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            target_id = %target.id,
            is_up,
            incident_start,
            now,
            "Status changed: {}",
            reason
        );
        Ok(())
    }

    async fn on_incident_ongoing(
        &self,
        target: &MonitorTarget,
        incident_start: i64,
        now: i64,
        reason: &str,
    ) -> Result<(), NotifyError> {
        tracing::debug!(
            target_id = %target.id,
            down_for = now - incident_start,
            "Incident ongoing: {}",
            reason
        );
        Ok(())
    }
}

/// Delivers a rendered notification somewhere.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, title: &str, body: &str) -> Result<(), NotifyError>;
}

#[derive(Serialize)]
struct AppriseRequest<'a> {
    urls: &'a str,
    title: &'a str,
    body: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    format: &'a str,
}

/// Sends notifications through an Apprise API server.
pub struct AppriseSender {
    client: reqwest::Client,
    server: String,
    recipient: String,
}

impl AppriseSender {
    pub fn new(server: &str, recipient: &str) -> Result<Self, NotifyError> {
        Self::with_timeout(server, recipient, NOTIFY_TIMEOUT)
    }

    pub fn with_timeout(
        server: &str,
        recipient: &str,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            server: server.to_string(),
            recipient: recipient.to_string(),
        })
    }
}

#[async_trait]
impl NotificationSender for AppriseSender {
    async fn send(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.server)
            .json(&AppriseRequest {
                urls: &self.recipient,
                title,
                body,
                kind: "info",
                format: "text",
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected(format!("{}: {}", status, detail.trim())));
        }
        tracing::info!("Notification sent: {}", title);
        Ok(())
    }
}

/// Render the title and body announcing a status change.
pub fn format_status_change_notification(
    target: &MonitorTarget,
    is_up: bool,
    incident_start: i64,
    now: i64,
    reason: &str,
    tz: &FixedOffset,
) -> (String, String) {
    let minutes = (now - incident_start) / 60;

    if is_up {
        (
            format!("✅ {} is up!", target.name),
            format!(
                "The service is up again after being down for {} minutes.",
                minutes
            ),
        )
    } else {
        let since = DateTime::<Utc>::from_timestamp(incident_start, 0)
            .map(|t| t.with_timezone(tz).format("%Y-%m-%d %H:%M:%S %:z").to_string())
            .unwrap_or_else(|| incident_start.to_string());
        (
            format!("🔴 {} is currently down.", target.name),
            format!(
                "Service is unavailable since {} ({} minutes). Issue: {}",
                since, minutes, reason
            ),
        )
    }
}
