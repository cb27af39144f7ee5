//! Outbound alert channels.
//!
//! Models notification as a list of independent [`Notifier`] channels.
//! The sink iterates all channels concurrently and swallows per-channel
//! failures so one broken channel never blocks another.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::AlertsConfig;

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Informational.
    Info,
    /// Needs attention soon.
    Warning,
    /// Requires immediate human action.
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Errors from a single notification channel.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// HTTP delivery failure.
    #[error("Webhook delivery failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// A single fire-and-forget notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails; the sink logs and moves on.
    async fn notify(&self, severity: Severity, title: &str, body: &str)
    -> Result<(), NotifyError>;

    /// Channel name for logging.
    fn channel_name(&self) -> &'static str;
}

/// Channel that writes alerts to the structured log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        severity: Severity,
        title: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        match severity {
            Severity::Info => info!(title, body, "Alert"),
            Severity::Warning => warn!(title, body, "Alert"),
            Severity::Critical => error!(title, body, "Alert"),
        }
        Ok(())
    }

    fn channel_name(&self) -> &'static str {
        "log"
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    severity: Severity,
    title: &'a str,
    body: &'a str,
    sent_at: String,
}

/// Channel that POSTs alerts as JSON to a webhook endpoint.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Create a webhook channel with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(url: String, timeout: std::time::Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(
        &self,
        severity: Severity,
        title: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            severity,
            title,
            body,
            sent_at: Utc::now().to_rfc3339(),
        };
        self.client
            .post(&self.url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn channel_name(&self) -> &'static str {
        "webhook"
    }
}

/// Fan-out sink over all configured channels.
#[derive(Default)]
pub struct AlertSink {
    channels: Vec<Arc<dyn Notifier>>,
}

impl AlertSink {
    /// Build the sink from configuration.
    #[must_use]
    pub fn from_config(config: &AlertsConfig) -> Self {
        let mut channels: Vec<Arc<dyn Notifier>> = Vec::new();

        if config.log_enabled {
            channels.push(Arc::new(LogNotifier));
        }

        let timeout = std::time::Duration::from_millis(config.webhook_timeout_ms);
        for url in &config.webhooks {
            match WebhookNotifier::new(url.clone(), timeout) {
                Ok(notifier) => channels.push(Arc::new(notifier)),
                Err(e) => warn!(url = %url, error = %e, "Skipping webhook channel"),
            }
        }

        Self { channels }
    }

    /// Build a sink from explicit channels (tests, custom wiring).
    #[must_use]
    pub fn with_channels(channels: Vec<Arc<dyn Notifier>>) -> Self {
        Self { channels }
    }

    /// Number of configured channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Deliver to every channel independently.
    ///
    /// Failures are logged per channel and never propagate; a broken
    /// channel cannot block the others.
    pub async fn notify_all(&self, severity: Severity, title: &str, body: &str) {
        let deliveries = self.channels.iter().map(|channel| {
            let channel = Arc::clone(channel);
            async move {
                if let Err(e) = channel.notify(severity, title, body).await {
                    warn!(
                        channel = channel.channel_name(),
                        error = %e,
                        "Alert channel delivery failed"
                    );
                }
            }
        });

        futures::future::join_all(deliveries).await;
    }
}
