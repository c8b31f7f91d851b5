//! Contracts for the collaborators the core calls into.
//!
//! Rendering, principal notification and the per-server log sink live
//! outside this crate. Every call made through these traits is wrapped in
//! [`bounded`] so a stalled collaborator cannot hold a queue's lock.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{PrincipalId, QueueView};

/// Renderer failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// The rendered surface no longer matches what the renderer expects.
    /// Recovery is a full redraw.
    #[error("Render surface is corrupt: {0}")]
    Structural(String),

    #[error("Render failed: {0}")]
    Failed(String),
}

/// Per-recipient delivery failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Delivery to {recipient} failed: {reason}")]
pub struct DeliveryError {
    pub recipient: String,
    pub reason: String,
}

impl DeliveryError {
    pub fn new(recipient: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            reason: reason.into(),
        }
    }
}

/// Outcome of a call made under [`bounded`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorFailure {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("{0}")]
    Failed(String),
}

/// Draws a queue's view on the communication surface.
#[async_trait::async_trait]
pub trait Renderer: Send + Sync {
    /// Redraw `view`. With `force_full_redraw` all prior output is
    /// discarded first.
    async fn render_queue(
        &self,
        view: &QueueView,
        force_full_redraw: bool,
    ) -> Result<(), RenderError>;
}

/// Sends one message to one principal.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_principal(
        &self,
        principal: &PrincipalId,
        message: &str,
    ) -> Result<(), DeliveryError>;
}

/// Severity of a [`LogEvent`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Error,
}

/// An event written to a server's log sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub level: LogLevel,
    /// Server name, or the unknown-origin sentinel
    pub context: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    pub fn info(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Info,
            context: context.into(),
            message: message.into(),
            data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Error,
            ..Self::info(context, message)
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Destination for a server's audit log.
#[async_trait::async_trait]
pub trait LogSink: Send + Sync {
    /// Record `event` at `target` (e.g. a log channel id).
    async fn record(&self, target: &str, event: &LogEvent) -> Result<(), DeliveryError>;
}

/// The collaborators a server and its queues share.
#[derive(Clone)]
pub struct Collaborators {
    pub renderer: Arc<dyn Renderer>,
    pub notifier: Arc<dyn Notifier>,
    pub log_sink: Arc<dyn LogSink>,
}

impl Collaborators {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        notifier: Arc<dyn Notifier>,
        log_sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            renderer,
            notifier,
            log_sink,
        }
    }

    /// Collaborators that accept everything and do nothing.
    pub fn detached() -> Self {
        let detached = Arc::new(Detached);
        Self {
            renderer: detached.clone(),
            notifier: detached.clone(),
            log_sink: detached,
        }
    }
}

/// No-op collaborator.
#[derive(Debug, Default)]
pub struct Detached;

#[async_trait::async_trait]
impl Renderer for Detached {
    async fn render_queue(&self, _view: &QueueView, _force: bool) -> Result<(), RenderError> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl Notifier for Detached {
    async fn notify_principal(&self, _p: &PrincipalId, _m: &str) -> Result<(), DeliveryError> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl LogSink for Detached {
    async fn record(&self, _target: &str, _event: &LogEvent) -> Result<(), DeliveryError> {
        Ok(())
    }
}

/// Await `call` for at most `limit`.
pub async fn bounded<T, E, F>(limit: Duration, call: F) -> Result<T, CollaboratorFailure>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(CollaboratorFailure::Failed(e.to_string())),
        Err(_) => Err(CollaboratorFailure::TimedOut(limit)),
    }
}

/// Delivery counts of a notification fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Send `message` to every recipient concurrently. Each recipient succeeds
/// or fails on its own; all sends are joined before returning.
pub async fn notify_all<I>(
    notifier: &dyn Notifier,
    recipients: I,
    message: &str,
    limit: Duration,
) -> FanoutReport
where
    I: IntoIterator<Item = PrincipalId>,
{
    let sends = recipients.into_iter().map(|recipient| async move {
        let outcome = bounded(limit, notifier.notify_principal(&recipient, message)).await;
        if let Err(e) = &outcome {
            warn!(recipient = %recipient, error = %e, "Notification not delivered");
        }
        outcome.is_ok()
    });

    join_all(sends)
        .await
        .into_iter()
        .fold(FanoutReport::default(), |mut report, ok| {
            if ok {
                report.delivered += 1;
            } else {
                report.failed += 1;
            }
            report
        })
}
