//! Session outcome recording.
//!
//! Sessions report their start and terminal outcome through the
//! [`SessionBookkeeper`] trait. The default [`LogBookkeeper`] writes
//! structured log lines; [`DocumentStoreBookkeeper`] additionally posts a
//! JSON document per event to an HTTP collector. Bookkeeping failures never
//! affect the session itself, the caller logs and moves on.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{error, info};

use crate::session::SessionReport;

/// Bookkeeping failures.
#[derive(Debug, Error)]
pub enum BookkeepingError {
    /// The collector rejected or never received the event
    #[error("failed to deliver bookkeeping event: {0}")]
    Delivery(#[from] reqwest::Error),

    /// The collector answered with a non-success status
    #[error("bookkeeping collector returned status {0}")]
    Rejected(u16),
}

/// Receives session lifecycle events.
#[async_trait]
pub trait SessionBookkeeper: Send + Sync {
    /// The session acquired its resources and began streaming.
    async fn session_started(&self, session_id: &str) -> Result<(), BookkeepingError>;

    /// The session closed cleanly.
    async fn session_completed(&self, report: &SessionReport) -> Result<(), BookkeepingError>;

    /// The session failed, either during startup or while running.
    async fn session_failed(&self, report: &SessionReport) -> Result<(), BookkeepingError>;
}

// =============================================================================
// Log Bookkeeper
// =============================================================================

/// Records events as structured log lines only.
#[derive(Debug, Default)]
pub struct LogBookkeeper;

#[async_trait]
impl SessionBookkeeper for LogBookkeeper {
    async fn session_started(&self, session_id: &str) -> Result<(), BookkeepingError> {
        info!(session_id, "session started");
        Ok(())
    }

    async fn session_completed(&self, report: &SessionReport) -> Result<(), BookkeepingError> {
        info!(session_id = %report.session_id, state = %report.state, "session completed");
        Ok(())
    }

    async fn session_failed(&self, report: &SessionReport) -> Result<(), BookkeepingError> {
        let cause = report
            .cause
            .as_ref()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        error!(session_id = %report.session_id, state = %report.state, cause, "session failed");
        Ok(())
    }
}

// =============================================================================
// Document Store Bookkeeper
// =============================================================================

/// Posts one JSON document per event to an HTTP collector.
pub struct DocumentStoreBookkeeper {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct SessionEvent<'a> {
    session_id: &'a str,
    event: &'a str,
    state: Option<String>,
    cause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transcript: Option<&'a str>,
    timestamp: String,
}

impl DocumentStoreBookkeeper {
    /// Build a bookkeeper posting to `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    async fn post(&self, event: SessionEvent<'_>) -> Result<(), BookkeepingError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&event)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BookkeepingError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }

    fn timestamp() -> String {
        OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
    }
}

#[async_trait]
impl SessionBookkeeper for DocumentStoreBookkeeper {
    async fn session_started(&self, session_id: &str) -> Result<(), BookkeepingError> {
        self.post(SessionEvent {
            session_id,
            event: "started",
            state: None,
            cause: None,
            transcript: None,
            timestamp: Self::timestamp(),
        })
        .await
    }

    async fn session_completed(&self, report: &SessionReport) -> Result<(), BookkeepingError> {
        self.post(SessionEvent {
            session_id: &report.session_id,
            event: "completed",
            state: Some(report.state.to_string()),
            cause: None,
            transcript: report.transcript.as_deref(),
            timestamp: Self::timestamp(),
        })
        .await
    }

    async fn session_failed(&self, report: &SessionReport) -> Result<(), BookkeepingError> {
        self.post(SessionEvent {
            session_id: &report.session_id,
            event: "failed",
            state: Some(report.state.to_string()),
            cause: report.cause.as_ref().map(|c| c.to_string()),
            transcript: None,
            timestamp: Self::timestamp(),
        })
        .await
    }
}
