//! Session lifecycle orchestration.
//!
//! `StreamSession::start` acquires devices and the connection, spawns the
//! relay loops, and hands back a handle. The handle exposes the observable
//! state, a stop request, and `wait` for the final report. All teardown
//! goes through one drain path regardless of what triggered it, so an
//! operator Ctrl-C, a peer hangup, and a device failure all release
//! resources the same way.

pub mod relay;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audio::{CaptureSource, CpalCaptureSource, CpalPlaybackSink, DeviceError, PlaybackSink};
use crate::bookkeeping::SessionBookkeeper;
use crate::config::{ConfigError, SessionConfig};
use crate::protocol::{
    CloseError, ConnectError, ConnectionCloser, InboundSource, OutboundSink, ProtocolConnection,
};

pub use relay::{RelayError, RelayKind, RelayOutcome};

// =============================================================================
// State and Error Types
// =============================================================================

/// Observable session lifecycle. Transitions are one-way; a session is
/// never reused after it reaches `Closed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, nothing acquired yet
    Idle,
    /// Acquiring devices and the connection
    Connecting,
    /// All relay loops running
    Streaming,
    /// Stop requested, waiting for relays to settle
    Draining,
    /// Shut down cleanly, all resources released
    Closed,
    /// Shut down after an unrecoverable error
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Streaming => write!(f, "streaming"),
            SessionState::Draining => write!(f, "draining"),
            SessionState::Closed => write!(f, "closed"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

/// Everything that can end a session early or mark it failed.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The configuration was rejected before anything was acquired
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A device could not be opened
    #[error("audio device error: {0}")]
    Device(#[from] DeviceError),

    /// The connection could not be established
    #[error("connect error: {0}")]
    Connect(#[from] ConnectError),

    /// A relay loop hit an unrecoverable error
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    /// Relays did not settle within the configured bound
    #[error("session drain exceeded {0:?}")]
    DrainTimeout(Duration),

    /// The connection did not close cleanly
    #[error("close error: {0}")]
    Close(#[from] CloseError),

    /// The driver task itself died
    #[error("session driver failed: {0}")]
    Driver(String),
}

/// Final accounting for one session.
#[derive(Debug)]
pub struct SessionReport {
    /// Identifier assigned at start
    pub session_id: String,
    /// Terminal state, `Closed` or `Failed`
    pub state: SessionState,
    /// First unrecoverable error observed, if any
    pub cause: Option<SessionError>,
    /// Assistant transcript assembled from inbound transcript deltas,
    /// absent when the peer sent none
    pub transcript: Option<String>,
}

// =============================================================================
// Transport
// =============================================================================

/// The I/O endpoints a session drives. Bundled so tests can inject fakes
/// for all five seams at once.
pub struct SessionTransport {
    /// Microphone
    pub source: Box<dyn CaptureSource>,
    /// Speaker
    pub sink: Box<dyn PlaybackSink>,
    /// Outbound half of the connection
    pub outbound: Arc<dyn OutboundSink>,
    /// Inbound half of the connection
    pub inbound: Box<dyn InboundSource>,
    /// Connection shutdown handle
    pub closer: Box<dyn ConnectionCloser>,
}

// =============================================================================
// StreamSession
// =============================================================================

/// Handle to one running duplex session.
pub struct StreamSession {
    session_id: String,
    state_rx: watch::Receiver<SessionState>,
    stop: CancellationToken,
    driver: JoinHandle<SessionReport>,
}

impl StreamSession {
    /// Acquire devices and the connection, then start streaming.
    ///
    /// Acquisition order is capture, playback, connection; on any failure
    /// the already-acquired resources are released (their `Drop` impls stop
    /// the device threads), the failure is reported to the bookkeeper, and
    /// the typed error comes back to the caller.
    pub async fn start(
        config: SessionConfig,
        bookkeeper: Arc<dyn SessionBookkeeper>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let session_id = Uuid::new_v4().to_string();
        info!(session_id, endpoint = %config.endpoint, "starting session");

        let source = match CpalCaptureSource::open(config.sample_rate_hz, config.frame_size_samples)
            .await
        {
            Ok(source) => source,
            Err(err) => return Err(report_start_failure(&*bookkeeper, session_id, err.into()).await),
        };
        let sink = match CpalPlaybackSink::open(config.sample_rate_hz).await {
            Ok(sink) => sink,
            Err(err) => return Err(report_start_failure(&*bookkeeper, session_id, err.into()).await),
        };
        let connection = match ProtocolConnection::connect(&config.endpoint, &config.auth_token)
            .await
        {
            Ok(connection) => connection,
            Err(err) => return Err(report_start_failure(&*bookkeeper, session_id, err.into()).await),
        };
        let (sender, inbound, closer) = connection.split();

        let transport = SessionTransport {
            source: Box::new(source),
            sink: Box::new(sink),
            outbound: Arc::new(sender),
            inbound: Box::new(inbound),
            closer: Box::new(closer),
        };
        Ok(Self::with_transport(session_id, config, bookkeeper, transport))
    }

    /// Start streaming over already-acquired endpoints.
    pub fn with_transport(
        session_id: String,
        config: SessionConfig,
        bookkeeper: Arc<dyn SessionBookkeeper>,
        transport: SessionTransport,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let stop = CancellationToken::new();
        let driver = tokio::spawn(drive_session(
            session_id.clone(),
            config,
            bookkeeper,
            transport,
            state_tx,
            stop.clone(),
        ));
        Self {
            session_id,
            state_rx,
            stop,
            driver,
        }
    }

    /// Identifier assigned at start.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Watch for lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Request shutdown. Idempotent; the session drains and closes in the
    /// background, `wait` collects the result.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Wait for the session to finish and collect the final report.
    pub async fn wait(self) -> SessionReport {
        match self.driver.await {
            Ok(report) => report,
            Err(err) => SessionReport {
                session_id: self.session_id,
                state: SessionState::Failed,
                cause: Some(SessionError::Driver(err.to_string())),
                transcript: None,
            },
        }
    }
}

async fn report_start_failure(
    bookkeeper: &dyn SessionBookkeeper,
    session_id: String,
    cause: SessionError,
) -> SessionError {
    error!(session_id, error = %cause, "session startup failed");
    let report = SessionReport {
        session_id,
        state: SessionState::Failed,
        cause: Some(cause),
        transcript: None,
    };
    if let Err(err) = bookkeeper.session_failed(&report).await {
        warn!(error = %err, "failed to record session failure");
    }
    match report.cause {
        Some(cause) => cause,
        None => SessionError::Driver("missing startup failure cause".to_string()),
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Run the session to completion. Spawns the relays, waits for the first
/// stop trigger, drains, closes the connection, and reports.
async fn drive_session(
    session_id: String,
    config: SessionConfig,
    bookkeeper: Arc<dyn SessionBookkeeper>,
    transport: SessionTransport,
    state_tx: watch::Sender<SessionState>,
    stop: CancellationToken,
) -> SessionReport {
    let SessionTransport {
        source,
        sink,
        outbound,
        inbound,
        mut closer,
    } = transport;

    let relay_cancel = CancellationToken::new();
    let transcript = Arc::new(parking_lot::Mutex::new(String::new()));
    let (done_tx, mut done_rx) = mpsc::channel::<(RelayKind, RelayOutcome)>(3);

    let handles = vec![
        relay::spawn_relay(
            RelayKind::Capture,
            done_tx.clone(),
            relay::capture_relay(source, outbound.clone(), relay_cancel.clone()),
        ),
        relay::spawn_relay(
            RelayKind::Playback,
            done_tx.clone(),
            relay::playback_relay(inbound, sink, transcript.clone(), relay_cancel.clone()),
        ),
        relay::spawn_relay(
            RelayKind::PromptInjector,
            done_tx.clone(),
            relay::prompt_injector(
                config.prompts.clone(),
                config.prompt_interval,
                outbound.clone(),
                relay_cancel.clone(),
            ),
        ),
    ];
    drop(done_tx);

    state_tx.send_replace(SessionState::Streaming);
    if let Err(err) = bookkeeper.session_started(&session_id).await {
        warn!(session_id, error = %err, "failed to record session start");
    }

    // Streaming until the operator asks to stop or one relay ends.
    let mut settled = 0usize;
    let mut cause: Option<SessionError> = None;
    tokio::select! {
        _ = stop.cancelled() => {
            info!(session_id, "stop requested");
        }
        first = done_rx.recv() => {
            if let Some((kind, outcome)) = first {
                settled += 1;
                match outcome {
                    RelayOutcome::InboundClosed => {
                        info!(session_id, relay = %kind, "peer ended the session");
                    }
                    RelayOutcome::Failed(err) => {
                        error!(session_id, relay = %kind, error = %err, "relay failed");
                        cause = Some(err.into());
                    }
                    RelayOutcome::Cancelled => {
                        debug!(session_id, relay = %kind, "relay cancelled");
                    }
                }
            }
        }
    }

    // One drain path for every trigger.
    state_tx.send_replace(SessionState::Draining);
    relay_cancel.cancel();

    let drained = tokio::time::timeout(config.drain_timeout, async {
        while settled < handles.len() {
            let Some((kind, outcome)) = done_rx.recv().await else {
                break;
            };
            settled += 1;
            match outcome {
                RelayOutcome::Failed(err) => {
                    error!(session_id, relay = %kind, error = %err, "relay failed during drain");
                    if cause.is_none() {
                        cause = Some(err.into());
                    }
                }
                outcome => debug!(session_id, relay = %kind, outcome = ?outcome, "relay drained"),
            }
        }
    })
    .await
    .is_ok();

    let mut failed = false;
    if !drained {
        error!(session_id, timeout = ?config.drain_timeout, "drain timed out, aborting relays");
        for handle in &handles {
            handle.abort();
        }
        failed = true;
        if cause.is_none() {
            cause = Some(SessionError::DrainTimeout(config.drain_timeout));
        }
    }

    // close() is best-effort but still bounded; a closer that hangs must
    // not keep the session out of a terminal state.
    match tokio::time::timeout(config.drain_timeout, closer.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            error!(session_id, error = %err, "connection close failed");
            failed = true;
            if cause.is_none() {
                cause = Some(err.into());
            }
        }
        Err(_) => {
            error!(session_id, timeout = ?config.drain_timeout, "connection close timed out");
            failed = true;
            if cause.is_none() {
                cause = Some(CloseError("close timed out".to_string()).into());
            }
        }
    }

    let state = if failed {
        SessionState::Failed
    } else {
        SessionState::Closed
    };
    state_tx.send_replace(state);

    let transcript = {
        let text = transcript.lock();
        (!text.is_empty()).then(|| text.clone())
    };
    let report = SessionReport {
        session_id: session_id.clone(),
        state,
        cause,
        transcript,
    };
    let recorded = if report.cause.is_some() {
        bookkeeper.session_failed(&report).await
    } else {
        bookkeeper.session_completed(&report).await
    };
    if let Err(err) = recorded {
        warn!(session_id, error = %err, "failed to record session outcome");
    }

    info!(session_id, state = %report.state, "session finished");
    report
}
