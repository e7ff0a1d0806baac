//! The three long-running loops a streaming session is made of.
//!
//! Each loop owns one direction of data movement and nothing else. The
//! session layer spawns all three, then watches for the first one to stop.
//! A loop stops for exactly one of three reasons, captured in
//! [`RelayOutcome`]: it was cancelled, the peer ended the inbound
//! sequence, or it hit an unrecoverable error.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::audio::{CaptureSource, DeviceError, PlaybackSink};
use crate::config::SidePrompt;
use crate::protocol::{FrameCodec, InboundSource, OutboundSink, SendError, WireMessage};

// =============================================================================
// Outcome Types
// =============================================================================

/// Which loop produced an outcome. Used by the session for logging and for
/// deciding whether an end-of-inbound is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    /// Microphone to connection
    Capture,
    /// Connection to speaker
    Playback,
    /// Timed side prompts to connection
    PromptInjector,
}

impl std::fmt::Display for RelayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayKind::Capture => write!(f, "capture"),
            RelayKind::Playback => write!(f, "playback"),
            RelayKind::PromptInjector => write!(f, "prompt-injector"),
        }
    }
}

/// Why a relay loop stopped.
#[derive(Debug)]
pub enum RelayOutcome {
    /// The session asked the loop to stop
    Cancelled,
    /// The peer ended the inbound sequence; treated as a stop request
    InboundClosed,
    /// The loop hit an unrecoverable error
    Failed(RelayError),
}

/// Unrecoverable relay failures.
#[derive(Debug, Error)]
pub enum RelayError {
    /// An audio device failed or fell behind
    #[error("audio device error: {0}")]
    Device(#[from] DeviceError),

    /// The connection rejected or dropped an outbound message
    #[error("send error: {0}")]
    Send(#[from] SendError),
}

// =============================================================================
// Capture Relay
// =============================================================================

/// Pull frames from the microphone and ship each one as an atomic
/// append+commit unit. One commit per frame; the transcript boundary on the
/// peer side matches the capture frame boundary exactly.
pub async fn capture_relay(
    mut source: Box<dyn CaptureSource>,
    outbound: Arc<dyn OutboundSink>,
    cancel: CancellationToken,
) -> RelayOutcome {
    let outcome = loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break RelayOutcome::Cancelled,
            frame = source.read_frame() => match frame {
                Ok(frame) => frame,
                Err(err) => break RelayOutcome::Failed(err.into()),
            },
        };

        trace!(seq = frame.seq(), bytes = frame.len(), "captured frame");
        let unit = vec![FrameCodec::encode(&frame), WireMessage::AudioCommit];

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break RelayOutcome::Cancelled,
            sent = outbound.send_unit(unit) => {
                if let Err(err) = sent {
                    break RelayOutcome::Failed(err.into());
                }
            }
        }
    };

    source.close();
    debug!(outcome = ?outcome, "capture relay stopped");
    outcome
}

// =============================================================================
// Playback Relay
// =============================================================================

/// Pull inbound messages, decode audio deltas, and push them to the
/// speaker. Transcript fragments are appended to the shared transcript for
/// the session's final report. Malformed deltas are logged and dropped;
/// audio glitches are not worth tearing the session down for. End of the
/// inbound sequence is a stop request from the peer, not a failure.
pub async fn playback_relay(
    mut inbound: Box<dyn InboundSource>,
    mut sink: Box<dyn PlaybackSink>,
    transcript: Arc<Mutex<String>>,
    cancel: CancellationToken,
) -> RelayOutcome {
    let mut codec = FrameCodec::new();

    let outcome = loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break RelayOutcome::Cancelled,
            message = inbound.recv() => match message {
                Some(message) => message,
                None => break RelayOutcome::InboundClosed,
            },
        };

        if let WireMessage::TranscriptDelta { delta } = &message {
            transcript.lock().push_str(delta);
            continue;
        }

        let frame = match codec.decode(&message) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(err) => {
                warn!(error = %err, "dropping malformed audio delta");
                continue;
            }
        };

        trace!(seq = frame.seq(), bytes = frame.len(), "playing frame");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break RelayOutcome::Cancelled,
            written = sink.write_frame(frame) => {
                if let Err(err) = written {
                    break RelayOutcome::Failed(err.into());
                }
            }
        }
    };

    sink.close();
    debug!(outcome = ?outcome, "playback relay stopped");
    outcome
}

// =============================================================================
// Prompt Injector
// =============================================================================

/// Deliver each configured side prompt as an atomic create+respond unit,
/// the first one immediately and each subsequent one after `interval`.
/// Prompts go out in configuration order, each exactly once. After the list
/// is exhausted the loop idles until cancelled so the session does not
/// mistake prompt completion for shutdown.
pub async fn prompt_injector(
    prompts: Vec<SidePrompt>,
    interval: Duration,
    outbound: Arc<dyn OutboundSink>,
    cancel: CancellationToken,
) -> RelayOutcome {
    for (index, prompt) in prompts.iter().enumerate() {
        if index > 0 {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return RelayOutcome::Cancelled,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        debug!(index, role = %prompt.role, "injecting side prompt");
        let unit = vec![
            WireMessage::prompt(&prompt.role, &prompt.text),
            WireMessage::ResponseCreate,
        ];

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return RelayOutcome::Cancelled,
            sent = outbound.send_unit(unit) => {
                if let Err(err) = sent {
                    return RelayOutcome::Failed(err.into());
                }
            }
        }
    }

    cancel.cancelled().await;
    RelayOutcome::Cancelled
}

/// Spawn one relay onto the runtime, reporting its outcome on `done`.
pub fn spawn_relay(
    kind: RelayKind,
    done: mpsc::Sender<(RelayKind, RelayOutcome)>,
    fut: impl std::future::Future<Output = RelayOutcome> + Send + 'static,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let outcome = fut.await;
        // The session may already be gone during teardown.
        let _ = done.send((kind, outcome)).await;
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Records every unit it is asked to send, with its send time.
    struct RecordingSink {
        units: Mutex<Vec<Vec<WireMessage>>>,
        times: Mutex<Vec<tokio::time::Instant>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                units: Mutex::new(Vec::new()),
                times: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl OutboundSink for RecordingSink {
        async fn send_unit(&self, unit: Vec<WireMessage>) -> Result<(), SendError> {
            self.units.lock().push(unit);
            self.times.lock().push(tokio::time::Instant::now());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_prompt_injector_sends_each_prompt_once_in_order() {
        let sink = RecordingSink::new();
        let cancel = CancellationToken::new();
        let prompts = vec![
            SidePrompt::system("first"),
            SidePrompt::system("second"),
            SidePrompt::system("third"),
        ];

        let handle = tokio::spawn(prompt_injector(
            prompts,
            Duration::ZERO,
            sink.clone(),
            cancel.clone(),
        ));

        // Zero interval: all prompts go out immediately, then the loop
        // idles until cancelled.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, RelayOutcome::Cancelled));

        let units = sink.units.lock();
        assert_eq!(units.len(), 3);
        for (unit, text) in units.iter().zip(["first", "second", "third"]) {
            assert_eq!(unit.len(), 2);
            match &unit[0] {
                WireMessage::ConversationItemCreate { item } => {
                    assert_eq!(item.content[0].text, text);
                }
                other => panic!("expected conversation item, got {other:?}"),
            }
            assert!(matches!(unit[1], WireMessage::ResponseCreate));
        }
    }

    #[tokio::test]
    async fn test_prompt_injector_cancel_interrupts_delay() {
        let sink = RecordingSink::new();
        let cancel = CancellationToken::new();
        let prompts = vec![
            SidePrompt::system("delivered"),
            SidePrompt::system("never delivered"),
        ];

        let start = tokio::time::Instant::now();
        let handle = tokio::spawn(prompt_injector(
            prompts,
            Duration::from_secs(3600),
            sink.clone(),
            cancel.clone(),
        ));

        // Cancel while the injector is waiting out the interval before the
        // second prompt.
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let outcome = handle.await.unwrap();

        assert!(matches!(outcome, RelayOutcome::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(sink.units.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_pairs_separated_by_interval() {
        let sink = RecordingSink::new();
        let cancel = CancellationToken::new();
        let interval = Duration::from_secs(60);
        let prompts = vec![
            SidePrompt::system("a"),
            SidePrompt::system("b"),
            SidePrompt::system("c"),
        ];

        let handle = tokio::spawn(prompt_injector(
            prompts,
            interval,
            sink.clone(),
            cancel.clone(),
        ));

        // Paused clock: sleeping here advances virtual time through both
        // 60s gaps instantly.
        tokio::time::sleep(Duration::from_secs(121)).await;
        cancel.cancel();
        handle.await.unwrap();

        let times = sink.times.lock();
        assert_eq!(times.len(), 3);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= interval);
        }
    }

    #[tokio::test]
    async fn test_prompt_injector_empty_list_idles_until_cancelled() {
        let sink = RecordingSink::new();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(prompt_injector(
            Vec::new(),
            Duration::ZERO,
            sink.clone(),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        cancel.cancel();
        assert!(matches!(handle.await.unwrap(), RelayOutcome::Cancelled));
    }
}
