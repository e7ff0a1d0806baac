//! Shared fakes for the session and relay integration tests.
//!
//! Each fake stands in for one of the transport seams and records what the
//! session did to it, so tests can assert on ordering and teardown without
//! hardware or a live peer.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use duplex_voice::bookkeeping::{BookkeepingError, SessionBookkeeper};
use duplex_voice::protocol::{CloseError, ConnectionCloser, InboundSource, OutboundSink, SendError};
use duplex_voice::session::SessionReport;
use duplex_voice::{AudioFrame, CaptureSource, DeviceError, PlaybackSink, WireMessage};

// =============================================================================
// Capture
// =============================================================================

/// What a fake microphone does once its scripted frames run out.
pub enum CaptureEnd {
    /// Keep the relay waiting forever, as an idle real microphone would
    Pend,
    /// Surface a device failure
    Fail(DeviceError),
}

/// Scripted microphone. Yields the queued frames in order, then follows its
/// end behavior.
pub struct FakeCaptureSource {
    frames: VecDeque<AudioFrame>,
    end: Option<DeviceError>,
    closed: Arc<AtomicBool>,
}

impl FakeCaptureSource {
    pub fn new(frames: Vec<AudioFrame>, end: CaptureEnd) -> (Self, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        let end = match end {
            CaptureEnd::Pend => None,
            CaptureEnd::Fail(err) => Some(err),
        };
        (
            Self {
                frames: frames.into(),
                end,
                closed: closed.clone(),
            },
            closed,
        )
    }

    /// A microphone that produces `count` frames of `bytes` bytes, then
    /// goes quiet.
    pub fn quiet_after(count: usize, bytes: usize) -> (Self, Arc<AtomicBool>) {
        let frames = (0..count)
            .map(|seq| AudioFrame::new(seq as u64, vec![seq as u8; bytes]))
            .collect();
        Self::new(frames, CaptureEnd::Pend)
    }
}

#[async_trait]
impl CaptureSource for FakeCaptureSource {
    async fn read_frame(&mut self) -> Result<AudioFrame, DeviceError> {
        if let Some(frame) = self.frames.pop_front() {
            return Ok(frame);
        }
        match self.end.take() {
            Some(err) => Err(err),
            None => std::future::pending().await,
        }
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// =============================================================================
// Playback
// =============================================================================

/// Speaker that records every frame it is handed.
pub struct FakePlaybackSink {
    pub frames: Arc<Mutex<Vec<AudioFrame>>>,
    closed: Arc<AtomicBool>,
}

impl FakePlaybackSink {
    pub fn new() -> (Self, Arc<Mutex<Vec<AudioFrame>>>, Arc<AtomicBool>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        (
            Self {
                frames: frames.clone(),
                closed: closed.clone(),
            },
            frames,
            closed,
        )
    }
}

#[async_trait]
impl PlaybackSink for FakePlaybackSink {
    async fn write_frame(&mut self, frame: AudioFrame) -> Result<(), DeviceError> {
        self.frames.lock().push(frame);
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// =============================================================================
// Connection halves
// =============================================================================

/// Outbound half that records every unit, optionally failing after a set
/// number of sends.
pub struct FakeOutbound {
    pub units: Arc<Mutex<Vec<Vec<WireMessage>>>>,
    sent: AtomicUsize,
    fail_after: Option<usize>,
}

impl FakeOutbound {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            units: Arc::new(Mutex::new(Vec::new())),
            sent: AtomicUsize::new(0),
            fail_after: None,
        })
    }

    pub fn failing_after(fail_after: usize) -> Arc<Self> {
        Arc::new(Self {
            units: Arc::new(Mutex::new(Vec::new())),
            sent: AtomicUsize::new(0),
            fail_after: Some(fail_after),
        })
    }
}

#[async_trait]
impl OutboundSink for FakeOutbound {
    async fn send_unit(&self, unit: Vec<WireMessage>) -> Result<(), SendError> {
        let sent = self.sent.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.fail_after {
            if sent >= limit {
                return Err(SendError::Transport("simulated transport loss".to_string()));
            }
        }
        self.units.lock().push(unit);
        Ok(())
    }
}

/// Inbound half backed by a channel the test feeds.
pub struct FakeInbound {
    rx: mpsc::Receiver<WireMessage>,
}

impl FakeInbound {
    /// Returns the source plus the sender the test scripts messages with.
    /// Dropping the sender ends the inbound sequence.
    pub fn new() -> (Self, mpsc::Sender<WireMessage>) {
        let (tx, rx) = mpsc::channel(32);
        (Self { rx }, tx)
    }
}

#[async_trait]
impl InboundSource for FakeInbound {
    async fn recv(&mut self) -> Option<WireMessage> {
        self.rx.recv().await
    }
}

/// How a fake closer behaves when asked to close.
enum CloseBehavior {
    Clean,
    Fail,
    Hang,
}

/// Connection closer that records whether it ran.
pub struct FakeCloser {
    closed: Arc<AtomicBool>,
    behavior: CloseBehavior,
}

impl FakeCloser {
    fn with_behavior(behavior: CloseBehavior) -> (Self, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        (
            Self {
                closed: closed.clone(),
                behavior,
            },
            closed,
        )
    }

    pub fn new() -> (Self, Arc<AtomicBool>) {
        Self::with_behavior(CloseBehavior::Clean)
    }

    pub fn failing() -> (Self, Arc<AtomicBool>) {
        Self::with_behavior(CloseBehavior::Fail)
    }

    /// A closer that never returns, like a peer holding the socket open.
    pub fn hanging() -> (Self, Arc<AtomicBool>) {
        Self::with_behavior(CloseBehavior::Hang)
    }
}

#[async_trait]
impl ConnectionCloser for FakeCloser {
    async fn close(&mut self) -> Result<(), CloseError> {
        self.closed.store(true, Ordering::SeqCst);
        match self.behavior {
            CloseBehavior::Clean => Ok(()),
            CloseBehavior::Fail => Err(CloseError("simulated close failure".to_string())),
            CloseBehavior::Hang => std::future::pending().await,
        }
    }
}

// =============================================================================
// Bookkeeping
// =============================================================================

/// An event the fake bookkeeper observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookkeeperEvent {
    Started(String),
    Completed(String),
    Failed(String),
}

/// Bookkeeper that records the event sequence.
pub struct FakeBookkeeper {
    pub events: Arc<Mutex<Vec<BookkeeperEvent>>>,
}

impl FakeBookkeeper {
    pub fn new() -> (Arc<Self>, Arc<Mutex<Vec<BookkeeperEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Self {
                events: events.clone(),
            }),
            events,
        )
    }
}

#[async_trait]
impl SessionBookkeeper for FakeBookkeeper {
    async fn session_started(&self, session_id: &str) -> Result<(), BookkeepingError> {
        self.events
            .lock()
            .push(BookkeeperEvent::Started(session_id.to_string()));
        Ok(())
    }

    async fn session_completed(&self, report: &SessionReport) -> Result<(), BookkeepingError> {
        self.events
            .lock()
            .push(BookkeeperEvent::Completed(report.session_id.clone()));
        Ok(())
    }

    async fn session_failed(&self, report: &SessionReport) -> Result<(), BookkeepingError> {
        self.events
            .lock()
            .push(BookkeeperEvent::Failed(report.session_id.clone()));
        Ok(())
    }
}
