//! Microphone capture through cpal.
//!
//! cpal streams are callback-driven and not `Send`, so the stream lives on a
//! dedicated thread and full frames cross into async land over a capacity-1
//! channel. If the reader falls behind by more than that one frame the
//! overrun is fatal, matching the no-buffering contract of the capture loop.

use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::thread;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::frame::AudioFrame;
use super::{CaptureSource, DeviceError};

/// Shared slot for the first device fault observed by the stream callbacks.
type FaultSlot = Arc<Mutex<Option<DeviceError>>>;

/// Capture source backed by the default cpal input device.
pub struct CpalCaptureSource {
    frames: mpsc::Receiver<AudioFrame>,
    fault: FaultSlot,
    // Dropping this sender tells the stream thread to shut down.
    stop: Option<std_mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CpalCaptureSource {
    /// Open the default input device for mono 16-bit PCM at the given rate,
    /// delivering frames of exactly `frame_size_samples` samples.
    pub async fn open(
        sample_rate_hz: u32,
        frame_size_samples: usize,
    ) -> Result<Self, DeviceError> {
        let frame_bytes = frame_size_samples * 2;
        let (frame_tx, frame_rx) = mpsc::channel::<AudioFrame>(1);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), DeviceError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let fault: FaultSlot = Arc::new(Mutex::new(None));
        let callback_fault = fault.clone();

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                run_capture_stream(
                    sample_rate_hz,
                    frame_bytes,
                    frame_tx,
                    ready_tx,
                    stop_rx,
                    callback_fault,
                );
            })
            .map_err(|e| DeviceError::Stream(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                info!(sample_rate_hz, frame_size_samples, "capture device opened");
                Ok(Self {
                    frames: frame_rx,
                    fault,
                    stop: Some(stop_tx),
                    thread: Some(handle),
                })
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            // Thread died before reporting readiness.
            Err(_) => {
                let _ = handle.join();
                Err(DeviceError::NoDevice("input"))
            }
        }
    }
}

/// Body of the capture thread: owns the cpal stream until shutdown.
fn run_capture_stream(
    sample_rate_hz: u32,
    frame_bytes: usize,
    frame_tx: mpsc::Sender<AudioFrame>,
    ready_tx: oneshot::Sender<Result<(), DeviceError>>,
    stop_rx: std_mpsc::Receiver<()>,
    fault: FaultSlot,
) {
    let Some(device) = cpal::default_host().default_input_device() else {
        let _ = ready_tx.send(Err(DeviceError::NoDevice("input")));
        return;
    };
    debug!(
        device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
        "using input device"
    );

    let config = StreamConfig {
        channels: 1,
        sample_rate: SampleRate(sample_rate_hz),
        buffer_size: cpal::BufferSize::Default,
    };

    let data_fault = fault.clone();
    let mut pending: Vec<u8> = Vec::with_capacity(frame_bytes * 2);
    let mut next_seq: u64 = 0;

    let stream = device.build_input_stream(
        &config,
        move |data: &[i16], _: &cpal::InputCallbackInfo| {
            for &sample in data {
                pending.extend_from_slice(&sample.to_le_bytes());
            }
            while pending.len() >= frame_bytes {
                let rest = pending.split_off(frame_bytes);
                let frame = AudioFrame::new(next_seq, std::mem::replace(&mut pending, rest));
                next_seq += 1;
                match frame_tx.try_send(frame) {
                    Ok(()) => {}
                    // The reader still holds the previous frame; dropping
                    // audio mid-stream is fatal rather than recoverable.
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        data_fault.lock().get_or_insert(DeviceError::Overrun);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
        },
        move |err| {
            fault.lock().get_or_insert(DeviceError::Stream(err.to_string()));
        },
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(cpal::BuildStreamError::StreamConfigNotSupported) => {
            let _ = ready_tx.send(Err(DeviceError::UnsupportedConfig(format!(
                "{sample_rate_hz} Hz mono pcm16"
            ))));
            return;
        }
        Err(cpal::BuildStreamError::DeviceNotAvailable) => {
            let _ = ready_tx.send(Err(DeviceError::NoDevice("input")));
            return;
        }
        Err(e) => {
            let _ = ready_tx.send(Err(DeviceError::Stream(e.to_string())));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(DeviceError::Stream(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    // Park until the handle is closed; RecvError means the sender dropped.
    let _ = stop_rx.recv();
    drop(stream);
    debug!("capture stream released");
}

#[async_trait]
impl CaptureSource for CpalCaptureSource {
    async fn read_frame(&mut self) -> Result<AudioFrame, DeviceError> {
        if let Some(err) = self.fault.lock().take() {
            return Err(err);
        }
        match self.frames.recv().await {
            Some(frame) => Ok(frame),
            None => Err(self.fault.lock().take().unwrap_or(DeviceError::Closed)),
        }
    }

    fn close(&mut self) {
        if self.stop.take().is_some() {
            if let Some(handle) = self.thread.take() {
                let _ = handle.join();
            }
            debug!("capture device closed");
        }
    }
}

impl Drop for CpalCaptureSource {
    fn drop(&mut self) {
        self.close();
    }
}
