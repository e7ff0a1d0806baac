//! Speaker playback through cpal.
//!
//! Mirrors the capture side: the output stream runs on its own thread and
//! pulls PCM bytes from a capacity-1 channel inside the device callback,
//! padding with silence when no frame is ready. `write_frame` blocks while
//! the device is behind, which is the playback loop's only flow control.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::thread;

use async_trait::async_trait;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::frame::AudioFrame;
use super::{DeviceError, PlaybackSink};

type FaultSlot = Arc<Mutex<Option<DeviceError>>>;

/// Playback sink backed by the default cpal output device.
pub struct CpalPlaybackSink {
    frames: Option<mpsc::Sender<Bytes>>,
    fault: FaultSlot,
    stop: Option<std_mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CpalPlaybackSink {
    /// Open the default output device for mono 16-bit PCM at the given rate.
    pub async fn open(sample_rate_hz: u32) -> Result<Self, DeviceError> {
        let (frame_tx, frame_rx) = mpsc::channel::<Bytes>(1);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), DeviceError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let fault: FaultSlot = Arc::new(Mutex::new(None));
        let callback_fault = fault.clone();

        let handle = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                run_playback_stream(sample_rate_hz, frame_rx, ready_tx, stop_rx, callback_fault);
            })
            .map_err(|e| DeviceError::Stream(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                info!(sample_rate_hz, "playback device opened");
                Ok(Self {
                    frames: Some(frame_tx),
                    fault,
                    stop: Some(stop_tx),
                    thread: Some(handle),
                })
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(DeviceError::NoDevice("output"))
            }
        }
    }
}

/// Body of the playback thread: owns the cpal stream until shutdown.
fn run_playback_stream(
    sample_rate_hz: u32,
    mut frame_rx: mpsc::Receiver<Bytes>,
    ready_tx: oneshot::Sender<Result<(), DeviceError>>,
    stop_rx: std_mpsc::Receiver<()>,
    fault: FaultSlot,
) {
    let Some(device) = cpal::default_host().default_output_device() else {
        let _ = ready_tx.send(Err(DeviceError::NoDevice("output")));
        return;
    };
    debug!(
        device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
        "using output device"
    );

    let config = StreamConfig {
        channels: 1,
        sample_rate: SampleRate(sample_rate_hz),
        buffer_size: cpal::BufferSize::Default,
    };

    // Bytes handed over by write_frame but not yet rendered; inbound deltas
    // are rarely aligned with the device's callback size.
    let mut carry: VecDeque<u8> = VecDeque::new();

    let stream = device.build_output_stream(
        &config,
        move |out: &mut [i16], _: &cpal::OutputCallbackInfo| {
            for slot in out.iter_mut() {
                if carry.len() < 2 {
                    match frame_rx.try_recv() {
                        Ok(bytes) => carry.extend(bytes.iter()),
                        // Underrun on the render side is padded with
                        // silence; the session treats it as latency, not
                        // failure.
                        Err(_) => {}
                    }
                }
                *slot = if carry.len() >= 2 {
                    let lo = carry.pop_front().unwrap_or(0);
                    let hi = carry.pop_front().unwrap_or(0);
                    i16::from_le_bytes([lo, hi])
                } else {
                    0
                };
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
            let _ = ready_tx.send(Err(DeviceError::NoDevice("output")));
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

    let _ = stop_rx.recv();
    drop(stream);
    debug!("playback stream released");
}

#[async_trait]
impl PlaybackSink for CpalPlaybackSink {
    async fn write_frame(&mut self, frame: AudioFrame) -> Result<(), DeviceError> {
        if let Some(err) = self.fault.lock().take() {
            return Err(err);
        }
        let Some(tx) = self.frames.as_ref() else {
            return Err(DeviceError::Closed);
        };
        tx.send(frame.into_data())
            .await
            .map_err(|_| self.fault.lock().take().unwrap_or(DeviceError::Closed))
    }

    fn close(&mut self) {
        self.frames.take();
        if self.stop.take().is_some() {
            if let Some(handle) = self.thread.take() {
                let _ = handle.join();
            }
            debug!("playback device closed");
        }
    }
}

impl Drop for CpalPlaybackSink {
    fn drop(&mut self) {
        self.close();
    }
}
