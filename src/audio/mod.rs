//! Audio device layer: fixed-size PCM frame capture and playback.
//!
//! Devices are reached through the [`CaptureSource`] and [`PlaybackSink`]
//! traits so the relays (and tests) never depend on real hardware. The cpal
//! implementations run each stream on a dedicated thread and bridge to async
//! through capacity-1 channels, which gives the depth-1 backpressure the
//! streaming loops rely on.

pub mod capture;
pub mod frame;
pub mod playback;

use async_trait::async_trait;
use thiserror::Error;

pub use capture::CpalCaptureSource;
pub use frame::AudioFrame;
pub use playback::CpalPlaybackSink;

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised by the audio device layer.
///
/// Every variant is fatal for the relay that owns the device; there is no
/// mid-stream recovery for realtime audio.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No device of the requested kind is available
    #[error("no {0} device available")]
    NoDevice(&'static str),

    /// The device rejected the requested stream configuration
    #[error("unsupported stream configuration: {0}")]
    UnsupportedConfig(String),

    /// The device stream failed mid-session
    #[error("audio stream failed: {0}")]
    Stream(String),

    /// A captured frame was dropped before the reader consumed it
    #[error("capture overrun: a frame was dropped before it was read")]
    Overrun,

    /// The device handle has been closed
    #[error("device closed")]
    Closed,
}

// =============================================================================
// Device Traits
// =============================================================================

/// A source of fixed-size PCM capture frames.
#[async_trait]
pub trait CaptureSource: Send {
    /// Wait for the next full frame. Never yields a short frame; device
    /// failure or overrun surfaces as a [`DeviceError`].
    async fn read_frame(&mut self) -> Result<AudioFrame, DeviceError>;

    /// Release the device. Idempotent; also runs on drop.
    fn close(&mut self);
}

/// A sink that renders PCM frames to an output device.
#[async_trait]
pub trait PlaybackSink: Send {
    /// Hand one frame to the output device. Blocks while the device is
    /// behind, which is the only flow control playback needs.
    async fn write_frame(&mut self, frame: AudioFrame) -> Result<(), DeviceError>;

    /// Release the device. Idempotent; also runs on drop.
    fn close(&mut self);
}

// =============================================================================
// Device Enumeration
// =============================================================================

/// Names of the available input devices.
pub fn input_device_names() -> Result<Vec<String>, DeviceError> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| DeviceError::Stream(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Names of the available output devices.
pub fn output_device_names() -> Result<Vec<String>, DeviceError> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| DeviceError::Stream(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}
