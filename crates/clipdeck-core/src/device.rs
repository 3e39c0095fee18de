//! Playback device abstraction.
//!
//! The session drives output through [`ClipDevice`], a minimal capability set
//! over a backend that only knows start/stop and coarse position semantics.
//! One implementation targets a real CPAL output stream; tests use an
//! in-memory fake.

use std::sync::Arc;

use thiserror::Error;

/// A fully decoded audio clip: interleaved `f32` samples plus stream
/// parameters.
///
/// Samples are stored interleaved:
/// `frame0[ch0], frame0[ch1], ..., frame1[ch0], frame1[ch1], ...`
///
/// The buffer is immutable once loaded and cheap to share with a render
/// thread.
#[derive(Clone, Debug)]
pub struct ClipSource {
    /// Interleaved samples.
    pub samples: Arc<[f32]>,
    /// Channel count; fixed for the clip lifetime.
    pub channels: usize,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl ClipSource {
    /// Number of whole frames in the buffer.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    /// Clip duration in microseconds.
    pub fn duration_us(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.frames() as u64).saturating_mul(1_000_000) / self.sample_rate as u64
    }
}

/// Errors surfaced by a playback device implementation.
///
/// These are fatal to a playback session. Transition-validity errors are a
/// separate, recoverable concern reported by the session itself.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The device cannot render the clip's sample encoding.
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// The output sink cannot be claimed or stopped responding.
    #[error("output device unavailable: {0}")]
    Unavailable(String),
}

/// Capability set the playback session drives.
///
/// Query methods must be safe to call at any time, including while the
/// backend's render thread is producing output. `start`, `stop`, `close`,
/// and `set_position` are expected to return promptly; an implementation
/// that cannot guarantee that must surface a timeout as
/// [`DeviceError::Unavailable`].
pub trait ClipDevice {
    /// Bind the device to a decoded clip. Must be called before any other
    /// operation.
    fn open(&mut self, clip: &ClipSource) -> Result<(), DeviceError>;

    /// Begin or resume output from the current internal position.
    ///
    /// Calling on a running device is a caller error.
    fn start(&mut self) -> Result<(), DeviceError>;

    /// Halt output, retaining the current position.
    fn stop(&mut self) -> Result<(), DeviceError>;

    /// Release the device. Calling twice is a caller error.
    fn close(&mut self) -> Result<(), DeviceError>;

    /// Move the read cursor to a microsecond offset. Valid only while
    /// stopped.
    fn set_position(&mut self, us: u64) -> Result<(), DeviceError>;

    /// Current read cursor in microseconds.
    fn position(&self) -> u64;

    /// Whether a clip is currently bound.
    fn is_open(&self) -> bool;

    /// Whether the device is actively producing output.
    fn is_running(&self) -> bool;

    /// Whether the backend considers the clip engaged.
    ///
    /// Equivalent to [`ClipDevice::is_running`] for the CPAL backend; kept as
    /// a separate query because some backends distinguish "loaded" from
    /// "producing sound".
    fn is_active(&self) -> bool;

    /// Total clip length in microseconds. Only meaningful after `open`.
    fn total_length(&self) -> u64;
}
