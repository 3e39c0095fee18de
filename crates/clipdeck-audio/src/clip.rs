//! CPAL-backed clip device.
//!
//! Renders a fully decoded clip through a CPAL output stream. The callback
//! reads frames at an atomic cursor shared with the control side, applies
//! basic channel mapping (mono↔stereo, best-effort otherwise), and writes
//! silence while the transport gate is off. Start/stop never tear the stream
//! down; they flip the gate, which keeps both calls prompt and leaves the
//! cursor exactly where playback halted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use cpal::traits::{DeviceTrait, StreamTrait};

use clipdeck_core::device::{ClipDevice, ClipSource, DeviceError};

use crate::device::{pick_buffer_size, pick_device, pick_output_config};
use crate::resample::resample_clip;

/// State shared between the control side and the output callback.
///
/// The cursor is written by the callback only while the gate is on, and by
/// `set_position` only while it is off, so the two writers never race.
struct RenderState {
    /// Interleaved samples at the output stream rate.
    samples: Arc<[f32]>,
    /// Source channel count of `samples`.
    channels: usize,
    /// Next frame to render.
    cursor: AtomicUsize,
    /// Transport gate: while false the callback emits silence and holds the
    /// cursor.
    gate: AtomicBool,
}

struct OpenClip {
    state: Arc<RenderState>,
    sample_rate: u32,
    total_frames: usize,
    // Dropped on close, which releases the output stream.
    _stream: cpal::Stream,
}

/// The real playback device: one CPAL output stream bound to one clip.
pub struct CpalClip {
    device_needle: Option<String>,
    opened: Option<OpenClip>,
}

impl CpalClip {
    /// `device_needle` selects the output device by substring match; `None`
    /// uses the host default.
    pub fn new(device_needle: Option<String>) -> Self {
        Self {
            device_needle,
            opened: None,
        }
    }

    fn require_open(&self) -> Result<&OpenClip, DeviceError> {
        self.opened
            .as_ref()
            .ok_or_else(|| DeviceError::Unavailable("device is not open".into()))
    }
}

impl ClipDevice for CpalClip {
    fn open(&mut self, clip: &ClipSource) -> Result<(), DeviceError> {
        if self.opened.is_some() {
            return Err(DeviceError::Unavailable("device is already open".into()));
        }

        let host = cpal::default_host();
        let device = pick_device(&host, self.device_needle.as_deref())?;
        let config = pick_output_config(&device, clip.sample_rate)?;
        let mut stream_config: cpal::StreamConfig = config.clone().into();
        if let Some(buf) = pick_buffer_size(&config) {
            stream_config.buffer_size = buf;
        }

        let clip_out = resample_clip(clip, stream_config.sample_rate)
            .map_err(|e| DeviceError::Unavailable(format!("prepare clip: {e}")))?;

        let total_frames = clip_out.frames();
        let state = Arc::new(RenderState {
            samples: clip_out.samples,
            channels: clip_out.channels,
            cursor: AtomicUsize::new(0),
            gate: AtomicBool::new(false),
        });

        let stream = build_output_stream(&device, &stream_config, config.sample_format(), &state)?;
        // The stream runs for the whole session; output is gated by `state`.
        stream
            .play()
            .map_err(|e| DeviceError::Unavailable(format!("start stream: {e}")))?;

        let device_name = device.description().ok().map(|d| d.to_string());
        tracing::info!(
            device = device_name.as_deref().unwrap_or("<default>"),
            rate_hz = stream_config.sample_rate,
            frames = total_frames,
            "clip device open"
        );

        self.opened = Some(OpenClip {
            state,
            sample_rate: stream_config.sample_rate,
            total_frames,
            _stream: stream,
        });
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        let open = self.require_open()?;
        open.state.gate.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        let open = self.require_open()?;
        open.state.gate.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        match self.opened.take() {
            Some(open) => {
                open.state.gate.store(false, Ordering::Relaxed);
                drop(open);
                tracing::info!("clip device closed");
                Ok(())
            }
            None => Err(DeviceError::Unavailable("device is not open".into())),
        }
    }

    fn set_position(&mut self, us: u64) -> Result<(), DeviceError> {
        let open = self.require_open()?;
        let frame = (us_to_frames(us, open.sample_rate) as usize).min(open.total_frames);
        open.state.cursor.store(frame, Ordering::Relaxed);
        Ok(())
    }

    fn position(&self) -> u64 {
        match &self.opened {
            Some(open) => frames_to_us(
                open.state.cursor.load(Ordering::Relaxed) as u64,
                open.sample_rate,
            ),
            None => 0,
        }
    }

    fn is_open(&self) -> bool {
        self.opened.is_some()
    }

    fn is_running(&self) -> bool {
        match &self.opened {
            Some(open) => {
                open.state.gate.load(Ordering::Relaxed)
                    && open.state.cursor.load(Ordering::Relaxed) < open.total_frames
            }
            None => false,
        }
    }

    fn is_active(&self) -> bool {
        // This backend has no loaded-but-silent state beyond the gate.
        self.is_running()
    }

    fn total_length(&self) -> u64 {
        match &self.opened {
            Some(open) => frames_to_us(open.total_frames as u64, open.sample_rate),
            None => 0,
        }
    }
}

/// Build the output stream for whichever sample format the device wants.
fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    state: &Arc<RenderState>,
) -> Result<cpal::Stream, DeviceError> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, state),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, state),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, state),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, state),
        other => Err(DeviceError::UnsupportedFormat(format!("{other:?}"))),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    state: &Arc<RenderState>,
) -> Result<cpal::Stream, DeviceError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = config.channels as usize;
    let state_cb = state.clone();
    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                if !state_cb.gate.load(Ordering::Relaxed) {
                    data.fill(<T as cpal::Sample>::from_sample::<f32>(0.0));
                    return;
                }

                let src_channels = state_cb.channels;
                let total_frames = state_cb.samples.len() / src_channels;
                let start_cursor = state_cb.cursor.load(Ordering::Relaxed);
                let mut cursor = start_cursor;

                let frames = data.len() / channels_out;
                for frame in 0..frames {
                    for ch in 0..channels_out {
                        let value = if cursor < total_frames {
                            map_channel(&state_cb.samples, cursor, src_channels, channels_out, ch)
                        } else {
                            0.0
                        };
                        data[frame * channels_out + ch] =
                            <T as cpal::Sample>::from_sample::<f32>(value);
                    }
                    if cursor < total_frames {
                        cursor += 1;
                    }
                }
                // No store when nothing was consumed, so a control-side
                // reposition after the clip ran out is never overwritten.
                if cursor != start_cursor {
                    state_cb.cursor.store(cursor, Ordering::Relaxed);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| DeviceError::Unavailable(format!("build stream: {e}")))?;

    Ok(stream)
}

/// Read one output sample for `dst_ch`, applying a simple channel mapping.
///
/// Mapping rules:
/// - mono → anything: duplicate channel 0
/// - stereo → mono: average L/R
/// - stereo → stereo: pass-through
/// - other layouts: clamp to available channels
fn map_channel(
    samples: &[f32],
    frame: usize,
    src_channels: usize,
    dst_channels: usize,
    dst_ch: usize,
) -> f32 {
    let base = frame * src_channels;
    let get = |ch: usize| samples.get(base + ch).copied().unwrap_or(0.0);

    match (src_channels, dst_channels) {
        (1, _) => get(0),
        (2, 1) => 0.5 * (get(0) + get(1)),
        (2, 2) => get(dst_ch.min(1)),
        _ => get(dst_ch.min(src_channels.saturating_sub(1))),
    }
}

fn frames_to_us(frames: u64, rate: u32) -> u64 {
    if rate == 0 {
        return 0;
    }
    frames.saturating_mul(1_000_000) / rate as u64
}

fn us_to_frames(us: u64, rate: u32) -> u64 {
    us.saturating_mul(rate as u64) / 1_000_000
}
