//! One-shot clip resampling.
//!
//! Converts a fully decoded clip to the output device rate before playback
//! starts. Uses Rubato's sinc resampler fed in fixed-size chunks, with the
//! final short chunk flagged via `partial_len`. Runs synchronously: the clip
//! is already in memory, so there is no streaming stage.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use clipdeck_core::device::ClipSource;

const CHUNK_FRAMES: usize = 1024;

/// Resample `clip` to `dst_rate`.
///
/// Returns the input unchanged when the rates already match.
pub fn resample_clip(clip: &ClipSource, dst_rate: u32) -> Result<ClipSource> {
    if clip.sample_rate == dst_rate {
        return Ok(clip.clone());
    }

    let channels = clip.channels;
    let f_ratio = dst_rate as f64 / clip.sample_rate as f64;

    let sinc_len = 128;
    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };

    let mut resampler = Async::<f32>::new_sinc(
        f_ratio,
        1.1,
        &params,
        CHUNK_FRAMES,
        channels,
        FixedAsync::Input,
    )
    .map_err(|e| anyhow!("resampler init: {e}"))?;

    let total_frames = clip.frames();
    let mut out: Vec<f32> =
        Vec::with_capacity((clip.samples.len() as f64 * f_ratio) as usize + channels * CHUNK_FRAMES);
    let mut out_chunk = vec![0.0f32; channels * CHUNK_FRAMES * 3];
    let mut indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len: None,
    };

    let mut pos = 0usize;
    while pos < total_frames {
        let take = CHUNK_FRAMES.min(total_frames - pos);
        let chunk = &clip.samples[pos * channels..(pos + take) * channels];

        let input_adapter = InterleavedSlice::new(chunk, channels, take)
            .map_err(|e| anyhow!("interleaved input: {e}"))?;
        let out_capacity_frames = out_chunk.len() / channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut out_chunk, channels, out_capacity_frames)
                .map_err(|e| anyhow!("interleaved output: {e}"))?;

        indexing.input_offset = 0;
        indexing.output_offset = 0;
        indexing.partial_len = if take == CHUNK_FRAMES { None } else { Some(take) };

        let (_consumed, produced) = resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| anyhow!("resample: {e}"))?;

        out.extend_from_slice(&out_chunk[..produced * channels]);
        pos += take;
    }

    tracing::info!(from_hz = clip.sample_rate, to_hz = dst_rate, "clip resampled");

    Ok(ClipSource {
        samples: out.into(),
        channels,
        sample_rate: dst_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_clip(frames: usize, channels: usize, rate: u32) -> ClipSource {
        let mut samples = Vec::with_capacity(frames * channels);
        for i in 0..frames {
            let v = (i as f32 * 0.05).sin();
            for _ in 0..channels {
                samples.push(v);
            }
        }
        ClipSource {
            samples: samples.into(),
            channels,
            sample_rate: rate,
        }
    }

    #[test]
    fn matching_rate_is_passed_through() {
        let clip = sine_clip(4096, 2, 48_000);
        let out = resample_clip(&clip, 48_000).unwrap();
        assert_eq!(out.sample_rate, 48_000);
        assert_eq!(out.samples.len(), clip.samples.len());
    }

    #[test]
    fn output_length_tracks_the_rate_ratio() {
        let clip = sine_clip(44_100, 2, 44_100);
        let out = resample_clip(&clip, 48_000).unwrap();
        assert_eq!(out.sample_rate, 48_000);
        assert_eq!(out.channels, 2);

        // One second of input should come out near one second of output;
        // the sinc filter delay trims a small tail.
        let out_frames = out.frames() as f64;
        assert!((out_frames - 48_000.0).abs() < 2048.0, "frames: {out_frames}");
    }
}
