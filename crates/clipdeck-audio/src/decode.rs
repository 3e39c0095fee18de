//! Whole-file audio decode.
//!
//! Uses Symphonia to:
//! - probe the input container/codec
//! - decode every packet into interleaved `f32` samples
//! - return the whole clip as one in-memory buffer
//!
//! The playback session owns a fully decoded clip, so there is no streaming
//! queue between decode and output.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use clipdeck_core::device::ClipSource;

/// Decode `path` into an in-memory clip.
///
/// Fails when the file cannot be probed, has no audio track, or yields no
/// frames. These are fatal source errors: the caller was promised a
/// decodable buffer.
pub fn decode_file(path: &Path) -> Result<ClipSource> {
    let file = File::open(path).with_context(|| format!("open {:?}", path))?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("probe {:?}", path))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("no default audio track"))?;

    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| anyhow!("unknown channel layout"))?
        .count();
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("unknown sample rate"))?;
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .context("create decoder")?;

    let mut samples: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(_) => break, // EOF
        };

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::warn!("skipping undecodable packet: {e}");
                continue;
            }
            Err(e) => return Err(e).context("decode packet"),
        };

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    if samples.is_empty() {
        return Err(anyhow!("no audio frames decoded from {:?}", path));
    }

    tracing::info!(
        channels,
        rate_hz = sample_rate,
        frames = samples.len() / channels,
        "clip decoded"
    );

    Ok(ClipSource {
        samples: samples.into(),
        channels,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_file_reports_missing_files() {
        let err = decode_file(Path::new("/no/such/clip.flac")).unwrap_err();
        assert!(format!("{err:#}").contains("clip.flac"));
    }
}
