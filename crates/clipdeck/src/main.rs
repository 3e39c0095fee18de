//! clipdeck — play a single audio track with pause/resume/restart/seek under
//! an interactive shell.
//!
//! ## Pipeline
//! 1. **Acquire**: resolve the argument to a local file, downloading a search
//!    hit when it is not a path.
//! 2. **Decode**: Symphonia decodes the whole file into one interleaved
//!    `f32` clip.
//! 3. **Play**: a CPAL output stream renders the clip; the playback session
//!    enforces legal pause/resume/restart/seek transitions on top of it.
//! 4. **Shell**: stdin commands drive the session until close or end of
//!    clip.

mod cli;
mod shell;
mod source;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use clipdeck_audio::clip::CpalClip;
use clipdeck_audio::{decode, device};
use clipdeck_core::session::PlaybackSession;
use clipdeck_core::timecode::format_minutes;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if args.list_devices {
        let host = cpal::default_host();
        device::list_devices(&host)?;
        return Ok(());
    }

    let Some(source_arg) = args.source.as_deref() else {
        bail!("no source given: pass a file path or a search query");
    };

    let scratch_dir = args.scratch_dir.clone().unwrap_or_else(std::env::temp_dir);
    match source::cleanup_scratch(&scratch_dir) {
        Ok(0) => {}
        Ok(n) => tracing::info!(count = n, "cleaned up stale downloads"),
        Err(e) => tracing::warn!("scratch cleanup warning: {e}"),
    }

    let scratch_for_signal = scratch_dir.clone();
    let _ = ctrlc::set_handler(move || {
        let _ = source::cleanup_scratch(&scratch_for_signal);
        std::process::exit(130);
    });

    let path = source::acquire(source_arg, &scratch_dir)?;
    let clip = decode::decode_file(&path).context("decode audio source")?;

    let deck = CpalClip::new(args.device.clone());
    let mut session = PlaybackSession::new(deck);
    session.play(&clip).context("start playback")?;
    println!(
        "Playing {} ({:.3} minutes).",
        path.display(),
        format_minutes(session.usable_end())
    );

    let outcome = shell::run(&mut session, std::io::BufReader::new(std::io::stdin()))?;
    tracing::info!(?outcome, "session finished");
    Ok(())
}
