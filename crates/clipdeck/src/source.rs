//! Audio source acquisition.
//!
//! A source argument is either a local file path or a search query handed to
//! an external downloader (`yt-dlp`). Downloads land in a scratch directory;
//! leftovers from previous runs are deleted on startup and on ctrl-c.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;

use anyhow::{Context, Result, anyhow, bail};

/// Prefix for files this program writes into the scratch directory, so
/// cleanup never touches anything else living in the system temp dir.
const SCRATCH_PREFIX: &str = "clipdeck-";

/// Resolve `source` to a playable local file.
pub fn acquire(source: &str, scratch_dir: &Path) -> Result<PathBuf> {
    let as_path = Path::new(source);
    if as_path.is_file() {
        return Ok(as_path.to_path_buf());
    }
    download_query(source, scratch_dir)
}

/// Fetch the first search hit for `query` as an mp3 in `scratch_dir`.
fn download_query(query: &str, scratch_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(scratch_dir)
        .with_context(|| format!("create scratch dir {scratch_dir:?}"))?;
    let out_template = scratch_dir.join(format!("{SCRATCH_PREFIX}%(id)s.%(ext)s"));

    tracing::info!(query, "downloading audio");
    let status = Command::new("yt-dlp")
        .arg("-q")
        .arg("--ignore-errors")
        .arg("-x")
        .args(["--audio-format", "mp3"])
        .arg("-o")
        .arg(&out_template)
        .arg(format!("ytsearch:{query}"))
        .status()
        .context("run yt-dlp (is it installed?)")?;
    if !status.success() {
        bail!("yt-dlp exited with {status}");
    }

    newest_scratch_file(scratch_dir)?
        .ok_or_else(|| anyhow!("download produced no audio file for {query:?}"))
}

/// Most recently modified download in `dir`, if any.
fn newest_scratch_file(dir: &Path) -> Result<Option<PathBuf>> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(dir).with_context(|| format!("read scratch dir {dir:?}"))? {
        let entry = entry?;
        let path = entry.path();
        if !is_scratch_file(&path) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if newest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
            newest = Some((modified, path));
        }
    }
    Ok(newest.map(|(_, p)| p))
}

/// Delete downloads left behind by previous runs. Returns the number
/// removed.
pub fn cleanup_scratch(scratch_dir: &Path) -> Result<usize> {
    let entries = match std::fs::read_dir(scratch_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(e).with_context(|| format!("read scratch dir {scratch_dir:?}"));
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if is_scratch_file(&path) {
            std::fs::remove_file(&path).with_context(|| format!("remove {path:?}"))?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn is_scratch_file(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(SCRATCH_PREFIX))
            .unwrap_or(false)
}
