use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "clipdeck", version)]
pub struct Args {
    /// Path to a local audio file, or a free-text query for the downloader
    pub source: Option<String>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Directory for downloaded audio (defaults to the system temp dir)
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,
}
