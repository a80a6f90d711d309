use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "shadow", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// TOML file with defaults for the options below
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Directory for downloaded media
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Decoded frames buffered ahead of the device before decoding pauses
    #[arg(long)]
    pub max_queued_frames: Option<usize>,

    /// Requested device callback period (frames)
    #[arg(long)]
    pub period_frames: Option<u32>,

    /// Drift from a caption's start (ms) tolerated before seeking; defaults to one period
    #[arg(long)]
    pub seek_tolerance_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Step through a talk caption by caption
    Play {
        /// Local audio file or direct media URL
        source: String,

        /// Caption script (.ass, .ssa, .srt or .json)
        #[arg(long)]
        captions: PathBuf,

        /// Caption index to start from
        #[arg(long, default_value_t = 0)]
        start: usize,
    },

    /// Print the parsed captions of a script
    Captions {
        /// Caption script (.ass, .ssa, .srt or .json)
        file: PathBuf,
    },
}
