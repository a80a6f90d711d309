//! Shadow: step through a recorded talk one caption at a time.
//!
//! ## Pipeline
//! 1. **Fetch**: remote media is downloaded once into a content-addressed cache.
//! 2. **Decode**: Symphonia decodes the audio track into interleaved frames.
//! 3. **Sync**: each command plays the audio under one caption, seeking when needed.
//! 4. **Playback**: the CPAL callback drains a bounded frame queue without blocking.
//!
//! ## Modes
//! - `play`: interactive caption-by-caption playback.
//! - `captions`: print a parsed caption script.

use anyhow::{Result, anyhow};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use shadow::cli::{Args, Command};
use shadow::config::{self, ShadowPlayConfig};
use shadow::runtime;

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,shadow=info,talk_player=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let (device, player) = config::from_args(&args)?;

    match &args.cmd {
        Some(Command::Play {
            source,
            captions,
            start,
        }) => runtime::run_play(
            ShadowPlayConfig {
                source: source.clone(),
                captions: captions.clone(),
                start: *start,
                device,
                player,
            },
            true,
        ),
        Some(Command::Captions { file }) => runtime::print_captions(file),
        None => Err(anyhow!("no command given; try `shadow --help`")),
    }
}
