//! Configuration loading and merging.
//!
//! A TOML file supplies defaults; command-line flags override them.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::Args;
pub use talk_player::config::PlayerConfig;

/// Top-level configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Output device substring.
    pub device: Option<String>,
    /// Directory for downloaded media.
    pub cache_dir: Option<PathBuf>,
    /// Frames buffered ahead of the device.
    pub max_queued_frames: Option<usize>,
    /// Requested callback period in frames.
    pub period_frames: Option<u32>,
    /// Seek tolerance in milliseconds.
    pub seek_tolerance_ms: Option<u64>,
}

impl FileConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<FileConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

#[derive(Clone, Debug)]
pub struct ShadowPlayConfig {
    pub source: String,
    pub captions: PathBuf,
    pub start: usize,
    pub device: Option<String>,
    pub player: PlayerConfig,
}

/// Merge the optional config file and CLI flags over the built-in defaults.
pub fn resolve(file: FileConfig, args: &Args) -> (Option<String>, PlayerConfig) {
    let defaults = PlayerConfig::default();
    let player = PlayerConfig {
        max_queued_frames: args
            .max_queued_frames
            .or(file.max_queued_frames)
            .unwrap_or(defaults.max_queued_frames)
            .max(1),
        period_frames: args
            .period_frames
            .or(file.period_frames)
            .unwrap_or(defaults.period_frames)
            .max(1),
        seek_tolerance_ms: args.seek_tolerance_ms.or(file.seek_tolerance_ms),
        cache_dir: args
            .cache_dir
            .clone()
            .or(file.cache_dir)
            .unwrap_or(defaults.cache_dir),
    };
    let device = args.device.clone().or(file.device);
    (device, player)
}

/// Load `args.config` when given, then merge.
pub fn from_args(args: &Args) -> Result<(Option<String>, PlayerConfig)> {
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    Ok(resolve(file, args))
}
