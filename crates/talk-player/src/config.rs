use std::path::PathBuf;

use serde::Deserialize;

use crate::time::RationalTime;

/// Rate used to turn `period_frames` into the default seek tolerance.
pub const REFERENCE_RATE_HZ: u32 = 48_000;

/// Playback tuning shared by the sink and the sync controller.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerConfig {
    /// Frames the sink may hold before `enqueue` blocks.
    pub max_queued_frames: usize,
    /// Requested device callback period in sample-frames.
    pub period_frames: u32,
    /// Allowed drift before a caption forces a seek; one period when unset.
    pub seek_tolerance_ms: Option<u64>,
    /// Where fetched media is cached.
    pub cache_dir: PathBuf,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            max_queued_frames: 10,
            period_frames: 4096,
            seek_tolerance_ms: None,
            cache_dir: PathBuf::from(".cache/media"),
        }
    }
}

impl PlayerConfig {
    pub fn seek_tolerance(&self) -> RationalTime {
        match self.seek_tolerance_ms {
            Some(ms) => RationalTime::from_ms(i64::try_from(ms).unwrap_or(i64::MAX)),
            None => RationalTime::from_samples(u64::from(self.period_frames), REFERENCE_RATE_HZ),
        }
    }
}
