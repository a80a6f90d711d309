//! Output device discovery and configuration matching.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - finding a device config that plays a stream's native format as-is

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick the first output device whose name contains `needle` (case-insensitive), or the
/// host default device when `needle` is `None`.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let mut devices: Vec<cpal::Device> = host
        .output_devices()
        .context("No output devices")?
        .collect();

    if let Some(needle) = needle {
        if let Some(d) = devices.drain(..).find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Print available output devices to stdout.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

/// Display name for logs.
pub fn device_name(device: &cpal::Device) -> String {
    device
        .description()
        .map(|d| d.to_string())
        .unwrap_or_else(|_| "unknown device".to_string())
}

/// Find a supported config with exactly this rate, channel count and sample format.
///
/// No nearest match is attempted: the sink never converts, so anything else is unusable.
pub fn find_output_config(
    device: &cpal::Device,
    rate: u32,
    channels: u16,
    format: cpal::SampleFormat,
) -> Result<Option<cpal::SupportedStreamConfig>> {
    let ranges = device
        .supported_output_configs()
        .context("query supported output configs")?;
    for range in ranges {
        if range.channels() == channels
            && range.sample_format() == format
            && rate_in_range(range.min_sample_rate(), range.max_sample_rate(), rate)
        {
            return Ok(Some(range.with_sample_rate(rate)));
        }
    }
    Ok(None)
}

/// Buffer size for a requested callback period, clamped to what the device supports.
///
/// `Unknown` ranges leave the choice to the device.
pub fn pick_buffer_size(
    supported: &cpal::SupportedBufferSize,
    period_frames: u32,
) -> cpal::BufferSize {
    match supported {
        cpal::SupportedBufferSize::Range { min, max } => {
            cpal::BufferSize::Fixed(period_frames.clamp(*min, (*max).max(*min)))
        }
        cpal::SupportedBufferSize::Unknown => cpal::BufferSize::Default,
    }
}

fn rate_in_range(min: u32, max: u32, rate: u32) -> bool {
    rate >= min && rate <= max
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
