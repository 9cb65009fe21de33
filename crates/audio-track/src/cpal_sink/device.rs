//! Output device discovery and stream config selection.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Callback buffer assumed when the device does not report a range.
const DEFAULT_CALLBACK_FRAMES: u32 = 1_024;
/// Lower bound for reported callback buffer sizes; some hosts advertise absurdly small minimums.
const MIN_CALLBACK_FRAMES: u32 = 256;

/// Pick the first output device whose name contains `needle` (case-insensitive), or the
/// host default device.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host.output_devices().context("No output devices")?;
        return devices
            .find(|d| {
                d.description()
                    .ok()
                    .map(|n| matches_device_name(&n.name(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Find an output config at exactly `sample_rate` Hz with exactly `channels` channels.
///
/// Among matching ranges the most precise sample format wins.
pub fn pick_output_config(
    device: &cpal::Device,
    sample_rate: u32,
    channels: u16,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_output_configs()
        .context("Failed to query output configs")?
        .collect();

    let mut best: Option<(u8, cpal::SupportedStreamConfigRange)> = None;
    for range in ranges {
        let Some(rank) = config_rank(
            range.channels(),
            range.min_sample_rate(),
            range.max_sample_rate(),
            range.sample_format(),
            sample_rate,
            channels,
        ) else {
            continue;
        };
        if best.as_ref().is_none_or(|(best_rank, _)| rank < *best_rank) {
            best = Some((rank, range));
        }
    }

    best.map(|(_, range)| range.with_sample_rate(sample_rate))
        .ok_or_else(|| anyhow!("No output config for {sample_rate} Hz, {channels} channels"))
}

/// Smallest callback buffer in frames the config supports.
pub fn min_callback_frames(config: &cpal::SupportedStreamConfig) -> u32 {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => (*min).max(MIN_CALLBACK_FRAMES).min(*max),
        cpal::SupportedBufferSize::Unknown => DEFAULT_CALLBACK_FRAMES,
    }
}

/// Names of the host's output devices, for `--list-devices` style output.
pub fn output_device_names(host: &cpal::Host) -> Result<Vec<String>> {
    let devices = host.output_devices().context("No output devices")?;
    let mut names = Vec::new();
    for d in devices {
        names.push(d.description()?.to_string());
    }
    Ok(names)
}

/// Rank a supported config range for an exact format, lower is better.
fn config_rank(
    range_channels: u16,
    min_rate: u32,
    max_rate: u32,
    format: cpal::SampleFormat,
    sample_rate: u32,
    channels: u16,
) -> Option<u8> {
    if range_channels != channels || sample_rate < min_rate || sample_rate > max_rate {
        return None;
    }
    Some(sample_format_rank(format))
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
