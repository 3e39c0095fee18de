//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - choosing a stream config close to the clip sample rate

use cpal::traits::{DeviceTrait, HostTrait};

use clipdeck_core::device::DeviceError;

/// Pick the first output device matching `needle` (case-insensitive), or the
/// default device.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device, DeviceError> {
    let mut devices: Vec<cpal::Device> = host
        .output_devices()
        .map_err(|e| DeviceError::Unavailable(format!("no output devices: {e}")))?
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
        return Err(DeviceError::Unavailable(format!(
            "no output device matched: {needle}"
        )));
    }

    host.default_output_device()
        .ok_or_else(|| DeviceError::Unavailable("no default output device".into()))
}

/// Choose the best output config for a target sample rate.
///
/// Prefers rates at or below the target (avoids upsampling when the device
/// supports the clip rate exactly), then higher rates, then friendlier
/// sample formats.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
) -> Result<cpal::SupportedStreamConfig, DeviceError> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map_err(|e| DeviceError::Unavailable(format!("query output configs: {e}")))?
        .collect();
    if ranges.is_empty() {
        return Err(DeviceError::Unavailable(
            "no supported output configs".into(),
        ));
    }

    let mut best: Option<(bool, u32, u8, cpal::SupportedStreamConfig)> = None;

    for range in ranges {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let below = rate <= target_rate;
        let format_rank = sample_format_rank(range.sample_format());
        let cfg = range.with_sample_rate(rate);
        let replace = match &best {
            None => true,
            Some((b_below, b_rate, b_rank, _)) => {
                is_better_candidate(below, rate, format_rank, *b_below, *b_rate, *b_rank)
            }
        };
        if replace {
            best = Some((below, rate, format_rank, cfg));
        }
    }

    Ok(best.unwrap().3)
}

/// Prefer a fixed buffer size if the device advertises one.
///
/// Returns `None` when the device only supports the default buffer size.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            const MAX_FRAMES: u32 = 16_384;
            let chosen = if *max > MAX_FRAMES {
                if *min > MAX_FRAMES { *min } else { MAX_FRAMES }
            } else {
                *max
            };
            Some(cpal::BufferSize::Fixed(chosen))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Print available output devices to stdout (CLI `--list-devices`).
pub fn list_devices(host: &cpal::Host) -> Result<(), DeviceError> {
    let devices = host
        .output_devices()
        .map_err(|e| DeviceError::Unavailable(format!("no output devices: {e}")))?;
    for (i, d) in devices.enumerate() {
        match d.description() {
            Ok(desc) => println!("#{i}: {desc}"),
            Err(e) => println!("#{i}: <unavailable: {e}>"),
        }
    }
    Ok(())
}

fn pick_rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    if target >= min && target <= max {
        target
    } else if target < min {
        min
    } else {
        max
    }
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

fn is_better_candidate(
    below: bool,
    rate: u32,
    format_rank: u8,
    best_below: bool,
    best_rate: u32,
    best_rank: u8,
) -> bool {
    if below != best_below {
        below && !best_below
    } else if rate != best_rate {
        rate > best_rate
    } else {
        format_rank < best_rank
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", ""));
    }

    #[test]
    fn pick_rate_for_range_prefers_target_when_in_range() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, 48_000), 48_000);
    }

    #[test]
    fn pick_rate_for_range_clamps_below_min() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, 22_050), 44_100);
    }

    #[test]
    fn pick_rate_for_range_clamps_above_max() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, 192_000), 96_000);
    }

    #[test]
    fn is_better_candidate_prefers_below_target() {
        assert!(is_better_candidate(true, 48_000, 1, false, 48_000, 1));
    }

    #[test]
    fn is_better_candidate_prefers_higher_rate() {
        assert!(is_better_candidate(true, 96_000, 2, true, 48_000, 2));
    }

    #[test]
    fn is_better_candidate_prefers_lower_rank() {
        assert!(is_better_candidate(true, 48_000, 0, true, 48_000, 2));
    }
}
