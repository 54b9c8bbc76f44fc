//! Audio device enumeration and selection.

use serde::{Deserialize, Serialize};

/// Metadata about an audio device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default device for its direction.
    pub is_default: bool,
    /// Heuristic flag for inputs that likely capture system/output audio.
    /// Capturing one of these feeds the assistant's own voice back to it.
    pub is_loopback_like: bool,
    /// Heuristic recommendation for the best device in the list.
    pub is_recommended: bool,
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "wave out",
    "what u hear",
    "what you hear",
    "loopback",
    "virtual output",
    "monitor of",
    "speakers (",
    "headphones (",
];

const MIC_POSITIVE_KEYWORDS: &[&str] = &[
    "microphone",
    "mic",
    "array",
    "headset",
    "input",
    "usb",
    "webcam",
];

/// Best-effort heuristic for loopback/system-output capture devices.
pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Score an input device name for likely speech microphone quality.
///
/// Higher is better. Non-loopback devices should be preferred.
pub fn mic_preference_score(name: &str) -> i32 {
    let lowered = name.trim().to_ascii_lowercase();
    let mut score = if is_loopback_like_name(&lowered) { -16 } else { 8 };
    if MIC_POSITIVE_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        score += 6;
    }
    if lowered.contains("default") {
        score += 1;
    }
    score
}

/// Mark the best entry as recommended and sort recommended/default first.
fn rank_devices(list: &mut Vec<DeviceInfo>, score: impl Fn(&DeviceInfo) -> i32) {
    if let Some((idx, _)) = list
        .iter()
        .enumerate()
        .max_by_key(|(_, d)| score(d) + if d.is_default { 2 } else { 0 })
    {
        if let Some(best) = list.get_mut(idx) {
            best.is_recommended = true;
        }
    }
    list.sort_by_key(|d| {
        (
            !d.is_recommended,
            d.is_loopback_like,
            !d.is_default,
            d.name.to_ascii_lowercase(),
        )
    });
}

#[cfg(feature = "audio-cpal")]
fn describe<I: Iterator<Item = cpal::Device>>(
    devices: I,
    default_name: Option<String>,
    fallback_label: &str,
) -> Vec<DeviceInfo> {
    use cpal::traits::DeviceTrait;

    devices
        .enumerate()
        .map(|(idx, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("{fallback_label} {}", idx + 1));
            DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                is_loopback_like: is_loopback_like_name(&name),
                is_recommended: false,
                name,
            }
        })
        .collect()
}

/// List all available audio input devices on the system.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    match host.input_devices() {
        Ok(devices) => {
            let mut list = describe(devices, default_name, "Input Device");
            rank_devices(&mut list, |d| mic_preference_score(&d.name));
            list
        }
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            default_name
                .map(|name| {
                    let is_loopback_like = is_loopback_like_name(&name);
                    vec![DeviceInfo {
                        name,
                        is_default: true,
                        is_loopback_like,
                        is_recommended: !is_loopback_like,
                    }]
                })
                .unwrap_or_default()
        }
    }
}

/// List all available audio output devices on the system.
#[cfg(feature = "audio-cpal")]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    match host.output_devices() {
        Ok(devices) => {
            let mut list = describe(devices, default_name, "Output Device");
            for d in &mut list {
                // loopback-ness only matters for capture
                d.is_loopback_like = false;
            }
            rank_devices(&mut list, |_| 0);
            list
        }
        Err(e) => {
            tracing::warn!("failed to enumerate output devices: {e}");
            default_name
                .map(|name| {
                    vec![DeviceInfo {
                        name,
                        is_default: true,
                        is_loopback_like: false,
                        is_recommended: true,
                    }]
                })
                .unwrap_or_default()
        }
    }
}

/// Resolve an input device by preferred name, otherwise the default input
/// device, otherwise the first available one.
#[cfg(feature = "audio-cpal")]
pub(crate) fn select_input_device(
    preferred: Option<&str>,
) -> crate::error::Result<cpal::Device> {
    use cpal::traits::HostTrait;

    let host = cpal::default_host();
    select_device(
        preferred,
        host.input_devices(),
        host.default_input_device(),
        crate::error::BanterError::NoDefaultInputDevice,
    )
}

/// Output counterpart of [`select_input_device`].
#[cfg(feature = "audio-cpal")]
pub(crate) fn select_output_device(
    preferred: Option<&str>,
) -> crate::error::Result<cpal::Device> {
    use cpal::traits::HostTrait;

    let host = cpal::default_host();
    select_device(
        preferred,
        host.output_devices(),
        host.default_output_device(),
        crate::error::BanterError::NoDefaultOutputDevice,
    )
}

#[cfg(feature = "audio-cpal")]
fn select_device<I: Iterator<Item = cpal::Device>>(
    preferred: Option<&str>,
    listed: std::result::Result<I, cpal::DevicesError>,
    default: Option<cpal::Device>,
    missing: crate::error::BanterError,
) -> crate::error::Result<cpal::Device> {
    use cpal::traits::DeviceTrait;

    let mut listed = match listed {
        Ok(devices) => Some(devices),
        Err(e) => {
            tracing::warn!("failed to list devices while resolving preference: {e}");
            None
        }
    };

    if let (Some(name), Some(devices)) = (preferred, listed.as_mut()) {
        if let Some(found) = devices.find(|d| d.name().map(|n| n == name).unwrap_or(false)) {
            return Ok(found);
        }
        tracing::warn!("preferred device '{}' not found, falling back", name);
    }

    if let Some(default) = default {
        return Ok(default);
    }

    let fallback = listed.and_then(|mut devices| devices.next()).ok_or(missing)?;
    tracing::warn!("no default device, falling back to first available");
    Ok(fallback)
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    vec![]
}
