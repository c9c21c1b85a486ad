//! Audio device enumeration and resolution.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::{EndpointError, Result};

/// Metadata about an audio device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Device name as reported by the OS.
    pub name: String,
    /// Whether this is the system default for its direction.
    pub is_default: bool,
}

/// List available input devices.
pub fn list_input_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    match host.input_devices() {
        Ok(devices) => collect(devices, default_name),
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            Vec::new()
        }
    }
}

/// List available output devices.
pub fn list_output_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    match host.output_devices() {
        Ok(devices) => collect(devices, default_name),
        Err(e) => {
            tracing::warn!("failed to enumerate output devices: {e}");
            Vec::new()
        }
    }
}

fn collect(devices: impl Iterator<Item = cpal::Device>, default_name: Option<String>) -> Vec<DeviceInfo> {
    devices
        .enumerate()
        .map(|(idx, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Device {}", idx + 1));
            let is_default = default_name.as_deref() == Some(name.as_str());
            DeviceInfo { name, is_default }
        })
        .collect()
}

/// Resolve an input device by name, or the system default.
pub fn resolve_input_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match name {
        Some(wanted) => host
            .input_devices()
            .map_err(|e| EndpointError::StreamOpen {
                reason: e.to_string(),
            })?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| EndpointError::DeviceNotFound {
                name: wanted.to_string(),
            }),
        None => host
            .default_input_device()
            .ok_or(EndpointError::NoDefaultDevice { direction: "input" }),
    }
}

/// Resolve an output device by name, or the system default.
pub fn resolve_output_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match name {
        Some(wanted) => host
            .output_devices()
            .map_err(|e| EndpointError::StreamOpen {
                reason: e.to_string(),
            })?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| EndpointError::DeviceNotFound {
                name: wanted.to_string(),
            }),
        None => host.default_output_device().ok_or(EndpointError::NoDefaultDevice {
            direction: "output",
        }),
    }
}
