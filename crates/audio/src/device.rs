use crate::{AudioError, Result};
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    Input,
    Output,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AudioDevice {
    pub id: String,
    pub name: String,
    pub is_default: bool,
    pub direction: DeviceDirection,
}

fn describe(
    devices: impl Iterator<Item = Device>,
    default: Option<Device>,
    direction: DeviceDirection,
) -> Vec<AudioDevice> {
    let default_name = default.and_then(|d| d.name().ok());
    devices
        .map(|device| {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            AudioDevice {
                id: name.clone(),
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                direction,
            }
        })
        .collect()
}

/// Microphones known to the default host.
pub fn list_devices() -> Result<Vec<AudioDevice>> {
    let host = cpal::default_host();
    Ok(describe(
        host.input_devices()?,
        host.default_input_device(),
        DeviceDirection::Input,
    ))
}

pub fn list_output_devices() -> Result<Vec<AudioDevice>> {
    let host = cpal::default_host();
    Ok(describe(
        host.output_devices()?,
        host.default_output_device(),
        DeviceDirection::Output,
    ))
}

pub fn get_default_device() -> Result<Option<AudioDevice>> {
    let host = cpal::default_host();
    Ok(host.default_input_device().map(|device| {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        AudioDevice {
            id: name.clone(),
            name,
            is_default: true,
            direction: DeviceDirection::Input,
        }
    }))
}

pub fn find_device_by_id(id: &str) -> Result<Option<AudioDevice>> {
    Ok(list_devices()?.into_iter().find(|d| d.id == id))
}

/// Input device by id, or the host default.
pub(crate) fn resolve_input(host: &cpal::Host, id: Option<&str>) -> Result<Device> {
    match id {
        Some(id) => host
            .input_devices()?
            .find(|d| d.name().ok().as_deref() == Some(id))
            .ok_or_else(|| AudioError::DeviceNotFound(id.to_string())),
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("default input".to_string())),
    }
}

pub(crate) fn resolve_output(host: &cpal::Host) -> Result<Device> {
    host.default_output_device()
        .ok_or_else(|| AudioError::DeviceNotFound("default output".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listed_devices_are_inputs() {
        // Hosts without audio hardware report an empty list, not an error.
        if let Ok(devices) = list_devices() {
            assert!(devices.iter().all(|d| d.direction == DeviceDirection::Input));
        }
    }

    #[test]
    fn test_unknown_device_is_not_found() {
        let host = cpal::default_host();
        let result = resolve_input(&host, Some("no-such-microphone-1234"));
        assert!(matches!(
            result,
            Err(AudioError::DeviceNotFound(_)) | Err(AudioError::Devices(_))
        ));
    }
}
