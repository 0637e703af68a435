//! Audio device enumeration
//!
//! Output devices are listed across every host CPAL was built with, so the
//! configuration can name a device together with the host that owns it.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::Host;

use super::config::DeviceId;
use super::error::{AudioError, AudioResult};

/// Common sample rates reported for each device
const COMMON_SAMPLE_RATES: [u32; 6] = [44100, 48000, 88200, 96000, 176400, 192000];

fn host_by_name(name: &str) -> Option<Host> {
    cpal::available_hosts()
        .into_iter()
        .find(|id| id.name().eq_ignore_ascii_case(name))
        .and_then(|id| cpal::host_from_id(id).ok())
}

/// One output device as reported by its host
#[derive(Debug, Clone)]
pub struct AudioDevice {
    pub id: DeviceId,
    /// Default output of its host
    pub is_default: bool,
    /// Standard rates inside any of the device's supported ranges, ascending
    pub sample_rates: Vec<u32>,
    pub max_channels: u16,
}

impl std::fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} ch, {:?} Hz{})",
            self.id.display_label(),
            self.max_channels,
            self.sample_rates,
            if self.is_default { ", default" } else { "" }
        )
    }
}

/// Every output device of every host
///
/// Default devices come first, then devices are sorted by host and name.
pub fn output_devices() -> AudioResult<Vec<AudioDevice>> {
    let mut devices = Vec::new();

    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(host) => host,
            Err(e) => {
                log::debug!("Skipping host {}: {}", host_id.name(), e);
                continue;
            }
        };
        let host_label = host_id.name();
        let default_name = host.default_output_device().and_then(|d| d.name().ok());

        let iter = match host.output_devices() {
            Ok(iter) => iter,
            Err(e) => {
                log::debug!("Host {} did not list its devices: {}", host_id.name(), e);
                continue;
            }
        };

        for device in iter {
            let Ok(name) = device.name() else {
                continue;
            };
            let Ok(configs) = device.supported_output_configs() else {
                continue;
            };

            let mut sample_rates = Vec::new();
            let mut max_channels = 0u16;
            for config in configs {
                max_channels = max_channels.max(config.channels());
                for rate in COMMON_SAMPLE_RATES {
                    if (config.min_sample_rate().0..=config.max_sample_rate().0).contains(&rate)
                        && !sample_rates.contains(&rate)
                    {
                        sample_rates.push(rate);
                    }
                }
            }
            if max_channels == 0 {
                continue;
            }
            sample_rates.sort_unstable();

            devices.push(AudioDevice {
                is_default: default_name.as_ref() == Some(&name),
                id: DeviceId::with_host(&name, host_label),
                sample_rates,
                max_channels,
            });
        }
    }

    if devices.is_empty() {
        return Err(AudioError::NoDevices);
    }

    devices.sort_by(|a, b| {
        b.is_default
            .cmp(&a.is_default)
            .then_with(|| a.id.host.cmp(&b.id.host))
            .then_with(|| a.id.name.cmp(&b.id.name))
    });
    log::info!("Enumerated {} audio output devices", devices.len());
    Ok(devices)
}

/// Resolve a configured device id to a CPAL device
///
/// Uses the host named in the ID if there is one, otherwise searches every
/// host for a device with that name.
pub fn find_device(id: &DeviceId) -> AudioResult<cpal::Device> {
    if let Some(host) = id.host.as_deref().and_then(host_by_name) {
        return host
            .output_devices()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?
            .find(|d| d.name().ok().as_deref() == Some(id.name.as_str()))
            .ok_or_else(|| AudioError::DeviceNotFound(id.display_label()));
    }

    cpal::available_hosts()
        .into_iter()
        .filter_map(|host_id| cpal::host_from_id(host_id).ok())
        .filter_map(|host| host.output_devices().ok())
        .flatten()
        .find(|d| d.name().ok().as_deref() == Some(id.name.as_str()))
        .ok_or_else(|| AudioError::DeviceNotFound(id.display_label()))
}

/// The default output device of the default host
pub fn default_device() -> AudioResult<cpal::Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| AudioError::NoDefaultDevice(cpal::default_host().id().name().to_string()))
}

/// The configured device, or the default one
pub fn open_device(id: Option<&DeviceId>) -> AudioResult<cpal::Device> {
    match id {
        Some(id) => find_device(id),
        None => default_device(),
    }
}
