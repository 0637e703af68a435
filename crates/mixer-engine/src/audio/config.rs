//! Audio backend configuration
//!
//! Device selection, buffer size and sample format for the hardware stream.
//! The mixer's own sizing lives in [`crate::config::MixerConfig`].

use serde::{Deserialize, Serialize};

/// Largest hardware buffer we ask the device for (frames)
pub const MAX_BUFFER_SIZE: u32 = 8192;

/// Smallest hardware buffer we ask the device for (frames)
pub const MIN_BUFFER_SIZE: u32 = 64;

/// Preferred buffer size for the output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BufferSize {
    /// Let the host choose
    #[default]
    Default,
    /// Request a specific buffer size in frames (clamped to 64..=8192)
    Fixed(u32),
    /// Match the mixer's block size, so each callback renders exactly one block
    MixerBlock,
}

impl BufferSize {
    /// Buffer size to request from the device, or `None` for the host default
    pub fn as_frames(&self, block_frames: usize) -> Option<u32> {
        match self {
            BufferSize::Default => None,
            BufferSize::Fixed(frames) => Some((*frames).clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE)),
            BufferSize::MixerBlock => {
                Some((block_frames as u32).clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE))
            }
        }
    }

    /// Latency of one buffer in milliseconds, if the size is known
    pub fn latency_ms(&self, block_frames: usize, sample_rate: u32) -> Option<f32> {
        self.as_frames(block_frames)
            .map(|frames| (frames as f32 / sample_rate as f32) * 1000.0)
    }
}

/// Device sample format to open the stream with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleFormatPreference {
    /// 32-bit float if the device offers it, otherwise 16-bit integer
    #[default]
    Auto,
    F32,
    I16,
}

/// A device name, optionally pinned to the CPAL host that owns it
///
/// The same physical output often shows up under several hosts ("Alsa",
/// "Jack", ...); naming the host picks one of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    pub name: String,
    /// Host name as CPAL spells it; every host is searched when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
        }
    }

    pub fn with_host(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            host: Some(host.to_string()),
        }
    }

    /// Label including the host, e.g. `[ALSA] hw:0,0`
    pub fn display_label(&self) -> String {
        match &self.host {
            Some(host) => format!("[{}] {}", host, self.name),
            None => self.name.clone(),
        }
    }
}

/// Configuration for the hardware output stream
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device (None = system default)
    /// Default: None
    pub device: Option<DeviceId>,

    /// Preferred hardware buffer size
    /// Default: Default (host chooses)
    pub buffer_size: BufferSize,

    /// Preferred device sample format
    /// Default: Auto
    pub sample_format: SampleFormatPreference,
}

impl AudioConfig {
    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_buffer_size(mut self, size: BufferSize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_sample_format(mut self, format: SampleFormatPreference) -> Self {
        self.sample_format = format;
        self
    }
}
