//! Hardware audio output
//!
//! Connects a [`MixerDevice`](crate::engine::MixerDevice) to a real output
//! device through CPAL.
//!
//! # Architecture
//!
//! - **Control thread**: owns the `MixerControl` and the [`OutputStream`]
//! - **Audio thread**: the device callback owns the `MixerDevice` exclusively
//!   and adapts the device's buffer size to the mixer's block size
//! - **Atomics**: stream state and per-voice status are read without locks
//!
//! # Example Usage
//!
//! ```ignore
//! use mixer_engine::audio::{start_mixer, AudioConfig};
//! use mixer_engine::config::MixerConfig;
//!
//! let (stream, mut control) = start_mixer(&MixerConfig::default(), &AudioConfig::default())?;
//! let mut voice = control.acquire()?;
//! voice.init(&mut control, SourceInitParams::new(2))?;
//! ```

mod backend;
mod config;
mod cpal_backend;
mod device;
mod error;

pub use backend::{
    start_mixer, OutputSampleFormat, OutputStream, SharedStreamState, StreamConfig, StreamState,
};
pub use config::{
    AudioConfig, BufferSize, DeviceId, SampleFormatPreference, MAX_BUFFER_SIZE, MIN_BUFFER_SIZE,
};
pub use device::{default_device, find_device, open_device, output_devices, AudioDevice};
pub use error::{AudioError, AudioResult};
