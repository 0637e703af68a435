//! Errors raised while finding a device or running its stream

use thiserror::Error;

use crate::engine::MixerError;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("no audio output devices available")]
    NoDevices,

    #[error("no default output device: {0}")]
    NoDefaultDevice(String),

    /// Carries the device's display label
    #[error("output device {0} not found")]
    DeviceNotFound(String),

    /// The host refused to report or accept a configuration
    #[error("device configuration: {0}")]
    ConfigError(String),

    #[error("could not build output stream: {0}")]
    StreamBuildError(String),

    #[error("could not start output stream: {0}")]
    StreamPlayError(String),

    #[error("could not stop output stream: {0}")]
    StreamPauseError(String),

    /// The device only offers sample formats the mixer can't write
    #[error("unsupported device sample format: {0}")]
    UnsupportedFormat(String),

    #[error("cannot {action} a stream that is {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },

    #[error(transparent)]
    Mixer(#[from] MixerError),
}

pub type AudioResult<T> = Result<T, AudioError>;
