//! Hardware output boundary
//!
//! An [`OutputStream`] owns the device stream and, through its callback, the
//! [`MixerDevice`]. The control side keeps the matching [`MixerControl`] and
//! observes the stream through [`StreamState`], which the backend publishes
//! in an atomic so a device error shows up as a state transition rather than
//! a panic on the audio thread.
//!
//! ```text
//!   open() ──► Open ──start()──► Running ──stop()──► Stopping ──► Stopped
//!                                   │                                │
//!                                   └──────── device error ──► Error ◄┘
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use super::config::AudioConfig;
use super::cpal_backend::{self, CpalOutput};
use super::error::{AudioError, AudioResult};
use crate::config::MixerConfig;
use crate::engine::{MixerControl, MixerDevice};

/// Lifecycle of an output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    /// Built, callback not running yet
    Open = 0,
    /// The device is pulling audio
    Running = 1,
    /// Stop requested
    Stopping = 2,
    /// Paused; can be started again
    Stopped = 3,
    /// The device reported an error; the stream must be reopened
    Error = 4,
}

impl StreamState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StreamState::Open,
            1 => StreamState::Running,
            2 => StreamState::Stopping,
            3 => StreamState::Stopped,
            _ => StreamState::Error,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamState::Open => "open",
            StreamState::Running => "running",
            StreamState::Stopping => "stopping",
            StreamState::Stopped => "stopped",
            StreamState::Error => "in error",
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stream state shared between the control side and the device's error callback
#[derive(Debug)]
pub struct SharedStreamState(AtomicU8);

impl SharedStreamState {
    pub fn new(state: StreamState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub fn get(&self) -> StreamState {
        StreamState::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set(&self, state: StreamState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move from `from` to `to`; false if the state was no longer `from`
    ///
    /// Lifecycle changes go through here so they never overwrite an error
    /// the device callback published in the meantime.
    #[inline]
    pub fn transition(&self, from: StreamState, to: StreamState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Enter the error state; only reopening the stream leaves it
    #[inline]
    pub fn fail(&self) {
        self.set(StreamState::Error);
    }
}

/// Sample format of the device stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSampleFormat {
    F32,
    I16,
}

/// Negotiated format of an output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub sample_rate: u32,
    /// Mixer block size; the callback adapts hardware buffers to it
    pub block_frames: usize,
    /// Device channel count
    pub channels: usize,
    pub sample_format: OutputSampleFormat,
    /// Hardware buffer size, if fixed
    pub buffer_frames: Option<u32>,
}

impl StreamConfig {
    /// Output latency of one hardware buffer (or one mixer block) in milliseconds
    pub fn latency_ms(&self) -> f32 {
        let frames = self
            .buffer_frames
            .map_or(self.block_frames, |frames| frames as usize);
        frames as f32 / self.sample_rate as f32 * 1000.0
    }
}

/// A running (or runnable) hardware output stream
///
/// Dropping it closes the device.
pub struct OutputStream {
    inner: CpalOutput,
    state: Arc<SharedStreamState>,
    config: StreamConfig,
}

impl OutputStream {
    /// Open the configured device and hand `mixer` to its callback
    ///
    /// The mixer must have been created for `config`'s sample rate and
    /// channel count; use [`start_mixer`] to negotiate both.
    pub fn open(
        audio: &AudioConfig,
        config: StreamConfig,
        mixer: MixerDevice,
    ) -> AudioResult<Self> {
        let state = Arc::new(SharedStreamState::new(StreamState::Open));
        let inner = cpal_backend::open(audio, &config, mixer, state.clone())?;
        log::info!(
            "Output stream open: {} Hz, {} ch, {:?}, ~{:.1} ms",
            config.sample_rate,
            config.channels,
            config.sample_format,
            config.latency_ms()
        );
        Ok(Self { inner, state, config })
    }

    #[inline]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    #[inline]
    pub fn state(&self) -> StreamState {
        self.state.get()
    }

    /// Start (or resume) pulling audio
    pub fn start(&mut self) -> AudioResult<()> {
        let from = match self.state() {
            state @ (StreamState::Open | StreamState::Stopped) => state,
            StreamState::Running => return Ok(()),
            state => {
                return Err(AudioError::InvalidState {
                    action: "start",
                    state: state.as_str(),
                })
            }
        };
        if let Err(e) = self.inner.play() {
            self.state.fail();
            return Err(e);
        }
        self.enter(from, StreamState::Running, "start")?;
        log::info!("Output stream started");
        Ok(())
    }

    /// Pause the device; the mixer keeps its state
    pub fn stop(&mut self) -> AudioResult<()> {
        match self.state() {
            StreamState::Running => {}
            StreamState::Open | StreamState::Stopped => return Ok(()),
            state => {
                return Err(AudioError::InvalidState {
                    action: "stop",
                    state: state.as_str(),
                })
            }
        }
        self.enter(StreamState::Running, StreamState::Stopping, "stop")?;
        if let Err(e) = self.inner.pause() {
            self.state.fail();
            return Err(e);
        }
        self.enter(StreamState::Stopping, StreamState::Stopped, "stop")?;
        log::info!("Output stream stopped");
        Ok(())
    }

    fn enter(&self, from: StreamState, to: StreamState, action: &'static str) -> AudioResult<()> {
        if self.state.transition(from, to) {
            return Ok(());
        }
        let state = self.state();
        log::warn!("Output stream is {} after {}, not {}", state, action, to);
        Err(AudioError::InvalidState {
            action,
            state: state.as_str(),
        })
    }

    /// Stop and release the device
    pub fn close(mut self) {
        if self.state() == StreamState::Running {
            if let Err(e) = self.stop() {
                log::warn!("Failed to stop output stream while closing: {}", e);
            }
        }
        log::info!("Output stream closed");
    }
}

/// Open a device, create a mixer matching its format and start the stream
///
/// The device's sample rate and channel count override the ones in
/// `mixer_config` when the device can't provide them.
pub fn start_mixer(
    mixer_config: &MixerConfig,
    audio: &AudioConfig,
) -> AudioResult<(OutputStream, MixerControl)> {
    let stream_config = cpal_backend::negotiate(audio, mixer_config)?;

    let config = MixerConfig {
        sample_rate: stream_config.sample_rate,
        output_channels: stream_config.channels.min(crate::types::MAX_CHANNELS),
        ..mixer_config.clone()
    };
    let (device, control) = MixerDevice::new(config)?;

    let mut stream = OutputStream::open(audio, stream_config, device)?;
    stream.start()?;
    Ok((stream, control))
}
