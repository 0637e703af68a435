//! Mixer Engine - real-time source mixing with submixes and spatial output
//!
//! The engine is split across two threads:
//!
//! - The **control thread** owns a [`MixerControl`](engine::MixerControl) and
//!   the [`SourceVoice`](engine::SourceVoice) handles. Every mutation is sent
//!   over a lock-free command ring; status comes back through per-slot atomics.
//! - The **render thread** owns the [`MixerDevice`](engine::MixerDevice) and
//!   calls `process_block` from the audio callback. Nothing on that path
//!   allocates, locks or frees.
//!
//! [`audio::start_mixer`] wires the two together with a CPAL output stream.

pub mod audio;
pub mod config;
pub mod effect;
pub mod engine;
pub mod spatial;
pub mod submix;
pub mod types;

pub use types::*;
