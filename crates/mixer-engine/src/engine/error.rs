//! Control API error types
//!
//! Every variant is a soft failure: the render thread keeps producing audio
//! and the caller decides whether to drop, retry or steal a voice.

use thiserror::Error;

use crate::types::{SlotId, SubmixId};

/// Errors returned by the control-side mixer API
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MixerError {
    /// Every source slot is in use
    #[error("Source pool exhausted ({capacity} slots in use)")]
    SourcePoolExhausted { capacity: usize },

    /// The control → render command queue has no free space
    #[error("Mixer command queue is full")]
    CommandQueueFull,

    /// Too many PCM segments are outstanding for a source
    #[error("Buffer queue full for {slot} ({max} segments outstanding)")]
    BufferQueueFull { slot: SlotId, max: usize },

    /// A parameter value is not finite or outside its domain
    #[error("Invalid value for {name}: {value}")]
    InvalidParameter { name: &'static str, value: f32 },

    /// A channel map does not match source × output channels
    #[error("Channel map has {actual} gains, expected {expected}")]
    ChannelMapSizeMismatch { expected: usize, actual: usize },

    /// A channel count outside 1..=MAX_CHANNELS
    #[error("Unsupported channel count: {0}")]
    UnsupportedChannelCount(usize),

    /// A spatializer plugin was attached to a multichannel source
    #[error("Spatializer plugins need a mono source, got {0} channels")]
    SpatializerNeedsMono(usize),

    /// The voice has not been initialised with `init`
    #[error("Source {0} has not been initialised")]
    SourceNotInitialized(SlotId),

    /// No submix with this id is registered
    #[error("Unknown submix: {0}")]
    UnknownSubmix(SubmixId),

    /// The submix arena has no free node
    #[error("Submix capacity exhausted ({0} nodes)")]
    SubmixCapacityExhausted(usize),

    /// The master submix cannot be removed or re-parented
    #[error("The master submix cannot be modified this way")]
    MasterSubmix,

    /// The requested parent change would create a cycle
    #[error("Attaching {child} under {parent} would create a cycle")]
    SubmixCycle { child: SubmixId, parent: SubmixId },

    /// Every ambisonics stream id is in use
    #[error("No free ambisonics stream ({0} streams in use)")]
    NoFreeAmbisonicsStream(usize),

    /// A configuration value is outside the range the mixer supports
    #[error("Invalid mixer configuration: {0}")]
    InvalidConfig(String),

    /// The deferred-drop collector thread could not be started
    #[error("Failed to start collector thread: {0}")]
    CollectorThread(String),
}

/// Result type for control API operations
pub type MixerResult<T> = Result<T, MixerError>;
