//! Mixer engine configuration
//!
//! Sizes every fixed pool the render thread works with. All of these are read
//! once when the device is created; nothing here can change while it runs.

use serde::{Deserialize, Serialize};

use crate::engine::error::{MixerError, MixerResult};
use crate::types::{DEFAULT_BLOCK_FRAMES, DEFAULT_SAMPLE_RATE, MAX_CHANNELS};

/// Envelope level below which an effect tail is considered silent (-96 dB)
pub const DEFAULT_TAIL_THRESHOLD: f32 = 1.58489e-5;

/// Largest block the mixer renders in one pass
pub const MAX_BLOCK_FRAMES: usize = 8192;

/// Configuration of the mixing engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Output sample rate in Hz
    /// Default: 48000
    pub sample_rate: u32,

    /// Frames rendered per tick; hardware callbacks of other sizes are adapted
    /// Default: 512
    pub block_frames: usize,

    /// Output channel count at start-up (1-8)
    /// Default: 2
    pub output_channels: usize,

    /// Size of the source slot pool
    /// Default: 128
    pub max_sources: usize,

    /// PCM segments that may be outstanding per source
    /// Default: 64
    pub max_queued_buffers: usize,

    /// Submixes that can be registered besides the master
    /// Default: 32
    pub max_submixes: usize,

    /// Ambisonics stream ids available to ambisonic submixes
    /// Default: 4
    pub max_ambisonics_streams: usize,

    /// Worker threads for rendering sources; 0 or 1 renders on the audio thread
    /// Default: 0
    pub worker_threads: usize,

    /// Capacity of the control → render command ring
    /// Default: 4096
    pub command_queue_capacity: usize,

    /// Envelope level below which effect tails count as finished
    /// Default: 1.58489e-5 (-96 dB)
    pub effect_tail_threshold: f32,

    /// Time for the tail envelope to fall by 60 dB once the signal stops
    /// Default: 250 ms
    pub envelope_release_ms: f32,

    /// Exponent of the omni blend curve inside an emitter's omni radius
    /// Default: 1.0 (linear)
    pub omni_blend_exponent: f32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_frames: DEFAULT_BLOCK_FRAMES,
            output_channels: 2,
            max_sources: 128,
            max_queued_buffers: 64,
            max_submixes: 32,
            max_ambisonics_streams: 4,
            worker_threads: 0,
            command_queue_capacity: 4096,
            effect_tail_threshold: DEFAULT_TAIL_THRESHOLD,
            envelope_release_ms: 250.0,
            omni_blend_exponent: 1.0,
        }
    }
}

impl MixerConfig {
    /// Check every value is in the range the engine supports
    pub fn validate(&self) -> MixerResult<()> {
        fn invalid(msg: String) -> MixerResult<()> {
            Err(MixerError::InvalidConfig(msg))
        }

        if self.sample_rate == 0 {
            return invalid("sample_rate must be positive".into());
        }
        if self.block_frames == 0 || self.block_frames > MAX_BLOCK_FRAMES {
            return invalid(format!("block_frames must be in 1..={}", MAX_BLOCK_FRAMES));
        }
        if self.output_channels == 0 || self.output_channels > MAX_CHANNELS {
            return Err(MixerError::UnsupportedChannelCount(self.output_channels));
        }
        if self.max_sources == 0 {
            return invalid("max_sources must be positive".into());
        }
        if self.max_queued_buffers == 0 {
            return invalid("max_queued_buffers must be positive".into());
        }
        if self.command_queue_capacity == 0 {
            return invalid("command_queue_capacity must be positive".into());
        }
        if !(self.effect_tail_threshold.is_finite() && self.effect_tail_threshold >= 0.0) {
            return invalid(format!("effect_tail_threshold {}", self.effect_tail_threshold));
        }
        if !(self.envelope_release_ms.is_finite() && self.envelope_release_ms >= 0.0) {
            return invalid(format!("envelope_release_ms {}", self.envelope_release_ms));
        }
        if !(self.omni_blend_exponent.is_finite() && self.omni_blend_exponent > 0.0) {
            return invalid(format!("omni_blend_exponent {}", self.omni_blend_exponent));
        }
        Ok(())
    }

    /// Per-block multiplier of the tail envelope follower
    ///
    /// Falls by 60 dB over `envelope_release_ms`; zero releases instantly.
    pub fn envelope_release_coefficient(&self) -> f32 {
        let release_blocks =
            self.envelope_release_ms / 1000.0 * self.sample_rate as f32 / self.block_frames as f32;
        if release_blocks <= 0.0 {
            return 0.0;
        }
        // 10^(-60/20) = 0.001 after `release_blocks` blocks
        0.001f32.powf(1.0 / release_blocks)
    }

    /// Block duration in milliseconds
    pub fn block_duration_ms(&self) -> f32 {
        self.block_frames as f32 / self.sample_rate as f32 * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(MixerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = MixerConfig {
            output_channels: 9,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(MixerError::UnsupportedChannelCount(9)));

        let config = MixerConfig {
            block_frames: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(MixerError::InvalidConfig(_))));

        let config = MixerConfig {
            effect_tail_threshold: f32::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_envelope_release_coefficient() {
        let config = MixerConfig::default();
        let coef = config.envelope_release_coefficient();
        assert!(coef > 0.0 && coef < 1.0);

        // After the release time the envelope sits 60 dB down
        let blocks = (0.25 * 48000.0 / 512.0) as i32;
        let level = coef.powi(blocks);
        assert!((level - 0.001).abs() < 0.0005);

        let instant = MixerConfig {
            envelope_release_ms: 0.0,
            ..Default::default()
        };
        assert_eq!(instant.envelope_release_coefficient(), 0.0);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: MixerConfig =
            serde_yaml::from_str("max_sources: 16\noutput_channels: 6\n").unwrap();
        assert_eq!(config.max_sources, 16);
        assert_eq!(config.output_channels, 6);
        assert_eq!(config.block_frames, DEFAULT_BLOCK_FRAMES);
    }
}
