//! Decoded PCM segments and the buffer-queue listener boundary
//!
//! The decode side hands the mixer [`PcmSegment`]s through
//! [`crate::engine::SourceVoice::submit_buffer`]. Segments travel to the
//! render thread as `basedrop::Shared` pointers, so whichever side drops the
//! last reference only enqueues the allocation for the collector thread.

use crate::engine::error::{MixerError, MixerResult};
use crate::types::{Sample, SlotId, MAX_CHANNELS};

/// Scale applied to 16-bit PCM to reach the [-1, 1) float range
const I16_SCALE: f32 = 1.0 / 32768.0;

/// A block of decoded, interleaved audio
#[derive(Debug, Clone)]
pub struct PcmSegment {
    samples: Vec<Sample>,
    channels: usize,
    looping: bool,
    end_of_stream: bool,
}

impl PcmSegment {
    /// Wrap interleaved float samples
    pub fn new(samples: Vec<Sample>, channels: usize) -> MixerResult<Self> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(MixerError::UnsupportedChannelCount(channels));
        }
        if samples.len() % channels != 0 {
            return Err(MixerError::InvalidParameter {
                name: "pcm segment length",
                value: samples.len() as f32,
            });
        }
        Ok(Self {
            samples,
            channels,
            looping: false,
            end_of_stream: false,
        })
    }

    /// Convert interleaved signed 16-bit PCM
    pub fn from_i16(samples: &[i16], channels: usize) -> MixerResult<Self> {
        let converted = samples.iter().map(|&s| s as f32 * I16_SCALE).collect();
        Self::new(converted, channels)
    }

    /// Convert raw little-endian signed 16-bit PCM bytes
    pub fn from_le_bytes(bytes: &[u8], channels: usize) -> MixerResult<Self> {
        if bytes.len() % 2 != 0 {
            return Err(MixerError::InvalidParameter {
                name: "pcm byte length",
                value: bytes.len() as f32,
            });
        }
        // Zero-copy view when the buffer happens to be aligned on a little-endian host
        if cfg!(target_endian = "little") {
            if let Ok(samples) = bytemuck::try_cast_slice::<u8, i16>(bytes) {
                return Self::from_i16(samples, channels);
            }
        }
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::from_i16(&samples, channels)
    }

    /// Replay this segment from its start each time it is exhausted
    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Mark this as the last segment of a streaming source
    pub fn with_end_of_stream(mut self, end_of_stream: bool) -> Self {
        self.end_of_stream = end_of_stream;
        self
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    #[inline]
    pub fn is_looping(&self) -> bool {
        self.looping
    }

    #[inline]
    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// One interleaved frame
    #[inline]
    pub fn frame(&self, index: usize) -> &[Sample] {
        let start = index * self.channels;
        &self.samples[start..start + self.channels]
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }
}

/// Notifications from the mixer to the decode side of one voice
///
/// `on_source_buffer_end` and `on_loop` are called on the render thread and
/// must not block or allocate; typically they set a flag or push to a
/// lock-free queue the decoder polls. `on_release` is called on the control
/// thread when the voice is released.
pub trait BufferQueueListener: Send + Sync {
    /// A segment was fully consumed; more data is wanted
    fn on_source_buffer_end(&self, slot: SlotId);

    /// A looping segment wrapped back to its start
    fn on_loop(&self, _slot: SlotId) {}

    /// The voice was released and will not call back again
    fn on_release(&self, _slot: SlotId) {}
}
