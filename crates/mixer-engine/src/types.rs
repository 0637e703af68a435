//! Common types for the mixer engine
//!
//! This module contains the fundamental identifiers and buffer types shared by
//! the source manager, the submix graph and the hardware backend.

use std::fmt;

/// Default sample rate used when the device does not dictate one (48kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default number of frames rendered per tick
pub const DEFAULT_BLOCK_FRAMES: usize = 512;

/// Maximum number of channels for a source, a submix or the device
pub const MAX_CHANNELS: usize = 8;

/// Maximum number of entries in a channel map (source channels × output channels)
pub const MAX_CHANNEL_MAP: usize = MAX_CHANNELS * MAX_CHANNELS;

/// Channel count of a first-order ambisonics stream (W, Y, Z, X)
pub const AMBISONICS_CHANNELS: usize = 4;

/// Audio sample type (32-bit float for processing, ingested from 16-bit PCM or float)
pub type Sample = f32;

/// Linear interpolation between `a` and `b`
#[inline]
pub fn lerp(a: Sample, b: Sample, t: Sample) -> Sample {
    a * (1.0 - t) + b * t
}

/// Index of a source slot in the fixed-size slot pool
///
/// Slot ids are only handed out by [`crate::engine::MixerControl::acquire`]
/// and never outlive the pool they index into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub(crate) usize);

impl SlotId {
    /// Position of the slot in the pool
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

/// Identifier of a submix node, an index into the graph arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubmixId(pub(crate) usize);

impl SubmixId {
    /// The root of every submix graph, created with the device
    pub const MASTER: SubmixId = SubmixId(0);

    /// Position of the node in the graph arena
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }

    /// Whether this is the master submix
    #[inline]
    pub fn is_master(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SubmixId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_master() {
            write!(f, "submix#master")
        } else {
            write!(f, "submix#{}", self.0)
        }
    }
}

/// Pre-allocated interleaved multichannel buffer
///
/// The storage is sized once for the largest block and channel count the
/// buffer will ever hold. [`InterleavedBuffer::set_format`] then changes the
/// working frame/channel count without allocating, which makes it usable
/// from the audio callback.
#[derive(Debug, Clone)]
pub struct InterleavedBuffer {
    samples: Vec<Sample>,
    frames: usize,
    channels: usize,
}

impl InterleavedBuffer {
    /// Create a silent buffer able to hold `max_frames × max_channels` samples
    pub fn with_capacity(max_frames: usize, max_channels: usize) -> Self {
        let capacity = max_frames * max_channels;
        let mut samples = Vec::with_capacity(capacity);
        samples.resize(max_frames * max_channels, 0.0);
        Self {
            samples,
            frames: max_frames,
            channels: max_channels,
        }
    }

    /// Set the working format (real-time safe when within capacity)
    ///
    /// The visible region is cleared to silence.
    #[inline]
    pub fn set_format(&mut self, frames: usize, channels: usize) {
        let len = frames * channels;
        debug_assert!(
            len <= self.samples.capacity(),
            "set_format called with {} samples, capacity {}",
            len,
            self.samples.capacity()
        );
        self.samples.truncate(len);
        self.samples.resize(len, 0.0);
        self.samples.fill(0.0);
        self.frames = frames;
        self.channels = channels;
    }

    /// Number of frames in the working format
    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Number of channels in the working format
    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Fill the buffer with silence
    #[inline]
    pub fn fill_silence(&mut self) {
        self.samples.fill(0.0);
    }

    #[inline]
    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [Sample] {
        &mut self.samples
    }

    /// One interleaved frame
    #[inline]
    pub fn frame(&self, index: usize) -> &[Sample] {
        let start = index * self.channels;
        &self.samples[start..start + self.channels]
    }

    /// One interleaved frame, mutable
    #[inline]
    pub fn frame_mut(&mut self, index: usize) -> &mut [Sample] {
        let start = index * self.channels;
        &mut self.samples[start..start + self.channels]
    }

    /// Accumulate `other * gain` into this buffer (lengths must match)
    pub fn mix_from(&mut self, other: &[Sample], gain: Sample) {
        debug_assert_eq!(self.samples.len(), other.len(), "Buffer lengths must match");
        for (dst, src) in self.samples.iter_mut().zip(other.iter()) {
            *dst += *src * gain;
        }
    }

    /// Copy samples from a slice of identical length
    pub fn copy_from(&mut self, other: &[Sample]) {
        self.samples.copy_from_slice(other);
    }

    /// Scale all samples by a factor
    pub fn scale(&mut self, factor: Sample) {
        for sample in &mut self.samples {
            *sample *= factor;
        }
    }

    /// Peak absolute sample value
    pub fn peak(&self) -> Sample {
        self.samples.iter().fold(0.0, |acc, s| acc.max(s.abs()))
    }
}

impl Default for InterleavedBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_BLOCK_FRAMES, 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_format_keeps_capacity() {
        let mut buffer = InterleavedBuffer::with_capacity(256, MAX_CHANNELS);
        let capacity = buffer.as_slice().len();

        buffer.set_format(64, 2);
        assert_eq!(buffer.frames(), 64);
        assert_eq!(buffer.channels(), 2);
        assert_eq!(buffer.as_slice().len(), 128);

        buffer.set_format(256, MAX_CHANNELS);
        assert_eq!(buffer.as_slice().len(), capacity);
        assert!(buffer.as_slice().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_frame_access() {
        let mut buffer = InterleavedBuffer::with_capacity(4, 2);
        buffer.frame_mut(1).copy_from_slice(&[0.25, -0.5]);

        assert_eq!(buffer.frame(1), &[0.25, -0.5]);
        assert_eq!(buffer.as_slice()[2], 0.25);
        assert_eq!(buffer.peak(), 0.5);
    }

    #[test]
    fn test_mix_from() {
        let mut buffer = InterleavedBuffer::with_capacity(2, 1);
        buffer.copy_from(&[1.0, 1.0]);
        buffer.mix_from(&[0.5, -1.0], 0.5);

        assert_eq!(buffer.as_slice(), &[1.25, 0.5]);
    }

    #[test]
    fn test_ids() {
        assert!(SubmixId::MASTER.is_master());
        assert_eq!(SlotId(3).index(), 3);
        assert_eq!(format!("{}", SubmixId(2)), "submix#2");
    }

    #[test]
    fn test_lerp() {
        assert_eq!(lerp(1.0, 3.0, 0.0), 1.0);
        assert_eq!(lerp(1.0, 3.0, 1.0), 3.0);
        assert_eq!(lerp(1.0, 3.0, 0.5), 2.0);
    }
}
