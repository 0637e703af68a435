//! Per-frame parameter ramps
//!
//! Every numeric source parameter changes over one block instead of jumping,
//! which keeps volume, pitch and filter changes click-free. The first target
//! a parameter receives after a reset is applied immediately so a recycled
//! slot never ramps from the previous voice's state.

use crate::spatial::ChannelMap;
use crate::types::lerp;

/// A scalar parameter ramped linearly toward its target
#[derive(Debug, Clone, Copy)]
pub struct SourceParam {
    start: f32,
    end: f32,
    current: f32,
    frame: u32,
    ramp_frames: u32,
    primed: bool,
}

impl SourceParam {
    /// Create a parameter holding `value`, ramping over `ramp_frames` frames
    pub fn new(value: f32, ramp_frames: u32) -> Self {
        let ramp_frames = ramp_frames.max(1);
        Self {
            start: value,
            end: value,
            current: value,
            frame: ramp_frames,
            ramp_frames,
            primed: false,
        }
    }

    /// Jump to `value` and forget any ramp; the next target applies immediately
    pub fn reset(&mut self, value: f32) {
        self.start = value;
        self.end = value;
        self.current = value;
        self.frame = self.ramp_frames;
        self.primed = false;
    }

    /// Set a new target
    ///
    /// The ramp restarts from the current value, so repeated targets within
    /// one tick collapse into a single ramp toward the last one.
    pub fn set_target(&mut self, value: f32) {
        if !self.primed {
            self.primed = true;
            self.start = value;
            self.end = value;
            self.current = value;
            self.frame = self.ramp_frames;
            return;
        }
        self.start = self.current;
        self.end = value;
        self.frame = 0;
    }

    /// Spread a ramp that has not started yet over the next `frames` frames
    ///
    /// Called at the top of every render pass so a target set between two
    /// blocks lands exactly on the last frame of the block that follows,
    /// whatever size that block is.
    #[inline]
    pub fn fit_ramp(&mut self, frames: usize) {
        if self.frame == 0 {
            self.ramp_frames = (frames as u32).max(1);
        }
    }

    /// Advance one frame and return the new value
    #[inline]
    pub fn update(&mut self) -> f32 {
        if self.frame < self.ramp_frames {
            self.frame += 1;
            self.current = if self.frame == self.ramp_frames {
                self.end
            } else {
                lerp(self.start, self.end, self.frame as f32 / self.ramp_frames as f32)
            };
        }
        self.current
    }

    /// Current value without advancing
    #[inline]
    pub fn value(&self) -> f32 {
        self.current
    }

    /// Value the ramp is heading toward
    #[inline]
    pub fn target(&self) -> f32 {
        self.end
    }

    #[inline]
    pub fn is_ramping(&self) -> bool {
        self.frame < self.ramp_frames
    }
}

/// A channel map interpolated from the previous map to a new one over a block
///
/// Gains at frame `f` of an `N`-frame block are `a * (1 - t) + b * t` with
/// `t = f / (N - 1)`, so the first frame uses the previous map exactly, the
/// last frame uses the new map exactly, and no intermediate gain leaves the
/// range spanned by the two.
#[derive(Debug, Clone, Copy)]
pub struct ChannelMapParam {
    previous: ChannelMap,
    current: ChannelMap,
    interpolating: bool,
    primed: bool,
}

impl ChannelMapParam {
    pub fn new(source_channels: usize, output_channels: usize) -> Self {
        let zeroed = ChannelMap::zeroed(source_channels, output_channels);
        Self {
            previous: zeroed,
            current: zeroed,
            interpolating: false,
            primed: false,
        }
    }

    /// Hold `map` without interpolation; the next target also applies immediately
    pub fn reset_to(&mut self, map: &ChannelMap) {
        self.previous = *map;
        self.current = *map;
        self.interpolating = false;
        self.primed = false;
    }

    /// Set the map the next block interpolates toward
    pub fn set_target(&mut self, map: &ChannelMap) {
        if !self.primed || map.as_slice().len() != self.current.as_slice().len() {
            self.primed = true;
            self.previous = *map;
            self.current = *map;
            self.interpolating = false;
            return;
        }
        if self.interpolating {
            // Retargeted before the previous block consumed the ramp
            self.current = *map;
        } else {
            self.previous = self.current;
            self.current = *map;
            self.interpolating = self.previous != self.current;
        }
    }

    /// Gain for one route at `frame` of a `block_frames`-frame block
    #[inline]
    pub fn gain(
        &self,
        source_channel: usize,
        output_channel: usize,
        frame: usize,
        block_frames: usize,
    ) -> f32 {
        let b = self.current.gain(source_channel, output_channel);
        if !self.interpolating {
            return b;
        }
        let a = self.previous.gain(source_channel, output_channel);
        let t = if block_frames > 1 {
            frame as f32 / (block_frames - 1) as f32
        } else {
            1.0
        };
        lerp(a, b, t)
    }

    /// Mark the block's interpolation as consumed
    #[inline]
    pub fn finish_block(&mut self) {
        self.previous = self.current;
        self.interpolating = false;
    }

    #[inline]
    pub fn is_interpolating(&self) -> bool {
        self.interpolating
    }

    /// The map in effect at the end of the block
    #[inline]
    pub fn target(&self) -> &ChannelMap {
        &self.current
    }

    #[inline]
    pub fn is_primed(&self) -> bool {
        self.primed
    }
}
