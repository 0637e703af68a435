//! Headphone spatializer
//!
//! A lightweight binaural model for mono voices: an equal-power level
//! difference between the ears plus an interaural time delay on the far ear.
//! Azimuth comes from the voice's spatial parameters; a voice without a
//! position renders centred.

use crate::effect::plugin::{PluginContext, SpatializerPlugin};
use crate::types::{Sample, DEFAULT_SAMPLE_RATE};

/// Largest interaural delay, reached with the source fully to one side
const MAX_ITD_SECONDS: f32 = 0.00066;

struct Pan {
    left_gain: f32,
    right_gain: f32,
    delay: usize,
    left_is_far: bool,
}

pub struct PanningSpatializer {
    /// Recent mono input, for the delayed ear
    history: Vec<Sample>,
    write_pos: usize,
    max_delay: usize,
}

impl PanningSpatializer {
    pub fn new() -> Self {
        let mut spatializer = Self {
            history: Vec::new(),
            write_pos: 0,
            max_delay: 0,
        };
        spatializer.allocate(DEFAULT_SAMPLE_RATE);
        spatializer
    }

    fn allocate(&mut self, sample_rate: u32) {
        self.max_delay = (MAX_ITD_SECONDS * sample_rate as f32).round() as usize;
        self.history = vec![0.0; self.max_delay + 1];
        self.write_pos = 0;
    }

    /// Ear gains and far-ear delay for a source `azimuth` degrees clockwise
    fn pan(&self, azimuth: f32) -> Pan {
        // -1 hard left, +1 hard right
        let pan = azimuth.to_radians().sin();
        let angle = (pan + 1.0) * std::f32::consts::FRAC_PI_4;
        Pan {
            left_gain: angle.cos(),
            right_gain: angle.sin(),
            delay: (pan.abs() * self.max_delay as f32).round() as usize,
            left_is_far: pan >= 0.0,
        }
    }
}

impl Default for PanningSpatializer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpatializerPlugin for PanningSpatializer {
    fn init(&mut self, sample_rate: u32, _max_frames: usize) {
        self.allocate(sample_rate);
    }

    fn reset(&mut self) {
        self.history.fill(0.0);
        self.write_pos = 0;
    }

    fn process(&mut self, input: &[Sample], output: &mut [Sample], ctx: &PluginContext) {
        let azimuth = ctx.spatial.map_or(0.0, |params| params.azimuth);
        let pan = self.pan(azimuth);
        let len = self.history.len();

        for (frame, &sample) in output.chunks_exact_mut(2).zip(input.iter().take(ctx.frames)) {
            self.history[self.write_pos] = sample;
            let delayed = self.history[(self.write_pos + len - pan.delay) % len];
            self.write_pos = (self.write_pos + 1) % len;

            let (left, right) = if pan.left_is_far {
                (delayed, sample)
            } else {
                (sample, delayed)
            };
            frame[0] = left * pan.left_gain;
            frame[1] = right * pan.right_gain;
        }
    }
}
