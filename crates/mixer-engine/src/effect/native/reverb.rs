//! Stereo reverb for submix buses
//!
//! Parallel damped comb filters into series all-pass diffusers, one tank per
//! side with slightly longer delays on the right. The reverb always works in
//! stereo; on buses with any other channel count it asks for a stereo
//! down-mix and the submix up-mixes the result.

use crate::effect::{Effect, EffectBase, EffectInfo, ParamInfo, SubmixEffect};
use crate::types::{Sample, DEFAULT_SAMPLE_RATE};

/// Tuning is expressed at this rate and rescaled in `init`
const TUNING_RATE: f32 = 44100.0;

const COMB_TUNING: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNING: [usize; 4] = [556, 441, 341, 225];

/// Extra delay on every right-side line
const RIGHT_OFFSET: usize = 23;

const ALLPASS_FEEDBACK: f32 = 0.5;

/// Input attenuation ahead of the comb bank
const INPUT_GAIN: f32 = 0.2;

/// Feedback range the "Room Size" parameter sweeps
const MIN_FEEDBACK: f32 = 0.7;
const MAX_FEEDBACK: f32 = 0.98;

const PARAM_ROOM: usize = 0;
const PARAM_DAMPING: usize = 1;
const PARAM_WIDTH: usize = 2;
const PARAM_MIX: usize = 3;

/// Circular buffer shared by both filter kinds
struct Line {
    data: Vec<f32>,
    pos: usize,
}

impl Line {
    fn new(tuning: usize, sample_rate: u32) -> Self {
        let len = (tuning as f32 * sample_rate as f32 / TUNING_RATE) as usize;
        Self {
            data: vec![0.0; len.max(1)],
            pos: 0,
        }
    }

    /// Return the oldest sample and replace it with `value`
    #[inline]
    fn exchange(&mut self, value: f32) -> f32 {
        let out = std::mem::replace(&mut self.data[self.pos], value);
        self.pos += 1;
        if self.pos == self.data.len() {
            self.pos = 0;
        }
        out
    }

    #[inline]
    fn peek(&self) -> f32 {
        self.data[self.pos]
    }
}

struct Comb {
    line: Line,
    damped: f32,
}

/// One side's comb bank and diffuser chain
struct Tank {
    combs: Vec<Comb>,
    diffusers: Vec<Line>,
}

impl Tank {
    fn new(sample_rate: u32, offset: usize) -> Self {
        Self {
            combs: COMB_TUNING
                .iter()
                .map(|&t| Comb {
                    line: Line::new(t + offset, sample_rate),
                    damped: 0.0,
                })
                .collect(),
            diffusers: ALLPASS_TUNING
                .iter()
                .map(|&t| Line::new(t + offset, sample_rate))
                .collect(),
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damping: f32) -> f32 {
        let mut acc = 0.0;
        for comb in &mut self.combs {
            let delayed = comb.line.peek();
            comb.damped = delayed + (comb.damped - delayed) * damping;
            comb.line.exchange(input + comb.damped * feedback);
            acc += delayed;
        }
        for line in &mut self.diffusers {
            let delayed = line.peek();
            line.exchange(acc + delayed * ALLPASS_FEEDBACK);
            acc = delayed - acc;
        }
        acc
    }

    fn clear(&mut self) {
        for comb in &mut self.combs {
            comb.line.data.fill(0.0);
            comb.damped = 0.0;
        }
        for line in &mut self.diffusers {
            line.data.fill(0.0);
        }
    }
}

/// Stereo room reverb
///
/// | # | Parameter | Meaning                               |
/// |---|-----------|---------------------------------------|
/// | 0 | Room Size | decay length                          |
/// | 1 | Damping   | high-frequency loss in the tail       |
/// | 2 | Width     | 0 = mono tail, 1 = fully decorrelated |
/// | 3 | Mix       | 0 = dry only, 1 = wet only            |
pub struct ReverbEffect {
    base: EffectBase,
    left: Tank,
    right: Tank,
}

impl ReverbEffect {
    /// A reverb tuned for the default sample rate until `init` is called
    pub fn new() -> Self {
        let info = EffectInfo::new("Reverb", "Reverb")
            .with_param(ParamInfo::new("Room Size", 0.5))
            .with_param(ParamInfo::new("Damping", 0.5))
            .with_param(ParamInfo::new("Width", 1.0))
            .with_param(ParamInfo::new("Mix", 0.3).with_unit("%"));

        Self {
            base: EffectBase::new(info),
            left: Tank::new(DEFAULT_SAMPLE_RATE, 0),
            right: Tank::new(DEFAULT_SAMPLE_RATE, RIGHT_OFFSET),
        }
    }
}

impl Default for ReverbEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for ReverbEffect {
    fn base(&self) -> &EffectBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EffectBase {
        &mut self.base
    }

    fn init(&mut self, sample_rate: u32, _channels: usize) {
        self.left = Tank::new(sample_rate, 0);
        self.right = Tank::new(sample_rate, RIGHT_OFFSET);
    }

    fn reset(&mut self) {
        self.left.clear();
        self.right.clear();
    }
}

impl SubmixEffect for ReverbEffect {
    fn desired_channel_count(&self) -> Option<usize> {
        Some(2)
    }

    fn process_block(&mut self, input: &[Sample], output: &mut [Sample], channels: usize) {
        if channels != 2 {
            output.copy_from_slice(input);
            return;
        }

        let room = self.base.param_actual(PARAM_ROOM);
        let feedback = MIN_FEEDBACK + room * (MAX_FEEDBACK - MIN_FEEDBACK);
        let damping = self.base.param_actual(PARAM_DAMPING);
        let width = self.base.param_actual(PARAM_WIDTH);
        let wet = self.base.param_actual(PARAM_MIX);
        let dry = 1.0 - wet;

        let direct = wet * (1.0 + width) * 0.5;
        let cross = wet * (1.0 - width) * 0.5;

        for (src, dst) in input.chunks_exact(2).zip(output.chunks_exact_mut(2)) {
            let mono = (src[0] + src[1]) * 0.5 * INPUT_GAIN;
            let l = self.left.process(mono, feedback, damping);
            let r = self.right.process(mono, feedback, damping);
            dst[0] = src[0] * dry + l * direct + r * cross;
            dst[1] = src[1] * dry + r * direct + l * cross;
        }
    }
}
