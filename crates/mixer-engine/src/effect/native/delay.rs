//! Feedback delay effect
//!
//! A per-voice echo with:
//! - Delay time in ms
//! - Feedback control
//! - Dry/wet mix
//!
//! Its echoes keep ringing after the voice stops, which is what the mixer's
//! effect-tail tracking waits for before the slot is reusable.

use crate::effect::{Effect, EffectBase, EffectInfo, ParamInfo, SourceEffect};
use crate::types::{Sample, DEFAULT_SAMPLE_RATE};

/// Maximum delay time in seconds
const MAX_DELAY_SECONDS: f32 = 1.0;

/// One channel of delay memory
struct DelayLine {
    buffer: Vec<f32>,
}

impl DelayLine {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len],
        }
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
    }
}

/// Multichannel feedback delay
///
/// Parameters:
/// - Time: Delay time in ms (1-1000ms)
/// - Feedback: Amount of signal fed back (0-95%)
/// - Mix: Dry/wet balance (0% = dry, 100% = wet)
pub struct DelayEffect {
    base: EffectBase,
    lines: Vec<DelayLine>,
    /// Shared write position for every channel
    write_pos: usize,
    sample_rate: u32,
}

impl DelayEffect {
    /// Create a new delay effect
    pub fn new() -> Self {
        let info = EffectInfo::new("Delay", "Delay")
            .with_param(
                ParamInfo::new("Time", 0.25)
                    .with_range(1.0, 1000.0)
                    .with_unit("ms"),
            )
            .with_param(ParamInfo::new("Feedback", 0.4).with_range(0.0, 0.95))
            .with_param(ParamInfo::new("Mix", 0.3).with_range(0.0, 1.0));

        Self {
            base: EffectBase::new(info),
            lines: Vec::new(),
            write_pos: 0,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }

    fn delay_samples(&self) -> usize {
        let len = self.lines.first().map(|l| l.buffer.len()).unwrap_or(1);
        let samples = (self.base.param_actual(0) * 0.001 * self.sample_rate as f32) as usize;
        samples.clamp(1, len.saturating_sub(1).max(1))
    }
}

impl Default for DelayEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for DelayEffect {
    fn base(&self) -> &EffectBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EffectBase {
        &mut self.base
    }

    fn init(&mut self, sample_rate: u32, channels: usize) {
        self.sample_rate = sample_rate;
        let len = (sample_rate as f32 * MAX_DELAY_SECONDS) as usize + 1;
        self.lines = (0..channels).map(|_| DelayLine::new(len)).collect();
        self.write_pos = 0;
    }

    fn reset(&mut self) {
        for line in &mut self.lines {
            line.reset();
        }
        self.write_pos = 0;
    }
}

impl SourceEffect for DelayEffect {
    fn process_frame(&mut self, input: &[Sample], output: &mut [Sample]) {
        if self.lines.len() < input.len() {
            // Not initialised for this channel count
            output.copy_from_slice(input);
            return;
        }

        let delay = self.delay_samples();
        let feedback = self.base.param_actual(1);
        let wet = self.base.param_actual(2);
        let dry = 1.0 - wet;

        let len = self.lines[0].buffer.len();
        let read_pos = (self.write_pos + len - delay) % len;

        for (ch, (out, &sample)) in output.iter_mut().zip(input).enumerate() {
            let line = &mut self.lines[ch];
            let delayed = line.buffer[read_pos];
            line.buffer[self.write_pos] = sample + delayed * feedback;
            *out = sample * dry + delayed * wet;
        }

        self.write_pos = (self.write_pos + 1) % len;
    }
}
