//! Per-voice trim stage

use crate::effect::{Effect, EffectBase, EffectInfo, ParamInfo, SourceEffect};
use crate::types::Sample;

/// Linear gain applied to every channel of a voice
///
/// One parameter, "Trim", mapped to a factor in `0.0..=2.0`. The default of
/// 0.5 normalised is unity.
pub struct GainEffect {
    base: EffectBase,
}

impl GainEffect {
    pub fn new() -> Self {
        let info = EffectInfo::new("Trim", "Utility")
            .with_param(ParamInfo::new("Trim", 0.5).with_range(0.0, 2.0).with_unit("x"));
        Self {
            base: EffectBase::new(info),
        }
    }
}

impl Default for GainEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for GainEffect {
    fn base(&self) -> &EffectBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EffectBase {
        &mut self.base
    }

    fn init(&mut self, _sample_rate: u32, _channels: usize) {}

    fn reset(&mut self) {}
}

impl SourceEffect for GainEffect {
    #[inline]
    fn process_frame(&mut self, input: &[Sample], output: &mut [Sample]) {
        let factor = self.base.param_actual(0);
        output
            .iter_mut()
            .zip(input)
            .for_each(|(out, &sample)| *out = sample * factor);
    }
}
