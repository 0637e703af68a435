//! Effect system - traits, chains, and parameter metadata
//!
//! Two kinds of effect plug into the mixer:
//! - [`SourceEffect`]s run per voice, one interleaved frame at a time, after
//!   the voice's low-pass filter and volume.
//! - [`SubmixEffect`]s run per submix on a whole block and may ask the submix
//!   for a down-mixed view of its input (e.g. a stereo reverb on a 5.1 bus).
//!
//! Both share the [`Effect`] base trait: normalised (0.0-1.0) parameters,
//! bypass, and an `init` call made on the control thread before the effect
//! is handed to the render thread. `init` is the place to allocate delay
//! lines; the process methods must not allocate.
//!
//! Voices may also carry [`plugin`]s (occlusion, reverb send, spatializer)
//! that run on whole blocks after the source effect chain.

pub mod native;
pub mod plugin;

pub use plugin::{
    OcclusionPlugin, PluginContext, ReverbSendPlugin, SourcePlugins, SpatializerPlugin,
};

use crate::types::{Sample, MAX_CHANNELS};

/// Static description of one effect parameter
///
/// Callers always set parameters in normalised units; `min..max` is the range
/// the effect itself works in.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamInfo {
    pub name: String,
    /// Normalised value the parameter starts at
    pub default: f32,
    pub min: f32,
    pub max: f32,
    /// Display suffix such as "ms" or "dB"; empty when unitless
    pub unit: String,
}

impl ParamInfo {
    /// A unitless parameter over `0.0..=1.0`
    pub fn new(name: impl Into<String>, default: f32) -> Self {
        Self {
            name: name.into(),
            default: default.clamp(0.0, 1.0),
            min: 0.0,
            max: 1.0,
            unit: String::new(),
        }
    }

    pub fn with_range(self, min: f32, max: f32) -> Self {
        Self { min, max, ..self }
    }

    pub fn with_unit(self, unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            ..self
        }
    }

    /// Map a normalised value into `min..=max`
    #[inline]
    pub fn denormalize(&self, normalized: f32) -> f32 {
        self.min + normalized.clamp(0.0, 1.0) * (self.max - self.min)
    }
}

/// A parameter's current setting in both unit systems
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamValue {
    pub normalized: f32,
    pub actual: f32,
}

impl ParamValue {
    /// Clamp `normalized` to `0..=1` and resolve it against `info`
    pub fn from_normalized(normalized: f32, info: &ParamInfo) -> Self {
        let normalized = normalized.clamp(0.0, 1.0);
        Self {
            normalized,
            actual: info.denormalize(normalized),
        }
    }
}

/// Name, category and parameter table of an effect
#[derive(Debug, Clone, PartialEq)]
pub struct EffectInfo {
    pub name: String,
    /// Grouping label ("Dynamics", "Delay", "Reverb", ...)
    pub category: String,
    pub params: Vec<ParamInfo>,
}

impl EffectInfo {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            params: Vec::new(),
        }
    }

    /// Append a parameter; its index is the order of `with_param` calls
    pub fn with_param(mut self, param: ParamInfo) -> Self {
        self.params.push(param);
        self
    }

    #[inline]
    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}

/// Behaviour shared by every effect
///
/// Implementors only supply their [`EffectBase`] plus the DSP hooks; the
/// parameter and bypass plumbing is provided.
pub trait Effect: Send {
    fn base(&self) -> &EffectBase;

    fn base_mut(&mut self) -> &mut EffectBase;

    /// Prepare for processing at `sample_rate` with `channels` interleaved channels
    ///
    /// Called on the control thread; may allocate.
    fn init(&mut self, sample_rate: u32, channels: usize);

    /// Clear internal state (delay lines, filter memory)
    fn reset(&mut self);

    fn info(&self) -> &EffectInfo {
        self.base().info()
    }

    fn get_params(&self) -> &[ParamValue] {
        self.base().get_params()
    }

    /// Set parameter `index` to a normalised value
    fn set_param(&mut self, index: usize, value: f32) {
        self.base_mut().set_param(index, value);
    }

    fn set_bypass(&mut self, bypass: bool) {
        self.base_mut().set_bypass(bypass);
    }

    fn is_bypassed(&self) -> bool {
        self.base().is_bypassed()
    }
}

/// A per-voice effect processing one interleaved frame at a time
pub trait SourceEffect: Effect {
    /// Process one frame; `input` and `output` have the voice's channel count
    fn process_frame(&mut self, input: &[Sample], output: &mut [Sample]);
}

/// A per-submix effect processing a whole block
pub trait SubmixEffect: Effect {
    /// Channel count this effect wants to see, if different from the submix's
    fn desired_channel_count(&self) -> Option<usize> {
        None
    }

    /// Process an interleaved block of `channels` channels
    fn process_block(&mut self, input: &[Sample], output: &mut [Sample], channels: usize);
}

/// Parameter table and bypass flag every native effect embeds
///
/// Effects forward the parameter half of the [`Effect`] trait here and read
/// resolved values with [`EffectBase::param_actual`].
#[derive(Debug, Clone)]
pub struct EffectBase {
    info: EffectInfo,
    values: Vec<ParamValue>,
    bypassed: bool,
}

impl EffectBase {
    pub fn new(info: EffectInfo) -> Self {
        let values = info
            .params
            .iter()
            .map(|param| ParamValue::from_normalized(param.default, param))
            .collect();
        Self {
            info,
            values,
            bypassed: false,
        }
    }

    #[inline]
    pub fn info(&self) -> &EffectInfo {
        &self.info
    }

    #[inline]
    pub fn get_params(&self) -> &[ParamValue] {
        &self.values
    }

    /// Store a normalised value; indices past the table are ignored
    pub fn set_param(&mut self, index: usize, value: f32) {
        if let (Some(slot), Some(param)) =
            (self.values.get_mut(index), self.info.params.get(index))
        {
            *slot = ParamValue::from_normalized(value, param);
        }
    }

    /// Resolved value of parameter `index`, or 0.0 if there is none
    #[inline]
    pub fn param_actual(&self, index: usize) -> f32 {
        self.values.get(index).map_or(0.0, |v| v.actual)
    }

    #[inline]
    pub fn set_bypass(&mut self, bypass: bool) {
        self.bypassed = bypass;
    }

    #[inline]
    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }
}

/// Ordered per-voice effect chain
///
/// Each effect's output frame becomes the next effect's input. Bypassed
/// effects are skipped entirely.
#[derive(Default)]
pub struct SourceEffectChain {
    effects: Vec<Box<dyn SourceEffect>>,
}

impl SourceEffectChain {
    pub fn new(effects: Vec<Box<dyn SourceEffect>>) -> Self {
        Self { effects }
    }

    /// Initialise every effect for the voice format (control thread)
    pub fn init(&mut self, sample_rate: u32, channels: usize) {
        for effect in &mut self.effects {
            effect.init(sample_rate, channels);
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    /// Run the chain over one frame in place
    #[inline]
    pub fn process_frame(&mut self, frame: &mut [Sample]) {
        let channels = frame.len();
        let mut scratch = [0.0; MAX_CHANNELS];
        for effect in &mut self.effects {
            if effect.is_bypassed() {
                continue;
            }
            effect.process_frame(frame, &mut scratch[..channels]);
            frame.copy_from_slice(&scratch[..channels]);
        }
    }

    pub fn set_param(&mut self, effect: usize, param: usize, value: f32) {
        if let Some(effect) = self.effects.get_mut(effect) {
            effect.set_param(param, value);
        }
    }

    pub fn set_bypass(&mut self, effect: usize, bypass: bool) {
        if let Some(effect) = self.effects.get_mut(effect) {
            effect.set_bypass(bypass);
        }
    }

    pub fn reset(&mut self) {
        for effect in &mut self.effects {
            effect.reset();
        }
    }
}

/// Ordered per-submix effect chain
#[derive(Default)]
pub struct SubmixEffectChain {
    effects: Vec<Box<dyn SubmixEffect>>,
}

impl SubmixEffectChain {
    pub fn new(effects: Vec<Box<dyn SubmixEffect>>) -> Self {
        Self { effects }
    }

    /// Initialise every effect for the channel count it will see (control thread)
    ///
    /// Effects asking for a down-mix are initialised with that channel count.
    pub fn init(&mut self, sample_rate: u32, submix_channels: usize) {
        for effect in &mut self.effects {
            let channels = effect
                .desired_channel_count()
                .filter(|&c| c > 0 && c <= MAX_CHANNELS)
                .unwrap_or(submix_channels);
            effect.init(sample_rate, channels);
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn effects_mut(&mut self) -> &mut [Box<dyn SubmixEffect>] {
        &mut self.effects
    }

    pub fn set_param(&mut self, effect: usize, param: usize, value: f32) {
        if let Some(effect) = self.effects.get_mut(effect) {
            effect.set_param(param, value);
        }
    }

    pub fn set_bypass(&mut self, effect: usize, bypass: bool) {
        if let Some(effect) = self.effects.get_mut(effect) {
            effect.set_bypass(bypass);
        }
    }
}
