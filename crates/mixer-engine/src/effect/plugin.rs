//! Per-voice audio plugins
//!
//! Plugins run after a voice's effect chain, on the whole block:
//!
//! 1. **Occlusion** rewrites the signal in place.
//! 2. **Reverb send** observes the occluded signal, e.g. to feed an external
//!    reverb engine. It does not change what the voice outputs.
//! 3. **Spatializer** turns a mono voice into interleaved stereo. A spatialized
//!    voice leaves the effect phase with two channels and is channel-mapped as
//!    a stereo source instead of being panned in 3D.
//!
//! Plugins are handed to the render thread inside the voice's init command and
//! are freed by the collector when the voice is released.

use crate::spatial::SpatialParams;
use crate::types::{Sample, SlotId};

/// Channel count a spatializer produces
pub const SPATIALIZER_CHANNELS: usize = 2;

/// What a plugin knows about the voice it is processing
#[derive(Debug, Clone, Copy)]
pub struct PluginContext {
    pub slot: SlotId,
    pub sample_rate: u32,
    pub frames: usize,
    /// Emitter position, once the voice has been given one
    pub spatial: Option<SpatialParams>,
}

/// Renders a mono voice to stereo (HRTF or any other binaural model)
pub trait SpatializerPlugin: Send {
    /// Called on the control thread before the voice starts; may allocate
    fn init(&mut self, _sample_rate: u32, _max_frames: usize) {}

    /// Clear any history (delay lines, filter state)
    fn reset(&mut self) {}

    /// Render `ctx.frames` mono samples into `ctx.frames` interleaved stereo frames
    fn process(&mut self, input: &[Sample], output: &mut [Sample], ctx: &PluginContext);
}

/// Attenuates or filters a voice according to what lies between it and the listener
pub trait OcclusionPlugin: Send {
    fn init(&mut self, _sample_rate: u32, _max_frames: usize) {}

    fn reset(&mut self) {}

    /// Process `channels`-channel interleaved audio in place
    fn process(&mut self, buffer: &mut [Sample], channels: usize, ctx: &PluginContext);
}

/// Taps a voice's signal for a reverb engine outside the submix graph
///
/// Runs on the render thread; hand the audio off without blocking.
pub trait ReverbSendPlugin: Send {
    fn init(&mut self, _sample_rate: u32, _max_frames: usize) {}

    fn reset(&mut self) {}

    fn process(&mut self, input: &[Sample], channels: usize, ctx: &PluginContext);
}

/// The optional plugins of one voice
#[derive(Default)]
pub struct SourcePlugins {
    spatializer: Option<Box<dyn SpatializerPlugin>>,
    occlusion: Option<Box<dyn OcclusionPlugin>>,
    reverb_send: Option<Box<dyn ReverbSendPlugin>>,
}

impl SourcePlugins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spatializer(mut self, plugin: Box<dyn SpatializerPlugin>) -> Self {
        self.spatializer = Some(plugin);
        self
    }

    pub fn with_occlusion(mut self, plugin: Box<dyn OcclusionPlugin>) -> Self {
        self.occlusion = Some(plugin);
        self
    }

    pub fn with_reverb_send(mut self, plugin: Box<dyn ReverbSendPlugin>) -> Self {
        self.reverb_send = Some(plugin);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.spatializer.is_none() && self.occlusion.is_none() && self.reverb_send.is_none()
    }

    #[inline]
    pub fn has_spatializer(&self) -> bool {
        self.spatializer.is_some()
    }

    /// Channel count leaving the plugin stage for a voice of `input_channels`
    #[inline]
    pub fn output_channels(&self, input_channels: usize) -> usize {
        if self.has_spatializer() {
            SPATIALIZER_CHANNELS
        } else {
            input_channels
        }
    }

    /// Prepare every plugin (control thread)
    pub fn init(&mut self, sample_rate: u32, max_frames: usize) {
        if let Some(plugin) = self.occlusion.as_mut() {
            plugin.init(sample_rate, max_frames);
        }
        if let Some(plugin) = self.reverb_send.as_mut() {
            plugin.init(sample_rate, max_frames);
        }
        if let Some(plugin) = self.spatializer.as_mut() {
            plugin.init(sample_rate, max_frames);
        }
    }

    pub fn reset(&mut self) {
        if let Some(plugin) = self.occlusion.as_mut() {
            plugin.reset();
        }
        if let Some(plugin) = self.reverb_send.as_mut() {
            plugin.reset();
        }
        if let Some(plugin) = self.spatializer.as_mut() {
            plugin.reset();
        }
    }

    /// Run the plugin chain over one block
    ///
    /// `buffer` holds `ctx.frames` frames of `channels` channels. When a
    /// spatializer is present its stereo result is written to `spatialized`,
    /// which must hold `ctx.frames * 2` samples.
    pub fn process(
        &mut self,
        buffer: &mut [Sample],
        spatialized: &mut [Sample],
        channels: usize,
        ctx: &PluginContext,
    ) {
        if let Some(plugin) = self.occlusion.as_mut() {
            plugin.process(buffer, channels, ctx);
        }
        if let Some(plugin) = self.reverb_send.as_mut() {
            plugin.process(buffer, channels, ctx);
        }
        if let Some(plugin) = self.spatializer.as_mut() {
            spatialized.fill(0.0);
            plugin.process(buffer, spatialized, ctx);
        }
    }
}
