//! Source slot - the render-side state of one voice
//!
//! A slot lives in a fixed pool created with the device and is reused for
//! every voice that acquires it. All buffers are allocated in [`SourceSlot::new`];
//! nothing in the per-block path allocates or frees.
//!
//! Each block runs three phases:
//!
//! 1. **Read/resample**: linear interpolation between a cached current and
//!    next frame, advancing a fractional cursor by the (ramped) pitch. Every
//!    time the cursor crosses a frame boundary the next frame is pulled from
//!    the buffer queue.
//! 2. **Effects**: one-pole low-pass, volume, then the effect chain, frame by
//!    frame. The voice's plugins (occlusion, reverb send, spatializer) then run
//!    on the block; a spatializer turns the mono signal into stereo. A
//!    block-rate envelope follower decides when the effect tails have rung out.
//! 3. **Channel map**: each source channel is spread across the device
//!    channels with the (possibly interpolating) channel map.

use std::collections::VecDeque;

use basedrop::{Owned, Shared};

use super::atomics::SlotStatus;
use super::buffer_queue::{BufferQueueListener, PcmSegment};
use super::command::SourceInit;
use super::param::{ChannelMapParam, SourceParam};
use crate::effect::native::OnePoleLowPass;
use crate::effect::plugin::{PluginContext, SourcePlugins, SPATIALIZER_CHANNELS};
use crate::effect::SourceEffectChain;
use crate::spatial::{
    map_2d, map_3d, ChannelMap, ChannelOrder, SpatialParams, SpeakerLayout,
};
use crate::types::{lerp, Sample, SlotId, MAX_CHANNELS};

/// Lowest accepted pitch ratio
pub const MIN_PITCH: f32 = 0.125;
/// Highest accepted pitch ratio
pub const MAX_PITCH: f32 = 4.0;
/// Highest accepted volume
pub const MAX_VOLUME: f32 = 4.0;
/// Lowest accepted low-pass cutoff in Hz
pub const MIN_LPF_HZ: f32 = 20.0;

/// Settings shared by every slot for one block
#[derive(Debug, Clone, Copy)]
pub struct RenderSettings {
    pub sample_rate: u32,
    /// Envelope level below which an effect tail counts as finished
    pub tail_threshold: f32,
    /// Per-block envelope release multiplier
    pub envelope_release: f32,
    pub omni_exponent: f32,
}

/// Per-block inputs to [`SourceSlot::render`]
pub(crate) struct RenderContext<'a> {
    pub frames: usize,
    pub layout: &'a SpeakerLayout,
    pub settings: &'a RenderSettings,
    /// Some slot is soloed; every other slot renders silent
    pub solo_active: bool,
}

enum ReadResult {
    Frame,
    End,
    Underrun,
}

/// Render-thread state for one voice
pub struct SourceSlot {
    id: SlotId,
    generation: u32,

    busy: bool,
    playing: bool,
    paused: bool,
    done: bool,
    effect_tails_done: bool,
    needs_speaker_map: bool,
    is_3d: bool,
    center_only: bool,
    streaming: bool,
    debug_solo: bool,
    /// Audio was written to `output` this block
    rendered: bool,

    channels: usize,
    /// Channels leaving phase 2; 2 for a spatializer voice
    post_channels: usize,
    order: ChannelOrder,
    rate_ratio: f64,

    listener: Option<Shared<Box<dyn BufferQueueListener>>>,
    queue: VecDeque<Shared<PcmSegment>>,
    max_queued: usize,
    /// Next unread frame of the front segment
    read_frame: usize,
    /// An end-of-stream segment has been consumed
    end_reached: bool,

    current: [Sample; MAX_CHANNELS],
    next: [Sample; MAX_CHANNELS],
    alpha: f64,
    primed: bool,
    next_is_end: bool,
    starved: bool,

    pitch: SourceParam,
    volume: SourceParam,
    lpf_cutoff: SourceParam,
    lpf: OnePoleLowPass,
    effects: Option<Owned<SourceEffectChain>>,
    plugins: Option<Owned<SourcePlugins>>,
    envelope: f32,
    channel_map: ChannelMapParam,
    spatial: Option<SpatialParams>,

    frames_played: u64,
    underruns: u64,
    segments_retired: u64,

    /// Source-format block; holds the post-effect signal after phase 2
    source_buffer: Vec<Sample>,
    /// Spatializer output
    plugin_buffer: Vec<Sample>,
    /// Device-format block after channel mapping
    output: Vec<Sample>,
}

impl SourceSlot {
    /// Allocate a slot able to render blocks of up to `max_frames`
    pub fn new(id: SlotId, max_frames: usize, max_queued: usize, sample_rate: u32) -> Self {
        let ramp = max_frames as u32;
        Self {
            id,
            generation: 0,
            busy: false,
            playing: false,
            paused: false,
            done: false,
            effect_tails_done: false,
            needs_speaker_map: false,
            is_3d: false,
            center_only: false,
            streaming: false,
            debug_solo: false,
            rendered: false,
            channels: 1,
            post_channels: 1,
            order: ChannelOrder::Standard,
            rate_ratio: 1.0,
            listener: None,
            queue: VecDeque::with_capacity(max_queued),
            max_queued,
            read_frame: 0,
            end_reached: false,
            current: [0.0; MAX_CHANNELS],
            next: [0.0; MAX_CHANNELS],
            alpha: 0.0,
            primed: false,
            next_is_end: false,
            starved: false,
            pitch: SourceParam::new(1.0, ramp),
            volume: SourceParam::new(1.0, ramp),
            lpf_cutoff: SourceParam::new(sample_rate as f32 / 2.0, ramp),
            lpf: OnePoleLowPass::new(),
            effects: None,
            plugins: None,
            envelope: 0.0,
            channel_map: ChannelMapParam::new(1, 2),
            spatial: None,
            frames_played: 0,
            underruns: 0,
            segments_retired: 0,
            source_buffer: vec![0.0; max_frames * MAX_CHANNELS],
            plugin_buffer: vec![0.0; max_frames * SPATIALIZER_CHANNELS],
            output: vec![0.0; max_frames * MAX_CHANNELS],
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────

    /// Bind the slot to a new voice, discarding every trace of the previous one
    pub(crate) fn init(
        &mut self,
        init: &mut SourceInit,
        layout: &SpeakerLayout,
        sample_rate: u32,
    ) {
        self.clear_queue();

        self.generation = init.generation;
        self.busy = true;
        self.playing = false;
        self.paused = false;
        self.done = false;
        self.effect_tails_done = false;
        self.needs_speaker_map = false;
        self.is_3d = false;
        self.center_only = init.center_only;
        self.streaming = init.streaming;
        self.debug_solo = false;
        self.rendered = false;

        self.channels = init.channels.clamp(1, MAX_CHANNELS);
        self.order = init.order;
        self.rate_ratio = init.rate_ratio;
        self.listener = init.listener.take();
        self.effects = init.effects.take();
        self.plugins = init.plugins.take();
        self.post_channels = match self.plugins.as_ref() {
            Some(plugins) => plugins.output_channels(self.channels),
            None => self.channels,
        };

        self.read_frame = 0;
        self.end_reached = false;
        self.current = [0.0; MAX_CHANNELS];
        self.next = [0.0; MAX_CHANNELS];
        self.alpha = 0.0;
        self.primed = false;
        self.next_is_end = false;
        self.starved = false;

        self.pitch.reset(1.0);
        self.volume.reset(1.0);
        self.lpf_cutoff.reset(sample_rate as f32 / 2.0);
        self.lpf.reset();
        self.envelope = 0.0;
        self.spatial = None;

        let map = self.speaker_map_2d(layout);
        self.channel_map.reset_to(&map);

        self.frames_played = 0;
        self.underruns = 0;
    }

    /// Return to idle; queued segments and the effect chain go to the collector
    pub(crate) fn release(&mut self) {
        self.clear_queue();
        self.listener = None;
        self.effects = None;
        self.plugins = None;
        self.busy = false;
        self.playing = false;
        self.paused = false;
        self.debug_solo = false;
        self.rendered = false;
    }

    pub(crate) fn play(&mut self) {
        if self.busy {
            self.playing = true;
            self.paused = false;
        }
    }

    /// Finish the voice; a paused voice resumes rendering so its tails can ring out
    pub(crate) fn stop(&mut self) {
        if self.busy {
            self.playing = false;
            self.paused = false;
            self.done = true;
        }
    }

    pub(crate) fn pause(&mut self) {
        if self.busy {
            self.paused = true;
        }
    }

    fn clear_queue(&mut self) {
        self.segments_retired += self.queue.len() as u64;
        self.queue.clear();
    }

    // ─────────────────────────────────────────────────────────────
    // Parameters
    // ─────────────────────────────────────────────────────────────

    pub(crate) fn set_pitch(&mut self, pitch: f32) {
        self.pitch.set_target(pitch);
    }

    pub(crate) fn set_volume(&mut self, volume: f32) {
        self.volume.set_target(volume);
    }

    pub(crate) fn set_lpf_frequency(&mut self, hz: f32) {
        self.lpf_cutoff.set_target(hz);
    }

    pub(crate) fn set_debug_solo(&mut self, solo: bool) {
        self.debug_solo = solo;
    }

    /// Apply an explicit channel map
    ///
    /// A map built for another source or output channel count is not used:
    /// 2D sources get a regenerated speaker map, 3D sources are silenced and
    /// flagged until the control side supplies a new one.
    pub(crate) fn set_channel_map(
        &mut self,
        map: &ChannelMap,
        is_3d: bool,
        center_only: bool,
        layout: &SpeakerLayout,
        omni_exponent: f32,
    ) {
        self.is_3d = is_3d;
        self.center_only = center_only;
        if map.source_channels() == self.post_channels
            && map.output_channels() == layout.channels()
        {
            self.channel_map.set_target(map);
            self.needs_speaker_map = false;
        } else {
            self.regenerate_map(layout, omni_exponent);
        }
    }

    /// Position a mono source in 3D
    ///
    /// Multichannel and spatializer voices keep their 2D map; a spatializer
    /// receives the position through its plugin context instead.
    pub(crate) fn set_spatial_params(
        &mut self,
        params: SpatialParams,
        layout: &SpeakerLayout,
        omni_exponent: f32,
    ) {
        self.spatial = Some(params);
        if self.post_channels == 1 {
            self.is_3d = true;
            self.needs_speaker_map = false;
            let map = map_3d(layout, &params, omni_exponent);
            self.channel_map.set_target(&map);
        }
    }

    /// The output channel count changed
    pub(crate) fn update_device_layout(&mut self, layout: &SpeakerLayout, omni_exponent: f32) {
        if self.busy {
            self.regenerate_map(layout, omni_exponent);
        } else {
            self.channel_map
                .reset_to(&ChannelMap::zeroed(self.post_channels, layout.channels()));
        }
    }

    fn regenerate_map(&mut self, layout: &SpeakerLayout, omni_exponent: f32) {
        let map = match self.spatial {
            Some(params) if self.post_channels == 1 => {
                self.needs_speaker_map = false;
                map_3d(layout, &params, omni_exponent)
            }
            _ if self.is_3d => {
                self.needs_speaker_map = true;
                ChannelMap::zeroed(self.post_channels, layout.channels())
            }
            _ => {
                self.needs_speaker_map = false;
                self.speaker_map_2d(layout)
            }
        };
        self.channel_map.set_target(&map);
    }

    fn speaker_map_2d(&self, layout: &SpeakerLayout) -> ChannelMap {
        // A spatializer already produced a binaural pair; route it as plain stereo
        let order = if self.post_channels != self.channels {
            ChannelOrder::Standard
        } else {
            self.order
        };
        map_2d(self.post_channels, layout, self.center_only, order)
            .unwrap_or_else(|_| ChannelMap::zeroed(self.post_channels, layout.channels()))
    }

    pub(crate) fn set_effect_param(&mut self, effect: usize, param: usize, value: f32) {
        if let Some(chain) = self.effects.as_mut() {
            chain.set_param(effect, param, value);
        }
    }

    pub(crate) fn set_effect_bypass(&mut self, effect: usize, bypass: bool) {
        if let Some(chain) = self.effects.as_mut() {
            chain.set_bypass(effect, bypass);
        }
    }

    /// Queue a segment; the control side guarantees there is room
    pub(crate) fn submit(&mut self, segment: Shared<PcmSegment>) {
        if self.busy && self.queue.len() < self.max_queued {
            self.queue.push_back(segment);
        } else {
            self.segments_retired += 1;
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Rendering
    // ─────────────────────────────────────────────────────────────

    /// Render one block into the slot's private output buffer
    pub(crate) fn render(&mut self, ctx: &RenderContext<'_>) {
        self.rendered = false;
        if !self.busy || self.paused {
            return;
        }
        let reading = self.playing && !self.done;
        let ringing = self.done && !self.effect_tails_done;
        if !reading && !ringing {
            return;
        }

        let frames = ctx.frames;
        self.pitch.fit_ramp(frames);
        self.volume.fit_ramp(frames);
        self.lpf_cutoff.fit_ramp(frames);
        if reading {
            self.read_block(frames);
        } else {
            self.source_buffer[..frames * self.channels].fill(0.0);
        }
        self.process_effects(ctx);
        self.mix_channel_map(frames, ctx.layout.channels());
        self.rendered = true;
    }

    fn read_block(&mut self, frames: usize) {
        let channels = self.channels;
        for f in 0..frames {
            let step = self.pitch.update() as f64 * self.rate_ratio;
            let base = f * channels;

            if self.done || (!self.primed && !self.prime()) {
                self.source_buffer[base..base + channels].fill(0.0);
                continue;
            }
            if self.starved {
                self.fetch_next();
                // Data is back: skip the whole frames the cursor ran past
                self.consume_whole_frames();
                if self.done {
                    self.source_buffer[base..base + channels].fill(0.0);
                    continue;
                }
            }

            // Starved frames hold `current` whatever the cursor says
            let alpha = self.alpha.min(1.0) as f32;
            for c in 0..channels {
                self.source_buffer[base + c] = lerp(self.current[c], self.next[c], alpha);
            }

            if self.starved {
                continue;
            }
            self.alpha += step;
            self.consume_whole_frames();
        }
    }

    /// Advance past every frame boundary the cursor has crossed
    ///
    /// Stops early on underrun, leaving `alpha >= 1` until data arrives.
    fn consume_whole_frames(&mut self) {
        while self.alpha >= 1.0 && !self.done && !self.starved {
            self.alpha -= 1.0;
            self.advance();
        }
    }

    /// Load the first two frames; false if nothing could be read
    fn prime(&mut self) -> bool {
        let mut frame = [0.0; MAX_CHANNELS];
        match self.read_frame_into(&mut frame) {
            ReadResult::Frame => {}
            ReadResult::End => {
                self.done = true;
                return false;
            }
            ReadResult::Underrun => {
                self.note_underrun();
                return false;
            }
        }
        self.starved = false;
        self.current = frame;
        self.alpha = 0.0;
        self.primed = true;
        self.fetch_next();
        true
    }

    fn fetch_next(&mut self) {
        let mut frame = [0.0; MAX_CHANNELS];
        match self.read_frame_into(&mut frame) {
            ReadResult::Frame => {
                self.next = frame;
                self.starved = false;
            }
            ReadResult::End => {
                self.next = self.current;
                self.next_is_end = true;
                self.starved = false;
            }
            ReadResult::Underrun => {
                self.next = self.current;
                self.note_underrun();
            }
        }
    }

    /// Shift `next` into `current` after the cursor crossed a frame boundary
    fn advance(&mut self) {
        self.frames_played += 1;
        if self.next_is_end {
            self.done = true;
            return;
        }
        self.current = self.next;
        self.fetch_next();
    }

    /// Count one underrun per starvation episode
    fn note_underrun(&mut self) {
        if !self.starved {
            self.underruns += 1;
        }
        self.starved = true;
    }

    fn read_frame_into(&mut self, out: &mut [Sample; MAX_CHANNELS]) -> ReadResult {
        loop {
            let Some(segment) = self.queue.front() else {
                return if !self.streaming || self.end_reached {
                    ReadResult::End
                } else {
                    ReadResult::Underrun
                };
            };

            if self.read_frame < segment.frames() {
                let frame = segment.frame(self.read_frame);
                let n = frame.len().min(self.channels);
                out[..n].copy_from_slice(&frame[..n]);
                out[n..self.channels].fill(0.0);
                self.read_frame += 1;
                return ReadResult::Frame;
            }

            if segment.is_looping() && segment.frames() > 0 {
                self.read_frame = 0;
                if let Some(listener) = &self.listener {
                    listener.on_loop(self.id);
                }
                continue;
            }

            let end_of_stream = segment.is_end_of_stream();
            self.queue.pop_front();
            self.read_frame = 0;
            self.segments_retired += 1;
            if let Some(listener) = &self.listener {
                listener.on_source_buffer_end(self.id);
            }
            if end_of_stream {
                self.end_reached = true;
                return ReadResult::End;
            }
        }
    }

    fn process_effects(&mut self, ctx: &RenderContext<'_>) {
        let channels = self.channels;
        let solo_gain = if ctx.solo_active && !self.debug_solo {
            0.0
        } else {
            1.0
        };
        let sample_rate = ctx.settings.sample_rate;

        for f in 0..ctx.frames {
            let volume = self.volume.update() * solo_gain;
            let cutoff = self.lpf_cutoff.update();
            self.lpf.set_cutoff(cutoff, sample_rate);

            let frame = &mut self.source_buffer[f * channels..(f + 1) * channels];
            self.lpf.process_frame(frame);
            for sample in frame.iter_mut() {
                *sample *= volume;
            }
            if let Some(chain) = self.effects.as_mut() {
                chain.process_frame(frame);
            }
        }

        let block = &mut self.source_buffer[..ctx.frames * channels];
        if let Some(plugins) = self.plugins.as_mut() {
            let plugin_ctx = PluginContext {
                slot: self.id,
                sample_rate,
                frames: ctx.frames,
                spatial: self.spatial,
            };
            plugins.process(
                block,
                &mut self.plugin_buffer[..ctx.frames * SPATIALIZER_CHANNELS],
                channels,
                &plugin_ctx,
            );
        }

        // Measured after occlusion, before the spatializer
        let peak = block.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));
        self.envelope = if peak >= self.envelope {
            peak
        } else {
            peak + (self.envelope - peak) * ctx.settings.envelope_release
        };

        if self.done && !self.effect_tails_done {
            let has_effects = self.effects.as_ref().map_or(false, |chain| !chain.is_empty());
            if !has_effects || self.envelope < ctx.settings.tail_threshold {
                self.effect_tails_done = true;
            }
        }
    }

    fn mix_channel_map(&mut self, frames: usize, out_channels: usize) {
        let channels = self.post_channels;
        let output = &mut self.output[..frames * out_channels];
        output.fill(0.0);

        let source = if self.post_channels != self.channels {
            &self.plugin_buffer
        } else {
            &self.source_buffer
        };
        let map = &self.channel_map;
        for f in 0..frames {
            let src = &source[f * channels..(f + 1) * channels];
            let dst = &mut output[f * out_channels..(f + 1) * out_channels];
            for (s, &sample) in src.iter().enumerate() {
                for (o, out) in dst.iter_mut().enumerate() {
                    *out += sample * map.gain(s, o, f, frames);
                }
            }
        }
        self.channel_map.finish_block();
    }

    // ─────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────

    #[inline]
    pub fn id(&self) -> SlotId {
        self.id
    }

    #[inline]
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.done
    }

    #[inline]
    pub fn is_effect_tails_done(&self) -> bool {
        self.effect_tails_done
    }

    #[inline]
    pub fn needs_speaker_map(&self) -> bool {
        self.needs_speaker_map
    }

    #[inline]
    pub fn is_debug_solo(&self) -> bool {
        self.busy && self.debug_solo
    }

    #[inline]
    pub fn frames_played(&self) -> u64 {
        self.frames_played
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Whether this block produced audio
    #[inline]
    pub fn is_rendered(&self) -> bool {
        self.rendered
    }

    /// 3D position, if the slot is a mono source panned by its channel map
    #[inline]
    pub fn spatial(&self) -> Option<SpatialParams> {
        self.spatial.filter(|_| self.post_channels == 1 && self.is_3d)
    }

    /// Device-format output of the last block
    #[inline]
    pub fn output(&self, frames: usize, out_channels: usize) -> &[Sample] {
        &self.output[..frames * out_channels]
    }

    /// Post-effect signal of the last block, [`Self::post_effect_channels`] wide
    #[inline]
    pub fn post_effect(&self, frames: usize) -> &[Sample] {
        if self.post_channels != self.channels {
            &self.plugin_buffer[..frames * self.post_channels]
        } else {
            &self.source_buffer[..frames * self.channels]
        }
    }

    #[inline]
    pub fn post_effect_channels(&self) -> usize {
        self.post_channels
    }

    /// Current interpolation target of the channel map
    pub fn channel_map(&self) -> &ChannelMap {
        self.channel_map.target()
    }

    pub(crate) fn status(&self) -> SlotStatus {
        SlotStatus {
            generation: self.generation,
            done: self.done,
            effect_tails_done: self.effect_tails_done,
            needs_speaker_map: self.needs_speaker_map,
            frames_played: self.frames_played,
            underruns: self.underruns,
            segments_retired: self.segments_retired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::native::DelayEffect;
    use crate::effect::plugin::{OcclusionPlugin, ReverbSendPlugin, SpatializerPlugin};
    use crate::effect::SourceEffect;
    use basedrop::Collector;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const BLOCK: usize = 512;

    fn settings() -> RenderSettings {
        RenderSettings {
            sample_rate: 48000,
            tail_threshold: 1.58489e-5,
            envelope_release: 0.5,
            omni_exponent: 1.0,
        }
    }

    fn source_init(channels: usize, streaming: bool) -> SourceInit {
        SourceInit {
            generation: 1,
            channels,
            order: ChannelOrder::Standard,
            streaming,
            center_only: false,
            rate_ratio: 1.0,
            listener: None,
            effects: None,
            plugins: None,
            sends: Vec::new(),
        }
    }

    fn new_slot(channels: usize, streaming: bool, layout: &SpeakerLayout) -> SourceSlot {
        let mut slot = SourceSlot::new(SlotId(0), BLOCK, 16, 48000);
        slot.init(&mut source_init(channels, streaming), layout, 48000);
        slot
    }

    fn render(slot: &mut SourceSlot, frames: usize, layout: &SpeakerLayout) {
        let settings = settings();
        let ctx = RenderContext {
            frames,
            layout,
            settings: &settings,
            solo_active: false,
        };
        slot.render(&ctx);
    }

    #[derive(Default)]
    struct Counts {
        ends: AtomicUsize,
        loops: AtomicUsize,
    }

    struct CountingListener(Arc<Counts>);

    impl BufferQueueListener for CountingListener {
        fn on_source_buffer_end(&self, _slot: SlotId) {
            self.0.ends.fetch_add(1, Ordering::Relaxed);
        }

        fn on_loop(&self, _slot: SlotId) {
            self.0.loops.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_stereo_passthrough_is_bit_exact() {
        let collector = Collector::new();
        let layout = SpeakerLayout::new(2).unwrap();
        let mut slot = new_slot(2, false, &layout);

        let samples = vec![0.1, -0.2, 0.3, -0.4, 0.5, -0.6, 0.7, -0.8];
        let segment = PcmSegment::new(samples.clone(), 2).unwrap();
        slot.submit(Shared::new(&collector.handle(), segment));
        slot.play();
        render(&mut slot, 4, &layout);

        assert_eq!(slot.output(4, 2), samples.as_slice());
        assert_eq!(slot.frames_played(), 4);
        assert!(slot.is_done());
    }

    #[test]
    fn test_consumes_exactly_the_submitted_frames() {
        let collector = Collector::new();
        let layout = SpeakerLayout::new(2).unwrap();
        let mut slot = new_slot(1, false, &layout);

        let samples: Vec<f32> = (0..100).map(|i| i as f32 / 100.0).collect();
        slot.submit(Shared::new(&collector.handle(), PcmSegment::new(samples.clone(), 1).unwrap()));
        slot.play();

        render(&mut slot, 64, &layout);
        assert_eq!(slot.post_effect(64), &samples[..64]);
        assert!(!slot.is_done());

        render(&mut slot, 64, &layout);
        assert_eq!(slot.post_effect(64)[..36], samples[64..]);
        assert!(slot.post_effect(64)[36..].iter().all(|&s| s == 0.0));
        assert_eq!(slot.frames_played(), 100);
        assert!(slot.is_done());
        assert_eq!(slot.status().segments_retired, 1);
    }

    #[test]
    fn test_double_pitch_consumes_twice_as_fast() {
        let collector = Collector::new();
        let layout = SpeakerLayout::new(2).unwrap();
        let mut slot = new_slot(1, false, &layout);

        slot.submit(Shared::new(&collector.handle(), PcmSegment::new(vec![0.5; 100], 1).unwrap()));
        slot.set_pitch(2.0);
        slot.play();
        render(&mut slot, 64, &layout);

        assert_eq!(slot.frames_played(), 100);
        assert!(slot.is_done());
    }

    #[test]
    fn test_pitch_scales_zero_crossings() {
        let collector = Collector::new();
        let layout = SpeakerLayout::new(2).unwrap();
        let mut slot = new_slot(1, false, &layout);

        let source_hz = 480.0f32;
        let samples: Vec<f32> = (0..4800)
            .map(|n| (2.0 * std::f32::consts::PI * source_hz * n as f32 / 48000.0 + 0.1).sin())
            .collect();
        slot.submit(Shared::new(&collector.handle(), PcmSegment::new(samples, 1).unwrap()));
        slot.set_pitch(1.5);
        slot.play();

        let mut rendered = Vec::new();
        for _ in 0..4 {
            render(&mut slot, BLOCK, &layout);
            rendered.extend_from_slice(slot.post_effect(BLOCK));
        }

        let crossings = rendered
            .windows(2)
            .filter(|pair| (pair[0] < 0.0) != (pair[1] < 0.0))
            .count() as f32;
        let expected = 2.0 * source_hz * 1.5 * rendered.len() as f32 / 48000.0;
        assert!(
            (crossings - expected).abs() <= 2.0,
            "{} crossings, expected {}",
            crossings,
            expected
        );
    }

    #[test]
    fn test_underrun_holds_last_frame_and_counts_episodes() {
        let collector = Collector::new();
        let layout = SpeakerLayout::new(2).unwrap();
        let mut slot = new_slot(1, true, &layout);

        slot.submit(Shared::new(&collector.handle(), PcmSegment::new(vec![0.5; 4], 1).unwrap()));
        slot.play();
        render(&mut slot, 8, &layout);

        assert!(slot.post_effect(8).iter().all(|&s| s == 0.5));
        assert_eq!(slot.status().underruns, 1);
        assert!(!slot.is_done());

        render(&mut slot, 8, &layout);
        assert_eq!(slot.status().underruns, 1);

        slot.submit(Shared::new(&collector.handle(), PcmSegment::new(vec![0.25; 4], 1).unwrap()));
        render(&mut slot, 8, &layout);
        assert_eq!(slot.post_effect(8)[0], 0.5);
        assert!(slot.post_effect(8)[1..].iter().all(|&s| s == 0.25));
        assert_eq!(slot.status().underruns, 2);
    }

    #[test]
    fn test_end_of_stream_finishes_streaming_source() {
        let collector = Collector::new();
        let layout = SpeakerLayout::new(2).unwrap();
        let mut slot = new_slot(1, true, &layout);

        let segment = PcmSegment::new(vec![0.5; 4], 1).unwrap().with_end_of_stream(true);
        slot.submit(Shared::new(&collector.handle(), segment));
        slot.play();
        render(&mut slot, 8, &layout);

        assert!(slot.is_done());
        assert_eq!(slot.frames_played(), 4);
        assert_eq!(slot.status().underruns, 0);
    }

    #[test]
    fn test_looping_segment_wraps() {
        let collector = Collector::new();
        let layout = SpeakerLayout::new(2).unwrap();
        let mut slot = new_slot(1, false, &layout);

        let counts = Arc::new(Counts::default());
        let listener: Box<dyn BufferQueueListener> = Box::new(CountingListener(counts.clone()));
        let mut init = source_init(1, false);
        init.listener = Some(Shared::new(&collector.handle(), listener));
        slot.init(&mut init, &layout, 48000);

        let segment = PcmSegment::new(vec![1.0, 2.0, 3.0], 1).unwrap().with_looping(true);
        slot.submit(Shared::new(&collector.handle(), segment));
        slot.play();
        render(&mut slot, 7, &layout);

        assert_eq!(slot.post_effect(7), &[1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0]);
        assert_eq!(counts.loops.load(Ordering::Relaxed), 2);
        assert_eq!(counts.ends.load(Ordering::Relaxed), 0);
        assert!(!slot.is_done());
    }

    #[test]
    fn test_buffer_end_callback() {
        let collector = Collector::new();
        let layout = SpeakerLayout::new(2).unwrap();
        let mut slot = new_slot(1, false, &layout);

        let counts = Arc::new(Counts::default());
        let listener: Box<dyn BufferQueueListener> = Box::new(CountingListener(counts.clone()));
        let mut init = source_init(1, false);
        init.listener = Some(Shared::new(&collector.handle(), listener));
        slot.init(&mut init, &layout, 48000);

        for _ in 0..2 {
            let segment = PcmSegment::new(vec![0.1; 3], 1).unwrap();
            slot.submit(Shared::new(&collector.handle(), segment));
        }
        slot.play();
        render(&mut slot, 16, &layout);

        assert_eq!(counts.ends.load(Ordering::Relaxed), 2);
        assert_eq!(slot.frames_played(), 6);
    }

    #[test]
    fn test_done_flags_are_monotonic() {
        let collector = Collector::new();
        let layout = SpeakerLayout::new(2).unwrap();
        let mut slot = new_slot(1, false, &layout);

        slot.submit(Shared::new(&collector.handle(), PcmSegment::new(vec![0.5; 1000], 1).unwrap()));
        slot.play();
        render(&mut slot, 64, &layout);
        assert!(!slot.is_done());

        slot.stop();
        render(&mut slot, 64, &layout);
        assert!(slot.is_done());
        assert!(slot.is_effect_tails_done());

        // Play after stop does not resurrect the voice
        slot.play();
        for _ in 0..4 {
            render(&mut slot, 64, &layout);
            assert!(slot.is_done());
            assert!(slot.is_effect_tails_done());
        }
    }

    #[test]
    fn test_stop_while_paused_finishes() {
        let collector = Collector::new();
        let layout = SpeakerLayout::new(2).unwrap();
        let mut slot = new_slot(1, false, &layout);

        slot.submit(Shared::new(&collector.handle(), PcmSegment::new(vec![0.5; 1000], 1).unwrap()));
        slot.play();
        render(&mut slot, 64, &layout);

        slot.pause();
        slot.stop();
        render(&mut slot, 64, &layout);
        assert!(slot.is_rendered());
        assert!(slot.is_done());
        assert!(slot.is_effect_tails_done());
    }

    #[test]
    fn test_delay_tail_rings_after_stop() {
        let collector = Collector::new();
        let layout = SpeakerLayout::new(2).unwrap();
        let mut slot = new_slot(1, false, &layout);

        let delay: Box<dyn SourceEffect> = Box::new(DelayEffect::new());
        let mut chain = SourceEffectChain::new(vec![delay]);
        chain.init(48000, 1);
        chain.set_param(0, 0, 0.0); // 1 ms
        chain.set_param(0, 1, 1.0); // 95% feedback
        let mut init = source_init(1, false);
        init.effects = Some(Owned::new(&collector.handle(), chain));
        slot.init(&mut init, &layout, 48000);

        slot.submit(Shared::new(&collector.handle(), PcmSegment::new(vec![0.5; 64], 1).unwrap()));
        slot.play();
        render(&mut slot, BLOCK, &layout);
        assert!(slot.is_done());
        assert!(!slot.is_effect_tails_done());

        let mut ringing = 0;
        while !slot.is_effect_tails_done() && ringing < 200 {
            render(&mut slot, BLOCK, &layout);
            assert!(slot.is_rendered());
            ringing += 1;
        }
        assert!(slot.is_effect_tails_done());
        assert!(ringing > 4, "tail finished after {} blocks", ringing);

        render(&mut slot, BLOCK, &layout);
        assert!(!slot.is_rendered());
    }

    #[test]
    fn test_underrun_recovery_skips_owed_frames() {
        let collector = Collector::new();
        let layout = SpeakerLayout::new(2).unwrap();
        let mut slot = SourceSlot::new(SlotId(0), BLOCK, 16, 48000);
        let mut init = source_init(1, true);
        init.rate_ratio = 2.0;
        slot.init(&mut init, &layout, 48000);

        // 2.5 source frames per output frame
        slot.set_pitch(1.25);
        slot.submit(Shared::new(&collector.handle(), PcmSegment::new(vec![0.0; 4], 1).unwrap()));
        slot.play();
        render(&mut slot, 8, &layout);
        assert!(slot.post_effect(8).iter().all(|&s| s == 0.0));
        assert_eq!(slot.status().underruns, 1);

        slot.submit(Shared::new(&collector.handle(), PcmSegment::new(vec![1.0; 16], 1).unwrap()));
        render(&mut slot, 4, &layout);
        assert_eq!(slot.post_effect(4), &[1.0; 4]);
        assert_eq!(slot.status().underruns, 1);
    }

    #[test]
    fn test_volume_ramp_spans_short_block() {
        let collector = Collector::new();
        let layout = SpeakerLayout::new(2).unwrap();
        let mut slot = new_slot(1, false, &layout);

        slot.submit(Shared::new(&collector.handle(), PcmSegment::new(vec![0.5; 256], 1).unwrap()));
        slot.set_volume(1.0);
        slot.play();
        render(&mut slot, 16, &layout);

        slot.set_volume(0.0);
        render(&mut slot, 16, &layout);
        let block = slot.post_effect(16);
        assert_eq!(block[7], 0.25);
        assert_eq!(block[15], 0.0);
    }

    struct Halve;

    impl OcclusionPlugin for Halve {
        fn process(&mut self, buffer: &mut [Sample], _channels: usize, _ctx: &PluginContext) {
            buffer.iter_mut().for_each(|s| *s *= 0.5);
        }
    }

    struct Tap(Arc<AtomicUsize>);

    impl ReverbSendPlugin for Tap {
        fn process(&mut self, input: &[Sample], channels: usize, ctx: &PluginContext) {
            assert_eq!(input.len(), ctx.frames * channels);
            self.0.fetch_add(ctx.frames, Ordering::Relaxed);
        }
    }

    /// Left ear gets the signal, right ear the signal scaled by the azimuth
    struct AzimuthSpatializer;

    impl SpatializerPlugin for AzimuthSpatializer {
        fn process(&mut self, input: &[Sample], output: &mut [Sample], ctx: &PluginContext) {
            let scale = ctx.spatial.map_or(0.0, |params| params.azimuth);
            for (frame, &s) in output.chunks_exact_mut(2).zip(input) {
                frame[0] = s;
                frame[1] = s * scale;
            }
        }
    }

    #[test]
    fn test_occlusion_and_reverb_send() {
        let collector = Collector::new();
        let layout = SpeakerLayout::new(2).unwrap();
        let mut slot = SourceSlot::new(SlotId(0), BLOCK, 16, 48000);

        let sent = Arc::new(AtomicUsize::new(0));
        let plugins = SourcePlugins::new()
            .with_occlusion(Box::new(Halve))
            .with_reverb_send(Box::new(Tap(sent.clone())));
        let mut init = source_init(2, false);
        init.plugins = Some(Owned::new(&collector.handle(), plugins));
        slot.init(&mut init, &layout, 48000);

        slot.submit(Shared::new(&collector.handle(), PcmSegment::new(vec![0.5; 128], 2).unwrap()));
        slot.play();
        render(&mut slot, 32, &layout);

        assert_eq!(slot.post_effect_channels(), 2);
        assert!(slot.output(32, 2).iter().all(|&s| s == 0.25));
        assert_eq!(sent.load(Ordering::Relaxed), 32);
    }

    #[test]
    fn test_spatializer_turns_mono_into_stereo() {
        let collector = Collector::new();
        let layout = SpeakerLayout::new(2).unwrap();
        let mut slot = SourceSlot::new(SlotId(0), BLOCK, 16, 48000);

        let plugins = SourcePlugins::new().with_spatializer(Box::new(AzimuthSpatializer));
        let mut init = source_init(1, false);
        init.plugins = Some(Owned::new(&collector.handle(), plugins));
        slot.init(&mut init, &layout, 48000);
        assert_eq!(slot.post_effect_channels(), 2);
        assert_eq!(slot.channel_map().source_channels(), 2);

        slot.submit(Shared::new(&collector.handle(), PcmSegment::new(vec![0.5; 256], 1).unwrap()));
        slot.play();
        render(&mut slot, 4, &layout);
        assert_eq!(slot.output(4, 2), &[0.5, 0.0, 0.5, 0.0, 0.5, 0.0, 0.5, 0.0]);

        // The position reaches the plugin; the stereo map is left alone
        let params = SpatialParams {
            azimuth: 0.5,
            ..Default::default()
        };
        slot.set_spatial_params(params, &layout, 1.0);
        assert!(slot.spatial().is_none());
        assert_eq!(slot.channel_map().source_channels(), 2);
        render(&mut slot, 2, &layout);
        assert_eq!(slot.output(2, 2), &[0.5, 0.25, 0.5, 0.25]);

        // 2D regeneration keeps routing the binaural pair
        let surround = SpeakerLayout::new(6).unwrap();
        slot.update_device_layout(&surround, 1.0);
        assert_eq!(slot.channel_map().source_channels(), 2);
        assert!(!slot.needs_speaker_map());
    }

    #[test]
    fn test_paused_slot_holds_position() {
        let collector = Collector::new();
        let layout = SpeakerLayout::new(2).unwrap();
        let mut slot = new_slot(1, false, &layout);

        slot.submit(Shared::new(&collector.handle(), PcmSegment::new(vec![0.5; 1000], 1).unwrap()));
        slot.play();
        render(&mut slot, 64, &layout);
        let played = slot.frames_played();

        slot.pause();
        render(&mut slot, 64, &layout);
        assert!(!slot.is_rendered());
        assert_eq!(slot.frames_played(), played);

        slot.play();
        render(&mut slot, 64, &layout);
        assert!(slot.frames_played() > played);
    }

    #[test]
    fn test_repeated_volume_is_idempotent() {
        let collector = Collector::new();
        let layout = SpeakerLayout::new(2).unwrap();
        let handle = collector.handle();
        let samples: Vec<f32> = (0..256).map(|i| (i as f32 * 0.05).sin()).collect();

        let mut once = new_slot(1, false, &layout);
        let mut twice = new_slot(1, false, &layout);
        for slot in [&mut once, &mut twice] {
            slot.submit(Shared::new(&handle, PcmSegment::new(samples.clone(), 1).unwrap()));
            slot.set_volume(1.0);
            slot.play();
            render(slot, 64, &layout);
        }

        once.set_volume(0.3);
        twice.set_volume(0.3);
        twice.set_volume(0.3);
        render(&mut once, 64, &layout);
        render(&mut twice, 64, &layout);

        assert_eq!(once.output(64, 2), twice.output(64, 2));
    }

    #[test]
    fn test_mismatched_3d_map_requests_speaker_map() {
        let collector = Collector::new();
        let layout = SpeakerLayout::new(2).unwrap();
        let mut slot = new_slot(1, false, &layout);

        slot.submit(Shared::new(&collector.handle(), PcmSegment::new(vec![0.5; 256], 1).unwrap()));
        slot.play();

        let wrong = ChannelMap::zeroed(1, 6);
        slot.set_channel_map(&wrong, true, false, &layout, 1.0);
        assert!(slot.needs_speaker_map());

        render(&mut slot, 64, &layout);
        assert!(slot.output(64, 2).iter().all(|&s| s == 0.0));
        assert!(slot.status().needs_speaker_map);

        let right = ChannelMap::from_gains(1, 2, &[1.0, 0.0]).unwrap();
        slot.set_channel_map(&right, true, false, &layout, 1.0);
        assert!(!slot.needs_speaker_map());
    }

    #[test]
    fn test_device_change_regenerates_2d_map() {
        let layout = SpeakerLayout::new(2).unwrap();
        let mut slot = new_slot(2, false, &layout);

        let surround = SpeakerLayout::new(6).unwrap();
        slot.update_device_layout(&surround, 1.0);
        let map = slot.channel_map();
        assert_eq!(map.output_channels(), 6);
        assert_eq!(map.gain(0, 0), 1.0);
        assert_eq!(map.gain(1, 1), 1.0);
        assert!(!slot.needs_speaker_map());
    }

    #[test]
    fn test_reinit_clears_previous_voice() {
        let collector = Collector::new();
        let layout = SpeakerLayout::new(2).unwrap();
        let mut slot = new_slot(1, false, &layout);

        slot.submit(Shared::new(&collector.handle(), PcmSegment::new(vec![0.5; 8], 1).unwrap()));
        slot.play();
        render(&mut slot, 16, &layout);
        assert!(slot.is_done());

        let mut init = source_init(1, false);
        init.generation = 2;
        slot.init(&mut init, &layout, 48000);
        assert!(!slot.is_done());
        assert_eq!(slot.frames_played(), 0);
        assert_eq!(slot.status().generation, 2);
    }
}
