//! A single submix bus
//!
//! A node sums its children and directly routed sources into a mix buffer in
//! its own format, runs its effect chain over the mix and finally converts the
//! result into the format its parent expects. All buffers are sized when the
//! node is created on the control thread.

use crate::effect::SubmixEffectChain;
use crate::engine::error::{MixerError, MixerResult};
use crate::engine::slot::SourceSlot;
use crate::spatial::{
    conversion_matrix, encode_gains, speaker_encode_matrix, AmbisonicsDecoder, AmbisonicsStreamId,
    ChannelMap, SpeakerLayout,
};
use crate::types::{InterleavedBuffer, Sample, SlotId, SubmixId, AMBISONICS_CHANNELS, MAX_CHANNELS};

/// Channel format of a submix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    /// Follows the output device's channel count
    Device,
    /// A fixed speaker channel count
    Fixed(usize),
    /// First-order ambisonics
    Ambisonics,
}

impl ChannelLayout {
    /// Channel count of the layout for a device with `device_channels` outputs
    #[inline]
    pub fn channels(&self, device_channels: usize) -> usize {
        match self {
            ChannelLayout::Device => device_channels,
            ChannelLayout::Fixed(n) => *n,
            ChannelLayout::Ambisonics => AMBISONICS_CHANNELS,
        }
    }

    pub(crate) fn format(&self, device_channels: usize) -> Format {
        match self {
            ChannelLayout::Device => Format::Speakers(device_channels),
            ChannelLayout::Fixed(n) => Format::Speakers(*n),
            ChannelLayout::Ambisonics => Format::Ambisonics,
        }
    }
}

/// Lifecycle of a submix node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmixState {
    /// Created, not yet handed to the render thread
    Uninitialized,
    /// Registered and queued for insertion into the graph
    Configured,
    /// Processed at least one block
    Active,
    /// Removed from the graph
    TornDown,
}

/// Concrete sample format a buffer is in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Format {
    Speakers(usize),
    Ambisonics,
}

impl Format {
    #[inline]
    pub(crate) fn channels(self) -> usize {
        match self {
            Format::Speakers(n) => n,
            Format::Ambisonics => AMBISONICS_CHANNELS,
        }
    }
}

/// Cached gain matrix converting one format into another
///
/// Rebuilt only when the formats (or the yaw, for ambisonic decoding) change,
/// so steady-state conversion is a plain matrix multiply.
#[derive(Debug, Clone, Copy)]
struct Converter {
    from: Format,
    to: Format,
    yaw: f32,
    map: ChannelMap,
    identity: bool,
}

impl Converter {
    fn new() -> Self {
        Self {
            from: Format::Speakers(0),
            to: Format::Speakers(0),
            yaw: 0.0,
            map: ChannelMap::zeroed(1, 1),
            identity: false,
        }
    }

    fn prepare(&mut self, from: Format, to: Format, yaw: f32) {
        let yaw_matters = from == Format::Ambisonics && to != Format::Ambisonics;
        if self.from == from && self.to == to && (!yaw_matters || self.yaw == yaw) {
            return;
        }
        self.from = from;
        self.to = to;
        self.yaw = yaw;
        self.identity = from == to;
        self.map = build_matrix(from, to, yaw);
    }

    /// Accumulate `input * gain`, converted, into `output`
    fn apply(&self, input: &[Sample], output: &mut [Sample], frames: usize, gain: f32) {
        let in_ch = self.from.channels();
        let out_ch = self.to.channels();
        if self.identity {
            for (dst, src) in output[..frames * out_ch].iter_mut().zip(input) {
                *dst += *src * gain;
            }
            return;
        }
        for f in 0..frames {
            let src = &input[f * in_ch..(f + 1) * in_ch];
            let dst = &mut output[f * out_ch..(f + 1) * out_ch];
            for (s, &sample) in src.iter().enumerate() {
                if sample == 0.0 {
                    continue;
                }
                for (o, out) in dst.iter_mut().enumerate() {
                    *out += sample * gain * self.map.gain(s, o);
                }
            }
        }
    }
}

fn build_matrix(from: Format, to: Format, yaw: f32) -> ChannelMap {
    let zeroed = ChannelMap::zeroed(from.channels().max(1), to.channels().max(1));
    match (from, to) {
        (Format::Ambisonics, Format::Ambisonics) => ChannelMap::identity(AMBISONICS_CHANNELS),
        (Format::Speakers(a), Format::Speakers(b)) => conversion_matrix(a, b).unwrap_or(zeroed),
        (Format::Speakers(a), Format::Ambisonics) => match SpeakerLayout::new(a) {
            Ok(layout) => {
                let encode = speaker_encode_matrix(&layout);
                let mut map = ChannelMap::zeroed(a, AMBISONICS_CHANNELS);
                for (s, row) in encode.iter().enumerate().take(a) {
                    for (component, &g) in row.iter().enumerate() {
                        map.set_gain(s, component, g);
                    }
                }
                map
            }
            Err(_) => zeroed,
        },
        (Format::Ambisonics, Format::Speakers(b)) => match SpeakerLayout::new(b) {
            Ok(layout) => {
                let decoder = AmbisonicsDecoder::new(&layout, yaw);
                let mut map = ChannelMap::zeroed(AMBISONICS_CHANNELS, b);
                for o in 0..b {
                    for (component, &g) in decoder.gains(o).iter().enumerate() {
                        map.set_gain(component, o, g);
                    }
                }
                map
            }
            Err(_) => zeroed,
        },
    }
}

/// A submix bus in the graph
pub struct SubmixNode {
    id: SubmixId,
    layout: ChannelLayout,
    state: SubmixState,
    parent: Option<SubmixId>,
    pub(crate) children: Vec<SubmixId>,
    max_children: usize,
    /// Directly routed sources with their send level
    sources: Vec<(SlotId, f32)>,
    max_sources: usize,
    effects: SubmixEffectChain,
    /// Channel count the effects were initialised with
    effect_channels: usize,
    ambisonics: Option<AmbisonicsStreamId>,

    format: Format,
    mix: InterleavedBuffer,
    scratch: InterleavedBuffer,
    down_in: InterleavedBuffer,
    down_out: InterleavedBuffer,
    output: InterleavedBuffer,

    source_conv: Converter,
    down_conv: Converter,
    up_conv: Converter,
    output_conv: Converter,
}

impl SubmixNode {
    /// Create a node (control thread; allocates every buffer it will need)
    ///
    /// `max_sources` and `max_children` bound the routing tables so the render
    /// thread never grows them.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SubmixId,
        layout: ChannelLayout,
        parent: Option<SubmixId>,
        mut effects: SubmixEffectChain,
        sample_rate: u32,
        device_channels: usize,
        max_frames: usize,
        max_sources: usize,
        max_children: usize,
    ) -> MixerResult<Self> {
        if let ChannelLayout::Fixed(n) = layout {
            if n == 0 || n > MAX_CHANNELS {
                return Err(MixerError::UnsupportedChannelCount(n));
            }
        }
        let channels = layout.channels(device_channels);
        effects.init(sample_rate, channels);

        let buffer = || InterleavedBuffer::with_capacity(max_frames, MAX_CHANNELS);
        Ok(Self {
            id,
            layout,
            state: SubmixState::Uninitialized,
            parent,
            children: Vec::with_capacity(max_children),
            max_children,
            sources: Vec::with_capacity(max_sources),
            max_sources,
            effects,
            effect_channels: channels,
            ambisonics: None,
            format: layout.format(device_channels),
            mix: buffer(),
            scratch: buffer(),
            down_in: buffer(),
            down_out: buffer(),
            output: buffer(),
            source_conv: Converter::new(),
            down_conv: Converter::new(),
            up_conv: Converter::new(),
            output_conv: Converter::new(),
        })
    }

    /// Attach the ambisonics stream id allocated for this node
    pub fn with_ambisonics_stream(mut self, stream: AmbisonicsStreamId) -> Self {
        self.ambisonics = Some(stream);
        self
    }

    /// Mark the node as registered and ready to be inserted into the graph
    pub fn configure(&mut self) {
        if self.state == SubmixState::Uninitialized {
            self.state = SubmixState::Configured;
        }
    }

    pub(crate) fn tear_down(&mut self) {
        self.state = SubmixState::TornDown;
        self.sources.clear();
        self.children.clear();
    }

    // ─────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────

    #[inline]
    pub fn id(&self) -> SubmixId {
        self.id
    }

    #[inline]
    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    #[inline]
    pub fn state(&self) -> SubmixState {
        self.state
    }

    #[inline]
    pub fn parent(&self) -> Option<SubmixId> {
        self.parent
    }

    pub fn children(&self) -> &[SubmixId] {
        &self.children
    }

    pub fn sources(&self) -> &[(SlotId, f32)] {
        &self.sources
    }

    #[inline]
    pub fn ambisonics_stream(&self) -> Option<AmbisonicsStreamId> {
        self.ambisonics
    }

    /// Converted output of the last processed block
    #[inline]
    pub fn output(&self) -> &[Sample] {
        self.output.as_slice()
    }

    pub fn effects_mut(&mut self) -> &mut SubmixEffectChain {
        &mut self.effects
    }

    // ─────────────────────────────────────────────────────────────
    // Routing (render thread, capacity reserved up front)
    // ─────────────────────────────────────────────────────────────

    pub(crate) fn set_parent(&mut self, parent: Option<SubmixId>) {
        self.parent = parent;
    }

    pub(crate) fn add_child(&mut self, child: SubmixId) {
        if !self.children.contains(&child) && self.children.len() < self.max_children {
            self.children.push(child);
        }
    }

    pub(crate) fn remove_child(&mut self, child: SubmixId) {
        self.children.retain(|&c| c != child);
    }

    /// Set the send level of a source; zero removes the route
    pub(crate) fn set_send(&mut self, slot: SlotId, level: f32) {
        match self.sources.iter().position(|&(s, _)| s == slot) {
            Some(i) if level <= 0.0 => {
                self.sources.swap_remove(i);
            }
            Some(i) => self.sources[i].1 = level,
            None if level > 0.0 && self.sources.len() < self.max_sources => {
                self.sources.push((slot, level));
            }
            None => {}
        }
    }

    pub(crate) fn remove_source(&mut self, slot: SlotId) {
        self.sources.retain(|&(s, _)| s != slot);
    }

    // ─────────────────────────────────────────────────────────────
    // Processing
    // ─────────────────────────────────────────────────────────────

    /// Clear the mix buffer for a new block
    pub(crate) fn begin_block(&mut self, frames: usize, device_channels: usize) {
        if self.state == SubmixState::Configured {
            self.state = SubmixState::Active;
        }
        self.format = self.layout.format(device_channels);
        self.mix.set_format(frames, self.format.channels());
    }

    #[inline]
    pub(crate) fn format(&self) -> Format {
        self.format
    }

    /// Accumulate a child's converted output
    pub(crate) fn mix_child(&mut self, child_output: &[Sample]) {
        if child_output.len() == self.mix.as_slice().len() {
            self.mix.mix_from(child_output, 1.0);
        }
    }

    /// Accumulate every directly routed source that rendered this block
    pub(crate) fn mix_sources(
        &mut self,
        slots: &[SourceSlot],
        device: &SpeakerLayout,
        frames: usize,
    ) {
        let device_format = Format::Speakers(device.channels());
        self.source_conv.prepare(device_format, self.format, 0.0);

        for &(slot_id, level) in &self.sources {
            let Some(slot) = slots.get(slot_id.index()) else {
                continue;
            };
            if !slot.is_rendered() {
                continue;
            }
            match (self.format, slot.spatial()) {
                // Spatialized mono sources enter the sound field at their own azimuth
                (Format::Ambisonics, Some(params)) => {
                    let gains = encode_gains(params.azimuth);
                    let mono = slot.post_effect(frames);
                    let mix = self.mix.as_mut_slice();
                    for (f, &sample) in mono.iter().enumerate() {
                        let dst = &mut mix[f * AMBISONICS_CHANNELS..(f + 1) * AMBISONICS_CHANNELS];
                        for (out, g) in dst.iter_mut().zip(gains) {
                            *out += sample * level * g;
                        }
                    }
                }
                _ => {
                    let input = slot.output(frames, device.channels());
                    self.source_conv
                        .apply(input, self.mix.as_mut_slice(), frames, level);
                }
            }
        }
    }

    /// Run the effect chain over the mix buffer
    ///
    /// Effects that want a different channel count get a down-mix and their
    /// result is converted back into the node's format.
    pub(crate) fn process_effects(&mut self, frames: usize) {
        if self.effects.is_empty() {
            return;
        }
        let format = self.format;
        let channels = format.channels();
        let effect_channels = self.effect_channels;

        for effect in self.effects.effects_mut() {
            if effect.is_bypassed() {
                continue;
            }
            let requested = effect
                .desired_channel_count()
                .filter(|&c| c > 0 && c <= MAX_CHANNELS);
            let wanted = requested.unwrap_or(effect_channels);
            let reformat = match requested {
                Some(c) => Format::Speakers(c) != format,
                None => wanted != channels,
            };

            if !reformat {
                self.scratch.set_format(frames, channels);
                effect.process_block(self.mix.as_slice(), self.scratch.as_mut_slice(), channels);
                self.mix.copy_from(self.scratch.as_slice());
                continue;
            }

            let reduced = Format::Speakers(wanted);
            self.down_conv.prepare(format, reduced, 0.0);
            self.up_conv.prepare(reduced, format, 0.0);

            self.down_in.set_format(frames, wanted);
            self.down_out.set_format(frames, wanted);
            self.down_conv
                .apply(self.mix.as_slice(), self.down_in.as_mut_slice(), frames, 1.0);
            effect.process_block(self.down_in.as_slice(), self.down_out.as_mut_slice(), wanted);

            self.mix.fill_silence();
            self.up_conv
                .apply(self.down_out.as_slice(), self.mix.as_mut_slice(), frames, 1.0);
        }
    }

    /// Convert the mix into the caller's format
    pub(crate) fn finish_block(&mut self, target: Format, yaw: f32, frames: usize) {
        self.output_conv.prepare(self.format, target, yaw);
        self.output.set_format(frames, target.channels());
        self.output_conv
            .apply(self.mix.as_slice(), self.output.as_mut_slice(), frames, 1.0);
    }
}
