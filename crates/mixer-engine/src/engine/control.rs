//! Control-side half of the mixer
//!
//! [`MixerControl`] is everything a game or application thread talks to. It
//! owns the producer end of the command ring, the free list of source slots,
//! a mirror of the submix topology and the collector thread that frees
//! whatever the render thread lets go of. None of its methods block on the
//! render thread: each validates its arguments, turns them into a
//! [`MixerCommand`] and pushes it onto the ring.
//!
//! Status flows back through [`SlotAtomics`]. Every `init` bumps the slot's
//! generation so flags left over from the slot's previous voice are never
//! reported for the new one.

use std::sync::Arc;

use basedrop::{Handle, Owned, Shared};

use super::atomics::SlotAtomics;
use super::buffer_queue::{BufferQueueListener, PcmSegment};
use super::command::{MixerCommand, SourceInit};
use super::error::{MixerError, MixerResult};
use super::gc::GcThread;
use super::slot::{MAX_PITCH, MAX_VOLUME, MIN_LPF_HZ, MIN_PITCH};
use super::voice::SourceVoice;
use crate::config::MixerConfig;
use crate::effect::plugin::SourcePlugins;
use crate::effect::{SourceEffect, SourceEffectChain, SubmixEffect, SubmixEffectChain};
use crate::spatial::{
    AmbisonicsStreamId, AmbisonicsStreamPool, ChannelMap, ChannelOrder, SpatialParams,
    SpeakerLayout,
};
use crate::submix::{ChannelLayout, SubmixNode};
use crate::types::{SlotId, SubmixId, MAX_CHANNELS};

/// Everything needed to start a voice
pub struct SourceInitParams {
    /// Interleaved channel count of the source (1-8)
    pub channels: usize,
    /// Channel ordering of multichannel source data
    pub order: ChannelOrder,
    /// Data arrives incrementally; an empty queue is an underrun, not the end
    pub streaming: bool,
    /// Mono sources play from the centre speaker only
    pub center_only: bool,
    /// Sample rate of the source data; 0 means the device rate
    pub sample_rate: u32,
    pub listener: Option<Box<dyn BufferQueueListener>>,
    pub effects: Vec<Box<dyn SourceEffect>>,
    /// Occlusion, reverb-send and spatializer plugins, run after `effects`
    pub plugins: Option<SourcePlugins>,
    /// Initial routes; empty routes the voice to the master at unity
    pub sends: Vec<(SubmixId, f32)>,
}

impl SourceInitParams {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            order: ChannelOrder::Standard,
            streaming: false,
            center_only: false,
            sample_rate: 0,
            listener: None,
            effects: Vec::new(),
            plugins: None,
            sends: Vec::new(),
        }
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_order(mut self, order: ChannelOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_center_only(mut self, center_only: bool) -> Self {
        self.center_only = center_only;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_listener(mut self, listener: Box<dyn BufferQueueListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_effect(mut self, effect: Box<dyn SourceEffect>) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_plugins(mut self, plugins: SourcePlugins) -> Self {
        self.plugins = Some(plugins);
        self
    }

    pub fn with_send(mut self, submix: SubmixId, level: f32) -> Self {
        self.sends.push((submix, level));
        self
    }
}

/// Control-side bookkeeping for one slot
#[derive(Default)]
struct SlotControl {
    initialized: bool,
    channels: usize,
    /// Source channels of the channel map; 2 behind a spatializer
    map_channels: usize,
    generation: u32,
    /// Segments submitted over the slot's lifetime
    submitted: u64,
    last_underruns: u64,
    listener: Option<Shared<Box<dyn BufferQueueListener>>>,
}

/// Control-side mirror of one registered submix
#[derive(Debug, Clone, Copy)]
struct SubmixEntry {
    parent: Option<SubmixId>,
    layout: ChannelLayout,
    ambisonics: Option<AmbisonicsStreamId>,
}

/// The control thread's handle on a running mixer
pub struct MixerControl {
    producer: rtrb::Producer<MixerCommand>,
    atomics: Arc<[SlotAtomics]>,
    free: Vec<SlotId>,
    slots: Vec<SlotControl>,
    /// Releases that did not fit in the command ring yet
    pending_releases: Vec<SlotId>,
    submixes: Vec<Option<SubmixEntry>>,
    ambisonics: AmbisonicsStreamPool,
    layout: SpeakerLayout,
    config: MixerConfig,
    // Declared last so every field above is dropped before the collector stops
    gc: GcThread,
}

impl MixerControl {
    pub(crate) fn new(
        producer: rtrb::Producer<MixerCommand>,
        atomics: Arc<[SlotAtomics]>,
        layout: SpeakerLayout,
        config: MixerConfig,
        gc: GcThread,
    ) -> Self {
        let capacity = config.max_sources;
        let mut submixes = vec![None; config.max_submixes + 1];
        submixes[SubmixId::MASTER.index()] = Some(SubmixEntry {
            parent: None,
            layout: ChannelLayout::Device,
            ambisonics: None,
        });

        Self {
            producer,
            atomics,
            // Reversed so slot 0 is handed out first
            free: (0..capacity).rev().map(SlotId).collect(),
            slots: (0..capacity).map(|_| SlotControl::default()).collect(),
            pending_releases: Vec::with_capacity(capacity),
            submixes,
            ambisonics: AmbisonicsStreamPool::new(config.max_ambisonics_streams),
            layout,
            config,
            gc,
        }
    }

    /// Handle for allocating payloads the render thread may drop
    #[inline]
    pub fn gc_handle(&self) -> &Handle {
        self.gc.handle()
    }

    #[inline]
    pub fn config(&self) -> &MixerConfig {
        &self.config
    }

    #[inline]
    pub fn device_channels(&self) -> usize {
        self.layout.channels()
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    /// Voices currently acquired
    pub fn active_sources(&self) -> usize {
        self.slots.len() - self.free.len() - self.pending_releases.len()
    }

    fn send(&mut self, command: MixerCommand) -> MixerResult<()> {
        self.producer
            .push(command)
            .map_err(|_| MixerError::CommandQueueFull)
    }

    fn slot_control(&self, slot: SlotId) -> MixerResult<&SlotControl> {
        match self.slots.get(slot.index()) {
            Some(ctl) if ctl.initialized => Ok(ctl),
            _ => Err(MixerError::SourceNotInitialized(slot)),
        }
    }

    fn check_submix(&self, submix: SubmixId) -> MixerResult<SubmixEntry> {
        self.submixes
            .get(submix.index())
            .copied()
            .flatten()
            .ok_or(MixerError::UnknownSubmix(submix))
    }

    // ─────────────────────────────────────────────────────────────
    // Source lifecycle
    // ─────────────────────────────────────────────────────────────

    /// Take a free slot from the pool
    pub fn acquire(&mut self) -> MixerResult<SourceVoice> {
        match self.free.pop() {
            Some(slot) => Ok(SourceVoice::new(slot)),
            None => Err(MixerError::SourcePoolExhausted {
                capacity: self.slots.len(),
            }),
        }
    }

    pub(crate) fn init_source(
        &mut self,
        slot: SlotId,
        params: SourceInitParams,
    ) -> MixerResult<()> {
        if slot.index() >= self.slots.len() {
            return Err(MixerError::SourceNotInitialized(slot));
        }
        let channels = params.channels;
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(MixerError::UnsupportedChannelCount(channels));
        }
        let plugins = params.plugins.filter(|plugins| !plugins.is_empty());
        if plugins.as_ref().is_some_and(SourcePlugins::has_spatializer) && channels != 1 {
            return Err(MixerError::SpatializerNeedsMono(channels));
        }
        let map_channels = plugins
            .as_ref()
            .map_or(channels, |plugins| plugins.output_channels(channels));

        let mut sends = if params.sends.is_empty() {
            vec![(SubmixId::MASTER, 1.0)]
        } else {
            params.sends
        };
        for (submix, level) in &mut sends {
            self.check_submix(*submix)?;
            *level = validate_send(*level)?;
        }

        let device_rate = self.config.sample_rate;
        let rate_ratio = match params.sample_rate {
            0 => 1.0,
            rate => rate as f64 / device_rate as f64,
        };

        let effects = if params.effects.is_empty() {
            None
        } else {
            let mut chain = SourceEffectChain::new(params.effects);
            chain.init(device_rate, channels);
            Some(Owned::new(self.gc.handle(), chain))
        };
        let plugins = plugins.map(|mut plugins| {
            plugins.init(device_rate, self.config.block_frames);
            Owned::new(self.gc.handle(), plugins)
        });
        let listener = params
            .listener
            .map(|listener| Shared::new(self.gc.handle(), listener));

        let generation = self.slots[slot.index()].generation.wrapping_add(1).max(1);
        let init = SourceInit {
            generation,
            channels,
            order: params.order,
            streaming: params.streaming,
            center_only: params.center_only,
            rate_ratio,
            listener: listener.clone(),
            effects,
            plugins,
            sends,
        };
        let init = Owned::new(self.gc.handle(), init);
        self.send(MixerCommand::InitSource { slot, init })?;

        let ctl = &mut self.slots[slot.index()];
        ctl.initialized = true;
        ctl.channels = channels;
        ctl.map_channels = map_channels;
        ctl.generation = generation;
        ctl.last_underruns = 0;
        ctl.listener = listener;
        Ok(())
    }

    /// Return a slot to the pool; never fails
    ///
    /// If the command ring is full the release is retried from [`Self::update`]
    /// and the slot stays out of the pool until it goes through.
    pub(crate) fn release_source(&mut self, slot: SlotId) {
        let Some(ctl) = self.slots.get_mut(slot.index()) else {
            return;
        };
        if let Some(listener) = ctl.listener.take() {
            listener.on_release(slot);
        }
        ctl.initialized = false;

        match self.send(MixerCommand::Release { slot }) {
            Ok(()) => self.free.push(slot),
            Err(_) => {
                log::warn!("Command queue full, deferring release of {}", slot);
                self.pending_releases.push(slot);
            }
        }
    }

    pub(crate) fn play(&mut self, slot: SlotId) -> MixerResult<()> {
        self.slot_control(slot)?;
        self.send(MixerCommand::Play { slot })
    }

    pub(crate) fn stop(&mut self, slot: SlotId) -> MixerResult<()> {
        self.slot_control(slot)?;
        self.send(MixerCommand::Stop { slot })
    }

    pub(crate) fn pause(&mut self, slot: SlotId) -> MixerResult<()> {
        self.slot_control(slot)?;
        self.send(MixerCommand::Pause { slot })
    }

    // ─────────────────────────────────────────────────────────────
    // Source parameters
    // ─────────────────────────────────────────────────────────────

    /// Returns the clamped pitch that was sent
    pub(crate) fn set_pitch(&mut self, slot: SlotId, pitch: f32) -> MixerResult<f32> {
        self.slot_control(slot)?;
        let pitch = finite("pitch", pitch)?.clamp(MIN_PITCH, MAX_PITCH);
        self.send(MixerCommand::SetPitch { slot, pitch })?;
        Ok(pitch)
    }

    /// Returns the clamped volume that was sent
    pub(crate) fn set_volume(&mut self, slot: SlotId, volume: f32) -> MixerResult<f32> {
        self.slot_control(slot)?;
        let volume = finite("volume", volume)?.clamp(0.0, MAX_VOLUME);
        self.send(MixerCommand::SetVolume { slot, volume })?;
        Ok(volume)
    }

    /// Returns the clamped cutoff that was sent
    pub(crate) fn set_lpf_frequency(&mut self, slot: SlotId, hz: f32) -> MixerResult<f32> {
        self.slot_control(slot)?;
        let nyquist = self.config.sample_rate as f32 / 2.0;
        let hz = finite("lpf frequency", hz)?.clamp(MIN_LPF_HZ, nyquist);
        self.send(MixerCommand::SetLpfFrequency { slot, hz })?;
        Ok(hz)
    }

    pub(crate) fn set_channel_map(
        &mut self,
        slot: SlotId,
        gains: &[f32],
        is_3d: bool,
        center_only: bool,
    ) -> MixerResult<()> {
        let channels = self.slot_control(slot)?.map_channels;
        let map = ChannelMap::from_gains(channels, self.layout.channels(), gains)?;
        let map = Owned::new(self.gc.handle(), map);
        self.send(MixerCommand::SetChannelMap {
            slot,
            map,
            is_3d,
            center_only,
        })
    }

    pub(crate) fn set_spatial_params(
        &mut self,
        slot: SlotId,
        params: SpatialParams,
    ) -> MixerResult<()> {
        self.slot_control(slot)?;
        finite("azimuth", params.azimuth)?;
        let distance = finite("distance", params.distance)?;
        let omni_radius = finite("omni radius", params.omni_radius)?;
        if distance < 0.0 {
            return Err(MixerError::InvalidParameter {
                name: "distance",
                value: distance,
            });
        }
        let params = SpatialParams {
            azimuth: params.azimuth.rem_euclid(360.0),
            distance,
            omni_radius: omni_radius.max(0.0),
        };
        self.send(MixerCommand::SetSpatialParams { slot, params })
    }

    pub(crate) fn set_submix_send(
        &mut self,
        slot: SlotId,
        submix: SubmixId,
        level: f32,
    ) -> MixerResult<()> {
        self.slot_control(slot)?;
        self.check_submix(submix)?;
        let level = validate_send(level)?;
        self.send(MixerCommand::SetSubmixSend { slot, submix, level })
    }

    pub(crate) fn set_debug_solo(&mut self, slot: SlotId, solo: bool) -> MixerResult<()> {
        self.slot_control(slot)?;
        self.send(MixerCommand::SetDebugSolo { slot, solo })
    }

    pub(crate) fn set_source_effect_param(
        &mut self,
        slot: SlotId,
        effect: usize,
        param: usize,
        value: f32,
    ) -> MixerResult<()> {
        self.slot_control(slot)?;
        let value = finite("effect parameter", value)?.clamp(0.0, 1.0);
        self.send(MixerCommand::SetSourceEffectParam {
            slot,
            effect,
            param,
            value,
        })
    }

    pub(crate) fn set_source_effect_bypass(
        &mut self,
        slot: SlotId,
        effect: usize,
        bypass: bool,
    ) -> MixerResult<()> {
        self.slot_control(slot)?;
        self.send(MixerCommand::SetSourceEffectBypass { slot, effect, bypass })
    }

    /// Queue a decoded segment, enforcing the per-slot outstanding limit
    pub(crate) fn submit_buffer(&mut self, slot: SlotId, segment: PcmSegment) -> MixerResult<()> {
        let ctl = self.slot_control(slot)?;
        if segment.channels() != ctl.channels {
            return Err(MixerError::InvalidParameter {
                name: "segment channels",
                value: segment.channels() as f32,
            });
        }
        let retired = self.atomics[slot.index()].segments_retired();
        let outstanding = ctl.submitted.saturating_sub(retired);
        let max = self.config.max_queued_buffers;
        if outstanding >= max as u64 {
            return Err(MixerError::BufferQueueFull { slot, max });
        }

        let segment = Shared::new(self.gc.handle(), segment);
        self.send(MixerCommand::SubmitBuffer { slot, segment })?;
        self.slots[slot.index()].submitted += 1;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Status (lock-free reads)
    // ─────────────────────────────────────────────────────────────

    /// The atomics for `slot`, if they already describe its current voice
    fn current_status(&self, slot: SlotId) -> Option<&SlotAtomics> {
        let ctl = self.slots.get(slot.index()).filter(|c| c.initialized)?;
        let atomics = self.atomics.get(slot.index())?;
        (atomics.generation() == ctl.generation).then_some(atomics)
    }

    pub(crate) fn is_done(&self, slot: SlotId) -> bool {
        self.current_status(slot).is_some_and(SlotAtomics::is_done)
    }

    pub(crate) fn is_effect_tails_done(&self, slot: SlotId) -> bool {
        self.current_status(slot)
            .is_some_and(SlotAtomics::is_effect_tails_done)
    }

    pub(crate) fn needs_speaker_map(&self, slot: SlotId) -> bool {
        self.current_status(slot)
            .is_some_and(SlotAtomics::needs_speaker_map)
    }

    pub(crate) fn frames_played(&self, slot: SlotId) -> u64 {
        self.current_status(slot)
            .map_or(0, SlotAtomics::frames_played)
    }

    pub(crate) fn underruns(&self, slot: SlotId) -> u64 {
        self.current_status(slot).map_or(0, SlotAtomics::underruns)
    }

    /// Periodic housekeeping; call from the control loop
    ///
    /// Retries deferred releases and logs underruns that happened since the
    /// previous call.
    pub fn update(&mut self) {
        while let Some(&slot) = self.pending_releases.last() {
            if self.send(MixerCommand::Release { slot }).is_err() {
                break;
            }
            self.pending_releases.pop();
            self.free.push(slot);
        }

        for i in 0..self.slots.len() {
            let slot = SlotId(i);
            let underruns = self.underruns(slot);
            let ctl = &mut self.slots[i];
            if ctl.initialized && underruns > ctl.last_underruns {
                log::warn!(
                    "{} underran {} time(s) ({} total)",
                    slot,
                    underruns - ctl.last_underruns,
                    underruns
                );
                ctl.last_underruns = underruns;
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Submixes
    // ─────────────────────────────────────────────────────────────

    /// Create a submix under `parent`
    pub fn register_submix(
        &mut self,
        layout: ChannelLayout,
        parent: SubmixId,
        effects: Vec<Box<dyn SubmixEffect>>,
    ) -> MixerResult<SubmixId> {
        self.check_submix(parent)?;
        let index = self
            .submixes
            .iter()
            .skip(1)
            .position(Option::is_none)
            .map(|i| i + 1)
            .ok_or(MixerError::SubmixCapacityExhausted(self.config.max_submixes))?;
        let id = SubmixId(index);

        let mut node = SubmixNode::new(
            id,
            layout,
            Some(parent),
            SubmixEffectChain::new(effects),
            self.config.sample_rate,
            self.layout.channels(),
            self.config.block_frames,
            self.config.max_sources,
            self.config.max_submixes + 1,
        )?;

        let ambisonics = match layout {
            ChannelLayout::Ambisonics => {
                let stream = self.ambisonics.acquire()?;
                node = node.with_ambisonics_stream(stream);
                Some(stream)
            }
            _ => None,
        };
        node.configure();

        let node = Owned::new(self.gc.handle(), node);
        if let Err(e) = self.send(MixerCommand::AddSubmix { node }) {
            if let Some(stream) = ambisonics {
                self.ambisonics.release(stream);
            }
            return Err(e);
        }

        self.submixes[index] = Some(SubmixEntry {
            parent: Some(parent),
            layout,
            ambisonics,
        });
        log::info!("Registered {} ({:?}) under {}", id, layout, parent);
        Ok(id)
    }

    /// Tear a submix down; its children move to its parent
    pub fn unregister_submix(&mut self, submix: SubmixId) -> MixerResult<()> {
        if submix.is_master() {
            return Err(MixerError::MasterSubmix);
        }
        let entry = self.check_submix(submix)?;
        self.send(MixerCommand::RemoveSubmix { submix })?;

        let new_parent = entry.parent.unwrap_or(SubmixId::MASTER);
        for other in self.submixes.iter_mut().flatten() {
            if other.parent == Some(submix) {
                other.parent = Some(new_parent);
            }
        }
        if let Some(stream) = entry.ambisonics {
            self.ambisonics.release(stream);
        }
        self.submixes[submix.index()] = None;
        log::info!("Unregistered {}", submix);
        Ok(())
    }

    /// Move a submix under a new parent, rejecting cycles
    pub fn set_submix_parent(&mut self, submix: SubmixId, parent: SubmixId) -> MixerResult<()> {
        if submix.is_master() {
            return Err(MixerError::MasterSubmix);
        }
        self.check_submix(submix)?;
        self.check_submix(parent)?;

        // Walk up from the new parent; meeting `submix` means a cycle
        let mut cursor = Some(parent);
        while let Some(current) = cursor {
            if current == submix {
                return Err(MixerError::SubmixCycle {
                    child: submix,
                    parent,
                });
            }
            cursor = self.check_submix(current)?.parent;
        }

        self.send(MixerCommand::SetSubmixParent { submix, parent })?;
        if let Some(Some(entry)) = self.submixes.get_mut(submix.index()) {
            entry.parent = Some(parent);
        }
        Ok(())
    }

    /// Parent of a registered submix (`None` for the master)
    pub fn submix_parent(&self, submix: SubmixId) -> MixerResult<Option<SubmixId>> {
        Ok(self.check_submix(submix)?.parent)
    }

    pub fn submix_layout(&self, submix: SubmixId) -> MixerResult<ChannelLayout> {
        Ok(self.check_submix(submix)?.layout)
    }

    pub fn set_submix_effect_param(
        &mut self,
        submix: SubmixId,
        effect: usize,
        param: usize,
        value: f32,
    ) -> MixerResult<()> {
        self.check_submix(submix)?;
        let value = finite("effect parameter", value)?.clamp(0.0, 1.0);
        self.send(MixerCommand::SetSubmixEffectParam {
            submix,
            effect,
            param,
            value,
        })
    }

    pub fn set_submix_effect_bypass(
        &mut self,
        submix: SubmixId,
        effect: usize,
        bypass: bool,
    ) -> MixerResult<()> {
        self.check_submix(submix)?;
        self.send(MixerCommand::SetSubmixEffectBypass { submix, effect, bypass })
    }

    // ─────────────────────────────────────────────────────────────
    // Device
    // ─────────────────────────────────────────────────────────────

    /// Listener yaw in degrees clockwise, used when decoding ambisonic submixes
    pub fn set_listener_orientation(&mut self, yaw: f32) -> MixerResult<()> {
        let yaw = finite("listener yaw", yaw)?.rem_euclid(360.0);
        self.send(MixerCommand::SetListenerOrientation { yaw })
    }

    /// The output device now has `channels` channels
    ///
    /// Every voice's channel map is regenerated on the render thread. Voices
    /// with an explicit 3D map are silenced and report `needs_speaker_map`
    /// until they get a new one.
    pub fn set_device_channels(&mut self, channels: usize) -> MixerResult<()> {
        let layout = SpeakerLayout::new(channels)?;
        if layout.channels() == self.layout.channels() {
            return Ok(());
        }
        let shared = Shared::new(self.gc.handle(), layout);
        self.send(MixerCommand::UpdateDeviceChannels { layout: shared })?;
        log::info!(
            "Device channel count changed: {} -> {}",
            self.layout.channels(),
            channels
        );
        self.layout = layout;
        Ok(())
    }
}

fn finite(name: &'static str, value: f32) -> MixerResult<f32> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MixerError::InvalidParameter { name, value })
    }
}

fn validate_send(level: f32) -> MixerResult<f32> {
    Ok(finite("send level", level)?.clamp(0.0, 1.0))
}
