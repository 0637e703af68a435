//! Render-side source manager
//!
//! Owns the slot pool and renders every active slot once per tick. With more
//! than one worker thread configured, contiguous ranges of slots are rendered
//! in parallel on a private rayon pool and joined before the submix pass.
//! Status snapshots are published to the lock-free [`SlotAtomics`] after every
//! block.

use std::sync::Arc;

use basedrop::Shared;
use rayon::prelude::*;

use super::atomics::SlotAtomics;
use super::buffer_queue::PcmSegment;
use super::command::SourceInit;
use super::slot::{RenderContext, RenderSettings, SourceSlot};
use crate::config::MixerConfig;
use crate::spatial::{ChannelMap, SpatialParams, SpeakerLayout};
use crate::types::SlotId;

/// The pool of source slots and the per-block render loop
pub struct SourceManager {
    slots: Vec<SourceSlot>,
    atomics: Arc<[SlotAtomics]>,
    layout: Shared<SpeakerLayout>,
    settings: RenderSettings,
    pool: Option<rayon::ThreadPool>,
    /// Slots rendered per parallel task
    chunk_size: usize,
}

impl SourceManager {
    /// Allocate the whole slot pool (control thread)
    pub fn new(
        config: &MixerConfig,
        atomics: Arc<[SlotAtomics]>,
        layout: Shared<SpeakerLayout>,
    ) -> Self {
        let slots = (0..config.max_sources)
            .map(|i| {
                SourceSlot::new(
                    SlotId(i),
                    config.block_frames,
                    config.max_queued_buffers,
                    config.sample_rate,
                )
            })
            .collect();

        let pool = if config.worker_threads > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(config.worker_threads)
                .thread_name(|i| format!("mixer-worker-{}", i))
                .build()
            {
                Ok(pool) => {
                    log::info!("Source rendering on {} worker threads", config.worker_threads);
                    Some(pool)
                }
                Err(e) => {
                    log::warn!("Failed to build mixer worker pool, rendering serially: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let workers = config.worker_threads.max(1);
        let chunk_size = config.max_sources.div_ceil(workers).max(1);

        Self {
            slots,
            atomics,
            layout,
            settings: RenderSettings {
                sample_rate: config.sample_rate,
                tail_threshold: config.effect_tail_threshold,
                envelope_release: config.envelope_release_coefficient(),
                omni_exponent: config.omni_blend_exponent,
            },
            pool,
            chunk_size,
        }
    }

    #[inline]
    pub fn slots(&self) -> &[SourceSlot] {
        &self.slots
    }

    #[inline]
    pub fn slot(&self, slot: SlotId) -> Option<&SourceSlot> {
        self.slots.get(slot.index())
    }

    #[inline]
    pub fn layout(&self) -> &SpeakerLayout {
        &self.layout
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot_mut(&mut self, slot: SlotId) -> Option<&mut SourceSlot> {
        self.slots.get_mut(slot.index())
    }

    // ─────────────────────────────────────────────────────────────
    // Command handlers
    // ─────────────────────────────────────────────────────────────

    pub(crate) fn init_source(&mut self, slot: SlotId, init: &mut SourceInit) {
        let layout = *self.layout;
        let sample_rate = self.settings.sample_rate;
        if let Some(s) = self.slot_mut(slot) {
            s.init(init, &layout, sample_rate);
        }
    }

    pub(crate) fn release(&mut self, slot: SlotId) {
        if let Some(s) = self.slot_mut(slot) {
            s.release();
        }
    }

    pub(crate) fn play(&mut self, slot: SlotId) {
        if let Some(s) = self.slot_mut(slot) {
            s.play();
        }
    }

    pub(crate) fn stop(&mut self, slot: SlotId) {
        if let Some(s) = self.slot_mut(slot) {
            s.stop();
        }
    }

    pub(crate) fn pause(&mut self, slot: SlotId) {
        if let Some(s) = self.slot_mut(slot) {
            s.pause();
        }
    }

    pub(crate) fn set_pitch(&mut self, slot: SlotId, pitch: f32) {
        if let Some(s) = self.slot_mut(slot) {
            s.set_pitch(pitch);
        }
    }

    pub(crate) fn set_volume(&mut self, slot: SlotId, volume: f32) {
        if let Some(s) = self.slot_mut(slot) {
            s.set_volume(volume);
        }
    }

    pub(crate) fn set_lpf_frequency(&mut self, slot: SlotId, hz: f32) {
        if let Some(s) = self.slot_mut(slot) {
            s.set_lpf_frequency(hz);
        }
    }

    pub(crate) fn set_channel_map(
        &mut self,
        slot: SlotId,
        map: &ChannelMap,
        is_3d: bool,
        center_only: bool,
    ) {
        let layout = *self.layout;
        let exponent = self.settings.omni_exponent;
        if let Some(s) = self.slot_mut(slot) {
            s.set_channel_map(map, is_3d, center_only, &layout, exponent);
        }
    }

    pub(crate) fn set_spatial_params(&mut self, slot: SlotId, params: SpatialParams) {
        let layout = *self.layout;
        let exponent = self.settings.omni_exponent;
        if let Some(s) = self.slot_mut(slot) {
            s.set_spatial_params(params, &layout, exponent);
        }
    }

    pub(crate) fn set_debug_solo(&mut self, slot: SlotId, solo: bool) {
        if let Some(s) = self.slot_mut(slot) {
            s.set_debug_solo(solo);
        }
    }

    pub(crate) fn set_effect_param(
        &mut self,
        slot: SlotId,
        effect: usize,
        param: usize,
        value: f32,
    ) {
        if let Some(s) = self.slot_mut(slot) {
            s.set_effect_param(effect, param, value);
        }
    }

    pub(crate) fn set_effect_bypass(&mut self, slot: SlotId, effect: usize, bypass: bool) {
        if let Some(s) = self.slot_mut(slot) {
            s.set_effect_bypass(effect, bypass);
        }
    }

    pub(crate) fn submit(&mut self, slot: SlotId, segment: Shared<PcmSegment>) {
        if let Some(s) = self.slot_mut(slot) {
            s.submit(segment);
        }
    }

    /// Swap in a new speaker layout and regenerate every channel map
    ///
    /// The old layout is dropped here; `Shared` defers the free to the collector.
    pub(crate) fn update_device_layout(&mut self, layout: Shared<SpeakerLayout>) {
        self.layout = layout;
        let layout = *self.layout;
        let exponent = self.settings.omni_exponent;
        for slot in &mut self.slots {
            slot.update_device_layout(&layout, exponent);
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Rendering
    // ─────────────────────────────────────────────────────────────

    /// Render every active slot for one block and publish their status
    pub fn compute_next_block(&mut self, frames: usize) {
        let solo_active = self.slots.iter().any(SourceSlot::is_debug_solo);
        let layout = *self.layout;
        let ctx = RenderContext {
            frames,
            layout: &layout,
            settings: &self.settings,
            solo_active,
        };

        match &self.pool {
            Some(pool) => {
                let chunk_size = self.chunk_size;
                let slots = &mut self.slots;
                pool.install(|| {
                    slots.par_chunks_mut(chunk_size).for_each(|chunk| {
                        for slot in chunk {
                            slot.render(&ctx);
                        }
                    });
                });
            }
            None => {
                for slot in &mut self.slots {
                    slot.render(&ctx);
                }
            }
        }

        // Idle slots publish too, so segments retired by a release are visible
        for (slot, atomics) in self.slots.iter().zip(self.atomics.iter()) {
            atomics.publish(&slot.status());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Collector;

    fn manager(collector: &Collector, worker_threads: usize) -> SourceManager {
        let config = MixerConfig {
            max_sources: 8,
            block_frames: 64,
            worker_threads,
            ..Default::default()
        };
        let atomics: Arc<[SlotAtomics]> =
            (0..config.max_sources).map(|_| SlotAtomics::new()).collect();
        let layout = Shared::new(&collector.handle(), SpeakerLayout::new(2).unwrap());
        SourceManager::new(&config, atomics, layout)
    }

    fn init(generation: u32) -> SourceInit {
        SourceInit {
            generation,
            channels: 1,
            order: Default::default(),
            streaming: false,
            center_only: false,
            rate_ratio: 1.0,
            listener: None,
            effects: None,
            plugins: None,
            sends: Vec::new(),
        }
    }

    fn run_to_completion(worker_threads: usize) -> Vec<u64> {
        let collector = Collector::new();
        let mut manager = manager(&collector, worker_threads);
        for i in 0..8 {
            let slot = SlotId(i);
            manager.init_source(slot, &mut init(1));
            let segment = PcmSegment::new(vec![0.25; 10 * (i + 1)], 1).unwrap();
            manager.submit(slot, Shared::new(&collector.handle(), segment));
            manager.play(slot);
        }
        manager.compute_next_block(64);
        manager.atomics.iter().map(SlotAtomics::frames_played).collect()
    }

    #[test]
    fn test_publishes_status() {
        let played = run_to_completion(0);
        assert_eq!(played, vec![10, 20, 30, 40, 50, 60, 64, 64]);
    }

    #[test]
    fn test_parallel_render_matches_serial() {
        assert_eq!(run_to_completion(0), run_to_completion(3));
    }

    #[test]
    fn test_debug_solo_mutes_others() {
        let collector = Collector::new();
        let mut manager = manager(&collector, 0);
        for i in 0..2 {
            let slot = SlotId(i);
            manager.init_source(slot, &mut init(1));
            let segment = PcmSegment::new(vec![0.5; 256], 1).unwrap();
            manager.submit(slot, Shared::new(&collector.handle(), segment));
            manager.play(slot);
        }
        manager.set_debug_solo(SlotId(1), true);
        manager.compute_next_block(64);

        let muted = manager.slot(SlotId(0)).unwrap().output(64, 2);
        let soloed = manager.slot(SlotId(1)).unwrap().output(64, 2);
        assert!(muted.iter().all(|&s| s == 0.0));
        assert!(soloed.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_device_change_reaches_slots() {
        let collector = Collector::new();
        let mut manager = manager(&collector, 0);
        manager.init_source(SlotId(0), &mut init(1));
        let surround = SpeakerLayout::new(6).unwrap();
        manager.update_device_layout(Shared::new(&collector.handle(), surround));

        assert_eq!(manager.layout().channels(), 6);
        let map = manager.slot(SlotId(0)).unwrap().channel_map();
        assert_eq!(map.output_channels(), 6);
    }
}
