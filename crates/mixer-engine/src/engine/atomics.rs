//! Lock-free per-slot status shared from the render thread to the control thread
//!
//! The render thread is the only writer. Flags are published after every
//! block; the control side reads them without locking and sees an
//! eventually-consistent view.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Status of one source slot as last published by the render thread
///
/// `generation` identifies which `init` the flags belong to. A control-side
/// reader ignores flags from an older generation, so a freshly initialised
/// voice never observes the `done` flag of the slot's previous occupant.
pub struct SlotAtomics {
    /// Init generation the flags below belong to
    pub generation: AtomicU32,
    /// The voice has finished reading its source data
    pub done: AtomicBool,
    /// The voice is done and its effect chain has rung out
    pub effect_tails_done: AtomicBool,
    /// A 3D channel map was zeroed because the output format changed
    pub needs_speaker_map: AtomicBool,
    /// Source frames consumed since init
    pub frames_played: AtomicU64,
    /// Underrun events since init
    pub underruns: AtomicU64,
    /// Segments the render thread has finished with, over the slot's lifetime
    pub segments_retired: AtomicU64,
}

impl SlotAtomics {
    pub fn new() -> Self {
        Self {
            generation: AtomicU32::new(0),
            done: AtomicBool::new(false),
            effect_tails_done: AtomicBool::new(false),
            needs_speaker_map: AtomicBool::new(false),
            frames_played: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            segments_retired: AtomicU64::new(0),
        }
    }

    /// Generation of the published flags (lock-free)
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_effect_tails_done(&self) -> bool {
        self.effect_tails_done.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn needs_speaker_map(&self) -> bool {
        self.needs_speaker_map.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn segments_retired(&self) -> u64 {
        self.segments_retired.load(Ordering::Relaxed)
    }

    /// Publish a snapshot from the render thread
    pub(crate) fn publish(&self, status: &SlotStatus) {
        self.done.store(status.done, Ordering::Relaxed);
        self.effect_tails_done.store(status.effect_tails_done, Ordering::Relaxed);
        self.needs_speaker_map.store(status.needs_speaker_map, Ordering::Relaxed);
        self.frames_played.store(status.frames_played, Ordering::Relaxed);
        self.underruns.store(status.underruns, Ordering::Relaxed);
        self.segments_retired.store(status.segments_retired, Ordering::Relaxed);
        // Flags above become visible to any reader that observes this generation
        self.generation.store(status.generation, Ordering::Release);
    }
}

impl Default for SlotAtomics {
    fn default() -> Self {
        Self::new()
    }
}

/// Render-side snapshot written into [`SlotAtomics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotStatus {
    pub generation: u32,
    pub done: bool,
    pub effect_tails_done: bool,
    pub needs_speaker_map: bool,
    pub frames_played: u64,
    pub underruns: u64,
    pub segments_retired: u64,
}
