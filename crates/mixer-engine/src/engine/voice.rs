//! User-facing voice handle
//!
//! A [`SourceVoice`] is the only way to reach a source slot from the control
//! side. It is not `Clone`: dropping the handle without calling
//! [`SourceVoice::release`] leaks the slot until the mixer is torn down,
//! which is logged.

use super::buffer_queue::PcmSegment;
use super::control::{MixerControl, SourceInitParams};
use super::error::MixerResult;
use crate::spatial::SpatialParams;
use crate::types::{SlotId, SubmixId};

/// Handle to one acquired source slot
///
/// Pitch, volume and filter cutoff are cached so repeating the current value
/// does not cost a command.
#[derive(Debug)]
pub struct SourceVoice {
    slot: SlotId,
    pitch: Option<f32>,
    volume: Option<f32>,
    lpf_hz: Option<f32>,
    released: bool,
}

impl SourceVoice {
    pub(crate) fn new(slot: SlotId) -> Self {
        Self {
            slot,
            pitch: None,
            volume: None,
            lpf_hz: None,
            released: false,
        }
    }

    #[inline]
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Bind the slot to a new source format; also valid on a voice that is
    /// already playing something else
    pub fn init(&mut self, ctl: &mut MixerControl, params: SourceInitParams) -> MixerResult<()> {
        ctl.init_source(self.slot, params)?;
        self.pitch = None;
        self.volume = None;
        self.lpf_hz = None;
        Ok(())
    }

    /// Give the slot back to the pool
    pub fn release(mut self, ctl: &mut MixerControl) {
        ctl.release_source(self.slot);
        self.released = true;
    }

    pub fn play(&self, ctl: &mut MixerControl) -> MixerResult<()> {
        ctl.play(self.slot)
    }

    pub fn stop(&self, ctl: &mut MixerControl) -> MixerResult<()> {
        ctl.stop(self.slot)
    }

    pub fn pause(&self, ctl: &mut MixerControl) -> MixerResult<()> {
        ctl.pause(self.slot)
    }

    // ─────────────────────────────────────────────────────────────
    // Parameters
    // ─────────────────────────────────────────────────────────────

    /// Playback rate; clamped to 1/8..4
    pub fn set_pitch(&mut self, ctl: &mut MixerControl, pitch: f32) -> MixerResult<()> {
        if self.pitch == Some(pitch) {
            return Ok(());
        }
        ctl.set_pitch(self.slot, pitch)?;
        self.pitch = Some(pitch);
        Ok(())
    }

    /// Linear gain; clamped to 0..4
    pub fn set_volume(&mut self, ctl: &mut MixerControl, volume: f32) -> MixerResult<()> {
        if self.volume == Some(volume) {
            return Ok(());
        }
        ctl.set_volume(self.slot, volume)?;
        self.volume = Some(volume);
        Ok(())
    }

    /// Low-pass cutoff in Hz; at or above Nyquist the filter is bypassed
    pub fn set_lpf_frequency(&mut self, ctl: &mut MixerControl, hz: f32) -> MixerResult<()> {
        if self.lpf_hz == Some(hz) {
            return Ok(());
        }
        ctl.set_lpf_frequency(self.slot, hz)?;
        self.lpf_hz = Some(hz);
        Ok(())
    }

    /// Explicit source × output gain matrix in source-major order
    pub fn set_channel_map(
        &self,
        ctl: &mut MixerControl,
        gains: &[f32],
        is_3d: bool,
        center_only: bool,
    ) -> MixerResult<()> {
        ctl.set_channel_map(self.slot, gains, is_3d, center_only)
    }

    /// Position a mono voice; the panning map is rebuilt on the render thread
    pub fn set_spatial_params(
        &self,
        ctl: &mut MixerControl,
        params: SpatialParams,
    ) -> MixerResult<()> {
        ctl.set_spatial_params(self.slot, params)
    }

    /// Route the voice into `submix` at `level` (0 removes the route)
    pub fn set_submix_send(
        &self,
        ctl: &mut MixerControl,
        submix: SubmixId,
        level: f32,
    ) -> MixerResult<()> {
        ctl.set_submix_send(self.slot, submix, level)
    }

    pub fn set_debug_solo(&self, ctl: &mut MixerControl, solo: bool) -> MixerResult<()> {
        ctl.set_debug_solo(self.slot, solo)
    }

    pub fn set_effect_param(
        &self,
        ctl: &mut MixerControl,
        effect: usize,
        param: usize,
        value: f32,
    ) -> MixerResult<()> {
        ctl.set_source_effect_param(self.slot, effect, param, value)
    }

    pub fn set_effect_bypass(
        &self,
        ctl: &mut MixerControl,
        effect: usize,
        bypass: bool,
    ) -> MixerResult<()> {
        ctl.set_source_effect_bypass(self.slot, effect, bypass)
    }

    // ─────────────────────────────────────────────────────────────
    // Data
    // ─────────────────────────────────────────────────────────────

    pub fn submit_buffer(&self, ctl: &mut MixerControl, segment: PcmSegment) -> MixerResult<()> {
        ctl.submit_buffer(self.slot, segment)
    }

    // ─────────────────────────────────────────────────────────────
    // Status
    // ─────────────────────────────────────────────────────────────

    pub fn is_done(&self, ctl: &MixerControl) -> bool {
        ctl.is_done(self.slot)
    }

    pub fn is_effect_tails_done(&self, ctl: &MixerControl) -> bool {
        ctl.is_effect_tails_done(self.slot)
    }

    pub fn needs_speaker_map(&self, ctl: &MixerControl) -> bool {
        ctl.needs_speaker_map(self.slot)
    }

    pub fn frames_played(&self, ctl: &MixerControl) -> u64 {
        ctl.frames_played(self.slot)
    }

    pub fn underruns(&self, ctl: &MixerControl) -> u64 {
        ctl.underruns(self.slot)
    }
}

impl Drop for SourceVoice {
    fn drop(&mut self) {
        if !self.released {
            log::warn!("{} dropped without release; the slot stays allocated", self.slot);
        }
    }
}
