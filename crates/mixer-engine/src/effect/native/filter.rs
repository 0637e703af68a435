//! One-pole low-pass filter built into every source slot

use crate::types::{Sample, MAX_CHANNELS};

/// Per-channel one-pole low-pass
///
/// `y[n] = a0 * x[n] + b1 * y[n-1]` with `b1 = exp(-π · f_norm)` and
/// `a0 = 1 - b1`, where `f_norm = 2 · cutoff / sample_rate`. At or above
/// Nyquist (`f_norm >= 1`) the filter is bypassed so the path stays
/// bit-transparent.
#[derive(Debug, Clone)]
pub struct OnePoleLowPass {
    a0: f32,
    b1: f32,
    z1: [f32; MAX_CHANNELS],
    normalized_cutoff: f32,
    bypassed: bool,
}

impl OnePoleLowPass {
    /// Create a bypassed filter
    pub fn new() -> Self {
        Self {
            a0: 1.0,
            b1: 0.0,
            z1: [0.0; MAX_CHANNELS],
            normalized_cutoff: 1.0,
            bypassed: true,
        }
    }

    /// Set the cutoff as a fraction of Nyquist
    ///
    /// Coefficients are only recomputed when the value changes.
    #[inline]
    pub fn set_normalized_cutoff(&mut self, normalized: f32) {
        if normalized == self.normalized_cutoff {
            return;
        }
        self.normalized_cutoff = normalized;
        if normalized >= 1.0 {
            self.bypassed = true;
            return;
        }
        self.bypassed = false;
        self.b1 = (-std::f32::consts::PI * normalized.max(0.0)).exp();
        self.a0 = 1.0 - self.b1;
    }

    /// Set the cutoff in Hz for the given sample rate
    pub fn set_cutoff(&mut self, cutoff_hz: f32, sample_rate: u32) {
        self.set_normalized_cutoff(2.0 * cutoff_hz / sample_rate as f32);
    }

    #[inline]
    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    /// Filter one interleaved frame in place
    #[inline]
    pub fn process_frame(&mut self, frame: &mut [Sample]) {
        if self.bypassed {
            return;
        }
        for (sample, z) in frame.iter_mut().zip(self.z1.iter_mut()) {
            *z = *sample * self.a0 + self.b1 * *z;
            *sample = *z;
        }
    }

    /// Clear filter memory and return to bypass
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for OnePoleLowPass {
    fn default() -> Self {
        Self::new()
    }
}
