//! First-order horizontal ambisonics
//!
//! Channels are in ACN order (W, Y, Z, X) with SN3D normalisation. Only the
//! horizontal plane is used, so Z is always zero. Azimuths follow the rest of
//! the crate: degrees clockwise from straight ahead.

use crate::engine::error::{MixerError, MixerResult};
use crate::types::{Sample, AMBISONICS_CHANNELS, MAX_CHANNELS};

use super::layout::SpeakerLayout;

const W: usize = 0;
const Y: usize = 1;
const Z: usize = 2;
const X: usize = 3;

/// Encoding gains for a plane wave arriving from `azimuth` degrees
#[inline]
pub fn encode_gains(azimuth: f32) -> [f32; AMBISONICS_CHANNELS] {
    let theta = -azimuth.to_radians();
    let mut gains = [0.0; AMBISONICS_CHANNELS];
    gains[W] = 1.0;
    gains[Y] = theta.sin();
    gains[Z] = 0.0;
    gains[X] = theta.cos();
    gains
}

/// Encoding gains for every channel of a speaker layout (virtual speakers)
///
/// LFE channels carry no direction and encode to silence.
pub fn speaker_encode_matrix(layout: &SpeakerLayout) -> [[f32; AMBISONICS_CHANNELS]; MAX_CHANNELS] {
    let mut matrix = [[0.0; AMBISONICS_CHANNELS]; MAX_CHANNELS];
    for (ch, row) in matrix.iter_mut().enumerate().take(layout.channels()) {
        if let Some(azimuth) = layout.azimuth(ch) {
            *row = encode_gains(azimuth);
        }
    }
    matrix
}

/// Decodes a first-order stream to a speaker layout
///
/// Each positioned speaker samples the sound field in its own direction,
/// rotated by the listener yaw. A single-speaker layout only receives W.
#[derive(Debug, Clone)]
pub struct AmbisonicsDecoder {
    matrix: [[f32; AMBISONICS_CHANNELS]; MAX_CHANNELS],
    channels: usize,
    yaw: f32,
}

impl AmbisonicsDecoder {
    pub fn new(layout: &SpeakerLayout, yaw: f32) -> Self {
        let mut decoder = Self {
            matrix: [[0.0; AMBISONICS_CHANNELS]; MAX_CHANNELS],
            channels: 0,
            yaw: f32::NAN,
        };
        decoder.configure(layout, yaw);
        decoder
    }

    /// Rebuild the decode matrix if the layout or yaw changed
    pub fn configure(&mut self, layout: &SpeakerLayout, yaw: f32) {
        if layout.channels() == self.channels && yaw == self.yaw {
            return;
        }
        self.channels = layout.channels();
        self.yaw = yaw;
        self.matrix = [[0.0; AMBISONICS_CHANNELS]; MAX_CHANNELS];

        let positioned = layout.sorted_azimuths().len();
        if positioned == 0 {
            return;
        }
        let norm = 1.0 / positioned as f32;
        let psi = yaw.to_radians();

        for &(azimuth, ch) in layout.sorted_azimuths() {
            let row = &mut self.matrix[ch];
            row[W] = norm;
            if positioned > 1 {
                let phi = -azimuth.to_radians() - psi;
                row[X] = phi.cos() * norm;
                row[Y] = phi.sin() * norm;
            }
        }
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    /// Gains applied to (W, Y, Z, X) for one output channel
    #[inline]
    pub fn gains(&self, channel: usize) -> &[f32; AMBISONICS_CHANNELS] {
        &self.matrix[channel]
    }

    /// Decode `frames` interleaved ambisonic frames, overwriting `output`
    pub fn decode(&self, input: &[Sample], output: &mut [Sample], frames: usize) {
        let channels = self.channels;
        for f in 0..frames {
            let src = &input[f * AMBISONICS_CHANNELS..(f + 1) * AMBISONICS_CHANNELS];
            let dst = &mut output[f * channels..(f + 1) * channels];
            for (out, row) in dst.iter_mut().zip(self.matrix.iter()) {
                *out = row.iter().zip(src).map(|(g, s)| g * s).sum();
            }
        }
    }
}

/// Identifier of an allocated ambisonics stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AmbisonicsStreamId(usize);

impl AmbisonicsStreamId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Fixed pool of ambisonics stream ids, managed on the control side
#[derive(Debug)]
pub struct AmbisonicsStreamPool {
    free: Vec<usize>,
    capacity: usize,
}

impl AmbisonicsStreamPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: (0..capacity).rev().collect(),
            capacity,
        }
    }

    pub fn acquire(&mut self) -> MixerResult<AmbisonicsStreamId> {
        self.free
            .pop()
            .map(AmbisonicsStreamId)
            .ok_or(MixerError::NoFreeAmbisonicsStream(self.capacity))
    }

    /// Return an id to the pool; ids not currently allocated are ignored
    pub fn release(&mut self, id: AmbisonicsStreamId) {
        if id.0 < self.capacity && !self.free.contains(&id.0) {
            self.free.push(id.0);
        }
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.free.len()
    }
}
