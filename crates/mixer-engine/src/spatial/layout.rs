//! Speaker layouts and the azimuth table
//!
//! A [`SpeakerLayout`] is built from the device channel count when the device
//! opens and rebuilt whenever that count changes. It assigns a speaker to
//! every output channel and keeps the positioned (non-LFE) channels sorted by
//! azimuth so the 3D panner can find the pair of speakers bracketing a source.
//!
//! Azimuths are in degrees, clockwise from straight ahead, in `[0, 360)`.

use crate::engine::error::{MixerError, MixerResult};
use crate::types::MAX_CHANNELS;

/// A loudspeaker position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Speaker {
    FrontLeft,
    FrontRight,
    FrontCenter,
    LowFrequency,
    BackLeft,
    BackRight,
    BackCenter,
    SideLeft,
    SideRight,
}

impl Speaker {
    /// Azimuth of this speaker in a surround layout, `None` for the LFE
    pub fn default_azimuth(self) -> Option<f32> {
        match self {
            Speaker::FrontCenter => Some(0.0),
            Speaker::FrontRight => Some(30.0),
            Speaker::SideRight => Some(110.0),
            Speaker::BackRight => Some(150.0),
            Speaker::BackCenter => Some(180.0),
            Speaker::BackLeft => Some(210.0),
            Speaker::SideLeft => Some(250.0),
            Speaker::FrontLeft => Some(330.0),
            Speaker::LowFrequency => None,
        }
    }

    /// Whether this is the low-frequency effects channel
    #[inline]
    pub fn is_lfe(self) -> bool {
        self == Speaker::LowFrequency
    }
}

/// Channel ordering of multichannel source material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
    /// WAVE / SMPTE ordering (FL, FR, FC, LFE, ...), also used by the device
    #[default]
    Standard,
    /// Vorbis ordering (FL, FC, FR, ...)
    Vorbis,
}

use Speaker::{
    BackCenter as BC, BackLeft as BL, BackRight as BR, FrontCenter as FC, FrontLeft as FL,
    FrontRight as FR, LowFrequency as LFE, SideLeft as SL, SideRight as SR,
};

const STANDARD_ORDER: [&[Speaker]; MAX_CHANNELS] = [
    &[FC],
    &[FL, FR],
    &[FL, FR, FC],
    &[FL, FR, BL, BR],
    &[FL, FR, FC, SL, SR],
    &[FL, FR, FC, LFE, SL, SR],
    &[FL, FR, FC, LFE, BC, SL, SR],
    &[FL, FR, FC, LFE, BL, BR, SL, SR],
];

const VORBIS_ORDER: [&[Speaker]; MAX_CHANNELS] = [
    &[FC],
    &[FL, FR],
    &[FL, FC, FR],
    &[FL, FR, BL, BR],
    &[FL, FC, FR, BL, BR],
    &[FL, FC, FR, BL, BR, LFE],
    &[FL, FC, FR, SL, SR, BC, LFE],
    &[FL, FC, FR, SL, SR, BL, BR, LFE],
];

/// Speaker assignment of each channel for a channel count and ordering
pub fn speakers_for(channels: usize, order: ChannelOrder) -> Option<&'static [Speaker]> {
    if channels == 0 || channels > MAX_CHANNELS {
        return None;
    }
    let table = match order {
        ChannelOrder::Standard => &STANDARD_ORDER,
        ChannelOrder::Vorbis => &VORBIS_ORDER,
    };
    Some(table[channels - 1])
}

/// Output speaker layout with its sorted azimuth table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeakerLayout {
    channels: usize,
    speakers: [Speaker; MAX_CHANNELS],
    azimuths: [Option<f32>; MAX_CHANNELS],
    /// (azimuth, channel) for positioned channels, ascending by azimuth
    sorted: [(f32, usize); MAX_CHANNELS],
    positioned: usize,
}

impl SpeakerLayout {
    /// Build the layout for a device with `channels` outputs
    pub fn new(channels: usize) -> MixerResult<Self> {
        let assignment = speakers_for(channels, ChannelOrder::Standard)
            .ok_or(MixerError::UnsupportedChannelCount(channels))?;

        let mut speakers = [FC; MAX_CHANNELS];
        let mut azimuths = [None; MAX_CHANNELS];
        for (ch, &speaker) in assignment.iter().enumerate() {
            speakers[ch] = speaker;
            azimuths[ch] = speaker.default_azimuth();
        }

        // Plain stereo pans across the full frontal half-circle
        if channels == 2 {
            azimuths[0] = Some(270.0);
            azimuths[1] = Some(90.0);
        }

        let mut sorted = [(0.0, 0); MAX_CHANNELS];
        let mut positioned = 0;
        for (ch, azimuth) in azimuths.iter().take(channels).enumerate() {
            if let Some(az) = azimuth {
                sorted[positioned] = (*az, ch);
                positioned += 1;
            }
        }
        sorted[..positioned].sort_by(|a, b| a.0.total_cmp(&b.0));

        Ok(Self {
            channels,
            speakers,
            azimuths,
            sorted,
            positioned,
        })
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Speakers of the layout in channel order
    #[inline]
    pub fn speakers(&self) -> &[Speaker] {
        &self.speakers[..self.channels]
    }

    /// Azimuth of an output channel, `None` for LFE or out-of-range channels
    #[inline]
    pub fn azimuth(&self, channel: usize) -> Option<f32> {
        if channel < self.channels {
            self.azimuths[channel]
        } else {
            None
        }
    }

    /// Positioned channels sorted by ascending azimuth
    #[inline]
    pub fn sorted_azimuths(&self) -> &[(f32, usize)] {
        &self.sorted[..self.positioned]
    }

    /// Channel carrying the given speaker, if the layout has one
    pub fn channel_of(&self, speaker: Speaker) -> Option<usize> {
        self.speakers().iter().position(|&s| s == speaker)
    }
}
