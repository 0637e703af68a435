//! Channel maps: gain matrices routing source channels to output channels
//!
//! All functions here are pure and run on the control side; the render side
//! only ever interpolates between maps it has been handed.
//!
//! - [`map_3d`] pans a mono emitter between the two speakers bracketing its
//!   azimuth (equal-power) and blends toward a uniform "omni" map as the
//!   listener moves inside the emitter's omni radius.
//! - [`map_2d`] routes a multichannel source speaker-to-speaker, folding
//!   speakers the output lacks into their nearest neighbours.
//! - [`conversion_matrix`] is the static up/down-mix used between submixes.

use std::f32::consts::{FRAC_1_SQRT_2, FRAC_PI_2};

use super::layout::{speakers_for, ChannelOrder, Speaker, SpeakerLayout};
use crate::engine::error::{MixerError, MixerResult};
use crate::types::{MAX_CHANNELS, MAX_CHANNEL_MAP};

/// Gain matrix indexed as `source_channel * output_channels + output_channel`
///
/// Stored inline so maps can be copied through the command queue and
/// interpolated on the render thread without touching the heap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelMap {
    gains: [f32; MAX_CHANNEL_MAP],
    source_channels: usize,
    output_channels: usize,
}

impl ChannelMap {
    /// All-zero map
    pub fn zeroed(source_channels: usize, output_channels: usize) -> Self {
        debug_assert!(source_channels <= MAX_CHANNELS && output_channels <= MAX_CHANNELS);
        Self {
            gains: [0.0; MAX_CHANNEL_MAP],
            source_channels,
            output_channels,
        }
    }

    /// Unity gain from each channel to the same output channel
    pub fn identity(channels: usize) -> Self {
        let mut map = Self::zeroed(channels, channels);
        for ch in 0..channels {
            map.set_gain(ch, ch, 1.0);
        }
        map
    }

    /// Build a map from a flat gain list
    ///
    /// The list must hold exactly `source_channels × output_channels` finite
    /// values in source-major order.
    pub fn from_gains(
        source_channels: usize,
        output_channels: usize,
        gains: &[f32],
    ) -> MixerResult<Self> {
        for count in [source_channels, output_channels] {
            if count == 0 || count > MAX_CHANNELS {
                return Err(MixerError::UnsupportedChannelCount(count));
            }
        }
        let expected = source_channels * output_channels;
        if gains.len() != expected {
            return Err(MixerError::ChannelMapSizeMismatch {
                expected,
                actual: gains.len(),
            });
        }
        if let Some(&bad) = gains.iter().find(|g| !g.is_finite()) {
            return Err(MixerError::InvalidParameter {
                name: "channel map gain",
                value: bad,
            });
        }

        let mut map = Self::zeroed(source_channels, output_channels);
        map.gains[..expected].copy_from_slice(gains);
        Ok(map)
    }

    #[inline]
    pub fn source_channels(&self) -> usize {
        self.source_channels
    }

    #[inline]
    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    #[inline]
    pub fn gain(&self, source_channel: usize, output_channel: usize) -> f32 {
        self.gains[source_channel * self.output_channels + output_channel]
    }

    #[inline]
    pub fn set_gain(&mut self, source_channel: usize, output_channel: usize, gain: f32) {
        self.gains[source_channel * self.output_channels + output_channel] = gain;
    }

    /// The active gains in source-major order
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.gains[..self.source_channels * self.output_channels]
    }

    /// Whether every gain is zero
    pub fn is_silent(&self) -> bool {
        self.as_slice().iter().all(|&g| g == 0.0)
    }
}

/// Emitter position relative to the listener
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialParams {
    /// Degrees clockwise from straight ahead
    pub azimuth: f32,
    /// Distance from the listener, in world units
    pub distance: f32,
    /// Radius inside which the emitter spreads toward all speakers (0 disables)
    pub omni_radius: f32,
}

impl Default for SpatialParams {
    fn default() -> Self {
        Self {
            azimuth: 0.0,
            distance: 0.0,
            omni_radius: 0.0,
        }
    }
}

/// Amount of the omni map mixed into a panned map, in `[0, 1]`
///
/// `clamp(1 - distance / radius, 0, 1) ^ exponent`; zero when the radius is
/// not positive.
pub fn omni_blend(distance: f32, omni_radius: f32, exponent: f32) -> f32 {
    if omni_radius <= 0.0 {
        return 0.0;
    }
    (1.0 - distance / omni_radius).clamp(0.0, 1.0).powf(exponent)
}

/// Mono 3D panning map for the given layout
pub fn map_3d(layout: &SpeakerLayout, params: &SpatialParams, omni_exponent: f32) -> ChannelMap {
    let mut map = ChannelMap::zeroed(1, layout.channels());
    let sorted = layout.sorted_azimuths();

    match sorted.len() {
        0 => return map,
        1 => {
            map.set_gain(0, sorted[0].1, 1.0);
            return map;
        }
        n => {
            let azimuth = params.azimuth.rem_euclid(360.0);

            // Bracketing pair; below the first azimuth the pair wraps around 360
            let lo = sorted
                .iter()
                .rposition(|&(az, _)| az <= azimuth)
                .unwrap_or(n - 1);
            let hi = (lo + 1) % n;

            let (lo_az, lo_ch) = sorted[lo];
            let (mut hi_az, hi_ch) = sorted[hi];
            if hi_az <= lo_az {
                hi_az += 360.0;
            }
            let mut offset = azimuth - lo_az;
            if offset < 0.0 {
                offset += 360.0;
            }
            let fraction = (offset / (hi_az - lo_az)).clamp(0.0, 1.0);

            map.set_gain(0, lo_ch, (fraction * FRAC_PI_2).cos());
            map.set_gain(0, hi_ch, (fraction * FRAC_PI_2).sin());
        }
    }

    let blend = omni_blend(params.distance, params.omni_radius, omni_exponent);
    if blend > 0.0 {
        let omni_gain = 1.0 / (sorted.len() as f32).sqrt();
        for &(_, ch) in sorted {
            let panned = map.gain(0, ch);
            map.set_gain(0, ch, panned * (1.0 - blend) + omni_gain * blend);
        }
    }

    map
}

/// Speaker-to-speaker map for non-spatialized sources
///
/// Mono sources go to the centre speaker when `center_only` is set and the
/// layout has one, otherwise equal-power to front left/right.
pub fn map_2d(
    source_channels: usize,
    layout: &SpeakerLayout,
    center_only: bool,
    order: ChannelOrder,
) -> MixerResult<ChannelMap> {
    let sources = speakers_for(source_channels, order)
        .ok_or(MixerError::UnsupportedChannelCount(source_channels))?;
    let output_channels = layout.channels();
    let mut map = ChannelMap::zeroed(source_channels, output_channels);

    if output_channels == 1 {
        let audible = sources.iter().filter(|s| !s.is_lfe()).count().max(1);
        let gain = 1.0 / audible as f32;
        for (src, speaker) in sources.iter().enumerate() {
            if !speaker.is_lfe() {
                map.set_gain(src, 0, gain);
            }
        }
        return Ok(map);
    }

    if source_channels == 1 {
        match layout.channel_of(Speaker::FrontCenter) {
            Some(center) if center_only => map.set_gain(0, center, 1.0),
            _ => fold(
                &mut map,
                0,
                layout,
                &[
                    (Speaker::FrontLeft, FRAC_1_SQRT_2),
                    (Speaker::FrontRight, FRAC_1_SQRT_2),
                ],
            ),
        }
        return Ok(map);
    }

    for (src, &speaker) in sources.iter().enumerate() {
        if let Some(out) = layout.channel_of(speaker) {
            map.set_gain(src, out, 1.0);
            continue;
        }
        match speaker {
            Speaker::LowFrequency => {}
            Speaker::FrontCenter => fold(
                &mut map,
                src,
                layout,
                &[(Speaker::FrontLeft, FRAC_1_SQRT_2), (Speaker::FrontRight, FRAC_1_SQRT_2)],
            ),
            Speaker::SideLeft => {
                fold_nearest(&mut map, src, layout, Speaker::BackLeft, Speaker::FrontLeft)
            }
            Speaker::SideRight => {
                fold_nearest(&mut map, src, layout, Speaker::BackRight, Speaker::FrontRight)
            }
            Speaker::BackLeft => {
                fold_nearest(&mut map, src, layout, Speaker::SideLeft, Speaker::FrontLeft)
            }
            Speaker::BackRight => {
                fold_nearest(&mut map, src, layout, Speaker::SideRight, Speaker::FrontRight)
            }
            Speaker::BackCenter => {
                let pairs = [
                    (Speaker::BackLeft, Speaker::BackRight, FRAC_1_SQRT_2),
                    (Speaker::SideLeft, Speaker::SideRight, FRAC_1_SQRT_2),
                    (Speaker::FrontLeft, Speaker::FrontRight, 0.5),
                ];
                if let Some(&(left, right, gain)) = pairs.iter().find(|(l, r, _)| {
                    layout.channel_of(*l).is_some() && layout.channel_of(*r).is_some()
                }) {
                    fold(&mut map, src, layout, &[(left, gain), (right, gain)]);
                }
            }
            // Every layout with two or more channels has both fronts
            Speaker::FrontLeft | Speaker::FrontRight => {}
        }
    }

    Ok(map)
}

/// Static up/down-mix between two channel counts in device ordering
pub fn conversion_matrix(from_channels: usize, to_channels: usize) -> MixerResult<ChannelMap> {
    if from_channels == to_channels {
        if from_channels == 0 || from_channels > MAX_CHANNELS {
            return Err(MixerError::UnsupportedChannelCount(from_channels));
        }
        return Ok(ChannelMap::identity(from_channels));
    }
    let layout = SpeakerLayout::new(to_channels)?;
    map_2d(from_channels, &layout, false, ChannelOrder::Standard)
}

fn fold(map: &mut ChannelMap, src: usize, layout: &SpeakerLayout, targets: &[(Speaker, f32)]) {
    for &(speaker, gain) in targets {
        if let Some(out) = layout.channel_of(speaker) {
            map.set_gain(src, out, map.gain(src, out) + gain);
        }
    }
}

fn fold_nearest(
    map: &mut ChannelMap,
    src: usize,
    layout: &SpeakerLayout,
    preferred: Speaker,
    fallback: Speaker,
) {
    match layout.channel_of(preferred) {
        Some(out) => map.set_gain(src, out, 1.0),
        None => fold(map, src, layout, &[(fallback, FRAC_1_SQRT_2)]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn energy(map: &ChannelMap, src: usize) -> f32 {
        (0..map.output_channels())
            .map(|out| map.gain(src, out).powi(2))
            .sum()
    }

    #[test]
    fn test_from_gains_validates_size() {
        let err = ChannelMap::from_gains(2, 2, &[1.0, 0.0, 0.0]).unwrap_err();
        assert_eq!(
            err,
            MixerError::ChannelMapSizeMismatch {
                expected: 4,
                actual: 3
            }
        );
        assert!(ChannelMap::from_gains(1, 2, &[f32::NAN, 0.0]).is_err());
        assert!(ChannelMap::from_gains(2, 2, &[1.0, 0.0, 0.0, 1.0]).is_ok());
    }

    #[test]
    fn test_map_3d_hits_speaker_exactly() {
        let layout = SpeakerLayout::new(2).unwrap();
        let params = SpatialParams {
            azimuth: 90.0,
            ..Default::default()
        };
        let map = map_3d(&layout, &params, 1.0);
        assert!(map.gain(0, 0).abs() < 1e-6);
        assert!((map.gain(0, 1) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_map_3d_front_is_centered_on_stereo() {
        let layout = SpeakerLayout::new(2).unwrap();
        let map = map_3d(&layout, &SpatialParams::default(), 1.0);
        assert!((map.gain(0, 0) - map.gain(0, 1)).abs() < 1e-6);
        assert!((energy(&map, 0) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_map_3d_is_equal_power_everywhere() {
        for channels in [2, 4, 6, 8] {
            let layout = SpeakerLayout::new(channels).unwrap();
            for step in 0..72 {
                let params = SpatialParams {
                    azimuth: step as f32 * 5.0 - 10.0,
                    ..Default::default()
                };
                let map = map_3d(&layout, &params, 1.0);
                assert!(
                    (energy(&map, 0) - 1.0).abs() < 1e-4,
                    "{} channels at {} degrees",
                    channels,
                    params.azimuth
                );
            }
        }
    }

    #[test]
    fn test_map_3d_never_feeds_lfe() {
        let layout = SpeakerLayout::new(6).unwrap();
        for azimuth in [0.0, 45.0, 180.0, 300.0] {
            let params = SpatialParams {
                azimuth,
                distance: 0.0,
                omni_radius: 10.0,
            };
            let map = map_3d(&layout, &params, 1.0);
            assert_eq!(map.gain(0, 3), 0.0);
        }
    }

    #[test]
    fn test_omni_blend_curve() {
        assert_eq!(omni_blend(5.0, 0.0, 1.0), 0.0);
        assert_eq!(omni_blend(0.0, 10.0, 1.0), 1.0);
        assert_eq!(omni_blend(20.0, 10.0, 1.0), 0.0);
        assert!((omni_blend(5.0, 10.0, 1.0) - 0.5).abs() < 1e-6);
        assert!((omni_blend(5.0, 10.0, 2.0) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_fully_omni_map_is_uniform() {
        let layout = SpeakerLayout::new(4).unwrap();
        let params = SpatialParams {
            azimuth: 30.0,
            distance: 0.0,
            omni_radius: 5.0,
        };
        let map = map_3d(&layout, &params, 1.0);
        for out in 0..4 {
            assert!((map.gain(0, out) - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_map_2d_mono() {
        let stereo = SpeakerLayout::new(2).unwrap();
        let map = map_2d(1, &stereo, false, ChannelOrder::Standard).unwrap();
        assert!((map.gain(0, 0) - FRAC_1_SQRT_2).abs() < 1e-6);
        assert!((map.gain(0, 1) - FRAC_1_SQRT_2).abs() < 1e-6);

        let surround = SpeakerLayout::new(6).unwrap();
        let map = map_2d(1, &surround, true, ChannelOrder::Standard).unwrap();
        assert_eq!(map.gain(0, 2), 1.0);
        assert!((energy(&map, 0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_map_2d_surround_to_stereo() {
        let stereo = SpeakerLayout::new(2).unwrap();
        let map = map_2d(6, &stereo, false, ChannelOrder::Standard).unwrap();

        // FL, FR straight through; C folded equally; LFE dropped
        assert_eq!(map.gain(0, 0), 1.0);
        assert_eq!(map.gain(1, 1), 1.0);
        assert!((map.gain(2, 0) - FRAC_1_SQRT_2).abs() < 1e-6);
        assert!((map.gain(2, 1) - FRAC_1_SQRT_2).abs() < 1e-6);
        assert_eq!(map.gain(3, 0), 0.0);
        assert_eq!(map.gain(3, 1), 0.0);
        assert_eq!(map.gain(4, 1), 0.0);
        assert!((map.gain(4, 0) - FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn test_map_2d_vorbis_reorders_center() {
        let surround = SpeakerLayout::new(6).unwrap();
        let map = map_2d(6, &surround, false, ChannelOrder::Vorbis).unwrap();

        // Vorbis channel 1 is the centre, device channel 2
        assert_eq!(map.gain(1, 2), 1.0);
        // Vorbis channel 5 is the LFE, device channel 3
        assert_eq!(map.gain(5, 3), 1.0);
    }

    #[test]
    fn test_map_2d_downmix_to_mono() {
        let mono = SpeakerLayout::new(1).unwrap();
        let map = map_2d(2, &mono, false, ChannelOrder::Standard).unwrap();
        assert_eq!(map.as_slice(), &[0.5, 0.5]);
    }

    #[test]
    fn test_conversion_matrix_identity() {
        let map = conversion_matrix(4, 4).unwrap();
        assert_eq!(map, ChannelMap::identity(4));
        assert!(conversion_matrix(9, 2).is_err());
    }
}
