//! CPAL output backend
//!
//! ```text
//! ┌──────────────────┐                     ┌─────────────────────┐
//! │  Control Thread  │───push()───────────►│   Command Queue     │
//! │  (MixerControl)  │                     │  (lock-free SPSC)   │
//! └──────────────────┘                     └──────────┬──────────┘
//!         ▲                                           │ pop()
//!         │ SlotAtomics                               ▼
//!         │                                ┌─────────────────────┐
//!         └────────────────────────────────│  CPAL Audio Thread  │
//!                                          │  (owns MixerDevice) │
//!                                          └─────────────────────┘
//! ```
//!
//! The mixer renders fixed-size blocks; the device asks for whatever buffer
//! size it likes. [`MixerCallback`] bridges the two with a carry buffer
//! allocated up front: it hands out frames from the last rendered block and
//! renders the next one when the block runs dry.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample};

use super::backend::{OutputSampleFormat, SharedStreamState, StreamConfig};
use super::config::{AudioConfig, SampleFormatPreference};
use super::device::open_device;
use super::error::{AudioError, AudioResult};
use crate::config::MixerConfig;
use crate::engine::MixerDevice;
use crate::types::{Sample, MAX_CHANNELS};

/// A built CPAL stream
pub(crate) struct CpalOutput {
    stream: cpal::Stream,
}

impl CpalOutput {
    pub(crate) fn play(&self) -> AudioResult<()> {
        self.stream
            .play()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()))
    }

    pub(crate) fn pause(&self) -> AudioResult<()> {
        self.stream
            .pause()
            .map_err(|e| AudioError::StreamPauseError(e.to_string()))
    }
}

/// Pick the device format closest to what the mixer wants
pub(crate) fn negotiate(audio: &AudioConfig, mixer: &MixerConfig) -> AudioResult<StreamConfig> {
    let device = open_device(audio.device.as_ref())?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using audio device: {}", device_name);

    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .collect();
    if supported.is_empty() {
        return Err(AudioError::ConfigError(
            "No supported output configurations".to_string(),
        ));
    }

    let format_ok = |format: SampleFormat| match audio.sample_format {
        SampleFormatPreference::Auto => matches!(format, SampleFormat::F32 | SampleFormat::I16),
        SampleFormatPreference::F32 => format == SampleFormat::F32,
        SampleFormatPreference::I16 => format == SampleFormat::I16,
    };
    let rate_ok = |c: &cpal::SupportedStreamConfigRange| {
        (c.min_sample_rate().0..=c.max_sample_rate().0).contains(&mixer.sample_rate)
    };
    let wanted_channels = mixer.output_channels as u16;

    // Score: format match, then exact channel count, then sample rate, then f32
    let best = supported
        .iter()
        .filter(|c| format_ok(c.sample_format()))
        .max_by_key(|c| {
            (
                c.channels() == wanted_channels,
                c.channels() >= wanted_channels,
                rate_ok(*c),
                c.sample_format() == SampleFormat::F32,
            )
        })
        .ok_or_else(|| {
            AudioError::UnsupportedFormat(format!(
                "{} offers no {:?} output configuration",
                device_name, audio.sample_format
            ))
        })?;

    let sample_rate = if rate_ok(best) {
        mixer.sample_rate
    } else {
        let fallback = best.max_sample_rate().0;
        log::warn!(
            "Audio device doesn't support {}Hz, falling back to {}Hz",
            mixer.sample_rate,
            fallback
        );
        fallback
    };

    let sample_format = match best.sample_format() {
        SampleFormat::F32 => OutputSampleFormat::F32,
        SampleFormat::I16 => OutputSampleFormat::I16,
        other => return Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    };

    let config = StreamConfig {
        sample_rate,
        block_frames: mixer.block_frames,
        channels: best.channels() as usize,
        sample_format,
        buffer_frames: audio.buffer_size.as_frames(mixer.block_frames),
    };
    log::debug!("Negotiated stream config: {:?}", config);
    Ok(config)
}

/// Build the device stream with `mixer` inside its callback
pub(crate) fn open(
    audio: &AudioConfig,
    config: &StreamConfig,
    mixer: MixerDevice,
    state: Arc<SharedStreamState>,
) -> AudioResult<CpalOutput> {
    let device = open_device(audio.device.as_ref())?;
    let stream_config = cpal::StreamConfig {
        channels: config.channels as u16,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: match config.buffer_frames {
            Some(frames) => cpal::BufferSize::Fixed(frames),
            None => cpal::BufferSize::Default,
        },
    };

    let callback = MixerCallback::new(mixer);
    let stream = match config.sample_format {
        OutputSampleFormat::F32 => build_stream::<f32>(&device, &stream_config, callback, state)?,
        OutputSampleFormat::I16 => build_stream::<i16>(&device, &stream_config, callback, state)?,
    };
    Ok(CpalOutput { stream })
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut callback: MixerCallback,
    state: Arc<SharedStreamState>,
) -> AudioResult<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
                callback.render(data, channels);
            },
            move |err| {
                state.fail();
                log::error!("Output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))
}

/// Adapts fixed mixer blocks to arbitrary device buffer sizes
pub(crate) struct MixerCallback {
    mixer: MixerDevice,
    /// Last rendered block, interleaved in `block_channels`
    block: Vec<Sample>,
    block_channels: usize,
    block_len: usize,
    /// Next frame of `block` to hand out
    read: usize,
}

impl MixerCallback {
    pub(crate) fn new(mixer: MixerDevice) -> Self {
        let block = vec![0.0; mixer.block_frames() * MAX_CHANNELS];
        Self {
            block_channels: mixer.channels(),
            mixer,
            block,
            block_len: 0,
            read: 0,
        }
    }

    #[cfg(test)]
    fn mixer(&self) -> &MixerDevice {
        &self.mixer
    }

    /// Fill one device buffer of `channels` interleaved channels
    ///
    /// Channels the mixer doesn't produce are silent; mixer channels the
    /// device doesn't have are dropped.
    pub(crate) fn render<T>(&mut self, data: &mut [T], channels: usize)
    where
        T: SizedSample + FromSample<f32>,
    {
        let silence = T::from_sample_(0.0f32);
        if channels == 0 {
            return;
        }
        let mut frames = data.chunks_exact_mut(channels);
        for frame in &mut frames {
            if self.read >= self.block_len {
                self.refill();
            }
            let base = self.read * self.block_channels;
            let src = &self.block[base..base + self.block_channels];
            for (c, out) in frame.iter_mut().enumerate() {
                *out = src.get(c).map_or(silence, |&s| T::from_sample_(s));
            }
            self.read += 1;
        }
        for out in frames.into_remainder() {
            *out = silence;
        }
    }

    fn refill(&mut self) {
        let len = self.mixer.block_frames() * self.mixer.channels();
        self.mixer.process_block(&mut self.block[..len]);
        // A channel change is applied inside process_block; it renders fewer
        // frames if the new count is larger
        self.block_channels = self.mixer.channels();
        self.block_len = (len / self.block_channels).max(1);
        self.read = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MixerControl, PcmSegment, SourceInitParams};

    fn mixer() -> (MixerDevice, MixerControl) {
        MixerDevice::new(MixerConfig {
            block_frames: 64,
            max_sources: 2,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_odd_callback_sizes_preserve_stream() {
        let (device, mut ctl) = mixer();
        let samples: Vec<f32> = (0..512).map(|i| (i as f32 - 256.0) / 512.0).collect();

        let mut voice = ctl.acquire().unwrap();
        voice.init(&mut ctl, SourceInitParams::new(2)).unwrap();
        voice
            .submit_buffer(&mut ctl, PcmSegment::new(samples.clone(), 2).unwrap())
            .unwrap();
        voice.play(&mut ctl).unwrap();

        let mut callback = MixerCallback::new(device);
        let mut out = Vec::new();
        for frames in [37, 100, 91, 28] {
            let mut data = vec![1.0f32; frames * 2];
            callback.render(&mut data, 2);
            out.extend_from_slice(&data);
        }
        assert_eq!(out, samples);
        assert_eq!(callback.mixer().blocks_rendered(), 4);
        voice.release(&mut ctl);
    }

    #[test]
    fn test_i16_output_and_extra_channels() {
        let (device, mut ctl) = mixer();
        let mut voice = ctl.acquire().unwrap();
        voice.init(&mut ctl, SourceInitParams::new(2)).unwrap();
        voice
            .submit_buffer(&mut ctl, PcmSegment::new(vec![0.5; 128], 2).unwrap())
            .unwrap();
        voice.play(&mut ctl).unwrap();

        let mut callback = MixerCallback::new(device);
        // Four device channels, and a trailing partial frame
        let mut data = vec![1i16; 16 * 4 + 3];
        callback.render(&mut data, 4);

        for frame in data[..64].chunks_exact(4) {
            assert_eq!(frame, &[16384, 16384, 0, 0]);
        }
        assert_eq!(&data[64..], &[0, 0, 0]);
        voice.release(&mut ctl);
    }
}
