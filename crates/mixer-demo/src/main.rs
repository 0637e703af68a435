//! Mixer demo - a sine tone circling the listener through a reverb bus
//!
//! Opens the default output device, streams a generated tone into one voice
//! and sweeps its azimuth once around the room.
//!
//! ## Command line
//!
//! - `--seconds N`: how long to play (default 8)
//! - `--config PATH`: engine config file (default: platform config dir)

use std::f32::consts::TAU;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use mixer_engine::audio::start_mixer;
use mixer_engine::config::{default_config_path, EngineConfig, CONFIG_FILE_NAME};
use mixer_engine::effect::native::ReverbEffect;
use mixer_engine::engine::{MixerError, PcmSegment, SourceInitParams};
use mixer_engine::spatial::SpatialParams;
use mixer_engine::submix::ChannelLayout;
use mixer_engine::SubmixId;

const TONE_HZ: f32 = 440.0;
const TONE_LEVEL: f32 = 0.25;
const SEGMENT_FRAMES: usize = 2048;
const REVERB_SEND: f32 = 0.4;

struct Args {
    seconds: f32,
    config: PathBuf,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        seconds: 8.0,
        config: default_config_path(CONFIG_FILE_NAME),
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--seconds" => {
                let value = iter.next().context("--seconds needs a value")?;
                args.seconds = value
                    .parse()
                    .with_context(|| format!("invalid --seconds {:?}", value))?;
            }
            "--config" => {
                args.config = iter.next().context("--config needs a path")?.into();
            }
            other => anyhow::bail!("unknown argument {:?}", other),
        }
    }
    Ok(args)
}

/// Phase-continuous mono sine generator
struct Tone {
    phase: f32,
    step: f32,
}

impl Tone {
    fn new(sample_rate: u32) -> Self {
        Self {
            phase: 0.0,
            step: TONE_HZ / sample_rate as f32,
        }
    }

    fn next_segment(&mut self) -> Result<PcmSegment> {
        let samples = (0..SEGMENT_FRAMES)
            .map(|_| {
                let s = (self.phase * TAU).sin() * TONE_LEVEL;
                self.phase = (self.phase + self.step).fract();
                s
            })
            .collect();
        Ok(PcmSegment::new(samples, 1)?)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;
    let config = EngineConfig::load(&args.config);

    let (stream, mut ctl) = start_mixer(&config.mixer, &config.audio)?;
    let stream_config = *stream.config();
    log::info!(
        "Playing on {} channels at {} Hz ({} frames per block, {:.1} ms latency)",
        stream_config.channels,
        stream_config.sample_rate,
        stream_config.block_frames,
        stream_config.latency_ms()
    );

    let reverb = ctl.register_submix(
        ChannelLayout::Fixed(2),
        SubmixId::MASTER,
        vec![Box::new(ReverbEffect::new())],
    )?;

    let mut voice = ctl.acquire()?;
    voice.init(
        &mut ctl,
        SourceInitParams::new(1)
            .streaming(true)
            .with_send(SubmixId::MASTER, 1.0)
            .with_send(reverb, REVERB_SEND),
    )?;

    let mut tone = Tone::new(ctl.sample_rate());
    let mut pending = Some(tone.next_segment()?);
    voice.play(&mut ctl)?;

    let started = Instant::now();
    let total = Duration::from_secs_f32(args.seconds.max(0.0));
    while started.elapsed() < total {
        let progress = started.elapsed().as_secs_f32() / total.as_secs_f32();
        voice.set_spatial_params(
            &mut ctl,
            SpatialParams {
                azimuth: progress * 360.0,
                distance: 1.0,
                omni_radius: 0.5,
            },
        )?;

        // Keep the queue topped up; a full queue just means try again later
        loop {
            let segment = match pending.take() {
                Some(segment) => segment,
                None => tone.next_segment()?,
            };
            match voice.submit_buffer(&mut ctl, segment.clone()) {
                Ok(()) => {}
                Err(MixerError::BufferQueueFull { .. }) | Err(MixerError::CommandQueueFull) => {
                    pending = Some(segment);
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        ctl.update();
        thread::sleep(Duration::from_millis(10));
    }

    log::info!(
        "Played {} frames with {} underruns",
        voice.frames_played(&ctl),
        voice.underruns(&ctl)
    );

    voice.stop(&mut ctl)?;
    voice.release(&mut ctl);
    ctl.unregister_submix(reverb)?;
    ctl.update();

    // Let the release reach the render thread before the stream goes away
    thread::sleep(Duration::from_millis(50));
    stream.close();
    Ok(())
}
