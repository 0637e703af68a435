//! Render-side mixer device
//!
//! [`MixerDevice`] is the object the hardware callback owns. Each call to
//! [`MixerDevice::process_block`] drains the command ring, renders every
//! source slot, pulls the submix tree from the master and copies the result
//! into the callback's buffer.
//!
//! # Real-Time Safety
//!
//! Every buffer is sized when the device is created. Payloads that arrive
//! through commands are `basedrop` allocations, so dropping them here only
//! hands them to the collector thread owned by [`MixerControl`].

use std::sync::Arc;

use basedrop::{Owned, Shared};

use super::atomics::SlotAtomics;
use super::command::{command_channel, MixerCommand};
use super::control::MixerControl;
use super::error::MixerResult;
use super::gc::GcThread;
use super::source_manager::SourceManager;
use crate::config::MixerConfig;
use crate::effect::SubmixEffectChain;
use crate::spatial::SpeakerLayout;
use crate::submix::{ChannelLayout, SubmixGraph, SubmixNode};
use crate::types::{Sample, SubmixId};

/// The render half of a mixer
pub struct MixerDevice {
    command_rx: rtrb::Consumer<MixerCommand>,
    manager: SourceManager,
    graph: SubmixGraph,
    block_frames: usize,
    sample_rate: u32,
    blocks_rendered: u64,
}

impl MixerDevice {
    /// Create a mixer and the control handle that drives it
    ///
    /// Runs on the control thread: every pool, ring and scratch buffer is
    /// allocated here.
    pub fn new(config: MixerConfig) -> MixerResult<(MixerDevice, MixerControl)> {
        config.validate()?;

        let gc = GcThread::spawn()?;
        let handle = gc.handle().clone();
        let (command_tx, command_rx) = command_channel(config.command_queue_capacity);
        let atomics: Arc<[SlotAtomics]> =
            (0..config.max_sources).map(|_| SlotAtomics::new()).collect();
        let layout = SpeakerLayout::new(config.output_channels)?;

        let master = SubmixNode::new(
            SubmixId::MASTER,
            ChannelLayout::Device,
            None,
            SubmixEffectChain::default(),
            config.sample_rate,
            layout.channels(),
            config.block_frames,
            config.max_sources,
            config.max_submixes + 1,
        )?;
        let graph = SubmixGraph::new(Owned::new(&handle, master), config.max_submixes, layout);
        let manager = SourceManager::new(&config, atomics.clone(), Shared::new(&handle, layout));

        log::info!(
            "Mixer created: {} Hz, {} frames/block ({:.2} ms), {} channels, \
             {} sources, {} submixes",
            config.sample_rate,
            config.block_frames,
            config.block_duration_ms(),
            layout.channels(),
            config.max_sources,
            config.max_submixes
        );

        let device = MixerDevice {
            command_rx,
            manager,
            graph,
            block_frames: config.block_frames,
            sample_rate: config.sample_rate,
            blocks_rendered: 0,
        };
        let control = MixerControl::new(command_tx, atomics, layout, config, gc);
        Ok((device, control))
    }

    /// Current output channel count
    #[inline]
    pub fn channels(&self) -> usize {
        self.graph.device_layout().channels()
    }

    #[inline]
    pub fn block_frames(&self) -> usize {
        self.block_frames
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Blocks rendered since creation
    #[inline]
    pub fn blocks_rendered(&self) -> u64 {
        self.blocks_rendered
    }

    #[inline]
    pub fn source_manager(&self) -> &SourceManager {
        &self.manager
    }

    #[inline]
    pub fn graph(&self) -> &SubmixGraph {
        &self.graph
    }

    /// Fill an interleaved output buffer (render thread)
    ///
    /// Commands are applied once, before any audio is computed; the buffer is
    /// then rendered in blocks of at most `block_frames` frames in the channel
    /// count that holds after those commands. Samples past the last whole
    /// frame are zeroed.
    pub fn process_block(&mut self, output: &mut [Sample]) {
        self.process_commands();

        let channels = self.channels();
        let total_frames = output.len() / channels;
        let mut offset = 0;
        while offset < total_frames {
            let frames = (total_frames - offset).min(self.block_frames);
            self.manager.compute_next_block(frames);
            let mixed = self.graph.process(self.manager.slots(), frames);
            let dst = &mut output[offset * channels..(offset + frames) * channels];
            if mixed.len() == dst.len() {
                dst.copy_from_slice(mixed);
            } else {
                dst.fill(0.0);
            }
            offset += frames;
            self.blocks_rendered += 1;
        }
        output[total_frames * channels..].fill(0.0);
    }

    /// Apply every queued command in the order it was sent
    fn process_commands(&mut self) {
        while let Ok(cmd) = self.command_rx.pop() {
            match cmd {
                MixerCommand::InitSource { slot, mut init } => {
                    self.manager.init_source(slot, &mut init);
                    self.graph.clear_sends(slot);
                    for &(submix, level) in &init.sends {
                        self.graph.set_send(slot, submix, level);
                    }
                }
                MixerCommand::Play { slot } => self.manager.play(slot),
                MixerCommand::Stop { slot } => self.manager.stop(slot),
                MixerCommand::Pause { slot } => self.manager.pause(slot),
                MixerCommand::Release { slot } => {
                    self.manager.release(slot);
                    self.graph.clear_sends(slot);
                }
                MixerCommand::SetPitch { slot, pitch } => self.manager.set_pitch(slot, pitch),
                MixerCommand::SetVolume { slot, volume } => self.manager.set_volume(slot, volume),
                MixerCommand::SetLpfFrequency { slot, hz } => {
                    self.manager.set_lpf_frequency(slot, hz)
                }
                MixerCommand::SetChannelMap {
                    slot,
                    map,
                    is_3d,
                    center_only,
                } => self.manager.set_channel_map(slot, &map, is_3d, center_only),
                MixerCommand::SetSpatialParams { slot, params } => {
                    self.manager.set_spatial_params(slot, params)
                }
                MixerCommand::SetSubmixSend { slot, submix, level } => {
                    self.graph.set_send(slot, submix, level)
                }
                MixerCommand::SetDebugSolo { slot, solo } => {
                    self.manager.set_debug_solo(slot, solo)
                }
                MixerCommand::SetSourceEffectParam {
                    slot,
                    effect,
                    param,
                    value,
                } => self.manager.set_effect_param(slot, effect, param, value),
                MixerCommand::SetSourceEffectBypass { slot, effect, bypass } => {
                    self.manager.set_effect_bypass(slot, effect, bypass)
                }
                MixerCommand::SubmitBuffer { slot, segment } => self.manager.submit(slot, segment),
                MixerCommand::AddSubmix { node } => self.graph.add(node),
                MixerCommand::RemoveSubmix { submix } => self.graph.remove(submix),
                MixerCommand::SetSubmixParent { submix, parent } => {
                    self.graph.set_parent(submix, parent)
                }
                MixerCommand::SetSubmixEffectParam {
                    submix,
                    effect,
                    param,
                    value,
                } => self.graph.set_effect_param(submix, effect, param, value),
                MixerCommand::SetSubmixEffectBypass { submix, effect, bypass } => {
                    self.graph.set_effect_bypass(submix, effect, bypass)
                }
                MixerCommand::SetListenerOrientation { yaw } => self.graph.set_listener_yaw(yaw),
                MixerCommand::UpdateDeviceChannels { layout } => {
                    self.graph.set_device_layout(*layout);
                    self.manager.update_device_layout(layout);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::native::{PanningSpatializer, ReverbEffect};
    use crate::effect::plugin::SourcePlugins;
    use crate::engine::buffer_queue::{BufferQueueListener, PcmSegment};
    use crate::engine::control::SourceInitParams;
    use crate::engine::error::MixerError;
    use crate::spatial::SpatialParams;
    use crate::types::SlotId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> MixerConfig {
        MixerConfig {
            block_frames: 64,
            max_sources: 4,
            max_queued_buffers: 2,
            max_submixes: 4,
            max_ambisonics_streams: 1,
            command_queue_capacity: 64,
            ..Default::default()
        }
    }

    fn mixer() -> (MixerDevice, MixerControl) {
        MixerDevice::new(config()).unwrap()
    }

    fn render(device: &mut MixerDevice, frames: usize) -> Vec<f32> {
        let mut out = vec![1.0; frames * device.channels()];
        device.process_block(&mut out);
        out
    }

    #[derive(Default)]
    struct Counts {
        buffer_end: AtomicUsize,
        released: AtomicUsize,
    }

    struct CountingListener(Arc<Counts>);

    impl BufferQueueListener for CountingListener {
        fn on_source_buffer_end(&self, _slot: SlotId) {
            self.0.buffer_end.fetch_add(1, Ordering::Relaxed);
        }

        fn on_loop(&self, _slot: SlotId) {}

        fn on_release(&self, _slot: SlotId) {
            self.0.released.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = MixerDevice::new(MixerConfig {
            output_channels: 9,
            ..config()
        });
        assert!(matches!(result, Err(MixerError::UnsupportedChannelCount(9))));
    }

    #[test]
    fn test_pool_exhaustion_is_soft() {
        let (_device, mut ctl) = mixer();
        let voices: Vec<_> = (0..4).map(|_| ctl.acquire().unwrap()).collect();
        assert_eq!(ctl.active_sources(), 4);
        assert_eq!(
            ctl.acquire().unwrap_err(),
            MixerError::SourcePoolExhausted { capacity: 4 }
        );

        for voice in voices {
            voice.release(&mut ctl);
        }
        assert_eq!(ctl.active_sources(), 0);
        let voice = ctl.acquire().unwrap();
        voice.release(&mut ctl);
    }

    #[test]
    fn test_pool_exhaustion_leaves_active_voices_intact() {
        let (mut device, mut ctl) = mixer();
        let mut playing = ctl.acquire().unwrap();
        playing.init(&mut ctl, SourceInitParams::new(2)).unwrap();
        let samples: Vec<f32> = (0..128).map(|i| (i as f32 - 64.0) / 128.0).collect();
        playing
            .submit_buffer(&mut ctl, PcmSegment::new(samples.clone(), 2).unwrap())
            .unwrap();
        playing.play(&mut ctl).unwrap();

        let idle: Vec<_> = (0..3).map(|_| ctl.acquire().unwrap()).collect();
        for _ in 0..2 {
            assert!(matches!(
                ctl.acquire(),
                Err(MixerError::SourcePoolExhausted { capacity: 4 })
            ));
        }

        assert_eq!(render(&mut device, 64), samples);
        assert_eq!(playing.frames_played(&ctl), 64);
        assert!(playing.is_done(&ctl));
        for voice in idle {
            voice.release(&mut ctl);
        }
        playing.release(&mut ctl);
    }

    #[test]
    fn test_silent_output_fills_buffer() {
        let (mut device, _ctl) = mixer();
        // 100 frames spans a full block and a partial one
        let out = render(&mut device, 100);
        assert_eq!(out.len(), 200);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(device.blocks_rendered(), 2);

        // Trailing samples that do not form a whole frame are zeroed
        let mut odd = vec![1.0; 5];
        device.process_block(&mut odd);
        assert_eq!(odd, vec![0.0; 5]);
    }

    #[test]
    fn test_stereo_passthrough_is_exact() {
        let (mut device, mut ctl) = mixer();
        let mut voice = ctl.acquire().unwrap();
        voice.init(&mut ctl, SourceInitParams::new(2)).unwrap();

        let samples: Vec<f32> = (0..128).map(|i| (i as f32 - 64.0) / 128.0).collect();
        voice
            .submit_buffer(&mut ctl, PcmSegment::new(samples.clone(), 2).unwrap())
            .unwrap();
        voice.play(&mut ctl).unwrap();

        let out = render(&mut device, 64);
        assert_eq!(out, samples);
        assert!(voice.is_done(&ctl));
        assert_eq!(voice.frames_played(&ctl), 64);
        voice.release(&mut ctl);
    }

    #[test]
    fn test_buffer_queue_backpressure() {
        let (mut device, mut ctl) = mixer();
        let mut voice = ctl.acquire().unwrap();
        voice.init(&mut ctl, SourceInitParams::new(1).streaming(true)).unwrap();

        let segment = || PcmSegment::new(vec![0.1; 16], 1).unwrap();
        voice.submit_buffer(&mut ctl, segment()).unwrap();
        voice.submit_buffer(&mut ctl, segment()).unwrap();
        assert_eq!(
            voice.submit_buffer(&mut ctl, segment()),
            Err(MixerError::BufferQueueFull {
                slot: voice.slot(),
                max: 2
            })
        );

        // Wrong channel count is rejected before counting against the limit
        assert!(matches!(
            voice.submit_buffer(&mut ctl, PcmSegment::new(vec![0.1; 16], 2).unwrap()),
            Err(MixerError::InvalidParameter { .. })
        ));

        voice.play(&mut ctl).unwrap();
        render(&mut device, 64);
        voice.submit_buffer(&mut ctl, segment()).unwrap();
        voice.release(&mut ctl);
    }

    #[test]
    fn test_streaming_underrun_is_counted() {
        let (mut device, mut ctl) = mixer();
        let mut voice = ctl.acquire().unwrap();
        voice.init(&mut ctl, SourceInitParams::new(1).streaming(true)).unwrap();
        voice
            .submit_buffer(&mut ctl, PcmSegment::new(vec![0.5; 16], 1).unwrap())
            .unwrap();
        voice.play(&mut ctl).unwrap();

        render(&mut device, 64);
        assert_eq!(voice.underruns(&ctl), 1);
        assert!(!voice.is_done(&ctl));
        ctl.update();
        voice.release(&mut ctl);
    }

    #[test]
    fn test_status_of_previous_voice_is_hidden() {
        let (mut device, mut ctl) = mixer();
        let mut voice = ctl.acquire().unwrap();
        let slot = voice.slot();
        voice.init(&mut ctl, SourceInitParams::new(1)).unwrap();
        voice
            .submit_buffer(&mut ctl, PcmSegment::new(vec![0.5; 16], 1).unwrap())
            .unwrap();
        voice.play(&mut ctl).unwrap();
        render(&mut device, 64);
        assert!(voice.is_done(&ctl));
        assert_eq!(voice.frames_played(&ctl), 16);
        voice.release(&mut ctl);

        let mut voice = ctl.acquire().unwrap();
        assert_eq!(voice.slot(), slot);
        voice.init(&mut ctl, SourceInitParams::new(1)).unwrap();
        // The render thread has not seen the new init yet
        assert!(!voice.is_done(&ctl));
        assert_eq!(voice.frames_played(&ctl), 0);

        render(&mut device, 64);
        assert!(!voice.is_done(&ctl));
        voice.release(&mut ctl);
    }

    #[test]
    fn test_listener_callbacks() {
        let (mut device, mut ctl) = mixer();
        let counts = Arc::new(Counts::default());
        let mut voice = ctl.acquire().unwrap();
        let params = SourceInitParams::new(1)
            .with_listener(Box::new(CountingListener(counts.clone())));
        voice.init(&mut ctl, params).unwrap();
        voice
            .submit_buffer(&mut ctl, PcmSegment::new(vec![0.5; 16], 1).unwrap())
            .unwrap();
        voice
            .submit_buffer(&mut ctl, PcmSegment::new(vec![0.5; 16], 1).unwrap())
            .unwrap();
        voice.play(&mut ctl).unwrap();
        render(&mut device, 64);

        assert_eq!(counts.buffer_end.load(Ordering::Relaxed), 2);
        voice.release(&mut ctl);
        assert_eq!(counts.released.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_parameter_validation() {
        let (_device, mut ctl) = mixer();
        let mut voice = ctl.acquire().unwrap();
        assert_eq!(
            voice.play(&mut ctl),
            Err(MixerError::SourceNotInitialized(voice.slot()))
        );
        assert_eq!(
            voice.init(&mut ctl, SourceInitParams::new(0)),
            Err(MixerError::UnsupportedChannelCount(0))
        );
        voice.init(&mut ctl, SourceInitParams::new(2)).unwrap();

        assert!(matches!(
            voice.set_pitch(&mut ctl, f32::NAN),
            Err(MixerError::InvalidParameter { name: "pitch", .. })
        ));
        assert_eq!(
            voice.set_channel_map(&mut ctl, &[1.0, 0.0, 0.0], false, false),
            Err(MixerError::ChannelMapSizeMismatch {
                expected: 4,
                actual: 3
            })
        );
        assert_eq!(
            voice.set_submix_send(&mut ctl, SubmixId(3), 1.0),
            Err(MixerError::UnknownSubmix(SubmixId(3)))
        );
        voice.set_pitch(&mut ctl, 100.0).unwrap();
        voice.set_volume(&mut ctl, 0.5).unwrap();
        voice.set_lpf_frequency(&mut ctl, 1_000_000.0).unwrap();
        voice.release(&mut ctl);
    }

    #[test]
    fn test_command_queue_full_is_soft() {
        let (mut device, mut ctl) = MixerDevice::new(MixerConfig {
            command_queue_capacity: 2,
            max_sources: 1,
            ..config()
        })
        .unwrap();

        let mut voice = ctl.acquire().unwrap();
        voice.init(&mut ctl, SourceInitParams::new(1)).unwrap();
        voice.play(&mut ctl).unwrap();
        assert_eq!(voice.pause(&mut ctl), Err(MixerError::CommandQueueFull));

        // Release never fails; it is retried once the ring drains
        voice.release(&mut ctl);
        assert!(ctl.acquire().is_err());
        render(&mut device, 64);
        ctl.update();
        let voice = ctl.acquire().unwrap();
        voice.release(&mut ctl);
    }

    #[test]
    fn test_submix_topology() {
        let (mut device, mut ctl) = mixer();
        let a = ctl
            .register_submix(ChannelLayout::Fixed(2), SubmixId::MASTER, Vec::new())
            .unwrap();
        let b = ctl.register_submix(ChannelLayout::Device, a, Vec::new()).unwrap();

        assert_eq!(
            ctl.set_submix_parent(a, b),
            Err(MixerError::SubmixCycle { child: a, parent: b })
        );
        assert_eq!(
            ctl.set_submix_parent(a, a),
            Err(MixerError::SubmixCycle { child: a, parent: a })
        );
        assert_eq!(ctl.unregister_submix(SubmixId::MASTER), Err(MixerError::MasterSubmix));
        assert_eq!(
            ctl.unregister_submix(SubmixId(4)),
            Err(MixerError::UnknownSubmix(SubmixId(4)))
        );

        ctl.unregister_submix(a).unwrap();
        assert_eq!(ctl.submix_parent(b), Ok(Some(SubmixId::MASTER)));
        render(&mut device, 64);
        assert!(device.graph().node(a).is_none());
        assert_eq!(device.graph().node(SubmixId::MASTER).unwrap().children(), &[b]);
    }

    #[test]
    fn test_ambisonics_stream_pool() {
        let (_device, mut ctl) = mixer();
        let first = ctl
            .register_submix(ChannelLayout::Ambisonics, SubmixId::MASTER, Vec::new())
            .unwrap();
        assert_eq!(
            ctl.register_submix(ChannelLayout::Ambisonics, SubmixId::MASTER, Vec::new()),
            Err(MixerError::NoFreeAmbisonicsStream(1))
        );
        ctl.unregister_submix(first).unwrap();
        ctl.register_submix(ChannelLayout::Ambisonics, SubmixId::MASTER, Vec::new())
            .unwrap();
    }

    #[test]
    fn test_ambisonic_submix_places_source() {
        let (mut device, mut ctl) = mixer();
        let field = ctl
            .register_submix(ChannelLayout::Ambisonics, SubmixId::MASTER, Vec::new())
            .unwrap();

        let mut voice = ctl.acquire().unwrap();
        voice
            .init(&mut ctl, SourceInitParams::new(1).with_send(field, 1.0))
            .unwrap();
        voice
            .set_spatial_params(
                &mut ctl,
                SpatialParams {
                    azimuth: 60.0,
                    ..Default::default()
                },
            )
            .unwrap();
        voice
            .submit_buffer(&mut ctl, PcmSegment::new(vec![0.5; 64], 1).unwrap())
            .unwrap();
        voice.play(&mut ctl).unwrap();

        let out = render(&mut device, 64);
        let (left, right) = (out[0], out[1]);
        assert!(right > left, "right {} should exceed left {}", right, left);
        assert!(left > 0.0);
        voice.release(&mut ctl);
    }

    #[test]
    fn test_spatializer_voice() {
        let (mut device, mut ctl) = mixer();
        let plugins = || SourcePlugins::new().with_spatializer(Box::new(PanningSpatializer::new()));

        let mut voice = ctl.acquire().unwrap();
        assert_eq!(
            voice.init(&mut ctl, SourceInitParams::new(2).with_plugins(plugins())),
            Err(MixerError::SpatializerNeedsMono(2))
        );
        voice
            .init(&mut ctl, SourceInitParams::new(1).with_plugins(plugins()))
            .unwrap();
        // Channel maps now address the spatializer's stereo output
        assert_eq!(
            voice.set_channel_map(&mut ctl, &[1.0, 0.0], false, false),
            Err(MixerError::ChannelMapSizeMismatch {
                expected: 4,
                actual: 2
            })
        );
        voice
            .set_spatial_params(
                &mut ctl,
                SpatialParams {
                    azimuth: 90.0,
                    ..Default::default()
                },
            )
            .unwrap();
        voice
            .submit_buffer(&mut ctl, PcmSegment::new(vec![0.5; 64], 1).unwrap())
            .unwrap();
        voice.play(&mut ctl).unwrap();

        let out = render(&mut device, 64);
        for frame in out.chunks_exact(2) {
            assert!(frame[0].abs() < 1e-6);
            assert!((frame[1] - 0.5).abs() < 1e-6);
        }
        voice.release(&mut ctl);
    }

    #[test]
    fn test_reverb_submix_keeps_dry_signal_at_zero_mix() {
        let (mut device, mut ctl) = mixer();
        let mut reverb = ReverbEffect::new();
        // Mix 0 passes the dry signal through
        crate::effect::Effect::set_param(&mut reverb, 3, 0.0);
        let bus = ctl
            .register_submix(ChannelLayout::Device, SubmixId::MASTER, vec![Box::new(reverb)])
            .unwrap();

        let mut voice = ctl.acquire().unwrap();
        voice
            .init(&mut ctl, SourceInitParams::new(2).with_send(bus, 1.0))
            .unwrap();
        voice
            .submit_buffer(&mut ctl, PcmSegment::new(vec![0.25; 128], 2).unwrap())
            .unwrap();
        voice.play(&mut ctl).unwrap();

        let out = render(&mut device, 64);
        assert!(out.iter().all(|&s| (s - 0.25).abs() < 1e-6));
        voice.release(&mut ctl);
    }

    #[test]
    fn test_device_channel_change() {
        let (mut device, mut ctl) = mixer();
        let mut voice = ctl.acquire().unwrap();
        voice.init(&mut ctl, SourceInitParams::new(1)).unwrap();
        // Explicit 3D map with no position to rebuild it from
        voice
            .set_channel_map(&mut ctl, &[0.5, 0.5], true, false)
            .unwrap();
        render(&mut device, 64);

        ctl.set_device_channels(6).unwrap();
        assert_eq!(ctl.device_channels(), 6);
        let out = render(&mut device, 64);
        assert_eq!(device.channels(), 6);
        assert_eq!(out.len(), 64 * 6);
        assert!(voice.needs_speaker_map(&ctl));

        assert!(matches!(
            ctl.set_device_channels(0),
            Err(MixerError::UnsupportedChannelCount(0))
        ));
        voice.release(&mut ctl);
    }
}
