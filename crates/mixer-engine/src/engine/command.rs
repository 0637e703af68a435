//! Lock-free command queue from the control thread to the render thread
//!
//! Every control-side operation becomes one [`MixerCommand`] pushed onto an
//! `rtrb` single-producer single-consumer ring. The render thread drains the
//! ring completely at the start of each tick, before any audio is computed,
//! so a command never takes effect halfway through a block.
//!
//! # Real-Time Safety
//!
//! - **No allocations**: the ring is allocated once when the device is created
//! - **Wait-free**: push and pop are O(1) and never block
//! - **No frees on the render thread**: payloads that own heap memory travel
//!   as `basedrop::Owned` / `basedrop::Shared`, so dropping them there only
//!   enqueues the allocation for the collector thread

use basedrop::{Owned, Shared};

use super::buffer_queue::{BufferQueueListener, PcmSegment};
use crate::effect::plugin::SourcePlugins;
use crate::effect::SourceEffectChain;
use crate::spatial::{ChannelMap, ChannelOrder, SpatialParams, SpeakerLayout};
use crate::submix::SubmixNode;
use crate::types::{SlotId, SubmixId};

/// Everything the render thread needs to (re)start a slot
///
/// Boxed in an `Owned` so the command enum stays small.
pub struct SourceInit {
    /// Control-side init counter, echoed back through the slot atomics
    pub generation: u32,
    pub channels: usize,
    pub order: ChannelOrder,
    pub streaming: bool,
    pub center_only: bool,
    /// Source sample rate divided by device sample rate
    pub rate_ratio: f64,
    pub listener: Option<Shared<Box<dyn BufferQueueListener>>>,
    pub effects: Option<Owned<SourceEffectChain>>,
    pub plugins: Option<Owned<SourcePlugins>>,
    /// Initial (submix, send level) routes
    pub sends: Vec<(SubmixId, f32)>,
}

/// Commands sent from the control thread to the render thread
///
/// Commands are processed at the start of each tick in the order they
/// were sent.
pub enum MixerCommand {
    // ─────────────────────────────────────────────────────────────
    // Source lifecycle
    // ─────────────────────────────────────────────────────────────
    /// Bind a slot to a new voice
    InitSource { slot: SlotId, init: Owned<SourceInit> },
    /// Start (or resume) playback
    Play { slot: SlotId },
    /// Stop reading source data; effect tails keep ringing
    Stop { slot: SlotId },
    /// Suspend the slot without touching its state
    Pause { slot: SlotId },
    /// Return the slot to the idle state and drop its routes
    Release { slot: SlotId },

    // ─────────────────────────────────────────────────────────────
    // Source parameters (ramped over the next block)
    // ─────────────────────────────────────────────────────────────
    SetPitch { slot: SlotId, pitch: f32 },
    SetVolume { slot: SlotId, volume: f32 },
    SetLpfFrequency { slot: SlotId, hz: f32 },
    /// Explicit channel map; a size mismatch with the current output is
    /// resolved on the render thread
    SetChannelMap {
        slot: SlotId,
        map: Owned<ChannelMap>,
        is_3d: bool,
        center_only: bool,
    },
    SetSpatialParams { slot: SlotId, params: SpatialParams },
    /// Route the slot into a submix (level 0 removes the route)
    SetSubmixSend {
        slot: SlotId,
        submix: SubmixId,
        level: f32,
    },
    SetDebugSolo { slot: SlotId, solo: bool },
    SetSourceEffectParam {
        slot: SlotId,
        effect: usize,
        param: usize,
        value: f32,
    },
    SetSourceEffectBypass {
        slot: SlotId,
        effect: usize,
        bypass: bool,
    },
    /// Append a decoded segment to the slot's buffer queue
    SubmitBuffer {
        slot: SlotId,
        segment: Shared<PcmSegment>,
    },

    // ─────────────────────────────────────────────────────────────
    // Submix graph
    // ─────────────────────────────────────────────────────────────
    /// Insert a configured node into the graph under its parent
    AddSubmix { node: Owned<SubmixNode> },
    /// Tear a node down; its children move to its parent
    RemoveSubmix { submix: SubmixId },
    SetSubmixParent { submix: SubmixId, parent: SubmixId },
    SetSubmixEffectParam {
        submix: SubmixId,
        effect: usize,
        param: usize,
        value: f32,
    },
    SetSubmixEffectBypass {
        submix: SubmixId,
        effect: usize,
        bypass: bool,
    },

    // ─────────────────────────────────────────────────────────────
    // Device
    // ─────────────────────────────────────────────────────────────
    /// Listener yaw in degrees clockwise, used by ambisonics decoding
    SetListenerOrientation { yaw: f32 },
    /// The output channel count changed; regenerate every channel map
    UpdateDeviceChannels { layout: Shared<SpeakerLayout> },
}

/// Create a command channel pair with the given capacity
pub fn command_channel(
    capacity: usize,
) -> (rtrb::Producer<MixerCommand>, rtrb::Consumer<MixerCommand>) {
    rtrb::RingBuffer::new(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_channel_creation() {
        let (mut tx, mut rx) = command_channel(4);

        assert!(tx.push(MixerCommand::Play { slot: SlotId(0) }).is_ok());

        let cmd = rx.pop().unwrap();
        assert!(matches!(cmd, MixerCommand::Play { slot: SlotId(0) }));
    }

    #[test]
    fn test_command_channel_capacity() {
        let (mut tx, _rx) = command_channel(2);
        assert!(tx.push(MixerCommand::Stop { slot: SlotId(1) }).is_ok());
        assert!(tx.push(MixerCommand::Stop { slot: SlotId(1) }).is_ok());
        assert!(tx.push(MixerCommand::Stop { slot: SlotId(1) }).is_err());
    }

    #[test]
    fn test_command_size() {
        // Payloads that own memory are boxed, so the ring stays cache friendly
        let size = std::mem::size_of::<MixerCommand>();
        assert!(size <= 40, "MixerCommand is {} bytes, expected <= 40", size);
    }
}
