//! Mixing engine - source slots, command queue, control and render halves
//!
//! The engine is split across two threads:
//! - [`MixerControl`] and [`SourceVoice`] live on the control thread. They
//!   validate every call and turn it into a [`MixerCommand`].
//! - [`MixerDevice`] lives on the render thread. Each block it drains the
//!   command ring, renders every [`SourceSlot`] through the
//!   [`SourceManager`] and pulls the submix tree.
//!
//! Status flows back through [`SlotAtomics`]; memory the render thread lets
//! go of is freed by the [`GcThread`] owned by the control half.

pub mod atomics;
pub mod buffer_queue;
pub mod command;
pub mod control;
pub mod device;
pub mod error;
pub mod gc;
pub mod param;
pub mod slot;
pub mod source_manager;
pub mod voice;

pub use atomics::SlotAtomics;
pub use buffer_queue::{BufferQueueListener, PcmSegment};
pub use command::{command_channel, MixerCommand, SourceInit};
pub use control::{MixerControl, SourceInitParams};
pub use device::MixerDevice;
pub use error::{MixerError, MixerResult};
pub use gc::GcThread;
pub use param::{ChannelMapParam, SourceParam};
pub use slot::{SourceSlot, MAX_PITCH, MAX_VOLUME, MIN_LPF_HZ, MIN_PITCH};
pub use source_manager::SourceManager;
pub use voice::SourceVoice;
