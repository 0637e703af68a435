//! Speaker layouts, channel maps and ambisonics
//!
//! Everything in here is plain math over value types. The control side uses
//! it to build channel maps; the render side uses the layout tables and the
//! ambisonics codec while mixing submixes.

pub mod ambisonics;
pub mod channel_map;
pub mod layout;

pub use ambisonics::{
    encode_gains, speaker_encode_matrix, AmbisonicsDecoder, AmbisonicsStreamId,
    AmbisonicsStreamPool,
};
pub use channel_map::{conversion_matrix, map_2d, map_3d, omni_blend, ChannelMap, SpatialParams};
pub use layout::{speakers_for, ChannelOrder, Speaker, SpeakerLayout};
