//! Submix buses and the tree they form
//!
//! - [`SubmixNode`]: one bus with its own channel layout, effect chain and
//!   routed sources
//! - [`SubmixGraph`]: the arena of nodes, processed bottom-up from the master

pub mod graph;
pub mod node;

pub use graph::SubmixGraph;
pub use node::{ChannelLayout, SubmixNode, SubmixState};
