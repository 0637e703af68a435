//! Native Rust effects
//!
//! These effects are implemented directly in Rust and are safe to run on the
//! render thread once initialised.

mod delay;
mod filter;
mod gain;
mod reverb;
mod spatializer;

pub use delay::DelayEffect;
pub use filter::OnePoleLowPass;
pub use gain::GainEffect;
pub use reverb::ReverbEffect;
pub use spatializer::PanningSpatializer;
