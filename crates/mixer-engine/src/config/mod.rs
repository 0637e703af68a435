//! Configuration for the mixing engine
//!
//! - [`MixerConfig`]: pool sizes and render settings, fixed at device creation
//! - [`EngineConfig`]: the on-disk file, with a mixer and an audio section
//! - Generic YAML load/save helpers and the default config location
//!
//! # Usage
//!
//! ```ignore
//! use mixer_engine::config::{default_config_path, EngineConfig, CONFIG_FILE_NAME};
//!
//! let path = default_config_path(CONFIG_FILE_NAME);
//! let config = EngineConfig::load(&path);
//! config.save(&path)?;
//! ```

mod engine;
mod io;
mod mixer;
mod paths;

pub use engine::{EngineConfig, CONFIG_FILE_NAME};
pub use io::{load_config, load_config_strict, save_config};
pub use mixer::{MixerConfig, DEFAULT_TAIL_THRESHOLD, MAX_BLOCK_FRAMES};
pub use paths::{default_config_dir, default_config_path};
