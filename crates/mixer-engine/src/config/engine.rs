//! Top-level configuration file
//!
//! One YAML document with a section per subsystem:
//!
//! ```yaml
//! mixer:
//!   sample_rate: 48000
//!   block_frames: 256
//!   worker_threads: 4
//! audio:
//!   buffer_size: MixerBlock
//! ```

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::io::{load_config, load_config_strict, save_config};
use super::mixer::MixerConfig;
use crate::audio::AudioConfig;

/// File name used under the default config directory
pub const CONFIG_FILE_NAME: &str = "mixer.yaml";

/// Everything the engine reads from disk
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mixer: MixerConfig,
    pub audio: AudioConfig,
}

impl EngineConfig {
    /// Load from `path`; missing or broken files give a valid default config
    ///
    /// A file that parses but describes a mixer the engine can't build is
    /// also replaced by the defaults.
    pub fn load(path: &Path) -> Self {
        let config: Self = load_config(path);
        match config.mixer.validate() {
            Ok(()) => config,
            Err(e) => {
                log::warn!("Ignoring mixer config from {:?}: {}", path, e);
                Self {
                    mixer: MixerConfig::default(),
                    ..config
                }
            }
        }
    }

    /// Load from `path`, reporting any read, parse or validation error
    pub fn load_strict(path: &Path) -> Result<Self> {
        let config: Self = load_config_strict(path)?;
        config.mixer.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_config(self, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::BufferSize;

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut config = EngineConfig::default();
        config.mixer.block_frames = 256;
        config.mixer.worker_threads = 4;
        config.audio.buffer_size = BufferSize::MixerBlock;

        config.save(&path).unwrap();
        assert_eq!(EngineConfig::load_strict(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_mixer_section_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            "mixer:\n  block_frames: 0\naudio:\n  buffer_size: MixerBlock\n",
        )
        .unwrap();

        assert!(EngineConfig::load_strict(&path).is_err());
        let config = EngineConfig::load(&path);
        assert_eq!(config.mixer, MixerConfig::default());
        assert_eq!(config.audio.buffer_size, BufferSize::MixerBlock);
    }
}
