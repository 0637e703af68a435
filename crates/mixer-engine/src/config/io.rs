//! YAML configuration I/O
//!
//! Works with any serde configuration type. Two loading flavours:
//! [`load_config`] never fails and falls back to defaults, for start-up paths
//! where a broken file must not keep audio from playing;
//! [`load_config_strict`] reports what went wrong.

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Load configuration from a YAML file, falling back to `T::default()`
///
/// A missing file is expected on first run and only logged at info level; a
/// file that can't be read or parsed is logged as a warning.
///
/// ```ignore
/// let config: EngineConfig = load_config(&default_config_path("mixer.yaml"));
/// ```
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("No config at {:?}, using defaults", path);
        return T::default();
    }

    match load_config_strict(path) {
        Ok(config) => {
            log::info!("Loaded config from {:?}", path);
            config
        }
        Err(e) => {
            log::warn!("{:#}; using defaults", e);
            T::default()
        }
    }
}

/// Load configuration from a YAML file, failing on any error
pub fn load_config_strict<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {:?}", path))
}

/// Save configuration to a YAML file
///
/// Creates parent directories as needed. The file is written next to its
/// destination and renamed into place, so a crash mid-write never leaves a
/// truncated config behind.
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);
    std::fs::write(tmp, yaml).with_context(|| format!("Failed to write {:?}", tmp))?;
    std::fs::rename(tmp, path)
        .with_context(|| format!("Failed to move config into place at {:?}", path))?;

    log::info!("Saved config to {:?}", path);
    Ok(())
}
