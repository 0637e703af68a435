//! Standard locations for mixer configuration files

use std::path::PathBuf;

/// Directory name under the platform config directory
const APP_DIR: &str = "mixer-engine";

/// Get the default configuration directory
///
/// Returns: `$XDG_CONFIG_HOME/mixer-engine` on Linux, the platform
/// equivalent elsewhere, or `./mixer-engine` if neither can be found.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Get the default path of a config file
///
/// # Arguments
/// * `filename` - Config file name (e.g., "mixer.yaml")
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}
