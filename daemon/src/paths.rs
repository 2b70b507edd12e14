/// Canonical file paths for Luma data files.
///
/// Both files live under `<platform data dir>/Luma/`:
///   - config.toml  Written by the user, read by the daemon.
///   - status.toml  Written by the daemon, read by the UI.
use std::path::PathBuf;

const APP_DIR_NAME: &str = "Luma";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";

/// Returns the Luma application data directory, falling back to `./Luma` on
/// platforms without a data directory.
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

pub fn config_file_path() -> PathBuf {
    app_data_dir().join(CONFIG_FILE_NAME)
}

pub fn status_file_path() -> PathBuf {
    app_data_dir().join(STATUS_FILE_NAME)
}
