use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "legendo";
pub const APP_NAME: &str = "cache";

pub fn data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(override_dir) = std::env::var("LEGENDO_DATA_DIR") {
        if !override_dir.is_empty() {
            return Ok(PathBuf::from(override_dir));
        }
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn config_path() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var("LEGENDO_CONFIG") {
        return Ok(PathBuf::from(override_path));
    }
    Ok(data_dir()?.join("config.json"))
}

pub fn ipc_socket_path() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var("LEGENDO_SOCKET") {
        return Ok(PathBuf::from(override_path));
    }
    Ok(data_dir()?.join("cache.ipc"))
}

/// The shared IPC secret lives next to the socket it protects.
pub fn ipc_secret_path(socket_path: &std::path::Path) -> PathBuf {
    socket_path.with_extension("secret")
}
