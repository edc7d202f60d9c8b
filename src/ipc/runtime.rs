use directories::UserDirs;
use std::{fs, path::PathBuf};

pub fn runtime_dir() -> PathBuf {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .unwrap_or_else(std::env::temp_dir);
    let dir = home.join(".local").join("run");
    let _ = fs::create_dir_all(&dir);
    dir
}

pub fn socket_path() -> PathBuf {
    runtime_dir().join("handctl.sock")
}

/// Where the daemon reads tracker frames unless told otherwise; usually a
/// FIFO the tracker writes JSON lines into.
pub fn default_frame_source() -> PathBuf {
    runtime_dir().join("handctl.frames")
}
