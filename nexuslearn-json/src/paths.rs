use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub fn data_root() -> PathBuf {
    if let Some(pd) = ProjectDirs::from("org", "nexuslearn", "NexusLearn") {
        pd.data_dir().to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }
}

/// Store file and backups directory under `root`.
pub fn store_files(root: &Path) -> (PathBuf, PathBuf) {
    (root.join("nexuslearn.json"), root.join("backups"))
}
