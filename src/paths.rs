use crate::error::{RemixError, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("dev", "StemRemix", "stem-remix")
        .ok_or_else(|| RemixError::Config("home directory not available".into()))
}

/// Root under which every run creates its own workspace.
pub fn default_scratch_dir() -> PathBuf {
    match project_dirs() {
        Ok(proj) => proj.cache_dir().join("scratch"),
        Err(_) => std::env::temp_dir().join("stem-remix"),
    }
}

pub fn default_config_file() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("stem-remix.toml"))
}
