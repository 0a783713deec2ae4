use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use fs2::FileExt;

const LOCK_FILE: &str = "pitcrew.run.lock";

pub fn launch_lock_path() -> PathBuf {
    if let Some(runtime) = env::var_os("XDG_RUNTIME_DIR").filter(|v| !v.is_empty()) {
        return PathBuf::from(runtime).join(LOCK_FILE);
    }
    env::temp_dir().join(LOCK_FILE)
}

/// Hold the launch lock for as long as the returned file lives. Two
/// orchestrators fighting over the same helpers is never what anyone wants,
/// so this fails instead of waiting.
pub fn acquire_launch_lock() -> Result<fs::File> {
    acquire_lock_at(&launch_lock_path())
}

fn acquire_lock_at(path: &Path) -> Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create launch lock dir: {}", parent.display()))?;
    }

    let file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .read(true)
        .open(path)
        .with_context(|| format!("failed to open launch lock: {}", path.display()))?;

    tracing::debug!(path = %path.display(), "acquiring launch lock");
    file.try_lock_exclusive().with_context(|| {
        format!(
            "another pitcrew run holds the launch lock at {}",
            path.display()
        )
    })?;
    Ok(file)
}
