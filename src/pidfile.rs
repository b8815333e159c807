use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// Scoped PID-file guard for detached operation. The file is written on
/// acquisition and removed when the guard drops, on every exit path.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn acquire(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create pid file dir {}", parent.display()))?;
        }
        fs::write(&path, format!("{}\n", std::process::id()))
            .with_context(|| format!("write pid file {}", path.display()))?;
        Ok(Self { path })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
