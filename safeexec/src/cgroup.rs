use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::Result;

/// A fresh cgroup-v2 directory holding one sandbox.
#[derive(Debug)]
pub(crate) struct Cgroup {
    path: PathBuf,
}

impl Cgroup {
    pub(crate) fn create(path: &Path) -> Result<Self> {
        // A leftover dir from a crashed run must be empty of processes
        // by now; recreate it to reset limits.
        if let Err(err) = std::fs::remove_dir(path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                return Err(err.into());
            }
        }
        std::fs::create_dir_all(path)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub(crate) fn set_memory_limit(&self, limit: i64) -> Result<()> {
        std::fs::write(self.path.join("memory.max"), format!("{}", limit))?;
        std::fs::write(self.path.join("memory.swap.max"), "0")?;
        Ok(())
    }

    pub(crate) fn add_process(&self, pid: i32) -> Result<()> {
        std::fs::write(self.path.join("cgroup.procs"), format!("{}", pid))?;
        Ok(())
    }

    pub(crate) fn memory_current(&self) -> Result<i64> {
        let data = std::fs::read_to_string(self.path.join("memory.current"))?;
        Ok(data.trim().parse().unwrap_or(0))
    }

    /// Removes the cgroup dir. The kernel refuses while member
    /// processes are still exiting, so a few retries are needed.
    pub(crate) fn remove(&self) -> Result<()> {
        for _ in 0..50 {
            match std::fs::remove_dir(&self.path) {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(_) => std::thread::sleep(Duration::from_millis(10)),
            }
        }
        std::fs::remove_dir(&self.path)?;
        Ok(())
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}
