use std::path::PathBuf;
use std::time::Duration;

use crate::process::Process;
use crate::Result;

/// How to run one command inside a fresh sandbox.
#[derive(Clone, Debug)]
pub struct ProcessConfig {
    /// Read-only overlay layers the container root is built from.
    pub layers: Vec<PathBuf>,
    pub environ: Vec<String>,
    pub args: Vec<String>,
    /// Working directory inside the container.
    pub workdir: PathBuf,
    /// Host files the child's stdio is wired to; `/dev/null` when
    /// absent.
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    /// Wall-clock limit.
    pub time_limit: Duration,
    /// Memory limit in bytes, enforced through the cgroup.
    pub memory_limit: i64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            layers: Vec::new(),
            environ: Vec::new(),
            args: Vec::new(),
            workdir: PathBuf::from("/"),
            stdin: None,
            stdout: None,
            stderr: None,
            time_limit: Duration::from_secs(60),
            memory_limit: 256 * 1024 * 1024,
        }
    }
}

/// Factory for sandboxed processes. Holds the process-wide state dir
/// and the cgroup subtree; every sandbox gets a unique subdirectory of
/// each.
#[derive(Debug)]
pub struct Manager {
    path: PathBuf,
    cgroup_path: PathBuf,
}

impl Manager {
    pub fn new(path: impl Into<PathBuf>, cgroup_path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cgroup_path = cgroup_path.into();
        std::fs::create_dir_all(&path)?;
        std::fs::create_dir_all(&cgroup_path)?;
        Ok(Self { path, cgroup_path })
    }

    /// Prepares an isolated environment for one process. Nothing runs
    /// until [`Process::start`].
    pub fn create(&self, config: ProcessConfig) -> Result<Process> {
        let id = uuid::Uuid::new_v4().to_string();
        Process::create(
            self.path.join(&id),
            self.cgroup_path.join(&id),
            id,
            config,
        )
    }
}
