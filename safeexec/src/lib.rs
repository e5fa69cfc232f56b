//! Sandbox runner: executes one process inside a disposable, rootless
//! container built from user/pid/mount/net/ipc/uts/cgroup namespaces
//! with an overlayfs root and a cgroup-v2 memory limit.
//!
//! The parent side builds the environment and monitors the child; the
//! child side re-execs the current binary with `init` as its first
//! argument and finishes the setup inside the new namespaces.

mod cgroup;
pub mod init;
mod manager;
mod process;
mod report;

pub use manager::{Manager, ProcessConfig};
pub use process::Process;
pub use report::Report;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error")]
    Io(#[from] std::io::Error),
    #[error("{call} failed (errno {errno})")]
    System { call: &'static str, errno: i32 },
    #[error("sandbox process was cancelled")]
    Cancelled,
    #[error("invalid report: {0}")]
    InvalidReport(String),
    #[error("invalid sandbox state: {0}")]
    InvalidState(&'static str),
    #[error("cannot encode jail config")]
    Config(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn system(call: &'static str) -> Self {
        Error::System {
            call,
            errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(0),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
