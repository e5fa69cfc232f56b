//! Privileged end-to-end checks for the sandbox runner.
//!
//! These need a user able to create user namespaces and a writable
//! cgroup-v2 subtree, so they are ignored by default:
//!
//! ```sh
//! SOLVE_SANDBOX_CGROUP=/sys/fs/cgroup/solve-test \
//!     cargo test -p safeexec -- --ignored
//! ```

use std::time::Duration;

use safeexec::{Manager, ProcessConfig};

fn cgroup_path() -> Option<String> {
    std::env::var("SOLVE_SANDBOX_CGROUP").ok()
}

#[test]
#[ignore]
fn test_run_true() {
    let cgroup = cgroup_path().expect("SOLVE_SANDBOX_CGROUP is not set");
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::new(dir.path().join("state"), cgroup).unwrap();
    let mut process = manager
        .create(ProcessConfig {
            layers: vec!["/".into()],
            args: vec!["/bin/true".into()],
            workdir: "/".into(),
            time_limit: Duration::from_secs(5),
            memory_limit: 64 * 1024 * 1024,
            ..Default::default()
        })
        .unwrap();
    process.start().unwrap();
    let report = process.wait(&|| false).unwrap();
    assert_eq!(report.exit_code, 0);
    process.release();
}

// A busy loop is killed within one tick of the time limit.
#[test]
#[ignore]
fn test_time_limit() {
    let cgroup = cgroup_path().expect("SOLVE_SANDBOX_CGROUP is not set");
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::new(dir.path().join("state"), cgroup).unwrap();
    let mut process = manager
        .create(ProcessConfig {
            layers: vec!["/".into()],
            args: vec!["/bin/sh".into(), "-c".into(), "while true; do :; done".into()],
            workdir: "/".into(),
            time_limit: Duration::from_millis(500),
            memory_limit: 64 * 1024 * 1024,
            ..Default::default()
        })
        .unwrap();
    process.start().unwrap();
    let report = process.wait(&|| false).unwrap();
    assert!(report.time >= 500);
    assert!(report.time < 1000);
    assert_ne!(report.exit_code, 0);
    process.release();
}
