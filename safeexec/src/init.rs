//! Container-init side of the sandbox.
//!
//! The runner clones a child with fresh namespaces; the child re-execs
//! the current binary with `init` as argv[1], which lands here. By the
//! time the jail config arrives over the init pipe, the parent has
//! written the uid/gid maps and placed this process into its cgroup.

use std::ffi::CString;
use std::fs::File;
use std::io::Read;
use std::os::unix::io::FromRawFd;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub(crate) const INIT_PIPE_ENV: &str = "SOLVE_INIT_PIPE";
pub(crate) const FINALIZE_PIPE_ENV: &str = "SOLVE_FINALIZE_PIPE";

pub(crate) const SANDBOX_HOSTNAME: &str = "sandbox";

/// Everything the init process needs to finish the container setup.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct JailConfig {
    /// Mount point the overlay root gets assembled at.
    pub rootfs: PathBuf,
    /// Read-only overlay layers, lowest last.
    pub layers: Vec<PathBuf>,
    pub upper_dir: PathBuf,
    pub work_dir: PathBuf,
    /// Working directory inside the container.
    pub workdir: PathBuf,
    pub args: Vec<String>,
    pub environ: Vec<String>,
}

/// Entry point for `argv[1] == "init"`. Never returns: on success the
/// process becomes the sandboxed target, on failure it exits.
pub fn main() -> ! {
    let code = match run() {
        Ok(never) => match never {},
        Err(err) => {
            eprintln!("sandbox init: {}", err);
            1
        }
    };
    std::process::exit(code)
}

enum Never {}

fn env_fd(name: &str) -> Result<i32> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .ok_or(Error::InvalidState("missing sandbox pipe fd"))
}

fn run() -> Result<Never> {
    let init_fd = env_fd(INIT_PIPE_ENV)?;
    let finalize_fd = env_fd(FINALIZE_PIPE_ENV)?;
    // EOF doubles as the go signal: the parent closes its end only
    // after the uid map and the cgroup are ready.
    let mut data = Vec::new();
    {
        let mut pipe = unsafe { File::from_raw_fd(init_fd) };
        pipe.read_to_end(&mut data)?;
    }
    let config: JailConfig = serde_json::from_slice(&data)?;

    setup_cgroup_namespace()?;
    setup_mount_namespace(&config)?;
    setup_uts_namespace()?;

    std::env::set_current_dir(&config.workdir)
        .map_err(|_| Error::system("chdir"))?;
    // Closing the finalize pipe tells the parent the setup is done and
    // the target is about to run.
    unsafe { libc::close(finalize_fd) };
    exec(&config)
}

fn setup_cgroup_namespace() -> Result<()> {
    if unsafe { libc::unshare(libc::CLONE_NEWCGROUP) } != 0 {
        return Err(Error::system("unshare"));
    }
    Ok(())
}

fn cstring(path: impl AsRef<Path>) -> Result<CString> {
    use std::os::unix::ffi::OsStrExt;
    CString::new(path.as_ref().as_os_str().as_bytes())
        .map_err(|_| Error::InvalidState("path contains a nul byte"))
}

fn mount(
    source: Option<&Path>,
    target: &Path,
    fstype: Option<&str>,
    flags: libc::c_ulong,
    data: Option<&str>,
) -> Result<()> {
    let source = source.map(cstring).transpose()?;
    let target = cstring(target)?;
    let fstype = fstype.map(|v| CString::new(v).expect("static fs type"));
    let data = data
        .map(|v| CString::new(v).map_err(|_| Error::InvalidState("bad mount data")))
        .transpose()?;
    let ret = unsafe {
        libc::mount(
            source.as_ref().map_or(std::ptr::null(), |v| v.as_ptr()),
            target.as_ptr(),
            fstype.as_ref().map_or(std::ptr::null(), |v| v.as_ptr()),
            flags,
            data.as_ref()
                .map_or(std::ptr::null(), |v| v.as_ptr() as *const libc::c_void),
        )
    };
    if ret != 0 {
        return Err(Error::system("mount"));
    }
    Ok(())
}

/// Mounts `fstype` at `target` (relative to the new root), creating
/// the mount point first.
fn mount_inside(
    config: &JailConfig,
    source: &str,
    target: &str,
    fstype: &str,
    flags: libc::c_ulong,
    data: Option<&str>,
) -> Result<()> {
    let path = config.rootfs.join(target.trim_start_matches('/'));
    std::fs::create_dir_all(&path)?;
    mount(Some(Path::new(source)), &path, Some(fstype), flags, data)
}

fn setup_overlayfs(config: &JailConfig) -> Result<()> {
    use std::fmt::Write;
    let mut lower = String::new();
    for layer in &config.layers {
        if !lower.is_empty() {
            lower.push(':');
        }
        write!(lower, "{}", layer.display())
            .map_err(|_| Error::InvalidState("bad layer path"))?;
    }
    let data = format!(
        "lowerdir={},upperdir={},workdir={}",
        lower,
        config.upper_dir.display(),
        config.work_dir.display()
    );
    mount(
        Some(Path::new("overlay")),
        &config.rootfs,
        Some("overlay"),
        0,
        Some(&data),
    )
}

fn setup_mount_namespace(config: &JailConfig) -> Result<()> {
    // Keep every following change private to this namespace.
    mount(None, Path::new("/"), None, libc::MS_SLAVE | libc::MS_REC, None)?;
    mount(None, Path::new("/"), None, libc::MS_PRIVATE, None)?;
    mount(
        Some(&config.rootfs),
        &config.rootfs,
        Some("bind"),
        libc::MS_BIND | libc::MS_REC,
        None,
    )?;
    setup_overlayfs(config)?;
    mount_inside(
        config,
        "sysfs",
        "/sys",
        "sysfs",
        libc::MS_NOEXEC | libc::MS_NOSUID | libc::MS_NODEV | libc::MS_RDONLY,
        None,
    )?;
    mount_inside(
        config,
        "proc",
        "/proc",
        "proc",
        libc::MS_NOEXEC | libc::MS_NOSUID | libc::MS_NODEV,
        None,
    )?;
    mount_inside(
        config,
        "tmpfs",
        "/dev",
        "tmpfs",
        libc::MS_NOSUID | libc::MS_STRICTATIME,
        Some("mode=755,size=65536k"),
    )?;
    mount_inside(
        config,
        "devpts",
        "/dev/pts",
        "devpts",
        libc::MS_NOSUID | libc::MS_NOEXEC,
        Some("newinstance,ptmxmode=0666,mode=0620"),
    )?;
    mount_inside(
        config,
        "shm",
        "/dev/shm",
        "tmpfs",
        libc::MS_NOEXEC | libc::MS_NOSUID | libc::MS_NODEV,
        Some("mode=1777,size=65536k"),
    )?;
    mount_inside(
        config,
        "mqueue",
        "/dev/mqueue",
        "mqueue",
        libc::MS_NOEXEC | libc::MS_NOSUID | libc::MS_NODEV,
        None,
    )?;
    mount_inside(
        config,
        "cgroup",
        "/sys/fs/cgroup",
        "cgroup2",
        libc::MS_NOEXEC
            | libc::MS_NOSUID
            | libc::MS_NODEV
            | libc::MS_RELATIME
            | libc::MS_RDONLY,
        None,
    )?;
    pivot_root(config)
}

fn pivot_root(config: &JailConfig) -> Result<()> {
    let old_root = unsafe {
        libc::open(
            cstring("/")?.as_ptr(),
            libc::O_DIRECTORY | libc::O_RDONLY,
        )
    };
    if old_root < 0 {
        return Err(Error::system("open"));
    }
    let new_root = unsafe {
        libc::open(
            cstring(&config.rootfs)?.as_ptr(),
            libc::O_DIRECTORY | libc::O_RDONLY,
        )
    };
    if new_root < 0 {
        return Err(Error::system("open"));
    }
    if unsafe { libc::fchdir(new_root) } != 0 {
        return Err(Error::system("fchdir"));
    }
    let dot = cstring(".")?;
    if unsafe { libc::syscall(libc::SYS_pivot_root, dot.as_ptr(), dot.as_ptr()) } != 0 {
        return Err(Error::system("pivot_root"));
    }
    unsafe { libc::close(new_root) };
    if unsafe { libc::fchdir(old_root) } != 0 {
        return Err(Error::system("fchdir"));
    }
    mount(None, Path::new("."), None, libc::MS_SLAVE | libc::MS_REC, None)?;
    if unsafe { libc::umount2(dot.as_ptr(), libc::MNT_DETACH) } != 0 {
        return Err(Error::system("umount2"));
    }
    unsafe { libc::close(old_root) };
    if unsafe { libc::chdir(cstring("/")?.as_ptr()) } != 0 {
        return Err(Error::system("chdir"));
    }
    Ok(())
}

fn setup_uts_namespace() -> Result<()> {
    let name = SANDBOX_HOSTNAME;
    if unsafe { libc::sethostname(name.as_ptr() as *const libc::c_char, name.len()) } != 0
    {
        return Err(Error::system("sethostname"));
    }
    Ok(())
}

fn exec(config: &JailConfig) -> Result<Never> {
    if config.args.is_empty() {
        return Err(Error::InvalidState("empty sandbox command"));
    }
    let args: Vec<CString> = config
        .args
        .iter()
        .map(|arg| CString::new(arg.as_str()))
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| Error::InvalidState("argument contains a nul byte"))?;
    let environ: Vec<CString> = config
        .environ
        .iter()
        .map(|var| CString::new(var.as_str()))
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| Error::InvalidState("environment contains a nul byte"))?;
    let mut argv: Vec<*const libc::c_char> = args.iter().map(|a| a.as_ptr()).collect();
    argv.push(std::ptr::null());
    let mut envp: Vec<*const libc::c_char> =
        environ.iter().map(|e| e.as_ptr()).collect();
    envp.push(std::ptr::null());
    unsafe { libc::execvpe(args[0].as_ptr(), argv.as_ptr(), envp.as_ptr()) };
    Err(Error::system("execve"))
}
