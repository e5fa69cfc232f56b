use std::ffi::CString;
use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::cgroup::Cgroup;
use crate::init::{JailConfig, FINALIZE_PIPE_ENV, INIT_PIPE_ENV};
use crate::manager::ProcessConfig;
use crate::report::Report;
use crate::{Error, Result};

/// Monitor sampling period.
const TICK: Duration = Duration::from_millis(5);

const STACK_SIZE: usize = 256 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Prepared,
    Running,
    Terminated,
}

/// One sandboxed process and the disposable environment around it.
///
/// Lifecycle: `building -> prepared -> running -> terminated`; the
/// teardown in [`Process::release`] (or drop) always removes the
/// cgroup and the overlay dirs, whatever state the sandbox died in.
pub struct Process {
    id: String,
    path: PathBuf,
    rootfs: PathBuf,
    upper_dir: PathBuf,
    work_dir: PathBuf,
    report_path: PathBuf,
    config: ProcessConfig,
    cgroup: Option<Cgroup>,
    cgroup_path: PathBuf,
    state: State,
    pid: i32,
    finalize_pipe: Option<File>,
    report: Option<Report>,
}

struct ChildArg {
    exe: CString,
    argv: Vec<*const libc::c_char>,
    envp: Vec<*const libc::c_char>,
    stdin_fd: i32,
    stdout_fd: i32,
    stderr_fd: i32,
}

// Runs on the freshly cloned child inside the new namespaces. Only
// async-signal-safe calls are allowed here; everything else waits for
// the re-exec'ed init process.
extern "C" fn child_entry(arg: *mut libc::c_void) -> libc::c_int {
    unsafe {
        let arg = &*(arg as *const ChildArg);
        if libc::dup2(arg.stdin_fd, libc::STDIN_FILENO) == -1 {
            return 107;
        }
        if libc::dup2(arg.stdout_fd, libc::STDOUT_FILENO) == -1 {
            return 107;
        }
        if libc::dup2(arg.stderr_fd, libc::STDERR_FILENO) == -1 {
            return 107;
        }
        libc::execve(arg.exe.as_ptr(), arg.argv.as_ptr(), arg.envp.as_ptr());
        108
    }
}

fn open_stdio(path: Option<&Path>, write: bool) -> Result<File> {
    let path = path.unwrap_or_else(|| Path::new("/dev/null"));
    let file = if write {
        File::create(path)?
    } else {
        File::open(path)?
    };
    Ok(file)
}

fn pipe() -> Result<(File, File)> {
    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(Error::system("pipe"));
    }
    let read = unsafe { File::from_raw_fd(fds[0]) };
    let write = unsafe { File::from_raw_fd(fds[1]) };
    Ok((read, write))
}

impl Process {
    pub(crate) fn create(
        path: PathBuf,
        cgroup_path: PathBuf,
        id: String,
        config: ProcessConfig,
    ) -> Result<Self> {
        let rootfs = path.join("rootfs");
        let upper_dir = path.join("upper");
        let work_dir = path.join("work");
        let build = || -> Result<()> {
            std::fs::create_dir_all(&rootfs)?;
            std::fs::create_dir_all(&upper_dir)?;
            std::fs::create_dir_all(&work_dir)?;
            Ok(())
        };
        if let Err(err) = build() {
            // Failed while building: destroy partial resources.
            let _ = std::fs::remove_dir_all(&path);
            return Err(err);
        }
        Ok(Self {
            id,
            report_path: path.join("report.txt"),
            rootfs,
            upper_dir,
            work_dir,
            path,
            config,
            cgroup: None,
            cgroup_path,
            state: State::Prepared,
            pid: 0,
            finalize_pipe: None,
            report: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Writable overlay layer; files placed here appear inside the
    /// container, files the container wrote are read back from here.
    pub fn upper_dir(&self) -> &Path {
        &self.upper_dir
    }

    /// Clones the child with fresh namespaces, sets up the uid map and
    /// the cgroup, then hands the jail config to the init process.
    pub fn start(&mut self) -> Result<()> {
        if self.state != State::Prepared {
            return Err(Error::InvalidState("process already started"));
        }
        let stdin = open_stdio(self.config.stdin.as_deref(), false)?;
        let stdout = open_stdio(self.config.stdout.as_deref(), true)?;
        let stderr = open_stdio(self.config.stderr.as_deref(), true)?;
        let (init_read, init_write) = pipe()?;
        let (finalize_read, finalize_write) = pipe()?;

        let exe = CString::new("/proc/self/exe").expect("static path");
        let argv0 = CString::new("solve-invoker").expect("static name");
        let argv1 = CString::new("init").expect("static name");
        let env_init = CString::new(format!("{}={}", INIT_PIPE_ENV, init_read.as_raw_fd()))
            .expect("env var");
        let env_finalize = CString::new(format!(
            "{}={}",
            FINALIZE_PIPE_ENV,
            finalize_write.as_raw_fd()
        ))
        .expect("env var");
        let arg = ChildArg {
            argv: vec![argv0.as_ptr(), argv1.as_ptr(), std::ptr::null()],
            envp: vec![env_init.as_ptr(), env_finalize.as_ptr(), std::ptr::null()],
            exe,
            stdin_fd: stdin.as_raw_fd(),
            stdout_fd: stdout.as_raw_fd(),
            stderr_fd: stderr.as_raw_fd(),
        };
        let _keep_alive = (&argv0, &argv1, &env_init, &env_finalize);

        let mut stack = vec![0u8; STACK_SIZE];
        let flags = libc::CLONE_NEWUSER
            | libc::CLONE_NEWPID
            | libc::CLONE_NEWNS
            | libc::CLONE_NEWNET
            | libc::CLONE_NEWIPC
            | libc::CLONE_NEWUTS
            | libc::SIGCHLD;
        let pid = unsafe {
            libc::clone(
                child_entry,
                stack.as_mut_ptr().add(STACK_SIZE) as *mut libc::c_void,
                flags,
                &arg as *const ChildArg as *mut libc::c_void,
            )
        };
        if pid == -1 {
            return Err(Error::system("clone"));
        }
        self.pid = pid;
        // Child ends are duplicated into the child by clone; release
        // the parent copies it does not need.
        drop(init_read);
        drop(finalize_write);
        drop((stdin, stdout, stderr));

        let start = || -> Result<()> {
            self.prepare_user_namespace(pid)?;
            let cgroup = Cgroup::create(&self.cgroup_path)?;
            cgroup.set_memory_limit(self.config.memory_limit)?;
            cgroup.add_process(pid)?;
            self.cgroup = Some(cgroup);

            let jail = JailConfig {
                rootfs: self.rootfs.clone(),
                layers: self.config.layers.clone(),
                upper_dir: self.upper_dir.clone(),
                work_dir: self.work_dir.clone(),
                workdir: self.config.workdir.clone(),
                args: self.config.args.clone(),
                environ: self.config.environ.clone(),
            };
            let mut init_write = init_write;
            init_write.write_all(&serde_json::to_vec(&jail)?)?;
            // Closing the pipe unblocks the init process.
            drop(init_write);
            Ok(())
        };
        match start() {
            Ok(()) => {
                self.finalize_pipe = Some(finalize_read);
                self.state = State::Running;
                Ok(())
            }
            Err(err) => {
                unsafe { libc::kill(pid, libc::SIGKILL) };
                let mut status = 0;
                unsafe { libc::waitpid(pid, &mut status, libc::__WALL) };
                self.state = State::Terminated;
                Err(err)
            }
        }
    }

    /// Maps uid/gid 0 of the new user namespace to the real uid/gid,
    /// making the sandbox rootless.
    fn prepare_user_namespace(&self, pid: i32) -> Result<()> {
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };
        std::fs::write(
            format!("/proc/{}/uid_map", pid),
            format!("0 {} 1\n", uid),
        )?;
        // setgroups must be denied before an unprivileged gid map is
        // allowed.
        std::fs::write(format!("/proc/{}/setgroups", pid), "deny\n")?;
        std::fs::write(
            format!("/proc/{}/gid_map", pid),
            format!("0 {} 1\n", gid),
        )?;
        Ok(())
    }

    /// Blocks until the child exits or is killed, enforcing the time
    /// and memory limits, then writes and returns the report.
    ///
    /// `cancelled` is polled every tick; cancellation uses the same
    /// kill path as the limits but surfaces as [`Error::Cancelled`].
    pub fn wait(&mut self, cancelled: &dyn Fn() -> bool) -> Result<Report> {
        if self.state != State::Running {
            return Err(Error::InvalidState("process is not running"));
        }
        // The child closes the finalize pipe right before execve.
        if let Some(mut pipe) = self.finalize_pipe.take() {
            let mut buf = [0u8; 16];
            loop {
                match pipe.read(&mut buf) {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(err) => return Err(err.into()),
                }
            }
        }
        let cgroup = self
            .cgroup
            .as_ref()
            .ok_or(Error::InvalidState("missing cgroup"))?;
        let start = Instant::now();
        let mut memory: i64 = 0;
        let mut was_cancelled = false;
        let status = loop {
            let mut status: libc::c_int = 0;
            let ret = unsafe {
                libc::waitpid(self.pid, &mut status, libc::WNOHANG | libc::__WALL)
            };
            if ret < 0 {
                let errno = std::io::Error::last_os_error()
                    .raw_os_error()
                    .unwrap_or(0);
                if errno == libc::EINTR {
                    continue;
                }
                return Err(Error::system("waitpid"));
            }
            if ret != 0 {
                break status;
            }
            if let Ok(current) = cgroup.memory_current() {
                memory = std::cmp::max(memory, current);
            }
            if cancelled() && !was_cancelled {
                was_cancelled = true;
                self.kill()?;
            }
            if start.elapsed() > self.config.time_limit {
                self.kill()?;
            }
            if memory > self.config.memory_limit {
                self.kill()?;
            }
            std::thread::sleep(TICK);
        };
        if let Ok(current) = cgroup.memory_current() {
            memory = std::cmp::max(memory, current);
        }
        self.state = State::Terminated;
        let exit_code = if libc::WIFEXITED(status) {
            libc::WEXITSTATUS(status)
        } else {
            -1
        };
        let report = Report {
            time: start.elapsed().as_millis() as i64,
            memory,
            exit_code,
        };
        report.write(&self.report_path)?;
        let report = Report::read(&self.report_path)?;
        self.report = Some(report);
        if was_cancelled {
            return Err(Error::Cancelled);
        }
        Ok(report)
    }

    /// Report of the finished process, if it ran to completion.
    pub fn report(&self) -> Option<Report> {
        self.report
    }

    fn kill(&self) -> Result<()> {
        if unsafe { libc::kill(self.pid, libc::SIGKILL) } != 0 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            // Already exited.
            if errno != libc::ESRCH {
                return Err(Error::system("kill"));
            }
        }
        Ok(())
    }

    fn cleanup(&mut self) {
        if self.state == State::Running {
            let _ = self.kill();
            let mut status = 0;
            unsafe { libc::waitpid(self.pid, &mut status, libc::__WALL) };
            self.state = State::Terminated;
        }
        if let Some(cgroup) = self.cgroup.take() {
            if let Err(err) = cgroup.remove() {
                log::warn!(
                    "cannot remove cgroup {}: {}",
                    cgroup.path().display(),
                    err
                );
            }
        }
        if let Err(err) = std::fs::remove_dir_all(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                log::warn!("cannot remove sandbox {}: {}", self.path.display(), err);
            }
        }
    }

    /// Destroys the sandbox: kills the child if it still runs, removes
    /// the cgroup and every scratch dir.
    pub fn release(mut self) {
        self.cleanup();
        self.state = State::Terminated;
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        self.cleanup();
    }
}
