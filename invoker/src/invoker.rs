//! The invoker daemon: worker loops that lease queued tasks, keep the
//! lease alive with heartbeats and dispatch to the task handlers.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::TryRecvError;
use db::unix_time;
use models::{Task, TaskKind, TaskStatus};
use solve_core::{Core, Shutdown};

use crate::compiler::CompilerManager;
use crate::files::FileManager;
use crate::judge::JudgeSolutionTask;

/// Pause between polls when the queue is empty.
const POLL_PERIOD: Duration = Duration::from_secs(1);

/// Period between lease renewals.
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);

/// Handler of one task kind. Registering a new kind means adding a
/// `(kind, handler)` pair to the registry, nothing more.
pub trait TaskImpl: Send + Sync {
    fn execute(&self, invoker: &Invoker, ctx: &TaskContext) -> anyhow::Result<()>;
}

/// Per-task context handed to the handler.
pub struct TaskContext {
    /// Snapshot of the leased task.
    pub task: Task,
    cancel: Arc<AtomicBool>,
    shutdown: Shutdown,
}

impl TaskContext {
    /// True when the lease is lost or the process is shutting down.
    /// Handlers must poll this at every suspension point; the sandbox
    /// monitor kills the child within one tick of it flipping.
    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
            || matches!(self.shutdown.try_recv(), Err(TryRecvError::Disconnected))
    }
}

/// Manager for asynchronous invocations.
pub struct Invoker {
    core: Arc<Core>,
    files: Arc<FileManager>,
    compilers: Arc<CompilerManager>,
    temp_dir: PathBuf,
    threads: usize,
    registry: HashMap<TaskKind, Box<dyn TaskImpl>>,
}

impl Invoker {
    pub fn new(core: Arc<Core>) -> anyhow::Result<Self> {
        let config = core
            .config
            .invoker
            .clone()
            .context("invoker config section is missing")?;
        std::fs::create_dir_all(&config.temp_dir)
            .context("cannot create invoker temp dir")?;
        let safeexec = Arc::new(
            safeexec::Manager::new(&config.safeexec.path, &config.safeexec.cgroup_path)
                .context("cannot create sandbox manager")?,
        );
        let files = Arc::new(FileManager::new(
            core.files.clone(),
            core.config.storage.files_dir.clone(),
        ));
        let compilers = Arc::new(CompilerManager::new(
            core.compilers.clone(),
            files.clone(),
            config.temp_dir.join("images"),
            safeexec,
        )?);
        let mut registry: HashMap<TaskKind, Box<dyn TaskImpl>> = HashMap::new();
        registry.insert(TaskKind::JudgeSolution, Box::new(JudgeSolutionTask));
        Ok(Self {
            core,
            files,
            compilers,
            temp_dir: config.temp_dir,
            threads: config.threads.max(1),
            registry,
        })
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    pub fn files(&self) -> &FileManager {
        &self.files
    }

    pub fn compilers(&self) -> &CompilerManager {
        &self.compilers
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Spawns the worker daemons on the core.
    pub fn start(self: &Arc<Self>) {
        for index in 0..self.threads {
            let invoker = self.clone();
            self.core.start_task(&format!("invoker-{}", index + 1), move |shutdown| {
                invoker.run_daemon(shutdown)
            });
        }
    }

    fn run_daemon(&self, shutdown: Shutdown) {
        let ticker = crossbeam_channel::tick(POLL_PERIOD);
        loop {
            if matches!(shutdown.try_recv(), Err(TryRecvError::Disconnected)) {
                return;
            }
            if !self.run_daemon_tick(&shutdown) {
                crossbeam_channel::select! {
                    recv(shutdown) -> _ => return,
                    recv(ticker) -> _ => {}
                }
            }
        }
    }

    /// Pops and processes one task; false when the queue was empty.
    fn run_daemon_tick(&self, shutdown: &Shutdown) -> bool {
        let supported = |kind: TaskKind| self.registry.contains_key(&kind);
        let mut task = match self.core.tasks.pop_queued(supported) {
            Ok(task) => task,
            Err(models::Error::NoRows) => return false,
            Err(err) => {
                log::error!("cannot pop queued task: {}", err);
                return false;
            }
        };
        log::debug!("received task {}", task.id);

        let cancel = Arc::new(AtomicBool::new(false));
        let expire_time = Arc::new(AtomicI64::new(task.expire_time));
        let (stop_heartbeat, heartbeat_stopped) = crossbeam_channel::bounded::<()>(0);
        let heartbeat = {
            let tasks = self.core.tasks.clone();
            let cancel = cancel.clone();
            let expire_time = expire_time.clone();
            let mut clone = task.clone();
            std::thread::Builder::new()
                .name(format!("heartbeat-{}", task.id))
                .spawn(move || {
                    let ticker = crossbeam_channel::tick(HEARTBEAT_PERIOD);
                    loop {
                        crossbeam_channel::select! {
                            recv(heartbeat_stopped) -> _ => return,
                            recv(ticker) -> _ => {}
                        }
                        if unix_time() > expire_time.load(Ordering::SeqCst) {
                            log::error!("task {} lease expired", clone.id);
                            cancel.store(true, Ordering::SeqCst);
                            return;
                        }
                        match tasks.heartbeat(&mut clone) {
                            Ok(()) => {
                                expire_time.store(clone.expire_time, Ordering::SeqCst)
                            }
                            Err(models::Error::NoRows) => {
                                log::error!("task {} lease was lost", clone.id);
                                cancel.store(true, Ordering::SeqCst);
                                return;
                            }
                            Err(err) => {
                                log::warn!("cannot ping task {}: {}", clone.id, err)
                            }
                        }
                    }
                })
                .expect("cannot spawn heartbeat thread")
        };

        let ctx = TaskContext {
            task: task.clone(),
            cancel: cancel.clone(),
            shutdown: shutdown.clone(),
        };
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| self.on_task(&ctx)));
        drop(stop_heartbeat);
        if let Err(err) = heartbeat.join() {
            log::error!("heartbeat thread panicked: {:?}", err);
        }

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(panic) => {
                // Persist the failure before letting the supervisor
                // see the panic.
                log::error!("task {} panicked", task.id);
                task.status = TaskStatus::Failed;
                task.expire_time = expire_time.load(Ordering::SeqCst);
                if let Err(err) = self.core.tasks.update(&task) {
                    log::error!("cannot update task {}: {}", task.id, err);
                }
                std::panic::resume_unwind(panic);
            }
        };
        if ctx.cancelled() {
            // The lease is gone or the process is shutting down:
            // leave the task for another worker to re-lease.
            log::warn!("task {} was cancelled", task.id);
            return true;
        }
        task.status = match outcome {
            Ok(()) => TaskStatus::Succeeded,
            Err(err) => {
                log::error!("task {} failed: {:#}", task.id, err);
                TaskStatus::Failed
            }
        };
        task.expire_time = expire_time.load(Ordering::SeqCst);
        if let Err(err) = self.core.tasks.update(&task) {
            log::error!("cannot update task {}: {}", task.id, err);
        }
        true
    }

    fn on_task(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        match self.registry.get(&ctx.task.kind) {
            Some(handler) => handler.execute(self, ctx),
            None => anyhow::bail!("unsupported task kind: {}", ctx.task.kind),
        }
    }
}
