//! Process-wide state: one cached store per table plus the background
//! daemons that keep the mirrors in sync.

mod roles;

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::{Receiver, Sender};

/// Period between background mirror syncs.
const SYNC_PERIOD: Duration = Duration::from_secs(1);

/// Receiver side of the shutdown broadcast. The channel never carries
/// messages; it is closed when the core stops, which wakes every
/// daemon blocked on it.
pub type Shutdown = Receiver<()>;

struct CoreState {
    closer: Option<Sender<()>>,
    shutdown: Shutdown,
    threads: Vec<JoinHandle<()>>,
}

/// Owns the database handle and every cached store. Built once at
/// startup; no daemon outlives it.
pub struct Core {
    pub db: db::Database,
    pub config: config::Config,
    pub accounts: Arc<models::AccountStore>,
    pub sessions: Arc<models::SessionStore>,
    pub roles: Arc<models::RoleStore>,
    pub role_edges: Arc<models::RoleEdgeStore>,
    pub account_roles: Arc<models::AccountRoleStore>,
    pub permissions: Arc<models::PermissionStore>,
    pub settings: Arc<models::SettingStore>,
    pub files: Arc<models::FileStore>,
    pub problems: Arc<models::ProblemStore>,
    pub solutions: Arc<models::SolutionStore>,
    pub contests: Arc<models::ContestStore>,
    pub contest_problems: Arc<models::ContestProblemStore>,
    pub contest_participants: Arc<models::ContestParticipantStore>,
    pub contest_solutions: Arc<models::ContestSolutionStore>,
    pub compilers: Arc<models::CompilerStore>,
    pub tasks: Arc<models::TaskStore>,
    state: Mutex<CoreState>,
}

pub fn make_database(config: &config::DatabaseConfig) -> anyhow::Result<db::Database> {
    match config {
        config::DatabaseConfig::SQLite { path } => Ok(db::Database::new_sqlite(path)),
        config::DatabaseConfig::Postgres {
            hosts,
            user,
            password,
            name,
        } => {
            let password = password.resolve().context("cannot resolve db password")?;
            let host = hosts.first().context("no postgres hosts configured")?;
            let url = format!(
                "host={} user={} password={} dbname={}",
                host, user, password, name
            );
            Ok(db::Database::new_postgres(url))
        }
    }
}

impl Core {
    pub fn new(config: config::Config) -> anyhow::Result<Self> {
        let db = make_database(&config.db)?;
        let (closer, shutdown) = crossbeam_channel::bounded(0);
        Ok(Self {
            accounts: Arc::new(models::new_account_store(db.clone())),
            sessions: Arc::new(models::new_session_store(db.clone())),
            roles: Arc::new(models::new_role_store(db.clone())),
            role_edges: Arc::new(models::new_role_edge_store(db.clone())),
            account_roles: Arc::new(models::new_account_role_store(db.clone())),
            permissions: Arc::new(models::new_permission_store(db.clone())),
            settings: Arc::new(models::new_setting_store(db.clone())),
            files: Arc::new(models::new_file_store(db.clone())),
            problems: Arc::new(models::new_problem_store(db.clone())),
            solutions: Arc::new(models::new_solution_store(db.clone())),
            contests: Arc::new(models::new_contest_store(db.clone())),
            contest_problems: Arc::new(models::new_contest_problem_store(db.clone())),
            contest_participants: Arc::new(models::new_contest_participant_store(
                db.clone(),
            )),
            contest_solutions: Arc::new(models::new_contest_solution_store(db.clone())),
            compilers: Arc::new(models::new_compiler_store(db.clone())),
            tasks: Arc::new(models::new_task_store(db.clone())),
            db,
            config,
            state: Mutex::new(CoreState {
                closer: Some(closer),
                shutdown,
                threads: Vec::new(),
            }),
        })
    }

    /// Loads every mirror from the database.
    pub fn init(&self) -> anyhow::Result<()> {
        self.accounts.init().context("cannot init accounts")?;
        self.sessions.init().context("cannot init sessions")?;
        self.roles.init().context("cannot init roles")?;
        self.role_edges.init().context("cannot init role edges")?;
        self.account_roles
            .init()
            .context("cannot init account roles")?;
        self.permissions.init().context("cannot init permissions")?;
        self.settings.init().context("cannot init settings")?;
        self.files.init().context("cannot init files")?;
        self.problems.init().context("cannot init problems")?;
        self.solutions.init().context("cannot init solutions")?;
        self.contests.init().context("cannot init contests")?;
        self.contest_problems
            .init()
            .context("cannot init contest problems")?;
        self.contest_participants
            .init()
            .context("cannot init contest participants")?;
        self.contest_solutions
            .init()
            .context("cannot init contest solutions")?;
        self.compilers.init().context("cannot init compilers")?;
        self.tasks.init().context("cannot init tasks")?;
        Ok(())
    }

    /// Starts the background sync daemon of every store.
    pub fn start(&self) {
        self.start_sync_daemon("accounts", self.accounts.clone());
        self.start_sync_daemon("sessions", self.sessions.clone());
        self.start_sync_daemon("roles", self.roles.clone());
        self.start_sync_daemon("role-edges", self.role_edges.clone());
        self.start_sync_daemon("account-roles", self.account_roles.clone());
        self.start_sync_daemon("permissions", self.permissions.clone());
        self.start_sync_daemon("settings", self.settings.clone());
        self.start_sync_daemon("files", self.files.clone());
        self.start_sync_daemon("problems", self.problems.clone());
        self.start_sync_daemon("solutions", self.solutions.clone());
        self.start_sync_daemon("contests", self.contests.clone());
        self.start_sync_daemon("contest-problems", self.contest_problems.clone());
        self.start_sync_daemon(
            "contest-participants",
            self.contest_participants.clone(),
        );
        self.start_sync_daemon("contest-solutions", self.contest_solutions.clone());
        self.start_sync_daemon("compilers", self.compilers.clone());
        self.start_sync_daemon("tasks", self.tasks.clone());
    }

    /// Closes the shutdown channel and joins every daemon.
    pub fn stop(&self) {
        let (closer, threads) = {
            let mut state = self.state.lock().expect("core state poisoned");
            (state.closer.take(), std::mem::take(&mut state.threads))
        };
        drop(closer);
        for thread in threads {
            if let Err(err) = thread.join() {
                log::error!("daemon panicked: {:?}", err);
            }
        }
    }

    /// Spawns a named daemon thread observing the shutdown channel.
    pub fn start_task(
        &self,
        name: &str,
        task: impl FnOnce(Shutdown) + Send + 'static,
    ) {
        let mut state = self.state.lock().expect("core state poisoned");
        let shutdown = state.shutdown.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || task(shutdown))
            .expect("cannot spawn daemon thread");
        state.threads.push(handle);
    }

    fn start_sync_daemon<O, X>(&self, name: &str, store: Arc<models::BaseStore<O, X>>)
    where
        O: db::Object + Default,
        X: models::StoreIndexes<O>,
    {
        let name = format!("sync-{}", name);
        self.start_task(&name.clone(), move |shutdown| {
            let ticker = crossbeam_channel::tick(SYNC_PERIOD);
            loop {
                crossbeam_channel::select! {
                    recv(shutdown) -> _ => return,
                    recv(ticker) -> _ => {
                        if let Err(err) = store.sync() {
                            log::error!("{}: cannot sync store: {}", name, err);
                        }
                    }
                }
            }
        });
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        self.stop();
    }
}

pub use roles::account_role_ids;

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> config::Config {
        config::Config {
            db: config::DatabaseConfig::SQLite {
                path: dir.join("db.sqlite"),
            },
            invoker: None,
            storage: config::StorageConfig {
                files_dir: dir.join("files"),
            },
        }
    }

    #[test]
    fn test_core_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let core = Core::new(test_config(dir.path())).unwrap();
        models::schema::create_tables(&core.db).unwrap();
        core.init().unwrap();
        core.start();

        let mut task = models::Task {
            kind: models::TaskKind::JudgeSolution,
            status: models::TaskStatus::Queued,
            ..Default::default()
        };
        core.tasks.create(&mut task).unwrap();
        // The sync daemon picks the task up within a few periods.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            if core.tasks.get(task.id).is_ok() {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "mirror did not sync");
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        core.stop();
    }
}
