use db::{unix_time, Error, Isolation, Object, Result, Row, Value};
use serde::{Deserialize, Serialize};

use crate::base::{BaseStore, Index, Json, StoreIndexes};

/// Seconds a popped task stays leased before another worker may take
/// it over; renewed by heartbeats.
pub const TASK_LEASE_SECONDS: i64 = 5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[default]
    Queued = 0,
    Running = 1,
    Succeeded = 2,
    Failed = 3,
}

impl TaskStatus {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for TaskStatus {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(TaskStatus::Queued),
            1 => Ok(TaskStatus::Running),
            2 => Ok(TaskStatus::Succeeded),
            3 => Ok(TaskStatus::Failed),
            value => Err(Error::Corrupted(format!("unknown task status: {}", value))),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TaskKind {
    #[default]
    JudgeSolution = 1,
}

impl TaskKind {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for TaskKind {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            1 => Ok(TaskKind::JudgeSolution),
            value => Err(Error::Corrupted(format!("unknown task kind: {}", value))),
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::JudgeSolution => write!(f, "judge_solution"),
        }
    }
}

/// Config of a `judge_solution` task.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JudgeSolutionTaskConfig {
    pub solution_id: i64,
    #[serde(default)]
    pub enable_points: bool,
}

/// Mutable state a `judge_solution` task persists between lease
/// renewals.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JudgeSolutionTaskState {
    #[serde(default)]
    pub test: i64,
}

/// An asynchronous work item processed by the invoker.
#[derive(Clone, Debug, Default)]
pub struct Task {
    pub id: i64,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub config: Json,
    pub state: Json,
    pub expire_time: i64,
    pub create_time: i64,
}

impl Task {
    pub fn scan_config<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        self.config.parse()
    }

    pub fn set_config<T: Serialize>(&mut self, config: &T) -> Result<()> {
        self.config = Json::from_value(config)?;
        Ok(())
    }

    pub fn scan_state<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        self.state.parse()
    }

    pub fn set_state<T: Serialize>(&mut self, state: &T) -> Result<()> {
        self.state = Json::from_value(state)?;
        Ok(())
    }
}

impl Object for Task {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_i64("id")?,
            kind: TaskKind::try_from(row.get_i64("kind")?)?,
            status: TaskStatus::try_from(row.get_i64("status")?)?,
            config: Json::from_column(row, "config")?,
            state: Json::from_column(row, "state")?,
            expire_time: row.get_opt_i64("expire_time")?.unwrap_or_default(),
            create_time: row.get_opt_i64("create_time")?.unwrap_or_default(),
        })
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::Int64(self.id)),
            ("kind", Value::Int64(self.kind.as_i64())),
            ("status", Value::Int64(self.status.as_i64())),
            ("config", self.config.to_value()),
            ("state", self.state.to_value()),
            ("expire_time", Value::Int64(self.expire_time)),
            ("create_time", Value::Int64(self.create_time)),
        ]
    }
}

#[derive(Default)]
pub struct TaskIndexes {
    pub(crate) by_status: Index<TaskStatus>,
}

impl StoreIndexes<Task> for TaskIndexes {
    fn clear(&mut self) {
        self.by_status.clear();
    }

    fn insert(&mut self, object: &Task) {
        self.by_status.insert(object.status, object.id);
    }

    fn remove(&mut self, object: &Task) {
        self.by_status.remove(&object.status, object.id);
    }
}

pub type TaskStore = BaseStore<Task, TaskIndexes>;

impl TaskStore {
    pub fn find_by_status(&self, status: TaskStatus) -> Vec<Task> {
        let state = self.read();
        state
            .indexes
            .by_status
            .ids(&status)
            .filter_map(|id| state.objects.get(&id).cloned())
            .collect()
    }

    /// Atomically leases the oldest eligible task.
    ///
    /// Eligible are `queued` tasks and `running` tasks whose lease has
    /// expired. Mutual exclusion between workers comes from the table
    /// lock plus repeatable-read isolation; the mirror is synced under
    /// that lock so every worker picks from the same queue state.
    pub fn pop_queued(&self, filter: impl Fn(TaskKind) -> bool) -> Result<Task> {
        self.db().with_tx(Isolation::RepeatableRead, |tx| {
            self.lock_store(tx)?;
            self.sync_tx(tx)?;
            let now = unix_time();
            let candidate = {
                let state = self.read();
                let queued = state
                    .indexes
                    .by_status
                    .ids(&TaskStatus::Queued)
                    .filter_map(|id| state.objects.get(&id))
                    .find(|task| filter(task.kind));
                let expired = state
                    .indexes
                    .by_status
                    .ids(&TaskStatus::Running)
                    .filter_map(|id| state.objects.get(&id))
                    .find(|task| task.expire_time < now && filter(task.kind));
                // FIFO across both sets: smallest id wins.
                match (queued, expired) {
                    (Some(a), Some(b)) => {
                        Some(if a.id <= b.id { a.clone() } else { b.clone() })
                    }
                    (Some(a), None) => Some(a.clone()),
                    (None, Some(b)) => Some(b.clone()),
                    (None, None) => None,
                }
            };
            let mut task = candidate.ok_or(Error::NoRows)?;
            task.status = TaskStatus::Running;
            task.expire_time = now + TASK_LEASE_SECONDS;
            self.update_tx(tx, &task, None)?;
            Ok(task)
        })
    }

    /// Extends the lease of a running task. Fails with `NoRows` when
    /// the lease was lost; the caller must cancel its work.
    pub fn heartbeat(&self, task: &mut Task) -> Result<()> {
        let id = task.id;
        let expire_time = unix_time() + TASK_LEASE_SECONDS;
        self.db().with_tx(Isolation::RepeatableRead, |tx| {
            let current = self.find_tx(tx, "\"id\" = $1", &[Value::Int64(id)])?;
            if current.status != TaskStatus::Running {
                return Err(Error::NoRows);
            }
            let mut renewed = current.clone();
            renewed.expire_time = expire_time;
            self.update_tx(tx, &renewed, None)?;
            Ok(())
        })?;
        task.expire_time = expire_time;
        Ok(())
    }
}

pub fn new_task_store(db: db::Database) -> TaskStore {
    TaskStore::new(db, "solve_task", "solve_task_event")
}

#[cfg(test)]
mod tests {
    use super::*;

    // `set_state` historically wrote into the config column; both
    // accessors are pinned to their own columns here.
    #[test]
    fn test_state_and_config_are_separate() {
        let mut task = Task::default();
        task.set_config(&JudgeSolutionTaskConfig {
            solution_id: 12,
            enable_points: true,
        })
        .unwrap();
        task.set_state(&JudgeSolutionTaskState { test: 3 }).unwrap();

        let config: JudgeSolutionTaskConfig = task.scan_config().unwrap();
        assert_eq!(config.solution_id, 12);
        assert!(config.enable_points);
        let state: JudgeSolutionTaskState = task.scan_state().unwrap();
        assert_eq!(state.test, 3);

        task.set_state(&JudgeSolutionTaskState { test: 4 }).unwrap();
        let config: JudgeSolutionTaskConfig = task.scan_config().unwrap();
        assert_eq!(config.solution_id, 12);
    }

    #[test]
    fn test_status_names() {
        assert_eq!(TaskStatus::Queued.to_string(), "queued");
        assert_eq!(TaskStatus::Running.to_string(), "running");
        assert_eq!(TaskStatus::Succeeded.to_string(), "succeeded");
        assert_eq!(TaskStatus::Failed.to_string(), "failed");
        assert_eq!(TaskKind::JudgeSolution.to_string(), "judge_solution");
    }
}
