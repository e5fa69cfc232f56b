//! Domain entities and their cached stores.
//!
//! Every table is mirrored in memory and kept current by consuming its
//! append-only event log; writers on other machines become visible on
//! the next sync.

mod account;
mod base;
mod compiler;
mod contest;
mod contest_participant;
mod contest_problem;
mod contest_solution;
mod file;
mod permission;
mod problem;
mod role;
pub mod schema;
mod session;
mod setting;
mod solution;
mod task;

pub use account::{new_account_store, Account, AccountKind, AccountStore};
pub use base::{BaseStore, Json, NoIndexes, StoreIndexes};
pub use compiler::{
    new_compiler_store, Compiler, CompilerCommandConfig, CompilerConfig, CompilerStore,
};
pub use contest::{new_contest_store, Contest, ContestConfig, ContestStore};
pub use contest_participant::{
    new_contest_participant_store, ContestParticipant, ContestParticipantStore,
    ParticipantKind,
};
pub use contest_problem::{new_contest_problem_store, ContestProblem, ContestProblemStore};
pub use contest_solution::{
    new_contest_solution_store, ContestSolution, ContestSolutionStore,
};
pub use file::{new_file_store, File, FileStatus, FileStore};
pub use permission::{new_permission_store, Permission, PermissionStore};
pub use problem::{new_problem_store, Problem, ProblemStore};
pub use role::{
    new_account_role_store, new_role_edge_store, new_role_store, AccountRole,
    AccountRoleStore, Role, RoleEdge, RoleEdgeStore, RoleStore,
};
pub use session::{new_session_store, Session, SessionStore};
pub use setting::{new_setting_store, Setting, SettingStore};
pub use solution::{
    aggregate_verdict, new_solution_store, Solution, SolutionReport, SolutionStore,
    TestReport, Verdict,
};
pub use task::{
    new_task_store, JudgeSolutionTaskConfig, JudgeSolutionTaskState, Task, TaskKind,
    TaskStatus, TaskStore, TASK_LEASE_SECONDS,
};

pub use db::Error;
