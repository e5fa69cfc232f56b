//! The judging daemon: leases `judge_solution` tasks from the shared
//! queue, runs submissions inside the sandbox and writes verdicts
//! back.

pub mod archive;
pub mod compiler;
pub mod files;
mod invoker;
mod judge;
pub mod polygon;

pub use invoker::{Invoker, TaskContext, TaskImpl};
