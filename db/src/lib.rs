//! Storage layer: SQL dialect abstraction, object stores and the
//! append-only event log with its gap-tolerant consumer.

mod conn;
mod event;
pub mod schema;
mod store;
mod value;

pub use conn::{Connection, Database, Isolation, Transaction};
pub use event::{
    unix_time, EventConsumer, EventKind, EventRange, EventStore, ObjectEvent,
    EVENT_GAP_SKIP_WINDOW,
};
pub use store::{Object, ObjectStore};
pub use value::{Row, Rows, Value};

/// Database engine behind a [`Database`].
///
/// The same store code runs on both engines; the dialect only
/// changes the SQL that gets emitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    SQLite,
    Postgres,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The query matched no rows. Callers rely on this variant staying
    /// distinct so they can sync caches and retry.
    #[error("no rows in result set")]
    NoRows,
    /// Transient failure: the transaction should be retried.
    #[error("database is busy")]
    Busy,
    #[error("no such column: {0}")]
    NoColumn(String),
    #[error("unexpected value in column {0}")]
    TypeMismatch(String),
    #[error("corrupted data: {0}")]
    Corrupted(String),
    #[error(transparent)]
    SQLite(rusqlite::Error),
    #[error(transparent)]
    Postgres(postgres::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => Error::NoRows,
            rusqlite::Error::SqliteFailure(failure, _)
                if matches!(
                    failure.code,
                    rusqlite::ErrorCode::DatabaseBusy
                        | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                Error::Busy
            }
            err => Error::SQLite(err),
        }
    }
}

impl From<postgres::Error> for Error {
    fn from(err: postgres::Error) -> Self {
        use postgres::error::SqlState;
        match err.code() {
            Some(&SqlState::T_R_SERIALIZATION_FAILURE)
            | Some(&SqlState::T_R_DEADLOCK_DETECTED) => Error::Busy,
            _ => Error::Postgres(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
