//! Table definitions for every domain entity and its event log.
//!
//! Full schema migrations live outside the judging core; these
//! definitions exist so tests and first-run deployments can create the
//! tables through the DDL builder.

use db::schema::{Column, CreateIndex, CreateTable, Type};
use db::{Database, Isolation, Result};

fn object_table(name: &str, mut columns: Vec<Column>) -> CreateTable {
    columns.insert(0, Column::auto_increment("id"));
    CreateTable {
        name: name.into(),
        columns,
        foreign_keys: vec![],
        strict: false,
    }
}

/// The event table repeats every object column (with `id` demoted to a
/// plain bigint) behind the event header columns.
fn event_table(name: &str, object_columns: Vec<Column>) -> CreateTable {
    let mut columns = vec![
        Column::auto_increment("event_id"),
        Column::new("event_kind", Type::Int64),
        Column::new("event_time", Type::Int64),
        Column::nullable("event_account_id", Type::Int64),
        Column::new("id", Type::Int64),
    ];
    columns.extend(object_columns);
    CreateTable {
        name: format!("{}_event", name),
        columns,
        foreign_keys: vec![],
        strict: false,
    }
}

fn table_pairs() -> Vec<(&'static str, Vec<Column>)> {
    vec![
        (
            "solve_account",
            vec![Column::new("kind", Type::Int64)],
        ),
        (
            "solve_session",
            vec![
                Column::new("account_id", Type::Int64),
                Column::new("secret", Type::String),
                Column::new("create_time", Type::Int64),
                Column::new("expire_time", Type::Int64),
            ],
        ),
        (
            "solve_role",
            vec![Column::new("code", Type::String)],
        ),
        (
            "solve_role_edge",
            vec![
                Column::new("role_id", Type::Int64),
                Column::new("child_id", Type::Int64),
            ],
        ),
        (
            "solve_account_role",
            vec![
                Column::new("account_id", Type::Int64),
                Column::new("role_id", Type::Int64),
            ],
        ),
        (
            "solve_permission",
            vec![Column::new("name", Type::String)],
        ),
        (
            "solve_setting",
            vec![
                Column::new("key", Type::String),
                Column::new("value", Type::String),
            ],
        ),
        (
            "solve_file",
            vec![
                Column::new("status", Type::Int64),
                Column::nullable("expire_time", Type::Int64),
                Column::new("path", Type::String),
                Column::nullable("meta", Type::Json),
            ],
        ),
        (
            "solve_problem",
            vec![
                Column::nullable("owner_id", Type::Int64),
                Column::nullable("config", Type::Json),
                Column::new("title", Type::String),
                Column::nullable("package_id", Type::Int64),
                Column::new("create_time", Type::Int64),
            ],
        ),
        (
            "solve_solution",
            vec![
                Column::new("problem_id", Type::Int64),
                Column::new("compiler_id", Type::Int64),
                Column::new("author_id", Type::Int64),
                Column::nullable("content", Type::String),
                Column::nullable("content_id", Type::Int64),
                Column::nullable("report", Type::Json),
                Column::new("create_time", Type::Int64),
            ],
        ),
        (
            "solve_contest",
            vec![
                Column::nullable("owner_id", Type::Int64),
                Column::nullable("config", Type::Json),
                Column::new("title", Type::String),
            ],
        ),
        (
            "solve_contest_problem",
            vec![
                Column::new("contest_id", Type::Int64),
                Column::new("problem_id", Type::Int64),
                Column::new("code", Type::String),
            ],
        ),
        (
            "solve_contest_participant",
            vec![
                Column::new("contest_id", Type::Int64),
                Column::new("account_id", Type::Int64),
                Column::new("kind", Type::Int64),
                Column::nullable("config", Type::Json),
            ],
        ),
        (
            "solve_contest_solution",
            vec![
                Column::new("contest_id", Type::Int64),
                Column::new("solution_id", Type::Int64),
                Column::new("participant_id", Type::Int64),
                Column::new("problem_id", Type::Int64),
            ],
        ),
        (
            "solve_compiler",
            vec![
                Column::nullable("owner_id", Type::Int64),
                Column::new("name", Type::String),
                Column::nullable("config", Type::Json),
                Column::new("image_id", Type::Int64),
            ],
        ),
        (
            "solve_task",
            vec![
                Column::new("kind", Type::Int64),
                Column::new("status", Type::Int64),
                Column::nullable("config", Type::Json),
                Column::nullable("state", Type::Json),
                Column::new("expire_time", Type::Int64),
                Column::new("create_time", Type::Int64),
            ],
        ),
    ]
}

fn indexes() -> Vec<CreateIndex> {
    vec![
        CreateIndex {
            table: "solve_task".into(),
            columns: vec!["status"],
            unique: false,
            strict: false,
        },
        CreateIndex {
            table: "solve_session".into(),
            columns: vec!["account_id"],
            unique: false,
            strict: false,
        },
        CreateIndex {
            table: "solve_solution".into(),
            columns: vec!["problem_id"],
            unique: false,
            strict: false,
        },
        CreateIndex {
            table: "solve_setting".into(),
            columns: vec!["key"],
            unique: true,
            strict: false,
        },
    ]
}

/// Creates every object and event table that does not exist yet.
pub fn create_tables(db: &Database) -> Result<()> {
    db.with_tx(Isolation::ReadCommitted, |tx| {
        for (name, columns) in table_pairs() {
            let sql = object_table(name, columns.clone()).build_apply(tx.dialect())?;
            tx.execute(&sql, &[])?;
            let sql = event_table(name, columns).build_apply(tx.dialect())?;
            tx.execute(&sql, &[])?;
        }
        for index in indexes() {
            let sql = index.build_apply(tx.dialect())?;
            tx.execute(&sql, &[])?;
        }
        Ok(())
    })
}

/// Drops every table; used by tests.
pub fn drop_tables(db: &Database) -> Result<()> {
    db.with_tx(Isolation::ReadCommitted, |tx| {
        for (name, columns) in table_pairs().into_iter().rev() {
            let sql = event_table(name, columns.clone()).build_unapply(tx.dialect())?;
            tx.execute(&sql, &[])?;
            let sql = object_table(name, columns).build_unapply(tx.dialect())?;
            tx.execute(&sql, &[])?;
        }
        Ok(())
    })
}
