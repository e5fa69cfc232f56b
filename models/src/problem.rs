use db::{Object, Result, Row, Value};

use crate::base::{BaseStore, Json, NoIndexes};

/// A problem; its package (tests, checker sources, statements) lives in
/// blob storage under `package_id`.
#[derive(Clone, Debug, Default)]
pub struct Problem {
    pub id: i64,
    pub owner_id: Option<i64>,
    pub config: Json,
    pub title: String,
    pub package_id: Option<i64>,
    pub create_time: i64,
}

impl Object for Problem {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_i64("id")?,
            owner_id: row.get_opt_i64("owner_id")?,
            config: Json::from_column(row, "config")?,
            title: row.get_str("title")?,
            package_id: row.get_opt_i64("package_id")?,
            create_time: row.get_opt_i64("create_time")?.unwrap_or_default(),
        })
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::Int64(self.id)),
            ("owner_id", Value::from(self.owner_id)),
            ("config", self.config.to_value()),
            ("title", Value::Text(self.title.clone())),
            ("package_id", Value::from(self.package_id)),
            ("create_time", Value::Int64(self.create_time)),
        ]
    }
}

pub type ProblemStore = BaseStore<Problem, NoIndexes>;

pub fn new_problem_store(db: db::Database) -> ProblemStore {
    ProblemStore::new(db, "solve_problem", "solve_problem_event")
}
