use db::{Object, Result, Row, Value};
use serde::{Deserialize, Serialize};

use crate::base::{BaseStore, Json, NoIndexes};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ContestConfig {
    #[serde(default)]
    pub begin_time: i64,
    #[serde(default)]
    pub duration: i64,
    /// IOI-style contests sum per-test points into a score.
    #[serde(default)]
    pub enable_points: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Contest {
    pub id: i64,
    pub owner_id: Option<i64>,
    pub config: Json,
    pub title: String,
}

impl Contest {
    pub fn parse_config(&self) -> Result<ContestConfig> {
        if self.config.is_null() {
            return Ok(ContestConfig::default());
        }
        self.config.parse()
    }

    pub fn set_config(&mut self, config: &ContestConfig) -> Result<()> {
        self.config = Json::from_value(config)?;
        Ok(())
    }
}

impl Object for Contest {
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
        })
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::Int64(self.id)),
            ("owner_id", Value::from(self.owner_id)),
            ("config", self.config.to_value()),
            ("title", Value::Text(self.title.clone())),
        ]
    }
}

pub type ContestStore = BaseStore<Contest, NoIndexes>;

pub fn new_contest_store(db: db::Database) -> ContestStore {
    ContestStore::new(db, "solve_contest", "solve_contest_event")
}
