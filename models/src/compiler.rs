use db::{Object, Result, Row, Value};
use serde::{Deserialize, Serialize};

use crate::base::{BaseStore, Index, Json, StoreIndexes};

/// One stage of a compiler recipe: how to run a command inside the
/// compiler's rootfs image.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CompilerCommandConfig {
    pub command: String,
    #[serde(default)]
    pub environ: Vec<String>,
    #[serde(default)]
    pub workdir: String,
    /// Path the submitted source is copied to before compiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Path of the produced (or consumed) binary inside the container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    /// File the test input is placed at; stdin is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// File the output is read from; stdout is captured when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CompilerConfig {
    #[serde(default)]
    pub language: String,
    pub compile: Option<CompilerCommandConfig>,
    pub execute: Option<CompilerCommandConfig>,
}

/// A compiler: a logical name plus a rootfs image in blob storage and
/// the recipe describing its compile and execute commands.
#[derive(Clone, Debug, Default)]
pub struct Compiler {
    pub id: i64,
    pub owner_id: Option<i64>,
    pub name: String,
    pub config: Json,
    pub image_id: i64,
}

impl Compiler {
    pub fn parse_config(&self) -> Result<CompilerConfig> {
        self.config.parse()
    }

    pub fn set_config(&mut self, config: &CompilerConfig) -> Result<()> {
        self.config = Json::from_value(config)?;
        Ok(())
    }
}

impl Object for Compiler {
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
            name: row.get_str("name")?,
            config: Json::from_column(row, "config")?,
            image_id: row.get_opt_i64("image_id")?.unwrap_or_default(),
        })
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::Int64(self.id)),
            ("owner_id", Value::from(self.owner_id)),
            ("name", Value::Text(self.name.clone())),
            ("config", self.config.to_value()),
            ("image_id", Value::Int64(self.image_id)),
        ]
    }
}

#[derive(Default)]
pub struct CompilerIndexes {
    pub(crate) by_name: Index<String>,
}

impl StoreIndexes<Compiler> for CompilerIndexes {
    fn clear(&mut self) {
        self.by_name.clear();
    }

    fn insert(&mut self, object: &Compiler) {
        self.by_name.insert(object.name.clone(), object.id);
    }

    fn remove(&mut self, object: &Compiler) {
        self.by_name.remove(&object.name, object.id);
    }
}

pub type CompilerStore = BaseStore<Compiler, CompilerIndexes>;

impl CompilerStore {
    pub fn get_by_name(&self, name: &str) -> Option<Compiler> {
        let state = self.read();
        let id = state.indexes.by_name.ids(&name.to_owned()).next()?;
        state.objects.get(&id).cloned()
    }
}

pub fn new_compiler_store(db: db::Database) -> CompilerStore {
    CompilerStore::new(db, "solve_compiler", "solve_compiler_event")
}
