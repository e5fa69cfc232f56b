use db::{Object, Result, Row, Value};

use crate::base::{BaseStore, Json, NoIndexes};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FileStatus {
    #[default]
    Pending = 0,
    Available = 1,
}

impl FileStatus {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for FileStatus {
    type Error = db::Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(FileStatus::Pending),
            1 => Ok(FileStatus::Available),
            value => Err(db::Error::Corrupted(format!(
                "unknown file status: {}",
                value
            ))),
        }
    }
}

/// A blob reference: the actual bytes live in file storage under
/// `path`. Pending files expire and get garbage-collected if their
/// upload never finishes.
#[derive(Clone, Debug, Default)]
pub struct File {
    pub id: i64,
    pub status: FileStatus,
    pub expire_time: Option<i64>,
    pub path: String,
    pub meta: Json,
}

impl Object for File {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_i64("id")?,
            status: FileStatus::try_from(row.get_i64("status")?)?,
            expire_time: row.get_opt_i64("expire_time")?,
            path: row.get_str("path")?,
            meta: Json::from_column(row, "meta")?,
        })
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::Int64(self.id)),
            ("status", Value::Int64(self.status.as_i64())),
            ("expire_time", Value::from(self.expire_time)),
            ("path", Value::Text(self.path.clone())),
            ("meta", self.meta.to_value()),
        ]
    }
}

pub type FileStore = BaseStore<File, NoIndexes>;

pub fn new_file_store(db: db::Database) -> FileStore {
    FileStore::new(db, "solve_file", "solve_file_event")
}
