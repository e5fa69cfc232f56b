use db::{Object, Result, Row, Value};

use crate::base::{BaseStore, Index, StoreIndexes};

/// Key-value process setting stored in the database.
#[derive(Clone, Debug, Default)]
pub struct Setting {
    pub id: i64,
    pub key: String,
    pub value: String,
}

impl Object for Setting {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_i64("id")?,
            key: row.get_str("key")?,
            value: row.get_str("value")?,
        })
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::Int64(self.id)),
            ("key", Value::Text(self.key.clone())),
            ("value", Value::Text(self.value.clone())),
        ]
    }
}

#[derive(Default)]
pub struct SettingIndexes {
    pub(crate) by_key: Index<String>,
}

impl StoreIndexes<Setting> for SettingIndexes {
    fn clear(&mut self) {
        self.by_key.clear();
    }

    fn insert(&mut self, object: &Setting) {
        self.by_key.insert(object.key.clone(), object.id);
    }

    fn remove(&mut self, object: &Setting) {
        self.by_key.remove(&object.key, object.id);
    }
}

pub type SettingStore = BaseStore<Setting, SettingIndexes>;

impl SettingStore {
    pub fn get_by_key(&self, key: &str) -> Option<Setting> {
        let state = self.read();
        let id = state.indexes.by_key.ids(&key.to_owned()).next()?;
        state.objects.get(&id).cloned()
    }
}

pub fn new_setting_store(db: db::Database) -> SettingStore {
    SettingStore::new(db, "solve_setting", "solve_setting_event")
}
