use db::{Object, Result, Row, Value};

use crate::base::{BaseStore, Index, StoreIndexes};

/// A named permission that roles can grant.
#[derive(Clone, Debug, Default)]
pub struct Permission {
    pub id: i64,
    pub name: String,
}

impl Object for Permission {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_i64("id")?,
            name: row.get_str("name")?,
        })
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::Int64(self.id)),
            ("name", Value::Text(self.name.clone())),
        ]
    }
}

#[derive(Default)]
pub struct PermissionIndexes {
    pub(crate) by_name: Index<String>,
}

impl StoreIndexes<Permission> for PermissionIndexes {
    fn clear(&mut self) {
        self.by_name.clear();
    }

    fn insert(&mut self, object: &Permission) {
        self.by_name.insert(object.name.clone(), object.id);
    }

    fn remove(&mut self, object: &Permission) {
        self.by_name.remove(&object.name, object.id);
    }
}

pub type PermissionStore = BaseStore<Permission, PermissionIndexes>;

impl PermissionStore {
    pub fn get_by_name(&self, name: &str) -> Option<Permission> {
        let state = self.read();
        let id = state.indexes.by_name.ids(&name.to_owned()).next()?;
        state.objects.get(&id).cloned()
    }
}

pub fn new_permission_store(db: db::Database) -> PermissionStore {
    PermissionStore::new(db, "solve_permission", "solve_permission_event")
}
