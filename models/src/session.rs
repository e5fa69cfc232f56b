use db::{Object, Result, Row, Value};

use crate::base::{BaseStore, Index, StoreIndexes};

/// An authenticated session of an account.
#[derive(Clone, Debug, Default)]
pub struct Session {
    pub id: i64,
    pub account_id: i64,
    pub secret: String,
    pub create_time: i64,
    pub expire_time: i64,
}

impl Object for Session {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_i64("id")?,
            account_id: row.get_i64("account_id")?,
            secret: row.get_str("secret")?,
            create_time: row.get_opt_i64("create_time")?.unwrap_or_default(),
            expire_time: row.get_opt_i64("expire_time")?.unwrap_or_default(),
        })
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::Int64(self.id)),
            ("account_id", Value::Int64(self.account_id)),
            ("secret", Value::Text(self.secret.clone())),
            ("create_time", Value::Int64(self.create_time)),
            ("expire_time", Value::Int64(self.expire_time)),
        ]
    }
}

#[derive(Default)]
pub struct SessionIndexes {
    pub(crate) by_account: Index<i64>,
}

impl StoreIndexes<Session> for SessionIndexes {
    fn clear(&mut self) {
        self.by_account.clear();
    }

    fn insert(&mut self, object: &Session) {
        self.by_account.insert(object.account_id, object.id);
    }

    fn remove(&mut self, object: &Session) {
        self.by_account.remove(&object.account_id, object.id);
    }
}

pub type SessionStore = BaseStore<Session, SessionIndexes>;

impl SessionStore {
    pub fn find_by_account(&self, account_id: i64) -> Vec<Session> {
        let state = self.read();
        state
            .indexes
            .by_account
            .ids(&account_id)
            .filter_map(|id| state.objects.get(&id).cloned())
            .collect()
    }
}

pub fn new_session_store(db: db::Database) -> SessionStore {
    SessionStore::new(db, "solve_session", "solve_session_event")
}
