use db::{Object, Result, Row, Value};

use crate::base::{BaseStore, NoIndexes};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AccountKind {
    #[default]
    User = 1,
    ScopeUser = 2,
}

impl AccountKind {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for AccountKind {
    type Error = db::Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            1 => Ok(AccountKind::User),
            2 => Ok(AccountKind::ScopeUser),
            value => Err(db::Error::Corrupted(format!(
                "unknown account kind: {}",
                value
            ))),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Account {
    pub id: i64,
    pub kind: AccountKind,
}

impl Object for Account {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_i64("id")?,
            kind: AccountKind::try_from(row.get_i64("kind")?)?,
        })
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::Int64(self.id)),
            ("kind", Value::Int64(self.kind.as_i64())),
        ]
    }
}

pub type AccountStore = BaseStore<Account, NoIndexes>;

pub fn new_account_store(db: db::Database) -> AccountStore {
    AccountStore::new(db, "solve_account", "solve_account_event")
}
