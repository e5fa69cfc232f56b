use db::{Object, Result, Row, Value};

use crate::base::{BaseStore, Index, StoreIndexes};

/// A named role; accounts hold roles, roles can include other roles
/// through edges.
#[derive(Clone, Debug, Default)]
pub struct Role {
    pub id: i64,
    pub code: String,
}

impl Object for Role {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_i64("id")?,
            code: row.get_str("code")?,
        })
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::Int64(self.id)),
            ("code", Value::Text(self.code.clone())),
        ]
    }
}

#[derive(Default)]
pub struct RoleIndexes {
    pub(crate) by_code: Index<String>,
}

impl StoreIndexes<Role> for RoleIndexes {
    fn clear(&mut self) {
        self.by_code.clear();
    }

    fn insert(&mut self, object: &Role) {
        self.by_code.insert(object.code.clone(), object.id);
    }

    fn remove(&mut self, object: &Role) {
        self.by_code.remove(&object.code, object.id);
    }
}

pub type RoleStore = BaseStore<Role, RoleIndexes>;

impl RoleStore {
    pub fn get_by_code(&self, code: &str) -> Option<Role> {
        let state = self.read();
        let id = state.indexes.by_code.ids(&code.to_owned()).next()?;
        state.objects.get(&id).cloned()
    }
}

pub fn new_role_store(db: db::Database) -> RoleStore {
    RoleStore::new(db, "solve_role", "solve_role_event")
}

/// Role inclusion: `child_id` is granted wherever `role_id` is held.
#[derive(Clone, Debug, Default)]
pub struct RoleEdge {
    pub id: i64,
    pub role_id: i64,
    pub child_id: i64,
}

impl Object for RoleEdge {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_i64("id")?,
            role_id: row.get_i64("role_id")?,
            child_id: row.get_i64("child_id")?,
        })
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::Int64(self.id)),
            ("role_id", Value::Int64(self.role_id)),
            ("child_id", Value::Int64(self.child_id)),
        ]
    }
}

#[derive(Default)]
pub struct RoleEdgeIndexes {
    pub(crate) by_role: Index<i64>,
}

impl StoreIndexes<RoleEdge> for RoleEdgeIndexes {
    fn clear(&mut self) {
        self.by_role.clear();
    }

    fn insert(&mut self, object: &RoleEdge) {
        self.by_role.insert(object.role_id, object.id);
    }

    fn remove(&mut self, object: &RoleEdge) {
        self.by_role.remove(&object.role_id, object.id);
    }
}

pub type RoleEdgeStore = BaseStore<RoleEdge, RoleEdgeIndexes>;

impl RoleEdgeStore {
    pub fn find_by_role(&self, role_id: i64) -> Vec<RoleEdge> {
        let state = self.read();
        state
            .indexes
            .by_role
            .ids(&role_id)
            .filter_map(|id| state.objects.get(&id).cloned())
            .collect()
    }
}

pub fn new_role_edge_store(db: db::Database) -> RoleEdgeStore {
    RoleEdgeStore::new(db, "solve_role_edge", "solve_role_edge_event")
}

/// Role assignment to an account.
#[derive(Clone, Debug, Default)]
pub struct AccountRole {
    pub id: i64,
    pub account_id: i64,
    pub role_id: i64,
}

impl Object for AccountRole {
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
            role_id: row.get_i64("role_id")?,
        })
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::Int64(self.id)),
            ("account_id", Value::Int64(self.account_id)),
            ("role_id", Value::Int64(self.role_id)),
        ]
    }
}

#[derive(Default)]
pub struct AccountRoleIndexes {
    pub(crate) by_account: Index<i64>,
}

impl StoreIndexes<AccountRole> for AccountRoleIndexes {
    fn clear(&mut self) {
        self.by_account.clear();
    }

    fn insert(&mut self, object: &AccountRole) {
        self.by_account.insert(object.account_id, object.id);
    }

    fn remove(&mut self, object: &AccountRole) {
        self.by_account.remove(&object.account_id, object.id);
    }
}

pub type AccountRoleStore = BaseStore<AccountRole, AccountRoleIndexes>;

impl AccountRoleStore {
    pub fn find_by_account(&self, account_id: i64) -> Vec<AccountRole> {
        let state = self.read();
        state
            .indexes
            .by_account
            .ids(&account_id)
            .filter_map(|id| state.objects.get(&id).cloned())
            .collect()
    }
}

pub fn new_account_role_store(db: db::Database) -> AccountRoleStore {
    AccountRoleStore::new(db, "solve_account_role", "solve_account_role_event")
}
