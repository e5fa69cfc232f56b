use std::marker::PhantomData;

use crate::{Dialect, Error, Result, Row, Rows, Transaction, Value};

/// A persistent row with 64-bit identity.
///
/// `to_row` lists every column including `"id"`; the stores slice the
/// id off where the statement allocates it.
pub trait Object: Clone + Send + Sync + 'static {
    fn id(&self) -> i64;

    fn set_id(&mut self, id: i64);

    fn from_row(row: &Row) -> Result<Self>;

    fn to_row(&self) -> Vec<(&'static str, Value)>;
}

/// SQL store for objects of one table.
///
/// All operations run inside a caller-supplied transaction; the store
/// never opens its own.
pub struct ObjectStore<O: Object> {
    table: String,
    dialect: Dialect,
    _object: PhantomData<O>,
}

impl<O: Object> ObjectStore<O> {
    pub fn new(table: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            table: table.into(),
            dialect,
            _object: PhantomData,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Inserts the object and stores the allocated id back into it.
    pub fn create_object(&self, tx: &mut Transaction<'_>, object: &mut O) -> Result<()> {
        let row = object.to_row();
        let mut names = String::new();
        let mut placeholders = String::new();
        let mut params = Vec::new();
        for (name, value) in row {
            if name == "id" {
                continue;
            }
            if !params.is_empty() {
                names.push_str(", ");
                placeholders.push_str(", ");
            }
            names.push_str(&format!("{:?}", name));
            params.push(value);
            placeholders.push_str(&format!("${}", params.len()));
        }
        let sql = format!(
            "INSERT INTO {:?} ({}) VALUES ({})",
            self.table, names, placeholders
        );
        let id = match self.dialect {
            Dialect::Postgres => {
                let sql = format!("{} RETURNING \"id\"", sql);
                let mut rows = tx.query(&sql, &params)?;
                let row = rows.next().ok_or(Error::NoRows)?;
                row.get_i64("id")?
            }
            Dialect::SQLite => {
                tx.execute(&sql, &params)?;
                tx.last_insert_id()?
            }
        };
        object.set_id(id);
        Ok(())
    }

    /// Updates the object by primary key; `NoRows` if it does not exist.
    pub fn update_object(&self, tx: &mut Transaction<'_>, object: &O) -> Result<()> {
        let row = object.to_row();
        let mut assignments = String::new();
        let mut params = Vec::new();
        for (name, value) in row {
            if name == "id" {
                continue;
            }
            if !params.is_empty() {
                assignments.push_str(", ");
            }
            params.push(value);
            assignments.push_str(&format!("{:?} = ${}", name, params.len()));
        }
        params.push(Value::Int64(object.id()));
        let sql = format!(
            "UPDATE {:?} SET {} WHERE \"id\" = ${}",
            self.table,
            assignments,
            params.len()
        );
        if tx.execute(&sql, &params)? == 0 {
            return Err(Error::NoRows);
        }
        Ok(())
    }

    /// Deletes the row by primary key; `NoRows` if it does not exist.
    pub fn delete_object(&self, tx: &mut Transaction<'_>, id: i64) -> Result<()> {
        let sql = format!("DELETE FROM {:?} WHERE \"id\" = $1", self.table);
        if tx.execute(&sql, &[Value::Int64(id)])? == 0 {
            return Err(Error::NoRows);
        }
        Ok(())
    }

    pub fn load_objects(&self, tx: &mut Transaction<'_>) -> Result<Rows> {
        tx.query(&format!("SELECT * FROM {:?}", self.table), &[])
    }

    pub fn find_objects(
        &self,
        tx: &mut Transaction<'_>,
        where_clause: &str,
        params: &[Value],
    ) -> Result<Rows> {
        let sql = format!("SELECT * FROM {:?} WHERE {}", self.table, where_clause);
        tx.query(&sql, params)
    }

    pub fn find_object(
        &self,
        tx: &mut Transaction<'_>,
        where_clause: &str,
        params: &[Value],
    ) -> Result<O> {
        let mut rows = self.find_objects(tx, where_clause, params)?;
        match rows.next() {
            Some(row) => O::from_row(&row),
            None => Err(Error::NoRows),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, CreateTable, Type};
    use crate::{Database, Isolation};

    #[derive(Clone, Debug, Default, PartialEq)]
    struct Account {
        id: i64,
        kind: i64,
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
                kind: row.get_i64("kind")?,
            })
        }

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![("id", Value::Int64(self.id)), ("kind", Value::Int64(self.kind))]
        }
    }

    fn setup() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new_sqlite(dir.path().join("db.sqlite"));
        let table = CreateTable {
            name: "account".into(),
            columns: vec![
                Column::primary_key("id"),
                Column::new("kind", Type::Int64),
            ],
            foreign_keys: vec![],
            strict: true,
        };
        db.with_tx(Isolation::ReadCommitted, |tx| {
            let sql = table.build_apply(tx.dialect())?;
            tx.execute(&sql, &[])?;
            Ok(())
        })
        .unwrap();
        (dir, db)
    }

    #[test]
    fn test_object_store() {
        let (_dir, db) = setup();
        let store = ObjectStore::<Account>::new("account", db.dialect());
        db.with_tx(Isolation::ReadCommitted, |tx| {
            let mut account = Account { id: 0, kind: 1 };
            store.create_object(tx, &mut account)?;
            assert_eq!(account.id, 1);
            let mut other = Account { id: 0, kind: 2 };
            store.create_object(tx, &mut other)?;
            assert_eq!(other.id, 2);

            other.kind = 3;
            store.update_object(tx, &other)?;
            let loaded = store.find_object(tx, "\"id\" = $1", &[Value::Int64(2)])?;
            assert_eq!(loaded, other);

            store.delete_object(tx, 1)?;
            assert!(matches!(
                store.find_object(tx, "\"id\" = $1", &[Value::Int64(1)]),
                Err(Error::NoRows)
            ));
            assert!(matches!(store.delete_object(tx, 1), Err(Error::NoRows)));

            let missing = Account { id: 100, kind: 1 };
            assert!(matches!(
                store.update_object(tx, &missing),
                Err(Error::NoRows)
            ));
            Ok(())
        })
        .unwrap();
    }
}
