//! DDL builder for the object and event tables.
//!
//! Schema migrations proper live outside the judging core; this module
//! only knows how to render create/drop statements in both dialects so
//! tests and first-run bootstrap can set the schema up.

use crate::{Dialect, Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Type {
    Int64,
    String,
    Json,
}

#[derive(Clone, Debug)]
pub struct Column {
    pub name: &'static str,
    pub kind: Type,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: &'static str, kind: Type) -> Self {
        Self {
            name,
            kind,
            primary_key: false,
            auto_increment: false,
            nullable: false,
        }
    }

    pub fn nullable(name: &'static str, kind: Type) -> Self {
        Self {
            nullable: true,
            ..Self::new(name, kind)
        }
    }

    pub fn primary_key(name: &'static str) -> Self {
        Self {
            primary_key: true,
            ..Self::new(name, Type::Int64)
        }
    }

    pub fn auto_increment(name: &'static str) -> Self {
        Self {
            auto_increment: true,
            ..Self::primary_key(name)
        }
    }

    fn build_sql(&self, dialect: Dialect) -> Result<String> {
        let type_name = match self.kind {
            Type::Int64 => {
                let mut name = match (dialect, self.primary_key, self.auto_increment) {
                    // SQLite only autoincrements `integer` primary keys.
                    (Dialect::SQLite, true, _) => "integer".to_owned(),
                    (Dialect::Postgres, true, true) => "bigserial".to_owned(),
                    _ => "bigint".to_owned(),
                };
                if self.primary_key {
                    name.push_str(" PRIMARY KEY");
                    if self.auto_increment && dialect == Dialect::SQLite {
                        name.push_str(" AUTOINCREMENT");
                    }
                } else if !self.nullable {
                    name.push_str(" NOT NULL");
                }
                name
            }
            Type::String => {
                if self.primary_key {
                    return Err(Error::Corrupted(
                        "string primary keys are not supported".into(),
                    ));
                }
                let mut name = "text".to_owned();
                if !self.nullable {
                    name.push_str(" NOT NULL");
                }
                name
            }
            Type::Json => {
                if self.primary_key {
                    return Err(Error::Corrupted(
                        "json primary keys are not supported".into(),
                    ));
                }
                let mut name = match dialect {
                    Dialect::SQLite => "blob".to_owned(),
                    // jsonb is preferred over json for efficiency.
                    Dialect::Postgres => "jsonb".to_owned(),
                };
                if !self.nullable {
                    name.push_str(" NOT NULL");
                }
                name
            }
        };
        Ok(format!("{:?} {}", self.name, type_name))
    }
}

#[derive(Clone, Debug)]
pub struct ForeignKey {
    pub column: &'static str,
    pub parent_table: &'static str,
    pub parent_column: &'static str,
}

#[derive(Clone, Debug)]
pub struct CreateTable {
    pub name: String,
    pub columns: Vec<Column>,
    pub foreign_keys: Vec<ForeignKey>,
    pub strict: bool,
}

impl CreateTable {
    pub fn build_apply(&self, dialect: Dialect) -> Result<String> {
        let mut query = String::from("CREATE TABLE ");
        if !self.strict {
            query.push_str("IF NOT EXISTS ");
        }
        query.push_str(&format!("{:?} (", self.name));
        for (index, column) in self.columns.iter().enumerate() {
            if index > 0 {
                query.push_str(", ");
            }
            query.push_str(&column.build_sql(dialect)?);
        }
        for fk in &self.foreign_keys {
            query.push_str(&format!(
                ", FOREIGN KEY ({:?}) REFERENCES {:?} ({:?})",
                fk.column, fk.parent_table, fk.parent_column
            ));
        }
        query.push(')');
        Ok(query)
    }

    pub fn build_unapply(&self, _dialect: Dialect) -> Result<String> {
        let mut query = String::from("DROP TABLE ");
        if !self.strict {
            query.push_str("IF EXISTS ");
        }
        query.push_str(&format!("{:?}", self.name));
        Ok(query)
    }
}

#[derive(Clone, Debug)]
pub struct CreateIndex {
    pub table: String,
    pub columns: Vec<&'static str>,
    pub unique: bool,
    pub strict: bool,
}

impl CreateIndex {
    fn name(&self) -> String {
        format!("{}_{}_idx", self.table, self.columns.join("_"))
    }

    pub fn build_apply(&self, _dialect: Dialect) -> Result<String> {
        let mut query = String::from("CREATE ");
        if self.unique {
            query.push_str("UNIQUE ");
        }
        query.push_str("INDEX ");
        if !self.strict {
            query.push_str("IF NOT EXISTS ");
        }
        query.push_str(&format!("{:?} ON {:?} (", self.name(), self.table));
        for (index, column) in self.columns.iter().enumerate() {
            if index > 0 {
                query.push_str(", ");
            }
            query.push_str(&format!("{:?}", column));
        }
        query.push(')');
        Ok(query)
    }

    pub fn build_unapply(&self, _dialect: Dialect) -> Result<String> {
        let mut query = String::from("DROP INDEX ");
        if !self.strict {
            query.push_str("IF EXISTS ");
        }
        query.push_str(&format!("{:?}", self.name()));
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_table_sql() {
        let table = CreateTable {
            name: "solve_task".into(),
            columns: vec![
                Column::auto_increment("id"),
                Column::new("kind", Type::Int64),
                Column::new("config", Type::Json),
                Column::nullable("title", Type::String),
            ],
            foreign_keys: vec![],
            strict: false,
        };
        assert_eq!(
            table.build_apply(Dialect::SQLite).unwrap(),
            "CREATE TABLE IF NOT EXISTS \"solve_task\" (\
             \"id\" integer PRIMARY KEY AUTOINCREMENT, \
             \"kind\" bigint NOT NULL, \
             \"config\" blob NOT NULL, \
             \"title\" text)"
        );
        assert_eq!(
            table.build_apply(Dialect::Postgres).unwrap(),
            "CREATE TABLE IF NOT EXISTS \"solve_task\" (\
             \"id\" bigserial PRIMARY KEY, \
             \"kind\" bigint NOT NULL, \
             \"config\" jsonb NOT NULL, \
             \"title\" text)"
        );
        assert_eq!(
            table.build_unapply(Dialect::SQLite).unwrap(),
            "DROP TABLE IF EXISTS \"solve_task\""
        );
    }

    #[test]
    fn test_create_index_sql() {
        let index = CreateIndex {
            table: "solve_session".into(),
            columns: vec!["account_id"],
            unique: false,
            strict: true,
        };
        assert_eq!(
            index.build_apply(Dialect::Postgres).unwrap(),
            "CREATE INDEX \"solve_session_account_id_idx\" \
             ON \"solve_session\" (\"account_id\")"
        );
        assert_eq!(
            index.build_unapply(Dialect::Postgres).unwrap(),
            "DROP INDEX \"solve_session_account_id_idx\""
        );
    }

    #[test]
    fn test_foreign_key_sql() {
        let table = CreateTable {
            name: "solve_account_role".into(),
            columns: vec![
                Column::auto_increment("id"),
                Column::new("account_id", Type::Int64),
                Column::new("role_id", Type::Int64),
            ],
            foreign_keys: vec![ForeignKey {
                column: "account_id",
                parent_table: "solve_account",
                parent_column: "id",
            }],
            strict: true,
        };
        assert_eq!(
            table.build_apply(Dialect::SQLite).unwrap(),
            "CREATE TABLE \"solve_account_role\" (\
             \"id\" integer PRIMARY KEY AUTOINCREMENT, \
             \"account_id\" bigint NOT NULL, \
             \"role_id\" bigint NOT NULL, \
             FOREIGN KEY (\"account_id\") REFERENCES \"solve_account\" (\"id\"))"
        );
    }
}
