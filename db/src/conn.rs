use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use crate::{Dialect, Error, Result, Rows, Value};

/// Transaction isolation level.
///
/// SQLite has no isolation levels to speak of; `RepeatableRead` maps to
/// `BEGIN IMMEDIATE`, which takes the writer lock up front and gives the
/// same mutual exclusion the task queue needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Isolation {
    ReadCommitted,
    RepeatableRead,
}

#[derive(Clone, Debug)]
enum DatabaseOptions {
    SQLite { path: PathBuf },
    Postgres { url: String },
}

/// Handle to a database; cheap to clone, opens connections on demand.
#[derive(Clone, Debug)]
pub struct Database {
    options: DatabaseOptions,
}

impl Database {
    pub fn new_sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            options: DatabaseOptions::SQLite { path: path.into() },
        }
    }

    pub fn new_postgres(url: impl Into<String>) -> Self {
        Self {
            options: DatabaseOptions::Postgres { url: url.into() },
        }
    }

    pub fn dialect(&self) -> Dialect {
        match &self.options {
            DatabaseOptions::SQLite { .. } => Dialect::SQLite,
            DatabaseOptions::Postgres { .. } => Dialect::Postgres,
        }
    }

    pub fn connect(&self) -> Result<Connection> {
        match &self.options {
            DatabaseOptions::SQLite { path } => {
                let conn = rusqlite::Connection::open(path)?;
                conn.busy_timeout(Duration::from_secs(10))?;
                // WAL lets a writer coexist with readers. `:memory:`
                // databases reject it, which is fine to ignore.
                let _ = conn.pragma_update(None, "journal_mode", "WAL");
                conn.pragma_update(None, "foreign_keys", "ON")?;
                Ok(Connection {
                    inner: ConnImpl::SQLite(conn),
                })
            }
            DatabaseOptions::Postgres { url } => {
                let client = postgres::Client::connect(url, postgres::NoTls)?;
                Ok(Connection {
                    inner: ConnImpl::Postgres(client),
                })
            }
        }
    }

    /// Runs `f` inside a transaction, retrying transient failures
    /// (busy database, serialization failure, deadlock) with
    /// exponential backoff.
    pub fn with_tx<T>(
        &self,
        isolation: Isolation,
        mut f: impl FnMut(&mut Transaction) -> Result<T>,
    ) -> Result<T> {
        const MAX_ATTEMPTS: usize = 8;
        let mut delay = Duration::from_millis(10);
        for attempt in 1.. {
            match self.try_tx(isolation, &mut f) {
                Err(Error::Busy) if attempt < MAX_ATTEMPTS => {
                    log::debug!("retrying busy transaction (attempt {})", attempt);
                    std::thread::sleep(delay);
                    delay = std::cmp::min(delay * 2, Duration::from_secs(1));
                }
                result => return result,
            }
        }
        unreachable!()
    }

    fn try_tx<T>(
        &self,
        isolation: Isolation,
        f: &mut impl FnMut(&mut Transaction) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.connect()?;
        let mut tx = conn.begin(isolation)?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                let _ = tx.rollback();
                Err(err)
            }
        }
    }
}

enum ConnImpl {
    SQLite(rusqlite::Connection),
    Postgres(postgres::Client),
}

pub struct Connection {
    inner: ConnImpl,
}

impl Connection {
    pub fn dialect(&self) -> Dialect {
        match self.inner {
            ConnImpl::SQLite(_) => Dialect::SQLite,
            ConnImpl::Postgres(_) => Dialect::Postgres,
        }
    }

    pub fn begin(&mut self, isolation: Isolation) -> Result<Transaction<'_>> {
        let sql = match (self.dialect(), isolation) {
            (Dialect::SQLite, Isolation::ReadCommitted) => "BEGIN",
            (Dialect::SQLite, Isolation::RepeatableRead) => "BEGIN IMMEDIATE",
            (Dialect::Postgres, Isolation::ReadCommitted) => "BEGIN",
            (Dialect::Postgres, Isolation::RepeatableRead) => {
                "BEGIN ISOLATION LEVEL REPEATABLE READ"
            }
        };
        self.execute_raw(sql, &[])?;
        Ok(Transaction {
            conn: self,
            open: true,
        })
    }

    fn execute_raw(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        match &mut self.inner {
            ConnImpl::SQLite(conn) => {
                let mut stmt = conn.prepare(sql)?;
                bind_sqlite(&mut stmt, params)?;
                let changed = stmt.raw_execute()?;
                Ok(changed as u64)
            }
            ConnImpl::Postgres(client) => {
                let boxed = pg_params(params)?;
                let refs: Vec<&(dyn postgres::types::ToSql + Sync)> =
                    boxed.iter().map(|p| p.as_ref()).collect();
                Ok(client.execute(sql, &refs)?)
            }
        }
    }

    fn query_raw(&mut self, sql: &str, params: &[Value]) -> Result<Rows> {
        match &mut self.inner {
            ConnImpl::SQLite(conn) => {
                let mut stmt = conn.prepare(sql)?;
                let columns: Vec<String> = stmt
                    .column_names()
                    .iter()
                    .map(|name| name.to_string())
                    .collect();
                bind_sqlite(&mut stmt, params)?;
                let mut fetched = VecDeque::new();
                let mut rows = stmt.raw_query();
                while let Some(row) = rows.next()? {
                    let mut values = Vec::with_capacity(columns.len());
                    for index in 0..columns.len() {
                        values.push(sqlite_value(row.get_ref(index)?, &columns[index])?);
                    }
                    fetched.push_back(values);
                }
                Ok(Rows::new(columns, fetched))
            }
            ConnImpl::Postgres(client) => {
                let boxed = pg_params(params)?;
                let refs: Vec<&(dyn postgres::types::ToSql + Sync)> =
                    boxed.iter().map(|p| p.as_ref()).collect();
                let result = client.query(sql, &refs)?;
                let columns: Vec<String> = match result.first() {
                    Some(row) => row
                        .columns()
                        .iter()
                        .map(|c| c.name().to_owned())
                        .collect(),
                    None => Vec::new(),
                };
                let mut fetched = VecDeque::new();
                for row in &result {
                    let mut values = Vec::with_capacity(columns.len());
                    for index in 0..columns.len() {
                        values.push(pg_value(row, index)?);
                    }
                    fetched.push_back(values);
                }
                Ok(Rows::new(columns, fetched))
            }
        }
    }
}

/// Transaction over a borrowed connection. Rolls back on drop unless
/// committed.
pub struct Transaction<'a> {
    conn: &'a mut Connection,
    open: bool,
}

impl Transaction<'_> {
    pub fn dialect(&self) -> Dialect {
        self.conn.dialect()
    }

    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.conn.execute_raw(sql, params)
    }

    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<Rows> {
        self.conn.query_raw(sql, params)
    }

    /// Id of the row inserted last on this connection (SQLite only;
    /// PostgreSQL inserts use `RETURNING`).
    pub fn last_insert_id(&self) -> Result<i64> {
        match &self.conn.inner {
            ConnImpl::SQLite(conn) => Ok(conn.last_insert_rowid()),
            ConnImpl::Postgres(_) => Err(Error::Corrupted(
                "last_insert_id is not supported on postgres".into(),
            )),
        }
    }

    /// Takes the table-level write lock where the engine supports it.
    pub fn lock_table(&mut self, table: &str) -> Result<()> {
        match self.dialect() {
            Dialect::SQLite => Ok(()),
            Dialect::Postgres => {
                self.execute(&format!("LOCK TABLE {:?}", table), &[])?;
                Ok(())
            }
        }
    }

    pub fn commit(mut self) -> Result<()> {
        self.open = false;
        self.conn.execute_raw("COMMIT", &[])?;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.open = false;
        self.conn.execute_raw("ROLLBACK", &[])?;
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.open {
            let _ = self.conn.execute_raw("ROLLBACK", &[]);
        }
    }
}

fn bind_sqlite(stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> Result<()> {
    for (index, value) in params.iter().enumerate() {
        let name = format!("${}", index + 1);
        let param_index = stmt
            .parameter_index(&name)?
            .ok_or_else(|| Error::Corrupted(format!("unused parameter {}", name)))?;
        stmt.raw_bind_parameter(param_index, SqliteParam(value))?;
    }
    Ok(())
}

struct SqliteParam<'a>(&'a Value);

impl rusqlite::ToSql for SqliteParam<'_> {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, ValueRef};
        Ok(match self.0 {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Int64(v) => ToSqlOutput::Borrowed(ValueRef::Integer(*v)),
            Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Bytes(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
            // SQLite keeps JSON as text inside the blob-typed column.
            Value::Json(v) => ToSqlOutput::Borrowed(ValueRef::Text(v)),
        })
    }
}

fn sqlite_value(value: rusqlite::types::ValueRef<'_>, column: &str) -> Result<Value> {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(v) => Ok(Value::Int64(v)),
        ValueRef::Text(v) => {
            let text = std::str::from_utf8(v)
                .map_err(|_| Error::TypeMismatch(column.to_owned()))?;
            Ok(Value::Text(text.to_owned()))
        }
        ValueRef::Blob(v) => Ok(Value::Bytes(v.to_vec())),
        ValueRef::Real(_) => Err(Error::TypeMismatch(column.to_owned())),
    }
}

/// NULL parameter that binds against a column of any type.
#[derive(Debug)]
struct PgNull;

impl postgres::types::ToSql for PgNull {
    fn to_sql(
        &self,
        _ty: &postgres::types::Type,
        _out: &mut postgres::types::private::BytesMut,
    ) -> std::result::Result<postgres::types::IsNull, Box<dyn std::error::Error + Sync + Send>>
    {
        Ok(postgres::types::IsNull::Yes)
    }

    fn accepts(_ty: &postgres::types::Type) -> bool {
        true
    }

    postgres::types::to_sql_checked!();
}

fn pg_params(params: &[Value]) -> Result<Vec<Box<dyn postgres::types::ToSql + Sync>>> {
    let mut boxed: Vec<Box<dyn postgres::types::ToSql + Sync>> = Vec::new();
    for value in params {
        boxed.push(match value {
            Value::Null => Box::new(PgNull),
            Value::Int64(v) => Box::new(*v),
            Value::Text(v) => Box::new(v.clone()),
            Value::Bytes(v) => Box::new(v.clone()),
            Value::Json(v) => {
                let json: serde_json::Value = serde_json::from_slice(v)
                    .map_err(|err| Error::Corrupted(format!("invalid json value: {}", err)))?;
                Box::new(json)
            }
        });
    }
    Ok(boxed)
}

fn pg_value(row: &postgres::Row, index: usize) -> Result<Value> {
    use postgres::types::Type;
    let column = &row.columns()[index];
    let ty = column.type_();
    let value = if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(index).map(Value::from)
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(index)
            .map(|v| Value::from(v.map(i64::from)))
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(index)
            .map(|v| Value::from(v.map(i64::from)))
    } else if *ty == Type::TEXT
        || *ty == Type::VARCHAR
        || *ty == Type::BPCHAR
        || *ty == Type::NAME
    {
        row.try_get::<_, Option<String>>(index)
            .map(|v| v.map(Value::Text).unwrap_or(Value::Null))
    } else if *ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(index)
            .map(|v| v.map(Value::Bytes).unwrap_or(Value::Null))
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        return match row.try_get::<_, Option<serde_json::Value>>(index) {
            Ok(Some(json)) => {
                let bytes = serde_json::to_vec(&json).map_err(|err| {
                    Error::Corrupted(format!("invalid json value: {}", err))
                })?;
                Ok(Value::Json(bytes))
            }
            Ok(None) => Ok(Value::Null),
            Err(err) => Err(Error::Corrupted(format!(
                "cannot read column {}: {}",
                column.name(),
                err
            ))),
        };
    } else {
        return Err(Error::TypeMismatch(column.name().to_owned()));
    };
    value.map_err(|err| {
        Error::Corrupted(format!("cannot read column {}: {}", column.name(), err))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_database() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new_sqlite(dir.path().join("db.sqlite"));
        (dir, db)
    }

    #[test]
    fn test_transaction_rollback_on_drop() {
        let (_dir, db) = temp_database();
        let mut conn = db.connect().unwrap();
        {
            let mut tx = conn.begin(Isolation::ReadCommitted).unwrap();
            tx.execute("CREATE TABLE \"test\" (\"id\" integer PRIMARY KEY)", &[])
                .unwrap();
            tx.commit().unwrap();
        }
        {
            let mut tx = conn.begin(Isolation::ReadCommitted).unwrap();
            tx.execute("INSERT INTO \"test\" (\"id\") VALUES ($1)", &[Value::Int64(1)])
                .unwrap();
            // Dropped without commit.
        }
        let mut tx = conn.begin(Isolation::ReadCommitted).unwrap();
        let mut rows = tx
            .query("SELECT COUNT(*) AS \"count\" FROM \"test\"", &[])
            .unwrap();
        let row = rows.next().unwrap();
        assert_eq!(row.get_i64("count").unwrap(), 0);
    }

    #[test]
    fn test_with_tx() {
        let (_dir, db) = temp_database();
        db.with_tx(Isolation::ReadCommitted, |tx| {
            tx.execute(
                "CREATE TABLE \"kv\" (\"key\" text NOT NULL, \"value\" text)",
                &[],
            )?;
            tx.execute(
                "INSERT INTO \"kv\" (\"key\", \"value\") VALUES ($1, $2)",
                &[Value::from("language"), Value::from("rust")],
            )?;
            Ok(())
        })
        .unwrap();
        let value = db
            .with_tx(Isolation::ReadCommitted, |tx| {
                let mut rows = tx.query(
                    "SELECT \"value\" FROM \"kv\" WHERE \"key\" = $1",
                    &[Value::from("language")],
                )?;
                let row = rows.next().ok_or(Error::NoRows)?;
                row.get_str("value")
            })
            .unwrap();
        assert_eq!(value, "rust");
    }
}
