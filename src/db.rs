use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, bail, Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{Map, Value};

/// One result row, column name to value
pub type Row = Map<String, Value>;

/// SQLite connection shared by the MCP handlers.
///
/// Calls block; async callers should go through `spawn_blocking`.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).to_string()),
        ValueRef::Blob(b) => Value::from(b.to_vec()),
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        tracing::info!(path = %path.display(), "Opened database");
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection lock poisoned"))
    }

    /// Run a read statement and return every row
    pub fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let rows = stmt.query_map([], |row| {
            let mut out = Row::new();
            for (i, name) in columns.iter().enumerate() {
                out.insert(name.clone(), to_json(row.get_ref(i)?));
            }
            Ok(out)
        })?;

        let rows = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        tracing::debug!(rows = rows.len(), "Query finished");
        Ok(rows)
    }

    /// Run a write statement in its own transaction. Nothing is committed
    /// if the statement fails.
    pub fn execute(&self, sql: &str) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let affected = tx.execute(sql, [])?;
        tx.commit()?;
        Ok(affected)
    }

    /// Names of the tables in `schema` (`main` by default)
    pub fn tables(&self, schema: Option<&str>) -> Result<Vec<String>> {
        let schema = schema.unwrap_or("main");
        if !is_identifier(schema) {
            bail!("Invalid schema name: {}", schema);
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT name FROM \"{}\".sqlite_master WHERE type = 'table' ORDER BY name",
            schema
        ))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, score REAL)")
            .unwrap();
        db.execute("INSERT INTO users (name, score) VALUES ('ada', 9.5), ('linus', NULL)")
            .unwrap();
        db
    }

    #[test]
    fn test_query_rows_as_json() {
        let db = seeded();
        let rows = db.query("SELECT id, name, score FROM users ORDER BY id").unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(Value::Object(rows[0].clone()), json!({"id": 1, "name": "ada", "score": 9.5}));
        assert_eq!(rows[1]["score"], Value::Null);
    }

    #[test]
    fn test_execute_reports_affected_rows() {
        let db = seeded();
        assert_eq!(db.execute("UPDATE users SET score = 1.0").unwrap(), 2);
        assert_eq!(db.execute("DELETE FROM users WHERE name = 'ada'").unwrap(), 1);
        assert!(db.execute("INSERT INTO missing VALUES (1)").is_err());
    }

    #[test]
    fn test_tables() {
        let db = seeded();
        db.execute("CREATE TABLE accounts (id INTEGER)").unwrap();

        assert_eq!(db.tables(None).unwrap(), vec!["accounts", "users"]);
        assert!(db.tables(Some("main; DROP TABLE users")).is_err());
        assert!(db.tables(Some("nope")).is_err());
    }

    #[test]
    fn test_open_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.db");
        {
            let db = Database::open(&path).unwrap();
            db.execute("CREATE TABLE notes (body TEXT)").unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.tables(Some("main")).unwrap(), vec!["notes"]);
    }
}
