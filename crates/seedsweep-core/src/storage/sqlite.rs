use std::path::Path;

use rusqlite::{Connection, Result};
use tracing::debug;

pub(crate) const SCHEMA_VERSION: i64 = 1;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = open_connection(path.as_ref())?;
        Ok(Database { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        configure(&conn)?;
        Ok(Database { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Open a connection with the shared pragmas and schema applied. The hash
/// cache and the lifecycle store use separate connections to the same file.
pub(crate) fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    Ok(conn)
}

pub(crate) fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA cache_size = -64000;
         PRAGMA busy_timeout = 5000;",
    )?;
    debug!("SQLite pragmas configured (WAL mode, 64MB cache)");
    migrate_schema(conn)
}

/// Tables hold durable lifecycle state, so migration only ever adds; nothing
/// is dropped.
fn migrate_schema(conn: &Connection) -> Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < SCHEMA_VERSION {
        debug!("Schema version {} < {}, applying schema", version, SCHEMA_VERSION);
    }
    conn.execute_batch(include_str!("schema.sql"))?;
    Ok(())
}
