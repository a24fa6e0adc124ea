// SPDX-License-Identifier: PMPL-1.0-or-later

//! SQLite persistence for experiments and agent preparations.
//!
//! One database file per install. Every operation opens its own connection,
//! so a `Store` is cheap to clone and share with executors. Nothing guards
//! against two CLI processes racing on the same file beyond SQLite's own
//! busy timeout.

mod experiment;
mod preparation;

pub use experiment::{ExperimentFilter, ExperimentRecord};
pub use preparation::{PreparationFilter, PreparationRecord};

use anyhow::{anyhow, Context, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Current schema revision, tracked with `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS experiment (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    uid         VARCHAR(32) UNIQUE,
    command     VARCHAR NOT NULL,
    sub_command VARCHAR,
    flag        VARCHAR,
    status      VARCHAR,
    error       VARCHAR,
    create_time VARCHAR,
    update_time VARCHAR
);
CREATE UNIQUE INDEX IF NOT EXISTS exp_uid_uidx ON experiment (uid);
CREATE INDEX IF NOT EXISTS exp_command_idx ON experiment (command);
CREATE INDEX IF NOT EXISTS exp_status_idx ON experiment (status);

CREATE TABLE IF NOT EXISTS preparation (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    uid          VARCHAR(32) UNIQUE,
    program_type VARCHAR NOT NULL,
    process      VARCHAR,
    port         VARCHAR,
    status       VARCHAR,
    error        VARCHAR,
    create_time  VARCHAR,
    update_time  VARCHAR
);
CREATE UNIQUE INDEX IF NOT EXISTS pre_uid_uidx ON preparation (uid);
CREATE INDEX IF NOT EXISTS pre_status_idx ON preparation (status);
CREATE INDEX IF NOT EXISTS pre_type_process_idx ON preparation (program_type, process);
"#;

#[derive(Debug, Clone)]
pub struct Store {
    db_path: PathBuf,
}

/// `limit` argument of the listing queries: `count` or `offset,count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub offset: i64,
    pub count: i64,
}

impl Limit {
    pub fn parse(value: &str) -> Result<Self> {
        let (offset, count) = match value.split_once(',') {
            Some((offset, count)) => (offset.trim(), count.trim()),
            None => ("0", value.trim()),
        };
        let offset: i64 = offset
            .parse()
            .with_context(|| format!("illegal limit offset in {:?}", value))?;
        let count: i64 = count
            .parse()
            .with_context(|| format!("illegal limit count in {:?}", value))?;
        if offset < 0 || count < 0 {
            return Err(anyhow!("limit {:?} must not be negative", value));
        }
        Ok(Self { offset, count })
    }
}

impl Store {
    /// Opens (creating if needed) the database and applies pending migrations.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        let conn = store.conn()?;
        conn.execute_batch(SCHEMA).context("creating tables")?;
        migrate(&conn)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub(crate) fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("opening {}", self.db_path.display()))?;
        conn.busy_timeout(Duration::from_millis(5000))?;
        Ok(conn)
    }

    pub fn schema_version(&self) -> Result<i64> {
        let conn = self.conn()?;
        let version = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        Ok(version)
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < 1 {
        if !has_column(conn, "preparation", "pid")? {
            conn.execute_batch(r#"ALTER TABLE preparation ADD COLUMN pid VARCHAR DEFAULT """#)
                .context("adding preparation.pid")?;
        }
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub(crate) fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_migrates_once() {
        let dir = TempDir::new().expect("tempdir should be created");
        let path = dir.path().join("faultline.dat");
        let store = Store::open(&path).expect("store should open");
        assert_eq!(store.schema_version().expect("version"), SCHEMA_VERSION);

        // Reopening must not try to add the column again.
        let again = Store::open(&path).expect("store should reopen");
        let conn = again.conn().expect("connection");
        assert!(has_column(&conn, "preparation", "pid").expect("table_info"));
    }

    #[test]
    fn legacy_database_gains_pid_column() {
        let dir = TempDir::new().expect("tempdir should be created");
        let path = dir.path().join("legacy.dat");
        {
            let conn = Connection::open(&path).expect("open legacy");
            conn.execute_batch(SCHEMA).expect("legacy schema");
            assert!(!has_column(&conn, "preparation", "pid").expect("table_info"));
        }
        let store = Store::open(&path).expect("store should open");
        let conn = store.conn().expect("connection");
        assert!(has_column(&conn, "preparation", "pid").expect("table_info"));
    }

    #[test]
    fn limits_parse() {
        assert_eq!(
            Limit::parse("10").ok(),
            Some(Limit { offset: 0, count: 10 })
        );
        assert_eq!(
            Limit::parse("5, 20").ok(),
            Some(Limit { offset: 5, count: 20 })
        );
        assert!(Limit::parse("a,b").is_err());
        assert!(Limit::parse("-1").is_err());
    }
}
