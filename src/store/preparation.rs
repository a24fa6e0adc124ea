// SPDX-License-Identifier: PMPL-1.0-or-later

use super::{now, Limit, Store};
use crate::types::PreparationStatus;
use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreparationRecord {
    pub uid: String,
    pub program_type: String,
    pub process: String,
    pub port: String,
    pub pid: String,
    pub status: String,
    pub error: String,
    pub create_time: String,
    pub update_time: String,
}

impl PreparationRecord {
    pub fn new(uid: &str, program_type: &str, process: &str, port: &str, pid: &str) -> Self {
        let time = now();
        Self {
            uid: uid.to_string(),
            program_type: program_type.to_string(),
            process: process.to_string(),
            port: port.to_string(),
            pid: pid.to_string(),
            status: PreparationStatus::Created.as_str().to_string(),
            error: String::new(),
            create_time: time.clone(),
            update_time: time,
        }
    }

    pub fn status(&self) -> Option<PreparationStatus> {
        PreparationStatus::parse(&self.status)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let text = |name: &str| -> rusqlite::Result<String> {
            Ok(row.get::<_, Option<String>>(name)?.unwrap_or_default())
        };
        Ok(Self {
            uid: text("uid")?,
            program_type: text("program_type")?,
            process: text("process")?,
            port: text("port")?,
            pid: text("pid")?,
            status: text("status")?,
            error: text("error")?,
            create_time: text("create_time")?,
            update_time: text("update_time")?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct PreparationFilter {
    pub program_type: Option<String>,
    pub status: Option<PreparationStatus>,
    pub limit: Option<Limit>,
    pub asc: bool,
}

const COLUMNS: &str =
    "uid, program_type, process, port, pid, status, error, create_time, update_time";

impl Store {
    pub fn insert_preparation(&self, record: &PreparationRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO preparation (uid, program_type, process, port, pid, status, error, create_time, update_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.uid,
                record.program_type,
                record.process,
                record.port,
                record.pid,
                record.status,
                record.error,
                record.create_time,
                record.update_time
            ],
        )
        .with_context(|| format!("inserting preparation {}", record.uid))?;
        Ok(())
    }

    pub fn preparation(&self, uid: &str) -> Result<Option<PreparationRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!("SELECT {} FROM preparation WHERE uid = ?1", COLUMNS),
                params![uid],
                PreparationRecord::from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Latest `Running` record of a type, narrowed by process name and/or pid.
    pub fn running_preparation(
        &self,
        program_type: &str,
        process: &str,
        pid: &str,
    ) -> Result<Option<PreparationRecord>> {
        let mut sql = format!(
            "SELECT {} FROM preparation WHERE program_type = ?1 AND status = ?2",
            COLUMNS
        );
        let mut args: Vec<Value> = vec![
            Value::from(program_type.to_string()),
            Value::from(PreparationStatus::Running.as_str().to_string()),
        ];
        if !process.is_empty() {
            args.push(Value::from(process.to_string()));
            sql.push_str(&format!(" AND process = ?{}", args.len()));
        }
        if !pid.is_empty() {
            args.push(Value::from(pid.to_string()));
            sql.push_str(&format!(" AND pid = ?{}", args.len()));
        }
        sql.push_str(" ORDER BY id DESC LIMIT 1");

        let conn = self.conn()?;
        let record = conn
            .query_row(&sql, params_from_iter(args), PreparationRecord::from_row)
            .optional()?;
        Ok(record)
    }

    pub fn update_preparation_status(
        &self,
        uid: &str,
        status: PreparationStatus,
        error: &str,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE preparation SET status = ?1, error = ?2, update_time = ?3 WHERE uid = ?4",
            params![status.as_str(), error, now(), uid],
        )
        .with_context(|| format!("updating preparation {}", uid))?;
        Ok(())
    }

    /// Records where an attached agent listens and which process it lives in.
    pub fn update_preparation_agent(&self, uid: &str, port: &str, pid: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE preparation SET port = ?1, pid = ?2, update_time = ?3 WHERE uid = ?4",
            params![port, pid, now(), uid],
        )
        .with_context(|| format!("updating preparation {}", uid))?;
        Ok(())
    }

    pub fn list_preparations(&self, filter: &PreparationFilter) -> Result<Vec<PreparationRecord>> {
        let mut sql = format!("SELECT {} FROM preparation WHERE 1=1", COLUMNS);
        let mut args: Vec<Value> = Vec::new();
        if let Some(program_type) = filter.program_type.as_deref().filter(|t| !t.is_empty()) {
            args.push(Value::from(program_type.to_string()));
            sql.push_str(&format!(" AND program_type = ?{}", args.len()));
        }
        if let Some(status) = filter.status {
            args.push(Value::from(status.as_str().to_string()));
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        sql.push_str(if filter.asc {
            " ORDER BY id ASC"
        } else {
            " ORDER BY id DESC"
        });
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {} OFFSET {}", limit.count, limit.offset));
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), PreparationRecord::from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn running_lookup_by_process_or_pid() {
        let dir = TempDir::new().expect("tempdir should be created");
        let store = Store::open(&dir.path().join("faultline.dat")).expect("store should open");

        let record = PreparationRecord::new("j1", "jvm", "order-service", "", "");
        store.insert_preparation(&record).expect("insert");
        assert!(store
            .running_preparation("jvm", "order-service", "")
            .expect("query")
            .is_none());

        store
            .update_preparation_agent("j1", "31337", "4242")
            .expect("agent update");
        store
            .update_preparation_status("j1", PreparationStatus::Running, "")
            .expect("status update");

        let by_name = store
            .running_preparation("jvm", "order-service", "")
            .expect("query")
            .expect("running record");
        assert_eq!(by_name.port, "31337");
        let by_pid = store
            .running_preparation("jvm", "", "4242")
            .expect("query")
            .expect("running record");
        assert_eq!(by_pid.uid, "j1");
        assert!(store
            .running_preparation("cplus", "", "4242")
            .expect("query")
            .is_none());
    }

    #[test]
    fn list_by_status() {
        let dir = TempDir::new().expect("tempdir should be created");
        let store = Store::open(&dir.path().join("faultline.dat")).expect("store should open");
        for uid in ["a", "b"] {
            store
                .insert_preparation(&PreparationRecord::new(uid, "cplus", "", "8703", ""))
                .expect("insert");
        }
        store
            .update_preparation_status("b", PreparationStatus::Revoked, "")
            .expect("update");
        let revoked = store
            .list_preparations(&PreparationFilter {
                status: Some(PreparationStatus::Revoked),
                ..Default::default()
            })
            .expect("list");
        assert_eq!(revoked.len(), 1);
        assert_eq!(revoked[0].uid, "b");
    }
}
