// SPDX-License-Identifier: PMPL-1.0-or-later

use super::{now, Limit, Store};
use crate::flags;
use crate::types::{ExperimentStatus, Flags};
use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExperimentRecord {
    pub uid: String,
    pub command: String,
    pub sub_command: String,
    pub flag: String,
    pub status: String,
    pub error: String,
    pub create_time: String,
    pub update_time: String,
}

impl ExperimentRecord {
    pub fn new(uid: &str, command: &str, sub_command: &str, flag: &str) -> Self {
        let time = now();
        Self {
            uid: uid.to_string(),
            command: command.to_string(),
            sub_command: sub_command.to_string(),
            flag: flag.to_string(),
            status: ExperimentStatus::Created.as_str().to_string(),
            error: String::new(),
            create_time: time.clone(),
            update_time: time,
        }
    }

    pub fn status(&self) -> Option<ExperimentStatus> {
        ExperimentStatus::parse(&self.status)
    }

    /// Full command line as the operator typed it, minus the program name.
    pub fn command_line(&self) -> String {
        let mut line = format!("{} {}", self.command, self.sub_command);
        if !self.flag.is_empty() {
            line.push(' ');
            line.push_str(&self.flag);
        }
        line
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            uid: row.get("uid")?,
            command: row.get("command")?,
            sub_command: row.get::<_, Option<String>>("sub_command")?.unwrap_or_default(),
            flag: row.get::<_, Option<String>>("flag")?.unwrap_or_default(),
            status: row.get::<_, Option<String>>("status")?.unwrap_or_default(),
            error: row.get::<_, Option<String>>("error")?.unwrap_or_default(),
            create_time: row.get::<_, Option<String>>("create_time")?.unwrap_or_default(),
            update_time: row.get::<_, Option<String>>("update_time")?.unwrap_or_default(),
        })
    }
}

/// Listing filter; empty fields do not constrain the query.
#[derive(Debug, Clone, Default)]
pub struct ExperimentFilter {
    pub target: Option<String>,
    pub action: Option<String>,
    pub flag: Option<String>,
    pub status: Option<ExperimentStatus>,
    pub limit: Option<Limit>,
    pub asc: bool,
}

const COLUMNS: &str =
    "uid, command, sub_command, flag, status, error, create_time, update_time";

impl Store {
    pub fn insert_experiment(&self, record: &ExperimentRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO experiment (uid, command, sub_command, flag, status, error, create_time, update_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.uid,
                record.command,
                record.sub_command,
                record.flag,
                record.status,
                record.error,
                record.create_time,
                record.update_time
            ],
        )
        .with_context(|| format!("inserting experiment {}", record.uid))?;
        Ok(())
    }

    pub fn update_experiment_status(
        &self,
        uid: &str,
        status: ExperimentStatus,
        error: &str,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE experiment SET status = ?1, error = ?2, update_time = ?3 WHERE uid = ?4",
            params![status.as_str(), error, now(), uid],
        )
        .with_context(|| format!("updating experiment {}", uid))?;
        Ok(())
    }

    pub fn experiment(&self, uid: &str) -> Result<Option<ExperimentRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!("SELECT {} FROM experiment WHERE uid = ?1", COLUMNS),
                params![uid],
                ExperimentRecord::from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn has_experiment(&self, uid: &str) -> Result<bool> {
        Ok(self.experiment(uid)?.is_some())
    }

    pub fn list_experiments(&self, filter: &ExperimentFilter) -> Result<Vec<ExperimentRecord>> {
        let mut sql = format!("SELECT {} FROM experiment WHERE 1=1", COLUMNS);
        let mut args: Vec<Value> = Vec::new();
        if let Some(target) = filter.target.as_deref().filter(|t| !t.is_empty()) {
            args.push(Value::from(target.to_string()));
            sql.push_str(&format!(" AND command = ?{}", args.len()));
        }
        if let Some(action) = filter.action.as_deref().filter(|a| !a.is_empty()) {
            args.push(Value::from(action.to_string()));
            let idx = args.len();
            sql.push_str(&format!(
                " AND (sub_command = ?{idx} OR sub_command LIKE '% ' || ?{idx})"
            ));
        }
        if let Some(flag) = filter.flag.as_deref().filter(|f| !f.is_empty()) {
            args.push(Value::from(format!("%{}%", flag)));
            sql.push_str(&format!(" AND flag LIKE ?{}", args.len()));
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
        let rows = stmt.query_map(params_from_iter(args), ExperimentRecord::from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Successful experiments of one command whose flags include every given pair.
    pub fn experiments_by_command(
        &self,
        command: &str,
        sub_command: &str,
        wanted: &Flags,
    ) -> Result<Vec<ExperimentRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM experiment WHERE command = ?1 AND sub_command = ?2 AND status = ?3 ORDER BY id",
            COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![command, sub_command, ExperimentStatus::Success.as_str()],
            ExperimentRecord::from_row,
        )?;
        let mut records = Vec::new();
        for row in rows {
            let record = row?;
            let stored = flags::decode(&record.flag);
            let matches = wanted
                .iter()
                .filter(|(_, value)| !value.is_empty())
                .all(|(key, value)| stored.get(key) == Some(value));
            if matches {
                records.push(record);
            }
        }
        Ok(records)
    }
}
