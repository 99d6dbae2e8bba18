//! Append-only automation log.
//!
//! One row per execution attempt, written once and never mutated — there is
//! deliberately no update or delete API on this type. The monitoring UI
//! reads it through a tenant-scoped query sorted newest first.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

use flowpilot_core::{FlowError, LogStatus, Result};

/// One execution attempt's outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationLogEntry {
    pub id: i64,
    pub tenant_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub process_name: String,
    pub stage_name: String,
    pub action_type: String,
    pub status: LogStatus,
    pub error_message: Option<String>,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Append-only sink for execution outcomes.
pub struct AutomationLog {
    conn: Mutex<Connection>,
}

impl AutomationLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| FlowError::store(format!("open: {e}")))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS automation_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                process_name TEXT NOT NULL,
                stage_name TEXT NOT NULL,
                action_type TEXT NOT NULL,
                status TEXT NOT NULL,
                error_message TEXT,
                details TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_log_tenant
                ON automation_log (tenant_id, created_at);",
        )
        .map_err(|e| FlowError::store(format!("migration: {e}")))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Append one attempt record; returns the row id.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        tenant_id: &str,
        entity_type: &str,
        entity_id: &str,
        process_name: &str,
        stage_name: &str,
        action_type: &str,
        status: LogStatus,
        error_message: Option<&str>,
        details: Option<&serde_json::Value>,
    ) -> Result<i64> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| FlowError::store(format!("lock poisoned: {e}")))?;
        conn.execute(
            "INSERT INTO automation_log
             (tenant_id, entity_type, entity_id, process_name, stage_name,
              action_type, status, error_message, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                tenant_id,
                entity_type,
                entity_id,
                process_name,
                stage_name,
                action_type,
                status.as_str(),
                error_message,
                details.map(|d| d.to_string()),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| FlowError::store(format!("record: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    /// Tenant-scoped read, newest first, optionally filtered by status.
    pub fn query(
        &self,
        tenant_id: &str,
        status: Option<LogStatus>,
        limit: usize,
    ) -> Result<Vec<AutomationLogEntry>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| FlowError::store(format!("lock poisoned: {e}")))?;
        let mut sql = String::from(
            "SELECT id, tenant_id, entity_type, entity_id, process_name, stage_name,
                    action_type, status, error_message, details, created_at
             FROM automation_log WHERE tenant_id = ?1",
        );
        let mut args: Vec<String> = vec![tenant_id.to_string()];
        if let Some(s) = status {
            sql.push_str(" AND status = ?2");
            args.push(s.as_str().to_string());
        }
        sql.push_str(&format!(" ORDER BY created_at DESC, id DESC LIMIT ?{}", args.len() + 1));
        args.push(limit.to_string());

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| FlowError::store(format!("query: {e}")))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                let status: String = row.get(7)?;
                let details: Option<String> = row.get(9)?;
                let created_at: String = row.get(10)?;
                Ok(AutomationLogEntry {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    entity_type: row.get(2)?,
                    entity_id: row.get(3)?,
                    process_name: row.get(4)?,
                    stage_name: row.get(5)?,
                    action_type: row.get(6)?,
                    status: LogStatus::parse(&status).unwrap_or(LogStatus::Warning),
                    error_message: row.get(8)?,
                    details: details.and_then(|d| serde_json::from_str(&d).ok()),
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })
            .map_err(|e| FlowError::store(format!("query: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_log(name: &str) -> (AutomationLog, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("flowpilot-log-{name}"));
        std::fs::remove_dir_all(&dir).ok();
        let log = AutomationLog::open(&dir.join("log.db")).unwrap();
        (log, dir)
    }

    #[test]
    fn test_record_and_query_newest_first() {
        let (log, dir) = temp_log("basic");
        log.record("t1", "client", "c1", "sales", "Follow up", "send_email",
            LogStatus::Success, None, None)
            .unwrap();
        log.record("t1", "client", "c1", "sales", "Follow up", "send_email",
            LogStatus::Failed, Some("smtp timeout"), None)
            .unwrap();

        let entries = log.query("t1", None, 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, LogStatus::Failed);
        assert_eq!(entries[0].error_message.as_deref(), Some("smtp timeout"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_query_filters_by_status_and_tenant() {
        let (log, dir) = temp_log("filter");
        log.record("t1", "lead", "l1", "sales", "Intake", "create_task",
            LogStatus::Success, None, None)
            .unwrap();
        log.record("t1", "lead", "l1", "sales", "Intake", "create_task",
            LogStatus::Warning, Some("stale action"), None)
            .unwrap();
        log.record("t2", "lead", "l9", "sales", "Intake", "create_task",
            LogStatus::Success, None, None)
            .unwrap();

        let warnings = log.query("t1", Some(LogStatus::Warning), 10).unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(log.query("t2", None, 10).unwrap().len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }
}
