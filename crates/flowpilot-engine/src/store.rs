//! SQLite-backed scheduled action store.
//!
//! The single shared mutable resource of the engine. All mutation goes
//! through `enqueue` / `cancel_for` / `mark_*`, each scoped to tenant and
//! subject. The at-most-one-live-action-per-(subject, stage, action_type)
//! invariant is enforced here with an atomic supersede-then-insert inside
//! one transaction.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

use flowpilot_core::{ActionStatus, ActionType, FlowError, Result, SubjectRef};

/// A pending, held, executed, or cancelled action record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledAction {
    pub id: String,
    pub tenant_id: String,
    pub client_id: Option<String>,
    pub lead_id: Option<String>,
    pub stage_id: String,
    pub action_type: ActionType,
    pub scheduled_time: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub status: ActionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledAction {
    /// The subject this action belongs to.
    pub fn subject(&self) -> SubjectRef {
        SubjectRef {
            tenant_id: self.tenant_id.clone(),
            client_id: self.client_id.clone(),
            lead_id: self.lead_id.clone(),
        }
    }
}

/// Durable queue of scheduled actions.
pub struct ActionStore {
    conn: Mutex<Connection>,
}

impl ActionStore {
    /// Open or create the action database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| FlowError::store(format!("open: {e}")))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS scheduled_actions (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                client_id TEXT,
                lead_id TEXT,
                stage_id TEXT NOT NULL,
                action_type TEXT NOT NULL,
                scheduled_time TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_actions_due
                ON scheduled_actions (status, scheduled_time);
            CREATE INDEX IF NOT EXISTS idx_actions_subject
                ON scheduled_actions (tenant_id, client_id, lead_id, stage_id);",
        )
        .map_err(|e| FlowError::store(format!("migration: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| FlowError::store(format!("lock poisoned: {e}")))
    }

    /// Persist a new record. Any live record for the same subject + stage +
    /// action_type is cancelled in the same transaction (supersede), so two
    /// concurrent enqueues leave exactly one live action behind.
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue(
        &self,
        subject: &SubjectRef,
        stage_id: &str,
        action_type: ActionType,
        payload: serde_json::Value,
        scheduled_time: DateTime<Utc>,
        awaiting_approval: bool,
    ) -> Result<ScheduledAction> {
        let now = Utc::now();
        let action = ScheduledAction {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: subject.tenant_id.clone(),
            client_id: subject.client_id.clone(),
            lead_id: subject.lead_id.clone(),
            stage_id: stage_id.to_string(),
            action_type,
            scheduled_time,
            payload,
            status: if awaiting_approval {
                ActionStatus::AwaitingApproval
            } else {
                ActionStatus::Pending
            },
            created_at: now,
            updated_at: now,
        };

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| FlowError::store(format!("begin: {e}")))?;
        tx.execute(
            "UPDATE scheduled_actions
             SET status = 'cancelled', updated_at = ?1
             WHERE tenant_id = ?2
               AND COALESCE(client_id, '') = COALESCE(?3, '')
               AND COALESCE(lead_id, '') = COALESCE(?4, '')
               AND stage_id = ?5 AND action_type = ?6
               AND status IN ('pending', 'awaiting_approval')",
            params![
                now.to_rfc3339(),
                action.tenant_id,
                action.client_id,
                action.lead_id,
                action.stage_id,
                action.action_type.as_str(),
            ],
        )
        .map_err(|e| FlowError::store(format!("supersede: {e}")))?;
        tx.execute(
            "INSERT INTO scheduled_actions
             (id, tenant_id, client_id, lead_id, stage_id, action_type,
              scheduled_time, payload, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                action.id,
                action.tenant_id,
                action.client_id,
                action.lead_id,
                action.stage_id,
                action.action_type.as_str(),
                action.scheduled_time.to_rfc3339(),
                action.payload.to_string(),
                action.status.as_str(),
                action.created_at.to_rfc3339(),
                action.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| FlowError::store(format!("insert: {e}")))?;
        tx.commit()
            .map_err(|e| FlowError::store(format!("commit: {e}")))?;

        tracing::debug!(
            "📥 Enqueued {} for {} stage {} at {}",
            action.action_type.as_str(),
            subject.entity_id(),
            stage_id,
            scheduled_time
        );
        Ok(action)
    }

    /// Bulk-cancel live records for a subject, optionally narrowed to one
    /// stage. Returns the number of records cancelled.
    pub fn cancel_for(&self, subject: &SubjectRef, stage_id: Option<&str>) -> Result<usize> {
        let conn = self.lock()?;
        let mut sql = String::from(
            "UPDATE scheduled_actions
             SET status = 'cancelled', updated_at = ?1
             WHERE tenant_id = ?2
               AND COALESCE(client_id, '') = COALESCE(?3, '')
               AND COALESCE(lead_id, '') = COALESCE(?4, '')
               AND status IN ('pending', 'awaiting_approval')",
        );
        if stage_id.is_some() {
            sql.push_str(" AND stage_id = ?5");
        }
        let now = Utc::now().to_rfc3339();
        let count = if let Some(stage) = stage_id {
            conn.execute(
                &sql,
                params![now, subject.tenant_id, subject.client_id, subject.lead_id, stage],
            )
        } else {
            conn.execute(
                &sql,
                params![now, subject.tenant_id, subject.client_id, subject.lead_id],
            )
        }
        .map_err(|e| FlowError::store(format!("cancel_for: {e}")))?;
        Ok(count)
    }

    /// Pending records for a tenant, ordered by scheduled_time ascending.
    pub fn list_pending(
        &self,
        tenant_id: &str,
        subject: Option<&SubjectRef>,
        due_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<ScheduledAction>> {
        let conn = self.lock()?;
        let mut sql = String::from(
            "SELECT id, tenant_id, client_id, lead_id, stage_id, action_type,
                    scheduled_time, payload, status, created_at, updated_at
             FROM scheduled_actions
             WHERE tenant_id = ?1 AND status = 'pending'",
        );
        let mut args: Vec<String> = vec![tenant_id.to_string()];
        if let Some(s) = subject {
            sql.push_str(&format!(
                " AND COALESCE(client_id, '') = ?{} AND COALESCE(lead_id, '') = ?{}",
                args.len() + 1,
                args.len() + 2
            ));
            args.push(s.client_id.clone().unwrap_or_default());
            args.push(s.lead_id.clone().unwrap_or_default());
        }
        if let Some(t) = due_before {
            sql.push_str(&format!(" AND scheduled_time <= ?{}", args.len() + 1));
            args.push(t.to_rfc3339());
        }
        sql.push_str(" ORDER BY scheduled_time ASC");

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| FlowError::store(format!("list_pending: {e}")))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), row_to_action)
            .map_err(|e| FlowError::store(format!("list_pending: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Due pending records across all tenants, oldest trigger first. The
    /// sweep's work queue.
    pub fn list_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledAction>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, tenant_id, client_id, lead_id, stage_id, action_type,
                        scheduled_time, payload, status, created_at, updated_at
                 FROM scheduled_actions
                 WHERE status = 'pending' AND scheduled_time <= ?1
                 ORDER BY scheduled_time ASC
                 LIMIT ?2",
            )
            .map_err(|e| FlowError::store(format!("list_due: {e}")))?;
        let rows = stmt
            .query_map(params![now.to_rfc3339(), limit as i64], row_to_action)
            .map_err(|e| FlowError::store(format!("list_due: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Records held for manual review in a tenant.
    pub fn awaiting_approval(&self, tenant_id: &str) -> Result<Vec<ScheduledAction>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, tenant_id, client_id, lead_id, stage_id, action_type,
                        scheduled_time, payload, status, created_at, updated_at
                 FROM scheduled_actions
                 WHERE tenant_id = ?1 AND status = 'awaiting_approval'
                 ORDER BY scheduled_time ASC",
            )
            .map_err(|e| FlowError::store(format!("awaiting_approval: {e}")))?;
        let rows = stmt
            .query_map(params![tenant_id], row_to_action)
            .map_err(|e| FlowError::store(format!("awaiting_approval: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Live (pending or held) records for one subject + stage.
    pub fn live_for_stage(
        &self,
        subject: &SubjectRef,
        stage_id: &str,
    ) -> Result<Vec<ScheduledAction>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, tenant_id, client_id, lead_id, stage_id, action_type,
                        scheduled_time, payload, status, created_at, updated_at
                 FROM scheduled_actions
                 WHERE tenant_id = ?1
                   AND COALESCE(client_id, '') = COALESCE(?2, '')
                   AND COALESCE(lead_id, '') = COALESCE(?3, '')
                   AND stage_id = ?4
                   AND status IN ('pending', 'awaiting_approval')",
            )
            .map_err(|e| FlowError::store(format!("live_for_stage: {e}")))?;
        let rows = stmt
            .query_map(
                params![subject.tenant_id, subject.client_id, subject.lead_id, stage_id],
                row_to_action,
            )
            .map_err(|e| FlowError::store(format!("live_for_stage: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Most recent record for one subject + stage, any status. Used as the
    /// previous-stage trigger instant for neighbor-relative timing.
    pub fn latest_for_stage(
        &self,
        subject: &SubjectRef,
        stage_id: &str,
    ) -> Result<Option<ScheduledAction>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, tenant_id, client_id, lead_id, stage_id, action_type,
                        scheduled_time, payload, status, created_at, updated_at
                 FROM scheduled_actions
                 WHERE tenant_id = ?1
                   AND COALESCE(client_id, '') = COALESCE(?2, '')
                   AND COALESCE(lead_id, '') = COALESCE(?3, '')
                   AND stage_id = ?4
                 ORDER BY created_at DESC
                 LIMIT 1",
            )
            .map_err(|e| FlowError::store(format!("latest_for_stage: {e}")))?;
        let mut rows = stmt
            .query_map(
                params![subject.tenant_id, subject.client_id, subject.lead_id, stage_id],
                row_to_action,
            )
            .map_err(|e| FlowError::store(format!("latest_for_stage: {e}")))?;
        Ok(rows.next().and_then(|r| r.ok()))
    }

    pub fn get(&self, id: &str) -> Result<Option<ScheduledAction>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, tenant_id, client_id, lead_id, stage_id, action_type,
                        scheduled_time, payload, status, created_at, updated_at
                 FROM scheduled_actions WHERE id = ?1",
            )
            .map_err(|e| FlowError::store(format!("get: {e}")))?;
        let mut rows = stmt
            .query_map(params![id], row_to_action)
            .map_err(|e| FlowError::store(format!("get: {e}")))?;
        Ok(rows.next().and_then(|r| r.ok()))
    }

    /// Flip a live record to executed. Returns false (a no-op, not an
    /// error) when the record is already terminal — the guard against
    /// duplicate side effects from concurrent fires.
    pub fn mark_executed(&self, id: &str) -> Result<bool> {
        self.finish(id, ActionStatus::Executed)
    }

    /// Flip a live record to cancelled; no-op on terminal records.
    pub fn mark_cancelled(&self, id: &str) -> Result<bool> {
        self.finish(id, ActionStatus::Cancelled)
    }

    /// Release a held record into the pending queue. Returns false when the
    /// record is not awaiting approval.
    pub fn release(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let count = conn
            .execute(
                "UPDATE scheduled_actions SET status = 'pending', updated_at = ?1
                 WHERE id = ?2 AND status = 'awaiting_approval'",
                params![Utc::now().to_rfc3339(), id],
            )
            .map_err(|e| FlowError::store(format!("release: {e}")))?;
        Ok(count > 0)
    }

    fn finish(&self, id: &str, status: ActionStatus) -> Result<bool> {
        let conn = self.lock()?;
        let count = conn
            .execute(
                "UPDATE scheduled_actions SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND status IN ('pending', 'awaiting_approval')",
                params![status.as_str(), Utc::now().to_rfc3339(), id],
            )
            .map_err(|e| FlowError::store(format!("finish: {e}")))?;
        Ok(count > 0)
    }
}

fn row_to_action(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledAction> {
    let action_type: String = row.get(5)?;
    let scheduled_time: String = row.get(6)?;
    let payload: String = row.get(7)?;
    let status: String = row.get(8)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;
    Ok(ScheduledAction {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        client_id: row.get(2)?,
        lead_id: row.get(3)?,
        stage_id: row.get(4)?,
        action_type: ActionType::parse(&action_type).unwrap_or(ActionType::CreateTask),
        scheduled_time: parse_instant(&scheduled_time),
        payload: serde_json::from_str(&payload).unwrap_or_default(),
        status: ActionStatus::parse(&status).unwrap_or(ActionStatus::Cancelled),
        created_at: parse_instant(&created_at),
        updated_at: parse_instant(&updated_at),
    })
}

fn parse_instant(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn temp_store(name: &str) -> (ActionStore, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("flowpilot-store-{name}"));
        std::fs::remove_dir_all(&dir).ok();
        let store = ActionStore::open(&dir.join("actions.db")).unwrap();
        (store, dir)
    }

    fn subject() -> SubjectRef {
        SubjectRef::client("t1", "c1")
    }

    #[test]
    fn test_enqueue_supersedes_prior_live_record() {
        let (store, dir) = temp_store("supersede");
        let now = Utc::now();

        let first = store
            .enqueue(&subject(), "s2", ActionType::SendEmail, serde_json::json!({}), now, false)
            .unwrap();
        let second = store
            .enqueue(&subject(), "s2", ActionType::SendEmail, serde_json::json!({}), now, false)
            .unwrap();

        let live = store.live_for_stage(&subject(), "s2").unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, second.id);
        assert_eq!(store.get(&first.id).unwrap().unwrap().status, ActionStatus::Cancelled);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_supersede_is_scoped_to_action_type_and_subject() {
        let (store, dir) = temp_store("scope");
        let now = Utc::now();
        store
            .enqueue(&subject(), "s2", ActionType::SendEmail, serde_json::json!({}), now, false)
            .unwrap();
        store
            .enqueue(&subject(), "s2", ActionType::CreateTask, serde_json::json!({}), now, false)
            .unwrap();
        let other = SubjectRef::lead("t1", "l1");
        store
            .enqueue(&other, "s2", ActionType::SendEmail, serde_json::json!({}), now, false)
            .unwrap();

        assert_eq!(store.live_for_stage(&subject(), "s2").unwrap().len(), 2);
        assert_eq!(store.live_for_stage(&other, "s2").unwrap().len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_mark_executed_is_idempotent() {
        let (store, dir) = temp_store("exec");
        let a = store
            .enqueue(&subject(), "s1", ActionType::CreateTask, serde_json::json!({}), Utc::now(), false)
            .unwrap();

        assert!(store.mark_executed(&a.id).unwrap());
        assert!(!store.mark_executed(&a.id).unwrap()); // second call: no-op
        assert!(!store.mark_cancelled(&a.id).unwrap()); // no way out of terminal
        assert_eq!(store.get(&a.id).unwrap().unwrap().status, ActionStatus::Executed);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_cancel_for_counts_live_records() {
        let (store, dir) = temp_store("cancel");
        let now = Utc::now();
        store
            .enqueue(&subject(), "s2", ActionType::SendSms, serde_json::json!({}), now, false)
            .unwrap();
        store
            .enqueue(&subject(), "s3", ActionType::SendEmail, serde_json::json!({}), now, true)
            .unwrap();

        assert_eq!(store.cancel_for(&subject(), None).unwrap(), 2);
        assert_eq!(store.cancel_for(&subject(), None).unwrap(), 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_list_pending_ordered_by_trigger_instant() {
        let (store, dir) = temp_store("order");
        let now = Utc::now();
        store
            .enqueue(&subject(), "s3", ActionType::SendEmail, serde_json::json!({}), now + Duration::hours(2), false)
            .unwrap();
        store
            .enqueue(&subject(), "s2", ActionType::SendSms, serde_json::json!({}), now + Duration::hours(1), false)
            .unwrap();

        let pending = store.list_pending("t1", None, None).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].stage_id, "s2");
        assert!(pending[0].scheduled_time <= pending[1].scheduled_time);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_list_due_skips_future_and_held() {
        let (store, dir) = temp_store("due");
        let now = Utc::now();
        store
            .enqueue(&subject(), "s2", ActionType::SendSms, serde_json::json!({}), now - Duration::minutes(5), false)
            .unwrap();
        store
            .enqueue(&subject(), "s3", ActionType::SendEmail, serde_json::json!({}), now + Duration::hours(1), false)
            .unwrap();
        store
            .enqueue(&subject(), "s4", ActionType::CreateTask, serde_json::json!({}), now - Duration::minutes(5), true)
            .unwrap();

        let due = store.list_due(now, 100).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].stage_id, "s2");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_release_held_record() {
        let (store, dir) = temp_store("release");
        let a = store
            .enqueue(&subject(), "s2", ActionType::SendEmail, serde_json::json!({}), Utc::now(), true)
            .unwrap();
        assert_eq!(store.awaiting_approval("t1").unwrap().len(), 1);

        assert!(store.release(&a.id).unwrap());
        assert!(!store.release(&a.id).unwrap()); // already pending
        assert_eq!(store.get(&a.id).unwrap().unwrap().status, ActionStatus::Pending);
        std::fs::remove_dir_all(&dir).ok();
    }
}
