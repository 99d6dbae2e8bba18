//! Collaborator traits — the seams between the automation core and the
//! hosted entity platform / message providers.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::Result;
use crate::types::ActionType;

/// Generic typed entity storage (clients, leads, tasks, meetings, ...).
///
/// Records are JSON objects with at least an `id` field. Tenant scoping is
/// the caller's responsibility: every filter predicate passed down includes
/// a `tenant_id` entry, and the core never bypasses it.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Create a record; the returned value carries the assigned `id`.
    async fn create(&self, entity_type: &str, fields: Value) -> Result<Value>;

    /// Merge-update fields on an existing record, returning the new state.
    async fn update(&self, entity_type: &str, id: &str, fields: Value) -> Result<Value>;

    async fn delete(&self, entity_type: &str, id: &str) -> Result<()>;

    /// Mapping-based equality filter with an optional sort key (prefix `-`
    /// for descending) and limit.
    async fn filter(
        &self,
        entity_type: &str,
        predicate: HashMap<String, Value>,
        sort_key: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>>;

    /// Convenience: fetch a single record by id.
    async fn get(&self, entity_type: &str, id: &str) -> Result<Option<Value>> {
        let mut predicate = HashMap::new();
        predicate.insert("id".to_string(), Value::String(id.to_string()));
        let mut rows = self.filter(entity_type, predicate, None, Some(1)).await?;
        Ok(rows.pop())
    }
}

/// One handler per action type. Implementations talk to message providers
/// and the entity store; each call is best-effort and returns failure to the
/// engine, which logs it and leaves the scheduled action pending for retry.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn create_task(&self, payload: &Value) -> Result<()>;
    async fn create_meeting(&self, payload: &Value) -> Result<()>;
    async fn send_whatsapp(&self, payload: &Value) -> Result<()>;
    async fn send_email(&self, payload: &Value) -> Result<()>;
    async fn send_sms(&self, payload: &Value) -> Result<()>;
    async fn send_reminder(&self, payload: &Value) -> Result<()>;

    /// Route an action to its handler. `advance_stage` carries no external
    /// effect — the engine advances the subject itself after marking the
    /// action executed.
    async fn dispatch(&self, action_type: ActionType, payload: &Value) -> Result<()> {
        match action_type {
            ActionType::AdvanceStage => Ok(()),
            ActionType::CreateTask => self.create_task(payload).await,
            ActionType::CreateMeeting => self.create_meeting(payload).await,
            ActionType::SendWhatsapp => self.send_whatsapp(payload).await,
            ActionType::SendEmail => self.send_email(payload).await,
            ActionType::SendSms => self.send_sms(payload).await,
            ActionType::SendReminder => self.send_reminder(payload).await,
        }
    }
}
