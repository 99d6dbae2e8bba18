//! Action executors.
//!
//! `ChannelExecutor` is the production implementation: message actions go
//! out through the configured provider senders, task/meeting/reminder
//! actions materialize as records on the entity platform.
//! `RecordingExecutor` is an in-memory stand-in for wiring tests.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use flowpilot_core::config::ChannelsConfig;
use flowpilot_core::{ActionExecutor, ActionType, EntityStore, FlowError, Result};

use crate::email::EmailSender;
use crate::sms::SmsSender;
use crate::whatsapp::WhatsAppSender;

/// Production executor backed by the provider senders.
pub struct ChannelExecutor {
    entities: Arc<dyn EntityStore>,
    whatsapp: WhatsAppSender,
    email: EmailSender,
    sms: SmsSender,
}

impl ChannelExecutor {
    pub fn new(config: ChannelsConfig, entities: Arc<dyn EntityStore>) -> Self {
        Self {
            entities,
            whatsapp: WhatsAppSender::new(config.whatsapp),
            email: EmailSender::new(config.email),
            sms: SmsSender::new(config.sms),
        }
    }

    /// Fetch the subject record named by an action payload.
    async fn subject_record(&self, payload: &Value) -> Result<Value> {
        let entity_type = payload["entity_type"]
            .as_str()
            .ok_or_else(|| FlowError::dispatch("payload missing entity_type"))?;
        let entity_id = payload["entity_id"]
            .as_str()
            .ok_or_else(|| FlowError::dispatch("payload missing entity_id"))?;
        self.entities
            .get(entity_type, entity_id)
            .await?
            .ok_or_else(|| FlowError::dispatch(format!("subject {entity_type}/{entity_id} not found")))
    }

    fn contact_field(record: &Value, field: &str) -> Result<String> {
        record
            .get(field)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| FlowError::dispatch(format!("subject has no {field} on record")))
    }

    /// Message body for send actions: an explicit `message` param wins,
    /// otherwise a generic line naming the stage.
    fn message_text(payload: &Value) -> String {
        if let Some(msg) = payload["params"]["message"].as_str() {
            return msg.to_string();
        }
        let stage = payload["stage_name"].as_str().unwrap_or("your process");
        format!("Update from {}: {stage}", payload["process"].as_str().unwrap_or("us"))
    }

    /// Create a record on the entity platform, stamped with tenant and
    /// subject linkage from the payload.
    async fn create_linked(&self, entity_type: &str, payload: &Value, extra: Value) -> Result<()> {
        let mut fields = json!({
            "tenant_id": payload["tenant_id"],
            "related_entity_type": payload["entity_type"],
            "related_entity_id": payload["entity_id"],
            "process": payload["process"],
            "stage_name": payload["stage_name"],
        });
        if let (Value::Object(target), Value::Object(source)) = (&mut fields, extra) {
            for (k, v) in source {
                target.insert(k, v);
            }
        }
        self.entities.create(entity_type, fields).await?;
        Ok(())
    }
}

#[async_trait]
impl ActionExecutor for ChannelExecutor {
    async fn create_task(&self, payload: &Value) -> Result<()> {
        let title = payload["params"]["title"]
            .as_str()
            .unwrap_or_else(|| payload["stage_name"].as_str().unwrap_or("Follow up"))
            .to_string();
        self.create_linked(
            "task",
            payload,
            json!({"title": title, "status": "open", "due_date": payload["params"]["due_date"]}),
        )
        .await
    }

    async fn create_meeting(&self, payload: &Value) -> Result<()> {
        let title = payload["params"]["title"]
            .as_str()
            .unwrap_or_else(|| payload["stage_name"].as_str().unwrap_or("Meeting"))
            .to_string();
        self.create_linked(
            "meeting",
            payload,
            json!({
                "title": title,
                "scheduled_at": payload["params"]["scheduled_at"],
                "duration_minutes": payload["params"]["duration_minutes"],
            }),
        )
        .await
    }

    async fn send_whatsapp(&self, payload: &Value) -> Result<()> {
        let record = self.subject_record(payload).await?;
        let phone = Self::contact_field(&record, "phone")?;
        self.whatsapp
            .send_text(&phone, &Self::message_text(payload))
            .await?;
        Ok(())
    }

    async fn send_email(&self, payload: &Value) -> Result<()> {
        let record = self.subject_record(payload).await?;
        let address = Self::contact_field(&record, "email")?;
        let subject = payload["params"]["subject"]
            .as_str()
            .unwrap_or_else(|| payload["stage_name"].as_str().unwrap_or("Update"))
            .to_string();
        self.email
            .send(&address, &subject, &Self::message_text(payload))
            .await
    }

    async fn send_sms(&self, payload: &Value) -> Result<()> {
        let record = self.subject_record(payload).await?;
        let phone = Self::contact_field(&record, "phone")?;
        self.sms
            .send_text(&phone, &Self::message_text(payload))
            .await?;
        Ok(())
    }

    /// Reminders go out on the subject's preferred channel: WhatsApp when a
    /// phone number is on file, email otherwise.
    async fn send_reminder(&self, payload: &Value) -> Result<()> {
        let record = self.subject_record(payload).await?;
        let text = Self::message_text(payload);
        if let Ok(phone) = Self::contact_field(&record, "phone") {
            self.whatsapp.send_text(&phone, &text).await?;
            return Ok(());
        }
        let address = Self::contact_field(&record, "email")
            .map_err(|_| FlowError::dispatch("subject has neither phone nor email on record"))?;
        let subject = payload["stage_name"].as_str().unwrap_or("Reminder");
        self.email.send(&address, subject, &text).await
    }
}

/// Test executor: records every dispatched call and can be told to fail
/// specific action types.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<(ActionType, Value)>>,
    failures: Mutex<HashMap<ActionType, String>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent dispatch of `action_type` fail with `message`.
    pub fn fail_on(&self, action_type: ActionType, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(action_type, message.to_string());
    }

    pub fn calls(&self) -> Vec<(ActionType, Value)> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, action_type: ActionType, payload: &Value) -> Result<()> {
        if let Some(message) = self.failures.lock().unwrap().get(&action_type) {
            return Err(FlowError::dispatch(message.clone()));
        }
        self.calls
            .lock()
            .unwrap()
            .push((action_type, payload.clone()));
        Ok(())
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn create_task(&self, payload: &Value) -> Result<()> {
        self.record(ActionType::CreateTask, payload)
    }
    async fn create_meeting(&self, payload: &Value) -> Result<()> {
        self.record(ActionType::CreateMeeting, payload)
    }
    async fn send_whatsapp(&self, payload: &Value) -> Result<()> {
        self.record(ActionType::SendWhatsapp, payload)
    }
    async fn send_email(&self, payload: &Value) -> Result<()> {
        self.record(ActionType::SendEmail, payload)
    }
    async fn send_sms(&self, payload: &Value) -> Result<()> {
        self.record(ActionType::SendSms, payload)
    }
    async fn send_reminder(&self, payload: &Value) -> Result<()> {
        self.record(ActionType::SendReminder, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowpilot_core::MemoryEntityStore;

    fn payload() -> Value {
        json!({
            "process": "sales",
            "stage_name": "Follow up",
            "stage_index": 2,
            "tenant_id": "t1",
            "entity_type": "client",
            "entity_id": "c1",
            "params": {"title": "Call Acme"},
        })
    }

    #[tokio::test]
    async fn test_create_task_materializes_linked_record() {
        let entities: Arc<dyn EntityStore> = Arc::new(MemoryEntityStore::new());
        let executor = ChannelExecutor::new(ChannelsConfig::default(), entities.clone());

        executor.create_task(&payload()).await.unwrap();

        let mut pred = HashMap::new();
        pred.insert("tenant_id".into(), json!("t1"));
        let tasks = entities.filter("task", pred, None, None).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0]["title"], "Call Acme");
        assert_eq!(tasks[0]["related_entity_id"], "c1");
        assert_eq!(tasks[0]["status"], "open");
    }

    #[tokio::test]
    async fn test_send_whatsapp_requires_subject_phone() {
        let entities: Arc<dyn EntityStore> = Arc::new(MemoryEntityStore::new());
        entities
            .create("client", json!({"id": "c1", "tenant_id": "t1", "name": "Acme"}))
            .await
            .unwrap();
        let executor = ChannelExecutor::new(ChannelsConfig::default(), entities);

        let err = executor.send_whatsapp(&payload()).await.unwrap_err();
        assert!(err.to_string().contains("phone"));
    }

    #[tokio::test]
    async fn test_recording_executor_injected_failure() {
        let executor = RecordingExecutor::new();
        executor.fail_on(ActionType::SendEmail, "boom");

        assert!(executor.send_email(&payload()).await.is_err());
        assert!(executor.send_whatsapp(&payload()).await.is_ok());
        assert_eq!(executor.calls().len(), 1);
        assert_eq!(executor.calls()[0].0, ActionType::SendWhatsapp);
    }

    #[tokio::test]
    async fn test_default_message_names_the_stage() {
        let text = ChannelExecutor::message_text(&json!({
            "process": "sales",
            "stage_name": "Follow up",
            "params": {},
        }));
        assert!(text.contains("Follow up"));
    }

    #[tokio::test]
    async fn test_dispatch_routes_advance_stage_as_noop() {
        let executor = RecordingExecutor::new();
        executor
            .dispatch(ActionType::AdvanceStage, &payload())
            .await
            .unwrap();
        assert!(executor.calls().is_empty());
    }
}
