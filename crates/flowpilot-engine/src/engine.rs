//! Process Execution Engine — walks subjects through their stage sequences.
//!
//! State machine per subject: states `1..=N+1` where N is the stage count
//! and N+1 is "completed". All stage mutation funnels through `advance` and
//! `override_stage` so the cancellation invariant holds; UI code never
//! touches `current_stage` directly.

use chrono::Utc;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

use flowpilot_core::{
    ActionExecutor, ActionStatus, ActionType, ClientProcessState, EntityStore, FlowError,
    LogStatus, Result, SubjectRef,
};
use flowpilot_process::{Direction, ProcessDefinition, TimingRule, resolve};

use crate::log::AutomationLog;
use crate::store::{ActionStore, ScheduledAction};

/// The execution engine. Holds the action store, the automation log, and
/// the two collaborator handles (entity platform + action dispatch).
pub struct ProcessEngine {
    store: Arc<ActionStore>,
    log: Arc<AutomationLog>,
    executor: Arc<dyn ActionExecutor>,
    entities: Arc<dyn EntityStore>,
}

impl ProcessEngine {
    pub fn new(
        store: Arc<ActionStore>,
        log: Arc<AutomationLog>,
        executor: Arc<dyn ActionExecutor>,
        entities: Arc<dyn EntityStore>,
    ) -> Self {
        Self { store, log, executor, entities }
    }

    pub fn store(&self) -> &Arc<ActionStore> {
        &self.store
    }

    pub fn log(&self) -> &Arc<AutomationLog> {
        &self.log
    }

    pub fn entities(&self) -> &Arc<dyn EntityStore> {
        &self.entities
    }

    // ─── Definition persistence ──────────────────────────────

    /// Upsert a process definition into the entity store.
    pub async fn save_definition(&self, def: &ProcessDefinition) -> Result<Value> {
        def.validate()?;
        let fields = serde_json::to_value(def)?;
        if self
            .entities
            .get("process_definition", &def.id)
            .await?
            .is_some()
        {
            self.entities
                .update("process_definition", &def.id, fields)
                .await
        } else {
            self.entities.create("process_definition", fields).await
        }
    }

    /// Load a tenant's definition by name. Stored stage JSON with an
    /// unrecognized timing tag decodes leniently as the one-day preset.
    pub async fn load_definition(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> Result<Option<ProcessDefinition>> {
        let mut predicate = HashMap::new();
        predicate.insert("tenant_id".to_string(), json!(tenant_id));
        predicate.insert("name".to_string(), json!(name));
        let rows = self
            .entities
            .filter("process_definition", predicate, None, Some(1))
            .await?;
        Ok(rows.into_iter().next().and_then(definition_from_value))
    }

    /// Delete a definition. Rejected while any client or lead still
    /// references it.
    pub async fn delete_definition(&self, def: &ProcessDefinition) -> Result<()> {
        let mut referencing = 0usize;
        for entity_type in ["client", "lead"] {
            let mut predicate = HashMap::new();
            predicate.insert("tenant_id".to_string(), json!(def.tenant_id));
            predicate.insert("process_type".to_string(), json!(def.name));
            referencing += self
                .entities
                .filter(entity_type, predicate, None, None)
                .await?
                .len();
        }
        if referencing > 0 {
            return Err(FlowError::validation(format!(
                "process '{}' is referenced by {referencing} subject(s)",
                def.name
            )));
        }
        self.entities.delete("process_definition", &def.id).await
    }

    // ─── Stage traversal ─────────────────────────────────────

    /// Attach a subject to a process at stage 1 and enter it.
    pub async fn start_process(
        &self,
        def: &ProcessDefinition,
        subject: &SubjectRef,
    ) -> Result<ScheduledAction> {
        self.entities
            .update(
                subject.entity_type(),
                subject.entity_id(),
                json!({"process_type": def.name, "current_stage": 1}),
            )
            .await?;
        self.enter_stage(def, subject, 1).await
    }

    /// Resolve the stage's timing and enqueue its action. Idempotent per
    /// stage: a duplicate call supersedes the prior pending action instead
    /// of duplicating it.
    pub async fn enter_stage(
        &self,
        def: &ProcessDefinition,
        subject: &SubjectRef,
        position: u32,
    ) -> Result<ScheduledAction> {
        let stage = def
            .stage_at(position)
            .ok_or_else(|| FlowError::not_found(format!("stage {position} of '{}'", def.name)))?;

        let now = Utc::now();
        let neighbor = match &stage.timing {
            TimingRule::Relative { direction: Direction::AfterPrevious, .. } => {
                match def.stage_at(position - 1) {
                    // The previous stage's trigger instant anchors the offset.
                    Some(prev) => self
                        .store
                        .latest_for_stage(subject, &prev.id)?
                        .map(|a| a.scheduled_time),
                    None => None,
                }
            }
            TimingRule::Relative { direction: Direction::BeforeNext, .. } => {
                let next = def.stage_at(position + 1).ok_or_else(|| {
                    FlowError::validation("before_next on the final stage")
                })?;
                // Validation guarantees the next stage is self-resolvable.
                Some(resolve(&next.timing, now, None)?)
            }
            _ => None,
        };
        let scheduled_time = resolve(&stage.timing, now, neighbor)?;

        let payload = json!({
            "process": def.name,
            "stage_name": stage.name,
            "stage_index": position,
            "tenant_id": subject.tenant_id,
            "entity_type": subject.entity_type(),
            "entity_id": subject.entity_id(),
            "params": stage.action.params,
        });
        let action = self.store.enqueue(
            subject,
            &stage.id,
            stage.action.action_type,
            payload,
            scheduled_time,
            stage.requires_approval,
        )?;
        tracing::info!(
            "📍 {} {} entered stage {position} '{}' → {} at {scheduled_time}",
            subject.entity_type(),
            subject.entity_id(),
            stage.name,
            stage.action.action_type.as_str(),
        );
        Ok(action)
    }

    /// The subject's process attachment: process name plus 1-based stage.
    /// Missing fields default to an unattached subject at stage 1.
    pub async fn process_state(&self, subject: &SubjectRef) -> Result<ClientProcessState> {
        let record = self
            .entities
            .get(subject.entity_type(), subject.entity_id())
            .await?
            .ok_or_else(|| {
                FlowError::not_found(format!(
                    "{}/{}",
                    subject.entity_type(),
                    subject.entity_id()
                ))
            })?;
        Ok(ClientProcessState {
            process_type: record
                .get("process_type")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            current_stage: record
                .get("current_stage")
                .and_then(|v| v.as_u64())
                .unwrap_or(1) as u32,
        })
    }

    /// Current 1-based position of a subject.
    pub async fn current_stage(&self, subject: &SubjectRef) -> Result<u32> {
        Ok(self.process_state(subject).await?.current_stage)
    }

    async fn set_current_stage(&self, subject: &SubjectRef, position: u32) -> Result<()> {
        self.entities
            .update(
                subject.entity_type(),
                subject.entity_id(),
                json!({"current_stage": position}),
            )
            .await?;
        Ok(())
    }

    /// Move one stage forward, clamped at N+1. A no-op once the process is
    /// completed; never decrements.
    pub async fn advance(&self, def: &ProcessDefinition, subject: &SubjectRef) -> Result<u32> {
        let stage_count = def.stage_count();
        let state = self.process_state(subject).await?;
        if state.is_completed(stage_count) {
            return Ok(state.current_stage);
        }
        let next = state.current_stage + 1;
        self.set_current_stage(subject, next).await?;
        if next <= stage_count {
            self.enter_stage(def, subject, next).await?;
        } else {
            tracing::info!(
                "🏁 {} {} completed process '{}'",
                subject.entity_type(),
                subject.entity_id(),
                def.name
            );
        }
        Ok(next)
    }

    /// Manual operator jump. The only path that may move a subject
    /// backwards. Cancels live actions for every stage bypassed between the
    /// old and new position, then enters the target stage.
    pub async fn override_stage(
        &self,
        def: &ProcessDefinition,
        subject: &SubjectRef,
        target: u32,
    ) -> Result<()> {
        let stage_count = def.stage_count();
        if target == 0 || target > stage_count + 1 {
            return Err(FlowError::validation(format!(
                "target stage {target} out of range 1..={}",
                stage_count + 1
            )));
        }
        let current = self.current_stage(subject).await?;
        let (low, high) = if target >= current {
            (current, target)
        } else {
            (target, current + 1)
        };
        for position in low..high {
            if let Some(stage) = def.stage_at(position) {
                self.store.cancel_for(subject, Some(&stage.id))?;
            }
        }
        self.set_current_stage(subject, target).await?;
        if target <= stage_count {
            self.enter_stage(def, subject, target).await?;
        }
        tracing::info!(
            "⏭️ {} {} overridden from stage {current} to {target}",
            subject.entity_type(),
            subject.entity_id()
        );
        Ok(())
    }

    /// Detach a subject: cancel every live action it owns.
    pub async fn remove_from_process(&self, subject: &SubjectRef) -> Result<usize> {
        let cancelled = self.store.cancel_for(subject, None)?;
        tracing::info!(
            "🗑️ {} {} removed from process, {cancelled} action(s) cancelled",
            subject.entity_type(),
            subject.entity_id()
        );
        Ok(cancelled)
    }

    // ─── Firing ──────────────────────────────────────────────

    /// Execute a due action. Safe under at-least-once delivery:
    /// - a re-fired terminal action exits without re-dispatching,
    /// - a stale action (subject has moved past its stage) is cancelled
    ///   with a warning, never executed,
    /// - a dispatch failure leaves the action pending for the next sweep
    ///   and records a failed log entry; the stage does not advance.
    pub async fn fire(&self, def: &ProcessDefinition, action: &ScheduledAction) -> Result<()> {
        let current = self
            .store
            .get(&action.id)?
            .ok_or_else(|| FlowError::not_found(format!("action {}", action.id)))?;
        if current.status != ActionStatus::Pending {
            tracing::debug!("skipping action {} in status {}", action.id, current.status.as_str());
            return Ok(());
        }

        let subject = action.subject();
        let position = def
            .stages
            .iter()
            .position(|s| s.id == action.stage_id)
            .map(|p| p as u32 + 1);
        let subject_stage = self.current_stage(&subject).await?;
        if position != Some(subject_stage) {
            self.store.mark_cancelled(&action.id)?;
            self.log_attempt(
                action,
                LogStatus::Warning,
                Some("stale action: subject is no longer in this stage"),
                None,
            )?;
            tracing::warn!(
                "⚠️ Stale action {} (stage {:?}, subject at {subject_stage}) cancelled",
                action.id,
                position
            );
            return Ok(());
        }

        match self.executor.dispatch(action.action_type, &action.payload).await {
            Ok(()) => {
                if !self.store.mark_executed(&action.id)? {
                    // A concurrent fire won the race; its side effects stand.
                    return Ok(());
                }
                self.log_attempt(action, LogStatus::Success, None, Some(&action.payload))?;
                if action.action_type == ActionType::AdvanceStage {
                    self.advance(def, &subject).await?;
                }
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                self.log_attempt(action, LogStatus::Failed, Some(&message), None)?;
                tracing::warn!(
                    "⚠️ Dispatch failed for action {} ({}): {message} — left pending for retry",
                    action.id,
                    action.action_type.as_str()
                );
                Ok(())
            }
        }
    }

    /// Release a held action and fire it. Approving an already-terminal
    /// action is a no-op.
    pub async fn approve(&self, action_id: &str) -> Result<()> {
        let action = self
            .store
            .get(action_id)?
            .ok_or_else(|| FlowError::not_found(format!("action {action_id}")))?;
        if action.status.is_terminal() {
            return Ok(());
        }
        self.store.release(action_id)?;
        let process_name = action.payload["process"].as_str().unwrap_or_default();
        let def = self
            .load_definition(&action.tenant_id, process_name)
            .await?
            .ok_or_else(|| FlowError::not_found(format!("process '{process_name}'")))?;
        self.fire(&def, &action).await
    }

    /// Reject a held action: cancel it. Idempotent.
    pub async fn reject(&self, action_id: &str) -> Result<bool> {
        self.store
            .get(action_id)?
            .ok_or_else(|| FlowError::not_found(format!("action {action_id}")))?;
        self.store.mark_cancelled(action_id)
    }

    // ─── Sweep entry point ───────────────────────────────────

    /// Fire every due pending action, oldest trigger first. One action's
    /// failure never aborts the rest of the batch.
    pub async fn sweep_once(&self, limit: usize) -> Result<usize> {
        let due = self.store.list_due(Utc::now(), limit)?;
        let total = due.len();
        for action in due {
            let process_name = action.payload["process"].as_str().unwrap_or_default();
            let def = match self.load_definition(&action.tenant_id, process_name).await {
                Ok(Some(def)) => def,
                Ok(None) => {
                    self.store.mark_cancelled(&action.id)?;
                    self.log_attempt(
                        &action,
                        LogStatus::Warning,
                        Some("process definition no longer exists"),
                        None,
                    )?;
                    continue;
                }
                Err(e) => {
                    tracing::warn!("⚠️ Definition load failed for action {}: {e}", action.id);
                    continue;
                }
            };
            if let Err(e) = self.fire(&def, &action).await {
                tracing::warn!("⚠️ Fire failed for action {}: {e}", action.id);
            }
        }
        Ok(total)
    }

    fn log_attempt(
        &self,
        action: &ScheduledAction,
        status: LogStatus,
        error_message: Option<&str>,
        details: Option<&Value>,
    ) -> Result<()> {
        let subject = action.subject();
        self.log.record(
            &action.tenant_id,
            subject.entity_type(),
            subject.entity_id(),
            action.payload["process"].as_str().unwrap_or_default(),
            action.payload["stage_name"].as_str().unwrap_or_default(),
            action.action_type.as_str(),
            status,
            error_message,
            details,
        )?;
        Ok(())
    }
}

/// Decode a stored definition, falling back to the lenient one-day preset
/// for stages whose timing tag is unrecognized.
fn definition_from_value(mut value: Value) -> Option<ProcessDefinition> {
    if let Ok(def) = serde_json::from_value::<ProcessDefinition>(value.clone()) {
        return Some(def);
    }
    if let Some(stages) = value.get_mut("stages").and_then(|s| s.as_array_mut()) {
        for stage in stages {
            let timing = TimingRule::from_value(stage.get("timing").unwrap_or(&Value::Null));
            stage["timing"] = serde_json::to_value(timing).ok()?;
        }
    }
    serde_json::from_value(value).ok()
}
