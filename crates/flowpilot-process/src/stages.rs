//! Stage sequences — the user-authored process definitions.

use flowpilot_core::{ActionType, FlowError, Result};
use serde::{Deserialize, Serialize};

use crate::timing::{Direction, TimingRule};

/// What kind of work a stage represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageCategory {
    NewLead,
    Meeting,
    Messaging,
    DocumentExchange,
    PriceQuote,
    PhoneCall,
    DealClosure,
}

impl StageCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewLead => "new_lead",
            Self::Meeting => "meeting",
            Self::Messaging => "messaging",
            Self::DocumentExchange => "document_exchange",
            Self::PriceQuote => "price_quote",
            Self::PhoneCall => "phone_call",
            Self::DealClosure => "deal_closure",
        }
    }
}

/// Whether the client-facing portal may see this stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Internal,
    External,
}

/// The action a stage schedules, with its opaque payload template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub action_type: ActionType,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl ActionSpec {
    pub fn new(action_type: ActionType) -> Self {
        Self { action_type, params: serde_json::Value::Null }
    }

    pub fn with_params(action_type: ActionType, params: serde_json::Value) -> Self {
        Self { action_type, params }
    }
}

/// One node in a process's ordered stage sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: StageCategory,
    pub timing: TimingRule,
    pub action: ActionSpec,
    #[serde(default)]
    pub requires_approval: bool,
    pub visibility: Visibility,
}

impl StageDefinition {
    pub fn new(name: &str, category: StageCategory, timing: TimingRule, action: ActionSpec) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: String::new(),
            category,
            timing,
            action,
            requires_approval: false,
            visibility: Visibility::Internal,
        }
    }

    pub fn external(mut self) -> Self {
        self.visibility = Visibility::External;
        self
    }

    pub fn with_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }
}

/// An ordered stage sequence owned by a tenant.
///
/// Invariant: the first stage is always `new_lead` and the last is always
/// `deal_closure`; neither can be removed or reordered away. Every edit
/// operation re-validates the whole sequence before committing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDefinition {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub stages: Vec<StageDefinition>,
}

fn default_active() -> bool {
    true
}

impl ProcessDefinition {
    /// Build a definition from a full stage sequence, validating it.
    pub fn new(tenant_id: &str, name: &str, stages: Vec<StageDefinition>) -> Result<Self> {
        let def = Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            is_active: true,
            stages,
        };
        def.validate()?;
        Ok(def)
    }

    /// Minimal two-stage skeleton the builder starts from.
    pub fn scaffold(tenant_id: &str, name: &str) -> Self {
        let intake = StageDefinition::new(
            "Lead intake",
            StageCategory::NewLead,
            TimingRule::Immediate,
            ActionSpec::with_params(
                ActionType::CreateTask,
                serde_json::json!({"title": "Qualify new lead"}),
            ),
        );
        let closure = StageDefinition::new(
            "Deal closure",
            StageCategory::DealClosure,
            TimingRule::Immediate,
            ActionSpec::with_params(
                ActionType::CreateTask,
                serde_json::json!({"title": "Close the deal"}),
            ),
        );
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            is_active: true,
            stages: vec![intake, closure],
        }
    }

    pub fn stage_count(&self) -> u32 {
        self.stages.len() as u32
    }

    /// Stage at a 1-based position.
    pub fn stage_at(&self, position: u32) -> Option<&StageDefinition> {
        if position == 0 {
            return None;
        }
        self.stages.get(position as usize - 1)
    }

    /// The stages the client-facing portal may see. Internal stages, and
    /// anything that happens in them, never cross this projection.
    pub fn portal_stages(&self) -> Vec<&StageDefinition> {
        self.stages
            .iter()
            .filter(|s| s.visibility == Visibility::External)
            .collect()
    }

    /// Validate the whole sequence: endpoint categories, delay amounts,
    /// and neighbor-relative cycles.
    pub fn validate(&self) -> Result<()> {
        if self.stages.len() < 2 {
            return Err(FlowError::validation(
                "a process needs at least an intake and a closure stage",
            ));
        }
        if self.stages.first().map(|s| s.category) != Some(StageCategory::NewLead) {
            return Err(FlowError::validation("first stage must be new_lead"));
        }
        if self.stages.last().map(|s| s.category) != Some(StageCategory::DealClosure) {
            return Err(FlowError::validation("last stage must be deal_closure"));
        }

        let last = self.stages.len() - 1;
        for (i, stage) in self.stages.iter().enumerate() {
            stage.timing.validate().map_err(|e| {
                FlowError::validation(format!("stage '{}': {e}", stage.name))
            })?;
            if let TimingRule::Relative { direction, .. } = &stage.timing {
                match direction {
                    Direction::AfterPrevious if i == 0 => {
                        return Err(FlowError::validation(
                            "first stage cannot be relative to a previous stage",
                        ));
                    }
                    Direction::BeforeNext if i == last => {
                        return Err(FlowError::validation(
                            "last stage cannot be relative to a next stage",
                        ));
                    }
                    Direction::BeforeNext => {
                        // before_next needs the next stage's instant to be
                        // resolvable on its own; a next stage anchored back
                        // at this one is a cycle, and a further before_next
                        // chain has no anchor either.
                        if let Some(TimingRule::Relative { direction, .. }) =
                            self.stages.get(i + 1).map(|s| &s.timing)
                        {
                            let reason = match direction {
                                Direction::AfterPrevious => "forms a cycle with",
                                Direction::BeforeNext => "chains into",
                            };
                            return Err(FlowError::validation(format!(
                                "stage '{}': before_next {reason} the following stage",
                                stage.name
                            )));
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Insert a stage at a 0-based position strictly between the fixed
    /// endpoints (`1..=len-1`).
    pub fn insert_stage(&mut self, position: usize, stage: StageDefinition) -> Result<()> {
        if position == 0 {
            return Err(FlowError::validation("cannot insert before the intake stage"));
        }
        if position > self.stages.len() - 1 {
            return Err(FlowError::validation("cannot insert after the closure stage"));
        }
        let mut stages = self.stages.clone();
        stages.insert(position, stage);
        self.commit(stages)
    }

    /// Remove the stage at a 0-based index; the endpoints are fixed.
    pub fn remove_stage(&mut self, index: usize) -> Result<StageDefinition> {
        if index >= self.stages.len() {
            return Err(FlowError::not_found(format!("stage index {index}")));
        }
        if index == 0 || index == self.stages.len() - 1 {
            return Err(FlowError::validation(
                "the intake and closure stages cannot be removed",
            ));
        }
        let mut stages = self.stages.clone();
        let removed = stages.remove(index);
        self.commit(stages)?;
        Ok(removed)
    }

    /// Reorder an interior stage; neither endpoint may move.
    pub fn move_stage(&mut self, from: usize, to: usize) -> Result<()> {
        let last = self.stages.len() - 1;
        if from >= self.stages.len() || to >= self.stages.len() {
            return Err(FlowError::not_found(format!("stage index {}", from.max(to))));
        }
        if from == 0 || from == last || to == 0 || to == last {
            return Err(FlowError::validation(
                "the intake and closure stages cannot be reordered",
            ));
        }
        let mut stages = self.stages.clone();
        let stage = stages.remove(from);
        stages.insert(to, stage);
        self.commit(stages)
    }

    /// Replace the stage at a 0-based index, keeping its id.
    pub fn update_stage(&mut self, index: usize, mut stage: StageDefinition) -> Result<()> {
        let existing = self
            .stages
            .get(index)
            .ok_or_else(|| FlowError::not_found(format!("stage index {index}")))?;
        stage.id = existing.id.clone();
        let mut stages = self.stages.clone();
        stages[index] = stage;
        self.commit(stages)
    }

    /// Swap in an edited sequence only if it still validates.
    fn commit(&mut self, stages: Vec<StageDefinition>) -> Result<()> {
        let candidate = Self { stages, ..self.clone() };
        candidate.validate()?;
        self.stages = candidate.stages;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::{DelayUnit, PresetDelay};
    use flowpilot_core::ActionType;

    fn messaging_stage(name: &str, timing: TimingRule) -> StageDefinition {
        StageDefinition::new(
            name,
            StageCategory::Messaging,
            timing,
            ActionSpec::with_params(
                ActionType::SendWhatsapp,
                serde_json::json!({"template": "follow_up"}),
            ),
        )
    }

    fn three_stage_def() -> ProcessDefinition {
        let mut def = ProcessDefinition::scaffold("t1", "sales");
        def.insert_stage(
            1,
            messaging_stage("Follow up", TimingRule::Preset { preset: PresetDelay::OneDay }),
        )
        .unwrap();
        def
    }

    #[test]
    fn test_scaffold_validates() {
        let def = ProcessDefinition::scaffold("t1", "sales");
        assert!(def.validate().is_ok());
        assert_eq!(def.stage_count(), 2);
    }

    #[test]
    fn test_first_stage_must_be_new_lead() {
        let mut def = three_stage_def();
        def.stages[0].category = StageCategory::Meeting;
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("new_lead"));
    }

    #[test]
    fn test_last_stage_must_be_deal_closure() {
        let mut def = three_stage_def();
        def.stages.pop();
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_endpoints_cannot_be_removed_or_moved() {
        let mut def = three_stage_def();
        assert!(def.remove_stage(0).is_err());
        assert!(def.remove_stage(2).is_err());
        assert!(def.move_stage(0, 1).is_err());
        assert!(def.move_stage(1, 2).is_err());
        // Interior removal is fine.
        assert!(def.remove_stage(1).is_ok());
        assert_eq!(def.stage_count(), 2);
    }

    #[test]
    fn test_insert_positions() {
        let mut def = ProcessDefinition::scaffold("t1", "sales");
        assert!(def
            .insert_stage(0, messaging_stage("x", TimingRule::Immediate))
            .is_err());
        assert!(def
            .insert_stage(2, messaging_stage("x", TimingRule::Immediate))
            .is_err());
        assert!(def
            .insert_stage(1, messaging_stage("x", TimingRule::Immediate))
            .is_ok());
        assert_eq!(def.stages[1].name, "x");
    }

    #[test]
    fn test_zero_delay_rejected() {
        let mut def = ProcessDefinition::scaffold("t1", "sales");
        let bad = messaging_stage(
            "bad",
            TimingRule::Fixed { amount: 0, unit: DelayUnit::Hours },
        );
        assert!(def.insert_stage(1, bad).is_err());
        // Rejected edit leaves the sequence untouched.
        assert_eq!(def.stage_count(), 2);
    }

    #[test]
    fn test_before_next_after_previous_cycle_rejected() {
        let mut def = ProcessDefinition::scaffold("t1", "sales");
        def.insert_stage(
            1,
            messaging_stage(
                "anchor-forward",
                TimingRule::Relative {
                    direction: Direction::BeforeNext,
                    amount: 2,
                    unit: DelayUnit::Hours,
                },
            ),
        )
        .unwrap();
        let cyclic = messaging_stage(
            "anchor-back",
            TimingRule::Relative {
                direction: Direction::AfterPrevious,
                amount: 1,
                unit: DelayUnit::Hours,
            },
        );
        let err = def.insert_stage(2, cyclic).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_before_next_on_last_rejected() {
        let mut def = ProcessDefinition::scaffold("t1", "sales");
        let mut closure = def.stages[1].clone();
        closure.timing = TimingRule::Relative {
            direction: Direction::BeforeNext,
            amount: 1,
            unit: DelayUnit::Hours,
        };
        assert!(def.update_stage(1, closure).is_err());
    }

    #[test]
    fn test_portal_projection_is_external_only() {
        let mut def = three_stage_def();
        def.stages[1].visibility = Visibility::External;
        let visible = def.portal_stages();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].name, "Follow up");
    }

    #[test]
    fn test_update_stage_keeps_id() {
        let mut def = three_stage_def();
        let old_id = def.stages[1].id.clone();
        let replacement =
            messaging_stage("Renamed", TimingRule::Preset { preset: PresetDelay::ThreeDays });
        def.update_stage(1, replacement).unwrap();
        assert_eq!(def.stages[1].id, old_id);
        assert_eq!(def.stages[1].name, "Renamed");
    }

    #[test]
    fn test_serde_round_trip() {
        let def = three_stage_def();
        let json = serde_json::to_string(&def).unwrap();
        let back: ProcessDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, def);
    }
}
