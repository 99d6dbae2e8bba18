//! Core data types shared by the process, engine, and channel crates.

use serde::{Deserialize, Serialize};

/// The closed set of actions a stage can schedule.
///
/// Adding a new action type is a closed-set extension: the enum, the
/// `ActionExecutor` trait, and its dispatch router all grow together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    AdvanceStage,
    CreateTask,
    CreateMeeting,
    SendWhatsapp,
    SendEmail,
    SendSms,
    SendReminder,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdvanceStage => "advance_stage",
            Self::CreateTask => "create_task",
            Self::CreateMeeting => "create_meeting",
            Self::SendWhatsapp => "send_whatsapp",
            Self::SendEmail => "send_email",
            Self::SendSms => "send_sms",
            Self::SendReminder => "send_reminder",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "advance_stage" => Some(Self::AdvanceStage),
            "create_task" => Some(Self::CreateTask),
            "create_meeting" => Some(Self::CreateMeeting),
            "send_whatsapp" => Some(Self::SendWhatsapp),
            "send_email" => Some(Self::SendEmail),
            "send_sms" => Some(Self::SendSms),
            "send_reminder" => Some(Self::SendReminder),
            _ => None,
        }
    }
}

/// Lifecycle of a scheduled action. Transitions are monotonic:
/// `pending`/`awaiting_approval` → `executed` or `cancelled`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    AwaitingApproval,
    Executed,
    Cancelled,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Executed => "executed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "awaiting_approval" => Some(Self::AwaitingApproval),
            "executed" => Some(Self::Executed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Cancelled)
    }

    /// Live = still occupies the at-most-one-per-stage slot.
    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }
}

/// Outcome recorded for one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Failed,
    Warning,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Warning => "warning",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "warning" => Some(Self::Warning),
            _ => None,
        }
    }
}

/// The client or lead whose progress through a process is tracked.
/// Exactly one of `client_id` / `lead_id` is set in practice; when both are
/// present the client identity wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRef {
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<String>,
}

impl SubjectRef {
    pub fn client(tenant_id: &str, client_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            client_id: Some(client_id.to_string()),
            lead_id: None,
        }
    }

    pub fn lead(tenant_id: &str, lead_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            client_id: None,
            lead_id: Some(lead_id.to_string()),
        }
    }

    /// Entity-store collection this subject lives in.
    pub fn entity_type(&self) -> &'static str {
        if self.client_id.is_some() { "client" } else { "lead" }
    }

    pub fn entity_id(&self) -> &str {
        self.client_id
            .as_deref()
            .or(self.lead_id.as_deref())
            .unwrap_or("")
    }
}

/// Position of a subject inside a process. 1-based; `stage_count + 1`
/// denotes "process completed". Mutated only by the execution engine and
/// the explicit manual-override entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProcessState {
    pub process_type: String,
    pub current_stage: u32,
}

impl ClientProcessState {
    pub fn new(process_type: &str) -> Self {
        Self {
            process_type: process_type.to_string(),
            current_stage: 1,
        }
    }

    /// True once the subject has walked past the last stage.
    pub fn is_completed(&self, stage_count: u32) -> bool {
        self.current_stage > stage_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type_round_trip() {
        for at in [
            ActionType::AdvanceStage,
            ActionType::CreateTask,
            ActionType::CreateMeeting,
            ActionType::SendWhatsapp,
            ActionType::SendEmail,
            ActionType::SendSms,
            ActionType::SendReminder,
        ] {
            assert_eq!(ActionType::parse(at.as_str()), Some(at));
        }
        assert_eq!(ActionType::parse("send_fax"), None);
    }

    #[test]
    fn test_status_terminality() {
        assert!(ActionStatus::Executed.is_terminal());
        assert!(ActionStatus::Cancelled.is_terminal());
        assert!(ActionStatus::Pending.is_live());
        assert!(ActionStatus::AwaitingApproval.is_live());
    }

    #[test]
    fn test_subject_entity_mapping() {
        let c = SubjectRef::client("t1", "c42");
        assert_eq!(c.entity_type(), "client");
        assert_eq!(c.entity_id(), "c42");

        let l = SubjectRef::lead("t1", "l9");
        assert_eq!(l.entity_type(), "lead");
        assert_eq!(l.entity_id(), "l9");
    }

    #[test]
    fn test_process_state_completion() {
        let mut st = ClientProcessState::new("sales");
        assert!(!st.is_completed(3));
        st.current_stage = 4;
        assert!(st.is_completed(3));
    }

    #[test]
    fn test_serde_snake_case_tags() {
        let json = serde_json::to_string(&ActionType::SendWhatsapp).unwrap();
        assert_eq!(json, "\"send_whatsapp\"");
        let st: ActionStatus = serde_json::from_str("\"awaiting_approval\"").unwrap();
        assert_eq!(st, ActionStatus::AwaitingApproval);
    }
}
