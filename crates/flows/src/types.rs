use audience_core::{AudienceError, AudienceResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A flow definition: an ordered list of steps targeting one segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: Uuid,
    pub segment_id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub entry_condition_type: Option<EntryConditionType>,
    #[serde(default)]
    pub entry_condition: Option<String>,
    #[serde(default)]
    pub steps: Vec<FlowStep>,
    pub created_at: DateTime<Utc>,
}

impl Flow {
    pub fn new(segment_id: Uuid, steps: Vec<FlowStep>) -> Self {
        Self {
            id: Uuid::new_v4(),
            segment_id,
            name: None,
            entry_condition_type: None,
            entry_condition: None,
            steps,
            created_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> AudienceResult<()> {
        ordered_steps(&self.steps).map(|_| ())
    }
}

/// Event that enrols a customer into a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryConditionType {
    Signup,
    FirstPurchase,
    CartAbandoned,
    OrderCompleted,
    SubscriptionRenewal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    SendEmail,
    Wait,
    SendPush,
    Exit,
}

impl StepType {
    pub fn is_send(self) -> bool {
        matches!(self, StepType::SendEmail | StepType::SendPush)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailConfig {
    pub subject: String,
    #[serde(default)]
    pub body_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitConfig {
    pub duration_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushConfig {
    pub title: String,
    #[serde(default)]
    pub message: String,
}

/// What a step does, with its type-specific configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    SendEmail(EmailConfig),
    Wait(WaitConfig),
    SendPush(PushConfig),
    Exit,
}

impl StepAction {
    pub fn step_type(&self) -> StepType {
        match self {
            StepAction::SendEmail(_) => StepType::SendEmail,
            StepAction::Wait(_) => StepType::Wait,
            StepAction::SendPush(_) => StepType::SendPush,
            StepAction::Exit => StepType::Exit,
        }
    }

    fn validate(&self) -> AudienceResult<()> {
        match self {
            StepAction::SendEmail(email) if email.subject.trim().is_empty() => Err(
                AudienceError::InvalidFlow("SEND_EMAIL requires a non-empty subject".to_string()),
            ),
            StepAction::Wait(wait) if wait.duration_days < 0 => Err(AudienceError::InvalidFlow(
                format!("WAIT duration_days must be >= 0, got {}", wait.duration_days),
            )),
            _ => Ok(()),
        }
    }
}

/// One step of a flow.
///
/// Wire shape: `{"step_type": "WAIT", "step_order": 2, "config": {"duration_days": 3}}`.
/// Configs are checked when the step is deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFlowStep", into = "RawFlowStep")]
pub struct FlowStep {
    pub step_order: u32,
    pub action: StepAction,
}

impl FlowStep {
    pub fn new(step_order: u32, action: StepAction) -> AudienceResult<Self> {
        action.validate()?;
        Ok(Self { step_order, action })
    }

    pub fn email(
        step_order: u32,
        subject: impl Into<String>,
        body_text: impl Into<String>,
    ) -> Self {
        Self {
            step_order,
            action: StepAction::SendEmail(EmailConfig {
                subject: subject.into(),
                body_text: body_text.into(),
            }),
        }
    }

    pub fn push(step_order: u32, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step_order,
            action: StepAction::SendPush(PushConfig {
                title: title.into(),
                message: message.into(),
            }),
        }
    }

    pub fn wait(step_order: u32, duration_days: i64) -> Self {
        Self {
            step_order,
            action: StepAction::Wait(WaitConfig { duration_days }),
        }
    }

    pub fn exit(step_order: u32) -> Self {
        Self {
            step_order,
            action: StepAction::Exit,
        }
    }

    pub fn step_type(&self) -> StepType {
        self.action.step_type()
    }
}

#[derive(Serialize, Deserialize)]
struct RawFlowStep {
    step_type: StepType,
    step_order: i64,
    #[serde(default)]
    config: serde_json::Value,
}

impl TryFrom<RawFlowStep> for FlowStep {
    type Error = AudienceError;

    fn try_from(raw: RawFlowStep) -> Result<Self, Self::Error> {
        let step_order = u32::try_from(raw.step_order).map_err(|_| {
            AudienceError::InvalidFlow(format!("invalid step_order {}", raw.step_order))
        })?;
        let step_type = raw.step_type;
        let config_error = |e: serde_json::Error| {
            AudienceError::InvalidFlow(format!("{step_type:?} config: {e}"))
        };
        let action = match raw.step_type {
            StepType::SendEmail => {
                StepAction::SendEmail(serde_json::from_value(raw.config).map_err(config_error)?)
            }
            StepType::Wait => {
                StepAction::Wait(serde_json::from_value(raw.config).map_err(config_error)?)
            }
            StepType::SendPush => {
                StepAction::SendPush(serde_json::from_value(raw.config).map_err(config_error)?)
            }
            StepType::Exit => StepAction::Exit,
        };
        FlowStep::new(step_order, action)
    }
}

impl From<FlowStep> for RawFlowStep {
    fn from(step: FlowStep) -> Self {
        let step_type = step.step_type();
        let config = match step.action {
            StepAction::SendEmail(c) => {
                serde_json::json!({"subject": c.subject, "body_text": c.body_text})
            }
            StepAction::Wait(c) => serde_json::json!({"duration_days": c.duration_days}),
            StepAction::SendPush(c) => serde_json::json!({"title": c.title, "message": c.message}),
            StepAction::Exit => serde_json::json!({}),
        };
        RawFlowStep {
            step_type,
            step_order: i64::from(step.step_order),
            config,
        }
    }
}

/// Sorts steps by `step_order` and checks the flow invariants: orders form
/// `1..=n`, at most one EXIT, every step config is valid.
pub fn ordered_steps(steps: &[FlowStep]) -> AudienceResult<Vec<&FlowStep>> {
    let mut ordered: Vec<&FlowStep> = steps.iter().collect();
    ordered.sort_by_key(|s| s.step_order);

    for (index, step) in ordered.iter().enumerate() {
        let expected = index as u32 + 1;
        if step.step_order != expected {
            return Err(AudienceError::InvalidFlow(format!(
                "step orders must be contiguous from 1: expected {expected}, found {}",
                step.step_order
            )));
        }
        step.action.validate()?;
    }

    let exits = ordered
        .iter()
        .filter(|s| s.step_type() == StepType::Exit)
        .count();
    if exits > 1 {
        return Err(AudienceError::InvalidFlow(format!(
            "a flow may contain at most one EXIT step, found {exits}"
        )));
    }

    Ok(ordered)
}
