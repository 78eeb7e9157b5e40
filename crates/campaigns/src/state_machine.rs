use std::fmt;

use audience_core::{AudienceError, AudienceResult};
use serde::{Deserialize, Serialize};

use crate::models::CampaignStatus;

/// Operator or system event applied to a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Activate,
    Pause,
    Resume,
    Complete,
    Edit,
}

impl LifecycleEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleEvent::Activate => "activate",
            LifecycleEvent::Pause => "pause",
            LifecycleEvent::Resume => "resume",
            LifecycleEvent::Complete => "complete",
            LifecycleEvent::Edit => "edit",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Describes a single valid transition of a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: CampaignStatus,
    pub event: LifecycleEvent,
    pub to: CampaignStatus,
}

/// Guards campaign lifecycle by enforcing a finite set of valid transitions.
/// `completed` has no outgoing edges.
#[derive(Debug, Clone)]
pub struct CampaignStateMachine {
    pub transitions: Vec<StateTransition>,
}

impl CampaignStateMachine {
    pub fn new() -> Self {
        use CampaignStatus::*;
        use LifecycleEvent::*;

        let transitions = vec![
            // Draft ->
            StateTransition {
                from: Draft,
                event: Activate,
                to: Active,
            },
            StateTransition {
                from: Draft,
                event: Edit,
                to: Draft,
            },
            // Active ->
            StateTransition {
                from: Active,
                event: Pause,
                to: Paused,
            },
            StateTransition {
                from: Active,
                event: Complete,
                to: Completed,
            },
            // Paused ->
            StateTransition {
                from: Paused,
                event: Resume,
                to: Active,
            },
            StateTransition {
                from: Paused,
                event: Complete,
                to: Completed,
            },
        ];

        Self { transitions }
    }

    pub fn can_apply(&self, from: CampaignStatus, event: LifecycleEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == event)
    }

    /// Target state for `event` applied in `from`.
    pub fn next(
        &self,
        from: CampaignStatus,
        event: LifecycleEvent,
    ) -> AudienceResult<CampaignStatus> {
        self.transitions
            .iter()
            .find(|t| t.from == from && t.event == event)
            .map(|t| t.to)
            .ok_or_else(|| AudienceError::InvalidTransition {
                from: from.to_string(),
                event: event.to_string(),
            })
    }

    /// Events that are legal in `from`, in table order.
    pub fn available_events(&self, from: CampaignStatus) -> Vec<LifecycleEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == from)
            .map(|t| t.event)
            .collect()
    }
}

impl Default for CampaignStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
