//! Flows: ordered, delayed multi-step message sequences attached to a
//! segment, and the planner that turns them into absolute send times.

pub mod planner;
pub mod repository;
pub mod types;

pub use planner::{plan, plan_from, ScheduleSummary, ScheduledStep};
pub use repository::{FlowRepository, MemoryFlowRepository};
pub use types::{EntryConditionType, Flow, FlowStep, StepAction, StepType};
