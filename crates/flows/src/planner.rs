//! Schedule planner: turns an ordered step list into absolute send times.
//!
//! A running clock starts at the campaign start. Send steps fire at the
//! current clock value, WAIT steps move the clock forward, and the first
//! EXIT ends planning. WAIT steps produce no entry in the output.

use audience_core::{AudienceError, AudienceResult};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{ordered_steps, FlowStep, StepAction, StepType};

/// A send-type flow step paired with its computed send time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledStep {
    pub step: FlowStep,
    pub send_at: NaiveDateTime,
}

impl ScheduledStep {
    pub fn step_type(&self) -> StepType {
        self.step.step_type()
    }

    pub fn step_order(&self) -> u32 {
        self.step.step_order
    }
}

/// Plans `steps` from `start_date` at `start_time` (midnight when absent).
pub fn plan(
    steps: &[FlowStep],
    start_date: NaiveDate,
    start_time: Option<NaiveTime>,
) -> AudienceResult<Vec<ScheduledStep>> {
    let start = start_date.and_time(start_time.unwrap_or(NaiveTime::MIN));
    plan_from(steps, start)
}

/// Plans `steps` from an explicit starting instant.
pub fn plan_from(steps: &[FlowStep], start: NaiveDateTime) -> AudienceResult<Vec<ScheduledStep>> {
    let ordered = ordered_steps(steps)?;

    let mut clock = start;
    let mut scheduled = Vec::new();
    for step in ordered {
        match &step.action {
            StepAction::SendEmail(_) | StepAction::SendPush(_) => scheduled.push(ScheduledStep {
                step: step.clone(),
                send_at: clock,
            }),
            StepAction::Wait(wait) => clock = advance(clock, wait.duration_days)?,
            StepAction::Exit => break,
        }
    }

    debug!(
        steps = steps.len(),
        sends = scheduled.len(),
        start = %start,
        "Flow planned"
    );
    Ok(scheduled)
}

fn advance(clock: NaiveDateTime, days: i64) -> AudienceResult<NaiveDateTime> {
    Duration::try_days(days)
        .and_then(|delta| clock.checked_add_signed(delta))
        .ok_or_else(|| {
            AudienceError::InvalidFlow(format!("WAIT of {days} days overflows the calendar"))
        })
}

/// Aggregate view of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSummary {
    pub sends: usize,
    pub emails: usize,
    pub pushes: usize,
    pub first_send: Option<NaiveDateTime>,
    pub last_send: Option<NaiveDateTime>,
    pub span_days: i64,
}

impl ScheduleSummary {
    pub fn from_schedule(schedule: &[ScheduledStep]) -> Self {
        let first_send = schedule.first().map(|s| s.send_at);
        let last_send = schedule.last().map(|s| s.send_at);
        let span_days = match (first_send, last_send) {
            (Some(first), Some(last)) => (last - first).num_days(),
            _ => 0,
        };
        Self {
            sends: schedule.len(),
            emails: schedule
                .iter()
                .filter(|s| s.step_type() == StepType::SendEmail)
                .count(),
            pushes: schedule
                .iter()
                .filter(|s| s.step_type() == StepType::SendPush)
                .count(),
            first_send,
            last_send,
            span_days,
        }
    }
}
