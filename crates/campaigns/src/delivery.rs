//! Delivery collaborator contract and per-activation reporting.
//!
//! The lifecycle hands each (scheduled send step, matching customer) pair to
//! a [`DeliverySink`]. Transport (SMTP, push gateways) lives behind the sink.

use std::collections::HashMap;

use audience_core::CustomerRecord;
use audience_flows::{ScheduledStep, StepType};
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryResult {
    Delivered,
    Failed { reason: String },
}

impl DeliveryResult {
    pub fn failed(reason: impl Into<String>) -> Self {
        DeliveryResult::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryResult::Delivered)
    }
}

pub trait DeliverySink: Send + Sync {
    fn dispatch(
        &self,
        campaign_id: Uuid,
        step: &ScheduledStep,
        customer: &CustomerRecord,
    ) -> DeliveryResult;
}

/// Idempotency key for one delivery. A key that was delivered once is never
/// handed to the sink again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryKey {
    pub campaign_id: Uuid,
    pub step_order: u32,
    pub customer_id: Uuid,
}

impl DeliveryKey {
    pub fn new(campaign_id: Uuid, step: &ScheduledStep, customer: &CustomerRecord) -> Self {
        Self {
            campaign_id,
            step_order: step.step_order(),
            customer_id: customer.id,
        }
    }
}

/// Why the report was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Activate,
    Resume,
    Redispatch,
}

/// A (customer, step) pair the sink did not deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndeliveredPair {
    pub customer_id: Uuid,
    pub email: String,
    pub step_order: u32,
    pub send_at: NaiveDateTime,
    pub reason: String,
}

/// Outcome of one derive-and-dispatch pass. Individual failures are listed
/// here instead of aborting the pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub campaign_id: Uuid,
    pub activation: Activation,
    pub scheduled_steps: Vec<ScheduledStep>,
    pub recipients: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failures: Vec<UndeliveredPair>,
}

impl DeliveryReport {
    pub fn new(
        campaign_id: Uuid,
        activation: Activation,
        scheduled_steps: Vec<ScheduledStep>,
    ) -> Self {
        Self {
            campaign_id,
            activation,
            scheduled_steps,
            recipients: 0,
            sent: 0,
            skipped: 0,
            failures: Vec::new(),
        }
    }

    /// Pairs the sink was asked to deliver, including skipped ones.
    pub fn attempted(&self) -> usize {
        self.sent + self.skipped + self.failures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Running totals for one campaign across all its dispatch passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignDeliveryStats {
    pub sent: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl CampaignDeliveryStats {
    pub fn record(&mut self, report: &DeliveryReport) {
        self.sent += (report.sent + report.failures.len()) as u64;
        self.delivered += report.sent as u64;
        self.failed += report.failures.len() as u64;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedDelivery {
    pub campaign_id: Uuid,
    pub customer_id: Uuid,
    pub step_order: u32,
    pub step_type: StepType,
    pub send_at: NaiveDateTime,
}

/// In-memory sink that records every delivery. Failures can be injected per
/// customer.
#[derive(Default)]
pub struct RecordingSink {
    deliveries: Mutex<Vec<RecordedDelivery>>,
    failing: Mutex<HashMap<Uuid, String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every dispatch to `customer_id` fails with `reason` until cleared.
    pub fn fail_for(&self, customer_id: Uuid, reason: impl Into<String>) {
        self.failing.lock().insert(customer_id, reason.into());
    }

    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    pub fn deliveries(&self) -> Vec<RecordedDelivery> {
        self.deliveries.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.deliveries.lock().len()
    }

    pub fn count_for(&self, customer_id: Uuid) -> usize {
        self.deliveries
            .lock()
            .iter()
            .filter(|d| d.customer_id == customer_id)
            .count()
    }
}

impl DeliverySink for RecordingSink {
    fn dispatch(
        &self,
        campaign_id: Uuid,
        step: &ScheduledStep,
        customer: &CustomerRecord,
    ) -> DeliveryResult {
        if let Some(reason) = self.failing.lock().get(&customer.id) {
            return DeliveryResult::failed(reason.clone());
        }
        self.deliveries.lock().push(RecordedDelivery {
            campaign_id,
            customer_id: customer.id,
            step_order: step.step_order(),
            step_type: step.step_type(),
            send_at: step.send_at,
        });
        DeliveryResult::Delivered
    }
}
