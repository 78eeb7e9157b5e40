//! Campaign lifecycle orchestrator.
//!
//! Every state-changing call takes the campaign's lock for its whole
//! duration, so two callers can never derive and dispatch the same campaign
//! at once. Activation and resume evaluate the segment, plan the flow and
//! hand each (scheduled step, customer) pair to the delivery sink. Pairs
//! that were delivered before are skipped when dedupe is on.

use std::sync::Arc;

use audience_core::config::AppConfig;
use audience_core::event_bus::{make_event, noop_sink, EventSink, EventType};
use audience_core::{AudienceError, AudienceResult, CustomerRecord};
use audience_flows::{plan_from, FlowRepository, FlowStep, ScheduledStep};
use audience_segmentation::SegmentService;
use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::delivery::{
    Activation, CampaignDeliveryStats, DeliveryKey, DeliveryReport, DeliveryResult, DeliverySink,
    UndeliveredPair,
};
use crate::models::{
    time_of_day, Campaign, CampaignStatus, CreateCampaignRequest, UpdateCampaignRequest,
};
use crate::state_machine::{CampaignStateMachine, LifecycleEvent};
use crate::store::{CampaignRepository, MemoryStore};

/// Schedule and audience derived for one dispatch pass.
struct DispatchPlan {
    schedule: Vec<ScheduledStep>,
    recipients: Vec<CustomerRecord>,
}

pub struct CampaignLifecycle {
    campaigns: Arc<dyn CampaignRepository>,
    flows: Arc<dyn FlowRepository>,
    segments: SegmentService,
    delivery: Arc<dyn DeliverySink>,
    events: Arc<dyn EventSink>,
    state_machine: CampaignStateMachine,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    delivered: DashSet<DeliveryKey>,
    stats: DashMap<Uuid, CampaignDeliveryStats>,
    dedupe: bool,
    default_send_time: NaiveTime,
}

impl CampaignLifecycle {
    pub fn new(
        config: &AppConfig,
        campaigns: Arc<dyn CampaignRepository>,
        flows: Arc<dyn FlowRepository>,
        segments: SegmentService,
        delivery: Arc<dyn DeliverySink>,
    ) -> AudienceResult<Self> {
        let raw = &config.scheduling.default_send_time;
        let default_send_time = time_of_day::parse(raw).ok_or_else(|| {
            AudienceError::Config(format!("invalid scheduling.default_send_time '{raw}'"))
        })?;

        Ok(Self {
            campaigns,
            flows,
            segments,
            delivery,
            events: noop_sink(),
            state_machine: CampaignStateMachine::new(),
            locks: DashMap::new(),
            delivered: DashSet::new(),
            stats: DashMap::new(),
            dedupe: config.delivery.dedupe,
            default_send_time,
        })
    }

    /// Wires every collaborator to one [`MemoryStore`].
    pub fn in_memory(
        config: &AppConfig,
        store: Arc<MemoryStore>,
        delivery: Arc<dyn DeliverySink>,
    ) -> AudienceResult<Self> {
        let segments =
            SegmentService::new(config.segmentation.clone(), store.segments(), store.clone());
        Self::new(config, store.clone(), store.flows(), segments, delivery)
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn segments(&self) -> &SegmentService {
        &self.segments
    }

    // ─── Reads ─────────────────────────────────────────────────────────────

    pub fn get(&self, campaign_id: Uuid) -> AudienceResult<Campaign> {
        self.campaigns
            .get(campaign_id)?
            .ok_or_else(|| AudienceError::not_found("Campaign", campaign_id))
    }

    pub fn list(&self) -> AudienceResult<Vec<Campaign>> {
        self.campaigns.list()
    }

    pub fn stats(&self, campaign_id: Uuid) -> CampaignDeliveryStats {
        self.stats
            .get(&campaign_id)
            .map(|s| *s.value())
            .unwrap_or_default()
    }

    // ─── Draft operations ──────────────────────────────────────────────────

    /// Creates a draft campaign after checking its segment and flow exist.
    pub fn create(
        &self,
        req: CreateCampaignRequest,
        now: DateTime<Utc>,
    ) -> AudienceResult<Campaign> {
        self.segments.resolve(req.segment_id)?;
        if let Some(flow_id) = req.flow_id {
            self.ensure_flow_exists(flow_id)?;
        }

        let campaign = Campaign::from_request(req, now);
        self.campaigns.put(campaign.clone())?;
        info!(campaign_id = %campaign.id, name = %campaign.name, "Campaign created");
        Ok(campaign)
    }

    /// Applies `req` to a draft campaign.
    pub fn edit(
        &self,
        campaign_id: Uuid,
        req: UpdateCampaignRequest,
        now: DateTime<Utc>,
    ) -> AudienceResult<Campaign> {
        let lock = self.lock_for(campaign_id)?;
        let _guard = lock.lock();

        let mut campaign = self.get(campaign_id)?;
        self.state_machine.next(campaign.status, LifecycleEvent::Edit)?;
        if let Some(Some(flow_id)) = req.flow_id {
            self.ensure_flow_exists(flow_id)?;
        }

        campaign.apply_update(req, now);
        self.campaigns.put(campaign.clone())?;
        self.record_transition(&campaign, LifecycleEvent::Edit, serde_json::Value::Null);
        Ok(campaign)
    }

    // ─── Transitions ───────────────────────────────────────────────────────

    /// `draft -> active`. Plans from the campaign's start date and time.
    pub fn activate(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> AudienceResult<DeliveryReport> {
        let lock = self.lock_for(campaign_id)?;
        let _guard = lock.lock();

        let campaign = self.get(campaign_id)?;
        let start = campaign
            .start_date
            .and_time(campaign.start_time_of_day.unwrap_or(self.default_send_time));
        self.transition_and_dispatch(
            campaign,
            LifecycleEvent::Activate,
            Activation::Activate,
            start,
            now,
        )
    }

    /// `paused -> active`. The schedule is recomputed from `now`.
    pub fn resume(&self, campaign_id: Uuid, now: DateTime<Utc>) -> AudienceResult<DeliveryReport> {
        let lock = self.lock_for(campaign_id)?;
        let _guard = lock.lock();

        let campaign = self.get(campaign_id)?;
        self.transition_and_dispatch(
            campaign,
            LifecycleEvent::Resume,
            Activation::Resume,
            now.naive_utc(),
            now,
        )
    }

    /// `active -> paused`. Dispatches already handed to the sink are not recalled.
    pub fn pause(&self, campaign_id: Uuid, now: DateTime<Utc>) -> AudienceResult<Campaign> {
        self.simple_transition(campaign_id, LifecycleEvent::Pause, now)
    }

    /// `active | paused -> completed`.
    pub fn complete(&self, campaign_id: Uuid, now: DateTime<Utc>) -> AudienceResult<Campaign> {
        self.simple_transition(campaign_id, LifecycleEvent::Complete, now)
    }

    /// Replays the last plan of an active campaign. Pairs already delivered
    /// are skipped, so this retries only what failed (or was never sent).
    pub fn redispatch(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> AudienceResult<DeliveryReport> {
        let lock = self.lock_for(campaign_id)?;
        let _guard = lock.lock();

        let campaign = self.get(campaign_id)?;
        if campaign.status != CampaignStatus::Active {
            return Err(AudienceError::InvalidTransition {
                from: campaign.status.to_string(),
                event: "redispatch".to_string(),
            });
        }
        let start = campaign.schedule_start.unwrap_or_else(|| {
            campaign
                .start_date
                .and_time(campaign.start_time_of_day.unwrap_or(self.default_send_time))
        });

        let plan = self.prepare(&campaign, start, now)?;
        let report = self.deliver(&campaign, Activation::Redispatch, plan);
        info!(
            campaign_id = %campaign_id,
            sent = report.sent,
            skipped = report.skipped,
            failed = report.failures.len(),
            "Campaign redispatched"
        );
        Ok(report)
    }

    // ─── Internals ─────────────────────────────────────────────────────────

    /// Lock entries exist only for stored campaigns and are dropped once a
    /// campaign completes.
    fn lock_for(&self, campaign_id: Uuid) -> AudienceResult<Arc<Mutex<()>>> {
        if self.campaigns.get(campaign_id)?.is_none() {
            return Err(AudienceError::not_found("Campaign", campaign_id));
        }
        Ok(self.locks.entry(campaign_id).or_default().value().clone())
    }

    fn ensure_flow_exists(&self, flow_id: Uuid) -> AudienceResult<()> {
        match self.flows.get(flow_id)? {
            Some(_) => Ok(()),
            None => Err(AudienceError::not_found("Flow", flow_id)),
        }
    }

    fn simple_transition(
        &self,
        campaign_id: Uuid,
        event: LifecycleEvent,
        now: DateTime<Utc>,
    ) -> AudienceResult<Campaign> {
        let lock = self.lock_for(campaign_id)?;
        let _guard = lock.lock();

        let mut campaign = self.get(campaign_id)?;
        campaign.status = self.state_machine.next(campaign.status, event)?;
        campaign.updated_at = now;
        self.campaigns.put(campaign.clone())?;
        self.record_transition(&campaign, event, serde_json::Value::Null);
        if campaign.status == CampaignStatus::Completed {
            self.locks.remove(&campaign_id);
        }
        Ok(campaign)
    }

    /// Checks the transition and every precondition, persists the new
    /// status, then dispatches. Nothing is persisted if a precondition fails.
    fn transition_and_dispatch(
        &self,
        mut campaign: Campaign,
        event: LifecycleEvent,
        activation: Activation,
        start: NaiveDateTime,
        now: DateTime<Utc>,
    ) -> AudienceResult<DeliveryReport> {
        let next = self.state_machine.next(campaign.status, event)?;
        let plan = self.prepare(&campaign, start, now)?;

        campaign.status = next;
        campaign.schedule_start = Some(start);
        campaign.updated_at = now;
        if event == LifecycleEvent::Activate {
            campaign.activated_at = Some(now);
        }
        self.campaigns.put(campaign.clone())?;

        let report = self.deliver(&campaign, activation, plan);
        self.record_transition(
            &campaign,
            event,
            serde_json::json!({
                "schedule_start": start,
                "scheduled_steps": report.scheduled_steps.len(),
                "recipients": report.recipients,
                "sent": report.sent,
                "skipped": report.skipped,
                "failed": report.failures.len(),
            }),
        );
        Ok(report)
    }

    /// Resolves the segment and flow, checks they agree, plans the steps and
    /// materialises the audience.
    fn prepare(
        &self,
        campaign: &Campaign,
        start: NaiveDateTime,
        now: DateTime<Utc>,
    ) -> AudienceResult<DispatchPlan> {
        let segment = self.segments.resolve(campaign.segment_id)?;
        let steps = self.steps_for(campaign)?;
        let schedule = plan_from(&steps, start)?;
        let customers = self.segments.fetch_customers()?;
        let recipients = self
            .segments
            .all_matches(&segment.definition, &customers, now)?;
        Ok(DispatchPlan {
            schedule,
            recipients,
        })
    }

    /// Steps of the attached flow, or a single blast email when there is no
    /// flow or the flow is empty.
    fn steps_for(&self, campaign: &Campaign) -> AudienceResult<Vec<FlowStep>> {
        if let Some(flow_id) = campaign.flow_id {
            let flow = self
                .flows
                .get(flow_id)?
                .ok_or_else(|| AudienceError::not_found("Flow", flow_id))?;
            if flow.segment_id != campaign.segment_id {
                return Err(AudienceError::SegmentMismatch {
                    flow_segment: flow.segment_id.to_string(),
                    campaign_segment: campaign.segment_id.to_string(),
                });
            }
            if !flow.steps.is_empty() {
                return Ok(flow.steps);
            }
        }

        let (subject, body_text) = match &campaign.blast {
            Some(blast) => (blast.subject.clone(), blast.body_text.clone()),
            None => (campaign.name.clone(), String::new()),
        };
        Ok(vec![FlowStep::email(1, subject, body_text)])
    }

    fn deliver(
        &self,
        campaign: &Campaign,
        activation: Activation,
        plan: DispatchPlan,
    ) -> DeliveryReport {
        let DispatchPlan {
            schedule,
            recipients,
        } = plan;
        let mut report = DeliveryReport::new(campaign.id, activation, Vec::new());
        report.recipients = recipients.len();

        for step in &schedule {
            for customer in &recipients {
                let key = DeliveryKey::new(campaign.id, step, customer);
                if self.dedupe && self.delivered.contains(&key) {
                    report.skipped += 1;
                    continue;
                }

                match self.delivery.dispatch(campaign.id, step, customer) {
                    DeliveryResult::Delivered => {
                        self.delivered.insert(key);
                        report.sent += 1;
                    }
                    DeliveryResult::Failed { reason } => {
                        warn!(
                            campaign_id = %campaign.id,
                            customer_id = %customer.id,
                            step_order = step.step_order(),
                            %reason,
                            "Delivery failed"
                        );
                        self.events.emit(make_event(
                            EventType::DeliveryFailed,
                            campaign.id,
                            Some(customer.id),
                            serde_json::json!({"step_order": step.step_order(), "reason": &reason}),
                        ));
                        report.failures.push(UndeliveredPair {
                            customer_id: customer.id,
                            email: customer.email.clone(),
                            step_order: step.step_order(),
                            send_at: step.send_at,
                            reason,
                        });
                    }
                }
            }
        }

        metrics::counter!("campaigns.deliveries.sent").increment(report.sent as u64);
        metrics::counter!("campaigns.deliveries.failed").increment(report.failures.len() as u64);
        self.stats.entry(campaign.id).or_default().record(&report);

        report.scheduled_steps = schedule;
        report
    }

    fn record_transition(
        &self,
        campaign: &Campaign,
        event: LifecycleEvent,
        detail: serde_json::Value,
    ) {
        metrics::counter!("campaigns.transitions", "event" => event.as_str()).increment(1);
        info!(
            campaign_id = %campaign.id,
            event = %event,
            status = %campaign.status,
            "Campaign transition"
        );

        let event_type = match event {
            LifecycleEvent::Activate => EventType::CampaignActivated,
            LifecycleEvent::Pause => EventType::CampaignPaused,
            LifecycleEvent::Resume => EventType::CampaignResumed,
            LifecycleEvent::Complete => EventType::CampaignCompleted,
            LifecycleEvent::Edit => EventType::CampaignEdited,
        };
        self.events
            .emit(make_event(event_type, campaign.id, None, detail));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::RecordingSink;
    use crate::models::BlastMessage;
    use audience_core::event_bus::capture_sink;
    use audience_flows::Flow;
    use audience_segmentation::SegmentBuilder;
    use chrono::{NaiveDate, TimeZone};

    struct Fixture {
        store: Arc<MemoryStore>,
        sink: Arc<RecordingSink>,
        lifecycle: CampaignLifecycle,
        segment_id: Uuid,
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap()
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        for (email, value, opt_in) in [
            ("a@example.com", 1500.0, true),
            ("b@example.com", 1500.0, false),
            ("c@example.com", 500.0, true),
            ("d@example.com", 2500.0, true),
        ] {
            let mut customer = CustomerRecord::new(email);
            customer.total_order_value = value;
            customer.marketing_opt_in = opt_in;
            store.add_customer(customer);
        }
        let segment = SegmentBuilder::new("Big spenders")
            .total_order_value_above(1000.0)
            .opted_in()
            .build()
            .unwrap();
        let segment_id = segment.id;
        store.segments().insert(segment);

        let sink = Arc::new(RecordingSink::new());
        let lifecycle =
            CampaignLifecycle::in_memory(&AppConfig::default(), store.clone(), sink.clone())
                .unwrap();
        Fixture {
            store,
            sink,
            lifecycle,
            segment_id,
        }
    }

    fn request(segment_id: Uuid, flow_id: Option<Uuid>) -> CreateCampaignRequest {
        CreateCampaignRequest {
            name: "Launch".to_string(),
            description: None,
            segment_id,
            flow_id,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            start_time_of_day: NaiveTime::from_hms_opt(10, 0, 0),
            blast: None,
        }
    }

    #[test]
    fn test_blast_activation_without_flow() {
        let fx = fixture();
        let campaign = fx.lifecycle.create(request(fx.segment_id, None), now()).unwrap();

        let report = fx.lifecycle.activate(campaign.id, now()).unwrap();
        assert_eq!(report.scheduled_steps.len(), 1);
        assert_eq!(report.recipients, 2);
        assert_eq!(report.sent, 2);
        assert_eq!(fx.sink.count(), 2);

        let stored = fx.lifecycle.get(campaign.id).unwrap();
        assert_eq!(stored.status, CampaignStatus::Active);
        assert_eq!(stored.activated_at, Some(now()));
    }

    #[test]
    fn test_blast_uses_blast_subject() {
        let fx = fixture();
        let mut req = request(fx.segment_id, None);
        req.blast = Some(BlastMessage {
            subject: "Flash sale".to_string(),
            body_text: "Today only".to_string(),
        });
        let campaign = fx.lifecycle.create(req, now()).unwrap();
        let report = fx.lifecycle.activate(campaign.id, now()).unwrap();
        assert_eq!(
            report.scheduled_steps[0].step,
            FlowStep::email(1, "Flash sale", "Today only")
        );
    }

    #[test]
    fn test_create_requires_known_segment_and_flow() {
        let fx = fixture();
        let unknown_segment = fx.lifecycle.create(request(Uuid::new_v4(), None), now());
        assert!(matches!(
            unknown_segment,
            Err(AudienceError::NotFound { entity: "Segment", .. })
        ));

        let unknown_flow = fx.lifecycle.create(request(fx.segment_id, Some(Uuid::new_v4())), now());
        assert!(matches!(
            unknown_flow,
            Err(AudienceError::NotFound { entity: "Flow", .. })
        ));
    }

    #[test]
    fn test_edit_only_while_draft() {
        let fx = fixture();
        let campaign = fx.lifecycle.create(request(fx.segment_id, None), now()).unwrap();

        let edited = fx
            .lifecycle
            .edit(
                campaign.id,
                UpdateCampaignRequest {
                    name: Some("Renamed".to_string()),
                    ..Default::default()
                },
                now(),
            )
            .unwrap();
        assert_eq!(edited.name, "Renamed");

        fx.lifecycle.activate(campaign.id, now()).unwrap();
        let err = fx
            .lifecycle
            .edit(campaign.id, UpdateCampaignRequest::default(), now())
            .unwrap_err();
        assert!(matches!(err, AudienceError::InvalidTransition { .. }));
    }

    #[test]
    fn test_failed_precondition_leaves_draft() {
        let fx = fixture();
        let other_segment = SegmentBuilder::new("Other").opted_in().build().unwrap();
        let flow = Flow::new(other_segment.id, vec![FlowStep::email(1, "Hi", "")]);
        let flow_id = flow.id;
        fx.store.segments().insert(other_segment);
        fx.store.flows().insert(flow);

        let campaign = fx
            .lifecycle
            .create(request(fx.segment_id, Some(flow_id)), now())
            .unwrap();
        let err = fx.lifecycle.activate(campaign.id, now()).unwrap_err();
        assert!(matches!(err, AudienceError::SegmentMismatch { .. }));
        assert_eq!(fx.lifecycle.get(campaign.id).unwrap().status, CampaignStatus::Draft);
        assert_eq!(fx.sink.count(), 0);
    }

    #[test]
    fn test_resume_plans_from_now() {
        let fx = fixture();
        let flow = Flow::new(
            fx.segment_id,
            vec![
                FlowStep::email(1, "Hello", ""),
                FlowStep::wait(2, 2),
                FlowStep::push(3, "Ping", ""),
            ],
        );
        let flow_id = flow.id;
        fx.store.flows().insert(flow);
        let campaign = fx
            .lifecycle
            .create(request(fx.segment_id, Some(flow_id)), now())
            .unwrap();

        fx.lifecycle.activate(campaign.id, now()).unwrap();
        fx.lifecycle.pause(campaign.id, now()).unwrap();

        let later = Utc.with_ymd_and_hms(2024, 2, 1, 12, 30, 0).unwrap();
        let report = fx.lifecycle.resume(campaign.id, later).unwrap();
        assert_eq!(report.scheduled_steps[0].send_at, later.naive_utc());
        assert_eq!(
            report.scheduled_steps[1].send_at,
            NaiveDate::from_ymd_opt(2024, 2, 3).unwrap().and_hms_opt(12, 30, 0).unwrap()
        );
        // Every pair went out on activation.
        assert_eq!(report.sent, 0);
        assert_eq!(report.skipped, 4);
        assert_eq!(
            fx.lifecycle.get(campaign.id).unwrap().schedule_start,
            Some(later.naive_utc())
        );
    }

    #[test]
    fn test_events_emitted_per_transition() {
        let fx = fixture();
        let events = capture_sink();
        let lifecycle =
            CampaignLifecycle::in_memory(&AppConfig::default(), fx.store.clone(), fx.sink.clone())
                .unwrap()
                .with_event_sink(events.clone());

        let campaign = lifecycle.create(request(fx.segment_id, None), now()).unwrap();
        lifecycle.activate(campaign.id, now()).unwrap();
        lifecycle.pause(campaign.id, now()).unwrap();
        lifecycle.complete(campaign.id, now()).unwrap();

        assert_eq!(events.count_type(EventType::CampaignActivated), 1);
        assert_eq!(events.count_type(EventType::CampaignPaused), 1);
        assert_eq!(events.count_type(EventType::CampaignCompleted), 1);
        let activated = events
            .events()
            .into_iter()
            .find(|e| e.event_type == EventType::CampaignActivated)
            .unwrap();
        assert_eq!(activated.detail["recipients"], 2);
    }

    #[test]
    fn test_unknown_ids_leave_no_lock_entries() {
        let fx = fixture();
        for _ in 0..100 {
            let id = Uuid::new_v4();
            assert!(matches!(
                fx.lifecycle.activate(id, now()),
                Err(AudienceError::NotFound { entity: "Campaign", .. })
            ));
            assert!(fx.lifecycle.pause(id, now()).is_err());
            assert!(fx.lifecycle.redispatch(id, now()).is_err());
        }
        assert!(fx.lifecycle.locks.is_empty());
    }

    #[test]
    fn test_completion_releases_lock_entry() {
        let fx = fixture();
        let campaign = fx.lifecycle.create(request(fx.segment_id, None), now()).unwrap();
        fx.lifecycle.activate(campaign.id, now()).unwrap();
        assert!(fx.lifecycle.locks.contains_key(&campaign.id));

        fx.lifecycle.complete(campaign.id, now()).unwrap();
        assert!(!fx.lifecycle.locks.contains_key(&campaign.id));

        // A completed campaign still rejects transitions.
        assert!(matches!(
            fx.lifecycle.resume(campaign.id, now()),
            Err(AudienceError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_redispatch_requires_active() {
        let fx = fixture();
        let campaign = fx.lifecycle.create(request(fx.segment_id, None), now()).unwrap();
        assert!(matches!(
            fx.lifecycle.redispatch(campaign.id, now()),
            Err(AudienceError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_bad_default_send_time_is_config_error() {
        let mut config = AppConfig::default();
        config.scheduling.default_send_time = "noon".to_string();
        let result = CampaignLifecycle::in_memory(
            &config,
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingSink::new()),
        );
        assert!(matches!(result, Err(AudienceError::Config(_))));
    }

    #[test]
    fn test_default_send_time_applies_without_time_of_day() {
        let fx = fixture();
        let mut req = request(fx.segment_id, None);
        req.start_time_of_day = None;
        let campaign = fx.lifecycle.create(req, now()).unwrap();
        let report = fx.lifecycle.activate(campaign.id, now()).unwrap();
        assert_eq!(
            report.scheduled_steps[0].send_at,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
        );
    }
}
