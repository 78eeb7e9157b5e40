//! End-to-end campaign flow: segment evaluation, flow planning and delivery
//! through the in-memory store.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use audience_campaigns::{
        CampaignLifecycle, CampaignStatus, CreateCampaignRequest, DeliveryResult, DeliverySink,
        MemoryStore, RecordingSink,
    };
    use audience_core::event_bus::{capture_sink, EventType};
    use audience_core::{AppConfig, AudienceError, CustomerRecord};
    use audience_flows::{plan, Flow, FlowStep, ScheduledStep};
    use audience_segmentation::{SegmentDefinition, SegmentService};
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
    }

    fn at(raw: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M").unwrap()
    }

    fn customer(email: &str, value: f64, opt_in: bool) -> CustomerRecord {
        let mut c = CustomerRecord::new(email);
        c.total_order_value = value;
        c.marketing_opt_in = opt_in;
        c
    }

    fn high_value_definition() -> SegmentDefinition {
        serde_json::from_value(serde_json::json!({
            "logical_operator": "AND",
            "criteria": [
                {"field": "total_order_value", "operator": "gt", "value": 1000},
                {"field": "marketing_opt_in", "operator": "eq", "value": true}
            ]
        }))
        .unwrap()
    }

    /// Store with the three reference customers and a high-value segment.
    fn seeded_store() -> (Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        store.add_customer(customer("match@example.com", 1500.0, true));
        store.add_customer(customer("optout@example.com", 1500.0, false));
        store.add_customer(customer("small@example.com", 500.0, true));

        let segment: audience_segmentation::Segment = serde_json::from_value(serde_json::json!({
            "id": Uuid::new_v4(),
            "name": "High value",
            "definition": high_value_definition(),
            "created_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        let segment_id = segment.id;
        store.segments().insert(segment);
        (store, segment_id)
    }

    fn flow_request(segment_id: Uuid, flow_id: Option<Uuid>) -> CreateCampaignRequest {
        CreateCampaignRequest {
            name: "Welcome".to_string(),
            description: None,
            segment_id,
            flow_id,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            start_time_of_day: NaiveTime::from_hms_opt(10, 0, 0),
            blast: None,
        }
    }

    fn lifecycle(store: &Arc<MemoryStore>, sink: Arc<dyn DeliverySink>) -> CampaignLifecycle {
        CampaignLifecycle::in_memory(&AppConfig::default(), store.clone(), sink).unwrap()
    }

    #[test]
    fn test_reference_segment_counts_one() {
        let (store, segment_id) = seeded_store();
        let service = SegmentService::new(
            AppConfig::default().segmentation,
            store.segments(),
            store.clone(),
        );
        assert_eq!(service.count_by_id(segment_id, now()).unwrap(), 1);

        let customers = service.fetch_customers().unwrap();
        let matches = service
            .matching_users(&high_value_definition(), &customers, now(), None)
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].email, "match@example.com");
    }

    #[test]
    fn test_reference_flow_schedule() {
        let steps = vec![
            FlowStep::email(1, "Welcome", ""),
            FlowStep::wait(2, 3),
            FlowStep::email(3, "Follow up", ""),
        ];
        let schedule = plan(
            &steps,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveTime::from_hms_opt(10, 0, 0),
        )
        .unwrap();
        let times: Vec<NaiveDateTime> = schedule.iter().map(|s| s.send_at).collect();
        assert_eq!(times, vec![at("2024-01-01T10:00"), at("2024-01-04T10:00")]);
    }

    #[test]
    fn test_full_lifecycle_with_flow() {
        let (store, segment_id) = seeded_store();
        let flow = Flow::new(
            segment_id,
            vec![
                FlowStep::email(1, "Welcome", ""),
                FlowStep::wait(2, 3),
                FlowStep::email(3, "Follow up", ""),
                FlowStep::exit(4),
            ],
        );
        let flow_id = flow.id;
        store.flows().insert(flow);

        let sink = Arc::new(RecordingSink::new());
        let events = capture_sink();
        let lifecycle = lifecycle(&store, sink.clone()).with_event_sink(events.clone());

        let campaign = lifecycle.create(flow_request(segment_id, Some(flow_id)), now()).unwrap();
        let report = lifecycle.activate(campaign.id, now()).unwrap();
        assert_eq!(report.recipients, 1);
        assert_eq!(report.sent, 2);
        let send_times: Vec<NaiveDateTime> = sink.deliveries().iter().map(|d| d.send_at).collect();
        assert_eq!(send_times, vec![at("2024-01-01T10:00"), at("2024-01-04T10:00")]);

        lifecycle.pause(campaign.id, now()).unwrap();
        lifecycle.resume(campaign.id, now()).unwrap();
        let done = lifecycle.complete(campaign.id, now()).unwrap();
        assert_eq!(done.status, CampaignStatus::Completed);

        assert!(matches!(
            lifecycle.resume(campaign.id, now()),
            Err(AudienceError::InvalidTransition { .. })
        ));
        assert_eq!(events.count_type(EventType::CampaignResumed), 1);
        assert_eq!(lifecycle.stats(campaign.id).delivered, 2);
    }

    #[test]
    fn test_exit_limits_deliveries() {
        let (store, segment_id) = seeded_store();
        let flow = Flow::new(
            segment_id,
            vec![
                FlowStep::email(1, "Only this", ""),
                FlowStep::exit(2),
                FlowStep::email(3, "Never", ""),
            ],
        );
        let flow_id = flow.id;
        store.flows().insert(flow);

        let sink = Arc::new(RecordingSink::new());
        let lifecycle = lifecycle(&store, sink.clone());
        let campaign = lifecycle.create(flow_request(segment_id, Some(flow_id)), now()).unwrap();
        let report = lifecycle.activate(campaign.id, now()).unwrap();
        assert_eq!(report.scheduled_steps.len(), 1);
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn test_zero_match_activation_is_legal() {
        let store = Arc::new(MemoryStore::new());
        store.add_customer(customer("small@example.com", 10.0, true));
        let segment = audience_segmentation::SegmentBuilder::new("Nobody")
            .total_order_value_above(1_000_000.0)
            .build()
            .unwrap();
        let segment_id = segment.id;
        store.segments().insert(segment);

        let sink = Arc::new(RecordingSink::new());
        let lifecycle = lifecycle(&store, sink.clone());
        let campaign = lifecycle.create(flow_request(segment_id, None), now()).unwrap();
        let report = lifecycle.activate(campaign.id, now()).unwrap();

        assert_eq!(report.recipients, 0);
        assert_eq!(report.sent, 0);
        assert!(report.failures.is_empty());
        assert_eq!(lifecycle.get(campaign.id).unwrap().status, CampaignStatus::Active);
    }

    #[test]
    fn test_partial_failure_then_redispatch() {
        let (store, segment_id) = seeded_store();
        let extra = customer("second@example.com", 5000.0, true);
        let extra_id = extra.id;
        store.add_customer(extra);

        let sink = Arc::new(RecordingSink::new());
        sink.fail_for(extra_id, "mailbox unavailable");
        let lifecycle = lifecycle(&store, sink.clone());
        let campaign = lifecycle.create(flow_request(segment_id, None), now()).unwrap();

        let report = lifecycle.activate(campaign.id, now()).unwrap();
        assert_eq!(report.recipients, 2);
        assert_eq!(report.sent, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].customer_id, extra_id);
        assert_eq!(report.failures[0].reason, "mailbox unavailable");

        sink.clear_failures();
        let retry = lifecycle.redispatch(campaign.id, now()).unwrap();
        assert_eq!(retry.sent, 1);
        assert_eq!(retry.skipped, 1);
        assert!(retry.is_complete());

        // Each (campaign, step, customer) key reached the sink exactly once.
        assert_eq!(sink.count(), 2);
        assert_eq!(sink.count_for(extra_id), 1);

        let again = lifecycle.redispatch(campaign.id, now()).unwrap();
        assert_eq!(again.sent, 0);
        assert_eq!(again.skipped, 2);
    }

    struct FlakySink;

    impl DeliverySink for FlakySink {
        fn dispatch(
            &self,
            _campaign_id: Uuid,
            step: &ScheduledStep,
            _customer: &CustomerRecord,
        ) -> DeliveryResult {
            if step.step_order() == 1 {
                DeliveryResult::failed("gateway timeout")
            } else {
                DeliveryResult::Delivered
            }
        }
    }

    #[test]
    fn test_failure_does_not_abort_later_steps() {
        let (store, segment_id) = seeded_store();
        let flow = Flow::new(
            segment_id,
            vec![FlowStep::email(1, "First", ""), FlowStep::push(2, "Second", "")],
        );
        let flow_id = flow.id;
        store.flows().insert(flow);

        let lifecycle = lifecycle(&store, Arc::new(FlakySink));
        let campaign = lifecycle.create(flow_request(segment_id, Some(flow_id)), now()).unwrap();
        let report = lifecycle.activate(campaign.id, now()).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.sent, 1);
    }

    #[test]
    fn test_segment_mismatch_rejected() {
        let (store, segment_id) = seeded_store();
        let other = audience_segmentation::SegmentBuilder::new("Other")
            .opted_in()
            .build()
            .unwrap();
        let flow = Flow::new(other.id, vec![FlowStep::email(1, "Hi", "")]);
        let flow_id = flow.id;
        store.segments().insert(other);
        store.flows().insert(flow);

        let lifecycle = lifecycle(&store, Arc::new(RecordingSink::new()));
        let campaign = lifecycle.create(flow_request(segment_id, Some(flow_id)), now()).unwrap();
        assert!(matches!(
            lifecycle.activate(campaign.id, now()),
            Err(AudienceError::SegmentMismatch { .. })
        ));
    }

    #[test]
    fn test_concurrent_activation_dispatches_once() {
        let (store, segment_id) = seeded_store();
        let sink = Arc::new(RecordingSink::new());
        let lifecycle = lifecycle(&store, sink.clone());
        let campaign = lifecycle.create(flow_request(segment_id, None), now()).unwrap();

        let results: Vec<bool> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| lifecycle.activate(campaign.id, now()).is_ok()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|ok| **ok).count(), 1);
        assert_eq!(sink.count(), 1);
    }
}
