//! In-memory store backed by DashMap.
//!
//! Implements every persistence collaborator the lifecycle needs so the
//! core can run without a database in development and tests.

use std::sync::Arc;

use audience_core::repository::CustomerSource;
use audience_core::types::OrderStatus;
use audience_core::{AudienceError, AudienceResult, CustomerRecord, Order};
use audience_flows::{EntryConditionType, Flow, FlowStep, MemoryFlowRepository};
use audience_segmentation::{MemorySegmentRepository, SegmentBuilder};
use chrono::{Duration, NaiveTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::models::{BlastMessage, Campaign, CampaignStatus};

pub trait CampaignRepository: Send + Sync {
    fn get(&self, id: Uuid) -> AudienceResult<Option<Campaign>>;
    fn put(&self, campaign: Campaign) -> AudienceResult<()>;
    fn list(&self) -> AudienceResult<Vec<Campaign>>;
}

/// Ids of the records created by [`MemoryStore::seed_demo_data`].
#[derive(Debug, Clone, Copy)]
pub struct DemoSeed {
    pub segment_id: Uuid,
    pub flow_id: Uuid,
    pub campaign_id: Uuid,
}

/// Thread-safe in-memory store for customers, orders, segments, flows and campaigns.
pub struct MemoryStore {
    // Vec keeps insertion order stable for `fetch_all`.
    customers: RwLock<Vec<CustomerRecord>>,
    orders: DashMap<Uuid, Order>,
    campaigns: DashMap<Uuid, Campaign>,
    segments: Arc<MemorySegmentRepository>,
    flows: Arc<MemoryFlowRepository>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        info!("Audience store initialized (in-memory, development mode)");
        Self {
            customers: RwLock::new(Vec::new()),
            orders: DashMap::new(),
            campaigns: DashMap::new(),
            segments: Arc::new(MemorySegmentRepository::new()),
            flows: Arc::new(MemoryFlowRepository::new()),
        }
    }

    pub fn segments(&self) -> Arc<MemorySegmentRepository> {
        Arc::clone(&self.segments)
    }

    pub fn flows(&self) -> Arc<MemoryFlowRepository> {
        Arc::clone(&self.flows)
    }

    // ─── Customers & orders ────────────────────────────────────────────────

    /// Adds a customer, replacing any existing record with the same id.
    pub fn add_customer(&self, customer: CustomerRecord) {
        let mut customers = self.customers.write();
        match customers.iter_mut().find(|c| c.id == customer.id) {
            Some(existing) => *existing = customer,
            None => customers.push(customer),
        }
    }

    pub fn customer_count(&self) -> usize {
        self.customers.read().len()
    }

    /// Records an order and folds it into the owning customer's aggregates.
    pub fn add_order(&self, order: Order) -> AudienceResult<()> {
        let mut customers = self.customers.write();
        let customer = customers
            .iter_mut()
            .find(|c| c.id == order.customer_id)
            .ok_or_else(|| AudienceError::not_found("Customer", order.customer_id))?;
        customer.apply_order(&order);
        self.orders.insert(order.id, order);
        Ok(())
    }

    pub fn orders_for(&self, customer_id: Uuid) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|r| r.value().customer_id == customer_id)
            .map(|r| r.value().clone())
            .collect();
        orders.sort_by(|a, b| a.order_date.cmp(&b.order_date));
        orders
    }

    // ─── Seed data ─────────────────────────────────────────────────────────

    /// Populates a small customer base, a high-value segment, a welcome flow
    /// for it and a draft campaign starting today at 10:00.
    pub fn seed_demo_data(&self) -> AudienceResult<DemoSeed> {
        let now = Utc::now();

        let customers = vec![
            ("Ana", "Silva", "ana@example.com", "CA", true, vec![(1200.0, 5), (450.0, 40)]),
            ("Ben", "Okafor", "ben@example.com", "NY", true, vec![(2100.0, 12)]),
            ("Chloe", "Martin", "chloe@example.com", "TX", false, vec![(1800.0, 3)]),
            ("Dev", "Patel", "dev@example.com", "CA", true, vec![(300.0, 90)]),
            ("Eli", "Novak", "eli@example.com", "WA", true, vec![]),
        ];

        for (first, last, email, state, opt_in, orders) in customers {
            let mut customer = CustomerRecord::new(email);
            customer.first_name = first.to_string();
            customer.last_name = last.to_string();
            customer.shipping_state = Some(state.to_string());
            customer.shipping_country = Some("US".to_string());
            customer.marketing_opt_in = opt_in;
            let customer_id = customer.id;
            self.add_customer(customer);

            for (amount, days_ago) in orders {
                self.add_order(Order {
                    id: Uuid::new_v4(),
                    customer_id,
                    order_date: now - Duration::days(days_ago),
                    order_status: OrderStatus::Completed,
                    total_amount: amount,
                    currency: "USD".to_string(),
                    channel: "web".to_string(),
                    coupon_code: None,
                })?;
            }
        }

        let segment = SegmentBuilder::new("High-value subscribers")
            .description("Spent over $1,000 and accept marketing email")
            .total_order_value_above(1000.0)
            .opted_in()
            .build()?;
        let segment_id = segment.id;
        self.segments.insert(segment);

        let mut flow = Flow::new(
            segment_id,
            vec![
                FlowStep::email(
                    1,
                    "Thanks for being one of our best customers",
                    "Here is 10% off.",
                ),
                FlowStep::wait(2, 3),
                FlowStep::push(3, "Your reward is waiting", "Use it before it expires"),
                FlowStep::wait(4, 4),
                FlowStep::email(5, "Last chance for your reward", ""),
                FlowStep::exit(6),
            ],
        );
        flow.name = Some("VIP welcome".to_string());
        flow.entry_condition_type = Some(EntryConditionType::OrderCompleted);
        flow.validate()?;
        let flow_id = flow.id;
        self.flows.insert(flow);

        let campaign = Campaign {
            id: Uuid::new_v4(),
            name: "VIP rewards".to_string(),
            description: Some("Reward series for high-value subscribers".to_string()),
            segment_id,
            flow_id: Some(flow_id),
            status: CampaignStatus::Draft,
            start_date: now.date_naive(),
            start_time_of_day: NaiveTime::from_hms_opt(10, 0, 0),
            blast: Some(BlastMessage {
                subject: "A thank-you from us".to_string(),
                body_text: String::new(),
            }),
            schedule_start: None,
            activated_at: None,
            created_at: now,
            updated_at: now,
        };
        let campaign_id = campaign.id;
        self.campaigns.insert(campaign_id, campaign);

        info!(
            customers = self.customer_count(),
            orders = self.orders.len(),
            %segment_id,
            %flow_id,
            %campaign_id,
            "Demo data seeded"
        );
        Ok(DemoSeed {
            segment_id,
            flow_id,
            campaign_id,
        })
    }
}

impl CustomerSource for MemoryStore {
    fn fetch_all(&self) -> AudienceResult<Vec<CustomerRecord>> {
        Ok(self.customers.read().clone())
    }
}

impl CampaignRepository for MemoryStore {
    fn get(&self, id: Uuid) -> AudienceResult<Option<Campaign>> {
        Ok(self.campaigns.get(&id).map(|r| r.value().clone()))
    }

    fn put(&self, campaign: Campaign) -> AudienceResult<()> {
        self.campaigns.insert(campaign.id, campaign);
        Ok(())
    }

    fn list(&self) -> AudienceResult<Vec<Campaign>> {
        let mut campaigns: Vec<Campaign> =
            self.campaigns.iter().map(|r| r.value().clone()).collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(campaigns)
    }
}
