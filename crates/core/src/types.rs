use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Customer snapshot handed to the segment evaluator.
///
/// Aggregates (`total_order_value`, `order_count`, `last_order_date`) are
/// maintained by [`CustomerRecord::apply_order`] as orders are recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default = "default_opt_in")]
    pub marketing_opt_in: bool,
    #[serde(default)]
    pub shipping_state: Option<String>,
    #[serde(default)]
    pub shipping_country: Option<String>,
    #[serde(default)]
    pub total_order_value: f64,
    #[serde(default)]
    pub order_count: u32,
    #[serde(default)]
    pub last_order_date: Option<DateTime<Utc>>,
}

fn default_opt_in() -> bool {
    true
}

impl CustomerRecord {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            first_name: String::new(),
            last_name: String::new(),
            phone: None,
            marketing_opt_in: true,
            shipping_state: None,
            shipping_country: None,
            total_order_value: 0.0,
            order_count: 0,
            last_order_date: None,
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// Folds a completed order into the customer's aggregates. Cancelled and
    /// refunded orders are ignored.
    pub fn apply_order(&mut self, order: &Order) {
        if order.customer_id != self.id || !order.order_status.counts_towards_value() {
            return;
        }
        self.total_order_value += order.total_amount;
        self.order_count += 1;
        if self.last_order_date.map_or(true, |d| order.order_date > d) {
            self.last_order_date = Some(order.order_date);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub order_date: DateTime<Utc>,
    pub order_status: OrderStatus,
    pub total_amount: f64,
    pub currency: String,
    pub channel: String,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Completed,
    Shipped,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn counts_towards_value(self) -> bool {
        !matches!(self, OrderStatus::Cancelled | OrderStatus::Refunded)
    }
}
