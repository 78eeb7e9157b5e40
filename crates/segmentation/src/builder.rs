//! Segment builder: fluent API for constructing segment criteria.

use audience_core::AudienceResult;
use chrono::Utc;
use uuid::Uuid;

use crate::criteria::{
    Criterion, CriterionValue, FieldName, LogicalOperator, Operator, Segment, SegmentDefinition,
};

pub struct SegmentBuilder {
    name: String,
    description: Option<String>,
    operator: LogicalOperator,
    criteria: Vec<Criterion>,
}

impl SegmentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            operator: LogicalOperator::And,
            criteria: Vec::new(),
        }
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_or(mut self) -> Self {
        self.operator = LogicalOperator::Or;
        self
    }

    /// Adds an arbitrary criterion; the combination is checked in [`build`](Self::build).
    pub fn criterion(
        mut self,
        field: FieldName,
        operator: Operator,
        value: CriterionValue,
    ) -> Self {
        self.criteria.push(Criterion {
            field,
            operator,
            value,
        });
        self
    }

    pub fn total_order_value_above(self, amount: f64) -> Self {
        self.criterion(FieldName::TotalOrderValue, Operator::Gt, CriterionValue::Number(amount))
    }

    pub fn min_orders(self, count: u32) -> Self {
        self.criterion(
            FieldName::OrderCount,
            Operator::Gte,
            CriterionValue::Number(f64::from(count)),
        )
    }

    pub fn opted_in(self) -> Self {
        self.criterion(FieldName::MarketingOptIn, Operator::Eq, CriterionValue::Bool(true))
    }

    pub fn ordered_within_days(self, days: u32) -> Self {
        self.criterion(FieldName::LastOrderDate, Operator::Lt, CriterionValue::RelativeDays(days))
    }

    pub fn not_ordered_within_days(self, days: u32) -> Self {
        self.criterion(FieldName::LastOrderDate, Operator::Gt, CriterionValue::RelativeDays(days))
    }

    pub fn ships_to_state(self, state: impl Into<String>) -> Self {
        self.criterion(FieldName::ShippingState, Operator::Eq, CriterionValue::Text(state.into()))
    }

    pub fn ships_to_country(self, country: impl Into<String>) -> Self {
        self.criterion(
            FieldName::ShippingCountry,
            Operator::Eq,
            CriterionValue::Text(country.into()),
        )
    }

    pub fn build(self) -> AudienceResult<Segment> {
        let definition = SegmentDefinition::new(self.operator, self.criteria);
        definition.validate()?;
        Ok(Segment {
            id: Uuid::new_v4(),
            name: self.name,
            description: self.description,
            definition,
            created_at: Utc::now(),
        })
    }
}
