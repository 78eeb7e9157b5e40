//! Criteria model: a segment is one logical operator applied to a flat list
//! of field/operator/value tests.
//!
//! The JSON shape is shared with the CRUD layer and the content generator:
//!
//! ```json
//! { "logical_operator": "AND",
//!   "criteria": [ { "field": "total_order_value", "operator": "gt", "value": 1000 } ] }
//! ```

use std::fmt;

use audience_core::{AudienceError, AudienceResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const RELATIVE_PREFIX: &str = "relative_";

/// A named, persisted segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub definition: SegmentDefinition,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    TotalOrderValue,
    OrderCount,
    LastOrderDate,
    /// Derived from `last_order_date` at evaluation time.
    DaysSinceLastOrder,
    ShippingState,
    ShippingCountry,
    Email,
    MarketingOptIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Numeric,
    Text,
    Boolean,
    Date,
}

impl FieldName {
    pub const ALL: [FieldName; 8] = [
        FieldName::TotalOrderValue,
        FieldName::OrderCount,
        FieldName::LastOrderDate,
        FieldName::DaysSinceLastOrder,
        FieldName::ShippingState,
        FieldName::ShippingCountry,
        FieldName::Email,
        FieldName::MarketingOptIn,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldName::TotalOrderValue => "total_order_value",
            FieldName::OrderCount => "order_count",
            FieldName::LastOrderDate => "last_order_date",
            FieldName::DaysSinceLastOrder => "days_since_last_order",
            FieldName::ShippingState => "shipping_state",
            FieldName::ShippingCountry => "shipping_country",
            FieldName::Email => "email",
            FieldName::MarketingOptIn => "marketing_opt_in",
        }
    }

    pub fn parse(name: &str) -> AudienceResult<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == name)
            .ok_or_else(|| AudienceError::InvalidDefinition(format!("unknown field '{name}'")))
    }

    pub fn kind(self) -> FieldKind {
        match self {
            FieldName::TotalOrderValue | FieldName::OrderCount | FieldName::DaysSinceLastOrder => {
                FieldKind::Numeric
            }
            FieldName::ShippingState | FieldName::ShippingCountry | FieldName::Email => {
                FieldKind::Text
            }
            FieldName::MarketingOptIn => FieldKind::Boolean,
            FieldName::LastOrderDate => FieldKind::Date,
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Contains,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Gt => "gt",
            Operator::Lt => "lt",
            Operator::Gte => "gte",
            Operator::Lte => "lte",
            Operator::Eq => "eq",
            Operator::Contains => "contains",
        }
    }

    pub fn parse(symbol: &str) -> AudienceResult<Self> {
        match symbol {
            "gt" => Ok(Operator::Gt),
            "lt" => Ok(Operator::Lt),
            "gte" => Ok(Operator::Gte),
            "lte" => Ok(Operator::Lte),
            "eq" => Ok(Operator::Eq),
            "contains" => Ok(Operator::Contains),
            other => Err(AudienceError::InvalidDefinition(format!(
                "unknown operator '{other}'"
            ))),
        }
    }
}

impl FieldKind {
    pub fn allows(self, operator: Operator) -> bool {
        use Operator::*;
        match self {
            FieldKind::Numeric => matches!(operator, Gt | Lt | Gte | Lte | Eq),
            FieldKind::Text => matches!(operator, Eq | Contains),
            FieldKind::Boolean => matches!(operator, Eq),
            FieldKind::Date => matches!(operator, Gt | Lt | Eq),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    #[default]
    #[serde(alias = "and")]
    And,
    #[serde(alias = "or")]
    Or,
}

/// Right-hand side of a criterion, typed by the field it tests.
#[derive(Debug, Clone, PartialEq)]
pub enum CriterionValue {
    Number(f64),
    Text(String),
    Bool(bool),
    /// An absolute instant, compared chronologically.
    Date(DateTime<Utc>),
    /// `relative_N`: N days before evaluation time, compared by age.
    RelativeDays(u32),
}

impl CriterionValue {
    fn fits(&self, kind: FieldKind) -> bool {
        matches!(
            (self, kind),
            (CriterionValue::Number(_), FieldKind::Numeric)
                | (CriterionValue::Text(_), FieldKind::Text)
                | (CriterionValue::Bool(_), FieldKind::Boolean)
                | (CriterionValue::Date(_), FieldKind::Date)
                | (CriterionValue::RelativeDays(_), FieldKind::Date)
        )
    }

    fn from_json(field: FieldName, value: &serde_json::Value) -> AudienceResult<Self> {
        let invalid = || {
            AudienceError::InvalidDefinition(format!("invalid value {value} for field '{field}'"))
        };
        match field.kind() {
            FieldKind::Numeric => value.as_f64().map(CriterionValue::Number).ok_or_else(invalid),
            FieldKind::Text => value
                .as_str()
                .map(|s| CriterionValue::Text(s.to_string()))
                .ok_or_else(invalid),
            FieldKind::Boolean => value.as_bool().map(CriterionValue::Bool).ok_or_else(invalid),
            FieldKind::Date => value
                .as_str()
                .and_then(parse_date_value)
                .ok_or_else(invalid),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            CriterionValue::Number(n) => serde_json::json!(n),
            CriterionValue::Text(s) => serde_json::json!(s),
            CriterionValue::Bool(b) => serde_json::json!(b),
            CriterionValue::Date(d) => serde_json::json!(d.to_rfc3339()),
            CriterionValue::RelativeDays(n) => serde_json::json!(format!("{RELATIVE_PREFIX}{n}")),
        }
    }
}

fn parse_date_value(raw: &str) -> Option<CriterionValue> {
    if let Some(days) = raw.strip_prefix(RELATIVE_PREFIX) {
        return days.parse().ok().map(CriterionValue::RelativeDays);
    }
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Some(CriterionValue::Date(instant.with_timezone(&Utc)));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| CriterionValue::Date(d.and_utc()))
}

/// One field/operator/value test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCriterion", into = "RawCriterion")]
pub struct Criterion {
    pub field: FieldName,
    pub operator: Operator,
    pub value: CriterionValue,
}

impl Criterion {
    pub fn new(
        field: FieldName,
        operator: Operator,
        value: CriterionValue,
    ) -> AudienceResult<Self> {
        let criterion = Self {
            field,
            operator,
            value,
        };
        criterion.validate()?;
        Ok(criterion)
    }

    pub fn validate(&self) -> AudienceResult<()> {
        let kind = self.field.kind();
        if !kind.allows(self.operator) {
            return Err(AudienceError::InvalidDefinition(format!(
                "operator '{}' is not valid for field '{}'",
                self.operator.as_str(),
                self.field
            )));
        }
        if !self.value.fits(kind) {
            return Err(AudienceError::InvalidDefinition(format!(
                "value {:?} does not fit field '{}'",
                self.value, self.field
            )));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct RawCriterion {
    field: String,
    operator: String,
    value: serde_json::Value,
}

impl TryFrom<RawCriterion> for Criterion {
    type Error = AudienceError;

    fn try_from(raw: RawCriterion) -> Result<Self, Self::Error> {
        let field = FieldName::parse(&raw.field)?;
        let operator = Operator::parse(&raw.operator)?;
        let value = CriterionValue::from_json(field, &raw.value)?;
        Criterion::new(field, operator, value)
    }
}

impl From<Criterion> for RawCriterion {
    fn from(c: Criterion) -> Self {
        RawCriterion {
            field: c.field.as_str().to_string(),
            operator: c.operator.as_str().to_string(),
            value: c.value.to_json(),
        }
    }
}

/// A flat predicate: every criterion combined with one logical operator.
///
/// Deserialization also accepts the legacy flat form
/// `{"total_order_value": {"gt": 1000}}`, which is read as an AND list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value")]
pub struct SegmentDefinition {
    pub logical_operator: LogicalOperator,
    pub criteria: Vec<Criterion>,
}

#[derive(Deserialize)]
struct StandardDefinition {
    #[serde(default)]
    logical_operator: LogicalOperator,
    #[serde(default)]
    criteria: Vec<Criterion>,
}

impl SegmentDefinition {
    pub fn new(logical_operator: LogicalOperator, criteria: Vec<Criterion>) -> Self {
        Self {
            logical_operator,
            criteria,
        }
    }

    /// Rejects empty criteria lists and field/operator/value mismatches.
    pub fn validate(&self) -> AudienceResult<()> {
        if self.criteria.is_empty() {
            return Err(AudienceError::InvalidDefinition(
                "criteria list is empty".to_string(),
            ));
        }
        self.criteria.iter().try_for_each(Criterion::validate)
    }

    /// Fields referenced by the criteria, in order, without duplicates.
    pub fn fields(&self) -> Vec<FieldName> {
        let mut fields = Vec::new();
        for criterion in &self.criteria {
            if !fields.contains(&criterion.field) {
                fields.push(criterion.field);
            }
        }
        fields
    }
}

impl TryFrom<serde_json::Value> for SegmentDefinition {
    type Error = AudienceError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        let obj = value.as_object().ok_or_else(|| {
            AudienceError::InvalidDefinition("definition must be a JSON object".to_string())
        })?;

        let has_criteria = obj
            .get("criteria")
            .and_then(|c| c.as_array())
            .is_some_and(|c| !c.is_empty());
        let has_legacy_keys = obj
            .keys()
            .any(|k| k != "logical_operator" && k != "criteria");

        if has_criteria || !has_legacy_keys {
            let standard: StandardDefinition = serde_json::from_value(value.clone())
                .map_err(|e| AudienceError::InvalidDefinition(e.to_string()))?;
            return Ok(Self::new(standard.logical_operator, standard.criteria));
        }

        let logical_operator = match obj.get("logical_operator") {
            Some(op) => serde_json::from_value(op.clone())
                .map_err(|e| AudienceError::InvalidDefinition(e.to_string()))?,
            None => LogicalOperator::And,
        };
        let mut criteria = Vec::new();
        for (field, condition) in obj {
            if field == "logical_operator" || field == "criteria" {
                continue;
            }
            let conditions = condition.as_object().ok_or_else(|| {
                AudienceError::InvalidDefinition(format!(
                    "legacy condition for '{field}' must be an object"
                ))
            })?;
            for (operator, op_value) in conditions {
                criteria.push(Criterion::try_from(RawCriterion {
                    field: field.clone(),
                    operator: operator.clone(),
                    value: op_value.clone(),
                })?);
            }
        }
        Ok(Self::new(logical_operator, criteria))
    }
}
