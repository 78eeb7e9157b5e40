//! Predicate evaluator: decides whether one customer matches a definition.
//!
//! Evaluation is pure: the caller supplies `now`, and nothing is cached or
//! shared between calls, so customers can be evaluated in any order or in
//! parallel.

use std::cmp::Ordering;

use audience_core::{AudienceResult, CustomerRecord};
use chrono::{DateTime, Duration, Utc};

use crate::criteria::{
    Criterion, CriterionValue, FieldName, LogicalOperator, Operator, SegmentDefinition,
};

/// Age assigned to customers who have never ordered.
pub const NEVER_ORDERED_DAYS: f64 = 999_999.0;

/// Evaluates `definition` against one customer record.
///
/// Fails with `InvalidDefinition` when the criteria list is empty or holds a
/// field/operator combination the field does not support.
pub fn evaluate(
    definition: &SegmentDefinition,
    record: &CustomerRecord,
    now: DateTime<Utc>,
) -> AudienceResult<bool> {
    definition.validate()?;
    Ok(matches_definition(definition, record, now))
}

/// Evaluation without validation, for callers that validated the definition
/// once up front.
pub(crate) fn matches_definition(
    definition: &SegmentDefinition,
    record: &CustomerRecord,
    now: DateTime<Utc>,
) -> bool {
    let mut results = definition
        .criteria
        .iter()
        .map(|c| evaluate_criterion(c, record, now));
    match definition.logical_operator {
        LogicalOperator::And => results.all(|r| r),
        LogicalOperator::Or => results.any(|r| r),
    }
}

/// Runtime value of a field on a record.
enum FieldValue<'a> {
    Number(f64),
    Text(&'a str),
    Bool(bool),
    /// `None` means the customer has never ordered.
    Date(Option<DateTime<Utc>>),
    Absent,
}

fn resolve_field(field: FieldName, record: &CustomerRecord, now: DateTime<Utc>) -> FieldValue<'_> {
    match field {
        FieldName::TotalOrderValue => FieldValue::Number(record.total_order_value),
        FieldName::OrderCount => FieldValue::Number(f64::from(record.order_count)),
        FieldName::LastOrderDate => FieldValue::Date(record.last_order_date),
        FieldName::DaysSinceLastOrder => FieldValue::Number(
            record
                .last_order_date
                .map_or(NEVER_ORDERED_DAYS, |d| (now - d).num_days() as f64),
        ),
        FieldName::ShippingState => record
            .shipping_state
            .as_deref()
            .map_or(FieldValue::Absent, FieldValue::Text),
        FieldName::ShippingCountry => record
            .shipping_country
            .as_deref()
            .map_or(FieldValue::Absent, FieldValue::Text),
        FieldName::Email => FieldValue::Text(&record.email),
        FieldName::MarketingOptIn => FieldValue::Bool(record.marketing_opt_in),
    }
}

/// Evaluates a single criterion. Absent values never match, except a missing
/// `last_order_date`, which is treated as infinitely old.
pub fn evaluate_criterion(
    criterion: &Criterion,
    record: &CustomerRecord,
    now: DateTime<Utc>,
) -> bool {
    match (resolve_field(criterion.field, record, now), &criterion.value) {
        (FieldValue::Number(actual), CriterionValue::Number(expected)) => {
            compare_numbers(actual, criterion.operator, *expected)
        }
        (FieldValue::Text(actual), CriterionValue::Text(expected)) => {
            compare_text(actual, criterion.operator, expected)
        }
        (FieldValue::Bool(actual), CriterionValue::Bool(expected)) => {
            criterion.operator == Operator::Eq && actual == *expected
        }
        (FieldValue::Date(actual), CriterionValue::RelativeDays(days)) => {
            compare_age(actual, criterion.operator, relative_cutoff(now, *days))
        }
        (FieldValue::Date(actual), CriterionValue::Date(instant)) => {
            compare_dates(actual, criterion.operator, *instant)
        }
        _ => false,
    }
}

pub fn compare_numbers(actual: f64, operator: Operator, expected: f64) -> bool {
    let Some(ordering) = actual.partial_cmp(&expected) else {
        return false;
    };
    match operator {
        Operator::Gt => ordering == Ordering::Greater,
        Operator::Gte => ordering != Ordering::Less,
        Operator::Lt => ordering == Ordering::Less,
        Operator::Lte => ordering != Ordering::Greater,
        Operator::Eq => ordering == Ordering::Equal,
        Operator::Contains => false,
    }
}

pub fn compare_text(actual: &str, operator: Operator, expected: &str) -> bool {
    let actual = actual.to_lowercase();
    let expected = expected.to_lowercase();
    match operator {
        Operator::Eq => actual == expected,
        Operator::Contains => actual.contains(&expected),
        _ => false,
    }
}

/// `now - days`, or `None` when that instant is before the calendar range.
fn relative_cutoff(now: DateTime<Utc>, days: u32) -> Option<DateTime<Utc>> {
    Duration::try_days(i64::from(days)).and_then(|delta| now.checked_sub_signed(delta))
}

/// Relative-date semantics: `lt relative_N` means "more recent than N days
/// ago", `gt` means "older than", `eq` means "on that calendar day".
///
/// A missing order date and a cutoff past the calendar range are both
/// infinitely old.
fn compare_age(
    actual: Option<DateTime<Utc>>,
    operator: Operator,
    cutoff: Option<DateTime<Utc>>,
) -> bool {
    match (actual, cutoff) {
        (None, _) => operator == Operator::Gt,
        (Some(_), None) => operator == Operator::Lt,
        (Some(date), Some(cutoff)) => match operator {
            Operator::Lt => date > cutoff,
            Operator::Gt => date < cutoff,
            Operator::Eq => date.date_naive() == cutoff.date_naive(),
            _ => false,
        },
    }
}

/// Absolute-date semantics: plain chronological comparison.
fn compare_dates(
    actual: Option<DateTime<Utc>>,
    operator: Operator,
    instant: DateTime<Utc>,
) -> bool {
    match actual {
        None => operator == Operator::Lt,
        Some(date) => match operator {
            Operator::Gt => date > instant,
            Operator::Lt => date < instant,
            Operator::Eq => date.date_naive() == instant.date_naive(),
            _ => false,
        },
    }
}
