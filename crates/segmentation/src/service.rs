//! Segment service: applies the evaluator across a customer collection.
//!
//! The default strategy is a full scan over whatever the customer source
//! returns. Large collections are split across the rayon pool; the result is
//! identical because evaluation has no cross-record dependencies.

use std::sync::Arc;

use audience_core::config::SegmentationConfig;
use audience_core::repository::CustomerSource;
use audience_core::{AudienceError, AudienceResult, CustomerRecord};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::criteria::{FieldName, Segment, SegmentDefinition};
use crate::evaluator::{matches_definition, NEVER_ORDERED_DAYS};
use crate::repository::SegmentRepository;

/// Matching customers projected to a small display table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentPreview {
    pub segment_id: Option<Uuid>,
    pub total_count: usize,
    pub columns: Vec<String>,
    pub customers: Vec<PreviewRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewRow {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentCount {
    pub segment_id: Uuid,
    pub name: String,
    pub count: usize,
}

#[derive(Clone)]
pub struct SegmentService {
    config: SegmentationConfig,
    segments: Arc<dyn SegmentRepository>,
    customers: Arc<dyn CustomerSource>,
}

impl std::fmt::Debug for SegmentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentService")
            .field("config", &self.config)
            .finish()
    }
}

impl SegmentService {
    pub fn new(
        config: SegmentationConfig,
        segments: Arc<dyn SegmentRepository>,
        customers: Arc<dyn CustomerSource>,
    ) -> Self {
        Self {
            config,
            segments,
            customers,
        }
    }

    /// Number of customers matching `definition`.
    pub fn count(
        &self,
        definition: &SegmentDefinition,
        customers: &[CustomerRecord],
        now: DateTime<Utc>,
    ) -> AudienceResult<usize> {
        if customers.len() > self.config.parallel_threshold {
            return self.par_count(definition, customers, now);
        }
        definition.validate()?;
        metrics::counter!("segments.evaluations").increment(customers.len() as u64);
        let count = customers
            .iter()
            .filter(|c| matches_definition(definition, c, now))
            .count();
        debug!(customers = customers.len(), count, "Segment counted");
        Ok(count)
    }

    /// Partitioned variant of [`count`](Self::count), evaluated on the rayon pool.
    pub fn par_count(
        &self,
        definition: &SegmentDefinition,
        customers: &[CustomerRecord],
        now: DateTime<Utc>,
    ) -> AudienceResult<usize> {
        definition.validate()?;
        metrics::counter!("segments.evaluations").increment(customers.len() as u64);
        let count = customers
            .par_iter()
            .filter(|c| matches_definition(definition, c, now))
            .count();
        debug!(customers = customers.len(), count, "Segment counted in parallel");
        Ok(count)
    }

    /// First `limit` matches in input order. `None` uses the configured
    /// default; values above the configured maximum are clamped.
    pub fn matching_users(
        &self,
        definition: &SegmentDefinition,
        customers: &[CustomerRecord],
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> AudienceResult<Vec<CustomerRecord>> {
        let limit = self.effective_limit(limit)?;
        definition.validate()?;
        metrics::counter!("segments.evaluations").increment(customers.len() as u64);
        Ok(customers
            .iter()
            .filter(|c| matches_definition(definition, c, now))
            .take(limit)
            .cloned()
            .collect())
    }

    /// Every match, in input order. Used when materialising a campaign audience.
    pub fn all_matches(
        &self,
        definition: &SegmentDefinition,
        customers: &[CustomerRecord],
        now: DateTime<Utc>,
    ) -> AudienceResult<Vec<CustomerRecord>> {
        definition.validate()?;
        metrics::counter!("segments.evaluations").increment(customers.len() as u64);
        Ok(customers
            .iter()
            .filter(|c| matches_definition(definition, c, now))
            .cloned()
            .collect())
    }

    /// Total count plus the first `limit` matches projected to name, email
    /// and the first criterion field worth displaying.
    pub fn preview(
        &self,
        definition: &SegmentDefinition,
        customers: &[CustomerRecord],
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> AudienceResult<SegmentPreview> {
        let limit = self.effective_limit(limit)?;
        definition.validate()?;
        metrics::counter!("segments.evaluations").increment(customers.len() as u64);

        let display_field = definition
            .fields()
            .into_iter()
            .find(|f| *f != FieldName::Email);
        let mut columns = vec!["name".to_string(), "email".to_string()];
        if let Some(field) = display_field {
            columns.push(field.as_str().to_string());
        }

        let mut total_count = 0;
        let mut rows = Vec::new();
        for customer in customers.iter().filter(|c| matches_definition(definition, c, now)) {
            total_count += 1;
            if rows.len() < limit {
                let mut extra = serde_json::Map::new();
                if let Some(field) = display_field {
                    extra.insert(field.as_str().to_string(), display_value(field, customer, now));
                }
                rows.push(PreviewRow {
                    id: customer.id,
                    name: customer.display_name(),
                    email: customer.email.clone(),
                    extra,
                });
            }
        }

        Ok(SegmentPreview {
            segment_id: None,
            total_count,
            columns,
            customers: rows,
        })
    }

    /// Resolves a segment through the persistence collaborator.
    pub fn resolve(&self, segment_id: Uuid) -> AudienceResult<Segment> {
        self.segments
            .get(segment_id)?
            .ok_or_else(|| AudienceError::not_found("Segment", segment_id))
    }

    pub fn fetch_customers(&self) -> AudienceResult<Vec<CustomerRecord>> {
        self.customers.fetch_all()
    }

    pub fn count_by_id(&self, segment_id: Uuid, now: DateTime<Utc>) -> AudienceResult<usize> {
        let segment = self.resolve(segment_id)?;
        let customers = self.customers.fetch_all()?;
        let count = self.count(&segment.definition, &customers, now)?;
        info!(segment_id = %segment_id, count, "Segment evaluated");
        Ok(count)
    }

    pub fn matching_users_by_id(
        &self,
        segment_id: Uuid,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> AudienceResult<Vec<CustomerRecord>> {
        let segment = self.resolve(segment_id)?;
        let customers = self.customers.fetch_all()?;
        self.matching_users(&segment.definition, &customers, now, limit)
    }

    pub fn preview_by_id(
        &self,
        segment_id: Uuid,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> AudienceResult<SegmentPreview> {
        let segment = self.resolve(segment_id)?;
        let customers = self.customers.fetch_all()?;
        let mut preview = self.preview(&segment.definition, &customers, now, limit)?;
        preview.segment_id = Some(segment_id);
        Ok(preview)
    }

    /// Match counts for every stored segment. Segments whose definition is
    /// not evaluable (e.g. an empty draft) are skipped.
    pub fn counts(&self, now: DateTime<Utc>) -> AudienceResult<Vec<SegmentCount>> {
        let customers = self.customers.fetch_all()?;
        let mut counts = Vec::new();
        for segment in self.segments.list()? {
            match self.count(&segment.definition, &customers, now) {
                Ok(count) => counts.push(SegmentCount {
                    segment_id: segment.id,
                    name: segment.name,
                    count,
                }),
                Err(AudienceError::InvalidDefinition(reason)) => {
                    debug!(segment_id = %segment.id, %reason, "Skipping unevaluable segment");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(counts)
    }

    fn effective_limit(&self, limit: Option<usize>) -> AudienceResult<usize> {
        match limit {
            None => Ok(self.config.default_match_limit),
            Some(0) => Err(AudienceError::InvalidDefinition(
                "limit must be a positive integer".to_string(),
            )),
            Some(n) => Ok(n.min(self.config.max_match_limit)),
        }
    }
}

fn display_value(
    field: FieldName,
    record: &CustomerRecord,
    now: DateTime<Utc>,
) -> serde_json::Value {
    let placeholder = || serde_json::json!("-");
    match field {
        FieldName::TotalOrderValue => serde_json::json!(record.total_order_value),
        FieldName::OrderCount => serde_json::json!(record.order_count),
        FieldName::LastOrderDate => record
            .last_order_date
            .map_or_else(placeholder, |d| serde_json::json!(d.to_rfc3339())),
        FieldName::DaysSinceLastOrder => serde_json::json!(record
            .last_order_date
            .map_or(NEVER_ORDERED_DAYS as i64, |d| (now - d).num_days())),
        FieldName::ShippingState => record
            .shipping_state
            .as_ref()
            .map_or_else(placeholder, |s| serde_json::json!(s)),
        FieldName::ShippingCountry => record
            .shipping_country
            .as_ref()
            .map_or_else(placeholder, |s| serde_json::json!(s)),
        FieldName::Email => serde_json::json!(record.email),
        FieldName::MarketingOptIn => serde_json::json!(record.marketing_opt_in),
    }
}
