//! Segment persistence contract and an in-memory implementation.

use audience_core::AudienceResult;
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use crate::criteria::Segment;

pub trait SegmentRepository: Send + Sync {
    fn get(&self, id: Uuid) -> AudienceResult<Option<Segment>>;
    fn list(&self) -> AudienceResult<Vec<Segment>>;
}

/// DashMap-backed segment table for development and tests.
#[derive(Default)]
pub struct MemorySegmentRepository {
    segments: DashMap<Uuid, Segment>,
}

impl MemorySegmentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, segment: Segment) {
        info!(segment_id = %segment.id, name = %segment.name, "Storing segment");
        self.segments.insert(segment.id, segment);
    }

    pub fn remove(&self, id: Uuid) -> Option<Segment> {
        self.segments.remove(&id).map(|(_, s)| s)
    }
}

impl SegmentRepository for MemorySegmentRepository {
    fn get(&self, id: Uuid) -> AudienceResult<Option<Segment>> {
        Ok(self.segments.get(&id).map(|r| r.value().clone()))
    }

    fn list(&self) -> AudienceResult<Vec<Segment>> {
        let mut segments: Vec<Segment> = self.segments.iter().map(|r| r.value().clone()).collect();
        segments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(segments)
    }
}
