//! Flow persistence contract and an in-memory implementation.

use audience_core::AudienceResult;
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use crate::types::{Flow, FlowStep};

pub trait FlowRepository: Send + Sync {
    fn get(&self, flow_id: Uuid) -> AudienceResult<Option<Flow>>;

    /// Steps of the flow owned by `segment_id`, if the segment has one.
    fn get_by_segment(&self, segment_id: Uuid) -> AudienceResult<Option<Vec<FlowStep>>>;
}

/// DashMap-backed flow table. A segment owns at most one flow; inserting a
/// second flow for the same segment replaces the first.
#[derive(Default)]
pub struct MemoryFlowRepository {
    flows: DashMap<Uuid, Flow>,
    by_segment: DashMap<Uuid, Uuid>,
}

impl MemoryFlowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, flow: Flow) {
        info!(
            flow_id = %flow.id,
            segment_id = %flow.segment_id,
            steps = flow.steps.len(),
            "Storing flow"
        );
        let moved_from = self
            .flows
            .get(&flow.id)
            .map(|existing| existing.segment_id)
            .filter(|segment_id| *segment_id != flow.segment_id);
        if let Some(old_segment) = moved_from {
            self.by_segment.remove_if(&old_segment, |_, id| *id == flow.id);
        }
        if let Some(previous) = self.by_segment.insert(flow.segment_id, flow.id) {
            if previous != flow.id {
                self.flows.remove(&previous);
            }
        }
        self.flows.insert(flow.id, flow);
    }

    /// Replaces the steps of an existing flow. Returns `false` if the flow is unknown.
    pub fn replace_steps(&self, flow_id: Uuid, steps: Vec<FlowStep>) -> bool {
        match self.flows.get_mut(&flow_id) {
            Some(mut flow) => {
                flow.steps = steps;
                true
            }
            None => false,
        }
    }
}

impl FlowRepository for MemoryFlowRepository {
    fn get(&self, flow_id: Uuid) -> AudienceResult<Option<Flow>> {
        Ok(self.flows.get(&flow_id).map(|r| r.value().clone()))
    }

    fn get_by_segment(&self, segment_id: Uuid) -> AudienceResult<Option<Vec<FlowStep>>> {
        let Some(flow_id) = self.by_segment.get(&segment_id).map(|r| *r.value()) else {
            return Ok(None);
        };
        Ok(self.flows.get(&flow_id).map(|f| f.steps.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_owns_one_flow() {
        let repo = MemoryFlowRepository::new();
        let segment_id = Uuid::new_v4();
        let first = Flow::new(segment_id, vec![FlowStep::email(1, "First", "")]);
        let first_id = first.id;
        repo.insert(first);

        let second = Flow::new(segment_id, vec![FlowStep::push(1, "Second", "")]);
        repo.insert(second);

        assert!(repo.get(first_id).unwrap().is_none());
        let steps = repo.get_by_segment(segment_id).unwrap().unwrap();
        assert_eq!(steps, vec![FlowStep::push(1, "Second", "")]);
        assert!(repo.get_by_segment(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_reinsert_moves_flow_to_new_segment() {
        let repo = MemoryFlowRepository::new();
        let old_segment = Uuid::new_v4();
        let mut flow = Flow::new(old_segment, vec![FlowStep::email(1, "Hi", "")]);
        let flow_id = flow.id;
        repo.insert(flow.clone());

        let new_segment = Uuid::new_v4();
        flow.segment_id = new_segment;
        repo.insert(flow);

        assert!(repo.get_by_segment(old_segment).unwrap().is_none());
        assert_eq!(
            repo.get_by_segment(new_segment).unwrap().unwrap(),
            vec![FlowStep::email(1, "Hi", "")]
        );
        assert_eq!(repo.get(flow_id).unwrap().unwrap().segment_id, new_segment);
    }

    #[test]
    fn test_replace_steps() {
        let repo = MemoryFlowRepository::new();
        let flow = Flow::new(Uuid::new_v4(), vec![]);
        let flow_id = flow.id;
        repo.insert(flow);

        assert!(repo.replace_steps(flow_id, vec![FlowStep::exit(1)]));
        assert_eq!(repo.get(flow_id).unwrap().unwrap().steps.len(), 1);
        assert!(!repo.replace_steps(Uuid::new_v4(), vec![]));
    }
}
