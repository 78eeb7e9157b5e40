//! Customer segmentation: typed criteria, the predicate evaluator, and the
//! segment service that applies it across a customer collection.

pub mod builder;
pub mod criteria;
pub mod evaluator;
pub mod repository;
pub mod service;

pub use builder::SegmentBuilder;
pub use criteria::{
    Criterion, CriterionValue, FieldKind, FieldName, LogicalOperator, Operator, Segment,
    SegmentDefinition,
};
pub use evaluator::evaluate;
pub use repository::{MemorySegmentRepository, SegmentRepository};
pub use service::{SegmentPreview, SegmentService};
