//! Campaign lifecycle: the state machine gating campaign operations and the
//! orchestrator that evaluates a segment, plans its flow and dispatches the
//! resulting deliveries on activation.
//!
//! Persistence and delivery are collaborator traits; `MemoryStore` and
//! `RecordingSink` provide in-memory versions for development and tests.

pub mod delivery;
pub mod lifecycle;
pub mod models;
pub mod state_machine;
pub mod store;

pub use delivery::{
    Activation, CampaignDeliveryStats, DeliveryKey, DeliveryReport, DeliveryResult, DeliverySink,
    RecordedDelivery, RecordingSink, UndeliveredPair,
};
pub use lifecycle::CampaignLifecycle;
pub use models::{
    BlastMessage, Campaign, CampaignStatus, CreateCampaignRequest, UpdateCampaignRequest,
};
pub use state_machine::{CampaignStateMachine, LifecycleEvent};
pub use store::{CampaignRepository, DemoSeed, MemoryStore};
