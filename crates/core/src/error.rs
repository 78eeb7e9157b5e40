use thiserror::Error;

pub type AudienceResult<T> = Result<T, AudienceError>;

#[derive(Error, Debug)]
pub enum AudienceError {
    #[error("Invalid segment definition: {0}")]
    InvalidDefinition(String),

    #[error("Invalid flow: {0}")]
    InvalidFlow(String),

    #[error("Invalid transition: cannot {event} a {from} campaign")]
    InvalidTransition { from: String, event: String },

    #[error("Segment mismatch: flow uses {flow_segment}, campaign uses {campaign_segment}")]
    SegmentMismatch {
        flow_segment: String,
        campaign_segment: String,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Collaborator unavailable: {0}")]
    Collaborator(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Coarse classification used by the HTTP layer to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ClientError,
    NotFound,
    Retryable,
    Internal,
}

impl AudienceError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidDefinition(_)
            | Self::InvalidFlow(_)
            | Self::InvalidTransition { .. }
            | Self::SegmentMismatch { .. }
            | Self::Serialization(_) => ErrorKind::ClientError,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Collaborator(_) => ErrorKind::Retryable,
            Self::Config(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}
