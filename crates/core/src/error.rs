use crate::domain::recommendation::{InteractionAction, RecommendationStatus};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Stored analysis results could not be read as JSON.
    #[error("malformed results for analysis {analysis_id}: {detail}")]
    Parse { analysis_id: Uuid, detail: String },

    #[error("rule {rule} failed to generate recommendations: {detail}")]
    Generation { rule: &'static str, detail: String },

    #[error("action {action} is not allowed from status {from}")]
    InvalidTransition {
        from: RecommendationStatus,
        action: InteractionAction,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("failed to decode stored row: {0}")]
    Decode(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }
}
