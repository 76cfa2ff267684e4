use crate::domain::analysis::Analysis;
use crate::domain::recommendation::{
    InteractionAction, InteractionEvent, InteractionOutcome, Recommendation, RecommendationDraft,
    RecommendationFilter,
};
use crate::error::EngineError;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

pub mod analyses;
pub mod lock;
pub mod memory;
pub mod partners;
pub mod recommendations;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// Read access to parsed lab analyses.
#[async_trait::async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn get_analysis(&self, id: Uuid) -> Result<Option<Analysis>, EngineError>;

    /// Most recently created abnormal analyses of `user_id`, newest first.
    async fn list_recent_abnormal(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Analysis>, EngineError>;
}

/// Durable recommendations and their interaction log.
#[async_trait::async_trait]
pub trait RecommendationStore: Send + Sync {
    /// Inserts every draft that has no live (ACTIVE or VIEWED) counterpart for the user
    /// and returns only the inserted records. Calls for one user are serialized.
    async fn persist(
        &self,
        user_id: Uuid,
        drafts: &[RecommendationDraft],
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<Recommendation>, EngineError>;

    async fn list(
        &self,
        user_id: Uuid,
        filter: &RecommendationFilter,
    ) -> Result<Vec<Recommendation>, EngineError>;

    async fn get(&self, id: Uuid) -> Result<Option<Recommendation>, EngineError>;

    /// Appends an interaction event and applies the status transition.
    ///
    /// The event is recorded even when the transition is rejected.
    async fn record_interaction(
        &self,
        id: Uuid,
        action: InteractionAction,
        metadata: Value,
        at: DateTime<Utc>,
    ) -> Result<InteractionOutcome, EngineError>;

    async fn interactions(&self, id: Uuid) -> Result<Vec<InteractionEvent>, EngineError>;

    /// Moves live recommendations whose expiry has passed to EXPIRED.
    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, EngineError>;
}
