use crate::config::Settings;
use crate::domain::recommendation::{
    InteractionAction, InteractionEvent, InteractionOutcome, Recommendation, RecommendationDraft,
    RecommendationFilter,
};
use crate::error::EngineError;
use crate::partners::http::HttpPartnerDirectory;
use crate::partners::PartnerLookup;
use crate::rules::RuleCatalog;
use crate::storage::analyses::PgAnalysisStore;
use crate::storage::partners::PgPartnerDirectory;
use crate::storage::recommendations::PgRecommendationStore;
use crate::storage::RecommendationStore;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

pub mod evaluator;
pub mod ranker;

pub use evaluator::Evaluator;
pub use ranker::rank;

pub const DEFAULT_RECOMMENDATION_TTL_DAYS: i64 = 30;

/// End-to-end recommendation pipeline: evaluate, rank, persist, interact.
#[derive(Clone)]
pub struct RecommendationEngine {
    evaluator: Evaluator,
    store: Arc<dyn RecommendationStore>,
    ttl: Duration,
}

impl RecommendationEngine {
    pub fn new(evaluator: Evaluator, store: Arc<dyn RecommendationStore>) -> Self {
        Self {
            evaluator,
            store,
            ttl: Duration::days(DEFAULT_RECOMMENDATION_TTL_DAYS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Postgres-backed engine. The partner directory is the marketplace HTTP API when
    /// `PARTNER_DIRECTORY_URL` is configured, the local `partner_companies` table otherwise.
    pub fn postgres(pool: sqlx::PgPool, settings: &Settings) -> anyhow::Result<Self> {
        let partners: Arc<dyn PartnerLookup> = match settings.partner_directory_url {
            Some(_) => Arc::new(HttpPartnerDirectory::from_settings(settings)?),
            None => Arc::new(PgPartnerDirectory::new(pool.clone())),
        };
        let evaluator = Evaluator::new(
            RuleCatalog::default(),
            Arc::new(PgAnalysisStore::new(pool.clone())),
            partners,
        )
        .with_recent_limit(settings.recent_analyses_limit);

        Ok(Self::new(evaluator, Arc::new(PgRecommendationStore::new(pool)))
            .with_ttl(settings.recommendation_ttl()))
    }

    /// Ranked drafts without persisting anything.
    pub async fn preview(
        &self,
        user_id: Uuid,
        analysis_id: Option<Uuid>,
    ) -> Result<Vec<RecommendationDraft>, EngineError> {
        let drafts = self.evaluator.evaluate(user_id, analysis_id).await?;
        Ok(rank(drafts))
    }

    /// Evaluates, ranks and persists; returns only newly created recommendations.
    ///
    /// Nothing is written until ranking has finished, so dropping the future early
    /// leaves storage untouched.
    pub async fn generate(
        &self,
        user_id: Uuid,
        analysis_id: Option<Uuid>,
    ) -> Result<Vec<Recommendation>, EngineError> {
        let ranked = self.preview(user_id, analysis_id).await?;
        if ranked.is_empty() {
            tracing::info!(%user_id, ?analysis_id, "no recommendations generated");
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let created = self
            .store
            .persist(user_id, &ranked, now, now + self.ttl)
            .await?;

        tracing::info!(
            %user_id,
            ?analysis_id,
            drafts = ranked.len(),
            created = created.len(),
            suppressed = ranked.len() - created.len(),
            "recommendations generated"
        );
        Ok(created)
    }

    pub async fn list(
        &self,
        user_id: Uuid,
        filter: &RecommendationFilter,
    ) -> Result<Vec<Recommendation>, EngineError> {
        self.store.list(user_id, filter).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Recommendation, EngineError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| EngineError::not_found("recommendation", id))
    }

    /// Records a user action and advances the recommendation's status.
    pub async fn interact(
        &self,
        recommendation_id: Uuid,
        action: InteractionAction,
        metadata: Value,
    ) -> Result<InteractionOutcome, EngineError> {
        let outcome = self
            .store
            .record_interaction(recommendation_id, action, metadata, Utc::now())
            .await?;
        tracing::info!(
            %recommendation_id,
            %action,
            from = %outcome.previous,
            to = %outcome.status,
            "recommendation interaction recorded"
        );
        Ok(outcome)
    }

    pub async fn interactions(
        &self,
        recommendation_id: Uuid,
    ) -> Result<Vec<InteractionEvent>, EngineError> {
        self.store.interactions(recommendation_id).await
    }

    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, EngineError> {
        let expired = self.store.expire_stale(now).await?;
        tracing::info!(%now, expired, "expired stale recommendations");
        Ok(expired)
    }
}
