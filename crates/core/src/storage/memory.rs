use crate::domain::analysis::Analysis;
use crate::domain::partner::{Partner, PartnerKind};
use crate::domain::recommendation::{
    InteractionAction, InteractionEvent, InteractionOutcome, Recommendation, RecommendationDraft,
    RecommendationFilter, RecommendationStatus,
};
use crate::error::EngineError;
use crate::partners::PartnerLookup;
use crate::storage::{AnalysisStore, RecommendationStore};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InMemoryAnalysisStore {
    analyses: RwLock<Vec<Analysis>>,
}

impl InMemoryAnalysisStore {
    pub async fn insert(&self, analysis: Analysis) {
        self.analyses.write().await.push(analysis);
    }
}

#[async_trait::async_trait]
impl AnalysisStore for InMemoryAnalysisStore {
    async fn get_analysis(&self, id: Uuid) -> Result<Option<Analysis>, EngineError> {
        let analyses = self.analyses.read().await;
        Ok(analyses.iter().find(|a| a.id == id).cloned())
    }

    async fn list_recent_abnormal(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Analysis>, EngineError> {
        let analyses = self.analyses.read().await;
        let mut out: Vec<Analysis> = analyses
            .iter()
            .filter(|a| a.user_id == user_id && a.is_abnormal())
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        Ok(out)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPartnerDirectory {
    partners: RwLock<Vec<Partner>>,
    failure: Option<String>,
}

impl InMemoryPartnerDirectory {
    pub fn with_partners(partners: Vec<Partner>) -> Self {
        Self {
            partners: RwLock::new(partners),
            ..Self::default()
        }
    }

    /// Directory whose every lookup fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }
}

#[async_trait::async_trait]
impl PartnerLookup for InMemoryPartnerDirectory {
    async fn find_partners(
        &self,
        kind: PartnerKind,
        active_only: bool,
        limit: usize,
    ) -> anyhow::Result<Vec<Partner>> {
        if let Some(message) = &self.failure {
            anyhow::bail!("{message}");
        }
        let partners = self.partners.read().await;
        Ok(partners
            .iter()
            .filter(|p| p.kind == kind && (!active_only || p.is_active))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
struct Tables {
    recommendations: Vec<Recommendation>,
    interactions: Vec<InteractionEvent>,
}

/// Recommendation store kept in process memory.
///
/// A single mutex guards both tables, so the live-key check and the insert in
/// `persist` are atomic.
#[derive(Debug, Default)]
pub struct InMemoryRecommendationStore {
    tables: Mutex<Tables>,
    failing_titles: Vec<String>,
}

impl InMemoryRecommendationStore {
    /// Store whose insert fails for any draft carrying one of `titles`.
    pub fn failing_on<I, S>(titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failing_titles: titles.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub async fn all(&self) -> Vec<Recommendation> {
        self.tables.lock().await.recommendations.clone()
    }

    fn insert_draft(
        &self,
        tables: &mut Tables,
        user_id: Uuid,
        draft: &RecommendationDraft,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Recommendation>, EngineError> {
        let key = draft.key();
        let live = tables
            .recommendations
            .iter()
            .any(|r| r.user_id == user_id && r.status.is_live() && r.key() == key);
        if live {
            return Ok(None);
        }
        if self.failing_titles.iter().any(|t| *t == draft.title) {
            return Err(EngineError::Storage(sqlx::Error::Protocol(format!(
                "insert rejected for {:?}",
                draft.title
            ))));
        }
        let rec = Recommendation::from_draft(user_id, draft, created_at, expires_at);
        tables.recommendations.push(rec.clone());
        Ok(Some(rec))
    }
}

#[async_trait::async_trait]
impl RecommendationStore for InMemoryRecommendationStore {
    async fn persist(
        &self,
        user_id: Uuid,
        drafts: &[RecommendationDraft],
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<Recommendation>, EngineError> {
        let mut tables = self.tables.lock().await;
        let mut created = Vec::new();
        for draft in drafts {
            match self.insert_draft(&mut tables, user_id, draft, created_at, expires_at) {
                Ok(Some(rec)) => created.push(rec),
                Ok(None) => {
                    tracing::debug!(%user_id, kind = %draft.kind, title = %draft.title, "live recommendation exists; draft suppressed");
                }
                Err(err) => {
                    tracing::warn!(%user_id, kind = %draft.kind, title = %draft.title, error = %err, "failed to persist recommendation draft");
                }
            }
        }
        Ok(created)
    }

    async fn list(
        &self,
        user_id: Uuid,
        filter: &RecommendationFilter,
    ) -> Result<Vec<Recommendation>, EngineError> {
        let tables = self.tables.lock().await;
        let mut out: Vec<Recommendation> = tables
            .recommendations
            .iter()
            .filter(|r| r.user_id == user_id && filter.matches(r))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(out)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Recommendation>, EngineError> {
        let tables = self.tables.lock().await;
        Ok(tables.recommendations.iter().find(|r| r.id == id).cloned())
    }

    async fn record_interaction(
        &self,
        id: Uuid,
        action: InteractionAction,
        metadata: Value,
        at: DateTime<Utc>,
    ) -> Result<InteractionOutcome, EngineError> {
        let mut tables = self.tables.lock().await;
        let previous = tables
            .recommendations
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.status)
            .ok_or_else(|| EngineError::not_found("recommendation", id))?;

        tables.interactions.push(InteractionEvent {
            id: Uuid::new_v4(),
            recommendation_id: id,
            action,
            metadata,
            created_at: at,
        });

        let next = previous.after(action)?;
        if let Some(rec) = tables.recommendations.iter_mut().find(|r| r.id == id) {
            rec.status = next;
        }
        Ok(InteractionOutcome {
            recommendation_id: id,
            previous,
            status: next,
        })
    }

    async fn interactions(&self, id: Uuid) -> Result<Vec<InteractionEvent>, EngineError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .interactions
            .iter()
            .filter(|e| e.recommendation_id == id)
            .cloned()
            .collect())
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, EngineError> {
        let mut tables = self.tables.lock().await;
        let mut expired = 0;
        for rec in tables
            .recommendations
            .iter_mut()
            .filter(|r| r.status.is_live() && r.expires_at <= now)
        {
            rec.status = RecommendationStatus::Expired;
            expired += 1;
        }
        Ok(expired)
    }
}
