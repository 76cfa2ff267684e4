use crate::domain::recommendation::{
    InteractionAction, InteractionEvent, InteractionOutcome, Priority, Recommendation,
    RecommendationDraft, RecommendationFilter, RecommendationStatus, RecommendationType,
};
use crate::error::EngineError;
use crate::storage::{lock, RecommendationStore};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

const RECOMMENDATION_COLUMNS: &str = "id, user_id, type, title, description, reason, priority, \
     partner_entity_id, product_id, analysis_id, metadata, status, created_at, expires_at";

#[derive(Debug, Clone)]
pub struct PgRecommendationStore {
    pool: PgPool,
}

impl PgRecommendationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RecommendationRow {
    id: Uuid,
    user_id: Uuid,
    #[sqlx(rename = "type")]
    kind: String,
    title: String,
    description: String,
    reason: String,
    priority: i32,
    partner_entity_id: Option<Uuid>,
    product_id: Option<Uuid>,
    analysis_id: Option<Uuid>,
    metadata: Value,
    status: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<RecommendationRow> for Recommendation {
    type Error = EngineError;

    fn try_from(row: RecommendationRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let decode = |e: String| EngineError::Decode(format!("recommendation {id}: {e}"));
        Ok(Recommendation {
            id,
            user_id: row.user_id,
            kind: row.kind.parse::<RecommendationType>().map_err(decode)?,
            title: row.title,
            description: row.description,
            reason: row.reason,
            priority: Priority::try_from(row.priority).map_err(decode)?,
            partner_entity_id: row.partner_entity_id,
            product_id: row.product_id,
            analysis_id: row.analysis_id,
            metadata: row.metadata,
            status: row.status.parse::<RecommendationStatus>().map_err(decode)?,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
    }
}

async fn live_exists(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    draft: &RecommendationDraft,
) -> Result<bool, sqlx::Error> {
    let (exists,): (bool,) = sqlx::query_as(
        "SELECT EXISTS ( \
           SELECT 1 FROM recommendations \
           WHERE user_id = $1 AND type = $2 AND title = $3 \
             AND partner_entity_id IS NOT DISTINCT FROM $4 \
             AND status IN ('ACTIVE', 'VIEWED'))",
    )
    .bind(user_id)
    .bind(draft.kind.as_str())
    .bind(&draft.title)
    .bind(draft.partner_entity_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(exists)
}

async fn insert_recommendation(
    tx: &mut Transaction<'_, Postgres>,
    rec: &Recommendation,
) -> Result<bool, sqlx::Error> {
    // The partial unique index backs up the EXISTS check if a writer slips past the lock.
    let res = sqlx::query(
        "INSERT INTO recommendations \
           (id, user_id, type, title, description, reason, priority, partner_entity_id, \
            product_id, analysis_id, metadata, status, created_at, expires_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $13) \
         ON CONFLICT DO NOTHING",
    )
    .bind(rec.id)
    .bind(rec.user_id)
    .bind(rec.kind.as_str())
    .bind(&rec.title)
    .bind(&rec.description)
    .bind(&rec.reason)
    .bind(rec.priority.value())
    .bind(rec.partner_entity_id)
    .bind(rec.product_id)
    .bind(rec.analysis_id)
    .bind(&rec.metadata)
    .bind(rec.status.as_str())
    .bind(rec.created_at)
    .bind(rec.expires_at)
    .execute(&mut **tx)
    .await?;
    Ok(res.rows_affected() == 1)
}

async fn persist_one(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    draft: &RecommendationDraft,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<Option<Recommendation>, sqlx::Error> {
    if live_exists(tx, user_id, draft).await? {
        return Ok(None);
    }
    let rec = Recommendation::from_draft(user_id, draft, created_at, expires_at);
    Ok(insert_recommendation(tx, &rec).await?.then_some(rec))
}

#[async_trait::async_trait]
impl RecommendationStore for PgRecommendationStore {
    async fn persist(
        &self,
        user_id: Uuid,
        drafts: &[RecommendationDraft],
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<Recommendation>, EngineError> {
        let mut tx = self.pool.begin().await?;
        lock::acquire_user_lock(&mut tx, user_id).await?;

        let mut created = Vec::with_capacity(drafts.len());
        for draft in drafts {
            // Each draft gets its own savepoint so one failed insert leaves the rest usable.
            let mut savepoint = sqlx::Connection::begin(&mut *tx).await?;
            match persist_one(&mut savepoint, user_id, draft, created_at, expires_at).await {
                Ok(Some(rec)) => {
                    savepoint.commit().await?;
                    created.push(rec);
                }
                Ok(None) => {
                    savepoint.commit().await?;
                    tracing::debug!(%user_id, kind = %draft.kind, title = %draft.title, "live recommendation exists; draft suppressed");
                }
                Err(err) => {
                    savepoint.rollback().await?;
                    tracing::warn!(%user_id, kind = %draft.kind, title = %draft.title, error = %err, "failed to persist recommendation draft");
                }
            }
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn list(
        &self,
        user_id: Uuid,
        filter: &RecommendationFilter,
    ) -> Result<Vec<Recommendation>, EngineError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {RECOMMENDATION_COLUMNS} FROM recommendations WHERE user_id = "
        ));
        qb.push_bind(user_id);
        qb.push(" AND status = ");
        qb.push_bind(filter.status().as_str());
        if let Some(kind) = filter.kind {
            qb.push(" AND type = ");
            qb.push_bind(kind.as_str());
        }
        qb.push(" ORDER BY priority DESC, created_at DESC, id ASC");

        let rows = qb
            .build_query_as::<RecommendationRow>()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Recommendation::try_from).collect()
    }

    async fn get(&self, id: Uuid) -> Result<Option<Recommendation>, EngineError> {
        let row = sqlx::query_as::<_, RecommendationRow>(&format!(
            "SELECT {RECOMMENDATION_COLUMNS} FROM recommendations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Recommendation::try_from).transpose()
    }

    async fn record_interaction(
        &self,
        id: Uuid,
        action: InteractionAction,
        metadata: Value,
        at: DateTime<Utc>,
    ) -> Result<InteractionOutcome, EngineError> {
        let mut tx = self.pool.begin().await?;

        let status: Option<(String,)> =
            sqlx::query_as("SELECT status FROM recommendations WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((status,)) = status else {
            return Err(EngineError::not_found("recommendation", id));
        };
        let previous = status
            .parse::<RecommendationStatus>()
            .map_err(|e| EngineError::Decode(format!("recommendation {id}: {e}")))?;

        sqlx::query(
            "INSERT INTO recommendation_interactions (id, recommendation_id, action, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(id)
        .bind(action.as_str())
        .bind(&metadata)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        let next = match previous.after(action) {
            Ok(next) => next,
            Err(err) => {
                // Keep the event: the log records attempts, not only effective transitions.
                tx.commit().await?;
                return Err(err);
            }
        };

        if next != previous {
            sqlx::query("UPDATE recommendations SET status = $2, updated_at = $3 WHERE id = $1")
                .bind(id)
                .bind(next.as_str())
                .bind(at)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(InteractionOutcome {
            recommendation_id: id,
            previous,
            status: next,
        })
    }

    async fn interactions(&self, id: Uuid) -> Result<Vec<InteractionEvent>, EngineError> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, String, Value, DateTime<Utc>)>(
            "SELECT id, recommendation_id, action, metadata, created_at \
             FROM recommendation_interactions \
             WHERE recommendation_id = $1 \
             ORDER BY created_at ASC, id ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, recommendation_id, action, metadata, created_at)| {
                Ok(InteractionEvent {
                    id,
                    recommendation_id,
                    action: action
                        .parse::<InteractionAction>()
                        .map_err(|e| EngineError::Decode(format!("interaction {id}: {e}")))?,
                    metadata,
                    created_at,
                })
            })
            .collect()
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, EngineError> {
        let res = sqlx::query(
            "UPDATE recommendations \
             SET status = 'EXPIRED', updated_at = $1 \
             WHERE status IN ('ACTIVE', 'VIEWED') AND expires_at <= $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }
}
