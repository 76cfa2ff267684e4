use crate::domain::analysis::{Analysis, AnalysisStatus};
use crate::error::EngineError;
use crate::storage::AnalysisStore;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

type AnalysisRow = (Uuid, Uuid, String, Option<String>, DateTime<Utc>);

#[derive(Debug, Clone)]
pub struct PgAnalysisStore {
    pool: PgPool,
}

impl PgAnalysisStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn into_analysis((id, user_id, status, results, created_at): AnalysisRow) -> Result<Analysis, EngineError> {
    let status = status
        .parse::<AnalysisStatus>()
        .map_err(|e| EngineError::Decode(format!("analysis {id}: {e}")))?;
    Ok(Analysis {
        id,
        user_id,
        status,
        results,
        created_at,
    })
}

#[async_trait::async_trait]
impl AnalysisStore for PgAnalysisStore {
    async fn get_analysis(&self, id: Uuid) -> Result<Option<Analysis>, EngineError> {
        let row = sqlx::query_as::<_, AnalysisRow>(
            "SELECT id, user_id, status, results, created_at \
             FROM analyses \
             WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(into_analysis).transpose()
    }

    async fn list_recent_abnormal(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Analysis>, EngineError> {
        let rows = sqlx::query_as::<_, AnalysisRow>(
            "SELECT id, user_id, status, results, created_at \
             FROM analyses \
             WHERE user_id = $1 AND status = $2 \
             ORDER BY created_at DESC, id ASC \
             LIMIT $3",
        )
        .bind(user_id)
        .bind(AnalysisStatus::Abnormal.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(into_analysis).collect()
    }
}
