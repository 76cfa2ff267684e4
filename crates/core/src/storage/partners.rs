use crate::domain::partner::{Partner, PartnerKind};
use crate::partners::PartnerLookup;
use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

/// Partner directory backed by the marketplace's `partner_companies` table.
#[derive(Debug, Clone)]
pub struct PgPartnerDirectory {
    pool: PgPool,
}

impl PgPartnerDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PartnerLookup for PgPartnerDirectory {
    async fn find_partners(
        &self,
        kind: PartnerKind,
        active_only: bool,
        limit: usize,
    ) -> anyhow::Result<Vec<Partner>> {
        let rows = sqlx::query_as::<_, (Uuid, String, bool)>(
            "SELECT id, name, is_active \
             FROM partner_companies \
             WHERE kind = $1 AND (NOT $2 OR is_active) \
             ORDER BY created_at ASC, id ASC \
             LIMIT $3",
        )
        .bind(kind.as_str())
        .bind(active_only)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("select partner_companies failed (kind={kind})"))?;

        Ok(rows
            .into_iter()
            .map(|(id, name, is_active)| Partner {
                id,
                name,
                kind,
                is_active,
            })
            .collect())
    }
}
