use crate::domain::partner::{Partner, PartnerKind};

pub mod http;

/// Read access to the partner directory, injected into rules.
#[async_trait::async_trait]
pub trait PartnerLookup: Send + Sync {
    async fn find_partners(
        &self,
        kind: PartnerKind,
        active_only: bool,
        limit: usize,
    ) -> anyhow::Result<Vec<Partner>>;

    /// First active partner of `kind`, if any.
    async fn first_active(&self, kind: PartnerKind) -> anyhow::Result<Option<Partner>> {
        Ok(self.find_partners(kind, true, 1).await?.into_iter().next())
    }
}
