use crate::domain::analysis::Analysis;
use crate::domain::recommendation::RecommendationDraft;
use crate::error::EngineError;
use crate::partners::PartnerLookup;
use crate::rules::{Rule, RuleCatalog};
use crate::storage::AnalysisStore;
use futures_util::future::join_all;
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_RECENT_ANALYSES_LIMIT: usize = 5;

/// Runs the rule catalog over a user's abnormal analyses.
#[derive(Clone)]
pub struct Evaluator {
    catalog: RuleCatalog,
    analyses: Arc<dyn AnalysisStore>,
    partners: Arc<dyn PartnerLookup>,
    recent_limit: usize,
}

impl Evaluator {
    pub fn new(
        catalog: RuleCatalog,
        analyses: Arc<dyn AnalysisStore>,
        partners: Arc<dyn PartnerLookup>,
    ) -> Self {
        Self {
            catalog,
            analyses,
            partners,
            recent_limit: DEFAULT_RECENT_ANALYSES_LIMIT,
        }
    }

    pub fn with_recent_limit(mut self, limit: usize) -> Self {
        self.recent_limit = limit.max(1);
        self
    }

    /// Drafts from every matching rule of every selected analysis, unsorted.
    ///
    /// Fails only when an explicitly requested analysis cannot be resolved for
    /// `user_id`; per-analysis and per-rule failures are logged and skipped.
    pub async fn evaluate(
        &self,
        user_id: Uuid,
        analysis_id: Option<Uuid>,
    ) -> Result<Vec<RecommendationDraft>, EngineError> {
        let analyses = self.select_analyses(user_id, analysis_id).await?;

        let mut drafts = Vec::new();
        for analysis in &analyses {
            drafts.extend(self.evaluate_analysis(analysis).await);
        }

        tracing::debug!(
            %user_id,
            analyses = analyses.len(),
            drafts = drafts.len(),
            "rule evaluation finished"
        );
        Ok(drafts)
    }

    async fn select_analyses(
        &self,
        user_id: Uuid,
        analysis_id: Option<Uuid>,
    ) -> Result<Vec<Analysis>, EngineError> {
        let Some(analysis_id) = analysis_id else {
            return self
                .analyses
                .list_recent_abnormal(user_id, self.recent_limit)
                .await;
        };

        let analysis = self
            .analyses
            .get_analysis(analysis_id)
            .await?
            .filter(|a| a.user_id == user_id)
            .ok_or_else(|| EngineError::not_found("analysis", analysis_id))?;

        if !analysis.is_abnormal() {
            tracing::debug!(%user_id, %analysis_id, status = analysis.status.as_str(), "analysis not abnormal; skipped");
            return Ok(Vec::new());
        }
        Ok(vec![analysis])
    }

    /// Drafts for one analysis, tagged with its id and owner.
    pub async fn evaluate_analysis(&self, analysis: &Analysis) -> Vec<RecommendationDraft> {
        let readings = match analysis.readings() {
            Ok(readings) => readings,
            Err(err) => {
                tracing::warn!(analysis_id = %analysis.id, error = %err, "skipping analysis with unreadable results");
                return Vec::new();
            }
        };
        if readings.is_empty() {
            return Vec::new();
        }

        let matched: Vec<&Arc<dyn Rule>> = self
            .catalog
            .rules()
            .iter()
            .filter(|rule| rule.condition(&readings))
            .collect();

        // Lookups run concurrently; `join_all` keeps results in catalog order.
        let results = join_all(
            matched
                .iter()
                .map(|rule| rule.generate(&readings, self.partners.as_ref())),
        )
        .await;

        let mut drafts = Vec::new();
        for (rule, result) in matched.iter().zip(results) {
            match result {
                Ok(generated) => drafts.extend(
                    generated
                        .into_iter()
                        .map(|d| d.tagged(analysis.id, analysis.user_id)),
                ),
                Err(err) => {
                    let err = EngineError::Generation {
                        rule: rule.name(),
                        detail: format!("{err:#}"),
                    };
                    tracing::warn!(analysis_id = %analysis.id, rule = rule.name(), error = %err, "rule generation failed; skipped");
                }
            }
        }
        drafts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::analysis::AnalysisStatus;
    use crate::domain::indicator::IndicatorReading;
    use crate::domain::partner::{Partner, PartnerKind};
    use crate::domain::recommendation::{Priority, RecommendationType};
    use crate::storage::memory::{InMemoryAnalysisStore, InMemoryPartnerDirectory};
    use chrono::{Duration, Utc};
    use serde_json::json;

    struct Exploding;

    #[async_trait::async_trait]
    impl Rule for Exploding {
        fn name(&self) -> &'static str {
            "exploding"
        }

        fn priority(&self) -> i32 {
            0
        }

        fn condition(&self, _readings: &[IndicatorReading]) -> bool {
            true
        }

        async fn generate(
            &self,
            _readings: &[IndicatorReading],
            _partners: &dyn PartnerLookup,
        ) -> anyhow::Result<Vec<RecommendationDraft>> {
            anyhow::bail!("boom")
        }
    }

    struct Always(&'static str);

    #[async_trait::async_trait]
    impl Rule for Always {
        fn name(&self) -> &'static str {
            self.0
        }

        fn priority(&self) -> i32 {
            1
        }

        fn condition(&self, _readings: &[IndicatorReading]) -> bool {
            true
        }

        async fn generate(
            &self,
            _readings: &[IndicatorReading],
            _partners: &dyn PartnerLookup,
        ) -> anyhow::Result<Vec<RecommendationDraft>> {
            Ok(vec![RecommendationDraft::new(
                RecommendationType::Article,
                self.0,
                Priority::LOW,
            )])
        }
    }

    fn glucose_results() -> String {
        json!({
            "Glucose": {"value": 6.2, "unit": "mmol/L", "referenceMin": 3.3, "referenceMax": 5.5, "isNormal": false}
        })
        .to_string()
    }

    fn analysis(user_id: Uuid, status: AnalysisStatus, results: Option<String>, age_days: i64) -> Analysis {
        Analysis {
            id: Uuid::new_v4(),
            user_id,
            status,
            results,
            created_at: Utc::now() - Duration::days(age_days),
        }
    }

    fn clinic_directory() -> Arc<InMemoryPartnerDirectory> {
        Arc::new(InMemoryPartnerDirectory::with_partners(vec![Partner {
            id: Uuid::new_v4(),
            name: "Clinic".to_string(),
            kind: PartnerKind::Clinic,
            is_active: true,
        }]))
    }

    #[tokio::test]
    async fn explicit_normal_analysis_is_never_evaluated() {
        let user = Uuid::new_v4();
        let store = Arc::new(InMemoryAnalysisStore::default());
        let normal = analysis(user, AnalysisStatus::Normal, Some(glucose_results()), 0);
        let normal_id = normal.id;
        store.insert(normal).await;

        let evaluator = Evaluator::new(RuleCatalog::default(), store, clinic_directory());
        let drafts = evaluator.evaluate(user, Some(normal_id)).await.unwrap();
        assert!(drafts.is_empty());
    }

    #[tokio::test]
    async fn unknown_or_foreign_analysis_is_not_found() {
        let owner = Uuid::new_v4();
        let store = Arc::new(InMemoryAnalysisStore::default());
        let a = analysis(owner, AnalysisStatus::Abnormal, Some(glucose_results()), 0);
        let id = a.id;
        store.insert(a).await;

        let evaluator = Evaluator::new(RuleCatalog::default(), store, clinic_directory());
        let err = evaluator.evaluate(Uuid::new_v4(), Some(id)).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "analysis", .. }));

        let err = evaluator.evaluate(owner, Some(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn selects_five_most_recent_abnormal_analyses() {
        let user = Uuid::new_v4();
        let store = Arc::new(InMemoryAnalysisStore::default());
        let mut ids = Vec::new();
        for age in 0..7 {
            let a = analysis(user, AnalysisStatus::Abnormal, Some(glucose_results()), age);
            ids.push(a.id);
            store.insert(a).await;
        }
        store
            .insert(analysis(user, AnalysisStatus::Normal, Some(glucose_results()), 0))
            .await;

        let catalog = RuleCatalog::new(vec![Arc::new(Always("note"))]);
        let evaluator = Evaluator::new(catalog, store, clinic_directory());
        let drafts = evaluator.evaluate(user, None).await.unwrap();

        let analysis_ids: Vec<_> = drafts.iter().map(|d| d.analysis_id.unwrap()).collect();
        assert_eq!(analysis_ids, ids[..5].to_vec());
        assert!(drafts.iter().all(|d| d.user_id == Some(user)));
    }

    #[tokio::test]
    async fn malformed_results_do_not_abort_other_analyses() {
        let user = Uuid::new_v4();
        let store = Arc::new(InMemoryAnalysisStore::default());
        store
            .insert(analysis(user, AnalysisStatus::Abnormal, Some("{broken".to_string()), 0))
            .await;
        let good = analysis(user, AnalysisStatus::Abnormal, Some(glucose_results()), 1);
        let good_id = good.id;
        store.insert(good).await;

        let evaluator = Evaluator::new(RuleCatalog::default(), store, clinic_directory());
        let drafts = evaluator.evaluate(user, None).await.unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].analysis_id, Some(good_id));
    }

    #[tokio::test]
    async fn failing_rule_does_not_abort_siblings() {
        let user = Uuid::new_v4();
        let store = Arc::new(InMemoryAnalysisStore::default());
        store
            .insert(analysis(user, AnalysisStatus::Abnormal, Some(glucose_results()), 0))
            .await;

        let catalog = RuleCatalog::new(vec![Arc::new(Exploding), Arc::new(Always("survivor"))]);
        let evaluator = Evaluator::new(catalog, store, clinic_directory());
        let drafts = evaluator.evaluate(user, None).await.unwrap();
        let titles: Vec<_> = drafts.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, vec!["survivor"]);
    }

    #[tokio::test]
    async fn analysis_without_results_yields_nothing() {
        let user = Uuid::new_v4();
        let store = Arc::new(InMemoryAnalysisStore::default());
        store
            .insert(analysis(user, AnalysisStatus::Abnormal, None, 0))
            .await;
        let catalog = RuleCatalog::new(vec![Arc::new(Always("note"))]);
        let evaluator = Evaluator::new(catalog, store, clinic_directory());
        assert!(evaluator.evaluate(user, None).await.unwrap().is_empty());
    }
}
