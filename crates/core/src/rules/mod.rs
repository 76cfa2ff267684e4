use crate::domain::indicator::IndicatorReading;
use crate::domain::recommendation::RecommendationDraft;
use crate::partners::PartnerLookup;
use std::sync::Arc;

pub mod catalog;
pub mod matcher;

pub use matcher::{CanonicalIndicator, IndicatorMatcher, SubstringMatcher};

/// One independent recommendation rule.
///
/// `condition` is a pure predicate over the readings of a single analysis;
/// `generate` is only called when it holds and may consult the partner directory.
#[async_trait::async_trait]
pub trait Rule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Catalog ordering; lower runs first. Unrelated to recommendation priority.
    fn priority(&self) -> i32;

    fn condition(&self, readings: &[IndicatorReading]) -> bool;

    async fn generate(
        &self,
        readings: &[IndicatorReading],
        partners: &dyn PartnerLookup,
    ) -> anyhow::Result<Vec<RecommendationDraft>>;
}

/// Immutable, ordered set of rules handed to the evaluator.
#[derive(Clone)]
pub struct RuleCatalog {
    rules: Arc<[Arc<dyn Rule>]>,
}

impl RuleCatalog {
    /// Orders rules by catalog priority; rules with equal priority keep insertion order.
    pub fn new(mut rules: Vec<Arc<dyn Rule>>) -> Self {
        rules.sort_by_key(|r| r.priority());
        Self {
            rules: rules.into(),
        }
    }

    pub fn standard(matcher: Arc<dyn IndicatorMatcher>) -> Self {
        Self::new(catalog::standard_rules(matcher))
    }

    pub fn rules(&self) -> &[Arc<dyn Rule>] {
        &self.rules
    }
}

impl Default for RuleCatalog {
    fn default() -> Self {
        Self::standard(Arc::new(SubstringMatcher::default()))
    }
}

impl std::fmt::Debug for RuleCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|r| r.name()))
            .finish()
    }
}
