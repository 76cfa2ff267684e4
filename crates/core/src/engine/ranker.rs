use crate::domain::recommendation::{DraftKey, RecommendationDraft};
use std::cmp::Reverse;
use std::collections::HashSet;

/// Drops repeated `(type, title, partner)` drafts, keeping the first, then orders by
/// priority, highest first. Equal priorities keep their input order.
pub fn rank(drafts: Vec<RecommendationDraft>) -> Vec<RecommendationDraft> {
    let mut seen = HashSet::<DraftKey>::with_capacity(drafts.len());
    let mut out: Vec<RecommendationDraft> = drafts
        .into_iter()
        .filter(|d| seen.insert(d.key()))
        .collect();
    // `sort_by_key` is stable.
    out.sort_by_key(|d| Reverse(d.priority));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::recommendation::{Priority, RecommendationType};
    use uuid::Uuid;

    fn draft(kind: RecommendationType, title: &str, priority: Priority) -> RecommendationDraft {
        RecommendationDraft::new(kind, title, priority)
    }

    #[test]
    fn keeps_first_of_duplicate_keys() {
        let partner = Uuid::new_v4();
        let first = draft(RecommendationType::Clinic, "cardio", Priority::MEDIUM)
            .partner(partner)
            .reason("first");
        let second = draft(RecommendationType::Clinic, "cardio", Priority::HIGH)
            .partner(partner)
            .reason("second");

        let ranked = rank(vec![first, second]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].reason, "first");
    }

    #[test]
    fn different_partner_is_a_different_key() {
        let a = draft(RecommendationType::Pharmacy, "iron", Priority::MEDIUM).partner(Uuid::new_v4());
        let b = draft(RecommendationType::Pharmacy, "iron", Priority::MEDIUM).partner(Uuid::new_v4());
        let c = draft(RecommendationType::Pharmacy, "iron", Priority::MEDIUM);
        assert_eq!(rank(vec![a, b, c]).len(), 3);
    }

    #[test]
    fn orders_by_priority_with_stable_ties() {
        let drafts = vec![
            draft(RecommendationType::Clinic, "low", Priority::LOW),
            draft(RecommendationType::Clinic, "high-1", Priority::HIGH),
            draft(RecommendationType::Clinic, "medium", Priority::MEDIUM),
            draft(RecommendationType::Clinic, "high-2", Priority::HIGH),
        ];
        let titles: Vec<_> = rank(drafts).into_iter().map(|d| d.title).collect();
        assert_eq!(titles, vec!["high-1", "high-2", "medium", "low"]);
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert!(rank(Vec::new()).is_empty());
    }
}
