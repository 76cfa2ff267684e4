use crate::domain::indicator::IndicatorReading;
use crate::domain::partner::PartnerKind;
use crate::domain::recommendation::{Priority, RecommendationDraft, RecommendationType};
use crate::partners::PartnerLookup;
use crate::rules::matcher::{CanonicalIndicator, IndicatorMatcher};
use crate::rules::Rule;
use serde_json::json;
use std::sync::Arc;

const MULTIPLE_ABNORMALITIES_THRESHOLD: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deviation {
    BelowReference,
    AboveReference,
}

/// One recommendation a rule emits when a partner of `partner` kind exists.
#[derive(Debug, Clone)]
pub struct Offer {
    pub kind: RecommendationType,
    pub partner: PartnerKind,
    pub title: &'static str,
    pub description: &'static str,
    pub priority: Priority,
}

/// Fires when an abnormal reading of one of `indicators` is outside its reference range
/// in the given direction.
pub struct ThresholdRule {
    name: &'static str,
    priority: i32,
    label: &'static str,
    indicators: &'static [CanonicalIndicator],
    deviation: Deviation,
    offers: Vec<Offer>,
    matcher: Arc<dyn IndicatorMatcher>,
}

impl ThresholdRule {
    fn trigger<'a>(&self, readings: &'a [IndicatorReading]) -> Option<&'a IndicatorReading> {
        readings.iter().find(|r| {
            r.is_abnormal()
                && self
                    .matcher
                    .classify(&r.name)
                    .is_some_and(|c| self.indicators.contains(&c))
                && match self.deviation {
                    Deviation::BelowReference => r.is_below_reference(),
                    Deviation::AboveReference => r.is_above_reference(),
                }
        })
    }

    fn reason(&self, r: &IndicatorReading) -> String {
        let direction = match self.deviation {
            Deviation::BelowReference => "ниже нормы",
            Deviation::AboveReference => "выше нормы",
        };
        format!(
            "{}: {} {} {} ({}–{})",
            self.label, r.value, r.unit, direction, r.reference_min, r.reference_max
        )
    }
}

#[async_trait::async_trait]
impl Rule for ThresholdRule {
    fn name(&self) -> &'static str {
        self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn condition(&self, readings: &[IndicatorReading]) -> bool {
        self.trigger(readings).is_some()
    }

    async fn generate(
        &self,
        readings: &[IndicatorReading],
        partners: &dyn PartnerLookup,
    ) -> anyhow::Result<Vec<RecommendationDraft>> {
        let Some(reading) = self.trigger(readings) else {
            return Ok(Vec::new());
        };

        let reason = self.reason(reading);
        let metadata = json!({
            "rule": self.name,
            "indicator": reading.name,
            "value": reading.value,
            "unit": reading.unit,
            "referenceMin": reading.reference_min,
            "referenceMax": reading.reference_max,
        });

        let mut out = Vec::with_capacity(self.offers.len());
        for offer in &self.offers {
            let Some(partner) = partners.first_active(offer.partner).await? else {
                tracing::debug!(rule = self.name, partner_kind = %offer.partner, "no active partner; offer skipped");
                continue;
            };
            out.push(
                RecommendationDraft::new(offer.kind, offer.title, offer.priority)
                    .description(offer.description)
                    .reason(reason.clone())
                    .partner(partner.id)
                    .metadata(metadata.clone()),
            );
        }
        Ok(out)
    }
}

/// Fires when at least three readings of one analysis are flagged abnormal.
pub struct MultipleAbnormalitiesRule {
    priority: i32,
    threshold: usize,
}

impl MultipleAbnormalitiesRule {
    fn abnormal_names<'a>(&self, readings: &'a [IndicatorReading]) -> Vec<&'a str> {
        readings
            .iter()
            .filter(|r| r.is_abnormal())
            .map(|r| r.name.as_str())
            .collect()
    }
}

#[async_trait::async_trait]
impl Rule for MultipleAbnormalitiesRule {
    fn name(&self) -> &'static str {
        "multiple_abnormalities"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn condition(&self, readings: &[IndicatorReading]) -> bool {
        readings.iter().filter(|r| r.is_abnormal()).count() >= self.threshold
    }

    async fn generate(
        &self,
        readings: &[IndicatorReading],
        partners: &dyn PartnerLookup,
    ) -> anyhow::Result<Vec<RecommendationDraft>> {
        let names = self.abnormal_names(readings);
        if names.len() < self.threshold {
            return Ok(Vec::new());
        }

        let Some(clinic) = partners.first_active(PartnerKind::Clinic).await? else {
            tracing::debug!(rule = self.name(), "no active clinic; offer skipped");
            return Ok(Vec::new());
        };

        Ok(vec![RecommendationDraft::new(
            RecommendationType::Clinic,
            "Комплексное обследование у терапевта",
            Priority::HIGH,
        )
        .description("Несколько показателей вне нормы: терапевт назначит комплексное обследование.")
        .reason(format!("Отклонения в {} показателях: {}", names.len(), names.join(", ")))
        .partner(clinic.id)
        .metadata(json!({
            "rule": self.name(),
            "abnormalIndicators": names,
            "abnormalCount": names.len(),
        }))])
    }
}

/// Rules in catalog order.
pub fn standard_rules(matcher: Arc<dyn IndicatorMatcher>) -> Vec<Arc<dyn Rule>> {
    use CanonicalIndicator::*;
    use Deviation::*;

    let threshold = |name: &'static str,
                     priority: i32,
                     label: &'static str,
                     indicators: &'static [CanonicalIndicator],
                     deviation: Deviation,
                     offers: Vec<Offer>|
     -> Arc<dyn Rule> {
        Arc::new(ThresholdRule {
            name,
            priority,
            label,
            indicators,
            deviation,
            offers,
            matcher: matcher.clone(),
        })
    };

    let multiple_abnormalities: Arc<dyn Rule> = Arc::new(MultipleAbnormalitiesRule {
        priority: 40,
        threshold: MULTIPLE_ABNORMALITIES_THRESHOLD,
    });

    vec![
        threshold(
            "vitamin_d_deficiency",
            10,
            "Витамин D",
            &[VitaminD],
            BelowReference,
            vec![
                Offer {
                    kind: RecommendationType::Laboratory,
                    partner: PartnerKind::Laboratory,
                    title: "Повторный анализ на витамин D через 2–3 месяца",
                    description: "Контроль уровня 25-OH витамина D после начала коррекции дефицита.",
                    priority: Priority::HIGH,
                },
                Offer {
                    kind: RecommendationType::Supplement,
                    partner: PartnerKind::HealthStore,
                    title: "Витамин D3 1000–2000 МЕ в сутки",
                    description: "Профилактическая доза витамина D3 при дефиците.",
                    priority: Priority::HIGH,
                },
            ],
        ),
        threshold(
            "low_hemoglobin",
            20,
            "Гемоглобин",
            &[Hemoglobin],
            BelowReference,
            vec![
                Offer {
                    kind: RecommendationType::Clinic,
                    partner: PartnerKind::Clinic,
                    title: "Консультация гематолога",
                    description: "Сниженный гемоглобин требует выяснения причины анемии.",
                    priority: Priority::HIGH,
                },
                Offer {
                    kind: RecommendationType::Pharmacy,
                    partner: PartnerKind::Pharmacy,
                    title: "Препараты железа",
                    description: "Дозировку препаратов железа подберите вместе с лечащим врачом.",
                    priority: Priority::MEDIUM,
                },
            ],
        ),
        threshold(
            "high_cholesterol",
            30,
            "Холестерин",
            &[Cholesterol],
            AboveReference,
            vec![
                Offer {
                    kind: RecommendationType::Clinic,
                    partner: PartnerKind::Clinic,
                    title: "Консультация кардиолога",
                    description: "Оценка сердечно-сосудистого риска при повышенном холестерине.",
                    priority: Priority::MEDIUM,
                },
                Offer {
                    kind: RecommendationType::Clinic,
                    partner: PartnerKind::Nutritionist,
                    title: "Консультация диетолога",
                    description: "Коррекция питания для снижения уровня холестерина.",
                    priority: Priority::LOW,
                },
            ],
        ),
        multiple_abnormalities,
        threshold(
            "high_glucose",
            50,
            "Глюкоза",
            &[Glucose],
            AboveReference,
            vec![Offer {
                kind: RecommendationType::Clinic,
                partner: PartnerKind::Clinic,
                title: "Консультация эндокринолога",
                description: "Повышенная глюкоза: исключить нарушение углеводного обмена.",
                priority: Priority::HIGH,
            }],
        ),
        threshold(
            "low_ferritin",
            60,
            "Ферритин",
            &[Ferritin],
            BelowReference,
            vec![Offer {
                kind: RecommendationType::Pharmacy,
                partner: PartnerKind::Pharmacy,
                title: "Восполнение запасов железа",
                description: "Низкий ферритин указывает на истощение запасов железа.",
                priority: Priority::MEDIUM,
            }],
        ),
        threshold(
            "elevated_liver_enzymes",
            70,
            "Печёночные ферменты",
            &[Alt, Ast],
            AboveReference,
            vec![Offer {
                kind: RecommendationType::Clinic,
                partner: PartnerKind::Clinic,
                title: "Консультация гепатолога",
                description: "Повышенные АЛТ/АСТ: оценка состояния печени.",
                priority: Priority::MEDIUM,
            }],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::partner::Partner;
    use crate::rules::{RuleCatalog, SubstringMatcher};
    use crate::storage::memory::InMemoryPartnerDirectory;
    use uuid::Uuid;

    fn reading(name: &str, value: f64, min: f64, max: f64, is_normal: bool) -> IndicatorReading {
        IndicatorReading {
            name: name.to_string(),
            value,
            unit: "u".to_string(),
            reference_min: min,
            reference_max: max,
            is_normal,
        }
    }

    fn partner(kind: PartnerKind) -> Partner {
        Partner {
            id: Uuid::new_v4(),
            name: format!("{kind} partner"),
            kind,
            is_active: true,
        }
    }

    fn rule(catalog: &RuleCatalog, name: &str) -> Arc<dyn Rule> {
        catalog
            .rules()
            .iter()
            .find(|r| r.name() == name)
            .cloned()
            .unwrap()
    }

    #[test]
    fn standard_catalog_keeps_declared_order() {
        let catalog = RuleCatalog::default();
        let names: Vec<_> = catalog.rules().iter().map(|r| r.name()).collect();
        assert_eq!(
            names,
            vec![
                "vitamin_d_deficiency",
                "low_hemoglobin",
                "high_cholesterol",
                "multiple_abnormalities",
                "high_glucose",
                "low_ferritin",
                "elevated_liver_enzymes",
            ]
        );
    }

    #[test]
    fn vitamin_d_requires_abnormal_flag_and_low_value() {
        let catalog = RuleCatalog::default();
        let vit_d = rule(&catalog, "vitamin_d_deficiency");

        assert!(vit_d.condition(&[reading("Vitamin D (25-OH)", 12.0, 30.0, 100.0, false)]));
        assert!(!vit_d.condition(&[reading("Vitamin D (25-OH)", 12.0, 30.0, 100.0, true)]));
        assert!(!vit_d.condition(&[reading("Vitamin D (25-OH)", 120.0, 30.0, 100.0, false)]));
        assert!(!vit_d.condition(&[]));
    }

    #[tokio::test]
    async fn vitamin_d_emits_one_offer_per_available_partner_kind() {
        let catalog = RuleCatalog::default();
        let vit_d = rule(&catalog, "vitamin_d_deficiency");
        let readings = [reading("Кальцидиол", 12.0, 30.0, 100.0, false)];

        let lab = partner(PartnerKind::Laboratory);
        let only_lab = InMemoryPartnerDirectory::with_partners(vec![lab.clone()]);
        let drafts = vit_d.generate(&readings, &only_lab).await.unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].kind, RecommendationType::Laboratory);
        assert_eq!(drafts[0].partner_entity_id, Some(lab.id));
        assert_eq!(drafts[0].priority, Priority::HIGH);

        let both = InMemoryPartnerDirectory::with_partners(vec![
            lab,
            partner(PartnerKind::HealthStore),
        ]);
        let drafts = vit_d.generate(&readings, &both).await.unwrap();
        let kinds: Vec<_> = drafts.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![RecommendationType::Laboratory, RecommendationType::Supplement]
        );
        assert!(drafts.iter().all(|d| d.priority == Priority::HIGH));
        assert_eq!(drafts[1].metadata["value"], json!(12.0));
    }

    #[tokio::test]
    async fn cholesterol_nutritionist_offer_is_low_priority() {
        let catalog = RuleCatalog::default();
        let chol = rule(&catalog, "high_cholesterol");
        let dir = InMemoryPartnerDirectory::with_partners(vec![
            partner(PartnerKind::Clinic),
            partner(PartnerKind::Nutritionist),
        ]);
        let drafts = chol
            .generate(&[reading("Холестерин общий", 6.8, 0.0, 5.2, false)], &dir)
            .await
            .unwrap();
        let priorities: Vec<_> = drafts.iter().map(|d| d.priority).collect();
        assert_eq!(priorities, vec![Priority::MEDIUM, Priority::LOW]);
        assert!(drafts.iter().all(|d| d.kind == RecommendationType::Clinic));
    }

    #[tokio::test]
    async fn multiple_abnormalities_lists_every_abnormal_name() {
        let catalog = RuleCatalog::default();
        let multi = rule(&catalog, "multiple_abnormalities");
        let readings = [
            reading("TSH", 9.0, 0.4, 4.0, false),
            reading("Glucose", 7.0, 3.3, 5.5, false),
            reading("Sodium", 140.0, 135.0, 145.0, true),
            reading("Creatinine", 130.0, 60.0, 110.0, false),
        ];
        assert!(multi.condition(&readings));
        assert!(!multi.condition(&readings[..2]));

        let dir = InMemoryPartnerDirectory::with_partners(vec![partner(PartnerKind::Clinic)]);
        let drafts = multi.generate(&readings, &dir).await.unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].priority, Priority::HIGH);
        assert_eq!(
            drafts[0].metadata["abnormalIndicators"],
            json!(["TSH", "Glucose", "Creatinine"])
        );
    }

    #[tokio::test]
    async fn liver_rule_fires_on_either_enzyme() {
        let matcher: Arc<dyn IndicatorMatcher> = Arc::new(SubstringMatcher::default());
        let catalog = RuleCatalog::standard(matcher);
        let liver = rule(&catalog, "elevated_liver_enzymes");

        assert!(liver.condition(&[reading("AST", 80.0, 0.0, 40.0, false)]));
        assert!(liver.condition(&[reading("АЛТ", 55.0, 0.0, 41.0, false)]));
        assert!(!liver.condition(&[reading("AST", 30.0, 0.0, 40.0, false)]));
    }

    #[tokio::test]
    async fn missing_partner_yields_no_drafts() {
        let catalog = RuleCatalog::default();
        let glucose = rule(&catalog, "high_glucose");
        let empty = InMemoryPartnerDirectory::default();
        let drafts = glucose
            .generate(&[reading("Glucose", 7.0, 3.3, 5.5, false)], &empty)
            .await
            .unwrap();
        assert!(drafts.is_empty());
    }

    #[tokio::test]
    async fn directory_failure_propagates_to_caller() {
        let catalog = RuleCatalog::default();
        let ferritin = rule(&catalog, "low_ferritin");
        let dir = InMemoryPartnerDirectory::failing("directory offline");
        let res = ferritin
            .generate(&[reading("Ferritin", 5.0, 15.0, 150.0, false)], &dir)
            .await;
        assert!(res.is_err());
    }
}
