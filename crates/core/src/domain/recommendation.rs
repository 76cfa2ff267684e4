use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationType {
    Analysis,
    Supplement,
    Service,
    Article,
    Product,
    Laboratory,
    Pharmacy,
    Clinic,
}

impl RecommendationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analysis => "ANALYSIS",
            Self::Supplement => "SUPPLEMENT",
            Self::Service => "SERVICE",
            Self::Article => "ARTICLE",
            Self::Product => "PRODUCT",
            Self::Laboratory => "LABORATORY",
            Self::Pharmacy => "PHARMACY",
            Self::Clinic => "CLINIC",
        }
    }
}

impl fmt::Display for RecommendationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecommendationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ANALYSIS" => Ok(Self::Analysis),
            "SUPPLEMENT" => Ok(Self::Supplement),
            "SERVICE" => Ok(Self::Service),
            "ARTICLE" => Ok(Self::Article),
            "PRODUCT" => Ok(Self::Product),
            "LABORATORY" => Ok(Self::Laboratory),
            "PHARMACY" => Ok(Self::Pharmacy),
            "CLINIC" => Ok(Self::Clinic),
            other => Err(format!("unknown recommendation type: {other}")),
        }
    }
}

/// Recommendation priority on a 1..=5 scale; higher is more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Priority(u8);

impl Priority {
    pub const LOW: Priority = Priority(1);
    pub const MEDIUM: Priority = Priority(2);
    pub const HIGH: Priority = Priority(3);
    pub const MAX: Priority = Priority(5);

    pub fn new(value: i32) -> Option<Self> {
        (1..=5).contains(&value).then(|| Self(value as u8))
    }

    /// Accepts the legacy labels (`HIGH`, `MEDIUM`, `LOW`) as well as bare integers.
    pub fn parse_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Some(Self::HIGH),
            "MEDIUM" => Some(Self::MEDIUM),
            "LOW" => Some(Self::LOW),
            other => other.parse::<i32>().ok().and_then(Self::new),
        }
    }

    pub fn value(self) -> i32 {
        i32::from(self.0)
    }
}

impl TryFrom<i32> for Priority {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("priority out of range 1..=5: {value}"))
    }
}

impl From<Priority> for i32 {
    fn from(p: Priority) -> Self {
        p.value()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationStatus {
    Active,
    Viewed,
    Clicked,
    Purchased,
    Dismissed,
    /// Set only by the expiry sweep; never reachable from a user action.
    Expired,
}

impl RecommendationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Viewed => "VIEWED",
            Self::Clicked => "CLICKED",
            Self::Purchased => "PURCHASED",
            Self::Dismissed => "DISMISSED",
            Self::Expired => "EXPIRED",
        }
    }

    /// Statuses that count towards the one-live-recommendation-per-key rule.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Active | Self::Viewed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Purchased | Self::Dismissed | Self::Expired)
    }

    /// Status after `action`, or `InvalidTransition` when the action is not allowed.
    ///
    /// `view` never regresses a status, so it is accepted from every state and only
    /// moves `ACTIVE` forward. `purchase` is accepted straight from `ACTIVE` or
    /// `VIEWED` as well as from `CLICKED`.
    pub fn after(self, action: InteractionAction) -> Result<Self, EngineError> {
        use InteractionAction as A;
        use RecommendationStatus as S;

        match (self, action) {
            (S::Active, A::View) => Ok(S::Viewed),
            (current, A::View) => Ok(current),
            (S::Active | S::Viewed, A::Click) => Ok(S::Clicked),
            (S::Active | S::Viewed | S::Clicked, A::Purchase) => Ok(S::Purchased),
            (S::Active | S::Viewed, A::Dismiss) => Ok(S::Dismissed),
            (from, action) => Err(EngineError::InvalidTransition { from, action }),
        }
    }
}

impl fmt::Display for RecommendationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecommendationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(Self::Active),
            "VIEWED" => Ok(Self::Viewed),
            "CLICKED" => Ok(Self::Clicked),
            "PURCHASED" => Ok(Self::Purchased),
            "DISMISSED" => Ok(Self::Dismissed),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(format!("unknown recommendation status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionAction {
    View,
    Click,
    Purchase,
    Dismiss,
}

impl InteractionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Click => "click",
            Self::Purchase => "purchase",
            Self::Dismiss => "dismiss",
        }
    }
}

impl fmt::Display for InteractionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InteractionAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "view" => Ok(Self::View),
            "click" => Ok(Self::Click),
            "purchase" => Ok(Self::Purchase),
            "dismiss" => Ok(Self::Dismiss),
            other => Err(format!("unknown interaction action: {other}")),
        }
    }
}

/// Candidate recommendation produced by a rule, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationDraft {
    #[serde(rename = "type")]
    pub kind: RecommendationType,
    pub title: String,
    pub description: String,
    pub reason: String,
    pub priority: Priority,
    pub partner_entity_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub analysis_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub metadata: Value,
}

/// Identity of a recommendation for dedup and suppression purposes.
pub type DraftKey = (RecommendationType, String, Option<Uuid>);

impl RecommendationDraft {
    pub fn new(kind: RecommendationType, title: impl Into<String>, priority: Priority) -> Self {
        Self {
            kind,
            title: title.into(),
            description: String::new(),
            reason: String::new(),
            priority,
            partner_entity_id: None,
            product_id: None,
            analysis_id: None,
            user_id: None,
            metadata: Value::Null,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn partner(mut self, partner_entity_id: Uuid) -> Self {
        self.partner_entity_id = Some(partner_entity_id);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn tagged(mut self, analysis_id: Uuid, user_id: Uuid) -> Self {
        self.analysis_id = Some(analysis_id);
        self.user_id = Some(user_id);
        self
    }

    pub fn key(&self) -> DraftKey {
        (self.kind, self.title.clone(), self.partner_entity_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: RecommendationType,
    pub title: String,
    pub description: String,
    pub reason: String,
    pub priority: Priority,
    pub partner_entity_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub analysis_id: Option<Uuid>,
    pub metadata: Value,
    pub status: RecommendationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Recommendation {
    pub fn from_draft(
        user_id: Uuid,
        draft: &RecommendationDraft,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind: draft.kind,
            title: draft.title.clone(),
            description: draft.description.clone(),
            reason: draft.reason.clone(),
            priority: draft.priority,
            partner_entity_id: draft.partner_entity_id,
            product_id: draft.product_id,
            analysis_id: draft.analysis_id,
            metadata: draft.metadata.clone(),
            status: RecommendationStatus::Active,
            created_at,
            expires_at,
        }
    }

    pub fn key(&self) -> DraftKey {
        (self.kind, self.title.clone(), self.partner_entity_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub id: Uuid,
    pub recommendation_id: Uuid,
    pub action: InteractionAction,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InteractionOutcome {
    pub recommendation_id: Uuid,
    pub previous: RecommendationStatus,
    pub status: RecommendationStatus,
}

impl InteractionOutcome {
    pub fn changed(&self) -> bool {
        self.previous != self.status
    }
}

/// Read filter for listing a user's recommendations. Filters are AND-ed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationFilter {
    #[serde(rename = "type")]
    pub kind: Option<RecommendationType>,
    pub status: Option<RecommendationStatus>,
}

impl RecommendationFilter {
    pub fn status(&self) -> RecommendationStatus {
        self.status.unwrap_or(RecommendationStatus::Active)
    }

    pub fn matches(&self, rec: &Recommendation) -> bool {
        rec.status == self.status() && self.kind.map_or(true, |k| k == rec.kind)
    }
}
