use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of partner company a recommendation can point to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartnerKind {
    Clinic,
    Laboratory,
    Pharmacy,
    HealthStore,
    Nutritionist,
}

impl PartnerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clinic => "CLINIC",
            Self::Laboratory => "LABORATORY",
            Self::Pharmacy => "PHARMACY",
            Self::HealthStore => "HEALTH_STORE",
            Self::Nutritionist => "NUTRITIONIST",
        }
    }
}

impl fmt::Display for PartnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartnerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CLINIC" => Ok(Self::Clinic),
            "LABORATORY" => Ok(Self::Laboratory),
            "PHARMACY" => Ok(Self::Pharmacy),
            "HEALTH_STORE" => Ok(Self::HealthStore),
            "NUTRITIONIST" => Ok(Self::Nutritionist),
            other => Err(format!("unknown partner kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partner {
    pub id: Uuid,
    pub name: String,
    pub kind: PartnerKind,
    pub is_active: bool,
}
