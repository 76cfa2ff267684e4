use crate::domain::indicator::{self, IndicatorReading};
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Pending,
    Normal,
    Abnormal,
}

impl AnalysisStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Normal => "normal",
            Self::Abnormal => "abnormal",
        }
    }
}

impl FromStr for AnalysisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "normal" => Ok(Self::Normal),
            "abnormal" => Ok(Self::Abnormal),
            other => Err(format!("unknown analysis status: {other}")),
        }
    }
}

/// A parsed lab analysis owned by the documents subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: AnalysisStatus,
    /// Raw results blob as stored; shape varies by upload source.
    pub results: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Analysis {
    pub fn is_abnormal(&self) -> bool {
        self.status == AnalysisStatus::Abnormal
    }

    /// Normalized readings. A missing blob means no readings, not an error.
    pub fn readings(&self) -> Result<Vec<IndicatorReading>, EngineError> {
        let Some(raw) = self.results.as_deref() else {
            return Ok(Vec::new());
        };
        indicator::parse_results(raw).map_err(|e| EngineError::Parse {
            analysis_id: self.id,
            detail: e.to_string(),
        })
    }
}
