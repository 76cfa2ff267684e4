use crate::config::Settings;
use crate::domain::partner::{Partner, PartnerKind};
use crate::partners::PartnerLookup;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PATH: &str = "/v1/partners";
const DEFAULT_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 250;
const MAX_BACKOFF_DOUBLINGS: u32 = 6;

/// Partner directory served by the marketplace over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpPartnerDirectory {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    path: String,
    retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct PartnersResponse {
    items: Vec<DirectoryEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectoryEntry {
    id: Uuid,
    #[serde(default)]
    name: String,
    #[serde(default = "default_active")]
    is_active: bool,
}

fn default_active() -> bool {
    true
}

impl HttpPartnerDirectory {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_partner_directory_url()?.to_string();
        let api_key = settings.partner_directory_api_key.clone();

        let timeout_secs = std::env::var("PARTNER_DIRECTORY_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("PARTNER_DIRECTORY_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES)
            .max(1);

        let path = std::env::var("PARTNER_DIRECTORY_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PATH.to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build partner directory http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            path,
            retries,
        })
    }

    fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };

        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn fetch_once(
        &self,
        kind: PartnerKind,
        active_only: bool,
        limit: usize,
    ) -> Result<PartnersResponse> {
        let res = self
            .http
            .get(self.url())
            .headers(self.headers()?)
            .query(&[
                ("type", kind.as_str().to_string()),
                ("active_only", active_only.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .context("partner directory request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read partner directory response")?;

        if !status.is_success() {
            anyhow::bail!("partner directory HTTP {status}: {text}");
        }

        parse_response(&text)
    }
}

/// Exponential backoff after the `attempt`-th failure, capped at 64x the base delay.
fn backoff_for(attempt: u32) -> Duration {
    let doublings = attempt.saturating_sub(1).min(MAX_BACKOFF_DOUBLINGS);
    Duration::from_millis(BASE_BACKOFF_MS << doublings)
}

fn parse_response(text: &str) -> Result<PartnersResponse> {
    serde_json::from_str::<PartnersResponse>(text)
        .with_context(|| format!("partner directory response has unexpected shape: {text}"))
}

fn into_partners(
    resp: PartnersResponse,
    kind: PartnerKind,
    active_only: bool,
    limit: usize,
) -> Vec<Partner> {
    resp.items
        .into_iter()
        .filter(|e| !active_only || e.is_active)
        .take(limit)
        .map(|e| Partner {
            id: e.id,
            name: e.name,
            kind,
            is_active: e.is_active,
        })
        .collect()
}

#[async_trait::async_trait]
impl PartnerLookup for HttpPartnerDirectory {
    async fn find_partners(
        &self,
        kind: PartnerKind,
        active_only: bool,
        limit: usize,
    ) -> Result<Vec<Partner>> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(kind, active_only, limit).await {
                Ok(resp) => return Ok(into_partners(resp, kind, active_only, limit)),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = backoff_for(attempt);
                    tracing::warn!(attempt, ?backoff, %kind, error = %err, "partner lookup failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_directory_items_and_applies_filters() {
        let active = Uuid::new_v4();
        let inactive = Uuid::new_v4();
        let body = json!({
            "items": [
                {"id": inactive, "name": "Closed Lab", "isActive": false},
                {"id": active, "name": "Open Lab"},
                {"id": Uuid::new_v4()}
            ]
        })
        .to_string();

        let resp = parse_response(&body).unwrap();
        let partners = into_partners(resp, PartnerKind::Laboratory, true, 1);
        assert_eq!(partners.len(), 1);
        assert_eq!(partners[0].id, active);
        assert_eq!(partners[0].kind, PartnerKind::Laboratory);
    }

    #[test]
    fn rejects_items_without_uuid() {
        let body = json!({"items": [{"id": "clinic-7"}]}).to_string();
        assert!(parse_response(&body).is_err());
    }

    #[test]
    fn backoff_doubles_then_stays_capped() {
        assert_eq!(backoff_for(1), Duration::from_millis(250));
        assert_eq!(backoff_for(2), Duration::from_millis(500));
        assert_eq!(backoff_for(7), Duration::from_millis(16_000));
        assert_eq!(backoff_for(65), Duration::from_millis(16_000));
        assert_eq!(backoff_for(u32::MAX), Duration::from_millis(16_000));
    }

    #[test]
    fn url_joins_base_and_path() {
        let settings = Settings {
            partner_directory_url: Some("https://market.example/".to_string()),
            ..Settings::default()
        };
        let dir = HttpPartnerDirectory::from_settings(&settings).unwrap();
        assert_eq!(dir.url(), "https://market.example/v1/partners");
    }
}
