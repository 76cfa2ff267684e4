use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use carerec_core::domain::recommendation::{
    InteractionAction, InteractionEvent, Recommendation, RecommendationFilter,
    RecommendationStatus, RecommendationType,
};
use carerec_core::engine::RecommendationEngine;
use carerec_core::error::EngineError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = carerec_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match carerec_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let engine = match pool {
        Some(pool) => Some(Arc::new(RecommendationEngine::postgres(pool, &settings)?)),
        None => None,
    };

    let app = router(AppState { engine }).layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/users/:user_id/recommendations",
            get(list_recommendations),
        )
        .route(
            "/users/:user_id/recommendations/generate",
            post(generate_recommendations),
        )
        .route(
            "/recommendations/:id/interactions",
            post(interact).get(list_interactions),
        )
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    engine: Option<Arc<RecommendationEngine>>,
}

impl AppState {
    fn engine(&self) -> Result<&RecommendationEngine, StatusCode> {
        self.engine.as_deref().ok_or(StatusCode::SERVICE_UNAVAILABLE)
    }
}

fn error_status(err: EngineError) -> StatusCode {
    match err {
        EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::InvalidTransition { .. } => StatusCode::CONFLICT,
        other => {
            let err = anyhow::Error::new(other);
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "recommendation request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct GenerateRequest {
    analysis_id: Option<Uuid>,
}

impl GenerateRequest {
    /// An empty body selects the user's recent analyses; anything else must parse.
    fn from_body(body: &[u8]) -> Result<Self, StatusCode> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|e| {
            tracing::debug!(error = %e, "rejected generate request body");
            StatusCode::BAD_REQUEST
        })
    }
}

async fn generate_recommendations(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<Vec<Recommendation>>, StatusCode> {
    let engine = state.engine()?;
    let req = GenerateRequest::from_body(&body)?;

    let created = engine
        .generate(user_id, req.analysis_id)
        .await
        .map_err(error_status)?;
    Ok(Json(created))
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
    status: Option<String>,
}

impl ListQuery {
    fn into_filter(self) -> Result<RecommendationFilter, StatusCode> {
        let kind = self
            .kind
            .map(|s| s.parse::<RecommendationType>())
            .transpose()
            .map_err(|_| StatusCode::BAD_REQUEST)?;
        let status = self
            .status
            .map(|s| s.parse::<RecommendationStatus>())
            .transpose()
            .map_err(|_| StatusCode::BAD_REQUEST)?;
        Ok(RecommendationFilter { kind, status })
    }
}

async fn list_recommendations(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Recommendation>>, StatusCode> {
    let engine = state.engine()?;
    let filter = query.into_filter()?;

    let recs = engine.list(user_id, &filter).await.map_err(error_status)?;
    Ok(Json(recs))
}

#[derive(Debug, Deserialize)]
struct InteractRequest {
    action: InteractionAction,
    #[serde(default)]
    metadata: Value,
}

#[derive(Debug, Serialize)]
struct InteractResponse {
    status: RecommendationStatus,
}

async fn interact(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<InteractRequest>,
) -> Result<Json<InteractResponse>, StatusCode> {
    let engine = state.engine()?;

    let outcome = engine
        .interact(id, req.action, req.metadata)
        .await
        .map_err(error_status)?;
    Ok(Json(InteractResponse {
        status: outcome.status,
    }))
}

async fn list_interactions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<InteractionEvent>>, StatusCode> {
    let engine = state.engine()?;

    engine.get(id).await.map_err(error_status)?;
    let events = engine.interactions(id).await.map_err(error_status)?;
    Ok(Json(events))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &carerec_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use carerec_core::domain::analysis::{Analysis, AnalysisStatus};
    use carerec_core::domain::partner::{Partner, PartnerKind};
    use carerec_core::engine::Evaluator;
    use carerec_core::rules::RuleCatalog;
    use carerec_core::storage::memory::{
        InMemoryAnalysisStore, InMemoryPartnerDirectory, InMemoryRecommendationStore,
    };
    use serde_json::json;

    async fn state_with_glucose_analysis() -> (AppState, Uuid, Uuid) {
        let user_id = Uuid::new_v4();
        let analyses = Arc::new(InMemoryAnalysisStore::default());
        let analysis = Analysis {
            id: Uuid::new_v4(),
            user_id,
            status: AnalysisStatus::Abnormal,
            results: Some(
                json!({
                    "Glucose": {"value": 6.2, "unit": "mmol/L", "referenceMin": 3.3, "referenceMax": 5.5, "isNormal": false}
                })
                .to_string(),
            ),
            created_at: chrono::Utc::now(),
        };
        let analysis_id = analysis.id;
        analyses.insert(analysis).await;

        let directory = Arc::new(InMemoryPartnerDirectory::with_partners(vec![Partner {
            id: Uuid::new_v4(),
            name: "City Clinic".to_string(),
            kind: PartnerKind::Clinic,
            is_active: true,
        }]));
        let evaluator = Evaluator::new(RuleCatalog::default(), analyses, directory);
        let engine = RecommendationEngine::new(
            evaluator,
            Arc::new(InMemoryRecommendationStore::default()),
        );

        (
            AppState {
                engine: Some(Arc::new(engine)),
            },
            user_id,
            analysis_id,
        )
    }

    fn json_body(value: Value) -> Bytes {
        Bytes::from(value.to_string())
    }

    #[tokio::test]
    async fn handlers_return_service_unavailable_without_database() {
        let state = AppState { engine: None };
        let res = list_recommendations(
            State(state),
            Path(Uuid::new_v4()),
            Query(ListQuery::default()),
        )
        .await;
        assert_eq!(res.unwrap_err(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn generate_then_list_then_interact() {
        let (state, user_id, analysis_id) = state_with_glucose_analysis().await;

        let Json(created) = generate_recommendations(
            State(state.clone()),
            Path(user_id),
            json_body(json!({ "analysis_id": analysis_id })),
        )
        .await
        .unwrap();
        assert_eq!(created.len(), 1);

        let Json(again) = generate_recommendations(State(state.clone()), Path(user_id), Bytes::new())
            .await
            .unwrap();
        assert!(again.is_empty());

        let Json(listed) = list_recommendations(
            State(state.clone()),
            Path(user_id),
            Query(ListQuery {
                kind: Some("clinic".to_string()),
                status: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(listed.len(), 1);

        let Json(resp) = interact(
            State(state.clone()),
            Path(created[0].id),
            Json(InteractRequest {
                action: InteractionAction::Purchase,
                metadata: Value::Null,
            }),
        )
        .await
        .unwrap();
        assert_eq!(resp.status, RecommendationStatus::Purchased);

        let res = interact(
            State(state.clone()),
            Path(created[0].id),
            Json(InteractRequest {
                action: InteractionAction::Dismiss,
                metadata: Value::Null,
            }),
        )
        .await;
        assert_eq!(res.unwrap_err(), StatusCode::CONFLICT);

        let Json(events) = list_interactions(State(state), Path(created[0].id))
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn unknown_analysis_is_not_found() {
        let (state, user_id, _) = state_with_glucose_analysis().await;
        let res = generate_recommendations(
            State(state),
            Path(user_id),
            json_body(json!({ "analysis_id": Uuid::new_v4() })),
        )
        .await;
        assert_eq!(res.unwrap_err(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_generate_body_is_rejected_without_persisting() {
        let (state, user_id, _) = state_with_glucose_analysis().await;

        for body in [
            json_body(json!({ "analysis_id": "not-a-uuid" })),
            Bytes::from_static(b"{\"analysis_id\":"),
            json_body(json!([1, 2, 3])),
        ] {
            let res = generate_recommendations(State(state.clone()), Path(user_id), body).await;
            assert_eq!(res.unwrap_err(), StatusCode::BAD_REQUEST);
        }

        let Json(listed) = list_recommendations(
            State(state),
            Path(user_id),
            Query(ListQuery::default()),
        )
        .await
        .unwrap();
        assert!(listed.is_empty());
    }

    #[test]
    fn blank_generate_body_selects_recent_analyses() {
        assert!(GenerateRequest::from_body(b"").unwrap().analysis_id.is_none());
        assert!(GenerateRequest::from_body(b" \n").unwrap().analysis_id.is_none());
        assert!(GenerateRequest::from_body(b"{}").unwrap().analysis_id.is_none());
    }

    #[tokio::test]
    async fn bad_filter_values_are_rejected() {
        let (state, user_id, _) = state_with_glucose_analysis().await;
        let res = list_recommendations(
            State(state),
            Path(user_id),
            Query(ListQuery {
                kind: None,
                status: Some("archived".to_string()),
            }),
        )
        .await;
        assert_eq!(res.unwrap_err(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn interact_request_accepts_lowercase_action_without_metadata() {
        let req: InteractRequest = serde_json::from_value(json!({"action": "dismiss"})).unwrap();
        assert_eq!(req.action, InteractionAction::Dismiss);
        assert_eq!(req.metadata, Value::Null);
    }
}
