use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use carerec_core::engine::RecommendationEngine;

#[derive(Debug, Parser)]
#[command(name = "carerec_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate recommendations for one user (admin trigger).
    Generate {
        #[arg(long)]
        user_id: Uuid,

        /// Evaluate only this analysis. Defaults to the user's recent abnormal analyses.
        #[arg(long)]
        analysis_id: Option<Uuid>,

        /// Evaluate and rank, but do not write to the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// Mark live recommendations past their expiry as EXPIRED.
    Expire {
        /// Reference time (RFC 3339). Defaults to now.
        #[arg(long)]
        now: Option<String>,
    },
}

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

    let args = Args::parse();

    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    carerec_core::storage::migrate(&pool).await?;

    let engine = RecommendationEngine::postgres(pool, &settings)?;

    let res = match args.command {
        Command::Generate {
            user_id,
            analysis_id,
            dry_run,
        } => generate(&engine, user_id, analysis_id, dry_run).await,
        Command::Expire { now } => expire(&engine, now.as_deref()).await,
    };

    if let Err(err) = &res {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %err, "worker command failed");
    }
    res
}

async fn generate(
    engine: &RecommendationEngine,
    user_id: Uuid,
    analysis_id: Option<Uuid>,
    dry_run: bool,
) -> anyhow::Result<()> {
    if dry_run {
        let drafts = engine
            .preview(user_id, analysis_id)
            .await
            .with_context(|| format!("evaluation failed for user {user_id}"))?;
        for (idx, draft) in drafts.iter().enumerate() {
            tracing::info!(
                rank = idx + 1,
                kind = %draft.kind,
                priority = draft.priority.value(),
                title = %draft.title,
                partner_entity_id = ?draft.partner_entity_id,
                "draft recommendation (dry-run)"
            );
        }
        tracing::info!(%user_id, ?analysis_id, dry_run = true, drafts = drafts.len(), "generate finished");
        return Ok(());
    }

    let created = engine
        .generate(user_id, analysis_id)
        .await
        .with_context(|| format!("generation failed for user {user_id}"))?;
    let ids: Vec<Uuid> = created.iter().map(|r| r.id).collect();
    tracing::info!(%user_id, ?analysis_id, created = created.len(), ?ids, "generate finished");
    Ok(())
}

async fn expire(engine: &RecommendationEngine, now_arg: Option<&str>) -> anyhow::Result<()> {
    let now = resolve_now(now_arg)?;
    engine
        .expire_stale(now)
        .await
        .context("expiry sweep failed")?;
    Ok(())
}

fn resolve_now(now_arg: Option<&str>) -> anyhow::Result<chrono::DateTime<chrono::Utc>> {
    match now_arg {
        Some(s) => Ok(chrono::DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("invalid --now value: {s}"))?
            .with_timezone(&chrono::Utc)),
        None => Ok(chrono::Utc::now()),
    }
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
