//! Decision Engine: multi-touch attribution and budget/bid optimization.
//!
//! Runs the orchestrator against an in-memory journey store, optionally
//! seeded with demo data, and retrains the Markov model on a schedule.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};

use decision_core::config::AppConfig;
use decision_journey::{seed_demo_journeys, InMemoryJourneyStore};
use decision_orchestrator::{DecisionEngine, TrainingScheduler};

const DEMO_SEED: u64 = 42;

#[derive(Parser, Debug)]
#[command(name = "decision-engine")]
#[command(about = "Multi-touch attribution and budget/bid optimization engine")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "DECISION_ENGINE__NODE_ID")]
    node_id: Option<String>,

    /// Seed this many synthetic users into the journey store
    #[arg(long, env = "DECISION_ENGINE__SEED_DEMO")]
    seed_demo: Option<usize>,

    /// Train the Markov model once at startup
    #[arg(long, default_value_t = false)]
    train_now: bool,

    /// Markov model blob location (overrides config)
    #[arg(long, env = "DECISION_ENGINE__ATTRIBUTION__MARKOV__STATE_PATH")]
    state_path: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "decision_engine=info,decision_orchestrator=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Decision Engine starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(path) = cli.state_path {
        config.attribution.markov.state_path = Some(path);
    }

    info!(
        node_id = %config.node_id,
        training_enabled = config.orchestrator.training_enabled,
        retrain_interval_secs = config.orchestrator.retrain_interval_secs,
        state_path = ?config.attribution.markov.state_path,
        "Configuration loaded"
    );

    let store = Arc::new(InMemoryJourneyStore::new());
    if let Some(users) = cli.seed_demo {
        let summary = seed_demo_journeys(store.as_ref(), users, DEMO_SEED, Utc::now()).await?;
        info!(
            users = summary.users,
            touchpoints = summary.touchpoints,
            conversions = summary.conversions,
            "Demo data seeded"
        );
    }

    let engine = DecisionEngine::new(config.clone(), store);

    if let Some(path) = config.attribution.markov.state_path.as_deref() {
        if Path::new(path).exists() {
            if let Err(e) = engine.markov_registry().load_from(path) {
                warn!(path = %path, error = %e, "Failed to load Markov model, starting untrained");
            }
        }
    }

    if cli.train_now {
        match engine.retrain_recent(Utc::now()).await {
            Ok(state) => info!(version = state.version, "Initial Markov training complete"),
            Err(e) => warn!(error = %e, "Initial Markov training skipped"),
        }
    }

    let scheduler = config
        .orchestrator
        .training_enabled
        .then(|| TrainingScheduler::start(engine.clone()));

    let status = engine.models_status();
    info!(
        markov_trained = status.markov.is_trained,
        markov_version = status.markov.version,
        "Decision Engine is ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
    engine.drain_background().await;

    if let Some(path) = config.attribution.markov.state_path.as_deref() {
        if engine.markov_registry().snapshot().is_trained {
            engine.markov_registry().save_to(path)?;
        }
    }

    info!("Decision Engine stopped");
    Ok(())
}
