use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use decision_core::DecisionError;

use crate::engine::DecisionEngine;

/// Periodic Markov retraining over the configured training window.
pub struct TrainingScheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl std::fmt::Debug for TrainingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingScheduler")
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

impl TrainingScheduler {
    /// Starts the loop. The first run happens one full interval after start.
    pub fn start(engine: DecisionEngine) -> Self {
        let period = Duration::from_secs(engine.config().orchestrator.retrain_interval_secs.max(1));
        let (shutdown, mut stop) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            info!(interval_secs = period.as_secs(), "Markov training scheduler started");
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        run_once(&engine).await;
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Markov training scheduler stopped");
        });

        Self { shutdown, handle }
    }

    /// Signals the loop to stop and waits for an in-flight run to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Training scheduler task aborted");
        }
    }
}

/// One retraining pass. Not enough data is expected early on and is not
/// treated as a failure.
pub async fn run_once(engine: &DecisionEngine) {
    match engine.retrain_recent(Utc::now()).await {
        Ok(state) => info!(version = state.version, "Scheduled Markov retrain complete"),
        Err(DecisionError::InsufficientData(reason)) => {
            info!(reason = %reason, "Skipping scheduled Markov retrain")
        }
        Err(e) => warn!(error = %e, "Scheduled Markov retrain failed"),
    }
}
