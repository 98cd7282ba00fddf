use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{info, warn};

use decision_core::config::MarkovConfig;
use decision_core::DecisionResult;
use decision_journey::CustomerJourney;

use crate::markov::{MarkovAttribution, MarkovModelState, MarkovTrainer};

/// Holds the published Markov state. Readers take a snapshot and keep
/// scoring against it while training publishes a replacement with a single
/// atomic pointer swap.
pub struct MarkovRegistry {
    current: ArcSwap<MarkovModelState>,
    trainer: MarkovTrainer,
    cfg: MarkovConfig,
}

impl std::fmt::Debug for MarkovRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.current.load();
        f.debug_struct("MarkovRegistry")
            .field("version", &state.version)
            .field("is_trained", &state.is_trained)
            .finish()
    }
}

impl Default for MarkovRegistry {
    fn default() -> Self {
        Self::new(MarkovConfig::default())
    }
}

impl MarkovRegistry {
    pub fn new(cfg: MarkovConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(MarkovModelState::untrained()),
            trainer: MarkovTrainer::new(cfg.clone()),
            cfg,
        }
    }

    pub fn snapshot(&self) -> Arc<MarkovModelState> {
        self.current.load_full()
    }

    /// Scorer bound to the current snapshot.
    pub fn model(&self) -> MarkovAttribution {
        MarkovAttribution::new(self.snapshot(), self.cfg.clone())
    }

    /// Publishes `state`, forcing its version past whatever is current so
    /// concurrent publishers still produce increasing versions.
    pub fn publish(&self, state: MarkovModelState) -> Arc<MarkovModelState> {
        self.current.rcu(|current| {
            let mut next = state.clone();
            next.version = next.version.max(current.version + 1);
            next
        });
        let published = self.snapshot();
        info!(version = published.version, "Markov model published");
        published
    }

    /// Trains on `journeys` and publishes the result. On error the current
    /// state stays published.
    pub fn train(&self, journeys: &[CustomerJourney]) -> DecisionResult<Arc<MarkovModelState>> {
        let prior = self.snapshot();
        match self.trainer.train(journeys, &prior) {
            Ok(state) => Ok(self.publish(state)),
            Err(e) => {
                warn!(error = %e, version = prior.version, "Markov training failed; keeping current model");
                Err(e)
            }
        }
    }

    /// Writes the current state blob to `path` via a temporary sibling file.
    pub fn save_to(&self, path: impl AsRef<Path>) -> DecisionResult<()> {
        let path = path.as_ref();
        let blob = self.snapshot().to_blob()?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, blob)?;
        std::fs::rename(&tmp, path)?;
        info!(path = %path.display(), "Markov model saved");
        Ok(())
    }

    /// Loads a blob from `path` and publishes it.
    pub fn load_from(&self, path: impl AsRef<Path>) -> DecisionResult<Arc<MarkovModelState>> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let state = MarkovModelState::from_blob(&data)?;
        info!(path = %path.display(), version = state.version, "Markov model loaded");
        Ok(self.publish(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use decision_core::types::{ConversionType, Platform, TouchpointType};
    use decision_core::DecisionError;
    use decision_journey::{ConversionEvent, TouchpointEvent};

    fn converted(user: &str, platform: Platform) -> CustomerJourney {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let tp = TouchpointEvent::new(user, platform, TouchpointType::Click, "c", t0);
        let conv = ConversionEvent::new(user, ConversionType::Lead, 20.0, t0 + Duration::hours(2));
        CustomerJourney::new(user, vec![tp], Some(conv)).unwrap()
    }

    fn journeys(n: usize) -> Vec<CustomerJourney> {
        (0..n)
            .map(|i| converted(&format!("u{}", i), if i % 2 == 0 { Platform::Meta } else { Platform::Email }))
            .collect()
    }

    #[test]
    fn test_failed_training_keeps_prior_state() {
        let registry = MarkovRegistry::default();
        let first = registry.train(&journeys(12)).unwrap();
        assert_eq!(first.version, 1);

        let err = registry.train(&journeys(3)).unwrap_err();
        assert!(matches!(err, DecisionError::InsufficientData(_)));
        let current = registry.snapshot();
        assert_eq!(current.version, 1);
        assert!(current.is_trained);
    }

    #[test]
    fn test_snapshot_survives_republish() {
        let registry = MarkovRegistry::default();
        let before = registry.snapshot();
        registry.train(&journeys(12)).unwrap();
        assert!(!before.is_trained);
        assert!(registry.snapshot().is_trained);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("markov.json");

        let registry = MarkovRegistry::default();
        registry.train(&journeys(14)).unwrap();
        registry.save_to(&path).unwrap();

        let other = MarkovRegistry::default();
        let loaded = other.load_from(&path).unwrap();
        assert!(loaded.is_trained);
        assert_eq!(loaded.training_journey_count, 14);
        assert_eq!(loaded.version, 1);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = MarkovRegistry::default();
        let err = registry.load_from(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, DecisionError::Io(_)));
        assert!(!registry.snapshot().is_trained);
    }
}
