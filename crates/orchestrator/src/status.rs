use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use decision_attribution::markov::ConversionPath;
use decision_attribution::MarkovModelState;
use decision_core::config::ShapleyConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapleyStatus {
    pub max_touchpoints: usize,
    pub position_bonus: f64,
    pub diversity_bonus: f64,
    pub base_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkovStatus {
    pub is_trained: bool,
    pub version: u64,
    pub states: usize,
    pub transitions: usize,
    pub training_journey_count: usize,
    pub converted_journey_count: usize,
    pub trained_at: Option<DateTime<Utc>>,
    pub top_conversion_paths: Vec<ConversionPath>,
}

/// Snapshot of both attribution models for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsStatus {
    pub shapley: ShapleyStatus,
    pub markov: MarkovStatus,
}

impl ModelsStatus {
    pub fn new(shapley: &ShapleyConfig, markov: &MarkovModelState) -> Self {
        Self {
            shapley: ShapleyStatus {
                max_touchpoints: shapley.max_touchpoints,
                position_bonus: shapley.position_bonus,
                diversity_bonus: shapley.diversity_bonus,
                base_value: shapley.base_value,
            },
            markov: MarkovStatus {
                is_trained: markov.is_trained,
                version: markov.version,
                states: markov.states().len(),
                transitions: markov.transition_count(),
                training_journey_count: markov.training_journey_count,
                converted_journey_count: markov.converted_journey_count,
                trained_at: markov.trained_at,
                top_conversion_paths: markov.top_conversion_paths(5),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untrained_status() {
        let status = ModelsStatus::new(&ShapleyConfig::default(), &MarkovModelState::untrained());
        assert_eq!(status.shapley.max_touchpoints, 10);
        assert!(!status.markov.is_trained);
        assert_eq!(status.markov.version, 0);
        assert_eq!(status.markov.states, 0);
        assert!(status.markov.top_conversion_paths.is_empty());
    }
}
