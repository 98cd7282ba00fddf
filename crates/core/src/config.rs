use serde::Deserialize;

/// Root application configuration. Loaded from environment variables with
/// the prefix `DECISION_ENGINE__` and an optional TOML file named by
/// `DECISION_ENGINE_CONFIG`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub journey: JourneyConfig,
    #[serde(default)]
    pub attribution: AttributionConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

fn default_node_id() -> String {
    "node-01".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            journey: JourneyConfig::default(),
            attribution: AttributionConfig::default(),
            optimizer: OptimizerConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

// ─── Journey Config ─────────────────────────────────────────────────────

/// Attribution window applied when journeys are reconstructed from the store.
#[derive(Debug, Clone, Deserialize)]
pub struct JourneyConfig {
    #[serde(default = "default_click_window_days")]
    pub click_window_days: u32,
    #[serde(default = "default_view_window_days")]
    pub view_window_days: u32,
    #[serde(default = "default_include_organic")]
    pub include_organic: bool,
    #[serde(default = "default_min_touchpoints")]
    pub min_touchpoints: usize,
}

fn default_click_window_days() -> u32 { 30 }
fn default_view_window_days() -> u32 { 7 }
fn default_include_organic() -> bool { true }
fn default_min_touchpoints() -> usize { 1 }

impl Default for JourneyConfig {
    fn default() -> Self {
        Self {
            click_window_days: default_click_window_days(),
            view_window_days: default_view_window_days(),
            include_organic: default_include_organic(),
            min_touchpoints: default_min_touchpoints(),
        }
    }
}

// ─── Attribution Config ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttributionConfig {
    #[serde(default)]
    pub shapley: ShapleyConfig,
    #[serde(default)]
    pub markov: MarkovConfig,
}

/// Weights of the heuristic Shapley value function. These are calibration
/// knobs, not empirically validated constants.
#[derive(Debug, Clone, Deserialize)]
pub struct ShapleyConfig {
    #[serde(default = "default_max_touchpoints")]
    pub max_touchpoints: usize,
    /// Multiplier for the first and last touchpoint of the sequence.
    #[serde(default = "default_position_bonus")]
    pub position_bonus: f64,
    /// Synergy per extra unique platform in a coalition, as a fraction of base.
    #[serde(default = "default_diversity_bonus")]
    pub diversity_bonus: f64,
    #[serde(default = "default_base_value")]
    pub base_value: f64,
}

fn default_max_touchpoints() -> usize { 10 }
fn default_position_bonus() -> f64 { 1.3 }
fn default_diversity_bonus() -> f64 { 0.1 }
fn default_base_value() -> f64 { 1.0 }

impl Default for ShapleyConfig {
    fn default() -> Self {
        Self {
            max_touchpoints: default_max_touchpoints(),
            position_bonus: default_position_bonus(),
            diversity_bonus: default_diversity_bonus(),
            base_value: default_base_value(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkovConfig {
    #[serde(default = "default_min_converted_journeys")]
    pub min_converted_journeys: usize,
    /// Iteration cap for the absorption-probability solver.
    #[serde(default = "default_markov_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_markov_tolerance")]
    pub tolerance: f64,
    /// Where the trained state blob is persisted; `None` keeps it in memory only.
    #[serde(default)]
    pub state_path: Option<String>,
}

fn default_min_converted_journeys() -> usize { 10 }
fn default_markov_max_iterations() -> usize { 1000 }
fn default_markov_tolerance() -> f64 { 1e-10 }

impl Default for MarkovConfig {
    fn default() -> Self {
        Self {
            min_converted_journeys: default_min_converted_journeys(),
            max_iterations: default_markov_max_iterations(),
            tolerance: default_markov_tolerance(),
            state_path: None,
        }
    }
}

// ─── Optimizer Config ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub bid: BidConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_budget_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_budget_max_iterations")]
    pub max_iterations: usize,
    /// Dollars: stop once no campaign moves by more than this.
    #[serde(default = "default_convergence_threshold")]
    pub convergence_threshold: f64,
    /// Diminishing-returns exponent `b` in `R(B) = a * B^b`.
    #[serde(default = "default_exponent")]
    pub exponent: f64,
    #[serde(default)]
    pub default_min_budget: f64,
    /// When set, campaigns without explicit bounds may move at most this
    /// fraction away from their current budget.
    #[serde(default)]
    pub max_change_pct: Option<f64>,
    #[serde(default = "default_full_confidence_days")]
    pub full_confidence_days: u32,
    #[serde(default = "default_non_convergence_penalty")]
    pub non_convergence_penalty: f64,
}

fn default_budget_learning_rate() -> f64 { 0.1 }
fn default_budget_max_iterations() -> usize { 100 }
fn default_convergence_threshold() -> f64 { 1.0 }
fn default_exponent() -> f64 { 0.8 }
fn default_full_confidence_days() -> u32 { 30 }
fn default_non_convergence_penalty() -> f64 { 0.8 }

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_budget_learning_rate(),
            max_iterations: default_budget_max_iterations(),
            convergence_threshold: default_convergence_threshold(),
            exponent: default_exponent(),
            default_min_budget: 0.0,
            max_change_pct: None,
            full_confidence_days: default_full_confidence_days(),
            non_convergence_penalty: default_non_convergence_penalty(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BidConfig {
    #[serde(default = "default_target_roas")]
    pub target_roas: f64,
    #[serde(default = "default_min_bid")]
    pub min_bid: f64,
    #[serde(default = "default_max_bid")]
    pub max_bid: f64,
    #[serde(default = "default_bid_max_change_pct")]
    pub max_change_pct: f64,
    #[serde(default = "default_bid_learning_rate")]
    pub learning_rate: f64,
    /// Weight of the recent snapshot CVR when blending with historical CVR.
    #[serde(default = "default_recent_weight")]
    pub recent_weight: f64,
    #[serde(default = "default_peak_start_hour")]
    pub peak_start_hour: u32,
    #[serde(default = "default_peak_end_hour")]
    pub peak_end_hour: u32,
    #[serde(default = "default_peak_multiplier")]
    pub peak_multiplier: f64,
    #[serde(default = "default_desktop_multiplier")]
    pub desktop_multiplier: f64,
    #[serde(default = "default_mobile_multiplier")]
    pub mobile_multiplier: f64,
    #[serde(default = "default_feed_multiplier")]
    pub feed_multiplier: f64,
    #[serde(default = "default_stories_multiplier")]
    pub stories_multiplier: f64,
    /// Cap on the performance multiplier's distance from 1.0.
    #[serde(default = "default_max_performance_adjustment")]
    pub max_performance_adjustment: f64,
    /// Recent ROAS must sit beyond `target * t` or `target / t` before a
    /// dynamic adjustment fires.
    #[serde(default = "default_dynamic_threshold")]
    pub dynamic_threshold: f64,
    #[serde(default = "default_dynamic_min_conversions")]
    pub dynamic_min_conversions: u64,
}

fn default_target_roas() -> f64 { 2.0 }
fn default_min_bid() -> f64 { 0.50 }
fn default_max_bid() -> f64 { 50.0 }
fn default_bid_max_change_pct() -> f64 { 0.5 }
fn default_bid_learning_rate() -> f64 { 0.1 }
fn default_recent_weight() -> f64 { 0.7 }
fn default_peak_start_hour() -> u32 { 9 }
fn default_peak_end_hour() -> u32 { 21 }
fn default_peak_multiplier() -> f64 { 1.10 }
fn default_desktop_multiplier() -> f64 { 1.15 }
fn default_mobile_multiplier() -> f64 { 0.95 }
fn default_feed_multiplier() -> f64 { 1.10 }
fn default_stories_multiplier() -> f64 { 0.85 }
fn default_max_performance_adjustment() -> f64 { 0.3 }
fn default_dynamic_threshold() -> f64 { 1.5 }
fn default_dynamic_min_conversions() -> u64 { 3 }

impl Default for BidConfig {
    fn default() -> Self {
        Self {
            target_roas: default_target_roas(),
            min_bid: default_min_bid(),
            max_bid: default_max_bid(),
            max_change_pct: default_bid_max_change_pct(),
            learning_rate: default_bid_learning_rate(),
            recent_weight: default_recent_weight(),
            peak_start_hour: default_peak_start_hour(),
            peak_end_hour: default_peak_end_hour(),
            peak_multiplier: default_peak_multiplier(),
            desktop_multiplier: default_desktop_multiplier(),
            mobile_multiplier: default_mobile_multiplier(),
            feed_multiplier: default_feed_multiplier(),
            stories_multiplier: default_stories_multiplier(),
            max_performance_adjustment: default_max_performance_adjustment(),
            dynamic_threshold: default_dynamic_threshold(),
            dynamic_min_conversions: default_dynamic_min_conversions(),
        }
    }
}

// ─── Orchestrator Config ────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Run Shapley attribution in the background for every tracked conversion.
    #[serde(default = "default_auto_attribute")]
    pub auto_attribute_on_conversion: bool,
    #[serde(default = "default_training_enabled")]
    pub training_enabled: bool,
    #[serde(default = "default_retrain_interval_secs")]
    pub retrain_interval_secs: u64,
    #[serde(default = "default_training_window_days")]
    pub training_window_days: u32,
    #[serde(default = "default_min_touchpoints")]
    pub training_min_touchpoints: usize,
    /// Upper bound on users scored by one batch analysis request.
    #[serde(default = "default_max_batch_users")]
    pub max_batch_users: usize,
    /// Background attribution results kept in memory; the oldest are
    /// evicted first.
    #[serde(default = "default_max_stored_results")]
    pub max_stored_results: usize,
}

fn default_auto_attribute() -> bool { true }
fn default_training_enabled() -> bool { true }
fn default_retrain_interval_secs() -> u64 { 86_400 }
fn default_training_window_days() -> u32 { 90 }
fn default_max_batch_users() -> usize { 10_000 }
fn default_max_stored_results() -> usize { 50_000 }

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            auto_attribute_on_conversion: default_auto_attribute(),
            training_enabled: default_training_enabled(),
            retrain_interval_secs: default_retrain_interval_secs(),
            training_window_days: default_training_window_days(),
            training_min_touchpoints: default_min_touchpoints(),
            max_batch_users: default_max_batch_users(),
            max_stored_results: default_max_stored_results(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and an optional config file.
    pub fn load() -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Ok(path) = std::env::var("DECISION_ENGINE_CONFIG") {
            builder = builder.add_source(config::File::with_name(&path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("DECISION_ENGINE")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            )
            .build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_constants() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.attribution.shapley.max_touchpoints, 10);
        assert!((cfg.attribution.shapley.position_bonus - 1.3).abs() < f64::EPSILON);
        assert_eq!(cfg.attribution.markov.min_converted_journeys, 10);
        assert!((cfg.optimizer.budget.exponent - 0.8).abs() < f64::EPSILON);
        assert_eq!(cfg.optimizer.budget.max_iterations, 100);
        assert!((cfg.optimizer.bid.max_change_pct - 0.5).abs() < f64::EPSILON);
        assert_eq!(cfg.journey.click_window_days, 30);
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let cfg: AppConfig = serde_json::from_str(
            r#"{"node_id":"n-7","optimizer":{"bid":{"target_roas":3.5}}}"#,
        )
        .unwrap();
        assert_eq!(cfg.node_id, "n-7");
        assert!((cfg.optimizer.bid.target_roas - 3.5).abs() < f64::EPSILON);
        assert!((cfg.optimizer.bid.min_bid - 0.5).abs() < f64::EPSILON);
        assert_eq!(cfg.orchestrator.training_window_days, 90);
        assert_eq!(cfg.orchestrator.max_stored_results, 50_000);
    }
}
