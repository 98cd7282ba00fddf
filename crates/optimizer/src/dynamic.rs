use serde::{Deserialize, Serialize};

use decision_core::config::BidConfig;

use crate::types::PerformanceSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentDirection {
    ScaleUp,
    ScaleDown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentDecision {
    pub adjust: bool,
    pub direction: Option<AdjustmentDirection>,
    pub reason: String,
}

/// Out-of-band bid correction when recent ROAS strays far from target,
/// between regular optimization runs.
#[derive(Debug, Clone)]
pub struct DynamicBidAdjustment {
    threshold: f64,
    min_conversions: u64,
}

impl Default for DynamicBidAdjustment {
    fn default() -> Self {
        Self::from(&BidConfig::default())
    }
}

impl From<&BidConfig> for DynamicBidAdjustment {
    fn from(cfg: &BidConfig) -> Self {
        Self {
            threshold: cfg.dynamic_threshold.max(1.0),
            min_conversions: cfg.dynamic_min_conversions,
        }
    }
}

impl DynamicBidAdjustment {
    pub fn should_adjust(&self, snapshot: &PerformanceSnapshot, target_roas: f64) -> AdjustmentDecision {
        if snapshot.conversions < self.min_conversions {
            return AdjustmentDecision {
                adjust: false,
                direction: None,
                reason: format!(
                    "Only {} conversions; need {} before reacting",
                    snapshot.conversions, self.min_conversions
                ),
            };
        }
        let roas = snapshot.roas();
        if roas > target_roas * self.threshold {
            AdjustmentDecision {
                adjust: true,
                direction: Some(AdjustmentDirection::ScaleUp),
                reason: format!(
                    "ROAS {:.2}x is well above the {:.2}x target: scale up",
                    roas, target_roas
                ),
            }
        } else if roas < target_roas / self.threshold {
            AdjustmentDecision {
                adjust: true,
                direction: Some(AdjustmentDirection::ScaleDown),
                reason: format!(
                    "ROAS {:.2}x is well below the {:.2}x target: scale down",
                    roas, target_roas
                ),
            }
        } else {
            AdjustmentDecision {
                adjust: false,
                direction: None,
                reason: "Performance within the acceptable range".to_string(),
            }
        }
    }

    /// Multiplier in `[0.5, 1.5]` to apply to current bids.
    pub fn emergency_multiplier(&self, snapshot: &PerformanceSnapshot, target_roas: f64) -> f64 {
        if snapshot.spend <= 0.0 || target_roas <= 0.0 {
            return 1.0;
        }
        let ratio = snapshot.roas() / target_roas;
        if ratio > self.threshold {
            (1.0 + 0.5 * (ratio - 1.0)).min(1.5)
        } else if ratio < 1.0 / self.threshold {
            ratio.max(0.5)
        } else {
            1.0
        }
    }
}
