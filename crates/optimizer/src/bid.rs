//! Bid optimization.
//!
//! The optimal bid pays for a click what that click is expected to return at
//! the target ROAS: `bid = aov * cvr / target_roas`. The conversion rate is a
//! blend of recent and historical rates, shaded by context (hour, device,
//! placement), and the result is nudged by how recent ROAS compares with the
//! target before being clamped to absolute and per-change limits.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use decision_core::config::BidConfig;
use decision_core::types::{DeviceType, Placement};
use decision_core::{DecisionError, DecisionResult};

use crate::types::{BidContext, BidRecommendation, PerformanceSnapshot};

/// Below this many recent clicks or conversions the sample is considered
/// thin and confidence is capped.
const MIN_CLICKS: u64 = 30;
const MIN_CONVERSIONS: u64 = 5;
const LOW_SAMPLE_CONFIDENCE: f64 = 0.6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidFailure {
    pub ad_set_id: String,
    pub error: String,
}

/// Results of a multi-ad-set bid run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BidBatch {
    pub recommendations: Vec<BidRecommendation>,
    pub failures: Vec<BidFailure>,
}

#[derive(Debug, Clone, Default)]
pub struct BidOptimizer {
    cfg: BidConfig,
}

impl BidOptimizer {
    pub fn new(cfg: BidConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &BidConfig {
        &self.cfg
    }

    pub fn optimize_bid(
        &self,
        context: &BidContext,
        current_bid: f64,
        avg_order_value: f64,
        recent: Option<&PerformanceSnapshot>,
    ) -> DecisionResult<BidRecommendation> {
        let target = context.target_roas.unwrap_or(self.cfg.target_roas);
        if !(avg_order_value.is_finite() && avg_order_value > 0.0) {
            return Err(DecisionError::Validation(format!(
                "average order value must be positive, got {}",
                avg_order_value
            )));
        }
        if !(target.is_finite() && target > 0.0) {
            return Err(DecisionError::Validation(format!(
                "target ROAS must be positive, got {}",
                target
            )));
        }
        if !(current_bid.is_finite() && current_bid > 0.0) {
            return Err(DecisionError::Validation(format!(
                "current bid must be positive, got {}",
                current_bid
            )));
        }

        let lower = self.cfg.min_bid.max(current_bid * (1.0 - self.cfg.max_change_pct));
        let upper = self.cfg.max_bid.min(current_bid * (1.0 + self.cfg.max_change_pct));
        if lower > upper {
            return Err(DecisionError::Validation(format!(
                "current bid {:.2} cannot reach [{:.2}, {:.2}] within a {:.0}% change",
                current_bid,
                self.cfg.min_bid,
                self.cfg.max_bid,
                self.cfg.max_change_pct * 100.0
            )));
        }

        let cvr = self.blended_cvr(context, recent)? * self.context_multiplier(context);
        let base_bid = avg_order_value * cvr / target;
        let performance = recent
            .map(|snap| self.performance_multiplier(snap, target))
            .unwrap_or(1.0);
        let recommended = (base_bid * performance).clamp(lower, upper);

        let expected_cpa = if cvr > 0.0 { recommended / cvr } else { 0.0 };
        let expected_roas = avg_order_value * cvr / recommended;
        let change = recommended - current_bid;
        let change_pct = change / current_bid * 100.0;
        let confidence = self.confidence(recent);

        debug!(
            ad_set_id = %context.ad_set_id,
            cvr,
            base_bid,
            performance,
            recommended,
            "Bid computed"
        );

        Ok(BidRecommendation {
            campaign_id: context.campaign_id.clone(),
            ad_set_id: context.ad_set_id.clone(),
            platform: context.platform,
            current_bid,
            base_bid,
            recommended_bid: recommended,
            bid_change: change,
            bid_change_pct: change_pct,
            expected_cvr: cvr,
            expected_cpa,
            expected_roas,
            confidence,
            reasoning: self.reasoning(context, change_pct, cvr, expected_roas, target),
        })
    }

    /// Runs [`BidOptimizer::optimize_bid`] for every context. Ad sets with no
    /// entry in `current_bids` start from the configured minimum bid.
    pub fn optimize_campaign_bids(
        &self,
        contexts: &[BidContext],
        current_bids: &HashMap<String, f64>,
        avg_order_value: f64,
        performance: &HashMap<String, PerformanceSnapshot>,
    ) -> BidBatch {
        let mut batch = BidBatch::default();
        for context in contexts {
            let current = current_bids
                .get(&context.ad_set_id)
                .copied()
                .unwrap_or(self.cfg.min_bid);
            match self.optimize_bid(
                context,
                current,
                avg_order_value,
                performance.get(&context.ad_set_id),
            ) {
                Ok(rec) => batch.recommendations.push(rec),
                Err(e) => {
                    warn!(ad_set_id = %context.ad_set_id, error = %e, "Bid optimization failed");
                    batch.failures.push(BidFailure {
                        ad_set_id: context.ad_set_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        batch
    }

    fn blended_cvr(
        &self,
        context: &BidContext,
        recent: Option<&PerformanceSnapshot>,
    ) -> DecisionResult<f64> {
        let historical = context.historical_cvr;
        if let Some(h) = historical {
            if !(0.0..=1.0).contains(&h) {
                return Err(DecisionError::Validation(format!(
                    "historical CVR must be within [0, 1], got {}",
                    h
                )));
            }
        }
        let recent_cvr = recent.filter(|s| s.clicks > 0).map(PerformanceSnapshot::cvr);

        match (recent_cvr, historical) {
            (Some(r), Some(h)) => Ok(self.cfg.recent_weight * r + (1.0 - self.cfg.recent_weight) * h),
            (Some(r), None) => Ok(r),
            (None, Some(h)) => Ok(h),
            (None, None) => Err(DecisionError::InsufficientData(format!(
                "no conversion rate for ad set {}",
                context.ad_set_id
            ))),
        }
    }

    fn context_multiplier(&self, context: &BidContext) -> f64 {
        let mut m = 1.0;
        if let Some(hour) = context.hour_of_day {
            if (self.cfg.peak_start_hour..=self.cfg.peak_end_hour).contains(&hour) {
                m *= self.cfg.peak_multiplier;
            }
        }
        match context.device_type {
            Some(DeviceType::Desktop) => m *= self.cfg.desktop_multiplier,
            Some(DeviceType::Mobile) => m *= self.cfg.mobile_multiplier,
            _ => {}
        }
        match context.placement {
            Some(Placement::Feed) => m *= self.cfg.feed_multiplier,
            Some(Placement::Stories) => m *= self.cfg.stories_multiplier,
            _ => {}
        }
        m
    }

    /// `1 + lr * (recent_roas / target - 1)`, bounded to
    /// `1 +- max_performance_adjustment`. Neutral without spend.
    fn performance_multiplier(&self, snapshot: &PerformanceSnapshot, target: f64) -> f64 {
        if snapshot.spend <= 0.0 {
            return 1.0;
        }
        let ratio = snapshot.roas() / target;
        let cap = self.cfg.max_performance_adjustment;
        (1.0 + self.cfg.learning_rate * (ratio - 1.0)).clamp(1.0 - cap, 1.0 + cap)
    }

    /// Driven by the relative standard error of the recent CVR estimate.
    fn confidence(&self, recent: Option<&PerformanceSnapshot>) -> f64 {
        let Some(snap) = recent else {
            return 0.5;
        };
        if snap.clicks == 0 {
            return 0.4;
        }
        let cvr = snap.cvr();
        let rse = if cvr > 0.0 {
            (cvr * (1.0 - cvr) / snap.clicks as f64).sqrt() / cvr
        } else {
            f64::INFINITY
        };
        let mut confidence = 0.95 / (1.0 + rse);
        if snap.clicks < MIN_CLICKS || snap.conversions < MIN_CONVERSIONS || rse > 0.5 {
            confidence = confidence.min(LOW_SAMPLE_CONFIDENCE);
        }
        confidence.clamp(0.0, 0.95)
    }

    fn reasoning(
        &self,
        context: &BidContext,
        change_pct: f64,
        cvr: f64,
        expected_roas: f64,
        target: f64,
    ) -> String {
        if change_pct.abs() < 5.0 {
            return format!(
                "Bid is near optimal. Expected CVR {:.2}%, ROAS {:.2}x against a {:.2}x target.",
                cvr * 100.0,
                expected_roas,
                target
            );
        }
        let mut parts = Vec::new();
        if change_pct > 0.0 {
            parts.push(format!("Raise bid {:.1}%", change_pct));
            parts.push(format!(
                "Expected ROAS {:.2}x leaves room to scale above the {:.2}x target",
                expected_roas, target
            ));
        } else {
            parts.push(format!("Lower bid {:.1}%", change_pct.abs()));
            parts.push(format!(
                "Current bid overpays for an expected CVR of {:.2}% at a {:.2}x target",
                cvr * 100.0,
                target
            ));
        }
        if let Some(device) = context.device_type {
            parts.push(format!("Device: {:?}", device).to_lowercase());
        }
        if let Some(hour) = context.hour_of_day {
            parts.push(format!("Hour of day: {}:00", hour));
        }
        parts.join(". ") + "."
    }
}
