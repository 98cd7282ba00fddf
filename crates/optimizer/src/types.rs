use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use decision_core::types::{DeviceType, Placement, Platform};
use decision_core::{DecisionError, DecisionResult};

// ---------------------------------------------------------------------------
// Performance data
// ---------------------------------------------------------------------------

/// One day of delivery for a campaign, as reported by the performance feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetrics {
    pub date: NaiveDate,
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    pub spend: f64,
    pub revenue: f64,
}

impl DailyMetrics {
    /// `revenue / spend`, `None` on days without spend.
    pub fn roas(&self) -> Option<f64> {
        (self.spend > 0.0).then(|| self.revenue / self.spend)
    }
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> DecisionResult<Self> {
        if start > end {
            return Err(DecisionError::Validation(format!(
                "date range start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// Historical performance and budget constraints for one campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignPerformance {
    pub campaign_id: String,
    pub platform: Platform,
    pub current_budget: f64,
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    pub spend: f64,
    pub revenue: f64,
    pub min_budget: Option<f64>,
    pub max_budget: Option<f64>,
    /// Daily breakdown backing the totals; drives allocation confidence.
    #[serde(default)]
    pub history: Vec<DailyMetrics>,
}

impl CampaignPerformance {
    pub fn new(
        campaign_id: impl Into<String>,
        platform: Platform,
        current_budget: f64,
        spend: f64,
        revenue: f64,
    ) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            platform,
            current_budget,
            impressions: 0,
            clicks: 0,
            conversions: 0,
            spend,
            revenue,
            min_budget: None,
            max_budget: None,
            history: Vec::new(),
        }
    }

    /// Totals summed from a daily history.
    pub fn from_history(
        campaign_id: impl Into<String>,
        platform: Platform,
        current_budget: f64,
        history: Vec<DailyMetrics>,
    ) -> Self {
        let mut perf = Self::new(campaign_id, platform, current_budget, 0.0, 0.0);
        for day in &history {
            perf.impressions += day.impressions;
            perf.clicks += day.clicks;
            perf.conversions += day.conversions;
            perf.spend += day.spend;
            perf.revenue += day.revenue;
        }
        perf.history = history;
        perf
    }

    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_budget = min;
        self.max_budget = max;
        self
    }

    pub fn ctr(&self) -> f64 {
        ratio(self.clicks as f64, self.impressions as f64)
    }

    pub fn cpc(&self) -> f64 {
        ratio(self.spend, self.clicks as f64)
    }

    pub fn cpa(&self) -> f64 {
        ratio(self.spend, self.conversions as f64)
    }

    pub fn roas(&self) -> f64 {
        ratio(self.revenue, self.spend)
    }

    /// Mean of daily ROAS over days with spend, falling back to the
    /// aggregate ROAS.
    pub fn average_daily_roas(&self) -> f64 {
        let daily: Vec<f64> = self.history.iter().filter_map(DailyMetrics::roas).collect();
        if daily.is_empty() {
            self.roas()
        } else {
            daily.iter().sum::<f64>() / daily.len() as f64
        }
    }

    pub fn validate(&self) -> DecisionResult<()> {
        let fields = [
            ("current_budget", self.current_budget),
            ("spend", self.spend),
            ("revenue", self.revenue),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(DecisionError::Validation(format!(
                    "campaign {} has invalid {} {}",
                    self.campaign_id, name, value
                )));
            }
        }
        for bound in [self.min_budget, self.max_budget].into_iter().flatten() {
            if !bound.is_finite() || bound < 0.0 {
                return Err(DecisionError::Validation(format!(
                    "campaign {} has invalid budget bound {}",
                    self.campaign_id, bound
                )));
            }
        }
        if let (Some(min), Some(max)) = (self.min_budget, self.max_budget) {
            if min > max {
                return Err(DecisionError::Validation(format!(
                    "campaign {} min_budget {} exceeds max_budget {}",
                    self.campaign_id, min, max
                )));
            }
        }
        if self
            .history
            .iter()
            .any(|d| !(d.spend >= 0.0 && d.revenue >= 0.0))
        {
            return Err(DecisionError::Validation(format!(
                "campaign {} history has negative spend or revenue",
                self.campaign_id
            )));
        }
        Ok(())
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Recommended budget for one campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetAllocation {
    pub campaign_id: String,
    pub platform: Platform,
    pub current_budget: f64,
    pub recommended_budget: f64,
    pub budget_change: f64,
    /// Percent of the current budget; 0 when the current budget is 0.
    pub budget_change_pct: f64,
    pub expected_revenue: f64,
    pub expected_roas: f64,
    pub confidence: f64,
    pub reasoning: String,
}

/// Optional floor/ceiling on a platform's share in cross-platform allocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformConstraint {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

// ---------------------------------------------------------------------------
// Bidding
// ---------------------------------------------------------------------------

/// Targeting context and history for one ad set's bid decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidContext {
    pub campaign_id: String,
    pub ad_set_id: String,
    pub platform: Platform,
    pub device_type: Option<DeviceType>,
    pub placement: Option<Placement>,
    pub audience_segment: Option<String>,
    pub hour_of_day: Option<u32>,
    pub day_of_week: Option<u32>,
    pub historical_cvr: Option<f64>,
    pub historical_cpa: Option<f64>,
    pub historical_roas: Option<f64>,
    /// Overrides the configured target ROAS.
    pub target_roas: Option<f64>,
}

impl BidContext {
    pub fn new(campaign_id: impl Into<String>, ad_set_id: impl Into<String>, platform: Platform) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            ad_set_id: ad_set_id.into(),
            platform,
            device_type: None,
            placement: None,
            audience_segment: None,
            hour_of_day: None,
            day_of_week: None,
            historical_cvr: None,
            historical_cpa: None,
            historical_roas: None,
            target_roas: None,
        }
    }
}

/// Recent delivery window for one ad set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub campaign_id: String,
    pub platform: Platform,
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    pub spend: f64,
    pub revenue: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl PerformanceSnapshot {
    pub fn ctr(&self) -> f64 {
        ratio(self.clicks as f64, self.impressions as f64)
    }

    pub fn cvr(&self) -> f64 {
        ratio(self.conversions as f64, self.clicks as f64)
    }

    pub fn cpa(&self) -> f64 {
        ratio(self.spend, self.conversions as f64)
    }

    pub fn roas(&self) -> f64 {
        ratio(self.revenue, self.spend)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidRecommendation {
    pub campaign_id: String,
    pub ad_set_id: String,
    pub platform: Platform,
    pub current_bid: f64,
    /// Context-adjusted optimal bid before performance feedback and clamping.
    pub base_bid: f64,
    pub recommended_bid: f64,
    pub bid_change: f64,
    pub bid_change_pct: f64,
    pub expected_cvr: f64,
    pub expected_cpa: f64,
    pub expected_roas: f64,
    pub confidence: f64,
    pub reasoning: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32, spend: f64, revenue: f64) -> DailyMetrics {
        DailyMetrics {
            date: NaiveDate::from_ymd_opt(2024, 9, d).unwrap(),
            impressions: 1000,
            clicks: 50,
            conversions: 5,
            spend,
            revenue,
        }
    }

    #[test]
    fn test_from_history_sums_totals() {
        let perf = CampaignPerformance::from_history(
            "c1",
            Platform::Meta,
            100.0,
            vec![day(1, 100.0, 300.0), day(2, 100.0, 100.0), day(3, 0.0, 0.0)],
        );
        assert_eq!(perf.clicks, 150);
        assert!((perf.roas() - 2.0).abs() < f64::EPSILON);
        assert!((perf.ctr() - 0.05).abs() < f64::EPSILON);
        assert!((perf.cpa() - 200.0 / 15.0).abs() < 1e-9);
        assert!((perf.average_daily_roas() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_rejects_negative_values() {
        let perf = CampaignPerformance::new("c1", Platform::Meta, -5.0, 10.0, 10.0);
        assert!(matches!(perf.validate().unwrap_err(), DecisionError::Validation(_)));
        let perf = CampaignPerformance::new("c1", Platform::Meta, 5.0, 10.0, 10.0)
            .with_bounds(Some(20.0), Some(10.0));
        assert!(matches!(perf.validate().unwrap_err(), DecisionError::Validation(_)));
    }

    #[test]
    fn test_date_range() {
        let start = NaiveDate::from_ymd_opt(2024, 9, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 9, 7).unwrap();
        let range = DateRange::new(start, end).unwrap();
        assert_eq!(range.days(), 7);
        assert!(range.contains(end));
        assert!(DateRange::new(end, start).is_err());
    }

    #[test]
    fn test_snapshot_metrics_handle_zero() {
        let snap = PerformanceSnapshot {
            campaign_id: "c".into(),
            platform: Platform::Tiktok,
            impressions: 0,
            clicks: 0,
            conversions: 0,
            spend: 0.0,
            revenue: 0.0,
            start_time: Utc::now(),
            end_time: Utc::now(),
        };
        assert_eq!(snap.cvr(), 0.0);
        assert_eq!(snap.roas(), 0.0);
    }
}
