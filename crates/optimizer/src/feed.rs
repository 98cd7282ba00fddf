use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use decision_core::types::Platform;
use decision_core::DecisionResult;

use crate::types::{CampaignPerformance, DailyMetrics, DateRange};

/// Read-only source of historical per-campaign daily metrics.
///
/// Implementations return raw daily rows. [`load_campaign`] folds them into
/// the [`CampaignPerformance`] the allocator consumes.
#[async_trait]
pub trait PerformanceFeed: Send + Sync {
    async fn get_campaign_performance(
        &self,
        campaign_id: &str,
        range: DateRange,
    ) -> DecisionResult<Vec<DailyMetrics>>;
}

/// Loads a campaign's history over `range` and folds it into a
/// [`CampaignPerformance`] ready for allocation.
pub async fn load_campaign(
    feed: &dyn PerformanceFeed,
    campaign_id: &str,
    platform: Platform,
    current_budget: f64,
    range: DateRange,
) -> DecisionResult<CampaignPerformance> {
    let history = feed.get_campaign_performance(campaign_id, range).await?;
    Ok(CampaignPerformance::from_history(
        campaign_id,
        platform,
        current_budget,
        history,
    ))
}

#[derive(Clone, Default)]
pub struct InMemoryPerformanceFeed {
    days: Arc<DashMap<String, Vec<DailyMetrics>>>,
}

impl std::fmt::Debug for InMemoryPerformanceFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryPerformanceFeed")
            .field("campaigns", &self.days.len())
            .finish()
    }
}

impl InMemoryPerformanceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `day`, replacing any earlier record for the same date.
    pub fn record(&self, campaign_id: impl Into<String>, day: DailyMetrics) {
        let mut entry = self.days.entry(campaign_id.into()).or_default();
        entry.retain(|d| d.date != day.date);
        entry.push(day);
        entry.sort_by_key(|d| d.date);
    }
}

#[async_trait]
impl PerformanceFeed for InMemoryPerformanceFeed {
    async fn get_campaign_performance(
        &self,
        campaign_id: &str,
        range: DateRange,
    ) -> DecisionResult<Vec<DailyMetrics>> {
        Ok(self
            .days
            .get(campaign_id)
            .map(|days| days.iter().filter(|d| range.contains(d.date)).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32, spend: f64, revenue: f64) -> DailyMetrics {
        DailyMetrics {
            date: NaiveDate::from_ymd_opt(2024, 10, d).unwrap(),
            impressions: 500,
            clicks: 25,
            conversions: 2,
            spend,
            revenue,
        }
    }

    #[tokio::test]
    async fn test_range_filter_and_replace() {
        let feed = InMemoryPerformanceFeed::new();
        feed.record("c1", day(1, 10.0, 20.0));
        feed.record("c1", day(2, 10.0, 30.0));
        feed.record("c1", day(2, 12.0, 36.0));
        feed.record("c1", day(9, 10.0, 10.0));

        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 10, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 10, 5).unwrap(),
        )
        .unwrap();
        let days = feed.get_campaign_performance("c1", range).await.unwrap();
        assert_eq!(days.len(), 2);
        assert!((days[1].spend - 12.0).abs() < f64::EPSILON);
        assert!(feed.get_campaign_performance("nope", range).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_campaign_totals() {
        let feed = InMemoryPerformanceFeed::new();
        feed.record("c1", day(1, 10.0, 20.0));
        feed.record("c1", day(2, 30.0, 60.0));
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 10, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 10, 31).unwrap(),
        )
        .unwrap();
        let perf = load_campaign(&feed, "c1", Platform::Meta, 40.0, range).await.unwrap();
        assert!((perf.spend - 40.0).abs() < f64::EPSILON);
        assert!((perf.roas() - 2.0).abs() < f64::EPSILON);
        assert_eq!(perf.history.len(), 2);
    }
}
