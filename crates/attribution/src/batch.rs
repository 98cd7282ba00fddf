//! Aggregation of many attribution results into per-platform and
//! per-campaign totals.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use decision_core::types::Platform;
use decision_journey::CustomerJourney;

use crate::model::{AttributionModel, AttributionResult, ModelType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSummary {
    pub platform: Platform,
    pub credit: f64,
    pub revenue_attributed: f64,
    pub touchpoint_count: usize,
    /// Converted journeys in which the platform appeared.
    pub conversions: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignSummary {
    pub campaign_id: String,
    pub campaign_name: String,
    pub credit: f64,
    pub revenue_attributed: f64,
    pub touchpoint_count: usize,
    pub first_touch_count: usize,
    pub last_touch_count: usize,
    pub middle_touch_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchAnalysis {
    pub model_type: ModelType,
    pub total_journeys: usize,
    pub converted_journeys: usize,
    pub failed_journeys: usize,
    pub total_revenue: f64,
    pub conversion_rate: f64,
    pub platforms: Vec<PlatformSummary>,
    pub campaigns: Vec<CampaignSummary>,
}

/// Accumulates results journey by journey.
#[derive(Debug)]
pub struct BatchAggregator {
    model_type: ModelType,
    total: usize,
    converted: usize,
    failed: usize,
    revenue: f64,
    platforms: BTreeMap<Platform, PlatformSummary>,
    campaigns: BTreeMap<String, CampaignSummary>,
}

impl BatchAggregator {
    pub fn new(model_type: ModelType) -> Self {
        Self {
            model_type,
            total: 0,
            converted: 0,
            failed: 0,
            revenue: 0.0,
            platforms: BTreeMap::new(),
            campaigns: BTreeMap::new(),
        }
    }

    pub fn add_result(&mut self, result: &AttributionResult) {
        self.total += 1;
        self.converted += 1;
        self.revenue += result.total_revenue;

        for p in &result.platform_attribution {
            let entry = self.platforms.entry(p.platform).or_insert_with(|| PlatformSummary {
                platform: p.platform,
                credit: 0.0,
                revenue_attributed: 0.0,
                touchpoint_count: 0,
                conversions: 0,
            });
            entry.credit += p.credit;
            entry.revenue_attributed += p.revenue_attributed;
            entry.touchpoint_count += p.touchpoint_count;
            entry.conversions += 1;
        }
        for c in &result.campaign_attribution {
            let entry = self
                .campaigns
                .entry(c.campaign_id.clone())
                .or_insert_with(|| CampaignSummary {
                    campaign_id: c.campaign_id.clone(),
                    campaign_name: c.campaign_name.clone(),
                    ..Default::default()
                });
            entry.credit += c.credit;
            entry.revenue_attributed += c.revenue_attributed;
            entry.touchpoint_count += c.touchpoint_count;
            entry.first_touch_count += c.first_touch_count;
            entry.last_touch_count += c.last_touch_count;
            entry.middle_touch_count += c.middle_touch_count;
        }
    }

    /// Counts a journey that did not convert; it is not scored.
    pub fn add_unconverted(&mut self) {
        self.total += 1;
    }

    pub fn add_failure(&mut self) {
        self.total += 1;
        self.failed += 1;
    }

    pub fn finish(self) -> BatchAnalysis {
        let mut platforms: Vec<PlatformSummary> = self.platforms.into_values().collect();
        platforms.sort_by(|a, b| b.revenue_attributed.total_cmp(&a.revenue_attributed));
        let mut campaigns: Vec<CampaignSummary> = self.campaigns.into_values().collect();
        campaigns.sort_by(|a, b| b.revenue_attributed.total_cmp(&a.revenue_attributed));

        BatchAnalysis {
            model_type: self.model_type,
            total_journeys: self.total,
            converted_journeys: self.converted,
            failed_journeys: self.failed,
            total_revenue: self.revenue,
            conversion_rate: if self.total > 0 {
                self.converted as f64 / self.total as f64
            } else {
                0.0
            },
            platforms,
            campaigns,
        }
    }
}

/// Scores every converted journey with `model` and aggregates the results.
pub fn analyze_journeys(model: &dyn AttributionModel, journeys: &[CustomerJourney]) -> BatchAnalysis {
    let mut aggregator = BatchAggregator::new(model.model_type());
    for journey in journeys {
        if !journey.converted {
            aggregator.add_unconverted();
            continue;
        }
        match model.attribute(journey) {
            Ok(result) => aggregator.add_result(&result),
            Err(e) => {
                warn!(journey_id = %journey.journey_id, error = %e, "Journey failed attribution");
                aggregator.add_failure();
            }
        }
    }
    let analysis = aggregator.finish();
    debug!(
        total = analysis.total_journeys,
        converted = analysis.converted_journeys,
        failed = analysis.failed_journeys,
        "Batch analysis complete"
    );
    analysis
}
