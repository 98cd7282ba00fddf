use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use decision_core::types::Platform;
use decision_core::{DecisionError, DecisionResult};

use crate::budget::BudgetAllocator;
use crate::types::{BudgetAllocation, CampaignPerformance, DailyMetrics, PlatformConstraint};

/// Budget assigned to one platform in the cross-platform stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformBudget {
    pub platform: Platform,
    pub current_budget: f64,
    pub recommended_budget: f64,
    pub expected_revenue: f64,
    pub expected_roas: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiPlatformAllocation {
    pub total_budget: f64,
    pub platforms: Vec<PlatformBudget>,
    pub campaigns: BTreeMap<Platform, Vec<BudgetAllocation>>,
}

impl MultiPlatformAllocation {
    pub fn all_campaigns(&self) -> impl Iterator<Item = &BudgetAllocation> {
        self.campaigns.values().flatten()
    }
}

/// Two-stage allocation: platforms compete as aggregates, then each
/// platform's share is split among its campaigns.
#[derive(Debug, Clone, Default)]
pub struct MultiPlatformAllocator {
    allocator: BudgetAllocator,
}

impl MultiPlatformAllocator {
    pub fn new(allocator: BudgetAllocator) -> Self {
        Self { allocator }
    }

    pub fn optimize(
        &self,
        platform_campaigns: &BTreeMap<Platform, Vec<CampaignPerformance>>,
        total_budget: f64,
        constraints: &BTreeMap<Platform, PlatformConstraint>,
    ) -> DecisionResult<MultiPlatformAllocation> {
        for (platform, constraint) in constraints {
            if let (Some(min), Some(max)) = (constraint.min, constraint.max) {
                if min > max {
                    return Err(DecisionError::Validation(format!(
                        "platform {} min {} exceeds max {}",
                        platform, min, max
                    )));
                }
            }
        }

        let aggregates: Vec<CampaignPerformance> = platform_campaigns
            .iter()
            .filter(|(_, campaigns)| !campaigns.is_empty())
            .map(|(platform, campaigns)| {
                self.aggregate(*platform, campaigns, total_budget, constraints.get(platform))
            })
            .collect::<DecisionResult<_>>()?;

        let platform_allocations = self.allocator.optimize(&aggregates, total_budget)?;

        let mut platforms = Vec::with_capacity(platform_allocations.len());
        let mut campaigns = BTreeMap::new();
        for allocation in platform_allocations {
            let platform = allocation.platform;
            let Some(members) = platform_campaigns.get(&platform) else {
                continue;
            };
            let inner = self.allocator.optimize(members, allocation.recommended_budget)?;
            platforms.push(PlatformBudget {
                platform,
                current_budget: allocation.current_budget,
                recommended_budget: allocation.recommended_budget,
                expected_revenue: allocation.expected_revenue,
                expected_roas: allocation.expected_roas,
                confidence: allocation.confidence,
            });
            campaigns.insert(platform, inner);
        }

        info!(
            platforms = platforms.len(),
            campaigns = campaigns.values().map(Vec::len).sum::<usize>(),
            total_budget,
            "Cross-platform allocation complete"
        );
        Ok(MultiPlatformAllocation {
            total_budget,
            platforms,
            campaigns,
        })
    }

    /// One synthetic campaign standing for all of a platform's campaigns.
    fn aggregate(
        &self,
        platform: Platform,
        campaigns: &[CampaignPerformance],
        total_budget: f64,
        constraint: Option<&PlatformConstraint>,
    ) -> DecisionResult<CampaignPerformance> {
        let mut min = 0.0;
        let mut max = 0.0;
        let mut by_day: BTreeMap<NaiveDate, DailyMetrics> = BTreeMap::new();
        let mut agg = CampaignPerformance::new(platform.as_str(), platform, 0.0, 0.0, 0.0);

        for campaign in campaigns {
            campaign.validate()?;
            if campaign.platform != platform {
                return Err(DecisionError::Validation(format!(
                    "campaign {} runs on {}, listed under {}",
                    campaign.campaign_id, campaign.platform, platform
                )));
            }
            let (lo, hi) = self.allocator.bounds(campaign, total_budget);
            min += lo;
            max += hi;

            agg.current_budget += campaign.current_budget;
            agg.impressions += campaign.impressions;
            agg.clicks += campaign.clicks;
            agg.conversions += campaign.conversions;
            agg.spend += campaign.spend;
            agg.revenue += campaign.revenue;
            for day in &campaign.history {
                let slot = by_day.entry(day.date).or_insert_with(|| DailyMetrics {
                    date: day.date,
                    impressions: 0,
                    clicks: 0,
                    conversions: 0,
                    spend: 0.0,
                    revenue: 0.0,
                });
                slot.impressions += day.impressions;
                slot.clicks += day.clicks;
                slot.conversions += day.conversions;
                slot.spend += day.spend;
                slot.revenue += day.revenue;
            }
        }

        if let Some(c) = constraint {
            if let Some(floor) = c.min {
                min = min.max(floor);
            }
            if let Some(ceiling) = c.max {
                max = max.min(ceiling);
            }
        }
        if min > max {
            return Err(DecisionError::InfeasibleConstraint(format!(
                "platform {} needs at least {:.2} but may receive at most {:.2}",
                platform, min, max
            )));
        }

        agg.history = by_day.into_values().collect();
        agg.min_budget = Some(min);
        agg.max_budget = Some(max);
        Ok(agg)
    }
}
