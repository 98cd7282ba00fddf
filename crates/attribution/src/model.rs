use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use decision_core::types::Platform;
use decision_core::{DecisionError, DecisionResult};
use decision_journey::CustomerJourney;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Shapley,
    Markov,
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelType::Shapley => f.write_str("shapley"),
            ModelType::Markov => f.write_str("markov"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformAttribution {
    pub platform: Platform,
    pub credit: f64,
    pub revenue_attributed: f64,
    pub touchpoint_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignAttribution {
    pub campaign_id: String,
    pub campaign_name: String,
    pub platform: Platform,
    pub credit: f64,
    pub revenue_attributed: f64,
    pub touchpoint_count: usize,
    pub first_touch_count: usize,
    pub last_touch_count: usize,
    pub middle_touch_count: usize,
}

/// Credit assignment for one converted journey.
///
/// Credits sum to 1.0 and attributed revenue sums to the conversion revenue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionResult {
    pub journey_id: String,
    pub user_id: String,
    pub model_type: ModelType,
    pub platform_attribution: Vec<PlatformAttribution>,
    pub campaign_attribution: Vec<CampaignAttribution>,
    pub total_revenue: f64,
    pub confidence_score: f64,
    pub insights: Vec<String>,
    pub computed_at: DateTime<Utc>,
}

impl AttributionResult {
    pub fn total_credit(&self) -> f64 {
        self.platform_attribution.iter().map(|p| p.credit).sum()
    }

    pub fn credit_for(&self, platform: Platform) -> f64 {
        self.platform_attribution
            .iter()
            .find(|p| p.platform == platform)
            .map(|p| p.credit)
            .unwrap_or(0.0)
    }

    pub fn top_platform(&self) -> Option<&PlatformAttribution> {
        self.platform_attribution
            .iter()
            .max_by(|a, b| a.credit.total_cmp(&b.credit))
    }
}

/// A credit-assignment model. Implementations are pure: scoring the same
/// journey against the same model state yields the same result.
pub trait AttributionModel: Send + Sync {
    fn model_type(&self) -> ModelType;

    fn attribute(&self, journey: &CustomerJourney) -> DecisionResult<AttributionResult>;
}

/// Rejects journeys that cannot be scored: broken invariants or no
/// conversion.
pub fn ensure_scorable(journey: &CustomerJourney) -> DecisionResult<()> {
    journey.validate()?;
    if !journey.converted {
        return Err(DecisionError::NotConverted(journey.journey_id.clone()));
    }
    Ok(())
}

/// Builds a result from per-touchpoint credits (index-aligned with
/// `journey.touchpoints`). Credits are renormalized to sum to 1.0; a
/// degenerate vector falls back to an even split.
pub fn build_result(
    journey: &CustomerJourney,
    model_type: ModelType,
    touch_credits: &[f64],
    confidence: f64,
    insights: Vec<String>,
) -> AttributionResult {
    let n = journey.touchpoints.len();
    let credits = normalize(touch_credits, n);
    let revenue = journey.revenue();

    let mut platforms: BTreeMap<Platform, PlatformAttribution> = BTreeMap::new();
    let mut campaigns: BTreeMap<String, CampaignAttribution> = BTreeMap::new();

    for (i, (tp, credit)) in journey.touchpoints.iter().zip(credits.iter()).enumerate() {
        let p = platforms.entry(tp.platform).or_insert_with(|| PlatformAttribution {
            platform: tp.platform,
            credit: 0.0,
            revenue_attributed: 0.0,
            touchpoint_count: 0,
        });
        p.credit += credit;
        p.revenue_attributed += credit * revenue;
        p.touchpoint_count += 1;

        let c = campaigns
            .entry(tp.campaign_id.clone())
            .or_insert_with(|| CampaignAttribution {
                campaign_id: tp.campaign_id.clone(),
                campaign_name: tp.campaign_name.clone(),
                platform: tp.platform,
                credit: 0.0,
                revenue_attributed: 0.0,
                touchpoint_count: 0,
                first_touch_count: 0,
                last_touch_count: 0,
                middle_touch_count: 0,
            });
        c.credit += credit;
        c.revenue_attributed += credit * revenue;
        c.touchpoint_count += 1;
        if i == 0 {
            c.first_touch_count += 1;
        }
        if i + 1 == n {
            c.last_touch_count += 1;
        }
        if i != 0 && i + 1 != n {
            c.middle_touch_count += 1;
        }
    }

    let mut platform_attribution: Vec<PlatformAttribution> = platforms.into_values().collect();
    platform_attribution.sort_by(|a, b| b.credit.total_cmp(&a.credit));
    let mut campaign_attribution: Vec<CampaignAttribution> = campaigns.into_values().collect();
    campaign_attribution.sort_by(|a, b| b.credit.total_cmp(&a.credit));

    AttributionResult {
        journey_id: journey.journey_id.clone(),
        user_id: journey.user_id.clone(),
        model_type,
        platform_attribution,
        campaign_attribution,
        total_revenue: revenue,
        confidence_score: confidence.clamp(0.0, 1.0),
        insights,
        computed_at: Utc::now(),
    }
}

fn normalize(credits: &[f64], n: usize) -> Vec<f64> {
    let sum: f64 = credits.iter().filter(|c| c.is_finite() && **c > 0.0).sum();
    if credits.len() != n || sum <= 0.0 || !sum.is_finite() {
        return vec![1.0 / n.max(1) as f64; n];
    }
    credits
        .iter()
        .map(|c| if c.is_finite() && *c > 0.0 { c / sum } else { 0.0 })
        .collect()
}

/// "Meta drove 62.5% of this conversion ($93.75)"
pub(crate) fn top_contributor_insight(result: &AttributionResult) -> Option<String> {
    result.top_platform().map(|top| {
        format!(
            "{} drove {:.1}% of this conversion (${:.2})",
            top.platform.display_name(),
            top.credit * 100.0,
            top.revenue_attributed
        )
    })
}
