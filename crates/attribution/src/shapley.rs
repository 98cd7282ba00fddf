//! Shapley value attribution.
//!
//! Each touchpoint is a player in a cooperative game whose payoff is a
//! heuristic conversion value. A touchpoint's credit is its average marginal
//! contribution over every coalition of the other touchpoints, computed by
//! exact enumeration. Enumeration is exponential, so journeys longer than
//! `max_touchpoints` keep that many recent touchpoints as individual players
//! and fold the older ones into one "prior exposure" player per platform.

use tracing::debug;

use decision_core::config::ShapleyConfig;
use decision_core::types::Platform;
use decision_core::DecisionResult;
use decision_journey::CustomerJourney;

use crate::model::{
    build_result, ensure_scorable, top_contributor_insight, AttributionModel, AttributionResult,
    ModelType,
};

/// Hard ceiling on players regardless of configuration (2^20 coalitions).
const MAX_PLAYERS: usize = 20;

/// One player of the game: a single touchpoint, or several older touchpoints
/// of one platform merged into a prior-exposure group.
#[derive(Debug, Clone)]
struct Player {
    platform: Platform,
    members: Vec<usize>,
    weight: f64,
}

#[derive(Debug, Clone)]
pub struct ShapleyAttribution {
    cfg: ShapleyConfig,
}

impl Default for ShapleyAttribution {
    fn default() -> Self {
        Self::new(ShapleyConfig::default())
    }
}

impl ShapleyAttribution {
    pub fn new(cfg: ShapleyConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &ShapleyConfig {
        &self.cfg
    }

    fn max_players(&self) -> usize {
        self.cfg.max_touchpoints.clamp(2, MAX_PLAYERS)
    }

    /// Splits the journey into players. The `max_players` most recent
    /// touchpoints play individually and every platform seen before them
    /// gets one prior-exposure placeholder. Past the hard ceiling the oldest
    /// individual touchpoints fold into placeholders too, so every platform
    /// present keeps a player. Returns the players (placeholders first,
    /// ordered by their latest member) and the number of merged touchpoints.
    fn players(&self, journey: &CustomerJourney) -> (Vec<Player>, usize) {
        let tps = &journey.touchpoints;
        let n = tps.len();
        let max = self.max_players();
        let last_index = n - 1;
        let weight_of = |members: &[usize]| {
            if members.iter().any(|&i| i == 0 || i == last_index) {
                self.cfg.position_bonus
            } else {
                1.0
            }
        };
        let single = |i: usize| Player {
            platform: tps[i].platform,
            members: vec![i],
            weight: weight_of(&[i]),
        };

        if n <= max {
            return ((0..n).map(single).collect(), 0);
        }

        let mut groups: Vec<Player> = Vec::new();
        let fold = |groups: &mut Vec<Player>, i: usize| {
            match groups.iter_mut().find(|g| g.platform == tps[i].platform) {
                Some(group) => group.members.push(i),
                None => groups.push(Player {
                    platform: tps[i].platform,
                    members: vec![i],
                    weight: 1.0,
                }),
            }
        };

        let mut split = n - max;
        for i in 0..split {
            fold(&mut groups, i);
        }
        while split < n && groups.len() + (n - split) > MAX_PLAYERS {
            fold(&mut groups, split);
            split += 1;
        }
        groups.sort_by_key(|g| g.members.last().copied().unwrap_or(0));

        let merged = groups.iter().map(|g| g.members.len()).sum();
        let mut players: Vec<Player> = groups
            .into_iter()
            .map(|mut g| {
                g.weight = weight_of(&g.members);
                g
            })
            .collect();
        players.extend((split..n).map(single));
        (players, merged)
    }

    /// Coalition value: summed presence/position weight scaled up by the
    /// number of distinct platforms taking part.
    fn coalition_value(&self, players: &[Player], platform_bits: &[u32], mask: usize) -> f64 {
        if mask == 0 {
            return 0.0;
        }
        let mut weight = 0.0;
        let mut platforms = 0u32;
        for (i, player) in players.iter().enumerate() {
            if mask & (1 << i) != 0 {
                weight += player.weight;
                platforms |= platform_bits[i];
            }
        }
        let synergy = 1.0 + self.cfg.diversity_bonus * (platforms.count_ones() as f64 - 1.0);
        self.cfg.base_value * weight * synergy
    }

    /// Exact Shapley values, normalized to sum to 1.0.
    fn shapley_values(&self, players: &[Player]) -> Vec<f64> {
        let n = players.len();
        if n == 1 {
            return vec![1.0];
        }

        let platform_bits: Vec<u32> = players
            .iter()
            .map(|p| {
                let slot = Platform::ALL.iter().position(|q| *q == p.platform).unwrap_or(0);
                1u32 << slot
            })
            .collect();
        let values: Vec<f64> = (0..1usize << n)
            .map(|mask| self.coalition_value(players, &platform_bits, mask))
            .collect();

        // |S|! (n - |S| - 1)! / n!
        let mut factorial = vec![1.0f64; n + 1];
        for k in 1..=n {
            factorial[k] = factorial[k - 1] * k as f64;
        }
        let coef: Vec<f64> = (0..n)
            .map(|s| factorial[s] * factorial[n - s - 1] / factorial[n])
            .collect();

        let mut phi = vec![0.0; n];
        for (i, slot) in phi.iter_mut().enumerate() {
            let bit = 1usize << i;
            let mut total = 0.0;
            for mask in 0..(1usize << n) {
                if mask & bit != 0 {
                    continue;
                }
                let size = mask.count_ones() as usize;
                total += coef[size] * (values[mask | bit] - values[mask]);
            }
            *slot = total;
        }

        let sum: f64 = phi.iter().sum();
        if sum <= 0.0 || !sum.is_finite() {
            return vec![1.0 / n as f64; n];
        }
        phi.into_iter().map(|v| v / sum).collect()
    }

    fn confidence(&self, journey: &CustomerJourney, merged: usize) -> f64 {
        if journey.touchpoints.len() == 1 {
            return 0.9;
        }
        let mut confidence: f64 = 0.6;
        if journey.unique_platforms() > 1 {
            confidence += 0.1;
        }
        if journey.touchpoints.len() >= 3 {
            confidence += 0.1;
        }
        if merged > 0 {
            confidence -= 0.1;
        }
        confidence
    }

    fn insights(
        &self,
        journey: &CustomerJourney,
        result: &AttributionResult,
        touch_credits: &[f64],
        merged: usize,
    ) -> Vec<String> {
        let mut insights = Vec::new();
        if let Some(top) = top_contributor_insight(result) {
            insights.push(top);
        }
        if result.platform_attribution.len() > 1 {
            insights.push(format!(
                "Multi-channel journey: {} platforms worked together",
                journey.unique_platforms()
            ));
        }
        if let Some(days) = journey.days_to_convert() {
            insights.push(format!("Conversion took {:.1} days from first touch", days));
        }
        if touch_credits.len() >= 2 {
            let first = touch_credits[0];
            let last = touch_credits[touch_credits.len() - 1];
            if first > last * 1.5 {
                insights.push("First touch outweighed last touch: awareness mattered".to_string());
            } else if last > first * 1.5 {
                insights.push("Last touch outweighed first touch: the closing campaign won".to_string());
            } else {
                insights.push("First and last touch contributed about equally".to_string());
            }
        }
        if merged > 0 {
            insights.push(format!(
                "{} earlier touchpoints were grouped as prior exposure",
                merged
            ));
        }
        insights
    }
}

impl AttributionModel for ShapleyAttribution {
    fn model_type(&self) -> ModelType {
        ModelType::Shapley
    }

    fn attribute(&self, journey: &CustomerJourney) -> DecisionResult<AttributionResult> {
        ensure_scorable(journey)?;

        let (players, merged) = self.players(journey);
        let values = self.shapley_values(&players);

        let mut touch_credits = vec![0.0; journey.touchpoints.len()];
        for (player, value) in players.iter().zip(values.iter()) {
            let share = value / player.members.len() as f64;
            for &i in &player.members {
                touch_credits[i] = share;
            }
        }

        debug!(
            journey_id = %journey.journey_id,
            players = players.len(),
            merged,
            "Shapley values computed"
        );

        let confidence = self.confidence(journey, merged);
        let mut result = build_result(journey, ModelType::Shapley, &touch_credits, confidence, Vec::new());
        result.insights = self.insights(journey, &result, &touch_credits, merged);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use decision_core::types::{ConversionType, TouchpointType};
    use decision_core::DecisionError;
    use decision_journey::{ConversionEvent, TouchpointEvent};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap()
    }

    fn journey(platforms: &[Platform], revenue: f64) -> CustomerJourney {
        let tps = platforms
            .iter()
            .enumerate()
            .map(|(i, p)| {
                TouchpointEvent::new(
                    "u",
                    *p,
                    TouchpointType::Click,
                    format!("{}-c", p.as_str()),
                    t0() + Duration::hours(i as i64),
                )
            })
            .collect();
        let conv = ConversionEvent::new(
            "u",
            ConversionType::Purchase,
            revenue,
            t0() + Duration::hours(platforms.len() as i64),
        );
        CustomerJourney::new("u", tps, Some(conv)).unwrap()
    }

    #[test]
    fn test_two_platform_journey_splits_evenly() {
        let model = ShapleyAttribution::default();
        let result = model
            .attribute(&journey(&[Platform::Meta, Platform::GoogleSearch], 150.0))
            .unwrap();
        assert!((result.credit_for(Platform::Meta) - 0.5).abs() < 1e-2);
        assert!((result.credit_for(Platform::GoogleSearch) - 0.5).abs() < 1e-2);
        let meta = result
            .platform_attribution
            .iter()
            .find(|p| p.platform == Platform::Meta)
            .unwrap();
        assert!((meta.revenue_attributed - 75.0).abs() < 0.01);
    }

    #[test]
    fn test_single_touchpoint_gets_full_credit() {
        let model = ShapleyAttribution::default();
        let result = model.attribute(&journey(&[Platform::Email], 40.0)).unwrap();
        assert_eq!(result.platform_attribution.len(), 1);
        assert!((result.credit_for(Platform::Email) - 1.0).abs() < 1e-9);
        assert!((result.platform_attribution[0].revenue_attributed - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_endpoints_outweigh_middle() {
        let model = ShapleyAttribution::default();
        let result = model
            .attribute(&journey(&[Platform::Meta, Platform::Email, Platform::Tiktok], 90.0))
            .unwrap();
        assert!(result.credit_for(Platform::Meta) > result.credit_for(Platform::Email));
        assert!(result.credit_for(Platform::Tiktok) > result.credit_for(Platform::Email));
        assert!((result.total_credit() - 1.0).abs() < 1e-2);
    }

    #[test]
    fn test_long_journey_is_capped() {
        let model = ShapleyAttribution::default();
        let platforms: Vec<Platform> = (0..25)
            .map(|i| [Platform::Meta, Platform::Email, Platform::Tiktok][i % 3])
            .collect();
        let j = journey(&platforms, 500.0);
        let (players, merged) = model.players(&j);
        // Ten recent touchpoints plus one placeholder per earlier platform.
        assert_eq!(players.len(), 13);
        assert_eq!(merged, 15);

        let result = model.attribute(&j).unwrap();
        assert!((result.total_credit() - 1.0).abs() < 1e-2);
        let revenue: f64 = result.platform_attribution.iter().map(|p| p.revenue_attributed).sum();
        assert!((revenue - 500.0).abs() < 0.01);
        let touchpoints: usize = result.platform_attribution.iter().map(|p| p.touchpoint_count).sum();
        assert_eq!(touchpoints, 25);
    }

    #[test]
    fn test_every_platform_keeps_credit_past_the_cap() {
        let model = ShapleyAttribution::default();
        let mut platforms: Vec<Platform> = Platform::ALL.to_vec();
        platforms.extend(std::iter::repeat(Platform::Meta).take(9));
        let j = journey(&platforms, 100.0);

        let (players, merged) = model.players(&j);
        assert_eq!(players.len(), MAX_PLAYERS);
        assert_eq!(merged, 13);

        let result = model.attribute(&j).unwrap();
        for platform in Platform::ALL {
            assert!(
                result.credit_for(platform) > 0.0,
                "{} got no credit",
                platform
            );
        }
        assert!((result.total_credit() - 1.0).abs() < 1e-6);
        let individual_meta = players
            .iter()
            .filter(|p| p.platform == Platform::Meta && p.members.len() == 1 && p.members[0] >= 12)
            .count();
        assert_eq!(individual_meta, 8);
    }

    #[test]
    fn test_unconverted_journey_rejected() {
        let tps = vec![TouchpointEvent::new("u", Platform::Meta, TouchpointType::Click, "c", t0())];
        let j = CustomerJourney::new("u", tps, None).unwrap();
        let err = ShapleyAttribution::default().attribute(&j).unwrap_err();
        assert!(matches!(err, DecisionError::NotConverted(_)));
    }

    #[test]
    fn test_empty_journey_rejected() {
        let mut j = journey(&[Platform::Meta], 10.0);
        j.touchpoints.clear();
        let err = ShapleyAttribution::default().attribute(&j).unwrap_err();
        assert!(matches!(err, DecisionError::InvalidJourney(_)));
    }

    #[test]
    fn test_insights_mention_top_platform() {
        let result = ShapleyAttribution::default()
            .attribute(&journey(&[Platform::Meta, Platform::Email, Platform::Meta], 100.0))
            .unwrap();
        assert!(result.insights[0].starts_with("Meta drove"));
        assert!(result.insights.iter().any(|i| i.starts_with("Multi-channel journey")));
    }
}
