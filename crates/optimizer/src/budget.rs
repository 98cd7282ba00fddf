//! Budget allocation across campaigns.
//!
//! Each campaign's revenue is modeled as `R(B) = a * B^b` with `b < 1`
//! (diminishing returns), calibrated so the curve passes through the
//! campaign's current budget and observed ROAS. Budget is moved from
//! campaigns with below-average marginal ROAS to those above it, projected
//! back onto the per-campaign bounds and the fixed total after every step.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use decision_core::config::BudgetConfig;
use decision_core::{DecisionError, DecisionResult};

use crate::types::{BudgetAllocation, CampaignPerformance};

/// Slack for floating point comparisons on dollar amounts.
const EPS: f64 = 1e-6;

/// Allocation plus solver diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationOutcome {
    pub allocations: Vec<BudgetAllocation>,
    pub iterations: usize,
    pub converged: bool,
}

/// Fitted `R(B) = a * B^b` for one campaign.
#[derive(Debug, Clone, Copy)]
struct ResponseCurve {
    a: f64,
    b: f64,
}

impl ResponseCurve {
    fn revenue(&self, budget: f64) -> f64 {
        if budget <= 0.0 {
            0.0
        } else {
            self.a * budget.powf(self.b)
        }
    }

    /// dR/dB, evaluated at no less than $1 so empty campaigns stay finite.
    fn marginal_roas(&self, budget: f64) -> f64 {
        self.a * self.b * budget.max(1.0).powf(self.b - 1.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BudgetAllocator {
    cfg: BudgetConfig,
}

impl BudgetAllocator {
    pub fn new(cfg: BudgetConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.cfg
    }

    /// Recommended budgets for `campaigns` summing to `total_budget`.
    pub fn optimize(
        &self,
        campaigns: &[CampaignPerformance],
        total_budget: f64,
    ) -> DecisionResult<Vec<BudgetAllocation>> {
        Ok(self.optimize_detailed(campaigns, total_budget)?.allocations)
    }

    /// Effective `[min, max]` for a campaign when `total_budget` is shared.
    pub fn bounds(&self, campaign: &CampaignPerformance, total_budget: f64) -> (f64, f64) {
        let relative = self
            .cfg
            .max_change_pct
            .filter(|_| campaign.current_budget > 0.0)
            .map(|pct| {
                (
                    campaign.current_budget * (1.0 - pct).max(0.0),
                    campaign.current_budget * (1.0 + pct),
                )
            });
        let min = campaign
            .min_budget
            .or(relative.map(|r| r.0))
            .unwrap_or(self.cfg.default_min_budget);
        let max = campaign
            .max_budget
            .or(relative.map(|r| r.1))
            .unwrap_or(total_budget)
            .max(min);
        (min, max)
    }

    pub fn optimize_detailed(
        &self,
        campaigns: &[CampaignPerformance],
        total_budget: f64,
    ) -> DecisionResult<AllocationOutcome> {
        self.validate(campaigns, total_budget)?;
        if campaigns.is_empty() {
            return Ok(AllocationOutcome {
                allocations: Vec::new(),
                iterations: 0,
                converged: true,
            });
        }

        let n = campaigns.len();
        let bounds: Vec<(f64, f64)> = campaigns.iter().map(|c| self.bounds(c, total_budget)).collect();
        let min_sum: f64 = bounds.iter().map(|b| b.0).sum();
        let max_sum: f64 = bounds.iter().map(|b| b.1).sum();
        if min_sum > total_budget + EPS {
            return Err(DecisionError::InfeasibleConstraint(format!(
                "minimum budgets sum to {:.2}, above the total {:.2}",
                min_sum, total_budget
            )));
        }
        if max_sum < total_budget - EPS {
            return Err(DecisionError::InfeasibleConstraint(format!(
                "maximum budgets sum to {:.2}, below the total {:.2}",
                max_sum, total_budget
            )));
        }

        let curves: Vec<ResponseCurve> = campaigns.iter().map(|c| self.curve(c)).collect();

        let current_total: f64 = campaigns.iter().map(|c| c.current_budget).sum();
        let mut budgets: Vec<f64> = if current_total > 0.0 {
            campaigns
                .iter()
                .map(|c| c.current_budget * total_budget / current_total)
                .collect()
        } else {
            vec![total_budget / n as f64; n]
        };
        project(&mut budgets, &bounds, total_budget);

        let expected = |b: &[f64]| -> f64 { curves.iter().zip(b).map(|(c, x)| c.revenue(*x)).sum() };
        let mut best = budgets.clone();
        let mut best_revenue = expected(&best);
        let mut converged = false;
        let mut iterations = 0;
        let step_scale = total_budget / n as f64;

        for iter in 0..self.cfg.max_iterations {
            iterations = iter + 1;
            let gradients: Vec<f64> = curves
                .iter()
                .zip(&budgets)
                .map(|(c, b)| c.marginal_roas(*b))
                .collect();
            let mean = gradients.iter().sum::<f64>() / n as f64;
            if mean <= 0.0 {
                converged = true;
                break;
            }

            let previous = budgets.clone();
            for (b, g) in budgets.iter_mut().zip(&gradients) {
                *b += self.cfg.learning_rate * (g - mean) / mean * step_scale;
            }
            project(&mut budgets, &bounds, total_budget);

            let revenue = expected(&budgets);
            if revenue >= best_revenue {
                best_revenue = revenue;
                best.clone_from(&budgets);
            }

            let max_change = budgets
                .iter()
                .zip(&previous)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max);
            debug!(iteration = iterations, max_change, "Budget step");
            if max_change < self.cfg.convergence_threshold {
                converged = true;
                break;
            }
        }

        let final_budgets = if converged { budgets } else { best };
        if converged {
            info!(campaigns = n, iterations, total_budget, "Budget allocation converged");
        } else {
            warn!(
                campaigns = n,
                iterations,
                total_budget,
                "Budget allocation hit the iteration cap; returning best allocation"
            );
        }

        let mean_marginal = curves
            .iter()
            .zip(&final_budgets)
            .map(|(c, b)| c.marginal_roas(*b))
            .sum::<f64>()
            / n as f64;

        let allocations = campaigns
            .iter()
            .zip(curves.iter())
            .zip(final_budgets.iter())
            .map(|((campaign, curve), recommended)| {
                let mut confidence = self.confidence(campaign);
                if !converged {
                    confidence *= self.cfg.non_convergence_penalty;
                }
                self.allocation(campaign, curve, *recommended, confidence, mean_marginal)
            })
            .collect();

        Ok(AllocationOutcome {
            allocations,
            iterations,
            converged,
        })
    }

    fn validate(&self, campaigns: &[CampaignPerformance], total_budget: f64) -> DecisionResult<()> {
        if !total_budget.is_finite() || total_budget < 0.0 {
            return Err(DecisionError::Validation(format!(
                "total budget must be a non-negative amount, got {}",
                total_budget
            )));
        }
        if !(self.cfg.exponent > 0.0 && self.cfg.exponent <= 1.0) {
            return Err(DecisionError::Config(format!(
                "budget exponent must be in (0, 1], got {}",
                self.cfg.exponent
            )));
        }
        let mut seen = HashSet::new();
        for campaign in campaigns {
            campaign.validate()?;
            if !seen.insert(campaign.campaign_id.as_str()) {
                return Err(DecisionError::Validation(format!(
                    "campaign {} appears more than once",
                    campaign.campaign_id
                )));
            }
        }
        Ok(())
    }

    fn curve(&self, campaign: &CampaignPerformance) -> ResponseCurve {
        let b = self.cfg.exponent;
        let a = if campaign.current_budget > 0.0 {
            // R_current = ROAS * B_current  =>  a = R_current / B_current^b
            campaign.roas() * campaign.current_budget.powf(1.0 - b)
        } else {
            campaign.average_daily_roas()
        };
        ResponseCurve { a, b }
    }

    /// More days of history and steadier daily ROAS give higher confidence.
    fn confidence(&self, campaign: &CampaignPerformance) -> f64 {
        let full_days = self.cfg.full_confidence_days.max(1) as f64;
        let days_factor = (campaign.history.len() as f64 / full_days).min(1.0);

        let daily: Vec<f64> = campaign.history.iter().filter_map(|d| d.roas()).collect();
        let stability = if daily.len() >= 2 {
            let mean = daily.iter().sum::<f64>() / daily.len() as f64;
            if mean > 0.0 {
                let variance =
                    daily.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / daily.len() as f64;
                1.0 / (1.0 + variance.sqrt() / mean)
            } else {
                0.0
            }
        } else {
            0.5
        };

        (0.2 + 0.5 * days_factor + 0.3 * stability).clamp(0.0, 1.0)
    }

    fn allocation(
        &self,
        campaign: &CampaignPerformance,
        curve: &ResponseCurve,
        recommended: f64,
        confidence: f64,
        mean_marginal: f64,
    ) -> BudgetAllocation {
        let change = recommended - campaign.current_budget;
        let change_pct = if campaign.current_budget > 0.0 {
            change / campaign.current_budget * 100.0
        } else {
            0.0
        };
        let expected_revenue = curve.revenue(recommended);
        let expected_roas = if recommended > 0.0 {
            expected_revenue / recommended
        } else {
            0.0
        };
        let marginal = curve.marginal_roas(recommended);

        let reasoning = if change.abs() < self.cfg.convergence_threshold {
            format!(
                "Keep budget: marginal ROAS {:.2}x is in line with the portfolio average {:.2}x",
                marginal, mean_marginal
            )
        } else {
            let direction = if change > 0.0 { "Increase" } else { "Decrease" };
            format!(
                "{} budget by ${:.2} ({:+.1}%): marginal ROAS {:.2}x vs portfolio average {:.2}x, expected ROAS {:.2}x",
                direction,
                change.abs(),
                change_pct,
                marginal,
                mean_marginal,
                expected_roas
            )
        };

        BudgetAllocation {
            campaign_id: campaign.campaign_id.clone(),
            platform: campaign.platform,
            current_budget: campaign.current_budget,
            recommended_budget: recommended,
            budget_change: change,
            budget_change_pct: change_pct,
            expected_revenue,
            expected_roas,
            confidence,
            reasoning,
        }
    }
}

/// Clips `budgets` to `bounds`, then spreads the gap to `total` over the
/// campaigns that can still move, repeating until the sum matches.
fn project(budgets: &mut [f64], bounds: &[(f64, f64)], total: f64) {
    for (b, (lo, hi)) in budgets.iter_mut().zip(bounds) {
        *b = b.clamp(*lo, *hi);
    }

    for _ in 0..(4 * budgets.len() + 4) {
        let residual = total - budgets.iter().sum::<f64>();
        if residual.abs() < EPS {
            return;
        }

        // Share of the residual each free campaign absorbs.
        let weights: Vec<f64> = budgets
            .iter()
            .zip(bounds)
            .map(|(b, (lo, hi))| {
                if residual > 0.0 {
                    if *b < hi - EPS {
                        b.max(EPS)
                    } else {
                        0.0
                    }
                } else if *b > lo + EPS {
                    b - lo
                } else {
                    0.0
                }
            })
            .collect();
        let weight_sum: f64 = weights.iter().sum();
        if weight_sum <= 0.0 {
            return;
        }

        for ((b, w), (lo, hi)) in budgets.iter_mut().zip(&weights).zip(bounds) {
            *b = (*b + residual * w / weight_sum).clamp(*lo, *hi);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use decision_core::types::Platform;

    use crate::types::DailyMetrics;

    fn campaign(id: &str, budget: f64, roas: f64) -> CampaignPerformance {
        CampaignPerformance::new(id, Platform::Meta, budget, budget, budget * roas)
    }

    #[test]
    fn test_single_campaign_keeps_total() {
        let alloc = BudgetAllocator::default()
            .optimize(&[campaign("only", 100.0, 3.0)], 100.0)
            .unwrap();
        assert_eq!(alloc.len(), 1);
        assert!((alloc[0].recommended_budget - 100.0).abs() < 1.0);
        assert!((alloc[0].expected_roas - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_shifts_toward_higher_roas() {
        let campaigns = [campaign("strong", 100.0, 4.0), campaign("weak", 100.0, 1.0)];
        let outcome = BudgetAllocator::default()
            .optimize_detailed(&campaigns, 200.0)
            .unwrap();
        let strong = &outcome.allocations[0];
        let weak = &outcome.allocations[1];
        assert!(strong.recommended_budget > 100.0);
        assert!(weak.recommended_budget < 100.0);
        let total: f64 = outcome.allocations.iter().map(|a| a.recommended_budget).sum();
        assert!((total - 200.0).abs() < 1.0);
        assert!(strong.reasoning.starts_with("Increase"));
    }

    #[test]
    fn test_respects_explicit_bounds() {
        let campaigns = [
            campaign("strong", 100.0, 4.0).with_bounds(None, Some(120.0)),
            campaign("weak", 100.0, 1.0).with_bounds(Some(80.0), None),
        ];
        let alloc = BudgetAllocator::default().optimize(&campaigns, 200.0).unwrap();
        assert!(alloc[0].recommended_budget <= 120.0 + 1e-6);
        assert!(alloc[1].recommended_budget >= 80.0 - 1e-6);
        let total: f64 = alloc.iter().map(|a| a.recommended_budget).sum();
        assert!((total - 200.0).abs() < 1.0);
    }

    #[test]
    fn test_infeasible_minimums() {
        let campaigns = [
            campaign("a", 100.0, 2.0).with_bounds(Some(80.0), None),
            campaign("b", 100.0, 2.0).with_bounds(Some(80.0), None),
        ];
        let err = BudgetAllocator::default().optimize(&campaigns, 100.0).unwrap_err();
        assert!(matches!(err, DecisionError::InfeasibleConstraint(_)));
    }

    #[test]
    fn test_negative_total_is_validation() {
        let err = BudgetAllocator::default()
            .optimize(&[campaign("a", 10.0, 2.0)], -1.0)
            .unwrap_err();
        assert!(matches!(err, DecisionError::Validation(_)));
    }

    #[test]
    fn test_negative_revenue_is_validation() {
        let bad = CampaignPerformance::new("a", Platform::Meta, 10.0, 10.0, -3.0);
        let err = BudgetAllocator::default().optimize(&[bad], 10.0).unwrap_err();
        assert!(matches!(err, DecisionError::Validation(_)));
    }

    #[test]
    fn test_zero_budget_campaign_seeded_from_history() {
        let history: Vec<DailyMetrics> = (1..=10)
            .map(|d| DailyMetrics {
                date: NaiveDate::from_ymd_opt(2024, 9, d).unwrap(),
                impressions: 100,
                clicks: 10,
                conversions: 1,
                spend: 10.0,
                revenue: 50.0,
            })
            .collect();
        let paused = CampaignPerformance::from_history("paused", Platform::Tiktok, 0.0, history);
        let campaigns = [campaign("running", 100.0, 1.0), paused];
        let alloc = BudgetAllocator::default().optimize(&campaigns, 100.0).unwrap();
        assert!(alloc[1].recommended_budget > 0.0);
    }

    #[test]
    fn test_non_convergence_reduces_confidence() {
        let cfg = BudgetConfig {
            max_iterations: 1,
            ..BudgetConfig::default()
        };
        let campaigns = [campaign("strong", 100.0, 4.0), campaign("weak", 100.0, 1.0)];
        let capped = BudgetAllocator::new(cfg).optimize_detailed(&campaigns, 200.0).unwrap();
        let full = BudgetAllocator::default().optimize_detailed(&campaigns, 200.0).unwrap();
        assert!(!capped.converged);
        assert!(full.converged);
        assert!(capped.allocations[0].confidence < full.allocations[0].confidence);
    }

    #[test]
    fn test_confidence_grows_with_history() {
        let allocator = BudgetAllocator::default();
        let days = |n: u32| -> Vec<DailyMetrics> {
            (1..=n)
                .map(|d| DailyMetrics {
                    date: NaiveDate::from_ymd_opt(2024, 8, d).unwrap(),
                    impressions: 100,
                    clicks: 10,
                    conversions: 1,
                    spend: 10.0,
                    revenue: 30.0,
                })
                .collect()
        };
        let short = CampaignPerformance::from_history("s", Platform::Meta, 10.0, days(3));
        let long = CampaignPerformance::from_history("l", Platform::Meta, 10.0, days(30));
        assert!(allocator.confidence(&long) > allocator.confidence(&short));
        assert!(allocator.confidence(&long) <= 1.0);
    }

    #[test]
    fn test_projection_hits_total() {
        let mut budgets = vec![50.0, 10.0, 0.0];
        let bounds = [(0.0, 60.0), (5.0, 100.0), (0.0, 100.0)];
        project(&mut budgets, &bounds, 120.0);
        let sum: f64 = budgets.iter().sum();
        assert!((sum - 120.0).abs() < 1e-6);
        assert!(budgets[0] <= 60.0);
    }
}
