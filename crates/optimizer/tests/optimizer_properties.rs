use chrono::Utc;
use decision_core::types::Platform;
use decision_optimizer::{
    BidContext, BidOptimizer, BudgetAllocator, CampaignPerformance, PerformanceSnapshot,
};
use proptest::prelude::*;

fn campaign(id: usize, budget: f64, roas: f64) -> CampaignPerformance {
    CampaignPerformance::new(format!("c{}", id), Platform::Meta, budget, budget, budget * roas)
}

fn campaigns_strategy() -> impl Strategy<Value = Vec<(f64, f64, Option<f64>, Option<f64>)>> {
    prop::collection::vec(
        (
            0.0f64..500.0,
            0.0f64..8.0,
            prop::option::of(0.0f64..50.0),
            prop::option::of(50.0f64..400.0),
        ),
        1..8,
    )
}

proptest! {
    #[test]
    fn budget_sums_to_total_and_respects_bounds(
        specs in campaigns_strategy(),
        extra in 0.0f64..2_000.0,
    ) {
        let campaigns: Vec<CampaignPerformance> = specs
            .iter()
            .enumerate()
            .map(|(i, (budget, roas, min, max))| campaign(i, *budget, *roas).with_bounds(*min, *max))
            .collect();
        let min_sum: f64 = campaigns.iter().map(|c| c.min_budget.unwrap_or(0.0)).sum();
        let total = min_sum + extra;
        let allocator = BudgetAllocator::default();

        match allocator.optimize(&campaigns, total) {
            Ok(allocations) => {
                let sum: f64 = allocations.iter().map(|a| a.recommended_budget).sum();
                prop_assert!((sum - total).abs() <= 1.0, "sum {} vs total {}", sum, total);
                for (a, c) in allocations.iter().zip(&campaigns) {
                    let (lo, hi) = allocator.bounds(c, total);
                    prop_assert!(a.recommended_budget >= lo - 1e-6);
                    prop_assert!(a.recommended_budget <= hi + 1e-6);
                    prop_assert!(a.confidence >= 0.0 && a.confidence <= 1.0);
                }
            }
            Err(e) => {
                // Only possible when every campaign is capped below the total.
                let max_sum: f64 = campaigns.iter().map(|c| allocator.bounds(c, total).1).sum();
                prop_assert!(max_sum < total, "unexpected error {}", e);
            }
        }
    }

    #[test]
    fn bid_stays_within_bounds(
        current in 0.5f64..40.0,
        aov in 1.0f64..500.0,
        cvr in 0.0f64..0.3,
        clicks in 0u64..5_000,
        roas in 0.0f64..10.0,
    ) {
        let optimizer = BidOptimizer::default();
        let cfg = optimizer.config().clone();
        let mut ctx = BidContext::new("camp", "adset", Platform::GoogleSearch);
        ctx.historical_cvr = Some(cvr);
        let snapshot = PerformanceSnapshot {
            campaign_id: "camp".into(),
            platform: Platform::GoogleSearch,
            impressions: clicks * 10,
            clicks,
            conversions: (clicks as f64 * cvr) as u64,
            spend: 100.0,
            revenue: 100.0 * roas,
            start_time: Utc::now(),
            end_time: Utc::now(),
        };

        let rec = optimizer.optimize_bid(&ctx, current, aov, Some(&snapshot)).unwrap();
        let lower = cfg.min_bid.max(current * (1.0 - cfg.max_change_pct));
        let upper = cfg.max_bid.min(current * (1.0 + cfg.max_change_pct));
        prop_assert!(rec.recommended_bid >= lower - 1e-9);
        prop_assert!(rec.recommended_bid <= upper + 1e-9);
        prop_assert!(rec.confidence >= 0.0 && rec.confidence <= 1.0);
    }
}

#[test]
fn single_campaign_without_headroom_keeps_budget() {
    let allocations = BudgetAllocator::default()
        .optimize(&[campaign(0, 100.0, 3.0)], 100.0)
        .unwrap();
    assert!((allocations[0].recommended_budget - 100.0).abs() < 1.0);
}

#[test]
fn budget_moves_toward_higher_roas_campaign() {
    let campaigns = [campaign(0, 100.0, 4.0), campaign(1, 100.0, 1.0)];
    let allocations = BudgetAllocator::default().optimize(&campaigns, 200.0).unwrap();
    assert!(allocations[0].recommended_budget > 100.0);
    assert!(allocations[1].recommended_budget < 100.0);
}

#[test]
fn bid_on_target_roas_equals_base_bid() {
    let mut ctx = BidContext::new("camp", "adset", Platform::Meta);
    ctx.historical_cvr = Some(0.03);
    let snapshot = PerformanceSnapshot {
        campaign_id: "camp".into(),
        platform: Platform::Meta,
        impressions: 20_000,
        clicks: 1_000,
        conversions: 30,
        spend: 150.0,
        revenue: 300.0,
        start_time: Utc::now(),
        end_time: Utc::now(),
    };
    let rec = BidOptimizer::default()
        .optimize_bid(&ctx, 1.5, 100.0, Some(&snapshot))
        .unwrap();
    // cvr 0.03, aov 100, target 2.0 => 1.5
    assert!((rec.base_bid - 1.5).abs() < 1e-9);
    assert!((rec.recommended_bid - rec.base_bid).abs() < 1e-9);
}
