use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use decision_attribution::{
    AttributionModel, MarkovAttribution, MarkovModelState, MarkovTrainer, ShapleyAttribution,
};
use decision_core::config::MarkovConfig;
use decision_core::types::{ConversionType, Platform, TouchpointType};
use decision_journey::{ConversionEvent, CustomerJourney, TouchpointEvent};
use proptest::prelude::*;

const PAID: [Platform; 6] = [
    Platform::Meta,
    Platform::GoogleSearch,
    Platform::GoogleDisplay,
    Platform::Tiktok,
    Platform::Linkedin,
    Platform::Email,
];

fn build(user: &str, platforms: &[usize], revenue: Option<f64>) -> CustomerJourney {
    let t0 = Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap();
    let tps = platforms
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let platform = PAID[*p % PAID.len()];
            TouchpointEvent::new(
                user,
                platform,
                TouchpointType::Click,
                format!("{}-camp", platform.as_str()),
                t0 + Duration::hours(i as i64),
            )
        })
        .collect();
    let conv = revenue.map(|r| {
        ConversionEvent::new(
            user,
            ConversionType::Purchase,
            r,
            t0 + Duration::hours(platforms.len() as i64 + 1),
        )
    });
    CustomerJourney::new(user, tps, conv).unwrap()
}

fn trained_markov() -> MarkovAttribution {
    let mut journeys = Vec::new();
    for i in 0..30 {
        let path: Vec<usize> = (0..(i % 4 + 1)).map(|k| (i + k) % PAID.len()).collect();
        journeys.push(build(&format!("t{}", i), &path, (i % 3 != 0).then_some(50.0)));
    }
    let state = MarkovTrainer::new(MarkovConfig::default())
        .train(&journeys, &MarkovModelState::untrained())
        .unwrap();
    MarkovAttribution::new(Arc::new(state), MarkovConfig::default())
}

proptest! {
    #[test]
    fn shapley_conserves_credit_and_revenue(
        path in prop::collection::vec(0usize..6, 1..14),
        revenue in 0.0f64..10_000.0,
    ) {
        let journey = build("u", &path, Some(revenue));
        let result = ShapleyAttribution::default().attribute(&journey).unwrap();

        let credit: f64 = result.platform_attribution.iter().map(|p| p.credit).sum();
        prop_assert!((credit - 1.0).abs() < 1e-2, "credit {}", credit);
        let attributed: f64 = result.platform_attribution.iter().map(|p| p.revenue_attributed).sum();
        prop_assert!((attributed - revenue).abs() < 0.01, "{} vs {}", attributed, revenue);
        prop_assert!(result.platform_attribution.iter().all(|p| p.credit >= 0.0));

        let touches: usize = result.platform_attribution.iter().map(|p| p.touchpoint_count).sum();
        prop_assert_eq!(touches, path.len());
        prop_assert!(result.confidence_score >= 0.0 && result.confidence_score <= 1.0);
    }

    #[test]
    fn markov_conserves_credit_and_revenue(
        path in prop::collection::vec(0usize..6, 1..8),
        revenue in 0.0f64..10_000.0,
    ) {
        let journey = build("u", &path, Some(revenue));
        let result = trained_markov().attribute(&journey).unwrap();

        let credit: f64 = result.platform_attribution.iter().map(|p| p.credit).sum();
        prop_assert!((credit - 1.0).abs() < 1e-2);
        let attributed: f64 = result.platform_attribution.iter().map(|p| p.revenue_attributed).sum();
        prop_assert!((attributed - revenue).abs() < 0.01);
    }

    #[test]
    fn single_touchpoint_takes_everything(p in 0usize..6, revenue in 0.0f64..5_000.0) {
        let journey = build("u", &[p], Some(revenue));
        for model in [
            &ShapleyAttribution::default() as &dyn AttributionModel,
            &trained_markov() as &dyn AttributionModel,
        ] {
            let result = model.attribute(&journey).unwrap();
            prop_assert_eq!(result.platform_attribution.len(), 1);
            prop_assert!((result.platform_attribution[0].credit - 1.0).abs() < 1e-9);
            prop_assert!((result.platform_attribution[0].revenue_attributed - revenue).abs() < 0.01);
        }
    }

    #[test]
    fn shapley_symmetric_middle_touchpoints(a in 0usize..6, b in 0usize..6, revenue in 1.0f64..1_000.0) {
        // Two middle touchpoints on distinct platforms that differ only by
        // label are interchangeable players.
        prop_assume!(a % 6 != b % 6);
        let endpoints = (0..6).find(|x| *x != a && *x != b).unwrap();
        let journey = build("u", &[endpoints, a, b, endpoints], Some(revenue));
        let result = ShapleyAttribution::default().attribute(&journey).unwrap();
        let ca = result.credit_for(PAID[a]);
        let cb = result.credit_for(PAID[b]);
        prop_assert!((ca - cb).abs() < 1e-9, "{} vs {}", ca, cb);
    }

    #[test]
    fn shapley_identical_touchpoints_share_equally(
        first in 0usize..6,
        twin in 0usize..6,
        last in 0usize..6,
        revenue in 1.0f64..1_000.0,
    ) {
        let journey = twin_journey(PAID[first], PAID[twin], PAID[last], revenue);
        let result = ShapleyAttribution::default().attribute(&journey).unwrap();
        let credit_of = |campaign: &str| {
            result
                .campaign_attribution
                .iter()
                .find(|c| c.campaign_id == campaign)
                .map(|c| c.credit)
                .unwrap()
        };
        let (ca, cb) = (credit_of("twin-a"), credit_of("twin-b"));
        prop_assert!(ca > 0.0);
        prop_assert!((ca - cb).abs() < 1e-9, "{} vs {}", ca, cb);
    }
}

/// Journey whose two middle touchpoints share platform and timestamp and
/// differ only by campaign.
fn twin_journey(first: Platform, twin: Platform, last: Platform, revenue: f64) -> CustomerJourney {
    let t0 = Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap();
    let tps = vec![
        TouchpointEvent::new("u", first, TouchpointType::Click, "opener", t0),
        TouchpointEvent::new("u", twin, TouchpointType::Click, "twin-a", t0 + Duration::hours(1)),
        TouchpointEvent::new("u", twin, TouchpointType::Click, "twin-b", t0 + Duration::hours(1)),
        TouchpointEvent::new("u", last, TouchpointType::Click, "closer", t0 + Duration::hours(2)),
    ];
    let conv = ConversionEvent::new("u", ConversionType::Purchase, revenue, t0 + Duration::hours(3));
    CustomerJourney::new("u", tps, Some(conv)).unwrap()
}

#[test]
fn same_platform_same_time_touchpoints_get_identical_credit() {
    let journey = twin_journey(Platform::Meta, Platform::Email, Platform::GoogleSearch, 200.0);
    let result = ShapleyAttribution::default().attribute(&journey).unwrap();
    let twins: Vec<f64> = result
        .campaign_attribution
        .iter()
        .filter(|c| c.campaign_id.starts_with("twin-"))
        .map(|c| c.credit)
        .collect();
    assert_eq!(twins.len(), 2);
    assert!((twins[0] - twins[1]).abs() < 1e-9);
}

#[test]
fn two_platform_purchase_splits_evenly() {
    let journey = build("scenario-a", &[0, 1], Some(150.0));
    let result = ShapleyAttribution::default().attribute(&journey).unwrap();
    assert!((result.credit_for(Platform::Meta) - 0.5).abs() < 1e-2);
    assert!((result.credit_for(Platform::GoogleSearch) - 0.5).abs() < 1e-2);
    for p in &result.platform_attribution {
        assert!((p.revenue_attributed - 75.0).abs() < 0.01);
    }
}

#[test]
fn training_is_idempotent() {
    let journeys: Vec<CustomerJourney> = (0..40)
        .map(|i| {
            let path: Vec<usize> = (0..(i % 3 + 1)).map(|k| (i * 7 + k) % 6).collect();
            build(&format!("u{}", i), &path, (i % 2 == 0).then_some(30.0))
        })
        .collect();
    let trainer = MarkovTrainer::new(MarkovConfig::default());
    let first = trainer.train(&journeys, &MarkovModelState::untrained()).unwrap();
    let second = trainer.train(&journeys, &MarkovModelState::untrained()).unwrap();
    assert_eq!(first.transition_counts, second.transition_counts);
    assert_eq!(first.transition_probabilities, second.transition_probabilities);
}
