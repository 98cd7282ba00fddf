use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use decision_core::types::{ConversionType, DeviceType, Platform, TouchpointType};
use decision_core::DecisionResult;

use crate::store::JourneyStore;
use crate::types::{ConversionEvent, TouchpointEvent};

const DEMO_PLATFORMS: [Platform; 6] = [
    Platform::Meta,
    Platform::GoogleSearch,
    Platform::GoogleDisplay,
    Platform::Tiktok,
    Platform::Linkedin,
    Platform::Email,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub users: usize,
    pub touchpoints: usize,
    pub conversions: usize,
}

/// Writes `users` synthetic journeys ending before `now`. The same `seed`
/// always produces the same data.
pub async fn seed_demo_journeys(
    store: &dyn JourneyStore,
    users: usize,
    seed: u64,
    now: DateTime<Utc>,
) -> DecisionResult<SeedSummary> {
    info!(users, seed, "Seeding demo journeys");
    let mut rng = StdRng::seed_from_u64(seed);
    let mut summary = SeedSummary::default();

    for i in 0..users {
        let user_id = format!("demo-user-{:05}", i);
        let touches = rng.gen_range(1..=6);
        let start = now - Duration::hours(rng.gen_range(48..24 * 25));
        let mut ts = start;

        for _ in 0..touches {
            let platform = DEMO_PLATFORMS[rng.gen_range(0..DEMO_PLATFORMS.len())];
            let event_type = if rng.gen_bool(0.7) {
                TouchpointType::Click
            } else {
                TouchpointType::Impression
            };
            let device = if rng.gen_bool(0.6) {
                DeviceType::Mobile
            } else {
                DeviceType::Desktop
            };
            let campaign = format!("{}-campaign-{}", platform.as_str(), rng.gen_range(1..=3));
            let touchpoint = TouchpointEvent::new(user_id.clone(), platform, event_type, campaign, ts)
                .with_device(device);
            store.append_touchpoint(touchpoint).await?;
            summary.touchpoints += 1;
            ts += Duration::minutes(rng.gen_range(30..60 * 36));
        }

        // Longer multi-channel journeys convert more often.
        let p_convert = (0.2 + 0.08 * touches as f64).min(0.8);
        if rng.gen_bool(p_convert) && ts < now {
            let revenue = (rng.gen_range(20.0..300.0_f64) * 100.0).round() / 100.0;
            let conversion = ConversionEvent::new(user_id.clone(), ConversionType::Purchase, revenue, ts)
                .with_order_id(format!("order-{:05}", i));
            store.append_conversion(conversion).await?;
            summary.conversions += 1;
        }
        summary.users += 1;
    }

    info!(
        users = summary.users,
        touchpoints = summary.touchpoints,
        conversions = summary.conversions,
        "Demo journeys seeded"
    );
    Ok(summary)
}
