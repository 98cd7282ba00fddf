use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use decision_core::config::JourneyConfig;
use decision_core::{DecisionError, DecisionResult};

use crate::store::{CommitSeq, JourneyStore};
use crate::types::{ConversionEvent, CustomerJourney, TouchpointEvent};

/// Which touchpoints are eligible for credit relative to a conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributionWindow {
    pub click_window_days: u32,
    pub view_window_days: u32,
    pub include_organic: bool,
    pub min_touchpoints: usize,
}

impl Default for AttributionWindow {
    fn default() -> Self {
        Self::from(&JourneyConfig::default())
    }
}

impl From<&JourneyConfig> for AttributionWindow {
    fn from(cfg: &JourneyConfig) -> Self {
        Self {
            click_window_days: cfg.click_window_days,
            view_window_days: cfg.view_window_days,
            include_organic: cfg.include_organic,
            min_touchpoints: cfg.min_touchpoints,
        }
    }
}

impl AttributionWindow {
    /// Whether `touchpoint` may be credited for a conversion at `anchor`.
    /// Passive exposures must fall within the (shorter) view window.
    pub fn admits(&self, touchpoint: &TouchpointEvent, anchor: DateTime<Utc>) -> bool {
        if touchpoint.timestamp > anchor {
            return false;
        }
        if !self.include_organic && touchpoint.platform.is_organic() {
            return false;
        }
        let age = anchor - touchpoint.timestamp;
        let limit = if touchpoint.event_type.is_passive() {
            self.view_window_days.min(self.click_window_days)
        } else {
            self.click_window_days
        };
        age <= Duration::days(limit as i64)
    }

    fn for_conversion(&self, conversion: &ConversionEvent) -> Self {
        Self {
            click_window_days: conversion.attribution_window_days,
            view_window_days: self.view_window_days.min(conversion.attribution_window_days),
            ..self.clone()
        }
    }
}

/// Rebuilds journeys from the store under an attribution window.
#[derive(Clone)]
pub struct JourneyAssembler {
    store: Arc<dyn JourneyStore>,
    window: AttributionWindow,
}

impl std::fmt::Debug for JourneyAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JourneyAssembler")
            .field("window", &self.window)
            .finish()
    }
}

impl JourneyAssembler {
    pub fn new(store: Arc<dyn JourneyStore>, window: AttributionWindow) -> Self {
        Self { store, window }
    }

    pub fn window(&self) -> &AttributionWindow {
        &self.window
    }

    /// Journey ending in `conversion`, using only touchpoints committed at or
    /// before `as_of` when given. Touchpoints at or before the user's previous
    /// conversion belong to that conversion and are left out.
    pub async fn reconstruct(
        &self,
        conversion: &ConversionEvent,
        as_of: Option<CommitSeq>,
    ) -> DecisionResult<CustomerJourney> {
        let since = conversion.window_start()?;
        let previous = self
            .store
            .get_conversions(&conversion.user_id)
            .await?
            .into_iter()
            .filter(|c| c.conversion_id != conversion.conversion_id && c.timestamp < conversion.timestamp)
            .map(|c| c.timestamp)
            .max();
        let mut touchpoints = match as_of {
            Some(seq) => {
                self.store
                    .get_touchpoints_as_of(&conversion.user_id, since, seq)
                    .await?
            }
            None => self.store.get_touchpoints(&conversion.user_id, since).await?,
        };
        if let Some(previous) = previous {
            touchpoints.retain(|t| t.timestamp > previous);
        }

        let window = self.window.for_conversion(conversion);
        let eligible = filter_eligible(&window, touchpoints, conversion.timestamp)?;
        debug!(
            user_id = %conversion.user_id,
            touchpoints = eligible.len(),
            "Journey reconstructed"
        );
        CustomerJourney::new(conversion.user_id.clone(), eligible, Some(conversion.clone()))
    }

    /// The user's current journey: ending in their latest conversion if they
    /// have one, otherwise their open touchpoints within the click window.
    pub async fn journey_for_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> DecisionResult<CustomerJourney> {
        if let Some(conversion) = self.store.get_conversion(user_id).await? {
            return self.reconstruct(&conversion, None).await;
        }
        let since = now
            .checked_sub_signed(Duration::days(self.window.click_window_days as i64))
            .ok_or_else(|| {
                DecisionError::Validation(format!(
                    "click window of {} days reaches before the representable range",
                    self.window.click_window_days
                ))
            })?;
        let touchpoints = self.store.get_touchpoints(user_id, since).await?;
        let eligible = filter_eligible(&self.window, touchpoints, now)?;
        CustomerJourney::new(user_id.to_string(), eligible, None)
    }
}

fn filter_eligible(
    window: &AttributionWindow,
    touchpoints: Vec<TouchpointEvent>,
    anchor: DateTime<Utc>,
) -> DecisionResult<Vec<TouchpointEvent>> {
    let eligible: Vec<TouchpointEvent> = touchpoints
        .into_iter()
        .filter(|t| window.admits(t, anchor))
        .collect();
    if eligible.is_empty() || eligible.len() < window.min_touchpoints {
        return Err(DecisionError::InvalidJourney(format!(
            "{} eligible touchpoints, at least {} required",
            eligible.len(),
            window.min_touchpoints.max(1)
        )));
    }
    Ok(eligible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryJourneyStore;
    use chrono::TimeZone;
    use decision_core::types::{ConversionType, Platform, TouchpointType};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, 10, 0, 0).unwrap()
    }

    fn tp(platform: Platform, kind: TouchpointType, ts: DateTime<Utc>) -> TouchpointEvent {
        TouchpointEvent::new("u1", platform, kind, "camp", ts)
    }

    #[test]
    fn test_view_window_excludes_old_impressions() {
        let window = AttributionWindow::default();
        let anchor = at(20);
        assert!(window.admits(&tp(Platform::Meta, TouchpointType::Click, at(1)), anchor));
        assert!(!window.admits(&tp(Platform::Meta, TouchpointType::Impression, at(1)), anchor));
        assert!(window.admits(&tp(Platform::Meta, TouchpointType::View, at(15)), anchor));
        assert!(!window.admits(&tp(Platform::Meta, TouchpointType::Click, at(21)), anchor));
    }

    #[test]
    fn test_organic_exclusion() {
        let window = AttributionWindow {
            include_organic: false,
            ..AttributionWindow::default()
        };
        assert!(!window.admits(&tp(Platform::Organic, TouchpointType::Click, at(2)), at(3)));
        assert!(window.admits(&tp(Platform::Email, TouchpointType::Click, at(2)), at(3)));
    }

    #[tokio::test]
    async fn test_reconstruct_respects_commit_cutoff() {
        let store = Arc::new(InMemoryJourneyStore::new());
        store
            .append_touchpoint(tp(Platform::Meta, TouchpointType::Click, at(2)))
            .await
            .unwrap();
        let conversion = ConversionEvent::new("u1", ConversionType::Purchase, 100.0, at(5));
        let seq = store.append_conversion(conversion.clone()).await.unwrap();
        // Late-arriving touchpoint committed after the conversion.
        store
            .append_touchpoint(tp(Platform::Email, TouchpointType::Click, at(4)))
            .await
            .unwrap();

        let assembler = JourneyAssembler::new(store.clone(), AttributionWindow::default());
        let at_commit = assembler.reconstruct(&conversion, Some(seq)).await.unwrap();
        assert_eq!(at_commit.touchpoints.len(), 1);

        let latest = assembler.reconstruct(&conversion, None).await.unwrap();
        assert_eq!(latest.touchpoints.len(), 2);
    }

    #[tokio::test]
    async fn test_repeat_buyer_journeys_do_not_overlap() {
        let store = Arc::new(InMemoryJourneyStore::new());
        store
            .append_touchpoint(tp(Platform::Meta, TouchpointType::Click, at(1)))
            .await
            .unwrap();
        let first = ConversionEvent::new("u1", ConversionType::Purchase, 40.0, at(3));
        store.append_conversion(first.clone()).await.unwrap();
        store
            .append_touchpoint(tp(Platform::Email, TouchpointType::Click, at(6)))
            .await
            .unwrap();
        let second = ConversionEvent::new("u1", ConversionType::Purchase, 60.0, at(8));
        let seq = store.append_conversion(second.clone()).await.unwrap();

        let assembler = JourneyAssembler::new(store.clone(), AttributionWindow::default());
        let first_journey = assembler.reconstruct(&first, None).await.unwrap();
        assert_eq!(first_journey.conversion_path(), vec!["meta"]);

        let second_journey = assembler.reconstruct(&second, Some(seq)).await.unwrap();
        assert_eq!(second_journey.conversion_path(), vec!["email"]);

        // The store's training view sees the same split.
        let recent = store.get_recent_journeys(at(1), at(10), 1).await.unwrap();
        let from_store = recent
            .iter()
            .find(|j| j.conversion.as_ref().map(|c| &c.conversion_id) == Some(&second.conversion_id))
            .unwrap();
        assert_eq!(from_store.journey_id, second_journey.journey_id);
    }

    #[tokio::test]
    async fn test_no_eligible_touchpoints_is_invalid_journey() {
        let store = Arc::new(InMemoryJourneyStore::new());
        let conversion = ConversionEvent::new("u1", ConversionType::Purchase, 10.0, at(5));
        store.append_conversion(conversion.clone()).await.unwrap();
        let assembler = JourneyAssembler::new(store, AttributionWindow::default());
        let err = assembler.reconstruct(&conversion, None).await.unwrap_err();
        assert!(matches!(err, DecisionError::InvalidJourney(_)));
    }

    #[tokio::test]
    async fn test_journey_for_unconverted_user() {
        let store = Arc::new(InMemoryJourneyStore::new());
        store
            .append_touchpoint(tp(Platform::Tiktok, TouchpointType::Click, at(3)))
            .await
            .unwrap();
        let assembler = JourneyAssembler::new(store, AttributionWindow::default());
        let journey = assembler.journey_for_user("u1", at(10)).await.unwrap();
        assert!(!journey.converted);
        assert_eq!(journey.touchpoints.len(), 1);
    }
}
