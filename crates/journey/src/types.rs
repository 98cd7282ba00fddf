use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use decision_core::types::{ConversionType, DeviceType, Platform, TouchpointType};
use decision_core::{DecisionError, DecisionResult};

/// UTM parameters captured with web touchpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtmParams {
    pub source: Option<String>,
    pub medium: Option<String>,
    pub campaign: Option<String>,
    pub content: Option<String>,
    pub term: Option<String>,
}

/// A single customer interaction with a marketing channel. Immutable once
/// written to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TouchpointEvent {
    pub event_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub platform: Platform,
    pub event_type: TouchpointType,
    pub campaign_id: String,
    pub campaign_name: String,
    pub ad_set_id: Option<String>,
    #[serde(default)]
    pub utm: UtmParams,
    pub device_type: Option<DeviceType>,
    pub country: Option<String>,
    pub region: Option<String>,
}

impl TouchpointEvent {
    pub fn new(
        user_id: impl Into<String>,
        platform: Platform,
        event_type: TouchpointType,
        campaign_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let campaign_id = campaign_id.into();
        Self {
            event_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            timestamp,
            platform,
            event_type,
            campaign_name: campaign_id.clone(),
            campaign_id,
            ad_set_id: None,
            utm: UtmParams::default(),
            device_type: None,
            country: None,
            region: None,
        }
    }

    pub fn with_campaign_name(mut self, name: impl Into<String>) -> Self {
        self.campaign_name = name.into();
        self
    }

    pub fn with_ad_set(mut self, ad_set_id: impl Into<String>) -> Self {
        self.ad_set_id = Some(ad_set_id.into());
        self
    }

    pub fn with_device(mut self, device: DeviceType) -> Self {
        self.device_type = Some(device);
        self
    }
}

/// Terminal outcome of a journey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionEvent {
    pub conversion_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub conversion_type: ConversionType,
    pub revenue: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub order_id: Option<String>,
    #[serde(default = "default_attribution_window_days")]
    pub attribution_window_days: u32,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_attribution_window_days() -> u32 {
    30
}

/// Longest attribution window a conversion may declare.
pub const MAX_ATTRIBUTION_WINDOW_DAYS: u32 = 3650;

impl ConversionEvent {
    pub fn new(
        user_id: impl Into<String>,
        conversion_type: ConversionType,
        revenue: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            conversion_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            timestamp,
            conversion_type,
            revenue,
            currency: default_currency(),
            order_id: None,
            attribution_window_days: default_attribution_window_days(),
        }
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_window_days(mut self, days: u32) -> Self {
        self.attribution_window_days = days;
        self
    }

    /// Earliest timestamp a touchpoint may have to be credited.
    pub fn window_start(&self) -> DecisionResult<DateTime<Utc>> {
        self.timestamp
            .checked_sub_signed(Duration::days(self.attribution_window_days as i64))
            .ok_or_else(|| {
                DecisionError::Validation(format!(
                    "conversion {} window of {} days reaches before the representable range",
                    self.conversion_id, self.attribution_window_days
                ))
            })
    }

    pub fn validate(&self) -> DecisionResult<()> {
        if !self.revenue.is_finite() || self.revenue < 0.0 {
            return Err(DecisionError::Validation(format!(
                "conversion {} has invalid revenue {}",
                self.conversion_id, self.revenue
            )));
        }
        if self.attribution_window_days == 0 {
            return Err(DecisionError::Validation(format!(
                "conversion {} has a zero-day attribution window",
                self.conversion_id
            )));
        }
        if self.attribution_window_days > MAX_ATTRIBUTION_WINDOW_DAYS {
            return Err(DecisionError::Validation(format!(
                "conversion {} attribution window of {} days exceeds {}",
                self.conversion_id, self.attribution_window_days, MAX_ATTRIBUTION_WINDOW_DAYS
            )));
        }
        self.window_start()?;
        Ok(())
    }
}

/// Ordered touchpoints of one user within an attribution window plus at most
/// one terminal conversion. Reconstructed from the store on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerJourney {
    pub journey_id: String,
    pub user_id: String,
    pub touchpoints: Vec<TouchpointEvent>,
    pub conversion: Option<ConversionEvent>,
    pub converted: bool,
}

impl CustomerJourney {
    /// Builds a journey, sorting touchpoints chronologically and enforcing
    /// the journey invariants.
    pub fn new(
        user_id: impl Into<String>,
        mut touchpoints: Vec<TouchpointEvent>,
        conversion: Option<ConversionEvent>,
    ) -> DecisionResult<Self> {
        let user_id = user_id.into();
        if touchpoints.is_empty() {
            return Err(DecisionError::InvalidJourney(format!(
                "journey for user {} has no touchpoints",
                user_id
            )));
        }
        touchpoints.sort_by_key(|t| t.timestamp);

        let first = touchpoints[0].timestamp;
        let last = touchpoints[touchpoints.len() - 1].timestamp;
        let journey = Self {
            journey_id: journey_id_for(&user_id, first, last),
            user_id,
            converted: conversion.is_some(),
            touchpoints,
            conversion,
        };
        journey.validate()?;
        Ok(journey)
    }

    /// Checks every journey invariant. Journeys that arrive deserialized
    /// from a caller are not trusted to hold them.
    pub fn validate(&self) -> DecisionResult<()> {
        if self.touchpoints.is_empty() {
            return Err(DecisionError::InvalidJourney(format!(
                "journey {} has no touchpoints",
                self.journey_id
            )));
        }
        if self.converted != self.conversion.is_some() {
            return Err(DecisionError::InvalidJourney(format!(
                "journey {} converted flag disagrees with its conversion",
                self.journey_id
            )));
        }
        if let Some(tp) = self.touchpoints.iter().find(|t| t.user_id != self.user_id) {
            return Err(DecisionError::InvalidJourney(format!(
                "touchpoint {} belongs to user {}, not {}",
                tp.event_id, tp.user_id, self.user_id
            )));
        }
        if self
            .touchpoints
            .windows(2)
            .any(|w| w[0].timestamp > w[1].timestamp)
        {
            return Err(DecisionError::InvalidJourney(format!(
                "journey {} touchpoints are not in chronological order",
                self.journey_id
            )));
        }
        if let Some(conversion) = &self.conversion {
            conversion.validate()?;
            if conversion.user_id != self.user_id {
                return Err(DecisionError::InvalidJourney(format!(
                    "conversion {} belongs to user {}, not {}",
                    conversion.conversion_id, conversion.user_id, self.user_id
                )));
            }
            let start = conversion.window_start()?;
            if let Some(tp) = self
                .touchpoints
                .iter()
                .find(|t| t.timestamp < start || t.timestamp > conversion.timestamp)
            {
                return Err(DecisionError::InvalidJourney(format!(
                    "touchpoint {} at {} is outside the attribution window [{}, {}]",
                    tp.event_id, tp.timestamp, start, conversion.timestamp
                )));
            }
        }
        Ok(())
    }

    pub fn first_touch(&self) -> Option<DateTime<Utc>> {
        self.touchpoints.first().map(|t| t.timestamp)
    }

    pub fn last_touch(&self) -> Option<DateTime<Utc>> {
        self.touchpoints.last().map(|t| t.timestamp)
    }

    pub fn revenue(&self) -> f64 {
        self.conversion.as_ref().map(|c| c.revenue).unwrap_or(0.0)
    }

    /// Distinct platforms in order of first appearance.
    pub fn platforms(&self) -> Vec<Platform> {
        let mut seen = BTreeSet::new();
        self.touchpoints
            .iter()
            .filter(|t| seen.insert(t.platform))
            .map(|t| t.platform)
            .collect()
    }

    pub fn unique_platforms(&self) -> usize {
        self.touchpoints
            .iter()
            .map(|t| t.platform)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Fractional days from the first touch to the conversion.
    pub fn days_to_convert(&self) -> Option<f64> {
        let conversion = self.conversion.as_ref()?;
        let first = self.first_touch()?;
        Some((conversion.timestamp - first).num_seconds() as f64 / 86_400.0)
    }

    /// Platform path, e.g. `["meta", "google_search"]`.
    pub fn conversion_path(&self) -> Vec<&'static str> {
        self.touchpoints.iter().map(|t| t.platform.as_str()).collect()
    }

    pub fn unique_campaigns(&self) -> Vec<String> {
        self.touchpoints
            .iter()
            .map(|t| t.campaign_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn touchpoints_for(&self, platform: Platform) -> Vec<&TouchpointEvent> {
        self.touchpoints
            .iter()
            .filter(|t| t.platform == platform)
            .collect()
    }
}

/// Deterministic journey id: the same user and touch span always map to the
/// same id across processes.
pub fn journey_id_for(user_id: &str, first: DateTime<Utc>, last: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b"_");
    hasher.update(first.timestamp_millis().to_le_bytes());
    hasher.update(b"_");
    hasher.update(last.timestamp_millis().to_le_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..32].to_string()
}
