use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Marketing platform a touchpoint or campaign runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Meta,
    GoogleSearch,
    GoogleDisplay,
    Linkedin,
    Tiktok,
    Pinterest,
    Twitter,
    Email,
    Organic,
    Direct,
    Referral,
    Other,
}

impl Platform {
    pub const ALL: [Platform; 12] = [
        Platform::Meta,
        Platform::GoogleSearch,
        Platform::GoogleDisplay,
        Platform::Linkedin,
        Platform::Tiktok,
        Platform::Pinterest,
        Platform::Twitter,
        Platform::Email,
        Platform::Organic,
        Platform::Direct,
        Platform::Referral,
        Platform::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Meta => "meta",
            Platform::GoogleSearch => "google_search",
            Platform::GoogleDisplay => "google_display",
            Platform::Linkedin => "linkedin",
            Platform::Tiktok => "tiktok",
            Platform::Pinterest => "pinterest",
            Platform::Twitter => "twitter",
            Platform::Email => "email",
            Platform::Organic => "organic",
            Platform::Direct => "direct",
            Platform::Referral => "referral",
            Platform::Other => "other",
        }
    }

    /// Human-facing label used in insight strings.
    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Meta => "Meta",
            Platform::GoogleSearch => "Google Search",
            Platform::GoogleDisplay => "Google Display",
            Platform::Linkedin => "LinkedIn",
            Platform::Tiktok => "TikTok",
            Platform::Pinterest => "Pinterest",
            Platform::Twitter => "Twitter",
            Platform::Email => "Email",
            Platform::Organic => "Organic",
            Platform::Direct => "Direct",
            Platform::Referral => "Referral",
            Platform::Other => "Other",
        }
    }

    /// Unpaid channels, excluded from attribution when the window says so.
    pub fn is_organic(&self) -> bool {
        matches!(self, Platform::Organic | Platform::Direct | Platform::Referral)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown platform `{}`", s))
    }
}

/// Kind of interaction recorded by a touchpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchpointType {
    Impression,
    Click,
    View,
}

impl TouchpointType {
    /// Impressions and views are passive exposures governed by the view window.
    pub fn is_passive(&self) -> bool {
        matches!(self, TouchpointType::Impression | TouchpointType::View)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionType {
    Purchase,
    Lead,
    Signup,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
    Ctv,
}

/// Ad placement surface, used by contextual bid multipliers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Feed,
    Stories,
    Search,
    Display,
    Video,
    Other,
}

/// Operational event emitted by the decision engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub event_id: Uuid,
    pub event_type: DecisionEventType,
    /// Journey, campaign or model the event is about.
    pub subject_id: String,
    pub user_id: Option<String>,
    pub detail: Option<String>,
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionEventType {
    TouchpointTracked,
    ConversionTracked,
    AttributionCompleted,
    AttributionFailed,
    MarkovTrained,
    MarkovTrainingFailed,
    BudgetOptimized,
    BidOptimized,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_string_roundtrip() {
        for p in Platform::ALL {
            assert_eq!(p.as_str().parse::<Platform>().unwrap(), p);
        }
        assert!("myspace".parse::<Platform>().is_err());
    }

    #[test]
    fn test_platform_serde_matches_as_str() {
        let json = serde_json::to_string(&Platform::GoogleSearch).unwrap();
        assert_eq!(json, "\"google_search\"");
    }
}
