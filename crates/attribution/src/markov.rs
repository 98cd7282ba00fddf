//! Markov chain attribution.
//!
//! Training turns journeys into state paths `start -> platform... ->
//! conversion|null`, counts transitions and normalizes them per source
//! state. Scoring measures, for every platform in a journey, how much the
//! probability of reaching `conversion` from `start` drops when that platform
//! is removed from the graph (its removal effect).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use decision_core::config::MarkovConfig;
use decision_core::types::Platform;
use decision_core::{DecisionError, DecisionResult};
use decision_journey::CustomerJourney;

use crate::model::{
    build_result, ensure_scorable, AttributionModel, AttributionResult, ModelType,
};

pub const START: &str = "start";
pub const CONVERSION: &str = "conversion";
pub const NULL: &str = "null";

/// Current blob layout written by [`MarkovModelState::to_blob`].
pub const BLOB_FORMAT_VERSION: u32 = 1;

type TransitionCounts = BTreeMap<String, BTreeMap<String, u64>>;
type TransitionProbabilities = BTreeMap<String, BTreeMap<String, f64>>;

/// A trained (or empty) transition graph. Never mutated after publication;
/// retraining produces a new value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkovModelState {
    pub transition_counts: TransitionCounts,
    pub transition_probabilities: TransitionProbabilities,
    pub is_trained: bool,
    pub training_journey_count: usize,
    pub converted_journey_count: usize,
    pub trained_at: Option<DateTime<Utc>>,
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionPath {
    pub from_state: String,
    pub probability: f64,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MarkovMetadata {
    is_trained: bool,
    training_journey_count: usize,
    converted_journey_count: usize,
    trained_at: Option<DateTime<Utc>>,
    version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MarkovBlob {
    format_version: u32,
    transition_counts: TransitionCounts,
    transition_probabilities: TransitionProbabilities,
    metadata: MarkovMetadata,
}

impl MarkovModelState {
    pub fn untrained() -> Self {
        Self::default()
    }

    /// Every state appearing as a source or destination.
    pub fn states(&self) -> BTreeSet<&str> {
        let mut states = BTreeSet::new();
        for (from, row) in &self.transition_probabilities {
            states.insert(from.as_str());
            states.extend(row.keys().map(String::as_str));
        }
        states
    }

    pub fn transition_count(&self) -> usize {
        self.transition_probabilities.values().map(|r| r.len()).sum()
    }

    pub fn probability(&self, from: &str, to: &str) -> f64 {
        self.transition_probabilities
            .get(from)
            .and_then(|row| row.get(to))
            .copied()
            .unwrap_or(0.0)
    }

    /// Transitions into `conversion`, most likely first.
    pub fn top_conversion_paths(&self, n: usize) -> Vec<ConversionPath> {
        let mut paths: Vec<ConversionPath> = self
            .transition_probabilities
            .iter()
            .filter_map(|(from, row)| {
                row.get(CONVERSION).map(|p| ConversionPath {
                    from_state: from.clone(),
                    probability: *p,
                    count: self
                        .transition_counts
                        .get(from)
                        .and_then(|r| r.get(CONVERSION))
                        .copied()
                        .unwrap_or(0),
                })
            })
            .collect();
        paths.sort_by(|a, b| {
            b.probability
                .total_cmp(&a.probability)
                .then_with(|| a.from_state.cmp(&b.from_state))
        });
        paths.truncate(n);
        paths
    }

    /// Probability of absorbing in `conversion` from `start`, optionally with
    /// one platform removed (every transition into it rerouted to `null`).
    pub fn conversion_probability(
        &self,
        removed: Option<Platform>,
        max_iterations: usize,
        tolerance: f64,
    ) -> f64 {
        let transient: Vec<&str> = self
            .states()
            .into_iter()
            .filter(|s| *s != CONVERSION && *s != NULL)
            .collect();
        let Some(start) = transient.iter().position(|s| *s == START) else {
            return 0.0;
        };
        let index: HashMap<&str, usize> =
            transient.iter().enumerate().map(|(i, s)| (*s, i)).collect();
        let removed_idx = removed.and_then(|p| index.get(p.as_str()).copied());

        let m = transient.len();
        let mut q = Array2::<f64>::zeros((m, m));
        let mut r = Array1::<f64>::zeros(m);
        for (i, from) in transient.iter().enumerate() {
            if Some(i) == removed_idx {
                continue;
            }
            let Some(row) = self.transition_probabilities.get(*from) else {
                continue;
            };
            for (to, p) in row {
                if to == CONVERSION {
                    r[i] += p;
                } else if let Some(&j) = index.get(to.as_str()) {
                    if Some(j) != removed_idx {
                        q[[i, j]] += p;
                    }
                }
            }
        }

        let mut p = Array1::<f64>::zeros(m);
        for _ in 0..max_iterations {
            let next = q.dot(&p) + &r;
            let delta = next
                .iter()
                .zip(p.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max);
            p = next;
            if delta < tolerance {
                break;
            }
        }
        p[start].clamp(0.0, 1.0)
    }

    pub fn to_blob(&self) -> DecisionResult<String> {
        let blob = MarkovBlob {
            format_version: BLOB_FORMAT_VERSION,
            transition_counts: self.transition_counts.clone(),
            transition_probabilities: self.transition_probabilities.clone(),
            metadata: MarkovMetadata {
                is_trained: self.is_trained,
                training_journey_count: self.training_journey_count,
                converted_journey_count: self.converted_journey_count,
                trained_at: self.trained_at,
                version: self.version,
            },
        };
        Ok(serde_json::to_string_pretty(&blob)?)
    }

    pub fn from_blob(data: &str) -> DecisionResult<Self> {
        let raw: serde_json::Value = serde_json::from_str(data)?;
        let format = raw
            .get("format_version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| DecisionError::Validation("model blob has no format_version".into()))?;
        if format != BLOB_FORMAT_VERSION as u64 {
            return Err(DecisionError::Validation(format!(
                "unsupported model blob format_version {} (expected {})",
                format, BLOB_FORMAT_VERSION
            )));
        }
        let blob: MarkovBlob = serde_json::from_value(raw)?;
        Ok(Self {
            transition_counts: blob.transition_counts,
            transition_probabilities: blob.transition_probabilities,
            is_trained: blob.metadata.is_trained,
            training_journey_count: blob.metadata.training_journey_count,
            converted_journey_count: blob.metadata.converted_journey_count,
            trained_at: blob.metadata.trained_at,
            version: blob.metadata.version,
        })
    }
}

// ─── Training ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct MarkovTrainer {
    cfg: MarkovConfig,
}

impl MarkovTrainer {
    pub fn new(cfg: MarkovConfig) -> Self {
        Self { cfg }
    }

    /// Builds a new state from `journeys`. On failure nothing changes: the
    /// caller keeps publishing `prior`.
    pub fn train(
        &self,
        journeys: &[CustomerJourney],
        prior: &MarkovModelState,
    ) -> DecisionResult<MarkovModelState> {
        let usable: Vec<&CustomerJourney> = journeys
            .iter()
            .filter(|j| match j.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!(journey_id = %j.journey_id, error = %e, "Skipping journey in training");
                    false
                }
            })
            .collect();

        let converted = usable.iter().filter(|j| j.converted).count();
        if converted < self.cfg.min_converted_journeys {
            return Err(DecisionError::InsufficientData(format!(
                "{} converted journeys, at least {} required to train",
                converted, self.cfg.min_converted_journeys
            )));
        }

        let mut counts: TransitionCounts = BTreeMap::new();
        let mut bump = |from: &str, to: &str| {
            *counts
                .entry(from.to_string())
                .or_default()
                .entry(to.to_string())
                .or_default() += 1;
        };
        for journey in &usable {
            let mut previous = START;
            for tp in &journey.touchpoints {
                bump(previous, tp.platform.as_str());
                previous = tp.platform.as_str();
            }
            bump(previous, if journey.converted { CONVERSION } else { NULL });
        }

        let probabilities: TransitionProbabilities = counts
            .iter()
            .map(|(from, row)| {
                let total: u64 = row.values().sum();
                let normalized = row
                    .iter()
                    .map(|(to, c)| (to.clone(), *c as f64 / total as f64))
                    .collect();
                (from.clone(), normalized)
            })
            .collect();

        let state = MarkovModelState {
            transition_counts: counts,
            transition_probabilities: probabilities,
            is_trained: true,
            training_journey_count: usable.len(),
            converted_journey_count: converted,
            trained_at: Some(Utc::now()),
            version: prior.version + 1,
        };
        info!(
            journeys = state.training_journey_count,
            converted = state.converted_journey_count,
            states = state.states().len(),
            version = state.version,
            "Markov model trained"
        );
        Ok(state)
    }
}

// ─── Scoring ────────────────────────────────────────────────────────────

/// Scores journeys against one immutable model snapshot.
#[derive(Debug, Clone)]
pub struct MarkovAttribution {
    state: Arc<MarkovModelState>,
    cfg: MarkovConfig,
}

impl MarkovAttribution {
    pub fn new(state: Arc<MarkovModelState>, cfg: MarkovConfig) -> Self {
        Self { state, cfg }
    }

    pub fn state(&self) -> &MarkovModelState {
        &self.state
    }

    /// Removal effect per platform, clamped at zero.
    pub fn removal_effects(&self, platforms: &[Platform]) -> BTreeMap<Platform, f64> {
        let base = self.state.conversion_probability(
            None,
            self.cfg.max_iterations,
            self.cfg.tolerance,
        );
        platforms
            .iter()
            .map(|p| {
                let effect = if base > 0.0 {
                    let removed = self.state.conversion_probability(
                        Some(*p),
                        self.cfg.max_iterations,
                        self.cfg.tolerance,
                    );
                    ((base - removed) / base).max(0.0)
                } else {
                    0.0
                };
                (*p, effect)
            })
            .collect()
    }

    fn confidence(&self) -> f64 {
        let coverage = (self.state.training_journey_count as f64 / 500.0).min(1.0);
        0.5 + 0.4 * coverage
    }

    fn even_split(&self, journey: &CustomerJourney, insight: &str) -> AttributionResult {
        let n = journey.touchpoints.len();
        build_result(
            journey,
            ModelType::Markov,
            &vec![1.0 / n as f64; n],
            0.3,
            vec![insight.to_string()],
        )
    }

    fn insights(&self, journey: &CustomerJourney, effects: &BTreeMap<Platform, f64>) -> Vec<String> {
        let mut insights = Vec::new();
        if let Some((platform, effect)) = effects
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .filter(|(_, e)| **e > 0.0)
        {
            insights.push(format!(
                "{} was most critical: conversion probability drops {:.1}% without it",
                platform.display_name(),
                effect * 100.0
            ));
        }
        let raw_total: f64 = effects.values().sum();
        if effects.len() > 1 && raw_total > 1.0 {
            insights.push("Strong channel synergy: channels convert better together".to_string());
        }
        if journey.touchpoints.len() >= 3 {
            let first = journey.touchpoints[0].platform;
            let last = journey.touchpoints[journey.touchpoints.len() - 1].platform;
            if first != last {
                insights.push(format!("Successful cross-channel path: {} → ... → {}", first, last));
            }
        }
        insights
    }
}

impl AttributionModel for MarkovAttribution {
    fn model_type(&self) -> ModelType {
        ModelType::Markov
    }

    fn attribute(&self, journey: &CustomerJourney) -> DecisionResult<AttributionResult> {
        ensure_scorable(journey)?;

        if !self.state.is_trained {
            return Ok(self.even_split(
                journey,
                "Markov model not trained yet; using linear attribution",
            ));
        }

        let platforms = journey.platforms();
        let effects = self.removal_effects(&platforms);
        let total: f64 = effects.values().sum();
        if total <= 0.0 {
            debug!(journey_id = %journey.journey_id, "Zero removal effect; splitting evenly");
            return Ok(self.even_split(
                journey,
                "No path to conversion in the trained graph; using linear attribution",
            ));
        }

        // Platform credit is shared evenly by that platform's touchpoints.
        let touch_credits: Vec<f64> = journey
            .touchpoints
            .iter()
            .map(|tp| {
                let share = effects.get(&tp.platform).copied().unwrap_or(0.0) / total;
                share / journey.touchpoints_for(tp.platform).len() as f64
            })
            .collect();

        let insights = self.insights(journey, &effects);
        Ok(build_result(
            journey,
            ModelType::Markov,
            &touch_credits,
            self.confidence(),
            insights,
        ))
    }
}
