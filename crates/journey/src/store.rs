use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};

use decision_core::{DecisionError, DecisionResult};

use crate::types::{ConversionEvent, CustomerJourney, TouchpointEvent};

/// Monotonic position of a record in the store's commit order.
pub type CommitSeq = u64;

/// Persistence boundary for touchpoints and conversions.
#[async_trait]
pub trait JourneyStore: Send + Sync {
    async fn append_touchpoint(&self, touchpoint: TouchpointEvent) -> DecisionResult<CommitSeq>;

    async fn append_conversion(&self, conversion: ConversionEvent) -> DecisionResult<CommitSeq>;

    /// Touchpoints of `user_id` with `timestamp >= since`, chronological.
    async fn get_touchpoints(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> DecisionResult<Vec<TouchpointEvent>>;

    /// Like [`JourneyStore::get_touchpoints`], restricted to records committed
    /// at or before `as_of`.
    async fn get_touchpoints_as_of(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        as_of: CommitSeq,
    ) -> DecisionResult<Vec<TouchpointEvent>>;

    /// Most recent conversion of `user_id`, if any.
    async fn get_conversion(&self, user_id: &str) -> DecisionResult<Option<ConversionEvent>>;

    /// Every conversion of `user_id`, chronological.
    async fn get_conversions(&self, user_id: &str) -> DecisionResult<Vec<ConversionEvent>>;

    /// Journeys with activity in `[start, end]`: one converted journey per
    /// conversion in the range and one unconverted journey for touchpoints
    /// after the user's last conversion. Journeys shorter than
    /// `min_touchpoints` are skipped.
    async fn get_recent_journeys(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        min_touchpoints: usize,
    ) -> DecisionResult<Vec<CustomerJourney>>;

    async fn user_ids(&self) -> DecisionResult<Vec<String>>;
}

#[derive(Debug, Default)]
struct UserLog {
    touchpoints: Vec<(CommitSeq, TouchpointEvent)>,
    conversions: Vec<(CommitSeq, ConversionEvent)>,
}

/// Process-local store keyed by user id. Each user's log is guarded by its
/// map shard, so a commit sequence is assigned and the record appended
/// atomically with respect to readers of that user.
#[derive(Clone, Default)]
pub struct InMemoryJourneyStore {
    users: Arc<DashMap<String, UserLog>>,
    seq: Arc<AtomicU64>,
}

impl std::fmt::Debug for InMemoryJourneyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryJourneyStore")
            .field("users", &self.users.len())
            .field("seq", &self.seq.load(Ordering::Relaxed))
            .finish()
    }
}

impl InMemoryJourneyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn touchpoint_count(&self) -> usize {
        self.users.iter().map(|u| u.touchpoints.len()).sum()
    }

    pub fn conversion_count(&self) -> usize {
        self.users.iter().map(|u| u.conversions.len()).sum()
    }

    fn next_seq(&self) -> CommitSeq {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn journeys_for_user(
        user_id: &str,
        log: &UserLog,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        min_touchpoints: usize,
    ) -> Vec<CustomerJourney> {
        let mut conversions: Vec<&ConversionEvent> =
            log.conversions.iter().map(|(_, c)| c).collect();
        conversions.sort_by_key(|c| c.timestamp);

        let mut journeys = Vec::new();
        let mut previous: Option<DateTime<Utc>> = None;

        for conversion in &conversions {
            let window_start = match conversion.window_start() {
                Ok(ts) => ts,
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Skipping conversion with unusable window");
                    previous = Some(conversion.timestamp);
                    continue;
                }
            };
            let in_range = conversion.timestamp >= start && conversion.timestamp <= end;
            if in_range {
                let touchpoints: Vec<TouchpointEvent> = log
                    .touchpoints
                    .iter()
                    .map(|(_, t)| t)
                    .filter(|t| t.timestamp >= window_start && t.timestamp <= conversion.timestamp)
                    .filter(|t| previous.map_or(true, |p| t.timestamp > p))
                    .cloned()
                    .collect();
                if !touchpoints.is_empty() && touchpoints.len() >= min_touchpoints {
                    match CustomerJourney::new(user_id, touchpoints, Some((*conversion).clone())) {
                        Ok(journey) => journeys.push(journey),
                        Err(e) => warn!(user_id = %user_id, error = %e, "Skipping malformed journey"),
                    }
                }
            }
            previous = Some(conversion.timestamp);
        }

        let tail: Vec<TouchpointEvent> = log
            .touchpoints
            .iter()
            .map(|(_, t)| t)
            .filter(|t| previous.map_or(true, |p| t.timestamp > p))
            .filter(|t| t.timestamp >= start && t.timestamp <= end)
            .cloned()
            .collect();
        if !tail.is_empty() && tail.len() >= min_touchpoints {
            match CustomerJourney::new(user_id, tail, None) {
                Ok(journey) => journeys.push(journey),
                Err(e) => warn!(user_id = %user_id, error = %e, "Skipping malformed journey"),
            }
        }

        journeys
    }
}

#[async_trait]
impl JourneyStore for InMemoryJourneyStore {
    async fn append_touchpoint(&self, touchpoint: TouchpointEvent) -> DecisionResult<CommitSeq> {
        if touchpoint.user_id.is_empty() {
            return Err(DecisionError::Validation(
                "touchpoint has an empty user_id".to_string(),
            ));
        }
        let mut log = self.users.entry(touchpoint.user_id.clone()).or_default();
        let seq = self.next_seq();
        debug!(user_id = %touchpoint.user_id, seq, platform = %touchpoint.platform, "Touchpoint committed");
        log.touchpoints.push((seq, touchpoint));
        Ok(seq)
    }

    async fn append_conversion(&self, conversion: ConversionEvent) -> DecisionResult<CommitSeq> {
        if conversion.user_id.is_empty() {
            return Err(DecisionError::Validation(
                "conversion has an empty user_id".to_string(),
            ));
        }
        conversion.validate()?;
        let mut log = self.users.entry(conversion.user_id.clone()).or_default();
        let seq = self.next_seq();
        debug!(user_id = %conversion.user_id, seq, revenue = conversion.revenue, "Conversion committed");
        log.conversions.push((seq, conversion));
        Ok(seq)
    }

    async fn get_touchpoints(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> DecisionResult<Vec<TouchpointEvent>> {
        self.get_touchpoints_as_of(user_id, since, CommitSeq::MAX).await
    }

    async fn get_touchpoints_as_of(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        as_of: CommitSeq,
    ) -> DecisionResult<Vec<TouchpointEvent>> {
        let Some(log) = self.users.get(user_id) else {
            return Ok(Vec::new());
        };
        let mut touchpoints: Vec<TouchpointEvent> = log
            .touchpoints
            .iter()
            .filter(|(seq, t)| *seq <= as_of && t.timestamp >= since)
            .map(|(_, t)| t.clone())
            .collect();
        touchpoints.sort_by_key(|t| t.timestamp);
        Ok(touchpoints)
    }

    async fn get_conversion(&self, user_id: &str) -> DecisionResult<Option<ConversionEvent>> {
        Ok(self.users.get(user_id).and_then(|log| {
            log.conversions
                .iter()
                .map(|(_, c)| c)
                .max_by_key(|c| c.timestamp)
                .cloned()
        }))
    }

    async fn get_conversions(&self, user_id: &str) -> DecisionResult<Vec<ConversionEvent>> {
        let mut conversions: Vec<ConversionEvent> = self
            .users
            .get(user_id)
            .map(|log| log.conversions.iter().map(|(_, c)| c.clone()).collect())
            .unwrap_or_default();
        conversions.sort_by_key(|c| c.timestamp);
        Ok(conversions)
    }

    async fn get_recent_journeys(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        min_touchpoints: usize,
    ) -> DecisionResult<Vec<CustomerJourney>> {
        if start > end {
            return Err(DecisionError::Validation(format!(
                "journey range start {} is after end {}",
                start, end
            )));
        }
        let mut journeys: Vec<CustomerJourney> = self
            .users
            .iter()
            .flat_map(|entry| {
                Self::journeys_for_user(entry.key(), entry.value(), start, end, min_touchpoints)
            })
            .collect();
        journeys.sort_by(|a, b| {
            a.user_id
                .cmp(&b.user_id)
                .then_with(|| a.first_touch().cmp(&b.first_touch()))
        });
        Ok(journeys)
    }

    async fn user_ids(&self) -> DecisionResult<Vec<String>> {
        let mut ids: Vec<String> = self.users.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}
