use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use decision_attribution::{
    analyze_journeys, AttributionModel, AttributionResult, BatchAggregator, BatchAnalysis,
    MarkovModelState, MarkovRegistry, ModelType, ShapleyAttribution,
};
use decision_core::config::AppConfig;
use decision_core::event_bus::{log_sink, EventSink};
use decision_core::types::{DecisionEvent, DecisionEventType, Platform};
use decision_core::{DecisionError, DecisionResult};
use decision_journey::{
    AttributionWindow, CommitSeq, ConversionEvent, CustomerJourney, JourneyAssembler,
    JourneyStore, TouchpointEvent,
};
use decision_optimizer::{
    load_campaign, AdjustmentDecision, BidBatch, BidContext, BidOptimizer, BidRecommendation,
    BudgetAllocation, BudgetAllocator, CampaignPerformance, DateRange, DynamicBidAdjustment,
    MultiPlatformAllocation, MultiPlatformAllocator, PerformanceFeed, PerformanceSnapshot,
    PlatformConstraint,
};

use crate::status::ModelsStatus;

/// Returned to the tracking caller once a conversion is committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionAck {
    pub conversion_id: String,
    pub user_id: String,
    pub commit_seq: CommitSeq,
    pub attribution_scheduled: bool,
}

/// A campaign to be loaded from the performance feed before allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSpec {
    pub campaign_id: String,
    pub platform: Platform,
    pub current_budget: f64,
    pub min_budget: Option<f64>,
    pub max_budget: Option<f64>,
}

/// Front door for attribution and optimization. Cheap to clone; clones share
/// the store, the published Markov model and stored results.
#[derive(Clone)]
pub struct DecisionEngine {
    config: Arc<AppConfig>,
    store: Arc<dyn JourneyStore>,
    assembler: Arc<JourneyAssembler>,
    shapley: Arc<ShapleyAttribution>,
    markov: Arc<MarkovRegistry>,
    multi: Arc<MultiPlatformAllocator>,
    allocator: Arc<BudgetAllocator>,
    bids: Arc<BidOptimizer>,
    dynamic: Arc<DynamicBidAdjustment>,
    feed: Option<Arc<dyn PerformanceFeed>>,
    event_sink: Arc<dyn EventSink>,
    results: Arc<DashMap<String, Vec<AttributionResult>>>,
    result_order: Arc<Mutex<VecDeque<String>>>,
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl std::fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("node_id", &self.config.node_id)
            .field("markov_version", &self.markov.snapshot().version)
            .field("results", &self.results.len())
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

impl DecisionEngine {
    pub fn new(config: AppConfig, store: Arc<dyn JourneyStore>) -> Self {
        let window = AttributionWindow::from(&config.journey);
        let allocator = BudgetAllocator::new(config.optimizer.budget.clone());
        Self {
            assembler: Arc::new(JourneyAssembler::new(store.clone(), window)),
            shapley: Arc::new(ShapleyAttribution::new(config.attribution.shapley.clone())),
            markov: Arc::new(MarkovRegistry::new(config.attribution.markov.clone())),
            multi: Arc::new(MultiPlatformAllocator::new(allocator.clone())),
            allocator: Arc::new(allocator),
            bids: Arc::new(BidOptimizer::new(config.optimizer.bid.clone())),
            dynamic: Arc::new(DynamicBidAdjustment::from(&config.optimizer.bid)),
            feed: None,
            event_sink: log_sink(),
            results: Arc::new(DashMap::new()),
            result_order: Arc::new(Mutex::new(VecDeque::new())),
            pending: Arc::new(Mutex::new(Vec::new())),
            config: Arc::new(config),
            store,
        }
    }

    /// Attach an event sink for emitting decision events.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn with_performance_feed(mut self, feed: Arc<dyn PerformanceFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JourneyStore> {
        &self.store
    }

    pub fn markov_registry(&self) -> &Arc<MarkovRegistry> {
        &self.markov
    }

    fn emit(
        &self,
        event_type: DecisionEventType,
        subject_id: impl Into<String>,
        user_id: Option<String>,
        detail: Option<String>,
    ) {
        let event = DecisionEvent::new(event_type, subject_id, self.config.node_id.clone())
            .for_user(user_id)
            .with_detail(detail);
        self.event_sink.emit(event);
    }

    fn model_for(&self, model_type: ModelType) -> Arc<dyn AttributionModel> {
        match model_type {
            ModelType::Shapley => self.shapley.clone() as Arc<dyn AttributionModel>,
            ModelType::Markov => Arc::new(self.markov.model()),
        }
    }

    // ─── Attribution ────────────────────────────────────────────────────

    /// Scores a converted journey with the requested model. Markov scoring
    /// uses whichever state is published at call time.
    pub fn score_journey(
        &self,
        journey: &CustomerJourney,
        model_type: ModelType,
    ) -> DecisionResult<AttributionResult> {
        self.model_for(model_type).attribute(journey)
    }

    /// Reconstructs the user's current journey and scores it.
    pub async fn score_user(
        &self,
        user_id: &str,
        model_type: ModelType,
    ) -> DecisionResult<AttributionResult> {
        let journey = self.assembler.journey_for_user(user_id, Utc::now()).await?;
        self.score_journey(&journey, model_type)
    }

    // ─── Tracking ───────────────────────────────────────────────────────

    pub async fn track_touchpoint(&self, touchpoint: TouchpointEvent) -> DecisionResult<CommitSeq> {
        let user_id = touchpoint.user_id.clone();
        let platform = touchpoint.platform;
        let seq = self.store.append_touchpoint(touchpoint).await?;
        debug!(user_id = %user_id, %platform, seq, "Touchpoint tracked");
        self.emit(
            DecisionEventType::TouchpointTracked,
            platform.as_str(),
            Some(user_id),
            None,
        );
        Ok(seq)
    }

    /// Commits a conversion and, when enabled, schedules Shapley attribution
    /// over the touchpoints committed up to this conversion. Returns without
    /// waiting for the attribution.
    pub async fn track_conversion(&self, conversion: ConversionEvent) -> DecisionResult<ConversionAck> {
        conversion.validate()?;
        let seq = self.store.append_conversion(conversion.clone()).await?;
        info!(
            user_id = %conversion.user_id,
            conversion_id = %conversion.conversion_id,
            revenue = conversion.revenue,
            seq,
            "Conversion tracked"
        );
        self.emit(
            DecisionEventType::ConversionTracked,
            conversion.conversion_id.clone(),
            Some(conversion.user_id.clone()),
            Some(format!("{:.2} {}", conversion.revenue, conversion.currency)),
        );

        let scheduled = self.config.orchestrator.auto_attribute_on_conversion;
        let ack = ConversionAck {
            conversion_id: conversion.conversion_id.clone(),
            user_id: conversion.user_id.clone(),
            commit_seq: seq,
            attribution_scheduled: scheduled,
        };
        if scheduled {
            let engine = self.clone();
            let handle = tokio::spawn(async move {
                engine.attribute_conversion(conversion, seq).await;
            });
            let mut pending = self.pending.lock();
            pending.retain(|h| !h.is_finished());
            pending.push(handle);
        }
        Ok(ack)
    }

    async fn attribute_conversion(&self, conversion: ConversionEvent, as_of: CommitSeq) {
        let outcome = match self.assembler.reconstruct(&conversion, Some(as_of)).await {
            Ok(journey) => self.shapley.attribute(&journey),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(result) => {
                metrics::counter!("attribution.completed").increment(1);
                let detail = result
                    .top_platform()
                    .map(|p| format!("top={} credit={:.3}", p.platform, p.credit));
                info!(
                    journey_id = %result.journey_id,
                    user_id = %result.user_id,
                    platforms = result.platform_attribution.len(),
                    "Background attribution completed"
                );
                self.emit(
                    DecisionEventType::AttributionCompleted,
                    result.journey_id.clone(),
                    Some(result.user_id.clone()),
                    detail,
                );
                self.store_result(result);
            }
            Err(e) => {
                metrics::counter!("attribution.failed").increment(1);
                warn!(
                    user_id = %conversion.user_id,
                    conversion_id = %conversion.conversion_id,
                    error = %e,
                    "Background attribution failed"
                );
                self.emit(
                    DecisionEventType::AttributionFailed,
                    conversion.conversion_id.clone(),
                    Some(conversion.user_id.clone()),
                    Some(e.to_string()),
                );
            }
        }
    }

    /// Keeps at most `max_stored_results` results, evicting the oldest.
    fn store_result(&self, result: AttributionResult) {
        let journey_id = result.journey_id.clone();
        self.results.entry(journey_id.clone()).or_default().push(result);

        let capacity = self.config.orchestrator.max_stored_results.max(1);
        let mut order = self.result_order.lock();
        order.push_back(journey_id);
        while order.len() > capacity {
            let Some(oldest) = order.pop_front() else {
                break;
            };
            if let Entry::Occupied(mut entry) = self.results.entry(oldest) {
                entry.get_mut().remove(0);
                if entry.get().is_empty() {
                    entry.remove();
                }
            }
            metrics::counter!("attribution.evicted").increment(1);
        }
    }

    pub fn stored_result_count(&self) -> usize {
        self.result_order.lock().len()
    }

    /// Waits for every scheduled background attribution to finish.
    pub async fn drain_background(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.pending.lock());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Background attribution task aborted");
                }
            }
        }
    }

    pub fn attribution_results(&self, journey_id: &str) -> Vec<AttributionResult> {
        self.results
            .get(journey_id)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    /// Stored background results for `user_id`, oldest computation first.
    pub fn results_for_user(&self, user_id: &str) -> Vec<AttributionResult> {
        let mut out: Vec<AttributionResult> = self
            .results
            .iter()
            .flat_map(|r| r.value().clone())
            .filter(|r| r.user_id == user_id)
            .collect();
        out.sort_by_key(|r| r.computed_at);
        out
    }

    // ─── Markov training ────────────────────────────────────────────────

    /// Trains the Markov model off the async runtime and publishes it. The
    /// published state is untouched on failure. When a state path is
    /// configured the new model is written there as well.
    pub async fn train_markov(
        &self,
        journeys: Vec<CustomerJourney>,
    ) -> DecisionResult<Arc<MarkovModelState>> {
        let registry = self.markov.clone();
        let state_path = self.config.attribution.markov.state_path.clone();
        let count = journeys.len();

        let outcome = tokio::task::spawn_blocking(move || {
            let state = registry.train(&journeys)?;
            if let Some(path) = state_path {
                if let Err(e) = registry.save_to(&path) {
                    warn!(path = %path, error = %e, "Failed to persist Markov model");
                }
            }
            Ok::<_, DecisionError>(state)
        })
        .await
        .map_err(|e| DecisionError::Internal(anyhow!("markov training task failed: {}", e)))?;

        match outcome {
            Ok(state) => {
                metrics::counter!("markov.trained").increment(1);
                info!(
                    version = state.version,
                    journeys = count,
                    converted = state.converted_journey_count,
                    "Markov model trained"
                );
                self.emit(
                    DecisionEventType::MarkovTrained,
                    format!("markov-v{}", state.version),
                    None,
                    Some(format!("journeys={}", state.training_journey_count)),
                );
                Ok(state)
            }
            Err(e) => {
                metrics::counter!("markov.training_failed").increment(1);
                self.emit(
                    DecisionEventType::MarkovTrainingFailed,
                    format!("markov-v{}", self.markov.snapshot().version),
                    None,
                    Some(e.to_string()),
                );
                Err(e)
            }
        }
    }

    /// Trains on journeys active within the configured training window.
    pub async fn retrain_recent(&self, now: DateTime<Utc>) -> DecisionResult<Arc<MarkovModelState>> {
        let cfg = &self.config.orchestrator;
        let start = now - Duration::days(cfg.training_window_days as i64);
        let journeys = self
            .store
            .get_recent_journeys(start, now, cfg.training_min_touchpoints)
            .await?;
        debug!(journeys = journeys.len(), window_days = cfg.training_window_days, "Retraining Markov model");
        self.train_markov(journeys).await
    }

    // ─── Batch analysis ─────────────────────────────────────────────────

    /// Scores each user's current journey and aggregates the results.
    pub async fn analyze_batch(
        &self,
        user_ids: &[String],
        model_type: ModelType,
    ) -> DecisionResult<BatchAnalysis> {
        let limit = self.config.orchestrator.max_batch_users;
        if user_ids.len() > limit {
            return Err(DecisionError::Validation(format!(
                "batch of {} users exceeds the limit of {}",
                user_ids.len(),
                limit
            )));
        }

        let model = self.model_for(model_type);
        let now = Utc::now();
        let mut aggregator = BatchAggregator::new(model_type);
        for user_id in user_ids {
            match self.assembler.journey_for_user(user_id, now).await {
                Ok(journey) if journey.conversion.is_none() => aggregator.add_unconverted(),
                Ok(journey) => match model.attribute(&journey) {
                    Ok(result) => aggregator.add_result(&result),
                    Err(e) => {
                        debug!(user_id = %user_id, error = %e, "Batch scoring failed");
                        aggregator.add_failure();
                    }
                },
                Err(e) => {
                    debug!(user_id = %user_id, error = %e, "Journey reconstruction failed");
                    aggregator.add_failure();
                }
            }
        }
        let analysis = aggregator.finish();
        info!(
            model = %model_type,
            total = analysis.total_journeys,
            converted = analysis.converted_journeys,
            failed = analysis.failed_journeys,
            "Batch analysis finished"
        );
        Ok(analysis)
    }

    /// Aggregated attribution over the stored journeys active in `[start, end]`.
    pub async fn analyze_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        model_type: ModelType,
    ) -> DecisionResult<BatchAnalysis> {
        let journeys = self
            .store
            .get_recent_journeys(start, end, self.config.journey.min_touchpoints)
            .await?;
        let model = self.model_for(model_type);
        Ok(analyze_journeys(model.as_ref(), &journeys))
    }

    // ─── Budget ─────────────────────────────────────────────────────────

    pub fn optimize_budget(
        &self,
        campaigns: &[CampaignPerformance],
        total_budget: f64,
    ) -> DecisionResult<Vec<BudgetAllocation>> {
        let allocations = self.allocator.optimize(campaigns, total_budget)?;
        metrics::counter!("optimizer.budget_runs").increment(1);
        self.emit(
            DecisionEventType::BudgetOptimized,
            "single-platform",
            None,
            Some(format!("campaigns={} total={:.2}", allocations.len(), total_budget)),
        );
        Ok(allocations)
    }

    pub fn optimize_budget_multi_platform(
        &self,
        platform_campaigns: &BTreeMap<Platform, Vec<CampaignPerformance>>,
        total_budget: f64,
        constraints: &BTreeMap<Platform, PlatformConstraint>,
    ) -> DecisionResult<MultiPlatformAllocation> {
        let allocation = self.multi.optimize(platform_campaigns, total_budget, constraints)?;
        metrics::counter!("optimizer.budget_runs").increment(1);
        self.emit(
            DecisionEventType::BudgetOptimized,
            "multi-platform",
            None,
            Some(format!(
                "platforms={} total={:.2}",
                allocation.platforms.len(),
                total_budget
            )),
        );
        Ok(allocation)
    }

    /// Loads each campaign's history over `range` from the attached feed and
    /// allocates `total_budget` across them.
    pub async fn optimize_budget_from_feed(
        &self,
        entries: &[CampaignSpec],
        range: DateRange,
        total_budget: f64,
    ) -> DecisionResult<Vec<BudgetAllocation>> {
        let feed = self
            .feed
            .as_ref()
            .ok_or_else(|| DecisionError::Config("no performance feed attached".into()))?;
        let mut campaigns = Vec::with_capacity(entries.len());
        for entry in entries {
            let campaign = load_campaign(
                feed.as_ref(),
                &entry.campaign_id,
                entry.platform,
                entry.current_budget,
                range,
            )
            .await?
            .with_bounds(entry.min_budget, entry.max_budget);
            campaigns.push(campaign);
        }
        self.optimize_budget(&campaigns, total_budget)
    }

    // ─── Bids ───────────────────────────────────────────────────────────

    pub fn optimize_bid(
        &self,
        context: &BidContext,
        current_bid: f64,
        avg_order_value: f64,
        recent: Option<&PerformanceSnapshot>,
    ) -> DecisionResult<BidRecommendation> {
        let rec = self
            .bids
            .optimize_bid(context, current_bid, avg_order_value, recent)?;
        metrics::counter!("optimizer.bid_runs").increment(1);
        self.emit(
            DecisionEventType::BidOptimized,
            context.ad_set_id.clone(),
            None,
            Some(format!("{:.2} -> {:.2}", current_bid, rec.recommended_bid)),
        );
        Ok(rec)
    }

    pub fn optimize_campaign_bids(
        &self,
        contexts: &[BidContext],
        current_bids: &HashMap<String, f64>,
        avg_order_value: f64,
        performance: &HashMap<String, PerformanceSnapshot>,
    ) -> BidBatch {
        let batch = self
            .bids
            .optimize_campaign_bids(contexts, current_bids, avg_order_value, performance);
        metrics::counter!("optimizer.bid_runs").increment(1);
        if !batch.failures.is_empty() {
            warn!(failures = batch.failures.len(), "Some ad sets could not be optimized");
        }
        self.emit(
            DecisionEventType::BidOptimized,
            contexts
                .first()
                .map(|c| c.campaign_id.clone())
                .unwrap_or_default(),
            None,
            Some(format!(
                "recommendations={} failures={}",
                batch.recommendations.len(),
                batch.failures.len()
            )),
        );
        batch
    }

    /// Out-of-band check of recent performance against the target ROAS
    /// (configured target when `target_roas` is `None`).
    pub fn check_dynamic_adjustment(
        &self,
        snapshot: &PerformanceSnapshot,
        target_roas: Option<f64>,
    ) -> AdjustmentDecision {
        let target = target_roas.unwrap_or(self.config.optimizer.bid.target_roas);
        self.dynamic.should_adjust(snapshot, target)
    }

    pub fn models_status(&self) -> ModelsStatus {
        ModelsStatus::new(self.shapley.config(), &self.markov.snapshot())
    }
}
