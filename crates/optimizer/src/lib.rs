//! Budget and bid optimization.
//!
//! - [`BudgetAllocator`]: projected gradient ascent over a diminishing-returns
//!   revenue curve per campaign.
//! - [`MultiPlatformAllocator`]: the same allocation run across platform
//!   aggregates, then within each platform.
//! - [`BidOptimizer`]: closed-form bid from order value, conversion rate and
//!   target ROAS, adjusted for context and recent performance.
//! - [`DynamicBidAdjustment`]: fast reaction when recent ROAS drifts far from
//!   target.

pub mod bid;
pub mod budget;
pub mod dynamic;
pub mod feed;
pub mod multi_platform;
pub mod types;

pub use bid::{BidBatch, BidFailure, BidOptimizer};
pub use budget::{AllocationOutcome, BudgetAllocator};
pub use dynamic::{AdjustmentDecision, AdjustmentDirection, DynamicBidAdjustment};
pub use feed::{load_campaign, InMemoryPerformanceFeed, PerformanceFeed};
pub use multi_platform::{MultiPlatformAllocation, MultiPlatformAllocator, PlatformBudget};
pub use types::{
    BidContext, BidRecommendation, BudgetAllocation, CampaignPerformance, DailyMetrics, DateRange,
    PerformanceSnapshot, PlatformConstraint,
};
