//! Multi-touch attribution: assigns fractional conversion credit to the
//! touchpoints of a customer journey.
//!
//! Two models are provided. [`ShapleyAttribution`] is untrained and scores a
//! journey on its own. [`MarkovAttribution`] scores against a transition
//! graph learned from many journeys and published through the
//! [`MarkovRegistry`].

pub mod batch;
pub mod markov;
pub mod model;
pub mod registry;
pub mod shapley;

pub use batch::{analyze_journeys, BatchAggregator, BatchAnalysis, CampaignSummary, PlatformSummary};
pub use markov::{ConversionPath, MarkovAttribution, MarkovModelState, MarkovTrainer};
pub use model::{
    AttributionModel, AttributionResult, CampaignAttribution, ModelType, PlatformAttribution,
};
pub use registry::MarkovRegistry;
pub use shapley::ShapleyAttribution;
