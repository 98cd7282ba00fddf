//! Customer journey model: touchpoints, conversions and the per-user journeys
//! reconstructed from the journey store for attribution.

pub mod assembler;
pub mod seed;
pub mod store;
pub mod types;

pub use assembler::{AttributionWindow, JourneyAssembler};
pub use seed::{seed_demo_journeys, SeedSummary};
pub use store::{CommitSeq, InMemoryJourneyStore, JourneyStore};
pub use types::{
    ConversionEvent, CustomerJourney, TouchpointEvent, UtmParams, MAX_ATTRIBUTION_WINDOW_DAYS,
};
