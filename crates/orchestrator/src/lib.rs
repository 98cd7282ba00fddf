//! Orchestration layer: routes journeys to attribution models, runs
//! conversion-triggered attribution in the background, schedules Markov
//! retraining and fronts the budget and bid optimizers.

pub mod engine;
pub mod scheduler;
pub mod status;

pub use engine::{CampaignSpec, ConversionAck, DecisionEngine};
pub use scheduler::{run_once, TrainingScheduler};
pub use status::{MarkovStatus, ModelsStatus, ShapleyStatus};
