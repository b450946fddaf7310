//! Run orchestration tying the source collector, enrichment, the durable
//! buffer and the downstream pusher or order store together.

pub mod error;
pub mod harvester;

pub use error::PipelineError;
pub use harvester::{Delivery, HarvestSettings, Harvester, RunReport, RunState};
