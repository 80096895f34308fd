pub mod batch;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod store;

pub use config::Settings;
pub use domain::{Entity, PromotionMode};
pub use error::{PipelineError, Result};
pub use pipeline::{Orchestrator, RunReport};
pub use store::Store;
