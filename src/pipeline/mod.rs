//! Consolidation stages and the orchestrator that sequences them.

pub mod facts;
pub mod landing;
pub mod null_fill;
pub mod orchestrator;
pub mod promote;
pub mod rank;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::Span;

use crate::config::Settings;
use crate::domain::Entity;
use crate::error::Result;
use crate::store::Store;

pub use facts::FactsStage;
pub use landing::LandStage;
pub use orchestrator::{EntityOutcome, Orchestrator, RunReport};
pub use promote::PromoteStage;
pub use rank::RankStage;

/// Everything a stage needs to know about the run it belongs to.
pub struct RunContext<'a> {
    pub run_id: String,
    pub run_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub settings: &'a Settings,
    /// The `run` span; stages open their own spans beneath it.
    pub span: Span,
}

impl<'a> RunContext<'a> {
    pub fn new(settings: &'a Settings, run_date: NaiveDate) -> Self {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("run", run_id = %run_id, run_date = %run_date);
        Self {
            run_id,
            run_date,
            started_at: Utc::now(),
            settings,
            span,
        }
    }

    /// Timestamp written to `insert_datetime` in raw and lineage rows.
    pub fn landed_at(&self) -> String {
        self.started_at.to_rfc3339()
    }
}

/// One step of the per-entity consolidation.
pub trait Stage {
    fn name(&self) -> &'static str;

    /// Stages that must have completed for the same entity first.
    fn dependencies(&self) -> Vec<&'static str>;

    fn execute(&self, entity: Entity, store: &mut Store, ctx: &RunContext<'_>) -> Result<StageResult>;
}

/// Outcome of one stage for one entity.
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub success: bool,
    pub processed_count: usize,
    pub failed_count: usize,
    pub message: String,
    pub metadata: BTreeMap<String, String>,
}

impl StageResult {
    pub fn success(processed: usize, message: String) -> Self {
        Self {
            success: true,
            processed_count: processed,
            failed_count: 0,
            message,
            metadata: BTreeMap::new(),
        }
    }

    /// Partial success: some rows were rejected but the stage committed.
    pub fn with_rejections(processed: usize, failed: usize, message: String) -> Self {
        Self {
            success: true,
            processed_count: processed,
            failed_count: failed,
            message,
            metadata: BTreeMap::new(),
        }
    }

    pub fn failure(message: String) -> Self {
        Self {
            success: false,
            processed_count: 0,
            failed_count: 0,
            message,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Stage pipeline for `entity`, in execution order.
pub fn stages_for(entity: Entity) -> Vec<Box<dyn Stage>> {
    let mut stages: Vec<Box<dyn Stage>> = vec![
        Box::new(LandStage),
        Box::new(RankStage),
        Box::new(PromoteStage),
    ];
    if facts::has_projection(entity) {
        stages.push(Box::new(FactsStage));
    }
    stages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_dependencies_precede_each_stage() {
        for entity in Entity::ALL {
            let stages = stages_for(entity);
            for (idx, stage) in stages.iter().enumerate() {
                for dep in stage.dependencies() {
                    let pos = stages.iter().position(|s| s.name() == dep);
                    assert!(matches!(pos, Some(p) if p < idx), "{} needs {}", stage.name(), dep);
                }
            }
        }
    }

    #[test]
    fn only_time_series_have_fact_projections() {
        assert_eq!(stages_for(Entity::Ohlcv).len(), 4);
        assert_eq!(stages_for(Entity::Macro).len(), 4);
        assert_eq!(stages_for(Entity::CompanyMeta).len(), 3);
        assert_eq!(stages_for(Entity::ExchangeRate).len(), 3);
    }
}
