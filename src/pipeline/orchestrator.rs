use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::time::Instant;
use tracing::{error, info, warn};

use super::{stages_for, RunContext, StageResult};
use crate::config::Settings;
use crate::domain::Entity;
use crate::error::{PipelineError, Result};
use crate::store::{RunLogEntry, Store};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntityOutcome {
    Succeeded,
    Skipped { reason: String },
    Failed { stage: String, error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub stage: String,
    pub result: StageResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityReport {
    pub entity: Entity,
    pub outcome: EntityOutcome,
    pub stages: Vec<StageRecord>,
}

/// Result of one orchestrated run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub run_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub entities: Vec<EntityReport>,
    /// Set when a fatal error stopped the run before every entity was processed.
    pub aborted: Option<String>,
}

impl RunReport {
    fn count(&self, pred: impl Fn(&EntityOutcome) -> bool) -> usize {
        self.entities.iter().filter(|e| pred(&e.outcome)).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, EntityOutcome::Succeeded))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, EntityOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, EntityOutcome::Failed { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.aborted.is_none() && self.failed() == 0
    }

    pub fn outcome_of(&self, entity: Entity) -> Option<&EntityOutcome> {
        self.entities
            .iter()
            .find(|e| e.entity == entity)
            .map(|e| &e.outcome)
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }
}

/// Runs entities one after another, and each entity's stages in order.
///
/// A stage failure ends that entity's run only. A missing batch marks the
/// entity skipped. A connectivity failure aborts the whole run.
pub struct Orchestrator<'a> {
    store: &'a mut Store,
    settings: &'a Settings,
}

impl<'a> Orchestrator<'a> {
    pub fn new(store: &'a mut Store, settings: &'a Settings) -> Self {
        Self { store, settings }
    }

    pub fn run(&mut self, run_date: NaiveDate, entities: &[Entity]) -> Result<RunReport> {
        let ctx = RunContext::new(self.settings, run_date);
        let _run = ctx.span.enter();
        info!("🚀 Starting run for {} entities", entities.len());

        self.store.ping()?;

        let mut report = RunReport {
            run_id: ctx.run_id.clone(),
            run_date,
            started_at: ctx.started_at,
            finished_at: None,
            entities: Vec::with_capacity(entities.len()),
            aborted: None,
        };

        for &entity in entities {
            if !self.settings.is_enabled(entity) {
                info!(entity = %entity, "entity disabled, skipping");
                report.entities.push(EntityReport {
                    entity,
                    outcome: EntityOutcome::Skipped {
                        reason: "disabled in configuration".to_string(),
                    },
                    stages: Vec::new(),
                });
                continue;
            }
            match self.run_entity(entity, &ctx) {
                Ok(entity_report) => report.entities.push(entity_report),
                Err(e) => {
                    error!(entity = %entity, error = %e, "💥 fatal error, aborting run");
                    report.aborted = Some(e.to_string());
                    break;
                }
            }
        }

        report.finished_at = Some(Utc::now());
        self.finish(&report);
        Ok(report)
    }

    /// Err only for fatal errors; everything else is captured in the report.
    fn run_entity(&mut self, entity: Entity, ctx: &RunContext<'_>) -> Result<EntityReport> {
        let mut entity_report = EntityReport {
            entity,
            outcome: EntityOutcome::Succeeded,
            stages: Vec::new(),
        };

        for stage in stages_for(entity) {
            let span = tracing::info_span!(parent: &ctx.span, "stage", entity = %entity, stage = stage.name());
            let _stage = span.enter();
            info!("stage started");
            let started = Instant::now();

            match stage.execute(entity, self.store, ctx) {
                Ok(result) => {
                    info!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        processed = result.processed_count,
                        failed = result.failed_count,
                        "✅ {}",
                        result.message
                    );
                    let success = result.success;
                    let message = result.message.clone();
                    entity_report.stages.push(StageRecord {
                        stage: stage.name().to_string(),
                        result,
                    });
                    if !success {
                        entity_report.outcome = EntityOutcome::Failed {
                            stage: stage.name().to_string(),
                            error: message,
                        };
                        break;
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(PipelineError::MissingBatch { path, .. }) => {
                    warn!(path = %path, "⏭️ no batch for this run date, skipping entity");
                    entity_report.outcome = EntityOutcome::Skipped {
                        reason: format!("no batch under {path}"),
                    };
                    break;
                }
                Err(PipelineError::EmptyBatch { path, .. }) => {
                    warn!(path = %path, "⏭️ batch is empty, skipping entity");
                    entity_report.outcome = EntityOutcome::Skipped {
                        reason: format!("empty batch {path}"),
                    };
                    break;
                }
                Err(e) => {
                    error!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        error = %e,
                        "❌ stage failed, remaining stages for this entity skipped"
                    );
                    entity_report.stages.push(StageRecord {
                        stage: stage.name().to_string(),
                        result: StageResult::failure(e.to_string()),
                    });
                    entity_report.outcome = EntityOutcome::Failed {
                        stage: stage.name().to_string(),
                        error: e.to_string(),
                    };
                    break;
                }
            }
        }
        Ok(entity_report)
    }

    fn finish(&self, report: &RunReport) {
        let outcome = if report.aborted.is_some() {
            "aborted"
        } else if report.failed() > 0 {
            "partial"
        } else {
            "succeeded"
        };
        crate::metrics::record_run(outcome);

        if report.is_success() {
            info!(
                succeeded = report.succeeded(),
                skipped = report.skipped(),
                "🎉 run completed"
            );
        } else {
            error!(
                succeeded = report.succeeded(),
                skipped = report.skipped(),
                failed = report.failed(),
                aborted = report.aborted.is_some(),
                "run completed with failures"
            );
        }

        if report.aborted.is_some() {
            return;
        }
        let entry = RunLogEntry {
            run_id: report.run_id.clone(),
            run_date: report.run_date.to_string(),
            started_at: report.started_at.to_rfc3339(),
            finished_at: report
                .finished_at
                .unwrap_or(report.started_at)
                .to_rfc3339(),
            succeeded: report.succeeded() as i64,
            skipped: report.skipped() as i64,
            failed: report.failed() as i64,
        };
        let persisted = serde_json::to_string(report)
            .map_err(PipelineError::from)
            .and_then(|json| self.store.record_run(&entry, &json));
        if let Err(e) = persisted {
            warn!(error = %e, "could not record run summary");
        }
    }
}
