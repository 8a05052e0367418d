// 🔁 Deduplication Engine - read, plan, persist, execute
// Store read failure aborts before a plan exists; artifact failure aborts
// before any mutation.

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;

use crate::artifact::{PlanSink, ResumeState};
use crate::config::DedupConfig;
use crate::db::VenueStore;
use crate::distinctness::DistinctnessClassifier;
use crate::execute::{execute_plan, RunSummary};
use crate::grouping::CandidateGrouper;
use crate::plan::{DedupPlan, Planner};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub plan: DedupPlan,
    pub summary: RunSummary,
}

pub struct DeduplicationEngine {
    config: DedupConfig,
}

impl DeduplicationEngine {
    pub fn new(config: DedupConfig) -> Self {
        DeduplicationEngine { config }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    pub fn planner(&self) -> Planner {
        Planner::new(
            CandidateGrouper::new(self.config.min_street_address_len),
            DistinctnessClassifier::new(self.config.classifier_settings()),
            self.config.strategies.clone(),
        )
    }

    /// Bulk read and plan; nothing is written
    pub fn plan(&self, store: &dyn VenueStore) -> Result<DedupPlan> {
        let venues = store
            .fetch_all()
            .context("Failed to read venues from the record store")?;
        info!("📂 Loaded {} venues", venues.len());

        let plan = self.planner().build_plan(&venues);
        info!("📋 {}", plan.summary());

        Ok(plan)
    }

    /// Plan, persist the plan, then execute it
    pub fn run(
        &self,
        store: &dyn VenueStore,
        sink: &mut dyn PlanSink,
        cancel: &AtomicBool,
    ) -> Result<RunReport> {
        let plan = self.plan(store)?;

        sink.write_plan(&plan)
            .context("Failed to persist the plan; nothing was changed")?;

        let summary = execute_plan(&plan, store, sink, None, cancel);
        info!(
            "✅ Run {} finished: {} updated, {} deleted, {} failed",
            plan.run_id,
            summary.records_updated,
            summary.records_deleted,
            summary.operations_failed()
        );

        Ok(RunReport { plan, summary })
    }

    /// Re-execute a previously persisted plan against its progress log
    pub fn replay(
        &self,
        plan: &DedupPlan,
        resume: &ResumeState,
        store: &dyn VenueStore,
        sink: &mut dyn PlanSink,
        cancel: &AtomicBool,
    ) -> RunSummary {
        info!(
            "🔁 Replaying plan {} ({} entries, {} with recorded progress)",
            plan.run_id,
            plan.entries.len(),
            resume.len()
        );
        execute_plan(plan, store, sink, Some(resume), cancel)
    }
}

impl Default for DeduplicationEngine {
    fn default() -> Self {
        Self::new(DedupConfig::default())
    }
}
