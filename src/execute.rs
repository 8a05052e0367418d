// ⚙️ Plan Executor - apply a persisted plan, one entry at a time
// Update failure skips that entry's removals; a failed removal never stops the
// others. No rollback: partial application is a valid end state, visible in
// the summary and the progress log.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::artifact::{PlanSink, ResumeState};
use crate::db::VenueStore;
use crate::plan::{DedupPlan, PlanEntry};

// ============================================================================
// OUTCOMES
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryOutcome {
    pub group_id: String,
    pub keeper_id: String,
    pub keeper_updated: bool,
    pub deleted: Vec<String>,
    pub failed_deletes: Vec<String>,
    /// Removals never attempted because the keeper update failed
    pub skipped_removals: Vec<String>,
}

impl EntryOutcome {
    pub fn is_complete(&self) -> bool {
        self.keeper_updated && self.failed_deletes.is_empty() && self.skipped_removals.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub groups_processed: usize,
    pub groups_distinct: usize,
    pub records_kept: usize,
    pub records_updated: usize,
    pub records_deleted: usize,
    pub updates_failed: usize,
    pub deletes_failed: usize,
    pub removals_skipped: usize,
    /// Entries already complete according to a previous run's progress log
    pub entries_skipped: usize,
    /// Entries not reached because the run was cancelled
    pub entries_pending: usize,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn operations_failed(&self) -> usize {
        self.updates_failed + self.deletes_failed
    }

    pub fn report(&self) -> String {
        let mut lines = vec![
            format!("Groups processed:   {}", self.groups_processed),
            format!("Groups distinct:    {}", self.groups_distinct),
            format!("Records kept:       {}", self.records_kept),
            format!("Records updated:    {}", self.records_updated),
            format!("Records deleted:    {}", self.records_deleted),
            format!(
                "Operations failed:  {} ({} updates, {} deletes)",
                self.operations_failed(),
                self.updates_failed,
                self.deletes_failed
            ),
        ];

        if self.removals_skipped > 0 {
            lines.push(format!("Removals skipped:   {}", self.removals_skipped));
        }
        if self.entries_skipped > 0 {
            lines.push(format!("Already complete:   {}", self.entries_skipped));
        }
        if self.cancelled {
            lines.push(format!("Cancelled with {} entries pending", self.entries_pending));
        }

        lines.join("\n")
    }
}

// ============================================================================
// EXECUTION
// ============================================================================

/// Apply `plan` against `store`, strictly sequentially.
/// `cancel` is checked between entries, never inside one.
pub fn execute_plan(
    plan: &DedupPlan,
    store: &dyn VenueStore,
    sink: &mut dyn PlanSink,
    resume: Option<&ResumeState>,
    cancel: &AtomicBool,
) -> RunSummary {
    let mut summary = RunSummary {
        groups_distinct: plan.distinct_groups,
        ..RunSummary::default()
    };

    for (idx, entry) in plan.entries.iter().enumerate() {
        if cancel.load(Ordering::SeqCst) {
            summary.cancelled = true;
            summary.entries_pending = plan.entries.len() - idx;
            warn!("Run cancelled, {} entries left unapplied", summary.entries_pending);
            break;
        }

        let prior = resume.and_then(|r| r.outcome(&entry.group_id));
        if prior.is_some_and(EntryOutcome::is_complete) {
            summary.entries_skipped += 1;
            continue;
        }

        let outcome = execute_entry(entry, store, prior, &mut summary);

        if let Err(e) = sink.record_outcome(&outcome) {
            warn!("Failed to record progress for group {}: {:#}", entry.group_id, e);
        }
    }

    summary
}

fn execute_entry(
    entry: &PlanEntry,
    store: &dyn VenueStore,
    prior: Option<&EntryOutcome>,
    summary: &mut RunSummary,
) -> EntryOutcome {
    summary.groups_processed += 1;
    summary.records_kept += 1;

    let mut outcome = EntryOutcome {
        group_id: entry.group_id.clone(),
        keeper_id: entry.keeper_id.clone(),
        ..EntryOutcome::default()
    };

    match prior.filter(|p| p.keeper_updated) {
        // Keeper already holds the merged payload; only outstanding removals remain
        Some(previous) => {
            outcome.keeper_updated = true;
            outcome.deleted = previous.deleted.clone();
        }
        None => match store.update_fields(&entry.keeper_id, &entry.payload) {
            Ok(()) => {
                outcome.keeper_updated = true;
                summary.records_updated += 1;
            }
            Err(e) => {
                warn!(
                    "Update of keeper {} failed, skipping {} removals: {}",
                    entry.keeper_id,
                    entry.remove_ids.len(),
                    e
                );
                summary.updates_failed += 1;
                summary.removals_skipped += entry.remove_ids.len();
                outcome.skipped_removals = entry.remove_ids.clone();
                return outcome;
            }
        },
    }

    let outstanding: Vec<&String> = entry
        .remove_ids
        .iter()
        .filter(|id| !outcome.deleted.contains(*id))
        .collect();

    for id in outstanding {
        match store.delete(id) {
            Ok(()) => {
                summary.records_deleted += 1;
                outcome.deleted.push(id.clone());
            }
            Err(e) => {
                warn!("Delete of {} (merged into {}) failed: {}", id, entry.keeper_id, e);
                summary.deletes_failed += 1;
                outcome.failed_deletes.push(id.clone());
            }
        }
    }

    info!(
        "✓ {} kept, {} removed, {} failed",
        entry.keeper_id,
        outcome.deleted.len(),
        outcome.failed_deletes.len()
    );

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::MemoryPlanSink;
    use crate::grouping::GroupingStrategy;
    use crate::merge::MergedPayload;
    use crate::testing::{test_venue, MemoryStore};
    use chrono::Utc;

    fn entry(group_id: &str, keeper: &str, removals: &[&str]) -> PlanEntry {
        PlanEntry {
            group_id: group_id.to_string(),
            strategy: GroupingStrategy::ByAddress,
            key: "123 main st".to_string(),
            locality: "springfield".to_string(),
            keeper_id: keeper.to_string(),
            keeper_score: 30,
            payload: MergedPayload {
                description: Some(format!("merged into {}", keeper)),
                ..MergedPayload::default()
            },
            remove_ids: removals.iter().map(|s| s.to_string()).collect(),
            justification: String::new(),
        }
    }

    fn plan(entries: Vec<PlanEntry>) -> DedupPlan {
        DedupPlan {
            run_id: "run".to_string(),
            created_at: Utc::now(),
            strategies: GroupingStrategy::all(),
            records_scanned: 0,
            distinct_groups: 0,
            entries,
        }
    }

    fn store(ids: &[&str]) -> MemoryStore {
        MemoryStore::with_venues(
            ids.iter()
                .map(|id| test_venue(id, "Arcade", Some("123 Main St"), "Springfield"))
                .collect(),
        )
    }

    #[test]
    fn test_applies_every_entry() {
        let store = store(&["a", "b", "c", "d", "e"]);
        let plan = plan(vec![entry("g1", "a", &["b", "c"]), entry("g2", "d", &["e"])]);
        let mut sink = MemoryPlanSink::default();

        let summary = execute_plan(&plan, &store, &mut sink, None, &AtomicBool::new(false));

        assert_eq!(summary.groups_processed, 2);
        assert_eq!(summary.records_updated, 2);
        assert_eq!(summary.records_deleted, 3);
        assert_eq!(summary.operations_failed(), 0);
        assert_eq!(store.len(), 2);
        assert_eq!(
            store.get("a").unwrap().description.as_deref(),
            Some("merged into a")
        );
        assert_eq!(sink.outcomes.len(), 2);
        assert!(sink.outcomes.iter().all(EntryOutcome::is_complete));
    }

    #[test]
    fn test_failed_update_skips_removals_but_run_continues() {
        let mut store = store(&["a", "b", "c", "d"]);
        store.fail_updates.insert("a".to_string());
        let plan = plan(vec![entry("g1", "a", &["b"]), entry("g2", "c", &["d"])]);
        let mut sink = MemoryPlanSink::default();

        let summary = execute_plan(&plan, &store, &mut sink, None, &AtomicBool::new(false));

        assert_eq!(summary.updates_failed, 1);
        assert_eq!(summary.records_updated, 1);
        assert_eq!(summary.records_deleted, 1, "only the second entry deletes");
        assert_eq!(summary.removals_skipped, 1);
        assert!(store.get("b").is_some(), "b must survive when a was never updated");
        assert!(store.get("d").is_none());
        assert_eq!(sink.outcomes[0].skipped_removals, vec!["b".to_string()]);
        assert!(sink.outcomes[0].deleted.is_empty());
    }

    #[test]
    fn test_failed_delete_does_not_stop_other_deletes() {
        let mut store = store(&["a", "b", "c", "d"]);
        store.fail_deletes.insert("b".to_string());
        let plan = plan(vec![entry("g1", "a", &["b", "c", "d"])]);
        let mut sink = MemoryPlanSink::default();

        let summary = execute_plan(&plan, &store, &mut sink, None, &AtomicBool::new(false));

        assert_eq!(summary.deletes_failed, 1);
        assert_eq!(summary.records_deleted, 2);
        assert!(store.get("b").is_some());
        assert_eq!(sink.outcomes[0].failed_deletes, vec!["b".to_string()]);
        assert!(!sink.outcomes[0].is_complete());
    }

    #[test]
    fn test_cancel_before_start_applies_nothing() {
        let store = store(&["a", "b"]);
        let plan = plan(vec![entry("g1", "a", &["b"])]);
        let mut sink = MemoryPlanSink::default();

        let summary = execute_plan(&plan, &store, &mut sink, None, &AtomicBool::new(true));

        assert!(summary.cancelled);
        assert_eq!(summary.entries_pending, 1);
        assert_eq!(summary.groups_processed, 0);
        assert_eq!(store.len(), 2);
        assert!(sink.outcomes.is_empty());
    }

    #[test]
    fn test_replay_retries_only_outstanding_removals() {
        // First attempt: keeper updated, b deleted, c failed
        let store = store(&["a", "c"]);
        let plan = plan(vec![entry("g1", "a", &["b", "c"])]);
        let resume = ResumeState::from_outcomes(vec![EntryOutcome {
            group_id: "g1".to_string(),
            keeper_id: "a".to_string(),
            keeper_updated: true,
            deleted: vec!["b".to_string()],
            failed_deletes: vec!["c".to_string()],
            skipped_removals: Vec::new(),
        }]);
        let mut sink = MemoryPlanSink::default();

        let summary = execute_plan(&plan, &store, &mut sink, Some(&resume), &AtomicBool::new(false));

        assert_eq!(summary.records_updated, 0, "keeper is not rewritten");
        assert_eq!(summary.records_deleted, 1);
        assert_eq!(summary.operations_failed(), 0);
        assert!(store.get("a").unwrap().description.is_none());
        assert!(sink.outcomes[0].is_complete());
        assert_eq!(sink.outcomes[0].deleted, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_replay_skips_completed_entries() {
        let store = store(&["a"]);
        let plan = plan(vec![entry("g1", "a", &["b"])]);
        let resume = ResumeState::from_outcomes(vec![EntryOutcome {
            group_id: "g1".to_string(),
            keeper_id: "a".to_string(),
            keeper_updated: true,
            deleted: vec!["b".to_string()],
            ..EntryOutcome::default()
        }]);
        let mut sink = MemoryPlanSink::default();

        let summary = execute_plan(&plan, &store, &mut sink, Some(&resume), &AtomicBool::new(false));

        assert_eq!(summary.entries_skipped, 1);
        assert_eq!(summary.groups_processed, 0);
        assert!(sink.outcomes.is_empty());
    }

    #[test]
    fn test_report_mentions_failures() {
        let summary = RunSummary {
            updates_failed: 1,
            deletes_failed: 2,
            ..RunSummary::default()
        };
        assert!(summary.report().contains("Operations failed:  3"));
    }
}
