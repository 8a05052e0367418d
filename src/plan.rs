// 📋 Deduplication Plan - every decision made before any mutation
// One planner walks all grouping strategies with shared state, so overlapping
// groups from different strategies resolve to a single entry per venue.

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::db::Venue;
use crate::distinctness::DistinctnessClassifier;
use crate::grouping::{CandidateGrouper, DuplicateGroup, GroupingStrategy};
use crate::merge::{merge_group, MergedPayload};
use crate::scoring::{completeness_score, select_keeper};

// ============================================================================
// PLAN TYPES
// ============================================================================

/// One resolved group: who survives, what gets written, who goes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    /// Fingerprint of the sorted member ids
    pub group_id: String,
    pub strategy: GroupingStrategy,
    pub key: String,
    pub locality: String,
    pub keeper_id: String,
    pub keeper_score: u32,
    pub payload: MergedPayload,
    pub remove_ids: Vec<String>,
    pub justification: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupPlan {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub strategies: Vec<GroupingStrategy>,
    pub records_scanned: usize,
    pub distinct_groups: usize,
    pub entries: Vec<PlanEntry>,
}

impl DedupPlan {
    pub fn removal_count(&self) -> usize {
        self.entries.iter().map(|e| e.remove_ids.len()).sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "Plan {}: {} venues scanned, {} groups to merge, {} venues to remove, {} groups left distinct",
            self.run_id,
            self.records_scanned,
            self.entries.len(),
            self.removal_count(),
            self.distinct_groups
        )
    }
}

/// SHA-256 over sorted ids; equal member sets give equal fingerprints
pub fn group_fingerprint<'a, I>(ids: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let sorted: BTreeSet<&str> = ids.into_iter().collect();
    let mut hasher = Sha256::new();
    for id in sorted {
        hasher.update(id.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// SEEN-GROUP REGISTRY
// ============================================================================

/// Member sets already evaluated during this run, across all strategies
#[derive(Debug, Default)]
pub struct SeenGroups {
    fingerprints: HashSet<String>,
}

impl SeenGroups {
    /// True when the set had not been seen before
    pub fn insert<'a, I>(&mut self, ids: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.fingerprints.insert(group_fingerprint(ids))
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }
}

// ============================================================================
// PLANNER
// ============================================================================

/// A group judged to be one location, in original (pre-merge) form
#[derive(Debug, Clone)]
struct Resolution {
    strategy: GroupingStrategy,
    key: String,
    locality: String,
    members: Vec<Venue>,
    keeper_idx: usize,
    keeper_score: u32,
    payload: MergedPayload,
}

impl Resolution {
    fn resolve(
        strategy: GroupingStrategy,
        key: &str,
        locality: &str,
        members: Vec<Venue>,
    ) -> Option<Self> {
        let (keeper_idx, keeper_score) = select_keeper(&members)?;
        let keeper = &members[keeper_idx];
        let others: Vec<&Venue> = members
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != keeper_idx)
            .map(|(_, v)| v)
            .collect();
        let payload = merge_group(keeper, &others);

        Some(Resolution {
            strategy,
            key: key.to_string(),
            locality: locality.to_string(),
            keeper_idx,
            keeper_score,
            payload,
            members,
        })
    }

    fn keeper(&self) -> &Venue {
        &self.members[self.keeper_idx]
    }

    /// Keeper as it will look once the payload is written
    fn keeper_view(&self) -> Venue {
        let mut view = self.keeper().clone();
        self.payload.apply_to(&mut view);
        view
    }

    fn into_entry(self) -> PlanEntry {
        let keeper_id = self.keeper().id.clone();
        let removed: Vec<(&Venue, u32)> = self
            .members
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != self.keeper_idx)
            .map(|(_, v)| (v, completeness_score(v)))
            .collect();

        let justification = format!(
            "kept {} (completeness {}) via {} key '{}' in {}; removing {}",
            keeper_id,
            self.keeper_score,
            self.strategy.as_str(),
            self.key,
            self.locality,
            removed
                .iter()
                .map(|(v, score)| format!("{} ({})", v.id, score))
                .collect::<Vec<_>>()
                .join(", ")
        );

        PlanEntry {
            group_id: group_fingerprint(self.members.iter().map(|v| v.id.as_str())),
            strategy: self.strategy,
            key: self.key,
            locality: self.locality,
            keeper_score: self.keeper_score,
            remove_ids: removed.iter().map(|(v, _)| v.id.clone()).collect(),
            keeper_id,
            payload: self.payload,
            justification,
        }
    }
}

/// Mutable state shared by every strategy pass
#[derive(Default)]
struct PlanState {
    /// Folded resolutions leave None behind
    slots: Vec<Option<Resolution>>,
    /// venue id → slot holding it
    owner: HashMap<String, usize>,
    /// Members of groups judged distinct
    protected: HashSet<String>,
    seen: SeenGroups,
    distinct_groups: usize,
}

pub struct Planner {
    grouper: CandidateGrouper,
    classifier: DistinctnessClassifier,
    strategies: Vec<GroupingStrategy>,
}

impl Planner {
    pub fn new(
        grouper: CandidateGrouper,
        classifier: DistinctnessClassifier,
        strategies: Vec<GroupingStrategy>,
    ) -> Self {
        Planner {
            grouper,
            classifier,
            strategies,
        }
    }

    /// Build the full plan. Pure: nothing is written anywhere.
    pub fn build_plan(&self, venues: &[Venue]) -> DedupPlan {
        let position: HashMap<&str, usize> = venues
            .iter()
            .enumerate()
            .map(|(idx, v)| (v.id.as_str(), idx))
            .collect();

        let mut state = PlanState::default();

        for strategy in &self.strategies {
            let groups = self.grouper.group(venues, *strategy);
            info!(
                "🔍 {}: {} candidate groups",
                strategy.as_str(),
                groups.len()
            );

            for group in &groups {
                self.process_group(group, &position, &mut state);
            }
        }

        let entries: Vec<PlanEntry> = state
            .slots
            .into_iter()
            .flatten()
            .map(Resolution::into_entry)
            .collect();

        DedupPlan {
            run_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            strategies: self.strategies.clone(),
            records_scanned: venues.len(),
            distinct_groups: state.distinct_groups,
            entries,
        }
    }

    fn process_group(
        &self,
        group: &DuplicateGroup,
        position: &HashMap<&str, usize>,
        state: &mut PlanState,
    ) {
        // Units: raw venues, or the merged view of a slot already holding a member
        let mut units: Vec<Venue> = Vec::new();
        let mut involved: BTreeSet<usize> = BTreeSet::new();
        let mut raw: Vec<Venue> = Vec::new();

        for member in &group.members {
            if let Some(&slot) = state.owner.get(&member.id) {
                let Some(resolution) = state.slots[slot].as_ref() else {
                    continue;
                };
                if state.protected.contains(&resolution.keeper().id) {
                    continue;
                }
                if involved.insert(slot) {
                    units.push(resolution.keeper_view());
                }
            } else if !state.protected.contains(&member.id) {
                raw.push(member.clone());
                units.push(member.clone());
            }
        }

        if units.len() < 2 {
            return;
        }

        if !state.seen.insert(units.iter().map(|v| v.id.as_str())) {
            debug!("skipping already evaluated group {} '{}'", group.strategy.as_str(), group.key);
            return;
        }

        let verdict = self.classifier.classify(group.strategy, &units);
        if verdict.distinct {
            debug!(
                "{} '{}' in {} left distinct by {}: {}",
                group.strategy.as_str(),
                group.key,
                group.locality,
                verdict.rule.map(|rule| rule.name()).unwrap_or("policy"),
                verdict.reason
            );
            state.distinct_groups += 1;
            state.protected.extend(units.into_iter().map(|v| v.id));
            return;
        }

        // Fold earlier resolutions into this one, over original records
        let mut members: Vec<Venue> = involved
            .iter()
            .filter_map(|&slot| state.slots[slot].take())
            .flat_map(|resolution| resolution.members)
            .collect();
        members.extend(raw);
        members.sort_by_key(|v| position.get(v.id.as_str()).copied().unwrap_or(usize::MAX));

        let Some(resolution) =
            Resolution::resolve(group.strategy, &group.key, &group.locality, members)
        else {
            return;
        };

        let slot = state.slots.len();
        for venue in &resolution.members {
            state.owner.insert(venue.id.clone(), slot);
        }
        state.slots.push(Some(resolution));
    }
}
