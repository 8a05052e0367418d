// Venue Dedup - Core Library
// Entity resolution for the venue directory: group, classify, score, merge, plan, execute

pub mod db;
pub mod normalize;
pub mod grouping;
pub mod distinctness;
pub mod scoring;
pub mod merge;
pub mod plan;
pub mod artifact;
pub mod execute;
pub mod config;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use db::{
    Venue, VenueStore, SqliteStore, StoreError, Event,
    load_csv, setup_database, insert_venues, get_all_venues, get_venue,
    verify_count, insert_event, get_events_for_entity,
};
pub use normalize::{normalize_address, normalize_name, normalize_locality, has_street_content};
pub use grouping::{CandidateGrouper, DuplicateGroup, GroupingStrategy};
pub use distinctness::{
    ClassifierSettings, DistinctnessClassifier, DistinctnessRule, Verdict,
};
pub use scoring::{completeness_score, select_keeper};
pub use merge::{merge_group, Coordinates, MergedPayload};
pub use plan::{group_fingerprint, DedupPlan, PlanEntry, Planner, SeenGroups};
pub use artifact::{
    load_file_plan, open_sink, FilePlanSink, MemoryPlanSink, PlanSink, ResumeState,
    SqlitePlanSink,
};
pub use execute::{execute_plan, EntryOutcome, RunSummary};
pub use config::{ArtifactConfig, DedupConfig};
pub use pipeline::{DeduplicationEngine, RunReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
