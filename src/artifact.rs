// 🧾 Plan Artifacts - the audit trail written before any mutation
// The plan is persisted in full up front; outcomes are appended after every
// entry so an interrupted run can be audited and replayed.

use anyhow::{Context, Result};
use log::warn;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::config::ArtifactConfig;
use crate::execute::EntryOutcome;
use crate::plan::DedupPlan;

pub trait PlanSink {
    /// Persist the full plan; called once, before execution starts
    fn write_plan(&mut self, plan: &DedupPlan) -> Result<()>;

    /// Persist the outcome of one entry as soon as it is known
    fn record_outcome(&mut self, outcome: &EntryOutcome) -> Result<()>;
}

// ============================================================================
// FILE SINK
// ============================================================================

/// Pretty JSON plan at `path`, outcomes as JSON lines next to it
pub struct FilePlanSink {
    path: PathBuf,
    progress_path: PathBuf,
}

pub fn progress_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".progress.jsonl");
    PathBuf::from(name)
}

impl FilePlanSink {
    pub fn new(path: &Path) -> Self {
        FilePlanSink {
            path: path.to_path_buf(),
            progress_path: progress_path_for(path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn progress_path(&self) -> &Path {
        &self.progress_path
    }
}

impl PlanSink for FilePlanSink {
    fn write_plan(&mut self, plan: &DedupPlan) -> Result<()> {
        let json = serde_json::to_string_pretty(plan).context("Failed to serialize plan")?;

        // Write-then-rename so a crash never leaves a truncated plan behind
        let mut tmp_name = self.path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = File::create(&tmp_path)
            .with_context(|| format!("Failed to create plan file: {:?}", tmp_path))?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to move plan into place: {:?}", self.path))?;

        // Fresh plan, fresh progress log
        File::create(&self.progress_path)
            .with_context(|| format!("Failed to create progress log: {:?}", self.progress_path))?;

        Ok(())
    }

    fn record_outcome(&mut self, outcome: &EntryOutcome) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.progress_path)
            .with_context(|| format!("Failed to open progress log: {:?}", self.progress_path))?;

        writeln!(file, "{}", serde_json::to_string(outcome)?)?;
        file.sync_data()?;

        Ok(())
    }
}

// ============================================================================
// SQLITE SINK
// ============================================================================

/// Plan tables inside a SQLite database (usually the record store itself)
pub struct SqlitePlanSink {
    conn: Connection,
    run_id: Option<String>,
}

impl SqlitePlanSink {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS dedup_plans (
                run_id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                summary TEXT NOT NULL,
                plan TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS dedup_plan_entries (
                run_id TEXT NOT NULL,
                group_id TEXT NOT NULL,
                strategy TEXT NOT NULL,
                locality TEXT NOT NULL,
                keeper_id TEXT NOT NULL,
                remove_ids TEXT NOT NULL,
                payload TEXT NOT NULL,
                justification TEXT NOT NULL,
                outcome TEXT,
                PRIMARY KEY (run_id, group_id)
            )",
            [],
        )?;

        Ok(SqlitePlanSink { conn, run_id: None })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open plan database: {:?}", path))?;
        Self::new(conn)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl PlanSink for SqlitePlanSink {
    fn write_plan(&mut self, plan: &DedupPlan) -> Result<()> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO dedup_plans (run_id, created_at, summary, plan) VALUES (?1, ?2, ?3, ?4)",
            params![
                plan.run_id,
                plan.created_at.to_rfc3339(),
                plan.summary(),
                serde_json::to_string(plan)?,
            ],
        )?;

        for entry in &plan.entries {
            tx.execute(
                "INSERT INTO dedup_plan_entries (
                    run_id, group_id, strategy, locality, keeper_id, remove_ids, payload, justification
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    plan.run_id,
                    entry.group_id,
                    entry.strategy.as_str(),
                    entry.locality,
                    entry.keeper_id,
                    serde_json::to_string(&entry.remove_ids)?,
                    serde_json::to_string(&entry.payload)?,
                    entry.justification,
                ],
            )?;
        }

        tx.commit()?;
        self.run_id = Some(plan.run_id.clone());

        Ok(())
    }

    fn record_outcome(&mut self, outcome: &EntryOutcome) -> Result<()> {
        let run_id = self
            .run_id
            .as_deref()
            .context("Outcome recorded before the plan was written")?;

        self.conn.execute(
            "UPDATE dedup_plan_entries SET outcome = ?3 WHERE run_id = ?1 AND group_id = ?2",
            params![run_id, outcome.group_id, serde_json::to_string(outcome)?],
        )?;

        Ok(())
    }
}

// ============================================================================
// MEMORY SINK
// ============================================================================

/// Keeps everything in memory; used for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryPlanSink {
    pub plan: Option<DedupPlan>,
    pub outcomes: Vec<EntryOutcome>,
}

impl PlanSink for MemoryPlanSink {
    fn write_plan(&mut self, plan: &DedupPlan) -> Result<()> {
        self.plan = Some(plan.clone());
        Ok(())
    }

    fn record_outcome(&mut self, outcome: &EntryOutcome) -> Result<()> {
        self.outcomes.push(outcome.clone());
        Ok(())
    }
}

pub fn open_sink(config: &ArtifactConfig, database: &Path) -> Result<Box<dyn PlanSink>> {
    match config {
        ArtifactConfig::File { path } => Ok(Box::new(FilePlanSink::new(path))),
        ArtifactConfig::Sqlite => Ok(Box::new(SqlitePlanSink::open(database)?)),
    }
}

// ============================================================================
// RESUME
// ============================================================================

/// Latest recorded outcome per plan entry
#[derive(Debug, Default)]
pub struct ResumeState {
    outcomes: HashMap<String, EntryOutcome>,
}

impl ResumeState {
    pub fn from_outcomes<I: IntoIterator<Item = EntryOutcome>>(outcomes: I) -> Self {
        ResumeState {
            outcomes: outcomes
                .into_iter()
                .map(|o| (o.group_id.clone(), o))
                .collect(),
        }
    }

    pub fn outcome(&self, group_id: &str) -> Option<&EntryOutcome> {
        self.outcomes.get(group_id)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Read a file plan and its progress log back for replay
pub fn load_file_plan(path: &Path) -> Result<(DedupPlan, ResumeState)> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan file: {:?}", path))?;
    let plan: DedupPlan = serde_json::from_str(&content).context("Failed to parse plan JSON")?;

    let progress_path = progress_path_for(path);
    let mut outcomes = Vec::new();

    if progress_path.exists() {
        let file = File::open(&progress_path)
            .with_context(|| format!("Failed to open progress log: {:?}", progress_path))?;

        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            // A crash mid-write can leave a torn last line
            match serde_json::from_str::<EntryOutcome>(&line) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("Ignoring unreadable progress line {}: {}", idx + 1, e),
            }
        }
    }

    Ok((plan, ResumeState::from_outcomes(outcomes)))
}
