//! SQLite-backed persistence for workflow state.
//!
//! Tracks workflow runs, step executions, and assets with versioning. The
//! store is a single-writer interface: every write happens inside a
//! transaction (or a single implicitly-transactional statement) and is
//! flushed before the call returns. Concurrent runners must each open their
//! own store; a `RunStore` handle is never shared.

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;

use chrono::Local;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::ids;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    metadata TEXT DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS workflow_runs (
    id TEXT PRIMARY KEY,
    project_id TEXT,
    recipe_path TEXT NOT NULL,
    recipe_name TEXT,
    status TEXT DEFAULT 'pending',
    inputs TEXT DEFAULT '{}',
    outputs TEXT DEFAULT '{}',
    error_message TEXT,
    started_at TIMESTAMP,
    completed_at TIMESTAMP,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    run_directory TEXT,
    FOREIGN KEY (project_id) REFERENCES projects(id)
);

CREATE TABLE IF NOT EXISTS step_executions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    step_id TEXT NOT NULL,
    step_name TEXT,
    status TEXT DEFAULT 'pending',
    inputs TEXT DEFAULT '{}',
    outputs TEXT DEFAULT '{}',
    error_message TEXT,
    started_at TIMESTAMP,
    completed_at TIMESTAMP,
    FOREIGN KEY (run_id) REFERENCES workflow_runs(id),
    UNIQUE(run_id, step_id)
);

CREATE TABLE IF NOT EXISTS assets (
    id TEXT PRIMARY KEY,
    project_id TEXT,
    run_id TEXT,
    asset_type TEXT NOT NULL,
    name TEXT NOT NULL,
    file_path TEXT NOT NULL,
    file_hash TEXT,
    file_size INTEGER,
    metadata TEXT DEFAULT '{}',
    tags TEXT DEFAULT '[]',
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (project_id) REFERENCES projects(id),
    FOREIGN KEY (run_id) REFERENCES workflow_runs(id)
);

CREATE TABLE IF NOT EXISTS asset_versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    asset_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    file_path TEXT NOT NULL,
    file_hash TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    notes TEXT,
    FOREIGN KEY (asset_id) REFERENCES assets(id),
    UNIQUE(asset_id, version)
);

CREATE INDEX IF NOT EXISTS idx_runs_project ON workflow_runs(project_id);
CREATE INDEX IF NOT EXISTS idx_runs_status ON workflow_runs(status);
CREATE INDEX IF NOT EXISTS idx_steps_run ON step_executions(run_id);
CREATE INDEX IF NOT EXISTS idx_assets_project ON assets(project_id);
CREATE INDEX IF NOT EXISTS idx_assets_type ON assets(asset_type);
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<RunStatus> {
        match s {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: String,
    pub project_id: Option<String>,
    pub recipe_path: String,
    pub recipe_name: Option<String>,
    pub status: RunStatus,
    pub inputs: Value,
    pub outputs: Value,
    pub error_message: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: Option<String>,
    pub run_directory: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub run_id: String,
    pub step_id: String,
    pub step_name: Option<String>,
    pub status: RunStatus,
    pub inputs: Value,
    pub outputs: Value,
    pub error_message: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetRecord {
    pub id: String,
    pub project_id: Option<String>,
    pub run_id: Option<String>,
    pub asset_type: String,
    pub name: String,
    pub file_path: String,
    pub file_hash: Option<String>,
    pub file_size: Option<i64>,
    pub metadata: Value,
    pub tags: Vec<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetVersion {
    pub asset_id: String,
    pub version: i64,
    pub file_path: String,
    pub file_hash: Option<String>,
    pub notes: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunCounters {
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub runs: RunCounters,
}

/// SQLite-backed store of workflow runs, step executions, and assets.
pub struct RunStore {
    conn: Connection,
}

impl RunStore {
    /// Open (creating if necessary) the store at the given path.
    pub fn open(db_path: &Path) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// In-memory store; used by tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // --- Run management ---

    /// Create a new `running` run record and return its id.
    pub fn start_run(
        &mut self,
        recipe_path: &str,
        inputs: &Value,
        project_id: Option<&str>,
        run_directory: Option<&str>,
    ) -> StoreResult<String> {
        let run_id = ids::new_id();
        let recipe_name = Path::new(recipe_path)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string());
        let now = now_local();

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO workflow_runs
             (id, project_id, recipe_path, recipe_name, status, inputs,
              started_at, created_at, run_directory)
             VALUES (?1, ?2, ?3, ?4, 'running', ?5, ?6, ?6, ?7)",
            params![
                run_id,
                project_id,
                recipe_path,
                recipe_name,
                serde_json::to_string(inputs)?,
                now,
                run_directory,
            ],
        )?;
        if let Some(project_id) = project_id {
            tx.execute(
                "UPDATE projects SET updated_at = ?1 WHERE id = ?2",
                params![now, project_id],
            )?;
        }
        tx.commit()?;
        Ok(run_id)
    }

    pub fn complete_run(
        &mut self,
        run_id: &str,
        outputs: &Value,
        status: RunStatus,
    ) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE workflow_runs
             SET status = ?1, outputs = ?2, completed_at = ?3
             WHERE id = ?4",
            params![
                status.as_str(),
                serde_json::to_string(outputs)?,
                now_local(),
                run_id
            ],
        )?;
        Ok(())
    }

    pub fn fail_run(&mut self, run_id: &str, error_message: &str) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE workflow_runs
             SET status = 'failed', error_message = ?1, completed_at = ?2
             WHERE id = ?3",
            params![error_message, now_local(), run_id],
        )?;
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> StoreResult<Option<RunRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, project_id, recipe_path, recipe_name, status, inputs,
                        outputs, error_message, started_at, completed_at, created_at,
                        run_directory
                 FROM workflow_runs WHERE id = ?1",
                params![run_id],
                row_to_run,
            )
            .optional()?;
        Ok(record)
    }

    /// Recent runs, newest first, optionally filtered by project and status.
    pub fn list_runs(
        &self,
        project_id: Option<&str>,
        status: Option<RunStatus>,
        limit: usize,
    ) -> StoreResult<Vec<RunRecord>> {
        let mut sql = String::from(
            "SELECT id, project_id, recipe_path, recipe_name, status, inputs,
                    outputs, error_message, started_at, completed_at, created_at,
                    run_directory
             FROM workflow_runs WHERE 1=1",
        );
        let mut binds: Vec<rusqlite::types::Value> = Vec::new();
        if let Some(project_id) = project_id {
            sql.push_str(" AND project_id = ?");
            binds.push(project_id.to_string().into());
        }
        if let Some(status) = status {
            sql.push_str(" AND status = ?");
            binds.push(status.as_str().to_string().into());
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?");
        binds.push((limit as i64).into());

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(binds), row_to_run)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    // --- Step tracking ---

    /// Record that a step started. Re-entry of the same `(run_id, step_id)`
    /// replaces the prior attempt atomically.
    pub fn start_step(
        &mut self,
        run_id: &str,
        step_id: &str,
        step_name: &str,
        inputs: &Value,
    ) -> StoreResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO step_executions
             (run_id, step_id, step_name, status, inputs, started_at)
             VALUES (?1, ?2, ?3, 'running', ?4, ?5)",
            params![
                run_id,
                step_id,
                step_name,
                serde_json::to_string(inputs)?,
                now_local()
            ],
        )?;
        Ok(())
    }

    pub fn complete_step(&mut self, run_id: &str, step_id: &str, outputs: &Value) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE step_executions
             SET status = 'completed', outputs = ?1, completed_at = ?2
             WHERE run_id = ?3 AND step_id = ?4",
            params![serde_json::to_string(outputs)?, now_local(), run_id, step_id],
        )?;
        Ok(())
    }

    pub fn fail_step(&mut self, run_id: &str, step_id: &str, error_message: &str) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE step_executions
             SET status = 'failed', error_message = ?1, completed_at = ?2
             WHERE run_id = ?3 AND step_id = ?4",
            params![error_message, now_local(), run_id, step_id],
        )?;
        Ok(())
    }

    pub fn get_step(&self, run_id: &str, step_id: &str) -> StoreResult<Option<StepRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT run_id, step_id, step_name, status, inputs, outputs,
                        error_message, started_at, completed_at
                 FROM step_executions WHERE run_id = ?1 AND step_id = ?2",
                params![run_id, step_id],
                row_to_step,
            )
            .optional()?;
        Ok(record)
    }

    /// Outputs of every completed step of a run, keyed by step id.
    pub fn get_completed_steps(&self, run_id: &str) -> StoreResult<HashMap<String, Value>> {
        let mut stmt = self.conn.prepare(
            "SELECT step_id, outputs FROM step_executions
             WHERE run_id = ?1 AND status = 'completed'",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            let step_id: String = row.get(0)?;
            let outputs = parse_json_column(row, 1)?;
            Ok((step_id, outputs))
        })?;
        let mut steps = HashMap::new();
        for row in rows {
            let (step_id, outputs) = row?;
            steps.insert(step_id, outputs);
        }
        Ok(steps)
    }

    // --- Asset management ---

    /// Register a file as an asset: hashes and sizes it, then writes the
    /// asset row and its version-1 row in a single transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn register_asset(
        &mut self,
        file_path: &Path,
        asset_type: &str,
        name: Option<&str>,
        project_id: Option<&str>,
        run_id: Option<&str>,
        metadata: Option<&Value>,
        tags: Option<&[String]>,
    ) -> StoreResult<String> {
        let asset_id = ids::new_id();
        let name = match name {
            Some(name) => name.to_string(),
            None => file_path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| file_path.to_string_lossy().to_string()),
        };
        let file_hash = if file_path.exists() {
            Some(hash_file(file_path)?)
        } else {
            None
        };
        let file_size = fs::metadata(file_path).map(|m| m.len() as i64).ok();
        let metadata = metadata.cloned().unwrap_or_else(|| Value::Object(Default::default()));
        let tags = tags.unwrap_or_default();
        let now = now_local();

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO assets
             (id, project_id, run_id, asset_type, name, file_path,
              file_hash, file_size, metadata, tags, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                asset_id,
                project_id,
                run_id,
                asset_type,
                name,
                file_path.to_string_lossy().to_string(),
                file_hash,
                file_size,
                serde_json::to_string(&metadata)?,
                serde_json::to_string(tags)?,
                now,
            ],
        )?;
        tx.execute(
            "INSERT INTO asset_versions (asset_id, version, file_path, file_hash, created_at)
             VALUES (?1, 1, ?2, ?3, ?4)",
            params![asset_id, file_path.to_string_lossy().to_string(), file_hash, now],
        )?;
        tx.commit()?;
        Ok(asset_id)
    }

    pub fn get_asset(&self, asset_id: &str) -> StoreResult<Option<AssetRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, project_id, run_id, asset_type, name, file_path,
                        file_hash, file_size, metadata, tags, created_at
                 FROM assets WHERE id = ?1",
                params![asset_id],
                row_to_asset,
            )
            .optional()?;
        Ok(record)
    }

    pub fn list_asset_versions(&self, asset_id: &str) -> StoreResult<Vec<AssetVersion>> {
        let mut stmt = self.conn.prepare(
            "SELECT asset_id, version, file_path, file_hash, notes, created_at
             FROM asset_versions WHERE asset_id = ?1 ORDER BY version",
        )?;
        let rows = stmt.query_map(params![asset_id], |row| {
            Ok(AssetVersion {
                asset_id: row.get(0)?,
                version: row.get(1)?,
                file_path: row.get(2)?,
                file_hash: row.get(3)?,
                notes: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;
        let mut versions = Vec::new();
        for row in rows {
            versions.push(row?);
        }
        Ok(versions)
    }

    // --- Statistics ---

    pub fn get_stats(&self, project_id: Option<&str>) -> StoreResult<Stats> {
        let (filter, binds): (&str, Vec<rusqlite::types::Value>) = match project_id {
            Some(project_id) => ("WHERE project_id = ?", vec![project_id.to_string().into()]),
            None => ("WHERE 1=1", Vec::new()),
        };
        let sql = format!(
            "SELECT COUNT(*) AS total,
                    COALESCE(SUM(CASE WHEN status='completed' THEN 1 ELSE 0 END), 0) AS completed,
                    COALESCE(SUM(CASE WHEN status='failed' THEN 1 ELSE 0 END), 0) AS failed
             FROM workflow_runs {filter}"
        );
        let counters = self.conn.query_row(
            &sql,
            rusqlite::params_from_iter(binds),
            |row| {
                Ok(RunCounters {
                    total: row.get(0)?,
                    completed: row.get(1)?,
                    failed: row.get(2)?,
                })
            },
        )?;
        Ok(Stats { runs: counters })
    }
}

// --- Row mapping ---

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let status: String = row.get(4)?;
    Ok(RunRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        recipe_path: row.get(2)?,
        recipe_name: row.get(3)?,
        status: RunStatus::parse(&status).unwrap_or(RunStatus::Pending),
        inputs: parse_json_column(row, 5)?,
        outputs: parse_json_column(row, 6)?,
        error_message: row.get(7)?,
        started_at: row.get(8)?,
        completed_at: row.get(9)?,
        created_at: row.get(10)?,
        run_directory: row.get(11)?,
    })
}

fn row_to_step(row: &Row<'_>) -> rusqlite::Result<StepRecord> {
    let status: String = row.get(3)?;
    Ok(StepRecord {
        run_id: row.get(0)?,
        step_id: row.get(1)?,
        step_name: row.get(2)?,
        status: RunStatus::parse(&status).unwrap_or(RunStatus::Pending),
        inputs: parse_json_column(row, 4)?,
        outputs: parse_json_column(row, 5)?,
        error_message: row.get(6)?,
        started_at: row.get(7)?,
        completed_at: row.get(8)?,
    })
}

fn row_to_asset(row: &Row<'_>) -> rusqlite::Result<AssetRecord> {
    let tags = parse_json_column(row, 9)?;
    let tags = tags
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    Ok(AssetRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        run_id: row.get(2)?,
        asset_type: row.get(3)?,
        name: row.get(4)?,
        file_path: row.get(5)?,
        file_hash: row.get(6)?,
        file_size: row.get(7)?,
        metadata: parse_json_column(row, 8)?,
        tags,
        created_at: row.get(10)?,
    })
}

fn parse_json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}

/// Wall-clock stamp applied at the store boundary. Microsecond precision so
/// `ORDER BY created_at` stays stable for runs created in the same second.
fn now_local() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// First 16 hex characters of the file's SHA-256.
fn hash_file(path: &Path) -> StoreResult<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    Ok(hex[..16].to_string())
}
