//! JSON snapshot of the aggregate model, for resuming without re-running the
//! corpus. Only aggregate hit state (`CovIndex`) is persisted; contributors
//! are not, so a loaded snapshot starts with empty provenance.

use crate::error::{CoverageError, Result};
use crate::model::{BasicBlock, CoverageModel, FunctionKey, SourceLocation, file_matches};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Coverage runtime sources linked into every instrumented binary.
pub const DEFAULT_DENYLIST: &[&str] = &["bbcov_runtime.c", "tracepc_runtime.c", "runtimelib.c"];

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SnapshotBlock {
    #[serde(rename = "Id")]
    pub id: u32,
    #[serde(rename = "CovInfo")]
    pub cov_info: Vec<SourceLocation>,
    #[serde(rename = "CovIndex")]
    pub cov_index: u64,
}

/// `file → function → blocks`.
pub type SnapshotDocument = BTreeMap<String, BTreeMap<String, Vec<SnapshotBlock>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotOptions {
    /// Files left out of dumps, matched exactly or by trailing path components.
    pub denylist: Vec<String>,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            denylist: DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SnapshotOptions {
    pub fn is_denied(&self, file: &str) -> bool {
        self.denylist.iter().any(|d| file_matches(file, d))
    }
}

pub fn dump(model: &CoverageModel, options: &SnapshotOptions) -> SnapshotDocument {
    let mut doc = SnapshotDocument::new();
    for (key, blocks) in model.functions() {
        if options.is_denied(&key.file) {
            continue;
        }
        let entries = blocks
            .iter()
            .map(|bb| SnapshotBlock {
                id: bb.id,
                cov_info: bb.lines.clone(),
                cov_index: bb.hit_count,
            })
            .collect();
        doc.entry(key.file.clone())
            .or_default()
            .insert(key.name.clone(), entries);
    }
    doc
}

pub fn load(doc: &SnapshotDocument) -> CoverageModel {
    CoverageModel::from_functions(doc.iter().flat_map(|(file, functions)| {
        functions.iter().map(move |(name, entries)| {
            let blocks = entries
                .iter()
                .map(|entry| {
                    let mut bb = BasicBlock::new(entry.id, entry.cov_info.clone());
                    bb.hit_count = entry.cov_index;
                    bb.hit = entry.cov_index > 0;
                    bb
                })
                .collect();
            (FunctionKey::new(name.as_str(), file.as_str()), blocks)
        })
    }))
}

pub fn to_json(model: &CoverageModel, options: &SnapshotOptions) -> Result<String> {
    serde_json::to_string_pretty(&dump(model, options))
        .map_err(|e| CoverageError::MalformedSnapshot(e.to_string()))
}

pub fn from_json(json: &str) -> Result<CoverageModel> {
    let doc: SnapshotDocument =
        serde_json::from_str(json).map_err(|e| CoverageError::MalformedSnapshot(e.to_string()))?;
    Ok(load(&doc))
}

pub fn write_snapshot(model: &CoverageModel, options: &SnapshotOptions, path: &Path) -> Result<()> {
    let json = to_json(model, options)?;
    std::fs::write(path, json).map_err(|e| CoverageError::io(path, e))?;
    info!(path = ?path, functions = model.len(), "wrote coverage snapshot");
    Ok(())
}

pub fn read_snapshot(path: &Path) -> Result<CoverageModel> {
    let json = std::fs::read_to_string(path).map_err(|e| CoverageError::io(path, e))?;
    let model = from_json(&json)?;
    info!(path = ?path, functions = model.len(), "resumed from coverage snapshot");
    Ok(model)
}
