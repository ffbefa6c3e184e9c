//! The aggregate coverage model and its merge engine.
//!
//! A [`CoverageModel`] is built once from a static map (every block unhit) and
//! then mutated in place by merging decoded runs. Merging is monotone: a block
//! that became hit stays hit until an explicit [`CoverageModel::reset`].

use crate::error::{CoverageError, Result};
use crate::trace::{ProfileRecord, TraceRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use tracing::debug;

/// A single source line, as emitted in the static map's debug info.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceLocation {
    #[serde(rename = "File")]
    pub file: String,
    #[serde(rename = "Line")]
    pub line: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

/// Identifies a function. Two functions with the same name in different files
/// are distinct entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionKey {
    pub file: String,
    pub name: String,
}

impl FunctionKey {
    pub fn new(name: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.file, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    pub id: u32,
    /// Declared once by the static map; merges never touch it.
    pub lines: Vec<SourceLocation>,
    pub hit: bool,
    /// Highest counter observed for this block in any single run.
    pub hit_count: u64,
    /// Run origins that flipped `hit` to true, in first-observation order.
    pub contributors: Vec<String>,
}

impl BasicBlock {
    pub fn new(id: u32, lines: Vec<SourceLocation>) -> Self {
        Self {
            id,
            lines,
            hit: false,
            hit_count: 0,
            contributors: Vec::new(),
        }
    }

    pub fn covers_line(&self, line: u32) -> bool {
        self.lines.iter().any(|loc| loc.line == line)
    }

    /// Folds one run's counter into the block. Returns `true` if this run is
    /// the one that made the block hit.
    fn record(&mut self, count: u64, origin: &str) -> bool {
        if count == 0 {
            return false;
        }
        self.hit_count = self.hit_count.max(count);
        if self.hit {
            return false;
        }
        self.hit = true;
        self.contributors.push(origin.to_string());
        true
    }

    fn clear(&mut self) {
        self.hit = false;
        self.hit_count = 0;
        self.contributors.clear();
    }
}

/// Summary of what one merge call changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub blocks_newly_hit: usize,
    pub functions_touched: usize,
}

impl MergeStats {
    pub fn absorb(&mut self, other: MergeStats) {
        self.blocks_newly_hit += other.blocks_newly_hit;
        self.functions_touched += other.functions_touched;
    }
}

/// Whether `declared` names the file `wanted`, exactly or by trailing path
/// components.
pub(crate) fn file_matches(declared: &str, wanted: &str) -> bool {
    declared == wanted || Path::new(declared).ends_with(wanted)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageModel {
    functions: BTreeMap<FunctionKey, Vec<BasicBlock>>,
    files_by_name: HashMap<String, BTreeSet<String>>,
}

impl CoverageModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a model from already-constructed block lists.
    pub fn from_functions<I>(functions: I) -> Self
    where
        I: IntoIterator<Item = (FunctionKey, Vec<BasicBlock>)>,
    {
        let functions: BTreeMap<_, _> = functions.into_iter().collect();
        let mut files_by_name: HashMap<String, BTreeSet<String>> = HashMap::new();
        for key in functions.keys() {
            files_by_name
                .entry(key.name.clone())
                .or_default()
                .insert(key.file.clone());
        }
        Self {
            functions,
            files_by_name,
        }
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn get(&self, key: &FunctionKey) -> Option<&[BasicBlock]> {
        self.functions.get(key).map(Vec::as_slice)
    }

    pub fn functions(&self) -> impl Iterator<Item = (&FunctionKey, &[BasicBlock])> {
        self.functions
            .iter()
            .map(|(key, blocks)| (key, blocks.as_slice()))
    }

    /// Every function declared under `name`, in file order.
    pub fn functions_named(&self, name: &str) -> Vec<FunctionKey> {
        self.files_by_name
            .get(name)
            .map(|files| {
                files
                    .iter()
                    .map(|file| FunctionKey::new(name, file.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resolves a function by name, optionally narrowed by a file hint.
    ///
    /// The hint matches a file exactly or by trailing path components, so
    /// `parse.c` selects `src/parse.c`.
    pub fn resolve(&self, name: &str, file_hint: Option<&str>) -> Result<FunctionKey> {
        let mut candidates = self.functions_named(name);
        if let Some(hint) = file_hint {
            candidates.retain(|key| file_matches(&key.file, hint));
        }
        match candidates.len() {
            0 => Err(CoverageError::UnknownFunction {
                name: name.to_string(),
                file: file_hint.unwrap_or("<any>").to_string(),
            }),
            1 => Ok(candidates.remove(0)),
            _ => Err(CoverageError::AmbiguousFunction {
                name: name.to_string(),
                candidates,
            }),
        }
    }

    /// Every `(function, block id)` currently hit.
    pub fn hit_blocks(&self) -> BTreeSet<(FunctionKey, u32)> {
        self.functions
            .iter()
            .flat_map(|(key, blocks)| {
                blocks
                    .iter()
                    .filter(|bb| bb.hit)
                    .map(move |bb| (key.clone(), bb.id))
            })
            .collect()
    }

    /// Integrates one decoded run. Either the whole record is applied or, on
    /// error, nothing is.
    pub fn merge(&mut self, record: &TraceRecord, origin: &str) -> Result<MergeStats> {
        match record {
            TraceRecord::Profile(profile) => self.merge_profile(profile, origin),
            TraceRecord::Trace(ids) => {
                let key = self.trace_context()?;
                self.merge_trace_into(&key, ids, origin)
            }
        }
    }

    /// Like [`merge`](Self::merge), but a profile record's valid functions are
    /// applied even when others fail; the failures are returned alongside.
    pub fn merge_lenient(
        &mut self,
        record: &TraceRecord,
        origin: &str,
    ) -> (MergeStats, Vec<CoverageError>) {
        let TraceRecord::Profile(profile) = record else {
            return match self.merge(record, origin) {
                Ok(stats) => (stats, Vec::new()),
                Err(e) => (MergeStats::default(), vec![e]),
            };
        };

        let mut stats = MergeStats::default();
        let mut errors = Vec::new();
        for (file, func, counters) in profile.iter() {
            let key = FunctionKey::new(func, file);
            match self.validate_counters(&key, counters) {
                Ok(()) => stats.absorb(self.apply_counters(&key, counters, origin)),
                Err(e) => errors.push(e),
            }
        }
        (stats, errors)
    }

    pub fn merge_profile(&mut self, profile: &ProfileRecord, origin: &str) -> Result<MergeStats> {
        for (file, func, counters) in profile.iter() {
            self.validate_counters(&FunctionKey::new(func, file), counters)?;
        }

        let mut stats = MergeStats::default();
        for (file, func, counters) in profile.iter() {
            stats.absorb(self.apply_counters(&FunctionKey::new(func, file), counters, origin));
        }
        debug!(origin, ?stats, "merged profile record");
        Ok(stats)
    }

    /// Merges trace-mode ids into an explicitly named function.
    pub fn merge_trace_into(
        &mut self,
        key: &FunctionKey,
        ids: &[u32],
        origin: &str,
    ) -> Result<MergeStats> {
        let blocks = self
            .functions
            .get_mut(key)
            .ok_or_else(|| CoverageError::unknown_function(key))?;

        let mut occurrences: HashMap<u32, u64> = HashMap::new();
        let mut first_seen = Vec::new();
        for &id in ids {
            let position = id as usize;
            let Some(block) = blocks.get(position) else {
                return Err(CoverageError::UnknownBlockId {
                    function: key.clone(),
                    id,
                    block_count: blocks.len(),
                });
            };
            if block.id != id {
                return Err(CoverageError::BlockIdMismatch {
                    function: key.clone(),
                    position,
                    id: block.id,
                });
            }
            let count = occurrences.entry(id).or_insert(0);
            if *count == 0 {
                first_seen.push(id);
            }
            *count = count.saturating_add(1);
        }

        let mut stats = MergeStats {
            blocks_newly_hit: 0,
            functions_touched: usize::from(!ids.is_empty()),
        };
        for id in first_seen {
            if blocks[id as usize].record(occurrences[&id], origin) {
                stats.blocks_newly_hit += 1;
            }
        }
        debug!(origin, function = %key, ids = ids.len(), ?stats, "merged trace record");
        Ok(stats)
    }

    /// Clears all hit state, keeping the block and line topology.
    pub fn reset(&mut self) {
        self.functions
            .values_mut()
            .flat_map(|blocks| blocks.iter_mut())
            .for_each(BasicBlock::clear);
    }

    fn trace_context(&self) -> Result<FunctionKey> {
        let mut keys = self.functions.keys();
        match (keys.next(), keys.next()) {
            (Some(key), None) => Ok(key.clone()),
            _ => Err(CoverageError::AmbiguousTraceContext {
                function_count: self.functions.len(),
            }),
        }
    }

    fn validate_counters(&self, key: &FunctionKey, counters: &[u64]) -> Result<()> {
        let blocks = self
            .functions
            .get(key)
            .ok_or_else(|| CoverageError::unknown_function(key))?;
        if blocks.len() != counters.len() {
            return Err(CoverageError::BlockCountMismatch {
                function: key.clone(),
                expected: blocks.len(),
                actual: counters.len(),
            });
        }
        if let Some((position, bb)) = blocks
            .iter()
            .enumerate()
            .find(|(position, bb)| bb.id as usize != *position)
        {
            return Err(CoverageError::BlockIdMismatch {
                function: key.clone(),
                position,
                id: bb.id,
            });
        }
        Ok(())
    }

    /// Callers must have validated `counters` against `key` first.
    fn apply_counters(&mut self, key: &FunctionKey, counters: &[u64], origin: &str) -> MergeStats {
        let mut stats = MergeStats::default();
        if let Some(blocks) = self.functions.get_mut(key) {
            stats.functions_touched = 1;
            for (block, &count) in blocks.iter_mut().zip(counters) {
                if block.record(count, origin) {
                    stats.blocks_newly_hit += 1;
                }
            }
        }
        stats
    }
}
