//! Views computed from the current model state: line classes, ratios and
//! provenance. Nothing here is cached, since merges keep changing block state.

use crate::error::{CoverageError, Result};
use crate::model::{CoverageModel, FunctionKey, file_matches};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    Covered,
    Uncovered,
    /// Claimed by at least one hit and one unhit block.
    Mixed,
    /// Not declared by any block of the function.
    Unknown,
}

/// Partition of a function's declared lines. The three sets are disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineClassification {
    pub covered: BTreeSet<u32>,
    pub uncovered: BTreeSet<u32>,
    pub mixed: BTreeSet<u32>,
}

impl LineClassification {
    pub fn class_of(&self, line: u32) -> LineClass {
        if self.covered.contains(&line) {
            LineClass::Covered
        } else if self.uncovered.contains(&line) {
            LineClass::Uncovered
        } else if self.mixed.contains(&line) {
            LineClass::Mixed
        } else {
            LineClass::Unknown
        }
    }

    pub fn all_lines(&self) -> BTreeSet<u32> {
        self.covered
            .iter()
            .chain(&self.uncovered)
            .chain(&self.mixed)
            .copied()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSummary {
    pub function: FunctionKey,
    pub covered_blocks: usize,
    pub total_blocks: usize,
    pub ratio: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverageSummary {
    pub functions: Vec<FunctionSummary>,
    pub covered_blocks: usize,
    pub total_blocks: usize,
}

impl CoverageSummary {
    pub fn ratio(&self) -> f64 {
        ratio(self.covered_blocks, self.total_blocks)
    }
}

fn ratio(covered: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        covered as f64 / total as f64
    }
}

impl CoverageModel {
    pub fn classify(&self, function: &FunctionKey) -> Result<LineClassification> {
        let blocks = self
            .get(function)
            .ok_or_else(|| CoverageError::unknown_function(function))?;

        let mut covered = BTreeSet::new();
        let mut uncovered = BTreeSet::new();
        for bb in blocks {
            let target = if bb.hit { &mut covered } else { &mut uncovered };
            target.extend(bb.lines.iter().map(|loc| loc.line));
        }
        let mixed: BTreeSet<u32> = covered.intersection(&uncovered).copied().collect();
        covered.retain(|line| !mixed.contains(line));
        uncovered.retain(|line| !mixed.contains(line));

        Ok(LineClassification {
            covered,
            uncovered,
            mixed,
        })
    }

    pub fn coverage_ratio(&self, function: &FunctionKey) -> Result<f64> {
        let blocks = self
            .get(function)
            .ok_or_else(|| CoverageError::unknown_function(function))?;
        let covered = blocks.iter().filter(|bb| bb.hit).count();
        Ok(ratio(covered, blocks.len()))
    }

    /// Origins responsible for `line` becoming covered. Unknown functions and
    /// lines yield an empty set.
    pub fn files_covering_line(&self, function: &FunctionKey, line: u32) -> BTreeSet<String> {
        self.get(function)
            .into_iter()
            .flatten()
            .filter(|bb| bb.hit && bb.covers_line(line))
            .flat_map(|bb| bb.contributors.iter().cloned())
            .collect()
    }

    /// Functions with a block declared on `line` of `file`, in key order.
    /// `file` matches like the hint of [`CoverageModel::resolve`].
    pub fn functions_at(&self, file: &str, line: u32) -> Vec<FunctionKey> {
        self.functions()
            .filter(|(_, blocks)| {
                blocks
                    .iter()
                    .flat_map(|bb| &bb.lines)
                    .any(|loc| loc.line == line && file_matches(&loc.file, file))
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn summarize(&self) -> CoverageSummary {
        let mut summary = CoverageSummary::default();
        for (key, blocks) in self.functions() {
            let covered_blocks = blocks.iter().filter(|bb| bb.hit).count();
            summary.covered_blocks += covered_blocks;
            summary.total_blocks += blocks.len();
            summary.functions.push(FunctionSummary {
                function: key.clone(),
                covered_blocks,
                total_blocks: blocks.len(),
                ratio: ratio(covered_blocks, blocks.len()),
            });
        }
        summary
    }
}
