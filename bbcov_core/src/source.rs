//! Slicing a function's source text for display.

use crate::error::{CoverageError, Result};
use crate::model::{CoverageModel, FunctionKey, file_matches};
use std::path::PathBuf;

/// One line of source text with its 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    pub text: String,
    pub line: u32,
    pub file: PathBuf,
}

/// Looks up the text of a function definition.
pub trait FunctionSource {
    /// Returns the lines spanning `function`'s definition, in order.
    fn function_source(&self, function: &FunctionKey) -> Result<Vec<SourceLine>>;
}

/// Derives a function's span from the lines its blocks declare in the
/// function's own file (first to last declared line) and reads that range
/// from disk, resolving relative paths against `source_root`.
pub struct DeclaredSpanSource<'a> {
    model: &'a CoverageModel,
    source_root: PathBuf,
}

impl<'a> DeclaredSpanSource<'a> {
    pub fn new(model: &'a CoverageModel, source_root: impl Into<PathBuf>) -> Self {
        Self {
            model,
            source_root: source_root.into(),
        }
    }

    fn declared_span(&self, function: &FunctionKey) -> Result<Option<(u32, u32)>> {
        let blocks = self
            .model
            .get(function)
            .ok_or_else(|| CoverageError::unknown_function(function))?;
        let mut lines = blocks
            .iter()
            .flat_map(|bb| &bb.lines)
            .filter(|loc| file_matches(&function.file, &loc.file))
            .map(|loc| loc.line)
            .filter(|&line| line > 0);
        let Some(first) = lines.next() else {
            return Ok(None);
        };
        let (mut lo, mut hi) = (first, first);
        for line in lines {
            lo = lo.min(line);
            hi = hi.max(line);
        }
        Ok(Some((lo, hi)))
    }
}

impl FunctionSource for DeclaredSpanSource<'_> {
    fn function_source(&self, function: &FunctionKey) -> Result<Vec<SourceLine>> {
        let Some((first, last)) = self.declared_span(function)? else {
            return Ok(Vec::new());
        };
        let path = self.source_root.join(&function.file);
        let bytes = std::fs::read(&path).map_err(|e| CoverageError::io(&path, e))?;
        let text = String::from_utf8_lossy(&bytes);

        Ok(text
            .lines()
            .enumerate()
            .map(|(idx, text)| (idx as u32 + 1, text))
            .skip_while(|(line, _)| *line < first)
            .take_while(|(line, _)| *line <= last)
            .map(|(line, text)| SourceLine {
                text: text.to_string(),
                line,
                file: path.clone(),
            })
            .collect())
    }
}
