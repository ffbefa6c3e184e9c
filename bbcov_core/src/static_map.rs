//! Loader for the static basic-block map emitted by the instrumentation pass.
//!
//! ```json
//! { "parse.c": [ { "Function": "parse",
//!                  "BasicBlocks": [ { "Id": 0, "Coverage": [ { "File": "parse.c", "Line": 10 } ] } ] } ] }
//! ```

use crate::error::{CoverageError, Result};
use crate::model::{BasicBlock, CoverageModel, FunctionKey, SourceLocation};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BlockDescriptor {
    #[serde(rename = "Id")]
    pub id: u32,
    #[serde(rename = "Coverage", default)]
    pub coverage: Vec<SourceLocation>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FunctionDescriptor {
    #[serde(rename = "Function")]
    pub function: String,
    #[serde(rename = "BasicBlocks", default)]
    pub basic_blocks: Vec<BlockDescriptor>,
}

/// Parsed static map: source file → functions declared in it.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct StaticMap {
    pub files: BTreeMap<String, Vec<FunctionDescriptor>>,
}

impl StaticMap {
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CoverageError::MalformedStaticMap(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CoverageError::io(path, e))?;
        Self::parse(&content)
    }

    /// Builds the skeleton: every block unhit, no contributors. Block ids are
    /// taken as given; the merge engine checks them against their position.
    pub fn to_model(&self) -> CoverageModel {
        CoverageModel::from_functions(self.files.iter().flat_map(|(file, functions)| {
            functions.iter().map(move |func| {
                let blocks = func
                    .basic_blocks
                    .iter()
                    .map(|bb| BasicBlock::new(bb.id, bb.coverage.clone()))
                    .collect();
                (FunctionKey::new(func.function.as_str(), file.as_str()), blocks)
            })
        }))
    }
}

impl CoverageModel {
    /// Replaces the whole model with the skeleton described by `map`.
    pub fn load_skeleton(&mut self, map: &StaticMap) {
        *self = map.to_model();
        info!(functions = self.len(), "loaded coverage skeleton");
    }
}

/// Reads and parses a static map file into a fresh model.
pub fn load_static_map_file(path: &Path) -> Result<CoverageModel> {
    let map = StaticMap::from_file(path)?;
    let mut model = CoverageModel::new();
    model.load_skeleton(&map);
    Ok(model)
}
