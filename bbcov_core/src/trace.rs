//! Decoders for the raw per-run trace files written by the coverage runtime.
//!
//! Both layouts are produced by a target that may be killed mid-write (crash,
//! timeout, signal), so end-of-stream in the middle of a value is treated as a
//! clean stop and never as an error. Declared lengths are honoured exactly but
//! never used to pre-allocate: buffers only grow with bytes actually present.

use crate::error::{CoverageError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Which runtime produced the trace, and therefore which layout to decode.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TraceMode {
    /// Ordered stream of visited block ids (presence only).
    Trace,
    /// Per-function arrays of saturating hit counters.
    #[default]
    Profile,
}

impl fmt::Display for TraceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceMode::Trace => write!(f, "trace"),
            TraceMode::Profile => write!(f, "profile"),
        }
    }
}

impl FromStr for TraceMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" | "tracepc" => Ok(TraceMode::Trace),
            "profile" | "bbcov" => Ok(TraceMode::Profile),
            other => Err(format!("Unknown mode '{other}'. Expected 'trace' or 'profile'")),
        }
    }
}

/// Hit counters of one run, grouped by source file then function name.
///
/// Counter position is the block id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileRecord {
    files: BTreeMap<String, BTreeMap<String, Vec<u64>>>,
}

impl ProfileRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the counters for `function` in `file`.
    pub fn insert(
        &mut self,
        file: impl Into<String>,
        function: impl Into<String>,
        counters: Vec<u64>,
    ) {
        self.files
            .entry(file.into())
            .or_default()
            .insert(function.into(), counters);
    }

    pub fn counters(&self, file: &str, function: &str) -> Option<&[u64]> {
        self.files
            .get(file)
            .and_then(|funcs| funcs.get(function))
            .map(Vec::as_slice)
    }

    /// Iterates `(file, function, counters)` triples.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &[u64])> {
        self.files.iter().flat_map(|(file, funcs)| {
            funcs
                .iter()
                .map(move |(func, counters)| (file.as_str(), func.as_str(), counters.as_slice()))
        })
    }

    pub fn function_count(&self) -> usize {
        self.files.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.function_count() == 0
    }
}

/// One decoded run. Transient: it is merged into a model and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceRecord {
    Trace(Vec<u32>),
    Profile(ProfileRecord),
}

impl TraceRecord {
    pub fn mode(&self) -> TraceMode {
        match self {
            TraceRecord::Trace(_) => TraceMode::Trace,
            TraceRecord::Profile(_) => TraceMode::Profile,
        }
    }
}

/// Decodes `reader` with the layout selected by `mode`.
pub fn decode<R: Read>(mode: TraceMode, reader: R) -> Result<TraceRecord> {
    match mode {
        TraceMode::Trace => decode_trace(reader).map(TraceRecord::Trace),
        TraceMode::Profile => decode_profile(reader).map(TraceRecord::Profile),
    }
}

/// Reads a trace file from disk and decodes it.
pub fn decode_file(mode: TraceMode, path: &Path) -> Result<TraceRecord> {
    let file = File::open(path).map_err(|e| CoverageError::io(path, e))?;
    let record = decode(mode, BufReader::new(file)).map_err(|e| match e {
        CoverageError::Io { source, .. } => CoverageError::io(path, source),
        other => other,
    })?;
    debug!(path = ?path, %mode, "decoded trace file");
    Ok(record)
}

/// Decodes a stream of 4-byte host-endian block ids.
pub fn decode_trace<R: Read>(mut reader: R) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    while let Some(id) = read_u32(&mut reader)? {
        ids.push(id);
    }
    Ok(ids)
}

/// Decodes a stream of profile records (see the module docs for leniency rules).
pub fn decode_profile<R: Read>(mut reader: R) -> Result<ProfileRecord> {
    let mut record = ProfileRecord::new();

    'files: while let Some(file_name_len) = read_u32(&mut reader)? {
        let Some(file_name) = read_name(&mut reader, file_name_len)? else {
            break;
        };
        if file_name.is_empty() {
            break;
        }
        let Some(num_functions) = read_u32(&mut reader)? else {
            break;
        };

        for _ in 0..num_functions {
            let Some(func_name_len) = read_u32(&mut reader)? else {
                break 'files;
            };
            if func_name_len == 0 {
                break;
            }
            let Some(func_name) = read_name(&mut reader, func_name_len)? else {
                break 'files;
            };
            let Some(counter_count) = read_u32(&mut reader)? else {
                break 'files;
            };

            let mut counters = Vec::new();
            for _ in 0..counter_count {
                match read_u64(&mut reader)? {
                    Some(counter) => counters.push(counter),
                    None => {
                        debug!(
                            file = %file_name,
                            function = %func_name,
                            declared = counter_count,
                            read = counters.len(),
                            "counter array cut short, dropping function"
                        );
                        break 'files;
                    }
                }
            }
            record.insert(file_name.clone(), func_name, counters);
        }
    }

    Ok(record)
}

/// Fills `buf` completely, or returns `false` if the stream ends first.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(CoverageError::io("<trace stream>", e)),
        }
    }
    Ok(true)
}

fn read_u32<R: Read>(reader: &mut R) -> Result<Option<u32>> {
    let mut buf = [0u8; 4];
    if !read_full(reader, &mut buf)? {
        return Ok(None);
    }
    Ok(Some(u32::from_ne_bytes(buf)))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<Option<u64>> {
    let mut buf = [0u8; 8];
    if !read_full(reader, &mut buf)? {
        return Ok(None);
    }
    Ok(Some(u64::from_ne_bytes(buf)))
}

/// Reads exactly `len` name bytes; `None` if the stream ends first.
fn read_name<R: Read>(reader: &mut R, len: u32) -> Result<Option<String>> {
    let mut bytes = Vec::new();
    reader
        .by_ref()
        .take(u64::from(len))
        .read_to_end(&mut bytes)
        .map_err(|e| CoverageError::io("<trace stream>", e))?;
    if bytes.len() < len as usize {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FunctionKey;
    use crate::model::tests::parse_model;
    use std::io::Cursor;

    fn ids_bytes(ids: &[u32]) -> Vec<u8> {
        ids.iter().flat_map(|id| id.to_ne_bytes()).collect()
    }

    fn push_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_ne_bytes());
    }

    fn push_function(buf: &mut Vec<u8>, name: &str, counters: &[u64]) {
        push_u32(buf, name.len() as u32);
        buf.extend_from_slice(name.as_bytes());
        push_u32(buf, counters.len() as u32);
        for c in counters {
            buf.extend_from_slice(&c.to_ne_bytes());
        }
    }

    fn push_file_header(buf: &mut Vec<u8>, file: &str, num_functions: u32) {
        push_u32(buf, file.len() as u32);
        buf.extend_from_slice(file.as_bytes());
        push_u32(buf, num_functions);
    }

    #[test]
    fn trace_stream_truncated_mid_value_keeps_complete_ids() {
        let mut bytes = ids_bytes(&[3, 1, 4, 1]);
        bytes.truncate(8 + 2);
        let ids = decode_trace(Cursor::new(bytes)).unwrap();
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn trace_stream_empty_is_empty_record() {
        let record = decode(TraceMode::Trace, Cursor::new(Vec::new())).unwrap();
        assert_eq!(record, TraceRecord::Trace(Vec::new()));
    }

    #[test]
    fn zero_padded_trace_file_reads_as_block_zero_hits() {
        // The trace runtime leaves its fixed-size file zero-padded past the last id.
        let mut bytes = ids_bytes(&[1]);
        bytes.resize(10_000, 0);
        let ids = decode_trace(Cursor::new(bytes)).unwrap();
        assert_eq!(ids.len(), 2500);
        assert_eq!(ids[0], 1);
        assert!(ids[1..].iter().all(|&id| id == 0));

        let mut model = parse_model();
        let stats = model.merge(&TraceRecord::Trace(ids), "padded").unwrap();
        assert_eq!(stats.blocks_newly_hit, 2);
        let blocks = model.get(&FunctionKey::new("parse", "parse.c")).unwrap();
        assert!(blocks[0].hit);
        assert_eq!(blocks[0].hit_count, 2499);
    }

    #[test]
    fn profile_stream_decodes_multiple_files() {
        let mut bytes = Vec::new();
        push_file_header(&mut bytes, "parse.c", 2);
        push_function(&mut bytes, "parse", &[1, 0]);
        push_function(&mut bytes, "lex", &[0, 0, 7]);
        push_file_header(&mut bytes, "main.c", 1);
        push_function(&mut bytes, "main", &[u64::MAX]);

        let record = decode_profile(Cursor::new(bytes)).unwrap();
        assert_eq!(record.function_count(), 3);
        assert_eq!(record.counters("parse.c", "parse"), Some(&[1, 0][..]));
        assert_eq!(record.counters("parse.c", "lex"), Some(&[0, 0, 7][..]));
        assert_eq!(record.counters("main.c", "main"), Some(&[u64::MAX][..]));
    }

    #[test]
    fn profile_stream_cut_inside_counters_drops_only_that_function() {
        let mut bytes = Vec::new();
        push_file_header(&mut bytes, "parse.c", 2);
        push_function(&mut bytes, "parse", &[1, 0]);
        push_function(&mut bytes, "lex", &[5, 6, 7]);
        bytes.truncate(bytes.len() - 12);

        let record = decode_profile(Cursor::new(bytes)).unwrap();
        assert_eq!(record.function_count(), 1);
        assert_eq!(record.counters("parse.c", "parse"), Some(&[1, 0][..]));
        assert!(record.counters("parse.c", "lex").is_none());
    }

    #[test]
    fn profile_stream_cut_inside_file_name_is_clean_stop() {
        let mut bytes = Vec::new();
        push_file_header(&mut bytes, "parse.c", 1);
        push_function(&mut bytes, "parse", &[1]);
        push_u32(&mut bytes, 40);
        bytes.extend_from_slice(b"trunc");

        let record = decode_profile(Cursor::new(bytes)).unwrap();
        assert_eq!(record.function_count(), 1);
    }

    #[test]
    fn profile_empty_function_name_ends_function_loop_only() {
        let mut bytes = Vec::new();
        push_file_header(&mut bytes, "a.c", 3);
        push_function(&mut bytes, "first", &[1]);
        push_u32(&mut bytes, 0);
        push_file_header(&mut bytes, "b.c", 1);
        push_function(&mut bytes, "second", &[2]);

        let record = decode_profile(Cursor::new(bytes)).unwrap();
        assert_eq!(record.counters("a.c", "first"), Some(&[1][..]));
        assert_eq!(record.counters("b.c", "second"), Some(&[2][..]));
    }

    #[test]
    fn profile_zero_length_file_name_terminates_stream() {
        let mut bytes = Vec::new();
        push_u32(&mut bytes, 0);
        push_file_header(&mut bytes, "a.c", 1);
        push_function(&mut bytes, "f", &[1]);

        let record = decode_profile(Cursor::new(bytes)).unwrap();
        assert!(record.is_empty());
    }

    #[test]
    fn profile_huge_declared_length_does_not_allocate_up_front() {
        let mut bytes = Vec::new();
        push_u32(&mut bytes, u32::MAX);
        bytes.extend_from_slice(b"abc");
        let record = decode_profile(Cursor::new(bytes)).unwrap();
        assert!(record.is_empty());
    }

    #[test]
    fn decode_file_reports_missing_file_as_io() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.bc_cov");
        match decode_file(TraceMode::Profile, &missing) {
            Err(CoverageError::Io { path, .. }) => assert_eq!(path, missing),
            other => panic!("Expected Io error, got {other:?}"),
        }
    }

    #[test]
    fn mode_parses_runtime_aliases() {
        assert_eq!("tracepc".parse::<TraceMode>().unwrap(), TraceMode::Trace);
        assert_eq!("BBCOV".parse::<TraceMode>().unwrap(), TraceMode::Profile);
        assert!("both".parse::<TraceMode>().is_err());
    }
}
