use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// AFL writes this note into `crashes/`; it is not an input.
const AFL_README: &str = "README.txt";

#[derive(Error, Debug)]
pub enum CorpusError {
    /// An I/O error while enumerating or reading corpus files.
    #[error("Corpus I/O error: {0}")]
    Io(String),

    #[error("Corpus path {0:?} is neither a file nor a directory")]
    InvalidPath(PathBuf),
}

/// One input file, identified by path and content digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusEntry {
    pub path: PathBuf,
    pub digest: [u8; 16],
}

impl CorpusEntry {
    /// Origin id recorded as a block contributor.
    pub fn origin(&self) -> String {
        self.path.display().to_string()
    }
}

/// The ordered list of inputs a batch run replays.
///
/// Files with identical content produce identical traces, so only the first
/// path carrying a given MD5 digest is kept.
#[derive(Debug, Default)]
pub struct InputCorpus {
    entries: Vec<CorpusEntry>,
    known_digests: HashSet<[u8; 16]>,
    duplicates_skipped: usize,
}

impl InputCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn duplicates_skipped(&self) -> usize {
        self.duplicates_skipped
    }

    pub fn iter(&self) -> impl Iterator<Item = &CorpusEntry> {
        self.entries.iter()
    }

    /// Adds one file. Returns `false` if its content was already present.
    pub fn add_file(&mut self, path: &Path) -> Result<bool, CorpusError> {
        let data = fs::read(path)
            .map_err(|e| CorpusError::Io(format!("Failed to read input file {:?}: {}", path, e)))?;
        let digest = md5::compute(&data).0;
        if !self.known_digests.insert(digest) {
            debug!(path = ?path, "skipping duplicate input");
            self.duplicates_skipped += 1;
            return Ok(false);
        }
        self.entries.push(CorpusEntry {
            path: path.to_path_buf(),
            digest,
        });
        Ok(true)
    }

    /// Loads files and the files directly inside directories (not recursive).
    /// Directory entries are taken in name order.
    pub fn load_paths(&mut self, paths: &[PathBuf]) -> Result<usize, CorpusError> {
        let mut loaded_count = 0;
        for path in paths {
            if path.is_file() {
                loaded_count += usize::from(self.add_file(path)?);
            } else if path.is_dir() {
                loaded_count += self.load_dir(path, |_| true)?;
            } else {
                return Err(CorpusError::InvalidPath(path.clone()));
            }
        }
        info!(
            loaded = loaded_count,
            total = self.len(),
            "loaded corpus inputs"
        );
        Ok(loaded_count)
    }

    /// Loads an AFL output directory: its `queue/` and `crashes/` folders, or
    /// those of every fuzzer instance directory below it.
    pub fn load_afl_output(&mut self, afl_dir: &Path) -> Result<usize, CorpusError> {
        let instances = if afl_dir.join("queue").is_dir() {
            vec![afl_dir.to_path_buf()]
        } else {
            sorted_children(afl_dir)?
                .into_iter()
                .filter(|child| child.join("queue").is_dir())
                .collect()
        };

        let mut loaded_count = 0;
        for instance in instances {
            for folder in ["queue", "crashes"] {
                let dir = instance.join(folder);
                if dir.is_dir() {
                    loaded_count += self.load_dir(&dir, |p| {
                        p.file_name().is_some_and(|name| name != AFL_README)
                    })?;
                }
            }
        }
        info!(afl_dir = ?afl_dir, loaded = loaded_count, "loaded AFL output");
        Ok(loaded_count)
    }

    fn load_dir(&mut self, dir: &Path, keep: impl Fn(&Path) -> bool) -> Result<usize, CorpusError> {
        let mut loaded_count = 0;
        for file_path in sorted_children(dir)? {
            if file_path.is_file() && keep(&file_path) {
                loaded_count += usize::from(self.add_file(&file_path)?);
            }
        }
        Ok(loaded_count)
    }
}

fn sorted_children(dir: &Path) -> Result<Vec<PathBuf>, CorpusError> {
    let mut children = Vec::new();
    for entry_result in fs::read_dir(dir)
        .map_err(|e| CorpusError::Io(format!("Failed to read directory {:?}: {}", dir, e)))?
    {
        let entry = entry_result
            .map_err(|e| CorpusError::Io(format!("Error reading entry in {:?}: {}", dir, e)))?;
        children.push(entry.path());
    }
    children.sort();
    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, data: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    #[test]
    fn loads_files_and_directories_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("inputs/b"), b"bbb");
        write(&dir.path().join("inputs/a"), b"aaa");
        write(&dir.path().join("inputs/nested/c"), b"ccc");
        write(&dir.path().join("single"), b"zzz");

        let mut corpus = InputCorpus::new();
        let loaded = corpus
            .load_paths(&[dir.path().join("inputs"), dir.path().join("single")])
            .unwrap();
        assert_eq!(loaded, 3);

        let names: Vec<_> = corpus
            .iter()
            .map(|e| e.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a", "b", "single"]);
    }

    #[test]
    fn duplicate_content_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("one"), b"same");
        write(&dir.path().join("two"), b"same");
        write(&dir.path().join("three"), b"different");

        let mut corpus = InputCorpus::new();
        corpus.load_paths(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.duplicates_skipped(), 1);
        assert_eq!(
            corpus.iter().next().unwrap().digest,
            md5::compute(b"same").0
        );
    }

    #[test]
    fn afl_output_reads_queue_and_crashes_only() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("afl_out");
        write(&out.join("queue/id:000000,orig:seed"), b"seed");
        write(&out.join("crashes/id:000000,sig:11"), b"crash");
        write(&out.join("crashes/README.txt"), b"note");
        write(&out.join("hangs/id:000000"), b"hang");

        let mut corpus = InputCorpus::new();
        assert_eq!(corpus.load_afl_output(&out).unwrap(), 2);
    }

    #[test]
    fn afl_output_with_instance_directories() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("sync");
        write(&out.join("main/queue/id:000000"), b"m");
        write(&out.join("secondary/queue/id:000000"), b"s");
        write(&out.join("secondary/crashes/id:000001"), b"c");

        let mut corpus = InputCorpus::new();
        assert_eq!(corpus.load_afl_output(&out).unwrap(), 3);
    }

    #[test]
    fn missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut corpus = InputCorpus::new();
        assert!(matches!(
            corpus.load_paths(&[dir.path().join("nope")]),
            Err(CorpusError::InvalidPath(_))
        ));
    }
}
