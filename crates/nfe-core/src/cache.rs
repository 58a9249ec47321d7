//! Durable processing cache.
//!
//! The cache remembers, across runs, which inputs were stored successfully
//! and which failed. It is split into named partitions, each an ordered list
//! of [`ParserInput`]s kept in its own JSON file:
//!
//! - [`FACT_SUCCESS`] and [`FULL_SUCCESS`] hold inputs whose rows are stored,
//!   one per processing mode;
//! - [`COULD_NOT_READ`] holds inputs that could not be opened at all;
//! - every other partition is named after a document's display name and
//!   holds inputs of that class whose extraction failed.
//!
//! A partition is loaded fully on first use and rewritten fully on every
//! change, through a temporary file renamed over the old one. Before each
//! change the in-memory list is compared against the file; a file shorter
//! than memory is rewritten and a longer one is merged back into memory.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Captures;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::models::input::ParserInput;
use crate::values::patterns::UNSAFE_FILE_CHARS;

/// Inputs that could not be opened or parsed as XML.
pub const COULD_NOT_READ: &str = "could-not-read";

/// Inputs whose fact row is stored.
pub const FACT_SUCCESS: &str = "fact-success";

/// Inputs whose fact row and line rows are stored.
pub const FULL_SUCCESS: &str = "full-success";

const EXTENSION: &str = "json";

/// Whether `name` is one of the success partitions.
pub fn is_success_partition(name: &str) -> bool {
    name == FACT_SUCCESS || name == FULL_SUCCESS
}

#[derive(Serialize)]
struct PartitionFileRef<'a> {
    name: &'a str,
    entries: &'a [ParserInput],
}

#[derive(Deserialize)]
struct PartitionFile {
    name: String,
    #[serde(default)]
    entries: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct PartitionHeader {
    name: String,
}

/// One named, durable, ordered list of inputs.
#[derive(Debug)]
pub struct Partition {
    name: String,
    path: PathBuf,
    entries: Vec<ParserInput>,
}

impl Partition {
    /// Load the partition `name` from `dir`; a missing file is an empty
    /// partition.
    pub fn open(dir: &Path, name: &str) -> Result<Self, CacheError> {
        let path = dir.join(file_name(name));
        let entries = read_entries(&path, name)?;
        debug!("Loaded partition {} ({} entries)", name, entries.len());

        Ok(Self {
            name: name.to_string(),
            path,
            entries,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// File backing this partition.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[ParserInput] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, input: &ParserInput) -> bool {
        self.entries.contains(input)
    }

    /// Append `input` and persist the partition.
    pub fn add(&mut self, input: ParserInput) -> Result<(), CacheError> {
        self.heal()?;

        if self.contains(&input) {
            return Err(CacheError::AlreadyPresent {
                partition: self.name.clone(),
                input,
            });
        }

        self.entries.push(input);
        self.write()
    }

    /// Remove `input` and persist the partition.
    pub fn remove(&mut self, input: &ParserInput) -> Result<(), CacheError> {
        self.heal()?;

        let Some(pos) = self.entries.iter().position(|e| e == input) else {
            return Err(CacheError::NotFound {
                partition: self.name.clone(),
                input: input.clone(),
            });
        };

        self.entries.remove(pos);
        self.write()
    }

    /// Reconcile memory with the file after an interrupted write.
    fn heal(&mut self) -> Result<(), CacheError> {
        let on_disk = read_entries(&self.path, &self.name)?;

        if on_disk.len() < self.entries.len() {
            warn!(
                "Partition {} has {} entries on disk but {} in memory, rewriting",
                self.name,
                on_disk.len(),
                self.entries.len()
            );
            self.write()?;
        } else if on_disk.len() > self.entries.len() {
            warn!(
                "Partition {} has {} entries on disk but {} in memory, reloading",
                self.name,
                on_disk.len(),
                self.entries.len()
            );
            let mut merged = on_disk;
            for entry in self.entries.drain(..) {
                if !merged.contains(&entry) {
                    merged.push(entry);
                }
            }
            self.entries = merged;
        }

        Ok(())
    }

    fn write(&self) -> Result<(), CacheError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| self.io_error(e))?;

        let file = PartitionFileRef {
            name: &self.name,
            entries: &self.entries,
        };
        serde_json::to_writer_pretty(&mut tmp, &file).map_err(|source| CacheError::Format {
            path: self.path.clone(),
            source,
        })?;
        tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;

        debug!("Wrote partition {} ({} entries)", self.name, self.entries.len());
        Ok(())
    }

    fn io_error(&self, source: io::Error) -> CacheError {
        CacheError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// All partitions under one directory, loaded on demand.
#[derive(Debug)]
pub struct ProcessingCache {
    dir: PathBuf,
    partitions: HashMap<String, Partition>,
}

impl ProcessingCache {
    /// Open the cache rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CacheError::Io {
            path: dir.clone(),
            source,
        })?;

        Ok(Self {
            dir,
            partitions: HashMap::new(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// The partition `name`, loading it on first use.
    pub fn partition(&mut self, name: &str) -> Result<&mut Partition, CacheError> {
        if !self.partitions.contains_key(name) {
            let partition = Partition::open(&self.dir, name)?;
            self.partitions.insert(name.to_string(), partition);
        }

        self.partitions
            .get_mut(name)
            .ok_or_else(|| CacheError::UnknownPartition(name.to_string()))
    }

    pub fn contains(&mut self, name: &str, input: &ParserInput) -> Result<bool, CacheError> {
        Ok(self.partition(name)?.contains(input))
    }

    pub fn add(&mut self, name: &str, input: &ParserInput) -> Result<(), CacheError> {
        self.partition(name)?.add(input.clone())
    }

    pub fn remove(&mut self, name: &str, input: &ParserInput) -> Result<(), CacheError> {
        self.partition(name)?.remove(input)
    }

    /// Add unless already present. Returns whether the partition changed.
    pub fn add_if_absent(&mut self, name: &str, input: &ParserInput) -> Result<bool, CacheError> {
        match self.add(name, input) {
            Ok(()) => Ok(true),
            Err(CacheError::AlreadyPresent { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove if present. Returns whether the partition changed.
    pub fn remove_if_present(
        &mut self,
        name: &str,
        input: &ParserInput,
    ) -> Result<bool, CacheError> {
        match self.remove(name, input) {
            Ok(()) => Ok(true),
            Err(CacheError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Entries of an existing partition, in insertion order.
    pub fn entries(&mut self, name: &str) -> Result<Vec<ParserInput>, CacheError> {
        if !self.is_valid_partition_name(name)? {
            return Err(CacheError::UnknownPartition(name.to_string()));
        }
        Ok(self.partition(name)?.entries().to_vec())
    }

    /// Names of every partition in the cache, sorted.
    pub fn cache_names(&self) -> Result<Vec<String>, CacheError> {
        let io_error = |source: io::Error| CacheError::Io {
            path: self.dir.clone(),
            source,
        };

        let mut names = BTreeSet::new();
        for entry in fs::read_dir(&self.dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }

            let text = fs::read_to_string(&path).map_err(|source| CacheError::Io {
                path: path.clone(),
                source,
            })?;
            match serde_json::from_str::<PartitionHeader>(&text) {
                Ok(header) => {
                    names.insert(header.name);
                }
                Err(e) => warn!("Ignoring unreadable cache file {}: {}", path.display(), e),
            }
        }

        names.extend(
            self.partitions
                .values()
                .filter(|p| !p.is_empty())
                .map(|p| p.name.clone()),
        );

        Ok(names.into_iter().collect())
    }

    /// Whether a partition named `name` exists.
    pub fn is_valid_partition_name(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.cache_names()?.iter().any(|n| n == name))
    }

    /// Remove `input` from every failure partition other than `keep`.
    /// Returns the partitions it was removed from.
    pub fn remove_from_other_failures(
        &mut self,
        keep: &str,
        input: &ParserInput,
    ) -> Result<Vec<String>, CacheError> {
        let mut removed = Vec::new();
        for name in self.cache_names()? {
            if name != keep && !is_success_partition(&name) && self.remove_if_present(&name, input)? {
                removed.push(name);
            }
        }
        Ok(removed)
    }

    /// Every input held by a failure partition or [`COULD_NOT_READ`].
    pub fn failed_inputs(&mut self) -> Result<HashSet<ParserInput>, CacheError> {
        let mut failed = HashSet::new();
        for name in self.cache_names()? {
            if !is_success_partition(&name) {
                failed.extend(self.partition(&name)?.entries().iter().cloned());
            }
        }
        Ok(failed)
    }
}

/// File name for a partition: unsafe characters are percent-encoded so
/// distinct names never share a file.
fn file_name(name: &str) -> String {
    let stem = UNSAFE_FILE_CHARS.replace_all(name, |caps: &Captures| {
        caps[0]
            .bytes()
            .map(|b| format!("%{b:02X}"))
            .collect::<String>()
    });
    format!("{stem}.{EXTENSION}")
}

fn read_entries(path: &Path, name: &str) -> Result<Vec<ParserInput>, CacheError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(CacheError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let file: PartitionFile = serde_json::from_str(&text).map_err(|source| CacheError::Format {
        path: path.to_path_buf(),
        source,
    })?;

    if file.name != name {
        warn!(
            "Cache file {} is labelled {:?}, expected {:?}",
            path.display(),
            file.name,
            name
        );
    }

    file.entries
        .into_iter()
        .map(|value| {
            serde_json::from_value(value.clone()).map_err(|_| CacheError::Corrupt {
                partition: name.to_string(),
                entry: value.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn item(n: u32) -> ParserInput {
        ParserInput::buyer(format!("notas/{n}.xml"))
    }

    fn on_disk(partition: &Partition) -> Vec<ParserInput> {
        read_entries(partition.path(), partition.name()).unwrap()
    }

    #[test]
    fn test_add_and_remove_persist() {
        let dir = TempDir::new().unwrap();
        let mut partition = Partition::open(dir.path(), FACT_SUCCESS).unwrap();
        partition.add(item(1)).unwrap();
        partition.add(item(2)).unwrap();
        partition.remove(&item(1)).unwrap();

        let reopened = Partition::open(dir.path(), FACT_SUCCESS).unwrap();
        assert_eq!(reopened.entries(), &[item(2)]);
    }

    #[test]
    fn test_duplicate_and_missing_entries() {
        let dir = TempDir::new().unwrap();
        let mut partition = Partition::open(dir.path(), "X").unwrap();
        partition.add(item(1)).unwrap();

        assert!(matches!(
            partition.add(item(1)),
            Err(CacheError::AlreadyPresent { .. })
        ));
        assert!(matches!(
            partition.remove(&item(2)),
            Err(CacheError::NotFound { .. })
        ));
        assert_eq!(partition.len(), 1);
    }

    #[test]
    fn test_perspective_is_part_of_identity() {
        let dir = TempDir::new().unwrap();
        let mut partition = Partition::open(dir.path(), "X").unwrap();
        partition.add(ParserInput::buyer("a.xml")).unwrap();
        partition.add(ParserInput::seller("a.xml")).unwrap();
        assert_eq!(partition.len(), 2);
    }

    #[test]
    fn test_heal_after_deleted_file() {
        let dir = TempDir::new().unwrap();
        let mut partition = Partition::open(dir.path(), "X").unwrap();
        for n in 1..=3 {
            partition.add(item(n)).unwrap();
        }

        fs::remove_file(partition.path()).unwrap();
        partition.remove(&item(3)).unwrap();
        assert_eq!(on_disk(&partition), vec![item(1), item(2)]);

        // stale in-memory copy is merged with the longer file
        partition.entries.clear();
        partition.add(item(3)).unwrap();
        assert_eq!(partition.entries(), &[item(1), item(2), item(3)]);
        assert_eq!(on_disk(&partition), vec![item(1), item(2), item(3)]);
    }

    #[test]
    fn test_corrupt_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(file_name("X"));
        fs::write(
            &path,
            r#"{"name":"X","entries":[{"path":"a.xml","perspective":"buyer"},{"path":3}]}"#,
        )
        .unwrap();

        match Partition::open(dir.path(), "X") {
            Err(CacheError::Corrupt { partition, entry }) => {
                assert_eq!(partition, "X");
                assert_eq!(entry, r#"{"path":3}"#);
            }
            other => panic!("expected corrupt partition, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(file_name("X")), "[1, 2").unwrap();
        assert!(matches!(
            Partition::open(dir.path(), "X"),
            Err(CacheError::Format { .. })
        ));
    }

    #[test]
    fn test_file_names_stay_distinct() {
        assert_eq!(file_name("fact-success"), "fact-success.json");
        assert_eq!(file_name("PURCHASE MERC. X"), "PURCHASE MERC%2E X.json");
        assert_ne!(file_name("A/B"), file_name("A.B"));
        assert_eq!(file_name("SALE AÇÃO"), "SALE AÇÃO.json");
    }

    #[test]
    fn test_cache_names() {
        let dir = TempDir::new().unwrap();
        let mut cache = ProcessingCache::open(dir.path()).unwrap();
        cache.add(FACT_SUCCESS, &item(1)).unwrap();
        cache.add("PURCHASE S/A LTDA.", &item(2)).unwrap();

        assert_eq!(
            cache.cache_names().unwrap(),
            vec!["PURCHASE S/A LTDA.".to_string(), FACT_SUCCESS.to_string()]
        );
        assert!(cache.is_valid_partition_name("PURCHASE S/A LTDA.").unwrap());
        assert!(!cache.is_valid_partition_name(COULD_NOT_READ).unwrap());
        assert!(matches!(
            cache.entries(COULD_NOT_READ),
            Err(CacheError::UnknownPartition(_))
        ));
    }

    #[test]
    fn test_idempotent_helpers() {
        let dir = TempDir::new().unwrap();
        let mut cache = ProcessingCache::open(dir.path()).unwrap();
        assert!(cache.add_if_absent(COULD_NOT_READ, &item(1)).unwrap());
        assert!(!cache.add_if_absent(COULD_NOT_READ, &item(1)).unwrap());
        assert!(cache.remove_if_present(COULD_NOT_READ, &item(1)).unwrap());
        assert!(!cache.remove_if_present(COULD_NOT_READ, &item(1)).unwrap());
    }

    #[test]
    fn test_failed_inputs() {
        let dir = TempDir::new().unwrap();
        let mut cache = ProcessingCache::open(dir.path()).unwrap();
        cache.add(FACT_SUCCESS, &item(1)).unwrap();
        cache.add("PURCHASE A", &item(2)).unwrap();
        cache.add(COULD_NOT_READ, &item(3)).unwrap();

        let failed = cache.failed_inputs().unwrap();
        assert_eq!(failed.len(), 2);
        assert!(failed.contains(&item(2)) && failed.contains(&item(3)));
    }

    #[test]
    fn test_add_after_deleted_file_restores_it() {
        let dir = TempDir::new().unwrap();
        let mut partition = Partition::open(dir.path(), "X").unwrap();
        partition.add(item(1)).unwrap();
        partition.add(item(2)).unwrap();

        fs::remove_file(partition.path()).unwrap();
        partition.add(item(3)).unwrap();

        assert_eq!(on_disk(&partition), vec![item(1), item(2), item(3)]);
        let reopened = Partition::open(dir.path(), "X").unwrap();
        assert_eq!(reopened.entries(), &[item(1), item(2), item(3)]);
    }

    #[test]
    fn test_remove_from_other_failures() {
        let dir = TempDir::new().unwrap();
        let mut cache = ProcessingCache::open(dir.path()).unwrap();
        cache.add(COULD_NOT_READ, &item(1)).unwrap();
        cache.add("PURCHASE A", &item(1)).unwrap();
        cache.add(FACT_SUCCESS, &item(1)).unwrap();

        let removed = cache.remove_from_other_failures("PURCHASE A", &item(1)).unwrap();

        assert_eq!(removed, vec![COULD_NOT_READ.to_string()]);
        assert!(cache.contains("PURCHASE A", &item(1)).unwrap());
        assert!(cache.contains(FACT_SUCCESS, &item(1)).unwrap());
        assert!(!cache.contains(COULD_NOT_READ, &item(1)).unwrap());
    }

    #[test]
    fn test_partition_classification() {
        assert!(is_success_partition(FULL_SUCCESS));
        assert!(!is_success_partition(COULD_NOT_READ));
        assert!(!is_success_partition("SALE X"));
    }
}
