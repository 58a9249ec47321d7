//! Ingestion orchestrator.
//!
//! Drives one document at a time through reading, extraction, storage and
//! cache bookkeeping. Re-running over the same inputs is a no-op: success
//! partition members are never reopened, and rows already in storage are
//! never inserted twice.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use glob::{MatchOptions, Pattern, glob_with};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{COULD_NOT_READ, ProcessingCache};
use crate::document::{DocumentHandle, PLACEHOLDER_NAME};
use crate::error::{ExtractionError, NfeError, Result};
use crate::extract::{Extracted, FactExtractor, NfeParser};
use crate::models::config::NfeConfig;
use crate::models::input::{Mode, ParserInput, Perspective};
use crate::models::record::LineRecord;
use crate::store::{FiscalStore, SqliteStore, table_name};

/// Cooperative cancellation flag, checked between documents.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened to one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Already in the mode's success partition; not reopened.
    Skipped,
    /// At least one new row was written.
    Inserted {
        table: String,
        fact: bool,
        lines: usize,
        recovered: bool,
    },
    /// Every extracted row was already stored.
    AlreadyStored { table: String, recovered: bool },
    /// The document could not be opened or parsed as XML.
    CouldNotRead { errors: Vec<ExtractionError> },
    /// Extraction failed; the input was recorded under `partition`.
    Failed {
        partition: String,
        errors: Vec<ExtractionError>,
    },
}

impl Outcome {
    /// Whether the input moved out of a failure partition.
    pub fn recovered(&self) -> bool {
        matches!(
            self,
            Self::Inserted {
                recovered: true,
                ..
            } | Self::AlreadyStored {
                recovered: true,
                ..
            }
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::CouldNotRead { .. } | Self::Failed { .. })
    }
}

/// Counts accumulated over a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Inputs that were opened and run to an outcome.
    pub processed: usize,
    pub inserted: usize,
    pub already_stored: usize,
    /// Includes inputs that could not be read.
    pub failed: usize,
    pub could_not_read: usize,
    pub recovered: usize,
    /// Inputs not opened because the cache already settled them.
    pub skipped: usize,
    /// The batch stopped early on cancellation.
    pub interrupted: bool,
}

impl BatchReport {
    pub fn record(&mut self, outcome: &Outcome) {
        if matches!(outcome, Outcome::Skipped) {
            self.skipped += 1;
            return;
        }

        self.processed += 1;
        match outcome {
            Outcome::Inserted { .. } => self.inserted += 1,
            Outcome::AlreadyStored { .. } => self.already_stored += 1,
            Outcome::CouldNotRead { .. } => self.could_not_read += 1,
            _ => {}
        }
        if outcome.is_failure() {
            self.failed += 1;
        }
        if outcome.recovered() {
            self.recovered += 1;
        }
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: &BatchReport) {
        self.processed += other.processed;
        self.inserted += other.inserted;
        self.already_stored += other.already_stored;
        self.failed += other.failed;
        self.could_not_read += other.could_not_read;
        self.recovered += other.recovered;
        self.skipped += other.skipped;
        self.interrupted |= other.interrupted;
    }
}

/// Enumerate `*.xml` files (any case) directly inside `dir`, sorted.
pub fn list_xml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(NfeError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", dir.display()),
        )));
    }

    let pattern = format!("{}/*.xml", Pattern::escape(&dir.to_string_lossy()));
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::default()
    };

    let mut files = Vec::new();
    for entry in glob_with(&pattern, options)? {
        let path = entry.map_err(glob::GlobError::into_error)?;
        if fs::metadata(&path)?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Processing pipeline over a store and a cache.
pub struct Ingestor<S> {
    store: S,
    cache: ProcessingCache,
    facts: FactExtractor,
}

impl Ingestor<SqliteStore> {
    /// Open the database and cache named by `config`.
    pub fn from_config(config: &NfeConfig) -> Result<Self> {
        if let Some(parent) = config.storage.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let store = SqliteStore::new(&config.storage.database_path)?;
        let cache = ProcessingCache::open(&config.cache.directory)?;
        Ok(Self::new(store, cache).with_total_warnings(config.ingest.warn_on_defaulted_totals))
    }
}

impl<S> Ingestor<S>
where
    S: FiscalStore,
    NfeError: From<S::Error>,
{
    pub fn new(store: S, cache: ProcessingCache) -> Self {
        Self {
            store,
            cache,
            facts: FactExtractor::default(),
        }
    }

    /// Set whether missing totals recorded as zero are logged.
    pub fn with_total_warnings(mut self, warn: bool) -> Self {
        self.facts = FactExtractor::new().with_total_warnings(warn);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&mut self) -> &mut ProcessingCache {
        &mut self.cache
    }

    /// Run one input through the pipeline.
    pub fn process(&mut self, input: &ParserInput, mode: Mode) -> Result<Outcome> {
        if self.cache.contains(mode.success_partition(), input)? {
            debug!("Skipping {}, already stored", input);
            return Ok(Outcome::Skipped);
        }

        let mut handle = DocumentHandle::open(input.clone());
        let extracted = if handle.has_errors() {
            None
        } else {
            NfeParser::new(mode)
                .with_fact_extractor(self.facts.clone())
                .parse(&mut handle)
        };

        match extracted {
            Some(extracted) => self.store_document(input, mode, handle.display_name(), &extracted),
            None => self.record_failure(input, &handle),
        }
    }

    fn store_document(
        &mut self,
        input: &ParserInput,
        mode: Mode,
        display_name: &str,
        extracted: &Extracted,
    ) -> Result<Outcome> {
        let table = table_name(display_name)?;
        self.store.ensure_tables(&table, mode == Mode::Full)?;

        let fact = &extracted.fact;
        let fact_is_new = !self.store.fact_exists(&table, fact.fiscal_key())?;

        // repeated identical lines are stored as often as the document bills them
        let mut distinct: Vec<&LineRecord> = Vec::new();
        let mut new_lines = Vec::new();
        for line in &extracted.lines {
            if distinct.contains(&line) {
                continue;
            }
            distinct.push(line);

            let wanted = extracted.lines.iter().filter(|l| *l == line).count();
            let stored = self.store.count_lines(&table, line)?;
            new_lines.extend(std::iter::repeat_n(line, wanted.saturating_sub(stored)));
        }

        let inserted = fact_is_new || !new_lines.is_empty();
        if inserted {
            self.store
                .insert_document(&table, fact_is_new.then_some(fact), &new_lines)?;
        }

        self.cache.add_if_absent(mode.success_partition(), input)?;

        let mut recovered = false;
        for partition in [COULD_NOT_READ, display_name, PLACEHOLDER_NAME] {
            recovered |= self.cache.remove_if_present(partition, input)?;
        }
        if recovered {
            info!("{} recovered", input);
        }

        if inserted {
            debug!(
                "Stored {} into {} ({} new lines)",
                fact.fiscal_key(),
                table,
                new_lines.len()
            );
            Ok(Outcome::Inserted {
                table,
                fact: fact_is_new,
                lines: new_lines.len(),
                recovered,
            })
        } else {
            debug!("{} already stored in {}", fact.fiscal_key(), table);
            Ok(Outcome::AlreadyStored { table, recovered })
        }
    }

    fn record_failure(&mut self, input: &ParserInput, handle: &DocumentHandle) -> Result<Outcome> {
        let errors = handle.errors().to_vec();
        let unreadable = !errors.is_empty() && errors.iter().all(ExtractionError::is_read_class);

        let partition = if unreadable {
            COULD_NOT_READ
        } else {
            handle.display_name()
        };

        if !self.cache.add_if_absent(partition, input)? {
            debug!("{} already cached under {}", input, partition);
        }
        for previous in self.cache.remove_from_other_failures(partition, input)? {
            debug!("{} moved from {} to {}", input, previous, partition);
        }

        for error in &errors {
            warn!("{}: {}", input, error);
        }

        Ok(if unreadable {
            Outcome::CouldNotRead { errors }
        } else {
            Outcome::Failed {
                partition: partition.to_string(),
                errors,
            }
        })
    }

    /// Process `inputs` in order, stopping early on cancellation.
    pub fn process_inputs<F>(
        &mut self,
        inputs: &[ParserInput],
        mode: Mode,
        cancel: &CancelToken,
        mut on_progress: F,
    ) -> Result<BatchReport>
    where
        F: FnMut(&ParserInput, &Outcome),
    {
        let mut report = BatchReport::default();

        for input in inputs {
            if cancel.is_cancelled() {
                info!("Interrupted after {} inputs", report.processed + report.skipped);
                report.interrupted = true;
                break;
            }

            let outcome = self.process(input, mode)?;
            report.record(&outcome);
            on_progress(input, &outcome);
        }

        Ok(report)
    }

    /// Inputs for `files` that still need processing.
    ///
    /// Members of the mode's success partition are left out, and so are
    /// cached failures when `ignore_cached_failures` is set. Nothing is opened.
    pub fn pending_inputs(
        &mut self,
        files: &[PathBuf],
        perspective: Perspective,
        mode: Mode,
        ignore_cached_failures: bool,
    ) -> Result<Vec<ParserInput>> {
        let settled: HashSet<ParserInput> = self
            .cache
            .partition(mode.success_partition())?
            .entries()
            .iter()
            .cloned()
            .collect();

        let failed = if ignore_cached_failures {
            self.cache.failed_inputs()?
        } else {
            HashSet::new()
        };

        Ok(files
            .iter()
            .map(|path| ParserInput::new(path.clone(), perspective))
            .filter(|input| !settled.contains(input) && !failed.contains(input))
            .collect())
    }

    /// Inputs for `files` recorded in a failure partition or
    /// [`COULD_NOT_READ`] and not yet in the mode's success partition.
    pub fn pending_failed_inputs(
        &mut self,
        files: &[PathBuf],
        perspective: Perspective,
        mode: Mode,
    ) -> Result<Vec<ParserInput>> {
        let failed = self.cache.failed_inputs()?;
        Ok(self
            .pending_inputs(files, perspective, mode, false)?
            .into_iter()
            .filter(|input| failed.contains(input))
            .collect())
    }

    /// Process every XML file in `dir` from one perspective.
    ///
    /// Files left out by [`Ingestor::pending_inputs`] are reported as
    /// [`Outcome::Skipped`].
    pub fn process_directory<F>(
        &mut self,
        dir: &Path,
        perspective: Perspective,
        mode: Mode,
        ignore_cached_failures: bool,
        cancel: &CancelToken,
        on_progress: F,
    ) -> Result<BatchReport>
    where
        F: FnMut(&ParserInput, &Outcome),
    {
        let files = list_xml_files(dir)?;
        let inputs = self.pending_inputs(&files, perspective, mode, ignore_cached_failures)?;
        info!(
            "{} XML files in {}, {} pending as {}",
            files.len(),
            dir.display(),
            inputs.len(),
            perspective
        );
        self.run_files(&files, &inputs, perspective, mode, cancel, on_progress)
    }

    /// Re-attempt only the XML files in `dir` that are cached as failures.
    ///
    /// Inputs that now succeed leave their failure partition.
    pub fn retry_failed_in_directory<F>(
        &mut self,
        dir: &Path,
        perspective: Perspective,
        mode: Mode,
        cancel: &CancelToken,
        on_progress: F,
    ) -> Result<BatchReport>
    where
        F: FnMut(&ParserInput, &Outcome),
    {
        let files = list_xml_files(dir)?;
        let inputs = self.pending_failed_inputs(&files, perspective, mode)?;
        info!(
            "{} of {} XML files in {} cached as failures for {}",
            inputs.len(),
            files.len(),
            dir.display(),
            perspective
        );
        self.run_files(&files, &inputs, perspective, mode, cancel, on_progress)
    }

    fn run_files<F>(
        &mut self,
        files: &[PathBuf],
        inputs: &[ParserInput],
        perspective: Perspective,
        mode: Mode,
        cancel: &CancelToken,
        mut on_progress: F,
    ) -> Result<BatchReport>
    where
        F: FnMut(&ParserInput, &Outcome),
    {
        let selected: HashSet<&ParserInput> = inputs.iter().collect();
        let mut skipped = BatchReport::default();
        for path in files {
            let input = ParserInput::new(path.clone(), perspective);
            if !selected.contains(&input) {
                skipped.record(&Outcome::Skipped);
                on_progress(&input, &Outcome::Skipped);
            }
        }

        let mut report = self.process_inputs(inputs, mode, cancel, &mut on_progress)?;
        report.merge(&skipped);
        Ok(report)
    }

    /// Retry every input recorded in the cache partition `name`.
    pub fn process_cache_partition<F>(
        &mut self,
        name: &str,
        mode: Mode,
        cancel: &CancelToken,
        on_progress: F,
    ) -> Result<BatchReport>
    where
        F: FnMut(&ParserInput, &Outcome),
    {
        let inputs = self.cache.entries(name)?;
        info!("Retrying {} inputs from partition {}", inputs.len(), name);
        self.process_inputs(&inputs, mode, cancel, on_progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FACT_SUCCESS;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_report_counts() {
        let mut report = BatchReport::default();
        report.record(&Outcome::Skipped);
        report.record(&Outcome::Inserted {
            table: "T".into(),
            fact: true,
            lines: 0,
            recovered: true,
        });
        report.record(&Outcome::AlreadyStored {
            table: "T".into(),
            recovered: false,
        });
        report.record(&Outcome::CouldNotRead { errors: vec![] });

        assert_eq!(
            report,
            BatchReport {
                processed: 3,
                inserted: 1,
                already_stored: 1,
                failed: 1,
                could_not_read: 1,
                recovered: 1,
                skipped: 1,
                interrupted: false,
            }
        );
    }

    #[test]
    fn test_list_xml_files_ignores_case_and_other_files() {
        let dir = TempDir::new().unwrap();
        for name in ["b.xml", "a.XML", "notes.txt"] {
            fs::write(dir.path().join(name), "<a/>").unwrap();
        }
        fs::create_dir(dir.path().join("sub.xml")).unwrap();

        let names: Vec<_> = list_xml_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.XML", "b.xml"]);
    }

    #[test]
    fn test_list_xml_files_missing_dir() {
        assert!(list_xml_files(Path::new("/nonexistent/nfe/dir")).is_err());
    }

    #[test]
    fn test_pending_inputs_never_opens_documents() {
        let dir = TempDir::new().unwrap();
        let cache = ProcessingCache::open(dir.path().join("cache")).unwrap();
        let mut ingestor = Ingestor::new(SqliteStore::in_memory().unwrap(), cache);

        let files: Vec<PathBuf> = ["1.xml", "2.xml", "3.xml"].iter().map(PathBuf::from).collect();
        ingestor
            .cache()
            .add(FACT_SUCCESS, &ParserInput::buyer("1.xml"))
            .unwrap();
        ingestor
            .cache()
            .add("PURCHASE X", &ParserInput::buyer("2.xml"))
            .unwrap();

        let pending = ingestor
            .pending_inputs(&files, Perspective::Buyer, Mode::FactOnly, true)
            .unwrap();
        assert_eq!(pending, vec![ParserInput::buyer("3.xml")]);

        let pending = ingestor
            .pending_inputs(&files, Perspective::Buyer, Mode::FactOnly, false)
            .unwrap();
        assert_eq!(pending.len(), 2);

        // success in one mode does not settle the other
        let pending = ingestor
            .pending_inputs(&files, Perspective::Buyer, Mode::Full, false)
            .unwrap();
        assert_eq!(pending.len(), 3);
    }

    #[test]
    fn test_cancelled_batch_stops_before_first_input() {
        let dir = TempDir::new().unwrap();
        let cache = ProcessingCache::open(dir.path()).unwrap();
        let mut ingestor = Ingestor::new(SqliteStore::in_memory().unwrap(), cache);

        let cancel = CancelToken::new();
        cancel.cancel();
        let report = ingestor
            .process_inputs(&[ParserInput::buyer("x.xml")], Mode::FactOnly, &cancel, |_, _| {})
            .unwrap();
        assert!(report.interrupted);
        assert_eq!(report.processed, 0);
    }
}
