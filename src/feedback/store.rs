// Append-only record store
//
// One JSON object per line. Appends take an exclusive advisory lock so two
// processes writing at once cannot lose each other's records; reads take a
// shared lock. Files in the older whole-array format are migrated on open.

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::record::{FeedbackRecord, PreferenceRecord};

/// Store of user ratings
pub type FeedbackStore = RecordStore<FeedbackRecord>;

/// Store of user candidate choices
pub type PreferenceStore = RecordStore<PreferenceRecord>;

/// JSON Lines file holding records of type `T`
#[derive(Debug, Clone)]
pub struct RecordStore<T> {
    path: PathBuf,
    _record: PhantomData<fn() -> T>,
}

impl<T> RecordStore<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Open a store. The file is created lazily on the first append.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            path: path.into(),
            _record: PhantomData,
        };
        store.migrate_legacy_array()?;
        if let Some(legacy) = store.legacy_sibling() {
            warn!(
                store = %store.path.display(),
                legacy = %legacy.display(),
                "Found a legacy JSON array store next to this one; its records are not read. \
                 Point the store path at it once to migrate it"
            );
        }
        Ok(store)
    }

    /// `<name>.json` beside a `<name>.jsonl` store, if one exists
    pub fn legacy_sibling(&self) -> Option<PathBuf> {
        if self.path.extension()? != "jsonl" {
            return None;
        }
        let legacy = self.path.with_extension("json");
        legacy.is_file().then_some(legacy)
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and return the record count afterwards
    pub fn append(&self, record: &T) -> Result<usize> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create store directory: {}", parent.display())
                })?;
            }
        }

        let line = serde_json::to_string(record).context("Failed to serialize record")?;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open store: {}", self.path.display()))?;

        file.lock_exclusive()
            .with_context(|| format!("Failed to lock store: {}", self.path.display()))?;

        let result = (|| -> Result<usize> {
            writeln!(file, "{}", line).context("Failed to append record")?;
            file.flush()?;
            count_records::<T>(&self.path)
        })();

        file.unlock().ok();
        let count = result?;

        debug!(store = %self.path.display(), count, "Appended record");
        Ok(count)
    }

    /// Read every record.
    ///
    /// A missing file is an empty store. Lines that do not parse are skipped
    /// with a warning so one corrupt write cannot hide the rest of the data.
    pub fn load(&self) -> Result<Vec<T>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to open store: {}", self.path.display()))
            }
        };

        file.lock_shared()
            .with_context(|| format!("Failed to lock store: {}", self.path.display()))?;

        let result = (|| -> Result<Vec<T>> {
            let mut records = Vec::new();
            for (index, line) in BufReader::new(&file).lines().enumerate() {
                let line = line.context("Failed to read store")?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<T>(&line) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(
                        store = %self.path.display(),
                        line = index + 1,
                        error = %e,
                        "Skipping malformed record"
                    ),
                }
            }
            Ok(records)
        })();

        file.unlock().ok();
        result
    }

    /// Number of stored records
    pub fn len(&self) -> Result<usize> {
        Ok(self.load()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Rewrite a whole-array JSON file as JSON Lines.
    ///
    /// An array that does not parse is treated as an empty store and moved
    /// aside to `<file>.corrupt` rather than silently overwritten.
    fn migrate_legacy_array(&self) -> Result<()> {
        let mut file = match OpenOptions::new().read(true).write(true).open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to open store: {}", self.path.display()))
            }
        };

        file.lock_exclusive()
            .with_context(|| format!("Failed to lock store: {}", self.path.display()))?;

        let result = (|| -> Result<()> {
            let mut contents = String::new();
            file.read_to_string(&mut contents)
                .context("Failed to read store")?;

            if !contents.trim_start().starts_with('[') {
                return Ok(());
            }

            let entries: Vec<serde_json::Value> = match serde_json::from_str(&contents) {
                Ok(entries) => entries,
                Err(e) => {
                    let corrupt = self.path.with_extension("corrupt");
                    warn!(
                        store = %self.path.display(),
                        error = %e,
                        moved_to = %corrupt.display(),
                        "Legacy store is not valid JSON, starting empty"
                    );
                    fs::rename(&self.path, &corrupt)?;
                    return Ok(());
                }
            };

            let mut lines = String::new();
            let mut migrated = 0usize;
            for entry in entries {
                match serde_json::from_value::<T>(entry) {
                    Ok(record) => {
                        lines.push_str(&serde_json::to_string(&record)?);
                        lines.push('\n');
                        migrated += 1;
                    }
                    Err(e) => warn!(error = %e, "Dropping malformed legacy record"),
                }
            }

            let staging = self.path.with_extension("migrating");
            fs::write(&staging, lines)
                .with_context(|| format!("Failed to write {}", staging.display()))?;
            fs::rename(&staging, &self.path)
                .with_context(|| format!("Failed to replace {}", self.path.display()))?;

            tracing::info!(
                store = %self.path.display(),
                records = migrated,
                "Migrated legacy JSON array store to JSON Lines"
            );
            Ok(())
        })();

        file.unlock().ok();
        result
    }
}

/// Lines that parse as `T`, so the count agrees with `load`
fn count_records<T: DeserializeOwned>(path: &Path) -> Result<usize> {
    let file = File::open(path)?;
    let mut count = 0;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.trim().is_empty() && serde_json::from_str::<T>(&line).is_ok() {
            count += 1;
        }
    }
    Ok(count)
}
