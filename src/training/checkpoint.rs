// Checkpoint directory layout and crash-safe replacement
//
// A checkpoint is one directory holding model weights, the model config, the
// tokenizer and an optional id → label map. New weights are always written
// to a sibling staging directory first and swapped in with renames, so the
// live path only ever holds a complete checkpoint.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::error::{TrainingError, TrainingResult};

pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const LABELS_FILE: &str = "labels.json";

const REQUIRED_FILES: [&str; 3] = [CONFIG_FILE, WEIGHTS_FILE, TOKENIZER_FILE];

/// Validated checkpoint directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    dir: PathBuf,
}

impl Checkpoint {
    /// Open an existing checkpoint, failing if the directory or any required
    /// file is missing.
    pub fn open(dir: impl Into<PathBuf>) -> TrainingResult<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(TrainingError::MissingCheckpoint { path: dir });
        }
        for file in REQUIRED_FILES {
            if !dir.join(file).is_file() {
                return Err(TrainingError::InvalidCheckpoint {
                    path: dir,
                    reason: format!("missing {}", file),
                });
            }
        }
        Ok(Self { dir })
    }

    /// Open a checkpoint about to be replaced or served, first restoring a
    /// swap that stopped after the live directory was moved aside.
    ///
    /// Readers that may run during a swap use [`Checkpoint::open`] instead.
    pub fn recover(dir: impl Into<PathBuf>) -> TrainingResult<Self> {
        let dir = dir.into();
        if !dir.exists() {
            let previous = sibling(&dir, "previous")?;
            if is_complete(&previous) {
                tracing::warn!(
                    "Checkpoint {} is missing after an interrupted swap, restoring {}",
                    dir.display(),
                    previous.display()
                );
                fs::rename(&previous, &dir)?;
            }
        }
        Self::open(dir)
    }

    /// Resolve a base model for initial training: a local checkpoint
    /// directory, or a Hugging Face Hub model id fetched into the local cache.
    pub fn resolve_base(model: &str) -> Result<Self> {
        let local = Path::new(model);
        if local.is_dir() {
            return Ok(Self::open(local)?);
        }

        tracing::info!("Fetching base model '{}' from the Hugging Face Hub", model);
        let api = hf_hub::api::sync::Api::new().context("Failed to initialise Hub client")?;
        let repo = api.model(model.to_string());

        let mut dir = None;
        for file in REQUIRED_FILES {
            let path = repo
                .get(file)
                .with_context(|| format!("Failed to download {} for {}", file, model))?;
            dir = path.parent().map(Path::to_path_buf);
        }
        let dir = dir.context("Hub download returned no files")?;
        Ok(Self::open(dir)?)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn weights_path(&self) -> PathBuf {
        self.dir.join(WEIGHTS_FILE)
    }

    pub fn tokenizer_path(&self) -> PathBuf {
        self.dir.join(TOKENIZER_FILE)
    }

    /// Optional id → label map (`{"0": "neutral", "1": "toxic"}`)
    pub fn label_map(&self) -> Result<Option<BTreeMap<u32, String>>> {
        let path = self.dir.join(LABELS_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let raw: BTreeMap<String, String> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        let mut labels = BTreeMap::new();
        for (id, label) in raw {
            let id: u32 = id
                .trim()
                .parse()
                .with_context(|| format!("Label id '{}' in {} is not a number", id, path.display()))?;
            labels.insert(id, label);
        }
        Ok(Some(labels))
    }
}

/// Directory new weights are written to before they replace `target`
#[derive(Debug)]
pub struct StagedCheckpoint {
    staging: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedCheckpoint {
    /// Create an empty staging directory next to `target`, clearing any
    /// leftovers from an interrupted run.
    pub fn begin(target: &Path) -> io::Result<Self> {
        let staging = sibling(target, "staging")?;
        if staging.exists() {
            tracing::warn!("Removing stale staging directory {}", staging.display());
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        Ok(Self {
            staging,
            target: target.to_path_buf(),
            committed: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.staging
    }

    pub fn weights_path(&self) -> PathBuf {
        self.staging.join(WEIGHTS_FILE)
    }

    /// Copy every top-level file of `source` except the weights (tokenizer,
    /// model config, label map, ...) unless the staging directory already has it.
    pub fn copy_assets_from(&self, source: &Checkpoint) -> io::Result<usize> {
        let mut copied = 0;
        for entry in fs::read_dir(source.dir())? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if name == WEIGHTS_FILE {
                continue;
            }
            let dest = self.staging.join(&name);
            if !dest.exists() {
                fs::copy(entry.path(), &dest)?;
                copied += 1;
            }
        }
        Ok(copied)
    }

    /// Swap the staged directory into place.
    ///
    /// The previous checkpoint is renamed aside, the staging directory renamed
    /// to the target, and only then is the old copy deleted.
    pub fn commit(mut self) -> TrainingResult<Checkpoint> {
        for file in REQUIRED_FILES {
            if !self.staging.join(file).is_file() {
                return Err(TrainingError::InvalidCheckpoint {
                    path: self.staging.clone(),
                    reason: format!("staged checkpoint is missing {}", file),
                });
            }
        }

        if self.target.exists() {
            let previous = sibling(&self.target, "previous")?;
            if previous.exists() {
                fs::remove_dir_all(&previous)?;
            }
            fs::rename(&self.target, &previous)?;
            fs::rename(&self.staging, &self.target)?;
            fs::remove_dir_all(&previous)?;
        } else {
            if let Some(parent) = self.target.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::rename(&self.staging, &self.target)?;
        }
        self.committed = true;

        tracing::info!("Checkpoint written to {}", self.target.display());
        Checkpoint::open(self.target.clone())
    }
}

impl Drop for StagedCheckpoint {
    fn drop(&mut self) {
        if !self.committed && self.staging.exists() {
            if let Err(e) = fs::remove_dir_all(&self.staging) {
                tracing::warn!("Failed to clean up {}: {}", self.staging.display(), e);
            }
        }
    }
}

fn is_complete(dir: &Path) -> bool {
    dir.is_dir() && REQUIRED_FILES.iter().all(|file| dir.join(file).is_file())
}

fn sibling(target: &Path, suffix: &str) -> io::Result<PathBuf> {
    let name = target.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("checkpoint path {} has no directory name", target.display()),
        )
    })?;
    let mut sibling_name = name.to_os_string();
    sibling_name.push(format!(".{}", suffix));
    Ok(target.with_file_name(sibling_name))
}
