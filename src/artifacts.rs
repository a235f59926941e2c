//! On-disk artifacts: one merged JSON file per harvested wallet, one marker
//! file per ignored wallet.
//!
//! Layout under the output directory:
//! - `<data_dir>/<wallet>.json` where `data_dir` is the output directory or a
//!   per-run `<unix-timestamp>/` subdirectory
//! - `<ignored_subdir>/<wallet>.txt` containing `ignored`
//!
//! Files are written to a temporary file in the target directory and renamed
//! into place, so a crash never leaves a truncated artifact behind.

use crate::config::PathConfig;
use crate::schemas::Hit;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub const IGNORED_MARKER: &str = "ignored";

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to persist temp file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Writer for one run's artifacts
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    data_dir: PathBuf,
    ignored_dir: PathBuf,
}

impl ArtifactStore {
    /// Store writing data artifacts directly under `root`
    pub fn new(root: impl Into<PathBuf>, ignored_subdir: &str) -> Self {
        let root = root.into();
        Self {
            data_dir: root.clone(),
            ignored_dir: root.join(ignored_subdir),
            root,
        }
    }

    /// Store for the configured layout; timestamped runs get their own data directory
    pub fn from_config(paths: &PathConfig) -> Self {
        let mut store = Self::new(&paths.output_dir, &paths.ignored_subdir);
        if paths.timestamped_runs {
            let stamp = chrono::Utc::now().timestamp().to_string();
            store.data_dir = paths.output_dir.join(stamp);
        }
        store
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn ignored_dir(&self) -> &Path {
        &self.ignored_dir
    }

    pub fn ensure_directories(&self) -> Result<(), ArtifactError> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.ignored_dir)?;
        Ok(())
    }

    pub fn data_path(&self, wallet: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", wallet))
    }

    pub fn ignored_path(&self, wallet: &str) -> PathBuf {
        self.ignored_dir.join(format!("{}.txt", wallet))
    }

    /// Serialize the merged transactions in memory and place them atomically.
    pub fn write_merged(&self, wallet: &str, records: &[Hit]) -> Result<PathBuf, ArtifactError> {
        let bytes = serde_json::to_vec(records)?;
        let path = self.data_path(wallet);
        write_atomic(&path, &bytes)?;
        Ok(path)
    }

    pub fn write_ignored(&self, wallet: &str) -> Result<PathBuf, ArtifactError> {
        let path = self.ignored_path(wallet);
        write_atomic(&path, IGNORED_MARKER.as_bytes())?;
        Ok(path)
    }

    /// File stems of every artifact anywhere under the root, ignored markers included.
    pub fn processed_wallets(&self) -> Result<HashSet<String>, ArtifactError> {
        let mut wallets = HashSet::new();
        for path in walk_files(&self.root)? {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                wallets.insert(stem.to_string());
            }
        }
        Ok(wallets)
    }

    /// Count of data artifacts and ignored markers under the root
    pub fn counts(&self) -> Result<ArtifactCounts, ArtifactError> {
        let mut counts = ArtifactCounts::default();
        for path in walk_files(&self.root)? {
            match path.extension().and_then(|e| e.to_str()) {
                Some("json") => counts.data += 1,
                Some("txt") if path.starts_with(&self.ignored_dir) => counts.ignored += 1,
                _ => counts.other += 1,
            }
        }
        Ok(counts)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArtifactCounts {
    pub data: usize,
    pub ignored: usize,
    pub other: usize,
}

/// Writes content to a file atomically using tempfile + rename.
fn write_atomic(path: &Path, content: &[u8]) -> Result<(), ArtifactError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
    temp_file.write_all(content)?;
    temp_file.as_file().sync_all()?;
    temp_file.persist(path)?;

    Ok(())
}

/// Every regular file under `root`, recursively. A missing root yields nothing.
fn walk_files(root: &Path) -> Result<Vec<PathBuf>, ArtifactError> {
    let mut files = Vec::new();
    if !root.exists() {
        return Ok(files);
    }

    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }

    files.sort();
    Ok(files)
}

// ============================================================================
// Artifact validation
// ============================================================================

/// Outcome of scanning the output tree for unparseable JSON artifacts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub checked: usize,
    pub invalid: Vec<PathBuf>,
    pub removed: usize,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.invalid.is_empty()
    }
}

/// Parse every `.json` file under `root`; report the ones that fail and
/// delete them when `remove` is set.
pub fn validate_artifacts(root: &Path, remove: bool) -> Result<ValidationReport, ArtifactError> {
    let mut report = ValidationReport::default();

    for path in walk_files(root)? {
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        report.checked += 1;

        let bytes = std::fs::read(&path)?;
        if serde_json::from_slice::<serde::de::IgnoredAny>(&bytes).is_ok() {
            continue;
        }

        if remove {
            std::fs::remove_file(&path)?;
            report.removed += 1;
            warn!("Invalid JSON removed: {:?}", path);
        } else {
            warn!("Invalid JSON in file: {:?}", path);
        }
        report.invalid.push(path);
    }

    info!(
        "Checked {} artifacts, {} invalid, {} removed",
        report.checked,
        report.invalid.len(),
        report.removed
    );

    Ok(report)
}
