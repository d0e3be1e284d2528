// src/utils/feeds.rs
//! JSON file boundary used by the `reconcile` binary. Feeds are JSON arrays
//! of records; outputs are written to sibling temp files and renamed into
//! place only once every output of the run has been written.
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub fn load_json_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let rows: Vec<T> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse JSON rows from {}", path.display()))?;
    Ok(rows)
}

/// Like [`load_json_rows`], but a missing file is an empty feed.
pub fn load_optional_json_rows<T: DeserializeOwned>(path: Option<&Path>) -> Result<Vec<T>> {
    match path {
        Some(p) if p.exists() => load_json_rows(p),
        Some(p) => {
            log::warn!("{} does not exist, treating it as empty", p.display());
            Ok(Vec::new())
        }
        None => Ok(Vec::new()),
    }
}

/// Serialized output sitting in its temp file, not yet visible at `path`.
#[derive(Debug)]
pub struct StagedFile {
    tmp_path: PathBuf,
    path: PathBuf,
}

impl StagedFile {
    fn discard(&self) {
        if let Err(e) = fs::remove_file(&self.tmp_path) {
            log::warn!("Could not remove {}: {}", self.tmp_path.display(), e);
        }
    }
}

/// Writes `rows` to the temp file next to `path` without touching `path`.
pub fn stage_json_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<StagedFile> {
    let tmp_path = path.with_extension("json.tmp");
    let file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
    let mut writer = BufWriter::new(file);
    let written = serde_json::to_writer_pretty(&mut writer, rows)
        .with_context(|| format!("Failed to serialize rows to {}", tmp_path.display()))
        .and_then(|_| {
            writer
                .flush()
                .with_context(|| format!("Failed to flush {}", tmp_path.display()))
        });
    drop(writer);
    let staged = StagedFile {
        tmp_path,
        path: path.to_path_buf(),
    };
    if let Err(e) = written {
        staged.discard();
        return Err(e);
    }
    Ok(staged)
}

/// Renames every staged file into place. Nothing is renamed unless all of
/// them were staged; callers stage first and commit once.
pub fn commit_staged(staged: Vec<StagedFile>) -> Result<()> {
    for file in &staged {
        fs::rename(&file.tmp_path, &file.path).with_context(|| {
            format!(
                "Failed to move {} to {}",
                file.tmp_path.display(),
                file.path.display()
            )
        })?;
    }
    Ok(())
}

pub fn write_json_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    commit_staged(vec![stage_json_rows(path, rows)?])
}

/// Stages the linked rows and the identity delta, then moves both into
/// place. If either cannot be staged, neither output path is touched.
pub fn write_run_outputs<R: Serialize, D: Serialize>(
    rows_path: &Path,
    rows: &[R],
    delta_path: &Path,
    delta: &[D],
) -> Result<()> {
    let staged_rows = stage_json_rows(rows_path, rows).context("Failed to write linked rows")?;
    let staged_delta = match stage_json_rows(delta_path, delta) {
        Ok(staged) => staged,
        Err(e) => {
            staged_rows.discard();
            return Err(e.context("Failed to write identity delta"));
        }
    };
    commit_staged(vec![staged_rows, staged_delta])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::core::IdentityRecord;
    use tempfile::tempdir;

    #[test]
    fn test_write_then_load_identity_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("identities.json");
        let rows = vec![IdentityRecord {
            brand_name: "LOJA LIMPA".to_string(),
            identity_id: "A1B2C".to_string(),
            shop_id: Some(42),
            first_seen: None,
        }];

        write_json_rows(&path, &rows).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded: Vec<IdentityRecord> = load_json_rows(&path).unwrap();
        assert_eq!(loaded, rows);
    }

    #[test]
    fn test_failed_delta_leaves_no_outputs() {
        let dir = tempdir().unwrap();
        let rows_path = dir.path().join("linked.json");
        let delta_path = dir.path().join("missing_dir").join("delta.json");

        let result = write_run_outputs(&rows_path, &[1, 2, 3], &delta_path, &["A1B2C"]);
        assert!(result.is_err());
        assert!(!rows_path.exists());
        assert!(!rows_path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_run_outputs_written_together() {
        let dir = tempdir().unwrap();
        let rows_path = dir.path().join("linked.json");
        let delta_path = dir.path().join("delta.json");

        write_run_outputs(&rows_path, &[1, 2], &delta_path, &["A1B2C"]).unwrap();
        let rows: Vec<i32> = load_json_rows(&rows_path).unwrap();
        let delta: Vec<String> = load_json_rows(&delta_path).unwrap();
        assert_eq!(rows, vec![1, 2]);
        assert_eq!(delta, vec!["A1B2C".to_string()]);
    }

    #[test]
    fn test_missing_optional_feed_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let rows: Vec<IdentityRecord> = load_optional_json_rows(Some(&path)).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_malformed_feed_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(load_json_rows::<IdentityRecord>(&path).is_err());
    }
}
