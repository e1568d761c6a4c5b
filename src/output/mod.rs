/// Result writers: an append-only CSV sink and a JSON array dump.
pub mod csv;
pub mod json;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use thiserror::Error;

const RESULT_PREFIX: &str = "논문분석_결과";

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV write failed: {0}")]
    Csv(#[from] ::csv::Error),

    #[error("JSON encode failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl OutputError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        OutputError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Create the output directory (and parents) if needed.
pub fn ensure_output_dir(dir: &Path) -> Result<(), OutputError> {
    fs::create_dir_all(dir).map_err(|e| OutputError::io(dir, e))
}

/// Timestamped CSV and JSON paths for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub csv: PathBuf,
    pub json: PathBuf,
}

impl OutputPaths {
    pub fn new(dir: &Path, started: DateTime<Local>) -> Self {
        let stem = format!("{RESULT_PREFIX}_{}", started.format("%Y%m%d_%H%M%S"));
        Self {
            csv: dir.join(format!("{stem}.csv")),
            json: dir.join(format!("{stem}.json")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_output_paths() {
        let started = Local.with_ymd_and_hms(2025, 3, 9, 14, 5, 7).unwrap();
        let paths = OutputPaths::new(Path::new("result"), started);
        assert_eq!(paths.csv, Path::new("result/논문분석_결과_20250309_140507.csv"));
        assert_eq!(paths.json, Path::new("result/논문분석_결과_20250309_140507.json"));
    }

    #[test]
    fn test_ensure_output_dir_nested() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_output_dir(&nested).unwrap();
        assert!(nested.is_dir());
        ensure_output_dir(&nested).unwrap();
    }
}
