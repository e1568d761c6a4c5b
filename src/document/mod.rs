/// Input documents: discovery, PDF text extraction and chunking.
pub mod chunker;
pub mod pdf;

use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("input directory not found: {0}")]
    MissingDir(PathBuf),

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("failed to load PDF {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: lopdf::Error,
    },

    #[error("no extractable text in {0}")]
    NoText(PathBuf),
}

/// All `*.pdf` files directly inside `dir` (extension case-insensitive),
/// sorted by path. Subdirectories are not searched.
pub fn discover_pdfs(dir: &Path) -> Result<Vec<PathBuf>, DocumentError> {
    if !dir.is_dir() {
        return Err(DocumentError::MissingDir(dir.to_path_buf()));
    }

    let base = Pattern::escape(&dir.to_string_lossy());
    let pattern = format!("{}/*.pdf", base.trim_end_matches(['/', '\\']));
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };

    let mut files: Vec<PathBuf> = glob::glob_with(&pattern, options)?
        .flatten()
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    Ok(files)
}

/// File name used as the fallback title.
pub fn file_title(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
