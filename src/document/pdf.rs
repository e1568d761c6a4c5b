/// PDF text extraction via lopdf.
use std::path::Path;

use lopdf::Document;
use tracing::debug;

use super::DocumentError;

const TITLE_MIN_CHARS: usize = 6;
const TITLE_SKIP_WORDS: [&str; 4] = ["abstract", "introduction", "contents", "chapter"];

/// Extract the text of every page, pages separated by blank lines.
///
/// Pages that fail to decode are skipped. A document with no text at all
/// (for example a scanned PDF) is an error.
pub fn extract_text(path: &Path) -> Result<String, DocumentError> {
    let document = Document::load(path).map_err(|source| DocumentError::Load {
        path: path.to_path_buf(),
        source,
    })?;

    let mut pages = Vec::new();
    for page_num in document.get_pages().into_keys() {
        match document.extract_text(&[page_num]) {
            Ok(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    pages.push(trimmed.to_string());
                }
            }
            Err(e) => debug!("{}: page {page_num} skipped: {e}", path.display()),
        }
    }

    if pages.is_empty() {
        return Err(DocumentError::NoText(path.to_path_buf()));
    }

    Ok(pages.join("\n\n"))
}

/// Guess a title: the first line longer than five characters that is not a
/// section heading such as "Abstract".
pub fn extract_title(text: &str) -> Option<String> {
    text.lines().map(str::trim).find_map(|line| {
        let long_enough = line.chars().count() >= TITLE_MIN_CHARS;
        let lower = line.to_lowercase();
        let heading = TITLE_SKIP_WORDS.iter().any(|w| lower.contains(w));
        (long_enough && !heading).then(|| line.to_string())
    })
}
