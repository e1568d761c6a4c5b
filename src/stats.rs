/// Post-run summaries over a result CSV.
///
/// Term frequencies for free-text columns, mention counts of the nine
/// Business Model Canvas elements, and Y/N tallies for flag columns.
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::response::{ERROR_PLACEHOLDER, is_placeholder_text};

static TERM_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[,\s;/]+").unwrap());

/// Canonical element name plus lowercase aliases (Korean and English).
const BMC_ELEMENTS: [(&str, &[&str]); 9] = [
    ("고객 세그먼트", &["고객 세그먼트", "customer segment"]),
    ("가치 제안", &["가치 제안", "value proposition"]),
    ("채널", &["채널", "channel"]),
    ("고객 관계", &["고객 관계", "customer relationship"]),
    ("수익 흐름", &["수익 흐름", "수익원", "revenue stream"]),
    ("핵심 자원", &["핵심 자원", "key resource"]),
    ("핵심 활동", &["핵심 활동", "key activit"]),
    ("핵심 파트너십", &["핵심 파트너", "key partner"]),
    ("비용 구조", &["비용 구조", "cost structure"]),
];

pub const AI_SPECIFIC_GROUP: &str = "AI 특화 요소 (데이터, 모델 등)";
pub const AI_ETHICS_GROUP: &str = "AI 윤리/규제";

const AI_KEYWORDS: [&str; 10] = [
    "데이터",
    "data",
    "ai",
    "인공지능",
    "알고리즘",
    "모델",
    "기술",
    "technology",
    "플랫폼",
    "platform",
];
const ETHICS_KEYWORDS: [&str; 2] = ["윤리", "ethics"];

#[derive(Error, Debug)]
pub enum StatsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("column not found: {0:?}")]
    MissingColumn(String),
}

/// A result CSV held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ResultTable {
    /// Read a CSV written by the analyzer. A leading BOM is ignored.
    pub fn load(path: &Path) -> Result<Self, StatsError> {
        let data = fs::read_to_string(path).map_err(|source| StatsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&data)
    }

    pub fn parse(data: &str) -> Result<Self, StatsError> {
        let data = data.strip_prefix('\u{FEFF}').unwrap_or(data);
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(data.as_bytes());

        let headers = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }

        Ok(Self { headers, rows })
    }

    /// Cell values of one column; short rows yield empty strings.
    pub fn column(&self, name: &str) -> Result<Vec<&str>, StatsError> {
        let idx = self
            .headers
            .iter()
            .position(|h| h == name.trim())
            .ok_or_else(|| StatsError::MissingColumn(name.to_string()))?;
        Ok(self
            .rows
            .iter()
            .map(|row| row.get(idx).map(String::as_str).unwrap_or(""))
            .collect())
    }
}

fn is_blank_cell(cell: &str) -> bool {
    let cell = cell.trim();
    is_placeholder_text(cell) || cell == ERROR_PLACEHOLDER || cell.eq_ignore_ascii_case("nan")
}

fn sorted_counts(counts: HashMap<String, usize>) -> Vec<(String, usize)> {
    let mut counts: Vec<_> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts
}

/// Count terms split on commas, whitespace, semicolons and slashes.
///
/// Placeholder cells are skipped. Sorted by count, then term.
pub fn term_frequencies(cells: &[&str]) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for cell in cells.iter().filter(|c| !is_blank_cell(c)) {
        for term in TERM_SPLIT_RE.split(cell) {
            let term = term.trim();
            if !term.is_empty() {
                *counts.entry(term.to_string()).or_default() += 1;
            }
        }
    }
    sorted_counts(counts)
}

/// Count rows mentioning each canvas element (each element at most once per row).
///
/// Terms matching no standard element but naming data, models or platforms
/// count toward [`AI_SPECIFIC_GROUP`]; ethics terms toward [`AI_ETHICS_GROUP`].
pub fn bmc_element_counts(cells: &[&str]) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();

    for cell in cells.iter().filter(|c| !is_blank_cell(c)) {
        let lower = cell.to_lowercase();
        let mut seen: BTreeSet<&str> = BTreeSet::new();

        for (name, aliases) in BMC_ELEMENTS {
            if aliases.iter().any(|a| lower.contains(a)) {
                seen.insert(name);
            }
        }

        let unmatched_terms = TERM_SPLIT_RE
            .split(&lower)
            .filter(|t| !t.is_empty())
            .filter(|t| {
                !BMC_ELEMENTS
                    .iter()
                    .flat_map(|(_, aliases)| aliases.iter())
                    .any(|a| a.contains(t))
            });
        for term in unmatched_terms {
            if ETHICS_KEYWORDS.iter().any(|k| term.contains(k)) {
                seen.insert(AI_ETHICS_GROUP);
            } else if AI_KEYWORDS.iter().any(|k| term.contains(k)) {
                seen.insert(AI_SPECIFIC_GROUP);
            }
        }

        for name in seen {
            *counts.entry(name.to_string()).or_default() += 1;
        }
    }

    sorted_counts(counts)
}

/// Tally cells starting with `Y` or `N` (case-insensitive). Returns (yes, no, other).
pub fn yes_no_counts(cells: &[&str]) -> (usize, usize, usize) {
    cells.iter().fold((0, 0, 0), |(y, n, o), cell| {
        match cell.trim().chars().next().map(|c| c.to_ascii_uppercase()) {
            Some('Y') => (y + 1, n, o),
            Some('N') if !cell.trim().eq_ignore_ascii_case("nan") => (y, n + 1, o),
            _ => (y, n, o + 1),
        }
    })
}
