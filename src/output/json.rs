/// Pretty-printed JSON array of all results, written once per batch.
use std::fs;
use std::path::Path;

use super::OutputError;
use crate::response::MergedResult;
use crate::schema::Schema;

pub fn write_json(
    path: &Path,
    results: &[MergedResult],
    schema: &Schema,
) -> Result<(), OutputError> {
    let records: Vec<_> = results.iter().map(|r| r.as_record(schema)).collect();
    let data = serde_json::to_string_pretty(&records)?;
    fs::write(path, data).map_err(|e| OutputError::io(path, e))
}
