/// Append-only CSV sink. The file is opened, appended to and closed per row.
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use csv::WriterBuilder;
use tracing::{info, warn};

use super::OutputError;
use crate::response::MergedResult;
use crate::schema::Schema;

/// UTF-8 byte order mark, so spreadsheet tools detect the encoding.
pub const BOM: &[u8] = b"\xEF\xBB\xBF";

pub struct CsvSink {
    path: PathBuf,
    columns: Vec<String>,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>, schema: &Schema) -> Self {
        Self {
            path: path.into(),
            columns: schema.columns().into_iter().map(str::to_string).collect(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row. An empty or missing file first gets the BOM and header.
    ///
    /// The row (plus BOM and header when new) goes out in a single write, so
    /// a failed attempt never leaves a BOM without its header behind.
    pub fn append(&self, result: &MergedResult) -> Result<(), OutputError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| OutputError::io(&self.path, e))?;
        let is_new = file
            .metadata()
            .map_err(|e| OutputError::io(&self.path, e))?
            .len()
            == 0;

        let buf = self.encode(result, is_new)?;
        file.write_all(&buf)
            .map_err(|e| OutputError::io(&self.path, e))?;
        if is_new {
            info!("Created {} with header", self.path.display());
        }
        Ok(())
    }

    fn encode(&self, result: &MergedResult, with_header: bool) -> Result<Vec<u8>, OutputError> {
        let mut buf = Vec::new();
        if with_header {
            buf.extend_from_slice(BOM);
        }
        {
            let mut writer = WriterBuilder::new().has_headers(false).from_writer(&mut buf);
            if with_header {
                writer.write_record(&self.columns)?;
            }
            writer.write_record(result.record())?;
            writer
                .flush()
                .map_err(|e| OutputError::io(&self.path, e))?;
        }
        Ok(buf)
    }

    /// [`append`](Self::append) with up to `attempts` tries and a fixed pause
    /// between them. Returns the last error when every attempt fails.
    pub fn append_with_retry(
        &self,
        result: &MergedResult,
        attempts: u32,
        delay: Duration,
    ) -> Result<(), OutputError> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.append(result) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    warn!(
                        "CSV write attempt {attempt}/{attempts} for {:?} failed: {e}",
                        result.title()
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
