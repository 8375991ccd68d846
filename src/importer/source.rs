//! CSV record source
//!
//! Reads the input lazily, one row per call to `next`, in file order. The
//! header row is checked for the required columns before any data row is
//! handed out, so a structurally broken file fails before any work starts.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::config::ColumnConfig;
use crate::errors::{SourceError, SourceResult};
use crate::models::RawRecord;

pub struct CsvRecordSource<R: Read> {
    reader: csv::Reader<R>,
    headers: Vec<String>,
    buffer: csv::StringRecord,
    finished: bool,
}

impl CsvRecordSource<File> {
    /// Open `path` and validate its header row
    pub fn open(path: &Path, columns: &ColumnConfig) -> SourceResult<Self> {
        let label = path.display().to_string();
        let file = File::open(path).map_err(|e| SourceError::io(label.as_str(), e))?;
        Self::from_reader(file, &label, columns)
    }
}

impl<R: Read> CsvRecordSource<R> {
    /// Wrap any reader; `label` names the input in error messages
    pub fn from_reader(input: R, label: &str, columns: &ColumnConfig) -> SourceResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(input);

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| SourceError::io(label, e))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        if headers.iter().all(|h| h.is_empty()) {
            return Err(SourceError::MissingHeader {
                path: label.to_string(),
            });
        }

        for required in [
            &columns.key,
            &columns.display_name,
            &columns.privileged,
            &columns.suspended,
        ] {
            if !headers.iter().any(|h| h == required) {
                return Err(SourceError::missing_column(required.as_str()));
            }
        }

        debug!("Opened {} with columns {:?}", label, headers);

        Ok(Self {
            reader,
            headers,
            buffer: csv::StringRecord::new(),
            finished: false,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }
}

impl<R: Read> Iterator for CsvRecordSource<R> {
    type Item = SourceResult<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.reader.read_record(&mut self.buffer) {
            Ok(true) => {
                let line = self.buffer.position().map_or(0, |p| p.line());
                // Ragged rows are tolerated; trailing cells that are missing
                // simply stay absent from the map.
                let fields: HashMap<String, String> = self
                    .headers
                    .iter()
                    .zip(self.buffer.iter())
                    .map(|(h, v)| (h.clone(), v.to_string()))
                    .collect();
                Some(Ok(RawRecord::new(line, fields)))
            }
            Ok(false) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                let line = e.position().map_or(0, |p| p.line());
                Some(Err(SourceError::malformed(line, e)))
            }
        }
    }
}
