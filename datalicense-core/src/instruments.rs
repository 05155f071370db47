//! Instrument source: the ordered identifier list to request.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("read instrument file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("instrument file {0} has no identifiers")]
    Empty(PathBuf),
}

/// Anything that can produce the identifiers for one run.
pub trait InstrumentSource {
    fn fetch(&self) -> Result<Vec<String>, InstrumentError>;
}

/// First column of a headed CSV file. Blank cells are skipped.
#[derive(Debug, Clone)]
pub struct CsvInstrumentSource {
    path: PathBuf,
}

impl CsvInstrumentSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_error(&self, e: impl std::fmt::Display) -> InstrumentError {
        InstrumentError::Read {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}

impl InstrumentSource for CsvInstrumentSource {
    fn fetch(&self) -> Result<Vec<String>, InstrumentError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|e| self.read_error(e))?;

        let mut ids = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| self.read_error(e))?;
            if let Some(id) = record.get(0).filter(|s| !s.is_empty()) {
                ids.push(id.to_string());
            }
        }

        if ids.is_empty() {
            return Err(InstrumentError::Empty(self.path.clone()));
        }
        Ok(ids)
    }
}

/// Fetch, cap to `limit`, and log a preview.
pub fn load_instruments(
    source: &dyn InstrumentSource,
    limit: Option<usize>,
) -> Result<Vec<String>, InstrumentError> {
    let mut ids = source.fetch()?;
    if let Some(limit) = limit {
        ids.truncate(limit);
    }
    let preview = &ids[..ids.len().min(3)];
    info!(count = ids.len(), "Loaded instruments: {preview:?}...");
    Ok(ids)
}
