//! Parquet-file table sink.
//!
//! Layout: `{dir}/{table}.parquet` plus `{dir}/{table}.schema.json`.
//!
//! - Appends read the existing file, stack the new rows, and rewrite it.
//! - Writes are atomic (write to .tmp, rename into place).
//! - Text columns are stored as strings.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::{column_types, ColumnType, InsertOptions, StorageError, TableSink};

/// Schema sidecar written next to each table file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    pub table: String,
    pub columns: Vec<ColumnMeta>,
    pub row_count: usize,
    pub written_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub kind: ColumnType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_type: Option<String>,
}

pub struct ParquetTableSink {
    dir: PathBuf,
}

impl ParquetTableSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.parquet"))
    }

    fn meta_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.schema.json"))
    }

    /// Read the whole table back.
    pub fn read(&self, table: &str) -> Result<DataFrame, StorageError> {
        read_parquet(&self.table_path(table))
    }

    pub fn meta(&self, table: &str) -> Option<TableMeta> {
        let content = fs::read_to_string(self.meta_path(table)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Remove every row. A missing table is already empty.
    pub fn delete_all(&self, table: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.table_path(table)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(format!("delete {table}: {e}"))),
        }
    }
}

impl TableSink for ParquetTableSink {
    fn insert(
        &self,
        table: &str,
        frame: &DataFrame,
        options: InsertOptions,
    ) -> Result<usize, StorageError> {
        validate_table_name(table)?;
        fs::create_dir_all(&self.dir)
            .map_err(|e| StorageError::Io(format!("failed to create dir: {e}")))?;

        if options.delete_prev_records {
            if let Err(e) = self.delete_all(table) {
                error!("Error on deleting {table} rows: {e}");
            }
        }

        let hints = column_types(frame);
        let incoming = cast_text_columns(frame, &hints)?;

        let path = self.table_path(table);
        let mut combined = if path.exists() {
            let existing = read_parquet(&path)?;
            debug!(rows = existing.height(), "appending to existing table");
            existing
                .vstack(&incoming)
                .map_err(|e| StorageError::SchemaMismatch {
                    table: table.to_string(),
                    reason: e.to_string(),
                })?
        } else {
            incoming
        };

        let tmp_path = path.with_extension("parquet.tmp");
        write_parquet(&mut combined, &tmp_path)?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StorageError::Io(format!("atomic rename failed: {e}"))
        })?;

        let meta = TableMeta {
            table: table.to_string(),
            columns: hints
                .iter()
                .map(|(name, kind)| ColumnMeta {
                    name: name.clone(),
                    kind: *kind,
                    sql_type: kind.sql_type().map(String::from),
                })
                .collect(),
            row_count: combined.height(),
            written_at: Utc::now(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| StorageError::Io(format!("meta serialization: {e}")))?;
        fs::write(self.meta_path(table), meta_json)
            .map_err(|e| StorageError::Io(format!("meta write: {e}")))?;

        info!("Inserted {} rows into {table} table", frame.height());
        Ok(frame.height())
    }
}

fn validate_table_name(table: &str) -> Result<(), StorageError> {
    let bad = table.is_empty()
        || table.starts_with('.')
        || table.chars().any(|c| matches!(c, '/' | '\\') || c.is_control());
    if bad {
        Err(StorageError::InvalidTable(table.to_string()))
    } else {
        Ok(())
    }
}

fn cast_text_columns(
    frame: &DataFrame,
    hints: &[(String, ColumnType)],
) -> Result<DataFrame, StorageError> {
    let mut out = frame.clone();
    for (name, kind) in hints {
        if *kind != ColumnType::Text {
            continue;
        }
        let column = out
            .column(name)
            .map_err(|e| StorageError::Parquet(e.to_string()))?;
        if column.dtype() == &DataType::String {
            continue;
        }
        let cast = column
            .cast(&DataType::String)
            .map_err(|e| StorageError::Parquet(format!("cast {name} to text: {e}")))?;
        out.with_column(cast)
            .map_err(|e| StorageError::Parquet(e.to_string()))?;
    }
    Ok(out)
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), StorageError> {
    let file =
        fs::File::create(path).map_err(|e| StorageError::Io(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| StorageError::Parquet(format!("write parquet: {e}")))?;
    Ok(())
}

fn read_parquet(path: &Path) -> Result<DataFrame, StorageError> {
    let file = fs::File::open(path).map_err(|e| StorageError::Io(format!("open: {e}")))?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| StorageError::Parquet(format!("read: {e}")))
}
