//! Delivered payload → canonical rows.
//!
//! [`Transformer`] runs, in order: schema reconciliation, date normalisation,
//! the ingestion timestamp, and the drop of columns the target table does not
//! persist.

pub mod dates;
pub mod reconcile;

pub use dates::DateNormalizer;
pub use reconcile::{ColumnSource, SchemaReconciler};

use chrono::{DateTime, Utc};
use polars::prelude::*;
use thiserror::Error;
use tracing::{info, warn};

use crate::client::FieldSpec;
use crate::error::Result;

pub const TIMESTAMP_CREATED: &str = "timestamp_created_utc";

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("delivered columns {delivered:?} do not end with requested fields {expected:?}")]
    SuffixNotFound {
        expected: Vec<String>,
        delivered: Vec<String>,
    },

    #[error("reconciled schema would contain column {0} twice")]
    DuplicateColumn(String),

    #[error("frame error during reconciliation: {0}")]
    Frame(String),
}

pub struct Transformer {
    reconciler: SchemaReconciler,
    dates: DateNormalizer,
    ignore_columns: Vec<String>,
}

impl Transformer {
    pub fn new(fields: Vec<FieldSpec>, ignore_columns: Vec<String>) -> Self {
        Self {
            reconciler: SchemaReconciler::new(fields),
            dates: DateNormalizer,
            ignore_columns,
        }
    }

    pub fn transform(&self, df: &DataFrame) -> Result<DataFrame> {
        self.transform_at(df, Utc::now())
    }

    /// Transform with an explicit ingestion time.
    ///
    /// An empty delivery (no rows) comes back unchanged: there is no schema to
    /// reconcile.
    pub fn transform_at(&self, df: &DataFrame, created: DateTime<Utc>) -> Result<DataFrame> {
        if df.height() == 0 {
            warn!("delivered payload has no rows, skipping transform");
            return Ok(df.clone());
        }
        let mut out = self.reconciler.apply(df)?;
        self.dates.apply(&mut out)?;
        add_created_timestamp(&mut out, created)?;
        self.drop_ignored(&mut out);

        info!(rows = out.height(), columns = out.width(), "payload transformed");
        Ok(out)
    }

    fn drop_ignored(&self, df: &mut DataFrame) {
        for name in &self.ignore_columns {
            if df.drop_in_place(name).is_err() {
                warn!(column = %name, "ignore column not present in frame");
            }
        }
    }
}

/// Same wall-clock instant on every row.
pub fn add_created_timestamp(df: &mut DataFrame, created: DateTime<Utc>) -> Result<()> {
    let millis = vec![created.timestamp_millis(); df.height()];
    let column = Column::new(TIMESTAMP_CREATED.into(), millis)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?;
    df.with_column(column)?;
    Ok(())
}
