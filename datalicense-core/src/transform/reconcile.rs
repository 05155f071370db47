//! Schema reconciliation: map delivered columns onto the requested field list.
//!
//! The provider returns its own leading system columns followed by the fields
//! that were actually requested. Placeholder fields (tag-prefixed) were never
//! sent, so they are missing from the delivered suffix and get reinserted here
//! as empty columns at their intended positions.

use polars::prelude::*;

use super::SchemaError;
use crate::client::FieldSpec;

/// How each output column is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnSource {
    /// Copied from the delivered column of this name.
    Delivered(String),
    /// Reserved placeholder, null for every row.
    Placeholder(String),
}

impl ColumnSource {
    pub fn name(&self) -> &str {
        match self {
            ColumnSource::Delivered(name) | ColumnSource::Placeholder(name) => name,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchemaReconciler {
    fields: Vec<FieldSpec>,
}

impl SchemaReconciler {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    pub fn from_mnemonics(mnemonics: &[String]) -> Self {
        Self::new(mnemonics.iter().map(|m| FieldSpec::new(m.as_str())).collect())
    }

    /// Final field names, tags stripped, in requested order.
    pub fn output_fields(&self) -> Vec<&str> {
        self.fields.iter().map(FieldSpec::column_name).collect()
    }

    fn requested_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| !f.is_placeholder())
            .map(|f| f.mnemonic.as_str())
            .collect()
    }

    /// Work out the output column layout for a delivered column sequence.
    pub fn plan(&self, delivered: &[String]) -> Result<Vec<ColumnSource>, SchemaError> {
        let output = self.output_fields();

        // Already reconciled: the tail is the full stripped field list.
        if ends_with(delivered, &output) {
            return Ok(delivered
                .iter()
                .map(|c| ColumnSource::Delivered(c.clone()))
                .collect());
        }

        let requested = self.requested_fields();
        if !ends_with(delivered, &requested) {
            return Err(SchemaError::SuffixNotFound {
                expected: requested.iter().map(|s| s.to_string()).collect(),
                delivered: delivered.to_vec(),
            });
        }

        let leading = &delivered[..delivered.len() - requested.len()];
        let mut plan: Vec<ColumnSource> = leading
            .iter()
            .map(|c| ColumnSource::Delivered(c.clone()))
            .collect();
        for field in &self.fields {
            let name = field.column_name().to_string();
            if field.is_placeholder() {
                plan.push(ColumnSource::Placeholder(name));
            } else {
                plan.push(ColumnSource::Delivered(name));
            }
        }

        for (i, source) in plan.iter().enumerate() {
            if plan[..i].iter().any(|p| p.name() == source.name()) {
                return Err(SchemaError::DuplicateColumn(source.name().to_string()));
            }
        }
        Ok(plan)
    }

    /// Reconcile a delivered frame. Fails rather than misalign columns.
    pub fn apply(&self, df: &DataFrame) -> Result<DataFrame, SchemaError> {
        let delivered: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        let plan = self.plan(&delivered)?;

        let height = df.height();
        let columns = plan
            .iter()
            .map(|source| match source {
                ColumnSource::Delivered(name) => df
                    .column(name)
                    .cloned()
                    .map_err(|e| SchemaError::Frame(e.to_string())),
                ColumnSource::Placeholder(name) => Ok(Column::full_null(
                    name.as_str().into(),
                    height,
                    &DataType::String,
                )),
            })
            .collect::<Result<Vec<Column>, SchemaError>>()?;

        DataFrame::new(columns).map_err(|e| SchemaError::Frame(e.to_string()))
    }
}

fn ends_with(delivered: &[String], tail: &[&str]) -> bool {
    delivered.len() >= tail.len()
        && delivered[delivered.len() - tail.len()..]
            .iter()
            .zip(tail)
            .all(|(d, t)| d == t)
}
