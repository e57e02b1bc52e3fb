//! Source → target column mapping.

use tracing::debug;

use crate::config::TransferProperties;
use crate::core::{Definition, LogicalType, PathRef, Row, Value};
use crate::error::{Result, TransferError};

/// Target column index for every source column, computed once per unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    indices: Vec<usize>,
    target_width: usize,
}

impl ColumnMapping {
    /// Map every source column onto the target column with the same name
    /// (case-insensitive). An empty target maps identically.
    pub fn compute(
        source_name: &str,
        source: &Definition,
        target_name: &str,
        target: &Definition,
        unsupported: &[LogicalType],
    ) -> Result<Self> {
        Self::check_supported(source_name, source, unsupported)?;

        if target.is_empty() {
            return Ok(Self::identity(source.len()));
        }

        let indices = source
            .columns
            .iter()
            .map(|column| {
                target
                    .position(&column.name)
                    .ok_or_else(|| TransferError::ColumnMismatch {
                        source_path: source_name.to_string(),
                        target: target_name.to_string(),
                        column: column.name.clone(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            indices,
            target_width: target.len(),
        })
    }

    /// Reject a source holding a column of an excluded type.
    pub fn check_supported(
        source_name: &str,
        source: &Definition,
        unsupported: &[LogicalType],
    ) -> Result<()> {
        match source
            .columns
            .iter()
            .find(|c| unsupported.contains(&c.data_type))
        {
            Some(column) => Err(TransferError::UnsupportedType {
                path: source_name.to_string(),
                column: column.name.clone(),
                data_type: column.data_type.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Mapping of `width` columns onto themselves.
    pub fn identity(width: usize) -> Self {
        Self {
            indices: (0..width).collect(),
            target_width: width,
        }
    }

    /// `indices()[i]` is the target position of source column `i`.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn target_width(&self) -> usize {
        self.target_width
    }

    pub fn is_identity(&self) -> bool {
        self.target_width == self.indices.len()
            && self.indices.iter().enumerate().all(|(i, &t)| i == t)
    }

    /// Lay a source row out in target order. Target columns without a
    /// source counterpart are left `Null`.
    pub fn remap(&self, row: Row) -> Row {
        if self.is_identity() && row.len() == self.target_width {
            return row;
        }
        let mut out = vec![Value::Null; self.target_width];
        for (value, &index) in row.into_iter().zip(&self.indices) {
            out[index] = value;
        }
        out
    }
}

/// Compute the mapping for a source/target pair. A target with no columns
/// yet receives the source structure first.
pub async fn map_columns(
    source: &PathRef,
    source_def: &Definition,
    target: &PathRef,
    props: &TransferProperties,
) -> Result<ColumnMapping> {
    let target_def = target.definition().await?;

    if target_def.is_empty() {
        debug!(
            "{}: no columns yet, copying structure of {}",
            target.qualified_name(),
            source.qualified_name()
        );
        target.apply_definition(source_def).await?;
    }

    ColumnMapping::compute(
        &source.qualified_name(),
        source_def,
        &target.qualified_name(),
        &target_def,
        props.get_unsupported_types(),
    )
}
