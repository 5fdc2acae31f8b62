//! Primary-key table model.
//!
//! Holds the declared primary key of the compared table and the effective
//! subsequence selected by the user. The effective sequence drives chunk
//! ordering and windowing; the declared sequence is what identifies rows in
//! the row-level output.

use crate::error::{DiffError, Result};
use crate::fieldtype::{FieldType, FieldValue};

/// Largest supported effective primary-key arity.
pub const MAX_PK_ARITY: usize = 4;

/// One primary-key column with its resolved field type.
#[derive(Debug, Clone)]
pub struct PkColumn {
    pub name: String,
    pub data_type: String,
    pub field_type: FieldType,
}

/// Primary-key model for one diff run.
#[derive(Debug, Clone)]
pub struct PkTable {
    source_table: String,
    target_table: String,
    all_columns: Vec<PkColumn>,
    effective: Vec<PkColumn>,
}

impl PkTable {
    /// Build the model from the declared primary key and the user-selected
    /// 1-based subsequence (empty for the full declared sequence).
    pub fn new(
        source_table: impl Into<String>,
        target_table: impl Into<String>,
        all_columns: Vec<PkColumn>,
        sequence: &[usize],
    ) -> Result<Self> {
        let effective = if sequence.is_empty() {
            all_columns.clone()
        } else {
            let mut selected = Vec::with_capacity(sequence.len());
            for &position in sequence {
                let column = all_columns.get(position - 1).ok_or_else(|| {
                    DiffError::config(format!(
                        "-S position {} exceeds the {} declared primary key columns",
                        position,
                        all_columns.len()
                    ))
                })?;
                selected.push(column.clone());
            }
            selected
        };

        if effective.len() > MAX_PK_ARITY {
            return Err(DiffError::config(
                "5 or more composite pk columns are not supported",
            ));
        }

        Ok(PkTable {
            source_table: source_table.into(),
            target_table: target_table.into(),
            all_columns,
            effective,
        })
    }

    pub fn source_table(&self) -> &str {
        &self.source_table
    }

    pub fn target_table(&self) -> &str {
        &self.target_table
    }

    /// Declared primary key, used for row identity in the row-level output.
    pub fn all_columns(&self) -> &[PkColumn] {
        &self.all_columns
    }

    pub fn all_names(&self) -> Vec<String> {
        self.all_columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Effective sequence used for chunk ordering and windowing.
    pub fn effective(&self) -> &[PkColumn] {
        &self.effective
    }

    pub fn effective_names(&self) -> Vec<String> {
        self.effective.iter().map(|c| c.name.clone()).collect()
    }

    /// Number of effective PK columns.
    pub fn arity(&self) -> usize {
        self.effective.len()
    }

    pub fn is_composite(&self) -> bool {
        self.arity() > 1
    }

    /// Whether the effective sequence is a strict subsequence of the
    /// declared primary key.
    pub fn is_shortened(&self) -> bool {
        self.effective.len() < self.all_columns.len()
    }

    /// Last effective column; the only one ranged with `BETWEEN`.
    pub fn trailing(&self) -> &PkColumn {
        self.effective.last().expect("effective sequence is non-empty")
    }

    /// WHERE fragments pinning the leading columns and ranging the trailing
    /// one: `lead = ?` for each leading column, `trail BETWEEN ? AND ?` last.
    pub fn pk_where_clauses(&self) -> Vec<String> {
        let arity = self.arity();
        self.effective
            .iter()
            .enumerate()
            .map(|(i, column)| {
                if i == arity - 1 {
                    format!("{} BETWEEN ? AND ?", column.name)
                } else {
                    format!("{} = ?", column.name)
                }
            })
            .collect()
    }

    /// Parse one user boundary (comma components already split) against the
    /// effective sequence.
    pub fn parse_boundary(&self, components: &[String], flag: &str) -> Result<Vec<FieldValue>> {
        if components.len() != self.arity() {
            return Err(DiffError::config(format!(
                "{} must have one value per effective primary key column ({} expected, {} given)",
                flag,
                self.arity(),
                components.len()
            )));
        }
        components
            .iter()
            .zip(&self.effective)
            .map(|(raw, column)| column.field_type.parse(raw))
            .collect()
    }
}
