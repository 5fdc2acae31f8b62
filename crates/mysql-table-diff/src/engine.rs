//! Main driver loop.
//!
//! Owns the mutable current lower bound and the chunk index, and drives
//! planner → hasher → (on mismatch) row differ, advancing the bound until a
//! terminal condition: the planner runs dry, the last record is reached, or
//! the user upper boundary is hit.

use sqlx::mysql::MySqlPool;
use tracing::info;

use crate::catalog;
use crate::chunk::{ChunkHasher, ChunkRecord};
use crate::config::{DiffOptions, Endpoints};
use crate::error::{DiffError, Result};
use crate::fieldtype::FieldValue;
use crate::logsink::LogSink;
use crate::pktable::PkTable;
use crate::planner::{BoundaryPlanner, ClampOutcome};
use crate::pool;
use crate::rowdiff::RowDiffer;

/// Totals reported after a completed run.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffSummary {
    /// Chunks hashed and logged.
    pub chunks: i64,
    /// Chunks whose hashes disagreed (each produced a row-level line).
    pub mismatched: i64,
}

pub struct DiffEngine {
    options: DiffOptions,
    source: MySqlPool,
    target: MySqlPool,
    table: PkTable,
    src_columns: Vec<String>,
    tgt_columns: Vec<String>,
    chunk_sink: LogSink,
    row_sink: LogSink,
}

impl DiffEngine {
    /// Connect both endpoints, discover the table, and validate everything
    /// that can fail before a chunk is processed. The log files are only
    /// created (truncating any previous run) once validation has passed.
    pub async fn new(endpoints: &Endpoints, options: DiffOptions) -> Result<Self> {
        let source = pool::connect(&endpoints.source, "source").await?;
        let target = pool::connect(&endpoints.target, "target").await?;

        let declared = catalog::primary_key_columns(&source, &options.source_table).await?;
        let table = PkTable::new(
            options.source_table.as_str(),
            options.target_table.as_str(),
            declared,
            &options.pk_column_sequence,
        )?;

        // A shortened effective sequence stalls unless every leading-group
        // prefix fits inside one chunk.
        if table.is_shortened() {
            let max_group =
                catalog::max_group_count(&source, table.source_table(), &table.effective_names())
                    .await?;
            if options.chunk_size <= max_group {
                return Err(DiffError::config(format!(
                    "chunk size should be greater than max count ({}) of group by ({}) columns",
                    max_group,
                    table.effective_names().join(", ")
                )));
            }
        }

        if !options.lower_boundary.is_empty() {
            table.parse_boundary(&options.lower_boundary, "-l")?;
        }
        if !options.upper_boundary.is_empty() {
            table.parse_boundary(&options.upper_boundary, "-u")?;
        }

        let src_columns = catalog::table_columns(&source, &options.source_table).await?;
        let tgt_columns = catalog::table_columns(&target, &options.target_table).await?;

        let chunk_sink = LogSink::create(&options.output)?;
        let row_sink = LogSink::create(&options.row_level_output())?;

        Ok(DiffEngine {
            options,
            source,
            target,
            table,
            src_columns,
            tgt_columns,
            chunk_sink,
            row_sink,
        })
    }

    /// Walk the table chunk by chunk.
    pub async fn run(&mut self) -> Result<DiffSummary> {
        let planner = BoundaryPlanner::new(&self.table, &self.options, &self.source)?;
        let hasher = ChunkHasher::new(
            &self.table,
            &self.options,
            &self.source,
            &self.target,
            &self.src_columns,
            &self.tgt_columns,
        );
        let differ = RowDiffer::new(
            &self.table,
            &self.options,
            &self.source,
            &self.target,
            &self.src_columns,
            &self.tgt_columns,
        );

        let Some(mut lower) = planner.initial_lower_bound().await? else {
            info!("table {} is empty", self.table.source_table());
            return Ok(DiffSummary::default());
        };

        let arity = self.table.arity();
        let mut summary = DiffSummary::default();
        let mut chunkidx: i64 = 0;

        'walk: loop {
            let planned = planner.plan(&lower).await?;
            if planned.is_empty() {
                break;
            }

            let group_count = planned.len();
            for (i, chunk) in planned.into_iter().enumerate() {
                for (j, value) in chunk.leading.iter().enumerate() {
                    lower[j] = value.clone();
                }
                lower[arity - 1] = chunk.trailing_lower.clone();
                let mut upper = chunk.trailing_upper.clone();

                let outcome = planner.clamp(&chunk.leading, &mut upper);
                if outcome == ClampOutcome::Discard {
                    break 'walk;
                }

                // Promoting lb to ub on a one-row chunk would walk in place;
                // this guard is what terminates the loop on the final record.
                if i == group_count - 1 && lower[arity - 1] == upper && chunk.row_count == 1 {
                    info!("END [last record]: {}", boundary_text(&lower));
                    break 'walk;
                }

                chunkidx += 1;
                let mut record = ChunkRecord::new(
                    &self.table,
                    &self.options,
                    chunkidx,
                    lower.clone(),
                    upper.clone(),
                    chunk.lookahead_sql.clone(),
                );

                let mut bounds = lower.clone();
                bounds.push(upper.clone());
                hasher.compare(&mut record, &bounds).await?;

                if !record.matched {
                    let row_level = differ.diff(&record, &bounds).await?;
                    self.row_sink.append(&row_level)?;
                    summary.mismatched += 1;
                }

                if !self.options.verbose() {
                    record.blank_queries();
                }
                self.chunk_sink.append(&record)?;
                summary.chunks += 1;

                let mut upper_tuple = lower[..arity - 1].to_vec();
                upper_tuple.push(upper.clone());
                info!(
                    "[{:<5}] [{:>5}] -l {} -u {} [RowcntSrc: {}, RowcntTgt: {}]",
                    record.matched,
                    record.chunkidx,
                    boundary_text(&lower),
                    boundary_text(&upper_tuple),
                    record.rowcntsrc,
                    record.rowcnttgt,
                );

                if outcome == ClampOutcome::StopAfterRun {
                    break 'walk;
                }

                lower[arity - 1] = upper;
            }
        }

        Ok(summary)
    }
}

fn boundary_text(values: &[FieldValue]) -> String {
    serde_json::to_string(values)
        .map(|s| s.trim_start_matches('[').trim_end_matches(']').to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_text() {
        let values = vec![FieldValue::Text("d003".to_string()), FieldValue::Int(42)];
        assert_eq!(boundary_text(&values), r#""d003",42"#);
        assert_eq!(boundary_text(&[]), "");
    }
}
