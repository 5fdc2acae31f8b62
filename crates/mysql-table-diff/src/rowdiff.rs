//! Row-level differ.
//!
//! Invoked for chunks whose aggregate hashes disagree: pulls per-row CRCs
//! from both endpoints over the same bounds, keys each row by the canonical
//! JSON encoding of its declared-PK tuple, and classifies every differing
//! row as insert, update, or delete.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::mysql::MySqlPool;
use sqlx::Row;
use tracing::trace;

use crate::chunk::ChunkRecord;
use crate::config::DiffOptions;
use crate::error::Result;
use crate::fieldtype::{bind_field, inline_bound_values, FieldValue};
use crate::pktable::PkTable;

/// One row as seen by a row-level probe: its CRC over the non-ignored
/// columns plus the full declared-PK tuple identifying it.
#[derive(Debug, Clone, Serialize)]
pub struct RowRecord {
    pub rowhash: u64,
    pub allpkcolumnvalues: Vec<FieldValue>,
}

/// Classified differences for one chunk. Insert and update preserve source
/// order, delete preserves target order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RowDiff {
    pub insert: Vec<RowRecord>,
    pub update: Vec<RowRecord>,
    pub delete: Vec<RowRecord>,
}

impl RowDiff {
    pub fn is_empty(&self) -> bool {
        self.insert.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

/// One line of the row-level log: the chunk fields plus the diff set.
#[derive(Debug, Clone, Serialize)]
pub struct RowLevelRecord {
    #[serde(flatten)]
    pub chunk: ChunkRecord,
    pub diff: RowDiff,
}

/// Classify rows by presence and hash equality.
///
/// - PK in source only: insert
/// - PK in both, hashes differ: update
/// - PK in target only: delete
pub fn classify(source: &[RowRecord], target: &[RowRecord]) -> Result<RowDiff> {
    let source_map = key_map(source)?;
    let target_map = key_map(target)?;

    let mut diff = RowDiff::default();
    for row in source {
        let key = pk_key(row)?;
        match target_map.get(&key) {
            None => diff.insert.push(row.clone()),
            Some(&hash) if hash != row.rowhash => diff.update.push(row.clone()),
            _ => {}
        }
    }
    for row in target {
        if !source_map.contains_key(&pk_key(row)?) {
            diff.delete.push(row.clone());
        }
    }

    Ok(diff)
}

fn pk_key(row: &RowRecord) -> Result<String> {
    Ok(serde_json::to_string(&row.allpkcolumnvalues)?)
}

fn key_map(rows: &[RowRecord]) -> Result<HashMap<String, u64>> {
    let mut map = HashMap::with_capacity(rows.len());
    for row in rows {
        map.insert(pk_key(row)?, row.rowhash);
    }
    Ok(map)
}

/// Row CRC query over a chunk's bounds. Row identity always uses the full
/// declared primary key, not the effective subsequence.
pub fn row_hash_query(
    table: &PkTable,
    table_name: &str,
    columns: &[String],
    ignore_fields: &[String],
    filter_clause: &str,
) -> String {
    let projected = columns
        .iter()
        .filter(|c| !ignore_fields.contains(c))
        .cloned()
        .collect::<Vec<_>>()
        .join(",");
    let all_pk = table.all_names().join(",");
    let where_clause = table.pk_where_clauses().join(" AND ");

    format!(
        "\
SELECT SQL_NO_CACHE
  CAST(CRC32(
    CONCAT_WS('#',{projected})
    ) AS UNSIGNED) AS crc32,{all_pk}
FROM {table_name}
WHERE {where_clause}{filter}
ORDER BY {all_pk}",
        projected = projected,
        all_pk = all_pk,
        table_name = table_name,
        where_clause = where_clause,
        filter = filter_clause,
    )
}

/// Runs the row CRC queries against both endpoints and classifies the rows.
pub struct RowDiffer<'a> {
    table: &'a PkTable,
    source: &'a MySqlPool,
    target: &'a MySqlPool,
    query_src: String,
    query_tgt: String,
}

impl<'a> RowDiffer<'a> {
    pub fn new(
        table: &'a PkTable,
        options: &DiffOptions,
        source: &'a MySqlPool,
        target: &'a MySqlPool,
        src_columns: &[String],
        tgt_columns: &[String],
    ) -> Self {
        let query_src = row_hash_query(
            table,
            table.source_table(),
            src_columns,
            &options.ignore_fields,
            &options.filter_clause(),
        );
        let query_tgt = row_hash_query(
            table,
            table.target_table(),
            tgt_columns,
            &options.ignore_fields,
            &options.filter_clause(),
        );
        trace!("row hash query (source):\n{}", query_src);
        trace!("row hash query (target):\n{}", query_tgt);

        RowDiffer {
            table,
            source,
            target,
            query_src,
            query_tgt,
        }
    }

    /// Produce the row-level record for one mismatched chunk. The chunk
    /// fields are carried over; timestamps and timings are replaced with
    /// those of the row-level probes, and the query fields with the
    /// row-level SQL.
    pub async fn diff(&self, chunk: &ChunkRecord, bounds: &[FieldValue]) -> Result<RowLevelRecord> {
        let (src, tgt) = tokio::join!(
            self.fetch_side(self.source, &self.query_src, bounds),
            self.fetch_side(self.target, &self.query_tgt, bounds)
        );
        let (src_rows, src_ts, src_elapsed) = src?;
        let (tgt_rows, tgt_ts, tgt_elapsed) = tgt?;

        let diff = classify(&src_rows, &tgt_rows)?;

        let mut record = RowLevelRecord {
            chunk: chunk.clone(),
            diff,
        };
        record.chunk.timestampsrc = src_ts;
        record.chunk.timestamptgt = tgt_ts;
        record.chunk.elapsedmssrc = src_elapsed;
        record.chunk.elapsedmstgt = tgt_elapsed;
        record.chunk.hashquerysrc = inline_bound_values(&self.query_src, bounds);
        record.chunk.hashquerytgt = inline_bound_values(&self.query_tgt, bounds);

        Ok(record)
    }

    async fn fetch_side(
        &self,
        pool: &MySqlPool,
        sql: &str,
        bounds: &[FieldValue],
    ) -> Result<(Vec<RowRecord>, DateTime<Utc>, u64)> {
        let mut query = sqlx::query(sql);
        for value in bounds {
            query = bind_field(query, value);
        }

        let ts = Utc::now();
        let started = Instant::now();
        let rows = query.fetch_all(pool).await?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let all_columns = self.table.all_columns();
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let rowhash: u64 = row.try_get(0)?;
            let mut values = Vec::with_capacity(all_columns.len());
            for (i, column) in all_columns.iter().enumerate() {
                values.push(column.field_type.decode(row, 1 + i)?);
            }
            records.push(RowRecord {
                rowhash,
                allpkcolumnvalues: values,
            });
        }

        Ok((records, ts, elapsed_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fieldtype::FieldType;
    use crate::pktable::PkColumn;

    fn row(hash: u64, pk: i64) -> RowRecord {
        RowRecord {
            rowhash: hash,
            allpkcolumnvalues: vec![FieldValue::Int(pk)],
        }
    }

    #[test]
    fn test_classify_update_only() {
        // one changed row between otherwise identical sides
        let source = vec![row(11, 1), row(99, 2), row(33, 3)];
        let target = vec![row(11, 1), row(22, 2), row(33, 3)];

        let diff = classify(&source, &target).unwrap();
        assert!(diff.insert.is_empty());
        assert!(diff.delete.is_empty());
        assert_eq!(diff.update.len(), 1);
        assert_eq!(diff.update[0].allpkcolumnvalues, vec![FieldValue::Int(2)]);
        assert_eq!(diff.update[0].rowhash, 99); // source-side hash is reported
    }

    #[test]
    fn test_classify_insert_and_delete() {
        let source = vec![row(11, 1), row(22, 2), row(33, 3), row(44, 4)];
        let target = vec![row(11, 1), row(22, 2), row(55, 5)];

        let diff = classify(&source, &target).unwrap();
        assert_eq!(
            diff.insert
                .iter()
                .map(|r| r.allpkcolumnvalues[0].clone())
                .collect::<Vec<_>>(),
            vec![FieldValue::Int(3), FieldValue::Int(4)]
        );
        assert_eq!(diff.delete.len(), 1);
        assert_eq!(diff.delete[0].allpkcolumnvalues, vec![FieldValue::Int(5)]);
        assert!(diff.update.is_empty());
    }

    #[test]
    fn test_classify_identical_sides_empty() {
        let rows = vec![row(1, 1), row(2, 2)];
        let diff = classify(&rows, &rows).unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn test_classify_counts_decompose() {
        // |insert| = rowcntsrc - common, |delete| = rowcnttgt - common
        let source = vec![row(1, 1), row(2, 2), row(3, 3)];
        let target = vec![row(2, 2), row(9, 9)];
        let diff = classify(&source, &target).unwrap();

        let common = 1;
        assert_eq!(diff.insert.len(), source.len() - common);
        assert_eq!(diff.delete.len(), target.len() - common);
        assert!(diff.update.len() <= common);
    }

    #[test]
    fn test_composite_pk_key_distinguishes_tuples() {
        let a = RowRecord {
            rowhash: 1,
            allpkcolumnvalues: vec![FieldValue::Text("d0".into()), FieldValue::Int(31)],
        };
        let b = RowRecord {
            rowhash: 1,
            allpkcolumnvalues: vec![FieldValue::Text("d03".into()), FieldValue::Int(1)],
        };
        let diff = classify(&[a], &[b]).unwrap();
        assert_eq!(diff.insert.len(), 1);
        assert_eq!(diff.delete.len(), 1);
    }

    #[test]
    fn test_row_hash_query_uses_declared_pk() {
        let table = PkTable::new(
            "dept_emp",
            "dept_emp",
            vec![
                PkColumn {
                    name: "dept_no".to_string(),
                    data_type: "char".to_string(),
                    field_type: FieldType::Char,
                },
                PkColumn {
                    name: "emp_no".to_string(),
                    data_type: "int".to_string(),
                    field_type: FieldType::Int,
                },
            ],
            &[2],
        )
        .unwrap();

        let columns: Vec<String> = ["dept_no", "emp_no", "from_date"].map(String::from).to_vec();
        let sql = row_hash_query(&table, "dept_emp", &columns, &[], "");

        // windowing uses the effective subsequence...
        assert!(sql.contains("WHERE emp_no BETWEEN ? AND ?"));
        // ...but identity and ordering use the full declared key
        assert!(sql.contains("AS crc32,dept_no,emp_no"));
        assert!(sql.ends_with("ORDER BY dept_no,emp_no"));
    }
}
