//! Chunk-level hashing.
//!
//! For each planned chunk the hasher runs the aggregate CRC query against
//! both endpoints concurrently and folds the two results into the chunk
//! record. A chunk matches when both the row counts and the aggregate CRCs
//! agree.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::mysql::MySqlPool;
use sqlx::Row;
use tracing::trace;

use crate::config::DiffOptions;
use crate::error::Result;
use crate::fieldtype::{bind_field, inline_bound_values, FieldValue};
use crate::pktable::PkTable;

/// One line of the chunk log.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkRecord {
    #[serde(rename = "match")]
    pub matched: bool,
    pub chunkidx: i64,
    pub timestampsrc: DateTime<Utc>,
    pub timestamptgt: DateTime<Utc>,
    pub elapsedmssrc: u64,
    pub elapsedmstgt: u64,
    pub tablesrc: String,
    pub tabletgt: String,
    pub pkcolumnnames: Vec<String>,
    pub pkcolumnsequence: Vec<String>,
    pub rowcntsrc: i64,
    pub rowcnttgt: i64,
    pub hashsrc: u64,
    pub hashtgt: u64,
    pub ignorefields: Vec<String>,
    pub additionalfilter: String,
    pub lastpkfieldupperboundary: FieldValue,
    pub lowerboundary: Vec<FieldValue>,
    pub upperboundaryquery: String,
    pub hashquerysrc: String,
    pub hashquerytgt: String,
}

impl ChunkRecord {
    pub fn new(
        table: &PkTable,
        options: &DiffOptions,
        chunkidx: i64,
        lowerboundary: Vec<FieldValue>,
        upper: FieldValue,
        upperboundaryquery: String,
    ) -> Self {
        let now = Utc::now();
        ChunkRecord {
            matched: false,
            chunkidx,
            timestampsrc: now,
            timestamptgt: now,
            elapsedmssrc: 0,
            elapsedmstgt: 0,
            tablesrc: table.source_table().to_string(),
            tabletgt: table.target_table().to_string(),
            pkcolumnnames: table.effective_names(),
            pkcolumnsequence: options
                .pk_column_sequence
                .iter()
                .map(|p| p.to_string())
                .collect(),
            rowcntsrc: 0,
            rowcnttgt: 0,
            hashsrc: 0,
            hashtgt: 0,
            ignorefields: options.ignore_fields.clone(),
            additionalfilter: options.additional_filter.clone(),
            lastpkfieldupperboundary: upper,
            lowerboundary,
            upperboundaryquery,
            hashquerysrc: String::new(),
            hashquerytgt: String::new(),
        }
    }

    /// Drop the SQL text fields before flushing (non-verbose runs).
    pub fn blank_queries(&mut self) {
        self.upperboundaryquery.clear();
        self.hashquerysrc.clear();
        self.hashquerytgt.clear();
    }
}

/// Result of one hash probe, tagged by the side it came from through the
/// field it is stored into.
#[derive(Debug, Clone)]
struct HashProbe {
    rowcnt: i64,
    hash: u64,
    ts: DateTime<Utc>,
    elapsed_ms: u64,
}

/// Runs the chunk CRC query against both endpoints.
pub struct ChunkHasher<'a> {
    source: &'a MySqlPool,
    target: &'a MySqlPool,
    query_src: String,
    query_tgt: String,
}

impl<'a> ChunkHasher<'a> {
    /// Build the hasher with each endpoint's own column list (the two tables
    /// may declare columns in different order).
    pub fn new(
        table: &PkTable,
        options: &DiffOptions,
        source: &'a MySqlPool,
        target: &'a MySqlPool,
        src_columns: &[String],
        tgt_columns: &[String],
    ) -> Self {
        let query_src = chunk_hash_query(
            table,
            table.source_table(),
            src_columns,
            &options.ignore_fields,
            &options.filter_clause(),
        );
        let query_tgt = chunk_hash_query(
            table,
            table.target_table(),
            tgt_columns,
            &options.ignore_fields,
            &options.filter_clause(),
        );
        trace!("chunk hash query (source):\n{}", query_src);
        trace!("chunk hash query (target):\n{}", query_tgt);

        ChunkHasher {
            source,
            target,
            query_src,
            query_tgt,
        }
    }

    /// Run both probes concurrently and fold the results into the record.
    /// `bounds` carries the lower-boundary values followed by the trailing
    /// upper boundary, matching the `= ?` / `BETWEEN ? AND ?` placeholders.
    pub async fn compare(&self, record: &mut ChunkRecord, bounds: &[FieldValue]) -> Result<()> {
        let (src, tgt) = tokio::join!(
            probe(self.source, &self.query_src, bounds),
            probe(self.target, &self.query_tgt, bounds)
        );
        let src = src?;
        let tgt = tgt?;

        record.rowcntsrc = src.rowcnt;
        record.hashsrc = src.hash;
        record.timestampsrc = src.ts;
        record.elapsedmssrc = src.elapsed_ms;

        record.rowcnttgt = tgt.rowcnt;
        record.hashtgt = tgt.hash;
        record.timestamptgt = tgt.ts;
        record.elapsedmstgt = tgt.elapsed_ms;

        record.matched = src.rowcnt == tgt.rowcnt && src.hash == tgt.hash;

        record.hashquerysrc = inline_bound_values(&self.query_src, bounds);
        record.hashquerytgt = inline_bound_values(&self.query_tgt, bounds);

        Ok(())
    }
}

async fn probe(pool: &MySqlPool, sql: &str, bounds: &[FieldValue]) -> Result<HashProbe> {
    let mut query = sqlx::query(sql);
    for value in bounds {
        query = bind_field(query, value);
    }

    let ts = Utc::now();
    let started = Instant::now();
    let row = query.fetch_one(pool).await?;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    Ok(HashProbe {
        rowcnt: row.try_get(0)?,
        hash: row.try_get(1)?,
        ts,
        elapsed_ms,
    })
}

/// Chunk CRC query: per-row CRC32 over the non-ignored columns, aggregated
/// through GROUP_CONCAT and hashed again, coalesced to 0 for empty ranges.
pub fn chunk_hash_query(
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
    let where_clause = table.pk_where_clauses().join(" AND ");

    format!(
        "\
SELECT SQL_NO_CACHE
  COUNT(1) AS rowcnt,
  COALESCE(
    CAST(CRC32(
      GROUP_CONCAT(
        CAST(CRC32(
          CONCAT_WS('#',{projected})
          ) AS UNSIGNED)
        )
      ) AS UNSIGNED),
    0) AS crc32
FROM {table_name}
WHERE {where_clause}{filter}",
        projected = projected,
        table_name = table_name,
        where_clause = where_clause,
        filter = filter_clause,
    )
}
