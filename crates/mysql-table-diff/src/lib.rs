//! # mysql-table-diff
//!
//! Chunked, hash-based data comparison between two MySQL-compatible tables.
//!
//! The engine walks a primary-key-ordered table in fixed-size chunks,
//! computes a server-side CRC of each chunk on the source and target
//! endpoints concurrently, and drills down to per-row hashes only where a
//! chunk disagrees, classifying each differing row as insert, update, or
//! delete. Results land in two JSON-lines logs; a secondary mode turns the
//! row-level log into reconciliation SQL.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mysql_table_diff::{DiffArgs, DiffEngine, DiffOptions, Endpoints};
//!
//! #[tokio::main]
//! async fn main() -> mysql_table_diff::Result<()> {
//!     let endpoints = Endpoints::from_env()?;
//!     let options = DiffOptions::new(DiffArgs {
//!         table: "dept_emp".to_string(),
//!         chunk_size: 1000,
//!         output: "log.json".into(),
//!         ..DiffArgs::default()
//!     })?;
//!     let mut engine = DiffEngine::new(&endpoints, options).await?;
//!     let summary = engine.run().await?;
//!     println!("{} chunks, {} mismatched", summary.chunks, summary.mismatched);
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod chunk;
pub mod config;
pub mod engine;
pub mod error;
pub mod fieldtype;
pub mod logsink;
pub mod pktable;
pub mod planner;
pub mod pool;
pub mod rowdiff;
pub mod sqlgen;

// Re-exports for convenient access
pub use chunk::{ChunkHasher, ChunkRecord};
pub use config::{DiffArgs, DiffOptions, EndpointConfig, Endpoints, REQUIRED_ENV_VARS};
pub use engine::{DiffEngine, DiffSummary};
pub use error::{DiffError, Result};
pub use fieldtype::{FieldType, FieldValue};
pub use pktable::{PkColumn, PkTable};
pub use planner::{BoundaryPlanner, ClampOutcome, PlannedChunk};
pub use rowdiff::{RowDiff, RowDiffer, RowLevelRecord, RowRecord};
pub use sqlgen::QueryOptions;
