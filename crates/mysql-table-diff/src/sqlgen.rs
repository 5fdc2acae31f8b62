//! Reconciliation SQL generation.
//!
//! Consumes a row-level log (file or stdin) and synthesizes the SQL that
//! would reconcile the target table with the source: for each requested CRUD
//! kind, a source-side staging table populated by joining the source table
//! against the logged PK tuples, then the target-side INSERT/UPDATE/DELETE.
//! Boundary rows appear in two adjacent chunk lines, so rows are
//! deduplicated during consolidation.

use std::collections::HashSet;
use std::io::{BufRead, BufReader, IsTerminal};
use std::path::PathBuf;

use serde::Deserialize;
use sqlx::mysql::MySqlPool;

use crate::catalog;
use crate::error::{DiffError, Result};

/// `query` subcommand options.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub insert: bool,
    pub update: bool,
    pub delete: bool,
    pub rowlevel_file: Option<PathBuf>,
}

/// One parsed row-level log line; only the fields the generator needs.
#[derive(Debug, Deserialize)]
pub struct RowLevelLine {
    pub tablesrc: String,
    pub tabletgt: String,
    pub diff: DiffSection,
}

#[derive(Debug, Deserialize)]
pub struct DiffSection {
    pub insert: Vec<RawRow>,
    pub update: Vec<RawRow>,
    pub delete: Vec<RawRow>,
}

#[derive(Debug, Deserialize)]
pub struct RawRow {
    #[allow(dead_code)]
    pub rowhash: u64,
    pub allpkcolumnvalues: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrudKind {
    Insert,
    Update,
    Delete,
}

impl CrudKind {
    pub fn label(self) -> &'static str {
        match self {
            CrudKind::Insert => "insert",
            CrudKind::Update => "update",
            CrudKind::Delete => "delete",
        }
    }
}

/// Row-level log content folded across chunk lines, plus the catalog
/// metadata needed to render statements.
#[derive(Debug, Default)]
pub struct Consolidated {
    pub table_src: String,
    pub table_tgt: String,
    pub all_pk_names: Vec<String>,
    pub field_columns: Vec<String>,
    pub insert_rows: Vec<String>,
    pub update_rows: Vec<String>,
    pub delete_rows: Vec<String>,
}

impl Consolidated {
    pub fn rows(&self, kind: CrudKind) -> &[String] {
        match kind {
            CrudKind::Insert => &self.insert_rows,
            CrudKind::Update => &self.update_rows,
            CrudKind::Delete => &self.delete_rows,
        }
    }
}

/// Generate the requested statements from parsed row-level lines, resolving
/// column metadata from the source endpoint.
pub async fn generate(
    pool: &MySqlPool,
    lines: &[RowLevelLine],
    options: &QueryOptions,
) -> Result<String> {
    let Some(first) = lines.first() else {
        return Err(DiffError::config("either -f <file> or pipe is empty"));
    };
    let table_src = first.tablesrc.clone();
    let field_columns = catalog::table_columns(pool, &table_src).await?;
    let pk_columns = catalog::primary_key_columns(pool, &table_src).await?;
    let all_pk_names: Vec<String> = pk_columns.iter().map(|c| c.name.clone()).collect();
    let quotes: Vec<bool> = pk_columns
        .iter()
        .map(|c| c.field_type.with_quote())
        .collect();

    let mut consolidated = consolidate(lines, &quotes);
    consolidated.all_pk_names = all_pk_names;
    consolidated.field_columns = field_columns;

    let mut output = String::new();
    for (enabled, kind) in [
        (options.delete, CrudKind::Delete),
        (options.insert, CrudKind::Insert),
        (options.update, CrudKind::Update),
    ] {
        if enabled {
            output.push_str(&section(kind, &consolidated));
        }
    }
    Ok(output)
}

/// Fold row-level lines into per-kind formatted PK rows, deduplicating
/// tuples repeated across chunk boundaries. Order of first appearance is
/// preserved.
pub fn consolidate(lines: &[RowLevelLine], quotes: &[bool]) -> Consolidated {
    let mut consolidated = Consolidated {
        table_src: lines[0].tablesrc.clone(),
        table_tgt: lines[0].tabletgt.clone(),
        ..Consolidated::default()
    };

    let mut seen: [HashSet<String>; 3] = Default::default();
    for line in lines {
        let sections = [
            (&line.diff.insert, 0),
            (&line.diff.update, 1),
            (&line.diff.delete, 2),
        ];
        for (rows, slot) in sections {
            for row in rows {
                let formatted = format_pk_row(&row.allpkcolumnvalues, quotes);
                if seen[slot].insert(formatted.clone()) {
                    match slot {
                        0 => consolidated.insert_rows.push(formatted),
                        1 => consolidated.update_rows.push(formatted),
                        _ => consolidated.delete_rows.push(formatted),
                    }
                }
            }
        }
    }

    consolidated
}

/// Render a PK tuple as a VALUES row body, quoting by column type.
pub fn format_pk_row(values: &[serde_json::Value], quotes: &[bool]) -> String {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let raw = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if quotes.get(i).copied().unwrap_or(false) {
                format!("'{}'", raw.replace('\'', "''"))
            } else {
                raw
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn section(kind: CrudKind, consolidated: &Consolidated) -> String {
    let mut out = format!(
        "\n-- [{}] {}\n",
        kind.label(),
        "-".repeat(70 - kind.label().len())
    );
    if consolidated.rows(kind).is_empty() {
        out.push_str("-- <empty>\n");
    } else {
        out.push_str(&statement(kind, consolidated));
    }
    out
}

/// Render the statements for one CRUD kind.
pub fn statement(kind: CrudKind, consolidated: &Consolidated) -> String {
    let table_src = &consolidated.table_src;
    let table_tgt = &consolidated.table_tgt;
    let pk_list = consolidated.all_pk_names.join(",");
    let staging = format!("{}_diff_{}", table_src, kind.label());
    let fields = &consolidated.field_columns;

    let values_rows = consolidated
        .rows(kind)
        .iter()
        .map(|row| format!("ROW({})", row))
        .collect::<Vec<_>>()
        .join(",\n      ");

    if kind == CrudKind::Delete {
        // No staging table: the logged tuples identify the doomed rows.
        return format!(
            "\
-- target
DELETE t
FROM /*target*/ {table_tgt} AS t
INNER JOIN (
  SELECT *
  FROM (VALUES
      {values_rows}
    ) AS d({pk_list})
  ) AS dif
USING ({pk_list});
",
            table_tgt = table_tgt,
            values_rows = values_rows,
            pk_list = pk_list,
        );
    }

    let mut out = format!(
        "\
-- source
DROP TABLE IF EXISTS {staging};
CREATE TABLE {staging} AS SELECT * FROM /*source*/ {table_src} WHERE 1=2;
ALTER TABLE {staging} ADD PRIMARY KEY ({pk_list});

INSERT INTO {staging}(
  {field_list})
SELECT
  s.{select_list}
FROM /*source*/ {table_src} AS s
INNER JOIN (
  SELECT *
  FROM (VALUES
      {values_rows}
    ) AS d({pk_list})
  ) AS dif
USING ({pk_list});
",
        staging = staging,
        table_src = table_src,
        field_list = fields.join(",\n  "),
        select_list = fields.join(",\n  s."),
        values_rows = values_rows,
        pk_list = pk_list,
    );

    match kind {
        CrudKind::Insert => {
            out.push_str(&format!(
                "\

-- target
INSERT INTO /*target*/ {table_tgt}(
  {field_list})
SELECT
  s.{select_list}
FROM /*target*/ {staging} AS s;
",
                table_tgt = table_tgt,
                field_list = fields.join(",\n  "),
                select_list = fields.join(",\n  s."),
                staging = staging,
            ));
        }
        CrudKind::Update => {
            let assignments = fields
                .iter()
                .map(|field| {
                    if consolidated.all_pk_names.contains(field) {
                        format!("  -- /*PK*/ t.{} = s.{}", field, field)
                    } else {
                        format!("  t.{} = s.{}", field, field)
                    }
                })
                .collect::<Vec<_>>()
                .join(",\n");
            out.push_str(&format!(
                "\

-- target
UPDATE /*target*/ {table_tgt} AS t
INNER JOIN /*target*/ {staging} AS s
USING ({pk_list})
SET
{assignments};
",
                table_tgt = table_tgt,
                staging = staging,
                pk_list = pk_list,
                assignments = assignments,
            ));
        }
        CrudKind::Delete => unreachable!(),
    }

    out
}

/// Read and parse the row-level log, preferring piped stdin over `-f`.
pub fn read_rowlevel_lines(options: &QueryOptions) -> Result<Vec<RowLevelLine>> {
    let stdin = std::io::stdin();

    let raw_lines: Vec<String> = if !stdin.is_terminal() {
        collect_lines(BufReader::new(stdin.lock()))?
    } else if let Some(path) = &options.rowlevel_file {
        collect_lines(BufReader::new(std::fs::File::open(path)?))?
    } else {
        return Err(DiffError::config("require either -f <file> or pipe"));
    };

    let mut lines = Vec::with_capacity(raw_lines.len());
    for raw in &raw_lines {
        if raw.trim().is_empty() {
            continue;
        }
        lines.push(serde_json::from_str::<RowLevelLine>(raw)?);
    }

    if lines.is_empty() {
        return Err(DiffError::config("either -f <file> or pipe is empty"));
    }
    Ok(lines)
}

fn collect_lines<R: BufRead>(reader: R) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for line in reader.lines() {
        lines.push(line?);
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(json: &str) -> RowLevelLine {
        serde_json::from_str(json).unwrap()
    }

    fn sample_lines() -> Vec<RowLevelLine> {
        vec![
            line(
                r#"{"tablesrc":"dept_emp","tabletgt":"dept_emp_copy","diff":{
                    "insert":[{"rowhash":10,"allpkcolumnvalues":["d003",3]},
                              {"rowhash":11,"allpkcolumnvalues":["d003",4]}],
                    "update":[],
                    "delete":[{"rowhash":12,"allpkcolumnvalues":["d003",5]}]}}"#,
            ),
            // boundary row ["d003",4] repeats in the next chunk line
            line(
                r#"{"tablesrc":"dept_emp","tabletgt":"dept_emp_copy","diff":{
                    "insert":[{"rowhash":11,"allpkcolumnvalues":["d003",4]}],
                    "update":[{"rowhash":13,"allpkcolumnvalues":["d004",1]}],
                    "delete":[]}}"#,
            ),
        ]
    }

    fn consolidated() -> Consolidated {
        let mut c = consolidate(&sample_lines(), &[true, false]);
        c.all_pk_names = vec!["dept_no".to_string(), "emp_no".to_string()];
        c.field_columns = ["dept_no", "emp_no", "from_date"].map(String::from).to_vec();
        c
    }

    #[test]
    fn test_consolidate_dedups_boundary_rows() {
        let c = consolidated();
        assert_eq!(c.insert_rows, vec!["'d003',3", "'d003',4"]);
        assert_eq!(c.update_rows, vec!["'d004',1"]);
        assert_eq!(c.delete_rows, vec!["'d003',5"]);
        assert_eq!(c.table_src, "dept_emp");
        assert_eq!(c.table_tgt, "dept_emp_copy");
    }

    #[test]
    fn test_format_pk_row_quoting() {
        let values = vec![
            serde_json::Value::String("o'brien".to_string()),
            serde_json::json!(42),
        ];
        assert_eq!(format_pk_row(&values, &[true, false]), "'o''brien',42");
    }

    #[test]
    fn test_insert_statement_shape() {
        let sql = statement(CrudKind::Insert, &consolidated());

        assert!(sql.contains("DROP TABLE IF EXISTS dept_emp_diff_insert;"));
        assert!(sql.contains("CREATE TABLE dept_emp_diff_insert AS SELECT * FROM /*source*/ dept_emp WHERE 1=2;"));
        assert!(sql.contains("ADD PRIMARY KEY (dept_no,emp_no);"));
        assert!(sql.contains("ROW('d003',3)"));
        assert!(sql.contains("USING (dept_no,emp_no);"));
        assert!(sql.contains("INSERT INTO /*target*/ dept_emp_copy("));
    }

    #[test]
    fn test_update_statement_comments_pk_assignments() {
        let sql = statement(CrudKind::Update, &consolidated());

        assert!(sql.contains("UPDATE /*target*/ dept_emp_copy AS t"));
        assert!(sql.contains("-- /*PK*/ t.dept_no = s.dept_no"));
        assert!(sql.contains("  t.from_date = s.from_date"));
    }

    #[test]
    fn test_delete_statement_skips_staging() {
        let sql = statement(CrudKind::Delete, &consolidated());

        assert!(sql.contains("DELETE t"));
        assert!(sql.contains("ROW('d003',5)"));
        assert!(!sql.contains("DROP TABLE"));
        assert!(!sql.contains("dept_emp_diff_delete"));
    }

    #[test]
    fn test_section_marks_empty_kinds() {
        let mut c = consolidated();
        c.update_rows.clear();
        let out = section(CrudKind::Update, &c);
        assert!(out.contains("-- [update]"));
        assert!(out.contains("-- <empty>"));
    }
}
