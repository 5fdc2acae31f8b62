//! Boundary planner.
//!
//! Given the current lower-bound tuple, the planner asks the source endpoint
//! for the next chunk's row count and trailing upper boundary through a
//! windowed lookahead query. For composite keys the lookahead is scoped to
//! the current leading-group values and unwinds one column at a time when the
//! window has capacity left past the current group, so no chunk ever
//! straddles a leading-group transition with the trailing column unpinned.

use sqlx::mysql::MySqlPool;
use sqlx::Row;
use tracing::{debug, trace};

use crate::config::DiffOptions;
use crate::error::Result;
use crate::fieldtype::{bind_field, inline_bound_values, FieldValue};
use crate::pktable::PkTable;

/// One planner result row: the bounds of a chunk to hash.
#[derive(Debug, Clone)]
pub struct PlannedChunk {
    /// Source rows falling inside this chunk's window.
    pub row_count: i64,
    /// Values of the leading effective PK columns (empty for single-PK).
    pub leading: Vec<FieldValue>,
    /// Trailing lower bound: the current bound for the group the walk is in,
    /// the type's lowest value for groups entered during unwinding.
    pub trailing_lower: FieldValue,
    /// `MAX(trailing)` observed inside the window.
    pub trailing_upper: FieldValue,
    /// Lookahead SQL with bound values inlined, recorded in the chunk log.
    pub lookahead_sql: String,
}

/// Outcome of comparing a planned chunk to the user upper boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClampOutcome {
    /// Chunk lies below the boundary; hash it and keep walking.
    Proceed,
    /// Chunk reaches (or was clamped to) the boundary; hash it, then stop.
    StopAfterRun,
    /// Chunk lies entirely past the boundary; traversal is complete.
    Discard,
}

/// Computes chunk boundaries against the source endpoint.
pub struct BoundaryPlanner<'a> {
    table: &'a PkTable,
    options: &'a DiffOptions,
    source: &'a MySqlPool,
    user_upper: Option<Vec<FieldValue>>,
}

impl<'a> BoundaryPlanner<'a> {
    pub fn new(table: &'a PkTable, options: &'a DiffOptions, source: &'a MySqlPool) -> Result<Self> {
        let user_upper = if options.upper_boundary.is_empty() {
            None
        } else {
            Some(table.parse_boundary(&options.upper_boundary, "-u")?)
        };
        Ok(BoundaryPlanner {
            table,
            options,
            source,
            user_upper,
        })
    }

    /// Lower bound for the first chunk: the user-supplied `-l` tuple when
    /// given, otherwise the first record of the source table in PK order.
    /// `None` means the source table is empty.
    pub async fn initial_lower_bound(&self) -> Result<Option<Vec<FieldValue>>> {
        if !self.options.lower_boundary.is_empty() {
            let bound = self.table.parse_boundary(&self.options.lower_boundary, "-l")?;
            debug!("initial lower boundary from -l: {:?}", bound);
            return Ok(Some(bound));
        }

        let names = self.table.effective_names().join(",");
        let sql = format!(
            "SELECT SQL_NO_CACHE {names} FROM {table} ORDER BY {names} LIMIT 1",
            names = names,
            table = self.table.source_table(),
        );
        trace!("{}", sql);

        let row = sqlx::query(&sql).fetch_optional(self.source).await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut bound = Vec::with_capacity(self.table.arity());
        for (i, column) in self.table.effective().iter().enumerate() {
            bound.push(column.field_type.decode(&row, i)?);
        }
        debug!("initial lower boundary from table: {:?}", bound);
        Ok(Some(bound))
    }

    /// Plan the next chunk. Returns one row for a single-PK table or a
    /// within-group window; multiple rows when the window crossed into
    /// further leading groups. An empty result means no rows remain.
    pub async fn plan(&self, lower: &[FieldValue]) -> Result<Vec<PlannedChunk>> {
        let arity = self.table.arity();
        let trailing_type = self.table.trailing().field_type;

        let mut chunks = Vec::new();
        let mut bound: Vec<FieldValue> = lower.to_vec();
        let mut remaining = self.options.chunk_size;

        for step in 0..arity {
            let inclusive = step == 0;
            let operators = operator_vector(bound.len(), inclusive);
            let sql = lookahead_query(
                self.table,
                &self.options.filter_clause(),
                &operators,
                remaining,
            );
            trace!("{}", sql);

            let mut query = sqlx::query(&sql);
            for value in &bound {
                query = bind_field(query, value);
            }
            let rows = query.fetch_all(self.source).await?;
            let recorded_sql = inline_bound_values(&sql, &bound);

            let mut collected = 0i64;
            for row in &rows {
                let row_count: i64 = row.try_get(0)?;
                if row_count == 0 {
                    // single-PK lookahead over an empty window: one row of
                    // (0, NULL)
                    continue;
                }

                let mut leading = Vec::with_capacity(arity - 1);
                for (i, column) in self.table.effective()[..arity - 1].iter().enumerate() {
                    leading.push(column.field_type.decode(row, 1 + i)?);
                }
                let trailing_upper = trailing_type.decode(row, arity)?;
                let trailing_lower = if inclusive {
                    lower[arity - 1].clone()
                } else {
                    trailing_type.lowest()
                };

                collected += row_count;
                chunks.push(PlannedChunk {
                    row_count,
                    leading,
                    trailing_lower,
                    trailing_upper,
                    lookahead_sql: recorded_sql.clone(),
                });
            }

            debug!(
                "lookahead step {} collected {} rows, {} groups so far",
                step,
                collected,
                chunks.len()
            );

            remaining -= collected;
            if arity == 1 || remaining <= 0 {
                break;
            }
            // The window ran short: the current leading group is exhausted.
            // Unpin the deepest bound column and search past it.
            bound.pop();
            if bound.is_empty() {
                break;
            }
        }

        Ok(chunks)
    }

    /// Compare a planned chunk to the user upper boundary, clamping the
    /// trailing upper bound in place where required.
    pub fn clamp(&self, leading: &[FieldValue], trailing_upper: &mut FieldValue) -> ClampOutcome {
        match &self.user_upper {
            Some(user_upper) => clamp_to_upper(user_upper, leading, trailing_upper),
            None => ClampOutcome::Proceed,
        }
    }
}

/// Operator vector for a lookahead with `prefix` bound columns: equality on
/// all but the deepest, `>=` on the first probe of a group, `>` once the walk
/// is promoting past it.
pub fn operator_vector(prefix: usize, inclusive: bool) -> Vec<&'static str> {
    let mut operators = vec!["="; prefix];
    *operators.last_mut().expect("prefix is at least 1") = if inclusive { ">=" } else { ">" };
    operators
}

/// Build the windowed lookahead query for the given operator vector.
pub fn lookahead_query(
    table: &PkTable,
    filter_clause: &str,
    operators: &[&str],
    limit: i64,
) -> String {
    let names = table.effective_names();
    let all = names.join(",");
    let trailing = &table.trailing().name;

    let where_clause = operators
        .iter()
        .enumerate()
        .map(|(i, op)| format!("{} {} ?", names[i], op))
        .collect::<Vec<_>>()
        .join(" AND ");

    if !table.is_composite() {
        return format!(
            "\
SELECT SQL_NO_CACHE
  COUNT(1) AS rowcnt, MAX({trailing})
FROM (
  SELECT {trailing}
  FROM {source}
  WHERE {where_clause}{filter}
  ORDER BY {trailing}
  LIMIT {limit}) AS A",
            trailing = trailing,
            source = table.source_table(),
            where_clause = where_clause,
            filter = filter_clause,
            limit = limit,
        );
    }

    let leading = names[..names.len() - 1].join(",");
    format!(
        "\
SELECT SQL_NO_CACHE
  COUNT(1) AS rowcnt,{leading},MAX({trailing})
FROM (
  SELECT {all}
  FROM {source}
  WHERE {where_clause}{filter}
  ORDER BY {all}
  LIMIT {limit}) AS A
GROUP BY {leading}
ORDER BY {leading}",
        leading = leading,
        trailing = trailing,
        all = all,
        source = table.source_table(),
        where_clause = where_clause,
        filter = filter_clause,
        limit = limit,
    )
}

/// Clamp a planned chunk against a parsed user upper boundary.
///
/// Leading columns are compared element-wise: the first strict inequality
/// decides whether the chunk lies entirely below the boundary (proceed
/// unclamped) or entirely past it (discard). With every leading column equal
/// the trailing upper is clamped to the user's trailing component.
pub fn clamp_to_upper(
    user_upper: &[FieldValue],
    leading: &[FieldValue],
    trailing_upper: &mut FieldValue,
) -> ClampOutcome {
    for (candidate, user) in leading.iter().zip(user_upper) {
        if candidate == user {
            continue;
        }
        return if user.greater_than(candidate) {
            ClampOutcome::Proceed
        } else {
            ClampOutcome::Discard
        };
    }

    let user_trailing = &user_upper[user_upper.len() - 1];
    if trailing_upper == user_trailing {
        ClampOutcome::StopAfterRun
    } else if trailing_upper.greater_than(user_trailing) {
        *trailing_upper = user_trailing.clone();
        ClampOutcome::StopAfterRun
    } else {
        ClampOutcome::Proceed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fieldtype::FieldType;
    use crate::pktable::PkColumn;

    fn int_column(name: &str) -> PkColumn {
        PkColumn {
            name: name.to_string(),
            data_type: "int".to_string(),
            field_type: FieldType::Int,
        }
    }

    fn table_with_arity(arity: usize) -> PkTable {
        let columns = (0..arity).map(|i| int_column(&format!("k{}", i))).collect();
        PkTable::new("orders", "orders", columns, &[]).unwrap()
    }

    #[test]
    fn test_operator_families() {
        // arity 2: [=,>=] then [>]
        assert_eq!(operator_vector(2, true), vec!["=", ">="]);
        assert_eq!(operator_vector(1, false), vec![">"]);
        // arity 3: [=,=,>=] then [=,>] then [>]
        assert_eq!(operator_vector(3, true), vec!["=", "=", ">="]);
        assert_eq!(operator_vector(2, false), vec!["=", ">"]);
        // arity 4 first probe
        assert_eq!(operator_vector(4, true), vec!["=", "=", "=", ">="]);
    }

    #[test]
    fn test_single_pk_lookahead_query() {
        let table = table_with_arity(1);
        let sql = lookahead_query(&table, "", &operator_vector(1, true), 1000);

        assert!(sql.contains("COUNT(1) AS rowcnt, MAX(k0)"));
        assert!(sql.contains("WHERE k0 >= ?"));
        assert!(sql.contains("LIMIT 1000"));
        assert!(sql.contains("SQL_NO_CACHE"));
        assert!(!sql.contains("GROUP BY"));
    }

    #[test]
    fn test_composite_lookahead_query() {
        let table = table_with_arity(3);
        let sql = lookahead_query(&table, "", &operator_vector(3, true), 500);

        assert!(sql.contains("COUNT(1) AS rowcnt,k0,k1,MAX(k2)"));
        assert!(sql.contains("WHERE k0 = ? AND k1 = ? AND k2 >= ?"));
        assert!(sql.contains("ORDER BY k0,k1,k2"));
        assert!(sql.contains("GROUP BY k0,k1"));
        assert!(sql.contains("LIMIT 500"));
    }

    #[test]
    fn test_unwound_lookahead_drops_trailing_filter() {
        let table = table_with_arity(3);
        let sql = lookahead_query(&table, "", &operator_vector(2, false), 123);

        assert!(sql.contains("WHERE k0 = ? AND k1 > ?"));
        assert!(!sql.contains("k2 >"));
        // the projection and grouping keep the full effective sequence
        assert!(sql.contains("MAX(k2)"));
        assert!(sql.contains("GROUP BY k0,k1"));
    }

    #[test]
    fn test_lookahead_query_with_filter() {
        let table = table_with_arity(1);
        let sql = lookahead_query(&table, " AND flag > 3", &operator_vector(1, true), 10);
        assert!(sql.contains("WHERE k0 >= ? AND flag > 3"));
    }

    #[test]
    fn test_clamp_proceed_below_bound() {
        let user = vec![FieldValue::Int(7)];
        let mut upper = FieldValue::Int(5);
        assert_eq!(clamp_to_upper(&user, &[], &mut upper), ClampOutcome::Proceed);
        assert_eq!(upper, FieldValue::Int(5));
    }

    #[test]
    fn test_clamp_exact_stop() {
        let user = vec![FieldValue::Int(7)];
        let mut upper = FieldValue::Int(7);
        assert_eq!(
            clamp_to_upper(&user, &[], &mut upper),
            ClampOutcome::StopAfterRun
        );
        assert_eq!(upper, FieldValue::Int(7));
    }

    #[test]
    fn test_clamp_overwrites_past_bound() {
        let user = vec![FieldValue::Int(7)];
        let mut upper = FieldValue::Int(9);
        assert_eq!(
            clamp_to_upper(&user, &[], &mut upper),
            ClampOutcome::StopAfterRun
        );
        assert_eq!(upper, FieldValue::Int(7));
    }

    #[test]
    fn test_clamp_composite_leading_below() {
        let user = vec![FieldValue::Text("d005".into()), FieldValue::Int(100)];
        let leading = vec![FieldValue::Text("d003".into())];
        let mut upper = FieldValue::Int(999);
        assert_eq!(
            clamp_to_upper(&user, &leading, &mut upper),
            ClampOutcome::Proceed
        );
        assert_eq!(upper, FieldValue::Int(999));
    }

    #[test]
    fn test_clamp_composite_leading_past() {
        let user = vec![FieldValue::Text("d005".into()), FieldValue::Int(100)];
        let leading = vec![FieldValue::Text("d006".into())];
        let mut upper = FieldValue::Int(1);
        assert_eq!(
            clamp_to_upper(&user, &leading, &mut upper),
            ClampOutcome::Discard
        );
    }

    #[test]
    fn test_clamp_composite_leading_equal_clamps_trailing() {
        let user = vec![FieldValue::Text("d005".into()), FieldValue::Int(100)];
        let leading = vec![FieldValue::Text("d005".into())];
        let mut upper = FieldValue::Int(150);
        assert_eq!(
            clamp_to_upper(&user, &leading, &mut upper),
            ClampOutcome::StopAfterRun
        );
        assert_eq!(upper, FieldValue::Int(100));
    }
}
