//! Column and primary-key discovery via INFORMATION_SCHEMA.

use sqlx::mysql::MySqlPool;
use sqlx::Row;
use tracing::debug;

use crate::error::{DiffError, Result};
use crate::fieldtype::FieldType;
use crate::pktable::PkColumn;

/// Ordered column names of a table in the connected database.
pub async fn table_columns(pool: &MySqlPool, table: &str) -> Result<Vec<String>> {
    let query = r#"
    SELECT SQL_NO_CACHE COLUMN_NAME
    FROM INFORMATION_SCHEMA.COLUMNS
    WHERE TABLE_SCHEMA = database()
      AND TABLE_NAME = ?
    ORDER BY ORDINAL_POSITION
    "#;

    let rows = sqlx::query(query).bind(table).fetch_all(pool).await?;
    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        columns.push(row.try_get::<String, _>(0)?);
    }

    if columns.is_empty() {
        return Err(DiffError::config(format!(
            "table '{}' not found in the connected database",
            table
        )));
    }

    debug!("columns of {}: {:?}", table, columns);
    Ok(columns)
}

/// Declared primary-key columns of a table, in index order, each with its
/// resolved field type. A table without a primary key is rejected.
pub async fn primary_key_columns(pool: &MySqlPool, table: &str) -> Result<Vec<PkColumn>> {
    let query = r#"
    SELECT SQL_NO_CACHE
      col.column_name,
      col.data_type
    FROM information_schema.tables AS tab
    INNER JOIN information_schema.statistics AS sta
    ON sta.table_schema = tab.table_schema
      AND sta.table_name = tab.table_name
      AND sta.index_name = 'primary'
    INNER JOIN information_schema.columns AS col
    ON sta.table_schema = col.table_schema
      AND sta.table_name = col.table_name
      AND sta.column_name = col.column_name
    WHERE tab.table_schema = database()
      AND tab.table_type = 'BASE TABLE'
      AND tab.table_name = ?
    ORDER BY
      tab.table_name,
      sta.seq_in_index
    "#;

    let rows = sqlx::query(query).bind(table).fetch_all(pool).await?;
    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        let name: String = row.try_get(0)?;
        let data_type: String = row.try_get(1)?;
        let field_type = FieldType::from_data_type(&name, &data_type)?;
        columns.push(PkColumn {
            name,
            data_type,
            field_type,
        });
    }

    if columns.is_empty() {
        return Err(DiffError::config(format!(
            "table '{}' has no primary key",
            table
        )));
    }

    debug!("primary key of {}: {:?}", table, columns);
    Ok(columns)
}

/// Largest duplicate-group size under `GROUP BY <columns>`, or 1 when every
/// group is a single row. Used to validate that a shortened PK subsequence
/// cannot stall chunk advancement.
pub async fn max_group_count(pool: &MySqlPool, table: &str, columns: &[String]) -> Result<i64> {
    let query = format!(
        r#"
    SELECT COUNT(1) AS count
    FROM {}
    GROUP BY {}
    HAVING COUNT(1) > 1
    ORDER BY COUNT(1) DESC
    LIMIT 1
    "#,
        table,
        columns.join(", ")
    );

    let row = sqlx::query(&query).fetch_optional(pool).await?;
    match row {
        Some(row) => Ok(row.try_get::<i64, _>(0)?),
        None => Ok(1),
    }
}
