//! Typed handling of primary-key column values.
//!
//! Every primary-key column is assigned a [`FieldType`] derived from its
//! INFORMATION_SCHEMA data-type string. The field type knows how to
//! canonicalize a value coming from the driver or from the command line,
//! how to order two values, what its lowest representable value is, and
//! whether SQL literals of the type need quoting. Core logic never touches
//! raw driver cells directly; everything goes through [`FieldType::decode`].

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Serialize, Serializer};
use sqlx::mysql::MySqlRow;
use sqlx::Row;

use crate::error::{DiffError, Result};

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Field-type tag for a primary-key column.
///
/// New variants are additive; an unrecognized data type is a fatal
/// configuration error at discovery time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Signed 64-bit integers (TINYINT..BIGINT).
    Int,
    /// Character data compared lexicographically (CHAR, VARCHAR, ...).
    Char,
    /// Instants (DATETIME, TIMESTAMP, TIME).
    Time,
    /// Calendar dates (DATE); accepts the same input formats as `Time`
    /// but canonical output is date-only.
    Date,
}

impl FieldType {
    /// Map an INFORMATION_SCHEMA data-type string to a field type.
    pub fn from_data_type(column: &str, data_type: &str) -> Result<Self> {
        let dt = data_type.to_ascii_lowercase();
        // "datetime" must resolve to Time, so the time check precedes date.
        if dt.contains("char") {
            Ok(FieldType::Char)
        } else if dt.contains("int") {
            Ok(FieldType::Int)
        } else if dt.contains("time") {
            Ok(FieldType::Time)
        } else if dt.contains("date") {
            Ok(FieldType::Date)
        } else {
            Err(DiffError::config(format!(
                "unsupported data type '{}' for primary key column '{}'",
                data_type, column
            )))
        }
    }

    /// Whether SQL literals of this type are quoted.
    pub fn with_quote(self) -> bool {
        !matches!(self, FieldType::Int)
    }

    /// Lowest representable value, used as the trailing lower bound when the
    /// planner crosses into a fresh leading group. For `Time` and `Date`
    /// this is the Unix epoch, a sentinel rather than a true minimum.
    pub fn lowest(self) -> FieldValue {
        match self {
            FieldType::Int => FieldValue::Int(i64::MIN),
            FieldType::Char => FieldValue::Text(String::new()),
            FieldType::Time => FieldValue::Time(epoch()),
            FieldType::Date => FieldValue::Date(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()),
        }
    }

    /// Canonicalize a textual value (user boundary input or a formatted
    /// canonical value). Idempotent: `parse(format(parse(x))) == parse(x)`.
    pub fn parse(self, raw: &str) -> Result<FieldValue> {
        match self {
            FieldType::Int => raw.trim().parse::<i64>().map(FieldValue::Int).map_err(|_| {
                DiffError::config(format!("'{}' is not a valid integer boundary value", raw))
            }),
            FieldType::Char => Ok(FieldValue::Text(raw.to_string())),
            FieldType::Time => Ok(FieldValue::Time(parse_instant(raw)?)),
            FieldType::Date => Ok(FieldValue::Date(parse_instant(raw)?.date_naive())),
        }
    }

    /// Canonicalize a driver cell. Decoding is attempted against the natural
    /// wire type first, then against a textual representation.
    pub fn decode(self, row: &MySqlRow, idx: usize) -> Result<FieldValue> {
        match self {
            FieldType::Int => {
                if let Ok(v) = row.try_get::<i64, _>(idx) {
                    return Ok(FieldValue::Int(v));
                }
                let raw: String = row.try_get(idx)?;
                self.parse(&raw)
            }
            FieldType::Char => {
                if let Ok(v) = row.try_get::<String, _>(idx) {
                    return Ok(FieldValue::Text(v));
                }
                let raw: Vec<u8> = row.try_get(idx)?;
                Ok(FieldValue::Text(String::from_utf8_lossy(&raw).into_owned()))
            }
            FieldType::Time => {
                if let Ok(v) = row.try_get::<NaiveDateTime, _>(idx) {
                    return Ok(FieldValue::Time(utc0().from_utc_datetime(&v)));
                }
                if let Ok(v) = row.try_get::<DateTime<Utc>, _>(idx) {
                    return Ok(FieldValue::Time(v.fixed_offset()));
                }
                let raw: String = row.try_get(idx)?;
                self.parse(&raw)
            }
            FieldType::Date => {
                if let Ok(v) = row.try_get::<NaiveDate, _>(idx) {
                    return Ok(FieldValue::Date(v));
                }
                if let Ok(v) = row.try_get::<NaiveDateTime, _>(idx) {
                    return Ok(FieldValue::Date(v.date()));
                }
                let raw: String = row.try_get(idx)?;
                self.parse(&raw)
            }
        }
    }
}

/// A canonicalized primary-key value.
///
/// Serializes as a JSON number for `Int` and as the canonical string for the
/// other variants, which is also the canonical PK-tuple encoding used to key
/// the row-level maps.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Text(String),
    Time(DateTime<FixedOffset>),
    Date(NaiveDate),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Int(_) => FieldType::Int,
            FieldValue::Text(_) => FieldType::Char,
            FieldValue::Time(_) => FieldType::Time,
            FieldValue::Date(_) => FieldType::Date,
        }
    }

    /// Strict greater-than within a variant. Values of different variants
    /// never compare greater; the planner only compares values produced by
    /// the same field type.
    pub fn greater_than(&self, other: &FieldValue) -> bool {
        match (self, other) {
            (FieldValue::Int(a), FieldValue::Int(b)) => a > b,
            (FieldValue::Text(a), FieldValue::Text(b)) => a > b,
            (FieldValue::Time(a), FieldValue::Time(b)) => a > b,
            (FieldValue::Date(a), FieldValue::Date(b)) => a > b,
            _ => false,
        }
    }

    /// Canonical textual form, without quoting.
    pub fn literal(&self) -> String {
        match self {
            FieldValue::Int(v) => v.to_string(),
            FieldValue::Text(v) => v.clone(),
            FieldValue::Time(v) => v.format(TIME_FORMAT).to_string(),
            FieldValue::Date(v) => v.format(DATE_FORMAT).to_string(),
        }
    }

    /// Render as a SQL literal, quoted and escaped when the type requires it.
    pub fn sql_literal(&self) -> String {
        if self.field_type().with_quote() {
            format!("'{}'", self.literal().replace('\'', "''"))
        } else {
            self.literal()
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            FieldValue::Int(v) => serializer.serialize_i64(*v),
            _ => serializer.serialize_str(&self.literal()),
        }
    }
}

/// Bind a field value to a query. Integers travel as native 64-bit values;
/// everything else as its canonical string, which MySQL coerces against the
/// column type exactly as a literal would be.
pub fn bind_field<'q>(
    query: sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>,
    value: &FieldValue,
) -> sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments> {
    match value {
        FieldValue::Int(v) => query.bind(*v),
        other => query.bind(other.literal()),
    }
}

/// Substitute `?` placeholders with SQL literals, producing the query text
/// recorded in the logs.
pub fn inline_bound_values(sql: &str, values: &[FieldValue]) -> String {
    let mut out = sql.to_string();
    for value in values {
        out = out.replacen('?', &value.sql_literal(), 1);
    }
    out
}

fn utc0() -> FixedOffset {
    FixedOffset::east_opt(0).unwrap()
}

fn epoch() -> DateTime<FixedOffset> {
    DateTime::from_timestamp(0, 0).unwrap().fixed_offset()
}

/// Parse a timestamp in any of the accepted formats: date-only, datetime,
/// RFC 3339 (Z or numeric offset, with or without fractional seconds), and
/// offset datetimes carrying a trailing zone abbreviation. Values without an
/// offset are taken as UTC.
fn parse_instant(raw: &str) -> Result<DateTime<FixedOffset>> {
    let raw = raw.trim();

    if let Ok(d) = NaiveDate::parse_from_str(raw, DATE_FORMAT) {
        return Ok(utc0().from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap()));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(utc0().from_utc_datetime(&dt));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt);
    }

    // "2021-06-01 10:00:00 -0700 MST" style: the zone abbreviation carries no
    // extra information beyond the numeric offset, so strip it before parsing.
    let stripped = match raw.rsplit_once(' ') {
        Some((head, tail)) if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_alphabetic()) => {
            head
        }
        _ => raw,
    };
    if let Ok(dt) = DateTime::parse_from_str(stripped, "%Y-%m-%d %H:%M:%S %z") {
        return Ok(dt);
    }
    if let Ok(dt) = DateTime::parse_from_str(stripped, "%Y-%m-%d %H:%M:%S%.f %z") {
        return Ok(dt);
    }

    Err(DiffError::config(format!(
        "'{}' is not in an accepted timestamp format",
        raw
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_data_type() {
        assert_eq!(
            FieldType::from_data_type("id", "bigint").unwrap(),
            FieldType::Int
        );
        assert_eq!(
            FieldType::from_data_type("code", "varchar").unwrap(),
            FieldType::Char
        );
        assert_eq!(
            FieldType::from_data_type("created", "datetime").unwrap(),
            FieldType::Time
        );
        assert_eq!(
            FieldType::from_data_type("created", "timestamp").unwrap(),
            FieldType::Time
        );
        assert_eq!(
            FieldType::from_data_type("day", "date").unwrap(),
            FieldType::Date
        );
        assert!(FieldType::from_data_type("payload", "blob").is_err());
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(FieldType::Int.parse("42").unwrap(), FieldValue::Int(42));
        assert_eq!(FieldType::Int.parse("-7").unwrap(), FieldValue::Int(-7));
        assert!(FieldType::Int.parse("abc").is_err());
    }

    #[test]
    fn test_parse_time_formats() {
        let expected = FieldType::Time.parse("2021-06-01T10:00:00Z").unwrap();
        for raw in [
            "2021-06-01 10:00:00",
            "2021-06-01T10:00:00+00:00",
            "2021-06-01 10:00:00 +0000 UTC",
            "2021-06-01 03:00:00 -0700 MST",
            "2021-06-01 03:00:00.000000000 -0700 MST",
        ] {
            assert_eq!(FieldType::Time.parse(raw).unwrap(), expected, "{}", raw);
        }

        let midnight = FieldType::Time.parse("2021-06-01").unwrap();
        assert_eq!(midnight.literal(), "2021-06-01T00:00:00+00:00");

        assert!(FieldType::Time.parse("June 1st").is_err());
    }

    #[test]
    fn test_parse_date_truncates() {
        let d = FieldType::Date.parse("2021-06-01 10:00:00").unwrap();
        assert_eq!(d.literal(), "2021-06-01");
    }

    #[test]
    fn test_canonicalize_roundtrip() {
        // canonicalize(format(canonicalize(x))) == canonicalize(x)
        let cases = [
            (FieldType::Int, "0042"),
            (FieldType::Char, "d003"),
            (FieldType::Time, "2021-06-01 10:00:00"),
            (FieldType::Time, "2021-06-01T10:00:00-07:00"),
            (FieldType::Date, "2021-06-01T10:00:00Z"),
        ];
        for (ft, raw) in cases {
            let canonical = ft.parse(raw).unwrap();
            let reparsed = ft.parse(&canonical.literal()).unwrap();
            assert_eq!(reparsed, canonical, "{:?} {}", ft, raw);
        }
    }

    #[test]
    fn test_ordering() {
        let a = FieldValue::Int(1);
        let b = FieldValue::Int(2);
        assert!(b.greater_than(&a));
        assert!(!a.greater_than(&b));
        assert!(!a.greater_than(&a));

        let x = FieldValue::Text("d003".into());
        let y = FieldValue::Text("d010".into());
        assert!(y.greater_than(&x));

        let t1 = FieldType::Time.parse("2021-06-01T10:00:00Z").unwrap();
        let t2 = FieldType::Time.parse("2021-06-01T03:00:01-07:00").unwrap();
        assert!(t2.greater_than(&t1));
        assert_ne!(t1, t2);
    }

    #[test]
    fn test_lowest_values() {
        assert_eq!(FieldType::Int.lowest(), FieldValue::Int(i64::MIN));
        assert_eq!(FieldType::Char.lowest(), FieldValue::Text(String::new()));
        assert_eq!(
            FieldType::Time.lowest().literal(),
            "1970-01-01T00:00:00+00:00"
        );
        assert_eq!(FieldType::Date.lowest().literal(), "1970-01-01");
    }

    #[test]
    fn test_sql_literal_quoting() {
        assert_eq!(FieldValue::Int(5).sql_literal(), "5");
        assert_eq!(
            FieldValue::Text("o'brien".into()).sql_literal(),
            "'o''brien'"
        );
        assert_eq!(
            FieldType::Date.parse("2021-06-01").unwrap().sql_literal(),
            "'2021-06-01'"
        );
    }

    #[test]
    fn test_serialize() {
        let values = vec![
            FieldValue::Int(3),
            FieldValue::Text("d003".into()),
            FieldType::Date.parse("2021-06-01").unwrap(),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"[3,"d003","2021-06-01"]"#);
    }

    #[test]
    fn test_inline_bound_values() {
        let sql = "WHERE g = ? AND id BETWEEN ? AND ?";
        let inlined = inline_bound_values(
            sql,
            &[
                FieldValue::Text("d003".into()),
                FieldValue::Int(1),
                FieldValue::Int(9),
            ],
        );
        assert_eq!(inlined, "WHERE g = 'd003' AND id BETWEEN 1 AND 9");
    }
}
