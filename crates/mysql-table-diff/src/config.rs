//! Endpoint configuration and diff-run options.
//!
//! The two database endpoints are configured exclusively through environment
//! variables; the per-run knobs arrive from the command line and are
//! normalized into [`DiffOptions`] before the engine starts. All validation
//! failures surface before a single chunk is processed.

use std::path::PathBuf;

use crate::error::{DiffError, Result};

/// The ten required environment variables.
pub const REQUIRED_ENV_VARS: [&str; 10] = [
    "DFC_SRC_USERNAME",
    "DFC_SRC_PASSWORD",
    "DFC_SRC_HOST",
    "DFC_SRC_PORT",
    "DFC_SRC_DBNAME",
    "DFC_TGT_USERNAME",
    "DFC_TGT_PASSWORD",
    "DFC_TGT_HOST",
    "DFC_TGT_PORT",
    "DFC_TGT_DBNAME",
];

/// Connection settings for one database endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub dbname: String,
}

/// Source and target endpoint settings.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub source: EndpointConfig,
    pub target: EndpointConfig,
}

impl Endpoints {
    /// Read both endpoints from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read both endpoints through a lookup function. Any missing variable is
    /// a configuration error whose message lists every required name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut values = Vec::with_capacity(REQUIRED_ENV_VARS.len());
        for name in REQUIRED_ENV_VARS {
            match lookup(name) {
                Some(value) => values.push(value),
                None => {
                    let listing = REQUIRED_ENV_VARS
                        .iter()
                        .map(|v| format!("  export {}=", v))
                        .collect::<Vec<_>>()
                        .join("\n");
                    return Err(DiffError::config(format!(
                        "env should be set:\n{}",
                        listing
                    )));
                }
            }
        }

        let endpoint = |offset: usize| -> Result<EndpointConfig> {
            let port_name = REQUIRED_ENV_VARS[offset + 3];
            Ok(EndpointConfig {
                username: values[offset].clone(),
                password: values[offset + 1].clone(),
                host: values[offset + 2].clone(),
                port: values[offset + 3].parse::<u16>().map_err(|_| {
                    DiffError::config(format!("{} must be a port number", port_name))
                })?,
                dbname: values[offset + 4].clone(),
            })
        };

        Ok(Endpoints {
            source: endpoint(0)?,
            target: endpoint(5)?,
        })
    }
}

/// Raw `diff` subcommand arguments, exactly as received from the CLI.
#[derive(Debug, Clone, Default)]
pub struct DiffArgs {
    pub debug: bool,
    pub trace: bool,
    pub lower_boundary: String,
    pub upper_boundary: String,
    pub table: String,
    pub source_table: String,
    pub target_table: String,
    pub chunk_size: i64,
    pub pk_column_sequence: String,
    pub ignore_fields: String,
    pub additional_filter: String,
    pub output: PathBuf,
}

/// Validated and normalized options for one diff run.
#[derive(Debug, Clone)]
pub struct DiffOptions {
    pub debug: bool,
    pub trace: bool,
    /// Initial lower bound, one raw component per effective PK column.
    /// Empty when the run starts from the first record of the table.
    pub lower_boundary: Vec<String>,
    /// Trailing-boundary clamp components. Empty when unbounded.
    pub upper_boundary: Vec<String>,
    pub source_table: String,
    pub target_table: String,
    pub chunk_size: i64,
    /// 1-based positions into the declared primary key. Empty means the full
    /// declared sequence.
    pub pk_column_sequence: Vec<usize>,
    pub ignore_fields: Vec<String>,
    pub additional_filter: String,
    pub output: PathBuf,
}

impl DiffOptions {
    /// Validate raw arguments and build run options.
    pub fn new(args: DiffArgs) -> Result<Self> {
        let lower_boundary = split_csv(&args.lower_boundary);
        let upper_boundary = split_csv(&args.upper_boundary);
        let sequence_raw = split_csv(&args.pk_column_sequence);
        let ignore_fields = split_csv(&args.ignore_fields);

        if !lower_boundary.is_empty()
            && !upper_boundary.is_empty()
            && lower_boundary.len() != upper_boundary.len()
        {
            return Err(DiffError::config(
                "-l and -u should have the same number of elements",
            ));
        }

        if !sequence_raw.is_empty() {
            if !lower_boundary.is_empty() && lower_boundary.len() != sequence_raw.len() {
                return Err(DiffError::config(
                    "-l and -S should have the same number of elements",
                ));
            }
            if !upper_boundary.is_empty() && upper_boundary.len() != sequence_raw.len() {
                return Err(DiffError::config(
                    "-u and -S should have the same number of elements",
                ));
            }
        }

        let mut pk_column_sequence = Vec::with_capacity(sequence_raw.len());
        for raw in &sequence_raw {
            let position = raw.parse::<usize>().ok().filter(|p| *p >= 1).ok_or_else(|| {
                DiffError::config(format!(
                    "-S expects 1-based column positions, got '{}'",
                    raw
                ))
            })?;
            pk_column_sequence.push(position);
        }

        let table_set = !args.table.is_empty();
        let pair_set = !args.source_table.is_empty() || !args.target_table.is_empty();
        if !table_set && !pair_set {
            return Err(DiffError::config("--table or -s/-t is required"));
        }
        if table_set && pair_set {
            return Err(DiffError::config("--table and -s/-t are mutually exclusive"));
        }
        let (source_table, target_table) = if table_set {
            (args.table.clone(), args.table)
        } else {
            if args.source_table.is_empty() || args.target_table.is_empty() {
                return Err(DiffError::config("-s and -t must both be set"));
            }
            (args.source_table, args.target_table)
        };

        Ok(DiffOptions {
            debug: args.debug,
            trace: args.trace,
            lower_boundary,
            upper_boundary,
            source_table,
            target_table,
            chunk_size: if args.chunk_size <= 1 { 2 } else { args.chunk_size },
            pk_column_sequence,
            ignore_fields,
            additional_filter: args.additional_filter,
            output: args.output,
        })
    }

    /// Whether SQL text is retained in the chunk log.
    pub fn verbose(&self) -> bool {
        self.debug || self.trace
    }

    /// Row-level log path, derived from the chunk-log path.
    pub fn row_level_output(&self) -> PathBuf {
        let name = self.output.to_string_lossy();
        match name.rfind(".json") {
            Some(pos) => {
                let mut replaced = String::with_capacity(name.len() + 9);
                replaced.push_str(&name[..pos]);
                replaced.push_str(".rowlevel.json");
                replaced.push_str(&name[pos + ".json".len()..]);
                PathBuf::from(replaced)
            }
            None => PathBuf::from(format!("{}.rowlevel.json", name)),
        }
    }

    /// `WHERE` fragment appended to every engine query, empty or
    /// `" AND <filter>"`.
    pub fn filter_clause(&self) -> String {
        if self.additional_filter.is_empty() {
            String::new()
        } else {
            format!(" AND {}", self.additional_filter)
        }
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        Vec::new()
    } else {
        raw.split(',').map(|s| s.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> DiffArgs {
        DiffArgs {
            table: "dept_emp".to_string(),
            chunk_size: 1000,
            output: PathBuf::from("log.json"),
            ..DiffArgs::default()
        }
    }

    #[test]
    fn test_from_lookup_all_present() {
        let endpoints = Endpoints::from_lookup(|name| {
            Some(match name {
                "DFC_SRC_PORT" => "3306".to_string(),
                "DFC_TGT_PORT" => "3307".to_string(),
                other => other.to_lowercase(),
            })
        })
        .unwrap();
        assert_eq!(endpoints.source.host, "dfc_src_host");
        assert_eq!(endpoints.source.port, 3306);
        assert_eq!(endpoints.target.port, 3307);
        assert_eq!(endpoints.target.dbname, "dfc_tgt_dbname");
    }

    #[test]
    fn test_from_lookup_missing_lists_all_ten() {
        let err = Endpoints::from_lookup(|name| {
            (name != "DFC_TGT_PASSWORD").then(|| "x".to_string())
        })
        .unwrap_err();
        let message = err.to_string();
        for name in REQUIRED_ENV_VARS {
            assert!(message.contains(name), "missing {} in message", name);
        }
    }

    #[test]
    fn test_from_lookup_bad_port() {
        let err = Endpoints::from_lookup(|name| {
            Some(if name == "DFC_SRC_PORT" { "threethousand" } else { "x" }.to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("DFC_SRC_PORT"));
    }

    #[test]
    fn test_table_flags_required() {
        let mut args = base_args();
        args.table = String::new();
        assert!(DiffOptions::new(args).is_err());
    }

    #[test]
    fn test_table_flags_mutually_exclusive() {
        let mut args = base_args();
        args.source_table = "a".to_string();
        args.target_table = "b".to_string();
        assert!(DiffOptions::new(args).is_err());
    }

    #[test]
    fn test_source_target_pair() {
        let mut args = base_args();
        args.table = String::new();
        args.source_table = "a".to_string();
        args.target_table = "b".to_string();
        let options = DiffOptions::new(args).unwrap();
        assert_eq!(options.source_table, "a");
        assert_eq!(options.target_table, "b");
    }

    #[test]
    fn test_half_pair_rejected() {
        let mut args = base_args();
        args.table = String::new();
        args.source_table = "a".to_string();
        assert!(DiffOptions::new(args).is_err());
    }

    #[test]
    fn test_boundary_arity_mismatch() {
        let mut args = base_args();
        args.lower_boundary = "1,2".to_string();
        args.upper_boundary = "9".to_string();
        assert!(DiffOptions::new(args).is_err());
    }

    #[test]
    fn test_sequence_arity_mismatch() {
        let mut args = base_args();
        args.pk_column_sequence = "2,1".to_string();
        args.upper_boundary = "9".to_string();
        assert!(DiffOptions::new(args).is_err());
    }

    #[test]
    fn test_sequence_must_be_one_based() {
        let mut args = base_args();
        args.pk_column_sequence = "0,1".to_string();
        assert!(DiffOptions::new(args).is_err());
    }

    #[test]
    fn test_chunk_size_coerced() {
        let mut args = base_args();
        args.chunk_size = 1;
        assert_eq!(DiffOptions::new(args).unwrap().chunk_size, 2);

        let mut args = base_args();
        args.chunk_size = 0;
        assert_eq!(DiffOptions::new(args).unwrap().chunk_size, 2);
    }

    #[test]
    fn test_row_level_output() {
        let options = DiffOptions::new(base_args()).unwrap();
        assert_eq!(
            options.row_level_output(),
            PathBuf::from("log.rowlevel.json")
        );

        let mut args = base_args();
        args.output = PathBuf::from("out.log");
        let options = DiffOptions::new(args).unwrap();
        assert_eq!(
            options.row_level_output(),
            PathBuf::from("out.log.rowlevel.json")
        );
    }

    #[test]
    fn test_filter_clause() {
        let mut args = base_args();
        args.additional_filter = "flag > 3".to_string();
        let options = DiffOptions::new(args).unwrap();
        assert_eq!(options.filter_clause(), " AND flag > 3");
        assert!(DiffOptions::new(base_args()).unwrap().filter_clause().is_empty());
    }
}
