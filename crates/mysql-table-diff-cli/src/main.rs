//! mysql-table-diff CLI - compare two MySQL-compatible tables chunk by chunk.

use clap::{Parser, Subcommand};
use mysql_table_diff::{
    pool, sqlgen, DiffArgs, DiffEngine, DiffError, DiffOptions, Endpoints, QueryOptions,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "mysql-table-diff")]
#[command(about = "Compare data between two MySQL-compatible database tables")]
#[command(version)]
#[command(long_about = "\
Compare data between two MySQL-compatible database tables.

Prerequisite is to set the following environment variables for the source
and target databases:

  export DFC_SRC_USERNAME=...
  export DFC_SRC_PASSWORD=...
  export DFC_SRC_HOST=...
  export DFC_SRC_PORT=...
  export DFC_SRC_DBNAME=...
  export DFC_TGT_USERNAME=...
  export DFC_TGT_PASSWORD=...
  export DFC_TGT_HOST=...
  export DFC_TGT_PORT=...
  export DFC_TGT_DBNAME=...")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Diff two tables and write chunk-level and row-level JSON logs
    Diff {
        /// Verbose output (keeps SQL text in the chunk log)
        #[arg(short = 'v', long)]
        debug: bool,

        /// Ultra-verbose output, including every query issued
        #[arg(long)]
        trace: bool,

        /// Initial lower boundary values, one per effective PK column
        #[arg(short = 'l', long, default_value = "", value_name = "V1,V2,...")]
        lower_boundary: String,

        /// Upper boundary values clamping the trailing PK column
        #[arg(short = 'u', long, default_value = "", value_name = "V1,V2,...")]
        upper_boundary: String,

        /// Table name, used on both endpoints
        #[arg(long, default_value = "")]
        table: String,

        /// Source table name (requires --target-table)
        #[arg(short = 's', long, default_value = "")]
        source_table: String,

        /// Target table name (requires --source-table)
        #[arg(short = 't', long, default_value = "")]
        target_table: String,

        /// Rows per chunk (coerced to at least 2)
        #[arg(short = 'c', long, default_value_t = 1000)]
        chunk_size: i64,

        /// 1-based positions selecting a subsequence of the declared PK
        #[arg(short = 'S', long, default_value = "", value_name = "N1,N2,...")]
        pkcolumn_sequence: String,

        /// Columns excluded from hashing
        #[arg(short = 'I', long, default_value = "", value_name = "COL1,COL2,...")]
        ignore_fields: String,

        /// SQL fragment appended to every engine query with AND
        #[arg(short = 'F', long, default_value = "")]
        additional_filter: String,

        /// Chunk-log path; the row-level log derives from it
        #[arg(short = 'o', long, default_value = "log.json")]
        output: PathBuf,
    },

    /// Generate reconciliation SQL from a row-level log
    Query {
        /// Row-level log file (stdin is used when piped)
        #[arg(short = 'f', long)]
        rowlevel_file: Option<PathBuf>,

        /// Emit INSERT statements for rows missing on the target
        #[arg(short = 'i', long)]
        insert: bool,

        /// Emit UPDATE statements for rows that differ
        #[arg(short = 'u', long)]
        update: bool,

        /// Emit DELETE statements for rows absent on the source
        #[arg(short = 'd', long)]
        delete: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), DiffError> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Diff {
            debug,
            trace,
            lower_boundary,
            upper_boundary,
            table,
            source_table,
            target_table,
            chunk_size,
            pkcolumn_sequence,
            ignore_fields,
            additional_filter,
            output,
        } => {
            setup_logging(debug, trace);

            let options = DiffOptions::new(DiffArgs {
                debug,
                trace,
                lower_boundary,
                upper_boundary,
                table,
                source_table,
                target_table,
                chunk_size,
                pk_column_sequence: pkcolumn_sequence,
                ignore_fields,
                additional_filter,
                output,
            })?;
            let endpoints = Endpoints::from_env()?;

            let sequence = options
                .pk_column_sequence
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(",");
            let outputs = format!(
                "{}, {}",
                options.output.display(),
                options.row_level_output().display()
            );
            info!(
                s = %options.source_table,
                t = %options.target_table,
                c = options.chunk_size,
                l = %options.lower_boundary.join(","),
                u = %options.upper_boundary.join(","),
                S = %sequence,
                I = %options.ignore_fields.join(","),
                F = %options.additional_filter,
                o = %outputs,
                "[match]=[index]=[lowerboundary]=[upperboundary]===[rowstats]==="
            );

            let mut engine = DiffEngine::new(&endpoints, options).await?;
            let summary = engine.run().await?;
            info!(
                "diff finished: {} chunks compared, {} mismatched",
                summary.chunks, summary.mismatched
            );
        }

        Commands::Query {
            rowlevel_file,
            insert,
            update,
            delete,
        } => {
            setup_logging(false, false);

            if !(insert || update || delete) {
                return Err(DiffError::config(
                    "-i/-u/-d cannot be empty at the same time, any combination of the 3 is allowed",
                ));
            }

            let endpoints = Endpoints::from_env()?;
            let options = QueryOptions {
                insert,
                update,
                delete,
                rowlevel_file,
            };
            let lines = sqlgen::read_rowlevel_lines(&options)?;

            let source = pool::connect(&endpoints.source, "source").await?;
            let statements = sqlgen::generate(&source, &lines, &options).await?;
            println!("{}", statements);
        }
    }

    Ok(())
}

fn setup_logging(debug: bool, trace: bool) {
    let level = if trace {
        Level::TRACE
    } else if debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}
