#![forbid(unsafe_code)]

use error_iter::ErrorIter as _;
use is_terminal::IsTerminal as _;
use lotcount::basis::{CheckList, Engine, EngineConfig, OversoldPolicy};
use lotcount::imports::robinhood::read_activity;
use lotcount::model::{IncomeSums, Ledger, Report, State, Stats};
use lotcount::util::year_ext::CheckYearsExt as _;
use onlyargs::{CliError, OnlyArgs as _};
use onlyargs_derive::OnlyArgs;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::PathBuf;
use std::{env, fmt::Display, process::ExitCode};
use thiserror::Error;
use tracing::{debug, info, warn};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;

#[derive(Debug, OnlyArgs)]
#[footer = "Additional environment variables:"]
#[footer = "  - RUST_LOG configures log output, e.g. `RUST_LOG=debug`. Default is `info`."]
#[footer = "  - TERM_COLOR accepts \"always\" to override automatic terminal sensing"]
struct Args {
    /// Read brokerage account activity CSV from a file.
    ///   May be given more than once. Files are read in order.
    #[long]
    input_activity: Vec<PathBuf>,

    /// Read checkpoint from a file.
    #[long]
    input_checkpoint: Option<PathBuf>,

    /// Write checkpoint to a file.
    ///
    #[long]
    output_checkpoint: Option<PathBuf>,

    /// Only count closes that settle in this year.
    ///   All activity still updates lots and wash sales.
    #[short('y')]
    tax_year: Option<i32>,

    /// How to handle a close larger than the open position.
    ///   "reject" skips it and fails the run; "clamp" treats the
    ///   shortfall as zero-cost shares.
    #[long]
    #[default("reject")]
    oversold: String,

    /// Realize wash-sale losses whose 30-day window passed
    ///   without a replacement buy.
    #[long]
    realize_expired_deferrals: bool,

    /// Write worksheet CSVs to this output directory.
    #[short('o')]
    worksheet_path: Option<PathBuf>,

    /// Worksheet CSVs written to an output directory will be given
    ///   this prefix.
    #[short('p')]
    #[default("")]
    worksheet_prefix: String,

    /// Write the full report as JSON to a file.
    #[long]
    output_json: Option<PathBuf>,

    /// Enable verbose output.
    /// Prints details CSV tables to stdout when not written to a file.
    verbose: bool,
}

#[derive(Debug, Error)]
enum Error {
    #[error("Failed to import {0:?}")]
    Import(PathBuf, #[source] lotcount::errors::ActivityError),

    #[error("Argument parsing error")]
    Args(#[from] CliError),

    #[error("Invalid `--oversold` value")]
    Oversold(#[from] lotcount::errors::OversoldPolicyError),

    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint error, unable to read {0:?}")]
    InputCheckpoint(PathBuf, #[source] Box<lotcount::errors::CheckpointError>),

    #[error("Checkpoint error, unable to write {0:?}")]
    OutputCheckpoint(PathBuf, #[source] Box<lotcount::errors::CheckpointError>),

    #[error("CheckList found errors in the activity")]
    CheckList(#[from] lotcount::errors::CheckListError),

    #[error("Unable to write JSON report {0:?}")]
    Json(PathBuf, #[source] serde_json::Error),
}

/// Everything written by `--output-json`.
#[derive(Serialize)]
struct JsonOutput<'a> {
    report: &'a Report,
    income: &'a IncomeSums,
}

fn main() -> ExitCode {
    // Initialize the tracing subscriber for instrumentation.
    // Uses the `RUST_LOG` environment var for configuration. E.g. `RUST_LOG=debug cargo run`
    // This is very useful to see the input CSV row that caused an anomaly.
    //
    // See: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/struct.EnvFilter.html#directives
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let term_color = env::var("TERM_COLOR")
        .map(|color| color == "always")
        .unwrap_or_else(|_| std::io::stdout().is_terminal());
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_ansi(term_color))
        .with(env_filter)
        .init();

    match run(onlyargs::parse()) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            if matches!(err, Error::Args(_)) {
                eprintln!("{}", Args::HELP);
            }

            eprintln!("Error: {err}");
            for source in err.sources().skip(1) {
                eprintln!("  Caused by: {source}");
            }

            ExitCode::FAILURE
        }
    }
}

fn run(args: Result<Args, CliError>) -> Result<(), Error> {
    let args = args?;
    let config = EngineConfig {
        tax_year: args.tax_year,
        oversold: args.oversold.parse::<OversoldPolicy>()?,
        realize_expired_deferrals: args.realize_expired_deferrals,
    };

    let mut stats = Stats::default();

    // Load state from checkpoint if a path is provided.
    let state = match args.input_checkpoint.as_ref() {
        Some(path) => {
            debug!("Loading checkpoint from {path:?}");

            State::load(path).map_err(|e| Error::InputCheckpoint(path.clone(), Box::new(e)))?
        }
        None => State::default(),
    };

    let mut rows = Vec::new();
    for input_activity in args.input_activity {
        rows.extend(
            read_activity(&mut stats, &input_activity)
                .map_err(|e| Error::Import(input_activity, e))?,
        );
    }

    let ledger = Ledger::from_rows(rows);
    stats.add_trades(ledger.transactions.len());
    stats.add_cash_flows(ledger.cash_flows.len());
    stats.add_ignored(ledger.ignored);

    // Activity outside the tax year still drives lots, so this is informational only.
    if let Some(year) = config.tax_year {
        match ledger.transactions.check_year(year) {
            Ok(()) => info!(
                "Trades settle in {:?}; only {year} is counted",
                ledger.transactions.get_years(),
            ),
            Err(years) => warn!("No trades settle in {year}; found {years:?}"),
        }
    }

    let (mut report, state) = Engine::from_state(config, state).run(&ledger.transactions);
    let income = IncomeSums::new(&ledger.cash_flows, args.tax_year);
    stats.add_realizations(report.realizations.len());

    // Normalizer anomalies come first; they describe rows before any lot was touched.
    report.anomalies = ledger
        .anomalies
        .into_iter()
        .chain(std::mem::take(&mut report.anomalies))
        .collect();
    CheckList::execute(&report.anomalies)?;

    // Save state to a new checkpoint.
    if let Some(state_path) = args.output_checkpoint.as_ref() {
        debug!("Saving checkpoint to {state_path:?}");
        state
            .save(state_path)
            .map_err(|e| Error::OutputCheckpoint(state_path.clone(), Box::new(e)))?;
        debug!("Saving checkpoint completed");
    }

    let worksheets = Worksheets {
        path: args.worksheet_path,
        prefix: args.worksheet_prefix,
        verbose: args.verbose,
    };

    if let Some(details) = report.realization_details() {
        worksheets.emit("realizations", "Realization Details", &details, false)?;
    }
    if let Some(details) = report.position_details() {
        worksheets.emit("open-positions", "Open Position Details", &details, false)?;
    }
    if let Some(details) = report.wash_sale_details() {
        worksheets.emit("wash-sales", "Wash Sale Details", &details, false)?;
    }
    worksheets.emit("income", "Income Sums", &income, true)?;
    worksheets.emit("sums", "Capital Gains Sums", &report, true)?;

    if let Some(path) = args.output_json {
        let mut file = BufWriter::new(File::create(&path)?);
        let output = JsonOutput {
            report: &report,
            income: &income,
        };
        serde_json::to_writer_pretty(&mut file, &output).map_err(|e| Error::Json(path, e))?;
        file.flush()?;
    }

    match report.tax_year {
        Some(year) => println!("Net realized gain/loss for {year}: {}", report.total),
        None => println!("Net realized gain/loss: {}", report.total),
    }
    println!();
    stats.pretty_print();

    Ok(())
}

/// Where CSV tables go: files in a directory, or stdout.
struct Worksheets {
    path: Option<PathBuf>,
    prefix: String,
    verbose: bool,
}

impl Worksheets {
    /// Write `table` to `{prefix}{name}.csv` when a worksheet directory is set. Otherwise print it,
    /// but only when `always` or verbose output is enabled.
    fn emit(
        &self,
        name: &str,
        title: &str,
        table: &impl Display,
        always: bool,
    ) -> Result<(), Error> {
        if let Some(root) = self.path.as_ref() {
            let path = root.join(format!("{}{name}.csv", self.prefix));
            std::fs::write(&path, table.to_string())?;

            let heading = format!("{title} written to {}", path.display());
            println!("{heading}");
            println!("{}", underline(&heading));
            println!();
        } else if always || self.verbose {
            println!("{title}");
            println!("{}", underline(title));
            println!();
            println!("{table}");
            println!();
        }

        Ok(())
    }
}

/// Underline each word of a heading with `=`, keeping the gaps.
fn underline(heading: &str) -> String {
    heading
        .chars()
        .map(|c| if c == ' ' { ' ' } else { '=' })
        .collect()
}
