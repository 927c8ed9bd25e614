use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use kringle_core::RunSeed;
use kringle_io::{generate, render_assignments, GenerateError, GenerateReport, GenerateRequest};
use serde_json::Value;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const DEFAULT_FILE: &str = "kk-list.xlsx";

#[derive(Debug, Parser)]
#[command(name = "kk")]
#[command(about = "Generate random Kris Kringle assignments")]
struct Cli {
    /// Input workbook (.xlsx, .xls, .ods or .json)
    #[arg(short = 'f', long, default_value = DEFAULT_FILE)]
    file: PathBuf,

    /// Output directory [default: current directory]
    #[arg(short = 'd', long)]
    dir: Option<PathBuf>,

    /// Prefix for output files [default: kk_<year>]
    #[arg(short = 'o', long)]
    out: Option<String>,

    /// Seed for the random generator (any 64-bit integer, negative values included)
    #[arg(short = 's', long, value_parser = parse_seed, allow_negative_numbers = true)]
    seed: Option<u64>,

    /// Prompt for the input file, output directory and prefix before running
    #[arg(short = 'g', long, default_value_t = false)]
    gui: bool,
}

/// Negative seeds keep their two's-complement bits, so `-1` and `18446744073709551615`
/// replay the same draw.
fn parse_seed(raw: &str) -> Result<u64, String> {
    let raw = raw.trim();
    if let Ok(seed) = raw.parse::<u64>() {
        return Ok(seed);
    }
    raw.parse::<i64>()
        .map(|seed| u64::from_le_bytes(seed.to_le_bytes()))
        .map_err(|err| format!("seed must be a 64-bit integer: {err}"))
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    let request = build_request(&cli)?;

    if cli.gui {
        let stdin = io::stdin();
        return run_interactive(request, &mut stdin.lock());
    }
    run_headless(&request)
}

fn default_prefix() -> String {
    format!("kk_{}", OffsetDateTime::now_utc().year())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("failed to resolve current directory")?;
    Ok(cwd.join(path))
}

fn build_request(cli: &Cli) -> Result<GenerateRequest> {
    let out_dir = match cli.dir.as_deref() {
        Some(dir) => absolute(dir)?,
        None => std::env::current_dir().context("failed to resolve current directory")?,
    };
    Ok(GenerateRequest {
        input: absolute(&cli.file)?,
        out_dir,
        prefix: cli.out.clone().unwrap_or_else(default_prefix),
        seed: RunSeed(cli.seed),
    })
}

fn report_json(request: &GenerateRequest, report: &GenerateReport) -> Result<Value> {
    Ok(serde_json::json!({
        "status": "ok",
        "input": request.input.display().to_string(),
        "result_path": report.result_path.display().to_string(),
        "debug_path": report.debug_path.display().to_string(),
        "seed": report.seed,
        "participants": report.participants,
        "assigned": report.assignments.len(),
        "assignments": serde_json::to_value(&report.assignments)
            .context("failed to serialize assignments")?,
        "skipped": serde_json::to_value(&report.skipped)
            .context("failed to serialize skipped givers")?
    }))
}

fn run_headless(request: &GenerateRequest) -> Result<ExitCode> {
    match generate(request) {
        Ok(report) => {
            emit_json(report_json(request, &report)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(GenerateError::Assignment { failure, error_path }) => {
            tracing::error!("{failure}");
            emit_json(serde_json::json!({
                "status": "failed",
                "input": request.input.display().to_string(),
                "error_path": error_path.display().to_string(),
                "seed": request.seed,
                "error": {
                    "kind": "zero_possibilities",
                    "message": failure.to_string(),
                    "index": failure.index,
                    "sender_name": failure.sender_name,
                    "excluded": failure.excluded,
                    "possible": failure.possible,
                    "assigned": failure.assigned,
                    "total": failure.total
                }
            }))?;
            Ok(ExitCode::FAILURE)
        }
        Err(err) => Err(err).with_context(|| {
            format!("failed to generate assignments from {}", request.input.display())
        }),
    }
}

fn prompt(input: &mut impl BufRead, label: &str, default: &str) -> Result<Option<String>> {
    print!("{label} [{default}]: ");
    io::stdout().flush()?;

    let mut line = String::new();
    if input.read_line(&mut line).context("failed to read from stdin")? == 0 {
        return Ok(None);
    }
    let value = line.trim();
    Ok(Some(if value.is_empty() { default.to_string() } else { value.to_string() }))
}

/// Terminal stand-in for the file picker: confirm the paths, run, show the table or the
/// failure, and offer another draw after a failure.
fn run_interactive(mut request: GenerateRequest, input: &mut impl BufRead) -> Result<ExitCode> {
    loop {
        let Some(file) = prompt(input, "Input file", &request.input.display().to_string())? else {
            return Ok(ExitCode::FAILURE);
        };
        let Some(dir) = prompt(input, "Output folder", &request.out_dir.display().to_string())?
        else {
            return Ok(ExitCode::FAILURE);
        };
        let Some(prefix) = prompt(input, "Prefix", &request.prefix)? else {
            return Ok(ExitCode::FAILURE);
        };
        request.input = absolute(Path::new(&file))?;
        request.out_dir = absolute(Path::new(&dir))?;
        request.prefix = prefix;

        println!("About to start generating data");
        match generate(&request) {
            Ok(report) => {
                println!(
                    "Finished generating assignments for \"{}\" see file \"{}\".",
                    request.prefix,
                    report.result_path.display()
                );
                println!();
                print!("{}", render_assignments(&report.assignments));
                return Ok(ExitCode::SUCCESS);
            }
            Err(GenerateError::Assignment { failure, error_path }) => {
                println!("{failure}. Please try again.");
                println!("Partial assignments written to \"{}\".", error_path.display());
            }
            Err(err) => println!("Error: {err}"),
        }

        let Some(answer) = prompt(input, "Try again? (y/n)", "n")? else {
            return Ok(ExitCode::FAILURE);
        };
        if !matches!(answer.to_lowercase().as_str(), "y" | "yes") {
            return Ok(ExitCode::FAILURE);
        }
    }
}
