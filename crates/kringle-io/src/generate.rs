//! Load, assign and write: one full run with its artifacts.

use std::path::{Path, PathBuf};

use kringle_core::{
    assign, AssignError, Assignments, RunSeed, SelectionRecord, SkippedGiver, ZeroPossibilities,
};
use serde::Serialize;
use thiserror::Error;

use crate::report::{render_assignments, render_selections, write_artifact, OutputPaths};
use crate::workbook::{load_roster, WorkbookError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub input: PathBuf,
    pub out_dir: PathBuf,
    pub prefix: String,
    pub seed: RunSeed,
}

/// A completed run.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateReport {
    pub result_path: PathBuf,
    pub debug_path: PathBuf,
    pub participants: usize,
    pub assignments: Assignments,
    pub selections: Vec<SelectionRecord>,
    pub skipped: Vec<SkippedGiver>,
    pub seed: RunSeed,
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("unable to read input workbook: {0}")]
    Input(#[from] WorkbookError),
    #[error("invalid roster: {0}")]
    Validation(String),
    /// The partial assignments were written to `error_path` before this was returned.
    #[error("{failure}")]
    Assignment { failure: Box<ZeroPossibilities>, error_path: PathBuf },
    #[error("failed to write {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}

fn write(path: &Path, body: &str) -> Result<(), GenerateError> {
    write_artifact(path, body)
        .map_err(|source| GenerateError::Io { path: path.to_path_buf(), source })
}

/// Run the whole pipeline for `request`.
///
/// On success the result table goes to `<prefix>.txt` and the diagnostics to
/// `<prefix>.debug.txt`. When a sender has no receiver left, the assignments committed
/// before it go to `<prefix>.err.txt` and [`GenerateError::Assignment`] is returned.
///
/// # Errors
/// Returns [`GenerateError`] for unreadable input, an invalid roster, a failed run, or an
/// artifact that cannot be written.
pub fn generate(request: &GenerateRequest) -> Result<GenerateReport, GenerateError> {
    let input = load_roster(&request.input)?;
    let paths = OutputPaths::new(&request.out_dir, &request.prefix);
    let mut rng = request.seed.rng();

    let outcome = match assign(&input, &mut rng) {
        Ok(outcome) => outcome,
        Err(AssignError::Validation(message)) => return Err(GenerateError::Validation(message)),
        Err(AssignError::ZeroPossibilities(failure)) => {
            let error_path = paths.error();
            write(&error_path, &render_assignments(&failure.partial))?;
            return Err(GenerateError::Assignment { failure, error_path });
        }
    };

    tracing::info!(count = outcome.assignments.len(), "writing assignments");
    let debug_path = paths.debug();
    write(&debug_path, &render_selections(&outcome.selections))?;
    let result_path = paths.result();
    write(&result_path, &render_assignments(&outcome.assignments))?;
    tracing::info!(dir = %paths.dir().display(), prefix = %request.prefix, "finished writing");

    Ok(GenerateReport {
        result_path,
        debug_path,
        participants: input.participants.len(),
        assignments: outcome.assignments,
        selections: outcome.selections,
        skipped: outcome.skipped,
        seed: request.seed,
    })
}
