//! Fixed-width text tables for the result, debug and error artifacts

use std::fs;
use std::path::{Path, PathBuf};

use kringle_core::{Assignments, SelectionRecord};

pub const GIVER_HEADER: &str = "KK Giver";
pub const RECEIVER_HEADER: &str = "KK Receiver";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

/// Plain-text table. Every column is padded to its widest cell, header included.
#[derive(Debug, Clone)]
pub struct TextTable {
    columns: Vec<(String, Align)>,
    rows: Vec<Vec<String>>,
}

impl TextTable {
    #[must_use]
    pub fn new(columns: &[(&str, Align)]) -> Self {
        Self {
            columns: columns.iter().map(|(header, align)| ((*header).to_string(), *align)).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    #[must_use]
    pub fn render(&self) -> String {
        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(index, (header, _))| {
                self.rows
                    .iter()
                    .filter_map(|row| row.get(index))
                    .map(|cell| cell.chars().count())
                    .chain(std::iter::once(header.chars().count()))
                    .max()
                    .unwrap_or_default()
            })
            .collect();

        let headers: Vec<&str> = self.columns.iter().map(|(header, _)| header.as_str()).collect();
        let mut output = String::new();
        for line in std::iter::once(headers)
            .chain(self.rows.iter().map(|row| row.iter().map(String::as_str).collect()))
        {
            let cells: Vec<String> = line
                .iter()
                .zip(&self.columns)
                .zip(widths.iter().copied())
                .map(|((cell, (_, align)), width)| match align {
                    Align::Left => format!("{cell:<width$}"),
                    Align::Right => format!("{cell:>width$}"),
                })
                .collect();
            output.push_str(cells.join(" ").trim_end());
            output.push('\n');
        }
        output
    }
}

/// Giver/receiver table in commit order.
#[must_use]
pub fn render_assignments(assignments: &Assignments) -> String {
    let mut table = TextTable::new(&[(GIVER_HEADER, Align::Left), (RECEIVER_HEADER, Align::Left)]);
    for pair in assignments {
        table.push_row(vec![pair.giver.clone(), pair.receiver.clone()]);
    }
    table.render()
}

/// Per-participant exclusion and candidate counts.
#[must_use]
pub fn render_selections(selections: &[SelectionRecord]) -> String {
    let mut table = TextTable::new(&[
        ("Name", Align::Left),
        ("Phase", Align::Left),
        ("Except", Align::Right),
        ("Possible", Align::Right),
    ]);
    for record in selections {
        table.push_row(vec![
            record.name.clone(),
            record.phase.to_string(),
            record.excluded.to_string(),
            record.possible.to_string(),
        ]);
    }
    table.render()
}

/// Where one run writes its artifacts: `<dir>/<prefix>.txt`, `.debug.txt`, `.err.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    dir: PathBuf,
    prefix: String,
}

impl OutputPaths {
    #[must_use]
    pub fn new(dir: &Path, prefix: &str) -> Self {
        Self { dir: dir.to_path_buf(), prefix: prefix.to_string() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn result(&self) -> PathBuf {
        self.dir.join(format!("{}.txt", self.prefix))
    }

    #[must_use]
    pub fn debug(&self) -> PathBuf {
        self.dir.join(format!("{}.debug.txt", self.prefix))
    }

    #[must_use]
    pub fn error(&self) -> PathBuf {
        self.dir.join(format!("{}.err.txt", self.prefix))
    }
}

/// Write `body` to `path`, creating the parent directory first.
///
/// # Errors
/// Returns the underlying IO error when the directory or file cannot be written.
pub fn write_artifact(path: &Path, body: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, body)?;
    tracing::info!(path = %path.display(), "wrote artifact");
    Ok(())
}
