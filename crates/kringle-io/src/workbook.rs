//! Roster workbook loading (XLSX/XLS/ODS via calamine, or JSON)

use std::ffi::OsStr;
use std::fs;
use std::io::BufReader;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader, Sheets};
use kringle_core::{Participant, PastAssignments, PreferredAssignment, RosterInput};
use serde::Deserialize;
use thiserror::Error;

pub const ACTIVE_MEMBERS_SHEET: &str = "Active Members";
pub const PREFERRED_SHEET: &str = "Preferred Assign";
pub const PAST_SHEET: &str = "Past Assignments";

pub const NAME_COLUMN: &str = "Name";
pub const GROUP_1_COLUMN: &str = "Exclude Group 1";
pub const GROUP_2_COLUMN: &str = "Exclude Group 2";
pub const GIVER_COLUMN: &str = "KK Giver";
pub const RECEIVER_COLUMN: &str = "KK Receiver";
/// Spreadsheet helper column on the history sheet; never holds a receiver.
pub const LOOKUP_COLUMN: &str = "Vlookup (invalid)";

#[derive(Debug, Error)]
pub enum WorkbookError {
    #[error("IO error reading {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("Calamine error: {0}")]
    Calamine(#[from] calamine::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("workbook is missing sheet `{0}`")]
    MissingSheet(String),
    #[error("sheet `{sheet}` is missing column `{column}`")]
    MissingColumn { sheet: String, column: String },
    #[error("unsupported workbook format: {0}")]
    UnsupportedFormat(String),
}

type Row = Vec<Option<String>>;

/// One sheet: a header row plus data rows. Cells are trimmed; blanks are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetTable {
    name: String,
    headers: Vec<String>,
    rows: Vec<Row>,
}

impl SheetTable {
    /// Build a table whose first row is the header. Fully blank data rows are dropped.
    pub fn from_rows<I>(name: &str, rows: I) -> Self
    where
        I: IntoIterator<Item = Row>,
    {
        let mut rows = rows.into_iter();
        let headers = rows
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect();
        let rows = rows.filter(|row| row.iter().any(Option::is_some)).collect();
        Self { name: name.to_string(), headers, rows }
    }

    fn from_range(name: &str, range: &calamine::Range<Data>) -> Self {
        Self::from_rows(name, range.rows().map(|row| row.iter().map(cell_value).collect()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|candidate| candidate == header)
    }

    fn require_column(&self, header: &str) -> Result<usize, WorkbookError> {
        self.column(header).ok_or_else(|| WorkbookError::MissingColumn {
            sheet: self.name.clone(),
            column: header.to_string(),
        })
    }

    /// Roster members; rows without a name are ignored.
    pub fn participants(&self) -> Result<Vec<Participant>, WorkbookError> {
        let name = self.require_column(NAME_COLUMN)?;
        let group_1 = self.column(GROUP_1_COLUMN);
        let group_2 = self.column(GROUP_2_COLUMN);

        Ok(self
            .rows
            .iter()
            .filter_map(|row| {
                Some(Participant {
                    name: cell(row, Some(name))?.to_string(),
                    exclude_group_1: cell(row, group_1).map(str::to_string),
                    exclude_group_2: cell(row, group_2).map(str::to_string),
                })
            })
            .collect())
    }

    /// Preferred pairings. A row with a giver but no receiver keeps the giver with an
    /// empty receiver.
    pub fn preferred(&self) -> Result<Vec<PreferredAssignment>, WorkbookError> {
        let giver = self.require_column(GIVER_COLUMN)?;
        let receiver = self.require_column(RECEIVER_COLUMN)?;

        Ok(self
            .rows
            .iter()
            .filter_map(|row| {
                Some(PreferredAssignment::new(
                    cell(row, Some(giver))?,
                    cell(row, Some(receiver)).unwrap_or_default(),
                ))
            })
            .collect())
    }

    /// Every column other than the giver and the lookup helper is a history column.
    pub fn past(&self) -> Result<PastAssignments, WorkbookError> {
        let giver = self.require_column(GIVER_COLUMN)?;
        let lookup = self.column(LOOKUP_COLUMN);
        let history: Vec<usize> = (0..self.headers.len())
            .filter(|index| *index != giver && Some(*index) != lookup)
            .collect();

        let mut past = PastAssignments::new();
        for row in &self.rows {
            let Some(name) = cell(row, Some(giver)) else { continue };
            for index in &history {
                if let Some(receiver) = cell(row, Some(*index)) {
                    past.insert(name, receiver);
                }
            }
        }
        Ok(past)
    }
}

fn cell(row: &[Option<String>], index: Option<usize>) -> Option<&str> {
    row.get(index?).and_then(Option::as_deref)
}

fn cell_value(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty | Data::Error(_) => return None,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        // Numeric group ids come back as floats
        Data::Float(f) => {
            if f.fract() == 0.0 {
                format!("{f:.0}")
            } else {
                format!("{f}")
            }
        }
        Data::Int(i) => format!("{i}"),
        Data::Bool(b) => {
            if *b {
                "TRUE".to_string()
            } else {
                "FALSE".to_string()
            }
        }
        Data::DateTime(dt) => format!("{dt}"),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[derive(Debug, Deserialize)]
struct JsonWorkbook {
    active_members: Vec<Participant>,
    #[serde(default)]
    preferred_assign: Vec<PreferredAssignment>,
    #[serde(default)]
    past_assignments: Vec<JsonPastRow>,
}

#[derive(Debug, Deserialize)]
struct JsonPastRow {
    giver: String,
    #[serde(default)]
    receivers: Vec<String>,
}

/// Load the roster, preferred pairings and history from `path`.
///
/// The format is chosen by extension: spreadsheet workbooks must carry an
/// `Active Members` sheet; `Preferred Assign` and `Past Assignments` are optional.
///
/// # Errors
/// Returns [`WorkbookError`] when the file cannot be read or parsed, the extension is
/// unknown, or a required sheet or column is missing.
pub fn load_roster(path: &Path) -> Result<RosterInput, WorkbookError> {
    let extension =
        path.extension().and_then(OsStr::to_str).map(str::to_ascii_lowercase).unwrap_or_default();

    let input = match extension.as_str() {
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => load_spreadsheet(path)?,
        "json" => load_json(path)?,
        _ => return Err(WorkbookError::UnsupportedFormat(path.display().to_string())),
    };

    tracing::info!(
        path = %path.display(),
        participants = input.participants.len(),
        preferred = input.preferred.len(),
        past = input.past.len(),
        "loaded roster workbook"
    );
    Ok(input)
}

fn load_spreadsheet(path: &Path) -> Result<RosterInput, WorkbookError> {
    let mut workbook = open_workbook_auto(path)?;

    let active = read_sheet(&mut workbook, ACTIVE_MEMBERS_SHEET)?
        .ok_or_else(|| WorkbookError::MissingSheet(ACTIVE_MEMBERS_SHEET.to_string()))?;
    let preferred = match read_sheet(&mut workbook, PREFERRED_SHEET)? {
        Some(table) => table.preferred()?,
        None => Vec::new(),
    };
    let past = match read_sheet(&mut workbook, PAST_SHEET)? {
        Some(table) => table.past()?,
        None => PastAssignments::new(),
    };

    Ok(RosterInput { participants: active.participants()?, preferred, past })
}

fn read_sheet(
    workbook: &mut Sheets<BufReader<fs::File>>,
    name: &str,
) -> Result<Option<SheetTable>, WorkbookError> {
    if !workbook.sheet_names().iter().any(|sheet| sheet == name) {
        tracing::debug!(sheet = name, "sheet not present in workbook");
        return Ok(None);
    }
    let range = workbook.worksheet_range(name)?;
    Ok(Some(SheetTable::from_range(name, &range)))
}

fn load_json(path: &Path) -> Result<RosterInput, WorkbookError> {
    let body = fs::read_to_string(path)
        .map_err(|source| WorkbookError::Io { path: path.display().to_string(), source })?;
    let workbook: JsonWorkbook = serde_json::from_str(&body)?;

    let past = workbook
        .past_assignments
        .into_iter()
        .flat_map(|row| {
            let giver = row.giver;
            row.receivers.into_iter().map(move |receiver| (giver.clone(), receiver))
        })
        .collect();

    Ok(RosterInput {
        participants: workbook.active_members,
        preferred: workbook.preferred_assign,
        past,
    })
}
