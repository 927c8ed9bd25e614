//! Workbook input, text-table output and the end-to-end generate pipeline around
//! `kringle-core`.

pub mod generate;
pub mod report;
pub mod workbook;

pub use generate::{generate, GenerateError, GenerateReport, GenerateRequest};
pub use report::{render_assignments, render_selections, OutputPaths};
pub use workbook::{load_roster, WorkbookError};
