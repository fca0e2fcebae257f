//! Writing outcomes back into the tabular data model.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::job::{CellAddress, FinishedJob, ItemStatus, RunResult};

/// The tabular data the engine reads from and writes to.
///
/// Formatting and identity of cells are the implementor's concern; the engine
/// only moves text in and out.
pub trait DataModel {
    /// `(rows, cols)` of addressable data cells.
    fn dimensions(&self) -> (u32, u32);

    fn get_cell(&self, address: CellAddress) -> Option<String>;

    fn set_cell(&mut self, address: CellAddress, value: String);

    /// Column header, when the data has one.
    fn header(&self, col: u32) -> Option<String>;
}

/// Simple in-memory sheet: an optional header row over a grid of text cells.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sheet {
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    /// A single unnamed column.
    pub fn from_column<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: Vec::new(),
            rows: values.into_iter().map(|v| vec![v.into()]).collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

impl DataModel for Sheet {
    fn dimensions(&self) -> (u32, u32) {
        let cols = self
            .rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.headers.len()))
            .max()
            .unwrap_or(0);
        (self.rows.len() as u32, cols as u32)
    }

    fn get_cell(&self, address: CellAddress) -> Option<String> {
        self.rows
            .get(address.row as usize)?
            .get(address.col as usize)
            .cloned()
    }

    fn set_cell(&mut self, address: CellAddress, value: String) {
        let (row, col) = (address.row as usize, address.col as usize);
        if self.rows.len() <= row {
            self.rows.resize_with(row + 1, Vec::new);
        }
        let cells = &mut self.rows[row];
        if cells.len() <= col {
            cells.resize(col + 1, String::new());
        }
        cells[col] = value;
    }

    fn header(&self, col: u32) -> Option<String> {
        self.headers
            .get(col as usize)
            .filter(|h| !h.is_empty())
            .cloned()
    }
}

/// Reconciles a finished job with the data model.
pub struct ResultSink;

impl ResultSink {
    /// Writes every succeeded cell and summarizes the run. Failed and
    /// cancelled cells are left untouched.
    pub fn apply(model: &mut dyn DataModel, finished: FinishedJob) -> RunResult {
        let mut written = 0usize;
        for item in &finished.items {
            if item.status != ItemStatus::Succeeded {
                continue;
            }
            if let Some(output) = &item.output {
                model.set_cell(item.address, output.clone());
                written += 1;
            }
        }
        log::debug!("result sink wrote {written} cells for job {}", finished.job_id);

        RunResult::from_items(
            finished.job_id,
            finished.started_at,
            &finished.items,
            finished.elapsed,
        )
    }
}
