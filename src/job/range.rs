//! Cell addressing in A1 notation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Zero-based cell coordinate. Ordering is row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellAddress {
    pub row: u32,
    pub col: u32,
}

impl CellAddress {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Column letters as shown in a spreadsheet header (`0` → `A`, `26` → `AA`).
    pub fn column_letters(&self) -> String {
        column_to_letters(self.col)
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_to_letters(self.col), self.row + 1)
    }
}

impl FromStr for CellAddress {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| EngineError::InvalidRange(format!("`{s}` has no row number")))?;
        let (letters, digits) = s.split_at(split);
        if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(EngineError::InvalidRange(format!(
                "`{s}` has no column letters"
            )));
        }
        let row: u32 = digits
            .parse()
            .map_err(|_| EngineError::InvalidRange(format!("`{s}` has an invalid row number")))?;
        if row == 0 {
            return Err(EngineError::InvalidRange(format!("`{s}`: rows start at 1")));
        }
        let col = letters_to_column(letters)
            .ok_or_else(|| EngineError::InvalidRange(format!("`{s}`: column out of range")))?;
        Ok(CellAddress::new(row - 1, col))
    }
}

fn column_to_letters(col: u32) -> String {
    let mut n = col as u64 + 1;
    let mut out = Vec::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        out.push(b'A' + rem);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Column index for letters such as `B` or `aa`; `None` for anything else.
pub(crate) fn parse_column(letters: &str) -> Option<u32> {
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    letters_to_column(letters)
}

fn letters_to_column(letters: &str) -> Option<u32> {
    let mut n: u64 = 0;
    for c in letters.chars() {
        let digit = (c.to_ascii_uppercase() as u8 - b'A') as u64 + 1;
        n = n.checked_mul(26)?.checked_add(digit)?;
        if n > u32::MAX as u64 {
            return None;
        }
    }
    Some((n - 1) as u32)
}

/// A rectangular block of cells anchored at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRange {
    pub start: CellAddress,
    pub rows: u32,
    pub cols: u32,
}

impl CellRange {
    /// Inclusive range between two corners, in either order.
    pub fn new(a: CellAddress, b: CellAddress) -> Self {
        let start = CellAddress::new(a.row.min(b.row), a.col.min(b.col));
        Self {
            start,
            rows: a.row.max(b.row) - start.row + 1,
            cols: a.col.max(b.col) - start.col + 1,
        }
    }

    pub fn with_size(start: CellAddress, rows: u32, cols: u32) -> Self {
        Self { start, rows, cols }
    }

    pub fn len(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    /// Bottom-right corner, or `None` for an empty range.
    pub fn end(&self) -> Option<CellAddress> {
        if self.is_empty() {
            return None;
        }
        Some(CellAddress::new(
            self.start.row.checked_add(self.rows - 1)?,
            self.start.col.checked_add(self.cols - 1)?,
        ))
    }

    /// Every address in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = CellAddress> + '_ {
        (0..self.rows).flat_map(move |dr| {
            (0..self.cols).map(move |dc| CellAddress::new(self.start.row + dr, self.start.col + dc))
        })
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end() {
            Some(end) if end == self.start => write!(f, "{}", self.start),
            Some(end) => write!(f, "{}:{}", self.start, end),
            None => write!(f, "{}(empty)", self.start),
        }
    }
}

impl FromStr for CellRange {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((a, b)) => Ok(CellRange::new(a.parse()?, b.parse()?)),
            None => {
                let cell: CellAddress = s.parse()?;
                Ok(CellRange::new(cell, cell))
            }
        }
    }
}
