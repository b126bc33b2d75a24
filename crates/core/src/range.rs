//! A1 range notation: parsing, display, and footprint algebra.
//!
//! Supported forms: `A1`, `A1:C5`, `A:C` (whole columns), `2:4` (whole rows),
//! `A5:A` (open-ended column), each optionally prefixed with a sheet name
//! (`Sheet1!A1:B2`, `'Q1 Sales'!A:A`). Coordinates are zero-based and inclusive
//! internally; an open bound is stored as [`UNBOUNDED`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sentinel for an open row or column bound.
pub const UNBOUNDED: u32 = u32::MAX;

/// A rectangular cell area, optionally scoped to a named sheet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct A1Range {
    /// Sheet title; `None` means the spreadsheet's first sheet.
    pub sheet: Option<String>,
    pub start_row: u32,
    pub end_row: u32,
    pub start_col: u32,
    pub end_col: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid A1 range '{input}': {reason}")]
pub struct RangeParseError {
    pub input: String,
    pub reason: String,
}

impl A1Range {
    /// A bounded range from zero-based inclusive coordinates.
    pub fn new(sheet: Option<&str>, start_row: u32, start_col: u32, end_row: u32, end_col: u32) -> Self {
        Self {
            sheet: sheet.map(str::to_string),
            start_row: start_row.min(end_row),
            end_row: start_row.max(end_row),
            start_col: start_col.min(end_col),
            end_col: start_col.max(end_col),
        }
    }

    /// A single cell.
    pub fn cell(sheet: Option<&str>, row: u32, col: u32) -> Self {
        Self::new(sheet, row, col, row, col)
    }

    /// The whole of a sheet.
    pub fn whole_sheet(sheet: Option<&str>) -> Self {
        Self::new(sheet, 0, 0, UNBOUNDED, UNBOUNDED)
    }

    pub fn is_bounded(&self) -> bool {
        self.end_row != UNBOUNDED && self.end_col != UNBOUNDED
    }

    pub fn rows(&self) -> u64 {
        u64::from(self.end_row) - u64::from(self.start_row) + 1
    }

    pub fn cols(&self) -> u64 {
        u64::from(self.end_col) - u64::from(self.start_col) + 1
    }

    pub fn contains_cell(&self, row: u32, col: u32) -> bool {
        row >= self.start_row && row <= self.end_row && col >= self.start_col && col <= self.end_col
    }

    /// Whether both ranges may address the same sheet.
    ///
    /// An unnamed sheet could be any sheet, so it is compatible with every name.
    pub fn same_sheet(&self, other: &A1Range) -> bool {
        match (&self.sheet, &other.sheet) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    /// Whether the two ranges share at least one cell.
    pub fn overlaps(&self, other: &A1Range) -> bool {
        self.same_sheet(other)
            && self.start_row <= other.end_row
            && other.start_row <= self.end_row
            && self.start_col <= other.end_col
            && other.start_col <= self.end_col
    }

    /// Whether `other` lies entirely inside `self`.
    pub fn contains(&self, other: &A1Range) -> bool {
        self.same_sheet(other)
            && other.start_row >= self.start_row
            && other.end_row <= self.end_row
            && other.start_col >= self.start_col
            && other.end_col <= self.end_col
    }

    /// The same columns, extended from the start row to the bottom of the sheet.
    pub fn extend_down(&self) -> A1Range {
        A1Range {
            end_row: UNBOUNDED,
            ..self.clone()
        }
    }

    /// Clamp open bounds to the given extent (used when materializing reads).
    pub fn clamp(&self, max_row: u32, max_col: u32) -> A1Range {
        A1Range {
            end_row: self.end_row.min(max_row),
            end_col: self.end_col.min(max_col),
            ..self.clone()
        }
    }
}

// ── Column letters ──────────────────────────────────────────────────────────

/// `0 → "A"`, `25 → "Z"`, `26 → "AA"`.
pub fn column_name(mut col: u32) -> String {
    let mut out = Vec::new();
    loop {
        out.push(b'A' + (col % 26) as u8);
        if col < 26 {
            break;
        }
        col = col / 26 - 1;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn parse_column(letters: &str) -> Option<u32> {
    if letters.is_empty() || letters.len() > 6 {
        return None;
    }
    let mut n: u32 = 0;
    for c in letters.chars() {
        let c = c.to_ascii_uppercase();
        if !c.is_ascii_uppercase() {
            return None;
        }
        n = n * 26 + (c as u32 - 'A' as u32 + 1);
    }
    Some(n - 1)
}

/// One side of a range: column and/or row, either may be absent.
struct Endpoint {
    col: Option<u32>,
    row: Option<u32>,
}

fn parse_endpoint(s: &str) -> Option<Endpoint> {
    let split = s.find(|c: char| c.is_ascii_digit()).unwrap_or(s.len());
    let (letters, digits) = s.split_at(split);
    let col = if letters.is_empty() {
        None
    } else {
        Some(parse_column(letters)?)
    };
    let row = if digits.is_empty() {
        None
    } else {
        let n: u32 = digits.parse().ok()?;
        if n == 0 {
            return None;
        }
        Some(n - 1)
    };
    if col.is_none() && row.is_none() {
        return None;
    }
    Some(Endpoint { col, row })
}

fn split_sheet(input: &str) -> Result<(Option<String>, &str), String> {
    let Some(bang) = input.rfind('!') else {
        return Ok((None, input));
    };
    let (sheet, rest) = (&input[..bang], &input[bang + 1..]);
    let sheet = if let Some(quoted) = sheet.strip_prefix('\'') {
        quoted
            .strip_suffix('\'')
            .ok_or_else(|| "unterminated quoted sheet name".to_string())?
            .replace("''", "'")
    } else {
        sheet.to_string()
    };
    if sheet.is_empty() {
        return Err("empty sheet name".into());
    }
    Ok((Some(sheet), rest))
}

impl FromStr for A1Range {
    type Err = RangeParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let err = |reason: &str| RangeParseError {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        let (sheet, cells) = split_sheet(trimmed).map_err(|r| err(&r))?;
        if cells.is_empty() {
            // A bare sheet reference addresses the whole sheet.
            return match sheet {
                Some(s) => Ok(A1Range::whole_sheet(Some(&s))),
                None => Err(err("empty range")),
            };
        }

        let (first, second) = match cells.split_once(':') {
            Some((a, b)) => (a, Some(b)),
            None => (cells, None),
        };
        let start = parse_endpoint(first).ok_or_else(|| err("malformed start cell"))?;

        let Some(second) = second else {
            // Single cell: both parts required.
            let (Some(col), Some(row)) = (start.col, start.row) else {
                return Err(err("a single cell needs a column and a row"));
            };
            return Ok(A1Range {
                sheet,
                start_row: row,
                end_row: row,
                start_col: col,
                end_col: col,
            });
        };

        if second.is_empty() {
            // `5:` addresses every row from the fifth down.
            return match (start.col, start.row) {
                (None, Some(row)) => Ok(A1Range {
                    sheet,
                    start_row: row,
                    end_row: UNBOUNDED,
                    start_col: 0,
                    end_col: UNBOUNDED,
                }),
                _ => Err(err("malformed end cell")),
            };
        }

        let end = parse_endpoint(second).ok_or_else(|| err("malformed end cell"))?;
        let (start_col, end_col) = match (start.col, end.col) {
            (Some(a), Some(b)) => (a, b),
            (None, None) => (0, UNBOUNDED),
            _ => return Err(err("column given on only one side")),
        };
        let (start_row, end_row) = match (start.row, end.row) {
            (Some(a), Some(b)) => (a, b),
            (None, None) => (0, UNBOUNDED),
            (Some(a), None) => (a, UNBOUNDED),
            (None, Some(_)) => return Err(err("row given only on the end cell")),
        };
        if start_col > end_col || start_row > end_row {
            return Err(err("start is after end"));
        }

        Ok(A1Range {
            sheet,
            start_row,
            end_row,
            start_col,
            end_col,
        })
    }
}

impl fmt::Display for A1Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sheet) = &self.sheet {
            let plain = sheet.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if plain {
                write!(f, "{sheet}!")?;
            } else {
                write!(f, "'{}'!", sheet.replace('\'', "''"))?;
            }
        }

        let cols_open = self.start_col == 0 && self.end_col == UNBOUNDED;
        let rows_open = self.start_row == 0 && self.end_row == UNBOUNDED;
        match (cols_open, rows_open) {
            (true, true) if self.sheet.is_some() => Ok(()),
            (true, _) => {
                let end = if self.end_row == UNBOUNDED {
                    String::new()
                } else {
                    (self.end_row + 1).to_string()
                };
                write!(f, "{}:{}", self.start_row + 1, end)
            }
            (false, true) => write!(
                f,
                "{}:{}",
                column_name(self.start_col),
                column_name(self.end_col)
            ),
            (false, false) => {
                let start = format!("{}{}", column_name(self.start_col), self.start_row + 1);
                if self.end_row == UNBOUNDED {
                    write!(f, "{start}:{}", column_name(self.end_col))
                } else if self.start_row == self.end_row && self.start_col == self.end_col {
                    write!(f, "{start}")
                } else {
                    write!(f, "{start}:{}{}", column_name(self.end_col), self.end_row + 1)
                }
            }
        }
    }
}

impl TryFrom<String> for A1Range {
    type Error = RangeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<A1Range> for String {
    fn from(range: A1Range) -> Self {
        range.to_string()
    }
}
