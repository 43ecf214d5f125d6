//! Sheet tables as fetched from the survey spreadsheet
//!
//! A `SheetTable` is positional: columns 0 and 1 carry respondent identity
//! (timestamp, email address), every further column is a song. Header names
//! come from the sheet's first row and are sanitized so they are unique and
//! non-empty.
//!
//! Older survey years were collected in a different shape (one row per song,
//! one column per voter). `transpose_legacy` turns those into the canonical
//! voter-row layout before anything numeric happens.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Header used for the timestamp column of transposed legacy sheets
pub const TIMESTAMP_HEADER: &str = "Timestamp";

/// Physical layout of a survey sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SheetLayout {
    /// One row per voter: timestamp, email, then one column per song
    #[default]
    Canonical,
    /// One row per song: song, artist, then one column per voter
    Legacy,
}

/// Raw rectangular table with sanitized headers
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SheetTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SheetTable {
    /// Build a table from headers and rows
    ///
    /// Headers are sanitized; every row is padded with empty cells or
    /// truncated so that it has exactly one cell per header.
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let headers = sanitize_headers(&headers);
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self { headers, rows }
    }

    /// Build a table from all values of a worksheet, first row being the header row
    pub fn from_values(mut values: Vec<Vec<String>>) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let headers = values.remove(0);
        Self::new(headers, values)
    }

    /// True when the table has no rows or no columns
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.headers.is_empty()
    }

    /// Number of columns
    pub fn width(&self) -> usize {
        self.headers.len()
    }

    /// Index of the column whose header matches `name` (case-insensitive)
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name.trim()))
    }
}

/// Return a list of unique, non-empty headers
///
/// - Empty headers are replaced with `col_1`, `col_2`, ... (1-indexed by position)
/// - Duplicate names are suffixed with `_2`, `_3`, ... until unique
pub fn sanitize_headers(headers: &[String]) -> Vec<String> {
    let mut cleaned = Vec::with_capacity(headers.len());
    let mut seen: HashSet<String> = HashSet::new();

    for (i, header) in headers.iter().enumerate() {
        let mut name = header.trim().to_string();
        if name.is_empty() {
            name = format!("col_{}", i + 1);
        }
        let base = name.clone();
        let mut n = 1;
        while seen.contains(&name) {
            n += 1;
            name = format!("{}_{}", base, n);
        }
        seen.insert(name.clone());
        cleaned.push(name);
    }

    cleaned
}

/// Transpose a legacy song-row sheet into the canonical voter-row layout
///
/// Legacy columns are `Song`, `Artist`, then one column per voter. The output
/// has `Timestamp`, `identity_column`, then one column per legacy song row
/// named `"<song> - <artist>"` (or just `<song>` when the artist is blank).
/// Cell text is carried over untouched; coercion happens at aggregation.
pub fn transpose_legacy(table: &SheetTable, identity_column: &str) -> SheetTable {
    if table.width() < 3 {
        debug!(width = table.width(), "Legacy sheet too narrow to transpose");
        return SheetTable::default();
    }

    let song_rows: Vec<&Vec<String>> = table
        .rows
        .iter()
        .filter(|row| !row[0].trim().is_empty())
        .collect();

    let mut headers = vec![TIMESTAMP_HEADER.to_string(), identity_column.to_string()];
    headers.extend(song_rows.iter().map(|row| {
        let song = row[0].trim();
        let artist = row[1].trim();
        if artist.is_empty() {
            song.to_string()
        } else {
            format!("{} - {}", song, artist)
        }
    }));

    let rows = table.headers[2..]
        .iter()
        .enumerate()
        .map(|(offset, voter)| {
            let col = offset + 2;
            let mut row = vec![String::new(), voter.clone()];
            row.extend(song_rows.iter().map(|song_row| song_row[col].clone()));
            row
        })
        .collect();

    debug!(
        songs = song_rows.len(),
        voters = table.width() - 2,
        "Transposed legacy sheet"
    );

    SheetTable::new(headers, rows)
}

/// Bring a sheet of the given layout into canonical shape
pub fn normalize(layout: SheetLayout, table: SheetTable, identity_column: &str) -> SheetTable {
    match layout {
        SheetLayout::Canonical => table,
        SheetLayout::Legacy => transpose_legacy(&table, identity_column),
    }
}
