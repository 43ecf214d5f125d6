//! Per-voter comparison against the community averages
//!
//! A voter is identified by the local part of their email address (the text
//! before `@`), matched case-insensitively. The comparison universe is the set
//! of songs the voter actually rated: songs missing from the aggregate keep
//! their row with no average and no difference.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;
use tracing::{debug, warn};

use crate::scoring::{aggregate, AggregateScore, RatingMatrix, ScoreBounds};
use crate::sheet::SheetTable;

/// Default header of the voter identity column
pub const DEFAULT_IDENTITY_COLUMN: &str = "Email address";

/// Lookup and comparison failures
///
/// Display strings are user-facing and rendered directly by the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComparisonError {
    /// No sheet, or a sheet without any voter rows
    #[error("no data available")]
    NoData,

    /// Identity column exists but no row matches the identifier
    #[error("user not found for `{0}`")]
    UserNotFound(String),

    /// Sheet does not carry the configured identity column
    #[error("data format error: missing identity column")]
    MissingIdentityColumn,
}

/// Lowercased local part of an email-like identity (text before the first `@`)
pub fn local_part(identity: &str) -> String {
    identity
        .split('@')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

/// Options for `compare`
#[derive(Debug, Clone)]
pub struct ComparisonOptions {
    pub bounds: ScoreBounds,
    pub identity_column: String,
}

impl Default for ComparisonOptions {
    fn default() -> Self {
        Self {
            bounds: ScoreBounds::default(),
            identity_column: DEFAULT_IDENTITY_COLUMN.to_string(),
        }
    }
}

/// The located voter and the songs they rated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoterRatings {
    /// Row index within the matrix
    pub row: usize,
    /// Full identity value (e.g. the email address)
    pub identity: String,
    /// (song, your score) in sheet column order, blanks dropped
    pub ratings: Vec<(String, f64)>,
}

/// One row of the comparison table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub song: String,
    /// Community average; `None` when the song was excluded from the aggregate
    pub average_score: Option<f64>,
    pub your_score: f64,
    /// `your_score - average_score`, only when the average exists
    pub difference: Option<f64>,
}

/// Find the voter whose identity local part matches `identifier`
///
/// When several rows match, the first one wins.
pub fn locate_voter(
    matrix: &RatingMatrix,
    identifier: &str,
    identity_column: &str,
) -> Result<VoterRatings, ComparisonError> {
    if matrix.voters.is_empty() {
        return Err(ComparisonError::NoData);
    }
    let column = matrix
        .identity_index(identity_column)
        .ok_or(ComparisonError::MissingIdentityColumn)?;

    let wanted = local_part(identifier);
    if wanted.is_empty() {
        return Err(ComparisonError::UserNotFound(identifier.trim().to_string()));
    }
    let mut matches = matrix
        .voters
        .iter()
        .enumerate()
        .filter(|(_, v)| local_part(&v.identity[column]) == wanted);

    let (row, voter) = matches
        .next()
        .ok_or_else(|| ComparisonError::UserNotFound(identifier.trim().to_string()))?;

    let extra = matches.count();
    if extra > 0 {
        warn!(
            identifier = %wanted,
            duplicates = extra,
            "Multiple voter rows match identifier, using the first"
        );
    }

    let ratings = matrix
        .songs
        .iter()
        .zip(&voter.ratings)
        .filter_map(|(song, rating)| rating.map(|r| (song.clone(), r)))
        .collect();

    Ok(VoterRatings {
        row,
        identity: voter.identity[column].clone(),
        ratings,
    })
}

/// Compare a voter against the aggregate computed from `table`
pub fn compare(
    identifier: &str,
    table: Option<&SheetTable>,
    options: &ComparisonOptions,
) -> Result<Vec<ComparisonRow>, ComparisonError> {
    let aggregation = aggregate(table, &options.bounds);
    let matrix = aggregation.matrix.as_ref().ok_or(ComparisonError::NoData)?;
    compare_with(identifier, matrix, &aggregation.scores, &options.identity_column)
}

/// Compare a voter against an already computed aggregate
///
/// Rows are sorted by absolute difference descending; rows without an
/// average follow, in sheet column order.
pub fn compare_with(
    identifier: &str,
    matrix: &RatingMatrix,
    scores: &[AggregateScore],
    identity_column: &str,
) -> Result<Vec<ComparisonRow>, ComparisonError> {
    let voter = locate_voter(matrix, identifier, identity_column)?;

    let mut rows: Vec<ComparisonRow> = voter
        .ratings
        .into_iter()
        .map(|(song, your_score)| {
            let average_score = scores
                .iter()
                .find(|s| s.song == song)
                .map(|s| s.average_score);
            ComparisonRow {
                difference: average_score.map(|avg| your_score - avg),
                song,
                average_score,
                your_score,
            }
        })
        .collect();

    rows.sort_by(by_disagreement);

    debug!(
        identifier = %local_part(identifier),
        rows = rows.len(),
        "Built voter comparison"
    );

    Ok(rows)
}

fn by_disagreement(a: &ComparisonRow, b: &ComparisonRow) -> Ordering {
    match (a.difference, b.difference) {
        (Some(x), Some(y)) => y.abs().total_cmp(&x.abs()),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
