//! Score aggregation with competition ranking
//!
//! Turns a raw sheet into a numeric `RatingMatrix` and one `AggregateScore`
//! per song.
//!
//! # Rules
//! - Columns 0 and 1 are identity columns; every further column is a song
//! - Cells are coerced to numbers; unparsable, non-finite or out-of-bounds
//!   cells become missing values (never an error)
//! - Average = mean of the non-missing values of a song column
//! - Songs without any value are dropped; songs whose average is not `> 0`
//!   are dropped as unrated
//! - Rank = 1 + number of songs with a strictly greater average
//!   (competition ranking: 9.5, 9.5, 8.0 → 1, 1, 3)
//! - Display order: rank asc, average desc, song asc

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

use crate::sheet::SheetTable;

/// Number of leading identity columns (timestamp, email address)
pub const IDENTITY_COLUMNS: usize = 2;

/// Valid rating range; cells outside it are treated as missing
///
/// With the default lower bound of 1, a literal 0 ("no vote" in the survey
/// form) is an explicit missing value rather than a score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBounds {
    pub min: f64,
    pub max: f64,
}

impl Default for ScoreBounds {
    fn default() -> Self {
        Self { min: 1.0, max: 10.0 }
    }
}

impl ScoreBounds {
    /// Coerce one cell to a rating
    pub fn coerce(&self, cell: &str) -> Option<f64> {
        let value = cell.trim().parse::<f64>().ok()?;
        if !value.is_finite() || value < self.min || value > self.max {
            return None;
        }
        Some(value)
    }
}

/// One voter's row: identity cells followed by coerced ratings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoterRecord {
    pub identity: Vec<String>,
    pub ratings: Vec<Option<f64>>,
}

impl VoterRecord {
    /// Mean of this voter's non-missing ratings
    pub fn mean_rating(&self) -> Option<f64> {
        mean(self.ratings.iter().flatten().copied())
    }

    /// Number of songs this voter rated
    pub fn rated_count(&self) -> usize {
        self.ratings.iter().filter(|r| r.is_some()).count()
    }
}

/// Numeric voter × song matrix
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RatingMatrix {
    pub identity_headers: Vec<String>,
    pub songs: Vec<String>,
    pub voters: Vec<VoterRecord>,
}

impl RatingMatrix {
    /// Build the matrix from a sheet with at least three columns
    pub fn from_table(table: &SheetTable, bounds: &ScoreBounds) -> Self {
        let split = IDENTITY_COLUMNS.min(table.width());
        let identity_headers = table.headers[..split].to_vec();
        let songs = table.headers[split..].to_vec();
        let voters = table
            .rows
            .iter()
            .map(|row| VoterRecord {
                identity: row[..split].to_vec(),
                ratings: row[split..].iter().map(|cell| bounds.coerce(cell)).collect(),
            })
            .collect();

        Self {
            identity_headers,
            songs,
            voters,
        }
    }

    pub fn voter_count(&self) -> usize {
        self.voters.len()
    }

    pub fn song_count(&self) -> usize {
        self.songs.len()
    }

    /// Index of the identity column named `name` (case-insensitive)
    pub fn identity_index(&self, name: &str) -> Option<usize> {
        self.identity_headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name.trim()))
    }

    /// Index of a song column by exact name
    pub fn song_index(&self, song: &str) -> Option<usize> {
        self.songs.iter().position(|s| s == song)
    }

    /// Non-missing ratings of one song column
    pub fn song_ratings(&self, song_idx: usize) -> impl Iterator<Item = f64> + '_ {
        self.voters
            .iter()
            .filter_map(move |v| v.ratings.get(song_idx).copied().flatten())
    }

    /// Every non-missing rating in the matrix
    pub fn all_ratings(&self) -> impl Iterator<Item = f64> + '_ {
        self.voters
            .iter()
            .flat_map(|v| v.ratings.iter().flatten().copied())
    }
}

/// Aggregate score of one song
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateScore {
    pub song: String,
    pub average_score: f64,
    pub rank: u32,
}

/// Result of `aggregate`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Aggregation {
    /// Coerced matrix; `None` for degenerate input (missing, empty or fewer than 3 columns)
    pub matrix: Option<RatingMatrix>,
    /// Songs in display order; empty for degenerate input
    pub scores: Vec<AggregateScore>,
}

/// Compute per-song average scores with competition ranks
///
/// Never fails: degenerate input yields an empty score list and no matrix.
pub fn aggregate(table: Option<&SheetTable>, bounds: &ScoreBounds) -> Aggregation {
    let table = match table {
        Some(t) if !t.is_empty() && t.width() > IDENTITY_COLUMNS => t,
        _ => {
            debug!("Degenerate sheet, skipping aggregation");
            return Aggregation::default();
        }
    };

    let matrix = RatingMatrix::from_table(table, bounds);
    let scores = score_matrix(&matrix);

    debug!(
        voters = matrix.voter_count(),
        songs = matrix.song_count(),
        ranked = scores.len(),
        "Aggregated scores"
    );

    Aggregation {
        matrix: Some(matrix),
        scores,
    }
}

/// Rank the songs of an already coerced matrix
pub fn score_matrix(matrix: &RatingMatrix) -> Vec<AggregateScore> {
    let averaged: Vec<(String, f64)> = matrix
        .songs
        .iter()
        .enumerate()
        .filter_map(|(idx, song)| mean(matrix.song_ratings(idx)).map(|avg| (song.clone(), avg)))
        // Compatibility filter: a non-positive average counts as "no real votes"
        .filter(|(_, avg)| *avg > 0.0)
        .collect();

    let averages: Vec<f64> = averaged.iter().map(|(_, avg)| *avg).collect();
    let ranks = competition_ranks(&averages);

    let mut scores: Vec<AggregateScore> = averaged
        .into_iter()
        .zip(ranks)
        .map(|((song, average_score), rank)| AggregateScore {
            song,
            average_score,
            rank,
        })
        .collect();

    scores.sort_by(display_order);
    scores
}

/// Competition ranks for a list of scores, higher score = better rank
///
/// `rank(i) = 1 + |{ j : scores[j] > scores[i] }|`
pub fn competition_ranks(scores: &[f64]) -> Vec<u32> {
    scores
        .iter()
        .map(|s| 1 + scores.iter().filter(|other| *other > s).count() as u32)
        .collect()
}

fn display_order(a: &AggregateScore, b: &AggregateScore) -> Ordering {
    a.rank
        .cmp(&b.rank)
        .then_with(|| b.average_score.total_cmp(&a.average_score))
        .then_with(|| a.song.cmp(&b.song))
}

/// Arithmetic mean, `None` for an empty input
pub(crate) fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Headline numbers for the overview
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreStats {
    pub total_votes: usize,
    pub total_songs: usize,
    pub average_of_averages: f64,
}

impl ScoreStats {
    pub fn from_aggregation(aggregation: &Aggregation) -> Self {
        Self {
            total_votes: aggregation
                .matrix
                .as_ref()
                .map(RatingMatrix::voter_count)
                .unwrap_or(0),
            total_songs: aggregation.scores.len(),
            average_of_averages: mean(aggregation.scores.iter().map(|s| s.average_score))
                .unwrap_or(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(headers: &[&str], rows: &[&[&str]]) -> SheetTable {
        SheetTable::new(
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn test_coerce_bounds() {
        let bounds = ScoreBounds::default();
        assert_eq!(bounds.coerce(" 8 "), Some(8.0));
        assert_eq!(bounds.coerce("9.5"), Some(9.5));
        assert_eq!(bounds.coerce("0"), None);
        assert_eq!(bounds.coerce("11"), None);
        assert_eq!(bounds.coerce("invalid"), None);
        assert_eq!(bounds.coerce(""), None);
        assert_eq!(bounds.coerce("NaN"), None);
        assert_eq!(bounds.coerce("inf"), None);
    }

    #[test]
    fn test_competition_ranks() {
        assert_eq!(competition_ranks(&[9.5, 9.5, 8.0]), vec![1, 1, 3]);
        assert_eq!(competition_ranks(&[7.0, 9.0, 8.0, 9.0]), vec![4, 1, 3, 1]);
        assert!(competition_ranks(&[]).is_empty());
    }

    #[test]
    fn test_basic_average() {
        let t = table(
            &["Timestamp", "Email", "Song A", "Song B"],
            &[&["t1", "user1@test.com", "8", "7"], &["t2", "user2@test.com", "9", "6"]],
        );
        let agg = aggregate(Some(&t), &ScoreBounds::default());
        assert_eq!(agg.scores.len(), 2);
        assert_eq!(agg.scores[0].song, "Song A");
        assert_eq!(agg.scores[0].average_score, 8.5);
        assert_eq!(agg.scores[0].rank, 1);
        assert_eq!(agg.scores[1].average_score, 6.5);
        assert_eq!(agg.scores[1].rank, 2);
    }

    #[test]
    fn test_ties_share_rank_and_sort_by_name() {
        let t = table(
            &["Timestamp", "Email", "Song B", "Song C", "Song A"],
            &[&["t1", "a@x", "9.5", "8", "9.5"], &["t2", "b@x", "9.5", "8", "9.5"]],
        );
        let agg = aggregate(Some(&t), &ScoreBounds::default());
        let view: Vec<(&str, u32)> = agg.scores.iter().map(|s| (s.song.as_str(), s.rank)).collect();
        assert_eq!(view, vec![("Song A", 1), ("Song B", 1), ("Song C", 3)]);
    }

    #[test]
    fn test_invalid_cells_become_missing() {
        let t = table(
            &["Timestamp", "Email", "Song A", "Song B"],
            &[&["t1", "a@x", "8", "7"], &["t2", "b@x", "invalid", "6"]],
        );
        let agg = aggregate(Some(&t), &ScoreBounds::default());
        let a = agg.scores.iter().find(|s| s.song == "Song A").unwrap();
        assert_eq!(a.average_score, 8.0);
        let matrix = agg.matrix.unwrap();
        assert_eq!(matrix.voters[1].ratings[0], None);
    }

    #[test]
    fn test_song_without_values_dropped() {
        let t = table(
            &["Timestamp", "Email", "Song A", "Song B"],
            &[&["t1", "a@x", "8", ""], &["t2", "b@x", "6", "x"]],
        );
        let agg = aggregate(Some(&t), &ScoreBounds::default());
        assert_eq!(agg.scores.len(), 1);
        assert_eq!(agg.scores[0].song, "Song A");
    }

    #[test]
    fn test_zero_only_song_excluded_with_default_bounds() {
        let t = table(
            &["Timestamp", "Email", "Song A", "Song B"],
            &[&["t1", "a@x", "5", "0"]],
        );
        let agg = aggregate(Some(&t), &ScoreBounds::default());
        assert_eq!(agg.scores.len(), 1);
        assert_eq!(agg.scores[0].song, "Song A");
    }

    #[test]
    fn test_zero_threshold_is_strictly_positive() {
        // With zero admitted as a score, an all-zero song averages exactly 0
        // and must still be excluded (threshold is > 0, not >= 0)
        let bounds = ScoreBounds { min: 0.0, max: 10.0 };
        let t = table(
            &["Timestamp", "Email", "Song A", "Song B", "Song C"],
            &[&["t1", "a@x", "5", "0", "0"], &["t2", "b@x", "5", "0", "1"]],
        );
        let agg = aggregate(Some(&t), &bounds);
        let songs: Vec<&str> = agg.scores.iter().map(|s| s.song.as_str()).collect();
        assert_eq!(songs, vec!["Song A", "Song C"]);
        // Zero participates in the mean under these bounds
        assert_eq!(agg.scores[1].average_score, 0.5);
    }

    #[test]
    fn test_degenerate_inputs() {
        let bounds = ScoreBounds::default();
        assert_eq!(aggregate(None, &bounds), Aggregation::default());
        assert_eq!(aggregate(Some(&SheetTable::default()), &bounds), Aggregation::default());

        let narrow = table(&["Timestamp", "Email"], &[&["t1", "a@x"]]);
        let agg = aggregate(Some(&narrow), &bounds);
        assert!(agg.matrix.is_none());
        assert!(agg.scores.is_empty());

        let header_only = table(&["Timestamp", "Email", "Song A"], &[]);
        assert!(aggregate(Some(&header_only), &bounds).scores.is_empty());
    }

    #[test]
    fn test_stats() {
        let t = table(
            &["Timestamp", "Email", "Song A", "Song B"],
            &[&["t1", "a@x", "8", "6"], &["t2", "b@x", "", "6"], &["t3", "c@x", "", ""]],
        );
        let agg = aggregate(Some(&t), &ScoreBounds::default());
        let stats = ScoreStats::from_aggregation(&agg);
        assert_eq!(stats.total_votes, 3);
        assert_eq!(stats.total_songs, 2);
        assert_eq!(stats.average_of_averages, 7.0);

        assert_eq!(ScoreStats::from_aggregation(&Aggregation::default()), ScoreStats::default());
    }

    #[test]
    fn test_voter_record_mean() {
        let v = VoterRecord {
            identity: vec![],
            ratings: vec![Some(4.0), None, Some(8.0)],
        };
        assert_eq!(v.mean_rating(), Some(6.0));
        assert_eq!(v.rated_count(), 2);
        let empty = VoterRecord { identity: vec![], ratings: vec![None] };
        assert_eq!(empty.mean_rating(), None);
    }
}
