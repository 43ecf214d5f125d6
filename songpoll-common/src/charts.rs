//! Chart-ready series
//!
//! Every function here is pure: given the same aggregate, matrix and
//! comparison it returns the same series, and empty input yields an empty
//! series. Rendering is left to whatever front end consumes the JSON.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::str::FromStr;

use crate::comparison::{local_part, ComparisonRow};
use crate::error::Error;
use crate::scoring::{mean, AggregateScore, Aggregation, RatingMatrix};

/// Maximum entries in top-N style charts
pub const TOP_N: usize = 10;
/// Bins of the average-score histogram
pub const SCORE_BINS: usize = 20;
/// Bins of the individual-vote histogram
pub const VOTE_BINS: usize = 10;
/// Value range of the individual-vote histogram
pub const VOTE_RANGE: (f64, f64) = (0.0, 11.0);
/// Mean difference beyond which a voter counts as generous or harsh
pub const RATER_THRESHOLD: f64 = 0.5;

const MEDALS: [&str; 3] = ["🥇", "🥈", "🥉"];

/// Medal for ranks 1 to 3
pub fn medal(rank: u32) -> Option<&'static str> {
    match rank {
        1..=3 => Some(MEDALS[rank as usize - 1]),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodiumEntry {
    pub rank: u32,
    pub medal: String,
    pub song: String,
    pub average_score: f64,
}

/// Ranks 1 to 3 including ties, in visual order 2nd, 1st, 3rd
pub fn podium(scores: &[AggregateScore]) -> Vec<PodiumEntry> {
    let mut out = Vec::new();
    for rank in [2, 1, 3] {
        let mut tier: Vec<&AggregateScore> = scores.iter().filter(|s| s.rank == rank).collect();
        tier.sort_by(|a, b| {
            b.average_score
                .total_cmp(&a.average_score)
                .then_with(|| a.song.cmp(&b.song))
        });
        out.extend(tier.into_iter().map(|s| PodiumEntry {
            rank,
            medal: medal(rank).unwrap_or_default().to_string(),
            song: s.song.clone(),
            average_score: s.average_score,
        }));
    }
    out
}

/// First ten songs in display order
pub fn top_ten(scores: &[AggregateScore]) -> Vec<AggregateScore> {
    scores.iter().take(TOP_N).cloned().collect()
}

/// Which scores the full ranking chart shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingView {
    /// Community averages with the voter's own scores overlaid
    #[default]
    Overlay,
    /// Community averages only
    Average,
    /// The voter's own scores only
    User,
}

impl FromStr for RankingView {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overlay" | "" => Ok(Self::Overlay),
            "average" | "community" => Ok(Self::Average),
            "user" | "mine" => Ok(Self::User),
            other => Err(Error::InvalidInput(format!("unknown ranking view `{}`", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingBar {
    pub song: String,
    pub rank: Option<u32>,
    pub average_score: Option<f64>,
    pub your_score: Option<f64>,
}

/// Full ranking, ascending so the best bar ends up on top of a horizontal chart
pub fn ranking(
    scores: &[AggregateScore],
    comparison: Option<&[ComparisonRow]>,
    view: RankingView,
) -> Vec<RankingBar> {
    match view {
        RankingView::Overlay | RankingView::Average => {
            let overlay = match view {
                RankingView::Overlay => comparison,
                _ => None,
            };
            let mut bars: Vec<RankingBar> = scores
                .iter()
                .map(|s| RankingBar {
                    song: s.song.clone(),
                    rank: Some(s.rank),
                    average_score: Some(s.average_score),
                    your_score: overlay
                        .and_then(|rows| rows.iter().find(|r| r.song == s.song))
                        .map(|r| r.your_score),
                })
                .collect();
            bars.sort_by(|a, b| {
                cmp_opt(a.average_score, b.average_score).then_with(|| a.song.cmp(&b.song))
            });
            bars
        }
        RankingView::User => {
            let mut bars: Vec<RankingBar> = comparison
                .unwrap_or_default()
                .iter()
                .map(|r| RankingBar {
                    song: r.song.clone(),
                    rank: scores.iter().find(|s| s.song == r.song).map(|s| s.rank),
                    average_score: r.average_score,
                    your_score: Some(r.your_score),
                })
                .collect();
            bars.sort_by(|a, b| {
                cmp_opt(a.your_score, b.your_score).then_with(|| a.song.cmp(&b.song))
            });
            bars
        }
    }
}

fn cmp_opt(a: Option<f64>, b: Option<f64>) -> Ordering {
    a.unwrap_or(f64::NEG_INFINITY)
        .total_cmp(&b.unwrap_or(f64::NEG_INFINITY))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub lo: f64,
    pub hi: f64,
    pub count: usize,
}

/// Equal-width bins over `[lo, hi]`; values outside the range are ignored
pub fn histogram(values: &[f64], bins: usize, lo: f64, hi: f64) -> Vec<HistogramBin> {
    if bins == 0 || !(hi > lo) {
        return Vec::new();
    }
    let width = (hi - lo) / bins as f64;
    let mut out: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            lo: lo + width * i as f64,
            hi: lo + width * (i + 1) as f64,
            count: 0,
        })
        .collect();

    for &v in values.iter().filter(|v| v.is_finite() && **v >= lo && **v <= hi) {
        let idx = (((v - lo) / width) as usize).min(bins - 1);
        out[idx].count += 1;
    }
    out
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Distribution {
    pub bins: Vec<HistogramBin>,
    pub mean: Option<f64>,
}

/// Histogram of song averages
pub fn score_distribution(scores: &[AggregateScore]) -> Distribution {
    let values: Vec<f64> = scores.iter().map(|s| s.average_score).collect();
    let (lo, hi) = match (
        values.iter().copied().reduce(f64::min),
        values.iter().copied().reduce(f64::max),
    ) {
        (Some(lo), Some(hi)) if hi > lo => (lo, hi),
        (Some(v), Some(_)) => (v - 0.5, v + 0.5),
        _ => return Distribution::default(),
    };
    Distribution {
        bins: histogram(&values, SCORE_BINS, lo, hi),
        mean: mean(values.iter().copied()),
    }
}

/// Histogram of every individual vote
pub fn vote_distribution(matrix: &RatingMatrix) -> Distribution {
    let values: Vec<f64> = matrix.all_ratings().collect();
    if values.is_empty() {
        return Distribution::default();
    }
    Distribution {
        bins: histogram(&values, VOTE_BINS, VOTE_RANGE.0, VOTE_RANGE.1),
        mean: mean(values.iter().copied()),
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Heatmap {
    pub songs: Vec<String>,
    pub voters: Vec<String>,
    /// One row per voter, one cell per song
    pub values: Vec<Vec<Option<f64>>>,
}

/// Voter × song grid; voters anonymized except the highlighted one
pub fn heatmap(matrix: &RatingMatrix, highlight: Option<&str>, identity_column: &str) -> Heatmap {
    let columns: Vec<usize> = (0..matrix.song_count())
        .filter(|&i| matrix.song_ratings(i).any(|r| r > 0.0))
        .collect();
    if columns.is_empty() {
        return Heatmap::default();
    }

    let wanted = highlight.map(local_part).filter(|h| !h.is_empty());
    let identity = matrix.identity_index(identity_column);

    let voters = matrix
        .voters
        .iter()
        .enumerate()
        .map(|(row, voter)| {
            let name = identity.map(|c| local_part(&voter.identity[c]));
            match (name, &wanted) {
                (Some(name), Some(wanted)) if &name == wanted => name,
                _ => format!("Voter {}", row + 1),
            }
        })
        .collect();

    Heatmap {
        songs: columns.iter().map(|&i| matrix.songs[i].clone()).collect(),
        voters,
        values: matrix
            .voters
            .iter()
            .map(|v| columns.iter().map(|&i| v.ratings[i]).collect())
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongSpread {
    pub song: String,
    pub std_dev: f64,
    pub average_score: f64,
}

/// Sample standard deviation (n − 1) of each ranked song's ratings
///
/// Songs with fewer than two ratings have no spread and are skipped.
pub fn song_spread(matrix: &RatingMatrix, scores: &[AggregateScore]) -> Vec<SongSpread> {
    scores
        .iter()
        .filter_map(|s| {
            let idx = matrix.song_index(&s.song)?;
            let values: Vec<f64> = matrix.song_ratings(idx).collect();
            if values.len() < 2 {
                return None;
            }
            let m = mean(values.iter().copied())?;
            let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
            Some(SongSpread {
                song: s.song.clone(),
                std_dev: var.sqrt(),
                average_score: s.average_score,
            })
        })
        .collect()
}

/// Ten songs with the highest spread, highest first
pub fn most_polarizing(spread: &[SongSpread]) -> Vec<SongSpread> {
    let mut sorted = spread.to_vec();
    sorted.sort_by(|a, b| b.std_dev.total_cmp(&a.std_dev).then_with(|| a.song.cmp(&b.song)));
    sorted.truncate(TOP_N);
    sorted
}

/// Ten songs with the lowest spread, lowest first
pub fn most_agreeable(spread: &[SongSpread]) -> Vec<SongSpread> {
    let mut sorted = spread.to_vec();
    sorted.sort_by(|a, b| a.std_dev.total_cmp(&b.std_dev).then_with(|| a.song.cmp(&b.song)));
    sorted.truncate(TOP_N);
    sorted
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaterType {
    Generous,
    Harsh,
    Balanced,
}

impl RaterType {
    pub fn from_difference(diff: f64) -> Self {
        if diff > RATER_THRESHOLD {
            Self::Generous
        } else if diff < -RATER_THRESHOLD {
            Self::Harsh
        } else {
            Self::Balanced
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Generous => "Generous Rater",
            Self::Harsh => "Harsh Critic",
            Self::Balanced => "Balanced Rater",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternBucket {
    pub score: u8,
    pub user: f64,
    pub community: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingPattern {
    /// Share of votes per integer score 1..=10
    pub buckets: Vec<PatternBucket>,
    pub user_average: f64,
    pub community_average: f64,
    pub rater_type: RaterType,
}

/// The voter's vote distribution against everybody's
pub fn rating_pattern(comparison: &[ComparisonRow], matrix: &RatingMatrix) -> Option<RatingPattern> {
    let user: Vec<f64> = comparison.iter().map(|r| r.your_score).collect();
    let community: Vec<f64> = matrix.all_ratings().collect();
    let user_average = mean(user.iter().copied())?;
    let community_average = mean(community.iter().copied())?;

    let user_shares = bucket_shares(&user);
    let community_shares = bucket_shares(&community);
    let buckets = (1..=10u8)
        .map(|score| PatternBucket {
            score,
            user: user_shares[score as usize - 1],
            community: community_shares[score as usize - 1],
        })
        .collect();

    Some(RatingPattern {
        buckets,
        user_average,
        community_average,
        rater_type: RaterType::from_difference(user_average - community_average),
    })
}

fn bucket_shares(values: &[f64]) -> [f64; 10] {
    let mut counts = [0usize; 10];
    for v in values {
        let idx = (v.round().clamp(1.0, 10.0) as usize) - 1;
        counts[idx] += 1;
    }
    let total = values.len().max(1) as f64;
    counts.map(|c| c as f64 / total)
}

/// Largest overratings and underratings, most negative first
pub fn disagreements(comparison: &[ComparisonRow]) -> Vec<ComparisonRow> {
    let mut rows: Vec<&ComparisonRow> = comparison.iter().filter(|r| r.difference.is_some()).collect();
    rows.sort_by(|a, b| cmp_opt(b.difference, a.difference));

    let tail_start = rows.len().saturating_sub(TOP_N);
    let mut seen = HashSet::new();
    let mut picked: Vec<ComparisonRow> = rows
        .iter()
        .take(TOP_N)
        .chain(rows[tail_start..].iter())
        .filter(|r| seen.insert(r.song.clone()))
        .map(|r| (*r).clone())
        .collect();

    picked.sort_by(|a, b| cmp_opt(a.difference, b.difference));
    picked
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPick {
    pub song: String,
    pub your_score: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserVsCommunity {
    pub community_top: Vec<AggregateScore>,
    pub user_top: Vec<UserPick>,
    /// Songs in both top lists, alphabetical
    pub in_both: Vec<String>,
}

/// Community top ten against the voter's own top ten
pub fn user_vs_community(comparison: &[ComparisonRow], scores: &[AggregateScore]) -> UserVsCommunity {
    if comparison.is_empty() {
        return UserVsCommunity::default();
    }
    let community_top = top_ten(scores);

    let mut mine: Vec<&ComparisonRow> = comparison.iter().collect();
    mine.sort_by(|a, b| b.your_score.total_cmp(&a.your_score));
    let user_top: Vec<UserPick> = mine
        .into_iter()
        .take(TOP_N)
        .map(|r| UserPick {
            song: r.song.clone(),
            your_score: r.your_score,
        })
        .collect();

    let community: HashSet<&str> = community_top.iter().map(|s| s.song.as_str()).collect();
    let mut in_both: Vec<String> = user_top
        .iter()
        .filter(|p| community.contains(p.song.as_str()))
        .map(|p| p.song.clone())
        .collect();
    in_both.sort();

    UserVsCommunity {
        community_top,
        user_top,
        in_both,
    }
}

/// Every chart series of one dashboard
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChartBundle {
    pub podium: Vec<PodiumEntry>,
    pub top_ten: Vec<AggregateScore>,
    pub ranking: Vec<RankingBar>,
    pub score_distribution: Distribution,
    pub vote_distribution: Distribution,
    pub heatmap: Heatmap,
    pub most_polarizing: Vec<SongSpread>,
    pub most_agreeable: Vec<SongSpread>,
    /// Voter-specific series, present only with a successful comparison
    pub rating_pattern: Option<RatingPattern>,
    pub disagreements: Vec<ComparisonRow>,
    pub user_vs_community: Option<UserVsCommunity>,
}

impl ChartBundle {
    pub fn build(
        aggregation: &Aggregation,
        comparison: Option<&[ComparisonRow]>,
        view: RankingView,
        highlight: Option<&str>,
        identity_column: &str,
    ) -> Self {
        let scores = &aggregation.scores;
        let comparison = comparison.filter(|rows| !rows.is_empty());
        let mut bundle = Self {
            podium: podium(scores),
            top_ten: top_ten(scores),
            ranking: ranking(scores, comparison, view),
            score_distribution: score_distribution(scores),
            ..Self::default()
        };

        if let Some(matrix) = aggregation.matrix.as_ref() {
            let spread = song_spread(matrix, scores);
            bundle.vote_distribution = vote_distribution(matrix);
            bundle.heatmap = heatmap(matrix, highlight, identity_column);
            bundle.most_polarizing = most_polarizing(&spread);
            bundle.most_agreeable = most_agreeable(&spread);
            if let Some(rows) = comparison {
                bundle.rating_pattern = rating_pattern(rows, matrix);
            }
        }

        if let Some(rows) = comparison {
            bundle.disagreements = disagreements(rows);
            bundle.user_vs_community = Some(user_vs_community(rows, scores));
        }
        bundle
    }
}
