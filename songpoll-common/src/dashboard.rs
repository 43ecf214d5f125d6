//! Dashboard bundle assembly
//!
//! `Snapshot` is the cacheable part (aggregate and the voter's comparison).
//! `assemble` derives everything else from a snapshot. Each user-dependent
//! section carries its own error so one failure never blanks the dashboard.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::charts::{self, ChartBundle, RankingView};
use crate::comparison::{compare_with, ComparisonError, ComparisonOptions, ComparisonRow};
use crate::projection::{ProjectionError, TastePoint, TasteProjector};
use crate::insights::Recommendation;
use crate::scoring::{aggregate, AggregateScore, Aggregation, ScoreStats};
use crate::sheet::SheetTable;

/// One dashboard section: data plus the reason it is empty, if any
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Section<T> {
    pub data: T,
    pub error: Option<String>,
}

impl<T: Default> Section<T> {
    pub fn ok(data: T) -> Self {
        Self { data, error: None }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            data: T::default(),
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DashboardRequest {
    /// Voter identifier (email local part); `None` for the community-only view
    pub identifier: Option<String>,
    pub year: u16,
    pub view: RankingView,
}

impl DashboardRequest {
    /// Identifier with surrounding whitespace removed, `None` when blank
    pub fn voter(&self) -> Option<&str> {
        self.identifier
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Aggregate plus the requested voter's comparison
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub aggregation: Aggregation,
    /// `None` when no voter was requested
    pub comparison: Option<Result<Vec<ComparisonRow>, ComparisonError>>,
}

impl Snapshot {
    pub fn compute(table: Option<&SheetTable>, identifier: Option<&str>, options: &ComparisonOptions) -> Self {
        let aggregation = aggregate(table, &options.bounds);
        let comparison = identifier.map(|id| match aggregation.matrix.as_ref() {
            Some(matrix) => compare_with(id, matrix, &aggregation.scores, &options.identity_column),
            None => Err(ComparisonError::NoData),
        });
        Self {
            aggregation,
            comparison,
        }
    }

    /// Comparison rows when the lookup succeeded
    pub fn comparison_rows(&self) -> Option<&[ComparisonRow]> {
        match &self.comparison {
            Some(Ok(rows)) => Some(rows.as_slice()),
            _ => None,
        }
    }
}

/// Everything a front end needs to render one dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardBundle {
    pub year: u16,
    pub identifier: Option<String>,
    /// Markdown
    pub overview: String,
    pub stats: ScoreStats,
    pub rankings: Vec<AggregateScore>,
    pub comparison: Section<Vec<ComparisonRow>>,
    pub taste_map: Section<Vec<TastePoint>>,
    pub charts: ChartBundle,
    pub blurb: Option<String>,
    pub insight: Option<String>,
    pub recommendations: Vec<Recommendation>,
}

impl DashboardBundle {
    /// Bundle for a dataset that could not be loaded at all
    pub fn unavailable(request: &DashboardRequest, message: &str) -> Self {
        Self {
            year: request.year,
            identifier: request.voter().map(str::to_string),
            overview: format!("### ⚠️ Error Loading Data\n```\n{}\n```", message),
            stats: ScoreStats::default(),
            rankings: Vec::new(),
            comparison: Section::failed(message),
            taste_map: Section::failed(message),
            charts: ChartBundle::default(),
            blurb: None,
            insight: None,
            recommendations: Vec::new(),
        }
    }
}

/// Aggregate, compare and assemble in one go
pub fn build_dashboard(
    table: Option<&SheetTable>,
    request: &DashboardRequest,
    options: &ComparisonOptions,
    projector: &TasteProjector,
) -> DashboardBundle {
    let snapshot = Snapshot::compute(table, request.voter(), options);
    assemble(&snapshot, request, options, projector)
}

/// Assemble a bundle from an already computed snapshot
pub fn assemble(
    snapshot: &Snapshot,
    request: &DashboardRequest,
    options: &ComparisonOptions,
    projector: &TasteProjector,
) -> DashboardBundle {
    let aggregation = &snapshot.aggregation;
    let scores = &aggregation.scores;
    let stats = ScoreStats::from_aggregation(aggregation);
    let voter = request.voter();

    let comparison = match &snapshot.comparison {
        None => Section::ok(Vec::new()),
        Some(Ok(rows)) => Section::ok(rows.clone()),
        Some(Err(e)) => Section::failed(e.to_string()),
    };

    let taste_map = match projector.try_project(aggregation.matrix.as_ref(), voter) {
        Ok(points) => Section::ok(points),
        Err(ProjectionError::Unavailable) => {
            Section::failed("Taste map is not available in this build")
        }
        Err(e) => {
            debug!(error = %e, "Taste map left empty");
            Section::failed(e.to_string())
        }
    };

    DashboardBundle {
        year: request.year,
        identifier: voter.map(str::to_string),
        overview: overview(scores, &stats),
        stats,
        rankings: scores.clone(),
        comparison,
        taste_map,
        charts: ChartBundle::build(aggregation, snapshot.comparison_rows(), request.view, voter, &options.identity_column),
        blurb: None,
        insight: None,
        recommendations: Vec::new(),
    }
}

/// Overview markdown: winners, headline stats and the top three places
pub fn overview(scores: &[AggregateScore], stats: &ScoreStats) -> String {
    if scores.is_empty() {
        return "### 📊 No Data Yet\nClick refresh to load voting results.".to_string();
    }

    let place = |rank: u32| -> Vec<&AggregateScore> { scores.iter().filter(|s| s.rank == rank).collect() };

    let winners = place(1);
    let winner_line = match winners.first() {
        Some(first) => format!(
            "{} — **{:.2}**",
            winners.iter().map(|s| s.song.as_str()).collect::<Vec<_>>().join(" | "),
            first.average_score
        ),
        None => "—".to_string(),
    };

    let top3 = (1..=3)
        .map(|rank| {
            let medal = charts::medal(rank).unwrap_or_default();
            let entries = place(rank);
            if entries.is_empty() {
                format!("{} —", medal)
            } else {
                let items: Vec<String> = entries
                    .iter()
                    .map(|s| format!("{} ({:.2})", s.song, s.average_score))
                    .collect();
                format!("{} {}", medal, items.join(" • "))
            }
        })
        .collect::<Vec<_>>()
        .join("  •  ");

    format!(
        "### Winner\n{}\n\nStats: {} votes • {} songs • Average: {:.2}\n\n### Top 3\n{}\n",
        winner_line, stats.total_votes, stats.total_songs, stats.average_of_averages, top3
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::Capabilities;

    fn table() -> SheetTable {
        SheetTable::new(
            ["Timestamp", "Email address", "A", "B", "C"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            vec![
                vec!["t1".into(), "alice@x.com".into(), "8".into(), "9".into(), "".into()],
                vec!["t2".into(), "bob@x.com".into(), "7".into(), "".into(), "6".into()],
            ],
        )
    }

    fn request(identifier: Option<&str>) -> DashboardRequest {
        DashboardRequest {
            identifier: identifier.map(str::to_string),
            year: 2024,
            view: RankingView::Overlay,
        }
    }

    #[test]
    fn test_overview_lists_ties() {
        let scores = vec![
            AggregateScore { song: "A".into(), average_score: 9.5, rank: 1 },
            AggregateScore { song: "B".into(), average_score: 9.5, rank: 1 },
            AggregateScore { song: "C".into(), average_score: 8.0, rank: 3 },
        ];
        let stats = ScoreStats { total_votes: 4, total_songs: 3, average_of_averages: 9.0 };
        let text = overview(&scores, &stats);
        assert!(text.contains("A | B — **9.50**"));
        assert!(text.contains("Stats: 4 votes • 3 songs • Average: 9.00"));
        assert!(text.contains("🥇 A (9.50) • B (9.50)  •  🥈 —  •  🥉 C (8.00)"));
    }

    #[test]
    fn test_overview_no_data() {
        assert!(overview(&[], &ScoreStats::default()).contains("No Data Yet"));
    }

    #[test]
    fn test_bundle_with_voter() {
        let projector = TasteProjector::new(Capabilities::none(), "Email address");
        let bundle = build_dashboard(
            Some(&table()),
            &request(Some(" Alice ")),
            &ComparisonOptions::default(),
            &projector,
        );
        assert_eq!(bundle.identifier.as_deref(), Some("Alice"));
        assert_eq!(bundle.rankings.len(), 3);
        assert_eq!(bundle.comparison.data.len(), 2);
        assert!(bundle.comparison.error.is_none());
        // Projection unavailable, the rest still renders
        assert!(bundle.taste_map.data.is_empty());
        assert!(bundle.taste_map.error.is_some());
        assert_eq!(bundle.charts.disagreements.len(), 2);
        assert!(bundle.charts.rating_pattern.is_some());
    }

    #[test]
    fn test_unknown_voter_isolated() {
        let projector = TasteProjector::new(Capabilities::none(), "Email address");
        let bundle = build_dashboard(
            Some(&table()),
            &request(Some("nobody")),
            &ComparisonOptions::default(),
            &projector,
        );
        assert_eq!(bundle.comparison.error.as_deref(), Some("user not found for `nobody`"));
        assert!(bundle.comparison.data.is_empty());
        assert_eq!(bundle.rankings.len(), 3);
        assert!(bundle.overview.contains("### Winner"));
        assert!(bundle.charts.rating_pattern.is_none());
    }

    #[test]
    fn test_community_only() {
        let projector = TasteProjector::new(Capabilities::none(), "Email address");
        let bundle = build_dashboard(Some(&table()), &request(Some("  ")), &ComparisonOptions::default(), &projector);
        assert!(bundle.identifier.is_none());
        assert!(bundle.comparison.error.is_none());
        assert_eq!(bundle.charts.podium.len(), 3);
    }

    #[test]
    fn test_no_table() {
        let projector = TasteProjector::new(Capabilities::none(), "Email address");
        let bundle = build_dashboard(None, &request(Some("alice")), &ComparisonOptions::default(), &projector);
        assert_eq!(bundle.comparison.error.as_deref(), Some("no data available"));
        assert!(bundle.rankings.is_empty());
    }

    #[test]
    fn test_unavailable_bundle() {
        let bundle = DashboardBundle::unavailable(&request(None), "Year 1999 not supported");
        assert!(bundle.overview.contains("Error Loading Data"));
        assert!(bundle.overview.contains("Year 1999 not supported"));
        assert_eq!(bundle.comparison.error.as_deref(), Some("Year 1999 not supported"));
    }
}
