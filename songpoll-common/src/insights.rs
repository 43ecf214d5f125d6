//! Insight and recommendation formatting
//!
//! Turns a comparison table into prompts for an external text generator and
//! turns the generator's answers back into structured values. Nothing here
//! talks to the network; `songpoll-ui` owns the client.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::comparison::ComparisonRow;

/// Outermost `[...]` span, across newlines
static JSON_ARRAY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\[.*\]").expect("valid regex"));

/// Song name of the recommendation returned when the answer cannot be parsed
pub const FALLBACK_RECOMMENDATION: &str = "Unable to analyze taste";

/// Tunables for narrative generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightSettings {
    /// Differences beyond ± this count as "higher" / "lower" than the crowd
    pub significant_difference: f64,
    pub top_disagreements: usize,
    pub top_songs: usize,
    pub recommendation_count: usize,
    pub analysis_min_words: usize,
    pub analysis_max_words: usize,
}

impl Default for InsightSettings {
    fn default() -> Self {
        Self {
            significant_difference: 1.0,
            top_disagreements: 3,
            top_songs: 3,
            recommendation_count: 5,
            analysis_min_words: 250,
            analysis_max_words: 300,
        }
    }
}

/// Which configured model a request should go to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    /// Short copy
    Blurb,
    /// Long-form voting analysis
    Analysis,
    /// Structured JSON output
    Json,
}

/// One text-generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub role: ModelRole,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disagreement {
    pub song: String,
    pub your_score: f64,
    pub average_score: f64,
    pub difference: f64,
}

/// Everything the voting analysis prompt needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingSummary {
    /// Largest |difference| first
    pub disagreements: Vec<Disagreement>,
    pub biggest_over: Option<Disagreement>,
    pub biggest_under: Option<Disagreement>,
    pub user_top: Vec<String>,
    pub community_top: Vec<String>,
    pub higher_count: usize,
    pub lower_count: usize,
    pub mean_difference: f64,
}

impl VotingSummary {
    /// Summarize a comparison; rows without a community average are ignored
    pub fn from_comparison(rows: &[ComparisonRow], settings: &InsightSettings) -> Option<Self> {
        let rated: Vec<Disagreement> = rows
            .iter()
            .filter_map(|r| {
                Some(Disagreement {
                    song: r.song.clone(),
                    your_score: r.your_score,
                    average_score: r.average_score?,
                    difference: r.difference?,
                })
            })
            .collect();
        if rated.is_empty() {
            return None;
        }

        let mut by_gap = rated.clone();
        by_gap.sort_by(|a, b| b.difference.abs().total_cmp(&a.difference.abs()));
        by_gap.truncate(settings.top_disagreements);

        let mut by_yours = rated.clone();
        by_yours.sort_by(|a, b| b.your_score.total_cmp(&a.your_score));
        let mut by_crowd = rated.clone();
        by_crowd.sort_by(|a, b| b.average_score.total_cmp(&a.average_score));

        let threshold = settings.significant_difference;
        let total: f64 = rated.iter().map(|d| d.difference).sum();

        Some(Self {
            biggest_over: by_gap.iter().find(|d| d.difference > 0.0).cloned(),
            biggest_under: by_gap.iter().find(|d| d.difference < 0.0).cloned(),
            user_top: by_yours.iter().take(settings.top_songs).map(|d| d.song.clone()).collect(),
            community_top: by_crowd.iter().take(settings.top_songs).map(|d| d.song.clone()).collect(),
            higher_count: rated.iter().filter(|d| d.difference > threshold).count(),
            lower_count: rated.iter().filter(|d| d.difference < -threshold).count(),
            mean_difference: total / rated.len() as f64,
            disagreements: by_gap,
        })
    }
}

pub fn voting_analysis_prompt(summary: &VotingSummary, settings: &InsightSettings) -> String {
    let over = summary
        .biggest_over
        .as_ref()
        .map(|d| {
            format!(
                "You're absolutely swooning over '{}' with a {:.1} (while everyone else gave it a modest {:.1})",
                d.song, d.your_score, d.average_score
            )
        })
        .unwrap_or_default();
    let under = summary
        .biggest_under
        .as_ref()
        .map(|d| {
            format!(
                "and giving '{}' a {:.1} (compared to the crowd's love at {:.1})",
                d.song, d.your_score, d.average_score
            )
        })
        .unwrap_or_default();

    let mut prompt = format!(
        r#"Write a friendly, conversational analysis that directly addresses the voter (use 'you' and 'your'). Keep it grounded and observational about preferences and results. Aim for {min}–{max} words.

Tone constraints (important):
- No hype or hero language. Avoid praise like "brave", "bold", "fearless", "iconic", or marathon-style metaphors.
- Do not judge the taste; treat it as preference, not achievement.
- Light, good-natured teasing is fine, but keep it respectful and specific.
- Focus on what the votes show: over/under compared to the group, patterns, and concrete examples.

Formatting constraints:
- Do not use emojis or emoticons.
- Do not include headings or markdown titles; write plain paragraphs only.

Key points to hit with some gentle snark:
- {over}
- {under}
- Your top picks ({user_top}) vs what everyone else is raving about ({community_top})
- You rated {higher} songs higher and {lower} songs lower than the crowd

Significant disagreements to mention:"#,
        min = settings.analysis_min_words,
        max = settings.analysis_max_words,
        over = over,
        under = under,
        user_top = summary.user_top.join(", "),
        community_top = summary.community_top.join(", "),
        higher = summary.higher_count,
        lower = summary.lower_count,
    );

    for d in &summary.disagreements {
        let direction = if d.difference > 0.0 { "higher" } else { "lower" };
        prompt.push_str(&format!(
            "\n- Rated '{}' {:.1} points {} than the crowd (your {:.1} vs their {:.1})",
            d.song,
            d.difference.abs(),
            direction,
            d.your_score,
            d.average_score
        ));
    }
    prompt
}

pub fn recommendations_prompt(top: &[String], bottom: &[String], n: usize) -> String {
    let list = |songs: &[String]| {
        songs
            .iter()
            .map(|s| format!("- {}", s))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        r#"Based on someone's music taste, suggest {n} artists or music genres they should explore.

Their favorite songs:
{top}

Their least favorite songs:
{bottom}

Analyze the qualities in their top picks (mood, energy, production style, themes) and suggest artists or genres that match those qualities.

Respond ONLY with a valid JSON array. Each object must have exactly these fields:
- "song": the artist name OR genre/style
- "artist": leave this as an empty string ""
- "reason": a brief (25-35 words) explanation connecting specific qualities from their favorites to this recommendation

Important:
- Focus on real artists or established genres
- Avoid suggesting anything similar to their least favorite songs
- Return valid JSON only, no additional text or markdown code blocks"#,
        n = n,
        top = list(top),
        bottom = list(bottom),
    )
}

pub fn song_blurb_prompt(song: &str, average_score: f64) -> String {
    format!(
        r#"Write a short, witty blurb (2-3 sentences) about this year's music chart.

The favourite song was '{song}' with an average rating of {avg:.2}.

Then add one more sentence about that musical taste playfully.

Keep it light, fun, and under 50 words total."#,
        song = song,
        avg = average_score,
    )
}

/// Ask the generator to finish a response that stopped mid-sentence
pub fn continuation_prompt(previous: &str) -> String {
    format!(
        "Continue and finish the above analysis cleanly in the same tone. \
         Do not repeat prior lines; add 2-3 concluding sentences.\n\nPrevious text:\n{}\n",
        previous
    )
}

impl GenerationRequest {
    pub fn analysis(summary: &VotingSummary, settings: &InsightSettings) -> Self {
        Self {
            role: ModelRole::Analysis,
            prompt: voting_analysis_prompt(summary, settings),
            temperature: 0.5,
            max_tokens: 900,
        }
    }

    pub fn continuation(previous: &str) -> Self {
        Self {
            role: ModelRole::Analysis,
            prompt: continuation_prompt(previous),
            temperature: 0.5,
            max_tokens: 240,
        }
    }

    pub fn recommendations(top: &[String], bottom: &[String], n: usize) -> Self {
        Self {
            role: ModelRole::Json,
            prompt: recommendations_prompt(top, bottom, n),
            temperature: 0.2,
            max_tokens: 800,
        }
    }

    pub fn blurb(song: &str, average_score: f64) -> Self {
        Self {
            role: ModelRole::Blurb,
            prompt: song_blurb_prompt(song, average_score),
            temperature: 0.7,
            max_tokens: 500,
        }
    }
}

/// Text ends with sentence punctuation
pub fn is_complete(text: &str) -> bool {
    matches!(text.trim_end().chars().last(), Some('.' | '!' | '?' | '…'))
}

/// Join an incomplete response with its continuation
pub fn join_continuation(first: &str, tail: &str) -> String {
    format!("{} {}", first.trim(), tail.trim()).trim().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub song: String,
    pub artist: String,
    pub reason: String,
}

impl Recommendation {
    pub fn fallback() -> Self {
        Self {
            song: FALLBACK_RECOMMENDATION.to_string(),
            artist: String::new(),
            reason: "Could not parse AI response. Please try refreshing.".to_string(),
        }
    }
}

/// Parse the generator's JSON array of recommendations
///
/// Only the first `n` array items are considered; items missing one of
/// `song`, `artist`, `reason` are skipped. Anything that is not a JSON array
/// yields the single fallback entry.
pub fn parse_recommendations(response: &str, n: usize) -> Vec<Recommendation> {
    let Some(span) = JSON_ARRAY.find(response) else {
        debug!("No JSON array in recommendation response");
        return vec![Recommendation::fallback()];
    };

    match serde_json::from_str::<Value>(span.as_str()) {
        Ok(Value::Array(items)) => items
            .iter()
            .take(n)
            .filter_map(|item| {
                Some(Recommendation {
                    song: field(item, "song")?,
                    artist: field(item, "artist")?,
                    reason: field(item, "reason")?,
                })
            })
            .collect(),
        Ok(_) | Err(_) => {
            debug!("Recommendation response is not a JSON array");
            vec![Recommendation::fallback()]
        }
    }
}

fn field(item: &Value, key: &str) -> Option<String> {
    match item.get(key)? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// The voter's `n` highest and `n` lowest rated songs
pub fn top_and_bottom(rows: &[ComparisonRow], n: usize) -> (Vec<String>, Vec<String>) {
    let mut sorted: Vec<&ComparisonRow> = rows.iter().collect();
    sorted.sort_by(|a, b| b.your_score.total_cmp(&a.your_score));
    let top = sorted.iter().take(n).map(|r| r.song.clone()).collect();

    sorted.sort_by(|a, b| a.your_score.total_cmp(&b.your_score));
    let bottom = sorted.iter().take(n).map(|r| r.song.clone()).collect();
    (top, bottom)
}
