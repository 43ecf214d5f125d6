//! Cached dashboard pipeline
//!
//! Fetching a sheet and aggregating it is the expensive part, so the
//! `(identifier, year)` snapshot is cached. Assembly, projection and
//! narratives run per request on top of the cached snapshot.

use songpoll_common::cache::{CacheKey, CacheStats, SharedCache};
use songpoll_common::comparison::{local_part, ComparisonOptions};
use songpoll_common::config::SongpollConfig;
use songpoll_common::dashboard::{assemble, DashboardBundle, DashboardRequest, Snapshot};
use songpoll_common::projection::{Capabilities, TasteProjector};
use songpoll_common::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::llm::InsightService;
use crate::source::PartitionSource;

pub struct DashboardService {
    source: PartitionSource,
    cache: SharedCache<CacheKey, Arc<Snapshot>>,
    options: ComparisonOptions,
    projector: TasteProjector,
    insights: InsightService,
    default_year: u16,
}

impl DashboardService {
    pub fn new(
        source: PartitionSource,
        options: ComparisonOptions,
        insights: InsightService,
        ttl: Duration,
        max_size: usize,
        default_year: u16,
    ) -> Self {
        let projector = TasteProjector::new(Capabilities::detect(), options.identity_column.clone());
        Self {
            source,
            cache: SharedCache::new(ttl, max_size),
            options,
            projector,
            insights,
            default_year,
        }
    }

    pub fn from_config(config: &SongpollConfig, source: PartitionSource, insights: InsightService) -> Self {
        Self::new(
            source,
            config.comparison_options(),
            insights,
            config.cache_ttl(),
            config.cache.max_size,
            config.default_year,
        )
    }

    pub fn with_projector(mut self, projector: TasteProjector) -> Self {
        self.projector = projector;
        self
    }

    pub fn default_year(&self) -> u16 {
        self.default_year
    }

    pub fn years(&self) -> Vec<u16> {
        self.source.years()
    }

    pub fn projection_available(&self) -> bool {
        self.projector.capabilities().taste_projection
    }

    /// Cached aggregate and comparison for a request
    ///
    /// Entries are keyed by the identifier's local part, so `alice` and
    /// `alice@x.com` share one snapshot.
    pub async fn snapshot(&self, request: &DashboardRequest) -> Result<Arc<Snapshot>> {
        let key = CacheKey::new(&cache_identifier(request.voter()), request.year);
        let voter = request.voter().map(str::to_string);

        self.cache
            .get_or_try_insert_with(key, || async move {
                debug!(year = request.year, "Dashboard cache miss");
                let table = self.source.fetch(request.year).await?;
                Ok(Arc::new(Snapshot::compute(Some(&table), voter.as_deref(), &self.options)))
            })
            .await
    }

    /// Full dashboard; `with_insights` adds the generated narratives
    ///
    /// A sheet that cannot be fetched yields the error bundle rather than an
    /// error, so callers always have something to render.
    pub async fn dashboard(&self, request: &DashboardRequest, with_insights: bool) -> DashboardBundle {
        let snapshot = match self.snapshot(request).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(year = request.year, error = %e, "Dashboard data unavailable");
                return DashboardBundle::unavailable(request, &error_text(&e));
            }
        };

        let mut bundle = assemble(&snapshot, request, &self.options, &self.projector);

        if with_insights && self.insights.is_enabled() {
            bundle.blurb = self.insights.blurb(&snapshot.aggregation.scores).await;
            if let Some(rows) = snapshot.comparison_rows() {
                bundle.insight = self.insights.analysis(rows).await;
                bundle.recommendations = self.insights.recommendations(rows).await;
            }
        }
        bundle
    }

    /// Invalidate cached snapshots
    ///
    /// With neither argument everything goes. Otherwise one entry is dropped:
    /// a missing identifier means the community view, a missing year the
    /// default year.
    pub async fn invalidate(&self, identifier: Option<&str>, year: Option<u16>) -> usize {
        match (identifier, year) {
            (None, None) => {
                let removed = self.cache.invalidate(None).await;
                info!(removed, "Dashboard cache cleared");
                removed
            }
            (identifier, year) => {
                let key = CacheKey::new(&cache_identifier(identifier), year.unwrap_or(self.default_year));
                self.cache.invalidate(Some(&key)).await
            }
        }
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }
}

/// Voter part of a cache key
///
/// Identifiers without a local part keep their raw text so they never share
/// the community entry.
fn cache_identifier(identifier: Option<&str>) -> String {
    let raw = identifier.unwrap_or_default();
    match local_part(raw) {
        local if local.is_empty() => raw.trim().to_string(),
        local => local,
    }
}

/// Message without the error-kind prefix
fn error_text(error: &songpoll_common::Error) -> String {
    use songpoll_common::Error;
    match error {
        Error::InvalidInput(msg) | Error::NotFound(msg) | Error::Parse(msg) | Error::Internal(msg) => msg.clone(),
        other => other.to_string(),
    }
}
