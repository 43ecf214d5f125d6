//! Survey sheet sources
//!
//! Sheets are consumed as CSV exports, either a local file or a published
//! export URL. `PartitionSource` maps survey years to sources and brings
//! legacy layouts into canonical shape before anything downstream sees them.

use async_trait::async_trait;
use songpoll_common::config::{PartitionConfig, SongpollConfig};
use songpoll_common::sheet::{normalize, SheetLayout, SheetTable};
use songpoll_common::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Request timeout for published sheet exports
pub const SHEET_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Anything that can produce the raw values of one worksheet
#[async_trait]
pub trait SheetSource: Send + Sync {
    async fn fetch(&self) -> Result<SheetTable>;

    /// Human-readable origin for logs
    fn describe(&self) -> String;
}

/// Parse CSV bytes into a table, first record being the header row
///
/// Records may have different lengths; `SheetTable` pads or truncates them.
pub fn parse_csv(bytes: &[u8]) -> Result<SheetTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::Fields)
        .from_reader(bytes);

    let mut values = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| Error::Parse(format!("Invalid CSV: {}", e)))?;
        values.push(record.iter().map(str::to_string).collect());
    }
    Ok(SheetTable::from_values(values))
}

/// CSV file on disk
pub struct CsvFileSource {
    path: PathBuf,
}

impl CsvFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SheetSource for CsvFileSource {
    async fn fetch(&self) -> Result<SheetTable> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            Error::NotFound(format!("Cannot read sheet {}: {}", self.path.display(), e))
        })?;
        parse_csv(&bytes)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Published CSV export fetched over HTTP
pub struct HttpCsvSource {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpCsvSource {
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl SheetSource for HttpCsvSource {
    async fn fetch(&self) -> Result<SheetTable> {
        debug!(url = %self.url, "Fetching published sheet");

        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Internal(format!("Timed out fetching {}", self.url))
                } else {
                    Error::Internal(format!("Failed to fetch {}: {}", self.url, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Internal(format!(
                "Sheet export {} returned HTTP {}",
                self.url,
                status.as_u16()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Internal(format!("Failed to read {}: {}", self.url, e)))?;
        parse_csv(&bytes)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

struct Partition {
    year: u16,
    layout: SheetLayout,
    source: Arc<dyn SheetSource>,
}

/// Survey years and their sheets, in presentation order
pub struct PartitionSource {
    partitions: Vec<Partition>,
    identity_column: String,
}

impl PartitionSource {
    pub fn new(identity_column: impl Into<String>) -> Self {
        Self {
            partitions: Vec::new(),
            identity_column: identity_column.into(),
        }
    }

    /// Register a year; a later registration of the same year replaces the earlier one
    pub fn with_partition(mut self, year: u16, layout: SheetLayout, source: Arc<dyn SheetSource>) -> Self {
        self.partitions.retain(|p| p.year != year);
        self.partitions.push(Partition { year, layout, source });
        self
    }

    /// File and URL sources for every configured partition
    pub fn from_config(config: &SongpollConfig, client: reqwest::Client) -> Self {
        config
            .partitions
            .iter()
            .fold(Self::new(&config.scoring.identity_column), |acc, p| {
                acc.with_partition(p.year, p.layout, source_for(p, client.clone()))
            })
    }

    pub fn years(&self) -> Vec<u16> {
        self.partitions.iter().map(|p| p.year).collect()
    }

    /// Fetch a year's sheet in canonical layout
    pub async fn fetch(&self, year: u16) -> Result<SheetTable> {
        let partition = self
            .partitions
            .iter()
            .find(|p| p.year == year)
            .ok_or_else(|| Error::InvalidInput(self.unsupported_message(year)))?;

        let table = partition.source.fetch().await?;
        info!(
            year,
            source = %partition.source.describe(),
            rows = table.rows.len(),
            "Fetched sheet"
        );
        Ok(normalize(partition.layout, table, &self.identity_column))
    }

    fn unsupported_message(&self, year: u16) -> String {
        let years: Vec<String> = self.years().iter().map(u16::to_string).collect();
        format!("Year {} not supported. Choose from: {}", year, years.join(", "))
    }
}

fn source_for(partition: &PartitionConfig, client: reqwest::Client) -> Arc<dyn SheetSource> {
    if partition.is_remote() {
        Arc::new(HttpCsvSource::new(client, partition.source.clone(), SHEET_FETCH_TIMEOUT))
    } else {
        Arc::new(CsvFileSource::new(&partition.source))
    }
}
