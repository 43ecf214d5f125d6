//! # Songpoll Common Library
//!
//! Shared code for the songpoll survey dashboard including:
//! - Sheet tables and legacy layout transposition
//! - Score aggregation with competition ranking
//! - Per-voter comparison against the community
//! - Taste projection (classical MDS over standardized ratings)
//! - TTL/FIFO cache for per-request pipelines
//! - Chart-ready series, insight prompts and dashboard assembly
//! - Configuration loading

pub mod cache;
pub mod charts;
pub mod comparison;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod insights;
pub mod projection;
pub mod scoring;
pub mod sheet;

pub use error::{Error, Result};
pub use scoring::{aggregate, AggregateScore, Aggregation, RatingMatrix, ScoreBounds};
pub use sheet::{SheetLayout, SheetTable};
