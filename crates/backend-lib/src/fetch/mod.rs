// ============================
// livecollab-backend-lib/src/fetch/mod.rs
// ============================
//! Upstream data fetcher seams.
//!
//! The two data sources are external collaborators with a simple
//! request/result contract; the room registry only ever talks to these
//! traits so tests can swap in stubs.

pub mod alpha_vantage;
pub mod fbref;

pub use alpha_vantage::AlphaVantageFetcher;
pub use fbref::FbrefFetcher;

use async_trait::async_trait;

use livecollab_common::{MatchResults, OhlcvPoint};

use crate::error::AppError;

/// Rate-limited, cached time-series source for stock rooms.
#[async_trait]
pub trait TimeSeries: Send + Sync {
    /// Fetch the weekly adjusted series for a symbol.
    async fn fetch(&self, symbol: &str) -> Result<Vec<OhlcvPoint>, AppError>;
}

/// The long-running scrape job producing football match results.
#[async_trait]
pub trait MatchSource: Send + Sync {
    /// Run the scrape and return results per team.
    async fn fetch(&self) -> Result<MatchResults, AppError>;
}
