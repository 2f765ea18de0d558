// ============================
// livecollab-backend-lib/src/fetch/alpha_vantage.rs
// ============================
//! Weekly adjusted time-series fetcher with a per-symbol cache.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use livecollab_common::OhlcvPoint;

use crate::config::Settings;
use crate::error::AppError;
use crate::fetch::TimeSeries;

const FUNCTION: &str = "TIME_SERIES_WEEKLY_ADJUSTED";

struct CachedSeries {
    fetched_at: Instant,
    points: Vec<OhlcvPoint>,
}

/// Alpha Vantage client. Fresh results (younger than the TTL) are served
/// from the cache so concurrent rooms tracking the same symbol do not burn
/// through the API rate limit.
pub struct AlphaVantageFetcher {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    ttl: Duration,
    cache: DashMap<String, CachedSeries>,
}

impl AlphaVantageFetcher {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: settings.alpha_vantage_url.clone(),
            api_key: settings.alpha_vantage_key.clone(),
            ttl: Duration::from_secs(settings.stock_cache_ttl_secs),
            cache: DashMap::new(),
        }
    }
}

#[async_trait]
impl TimeSeries for AlphaVantageFetcher {
    async fn fetch(&self, symbol: &str) -> Result<Vec<OhlcvPoint>, AppError> {
        if let Some(hit) = self.cache.get(symbol) {
            if hit.fetched_at.elapsed() < self.ttl {
                debug!(symbol, "serving cached series");
                return Ok(hit.points.clone());
            }
        }

        debug!(symbol, "fetching fresh series");
        let body: Value = self
            .http
            .get(&self.base_url)
            .query(&[
                ("function", FUNCTION),
                ("symbol", symbol),
                ("apikey", &self.api_key),
            ])
            .send()
            .await?
            .json()
            .await?;

        let points = parse_weekly(&body)?;
        self.cache.insert(
            symbol.to_string(),
            CachedSeries {
                fetched_at: Instant::now(),
                points: points.clone(),
            },
        );
        Ok(points)
    }
}

/// Parse an Alpha Vantage weekly-adjusted response body into points sorted
/// ascending by date. API error and rate-limit notes surface as upstream
/// errors; an absent series is an empty result.
pub(crate) fn parse_weekly(body: &Value) -> Result<Vec<OhlcvPoint>, AppError> {
    for note_key in ["Error Message", "Note"] {
        if let Some(note) = body.get(note_key).and_then(Value::as_str) {
            return Err(AppError::Upstream(note.to_string()));
        }
    }

    let Some(series) = body
        .get("Weekly Adjusted Time Series")
        .and_then(Value::as_object)
    else {
        return Ok(Vec::new());
    };

    let mut points = Vec::with_capacity(series.len());
    for (date, values) in series {
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| AppError::Upstream(format!("bad date {date}: {e}")))?;
        points.push(OhlcvPoint {
            date,
            open: num(values, "1. open")?,
            high: num(values, "2. high")?,
            low: num(values, "3. low")?,
            close: num(values, "4. close")?,
            adjusted_close: num(values, "5. adjusted close")?,
            volume: num(values, "6. volume")? as u64,
            dividend: num(values, "7. dividend amount")?,
        });
    }

    points.sort_by_key(|p| p.date);
    Ok(points)
}

fn num(values: &Value, key: &str) -> Result<f64, AppError> {
    values
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| AppError::Upstream(format!("malformed field {key}")))
}
