//! Market data sources feeding the ingestion agent
//!
//! `SyntheticMarketSource` produces deterministic monthly series from region
//! baselines. `HttpMarketDataSource` pulls the same shape from a market data service.

use crate::config::region_profile;
use crate::error::PipelineError;
use crate::models::{HistoricalDataPoint, Series};
use crate::Result;
use chrono::{Datelike, Months, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Trait for a raw time-series source
#[async_trait::async_trait]
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch(&self, series: Series, region: &str) -> Result<Vec<HistoricalDataPoint>>;
}

/// Deterministic random-walk source seeded per (series, region)
pub struct SyntheticMarketSource {
    anchor: NaiveDate,
    months: u32,
    seed: u64,
}

impl SyntheticMarketSource {
    pub fn new(anchor: NaiveDate, months: u32, seed: u64) -> Self {
        Self {
            anchor: first_of_month(anchor),
            months,
            seed,
        }
    }

    /// Two years of history ending this month
    pub fn current(seed: u64) -> Self {
        Self::new(Utc::now().date_naive(), 24, seed)
    }

    fn stream_seed(&self, series: Series, region: &str) -> u64 {
        // FNV-1a over the stream identity
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325 ^ self.seed;
        for byte in series.as_str().bytes().chain(region.bytes()) {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        hash
    }
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

#[async_trait::async_trait]
impl MarketDataSource for SyntheticMarketSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    async fn fetch(&self, series: Series, region: &str) -> Result<Vec<HistoricalDataPoint>> {
        let profile = region_profile(region).ok_or_else(|| {
            PipelineError::SourceUnavailable(format!("no synthetic profile for region {}", region))
        })?;

        let mut rng = StdRng::seed_from_u64(self.stream_seed(series, region));

        // (starting level, monthly drift, monthly noise as a fraction of level)
        let (mut level, drift, noise) = match series {
            Series::MortgageRate => (profile.base_rate + 0.6, -0.025, 0.01),
            Series::PropertyValue => (profile.median_home_value * 0.94, 0.003, 0.006),
            Series::Income => (profile.median_income * 0.97, 0.0015, 0.002),
            Series::MarketIndex => (profile.market_index, 0.005, 0.025),
        };

        let mut points = Vec::with_capacity(self.months as usize);
        for i in (0..self.months).rev() {
            let date = self
                .anchor
                .checked_sub_months(Months::new(i))
                .unwrap_or(self.anchor);

            let shock: f64 = rng.gen_range(-1.0..1.0) * noise;
            level = match series {
                Series::MortgageRate => (level + drift + shock * level).max(0.5),
                _ => level * (1.0 + drift + shock),
            };

            points.push(HistoricalDataPoint {
                series,
                region: profile.code.to_string(),
                date,
                value: level,
            });
        }

        debug!(series = %series, region, count = points.len(), "Synthetic series generated");
        Ok(points)
    }
}

/// HTTP-backed source: `GET {base}/series/{series}/{region}` returning data points
pub struct HttpMarketDataSource {
    client: Client,
    base_url: String,
}

impl HttpMarketDataSource {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl MarketDataSource for HttpMarketDataSource {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, series: Series, region: &str) -> Result<Vec<HistoricalDataPoint>> {
        let url = format!("{}/series/{}/{}", self.base_url, series.as_str(), region);

        let response = self.client.get(&url).send().await.map_err(|e| {
            PipelineError::SourceUnavailable(format!("Market data request failed for {}: {}", url, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::SourceUnavailable(format!(
                "Market data service returned {} for {}",
                status, url
            )));
        }

        let points = response
            .json::<Vec<HistoricalDataPoint>>()
            .await
            .map_err(|e| PipelineError::SourceUnavailable(format!("Invalid market data payload: {}", e)))?;

        Ok(points
            .into_iter()
            .filter(|p| p.series == series && p.value.is_finite())
            .map(|mut p| {
                p.region = region.to_string();
                p
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_synthetic_is_deterministic() {
        let anchor = NaiveDate::from_ymd_opt(2026, 6, 15).unwrap();
        let a = SyntheticMarketSource::new(anchor, 12, 7);
        let b = SyntheticMarketSource::new(anchor, 12, 7);

        let first = a.fetch(Series::MortgageRate, "CA").await.unwrap();
        let second = b.fetch(Series::MortgageRate, "CA").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 12);
        assert_eq!(first.last().unwrap().date, NaiveDate::from_ymd_opt(2026, 6, 1).unwrap());
        assert!(first.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[tokio::test]
    async fn test_synthetic_unknown_region() {
        let source = SyntheticMarketSource::current(1);
        let result = source.fetch(Series::Income, "ZZ").await;
        assert!(matches!(result, Err(PipelineError::SourceUnavailable(_))));
    }
}
