//! Data ingestion agent
//!
//! Pulls raw series from a `MarketDataSource`, normalizes them and upserts
//! them into the store. A failing (series, region) never blocks the others.

use crate::config::ensure_supported_region;
use crate::error::PipelineError;
use crate::models::{HistoricalDataPoint, Series};
use crate::sources::MarketDataSource;
use crate::store::PredictiveStore;
use crate::Result;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngestionFailure {
    pub region: String,
    pub series: Option<Series>,
    pub invalid_region: bool,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngestionReport {
    /// Points written per region and series
    pub ingested: BTreeMap<String, BTreeMap<Series, usize>>,
    pub failures: Vec<IngestionFailure>,
    pub total_points: usize,
}

impl IngestionReport {
    pub fn invalid_regions(&self) -> Vec<String> {
        self.failures
            .iter()
            .filter(|f| f.invalid_region)
            .map(|f| f.region.clone())
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn merge(&mut self, other: IngestionReport) {
        for (region, by_series) in other.ingested {
            self.ingested.entry(region).or_default().extend(by_series);
        }
        self.failures.extend(other.failures);
        self.total_points += other.total_points;
    }
}

#[derive(Clone)]
pub struct DataIngestionAgent {
    store: Arc<dyn PredictiveStore>,
    source: Arc<dyn MarketDataSource>,
}

impl DataIngestionAgent {
    pub fn new(store: Arc<dyn PredictiveStore>, source: Arc<dyn MarketDataSource>) -> Self {
        Self { store, source }
    }

    pub async fn ingest_mortgage_rates(&self, region: &str) -> Vec<HistoricalDataPoint> {
        self.ingest_or_empty(Series::MortgageRate, region).await
    }

    pub async fn ingest_property_values(&self, region: &str) -> Vec<HistoricalDataPoint> {
        self.ingest_or_empty(Series::PropertyValue, region).await
    }

    pub async fn ingest_income_trends(&self, region: &str) -> Vec<HistoricalDataPoint> {
        self.ingest_or_empty(Series::Income, region).await
    }

    pub async fn ingest_market_indices(&self, region: &str) -> Vec<HistoricalDataPoint> {
        self.ingest_or_empty(Series::MarketIndex, region).await
    }

    async fn ingest_or_empty(&self, series: Series, region: &str) -> Vec<HistoricalDataPoint> {
        match self.ingest(series, region).await {
            Ok(points) => points,
            Err(e) => {
                warn!(series = %series, region, error = %e, "Ingestion failed, returning no data");
                Vec::new()
            }
        }
    }

    /// Fetch, normalize and upsert one series for one region
    pub async fn ingest(&self, series: Series, region: &str) -> Result<Vec<HistoricalDataPoint>> {
        let profile = ensure_supported_region(region)?;

        let raw = self.source.fetch(series, profile.code).await?;
        let points = normalize(series, profile.code, raw);

        if !points.is_empty() {
            self.store.upsert_historical(&points).await?;
        }

        debug!(
            series = %series,
            region = profile.code,
            source = self.source.name(),
            count = points.len(),
            "Series ingested"
        );

        Ok(points)
    }

    pub async fn get_historical_data(
        &self,
        series: Series,
        region: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<HistoricalDataPoint>> {
        let profile = ensure_supported_region(region)?;
        if start > end {
            return Err(PipelineError::InvalidParameter(format!(
                "start date {} is after end date {}",
                start, end
            )));
        }
        self.store.historical_range(series, profile.code, start, end).await
    }

    /// Report entries and failures are keyed by the canonical uppercase code
    async fn ingest_region(&self, region: String) -> IngestionReport {
        let mut report = IngestionReport::default();

        let code = match ensure_supported_region(&region) {
            Ok(profile) => profile.code.to_string(),
            Err(e) => {
                report.failures.push(IngestionFailure {
                    region: region.trim().to_uppercase(),
                    series: None,
                    invalid_region: true,
                    message: e.to_string(),
                });
                return report;
            }
        };

        for series in Series::ALL {
            match self.ingest(series, &code).await {
                Ok(points) => {
                    report.total_points += points.len();
                    report
                        .ingested
                        .entry(code.clone())
                        .or_default()
                        .insert(series, points.len());
                }
                Err(e) => {
                    warn!(series = %series, region = %code, error = %e, "Source fetch failed");
                    report.failures.push(IngestionFailure {
                        region: code.clone(),
                        series: Some(series),
                        invalid_region: false,
                        message: e.to_string(),
                    });
                }
            }
        }

        report
    }

    /// Ingest every series for every region, fanning regions out concurrently
    pub async fn run_full_ingestion(&self, regions: &[String]) -> IngestionReport {
        let mut set = tokio::task::JoinSet::new();

        for region in regions {
            let agent = self.clone();
            let region = region.clone();
            set.spawn(async move { agent.ingest_region(region).await });
        }

        let mut report = IngestionReport::default();
        while let Some(res) = set.join_next().await {
            match res {
                Ok(region_report) => report.merge(region_report),
                Err(e) => {
                    warn!(error = %e, "Region ingestion task failed");
                    report.failures.push(IngestionFailure {
                        region: "unknown".to_string(),
                        series: None,
                        invalid_region: false,
                        message: e.to_string(),
                    });
                }
            }
        }
        report.failures.sort_by(|a, b| (&a.region, a.series).cmp(&(&b.region, b.series)));

        info!(
            regions = regions.len(),
            total_points = report.total_points,
            failures = report.failures.len(),
            "Full ingestion completed"
        );

        report
    }
}

/// Drop non-finite values, keep the last value per date, sort ascending
fn normalize(series: Series, region: &str, raw: Vec<HistoricalDataPoint>) -> Vec<HistoricalDataPoint> {
    let mut by_date: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for point in raw {
        if point.series == series && point.value.is_finite() {
            by_date.insert(point.date, point.value);
        }
    }

    by_date
        .into_iter()
        .map(|(date, value)| HistoricalDataPoint {
            series,
            region: region.to_string(),
            date,
            value,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SyntheticMarketSource;
    use crate::store::InMemoryStore;
    use crate::testing::FailingSource;

    fn agent(source: Arc<dyn MarketDataSource>) -> (DataIngestionAgent, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (DataIngestionAgent::new(store.clone(), source), store)
    }

    #[tokio::test]
    async fn test_ingest_is_idempotent() {
        let (agent, store) = agent(Arc::new(SyntheticMarketSource::current(3)));

        let first = agent.ingest_mortgage_rates("CA").await;
        let second = agent.ingest_mortgage_rates("CA").await;
        assert_eq!(first.len(), 24);
        assert_eq!(first, second);

        let stored = store
            .historical_range(
                Series::MortgageRate,
                "CA",
                NaiveDate::MIN,
                NaiveDate::MAX,
            )
            .await
            .unwrap();
        assert_eq!(stored.len(), 24);
    }

    #[tokio::test]
    async fn test_failed_source_returns_empty() {
        let (agent, _) = agent(Arc::new(FailingSource::new(&[Series::Income])));
        assert!(agent.ingest_income_trends("CA").await.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_region_returns_empty() {
        let (agent, _) = agent(Arc::new(SyntheticMarketSource::current(3)));
        assert!(agent.ingest_property_values("INVALID_REGION").await.is_empty());
    }

    #[tokio::test]
    async fn test_full_ingestion_reports_partial_failures() {
        let (agent, _) = agent(Arc::new(FailingSource::new(&[Series::MarketIndex])));
        let regions = vec!["CA".to_string(), "TX".to_string(), "INVALID_REGION".to_string()];

        let report = agent.run_full_ingestion(&regions).await;

        assert_eq!(report.invalid_regions(), vec!["INVALID_REGION".to_string()]);
        assert_eq!(report.ingested.len(), 2);
        assert_eq!(report.ingested["CA"].len(), 3);
        // One market index failure per valid region plus the invalid region
        assert_eq!(report.failures.len(), 3);
        assert!(!report.is_clean());
        assert_eq!(report.total_points, 2 * 3 * 24);
    }

    #[tokio::test]
    async fn test_report_regions_are_canonical() {
        let (agent, _) = agent(Arc::new(FailingSource::new(&[Series::Income])));
        let regions = vec!["ca".to_string(), " nowhere ".to_string()];

        let report = agent.run_full_ingestion(&regions).await;

        assert!(report.ingested.contains_key("CA"));
        let regions: Vec<&str> = report.failures.iter().map(|f| f.region.as_str()).collect();
        assert_eq!(regions, vec!["CA", "NOWHERE"]);
        assert_eq!(report.invalid_regions(), vec!["NOWHERE".to_string()]);
    }

    #[tokio::test]
    async fn test_get_historical_data_rejects_reversed_range() {
        let (agent, _) = agent(Arc::new(SyntheticMarketSource::current(3)));
        let result = agent
            .get_historical_data(
                Series::MortgageRate,
                "CA",
                NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
                NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            )
            .await;
        assert!(matches!(result, Err(PipelineError::InvalidParameter(_))));
    }

    #[test]
    fn test_normalize_dedups_and_sorts() {
        let d = |day| NaiveDate::from_ymd_opt(2026, 1, day).unwrap();
        let raw = vec![
            HistoricalDataPoint { series: Series::Income, region: "x".into(), date: d(3), value: 3.0 },
            HistoricalDataPoint { series: Series::Income, region: "x".into(), date: d(1), value: 1.0 },
            HistoricalDataPoint { series: Series::Income, region: "x".into(), date: d(3), value: 4.0 },
            HistoricalDataPoint { series: Series::Income, region: "x".into(), date: d(2), value: f64::NAN },
        ];
        let points = normalize(Series::Income, "CA", raw);
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].value, 4.0);
        assert!(points.iter().all(|p| p.region == "CA"));
    }
}
