use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use chrono::{Datelike, Days, NaiveDate};
use tracing::{debug, info, instrument, warn};

use crate::fetch_error::FetchError;
use crate::fetcher::ClimateDataFetcher;
use crate::services::reconciler::reconcile;
use crate::store::dataset_repository::{read_dataset, write_dataset};
use crate::store::{DatasetError, Station, StationDataset, YearMonth};

/// Data reaching back this many days is considered current
pub const FRESHNESS_DAYS: u64 = 1;

/// Error that aborts one station's update; other stations are unaffected
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Unchanged,
    Updated { rows_added: usize },
    FetchedNone,
}

/// A month whose fetch failed and was treated as "no data"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthFailure {
    pub month: YearMonth,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub station_id: String,
    pub outcome: UpdateOutcome,
    pub months_requested: usize,
    pub failed_months: Vec<MonthFailure>,
}

/// Result of an in-memory update: the report plus the dataset to persist, if it changed
#[derive(Debug, Clone)]
pub struct StationUpdate {
    pub report: UpdateReport,
    pub dataset: Option<StationDataset>,
}

#[derive(Debug, Clone)]
pub struct UpdaterOptions {
    /// Pause between consecutive requests for one station
    pub request_delay: Duration,
    /// Extra attempts for a month that failed with a retryable error
    pub retry_attempts: usize,
    pub retry_min_delay: Duration,
}

impl Default for UpdaterOptions {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_millis(100),
            retry_attempts: 2,
            retry_min_delay: Duration::from_secs(1),
        }
    }
}

/// Keeps one station's dataset current by re-fetching only the stale months
#[derive(Clone)]
pub struct StationUpdater {
    fetcher: ClimateDataFetcher,
    options: UpdaterOptions,
}

impl StationUpdater {
    pub fn new(fetcher: ClimateDataFetcher, options: UpdaterOptions) -> Self {
        Self { fetcher, options }
    }

    pub fn fetcher(&self) -> &ClimateDataFetcher {
        &self.fetcher
    }

    /// Read, update and (when changed) rewrite the dataset file for a station
    #[instrument(skip(self, station, path), fields(station_id = %station.station_id, path = %path.display()))]
    pub async fn update_file(
        &self,
        station: &Station,
        path: &Path,
        today: NaiveDate,
    ) -> Result<UpdateReport, UpdateError> {
        let existing = read_dataset(path)?;
        let update = self.update(station, existing, today).await;

        if let Some(dataset) = &update.dataset {
            write_dataset(path, dataset)?;
            info!(
                "Saved {} ({} records) for {}",
                path.display(),
                dataset.len(),
                station.name
            );
        }

        Ok(update.report)
    }

    /// Bring a station's dataset up to date as of `today`
    ///
    /// A month that fails to fetch is recorded in the report and otherwise treated as
    /// having no data. The returned dataset is `Some` only when it differs from `existing`.
    #[instrument(skip(self, station, existing, today), fields(station_id = %station.station_id, today = %today))]
    pub async fn update(
        &self,
        station: &Station,
        existing: Option<StationDataset>,
        today: NaiveDate,
    ) -> StationUpdate {
        let latest = existing.as_ref().and_then(StationDataset::max_date);

        let Some(months) = months_to_fetch(station, latest, today) else {
            info!(
                "Data is already up to date for {} (data goes up to {})",
                station.name,
                latest.map(|d| d.to_string()).unwrap_or_default()
            );
            return StationUpdate {
                report: self.report(station, UpdateOutcome::Unchanged, 0, Vec::new()),
                dataset: None,
            };
        };

        info!(
            "Fetching {} months for {} (station {})",
            months.len(),
            station.name,
            station.station_id
        );
        let (fetched, failed_months) = self.fetch_months(station, &months).await;

        if fetched.is_empty() {
            info!("No new data found for {}", station.name);
            return StationUpdate {
                report: self.report(station, UpdateOutcome::FetchedNone, months.len(), failed_months),
                dataset: None,
            };
        }

        let existing = existing.unwrap_or_default();
        let existing_dates = existing.dates();

        let fetched_len = fetched.len();
        let new_records: Vec<_> = fetched
            .records
            .into_iter()
            .filter(|r| !existing_dates.contains(&r.date))
            .collect();
        debug!(
            "{} of {} fetched records are for dates not yet stored",
            new_records.len(),
            fetched_len
        );

        let incoming = if new_records.is_empty() {
            StationDataset::default()
        } else {
            StationDataset::new(fetched.columns, new_records)
        };

        let reconciled = reconcile(existing.clone(), incoming);

        let (outcome, dataset) = if reconciled.is_empty() {
            (UpdateOutcome::FetchedNone, None)
        } else if reconciled == existing {
            (UpdateOutcome::Unchanged, None)
        } else {
            let rows_added = reconciled
                .records
                .iter()
                .filter(|r| !existing_dates.contains(&r.date))
                .count();
            info!("Updated {} with {} new records", station.name, rows_added);
            (UpdateOutcome::Updated { rows_added }, Some(reconciled))
        };

        StationUpdate {
            report: self.report(station, outcome, months.len(), failed_months),
            dataset,
        }
    }

    /// Fetch each month in turn, pausing between requests
    async fn fetch_months(
        &self,
        station: &Station,
        months: &[YearMonth],
    ) -> (StationDataset, Vec<MonthFailure>) {
        let mut columns = BTreeSet::new();
        let mut records = Vec::new();
        let mut failures = Vec::new();

        for (i, month) in months.iter().enumerate() {
            if i > 0 && !self.options.request_delay.is_zero() {
                tokio::time::sleep(self.options.request_delay).await;
            }

            match self.fetch_month_with_retry(station, *month).await {
                Ok(batch) if batch.is_empty() => {
                    debug!("{}: no data", month);
                }
                Ok(batch) => {
                    debug!("{}: {} records", month, batch.len());
                    columns.extend(batch.columns);
                    records.extend(batch.records);
                }
                Err(e) => {
                    warn!(
                        station_id = %station.station_id,
                        month = %month,
                        error = %e,
                        "Month fetch failed, continuing without it"
                    );
                    failures.push(MonthFailure {
                        month: *month,
                        error: e.to_string(),
                    });
                }
            }
        }

        (StationDataset::new(columns, records), failures)
    }

    async fn fetch_month_with_retry(
        &self,
        station: &Station,
        month: YearMonth,
    ) -> Result<StationDataset, FetchError> {
        let fetcher = &self.fetcher;
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.options.retry_min_delay)
            .with_max_times(self.options.retry_attempts)
            .with_jitter();

        (move || fetcher.fetch_month(&station.station_id, &station.name, month.year, month.month))
            .retry(backoff)
            .sleep(tokio::time::sleep)
            .when(FetchError::is_retryable)
            .notify(|err: &FetchError, delay: Duration| {
                warn!("Retrying {} in {:?} after error: {}", month, delay, err);
            })
            .await
    }

    fn report(
        &self,
        station: &Station,
        outcome: UpdateOutcome,
        months_requested: usize,
        failed_months: Vec<MonthFailure>,
    ) -> UpdateReport {
        UpdateReport {
            station_id: station.station_id.clone(),
            outcome,
            months_requested,
            failed_months,
        }
    }
}

/// Whether data ending on `latest` counts as current on `today`
pub fn is_fresh(latest: NaiveDate, today: NaiveDate) -> bool {
    today
        .checked_sub_days(Days::new(FRESHNESS_DAYS))
        .map_or(true, |threshold| latest >= threshold)
}

/// Months to request for a station, or `None` when its data is already current
pub fn months_to_fetch(
    station: &Station,
    latest: Option<NaiveDate>,
    today: NaiveDate,
) -> Option<Vec<YearMonth>> {
    match latest {
        None => Some(full_history_months(station.first_year, station.last_year, today)),
        Some(latest) if is_fresh(latest, today) => None,
        Some(latest) => Some(incremental_months(latest, today)),
    }
}

/// January of `first_year` through the current month, capped at `last_year`
pub fn full_history_months(first_year: i32, last_year: i32, today: NaiveDate) -> Vec<YearMonth> {
    let last_year = last_year.min(today.year());
    let end = if last_year == today.year() {
        YearMonth::of(today)
    } else {
        YearMonth::new(last_year, 12)
    };
    YearMonth::new(first_year, 1).through(end)
}

/// Month containing `latest` (or the next one, if `latest` closes its month) through today's
pub fn incremental_months(latest: NaiveDate, today: NaiveDate) -> Vec<YearMonth> {
    let closes_month = latest
        .succ_opt()
        .map_or(true, |next| next.month() != latest.month());
    let start = if closes_month {
        YearMonth::of(latest).next()
    } else {
        YearMonth::of(latest)
    };
    start.through(YearMonth::of(today))
}
