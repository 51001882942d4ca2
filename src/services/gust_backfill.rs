use std::collections::{BTreeMap, HashMap};
use std::ops::AddAssign;
use std::path::Path;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use tracing::{debug, error, info, instrument, warn};

use crate::fetcher::ClimateDataFetcher;
use crate::store::dataset_repository::{read_dataset, write_dataset};
use crate::store::{DatasetError, DatasetRepository, Measurement, StationDataset};

/// Gust directions already looked up during one backfill run, keyed by station and day
pub type GustDirectionCache = HashMap<(String, NaiveDate), Option<f64>>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackfillReport {
    /// Records that had no gust direction
    pub missing: usize,
    pub filled: usize,
    /// Days whose lookup failed and stay missing
    pub failed: usize,
    /// Records without a station id, never looked up
    pub skipped: usize,
    /// Files that could not be read or written
    pub files_failed: usize,
}

impl AddAssign for BackfillReport {
    fn add_assign(&mut self, other: Self) {
        self.missing += other.missing;
        self.filled += other.filled;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.files_failed += other.files_failed;
    }
}

/// Fill missing gust directions in place
///
/// Lookups go through `cache` first; a miss fetches the whole month once and caches every
/// day of it. Records without a station id are skipped. Values are stored as returned, in
/// tens of degrees.
pub async fn backfill_gust_direction(
    fetcher: &ClimateDataFetcher,
    dataset: &mut StationDataset,
    cache: &mut GustDirectionCache,
    request_delay: Duration,
) -> BackfillReport {
    let mut report = BackfillReport::default();
    let mut requests = 0usize;

    dataset.columns.insert(Measurement::MaxGustDirection);

    for record in dataset
        .records
        .iter_mut()
        .filter(|r| r.max_gust_dir_10s_deg.is_none())
    {
        report.missing += 1;
        let station_id = record.station_id.trim();
        if station_id.is_empty() {
            debug!("No station id on {}, skipping lookup", record.date);
            report.skipped += 1;
            continue;
        }
        let key = (station_id.to_string(), record.date);

        if !cache.contains_key(&key) {
            if requests > 0 && !request_delay.is_zero() {
                tokio::time::sleep(request_delay).await;
            }
            requests += 1;

            let (year, month) = (record.date.year(), record.date.month());
            match fetcher.fetch_month_gust_directions(station_id, year, month).await {
                Ok(directions) => cache_month(cache, station_id, year, month, &directions),
                Err(e) => {
                    warn!(error = %e, "Gust direction lookup failed for {}", record.date);
                    report.failed += 1;
                    continue;
                }
            }
        }

        if let Some(direction) = cache.get(&key).copied().flatten() {
            record.max_gust_dir_10s_deg = Some(direction);
            report.filled += 1;
        }
    }

    debug!(
        "{} missing gust directions, {} filled with {} requests",
        report.missing, report.filled, requests
    );
    report
}

/// Cache every day of a fetched month; days the response did not list are cached as `None`
fn cache_month(
    cache: &mut GustDirectionCache,
    station_id: &str,
    year: i32,
    month: u32,
    directions: &BTreeMap<NaiveDate, Option<f64>>,
) {
    let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
        return;
    };
    for day in first.iter_days().take_while(|d| d.month() == month) {
        cache
            .entry((station_id.to_string(), day))
            .or_insert_with(|| directions.get(&day).copied().flatten());
    }
}

/// Backfill one dataset file, rewriting it when the gust direction column changed
#[instrument(skip(fetcher, path, cache), fields(path = %path.display()))]
pub async fn backfill_file(
    fetcher: &ClimateDataFetcher,
    path: &Path,
    cache: &mut GustDirectionCache,
    request_delay: Duration,
) -> Result<BackfillReport, DatasetError> {
    let Some(mut dataset) = read_dataset(path)? else {
        return Ok(BackfillReport::default());
    };

    let had_column = dataset.columns.contains(&Measurement::MaxGustDirection);
    let report = backfill_gust_direction(fetcher, &mut dataset, cache, request_delay).await;

    if report.filled > 0 || !had_column {
        write_dataset(path, &dataset)?;
        info!(
            "Filled {} of {} missing gust directions in {}",
            report.filled,
            report.missing,
            path.display()
        );
    }

    Ok(report)
}

/// Backfill every dataset file in a province folder with a cache scoped to this call
#[instrument(skip(fetcher, repo))]
pub async fn backfill_province(
    fetcher: &ClimateDataFetcher,
    repo: &DatasetRepository,
    province: &str,
    request_delay: Duration,
) -> Result<BackfillReport, DatasetError> {
    let files = repo.scan_station_files(&[province.to_string()])?;
    let mut cache = GustDirectionCache::new();
    let mut total = BackfillReport::default();

    info!("Backfilling gust direction for {} files in {}", files.len(), province);
    for path in &files {
        match backfill_file(fetcher, path, &mut cache, request_delay).await {
            Ok(report) => total += report,
            Err(e) => {
                error!("Skipping {}: {}", path.display(), e);
                total.files_failed += 1;
            }
        }
    }

    Ok(total)
}
