use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info, instrument, warn};

use crate::services::station_updater::{
    StationUpdater, UpdateError, UpdateOutcome, UpdateReport,
};
use crate::store::dataset_repository::read_dataset;
use crate::store::{DatasetError, DatasetRepository, Station};
use crate::utils::normalize_location_name;

/// One unit of batch work: a dataset file and the stations that feed it
///
/// Stations are updated in order, so a file is only ever touched by one task. An empty
/// station list means the station is taken from the file itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationJob {
    pub path: PathBuf,
    pub stations: Vec<Station>,
}

/// Final counts of a batch run, one entry per station update
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub updated: usize,
    pub unchanged: usize,
    pub no_data: usize,
    pub failed: usize,
    /// Months skipped after a fetch error, across all stations
    pub month_failures: usize,
    pub failures: Vec<(String, String)>,
}

impl BatchSummary {
    fn record(&mut self, report: &UpdateReport) {
        match report.outcome {
            UpdateOutcome::Updated { .. } => self.updated += 1,
            UpdateOutcome::Unchanged => self.unchanged += 1,
            UpdateOutcome::FetchedNone => self.no_data += 1,
        }
        self.month_failures += report.failed_months.len();
    }

    pub fn total(&self) -> usize {
        self.updated + self.unchanged + self.no_data + self.failed
    }
}

/// One job per existing dataset file in the given provinces
pub fn jobs_from_data_dir(
    repo: &DatasetRepository,
    provinces: &[String],
) -> Result<Vec<StationJob>, DatasetError> {
    Ok(repo
        .scan_station_files(provinces)?
        .into_iter()
        .map(|path| StationJob {
            path,
            stations: Vec::new(),
        })
        .collect())
}

/// Jobs for inventory stations whose normalized name is a target location
///
/// Stations that map to the same dataset file share a job, oldest first.
pub fn jobs_from_inventory(
    repo: &DatasetRepository,
    inventory: &[Station],
    targets: &HashSet<String>,
) -> Vec<StationJob> {
    let mut by_path: BTreeMap<PathBuf, Vec<Station>> = BTreeMap::new();

    for station in inventory {
        if !targets.contains(&normalize_location_name(&station.name)) {
            continue;
        }
        let path = repo.dataset_path(&station.province, &station.name);
        by_path.entry(path).or_default().push(station.clone());
    }

    by_path
        .into_iter()
        .map(|(path, mut stations)| {
            stations.sort_by_key(|s| s.first_year);
            if stations.len() > 1 {
                debug!(
                    "{} stations share {}",
                    stations.len(),
                    path.display()
                );
            }
            StationJob { path, stations }
        })
        .collect()
}

/// Station identity recovered from an existing dataset file
///
/// Id and name come from the trailing row, the province from the parent folder and the
/// first year from the earliest record.
pub fn station_from_file(path: &Path) -> Result<Station, DatasetError> {
    let no_identity = || DatasetError::NoStationIdentity {
        path: path.to_path_buf(),
    };

    let dataset = read_dataset(path)?.ok_or_else(no_identity)?;
    let (station_id, name) = dataset
        .trailing_identity()
        .filter(|(id, _)| !id.is_empty())
        .ok_or_else(no_identity)?;
    let first_date = dataset
        .records
        .iter()
        .map(|r| r.date)
        .min()
        .ok_or_else(no_identity)?;
    let province = path
        .parent()
        .and_then(Path::file_name)
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    Ok(Station {
        station_id: station_id.to_string(),
        name: name.to_string(),
        province: province.to_string(),
        first_year: first_date.year(),
        last_year: i32::MAX,
    })
}

#[instrument(skip(updater, job), fields(path = %job.path.display()))]
async fn run_job(
    updater: &StationUpdater,
    job: &StationJob,
    today: NaiveDate,
) -> Result<Vec<UpdateReport>, UpdateError> {
    let stations = if job.stations.is_empty() {
        vec![station_from_file(&job.path)?]
    } else {
        job.stations.clone()
    };

    let mut reports = Vec::with_capacity(stations.len());
    for station in &stations {
        reports.push(updater.update_file(station, &job.path, today).await?);
    }
    Ok(reports)
}

/// Update every job with at most `concurrency` running at once
///
/// A failing job is logged and counted; it never stops the others.
#[instrument(skip(updater, jobs), fields(job_count = jobs.len()))]
pub async fn run_batch(
    updater: &StationUpdater,
    jobs: Vec<StationJob>,
    concurrency: usize,
    today: NaiveDate,
) -> BatchSummary {
    info!(
        "Updating {} dataset files with {} workers",
        jobs.len(),
        concurrency
    );

    let pb = ProgressBar::new(jobs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} stations ({msg})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );

    let mut results = stream::iter(jobs)
        .map(|job| async move {
            let result = run_job(updater, &job, today).await;
            (job, result)
        })
        .buffer_unordered(concurrency.max(1));

    let mut summary = BatchSummary::default();
    while let Some((job, result)) = results.next().await {
        match result {
            Ok(reports) => {
                for report in &reports {
                    if !report.failed_months.is_empty() {
                        warn!(
                            "Station {}: {} months could not be fetched",
                            report.station_id,
                            report.failed_months.len()
                        );
                    }
                    summary.record(report);
                }
            }
            Err(e) => {
                error!("Failed to update {}: {}", job.path.display(), e);
                summary.failed += 1;
                summary
                    .failures
                    .push((job.path.display().to_string(), e.to_string()));
            }
        }
        pb.set_message(format!(
            "{} updated, {} failed",
            summary.updated, summary.failed
        ));
        pb.inc(1);
    }

    pb.finish_with_message(format!(
        "Complete: {} updated, {} unchanged, {} without data, {} failed",
        summary.updated, summary.unchanged, summary.no_data, summary.failed
    ));
    info!(
        updated = summary.updated,
        unchanged = summary.unchanged,
        no_data = summary.no_data,
        failed = summary.failed,
        month_failures = summary.month_failures,
        "Batch finished"
    );

    summary
}
