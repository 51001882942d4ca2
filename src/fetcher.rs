use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use tracing::{debug, instrument, warn};

use crate::fetch_error::FetchError;
use crate::store::models::{DailyRecord, Measurement, StationDataset, YearMonth, DATE_COLUMN};
use crate::utils::parse_date;

pub const DEFAULT_BASE_URL: &str = "https://climate.weather.gc.ca/climate_data/bulk_data_e.html";

/// `timeframe` selector for daily data
const DAILY_TIMEFRAME: &str = "2";

/// Client for the climate bulk data endpoint
///
/// One call issues exactly one GET; retry policy belongs to the caller.
#[derive(Clone)]
pub struct ClimateDataFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl ClimateDataFetcher {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch one month of daily observations for a station
    ///
    /// An empty body or a response without a date column means "no data" and yields an
    /// empty dataset. Only the observed measurement columns are kept; every record gets the
    /// given station name and id.
    #[instrument(skip(self, station_name), fields(url = %self.base_url))]
    pub async fn fetch_month(
        &self,
        station_id: &str,
        station_name: &str,
        year: i32,
        month: u32,
    ) -> Result<StationDataset, FetchError> {
        let period = YearMonth::new(year, month).to_string();
        let text = self.request_month_csv(station_id, year, month, &period).await?;

        let dataset = parse_daily_csv(
            &text,
            station_id,
            station_name,
            &Measurement::OBSERVED,
            |date| date.year() == year && date.month() == month,
        )
        .map_err(|e| FetchError::Parse {
            station_id: station_id.to_string(),
            period,
            message: e.to_string(),
        })?;

        debug!("Parsed {} daily records", dataset.len());
        Ok(dataset)
    }

    /// Fetch the max gust direction (tens of degrees) for a single day
    ///
    /// `Ok(None)` when the remote row for that exact date is absent or carries no direction.
    pub async fn fetch_day_gust_direction(
        &self,
        station_id: &str,
        date: NaiveDate,
    ) -> Result<Option<f64>, FetchError> {
        let directions = self
            .fetch_month_gust_directions(station_id, date.year(), date.month())
            .await?;
        Ok(directions.get(&date).copied().flatten())
    }

    /// Max gust direction for every day of one month that the remote response lists
    ///
    /// Days missing from the response are absent from the map; listed days without a
    /// direction map to `None`.
    #[instrument(skip(self), fields(url = %self.base_url))]
    pub async fn fetch_month_gust_directions(
        &self,
        station_id: &str,
        year: i32,
        month: u32,
    ) -> Result<BTreeMap<NaiveDate, Option<f64>>, FetchError> {
        let period = YearMonth::new(year, month).to_string();
        let text = self.request_month_csv(station_id, year, month, &period).await?;

        let dataset = parse_daily_csv(
            &text,
            station_id,
            "",
            &[Measurement::MaxGustDirection],
            |d| d.year() == year && d.month() == month,
        )
        .map_err(|e| FetchError::Parse {
            station_id: station_id.to_string(),
            period,
            message: e.to_string(),
        })?;

        Ok(dataset
            .records
            .into_iter()
            .map(|r| (r.date, r.max_gust_dir_10s_deg))
            .collect())
    }

    async fn request_month_csv(
        &self,
        station_id: &str,
        year: i32,
        month: u32,
        period: &str,
    ) -> Result<String, FetchError> {
        let request_err = |source| FetchError::Request {
            station_id: station_id.to_string(),
            period: period.to_string(),
            source,
        };

        let year = year.to_string();
        let month = month.to_string();

        debug!("Sending HTTP request for station {} ({})", station_id, period);
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("format", "csv"),
                ("stationID", station_id),
                ("Year", year.as_str()),
                ("Month", month.as_str()),
                ("timeframe", DAILY_TIMEFRAME),
            ])
            .send()
            .await
            .map_err(request_err)?;

        let status = response.status();
        debug!("Received HTTP response with status: {}", status);
        if !status.is_success() {
            return Err(FetchError::Status {
                station_id: station_id.to_string(),
                period: period.to_string(),
                status,
            });
        }

        let text = response.text().await.map_err(request_err)?;
        debug!("Retrieved CSV content, size: {} bytes", text.len());
        Ok(text)
    }
}

/// Parse a bulk data CSV response into daily records
///
/// Keeps only the `recognized` measurement columns that are present and only rows whose
/// date satisfies `keep_date`. Rows without a parsable date are skipped; unparsable
/// measurement cells are treated as missing.
pub fn parse_daily_csv(
    text: &str,
    station_id: &str,
    station_name: &str,
    recognized: &[Measurement],
    keep_date: impl Fn(NaiveDate) -> bool,
) -> Result<StationDataset, csv::Error> {
    let text = text.trim_start_matches('\u{feff}');
    if text.trim().is_empty() {
        debug!("Empty response body");
        return Ok(StationDataset::default());
    }

    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = rdr.headers()?.clone();
    let index: HashMap<&str, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, name)| (name.trim(), i))
        .collect();

    let Some(&date_idx) = index.get(DATE_COLUMN) else {
        debug!("Response has no '{}' column", DATE_COLUMN);
        return Ok(StationDataset::default());
    };

    let present: Vec<(Measurement, usize)> = recognized
        .iter()
        .filter_map(|m| index.get(m.column_name()).map(|&i| (*m, i)))
        .collect();
    let columns: BTreeSet<Measurement> = present.iter().map(|(m, _)| *m).collect();

    let mut records = Vec::new();
    let mut skipped_rows = 0;
    let mut unparsable_cells = 0;

    for result in rdr.records() {
        let row = result?;

        let Some(date) = row.get(date_idx).and_then(parse_date) else {
            skipped_rows += 1;
            continue;
        };
        if !keep_date(date) {
            continue;
        }

        let mut record = DailyRecord::new(date, station_name, station_id);
        for (measurement, i) in &present {
            let raw = row.get(*i).unwrap_or("").trim();
            if raw.is_empty() {
                continue;
            }
            match raw.parse::<f64>().ok().filter(|v| v.is_finite()) {
                Some(value) => record.set_value(*measurement, Some(value)),
                None => {
                    debug!("Unparsable {} value '{}' on {}", measurement, raw, date);
                    unparsable_cells += 1;
                }
            }
        }
        records.push(record);
    }

    if skipped_rows > 0 {
        warn!("Skipped {} rows without a parsable date", skipped_rows);
    }
    if unparsable_cells > 0 {
        warn!("Treated {} unparsable measurement cells as missing", unparsable_cells);
    }

    Ok(StationDataset::new(columns, records))
}
