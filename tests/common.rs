#![allow(dead_code)]

use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use mockito::{Matcher, ServerGuard};

use climate_tracker::fetcher::ClimateDataFetcher;
use climate_tracker::services::{StationUpdater, UpdaterOptions};

pub const BULK_PATH: &str = "/bulk_data_e.html";

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Fetcher pointed at the mock server's bulk data path
pub fn test_fetcher(server: &ServerGuard) -> ClimateDataFetcher {
    ClimateDataFetcher::new(
        format!("{}{}", server.url(), BULK_PATH),
        Duration::from_secs(5),
    )
    .unwrap()
}

/// Updater with no request delay and a tiny retry backoff
pub fn test_updater(server: &ServerGuard, retry_attempts: usize) -> StationUpdater {
    StationUpdater::new(
        test_fetcher(server),
        UpdaterOptions {
            request_delay: Duration::ZERO,
            retry_attempts,
            retry_min_delay: Duration::from_millis(1),
        },
    )
}

/// Query matcher for one station-month request
pub fn month_query(station_id: &str, year: i32, month: u32) -> Matcher {
    Matcher::AllOf(vec![
        Matcher::UrlEncoded("format".into(), "csv".into()),
        Matcher::UrlEncoded("stationID".into(), station_id.into()),
        Matcher::UrlEncoded("Year".into(), year.to_string()),
        Matcher::UrlEncoded("Month".into(), month.to_string()),
        Matcher::UrlEncoded("timeframe".into(), "2".into()),
    ])
}

const BULK_HEADER: &str = "\"Longitude (x)\",\"Latitude (y)\",\"Station Name\",\"Climate ID\",\"Date/Time\",\"Year\",\"Month\",\"Day\",\"Data Quality\",\"Max Temp (°C)\",\"Max Temp Flag\",\"Min Temp (°C)\",\"Min Temp Flag\",\"Mean Temp (°C)\",\"Total Rain (mm)\",\"Total Snow (cm)\",\"Total Precip (mm)\",\"Snow on Grnd (cm)\",\"Dir of Max Gust (10s deg)\",\"Spd of Max Gust (km/h)\"";

/// Bulk data CSV body with one fully observed row per listed day
pub fn bulk_csv(days: &[NaiveDate]) -> String {
    let mut body = String::from('\u{feff}');
    body.push_str(BULK_HEADER);
    body.push('\n');
    for day in days {
        body.push_str(&format!(
            "\"-52.75\",\"47.62\",\"REMOTE NAME\",\"8403506\",\"{}\",\"{}\",\"{:02}\",\"{:02}\",\"\",\"5.5\",\"\",\"-2.0\",\"\",\"1.8\",\"0.4\",\"0.0\",\"0.4\",\"3\",\"27\",\"52\"\n",
            day.format("%Y-%m-%d"),
            day.year(),
            day.month(),
            day.day(),
        ));
    }
    body
}

/// Every day of a month up to and including `last_day`
pub fn days_of_month(year: i32, month: u32, last_day: u32) -> Vec<NaiveDate> {
    (1..=last_day).map(|d| date(year, month, d)).collect()
}

/// Persisted dataset CSV with one row per day
pub fn dataset_csv(station_name: &str, station_id: &str, days: &[NaiveDate]) -> String {
    let mut body = String::from("Date/Time,Max Temp (°C),Total Precip (mm),Station Name,Station ID\n");
    for day in days {
        body.push_str(&format!(
            "{},1.0,0.0,{},{}\n",
            day.format("%Y-%m-%d"),
            station_name,
            station_id
        ));
    }
    body
}
