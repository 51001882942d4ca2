// End-to-end tests for StationUpdater: range selection, failure isolation, persistence

mod common;

use std::collections::HashSet;

use common::{
    bulk_csv, dataset_csv, date, days_of_month, month_query, test_updater, BULK_PATH,
};
use climate_tracker::services::station_updater::MonthFailure;
use climate_tracker::services::UpdateOutcome;
use climate_tracker::store::{read_dataset, Station, YearMonth};
use mockito::{Matcher, Server};
use tempfile::TempDir;

fn station(first_year: i32, last_year: i32) -> Station {
    Station {
        station_id: "50089".to_string(),
        name: "ST JOHNS".to_string(),
        province: "NL".to_string(),
        first_year,
        last_year,
    }
}

#[tokio::test]
async fn test_fresh_dataset_makes_no_requests() {
    let mut server = Server::new_async().await;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("StJohns_daily_data.csv");
    std::fs::write(
        &path,
        dataset_csv("ST JOHNS", "50089", &[date(2024, 4, 30), date(2024, 5, 1)]),
    )
    .unwrap();
    let before = std::fs::read_to_string(&path).unwrap();

    let mock = server
        .mock("GET", BULK_PATH)
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let updater = test_updater(&server, 0);
    let report = updater
        .update_file(&station(1990, 2100), &path, date(2024, 5, 2))
        .await
        .unwrap();

    assert_eq!(report.outcome, UpdateOutcome::Unchanged);
    assert_eq!(report.months_requested, 0);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_incremental_update_requests_stale_months() {
    let mut server = Server::new_async().await;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("StJohns_daily_data.csv");
    std::fs::write(
        &path,
        dataset_csv("ST JOHNS", "50089", &days_of_month(2024, 3, 15)),
    )
    .unwrap();

    let march = server
        .mock("GET", BULK_PATH)
        .match_query(month_query("50089", 2024, 3))
        .with_body(bulk_csv(&days_of_month(2024, 3, 31)))
        .expect(1)
        .create_async()
        .await;
    let april = server
        .mock("GET", BULK_PATH)
        .match_query(month_query("50089", 2024, 4))
        .with_body(bulk_csv(&days_of_month(2024, 4, 30)))
        .expect(1)
        .create_async()
        .await;
    let may = server
        .mock("GET", BULK_PATH)
        .match_query(month_query("50089", 2024, 5))
        .with_body(bulk_csv(&days_of_month(2024, 5, 2)))
        .expect(1)
        .create_async()
        .await;

    let updater = test_updater(&server, 0);
    let report = updater
        .update_file(&station(1990, 2100), &path, date(2024, 5, 2))
        .await
        .unwrap();

    assert_eq!(report.months_requested, 3);
    assert_eq!(report.outcome, UpdateOutcome::Updated { rows_added: 48 });
    assert!(report.failed_months.is_empty());

    let dataset = read_dataset(&path).unwrap().unwrap();
    assert_eq!(dataset.len(), 15 + 48);
    assert_eq!(dataset.max_date(), Some(date(2024, 5, 2)));
    let unique: HashSet<_> = dataset.records.iter().map(|r| r.date).collect();
    assert_eq!(unique.len(), dataset.len());
    assert!(dataset.records.windows(2).all(|w| w[0].date < w[1].date));

    // Stored rows win over re-fetched rows for the same date
    let march_first = &dataset.records[0];
    assert_eq!(march_first.max_temp_c, Some(1.0));

    march.assert_async().await;
    april.assert_async().await;
    may.assert_async().await;
}

#[tokio::test]
async fn test_rows_added_counts_new_dates_when_existing_rows_collapse() {
    let mut server = Server::new_async().await;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("StJohns_daily_data.csv");
    // A duplicated date and a row without observations both shrink on reconcile
    std::fs::write(
        &path,
        "Date/Time,Max Temp (°C),Total Precip (mm),Station Name,Station ID\n\
         2024-05-01,1.0,0.0,ST JOHNS,50089\n\
         2024-05-01,1.0,,ST JOHNS,50089\n\
         2024-05-02,,,ST JOHNS,50089\n",
    )
    .unwrap();

    let may = server
        .mock("GET", BULK_PATH)
        .match_query(month_query("50089", 2024, 5))
        .with_body(bulk_csv(&days_of_month(2024, 5, 5)))
        .expect(1)
        .create_async()
        .await;

    let updater = test_updater(&server, 0);
    let report = updater
        .update_file(&station(1990, 2100), &path, date(2024, 5, 5))
        .await
        .unwrap();

    assert_eq!(report.outcome, UpdateOutcome::Updated { rows_added: 3 });

    let dataset = read_dataset(&path).unwrap().unwrap();
    let dates: Vec<_> = dataset.records.iter().map(|r| r.date).collect();
    assert_eq!(
        dates,
        vec![date(2024, 5, 1), date(2024, 5, 3), date(2024, 5, 4), date(2024, 5, 5)]
    );

    may.assert_async().await;
}

#[tokio::test]
async fn test_failed_month_does_not_block_other_months() {
    let mut server = Server::new_async().await;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("StJohns_daily_data.csv");
    std::fs::write(
        &path,
        dataset_csv("ST JOHNS", "50089", &days_of_month(2024, 3, 15)),
    )
    .unwrap();

    server
        .mock("GET", BULK_PATH)
        .match_query(month_query("50089", 2024, 3))
        .with_body(bulk_csv(&days_of_month(2024, 3, 31)))
        .create_async()
        .await;
    let april = server
        .mock("GET", BULK_PATH)
        .match_query(month_query("50089", 2024, 4))
        .with_status(500)
        .expect(1)
        .create_async()
        .await;
    server
        .mock("GET", BULK_PATH)
        .match_query(month_query("50089", 2024, 5))
        .with_body(bulk_csv(&days_of_month(2024, 5, 2)))
        .create_async()
        .await;

    let updater = test_updater(&server, 0);
    let report = updater
        .update_file(&station(1990, 2100), &path, date(2024, 5, 2))
        .await
        .unwrap();

    assert_eq!(report.outcome, UpdateOutcome::Updated { rows_added: 18 });
    assert_eq!(report.failed_months.len(), 1);
    let MonthFailure { month, error } = &report.failed_months[0];
    assert_eq!(*month, YearMonth::new(2024, 4));
    assert!(error.contains("50089"));
    assert!(error.contains("2024-04"));

    let dataset = read_dataset(&path).unwrap().unwrap();
    assert_eq!(dataset.len(), 33);
    assert!(dataset.records.iter().all(|r| r.date.format("%m").to_string() != "04"));
    assert_eq!(dataset.max_date(), Some(date(2024, 5, 2)));

    april.assert_async().await;
}

#[tokio::test]
async fn test_new_station_fetches_full_history() {
    let mut server = Server::new_async().await;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("NL").join("StJohns_daily_data.csv");

    for month in 1..=3 {
        server
            .mock("GET", BULK_PATH)
            .match_query(month_query("50089", 2024, month))
            .with_body("")
            .expect(1)
            .create_async()
            .await;
    }
    let april = server
        .mock("GET", BULK_PATH)
        .match_query(month_query("50089", 2024, 4))
        .with_body(bulk_csv(&days_of_month(2024, 4, 30)))
        .expect(1)
        .create_async()
        .await;

    let updater = test_updater(&server, 0);
    let report = updater
        .update_file(&station(2024, 2100), &path, date(2024, 4, 30))
        .await
        .unwrap();

    assert_eq!(report.months_requested, 4);
    assert_eq!(report.outcome, UpdateOutcome::Updated { rows_added: 30 });

    let dataset = read_dataset(&path).unwrap().unwrap();
    assert_eq!(dataset.len(), 30);
    assert_eq!(dataset.trailing_identity(), Some(("50089", "ST JOHNS")));

    let content = std::fs::read_to_string(&path).unwrap();
    let header = content.lines().next().unwrap();
    assert!(header.starts_with("Date/Time,Max Temp (°C)"));
    assert!(header.ends_with("Station Name,Station ID"));
    assert!(!header.contains("Dir of Max Gust"));

    april.assert_async().await;
}

#[tokio::test]
async fn test_all_months_empty_writes_nothing() {
    let mut server = Server::new_async().await;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("Ghost_daily_data.csv");

    server
        .mock("GET", BULK_PATH)
        .match_query(Matcher::Any)
        .with_body("")
        .expect(2)
        .create_async()
        .await;

    let updater = test_updater(&server, 0);
    let report = updater
        .update_file(&station(2024, 2024), &path, date(2024, 2, 10))
        .await
        .unwrap();

    assert_eq!(report.outcome, UpdateOutcome::FetchedNone);
    assert!(!path.exists());
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("GET", BULK_PATH)
        .match_query(month_query("50089", 2024, 1))
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let updater = test_updater(&server, 2);
    let update = updater
        .update(&station(2024, 2024), None, date(2024, 1, 20))
        .await;

    assert_eq!(update.report.outcome, UpdateOutcome::FetchedNone);
    assert_eq!(update.report.failed_months.len(), 1);
    assert!(update.dataset.is_none());

    mock.assert_async().await;
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("GET", BULK_PATH)
        .match_query(month_query("50089", 2024, 1))
        .with_status(404)
        .expect(1)
        .create_async()
        .await;

    let updater = test_updater(&server, 2);
    let update = updater
        .update(&station(2024, 2024), None, date(2024, 1, 20))
        .await;

    assert_eq!(update.report.failed_months.len(), 1);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_corrupt_dataset_aborts_without_requests() {
    let mut server = Server::new_async().await;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("Broken_daily_data.csv");
    std::fs::write(
        &path,
        "Date/Time,Max Temp (°C),Station Name,Station ID\nyesterday,1.0,X,50089\n",
    )
    .unwrap();

    let mock = server
        .mock("GET", BULK_PATH)
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let updater = test_updater(&server, 0);
    let result = updater
        .update_file(&station(2024, 2100), &path, date(2024, 5, 2))
        .await;

    assert!(result.is_err());
    mock.assert_async().await;
}
