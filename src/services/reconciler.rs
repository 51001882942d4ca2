use std::path::Path;

use tracing::{debug, info, instrument};

use crate::store::dataset_repository::{read_dataset, write_dataset};
use crate::store::{DatasetError, StationDataset};

/// Merge incoming records into an existing dataset, one record per calendar date
///
/// Records with no observed measurement are dropped. When several records share a date the
/// one with the most observed measurements wins; on a tie the one encountered first (existing
/// before incoming, then file order) is kept. The result is sorted by date and carries the
/// union of both column sets.
pub fn reconcile(existing: StationDataset, incoming: StationDataset) -> StationDataset {
    let mut columns = existing.columns;
    columns.extend(incoming.columns);

    let total = existing.records.len() + incoming.records.len();
    let mut records: Vec<_> = existing
        .records
        .into_iter()
        .chain(incoming.records)
        .filter(|r| r.has_observation())
        .collect();
    let observed = records.len();

    // Stable sort: equal (date, completeness) keeps encounter order
    records.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| b.completeness().cmp(&a.completeness()))
    });
    records.dedup_by_key(|r| r.date);

    debug!(
        "Reconciled {} records: {} without observations, {} duplicate dates removed",
        total,
        total - observed,
        observed - records.len()
    );

    StationDataset::new(columns, records)
}

/// Before/after record counts of a duplicate-date cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupOutcome {
    pub before: usize,
    pub after: usize,
    pub rewritten: bool,
}

/// Collapse duplicate dates in a persisted dataset file, rewriting it only when it changed
#[instrument(skip(path), fields(path = %path.display()))]
pub fn deduplicate_file(path: &Path) -> Result<DedupOutcome, DatasetError> {
    let existing = read_dataset(path)?.unwrap_or_default();
    let before = existing.len();

    let cleaned = reconcile(existing.clone(), StationDataset::default());
    let rewritten = cleaned != existing;
    if rewritten {
        write_dataset(path, &cleaned)?;
    }

    info!(
        "Processed {}: {} -> {} records",
        path.display(),
        before,
        cleaned.len()
    );

    Ok(DedupOutcome {
        before,
        after: cleaned.len(),
        rewritten,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DailyRecord, Measurement};
    use chrono::NaiveDate;
    use std::collections::{BTreeSet, HashSet};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(d: NaiveDate, values: &[(Measurement, f64)]) -> DailyRecord {
        let mut record = DailyRecord::new(d, "GANDER INTL A", "51337");
        for (m, v) in values {
            record.set_value(*m, Some(*v));
        }
        record
    }

    fn dataset(records: Vec<DailyRecord>) -> StationDataset {
        let columns = BTreeSet::from([
            Measurement::MaxTemp,
            Measurement::MinTemp,
            Measurement::TotalPrecip,
        ]);
        StationDataset::new(columns, records)
    }

    #[test]
    fn test_richer_duplicate_wins() {
        let sparse = record(date(2024, 3, 1), &[(Measurement::MaxTemp, 1.0)]);
        let rich = record(
            date(2024, 3, 1),
            &[(Measurement::MaxTemp, 1.5), (Measurement::MinTemp, -2.0)],
        );

        let result = reconcile(dataset(vec![sparse]), dataset(vec![rich.clone()]));

        assert_eq!(result.records, vec![rich]);
    }

    #[test]
    fn test_tie_keeps_first_encountered() {
        let first = record(date(2024, 3, 1), &[(Measurement::MaxTemp, 1.0)]);
        let second = record(date(2024, 3, 1), &[(Measurement::MinTemp, -1.0)]);

        let result = reconcile(dataset(vec![first.clone()]), dataset(vec![second]));

        assert_eq!(result.records, vec![first]);
    }

    #[test]
    fn test_drops_rows_without_observations() {
        let empty = DailyRecord::new(date(2024, 3, 2), "GANDER INTL A", "51337");
        let mut gust_only = empty.clone();
        gust_only.date = date(2024, 3, 3);
        gust_only.set_value(Measurement::MaxGustDirection, Some(27.0));
        let kept = record(date(2024, 3, 1), &[(Measurement::TotalPrecip, 0.0)]);

        let result = reconcile(
            StationDataset::default(),
            dataset(vec![empty, gust_only, kept.clone()]),
        );

        assert_eq!(result.records, vec![kept]);
    }

    #[test]
    fn test_output_sorted_with_unique_dates() {
        let records = vec![
            record(date(2024, 3, 5), &[(Measurement::MaxTemp, 5.0)]),
            record(date(2024, 3, 1), &[(Measurement::MaxTemp, 1.0)]),
            record(date(2024, 3, 5), &[(Measurement::MinTemp, 0.5)]),
            record(date(2024, 2, 28), &[(Measurement::MaxTemp, -1.0)]),
        ];

        let result = reconcile(dataset(records), StationDataset::default());

        let dates: Vec<NaiveDate> = result.records.iter().map(|r| r.date).collect();
        assert_eq!(
            dates,
            vec![date(2024, 2, 28), date(2024, 3, 1), date(2024, 3, 5)]
        );
        let unique: HashSet<NaiveDate> = dates.iter().copied().collect();
        assert_eq!(unique.len(), dates.len());
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let existing = dataset(vec![
            record(date(2024, 3, 1), &[(Measurement::MaxTemp, 1.0)]),
            record(date(2024, 3, 2), &[(Measurement::MaxTemp, 2.0)]),
        ]);
        let incoming = dataset(vec![
            record(
                date(2024, 3, 2),
                &[(Measurement::MaxTemp, 2.0), (Measurement::MinTemp, 0.0)],
            ),
            record(date(2024, 3, 3), &[(Measurement::TotalPrecip, 3.2)]),
        ]);

        let once = reconcile(existing, incoming);
        let twice = reconcile(once.clone(), StationDataset::default());

        assert_eq!(twice, once);
        assert_eq!(once.len(), 3);
    }

    #[test]
    fn test_full_month_into_empty_dataset() {
        let all = Measurement::OBSERVED.map(|m| (m, 1.0));
        let month: Vec<DailyRecord> = (1..=30)
            .rev()
            .map(|d| record(date(2024, 4, d), &all))
            .collect();

        let result = reconcile(StationDataset::default(), dataset(month));

        assert_eq!(result.len(), 30);
        assert!(result.records.windows(2).all(|w| w[0].date < w[1].date));
        assert_eq!(result.records[0].date, date(2024, 4, 1));
    }

    #[test]
    fn test_columns_are_unioned() {
        let mut incoming = dataset(vec![]);
        incoming.columns.insert(Measurement::MaxGustSpeed);

        let result = reconcile(dataset(vec![]), incoming);

        assert!(result.columns.contains(&Measurement::MaxGustSpeed));
        assert!(result.columns.contains(&Measurement::MaxTemp));
    }

    #[test]
    fn test_deduplicate_file_rewrites_only_when_changed() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("Gander_daily_data.csv");
        std::fs::write(
            &path,
            "Date/Time,Max Temp (°C),Min Temp (°C),Station Name,Station ID\n\
             2024-03-01,1.0,,GANDER,51337\n\
             2024-03-01,1.0,-3.0,GANDER,51337\n\
             2024-03-02,2.0,-1.0,GANDER,51337\n",
        )
        .unwrap();

        let outcome = deduplicate_file(&path).unwrap();
        assert_eq!(
            outcome,
            DedupOutcome {
                before: 3,
                after: 2,
                rewritten: true
            }
        );

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("2024-03-01,1.0,-3.0,GANDER,51337"));

        let again = deduplicate_file(&path).unwrap();
        assert!(!again.rewritten);
        assert_eq!(again.after, 2);
    }
}
