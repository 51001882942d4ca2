use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;

pub const DATE_COLUMN: &str = "Date/Time";
pub const STATION_NAME_COLUMN: &str = "Station Name";
pub const STATION_ID_COLUMN: &str = "Station ID";

/// Measurement columns understood by the tracker, in output column order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Measurement {
    MaxTemp,
    MinTemp,
    MeanTemp,
    TotalRain,
    TotalSnow,
    TotalPrecip,
    SnowOnGround,
    MaxGustSpeed,
    MaxGustDirection,
}

impl Measurement {
    pub const ALL: [Measurement; 9] = [
        Measurement::MaxTemp,
        Measurement::MinTemp,
        Measurement::MeanTemp,
        Measurement::TotalRain,
        Measurement::TotalSnow,
        Measurement::TotalPrecip,
        Measurement::SnowOnGround,
        Measurement::MaxGustSpeed,
        Measurement::MaxGustDirection,
    ];

    /// Measurements that count towards completeness. Gust direction is backfilled
    /// separately and is not part of a monthly fetch.
    pub const OBSERVED: [Measurement; 8] = [
        Measurement::MaxTemp,
        Measurement::MinTemp,
        Measurement::MeanTemp,
        Measurement::TotalRain,
        Measurement::TotalSnow,
        Measurement::TotalPrecip,
        Measurement::SnowOnGround,
        Measurement::MaxGustSpeed,
    ];

    pub fn column_name(self) -> &'static str {
        match self {
            Measurement::MaxTemp => "Max Temp (°C)",
            Measurement::MinTemp => "Min Temp (°C)",
            Measurement::MeanTemp => "Mean Temp (°C)",
            Measurement::TotalRain => "Total Rain (mm)",
            Measurement::TotalSnow => "Total Snow (cm)",
            Measurement::TotalPrecip => "Total Precip (mm)",
            Measurement::SnowOnGround => "Snow on Grnd (cm)",
            Measurement::MaxGustSpeed => "Spd of Max Gust (km/h)",
            Measurement::MaxGustDirection => "Dir of Max Gust (10s deg)",
        }
    }

    pub fn from_column_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.into_iter().find(|m| m.column_name() == name)
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

/// One calendar day of observations for one station
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub max_temp_c: Option<f64>,
    pub min_temp_c: Option<f64>,
    pub mean_temp_c: Option<f64>,
    pub total_rain_mm: Option<f64>,
    pub total_snow_cm: Option<f64>,
    pub total_precip_mm: Option<f64>,
    pub snow_on_ground_cm: Option<f64>,
    pub max_gust_speed_kmh: Option<f64>,
    pub max_gust_dir_10s_deg: Option<f64>,
    pub station_name: String,
    pub station_id: String,
}

impl DailyRecord {
    /// Record with no measurements for the given day
    pub fn new(date: NaiveDate, station_name: &str, station_id: &str) -> Self {
        Self {
            date,
            max_temp_c: None,
            min_temp_c: None,
            mean_temp_c: None,
            total_rain_mm: None,
            total_snow_cm: None,
            total_precip_mm: None,
            snow_on_ground_cm: None,
            max_gust_speed_kmh: None,
            max_gust_dir_10s_deg: None,
            station_name: station_name.to_string(),
            station_id: station_id.to_string(),
        }
    }

    pub fn value(&self, measurement: Measurement) -> Option<f64> {
        match measurement {
            Measurement::MaxTemp => self.max_temp_c,
            Measurement::MinTemp => self.min_temp_c,
            Measurement::MeanTemp => self.mean_temp_c,
            Measurement::TotalRain => self.total_rain_mm,
            Measurement::TotalSnow => self.total_snow_cm,
            Measurement::TotalPrecip => self.total_precip_mm,
            Measurement::SnowOnGround => self.snow_on_ground_cm,
            Measurement::MaxGustSpeed => self.max_gust_speed_kmh,
            Measurement::MaxGustDirection => self.max_gust_dir_10s_deg,
        }
    }

    pub fn set_value(&mut self, measurement: Measurement, value: Option<f64>) {
        let slot = match measurement {
            Measurement::MaxTemp => &mut self.max_temp_c,
            Measurement::MinTemp => &mut self.min_temp_c,
            Measurement::MeanTemp => &mut self.mean_temp_c,
            Measurement::TotalRain => &mut self.total_rain_mm,
            Measurement::TotalSnow => &mut self.total_snow_cm,
            Measurement::TotalPrecip => &mut self.total_precip_mm,
            Measurement::SnowOnGround => &mut self.snow_on_ground_cm,
            Measurement::MaxGustSpeed => &mut self.max_gust_speed_kmh,
            Measurement::MaxGustDirection => &mut self.max_gust_dir_10s_deg,
        };
        *slot = value;
    }

    /// Number of observed measurements present
    pub fn completeness(&self) -> usize {
        Measurement::OBSERVED
            .iter()
            .filter(|m| self.value(**m).is_some())
            .count()
    }

    /// False for "no observation" rows where every observed measurement is missing
    pub fn has_observation(&self) -> bool {
        self.completeness() > 0
    }
}

/// Date-ordered records for one station plus the measurement columns its file carries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationDataset {
    pub columns: BTreeSet<Measurement>,
    pub records: Vec<DailyRecord>,
}

impl StationDataset {
    pub fn new(columns: BTreeSet<Measurement>, records: Vec<DailyRecord>) -> Self {
        Self { columns, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn max_date(&self) -> Option<NaiveDate> {
        self.records.iter().map(|r| r.date).max()
    }

    pub fn dates(&self) -> HashSet<NaiveDate> {
        self.records.iter().map(|r| r.date).collect()
    }

    /// Station identity taken from the trailing row, which holds the most recent station id
    pub fn trailing_identity(&self) -> Option<(&str, &str)> {
        self.records
            .last()
            .map(|r| (r.station_id.as_str(), r.station_name.as_str()))
    }

    /// CSV header: date, measurement columns present, then station name and id
    pub fn header(&self) -> Vec<&'static str> {
        let mut header = vec![DATE_COLUMN];
        header.extend(self.columns.iter().map(|m| m.column_name()));
        header.push(STATION_NAME_COLUMN);
        header.push(STATION_ID_COLUMN);
        header
    }
}

/// Reference data for one observation site, as listed in the station inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Station {
    pub station_id: String,
    pub name: String,
    pub province: String,
    pub first_year: i32,
    pub last_year: i32,
}

/// A calendar month, ordered chronologically
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    pub fn of(date: NaiveDate) -> Self {
        Self::new(date.year(), date.month())
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self::new(self.year + 1, 1)
        } else {
            Self::new(self.year, self.month + 1)
        }
    }

    /// Every month from `self` through `end`, inclusive; empty when `end` is earlier
    pub fn through(self, end: YearMonth) -> Vec<YearMonth> {
        let mut months = Vec::new();
        let mut current = self;
        while current <= end {
            months.push(current);
            current = current.next();
        }
        months
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}
