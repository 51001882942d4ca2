use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use crate::store::error::DatasetError;
use crate::store::models::{
    DailyRecord, Measurement, StationDataset, DATE_COLUMN, STATION_ID_COLUMN, STATION_NAME_COLUMN,
};
use crate::utils::{clean_station_id, location_file_stem, parse_date};

pub const DATASET_FILE_SUFFIX: &str = "_daily_data.csv";

/// File-backed storage of one CSV dataset per station, grouped by province folder
#[derive(Debug, Clone)]
pub struct DatasetRepository {
    data_dir: PathBuf,
}

impl DatasetRepository {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn province_dir(&self, province: &str) -> PathBuf {
        self.data_dir.join(province)
    }

    /// Dataset path for a location: `<data_dir>/<PROV>/<Stem>_daily_data.csv`
    pub fn dataset_path(&self, province: &str, location_name: &str) -> PathBuf {
        self.province_dir(province).join(format!(
            "{}{DATASET_FILE_SUFFIX}",
            location_file_stem(location_name)
        ))
    }

    /// All `*.csv` files in the given province folders, sorted and de-duplicated
    ///
    /// Missing province folders are skipped.
    #[instrument(skip(self, provinces), fields(data_dir = %self.data_dir.display()))]
    pub fn scan_station_files(&self, provinces: &[String]) -> Result<Vec<PathBuf>, DatasetError> {
        let mut files = BTreeSet::new();

        for province in provinces {
            let dir = self.province_dir(province);
            if !dir.is_dir() {
                debug!("Province folder {} not found, skipping", dir.display());
                continue;
            }
            files.extend(csv_files_in(&dir)?);
        }

        debug!("Found {} dataset files", files.len());
        Ok(files.into_iter().collect())
    }
}

/// `*.csv` files directly inside `dir`, sorted
pub fn csv_files_in(dir: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    let io_err = |source| DatasetError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "csv") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Read a persisted dataset; `Ok(None)` when the file does not exist
#[instrument(skip(path), fields(path = %path.display()))]
pub fn read_dataset(path: &Path) -> Result<Option<StationDataset>, DatasetError> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(DatasetError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let dataset = parse_dataset(file, path)?;
    debug!("Read {} records", dataset.len());
    Ok(Some(dataset))
}

/// Parse dataset CSV from any reader; `path` is only used for error reporting
pub fn parse_dataset<R: Read>(reader: R, path: &Path) -> Result<StationDataset, DatasetError> {
    let csv_err = |source| DatasetError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let headers = rdr.headers().map_err(csv_err)?.clone();
    if headers.is_empty() {
        return Ok(StationDataset::default());
    }

    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut columns = BTreeSet::new();
    let mut measurement_index = Vec::new();

    for (i, name) in headers.iter().enumerate() {
        let name = name.trim().trim_start_matches('\u{feff}');
        match name {
            DATE_COLUMN | STATION_NAME_COLUMN | STATION_ID_COLUMN => {
                index.insert(name, i);
            }
            _ => match Measurement::from_column_name(name) {
                Some(m) => {
                    columns.insert(m);
                    measurement_index.push((m, i));
                }
                None => warn!(
                    "Dropping unrecognized column '{}' from {}",
                    name,
                    path.display()
                ),
            },
        }
    }

    let required = |column: &'static str| {
        index
            .get(column)
            .copied()
            .ok_or_else(|| DatasetError::MissingColumn {
                path: path.to_path_buf(),
                column,
            })
    };
    let date_idx = required(DATE_COLUMN)?;
    let name_idx = required(STATION_NAME_COLUMN)?;
    let id_idx = required(STATION_ID_COLUMN)?;

    let mut records = Vec::new();
    let mut skipped = 0;
    let mut non_finite = 0;

    for result in rdr.records() {
        let row = result.map_err(csv_err)?;
        let line = row.position().map(|p| p.line()).unwrap_or_default();
        let shape_err = |message: String| DatasetError::Shape {
            path: path.to_path_buf(),
            line,
            message,
        };

        let raw_date = row.get(date_idx).unwrap_or("").trim();
        if raw_date.is_empty() {
            skipped += 1;
            continue;
        }
        let date =
            parse_date(raw_date).ok_or_else(|| shape_err(format!("unparsable date '{raw_date}'")))?;

        let mut record = DailyRecord::new(
            date,
            row.get(name_idx).unwrap_or("").trim(),
            &clean_station_id(row.get(id_idx).unwrap_or("")),
        );

        for (measurement, i) in &measurement_index {
            let raw = row.get(*i).unwrap_or("").trim();
            if raw.is_empty() {
                continue;
            }
            let value = raw.parse::<f64>().map_err(|_| {
                shape_err(format!("unparsable value '{raw}' in column '{measurement}'"))
            })?;
            if !value.is_finite() {
                non_finite += 1;
                continue;
            }
            record.set_value(*measurement, Some(value));
        }

        records.push(record);
    }

    if skipped > 0 {
        warn!(
            "Skipped {} rows without a date in {}",
            skipped,
            path.display()
        );
    }

    if non_finite > 0 {
        warn!(
            "Treated {} NaN/infinite values as missing in {}",
            non_finite,
            path.display()
        );
    }

    Ok(StationDataset::new(columns, records))
}

/// Render a dataset as CSV text
pub fn render_dataset(dataset: &StationDataset) -> Result<Vec<u8>, csv::Error> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(dataset.header())?;

    for record in &dataset.records {
        let mut row = Vec::with_capacity(dataset.columns.len() + 3);
        row.push(record.date.format("%Y-%m-%d").to_string());
        for measurement in &dataset.columns {
            row.push(format_value(record.value(*measurement)));
        }
        row.push(record.station_name.clone());
        row.push(record.station_id.clone());
        wtr.write_record(&row)?;
    }

    wtr.into_inner().map_err(|e| csv::Error::from(e.into_error()))
}

/// Fully rewrite a dataset file, creating the province folder when needed
///
/// The new content is written to a temporary file in the same folder and then renamed over
/// the target, so readers never observe a half-written dataset.
#[instrument(skip(path, dataset), fields(path = %path.display(), records = dataset.len()))]
pub fn write_dataset(path: &Path, dataset: &StationDataset) -> Result<(), DatasetError> {
    let io_err = |source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    };

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(io_err)?;

    let bytes = render_dataset(dataset).map_err(|source| DatasetError::Csv {
        path: path.to_path_buf(),
        source,
    })?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
    temp_file.write_all(&bytes).map_err(io_err)?;

    // Temp files are created owner-only; a rewrite keeps the target's existing mode
    match fs::metadata(path) {
        Ok(metadata) => temp_file
            .as_file()
            .set_permissions(metadata.permissions())
            .map_err(io_err)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => return Err(io_err(source)),
    }

    temp_file.persist(path).map_err(|e| io_err(e.error))?;

    debug!("Wrote {} bytes", bytes.len());
    Ok(())
}

fn format_value(value: Option<f64>) -> String {
    // Debug keeps a trailing ".0" on whole numbers, matching existing files
    value.map(|v| format!("{v:?}")).unwrap_or_default()
}
