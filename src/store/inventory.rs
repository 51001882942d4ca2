use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;
use tracing::{debug, info, instrument, warn};

use crate::config::{require_file, ConfigError};
use crate::store::models::Station;

const DEFAULT_FIRST_YEAR: i32 = 1900;
const DEFAULT_LAST_YEAR: i32 = 2100;

/// Load the station inventory CSV
///
/// A missing or unreadable inventory is a configuration error: the batch cannot start
/// without it.
#[instrument(skip(path), fields(path = %path.display()))]
pub fn load_inventory(path: &Path) -> Result<Vec<Station>, ConfigError> {
    require_file(path)?;

    let file = File::open(path).map_err(|e| ConfigError::InvalidInput {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let stations = parse_inventory(file).map_err(|message| ConfigError::InvalidInput {
        path: path.to_path_buf(),
        message,
    })?;

    info!("Loaded {} stations from inventory", stations.len());
    Ok(stations)
}

/// Column positions resolved from the inventory header row
struct InventoryColumns {
    name: usize,
    province: usize,
    station_id: usize,
    dly_first_year: Option<usize>,
    first_year: Option<usize>,
    dly_last_year: Option<usize>,
    last_year: Option<usize>,
}

impl InventoryColumns {
    /// Recognizes the header row; the published inventory has a few preamble lines before it
    fn from_header(record: &StringRecord) -> Option<Self> {
        let find = |name: &str| {
            record
                .iter()
                .position(|field| field.trim().trim_start_matches('\u{feff}') == name)
        };

        Some(Self {
            name: find("Name")?,
            province: find("Province")?,
            station_id: find("Station ID")?,
            dly_first_year: find("DLY First Year"),
            first_year: find("First Year"),
            dly_last_year: find("DLY Last Year"),
            last_year: find("Last Year"),
        })
    }
}

/// Parse inventory rows, skipping rows without a station id or with an inverted year range
pub fn parse_inventory<R: Read>(reader: R) -> Result<Vec<Station>, String> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut columns: Option<InventoryColumns> = None;
    let mut stations = Vec::new();
    let mut skipped = 0;

    for result in rdr.records() {
        let record = result.map_err(|e| e.to_string())?;

        if columns.is_none() {
            columns = InventoryColumns::from_header(&record);
            continue;
        }
        let Some(cols) = columns.as_ref() else {
            continue;
        };

        let field = |idx: usize| record.get(idx).map(str::trim).unwrap_or("");

        let station_id = field(cols.station_id);
        if station_id.is_empty() {
            skipped += 1;
            continue;
        }

        let first_year = year_field(&record, cols.dly_first_year, cols.first_year, DEFAULT_FIRST_YEAR);
        let last_year = year_field(&record, cols.dly_last_year, cols.last_year, DEFAULT_LAST_YEAR);
        let (Some(first_year), Some(last_year)) = (first_year, last_year) else {
            warn!("Skipping station {} with unparsable coverage years", station_id);
            skipped += 1;
            continue;
        };
        if first_year > last_year {
            skipped += 1;
            continue;
        }

        stations.push(Station {
            station_id: station_id.to_string(),
            name: field(cols.name).to_string(),
            province: province_code(field(cols.province)),
            first_year,
            last_year,
        });
    }

    if columns.is_none() {
        return Err("no header row with Name, Province and Station ID columns".to_string());
    }

    debug!("Parsed {} stations, skipped {} rows", stations.len(), skipped);
    Ok(stations)
}

/// Daily coverage year, falling back to overall coverage and then to `default`
///
/// `None` when the chosen cell is present but not a year.
fn year_field(
    record: &StringRecord,
    daily: Option<usize>,
    overall: Option<usize>,
    default: i32,
) -> Option<i32> {
    [daily, overall]
        .into_iter()
        .flatten()
        .filter_map(|idx| record.get(idx).map(str::trim))
        .find(|value| !value.is_empty())
        .map_or(Some(default), |value| {
            value
                .parse::<f64>()
                .ok()
                .filter(|y| y.fract() == 0.0)
                .map(|y| y as i32)
        })
}

/// Map an inventory province name to the folder code used for datasets
pub fn province_code(province: &str) -> String {
    let upper = province.trim().to_uppercase();
    let code = match upper.as_str() {
        "NEWFOUNDLAND" | "NEWFOUNDLAND AND LABRADOR" | "NEWFOUNDLAND & LABRADOR" => "NL",
        "NOVA SCOTIA" => "NS",
        "PRINCE EDWARD ISLAND" => "PEI",
        "NEW BRUNSWICK" => "NB",
        "QUEBEC" | "QUÉBEC" => "QC",
        "ONTARIO" => "ON",
        "MANITOBA" => "MB",
        "SASKATCHEWAN" => "SK",
        "ALBERTA" => "AB",
        "BRITISH COLUMBIA" => "BC",
        "YUKON" | "YUKON TERRITORY" => "YT",
        "NORTHWEST TERRITORIES" => "NT",
        "NUNAVUT" => "NU",
        _ => {
            let is_code = (2..=4).contains(&upper.chars().count())
                && upper.chars().all(|c| c.is_ascii_uppercase());
            return if is_code {
                upper
            } else {
                upper.chars().take(2).collect()
            };
        }
    };
    code.to_string()
}
