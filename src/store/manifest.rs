use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::config::{require_file, ConfigError};
use crate::store::dataset_repository::csv_files_in;
use crate::store::error::DatasetError;
use crate::utils::{normalize_location_name, smart_title_case};

static DATASET_FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<stem>.+)_daily_data\.csv$").expect("dataset file name pattern is valid")
});

/// One dashboard location; only `label` takes part in target matching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationEntry {
    pub label: String,
    pub file: String,
}

/// Province code to the locations kept current for it
pub type LocationManifest = BTreeMap<String, Vec<LocationEntry>>;

#[instrument(skip(path), fields(path = %path.display()))]
pub fn load_manifest(path: &Path) -> Result<LocationManifest, ConfigError> {
    require_file(path)?;

    let text = fs::read_to_string(path).map_err(|e| ConfigError::InvalidInput {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    serde_json::from_str(&text).map_err(|e| ConfigError::InvalidInput {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Normalized labels of every location in the manifest
pub fn target_locations(manifest: &LocationManifest) -> HashSet<String> {
    manifest
        .values()
        .flatten()
        .map(|entry| normalize_location_name(&entry.label))
        .collect()
}

/// Build a manifest from the dataset files found under `data_dir`
///
/// Each `<PROV>/<Stem>_daily_data.csv` becomes an entry labelled with the title-cased stem,
/// underscores replaced by spaces. Provinces without dataset files are left out.
#[instrument(skip(data_dir), fields(data_dir = %data_dir.display()))]
pub fn build_manifest(data_dir: &Path) -> Result<LocationManifest, DatasetError> {
    let mut manifest = LocationManifest::new();

    let entries = fs::read_dir(data_dir).map_err(|source| DatasetError::Io {
        path: data_dir.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let province_dir = entry
            .map_err(|source| DatasetError::Io {
                path: data_dir.to_path_buf(),
                source,
            })?
            .path();
        if !province_dir.is_dir() {
            continue;
        }
        let Some(province) = province_dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let locations: Vec<LocationEntry> = csv_files_in(&province_dir)?
            .iter()
            .filter_map(|path| {
                let file_name = path.file_name()?.to_str()?;
                let stem = DATASET_FILE_NAME.captures(file_name)?.name("stem")?.as_str();
                Some(LocationEntry {
                    label: smart_title_case(&stem.replace('_', " ")),
                    file: format!("{}/{province}/{file_name}", data_dir.display()),
                })
            })
            .collect();

        if !locations.is_empty() {
            manifest.insert(province.to_string(), locations);
        }
    }

    let total: usize = manifest.values().map(Vec::len).sum();
    info!("Built manifest with {} locations", total);
    Ok(manifest)
}

pub fn write_manifest(path: &Path, manifest: &LocationManifest) -> Result<(), DatasetError> {
    let json = serde_json::to_string_pretty(manifest).map_err(|source| DatasetError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })
}
