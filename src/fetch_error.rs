/// Failure to fetch one station-month (or station-day) from the bulk data endpoint
///
/// Every variant names the station and period so a failure in a batch run can be traced
/// back to the request that caused it. These are recoverable by skipping that unit.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed for station {station_id} ({period}): {source}")]
    Request {
        station_id: String,
        period: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Server returned {status} for station {station_id} ({period})")]
    Status {
        station_id: String,
        period: String,
        status: reqwest::StatusCode,
    },

    #[error("Failed to parse CSV for station {station_id} ({period}): {message}")]
    Parse {
        station_id: String,
        period: String,
        message: String,
    },
}

impl FetchError {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Request { source, .. } => {
                source.is_timeout() || source.is_connect()
            }
            FetchError::Status { status, .. } => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            FetchError::Parse { .. } => false,
        }
    }

    pub fn station_id(&self) -> &str {
        match self {
            FetchError::Request { station_id, .. }
            | FetchError::Status { station_id, .. }
            | FetchError::Parse { station_id, .. } => station_id,
        }
    }
}
