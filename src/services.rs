pub mod gust_backfill;
pub mod reconciler;
pub mod station_updater;

pub use gust_backfill::{backfill_province, BackfillReport, GustDirectionCache};
pub use reconciler::{deduplicate_file, reconcile, DedupOutcome};
pub use station_updater::{StationUpdater, UpdateError, UpdateOutcome, UpdateReport, UpdaterOptions};
