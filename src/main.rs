use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::{error, info, instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use climate_tracker::batch::{self, BatchSummary};
use climate_tracker::config::Config;
use climate_tracker::fetcher::ClimateDataFetcher;
use climate_tracker::services::{
    backfill_province, deduplicate_file, StationUpdater, UpdaterOptions,
};
use climate_tracker::store::inventory::load_inventory;
use climate_tracker::store::manifest::{build_manifest, load_manifest, target_locations, write_manifest};
use climate_tracker::store::DatasetRepository;

#[derive(Parser)]
#[command(name = "climate-tracker")]
#[command(about = "Keep per-station daily climate datasets current", long_about = None)]
struct Cli {
    /// Root folder holding one sub-folder of datasets per province
    #[arg(long, global = true, env = "CLIMATE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Number of dataset files updated concurrently
    #[arg(long, global = true, env = "UPDATE_CONCURRENCY")]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Update every existing dataset file in the configured provinces
    Update,
    /// Create or update datasets for the inventory stations listed in the location manifest
    Sync,
    /// Remove duplicate dates from every dataset in a province folder
    Dedup {
        /// Province folder; prompts when omitted
        #[arg(long)]
        province: Option<String>,
    },
    /// Fill missing max gust direction values from monthly lookups
    BackfillGust {
        #[arg(long)]
        province: String,
    },
    /// Write a location manifest from the dataset files on disk
    Manifest {
        /// Output path (defaults to LOCATIONS_JSON)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env first so RUST_LOG from it applies
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,climate_tracker=debug")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency.max(1);
    }
    info!("Starting climate tracker with config: {:?}", config);

    let repo = DatasetRepository::new(config.data_dir.clone());

    match cli.command {
        Command::Update => run_update(&config, &repo).await,
        Command::Sync => run_sync(&config, &repo).await,
        Command::Dedup { province } => run_dedup(&repo, province),
        Command::BackfillGust { province } => run_backfill(&config, &repo, &province).await,
        Command::Manifest { output } => {
            let output = output.unwrap_or_else(|| config.locations_path.clone());
            let manifest = build_manifest(repo.data_dir())?;
            write_manifest(&output, &manifest)?;
            println!("Wrote {} provinces to {}", manifest.len(), output.display());
            Ok(())
        }
    }
}

fn build_updater(config: &Config) -> Result<StationUpdater, Box<dyn std::error::Error>> {
    let fetcher = ClimateDataFetcher::new(config.base_url.clone(), config.request_timeout())?;
    let options = UpdaterOptions {
        request_delay: config.request_delay(),
        retry_attempts: config.retry_attempts,
        ..UpdaterOptions::default()
    };
    Ok(StationUpdater::new(fetcher, options))
}

#[instrument(skip(config, repo))]
async fn run_update(
    config: &Config,
    repo: &DatasetRepository,
) -> Result<(), Box<dyn std::error::Error>> {
    let jobs = batch::jobs_from_data_dir(repo, &config.provinces)?;
    if jobs.is_empty() {
        println!("No dataset files found under {}", repo.data_dir().display());
        return Ok(());
    }

    let updater = build_updater(config)?;
    run_jobs(&updater, jobs, config.concurrency).await
}

#[instrument(skip(config, repo))]
async fn run_sync(
    config: &Config,
    repo: &DatasetRepository,
) -> Result<(), Box<dyn std::error::Error>> {
    // Both inputs are required before any request goes out
    let manifest = load_manifest(&config.locations_path)?;
    let inventory = load_inventory(&config.inventory_path)?;

    let targets = target_locations(&manifest);
    let jobs = batch::jobs_from_inventory(repo, &inventory, &targets);
    info!(
        "{} of {} inventory stations match {} target locations",
        jobs.iter().map(|j| j.stations.len()).sum::<usize>(),
        inventory.len(),
        targets.len()
    );

    let updater = build_updater(config)?;
    run_jobs(&updater, jobs, config.concurrency).await
}

async fn run_jobs(
    updater: &StationUpdater,
    jobs: Vec<batch::StationJob>,
    concurrency: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let start_time = Instant::now();
    let today = Local::now().date_naive();

    let summary = batch::run_batch(updater, jobs, concurrency, today).await;
    print_summary(&summary, start_time);

    if summary.failed > 0 {
        return Err(format!("{} dataset files failed to update", summary.failed).into());
    }
    Ok(())
}

fn print_summary(summary: &BatchSummary, start_time: Instant) {
    println!("\n============================================================");
    println!("Climate Data Update Summary");
    println!("============================================================");
    println!("Stations:           {}", summary.total());
    println!("Updated:            {}", summary.updated);
    println!("Unchanged:          {}", summary.unchanged);
    println!("No new data:        {}", summary.no_data);
    println!("Failed:             {}", summary.failed);
    println!("Skipped months:     {}", summary.month_failures);
    println!("------------------------------------------------------------");
    println!("Total Time:         {:.2}s", start_time.elapsed().as_secs_f64());
    println!("============================================================");

    if !summary.failures.is_empty() {
        println!("\nFailed Datasets:");
        for (path, error) in &summary.failures {
            println!("  {path}: {error}");
        }
    }
}

fn run_dedup(
    repo: &DatasetRepository,
    province: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let province = match province {
        Some(province) => province,
        None => prompt_province(repo)?,
    };
    let province = province.trim().to_uppercase();

    let files = repo.scan_station_files(&[province.clone()])?;
    if files.is_empty() {
        println!("No dataset files found for {province}");
        return Ok(());
    }

    let mut rewritten = 0;
    let mut failed = 0;
    for path in &files {
        match deduplicate_file(path) {
            Ok(outcome) => {
                if outcome.rewritten {
                    rewritten += 1;
                }
            }
            Err(e) => {
                error!("Failed to deduplicate {}: {}", path.display(), e);
                failed += 1;
            }
        }
    }

    println!(
        "Processed {} files in {}: {} rewritten, {} failed",
        files.len(),
        province,
        rewritten,
        failed
    );
    Ok(())
}

fn prompt_province(repo: &DatasetRepository) -> Result<String, Box<dyn std::error::Error>> {
    let mut provinces: Vec<String> = std::fs::read_dir(repo.data_dir())?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    provinces.sort();

    println!("Available provinces: {}", provinces.join(", "));
    print!("Enter province code: ");
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    let choice = input.trim().to_uppercase();

    if !provinces.contains(&choice) {
        return Err(format!("Unknown province '{choice}'").into());
    }
    Ok(choice)
}

#[instrument(skip(config, repo))]
async fn run_backfill(
    config: &Config,
    repo: &DatasetRepository,
    province: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let fetcher = ClimateDataFetcher::new(config.base_url.clone(), config.request_timeout())?;
    let province = province.trim().to_uppercase();

    let report = backfill_province(&fetcher, repo, &province, config.request_delay()).await?;

    println!(
        "Gust direction backfill for {}: {} missing, {} filled, {} lookups failed, {} without station id, {} files failed",
        province,
        report.missing,
        report.filled,
        report.failed,
        report.skipped,
        report.files_failed
    );
    Ok(())
}
