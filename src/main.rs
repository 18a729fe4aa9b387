use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;

use block_atlas_server::config::{AppConfig, Environment};
use block_atlas_server::gtfs_time::{format_time_of_day, parse_time_of_day};
use block_atlas_server::ScheduleIndex;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON config file
    #[arg(short = 'f', long = "config", global = true)]
    config: Option<PathBuf>,
    /// SQLite database file, or `:memory:`
    #[arg(long, global = true)]
    data_path: Option<String>,
    #[arg(long, value_enum, global = true)]
    env: Option<Environment>,
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Replace the stored schedule with an unpacked GTFS folder
    Import {
        #[arg(long)]
        gtfs: PathBuf,
    },
    /// Recompute the block trip index from the stored schedule
    RebuildIndex,
    /// Service ids running on a date
    ActiveServices {
        /// YYYYMMDD
        #[arg(long)]
        date: String,
    },
    /// The trip most recently started on a route
    ActiveTripForRoute {
        #[arg(long)]
        route: String,
        #[arg(long)]
        date: String,
        /// Seconds since midnight or HH:MM:SS
        #[arg(long, value_parser = parse_time_arg)]
        time: i64,
        /// Oldest end time still accepted, defaults to --time
        #[arg(long, value_parser = parse_time_arg)]
        from: Option<i64>,
    },
    /// The trip a block is running at a time
    ActiveTripInBlock {
        #[arg(long)]
        block: String,
        #[arg(long)]
        date: String,
        #[arg(long, value_parser = parse_time_arg)]
        time: i64,
    },
    /// Active trips for several blocks at once
    ActiveTripsForBlocks {
        #[arg(long, value_delimiter = ',', required = true)]
        blocks: Vec<String>,
        #[arg(long)]
        date: String,
        #[arg(long, value_parser = parse_time_arg)]
        time: i64,
    },
    /// Arrivals and departures at a stop within a time window
    Departures {
        #[arg(long)]
        stop: String,
        #[arg(long, value_parser = parse_time_arg)]
        start: i64,
        #[arg(long, value_parser = parse_time_arg)]
        end: i64,
    },
    /// Print the effective configuration
    DumpConfig,
}

fn parse_time_arg(value: &str) -> std::result::Result<i64, String> {
    parse_time_of_day(value).map_err(|e| e.to_string())
}

fn effective_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load_from_file(path)?,
        None => AppConfig::default(),
    };
    config.apply_env_overrides();
    if let Some(data_path) = &args.data_path {
        config.data_path = data_path.clone();
    }
    if let Some(env) = args.env {
        config.env = env;
    }
    config.verbose |= args.verbose;
    config.validate()?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn services_on(index: &ScheduleIndex, date: &str) -> Result<BTreeSet<String>> {
    let services = index.active_service_ids(date).await?;
    log::debug!("Active services on {}: {:?}", date, services);
    Ok(services)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = effective_config(&args)?;
    simple_logger::SimpleLogger::new()
        .with_level(config.log_level())
        .init()?;

    if let Commands::DumpConfig = args.command {
        return print_json(&config);
    }

    log::info!("Opening schedule store {:?} ({:?})", config.data_path, config.env);
    let index = ScheduleIndex::open(&config).await?;

    match args.command {
        Commands::Import { gtfs } => {
            let summary = index.import_gtfs_folder(&gtfs).await?;
            print_json(&summary)?;
        }
        Commands::RebuildIndex => {
            let summary = index.rebuild().await?;
            print_json(&summary)?;
        }
        Commands::ActiveServices { date } => {
            print_json(&services_on(&index, &date).await?)?;
        }
        Commands::ActiveTripForRoute {
            route,
            date,
            time,
            from,
        } => {
            let services = services_on(&index, &date).await?;
            log::info!("Matching route {} at {}", route, format_time_of_day(time));
            let trip = index
                .find_active_trip_for_route(&route, time, from.unwrap_or(time), &services)
                .await?;
            print_json(&trip)?;
        }
        Commands::ActiveTripInBlock { block, date, time } => {
            let services = services_on(&index, &date).await?;
            log::info!("Matching block {} at {}", block, format_time_of_day(time));
            let trip = index
                .find_active_trip_in_block(&block, time, &services)
                .await?;
            print_json(&trip)?;
        }
        Commands::ActiveTripsForBlocks { blocks, date, time } => {
            let services = services_on(&index, &date).await?;
            log::info!("Matching {} blocks at {}", blocks.len(), format_time_of_day(time));
            let trips = index
                .find_active_trips_for_blocks(&blocks, time, &services)
                .await?;
            print_json(&trips)?;
        }
        Commands::Departures { stop, start, end } => {
            log::info!(
                "Events at stop {} between {} and {}",
                stop,
                format_time_of_day(start),
                format_time_of_day(end)
            );
            let events = index
                .arrivals_departures_for_stop(&stop, start, end)
                .await?;
            print_json(&events)?;
        }
        Commands::DumpConfig => {}
    }
    Ok(())
}
