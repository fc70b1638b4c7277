//! Trip Planner - groups a day's delivery orders into vehicle trips
//!
//! Reads an order sheet, geocodes addresses, builds capacity-feasible trips,
//! sequences their stops and writes the plan as CSV and render JSON.

mod cli;
mod config;
mod defaults;
mod services;
mod types;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command, PlanArgs};
use config::Config;
use services::catalog::OrderCatalog;
use services::export::write_plan_files;
use services::geocoding::create_geocoder;
use services::planner::{PlanSettings, Planner};
use services::routing::create_routing_service_with_fallback;
use services::vehicle_rules::VehicleRules;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration (also reads .env)
    let config = Config::from_env()?;

    std::fs::create_dir_all(&config.logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &config.logs_dir, "trip-planner.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stdout and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,trip_planner=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer()) // stdout
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false)) // file
        .init();

    match cli.command {
        Command::Dates { input } => run_dates(&input),
        Command::Plan(args) => run_plan(config, args).await,
    }
}

fn run_dates(input: &std::path::Path) -> Result<()> {
    let catalog = OrderCatalog::from_path(input)?;
    for date in catalog.dates() {
        println!("{}", date);
    }
    Ok(())
}

/// Vehicle table from the configured file or the built-in defaults
fn load_rules(config: &Config, args: &PlanArgs) -> Result<VehicleRules> {
    let rules = match &config.vehicle_rules_path {
        Some(path) => VehicleRules::from_json_path(path)?,
        None => VehicleRules::default_table(&config.retail_channel, &config.strict_channel),
    };

    let rules = match args.min_load_strategy {
        Some(strategy) => rules.with_min_load_strategy(strategy)?,
        None => rules,
    };

    for class in rules.classes() {
        info!(
            "Vehicle class {}: {} kg, {} drops, min load {}",
            class.label,
            class.max_weight_kg,
            class.max_drops,
            class.min_load.name()
        );
    }
    Ok(rules)
}

async fn run_plan(mut config: Config, args: PlanArgs) -> Result<()> {
    if args.one_way {
        config.round_trip = false;
    }
    if let Some(max_stops) = args.max_stops {
        config.max_stops = max_stops.max(1);
    }
    if let Some(path) = &args.rules {
        config.vehicle_rules_path = Some(path.clone());
    }

    let rules = load_rules(&config, &args)?;

    let catalog = OrderCatalog::from_path(&args.input)?;
    let date = match &args.date {
        Some(date) => date.clone(),
        None => catalog
            .dates()
            .into_iter()
            .next()
            .with_context(|| format!("No delivery dates in {}", args.input.display()))?,
    };
    let daily = catalog.orders_for(&date, &config.channel_tags);
    if daily.orders.is_empty() {
        warn!("No orders for date {}", date);
    }
    if !daily.issues.is_empty() {
        info!("{} import issues ({} warnings)", daily.issues.len(), daily.warning_count());
    }

    let geocoder = create_geocoder(&config.geocoder)?;
    let routing = create_routing_service_with_fallback(config.valhalla_url.as_deref()).await;

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, finishing with what has been computed");
            ctrl_c_token.cancel();
        }
    });

    let planner = Planner::new(
        PlanSettings::from_config(&config),
        &rules,
        geocoder.as_ref(),
        routing.as_ref(),
        cancel,
    );
    let report = planner.plan(daily.orders).await;

    let files = write_plan_files(&args.out_dir, &date, &report)?;

    let stats = &report.stats;
    info!(
        "Date {}: {} orders → {} trips ({} oversized), {} leftovers, {} geocode failures, {} routing failures, {} skipped",
        date,
        stats.orders,
        stats.trips,
        stats.oversized_trips,
        stats.leftovers,
        stats.geocode_failures,
        stats.routing_failures,
        stats.skipped_trips
    );
    println!("{}", files.trip_plan.display());
    println!("{}", files.leftovers.display());
    println!("{}", files.render.display());

    Ok(())
}
