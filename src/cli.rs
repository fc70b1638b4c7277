//! CLI argument parsing for the trip-planner binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::types::MinLoadStrategy;

#[derive(Parser)]
#[command(name = "trip-planner", about = "Groups daily delivery orders into vehicle trips")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List the delivery dates found in an order sheet
    Dates {
        /// Order sheet (.csv, .xlsx, .xls)
        #[arg(long, short)]
        input: PathBuf,
    },
    /// Build and sequence trips for one delivery date
    Plan(PlanArgs),
}

#[derive(clap::Args, Debug)]
pub struct PlanArgs {
    /// Order sheet (.csv, .xlsx, .xls)
    #[arg(long, short)]
    pub input: PathBuf,

    /// Delivery date to plan (default: first date in the sheet)
    #[arg(long, short)]
    pub date: Option<String>,

    /// Output directory
    #[arg(long, default_value = "out")]
    pub out_dir: PathBuf,

    /// End each trip at its last stop instead of returning to the depot
    #[arg(long)]
    pub one_way: bool,

    /// Maximum stops per trip (capped at the routing waypoint limit)
    #[arg(long)]
    pub max_stops: Option<usize>,

    /// Vehicle class table (JSON)
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// none | exceeds-smaller-ceiling | single-order-fraction:F | total-load-fraction:F
    #[arg(long)]
    pub min_load_strategy: Option<MinLoadStrategy>,
}
