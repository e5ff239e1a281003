//! Command line interface.

use std::path::PathBuf;

use clap::Parser;

/// Queue-driven render worker.
#[derive(Debug, Parser)]
#[command(name = "pixelq", version, about)]
pub struct Cli {
    /// Number of jobs processed at the same time (overrides the config file)
    #[arg(long = "num_process", value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub num_process: Option<u32>,

    /// Path to the configuration file
    #[arg(long, env = "PIXELQ_CONFIG", default_value = "config.toml")]
    pub config: PathBuf,
}
