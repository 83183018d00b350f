pub mod aggregate;
pub mod band;
pub mod cli;
mod commands;
pub mod config;
pub mod data;
pub mod dimension;
pub mod error;
pub mod filter;
pub mod io_utils;
pub mod pipeline;
pub mod reference;
pub mod report;
pub mod schema;
pub mod sheet;
pub mod table;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::{LevelFilter, debug};

use crate::cli::{Cli, Commands};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("loanscope", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = cli.config.as_deref();
    if let Some(path) = config {
        debug!("Using configuration {path:?}");
    }
    match &cli.command {
        Commands::Rows(args) => commands::rows(config, args),
        Commands::Chart(args) => commands::chart(config, args),
        Commands::Pivot(args) => commands::pivot(config, args),
        Commands::Approval(args) => commands::approval(config, args),
        Commands::Options(args) => commands::options(config, args),
    }
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
