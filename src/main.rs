use anyhow::Result;
use clap::{Parser, Subcommand};
use std::ffi::OsString;
use tracing_subscriber::EnvFilter;

mod args;
mod auth;
mod catalog;
mod config;
mod context;
mod edits;
mod env;
mod error;
mod features;
mod http;
mod layers;
mod levels;
mod observations;
mod plan;
mod sync;
#[cfg(test)]
mod testing;
mod token;
mod ui;
mod utils;
mod whitewater;

use crate::args::{BaseArgs, CLIArgs};

const DEFAULT_DEV_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-dev");
const CLI_VERSION: &str = match option_env!("RIVERLEVELS_VERSION_STRING") {
    Some(version) => version,
    None => DEFAULT_DEV_VERSION,
};

#[derive(Debug, Parser)]
#[command(
    name = "riverlevels",
    about = "Sync river gauge conditions onto ArcGIS feature layers",
    version = CLI_VERSION
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write current gauge observations onto the configured feature layers
    Sync(CLIArgs<sync::SyncArgs>),
    /// Exchange the configured credentials for a token
    Token(CLIArgs<token::TokenArgs>),
    /// List current gauge observations by reach
    Levels(CLIArgs<levels::LevelsArgs>),
    /// Show how a feature layer would be split into blocks
    Plan(CLIArgs<plan::PlanArgs>),
}

impl Commands {
    fn base(&self) -> &BaseArgs {
        match self {
            Commands::Sync(cmd) => &cmd.base,
            Commands::Token(cmd) => &cmd.base,
            Commands::Levels(cmd) => &cmd.base,
            Commands::Plan(cmd) => &cmd.base,
        }
    }
}

fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_env("RIVERLEVELS_LOG").unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "riverlevels=info,warn",
            _ => "riverlevels=debug,info",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let argv: Vec<OsString> = std::env::args_os().collect();
    env::bootstrap_from_args(&argv)?;
    let cli = Cli::parse_from(argv);
    init_tracing(cli.command.base().verbose);

    match cli.command {
        Commands::Sync(cmd) => sync::run(cmd.base, cmd.args).await?,
        Commands::Token(cmd) => token::run(cmd.base, cmd.args).await?,
        Commands::Levels(cmd) => levels::run(cmd.base, cmd.args).await?,
        Commands::Plan(cmd) => plan::run(cmd.base, cmd.args).await?,
    }

    Ok(())
}
