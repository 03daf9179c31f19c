//! `relay` command-line entry point.

mod cli;
mod cmd;

use clap::Parser;
use cli::{Cli, Commands};
use relay_types::config::default_config_path;

/// Tracing goes to stderr so stdout carries only the provider response.
fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let outcome = match cli.command {
        Commands::Send(args) => cmd::send::run(&config_path, args),
        Commands::Channels => cmd::channels::run(&config_path),
    };

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}
