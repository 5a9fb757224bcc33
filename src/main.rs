//! procpool - supervised process pool with health checks and autoscaling

mod cli;
mod client;
mod config;
mod error;
mod logging;
mod output;
mod pool;
mod sampler;
mod server;
mod theme;
pub mod version;
mod worker;

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};
use std::time::Duration;

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        theme::disable_colors();
    }

    // Workers own their stdout for the message protocol and log nothing.
    if let Commands::Worker(args) = &cli.command {
        worker::run_worker_main(args.to_options());
    }

    init_logging(&cli);

    let result = match &cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::Status(args) => cmd_status(args),
        Commands::Completions(args) => {
            args.generate();
            Ok(())
        }
        Commands::Worker(_) => Ok(()),
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    let mut config = logging::LogConfig::from_verbosity(cli.verbose, cli.quiet).with_env_overrides();
    if let Some(format) = cli.log_format {
        config = config.with_format(format);
    }
    if let Some(ref path) = cli.log_file {
        config = config.with_file(path.clone());
    }
    logging::init(config);
}

fn cmd_run(args: &cli::RunArgs) -> Result<()> {
    let options = pool::RunOptions {
        config: args.to_config(),
        command: args.worker_command(),
        status_addr: args.status_addr,
    };
    pool::run(options).context("supervisor failed")?;
    Ok(())
}

fn cmd_status(args: &cli::StatusArgs) -> Result<()> {
    use theme::Themed;

    let client = client::StatusClient::new(&args.url, Duration::from_secs(args.timeout_secs))?;

    if args.health {
        let health = client
            .get_health()
            .with_context(|| format!("could not reach supervisor at {}", client.base_url()))?;
        println!(
            "{} {} ({} workers, version {})",
            "Supervisor:".label(),
            health.status.success(),
            health.workers,
            health.version
        );
        return Ok(());
    }

    let status = client
        .get_status()
        .with_context(|| format!("could not reach supervisor at {}", client.base_url()))?;
    output::print_status(
        &status,
        args.format,
        output::TableOptions { ascii: args.ascii },
    );
    Ok(())
}
