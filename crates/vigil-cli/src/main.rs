use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use vigil_cli::commands::{prune, report, resolve, status};
use vigil_cli::{Cli, Commands, Config, service};

fn load_config(cli: &Cli) -> Result<Config> {
    let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let mut stdout = std::io::stdout().lock();
    match &cli.command {
        Some(Commands::Track) => {
            let config = load_config(&cli)?;
            drop(stdout);
            // The service future is not Send (the desktop-entry cache
            // is thread-local state), so it runs under block_on rather
            // than spawn.
            tokio::runtime::Runtime::new()
                .context("failed to start async runtime")?
                .block_on(service::run(&config))?;
        }
        Some(Commands::Report {
            date,
            from,
            to,
            json,
            limit,
        }) => {
            let config = load_config(&cli)?;
            let range = report::resolve_range(*date, *from, *to)?;
            report::run(&mut stdout, &config, range, *json, *limit)?;
        }
        Some(Commands::Status) => {
            let config = load_config(&cli)?;
            status::run(&mut stdout, &config)?;
        }
        Some(Commands::Prune { older_than }) => {
            let config = load_config(&cli)?;
            prune::run(&mut stdout, &config, *older_than)?;
        }
        Some(Commands::Resolve { process, title }) => {
            resolve::run(&mut stdout, process, title.as_deref())?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            drop(stdout);
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
