use anyhow::{Context, Result};
use callsentry::app::{compact_state, open_state_store, run_pipeline, state_list, state_stats};
use callsentry::cli::{Cli, Commands, RunArgs, StateAction};
use callsentry::config::Config;
use callsentry::diagnostics::run_checks;
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    match cli.command {
        None => {
            let config = load_config(cli.config.as_deref())?;
            handle_run(&config, &RunArgs::default()).await?;
        }
        Some(Commands::Run(args)) => {
            let config = load_config(cli.config.as_deref())?;
            handle_run(&config, &args).await?;
        }
        Some(Commands::State { action }) => {
            let config = load_config(cli.config.as_deref())?;
            handle_state_command(&config, action)?;
        }
        Some(Commands::Check) => {
            let config = load_config(cli.config.as_deref())?;
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            if !run_checks(&config, &path) {
                std::process::exit(1);
            }
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "callsentry",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Logs go to stderr; stdout carries only command output.
///
/// `RUST_LOG` wins over the command-line flags.
fn init_logging(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("callsentry={level},warn"))),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Load configuration with the following priority:
/// 1. Custom config path (if provided via --config)
/// 2. Default config path (~/.config/callsentry/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    Ok(config.with_env_overrides())
}

async fn handle_run(config: &Config, args: &RunArgs) -> Result<()> {
    let report = run_pipeline(config, args)
        .await
        .context("pipeline run failed")?;
    println!("{report}");
    Ok(())
}

fn handle_state_command(config: &Config, action: StateAction) -> Result<()> {
    let store = open_state_store(config);
    match action {
        StateAction::List { status, tail } => {
            let entries = state_list(&store, status, tail)?;
            if entries.is_empty() {
                println!("No entries in {}", store.path().display());
            }
            for entry in entries {
                println!(
                    "{}  {:<22}  {}",
                    entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.status.as_str(),
                    entry.call_id
                );
            }
        }
        StateAction::Stats => {
            let counts = state_stats(&store)?;
            let total: usize = counts.values().sum();
            println!("State store: {}", store.path().display());
            for (status, n) in &counts {
                println!("  {:<22}{n}", status.as_str());
            }
            println!("Total:                  {total}");
        }
        StateAction::Compact => match compact_state(config)? {
            Some(evicted) => println!("{} evicted {evicted} entries", "✓".green()),
            None => println!("Store is under its ceiling, nothing to do"),
        },
    }
    Ok(())
}
