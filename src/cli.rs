//! Command-line interface for callsentry
//!
//! Provides argument parsing using clap derive macros.

use crate::state::ProcessingStatus;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Transcribe recent inbound calls and alert on lost sales
#[derive(Parser, Debug)]
#[command(
    name = "callsentry",
    version,
    about = "Transcribe recent inbound calls and alert on lost sales"
)]
pub struct Cli {
    /// Subcommand to execute (default: run)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process new calls from the trailing window (the default)
    Run(RunArgs),

    /// Inspect or maintain the processed-call store
    State {
        #[command(subcommand)]
        action: StateAction,
    },

    /// Check configuration, credentials, prompts and local files
    Check,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(clap::Args, Debug, Default, Clone, PartialEq)]
pub struct RunArgs {
    /// Trailing window to query (e.g. 1h, 90m, 2h30m). Overrides config.
    #[arg(long, short = 'w', value_name = "DURATION", value_parser = parse_window)]
    pub window: Option<Duration>,

    /// Process the most recent calls regardless of history, recording nothing
    #[arg(long)]
    pub deployment_check: bool,

    /// Number of calls for --deployment-check
    #[arg(long, value_name = "N", requires = "deployment_check")]
    pub limit: Option<usize>,
}

/// State store actions
#[derive(Subcommand, Debug)]
pub enum StateAction {
    /// List entries, oldest first
    List {
        /// Only entries with this status
        #[arg(long, value_name = "STATUS", value_parser = parse_status)]
        status: Option<ProcessingStatus>,

        /// Only the last N entries
        #[arg(long, value_name = "N")]
        tail: Option<usize>,
    },

    /// Count entries per status
    Stats,

    /// Compact the store now if it is over its ceiling
    Compact,
}

/// Parse a window duration.
///
/// Bare numbers are hours; anything else goes through `humantime`
/// (`30m`, `2h`, `1h30m`).
fn parse_window(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(hours) = s.parse::<u64>() {
        return if hours == 0 {
            Err("window must be positive".to_string())
        } else {
            Ok(Duration::from_secs(hours * 3600))
        };
    }
    let d = humantime::parse_duration(s).map_err(|e| e.to_string())?;
    if d.is_zero() {
        return Err("window must be positive".to_string());
    }
    Ok(d)
}

fn parse_status(s: &str) -> Result<ProcessingStatus, String> {
    s.parse::<ProcessingStatus>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_default_command() {
        let cli = Cli::try_parse_from(["callsentry"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_parse_verbose_double() {
        let cli = Cli::try_parse_from(["callsentry", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_run_with_window() {
        let cli = Cli::try_parse_from(["callsentry", "run", "--window", "90m"]).unwrap();
        match cli.command {
            Some(Commands::Run(args)) => {
                assert_eq!(args.window, Some(Duration::from_secs(90 * 60)));
                assert!(!args.deployment_check);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_window_bare_number_is_hours() {
        assert_eq!(parse_window("3"), Ok(Duration::from_secs(3 * 3600)));
        assert_eq!(
            parse_window("1h30m"),
            Ok(Duration::from_secs(90 * 60))
        );
        assert!(parse_window("0").is_err());
        assert!(parse_window("0s").is_err());
        assert!(parse_window("soon").is_err());
    }

    #[test]
    fn test_parse_deployment_check() {
        let cli = Cli::try_parse_from([
            "callsentry",
            "run",
            "--deployment-check",
            "--limit",
            "5",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Run(args)) => {
                assert!(args.deployment_check);
                assert_eq!(args.limit, Some(5));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_limit_requires_deployment_check() {
        assert!(Cli::try_parse_from(["callsentry", "run", "--limit", "5"]).is_err());
    }

    #[test]
    fn test_parse_state_list_with_filters() {
        let cli = Cli::try_parse_from([
            "callsentry",
            "state",
            "list",
            "--status",
            "processing",
            "--tail",
            "10",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::State {
                action: StateAction::List { status, tail },
            }) => {
                assert_eq!(status, Some(ProcessingStatus::Processing));
                assert_eq!(tail, Some(10));
            }
            _ => panic!("Expected State List command"),
        }
    }

    #[test]
    fn test_state_list_rejects_unknown_status() {
        assert!(
            Cli::try_parse_from(["callsentry", "state", "list", "--status", "done"]).is_err()
        );
    }

    #[test]
    fn test_state_requires_subcommand() {
        assert!(Cli::try_parse_from(["callsentry", "state"]).is_err());
    }

    #[test]
    fn test_parse_state_stats_and_compact() {
        let cli = Cli::try_parse_from(["callsentry", "state", "stats"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::State {
                action: StateAction::Stats
            })
        ));
        let cli = Cli::try_parse_from(["callsentry", "state", "compact"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::State {
                action: StateAction::Compact
            })
        ));
    }

    #[test]
    fn test_parse_check() {
        let cli = Cli::try_parse_from(["callsentry", "check"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Check)));
    }

    #[test]
    fn test_parse_completions() {
        let cli = Cli::try_parse_from(["callsentry", "completions", "bash"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Completions { shell: Shell::Bash })
        ));
    }

    #[test]
    fn test_global_options_after_command() {
        let cli =
            Cli::try_parse_from(["callsentry", "check", "--config", "/etc/cs.toml", "-q"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/cs.toml")));
        assert!(cli.quiet);
    }

    #[test]
    fn test_invalid_command_returns_error() {
        assert!(Cli::try_parse_from(["callsentry", "transcribe"]).is_err());
    }

    #[test]
    fn test_version_flag() {
        let err = Cli::try_parse_from(["callsentry", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
