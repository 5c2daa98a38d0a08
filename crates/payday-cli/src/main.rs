use std::path::PathBuf;

use clap::{Parser, Subcommand};
use payday_cli::cli::commands::parse_amount;
use payday_cli::cli::tracing_setup::init_tracing;
use payday_cli::cli::{execute, CliCommand, CliConfig, Response};
use payday_core::{Activity, Amount};

#[derive(Parser)]
#[command(name = "payday")]
#[command(about = "Earn rewards from daily activities")]
struct Cli {
    /// Pretty-print JSON output
    #[arg(long, short)]
    pretty: bool,

    /// Path to JSON config file (dataDir, remotePath, engine overrides)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Data directory (overrides the config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Treat the remote store as unreachable
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in, registering the email on first use
    Login {
        email: String,
        /// Display name
        #[arg(long, short = 'n')]
        name: Option<String>,
    },

    /// Sign out and clear cached state
    Logout,

    /// Show balance, totals and quota status
    Status,

    /// Perform an activity (like, inspector, wheel)
    Perform {
        activity: Activity,
    },

    /// Withdraw an amount in currency units, e.g. 12.50
    Withdraw {
        #[arg(value_parser = parse_withdrawal)]
        amount: Amount,
    },

    /// List recent transactions, newest first
    History {
        #[arg(long, short = 'n')]
        limit: Option<usize>,
    },

    /// Push unsynced changes and reconcile with the remote
    Sync,

    /// Apply any due quota resets
    ResetCheck,
}

fn parse_withdrawal(s: &str) -> Result<Amount, String> {
    parse_amount(s).map_err(|e| format!("{:#}", e))
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match CliConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                std::process::exit(1);
            }
        },
        None => CliConfig::default(),
    };
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = Some(data_dir);
    }

    let command = match cli.command {
        Commands::Login { email, name } => CliCommand::Login { email, name },
        Commands::Logout => CliCommand::Logout,
        Commands::Status => CliCommand::Status,
        Commands::Perform { activity } => CliCommand::Perform { activity },
        Commands::Withdraw { amount } => CliCommand::Withdraw { amount },
        Commands::History { limit } => CliCommand::History { limit },
        Commands::Sync => CliCommand::Sync,
        Commands::ResetCheck => CliCommand::ResetCheck,
    };

    let response = match execute(command, &config, cli.offline).await {
        Ok(result) => Response::success(result),
        Err(e) => Response::from_error(&e),
    };
    println!("{}", response.render(cli.pretty));
    if response.is_error() {
        std::process::exit(1);
    }
}
