mod commands;
mod logging;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::commands::{SessionOptions, WithdrawOptions};
use crate::logging::LogDestination;

#[derive(Parser)]
#[command(name = "retract")]
#[command(about = "Withdraw stale sent invitations through a live browser session", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// WebDriver server endpoint (a running chromedriver)
    #[arg(long, global = true, default_value = "http://localhost:9515")]
    webdriver: String,

    /// JSON site profile overriding the built-in selectors
    #[arg(long, global = true, value_name = "FILE")]
    site_profile: Option<PathBuf>,

    /// Seconds to wait for the manual login to finish
    #[arg(long, global = true, default_value_t = 300)]
    login_timeout: u64,

    /// Also write logs to ./retract.log
    #[arg(long, global = true)]
    log_file: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the sent-invitation list and export it to CSV
    Export {
        /// Output directory for the export
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,

        /// Extra lazy-load cycles before reading the list
        #[arg(long, default_value_t = 0)]
        scroll: u32,
    },

    /// Withdraw invitations matching a roster or an age threshold
    Withdraw {
        /// Roster CSV with a profile_link column and an optional name column
        #[arg(long, value_name = "FILE")]
        roster: Option<PathBuf>,

        /// Withdraw invitations sent at least this many days ago
        #[arg(long, value_name = "DAYS", conflicts_with = "roster")]
        older_than_days: Option<u32>,

        /// Extra lazy-load cycles when scanning for --older-than-days
        #[arg(long, default_value_t = 0)]
        scroll: u32,

        /// Stop after this many successful withdrawals
        #[arg(long)]
        limit: Option<usize>,

        /// Lazy-load cycle ceiling before giving up
        #[arg(long, default_value_t = 50)]
        max_load_cycles: u32,

        /// Consecutive no-progress cycles that end the run
        #[arg(long, default_value_t = 2)]
        stall_cycles: u32,

        /// Directory for the withdrawn log CSV
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let destination = if cli.log_file {
        LogDestination::Both
    } else {
        LogDestination::Terminal
    };
    logging::initialize(destination, cli.verbose);

    let options = SessionOptions {
        webdriver_url: cli.webdriver,
        site_profile: cli.site_profile,
        login_timeout: Duration::from_secs(cli.login_timeout),
    };

    match cli.command {
        Commands::Export { out_dir, scroll } => {
            commands::export(options, out_dir, scroll).await?;
        }
        Commands::Withdraw {
            roster,
            older_than_days,
            scroll,
            limit,
            max_load_cycles,
            stall_cycles,
            out_dir,
        } => {
            commands::withdraw(
                options,
                WithdrawOptions {
                    roster,
                    older_than_days,
                    scroll,
                    limit,
                    max_load_cycles,
                    stall_cycles,
                    out_dir,
                },
            )
            .await?;
        }
    }

    Ok(())
}
