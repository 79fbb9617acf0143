//! The export and withdraw flows behind the CLI.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::Utc;
use engine_logging::{engine_debug, engine_info, engine_warn};
use retract_core::{stale_identities, LoopLimits, TargetSet};
use retract_engine::{
    read_roster, target_set_from_rows, timestamped_filename, write_candidates,
    write_withdrawal_log, EngineEvent, ListSession, ProgressSink, SiteProfile,
    WebDriverListSession, WebDriverSettings, WithdrawEngine, WithdrawReport, WithdrawSettings,
};

/// Where and how to reach the browser.
pub struct SessionOptions {
    pub webdriver_url: String,
    pub site_profile: Option<PathBuf>,
    pub login_timeout: Duration,
}

pub struct WithdrawOptions {
    pub roster: Option<PathBuf>,
    pub older_than_days: Option<u32>,
    /// Extra lazy-load cycles for the age scan.
    pub scroll: u32,
    pub limit: Option<usize>,
    pub max_load_cycles: u32,
    pub stall_cycles: u32,
    pub out_dir: PathBuf,
}

/// Prints engine events as progress lines for the operator.
struct ConsoleSink;

impl ProgressSink for ConsoleSink {
    fn emit(&self, event: EngineEvent) {
        match event {
            EngineEvent::CandidateMatched {
                identity,
                display_name,
                reason,
            } => {
                let name = display_name.unwrap_or_else(|| "unknown".into());
                println!("  match ({reason}): {name} <{identity}>");
            }
            EngineEvent::WithdrawalConfirmed { identity } => {
                println!("  withdrawn: {identity}");
            }
            EngineEvent::WithdrawalUnverified { identity } => {
                println!("  no prompt for {identity}; verifying on the next pass");
            }
            EngineEvent::WithdrawalFailed { identity, fault } => {
                println!("  failed: {identity} ({fault})");
            }
            EngineEvent::CandidateSkipped { detail } => {
                engine_debug!("skipped: {detail}");
            }
            EngineEvent::CycleFinished {
                cycle,
                cards_seen,
                new_candidates,
                ..
            } => {
                println!("  cycle {cycle}: {cards_seen} cards rendered, {new_candidates} new");
            }
            EngineEvent::Halted { reason } => {
                println!("  halting: {reason}");
            }
        }
    }
}

fn load_profile(options: &SessionOptions) -> anyhow::Result<SiteProfile> {
    match &options.site_profile {
        Some(path) => SiteProfile::load(path)
            .with_context(|| format!("loading site profile {}", path.display())),
        None => Ok(SiteProfile::default()),
    }
}

/// Opens the browser, parks it on the login page until the operator has
/// signed in, then navigates to the sent-invitation list.
async fn connect(
    options: &SessionOptions,
    profile: &SiteProfile,
) -> anyhow::Result<WebDriverListSession> {
    let settings = WebDriverSettings {
        server_url: options.webdriver_url.clone(),
        ..WebDriverSettings::default()
    };
    let mut session = WebDriverListSession::connect(settings)
        .await
        .context("could not reach the WebDriver server")?;
    session.goto(&profile.login_url).await?;
    println!("A browser window is open. Sign in there; the run continues once the site shows you as logged in.");
    let logged_in = session
        .wait_for_present(&profile.logged_in_marker, options.login_timeout)
        .await?;
    if logged_in {
        engine_info!("login detected");
    } else {
        engine_warn!(
            "login marker not seen within {:?}; continuing anyway",
            options.login_timeout
        );
    }
    session.goto(&profile.list_url).await?;
    Ok(session)
}

/// Closing the browser is best-effort; a crashed tab must not stop the
/// results from being reported and persisted.
async fn close_session(session: WebDriverListSession) {
    if let Err(err) = session.quit().await {
        engine_warn!("browser session did not close cleanly: {err}");
    }
}

pub async fn export(options: SessionOptions, out_dir: PathBuf, scroll: u32) -> anyhow::Result<()> {
    let profile = load_profile(&options)?;
    let settings = WithdrawSettings {
        scan_load_cycles: scroll,
        ..WithdrawSettings::default()
    };
    let engine = WithdrawEngine::new(profile.clone(), settings);

    let mut session = connect(&options, &profile).await?;
    let result = engine.collect(&mut session, &ConsoleSink).await;
    close_session(session).await;
    let candidates = result?;

    if candidates.is_empty() {
        println!("No sent invitations found.");
        return Ok(());
    }
    let filename = timestamped_filename("pending_invitations", Utc::now());
    let path = write_candidates(&out_dir, &filename, &candidates)?;
    println!(
        "Exported {} invitations to {}",
        candidates.len(),
        path.display()
    );
    Ok(())
}

pub async fn withdraw(options: SessionOptions, w: WithdrawOptions) -> anyhow::Result<()> {
    if w.roster.is_none() && w.older_than_days.is_none() {
        bail!("either --roster or --older-than-days is required");
    }
    let profile = load_profile(&options)?;
    let settings = WithdrawSettings {
        limits: LoopLimits {
            max_load_cycles: w.max_load_cycles,
            stall_cycles: w.stall_cycles,
        },
        scan_load_cycles: w.scroll,
        max_withdrawals: w.limit,
        ..WithdrawSettings::default()
    };
    let engine = WithdrawEngine::new(profile.clone(), settings);

    // Ctrl-C requests a clean halt at the next card boundary.
    let cancel = engine.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!("Stopping after the current card...");
            cancel.cancel();
        }
    });

    let mut session = connect(&options, &profile).await?;

    let targets = match (&w.roster, w.older_than_days) {
        (Some(path), _) => {
            let rows = read_roster(path)
                .with_context(|| format!("reading roster {}", path.display()))?;
            println!("Loaded {} roster rows.", rows.len());
            target_set_from_rows(&rows)
        }
        (None, Some(days)) => {
            println!("Scanning for invitations sent at least {days} days ago...");
            match engine.collect(&mut session, &ConsoleSink).await {
                Ok(candidates) => {
                    TargetSet::from_identities(stale_identities(&candidates, days))
                }
                Err(err) => {
                    close_session(session).await;
                    return Err(err.into());
                }
            }
        }
        (None, None) => unreachable!("validated above"),
    };

    if targets.is_complete() {
        println!("Nothing to withdraw.");
        close_session(session).await;
        return Ok(());
    }
    let (identities, names) = targets.remaining();
    println!("Withdrawing {identities} link targets and {names} name targets.");

    let outcome = engine.withdraw(&mut session, targets, &ConsoleSink).await;
    close_session(session).await;

    match outcome {
        Ok(report) => summarize(&w.out_dir, &report),
        Err(failure) => {
            // The run failure stays the primary error even when the
            // partial log cannot be written.
            if !failure.withdrawn.is_empty() {
                let filename = timestamped_filename("withdrawn", Utc::now());
                match write_withdrawal_log(&w.out_dir, &filename, &failure.withdrawn) {
                    Ok(path) => println!("Partial withdrawn log written to {}", path.display()),
                    Err(err) => engine_warn!("could not write the partial withdrawn log: {err}"),
                }
            }
            Err(failure.into())
        }
    }
}

fn summarize(out_dir: &Path, report: &WithdrawReport) -> anyhow::Result<()> {
    println!();
    println!(
        "Run finished: {} after {} load cycles.",
        report.halt, report.cycles_run
    );
    println!("  withdrawn: {}", report.withdrawn.len());
    println!("  failed:    {}", report.failed.len());
    let (identities, names) = report.unresolved.remaining();
    if identities + names > 0 {
        println!("  unresolved: {identities} links, {names} names");
        for identity in report.unresolved.pending_identities().take(10) {
            println!("    - {identity}");
        }
        for name in report.unresolved.pending_names().take(10) {
            println!("    - name: {name}");
        }
    }
    if !report.withdrawn.is_empty() {
        let filename = timestamped_filename("withdrawn", Utc::now());
        let path = write_withdrawal_log(out_dir, &filename, &report.withdrawn)?;
        println!("Withdrawn log written to {}", path.display());
    }
    Ok(())
}
