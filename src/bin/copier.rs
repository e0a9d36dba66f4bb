use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;

use copier_lib::config::AppConfig;
use copier_lib::coordinator::Coordinator;
use copier_lib::logging::{init_tracing, LogEntry};
use copier_lib::rsync::{Notification, RunOutcome, Severity};
use copier_lib::settings::{FileSettingsStore, MemorySettingsStore, SettingsStore};
use copier_lib::app_version;

type Store = Box<dyn SettingsStore>;

#[derive(Parser)]
#[command(name = "copier", version)]
#[command(about = "Copy files and folders with rsync, resuming where a failed run stopped", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/copier/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Settings file holding sources, destination and options
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the saved configuration, resume position and rsync status
    Show,
    /// Edit the saved source list
    Sources {
        #[command(subcommand)]
        action: SourcesAction,
    },
    /// Set the destination folder
    Dest { path: PathBuf },
    /// Turn an rsync option on or off
    #[command(name = "option")]
    SetOption {
        name: String,
        #[arg(action = ArgAction::Set)]
        value: bool,
    },
    /// Copy every source into the destination (resumes an interrupted run)
    Run {
        /// Use these sources instead of the saved list
        #[arg(short, long = "source")]
        sources: Vec<PathBuf>,

        /// Use this destination instead of the saved one
        #[arg(short, long)]
        dest: Option<PathBuf>,

        #[arg(short = 'n', long)]
        dry_run: bool,
    },
    /// Locate rsync and print its version
    Check,
}

#[derive(Subcommand)]
enum SourcesAction {
    Add { paths: Vec<PathBuf> },
    Remove { paths: Vec<PathBuf> },
    Clear,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if cli.settings.is_some() {
        config.settings_path = cli.settings.clone();
    }

    let settings_path = config.resolved_settings_path();
    let store: Store = match &settings_path {
        Some(path) => Box::new(FileSettingsStore::open(path)?),
        None => {
            tracing::warn!("no config directory; settings will not be saved");
            Box::new(MemorySettingsStore::new())
        }
    };
    let mut coord = Coordinator::from_config(&config, store);

    match cli.command {
        Command::Show => show(&mut coord, settings_path).await,
        Command::Sources { action } => {
            match action {
                SourcesAction::Add { paths } => {
                    let edit = coord.add_sources(paths)?;
                    for path in &edit.added {
                        println!("➕ {}", path.display());
                    }
                    for path in &edit.skipped {
                        eprintln!("⚠️  Not found, skipped: {}", path.display());
                    }
                }
                SourcesAction::Remove { paths } => {
                    let removed = coord.remove_sources(&paths)?;
                    println!("➖ Removed {removed} source(s)");
                }
                SourcesAction::Clear => {
                    coord.clear_sources()?;
                    println!("🧹 Source list cleared");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Dest { path } => {
            coord.set_destination(Some(path))?;
            if let Some(dest) = &coord.state().destination {
                println!("📁 Destination: {}", dest.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::SetOption { name, value } => {
            coord.set_option(&name, value)?;
            println!("⚙️  {name} = {value}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            sources,
            dest,
            dry_run,
        } => copy(&mut coord, &config, sources, dest, dry_run).await,
        Command::Check => {
            let info = coord.check_rsync().await?;
            println!("✅ rsync found: {}", info.path.display());
            println!("   {}", info.version);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn show(coord: &mut Coordinator<Store>, settings_path: Option<PathBuf>) -> anyhow::Result<ExitCode> {
    let state = coord.state();
    println!("📋 copier {}", app_version());
    println!();
    println!("Sources ({}):", state.sources.len());
    for (i, source) in state.sources.iter().enumerate() {
        println!("   {:>3}. {}", i + 1, source.display());
    }
    match &state.destination {
        Some(dest) => println!("Destination: {}", dest.display()),
        None => println!("Destination: (not set)"),
    }
    println!("Options:");
    for (name, value) in state.options.to_map() {
        println!("   {:<22} {}", name, if value { "on" } else { "off" });
    }
    match coord.resume_index() {
        Some(index) => println!(
            "Resume: next run starts at source {}/{}",
            index + 1,
            state.sources.len()
        ),
        None => println!("Resume: none"),
    }
    match settings_path {
        Some(path) => println!("Settings: {}", path.display()),
        None => println!("Settings: (not saved)"),
    }
    match coord.check_rsync().await {
        Ok(info) => println!("rsync: {} ({})", info.path.display(), info.version),
        Err(e) => println!("rsync: ❌ {e:#}"),
    }
    Ok(ExitCode::SUCCESS)
}

async fn copy(
    coord: &mut Coordinator<Store>,
    config: &AppConfig,
    sources: Vec<PathBuf>,
    dest: Option<PathBuf>,
    dry_run: bool,
) -> anyhow::Result<ExitCode> {
    let mut rx = coord.subscribe();
    let overridden = !sources.is_empty() || dest.is_some() || dry_run;

    let started = if overridden {
        let mut request = coord.request();
        if !sources.is_empty() {
            request.sources = sources;
        }
        if let Some(dest) = dest {
            request.destination = dest;
        }
        request.options.dry_run |= dry_run;
        coord.run_request(request)
    } else {
        if let Some(index) = coord.resume_index() {
            println!(
                "↪️  Resuming from source {}/{}",
                index + 1,
                coord.state().sources.len()
            );
        }
        coord.run()
    };
    started.context("could not start rsync")?;

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("#>-"),
    );

    let mut ticker = tokio::time::interval(config.poll_interval());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            signal = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                signal.context("failed to listen for Ctrl-C")?;
                if coord.interrupt().is_ok() {
                    pb.println("⏹  Interrupting, waiting for rsync to stop...");
                }
            }
        }

        coord.poll();
        let mut outcome = None;
        while let Ok(notification) = rx.try_recv() {
            match notification {
                Notification::Log(entry) => pb.println(format_log(&entry)),
                Notification::Progress(progress) => {
                    pb.set_position(u64::from(progress.percent));
                    let file = progress.filename.unwrap_or_default();
                    pb.set_message(format!(
                        "[{}/{}] {}",
                        progress.current_index + 1,
                        progress.total,
                        file
                    ));
                }
                Notification::Status(status) => tracing::debug!(?status, "status"),
                Notification::Finished(done) => outcome = Some(done),
            }
        }

        if let Some(outcome) = outcome {
            return Ok(report(&pb, &outcome));
        }
    }
}

fn format_log(entry: &LogEntry) -> String {
    let icon = match entry.level {
        Severity::Info => "  ",
        Severity::Success => "✅",
        Severity::Warning => "⚠️ ",
        Severity::Error => "❌",
    };
    format!("{icon} {}", entry.message)
}

fn report(pb: &ProgressBar, outcome: &RunOutcome) -> ExitCode {
    match outcome {
        RunOutcome::Succeeded { .. } => {
            pb.finish_with_message("✅ Copy complete!");
            ExitCode::SUCCESS
        }
        RunOutcome::Failed { .. } => {
            pb.abandon_with_message("❌ Copy failed!");
            eprintln!("❌ {}", outcome.message());
            ExitCode::FAILURE
        }
        RunOutcome::Interrupted { .. } => {
            pb.abandon_with_message("⏹  Interrupted");
            eprintln!("⚠️  {}", outcome.message());
            ExitCode::from(130)
        }
    }
}
