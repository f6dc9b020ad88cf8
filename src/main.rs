use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::collections::HashMap;
use upload_session::upload::{EntryId, EntryStatus, FileSource, StoreSnapshot};
use upload_session::{format_size, logging, UploadConfig, UploadSession};

/// Queue local files and watch their (simulated) upload progress.
#[derive(Parser, Debug)]
#[command(name = "upload-session", version, about)]
struct Cli {
    /// Debug-level logs
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add files to a session and print progress until every transfer ends
    Simulate {
        /// Files to queue
        #[arg(required = true)]
        paths: Vec<String>,

        /// Seed for the simulated progress steps
        #[arg(long)]
        seed: Option<u64>,

        /// Milliseconds between progress steps
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Queue files first, then start them with a single submit
        #[arg(long)]
        no_auto_start: bool,
    },
    /// Format byte counts the way the file list shows them
    Size { bytes: Vec<u64> },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Print shell completions
    Completions { shell: Shell },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Effective configuration as TOML
    Show,
    /// JSON Schema of the config file
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose)?;

    match cli.command {
        Command::Simulate {
            paths,
            seed,
            interval_ms,
            no_auto_start,
        } => {
            let mut config = UploadConfig::load(cli.config.as_deref())?;
            if seed.is_some() {
                config.seed = seed;
            }
            if let Some(ms) = interval_ms {
                config.step_interval_ms = ms;
            }
            if no_auto_start {
                config.auto_start = false;
            }
            config.validate().context("Invalid simulate options")?;
            simulate(&config, &paths).await
        }
        Command::Size { bytes } => {
            for b in bytes {
                println!("{b}\t{}", format_size(b));
            }
            Ok(())
        }
        Command::Config { action } => {
            match action {
                ConfigAction::Show => {
                    let config = UploadConfig::load(cli.config.as_deref())?;
                    print!("{}", config.to_toml()?);
                }
                ConfigAction::Schema => println!("{}", UploadConfig::json_schema()?),
            }
            Ok(())
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "upload-session", &mut std::io::stdout());
            Ok(())
        }
    }
}

async fn simulate(config: &UploadConfig, paths: &[String]) -> Result<()> {
    let files = FileSource::current_dir()?.handles(paths).await?;
    let session = UploadSession::mount(config)?;
    let mut snapshots = session.subscribe();

    let report = session.ingest(files);
    for name in &report.rejected {
        eprintln!("skipped duplicate: {name}");
    }
    if !config.auto_start {
        for entry in session.entries() {
            println!("queued  {:<32} {:>10}", entry.name, format_size(entry.size_bytes));
        }
        session.submit();
    }

    let mut shown: HashMap<EntryId, (u8, EntryStatus)> = HashMap::new();
    while !session.summary().is_settled() {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                render(&snapshot, &mut shown);
            }
            _ = tokio::signal::ctrl_c() => {
                let cleared = session.clear_all();
                eprintln!("interrupted, cancelled {cleared} transfer(s)");
                break;
            }
        }
    }

    let summary = session.summary();
    println!("{} complete, {} failed", summary.complete, summary.failed);
    for failure in session.failures() {
        eprintln!("{failure}");
    }
    session.unmount().await;
    Ok(())
}

// Print one line per entry that moved since the last snapshot.
fn render(snapshot: &StoreSnapshot, shown: &mut HashMap<EntryId, (u8, EntryStatus)>) {
    for entry in &snapshot.entries {
        let state = (entry.progress, entry.status);
        if shown.insert(entry.id, state) == Some(state) {
            continue;
        }
        println!(
            "{:>3}%  {:<32} {:>10}  {}",
            entry.progress,
            entry.name,
            format_size(entry.size_bytes),
            entry.status
        );
    }
}
