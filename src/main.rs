// src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use modupdater::artifact::{Artifact, FilenameMetadata, scan_directory};
use modupdater::cache::{DownloadCache, HttpFetcher};
use modupdater::config::{Config, DEFAULT_CONFIG_FILE};
use modupdater::registry::ModrinthClient;
use modupdater::resolver::{Orchestrator, ResolutionResult, Resolver, Target};
use modupdater::transaction::{UpdateResult, UpdateTransaction, select_updates};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How often the progress line is refreshed while resolving
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "modupdater")]
#[command(author, version, about = "Update a Minecraft mod folder to a new game version", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Target game version (overrides updateGameVersionTo)
    #[arg(short, long, global = true)]
    target: Option<String>,

    /// Maximum concurrent lookups (overrides concurrency)
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Retry bound for transient registry failures (overrides maxRetries)
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    InitConfig,
    /// List mods in the source folder
    List,
    /// Check every mod for a version compatible with the target
    Check,
    /// Back up and replace mods that have a compatible update
    Update {
        /// Mod names to update
        names: Vec<String>,
        /// Update every mod with an available update
        #[arg(short, long, conflicts_with = "names")]
        all: bool,
    },
}

impl Cli {
    /// Load the config file and apply command-line overrides
    fn load_config(&self) -> Result<Config> {
        let mut config = Config::load_or_default(&self.config)?;
        if let Some(target) = &self.target {
            config.update_game_version_to = target.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        Ok(config)
    }
}

fn scan(config: &Config) -> Result<Vec<Artifact>> {
    let artifacts = scan_directory(&config.mod_folder_from, &FilenameMetadata)?;
    info!("Found {} mods in {}", artifacts.len(), config.mod_folder_from.display());
    Ok(artifacts)
}

/// Resolve every artifact, showing progress until the batch is done
fn resolve(config: &Config, artifacts: &[Artifact]) -> Result<Vec<ResolutionResult>> {
    let client = ModrinthClient::with_base_url(&config.api_base_url, config.request_timeout())?;
    let resolver = Resolver::new(
        Arc::new(client),
        Target::new(&config.loader, &config.update_game_version_to),
        config.retry_policy(),
    )
    .with_selection(config.selection);

    let handle = Orchestrator::new(resolver, config.concurrency).resolve_all(artifacts.to_vec())?;

    let mut stderr = std::io::stderr();
    while !handle.wait_timeout(PROGRESS_INTERVAL) {
        let progress = handle.progress();
        let _ = write!(
            stderr,
            "\rResolving... {}% ({}/{})",
            progress.percent(),
            progress.finished,
            progress.total
        );
        let _ = stderr.flush();
    }
    let _ = writeln!(stderr, "\rResolving... 100% ({0}/{0})", handle.len());

    Ok(handle.wait())
}

fn print_results(results: &[ResolutionResult]) {
    for result in results {
        print!(
            "  {} {} -> {}",
            result.artifact,
            result.current_version_label(),
            result.candidate_version_label().unwrap_or("-")
        );
        print!(" [{}]", result.availability().label());
        if let Some(error) = &result.last_error {
            print!(" ({})", error);
        }
        println!();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Some(Commands::InitConfig) => {
            Config::write_default(&cli.config)?;
            println!("Wrote default configuration to {}", cli.config.display());
            println!("Set updateGameVersionTo before running 'modupdater check'");
            Ok(())
        }
        Some(Commands::List) => {
            let config = cli.load_config()?;
            let artifacts = scan(&config)?;

            if artifacts.is_empty() {
                println!("No mods found in {}.", config.mod_folder_from.display());
            } else {
                println!("Mods in {}:", config.mod_folder_from.display());
                for artifact in &artifacts {
                    println!(
                        "  {} {} ({})",
                        artifact.name,
                        artifact.version_label(),
                        artifact.filename
                    );
                }
                println!("\nTotal: {} mod(s)", artifacts.len());
            }
            Ok(())
        }
        Some(Commands::Check) => {
            let config = cli.load_config()?;
            config.validate()?;
            let artifacts = scan(&config)?;
            let results = resolve(&config, &artifacts)?;

            println!("Mods checked against {} {}:", config.loader, config.update_game_version_to);
            print_results(&results);

            let updates = results.iter().filter(|r| r.has_update()).count();
            println!("\n{} of {} mod(s) can be updated", updates, results.len());
            Ok(())
        }
        Some(Commands::Update { names, all }) => {
            if names.is_empty() && !all {
                return Err(anyhow::anyhow!(
                    "Specify mod names to update, or --all to update everything"
                ));
            }

            let config = cli.load_config()?;
            config.validate()?;
            let artifacts = scan(&config)?;

            for name in names {
                if !artifacts.iter().any(|a| &a.name == name) {
                    warn!("No mod named '{}' in {}", name, config.mod_folder_from.display());
                }
            }

            let results = resolve(&config, &artifacts)?;
            let only = (!all).then_some(names.as_slice());
            let selections = select_updates(&artifacts, &results, only);

            let cache = DownloadCache::new(
                &config.cache_folder,
                Arc::new(HttpFetcher::new().context("Failed to set up downloads")?),
            );
            let updater =
                UpdateTransaction::new(cache, &config.mod_folder_to, &config.backup_folder);

            if selections.is_empty() {
                println!("No updates available.");
            }
            let outcomes = updater.apply_all(&selections);

            let mut failed = 0;
            for outcome in &outcomes {
                match &outcome.result {
                    UpdateResult::Applied { .. } => println!(
                        "Updated {}: {} -> {}",
                        outcome.artifact, outcome.old_version, outcome.new_version
                    ),
                    UpdateResult::PartialFailure { reason, .. } => {
                        failed += 1;
                        println!("Failed to update {}: {}", outcome.artifact, reason);
                    }
                }
            }

            if config.carries_over_unchanged() {
                let copied = updater.carry_over(&artifacts, &outcomes);
                if copied > 0 {
                    println!(
                        "Copied {} unchanged mod(s) to {}",
                        copied,
                        updater.destination_dir().display()
                    );
                }
            }

            if failed > 0 {
                return Err(anyhow::anyhow!(
                    "{} of {} update(s) failed",
                    failed,
                    outcomes.len()
                ));
            }
            Ok(())
        }
        None => {
            // No command provided, show help
            println!("modupdater v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'modupdater --help' for usage information");
            Ok(())
        }
    }
}
