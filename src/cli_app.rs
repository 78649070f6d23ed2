//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use repodex::cache::model::CachedRepository;
use repodex::cache::reconcile::ReconciliationService;
use repodex::cache::store::{CacheStore, FileCacheStore, root_cache_key};
use repodex::core::cancel::CancellationToken;
use repodex::core::config::Config;
use repodex::core::errors::RdxError;
use repodex::core::paths::resolve_absolute_path;
use repodex::logger::activity::{
    ActivityEvent, ActivityLoggerConfig, ActivityLoggerHandle, spawn_activity_logger,
};
use repodex::logger::jsonl::JsonlConfig;
use repodex::scanner::walker::{DiscoveredRepository, RepoScanner};

/// repodex: find git repositories under a folder and keep a grouped cache of them.
#[derive(Debug, Parser)]
#[command(
    name = "repodex",
    author,
    version,
    about = "Discover and cache git repositories under a root folder",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Quiet mode (errors and final results only).
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Walk a folder once and list the repositories found.
    Scan(RootArgs),
    /// Reconcile the cache for a folder against a fresh scan.
    Refresh(RootArgs),
    /// List the cached repositories for a folder without scanning.
    Cached(CachedArgs),
    /// Inspect or clear stored caches.
    Cache(CacheArgs),
    /// View configuration state.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct RootArgs {
    /// Folder to scan.
    #[arg(value_name = "ROOT")]
    root: PathBuf,
    /// Path segment used as group, counted from the repository (1) toward the root.
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    group_index: Option<i32>,
}

#[derive(Debug, Clone, Args)]
struct CachedArgs {
    #[arg(value_name = "ROOT")]
    root: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum CacheCommand {
    /// List every cached root.
    List,
    /// Delete the cache for one root.
    Clear {
        #[arg(value_name = "ROOT")]
        root: PathBuf,
    },
    /// Print the cache file used for one root.
    Path {
        #[arg(value_name = "ROOT")]
        root: PathBuf,
    },
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum ConfigCommand {
    /// Print the config file path.
    Path,
    /// Print the effective configuration.
    Show,
    /// Load and validate the configuration.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// Interrupted by the user.
    #[error("{0}")]
    Cancelled(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Cancelled(_) => 130,
        }
    }
}

impl From<RdxError> for CliError {
    fn from(err: RdxError) -> Self {
        match err {
            RdxError::Cancelled => Self::Cancelled(err.to_string()),
            RdxError::InvalidConfig { .. }
            | RdxError::MissingConfig { .. }
            | RdxError::ConfigParse { .. } => Self::User(err.to_string()),
            RdxError::ChannelClosed { .. } => Self::Internal(err.to_string()),
            _ => Self::Runtime(err.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Scan(args) => run_scan(cli, args),
        Command::Refresh(args) => run_refresh(cli, args),
        Command::Cached(args) => run_cached(cli, args),
        Command::Cache(args) => run_cache(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// scan / refresh / cached
// ---------------------------------------------------------------------------

fn run_scan(cli: &Cli, args: &RootArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let scanner = RepoScanner::from_config(&config.scanner)?;
    let index = args
        .group_index
        .unwrap_or(config.scanner.grouping_segment_index);
    let root = resolve_absolute_path(&args.root);
    if !root.is_dir() && !cli.quiet {
        eprintln!("[RDX-SCANNER] root {} does not exist", root.display());
    }

    let cancel = cancel_on_signals();
    let mut stream = scanner.scan(&root, index, &cancel);
    let repos = stream
        .by_ref()
        .collect::<repodex::core::errors::Result<Vec<DiscoveredRepository>>>()?;
    let stats = stream.stats();

    match output_mode(cli) {
        OutputMode::Human => {
            let rows: Vec<ListingRow<'_>> = repos.iter().map(ListingRow::from).collect();
            print_grouped(&rows);
            if !cli.quiet {
                if let Some(stats) = stats {
                    println!(
                        "\n{} repositories, {} directories visited, {} excluded, {} unreadable ({} ms, {} workers)",
                        stats.repositories_found,
                        stats.directories_visited,
                        stats.directories_excluded,
                        stats.read_errors,
                        stats.elapsed_ms,
                        stats.workers,
                    );
                }
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "scan",
                "root": root.to_string_lossy(),
                "group_index": index,
                "repositories": serde_json::to_value(&repos)?,
                "stats": serde_json::to_value(stats)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_refresh(cli: &Cli, args: &RootArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let scanner = RepoScanner::from_config(&config.scanner)?;
    let index = args
        .group_index
        .unwrap_or(config.scanner.grouping_segment_index);
    let mode = output_mode(cli);

    let logger = start_activity_logger(&config);
    let mut service =
        ReconciliationService::new(FileCacheStore::new(config.paths.cache_dir.clone()), scanner);
    if let Some((handle, _)) = &logger {
        handle.send(ActivityEvent::RefreshStarted {
            root: resolve_absolute_path(&args.root).display().to_string(),
            config_hash: config.stable_hash()?,
        });
        service = service.with_activity_logger(handle.clone());
    }

    let cancel = cancel_on_signals();
    let mut upserts: Vec<CachedRepository> = Vec::new();
    let mut removals: Vec<PathBuf> = Vec::new();
    let result = service.refresh(
        &args.root,
        index,
        |repo| {
            if mode == OutputMode::Human && !cli.quiet {
                println!(
                    "{} {} {}",
                    "+".green().bold(),
                    repo.name,
                    format!("[{}]", repo.group_key).dimmed()
                );
            }
            upserts.push(repo.clone());
        },
        |path| {
            if mode == OutputMode::Human && !cli.quiet {
                println!("{} {}", "-".red().bold(), path.display());
            }
            removals.push(path.to_path_buf());
        },
        &cancel,
    );

    if let Some((handle, join)) = logger {
        stop_activity_logger(&handle, join);
    }
    let summary = result?;

    match mode {
        OutputMode::Human => {
            println!(
                "{} {} new or changed, {} removed, {} unchanged, {} total ({} ms)",
                "refreshed".bold(),
                summary.upserted,
                summary.removed,
                summary.unchanged,
                summary.total,
                summary.elapsed_ms,
            );
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "refresh",
                "summary": serde_json::to_value(&summary)?,
                "upserted": serde_json::to_value(&upserts)?,
                "removed": removals.iter().map(|p| p.to_string_lossy()).collect::<Vec<_>>(),
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_cached(cli: &Cli, args: &CachedArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let store = FileCacheStore::new(config.paths.cache_dir.clone());
    let service = ReconciliationService::new(store, RepoScanner::from_config(&config.scanner)?);
    let repos = service.load_from_cache(&args.root)?;

    match output_mode(cli) {
        OutputMode::Human => {
            if repos.is_empty() && !cli.quiet {
                eprintln!(
                    "no cache for {}; run `repodex refresh` first",
                    resolve_absolute_path(&args.root).display()
                );
            }
            let rows: Vec<ListingRow<'_>> = repos.iter().map(ListingRow::from).collect();
            print_grouped(&rows);
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "cached",
                "root": resolve_absolute_path(&args.root).to_string_lossy(),
                "repositories": serde_json::to_value(&repos)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// cache
// ---------------------------------------------------------------------------

fn run_cache(cli: &Cli, args: &CacheArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let store = FileCacheStore::new(config.paths.cache_dir.clone());

    match &args.command {
        CacheCommand::List => {
            let mut entries = Vec::new();
            for key in store.keys()? {
                match store.read(&key) {
                    Ok(Some(cache)) => entries.push(json!({
                        "key": key,
                        "root": cache.root_path.to_string_lossy(),
                        "repositories": cache.repos.len(),
                        "cached_at_utc": cache.cached_at_utc.to_rfc3339(),
                    })),
                    Ok(None) => {}
                    Err(e) => entries.push(json!({ "key": key, "error": e.to_string() })),
                }
            }

            match output_mode(cli) {
                OutputMode::Human => {
                    if entries.is_empty() && !cli.quiet {
                        println!("No cached roots in {}", store.dir().display());
                    }
                    for entry in &entries {
                        if let Some(err) = entry["error"].as_str() {
                            println!("{}  {}", entry["key"].as_str().unwrap_or("?"), err.red());
                            continue;
                        }
                        println!(
                            "{}  {} repositories  {}",
                            entry["root"].as_str().unwrap_or("?").bold(),
                            entry["repositories"],
                            entry["cached_at_utc"].as_str().unwrap_or("").dimmed(),
                        );
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "cache list",
                        "dir": store.dir().to_string_lossy(),
                        "roots": entries,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        CacheCommand::Clear { root } => {
            let key = root_cache_key(&resolve_absolute_path(root));
            let removed = store.remove(&key)?;
            match output_mode(cli) {
                OutputMode::Human => {
                    if removed {
                        println!("Cleared cache {key}");
                    } else {
                        println!("No cache for {}", resolve_absolute_path(root).display());
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "cache clear",
                        "key": key,
                        "removed": removed,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        CacheCommand::Path { root } => {
            let key = root_cache_key(&resolve_absolute_path(root));
            let path = store.path_for(&key);
            match output_mode(cli) {
                OutputMode::Human => println!("{}", path.display()),
                OutputMode::Json => {
                    let payload = json!({
                        "command": "cache path",
                        "key": key,
                        "path": path.to_string_lossy(),
                        "exists": path.exists(),
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Internal(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                if output_mode(cli) == OutputMode::Json {
                    let payload = json!({
                        "command": "config validate",
                        "valid": false,
                        "code": e.code(),
                        "error": e.to_string(),
                    });
                    write_json_line(&payload)?;
                }
                Err(e.into())
            }
        },
    }
}

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

/// Display projection shared by scan results and cached entries.
struct ListingRow<'a> {
    group: &'a str,
    name: &'a str,
    path: &'a Path,
    marker: Option<&'a Path>,
}

impl<'a> From<&'a DiscoveredRepository> for ListingRow<'a> {
    fn from(repo: &'a DiscoveredRepository) -> Self {
        Self {
            group: &repo.group_key,
            name: &repo.name,
            path: &repo.path,
            marker: repo.solution_marker_path.as_deref(),
        }
    }
}

impl<'a> From<&'a CachedRepository> for ListingRow<'a> {
    fn from(repo: &'a CachedRepository) -> Self {
        Self {
            group: &repo.group_key,
            name: &repo.name,
            path: &repo.path,
            marker: repo.solution_marker_path.as_deref(),
        }
    }
}

/// Rows arrive in presentation order; a header is printed whenever the group changes.
fn print_grouped(rows: &[ListingRow<'_>]) {
    let width = rows.iter().map(|r| r.name.len()).max().unwrap_or(0);
    let mut current: Option<&str> = None;
    for row in rows {
        if current.is_none_or(|g| !g.eq_ignore_ascii_case(row.group)) {
            if current.is_some() {
                println!();
            }
            println!("{}", row.group.bold());
            current = Some(row.group);
        }
        let marker = row
            .marker
            .and_then(Path::file_name)
            .map(|m| format!("  [{}]", m.to_string_lossy()))
            .unwrap_or_default();
        println!(
            "  {}  {}{}",
            format!("{:<width$}", row.name).green(),
            row.path.display().to_string().dimmed(),
            marker.cyan(),
        );
    }
}

fn cancel_on_signals() -> CancellationToken {
    let token = CancellationToken::new();
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, token.flag()) {
            eprintln!("[RDX-SIGNAL] failed to register signal {signal}: {e}");
        }
    }
    token
}

fn start_activity_logger(config: &Config) -> Option<(ActivityLoggerHandle, JoinHandle<()>)> {
    if !config.logging.enabled {
        return None;
    }
    let jsonl = JsonlConfig::from_logging(config.paths.activity_log.clone(), &config.logging);
    match spawn_activity_logger(ActivityLoggerConfig::new(jsonl)) {
        Ok((handle, join)) => Some((handle, join)),
        Err(e) => {
            eprintln!("[RDX-LOGGER] activity log disabled: {e}");
            None
        }
    }
}

fn stop_activity_logger(handle: &ActivityLoggerHandle, join: JoinHandle<()>) {
    handle.shutdown();
    if join.join().is_err() {
        eprintln!("[RDX-LOGGER] logger thread panicked");
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("REPODEX_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
