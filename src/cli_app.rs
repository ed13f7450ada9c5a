//! Top-level CLI definition and dispatch.
//!
//! The CLI is an offline operator tool over the SQLite sanction store; it
//! never talks to the membership platform.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use sanction_warden::core::config::Config;
use sanction_warden::core::model::{CommunityId, Sanction, SanctionKey, SubjectId};
use sanction_warden::store::{SanctionStore, SqliteSanctionStore};

/// Sanction Warden: durable timed sanctions with expiry and rejoin enforcement.
#[derive(Debug, Parser)]
#[command(
    name = "swd",
    author,
    version,
    about = "Sanction Warden - timed sanction store inspector",
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
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// List persisted sanctions, soonest expiry first.
    List(ListArgs),
    /// Show the sanction recorded for one subject.
    Show(KeyArgs),
    /// List sanctions that are due and waiting for a sweep.
    Expired,
    /// Drop a sanction record without touching the platform.
    Forget(KeyArgs),
    /// View configuration state.
    Config(ConfigArgs),
    /// Show version and optional build metadata.
    Version(VersionArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct ListArgs {
    /// Only sanctions in this community.
    #[arg(long, value_name = "ID")]
    community: Option<u64>,
}

#[derive(Debug, Clone, Args)]
struct KeyArgs {
    /// Community identifier.
    #[arg(value_name = "COMMUNITY")]
    community: u64,
    /// Subject identifier.
    #[arg(value_name = "SUBJECT")]
    subject: u64,
}

impl KeyArgs {
    const fn key(&self) -> SanctionKey {
        SanctionKey::new(CommunityId(self.community), SubjectId(self.subject))
    }
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args, Default)]
struct VersionArgs {
    /// Include additional build metadata fields.
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
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
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
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
            Self::Json(_) => 3,
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::List(args) => run_list(cli, args),
        Command::Show(args) => run_show(cli, args),
        Command::Expired => run_expired(cli),
        Command::Forget(args) => run_forget(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Version(args) => emit_version(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ──────────────────── store commands ────────────────────

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Config::load(cli.config.as_deref()).map_err(|e| CliError::Runtime(e.to_string()))
}

fn open_store(cli: &Cli) -> Result<SqliteSanctionStore, CliError> {
    let config = load_config(cli)?;
    SqliteSanctionStore::open(&config.paths.sqlite_db)
        .map_err(|e| CliError::Runtime(format!("open sanction store: {e}")))
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

fn run_list(cli: &Cli, args: &ListArgs) -> Result<(), CliError> {
    let store = open_store(cli)?;
    let records = store
        .list(args.community.map(CommunityId))
        .map_err(|e| CliError::Runtime(e.to_string()))?;
    emit_records(cli, "list", &records)
}

fn run_expired(cli: &Cli) -> Result<(), CliError> {
    let store = open_store(cli)?;
    let records = store
        .select_expired(now_secs())
        .map_err(|e| CliError::Runtime(e.to_string()))?;
    emit_records(cli, "expired", &records)
}

fn run_show(cli: &Cli, args: &KeyArgs) -> Result<(), CliError> {
    let store = open_store(cli)?;
    let key = args.key();
    let record = store
        .fetch(&key)
        .map_err(|e| CliError::Runtime(e.to_string()))?;
    let now = now_secs();

    match output_mode(cli) {
        OutputMode::Human => match &record {
            Some(record) => {
                println!("Sanction on {key}");
                println!("  Status:     {}", status_label(record, now));
                println!("  Reason:     {}", record.reason);
                println!("  Imposed at: {}", format_timestamp(record.imposed_at));
                println!("  Expires at: {}", format_timestamp(record.expires_at));
                if record.is_active_at(now) {
                    println!(
                        "  Remaining:  {}",
                        format_duration(remaining_secs(record, now))
                    );
                }
            }
            None => println!("No sanction recorded for {key}"),
        },
        OutputMode::Json => {
            let payload = json!({
                "command": "show",
                "key": key,
                "sanction": record.as_ref().map(|r| record_json(r, now)),
            });
            write_json_line(&payload)?;
        }
    }

    if record.is_none() {
        return Err(CliError::User(format!("no sanction recorded for {key}")));
    }
    Ok(())
}

fn run_forget(cli: &Cli, args: &KeyArgs) -> Result<(), CliError> {
    let store = open_store(cli)?;
    let key = args.key();
    let removed = store
        .delete(&key)
        .map_err(|e| CliError::Runtime(e.to_string()))?;

    match output_mode(cli) {
        OutputMode::Human => {
            if removed {
                println!("Forgot sanction on {key}. The platform restriction was not touched.");
            } else {
                println!("No sanction recorded for {key}");
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "forget",
                "key": key,
                "removed": removed,
            }))?;
        }
    }
    Ok(())
}

fn emit_records(cli: &Cli, command: &str, records: &[Sanction]) -> Result<(), CliError> {
    let now = now_secs();
    match output_mode(cli) {
        OutputMode::Human => {
            if records.is_empty() {
                println!("No sanctions.");
                return Ok(());
            }
            println!(
                "{:<24} {:<8} {:<20} {:<12} REASON",
                "KEY", "STATUS", "EXPIRES", "REMAINING"
            );
            for record in records {
                let remaining = if record.is_active_at(now) {
                    format_duration(remaining_secs(record, now))
                } else {
                    "-".to_string()
                };
                println!(
                    "{:<24} {:<8} {:<20} {:<12} {}",
                    record.key().to_string(),
                    status_label(record, now),
                    format_timestamp(record.expires_at),
                    remaining,
                    record.reason
                );
            }
        }
        OutputMode::Json => {
            let sanctions: Vec<Value> = records.iter().map(|r| record_json(r, now)).collect();
            write_json_line(&json!({
                "command": command,
                "count": records.len(),
                "sanctions": sanctions,
            }))?;
        }
    }
    Ok(())
}

fn record_json(record: &Sanction, now: i64) -> Value {
    json!({
        "community_id": record.community_id,
        "subject_id": record.subject_id,
        "imposed_at": record.imposed_at,
        "expires_at": record.expires_at,
        "reason": record.reason,
        "active": record.is_active_at(now),
        "remaining_secs": remaining_secs(record, now).as_secs(),
    })
}

fn status_label(record: &Sanction, now: i64) -> String {
    if record.is_active_at(now) {
        "active".green().to_string()
    } else {
        "due".yellow().to_string()
    }
}

fn remaining_secs(record: &Sanction, now: i64) -> Duration {
    u64::try_from(record.expires_at.saturating_sub(now)).map_or(Duration::ZERO, Duration::from_secs)
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
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
            let config = load_config(cli)?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let value = serde_json::to_value(&config)?;
                    let payload = json!({
                        "command": "config show",
                        "config": value,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config
                    .stable_hash()
                    .map_err(|e| CliError::Runtime(e.to_string()))?;

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
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ──────────────────── output helpers ────────────────────

fn format_timestamp(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0).map_or_else(
        || secs.to_string(),
        |dt| dt.format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

fn emit_version(cli: &Cli, args: &VersionArgs) -> Result<(), CliError> {
    let version = env!("CARGO_PKG_VERSION");
    let package = env!("CARGO_PKG_NAME");
    let target = option_env!("TARGET").unwrap_or("unknown");
    let profile = option_env!("PROFILE").unwrap_or("unknown");

    match output_mode(cli) {
        OutputMode::Human => {
            println!("swd {version}");
            if args.verbose {
                println!("package: {package}");
                println!("target: {target}");
                println!("profile: {profile}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "binary": "swd",
                "version": version,
                "package": package,
                "build": {
                    "target": target,
                    "profile": profile,
                }
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("SWD_OUTPUT_FORMAT").ok();
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
