// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 PortManager Contributors

// PortManager - CLI Client
// Save SSH profiles with port forwards and connect to them by name

mod config;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use dialoguer::Confirm;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use portmanager_common::{
    display_command, format_timestamp, ActiveConnectionTracker, AuthMethod, ConnectOutcome,
    ConnectionLauncher, Error, ForwardDirection, ForwardRule, Liveness, Profile, ProfileStore,
    StatePaths, SystemRunner,
};

use config::CliConfig;

#[derive(Parser)]
#[command(name = "portmanager")]
#[command(about = "Save SSH connections with port forwards and connect by name", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log output (-d info, -dd debug)
    #[arg(short = 'd', long = "debug", action = ArgAction::Count, global = true)]
    debug: u8,

    /// Directory holding profiles and active connections (default: ~/.portmanager)
    #[arg(long, env = "PORTMANAGER_STATE_DIR", global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add or replace an SSH profile
    Add {
        /// Profile name
        name: String,

        /// Connection in user@host form
        connection: String,

        /// SSH port
        #[arg(short = 'p', long, default_value_t = 22)]
        port: u32,

        /// Path to SSH private key
        #[arg(short = 'k', long)]
        key: Option<PathBuf>,
    },

    /// Add a port forward to a profile
    Forward {
        /// Profile name
        profile: String,

        /// Local port
        local_port: u32,

        /// Remote port
        remote_port: u32,

        /// Host the server forwards to (local forwards only, default: localhost)
        #[arg(long, conflicts_with = "remote")]
        host: Option<String>,

        /// Remote forward (default: local)
        #[arg(short = 'R', long)]
        remote: bool,
    },

    /// List all saved profiles
    List {
        /// Show detailed information
        #[arg(short, long)]
        verbose: bool,

        /// Output as JSON for scripting
        #[arg(short, long)]
        json: bool,
    },

    /// Show detailed information about a profile
    Info {
        /// Profile name
        name: String,
    },

    /// Delete a profile
    Delete {
        /// Profile name
        name: String,

        /// Don't ask for confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Connect using a profile
    Connect {
        /// Profile name
        name: String,

        /// Run in background
        #[arg(short = 'b', long)]
        background: bool,
    },

    /// Stop a background connection
    Disconnect {
        /// Profile name
        name: String,
    },

    /// Show background connections
    Active {
        /// Forget connections whose process has exited
        #[arg(long)]
        prune: bool,

        /// Output as JSON for scripting
        #[arg(short, long)]
        json: bool,
    },

    /// Print the SSH command a profile connects with
    Command {
        /// Profile name
        name: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            ExitCode::from(exit_code(&err))
        }
    }
}

fn init_logging(level: u8) {
    let default_filter = match level {
        0 => "portmanager=warn,portmanager_common=warn",
        1 => "portmanager=info,portmanager_common=info",
        _ => "portmanager=debug,portmanager_common=debug",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = CliConfig::load()?;
    let paths = config.state_paths(cli.state_dir.as_deref())?;

    match cli.command {
        Commands::Add {
            name,
            connection,
            port,
            key,
        } => add_profile(&paths, &name, &connection, port, key),
        Commands::Forward {
            profile,
            local_port,
            remote_port,
            host,
            remote,
        } => add_forward(&paths, &profile, local_port, remote_port, host, remote),
        Commands::List { verbose, json } => list_profiles(&paths, verbose, json),
        Commands::Info { name } => show_profile_info(&paths, &config, &name),
        Commands::Delete { name, yes } => delete_profile(&paths, &name, yes),
        Commands::Connect { name, background } => connect(&paths, &config, &name, background),
        Commands::Disconnect { name } => disconnect(&paths, &config, &name),
        Commands::Active { prune, json } => show_active(&paths, &config, prune, json),
        Commands::Command { name } => {
            let launcher = open_launcher(&paths, &config);
            println!("{}", display_command(&launcher.command_for(&name)?));
            Ok(())
        }
    }
}

fn open_launcher(paths: &StatePaths, config: &CliConfig) -> ConnectionLauncher<SystemRunner> {
    ConnectionLauncher::new(
        ProfileStore::open(paths.profiles_file()),
        ActiveConnectionTracker::open(paths.active_file()),
        SystemRunner,
        config.launch_options(),
    )
}

/// Split `user@host`
fn parse_connection(connection: &str) -> Result<(&str, &str), Error> {
    match connection.split_once('@') {
        Some((user, host)) if !user.is_empty() && !host.is_empty() => Ok((user, host)),
        _ => Err(Error::Validation(format!(
            "Connection must be in format user@host (got '{}')",
            connection
        ))),
    }
}

fn add_profile(
    paths: &StatePaths,
    name: &str,
    connection: &str,
    port: u32,
    key: Option<PathBuf>,
) -> Result<()> {
    let (user, host) = parse_connection(connection)?;
    let mut store = ProfileStore::open(paths.profiles_file());
    let replacing = store.contains(name);

    let profile = store.add_or_replace(name, host, user, port, AuthMethod::from_key_path(key))?;

    let verb = if replacing { "replaced" } else { "saved" };
    println!("{}", format!("✓ Profile '{}' {}", name, verb).green().bold());
    println!("  {}", profile.endpoint());
    if let Some(key_path) = profile.key_path() {
        println!("  Key: {}", key_path.display());
    }
    Ok(())
}

fn add_forward(
    paths: &StatePaths,
    name: &str,
    local_port: u32,
    remote_port: u32,
    host: Option<String>,
    remote: bool,
) -> Result<()> {
    let direction = if remote {
        ForwardDirection::Remote
    } else {
        ForwardDirection::Local
    };
    let host = host.unwrap_or_else(|| "localhost".to_string());
    let rule = ForwardRule::new(direction, local_port, remote_port, host)?;
    let description = rule.describe();

    let mut store = ProfileStore::open(paths.profiles_file());
    store.add_forward(name, rule)?;

    println!(
        "{}",
        format!("✓ Added {} forward to '{}': {}", direction, name, description).green()
    );
    Ok(())
}

fn list_profiles(paths: &StatePaths, verbose: bool, json: bool) -> Result<()> {
    let store = ProfileStore::open(paths.profiles_file());
    let profiles = store.list();

    if json {
        let by_name: BTreeMap<&str, &Profile> =
            profiles.iter().map(|p| (p.name.as_str(), *p)).collect();
        println!("{}", serde_json::to_string_pretty(&by_name)?);
        return Ok(());
    }

    if profiles.is_empty() {
        println!("{}", "No profiles saved yet.".yellow());
        println!(
            "Create one with: {}",
            "portmanager add myserver user@host.com".cyan()
        );
        return Ok(());
    }

    if verbose {
        print_profiles_verbose(&profiles);
    } else {
        print_profiles_table(&profiles);
    }
    Ok(())
}

fn header(cells: &[&str]) -> Vec<Cell> {
    cells
        .iter()
        .map(|title| Cell::new(title).add_attribute(Attribute::Bold).fg(Color::Cyan))
        .collect()
}

fn print_profiles_table(profiles: &[&Profile]) {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header(&["Name", "Connection", "Auth", "Forwards", "Last used"]));

    for profile in profiles {
        let forwards = if profile.forwards.is_empty() {
            "-".to_string()
        } else {
            profile
                .forwards
                .iter()
                .map(ForwardRule::describe)
                .collect::<Vec<_>>()
                .join("\n")
        };

        table.add_row(vec![
            Cell::new(&profile.name).fg(Color::Green),
            Cell::new(profile.endpoint()),
            Cell::new(profile.auth.to_string()),
            Cell::new(forwards),
            Cell::new(profile.last_connected_display()).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{}", table);
    println!();
    println!("{} profile(s) found", profiles.len().to_string().cyan());
    println!();
}

fn print_profiles_verbose(profiles: &[&Profile]) {
    println!();
    println!(
        "{}",
        format!("Saved Profiles ({}):", profiles.len()).bold()
    );
    println!();
    for profile in profiles {
        print_profile(profile);
        println!();
    }
}

fn print_profile(profile: &Profile) {
    println!("  {}", profile.name.bold().green());
    println!("    Connection: {}", profile.endpoint());
    println!("    Auth: {}", profile.auth);
    if !profile.forwards.is_empty() {
        println!("    Forwards:");
        for forward in &profile.forwards {
            println!("      {}", forward.describe());
        }
    }
    println!("    Last used: {}", profile.last_connected_display());
}

fn show_profile_info(paths: &StatePaths, config: &CliConfig, name: &str) -> Result<()> {
    let launcher = open_launcher(paths, config);
    let profile = launcher.profiles().get(name)?;

    println!();
    print_profile(profile);
    println!("    Created: {}", format_timestamp(profile.created_at));
    println!(
        "    Command: {}",
        display_command(&launcher.command_for(name)?).dimmed()
    );

    if let Ok(active) = launcher.tracker().get(name) {
        println!(
            "    Active since: {}",
            format_timestamp(Some(active.started_at)).cyan()
        );
    }
    println!();
    Ok(())
}

fn delete_profile(paths: &StatePaths, name: &str, yes: bool) -> Result<()> {
    let mut store = ProfileStore::open(paths.profiles_file());

    if !store.contains(name) {
        println!("{}", format!("Profile '{}' does not exist", name).dimmed());
        return Ok(());
    }

    if !yes {
        let confirm = Confirm::new()
            .with_prompt(format!(
                "Are you sure you want to delete profile '{}'?",
                name.yellow()
            ))
            .default(false)
            .interact()?;

        if !confirm {
            println!("{}", "Deletion cancelled".dimmed());
            return Ok(());
        }
    }

    store.delete(name)?;
    println!("{}", format!("✓ Profile '{}' deleted", name).green());
    Ok(())
}

fn connect(paths: &StatePaths, config: &CliConfig, name: &str, background: bool) -> Result<()> {
    let mut launcher = open_launcher(paths, config);
    let profile = launcher.profiles().get(name)?;

    println!();
    println!("{}", format!("Connecting to '{}'...", name).bold());
    println!("  {}", profile.endpoint());
    if !profile.forwards.is_empty() {
        println!();
        println!("{}", "  Port Forwards:".bold());
        for forward in &profile.forwards {
            println!("    {}", forward.describe());
        }
    }
    println!();
    println!(
        "  Command: {}",
        display_command(&launcher.command_for(name)?).dimmed()
    );
    println!();

    match launcher.connect(name, background)? {
        ConnectOutcome::Finished => {
            println!("{}", "✓ Connection closed".green());
        }
        ConnectOutcome::Background { pid } => {
            let pid = pid
                .map(|pid| format!(" (PID {})", pid))
                .unwrap_or_default();
            println!(
                "{}",
                format!("✓ Connection started in background{}", pid)
                    .green()
                    .bold()
            );
            println!(
                "{}",
                format!("Stop it with: portmanager disconnect {}", name).dimmed()
            );
        }
    }
    Ok(())
}

fn disconnect(paths: &StatePaths, config: &CliConfig, name: &str) -> Result<()> {
    let mut launcher = open_launcher(paths, config);
    let outcome = launcher
        .disconnect(name)
        .with_context(|| format!("No active connection for '{}'", name))?;

    match (outcome.pid, outcome.terminated) {
        (Some(pid), true) => println!(
            "{}",
            format!("✓ Stopped '{}' (PID {})", name, pid).green().bold()
        ),
        (Some(pid), false) => println!(
            "{}",
            format!("✓ '{}' was no longer running (PID {}), entry cleared", name, pid).green()
        ),
        (None, _) => println!("{}", format!("✓ Entry for '{}' cleared", name).green()),
    }
    Ok(())
}

fn show_active(paths: &StatePaths, config: &CliConfig, prune: bool, json: bool) -> Result<()> {
    let mut launcher = open_launcher(paths, config);

    if prune {
        for name in launcher.prune_stale()? {
            println!("{}", format!("Removed stale entry '{}'", name).dimmed());
        }
    }

    let active = launcher.active();

    if json {
        let by_name: BTreeMap<&str, _> = active
            .iter()
            .map(|status| (status.connection.profile_name.as_str(), status.connection))
            .collect();
        println!("{}", serde_json::to_string_pretty(&by_name)?);
        return Ok(());
    }

    if active.is_empty() {
        println!("{}", "No active background connections.".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header(&["Name", "Connection", "Started", "PID", "Status", "Forwards"]));

    for status in &active {
        let connection = status.connection;
        let snapshot = &connection.snapshot;

        let state = match status.liveness {
            Liveness::Running => Cell::new("running").fg(Color::Green),
            Liveness::Exited => Cell::new("exited").fg(Color::Red),
            Liveness::Unknown => Cell::new("unknown").fg(Color::Yellow),
        };

        let mut name = connection.profile_name.clone();
        if status.orphaned {
            name.push_str(" (deleted)");
        }

        let forwards = snapshot
            .forwards
            .iter()
            .map(ForwardRule::describe)
            .collect::<Vec<_>>()
            .join("\n");

        table.add_row(vec![
            Cell::new(name).fg(Color::Green),
            Cell::new(snapshot.endpoint()),
            Cell::new(format_timestamp(Some(connection.started_at))),
            Cell::new(
                connection
                    .pid
                    .map(|pid| pid.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            state,
            Cell::new(if forwards.is_empty() { "-".to_string() } else { forwards }),
        ]);
    }

    println!();
    println!("{}", table);
    println!();
    println!(
        "{} active connection(s)",
        active.len().to_string().cyan()
    );
    println!();
    Ok(())
}

fn report_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "✗ Error:".red().bold(), err);

    if let Some(Error::NotFound { available, .. }) = err.downcast_ref::<Error>() {
        if !available.is_empty() {
            eprintln!();
            eprintln!("Available:");
            for name in available {
                eprintln!("  - {}", name);
            }
        }
    }
}

/// Highest exit code with a meaning of our own
const LAST_RESERVED_EXIT: u8 = 6;

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        Some(Error::Validation(_)) => 2,
        Some(Error::NotFound { .. }) => 3,
        Some(Error::Launch { .. }) | Some(Error::AlreadyActive { .. }) => 4,
        // ssh codes that would read as one of ours collapse to 5
        Some(Error::Exited { code, .. }) => code
            .and_then(|code| u8::try_from(code).ok())
            .filter(|code| *code > LAST_RESERVED_EXIT)
            .unwrap_or(5),
        Some(Error::Storage(_)) => 6,
        None => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_connection() {
        assert_eq!(
            parse_connection("admin@db.example.com").unwrap(),
            ("admin", "db.example.com")
        );
        assert!(matches!(
            parse_connection("db.example.com"),
            Err(Error::Validation(_))
        ));
        assert!(parse_connection("@host").is_err());
        assert!(parse_connection("user@").is_err());
    }

    #[test]
    fn test_parse_forward_command() {
        let cli = Cli::parse_from(["portmanager", "forward", "db", "5432", "5432", "--remote"]);
        match cli.command {
            Commands::Forward {
                profile,
                local_port,
                remote_port,
                host,
                remote,
            } => {
                assert_eq!(profile, "db");
                assert_eq!(local_port, 5432);
                assert_eq!(remote_port, 5432);
                assert_eq!(host, None);
                assert!(remote);
            }
            _ => panic!("expected forward command"),
        }
    }

    #[test]
    fn test_forward_host_conflicts_with_remote() {
        let result = Cli::try_parse_from([
            "portmanager", "forward", "db", "9000", "3000", "--remote", "--host", "db.internal",
        ]);
        assert!(result.is_err());

        let cli = Cli::parse_from([
            "portmanager", "forward", "db", "5433", "5432", "--host", "db.internal",
        ]);
        assert!(matches!(
            cli.command,
            Commands::Forward { host: Some(ref host), remote: false, .. } if host == "db.internal"
        ));
    }

    #[test]
    fn test_debug_flag_counts() {
        let cli = Cli::parse_from(["portmanager", "-dd", "list", "--verbose"]);
        assert_eq!(cli.debug, 2);
        assert!(matches!(cli.command, Commands::List { verbose: true, .. }));

        let cli = Cli::parse_from(["portmanager", "active", "--debug"]);
        assert_eq!(cli.debug, 1);
    }

    #[test]
    fn test_exit_codes() {
        let validation = anyhow::Error::new(Error::Validation("bad".to_string()));
        assert_eq!(exit_code(&validation), 2);

        let missing = anyhow::Error::new(Error::NotFound {
            name: "db".to_string(),
            available: Vec::new(),
        })
        .context("No active connection for 'db'");
        assert_eq!(exit_code(&missing), 3);

        let exited = anyhow::Error::new(Error::Exited {
            name: "db".to_string(),
            code: Some(255),
        });
        assert_eq!(exit_code(&exited), 255);

        let signalled = anyhow::Error::new(Error::Exited {
            name: "db".to_string(),
            code: None,
        });
        assert_eq!(exit_code(&signalled), 5);

        // ssh statuses that would collide with our own codes
        for code in 1..=6 {
            let collided = anyhow::Error::new(Error::Exited {
                name: "db".to_string(),
                code: Some(code),
            });
            assert_eq!(exit_code(&collided), 5, "ssh exit {}", code);
        }
        let high = anyhow::Error::new(Error::Exited {
            name: "db".to_string(),
            code: Some(7),
        });
        assert_eq!(exit_code(&high), 7);

        assert_eq!(exit_code(&anyhow::anyhow!("other")), 1);
    }
}
