//! Loom CLI - inspect plugins and resolve per-repository commands.
//!
//! Output goes to stdout (plain or `--json`); logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loom_core::{CommandKind, LoomApi, SourceSpec, DEFAULT_CONCURRENCY};
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "loom")]
#[command(about = "Plugin-driven command resolution for multi-repo workspaces")]
struct Args {
    /// Workspace root (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage plugins
    #[command(subcommand)]
    Plugins(PluginsCommand),

    /// Resolve a command (test, lint, start) across repositories
    Resolve {
        kind: CommandKind,

        /// Only resolve this repository
        #[arg(long)]
        repo: Option<String>,

        /// Repositories resolved concurrently
        #[arg(short = 'j', long, default_value_t = DEFAULT_CONCURRENCY)]
        concurrency: usize,
    },

    /// Show the runner used for a repository
    Runner { repo: String },

    /// Show the command that opens a repository in an editor
    Editor {
        repo: String,

        /// Editor plugin id
        #[arg(long, default_value = "vscode")]
        editor: String,
    },
}

#[derive(Subcommand, Debug)]
enum PluginsCommand {
    /// List registered plugins, including built-ins
    List,
    /// List plugins recorded in the lock file
    Installed,
    /// Install a plugin and register it
    Install {
        id: String,
        /// Version, git URL, tarball URL or local path (defaults to latest)
        source: Option<String>,
    },
    /// Remove an installed plugin
    Remove { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::WARN };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_ascii_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let root = match args.root {
        Some(path) => path,
        None => std::env::current_dir().context("Unable to determine current directory")?,
    };
    debug!("Workspace root: {}", root.display());

    let api = LoomApi::new(&root)
        .with_context(|| format!("Failed to open workspace {}", root.display()))?;
    let report = api.initialize().await;
    for failure in &report.failed {
        debug!("Skipped {}: {}", failure.source, failure.reason);
    }

    match args.command {
        Command::Plugins(command) => run_plugins(&api, command, args.json).await,
        Command::Resolve {
            kind,
            repo,
            concurrency,
        } => run_resolve(&api, kind, repo, concurrency, args.json).await,
        Command::Runner { repo } => {
            let runner = api.command_runner(&repo).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&runner)?);
            } else {
                println!("{}", runner);
            }
            Ok(())
        }
        Command::Editor { repo, editor } => {
            let argv = api.editor_command(&repo, &editor).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&argv)?);
            } else {
                println!("{}", argv.join(" "));
            }
            Ok(())
        }
    }
}

async fn run_plugins(api: &LoomApi, command: PluginsCommand, json: bool) -> Result<()> {
    match command {
        PluginsCommand::List => {
            let plugins = api.list_plugins().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&plugins)?);
            } else {
                for plugin in plugins {
                    println!(
                        "{:<20} {:<16} {:<10} {}",
                        plugin.id,
                        plugin.kind.to_string(),
                        plugin.version,
                        plugin.origin
                    );
                }
            }
        }
        PluginsCommand::Installed => {
            let installed = api.installed_plugins()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&installed)?);
            } else if installed.is_empty() {
                println!("No plugins installed");
            } else {
                for record in installed {
                    println!(
                        "{:<20} {:<10} {}:{}",
                        record.id,
                        record.version,
                        record.source,
                        record.location
                    );
                }
            }
        }
        PluginsCommand::Install { id, source } => {
            let spec = source.map(SourceSpec::from).unwrap_or_default();
            let result = api
                .install_plugin(&id, &spec)
                .await
                .with_context(|| format!("Failed to install {}", id))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!(
                    "Installed {}@{} into {}",
                    result.record.id,
                    result.record.version,
                    result.record.path.display()
                );
                for (plugin, outcome) in result.outcomes {
                    println!("  {}: {}", plugin, outcome);
                }
            }
        }
        PluginsCommand::Remove { id } => {
            let record = api.remove_plugin(&id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!("Removed {}@{}", record.id, record.version);
            }
        }
    }
    Ok(())
}

async fn run_resolve(
    api: &LoomApi,
    kind: CommandKind,
    repo: Option<String>,
    concurrency: usize,
    json: bool,
) -> Result<()> {
    let results = match repo {
        Some(name) => {
            let resolution = api.resolve(&name, kind).await?;
            let (config, path) = api.repo(&name)?;
            vec![loom_core::RepoResolution {
                repo: name,
                path,
                library: config.library,
                resolution,
            }]
        }
        None => api.resolve_all(kind, concurrency).await,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    for result in results {
        match result.resolution.command_line() {
            Some(line) => println!("{:<24} {}", result.repo, line),
            None => println!("{:<24} (skipped)", result.repo),
        }
    }
    Ok(())
}
