//! nodetree command-line tool.
//!
//! Provides subcommands for generating and validating configuration files,
//! listing node-level changes between commits, and merging or rebasing
//! branches of a node repository.

mod conflicts;
mod diff;
mod merge;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use git2::Signature;
use tracing_subscriber::EnvFilter;

use nodetree_core::config::AppConfig;
use nodetree_core::merge::ConflictStrategy;
use nodetree_core::store::NodeStore;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// nodetree command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "nodetree",
    version,
    about = "Diff, merge and rebase node trees stored in git"
)]
struct Cli {
    /// Path to the TOML configuration file
    /// (default: ~/.config/nodetree/config.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./nodetree.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// List node changes between two commits.
    Diff {
        /// Old commit-ish.
        old: String,

        /// New commit-ish (default: the configured default branch).
        new: Option<String>,

        /// Only show nodes whose folder path matches this glob.
        #[arg(short, long)]
        filter: Option<String>,

        /// Print changes as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Merge an upstream into a branch.
    Merge {
        /// Branch to merge into.
        branch: String,

        /// Upstream commit-ish (default: the branch's configured upstream).
        #[arg(short, long)]
        upstream: Option<String>,

        /// Conflict strategy: manual, accept_ours or accept_theirs.
        #[arg(short, long)]
        strategy: Option<ConflictStrategy>,
    },

    /// Replay a branch's commits onto an upstream.
    Rebase {
        /// Branch to rebase.
        branch: String,

        /// Upstream commit-ish (default: the branch's configured upstream).
        #[arg(short, long)]
        upstream: Option<String>,

        /// Conflict strategy: manual, accept_ours or accept_theirs.
        #[arg(short, long)]
        strategy: Option<ConflictStrategy>,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(default_config_path);

    match cli.command {
        Commands::Init { output } => {
            init_tracing("warn");
            cmd_init(&output)
        }
        Commands::Validate => {
            init_tracing("warn");
            cmd_validate(&config_path)
        }
        command => {
            // Everything else works against the configured repository
            let config = load_config(&config_path)?;
            init_tracing(&config.logging.level);
            let store = open_store(&config)?;
            tracing::debug!(
                config = %config_path.display(),
                repository = %config.repository.path.display(),
                "repository opened"
            );

            match command {
                Commands::Diff {
                    old,
                    new,
                    filter,
                    json,
                } => {
                    let new = new.unwrap_or_else(|| config.repository.default_branch.clone());
                    diff::run_diff(&config, &store, &old, &new, filter.as_deref(), json)
                }
                Commands::Merge {
                    branch,
                    upstream,
                    strategy,
                } => merge::run_merge(&config, &store, &branch, upstream.as_deref(), strategy),
                Commands::Rebase {
                    branch,
                    upstream,
                    strategy,
                } => merge::run_rebase(&config, &store, &branch, upstream.as_deref(), strategy),
                Commands::Init { .. } | Commands::Validate => Ok(()),
            }
        }
    }
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("nodetree").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("nodetree.toml"))
}

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_and_resolve(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

fn open_store(config: &AppConfig) -> Result<NodeStore> {
    let serializer = config
        .serializer()
        .context("failed to build node schema from configuration")?;
    NodeStore::open(&config.repository.path, serializer).with_context(|| {
        format!(
            "failed to open node repository at {}",
            config.repository.path.display()
        )
    })
}

/// Identity for commits the CLI writes: the repository's configured user,
/// or a generic one when none is set.
pub(crate) fn commit_signature(store: &NodeStore) -> Result<Signature<'static>> {
    match store.git().repo().signature() {
        Ok(signature) => Ok(signature.to_owned()),
        Err(_) => Signature::now("nodetree", "nodetree@localhost")
            .context("failed to build commit signature"),
    }
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# nodetree configuration

[repository]
path = "/srv/nodes.git"
default_branch = "main"
# path_env = "NODETREE_REPO"

[merge]
# manual | accept_ours | accept_theirs
strategy = "manual"
# reject | conflict
added_under_deleted = "reject"

[comparison]
ignored_properties = []
# max_differences = 10

[serializer]
pretty = true
verify_references = false

[logging]
level = "info"

[[node_types]]
name = "Application"
folder = "Applications"
properties = [
    { name = "title" },
    { name = "description" },
    { name = "owner", kind = "reference" },
    { name = "tags", comparer = "unordered" },
]

[[node_types]]
name = "Table"
folder = "Tables"
properties = [{ name = "name", comparer = "case_insensitive" }]
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!(
        "{}",
        style::success(&format!(
            "Default configuration written to {}",
            output.display()
        ))
    );
    println!();
    println!("Next steps:");
    println!("  1. Point repository.path at your node repository");
    println!("  2. Declare your node types under [[node_types]]");
    println!(
        "  3. Validate with: nodetree validate --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  {}", style::success("TOML structure is valid"));

    config
        .resolve_env_vars()
        .context("failed to apply environment overrides")?;
    println!("  {}", style::success("Environment overrides processed"));

    if let Err(e) = config.validate() {
        println!("  {}", style::error(&format!("Validation error: {}", e)));
        anyhow::bail!("configuration validation failed");
    }
    println!("  {}", style::success("All required fields are valid"));

    let schema = match config.schema() {
        Ok(schema) => schema,
        Err(e) => {
            println!("  {}", style::error(&format!("Schema error: {}", e)));
            anyhow::bail!("configuration validation failed");
        }
    };
    println!("  {}", style::success("Node schema builds"));

    println!();
    println!("{}", style::header("Configuration summary:"));
    println!("  Repository      : {}", config.repository.path.display());
    println!(
        "  Repository found: {}",
        if config.repository.path.exists() {
            "yes"
        } else {
            "NO"
        }
    );
    println!("  Default branch  : {}", config.repository.default_branch);
    println!("  Conflict strategy: {}", config.merge.strategy);
    println!("  Node types      : {}", schema.len());
    for node_type in &config.node_types {
        println!(
            "    {:<16} {:<16} {} properties",
            node_type.name,
            node_type.folder,
            node_type.properties.len()
        );
    }
    if !config.comparison.ignored_properties.is_empty() {
        println!(
            "  Ignored props   : {}",
            config.comparison.ignored_properties.join(", ")
        );
    }
    println!();
    println!("Configuration is valid.");

    Ok(())
}
