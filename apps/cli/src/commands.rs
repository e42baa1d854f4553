//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use grove_core::{
    BuildConfig, BuildProgress, BuildReport, DatasheetTools, ManifestSource, ServiceBridge,
    TreeOutcome, build_knowledge_tree, tool_definitions,
};
use grove_shared::{AppConfig, CacheKey, init_config, load_config, load_config_from, validate_api_key};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Grove: organize datasheet pages into a navigable knowledge tree.
#[derive(Parser)]
#[command(
    name = "grove",
    version,
    about = "Organize classified datasheet pages into a knowledge tree and query it.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file to use instead of ~/.grove/grove.toml.
    #[arg(long, global = true, env = "GROVE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Classify the corpus and build the knowledge tree.
    Build {
        /// Reclassify even if a manifest already exists.
        #[arg(long)]
        force: bool,

        /// Skip classification and use the manifest on disk.
        #[arg(long)]
        skip_classify: bool,

        /// Stop after classification.
        #[arg(long)]
        skip_tree: bool,

        /// Corpus directory (overrides config).
        #[arg(long)]
        corpus: Option<String>,

        /// Output directory for manifest and tree (overrides config).
        #[arg(long)]
        context: Option<String>,
    },

    /// List configurations, optionally filtered.
    List {
        /// Search term matched against configuration names and ids.
        query: Option<String>,
    },

    /// Print the technical context for one configuration.
    Read {
        /// Configuration id, as shown by `list`.
        config_id: String,
    },

    /// Print the tool catalogue as JSON.
    Tools,

    /// Invoke a tool by name with JSON arguments.
    Call {
        /// Tool name.
        name: String,

        /// JSON argument object.
        #[arg(default_value = "{}")]
        args: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "grove=info",
        1 => "grove=debug",
        _ => "grove=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so tool output on stdout stays clean.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Build {
            force,
            skip_classify,
            skip_tree,
            corpus,
            context,
        } => {
            let mut config = resolve_config(config_path.as_ref())?;
            if let Some(dir) = corpus {
                config.paths.corpus_dir = dir;
            }
            if let Some(dir) = context {
                config.paths.context_dir = dir;
            }
            let build = BuildConfig {
                force,
                classify: !skip_classify,
                construct: !skip_tree,
                ..BuildConfig::from(&config)
            };
            cmd_build(&config, &build)
        }
        Command::List { query } => {
            let tools = datasheet_tools(&resolve_config(config_path.as_ref())?);
            print!("{}", tools.list_datasheet_configurations(query.as_deref().unwrap_or(""))?);
            Ok(())
        }
        Command::Read { config_id } => {
            let tools = datasheet_tools(&resolve_config(config_path.as_ref())?);
            print!("{}", tools.read_technical_specs(&config_id)?);
            Ok(())
        }
        Command::Tools => {
            println!("{}", serde_json::to_string_pretty(&tool_definitions())?);
            Ok(())
        }
        Command::Call { name, args } => {
            let args: serde_json::Value =
                serde_json::from_str(&args).map_err(|e| eyre!("invalid JSON arguments: {e}"))?;
            let tools = datasheet_tools(&resolve_config(config_path.as_ref())?);
            print!("{}", tools.call(&name, &args)?);
            Ok(())
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path.as_ref()),
        },
    }
}

fn resolve_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

fn datasheet_tools(config: &AppConfig) -> DatasheetTools {
    DatasheetTools::new(config.paths.tree_path(), &config.paths.corpus_dir)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_build(config: &AppConfig, build: &BuildConfig) -> Result<()> {
    if needs_model(build) {
        validate_api_key(config)?;
    }

    info!(
        corpus = %build.corpus_dir.display(),
        force = build.force,
        classify = build.classify,
        construct = build.construct,
        "building knowledge tree"
    );

    let mut classifier = ServiceBridge::classifier(&config.bridge);
    let mut constructor = ServiceBridge::tree_constructor(&config.bridge);
    let reporter = CliProgress::new()?;

    let report = build_knowledge_tree(build, &mut classifier, &mut constructor, &reporter);
    reporter.spinner.finish_and_clear();
    classifier.shutdown();
    constructor.shutdown();
    let report = report?;

    print_report(&report);
    Ok(())
}

/// Whether the build will call a model. A reusable manifest with
/// construction disabled needs no bridge and no API key.
fn needs_model(build: &BuildConfig) -> bool {
    let manifest_reusable = !build.force
        && build.cache_key == CacheKey::Existence
        && build.manifest_path.exists();
    build.construct || (build.classify && !manifest_reusable)
}

fn print_report(report: &BuildReport) {
    println!();
    println!("  Build complete!");
    match &report.manifest_source {
        ManifestSource::Cached => println!("  Manifest: reused cached manifest"),
        ManifestSource::Classified { pages, failures } => {
            println!("  Manifest: classified {pages} pages ({failures} failed)")
        }
        ManifestSource::Loaded => println!("  Manifest: loaded from disk"),
        ManifestSource::Unused => println!("  Manifest: not used"),
    }
    println!("  Relevant: {} pages", report.manifest_len);
    match &report.tree {
        TreeOutcome::Built {
            node_count,
            configurations,
        } => println!("  Tree:     {node_count} nodes, {configurations} configurations"),
        TreeOutcome::SkippedEmptyManifest { stale_tree_kept } => {
            println!("  Tree:     skipped (no relevant pages)");
            if *stale_tree_kept {
                println!(
                    "            previous tree kept, now stale: {}",
                    report.tree_path.display()
                );
            }
        }
        TreeOutcome::NotRequested => println!("  Tree:     not requested"),
    }
    println!("  Paths:    {}", report.manifest_path.display());
    if matches!(report.tree, TreeOutcome::Built { .. }) {
        println!("            {}", report.tree_path.display());
    }
    println!("  Time:     {:.1}s", report.elapsed.as_secs_f64());
    println!();
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&PathBuf>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Result<Self> {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")?
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Ok(Self { spinner })
    }
}

impl BuildProgress for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn page_classified(&self, page_id: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Classifying [{current}/{total}] {page_id}"));
    }

    fn done(&self, _report: &BuildReport) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_config(dir: &std::path::Path) -> BuildConfig {
        let mut config = AppConfig::default();
        config.paths.context_dir = dir.to_string_lossy().into_owned();
        BuildConfig::from(&config)
    }

    #[test]
    fn cli_parses_build_flags() {
        let cli = Cli::parse_from(["grove", "build", "--force", "--skip-tree", "--corpus", "pdf"]);
        match cli.command {
            Command::Build {
                force,
                skip_tree,
                skip_classify,
                corpus,
                ..
            } => {
                assert!(force);
                assert!(skip_tree);
                assert!(!skip_classify);
                assert_eq!(corpus.as_deref(), Some("pdf"));
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn cli_call_defaults_to_empty_args() {
        let cli = Cli::parse_from(["grove", "-v", "call", "list_datasheet_configurations"]);
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Command::Call { name, args } => {
                assert_eq!(name, "list_datasheet_configurations");
                assert_eq!(args, "{}");
            }
            _ => panic!("expected call"),
        }
    }

    #[test]
    fn cached_classification_only_needs_no_model() {
        let tmp = tempfile::tempdir().unwrap();
        let mut build = build_config(tmp.path());
        build.construct = false;
        assert!(needs_model(&build));

        std::fs::write(&build.manifest_path, "[]").unwrap();
        assert!(!needs_model(&build));

        build.force = true;
        assert!(needs_model(&build));
    }

    #[test]
    fn construction_always_needs_model() {
        let tmp = tempfile::tempdir().unwrap();
        let mut build = build_config(tmp.path());
        build.classify = false;
        assert!(needs_model(&build));
    }
}
