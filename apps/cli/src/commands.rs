//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use patientsplit_core::pipeline::{ProgressReporter, ResolveResult, resolve_document};
use patientsplit_core::split::{build_manifest, render_metadata, sha256_hex, write_split};
use patientsplit_extract::Extractor;
use patientsplit_shared::{
    AppConfig, MetadataFormat, PageRecords, PageText, PatientSplitError, ResolveConfig,
    config_file_path, init_config, load_config, load_config_from,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// patientsplit: split multi-patient scanned documents by patient identity.
#[derive(Parser)]
#[command(
    name = "patientsplit",
    version,
    about = "Resolve which pages of a multi-patient scanned document belong to which patient.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.patientsplit/patientsplit.toml.
    #[arg(long, global = true, env = "PATIENTSPLIT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// What the `--input` file contains.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum InputKind {
    /// JSON array of per-page identifier records.
    Records,
    /// JSON array of OCR page text, run through field extraction first.
    Text,
}

/// Split metadata format.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum FormatArg {
    Json,
    Toml,
}

impl From<FormatArg> for MetadataFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Json => MetadataFormat::Json,
            FormatArg::Toml => MetadataFormat::Toml,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Link identities, assign pages, and write split metadata.
    Resolve {
        /// Input JSON file.
        #[arg(short, long)]
        input: PathBuf,

        /// Input file contents.
        #[arg(long, value_enum, default_value = "records")]
        input_kind: InputKind,

        /// Output directory (defaults to `output.output_dir` from config).
        #[arg(short, long, env = "PATIENTSPLIT_OUT")]
        out: Option<PathBuf>,

        /// Only merge clusters whose MRN or DOB agree exactly.
        #[arg(long)]
        strict: bool,

        /// Assign every page with any evidence to its best cluster.
        #[arg(long)]
        force_assign: bool,

        /// Worker threads for scoring (defaults to one per core).
        #[arg(long)]
        threads: Option<usize>,

        /// Metadata format (defaults to `output.metadata_format` from config).
        #[arg(long, value_enum)]
        format: Option<FormatArg>,

        /// Print the split manifest instead of writing files.
        #[arg(long)]
        dry_run: bool,
    },

    /// Extract identifier records from OCR page text and print them as JSON.
    Extract {
        /// JSON array of page text.
        #[arg(short, long)]
        input: PathBuf,
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
    /// Check weights, thresholds, and extraction patterns.
    Validate,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr; stdout carries
/// command output.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "patientsplit=info",
        1 => "patientsplit=debug",
        _ => "patientsplit=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

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
        Command::Resolve {
            input,
            input_kind,
            out,
            strict,
            force_assign,
            threads,
            format,
            dry_run,
        } => cmd_resolve(ResolveArgs {
            config_path,
            input,
            input_kind,
            out,
            strict,
            force_assign,
            threads,
            format,
            dry_run,
        }),
        Command::Extract { input } => cmd_extract(config_path.as_deref(), &input),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path.as_deref()),
            ConfigAction::Validate => cmd_config_validate(config_path.as_deref()),
        },
    }
}

struct ResolveArgs {
    config_path: Option<PathBuf>,
    input: PathBuf,
    input_kind: InputKind,
    out: Option<PathBuf>,
    strict: bool,
    force_assign: bool,
    threads: Option<usize>,
    format: Option<FormatArg>,
    dry_run: bool,
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_resolve(args: ResolveArgs) -> Result<()> {
    let config = load_app_config(args.config_path.as_deref())?;

    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| eyre!("cannot configure {threads} worker threads: {e}"))?;
    }

    let bytes = std::fs::read(&args.input)
        .map_err(|e| eyre!("cannot read '{}': {e}", args.input.display()))?;
    let source_sha256 = sha256_hex(&bytes);

    let pages = match args.input_kind {
        InputKind::Records => parse_json::<Vec<PageRecords>>(&args.input, &bytes)?,
        InputKind::Text => {
            let texts = parse_json::<Vec<PageText>>(&args.input, &bytes)?;
            Extractor::new(&config.extraction)?.extract_document(&texts)
        }
    };
    warn_on_unusable_records(&pages);

    let mut resolve_config = ResolveConfig::from(&config);
    if args.strict {
        resolve_config.linking.strict_mode = true;
    }
    if args.force_assign {
        resolve_config.assignment.allow_unassigned = false;
    }
    let format = args
        .format
        .map(MetadataFormat::from)
        .unwrap_or(config.output.metadata_format);

    info!(
        input = %args.input.display(),
        pages = pages.len(),
        strict = resolve_config.linking.strict_mode,
        "resolving document"
    );

    let reporter = CliProgress::new();
    let result = resolve_document(&pages, &resolve_config, &reporter)?;
    print_summary(&result);

    let manifest = build_manifest(
        result.plan,
        args.input.display().to_string(),
        Some(source_sha256),
    );

    if args.dry_run {
        println!("{}", render_metadata(&manifest, format)?);
        return Ok(());
    }

    let out_dir = args
        .out
        .unwrap_or_else(|| PathBuf::from(&config.output.output_dir));
    let output = write_split(&out_dir, &manifest, format)?;

    println!("  Run:      {}", manifest.run_id);
    println!("  Metadata: {}", output.metadata_path.display());
    println!();

    Ok(())
}

fn cmd_extract(config_path: Option<&Path>, input: &Path) -> Result<()> {
    let config = load_app_config(config_path)?;
    let bytes =
        std::fs::read(input).map_err(|e| eyre!("cannot read '{}': {e}", input.display()))?;
    let texts = parse_json::<Vec<PageText>>(input, &bytes)?;

    let pages = Extractor::new(&config.extraction)?.extract_document(&texts);
    println!("{}", serde_json::to_string_pretty(&pages)?);
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = load_app_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

fn cmd_config_validate(config_path: Option<&Path>) -> Result<()> {
    let config = load_app_config(config_path)?;
    ResolveConfig::from(&config).validate()?;
    Extractor::new(&config.extraction)?;

    let shown = match config_path {
        Some(path) => path.to_path_buf(),
        None => config_file_path()?,
    };
    println!("Config OK: {}", shown.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_app_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

fn parse_json<T: serde::de::DeserializeOwned>(path: &Path, bytes: &[u8]) -> Result<T> {
    let parsed = serde_json::from_slice(bytes).map_err(|e| {
        PatientSplitError::parse(format!("cannot parse '{}': {e}", path.display()))
    })?;
    Ok(parsed)
}

fn warn_on_unusable_records(pages: &[PageRecords]) {
    let unusable = pages
        .iter()
        .flat_map(|p| &p.records)
        .filter(|r| !r.has_value())
        .count();
    if unusable > 0 {
        warn!(unusable, "records without a usable value are kept but never match");
    }
}

fn print_summary(result: &ResolveResult) {
    let plan = &result.plan;
    println!();
    println!("  Resolution complete");
    println!("  Patients:   {}", plan.documents.len());
    println!("  Assigned:   {}/{}", plan.assigned_pages, plan.total_pages);
    println!("  Unassigned: {:?}", result.summary.unassigned_pages);
    println!("  Ambiguous:  {:?}", result.summary.ambiguous_pages);
    for document in &plan.documents {
        println!(
            "    {}  pages {:?}  avg {:.2}",
            document.cluster_id, document.pages, document.average_score
        );
    }
    let timings: Vec<String> = result
        .stage_timings
        .iter()
        .map(|t| format!("{} {}ms", t.stage, t.duration.as_millis()))
        .collect();
    println!("  Stages:     {}", timings.join(", "));
    println!("  Time:       {:.1}s", result.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn done(&self, _result: &ResolveResult) {
        self.spinner.finish_and_clear();
    }
}
