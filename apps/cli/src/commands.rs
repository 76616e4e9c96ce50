//! CLI command definitions, routing, and tracing setup.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use docharvest_core::{
    EnrichmentProgress, MetadataEnhancer, collect_markdown_paths, enhance_documents,
    load_markdown,
};
use docharvest_llm::build_provider;
use docharvest_shared::{
    AppConfig, DocHarvestError, Document, ProviderKind, init_config, load_config,
};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// docharvest: AI metadata for documentation pages.
#[derive(Parser)]
#[command(
    name = "docharvest",
    version,
    about = "Add AI-generated summaries, tags and categories to Markdown documentation.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
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
    /// Enhance Markdown files and write them as JSON lines.
    Enhance {
        /// Markdown files, or directories containing them.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Documents enhanced in parallel (defaults to [defaults] concurrency).
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Completion provider: openai or ollama.
        #[arg(long)]
        provider: Option<ProviderKind>,

        /// Model identifier.
        #[arg(long)]
        model: Option<String>,

        /// Write JSON lines here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage configuration.
    Config {
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

/// Initialize tracing based on CLI flags. Logs go to stderr; stdout carries data.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "docharvest=info",
        1 => "docharvest=debug",
        _ => "docharvest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
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
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Enhance {
            paths,
            concurrency,
            provider,
            model,
            output,
        } => {
            let mut config = load_config()?;
            apply_overrides(&mut config, concurrency, provider, model);
            cmd_enhance(&config, &paths, output.as_deref()).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// CLI flags win over the config file.
fn apply_overrides(
    config: &mut AppConfig,
    concurrency: Option<usize>,
    provider: Option<ProviderKind>,
    model: Option<String>,
) {
    if let Some(concurrency) = concurrency {
        config.defaults.concurrency = u32::try_from(concurrency).unwrap_or(u32::MAX);
    }
    if let Some(provider) = provider {
        config.ai.provider = provider;
    }
    if let Some(model) = model {
        config.ai.model = model;
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_enhance(config: &AppConfig, inputs: &[PathBuf], output: Option<&Path>) -> Result<()> {
    let started = Instant::now();

    let paths = collect_markdown_paths(inputs).await?;
    if paths.is_empty() {
        return Err(eyre!("no markdown files found"));
    }

    let mut docs = Vec::with_capacity(paths.len());
    for path in &paths {
        docs.push(load_markdown(path).await?);
    }

    let provider = build_provider(&config.ai)?;
    let enhancer = MetadataEnhancer::new(provider.clone(), config.enhance.clone());

    info!(
        documents = docs.len(),
        provider = %config.ai.provider,
        model = %config.ai.model,
        concurrency = config.defaults.concurrency,
        "enhancing documents"
    );

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        }
    });

    let progress = CliProgress::new(docs.len());
    let outcome = enhance_documents(
        &enhancer,
        &mut docs,
        config.defaults.concurrency as usize,
        &cancel,
        &progress,
    )
    .await;
    progress.finish();
    interrupt.abort();

    // Every document is written, enhanced or not, even after an interrupt.
    write_documents(&docs, output)?;
    provider.close()?;

    let summary = match outcome {
        Ok(summary) => summary,
        Err(DocHarvestError::Cancelled) => {
            let enhanced = docs.iter().filter(|d| d.is_enhanced()).count();
            eprintln!("Cancelled: {enhanced}/{} documents enhanced before interrupt.", docs.len());
            return Err(eyre!("enhancement cancelled"));
        }
        Err(err) => return Err(err.into()),
    };

    eprintln!();
    eprintln!("  Documents: {}", summary.total);
    eprintln!("  Enhanced:  {}", summary.enhanced);
    eprintln!("  Failed:    {}", summary.failures.len());
    eprintln!("  Tokens:    {}", summary.total_tokens);
    eprintln!("  Time:      {:.1}s", started.elapsed().as_secs_f64());
    for failure in &summary.failures {
        eprintln!("    - {}: {}", failure.url, failure.error);
    }
    eprintln!();

    Ok(())
}

/// Write one JSON object per line to `output`, or stdout.
fn write_documents(docs: &[Document], output: Option<&Path>) -> Result<()> {
    let sink: Box<dyn Write> = match output {
        Some(path) => Box::new(
            std::fs::File::create(path)
                .wrap_err_with(|| format!("cannot create {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout().lock()),
    };
    let mut writer = BufWriter::new(sink);
    for doc in docs {
        serde_json::to_writer(&mut writer, doc)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Progress bar over the documents in a batch.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl EnrichmentProgress for CliProgress {
    fn phase(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn task_progress(&self, current: usize, _total: usize, detail: &str) {
        self.bar.set_position(current as u64);
        self.bar.set_message(detail.to_string());
    }
}
