//! CLI binary for edgequake-pdfnotes.
//!
//! A thin shim over the library crate that maps CLI flags to `NotesConfig`,
//! runs one pipeline stage (or the HTTP server), and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_pdfnotes::pipeline::input::load_input;
use edgequake_pdfnotes::pipeline::llm::ModelSet;
use edgequake_pdfnotes::server::{start_server, AppState};
use edgequake_pdfnotes::{
    analyze_stream, extract_document, ExtractionServiceConfig, FigureAnalyzer, GenerationMode,
    ImageStore, NotesConfig, NotesProgressCallback, Pipeline, ProgressCallback,
};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Renders incremental generation as a batch progress bar with one log line
/// per analysed figure. Figures inside a batch finish out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    figure_failures: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            figure_failures: AtomicUsize::new(0),
        })
    }
}

impl NotesProgressCallback for CliProgressCallback {
    fn on_generation_start(&self, total_figures: usize, total_batches: usize) {
        if total_batches > 0 {
            let style = ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} batches  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS);
            self.bar.set_length(total_batches as u64);
            self.bar.set_style(style);
        }
        self.bar.set_prefix("Generating");
        self.bar.set_message("drafting");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "Generating notes ({total_figures} figures, {total_batches} batches)…"
            ))
        ));
    }

    fn on_draft_ready(&self, draft_len: usize) {
        self.bar.println(format!(
            "  {} Draft ready  {}",
            green("✓"),
            dim(&format!("{draft_len} chars"))
        ));
    }

    fn on_batch_start(&self, batch: usize, total_batches: usize) {
        self.bar.set_message(format!("batch {batch}/{total_batches}"));
    }

    fn on_figure_analyzed(&self, figure_index: usize, ok: bool) {
        if ok {
            self.bar
                .println(format!("  {} Figure {:>3}", green("✓"), figure_index));
        } else {
            self.figure_failures.fetch_add(1, Ordering::SeqCst);
            self.bar.println(format!(
                "  {} Figure {:>3}  {}",
                red("✗"),
                figure_index,
                red("analysis failed")
            ));
        }
    }

    fn on_batch_complete(&self, _batch: usize, _total_batches: usize) {
        self.bar.inc(1);
    }

    fn on_generation_complete(&self, notes_len: usize) {
        self.bar.finish_and_clear();
        let failures = self.figure_failures.load(Ordering::SeqCst);
        if failures == 0 {
            eprintln!("{} Notes generated ({notes_len} chars)", green("✔"));
        } else {
            eprintln!(
                "{} Notes generated ({notes_len} chars, {} figure analyses failed)",
                cyan("⚠"),
                red(&failures.to_string())
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service
  pdfnotes serve --port 8000

  # Full pipeline on a local PDF or a URL (needs the extraction service)
  pdfnotes process paper.pdf -o notes.md
  pdfnotes process https://arxiv.org/pdf/1706.03762

  # Notes from an extraction archive you already have
  pdfnotes notes extracted.zip --mode incremental --batch-size 5

  # Stream figure descriptions
  pdfnotes analyze extracted.zip --concurrency 4

  # Elements and figures only, no model involved
  pdfnotes inspect extracted.zip --json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY               OpenAI API key
  GEMINI_API_KEY               Google Gemini API key
  ANTHROPIC_API_KEY            Anthropic API key
  EDGEQUAKE_LLM_PROVIDER       Provider used when --provider is not set
  PDF_SERVICES_BASE_URL        Extraction service API base URL
  PDF_SERVICES_CLIENT_ID       Extraction service client id
  PDF_SERVICES_CLIENT_SECRET   Extraction service client secret
  RUST_LOG                     Log filter override (e.g. edgequake_pdfnotes=debug)
"#;

/// Generate study notes from PDF documents with LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "pdfnotes",
    version,
    about = "Generate study notes from PDF documents with LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDFNOTES_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDFNOTES_QUIET")]
    quiet: bool,

    /// Print structured JSON instead of text.
    #[arg(long, global = true, env = "PDFNOTES_JSON")]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve(ServeArgs),
    /// Extract a PDF (path or URL) and generate notes.
    Process(ProcessArgs),
    /// Generate notes from an extraction archive.
    Notes(NotesArgs),
    /// Describe every figure of an extraction archive.
    Analyze(AnalyzeArgs),
    /// Show the normalized elements and figures of an extraction archive.
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, env = "PDFNOTES_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, env = "PDFNOTES_PORT", default_value_t = 8000)]
    port: u16,

    /// Store uploaded figures as JPEG and return their URLs.
    #[arg(long, env = "PDFNOTES_PUBLISH_FIGURES")]
    publish_figures: bool,

    /// Root directory of the image store.
    #[arg(long, env = "PDFNOTES_IMAGE_ROOT", default_value = ".")]
    image_root: PathBuf,

    #[command(flatten)]
    generation: GenerationArgs,

    #[command(flatten)]
    extraction: ExtractionArgs,
}

#[derive(Args, Debug)]
struct ProcessArgs {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write notes to this file instead of stdout.
    #[arg(short, long, env = "PDFNOTES_OUTPUT")]
    output: Option<PathBuf>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDFNOTES_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    #[command(flatten)]
    generation: GenerationArgs,

    #[command(flatten)]
    extraction: ExtractionArgs,
}

#[derive(Args, Debug)]
struct NotesArgs {
    /// Extraction archive (ZIP with a JSON manifest and figures/).
    archive: PathBuf,

    /// Write notes to this file instead of stdout.
    #[arg(short, long, env = "PDFNOTES_OUTPUT")]
    output: Option<PathBuf>,

    #[command(flatten)]
    generation: GenerationArgs,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    archive: PathBuf,

    /// Figures analysed at the same time.
    #[arg(short, long, env = "PDFNOTES_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    #[command(flatten)]
    generation: GenerationArgs,
}

#[derive(Args, Debug)]
struct InspectArgs {
    archive: PathBuf,
}

#[derive(Args, Debug)]
struct GenerationArgs {
    /// Generation strategy.
    #[arg(long, env = "PDFNOTES_MODE", value_enum, default_value = "single")]
    mode: ModeArg,

    /// Figures per enrichment round (incremental mode).
    #[arg(long, env = "PDFNOTES_BATCH_SIZE", default_value_t = 5)]
    batch_size: usize,

    /// Character budget of the single-pass prompt.
    #[arg(long, env = "PDFNOTES_MAX_INPUT_CHARS", default_value_t = 10_000)]
    max_input_chars: usize,

    /// LLM provider: openai, gemini, anthropic, ollama, …
    #[arg(long, env = "PDFNOTES_PROVIDER")]
    provider: Option<String>,

    /// Primary summarisation model.
    #[arg(long, env = "PDFNOTES_PRIMARY_MODEL")]
    primary_model: Option<String>,

    /// Model tried once when the primary fails.
    #[arg(long, env = "PDFNOTES_FALLBACK_MODEL")]
    fallback_model: Option<String>,

    /// Vision model for figure descriptions.
    #[arg(long, env = "PDFNOTES_VISION_MODEL")]
    vision_model: Option<String>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDFNOTES_TEMPERATURE", default_value_t = 0.2)]
    temperature: f32,

    /// Max LLM output tokens per call.
    #[arg(long, env = "PDFNOTES_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "PDFNOTES_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Run figure analyses through the background job queue.
    #[arg(long, env = "PDFNOTES_USE_QUEUE")]
    use_queue: bool,

    /// Job-queue workers.
    #[arg(long, env = "PDFNOTES_QUEUE_WORKERS", default_value_t = 4)]
    queue_workers: usize,

    /// Directory for per-invocation temp dirs.
    #[arg(long, env = "PDFNOTES_TEMP_ROOT")]
    temp_root: Option<PathBuf>,

    /// Disable the progress bar.
    #[arg(long, env = "PDFNOTES_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct ExtractionArgs {
    #[arg(long, env = "PDF_SERVICES_BASE_URL")]
    services_url: Option<String>,

    #[arg(long, env = "PDF_SERVICES_CLIENT_ID")]
    client_id: Option<String>,

    #[arg(long, env = "PDF_SERVICES_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Extraction job deadline in seconds.
    #[arg(long, env = "PDFNOTES_EXTRACTION_TIMEOUT", default_value_t = 300)]
    extraction_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Single,
    Incremental,
}

impl From<ModeArg> for GenerationMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Single => GenerationMode::SinglePass,
            ModeArg::Incremental => GenerationMode::Incremental,
        }
    }
}

impl From<&ExtractionArgs> for ExtractionServiceConfig {
    fn from(a: &ExtractionArgs) -> Self {
        ExtractionServiceConfig {
            base_url: a.services_url.clone(),
            client_id: a.client_id.clone(),
            client_secret: a.client_secret.clone(),
            timeout_secs: a.extraction_timeout,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // Ctrl-C cancels the in-flight model calls instead of killing the process.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    match &cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Process(args) => process(&cli, args, &cancel).await,
        Command::Notes(args) => notes(&cli, args, &cancel).await,
        Command::Analyze(args) => analyze(&cli, args, cancel).await,
        Command::Inspect(args) => inspect(&cli, args).await,
    }
}

async fn serve(args: &ServeArgs) -> Result<()> {
    let config = build_config(&args.generation, Some(&args.extraction), None)?;
    let pipeline = Pipeline::from_config(&config).context("Failed to initialise pipeline")?;
    if !pipeline.has_extraction() {
        tracing::warn!("PDF_SERVICES_BASE_URL not set; /api/upload will reject requests");
    }
    let state = AppState {
        pipeline: Arc::new(pipeline),
        images: ImageStore::new(&args.image_root),
        publish_figures: args.publish_figures,
    };
    start_server(state, &args.host, args.port)
        .with_context(|| format!("Failed to bind {}:{}", args.host, args.port))?
        .await
        .context("Server error")
}

async fn process(cli: &Cli, args: &ProcessArgs, cancel: &CancellationToken) -> Result<()> {
    let progress = progress_callback(cli, &args.generation);
    let config = build_config(&args.generation, Some(&args.extraction), progress)?;
    let pipeline = Pipeline::from_config(&config).context("Failed to initialise pipeline")?;

    let pdf = load_input(&args.input, args.download_timeout)
        .await
        .context("Failed to load PDF")?;
    let output = pipeline
        .run(&pdf.bytes, &pdf.file_name, cancel)
        .await
        .context("Processing failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else {
        write_notes(&output.notes, args.output.as_deref()).await?;
    }
    if !cli.quiet && !cli.json {
        eprintln!(
            "   {} elements  /  {} figures  —  {} model calls, {}ms",
            dim(&output.elements.len().to_string()),
            dim(&output.figures.len().to_string()),
            output.stats.model_calls,
            output.stats.duration_ms,
        );
    }
    Ok(())
}

async fn notes(cli: &Cli, args: &NotesArgs, cancel: &CancellationToken) -> Result<()> {
    let progress = progress_callback(cli, &args.generation);
    let config = build_config(&args.generation, None, progress)?;
    let pipeline = Pipeline::from_config(&config).context("Failed to initialise pipeline")?;

    let bytes = read_archive(&args.archive).await?;
    let output = pipeline
        .run_archive(&bytes, cancel)
        .await
        .context("Notes generation failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&serde_json::json!({
            "notes": output.notes,
            "stats": output.stats,
        }))
        .context("Failed to serialise output")?;
        println!("{json}");
    } else {
        write_notes(&output.notes, args.output.as_deref()).await?;
    }
    if !output.stats.unresolved_placeholders.is_empty() && !cli.quiet {
        eprintln!(
            "{} unresolved placeholders: {:?}",
            cyan("⚠"),
            output.stats.unresolved_placeholders
        );
    }
    Ok(())
}

async fn analyze(cli: &Cli, args: &AnalyzeArgs, cancel: CancellationToken) -> Result<()> {
    let config = build_config(&args.generation, None, None)?;
    let models = ModelSet::resolve(&config).context("Failed to resolve models")?;
    let analyzer = FigureAnalyzer::new(models.vision, &config);

    let bytes = read_archive(&args.archive).await?;
    let doc = extract_document(&bytes).context("Failed to decode archive")?;

    let mut stream = analyze_stream(analyzer, doc.figures, args.concurrency, cancel);
    let mut results = Vec::new();
    while let Some(a) = stream.next().await {
        if !cli.json {
            let mark = if a.is_ok() { green("✓") } else { red("✗") };
            println!("{} {} {}", mark, bold(&format!("Figure {} ({})", a.index, a.name)), a.description);
        }
        results.push(a);
    }

    if cli.json {
        results.sort_by_key(|a| a.index);
        let json = serde_json::to_string_pretty(&results).context("Failed to serialise output")?;
        println!("{json}");
    }
    Ok(())
}

async fn inspect(cli: &Cli, args: &InspectArgs) -> Result<()> {
    let bytes = read_archive(&args.archive).await?;
    let doc = extract_document(&bytes).context("Failed to decode archive")?;

    if cli.json {
        let figures: Vec<_> = doc
            .figures
            .iter()
            .map(|f| serde_json::json!({ "name": f.name, "bytes": f.data.len() }))
            .collect();
        let json = serde_json::to_string_pretty(&serde_json::json!({
            "elements": doc.elements,
            "figures": figures,
            "tables": doc.tables.iter().map(|t| &t.name).collect::<Vec<_>>(),
        }))
        .context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }

    println!("Archive:   {}", args.archive.display());
    println!("Elements:  {}", doc.elements.len());
    println!("Figures:   {}", doc.figures.len());
    println!("Tables:    {}", doc.tables.len());
    println!();
    for el in &doc.elements {
        let content: String = el.content.chars().take(72).collect();
        println!("{:>8.1}  {:<6}  {}", el.position, format!("{:?}", el.kind), content);
    }
    Ok(())
}

fn progress_callback(cli: &Cli, args: &GenerationArgs) -> Option<ProgressCallback> {
    let show = !cli.quiet && !cli.json && !args.no_progress;
    show.then(|| CliProgressCallback::new() as ProgressCallback)
}

/// Map CLI args to `NotesConfig`.
fn build_config(
    args: &GenerationArgs,
    extraction: Option<&ExtractionArgs>,
    progress: Option<ProgressCallback>,
) -> Result<NotesConfig> {
    let mut builder = NotesConfig::builder()
        .mode(args.mode.into())
        .batch_size(args.batch_size)
        .max_input_chars(args.max_input_chars)
        .temperature(args.temperature)
        .max_tokens(args.max_tokens)
        .api_timeout_secs(args.api_timeout)
        .use_queue(args.use_queue)
        .queue_workers(args.queue_workers);

    if let Some(p) = &args.provider {
        builder = builder.provider_name(p);
    }
    if let Some(m) = &args.primary_model {
        builder = builder.primary_model(m);
    }
    if let Some(m) = &args.fallback_model {
        builder = builder.fallback_model(m);
    }
    if let Some(m) = &args.vision_model {
        builder = builder.vision_model(m);
    }
    if let Some(dir) = &args.temp_root {
        builder = builder.temp_root(dir.clone());
    }
    if let Some(e) = extraction {
        builder = builder.extraction(e.into());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn read_archive(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read archive {}", path.display()))
}

async fn write_notes(notes: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            tokio::fs::write(path, notes)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("{}  →  {}", green("✔"), bold(&path.display().to_string()));
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(notes.as_bytes())
                .context("Failed to write to stdout")?;
            if !notes.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
        }
    }
    Ok(())
}
