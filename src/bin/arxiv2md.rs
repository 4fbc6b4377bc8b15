//! CLI binary for arxiv2md.
//!
//! A thin shim over the library crate: persisted settings are loaded, CLI
//! flags override them, and the result is either printed, written to a
//! file, or inserted into a note host.

use anyhow::{Context, Result};
use arxiv2md::config::default_settings_path;
use arxiv2md::progress::refine_status;
use arxiv2md::{
    convert, fetch_pdf, insert_paper, ConversionConfig, ConversionProgressCallback, FetchPolicy, InsertMode,
    KernelHost, ProgressCallback, Settings, SourceKind, Stage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
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

const TICKS: [&str; 11] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner for pipeline stages; switches to a bar while sections are being
/// refined, since that is the only stage with a known amount of work.
struct CliProgressCallback {
    bar: ProgressBar,
    bar_active: AtomicBool,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(Self::spinner_style());
        bar.set_prefix("arxiv2md");
        bar.set_message("Starting…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            bar_active: AtomicBool::new(false),
        })
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&TICKS)
    }

    fn activate_bar(&self, total: usize) {
        if self.bar_active.swap(true, Ordering::SeqCst) {
            return;
        }
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} sections  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&TICKS);
        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Refining");
        self.bar.reset_eta();
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_stage(&self, stage: Stage) {
        if self.bar_active.swap(false, Ordering::SeqCst) {
            self.bar.set_style(Self::spinner_style());
            self.bar.set_prefix("arxiv2md");
        }
        self.bar.set_message(stage.to_string());
    }

    fn on_extraction_progress(&self, state: &str, extracted: Option<u64>, total: Option<u64>) {
        match (extracted, total) {
            (Some(done), Some(total)) if total > 0 => {
                self.bar.set_message(format!("Extraction {state}: {done}/{total} pages"))
            }
            _ => self.bar.set_message(format!("Extraction {state}…")),
        }
    }

    fn on_refine_progress(&self, done: usize, total: usize) {
        self.activate_bar(total);
        self.bar.set_position(done as u64);
        self.bar.set_message(refine_status(done, total));
    }

    fn on_conversion_complete(&self, source: SourceKind, markdown_len: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} chars converted from {}",
            green("✔"),
            bold(&markdown_len.to_string()),
            source
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Attach-style: download the PDF and print a Markdown link to it
  arxiv2md 1706.03762

  # Full text to stdout (HTML rendering, falling back to LaTeX source)
  arxiv2md --full-text https://arxiv.org/abs/1706.03762

  # Full text without the references block, to a file
  arxiv2md --full-text --omit-references 2301.12345v2 -o paper.md

  # Section-by-section LLM cleanup
  arxiv2md --full-text --llm --llm-base-url https://api.deepseek.com 2301.12345

  # Let a remote extraction service read the PDF instead
  arxiv2md --full-text --extraction --extraction-api-key $MINERU_KEY 2301.12345

  # Insert into a running note host, remembering the flags for next time
  arxiv2md --full-text --host-url http://127.0.0.1:6806 --host-token $TOKEN \
           --parent-id 20240101120000-abcdefg --save-settings 2301.12345

ENVIRONMENT VARIABLES:
  ARXIV2MD_LLM_API_KEY          LLM API key
  ARXIV2MD_EXTRACTION_API_KEY   Extraction-service API key
  ARXIV2MD_HOST_URL             Note host base URL
  ARXIV2MD_HOST_TOKEN           Note host API token ("Token " prefix optional)
  RUST_LOG                      Log filter (overrides -v / -q)

SETTINGS:
  Flags override the persisted settings file (default: <config dir>/arxiv2md/settings.json).
  --save-settings writes the merged result back.
"#;

/// Fetch arXiv papers and convert them to Markdown.
#[derive(clap::Parser, Debug)]
#[command(
    name = "arxiv2md",
    version,
    about = "Fetch arXiv papers and convert them to Markdown",
    long_about = "Fetch an arXiv paper by identifier or URL. By default the PDF is downloaded \
and linked; with --full-text the HTML rendering (or the LaTeX source) is converted to Markdown, \
optionally refined by an OpenAI-compatible LLM or produced by a remote PDF extraction service.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// arXiv identifier, arXiv: reference, or arxiv.org URL.
    input: String,

    /// Convert the full text instead of fetching the PDF.
    #[arg(long, env = "ARXIV2MD_FULL_TEXT")]
    full_text: bool,

    /// Leave the references block out of the Markdown.
    #[arg(long, env = "ARXIV2MD_OMIT_REFERENCES")]
    omit_references: bool,

    /// Refine converted Markdown with an LLM.
    #[arg(long)]
    llm: bool,

    /// Send the whole document in one LLM call instead of section by section.
    #[arg(long)]
    llm_full_input: bool,

    /// LLM base URL (OpenAI-compatible).
    #[arg(long, env = "ARXIV2MD_LLM_BASE_URL")]
    llm_base_url: Option<String>,

    /// LLM API path, or an absolute URL.
    #[arg(long, env = "ARXIV2MD_LLM_API_PATH")]
    llm_api_path: Option<String>,

    /// LLM model ID.
    #[arg(long, env = "ARXIV2MD_LLM_MODEL")]
    llm_model: Option<String>,

    /// LLM API key.
    #[arg(long, env = "ARXIV2MD_LLM_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,

    /// Produce the Markdown with the remote extraction service.
    #[arg(long)]
    extraction: bool,

    /// Extraction-service base URL.
    #[arg(long, env = "ARXIV2MD_EXTRACTION_BASE_URL")]
    extraction_base_url: Option<String>,

    /// Extraction-service task path, or an absolute URL.
    #[arg(long, env = "ARXIV2MD_EXTRACTION_API_PATH")]
    extraction_api_path: Option<String>,

    /// Extraction-service API key.
    #[arg(long, env = "ARXIV2MD_EXTRACTION_API_KEY", hide_env_values = true)]
    extraction_api_key: Option<String>,

    /// Document language hint for the extraction service.
    #[arg(long)]
    extraction_language: Option<String>,

    /// Extraction model version.
    #[arg(long)]
    extraction_model_version: Option<String>,

    /// Force OCR in the extraction service.
    #[arg(long)]
    extraction_ocr: bool,

    /// Disable formula recognition in the extraction service.
    #[arg(long)]
    no_formula: bool,

    /// Disable table recognition in the extraction service.
    #[arg(long)]
    no_table: bool,

    /// Cross-origin-restricted context: mirror, then direct, then the host proxy.
    #[arg(long, env = "ARXIV2MD_RESTRICTED")]
    restricted: bool,

    /// Note host base URL (forwarding proxy and insertion).
    #[arg(long, env = "ARXIV2MD_HOST_URL")]
    host_url: Option<String>,

    /// Note host API token.
    #[arg(long, env = "ARXIV2MD_HOST_TOKEN", hide_env_values = true)]
    host_token: Option<String>,

    /// Block to append the result to. Requires --host-url.
    #[arg(long, requires = "host_url")]
    parent_id: Option<String>,

    /// Settings file to load (and save with --save-settings).
    #[arg(long, env = "ARXIV2MD_SETTINGS")]
    settings: Option<PathBuf>,

    /// Persist the merged settings.
    #[arg(long)]
    save_settings: bool,

    /// Write Markdown (or the PDF) to this file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output structured JSON instead of Markdown.
    #[arg(long)]
    json: bool,

    /// Disable progress spinner.
    #[arg(long, env = "ARXIV2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "ARXIV2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "ARXIV2MD_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = <Cli as clap::Parser>::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the spinner is active; it shows
    // every stage anyway.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    // ── Settings ─────────────────────────────────────────────────────────
    let settings_path = cli.settings.clone().or_else(default_settings_path);
    let mut settings = match &settings_path {
        Some(path) => Settings::load(path).context("Failed to load settings")?,
        None => Settings::default(),
    };
    apply_flags(&cli, &mut settings);

    if cli.save_settings {
        let path = settings_path
            .as_ref()
            .context("No settings location available; pass --settings <path>")?;
        settings.save(path).context("Failed to save settings")?;
        if !cli.quiet {
            eprintln!("{} settings saved to {}", green("✔"), bold(&path.display().to_string()));
        }
    }

    // ── Build config ─────────────────────────────────────────────────────
    let spinner = show_progress.then(CliProgressCallback::new);
    let progress_cb: Option<ProgressCallback> = spinner
        .clone()
        .map(|s| s as Arc<dyn ConversionProgressCallback>);

    let http = reqwest::Client::new();
    let host = cli
        .host_url
        .as_deref()
        .map(|url| KernelHost::new(http.clone(), url, settings.token().as_deref()));

    let config = build_config(&cli, &settings, host.as_ref(), progress_cb)?;
    let mode = if settings.full_text {
        InsertMode::FullText
    } else {
        InsertMode::Pdf
    };

    // ── Run ──────────────────────────────────────────────────────────────
    match (host, cli.parent_id.as_deref()) {
        (Some(host), Some(parent_id)) => {
            let host = host.with_parent_id(parent_id);
            let outcome = insert_paper(&host, &cli.input, mode, &config)
                .await
                .context("Insertion failed")?;
            if let Some(spinner) = &spinner {
                spinner.bar.finish_and_clear();
            }
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&outcome).context("Failed to serialise outcome")?
                );
            } else if !cli.quiet {
                eprintln!(
                    "{} inserted \"{}\"{}",
                    green("✔"),
                    outcome.metadata.title,
                    if outcome.reused_asset {
                        dim(" (reused existing PDF)")
                    } else {
                        String::new()
                    }
                );
            }
        }
        _ if mode == InsertMode::FullText => run_full_text(&cli, &config).await?,
        _ => run_pdf(&cli, &config, spinner.as_deref()).await?,
    }

    Ok(())
}

async fn run_full_text(cli: &Cli, config: &ConversionConfig) -> Result<()> {
    let output = convert(&cli.input, config).await.context("Conversion failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if let Some(ref path) = cli.output {
        let mut markdown = output.markdown.clone();
        if !markdown.ends_with('\n') {
            markdown.push('\n');
        }
        write_file(path, markdown.as_bytes()).await?;
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(output.markdown.as_bytes())
            .context("Failed to write to stdout")?;
        if !output.markdown.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    if !cli.quiet && !cli.json {
        eprintln!(
            "   {} \"{}\"  {}  {}ms total",
            cyan(&output.metadata.versioned_id),
            output.metadata.title,
            dim(&format!(
                "{} · {}",
                output.source,
                if output.refined {
                    format!("{}/{} sections refined", output.stats.sections_refined, output.stats.sections_total)
                } else {
                    "not refined".to_string()
                }
            )),
            output.stats.total_duration_ms,
        );
        if let Some(ref path) = cli.output {
            eprintln!("   →  {}", bold(&path.display().to_string()));
        }
    }
    Ok(())
}

async fn run_pdf(cli: &Cli, config: &ConversionConfig, spinner: Option<&CliProgressCallback>) -> Result<()> {
    let pdf = fetch_pdf(&cli.input, config).await.context("PDF download failed")?;
    let path = cli.output.clone().unwrap_or_else(|| PathBuf::from(&pdf.file_name));
    write_file(&path, &pdf.bytes).await?;

    if let Some(spinner) = spinner {
        spinner.bar.finish_and_clear();
    }
    if cli.json {
        let json = serde_json::json!({
            "metadata": pdf.metadata,
            "file_name": pdf.file_name,
            "path": path.display().to_string(),
            "bytes": pdf.bytes.len(),
        });
        println!("{}", serde_json::to_string_pretty(&json).context("Failed to serialise output")?);
    } else {
        println!("[{}]({})", pdf.file_name, path.display());
    }
    if !cli.quiet && !cli.json {
        eprintln!(
            "{} {} ({} bytes)",
            green("✔"),
            bold(&path.display().to_string()),
            pdf.bytes.len()
        );
    }
    Ok(())
}

/// Fold CLI flags into the persisted settings.
fn apply_flags(cli: &Cli, settings: &mut Settings) {
    settings.full_text |= cli.full_text;
    settings.omit_references |= cli.omit_references;
    if let Some(token) = &cli.host_token {
        settings.workspace_token = token.clone();
    }

    let llm = &mut settings.llm;
    llm.enabled |= cli.llm;
    llm.full_input |= cli.llm_full_input;
    overwrite(&mut llm.base_url, &cli.llm_base_url);
    overwrite(&mut llm.api_path, &cli.llm_api_path);
    overwrite(&mut llm.model, &cli.llm_model);
    overwrite(&mut llm.api_key, &cli.llm_api_key);

    let ext = &mut settings.extraction;
    ext.enabled |= cli.extraction;
    ext.is_ocr |= cli.extraction_ocr;
    if cli.no_formula {
        ext.enable_formula = false;
    }
    if cli.no_table {
        ext.enable_table = false;
    }
    overwrite(&mut ext.base_url, &cli.extraction_base_url);
    overwrite(&mut ext.api_path, &cli.extraction_api_path);
    overwrite(&mut ext.api_key, &cli.extraction_api_key);
    overwrite(&mut ext.language, &cli.extraction_language);
    overwrite(&mut ext.model_version, &cli.extraction_model_version);

    // An explicit engine flag switches the other one off.
    if cli.llm && !cli.extraction {
        settings.extraction.enabled = false;
    } else if cli.extraction && !cli.llm {
        settings.llm.enabled = false;
    }
}

fn overwrite(target: &mut String, value: &Option<String>) {
    if let Some(v) = value {
        *target = v.clone();
    }
}

/// Map settings and CLI args to `ConversionConfig`.
fn build_config(
    cli: &Cli,
    settings: &Settings,
    host: Option<&KernelHost>,
    progress: Option<ProgressCallback>,
) -> Result<ConversionConfig> {
    let engine = settings.engine().context("Invalid settings")?;
    let policy = if cli.restricted {
        FetchPolicy::Restricted
    } else {
        FetchPolicy::Direct
    };

    let mut builder = ConversionConfig::builder()
        .engine(engine)
        .omit_references(settings.omit_references)
        .fetch_policy(policy);
    if let Some(host) = host {
        builder = builder.proxy(host.proxy_config());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}
