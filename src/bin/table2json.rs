//! CLI binary for table2json.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, runs one image through the pipeline and prints the
//! response as JSON.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use table2json::{
    read_image, ExtractRequest, ExtractionConfig, ExtractionProgressCallback, Pipeline,
    ProgressCallback, TesseractCli,
};
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while the image is preprocessed, then one bar tick per OCR'd cell.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Denoising and detecting grid…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_boxes_detected(&self, total_boxes: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} cells  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total_boxes as u64);
        self.bar.set_prefix("OCR");
        self.bar.set_message("");
    }

    fn on_cell_complete(&self, _index: usize, _total: usize, _chars: usize) {
        self.bar.inc(1);
    }

    fn on_cell_error(&self, index: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Cell {:>3}/{:<3}  {}",
            red("✗"),
            index + 1,
            total,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_extraction_complete(&self, markdown_lines: usize) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        eprintln!(
            "{} {} table rows recovered{}",
            if failed == 0 { green("✔") } else { red("⚠") },
            bold(&markdown_lines.to_string()),
            if failed == 0 {
                String::new()
            } else {
                format!("  ({} cells failed OCR)", red(&failed.to_string()))
            }
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract a table (Ollama on localhost, default model)
  table2json table.png

  # Give the model a hint and score against a known answer
  table2json --title-hint "Table 2 secondary outcomes" --expected expected.json table.png

  # Only run the vision pipeline (no model call)
  table2json --ocr-only table.png

  # OCR cells four at a time with a different model
  table2json --ocr-concurrency 4 --model qwen2.5:7b-instruct table.png -o out.json

ENVIRONMENT VARIABLES:
  OLLAMA_HOST               Completion endpoint base URL (default http://127.0.0.1:11434)
  TABLE2JSON_MODEL          Model identifier
  TABLE2JSON_TESSERACT      Path to the tesseract executable
  RUST_LOG                  Overrides the log filter

REQUIREMENTS:
  tesseract (with the language pack for --lang) on PATH, and a running
  Ollama instance with the selected model pulled.
"#;

/// Convert a table image to JSON records via OCR and a local language model.
#[derive(Parser, Debug)]
#[command(
    name = "table2json",
    version,
    about = "Convert table images to JSON records via OCR and a local LLM",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Table image (PNG, JPEG, TIFF, BMP, WebP).
    input: Option<PathBuf>,

    /// Write JSON to this file instead of stdout.
    #[arg(short, long, env = "TABLE2JSON_OUTPUT")]
    output: Option<PathBuf>,

    /// Model identifier served by the completion endpoint.
    #[arg(long, env = "TABLE2JSON_MODEL")]
    model: Option<String>,

    /// Completion endpoint base URL.
    #[arg(long, env = "OLLAMA_HOST")]
    host: Option<String>,

    /// Free-text hint passed to the model (e.g. the table caption).
    #[arg(long)]
    title_hint: Option<String>,

    /// JSON file with the expected records, for quality scoring.
    #[arg(long)]
    expected: Option<PathBuf>,

    /// Print OCR artifacts (markdown, raw text, diagnostics) and stop.
    #[arg(long)]
    ocr_only: bool,

    /// Cells OCR'd concurrently. Output ordering is unaffected.
    #[arg(long, env = "TABLE2JSON_OCR_CONCURRENCY", default_value_t = 1)]
    ocr_concurrency: usize,

    /// Tesseract executable.
    #[arg(long, env = "TABLE2JSON_TESSERACT", default_value = "tesseract")]
    tesseract: String,

    /// Tesseract language.
    #[arg(long, default_value = "eng")]
    lang: String,

    /// Completion call timeout in seconds.
    #[arg(long, env = "TABLE2JSON_API_TIMEOUT", default_value_t = 180)]
    api_timeout: u64,

    /// Serve `POST /extract` and `GET /health` on this address instead.
    #[cfg(feature = "server")]
    #[arg(long, value_name = "ADDR")]
    serve: Option<std::net::SocketAddr>,

    /// Disable progress bar.
    #[arg(long, env = "TABLE2JSON_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "TABLE2JSON_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "TABLE2JSON_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.verbose;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
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

    // ── Server mode ──────────────────────────────────────────────────────
    #[cfg(feature = "server")]
    if let Some(addr) = cli.serve {
        let config = build_config(&cli, None)?;
        let pipeline = Pipeline::new(config).context("Failed to initialise pipeline")?;
        table2json::server::serve(pipeline, addr)
            .await
            .context("Server failed")?;
        return Ok(());
    }

    let Some(input) = cli.input.clone() else {
        bail!("No input image given. Run with --help for usage.");
    };

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress)?;

    let engine = TesseractCli::from_config(&config);
    if !engine.is_available() {
        bail!(
            "'{}' could not be run. Install tesseract or pass --tesseract <PATH>.",
            config.tesseract_cmd
        );
    }

    let image = read_image(&input).await.context("Failed to read image")?;
    let pipeline = Pipeline::new(config).context("Failed to initialise pipeline")?;

    // ── Run ──────────────────────────────────────────────────────────────
    let json = if cli.ocr_only {
        let artifacts = pipeline.artifacts(image).await.context("OCR failed")?;
        serde_json::to_string_pretty(&artifacts).context("Failed to serialise artifacts")?
    } else {
        let expected_json = match &cli.expected {
            Some(path) => Some(
                tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read expected JSON from {:?}", path))?,
            ),
            None => None,
        };
        let request = ExtractRequest {
            image,
            model: None,
            title_hint: cli.title_hint.clone(),
            expected_json,
        };
        let response = pipeline.run(request).await.context("Extraction failed")?;

        if !cli.quiet {
            if let (Some(score), Some(summary)) =
                (response.quality_score, response.comparison_summary.as_deref())
            {
                eprintln!("   quality {}  {}", bold(&format!("{score:.1}")), dim(summary));
            }
            eprintln!(
                "   {} records  /  {} boxes  /  {} raw chars",
                dim(&response.json_result.len().to_string()),
                dim(&response.diagnostics.detected_boxes.to_string()),
                dim(&response.diagnostics.raw_text_chars.to_string()),
            );
        }
        serde_json::to_string_pretty(&response).context("Failed to serialise response")?
    };

    // ── Output ───────────────────────────────────────────────────────────
    match &cli.output {
        Some(path) => {
            tokio::fs::write(path, format!("{json}\n"))
                .await
                .with_context(|| format!("Failed to write {:?}", path))?;
            if !cli.quiet {
                eprintln!("{}  →  {}", green("✔"), bold(&path.display().to_string()));
            }
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            writeln!(handle, "{json}").context("Failed to write to stdout")?;
        }
    }

    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .ocr_concurrency(cli.ocr_concurrency)
        .tesseract_cmd(&cli.tesseract)
        .ocr_language(&cli.lang)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref host) = cli.host {
        builder = builder.ollama_host(normalise_host(host));
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// `OLLAMA_HOST` is often set without a scheme (`0.0.0.0:11434`).
fn normalise_host(host: &str) -> String {
    let host = host.trim();
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}
