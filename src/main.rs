use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use paperscan::config::{AnalysisMode, Config};
use paperscan::document::discover_pdfs;
use paperscan::output::OutputPaths;
use paperscan::pipeline::Analyzer;
use paperscan::provider::gemini::GeminiProvider;
use paperscan::schema::PromptBook;
use paperscan::stats::{self, ResultTable};

// ── CLI definition ───────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (default: paperscan.json)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze every PDF in the input directory
    Run(RunArgs),
    /// Summarize a result CSV
    Stats(StatsArgs),
    /// Show the question set and output columns
    Questions(QuestionsArgs),
    /// List models that support content generation
    Models,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Directory containing the PDFs
    #[arg(long)]
    input: Option<String>,
    /// Directory for the CSV/JSON results
    #[arg(long)]
    output: Option<String>,
    #[arg(long, value_enum)]
    mode: Option<AnalysisMode>,
    #[arg(long)]
    model: Option<String>,
    /// Markdown prompt book replacing the built-in questions
    #[arg(long)]
    prompt: Option<String>,
    /// Maximum characters per chunk in chunked mode
    #[arg(long)]
    chunk_size: Option<usize>,
    /// Seconds to wait before each API call
    #[arg(long)]
    delay: Option<u64>,
    /// Skip the JSON dump
    #[arg(long)]
    no_json: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(v) = &self.input {
            config.input_dir = v.clone();
        }
        if let Some(v) = &self.output {
            config.output_dir = v.clone();
        }
        if let Some(v) = self.mode {
            config.mode = v;
        }
        if let Some(v) = &self.model {
            config.model = v.clone();
        }
        if let Some(v) = &self.prompt {
            config.prompt_file = Some(v.clone());
        }
        if let Some(v) = self.chunk_size {
            config.chunk_size_chars = v;
        }
        if let Some(v) = self.delay {
            config.call_delay_secs = v;
        }
        if self.no_json {
            config.json_output = false;
        }
    }
}

#[derive(Args, Debug)]
struct StatsArgs {
    /// Result CSV written by `run`
    csv: PathBuf,
    /// Column for term frequencies
    #[arg(long, default_value = "AI의 특징")]
    terms_column: String,
    /// Column scanned for canvas element mentions
    #[arg(long, default_value = "추가영역 제시")]
    bmc_column: String,
    /// Y/N column to tally
    #[arg(long, default_value = "비즈니스 모델 캔버스(BMC) 활용 여부")]
    flag_column: String,
    /// Number of terms to show
    #[arg(long, default_value_t = 15)]
    top: usize,
}

#[derive(Args, Debug)]
struct QuestionsArgs {
    /// Markdown prompt book (default: configured or built-in)
    #[arg(long)]
    prompt: Option<String>,
}

// ── Entry point ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let mut config = Config::load(cli.config.as_deref().unwrap_or(""))?;
    config.apply_env();
    match &cli.command {
        Commands::Run(args) => args.apply(&mut config),
        Commands::Questions(args) => {
            if let Some(p) = &args.prompt {
                config.prompt_file = Some(p.clone());
            }
        }
        _ => {}
    }

    init_logging(cli.verbose, config.log_file.as_deref())?;
    config.validate().context("invalid configuration")?;

    match &cli.command {
        Commands::Run(_) => run(&config),
        Commands::Stats(args) => print_stats(args),
        Commands::Questions(_) => print_questions(&config),
        Commands::Models => list_models(&config),
    }
}

fn init_logging(verbose: bool, log_file: Option<&str>) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file: {path}"))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr.and(Mutex::new(file)))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn load_book(config: &Config) -> Result<PromptBook> {
    match &config.prompt_file {
        Some(path) => {
            PromptBook::load(Path::new(path)).with_context(|| format!("loading prompts from {path}"))
        }
        None => PromptBook::builtin().context("built-in prompt book is invalid"),
    }
}

fn run(config: &Config) -> Result<()> {
    let book = load_book(config)?;
    let provider = GeminiProvider::from_config(config).context("cannot create Gemini client")?;

    let files = discover_pdfs(Path::new(&config.input_dir))
        .with_context(|| format!("scanning {}", config.input_dir))?;
    if files.is_empty() {
        warn!("No PDF files in {}", config.input_dir);
        return Ok(());
    }
    info!(
        "Analyzing {} PDF(s) with {} in {:?} mode",
        files.len(),
        config.model,
        config.mode
    );

    let outputs = OutputPaths::new(Path::new(&config.output_dir), Local::now());
    let analyzer = Analyzer::new(&provider, &book, config);
    let summary = analyzer.run_batch(&files, &outputs)?;

    println!(
        "{} document(s): {} ok, {} with placeholders, {} not written",
        summary.total, summary.succeeded, summary.recovered, summary.persist_failed
    );
    println!("CSV:  {}", summary.csv_path.display());
    if let Some(json) = &summary.json_path {
        println!("JSON: {}", json.display());
    }
    Ok(())
}

fn print_stats(args: &StatsArgs) -> Result<()> {
    let table = ResultTable::load(&args.csv)?;
    println!("{} row(s) in {}", table.rows.len(), args.csv.display());

    match table.column(&args.flag_column) {
        Ok(cells) => {
            let (yes, no, other) = stats::yes_no_counts(&cells);
            println!("\n[{}] Y: {yes}  N: {no}  other: {other}", args.flag_column);
        }
        Err(e) => warn!("{e}"),
    }

    match table.column(&args.terms_column) {
        Ok(cells) => {
            println!("\n[{}] top {} terms", args.terms_column, args.top);
            for (term, count) in stats::term_frequencies(&cells).into_iter().take(args.top) {
                println!("{count:>5}  {term}");
            }
        }
        Err(e) => warn!("{e}"),
    }

    match table.column(&args.bmc_column) {
        Ok(cells) => {
            println!("\n[{}] canvas elements", args.bmc_column);
            for (element, count) in stats::bmc_element_counts(&cells) {
                println!("{count:>5}  {element}");
            }
        }
        Err(e) => warn!("{e}"),
    }

    Ok(())
}

fn print_questions(config: &Config) -> Result<()> {
    let book = load_book(config)?;
    println!("Columns: {}", book.schema.columns().join(" | "));
    println!();
    println!("{}", book.questions_block());
    Ok(())
}

fn list_models(config: &Config) -> Result<()> {
    let provider = GeminiProvider::from_config(config).context("cannot create Gemini client")?;
    for model in provider.list_models()? {
        println!("{}\t{}", model.name, model.display_name);
    }
    Ok(())
}
