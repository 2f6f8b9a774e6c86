#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde_json::Value;
use std::error::Error;
use std::fs::{self, OpenOptions};
use std::io::{IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::process;

use citymind::config::CityMindConfig;
use citymind::expand::expand;
use citymind::pipeline::{compare, insights, select, wrangle};
use citymind::proxy::{ProxyVector, Scenario};
use citymind::service::predict::PredictionService;
use citymind::store::CityMindStore;
use citymind::store::ingest::ingest;
use citymind::train::estimate::train_scenario;
use citymind::train::progress::{TrainProgressObserver, TrainStage};

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Clone, Copy, ValueEnum)]
pub enum ScenarioCli {
    NoSocial,
    FullSocial,
    All,
}

impl ScenarioCli {
    fn scenarios(self) -> Vec<Scenario> {
        match self {
            ScenarioCli::NoSocial => vec![Scenario::NoSocial],
            ScenarioCli::FullSocial => vec![Scenario::FullSocial],
            ScenarioCli::All => Scenario::ALL.to_vec(),
        }
    }
}

#[derive(Parser)]
#[command(
    name = "citymind",
    version,
    about = "County mental health analytics: wrangling, feature selection, model training and proxy-vector predictions."
)]
pub struct Cli {
    /// TOML configuration file (defaults to ./citymind.toml when present)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Append log records to this file instead of standard error
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Clean the raw county survey export into per-scenario tables
    #[command(about = "Clean raw survey data (outputs: data/processed/...)")]
    Wrangle {
        /// Raw CSV to read instead of the configured one
        #[arg(long, value_name = "PATH")]
        input: Option<PathBuf>,
    },

    /// Correlation and Lasso feature selection
    Select {
        #[arg(long, value_enum, default_value_t = ScenarioCli::All)]
        scenario: ScenarioCli,
    },

    /// Build the per-target model data from the selected features
    Prepare {
        #[arg(long, value_enum, default_value_t = ScenarioCli::All)]
        scenario: ScenarioCli,
    },

    /// Train Lasso, random forest and gradient boosting models
    #[command(about = "Train models (outputs: model_metrics.csv, models/*.toml)")]
    Train {
        #[arg(long, value_enum, default_value_t = ScenarioCli::All)]
        scenario: ScenarioCli,

        /// Save every model family, not only the boosted model
        #[arg(long)]
        save_all: bool,
    },

    /// Compare no-social and full-social metrics
    Compare,

    /// Write the dated Markdown report from the saved comparison
    Report,

    /// Load pipeline outputs into the SQLite store
    Ingest,

    /// Print the feature row a proxy vector expands to
    Expand {
        /// JSON proxy vector; reads standard input when omitted or "-"
        #[arg(value_name = "JSON_FILE")]
        input: Option<PathBuf>,
    },

    /// Predict from a proxy vector and store the result
    Predict {
        /// JSON proxy vector; reads standard input when omitted or "-"
        #[arg(value_name = "JSON_FILE")]
        input: Option<PathBuf>,
    },

    /// Print national statistics, county rankings and the model overview
    Dashboard,

    /// Run wrangle, select, prepare, train, compare, report and ingest in order
    Run,

    /// Display version and build information
    #[command(about = "Display version and build information")]
    Version,
}

fn main() {
    let Cli {
        config,
        log_file,
        command,
    } = Cli::parse();

    if let Err(e) = init_logging(log_file.as_deref()) {
        eprintln!("Error: could not open the log file: {e}");
        process::exit(1);
    }

    let result = match command {
        Some(Commands::Version) => {
            print_version_info();
            Ok(())
        }
        Some(command) => CityMindConfig::resolve(config.as_deref())
            .map_err(Box::<dyn Error>::from)
            .and_then(|config| dispatch(command, &config)),
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(Box::<dyn Error>::from),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_logging(log_file: Option<&Path>) -> std::io::Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{} - {} - {}",
                    buf.timestamp_millis(),
                    record.level(),
                    record.args()
                )
            })
            .target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn dispatch(command: Commands, config: &CityMindConfig) -> CliResult {
    match command {
        Commands::Wrangle { input } => run_wrangle(config, input),
        Commands::Select { scenario } => run_select(config, scenario),
        Commands::Prepare { scenario } => run_prepare(config, scenario),
        Commands::Train { scenario, save_all } => run_train(config, scenario, save_all),
        Commands::Compare => run_compare(config),
        Commands::Report => run_report(config),
        Commands::Ingest => run_ingest(config),
        Commands::Expand { input } => run_expand(input),
        Commands::Predict { input } => run_predict(config, input),
        Commands::Dashboard => run_dashboard(config),
        Commands::Run => run_all(config),
        Commands::Version => {
            print_version_info();
            Ok(())
        }
    }
}

fn run_wrangle(config: &CityMindConfig, input: Option<PathBuf>) -> CliResult {
    let raw = input.unwrap_or_else(|| config.paths.raw_csv.clone());
    let summary = wrangle::run(&raw, &config.paths)?;
    for dataset in &summary {
        println!(
            "{:<24} {:>6} rows x {:>3} cols, {} nulls",
            dataset.dataset, dataset.rows, dataset.cols, dataset.nulls
        );
    }
    Ok(())
}

fn run_select(config: &CityMindConfig, scenario: ScenarioCli) -> CliResult {
    for scenario in scenario.scenarios() {
        for summary in select::run_selection(&config.paths, &config.training, scenario)? {
            println!(
                "[{scenario}] {}: {} correlated, {} Lasso features",
                summary.target, summary.corr_features, summary.lasso_features
            );
        }
    }
    Ok(())
}

fn run_prepare(config: &CityMindConfig, scenario: ScenarioCli) -> CliResult {
    for scenario in scenario.scenarios() {
        for summary in select::run_prepare(&config.paths, scenario)? {
            println!(
                "[{scenario}] {}: {} rows x {} cols",
                summary.target, summary.rows, summary.cols
            );
        }
    }
    Ok(())
}

fn run_train(config: &CityMindConfig, scenario: ScenarioCli, save_all: bool) -> CliResult {
    let mut training = config.training.clone();
    training.save_all_models |= save_all;
    let mut progress = BarProgress::default();
    for scenario in scenario.scenarios() {
        let records = train_scenario(&config.paths, &training, scenario, &mut progress)?;
        for record in &records {
            println!(
                "[{scenario}] {} / {}: R2={:.3} RMSE={:.3} MAE={:.3}",
                record.target, record.model, record.r2, record.rmse, record.mae
            );
        }
    }
    Ok(())
}

fn run_compare(config: &CityMindConfig) -> CliResult {
    let outcome = compare::run_compare(&config.paths)?;
    for row in &outcome.rows {
        println!(
            "{} / {}: {:.3} -> {:.3} ({:+.4})",
            row.target, row.model, row.r2_no_social, row.r2_full_social, row.r2_diff
        );
    }
    Ok(())
}

fn run_report(config: &CityMindConfig) -> CliResult {
    let path = compare::run_report(&config.paths)?;
    println!("Report saved to: {}", path.display());
    Ok(())
}

fn run_ingest(config: &CityMindConfig) -> CliResult {
    let store = CityMindStore::open(&config.paths.database)?;
    let summary = ingest(&store, &config.paths)?;
    println!(
        "Ingested {} counties, {} metric rows and {} comparison rows into {}",
        summary.places,
        summary.metrics,
        summary.comparisons,
        config.paths.database.display()
    );
    Ok(())
}

fn read_json(input: Option<&Path>) -> Result<Value, Box<dyn Error>> {
    let text = match input {
        Some(path) if path != Path::new("-") => fs::read_to_string(path)?,
        _ => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}

fn run_expand(input: Option<PathBuf>) -> CliResult {
    let value = read_json(input.as_deref())?;
    let proxy = if value.is_null() {
        ProxyVector::default()
    } else {
        ProxyVector::from_json(&value)?
    };
    println!("{}", serde_json::to_string_pretty(&expand(&proxy))?);
    Ok(())
}

fn run_predict(config: &CityMindConfig, input: Option<PathBuf>) -> CliResult {
    let value = read_json(input.as_deref())?;
    let store = CityMindStore::open(&config.paths.database)?;
    let service = PredictionService::new(config.paths.models_dir.clone(), store);
    let record = service.predict(&value)?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn run_dashboard(config: &CityMindConfig) -> CliResult {
    let store = CityMindStore::open(&config.paths.database)?;
    let dashboard = insights::build_dashboard(&config.paths, &store)?;
    println!("{dashboard}");
    Ok(())
}

fn run_all(config: &CityMindConfig) -> CliResult {
    run_wrangle(config, None)?;
    run_select(config, ScenarioCli::All)?;
    run_prepare(config, ScenarioCli::All)?;
    run_train(config, ScenarioCli::All, false)?;
    run_compare(config)?;
    run_report(config)?;
    run_ingest(config)
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    if let Ok(style) = ProgressStyle::with_template(
        "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message.to_string());
    pb
}

/// Draws one progress bar per training stage on stderr.
#[derive(Default)]
struct BarProgress {
    bar: Option<ProgressBar>,
}

impl TrainProgressObserver for BarProgress {
    fn on_stage_start(&mut self, stage: TrainStage, total_steps: usize) {
        if let Some(previous) = self.bar.take() {
            previous.finish_and_clear();
        }
        self.bar = Some(create_progress_bar(total_steps as u64, stage.describe()));
    }

    fn on_stage_advance(&mut self, stage: TrainStage, completed_steps: usize) {
        if let Some(bar) = &self.bar {
            bar.set_message(stage.describe());
            bar.set_position(completed_steps as u64);
        }
    }

    fn on_stage_finish(&mut self, stage: TrainStage) {
        if let Some(bar) = self.bar.take() {
            bar.finish_with_message(format!("{stage} done"));
        }
    }
}

/// Format seconds into a human-readable duration like "2.4 hours ago"
fn format_duration_ago(seconds: u64) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;
    const YEAR: u64 = 365 * DAY;

    let (value, unit) = match seconds {
        s if s < MINUTE => return format!("{s} seconds ago"),
        s if s < HOUR => (s as f64 / MINUTE as f64, "minutes"),
        s if s < DAY => (s as f64 / HOUR as f64, "hours"),
        s if s < YEAR => (s as f64 / DAY as f64, "days"),
        s => (s as f64 / YEAR as f64, "years"),
    };
    format!("{value:.1} {unit} ago")
}

fn print_version_info() {
    let version = env!("CARGO_PKG_VERSION");
    let release_tag = option_env!("CITYMIND_RELEASE_TAG");
    let build_timestamp: u64 = env!("CITYMIND_BUILD_TIMESTAMP").parse().unwrap_or(0);

    println!("citymind {version}");

    match release_tag {
        Some(tag) => println!("Release: {tag}"),
        None => println!("Release: development build"),
    }

    if build_timestamp > 0 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        if now > build_timestamp {
            println!("Built: {}", format_duration_ago(now - build_timestamp));
        } else {
            println!("Built: just now");
        }
    }
}
