//! rtlab Scenario CLI
//!
//! Run the deterministic teaching scenarios and optionally export a timeline.

use clap::Parser;
use rtlab_sim::{ScenarioId, ScenarioResult, ScenarioRunner};
use std::process::ExitCode;
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    UnknownScenario(String),

    #[error("--export only supports a single scenario, not 'all'")]
    ExportNeedsOneScenario,

    #[error("failed to write export: {0}")]
    Export(#[from] std::io::Error),

    #[error("failed to render JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// rtlab deterministic scenario CLI
#[derive(Parser, Debug)]
#[command(name = "rtlab-sim")]
#[command(about = "Run deterministic runtime teaching scenarios", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (name such as mutex_deadlock, code such as RT-012, or all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Engine step budget per scenario
    #[arg(short, long, default_value = "10000")]
    max_steps: usize,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export the full timeline of one scenario to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(log_filter(args.verbose))
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
    }

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins when set; otherwise `--verbose` picks debug over info.
fn log_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }))
}

fn parse_scenarios(arg: &str) -> Result<Vec<ScenarioId>, CliError> {
    if arg.eq_ignore_ascii_case("all") {
        return Ok(ScenarioId::all());
    }
    let id = arg.parse().map_err(|e: String| {
        let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
        CliError::UnknownScenario(format!("{e} (available: {}, all)", names.join(", ")))
    })?;
    Ok(vec![id])
}

fn base_seed(seed: u64) -> u64 {
    if seed != 0 {
        return seed;
    }
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1)
}

/// Returns whether every scenario passed.
fn run(args: &Args) -> Result<bool, CliError> {
    let scenarios = parse_scenarios(&args.scenario)?;
    let seed = base_seed(args.seed);
    let runner = ScenarioRunner::new(seed).with_max_steps(args.max_steps);

    if !args.json {
        info!("rtlab scenario runner v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    if let Some(path) = &args.export {
        let [scenario] = scenarios.as_slice() else {
            return Err(CliError::ExportNeedsOneScenario);
        };
        let (result, export) = runner.run_with_export(*scenario);
        export.write_to_file(path)?;
        info!("Exported {} frames to {}", export.frames.len(), path);
        report(&result);
        return Ok(result.passed);
    }

    let results: Vec<ScenarioResult> = scenarios
        .iter()
        .map(|scenario| {
            let result = runner.run(*scenario);
            if !args.json {
                report(&result);
            }
            result
        })
        .collect();

    let failed: Vec<&ScenarioResult> = results.iter().filter(|r| !r.passed).collect();

    if args.json {
        let summary = serde_json::json!({
            "seed": seed,
            "total": results.len(),
            "passed": results.len() - failed.len(),
            "failed": failed.len(),
            "results": results,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed.is_empty() {
            info!("✅ All {} scenario runs passed!", results.len());
        } else {
            error!("❌ {}/{} scenario runs failed!", failed.len(), results.len());
            for result in &failed {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    Ok(failed.is_empty())
}

fn report(result: &ScenarioResult) {
    if result.passed {
        info!(
            "✓ {} (seed={}) PASSED in {} steps",
            result.scenario.name(),
            result.seed,
            result.total_steps
        );
        if let Some(deadlock) = &result.deadlock {
            info!("  deadlock cycle: {:?}", deadlock.cycle);
        }
    } else {
        error!(
            "✗ {} (seed={}) FAILED: {}",
            result.scenario.name(),
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
}
