//! Receding-horizon MPC command-line runner.
//!
//! Provides three modes of operation:
//! - `run`: Run a scenario from a TOML file
//! - `preset`: Run (or print) a built-in scenario
//! - `info`: Print workspace crate versions and available presets

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, info};
use recede_core::ScenarioConfig;
use recede_mpc::{ScenarioBuilder, SessionLog, presets};

type AppResult = Result<(), Box<dyn std::error::Error>>;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// Receding-horizon model predictive control.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario file and print a summary.
    Run {
        /// Scenario TOML file.
        config: PathBuf,

        /// Write the session log as JSON.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a built-in scenario.
    Preset {
        /// One of: single-mass, two-mass, crane.
        name: String,

        /// Print the scenario as TOML instead of running it.
        #[arg(long)]
        print: bool,

        /// Write the session log as JSON.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print crate information.
    Info,
}

// ---------------------------------------------------------------------------
// Mode implementations
// ---------------------------------------------------------------------------

fn run_scenario(config: ScenarioConfig, output: Option<&Path>) -> AppResult {
    let name = config.name.clone().unwrap_or_else(|| "unnamed".into());
    let mut session = ScenarioBuilder::new(config).build()?;
    let result = session.run().map(|_| ());

    // Partial log is written on abort too
    if let Some(path) = output {
        write_log(session.log(), path)?;
        info!("Session log written to {}", path.display());
    }
    print_summary(&name, session.log());
    result.map_err(Into::into)
}

fn write_log(log: &SessionLog, path: &Path) -> AppResult {
    let json = serde_json::to_string_pretty(log)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn print_summary(name: &str, log: &SessionLog) {
    println!("scenario {name}: {:?} after {} ticks", log.final_state, log.ticks());
    if let Some(t) = log.time.last() {
        println!("  t_final   = {t:.3} s");
    }
    if let Some(x) = log.last_state() {
        println!("  x_final   = {x:.4?}");
    }
    if let Some(y) = log.outputs.last() {
        println!("  y_final   = {y:.4?}");
    }
    if !log.solve_time_us.is_empty() {
        let total: u64 = log.solve_time_us.iter().sum();
        let max = log.solve_time_us.iter().max().copied().unwrap_or(0);
        println!(
            "  solve     = {:.1} us mean, {max} us max",
            total as f64 / log.solve_time_us.len() as f64
        );
    }
    println!("  fallbacks = {}", log.fallbacks.len());
}

fn run_preset(name: &str, print: bool, output: Option<&Path>) -> AppResult {
    let Some(config) = presets::by_name(name) else {
        return Err(format!(
            "unknown preset '{name}' (available: {})",
            presets::NAMES.join(", ")
        )
        .into());
    };
    if print {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }
    run_scenario(config, output)
}

fn run_info() {
    println!("recede v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("crates:");
    println!("  recede-core {}", env!("CARGO_PKG_VERSION"));
    println!("  recede-mpc  {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("presets: {}", presets::NAMES.join(", "));
    println!("solvers: dense, clarabel");
    println!("edition: 2024");
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Run { config, output }) => ScenarioConfig::from_file(&config)
            .map_err(Into::into)
            .and_then(|c| run_scenario(c, output.as_deref())),
        Some(Commands::Preset {
            name,
            print,
            output,
        }) => run_preset(&name, print, output.as_deref()),
        Some(Commands::Info) => {
            run_info();
            Ok(())
        }
        // Default: the single-mass reference scenario
        None => run_preset("single-mass", false, None),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
