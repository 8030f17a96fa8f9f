mod commands;
mod logging;
mod progress;

use std::process;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dcmsort_core::heuristic::{load_heuristic, Heuristic};
use dcmsort_core::{AppConfig, SortEngine};
use dotenv::dotenv;
use progress::CliReporter;
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let mut config = match dcmsort_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    match args.command {
        Some(Commands::Convert { input, output }) => {
            input.apply(&mut config);
            output.apply(&mut config);
            if let Err(err) = run_convert(config) {
                error!("Error: {:#}", err);
                process::exit(1);
            }
        }
        Some(Commands::Ls { input }) => {
            input.apply(&mut config);
            if let Err(err) = run_ls(config) {
                error!("Error: {:#}", err);
                process::exit(1);
            }
        }
        Some(Commands::Heuristic { heuristic }) => {
            let name = heuristic.or(config.heuristic);
            describe_heuristic(name.as_deref())?;
        }
        Some(Commands::PrintConfig) => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        None => {
            let _ = Cli::command().print_long_help();
        }
    }

    Ok(())
}

fn run_convert(config: AppConfig) -> anyhow::Result<()> {
    let engine = SortEngine::new(config).context("invalid configuration")?;
    let reporter = CliReporter::new();
    let result = engine.run(&reporter)?;

    println!();
    info!(
        "Grouping: {}, Plans: {}, Conversion: {}",
        format!("{:.2}s", result.grouping_duration.as_secs_f64()).green(),
        format!("{:.2}s", result.plan_duration.as_secs_f64()).green(),
        format!("{:.2}s", result.convert_duration.as_secs_f64()).green(),
    );
    info!(
        "{} study sessions: {} processed, {} skipped, {} failed",
        result.study_sessions,
        format!("{}", result.units_processed).green(),
        format!("{}", result.units_skipped).yellow(),
        format!("{}", result.units_failed).red(),
    );
    info!(
        "{} plans generated, {} reused, {} series planned, {} items converted into {} files",
        format!("{}", result.plans_generated).cyan(),
        format!("{}", result.plans_reused).cyan(),
        format!("{}", result.series_planned).cyan(),
        format!("{}", result.items_converted).cyan(),
        format!("{}", result.outputs_written).cyan(),
    );

    if result.units_failed > 0 {
        anyhow::bail!("{} study sessions failed", result.units_failed);
    }
    Ok(())
}

fn run_ls(config: AppConfig) -> anyhow::Result<()> {
    let engine = SortEngine::new(config).context("invalid configuration")?;
    for (input, sessions) in engine.list()? {
        println!("{}", input.bold());
        for session in sessions {
            println!(
                "\t{} {} sequences{}",
                session.key,
                session.count,
                session.suffix.unwrap_or_default()
            );
        }
    }
    Ok(())
}

fn describe_heuristic(name: Option<&str>) -> anyhow::Result<()> {
    let heuristic = load_heuristic(name).context("cannot load heuristic")?;
    let yes_no = |present: bool| if present { "yes".green() } else { "no".red() };

    println!("{} {}", "Heuristic:".bold(), heuristic.name());
    if let Some(source) = heuristic.source_file() {
        println!("  source:         {}", source.display());
    }
    println!("  infotodict:     {}", yes_no(true));
    println!("  infotoids:      {}", yes_no(heuristic.identifier().is_some()));
    let defaults = heuristic.default_fields();
    println!("  default_fields: {}", defaults.len());
    for (key, value) in defaults {
        println!("    {} = {}", key, value);
    }
    Ok(())
}
