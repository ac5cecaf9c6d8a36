//! hwtest - Hardware Test Execution Orchestrator
//!
//! A CLI tool that runs phased hardware test scripts across several units,
//! streams result events live, and saves one workbook per unit that can be
//! imported back into the original event stream.
//!
//! ## Features
//!
//! - Barrier tasks that run once for all units, phased tests per unit
//! - Live event stream with Ctrl-C cancellation
//! - Per-unit workbooks (metadata plus one sheet per test) and a full JSON log
//! - Import of saved workbooks with per-test diagnostics
//!
//! ## Usage
//!
//! ```bash
//! # List scripts and their tests
//! hwtest scripts
//! hwtest tests thermal_cycle
//!
//! # Run two units
//! hwtest run thermal_cycle --units 1,2 --operator alice --serial 1=SN-001
//!
//! # Rebuild the events of a saved workbook
//! hwtest import ./results/thermal_cycle_SN-001_20240305_140709_alice_unit1
//! ```

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

mod cli;
mod config;
mod executor;
mod models;
mod output;
mod plan;
mod results;
mod scripts;
mod utils;

use cli::Args;
use config::AppConfig;
use executor::{RunSession, StartRequest};
use models::RunDetails;
use output::{OutputFormat, ResultFormatter};
use results::{ReportImporter, ReportStore};
use scripts::ScriptRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (mut config, config_path) = AppConfig::resolve(args.config.as_deref())?;
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    if args.verbose {
        config.log_level = "debug".to_string();
    }
    config.validate()?;

    utils::logger::init_logger(config.log_level());
    if let Some(path) = &config_path {
        debug!("Using configuration {}", path.display());
    }

    match args.command {
        cli::Command::Scripts { format } => {
            let registry = ScriptRegistry::builtin(&config);
            print!("{}", formatter(&format).format_scripts(&registry));
        }
        cli::Command::Tests { script, format } => {
            list_tests(&config, &script, &format)?;
        }
        cli::Command::Run(run_args) => {
            run_script(config, run_args).await?;
        }
        cli::Command::Import(import_args) => {
            import_workbook(&config, import_args)?;
        }
        cli::Command::Reports { results_dir } => {
            let store = ReportStore::new(results_dir.unwrap_or(config.results_dir));
            list_reports(&store)?;
        }
        cli::Command::Config(config_args) => {
            manage_config(&config, config_args)?;
        }
    }

    Ok(())
}

fn formatter(format: &str) -> ResultFormatter {
    ResultFormatter::new(OutputFormat::from_str(format).unwrap_or(OutputFormat::Table))
}

fn list_tests(config: &AppConfig, script: &str, format: &str) -> Result<()> {
    let registry = ScriptRegistry::builtin(config);
    let script = registry
        .get(script)
        .ok_or_else(|| anyhow!("Unknown script: {script}"))?;

    print!(
        "{}",
        formatter(format).format_outline(
            script.name(),
            script.max_units(),
            &script.available_tests()
        )
    );
    Ok(())
}

async fn run_script(mut config: AppConfig, args: cli::RunArgs) -> Result<()> {
    if let Some(dir) = args.results_dir {
        config.results_dir = dir;
    }

    let registry = ScriptRegistry::builtin(&config);
    let store = ReportStore::new(&config.results_dir);
    let session = RunSession::new(registry, store, config.event_buffer);

    let tests = if args.tests.is_empty() {
        session
            .available_tests(&args.script)
            .ok_or_else(|| anyhow!("Unknown script: {}", args.script))?
            .iter()
            .flat_map(|node| node.paths(None))
            .collect()
    } else {
        args.tests
    };

    let operator = args.operator.unwrap_or_else(|| config.operator.clone());
    let details = args
        .serials
        .into_iter()
        .fold(RunDetails::new(operator), |d, (unit, serial)| {
            d.with_serial(unit, serial)
        });
    let details = args
        .comments
        .into_iter()
        .fold(details, |d, (unit, comment)| d.with_comment(unit, comment));

    let formatter = formatter(&args.format);
    let mut rx = session.subscribe();
    let mut handle = session.start(StartRequest {
        script: args.script,
        tests,
        details,
        units: args.units,
    })?;

    info!("Press Ctrl-C to stop after the current step");

    let result = loop {
        tokio::select! {
            joined = &mut handle => break joined.context("Run task panicked")?,
            message = rx.recv() => match message {
                Ok(message) => println!("{}", formatter.format_message(&message)),
                Err(RecvError::Lagged(skipped)) => warn!("Display fell behind, {} events not shown", skipped),
                Err(RecvError::Closed) => {}
            },
            _ = tokio::signal::ctrl_c() => {
                if session.stop() {
                    warn!("Stopping after the current step");
                }
            }
        }
    };

    while let Ok(message) = rx.try_recv() {
        println!("{}", formatter.format_message(&message));
    }

    let summary = result?;
    println!("{}", formatter.format_summary(&summary));
    Ok(())
}

fn import_workbook(config: &AppConfig, args: cli::ImportArgs) -> Result<()> {
    let images_dir = args.images_dir.unwrap_or_else(|| config.images_dir.clone());
    let importer = ReportImporter::new(images_dir);
    let run = importer
        .import_dir(&args.dir)
        .with_context(|| format!("Failed to import {}", args.dir.display()))?;

    print!("{}", formatter(&args.format).format_import(&run));
    Ok(())
}

fn list_reports(store: &ReportStore) -> Result<()> {
    let workbooks = store.list_workbooks()?;
    println!(
        "\nWorkbooks in {} ({} total)\n",
        store.base_dir().display(),
        workbooks.len()
    );
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for workbook in workbooks {
        let name = workbook
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        println!("  {name}");
    }
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    Ok(())
}

fn manage_config(config: &AppConfig, args: cli::ConfigArgs) -> Result<()> {
    use config::env::print_env_help;
    use config::file::ConfigFile;

    match args.action {
        cli::ConfigAction::Show { env, format } => {
            if env {
                print_env_help();
            } else {
                let output = if format == "json" {
                    serde_json::to_string_pretty(config)?
                } else {
                    serde_yaml::to_string(config)?
                };
                println!("{output}");
            }
        }

        cli::ConfigAction::Init { path, force } => {
            let path = path.unwrap_or_else(ConfigFile::default_location);
            if path.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    path.display()
                );
            }

            ConfigFile::default().save(&path)?;
            println!("✓ Configuration file created: {}", path.display());
            println!("\nEdit the file to customize your settings.");
        }
    }

    Ok(())
}
