//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Hardware test execution orchestrator
#[derive(Parser, Debug)]
#[command(name = "hwtest")]
#[command(version = "0.1.0")]
#[command(about = "Run phased hardware test scripts across units and manage their reports")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (overrides HWTEST_CONFIG and standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Enable verbose output (same as --log-level debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List registered test scripts
    Scripts {
        /// Output format (table, json, json-pretty)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Show the test tree of a script
    Tests {
        /// Script id
        script: String,

        /// Output format (table, json, json-pretty)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Run a script across units
    Run(RunArgs),

    /// Rebuild the event stream of a unit workbook
    Import(ImportArgs),

    /// List saved unit workbooks
    Reports {
        /// Results directory (default: from config)
        #[arg(long)]
        results_dir: Option<PathBuf>,
    },

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Script id
    pub script: String,

    /// Unit numbers to test (comma-separated)
    #[arg(short, long, value_delimiter = ',', required = true)]
    pub units: Vec<u32>,

    /// Full test paths to run (comma-separated, default: all)
    #[arg(short, long, value_delimiter = ',')]
    pub tests: Vec<String>,

    /// Operator name (default: from config)
    #[arg(short, long)]
    pub operator: Option<String>,

    /// Serial number of a unit as UNIT=SERIAL (repeatable)
    #[arg(long = "serial", value_parser = parse_unit_value)]
    pub serials: Vec<(u32, String)>,

    /// Comment for a unit as UNIT=TEXT (repeatable)
    #[arg(long = "comment", value_parser = parse_unit_value)]
    pub comments: Vec<(u32, String)>,

    /// Results directory (default: from config)
    #[arg(long)]
    pub results_dir: Option<PathBuf>,

    /// Output format (table, json, json-pretty)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

/// Arguments for import command
#[derive(Parser, Debug)]
pub struct ImportArgs {
    /// Workbook directory of one unit
    pub dir: PathBuf,

    /// Where image artifacts are written (default: from config)
    #[arg(long)]
    pub images_dir: Option<PathBuf>,

    /// Output format (table, json, json-pretty)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

/// Arguments for config management
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// List supported environment variables instead
        #[arg(long)]
        env: bool,

        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Write a configuration file with default settings
    Init {
        /// Output path (default: ~/.config/hwtest/config.yaml)
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Parse `UNIT=VALUE`
fn parse_unit_value(s: &str) -> Result<(u32, String), String> {
    let (unit, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected UNIT=VALUE, got `{s}`"))?;
    let unit = unit
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("invalid unit `{unit}`: {e}"))?;
    Ok((unit, value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_parsing() {
        let args = Args::parse_from([
            "hwtest",
            "run",
            "thermal_cycle",
            "--units",
            "3,1",
            "--serial",
            "1=SN-001",
            "--comment",
            "3=rework = yes",
            "--operator",
            "alice",
        ]);
        match args.command {
            Command::Run(run) => {
                assert_eq!(run.script, "thermal_cycle");
                assert_eq!(run.units, vec![3, 1]);
                assert!(run.tests.is_empty());
                assert_eq!(run.serials, vec![(1, "SN-001".to_string())]);
                assert_eq!(run.comments, vec![(3, "rework = yes".to_string())]);
                assert_eq!(run.operator.as_deref(), Some("alice"));
                assert_eq!(run.format, "table");
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_requires_units() {
        assert!(Args::try_parse_from(["hwtest", "run", "thermal_cycle"]).is_err());
    }

    #[test]
    fn test_global_flags() {
        let args = Args::parse_from([
            "hwtest",
            "tests",
            "display_check",
            "--log-level",
            "debug",
            "--config",
            "/tmp/hwtest.yaml",
        ]);
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert_eq!(args.config, Some(PathBuf::from("/tmp/hwtest.yaml")));
        assert!(matches!(args.command, Command::Tests { .. }));
    }

    #[test]
    fn test_parse_unit_value() {
        assert_eq!(parse_unit_value("2=SN 9"), Ok((2, "SN 9".to_string())));
        assert!(parse_unit_value("SN-9").is_err());
        assert!(parse_unit_value("x=SN-9").is_err());
    }
}
