//! Hand-rolled argument parsing for the `vpp-sil` binary.

use std::env;
use std::path::PathBuf;

use crate::config::{ConfigError, ScenarioConfig};

/// What the binary should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Serve the control bridge until interrupted.
    Serve,
    /// Run the co-simulation against a bridge.
    Run,
    /// Print usage and exit.
    Help,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CliOptions {
    pub command: Command,
    pub config: Option<PathBuf>,
    pub preset: Option<String>,
    pub port: Option<u16>,
    pub out: Option<PathBuf>,
    pub bridge_url: Option<String>,
    pub realtime: Option<f64>,
}

impl CliOptions {
    /// Loads the selected scenario and applies command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file or preset cannot be loaded.
    pub fn load_config(&self) -> Result<ScenarioConfig, ConfigError> {
        let mut config = match (&self.config, &self.preset) {
            (Some(path), _) => ScenarioConfig::from_toml_file(path)?,
            (None, Some(name)) => ScenarioConfig::from_preset(name)?,
            (None, None) => ScenarioConfig::demo(),
        };
        if let Some(port) = self.port {
            config.bridge.port = port;
        }
        if let Some(out) = &self.out {
            config.monitor.out_path.clone_from(out);
        }
        if let Some(url) = &self.bridge_url {
            config.client.url = Some(url.clone());
        }
        if let Some(factor) = self.realtime {
            config.simulation.rt_factor = Some(factor);
        }
        Ok(config)
    }
}

pub fn parse_args() -> Result<CliOptions, String> {
    let args: Vec<String> = env::args().skip(1).collect();
    parse_args_from(args)
}

/// Parses arguments without the program name.
///
/// The first argument may be a subcommand (`serve`, `run`, `help`); the
/// default is `run`.
pub fn parse_args_from(args: Vec<String>) -> Result<CliOptions, String> {
    let (command, rest) = match args.first().map(String::as_str) {
        Some("serve") => (Command::Serve, &args[1..]),
        Some("run") => (Command::Run, &args[1..]),
        Some("help") => (Command::Help, &args[1..]),
        _ => (Command::Run, &args[..]),
    };
    parse_options(command, rest)
}

fn parse_options(command: Command, args: &[String]) -> Result<CliOptions, String> {
    let mut opts = CliOptions {
        command,
        config: None,
        preset: None,
        port: None,
        out: None,
        bridge_url: None,
        realtime: None,
    };

    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                let path = args.next_or_err(i, "missing value for --config (expected a TOML file path)")?;
                if opts.config.replace(PathBuf::from(path)).is_some() {
                    return Err("--config provided more than once".to_string());
                }
            }
            "--preset" => {
                i += 1;
                let name = args.next_or_err(i, "missing value for --preset (expected a preset name)")?;
                if opts.preset.replace(name.to_string()).is_some() {
                    return Err("--preset provided more than once".to_string());
                }
            }
            "--port" => {
                i += 1;
                let value = args.next_or_err(i, "missing value for --port (expected a u16)")?;
                let port = value
                    .parse::<u16>()
                    .map_err(|_| format!("--port value \"{value}\" is not a valid u16"))?;
                opts.port = Some(port);
            }
            "--out" => {
                i += 1;
                let path = args.next_or_err(i, "missing value for --out (expected a CSV path)")?;
                opts.out = Some(PathBuf::from(path));
            }
            "--bridge-url" => {
                i += 1;
                let url = args.next_or_err(i, "missing value for --bridge-url (expected a URL)")?;
                opts.bridge_url = Some(url.to_string());
            }
            "--realtime" => {
                i += 1;
                let value = args.next_or_err(i, "missing value for --realtime (expected a factor)")?;
                let factor = value
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && *f > 0.0)
                    .ok_or_else(|| format!("--realtime value \"{value}\" is not a positive number"))?;
                opts.realtime = Some(factor);
            }
            "--help" | "-h" => opts.command = Command::Help,
            other => return Err(format!("unknown argument: {other}")),
        }
        i += 1;
    }

    if opts.config.is_some() && opts.preset.is_some() {
        return Err(
            "arguments `--config` and `--preset` are mutually exclusive; choose one source"
                .to_string(),
        );
    }

    Ok(opts)
}

trait SliceArgExt {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String>;
}

impl SliceArgExt for [String] {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String> {
        self.get(index)
            .map(String::as_str)
            .ok_or_else(|| err.to_string())
    }
}

pub fn print_usage() {
    eprintln!("vpp-sil - software-in-the-loop bridge for energy co-simulation");
    eprintln!();
    eprintln!("Usage: vpp-sil [serve|run|help] [OPTIONS]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  serve                    Serve the control bridge until Ctrl+C");
    eprintln!("  run                      Run the co-simulation (default)");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>          Load scenario from TOML config file");
    eprintln!(
        "  --preset <name>          Use a built-in preset ({})",
        ScenarioConfig::PRESETS.join(", ")
    );
    eprintln!("  --port <u16>             Bridge port");
    eprintln!("  --out <path>             Monitor CSV output path");
    eprintln!("  --bridge-url <url>       Use an already running bridge");
    eprintln!("  --realtime <factor>      Wall seconds per simulated second");
    eprintln!("  --help                   Show this help message");
    eprintln!();
    eprintln!("If no --config or --preset is given, the demo preset is used.");
}
