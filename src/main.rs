//! `vpp-sil` entry point: CLI wiring and scenario dispatch.

use std::process::ExitCode;

use vpp_sil::cli::{self, Command};
use vpp_sil::runner::{self, RunError};
use vpp_sil::telemetry;

fn report(err: &RunError) {
    match err {
        RunError::Config(errors) => {
            for e in errors {
                eprintln!("{e}");
            }
        }
        other => eprintln!("error: {other}"),
    }
}

fn main() -> ExitCode {
    let opts = match cli::parse_args() {
        Ok(opts) => opts,
        Err(msg) => {
            eprintln!("error: {msg}");
            cli::print_usage();
            return ExitCode::FAILURE;
        }
    };
    if opts.command == Command::Help {
        cli::print_usage();
        return ExitCode::SUCCESS;
    }

    let config = match opts.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    telemetry::init();

    let result = match opts.command {
        Command::Serve => runner::serve(&config),
        Command::Run => runner::run_cosimulation(&config).map(|summary| {
            println!(
                "{} steps, results written to {}",
                summary.steps,
                config.monitor.out_path.display()
            );
        }),
        Command::Help => Ok(()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}
