use std::process;

use forecast_tuner::{init_logging, run_optimize, run_report, run_train, ExperimentConfig};

// Include entrypoint helper module
#[path = "entrypoint_helper.rs"]
mod entrypoint_helper;

use clap::Parser;
use entrypoint_helper::{Cli, Commands};

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Optimize {
            config,
            n_trials,
            verbose,
        } => {
            let config = ExperimentConfig::from_file(&config)?;
            init_logging(&config.output.log_level, verbose);
            let summary = run_optimize(&config, n_trials)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Train {
            config,
            params,
            from_study,
            full_fit,
            model_out,
            verbose,
        } => {
            let config = ExperimentConfig::from_file(&config)?;
            init_logging(&config.output.log_level, verbose);
            let evaluation = run_train(&config, params.as_deref(), from_study, full_fit, &model_out)?;
            backtesting::report::write_text_report(&evaluation.report, &mut std::io::stdout())?;
            println!("Model saved to {}", model_out.display());
        }
        Commands::Report { config } => {
            let config = ExperimentConfig::from_file(&config)?;
            init_logging(&config.output.log_level, false);
            print!("{}", run_report(&config)?);
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
