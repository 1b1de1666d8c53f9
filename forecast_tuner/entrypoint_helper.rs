use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Hyperparameter search for binary direction forecasters
#[derive(Parser, Debug)]
#[command(name = "forecast_tuner")]
#[command(about = "Search, train and report on precision-scored forecasting models", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run (or resume) a hyperparameter study
    Optimize {
        /// Experiment configuration (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Override the configured number of trials
        #[arg(short, long)]
        n_trials: Option<usize>,

        /// Enable debug logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// Fit one model from fixed parameters, evaluate it and save it
    Train {
        /// Experiment configuration (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// JSON file with the model parameters
        #[arg(short, long, conflicts_with = "from_study")]
        params: Option<PathBuf>,

        /// Use the best parameters of the configured study
        #[arg(long)]
        from_study: bool,

        /// Refit on the full series before saving (the saved model carries no score)
        #[arg(long)]
        full_fit: bool,

        /// Where to write the fitted model
        #[arg(short, long, default_value = "model.json")]
        model_out: PathBuf,

        /// Enable debug logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the trials and best result of the configured study
    Report {
        /// Experiment configuration (TOML)
        #[arg(short, long)]
        config: PathBuf,
    },
}
