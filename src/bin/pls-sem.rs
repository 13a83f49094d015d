use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use pls_sem::io::{read_model, read_table};
use pls_sem::logging::init_tracing;
use pls_sem::{FitOptions, print_results, run_with_options};

const TEMPLATE: &str = "\
# Measurement model
# LatentVar =~ indicator1 + indicator2 + indicator3

# Structural model
# DependentVar ~ IndependentVar1 + IndependentVar2

# Residual covariance
# indicator1 ~~ indicator2
";

#[derive(Parser)]
#[command(name = "pls-sem")]
#[command(about = "Fit structural equation models and print the results", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Fit a model to a delimited data file and print the results.
    Fit {
        #[arg(long)]
        data: PathBuf,
        #[arg(long, required_unless_present = "model_spec", conflicts_with = "model_spec")]
        model: Option<PathBuf>,
        #[arg(long)]
        model_spec: Option<String>,
        #[arg(long)]
        std_lv: bool,
        #[arg(long)]
        std_est: bool,
        #[arg(long)]
        no_fixed_x: bool,
        #[arg(long, default_value_t = 1e-10)]
        tolerance: f64,
        #[arg(long, default_value_t = 5000)]
        max_evals: u32,
    },
    /// Print an example model description.
    Template,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("PLS-SEM module loaded successfully.");
        println!("Use run(data, model_spec) to run your model, or `pls-sem fit --help`.");
        return Ok(());
    };

    init_tracing();
    match command {
        Command::Fit {
            data,
            model,
            model_spec,
            std_lv,
            std_est,
            no_fixed_x,
            tolerance,
            max_evals,
        } => {
            let description = match (model, model_spec) {
                (Some(path), _) => read_model(&path)?,
                (None, Some(text)) => text,
                (None, None) => anyhow::bail!("either --model or --model-spec is required"),
            };
            let frame = read_table(&data)?;
            info!("loaded {} rows from {}", frame.height(), data.display());

            let options = FitOptions {
                tolerance,
                max_evaluations: max_evals,
                std_lv,
                fixed_x: !no_fixed_x,
                std_est,
            };
            let results = run_with_options(&frame, &description, &options)
                .with_context(|| format!("fit model to {}", data.display()))?;
            print_results(&results)?;
        }
        Command::Template => print!("{TEMPLATE}"),
    }
    Ok(())
}
