use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::info;

use rustcar::cars::CarProbs;
use rustcar::config::CarConfig;
use rustcar::demand::TruncatedPoisson;
use rustcar::export;
use rustcar::policy::ActionTable;
use rustcar::solver::{Progress, Solution, State};
use rustcar::Result;


/// Command line argument parser.
#[derive(Parser, Debug)]
#[command(about = "Solve the Barto and Sutton Car Rental Problem", long_about = None)]
pub struct Args {
    /// Path to RustCar configuration TOML file.
    config_path: PathBuf,

    #[command(subcommand)]
    command: Commands
}


#[derive(Subcommand, Debug)]
enum Commands {
    /// Print truncated request and return probabilities.
    Probs,
    /// Calculate expected one-day reward for a state and transfer.
    Reward {
        n1: u32,
        n2: u32,
        #[arg(default_value_t = 0, allow_negative_numbers = true)]
        transfer: i32,
    },
    /// Solve for optimal policy
    Solve {
        /// Directory for values.csv, policy.csv and history.csv.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}


fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}


fn run(args: &Args) -> Result<()> {
    let config = CarConfig::load(&args.config_path)?;

    match &args.command {
        Commands::Probs => {
            let cprobs = theoretical_model(&config)?;
            show_table("Location #1 Request Probabilities", "  cars requested", &cprobs.x1);
            show_table("Location #1 Return Probabilities", "cars returned", &cprobs.y1);
            show_table("Location #2 Request Probabilities", "  cars requested", &cprobs.x2);
            show_table("Location #2 Return Probabilities", "cars returned", &cprobs.y2);
        }
        Commands::Reward { n1, n2, transfer } => {
            let cprobs = theoretical_model(&config)?;
            let s = State::new(*n1, *n2);
            s.check(config.cars_max)?;
            match cprobs.expected_reward(&s, *transfer) {
                Some(r) => println!("Expected Reward: {:.2}", r),
                None => println!("Moving {} cars is infeasible at {}", transfer, s),
            }
        }
        Commands::Solve { output } => {
            info!("Solving in {:?} mode", config.mode);
            let solution = config.solve(|p| {
                if let Progress::Improved { iteration, changed, .. } = p {
                    info!("iteration {}: {} states changed", iteration, changed);
                }
            })?;
            let actions = config.action_table()?;
            show_solution(&solution, &actions, config.max_iterations)?;
            if let Some(dir) = output {
                write_outputs(dir, &solution, &actions)?;
            }
        }
    }
    Ok(())
}


fn theoretical_model(config: &CarConfig) -> Result<CarProbs> {
    info!("Calculating rental and return probabilities.");
    CarProbs::new(config.lots(), config.rewards(), config.rates(), config.truncation)
}


fn show_table(title: &str, row_prefix: &str, table: &TruncatedPoisson) {
    println!("\n=== {} (mean {}) ===", title, table.mean);
    for (k, p) in table.probs().iter().enumerate() {
        println!("{row_prefix}: {k:>3} | {p:8.4}");
    }
    println!("retained mass: {:.6}", table.mass());
}


fn show_solution(solution: &Solution, actions: &ActionTable, max_iterations: usize) -> Result<()> {
    if solution.converged() {
        println!("Took {} iterations to find optimal policy", solution.stopped_at + 1);
    } else {
        println!("Max iterations ({}) reached for policy", max_iterations);
    }
    let transfers = solution.policy.transfers(actions)?;
    println!("\n=== Policy (rows: cars at #1, columns: cars at #2) ===");
    for row in transfers.rows() {
        let cells: Vec<String> = row.iter().map(|t| format!("{:>3}", t)).collect();
        println!("{}", cells.join(" "));
    }
    println!("\n=== Value Function ===");
    for row in solution.values.as_array().rows() {
        let cells: Vec<String> = row.iter().map(|v| format!("{:8.2}", v)).collect();
        println!("{}", cells.join(" "));
    }
    Ok(())
}


fn write_outputs(dir: &Path, solution: &Solution, actions: &ActionTable) -> Result<()> {
    fs::create_dir_all(dir)?;
    export::write_values(File::create(dir.join("values.csv"))?, &solution.values)?;
    export::write_policy(File::create(dir.join("policy.csv"))?, &solution.policy, actions)?;
    export::write_history(File::create(dir.join("history.csv"))?, &solution.history, actions)?;
    info!("Wrote results to {}", dir.display());
    Ok(())
}
