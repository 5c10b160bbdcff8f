//! tabflow command-line interface.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::mpsc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

use tabflow::config::load_config;
use tabflow::scheduler::SubmitRequest;
use tabflow::{logging, Tabflow};

#[derive(Parser)]
#[command(name = "tabflow")]
#[command(about = "Watch a directory for tabular files and run analysis jobs on them", long_about = None)]
struct Cli {
    /// Log level or filter directive (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch the configured directory and process jobs until interrupted
    Run {
        #[arg(long, short)]
        config: PathBuf,
    },

    /// Register one file, run one job on it, and print the finished job
    Process {
        #[arg(long, short)]
        config: PathBuf,

        /// File to register
        data_file: PathBuf,

        #[arg(long)]
        job_type: String,

        /// Job parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,

        /// Seconds to wait for the job to finish
        #[arg(long, default_value = "300")]
        timeout: u64,
    },

    /// Validate a configuration file and exit
    CheckConfig { config: PathBuf },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init(&cli.log_level, cli.log_json) {
        eprintln!("Error: {}", e);
        process::exit(2);
    }

    let code = match cli.command {
        Command::Run { config } => run(config),
        Command::Process {
            config,
            data_file,
            job_type,
            params,
            timeout,
        } => process_one(config, data_file, job_type, &params, timeout),
        Command::CheckConfig { config } => check_config(config),
    };
    process::exit(code);
}

fn build(config: &Path) -> Result<Tabflow, String> {
    let config = load_config(config).map_err(|e| e.to_string())?;
    Tabflow::build(config).map_err(|e| e.to_string())
}

fn run(config: PathBuf) -> i32 {
    let mut app = match build(&config) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let (stop_tx, stop_rx) = mpsc::channel();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    }) {
        eprintln!("Error: failed to install Ctrl-C handler: {}", e);
        return 1;
    }

    if let Err(e) = app.start() {
        eprintln!("Error: {}", e);
        app.shutdown();
        return 1;
    }

    log::info!("tabflow running; press Ctrl-C to stop");
    let _ = stop_rx.recv();
    log::info!("Shutting down...");
    // Queued jobs survive in a database and resume on the next run.
    if app.config().database.is_some() {
        app.stop();
    } else {
        app.shutdown();
    }
    0
}

fn process_one(
    config: PathBuf,
    data_file: PathBuf,
    job_type: String,
    params: &str,
    timeout: u64,
) -> i32 {
    let parameters: Map<String, Value> = match serde_json::from_str(params) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            eprintln!("Error: --params must be a JSON object");
            return 2;
        }
        Err(e) => {
            eprintln!("Error: invalid --params JSON: {}", e);
            return 2;
        }
    };

    let mut app = match build(&config) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if let Err(e) = app.start_workers() {
        eprintln!("Error: {}", e);
        return 1;
    }

    let outcome = app
        .register_upload(&data_file, Map::new())
        .map_err(|e| e.to_string())
        .and_then(|record| {
            app.submit(SubmitRequest::new(&record.id, &job_type, parameters))
                .map_err(|e| e.to_string())
        })
        .and_then(|receipt| {
            app.wait_for_job(&receipt.job_id, Duration::from_secs(timeout))
                .map_err(|e| e.to_string())
        });

    let code = match outcome {
        Ok(Some(job)) => match serde_json::to_string_pretty(&job) {
            Ok(json) => {
                println!("{}", json);
                if job.status.is_terminal() && job.error.is_none() {
                    0
                } else {
                    1
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
        Ok(None) => {
            eprintln!("Error: job disappeared from the store");
            1
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };

    app.shutdown();
    code
}

fn check_config(config: PathBuf) -> i32 {
    match load_config(&config) {
        Ok(config) => {
            println!(
                "Configuration OK: watching {} with {} workers",
                config.watch_directory.display(),
                config.worker_count
            );
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}
