//! CLI for the health diagnostics collector.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "hds")]
#[command(about = "hds: health diagnostics collector with fault intake, telemetry sampling and packaging")]
#[command(version = hds_core::VERSION)]
struct Cli {
    /// Debug-level logging (RUST_LOG still wins when set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the collector HTTP service
    Serve {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(long, default_value = "5005")]
        port: u16,

        /// Directory for archives and fault_index.json
        #[arg(long, default_value = "DiagnosticsPackages")]
        output_dir: String,

        /// Concurrent packaging runs
        #[arg(long, default_value_t = hds_core::DEFAULT_WORKERS)]
        workers: usize,

        /// Samples per metric in each package
        #[arg(long, default_value_t = hds_core::DEFAULT_SAMPLE_COUNT)]
        samples: usize,

        /// Milliseconds between samples
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
    },

    /// Sample live metrics once and print the time series as JSON
    Sample {
        /// Comma-separated metrics: CPU, RAM, GPU, DISK, NETWORK
        #[arg(long, default_value = "CPU,RAM,GPU,DISK,NETWORK")]
        env: String,

        /// Samples per metric
        #[arg(long, default_value = "5")]
        samples: usize,

        /// Milliseconds between samples
        #[arg(long, default_value = "1000")]
        interval_ms: u64,

        /// Write JSON to path instead of stdout
        #[arg(long)]
        output: Option<String>,
    },

    /// List packaged archives from a fault index
    Packages {
        /// Directory holding fault_index.json
        #[arg(long, default_value = "DiagnosticsPackages")]
        output_dir: String,

        /// Print the raw index entries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the fault type table
    Types,
}

fn main() {
    let cli = Cli::parse();
    commands::init_logging(cli.verbose);

    match cli.command {
        Commands::Serve {
            host,
            port,
            output_dir,
            workers,
            samples,
            interval_ms,
        } => commands::serve::run(commands::serve::ServeCommandConfig {
            host: &host,
            port,
            output_dir: &output_dir,
            workers,
            samples,
            interval_ms,
        }),
        Commands::Sample {
            env,
            samples,
            interval_ms,
            output,
        } => commands::sample::run(&env, samples, interval_ms, output.as_deref()),
        Commands::Packages { output_dir, json } => commands::packages::run(&output_dir, json),
        Commands::Types => commands::types::run(),
    }
}
