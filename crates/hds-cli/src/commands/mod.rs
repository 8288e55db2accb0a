pub mod packages;
pub mod sample;
pub mod serve;
pub mod types;

use std::time::Duration;

use hds_core::SamplerConfig;

/// Install env_logger. `RUST_LOG` overrides the default level.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp_millis()
        .init();
}

pub fn sampler_config(samples: usize, interval_ms: u64) -> SamplerConfig {
    SamplerConfig {
        sample_count: samples,
        interval: Duration::from_millis(interval_ms.max(1)),
    }
}

/// Split a comma-separated list, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn runtime() -> tokio::runtime::Runtime {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start async runtime: {e}");
            std::process::exit(1);
        }
    }
}
