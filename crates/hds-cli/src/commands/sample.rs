use std::sync::Arc;

use hds_core::{CaptureRequest, Metric, ProcMetrics, TimeSeriesSampler};
use log::{info, warn};
use tokio::sync::watch;

pub fn run(env: &str, samples: usize, interval_ms: u64, output: Option<&str>) {
    let environment = super::split_list(env);
    for name in &environment {
        if Metric::parse(name).is_none() {
            warn!("ignoring unknown metric {name:?}");
        }
    }
    let request = CaptureRequest {
        environment,
        ..CaptureRequest::default()
    };
    if request.requested_metrics().is_empty() {
        eprintln!("No known metrics in --env (expected CPU, RAM, GPU, DISK, NETWORK).");
        std::process::exit(1);
    }

    let config = super::sampler_config(samples, interval_ms);
    let sampler = TimeSeriesSampler::new(Arc::new(ProcMetrics::new()), config);
    info!(
        "sampling {} for ~{:.1}s (Ctrl-C to stop)",
        request
            .requested_metrics()
            .iter()
            .map(|m| m.name())
            .collect::<Vec<_>>()
            .join(","),
        config.window().as_secs_f64()
    );

    let rt = super::runtime();
    let result = rt.block_on(async {
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(true);
            }
        });
        sampler.build(&request, &mut rx).await
    });

    let series = match result {
        Ok(series) => series,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(130);
        }
    };
    let json = match serde_json::to_string_pretty(&series) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Failed to encode time series: {e}");
            std::process::exit(1);
        }
    };

    match output {
        Some(path) => match std::fs::write(path, json) {
            Ok(()) => println!("Time series written to {path}"),
            Err(e) => {
                eprintln!("Failed to write {path}: {e}");
                std::process::exit(1);
            }
        },
        None => println!("{json}"),
    }
}
