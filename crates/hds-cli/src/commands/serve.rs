use std::path::{Path, PathBuf};
use std::sync::Arc;

use hds_core::metrics::procfs_available;
use hds_core::{Collector, CollectorConfig, ProcMetrics};
use log::warn;

pub struct ServeCommandConfig<'a> {
    pub host: &'a str,
    pub port: u16,
    pub output_dir: &'a str,
    pub workers: usize,
    pub samples: usize,
    pub interval_ms: u64,
}

pub fn run(cfg: ServeCommandConfig<'_>) {
    let config = CollectorConfig {
        output_dir: PathBuf::from(cfg.output_dir),
        sampler: super::sampler_config(cfg.samples, cfg.interval_ms),
        workers: cfg.workers.max(1),
        ..CollectorConfig::default()
    };
    if !procfs_available(Path::new("/proc")) {
        warn!("/proc not available; CPU, RAM, disk and network will read as zero");
    }

    let base = format!("http://{}:{}", cfg.host, cfg.port);
    println!("HDS Collector v{}", hds_core::VERSION);
    println!("   {base}");
    println!("   packages: {}", config.output_dir.display());
    println!(
        "   sampling: {} samples every {} ms, {} workers",
        config.sampler.sample_count,
        config.sampler.interval.as_millis(),
        config.workers
    );
    println!();
    println!("   Endpoints:");
    println!("     GET    /                                API index");
    println!("     POST   /api/v1/apps/register            Register an application");
    println!("     GET    /api/v1/apps                     Registered applications");
    println!("     POST   /api/v1/faults/report            Report a fault");
    println!("     GET    /api/v1/faults                   Faults, most recent first");
    println!("     DELETE /api/v1/faults                   Clear the registry");
    println!("     GET    /api/v1/faults/app/{{app}}         Faults for one application");
    println!("     GET    /api/v1/faults/{{id}}              Fault detail");
    println!("     GET    /api/v1/faults/package/{{file}}    Download a package");
    println!("     GET    /api/v1/packages                 Package index");
    println!();
    println!("   Example:");
    println!(
        "     curl -X POST {base}/api/v1/faults/report -H 'Content-Type: application/json' \\"
    );
    println!(
        "       -d '{{\"ApplicationName\":\"X\",\"FaultCode\":\"F018\",\"Type\":\"F0\",\"CaptureRequest\":{{\"Environment\":[\"CPU\"]}}}}'"
    );
    println!();

    let collector = Arc::new(Collector::new(config, Arc::new(ProcMetrics::new())));
    let rt = super::runtime();
    if let Err(e) = rt.block_on(hds_server::run_server(collector, cfg.host, cfg.port)) {
        eprintln!("Server error: {e}");
        std::process::exit(1);
    }
}
