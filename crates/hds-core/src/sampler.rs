//! Fixed-window telemetry sampling for a capture request.
//!
//! `build` runs `sample_count` rounds, one per `interval`, and takes one
//! reading per requested metric each round. Disk and network are reported as
//! rates: each round's cumulative counter minus the previous round's (the
//! first round compares against a baseline read before the loop), divided by
//! the interval. A failed read records zero for that round and leaves the
//! rate baseline unchanged.
//!
//! Sample timestamps are `start + i * interval`, so every sequence is
//! strictly increasing and evenly spaced regardless of scheduler jitter.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::debug;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::error::SampleCancelled;
use crate::fault::{CaptureRequest, FaultTimeSeries, Metric, TimedValue};
use crate::metrics::MetricsProvider;

/// Default rounds per capture.
pub const DEFAULT_SAMPLE_COUNT: usize = 30;
/// Default spacing between rounds.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Sampling window shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerConfig {
    pub sample_count: usize,
    pub interval: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            sample_count: DEFAULT_SAMPLE_COUNT,
            interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }
}

impl SamplerConfig {
    /// Nominal wall time of one capture.
    pub fn window(&self) -> Duration {
        self.interval
            .saturating_mul(self.sample_count.saturating_sub(1) as u32)
    }
}

/// Builds a [`FaultTimeSeries`] from live readings.
#[derive(Clone)]
pub struct TimeSeriesSampler {
    provider: Arc<dyn MetricsProvider>,
    config: SamplerConfig,
}

impl TimeSeriesSampler {
    pub fn new(provider: Arc<dyn MetricsProvider>, config: SamplerConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> SamplerConfig {
        self.config
    }

    /// Sample the metrics named in `request.environment`.
    ///
    /// Suspends for the whole window. Returns early with [`SampleCancelled`]
    /// once `shutdown` reads `true`.
    pub async fn build(
        &self,
        request: &CaptureRequest,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<FaultTimeSeries, SampleCancelled> {
        let metrics = request.requested_metrics();
        let mut series = FaultTimeSeries::default();
        let requested = self.config.sample_count;
        if metrics.is_empty() || requested == 0 {
            return Ok(series);
        }

        // A failed baseline read leaves the slot empty until the first
        // successful reading.
        let mut previous: Vec<(Metric, Option<f64>)> = metrics
            .iter()
            .filter(|m| m.is_cumulative())
            .map(|m| (*m, self.provider.read(*m).ok()))
            .collect();

        let interval_secs = self.config.interval.as_secs_f64();
        let started = Utc::now();
        let step = chrono::Duration::from_std(self.config.interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(1));
        let mut ticker = tokio::time::interval(self.config.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        for round in 0..requested {
            tokio::select! {
                biased;
                () = wait_for_shutdown(shutdown) => {
                    return Err(SampleCancelled { completed: round, requested });
                }
                _ = ticker.tick() => {}
            }

            let timestamp = started + step * round as i32;
            for metric in &metrics {
                let value = match self.provider.read(*metric) {
                    Ok(reading) if metric.is_cumulative() => {
                        rate(&mut previous, *metric, reading, interval_secs)
                    }
                    Ok(reading) => reading,
                    Err(e) => {
                        debug!("{metric} read failed in round {round}: {e}");
                        0.0
                    }
                };
                series
                    .series_mut(*metric)
                    .push(TimedValue { timestamp, value });
            }
        }
        Ok(series)
    }
}

/// Disk in MB/s, network in KB/s. Zero when there is no baseline yet.
fn rate(
    previous: &mut [(Metric, Option<f64>)],
    metric: Metric,
    reading: f64,
    interval_secs: f64,
) -> f64 {
    let Some((_, slot)) = previous.iter_mut().find(|(m, _)| *m == metric) else {
        return 0.0;
    };
    let Some(baseline) = slot.replace(reading) else {
        return 0.0;
    };
    let delta = (reading - baseline).max(0.0);
    let per_sec = if interval_secs > 0.0 {
        delta / interval_secs
    } else {
        delta
    };
    match metric {
        Metric::Disk => per_sec / 1024.0 / 1024.0,
        _ => per_sec / 1024.0,
    }
}

/// Resolves once the shutdown flag is set. A dropped sender never resolves.
pub(crate) async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
