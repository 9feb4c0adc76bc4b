//! Concurrent load test against `/generate`.

use std::fmt;
use std::time::Instant;

use futures::future::join_all;
use tracing::warn;

use crate::v1::{ApiClient, GenerateRequest};

/// `(total requests, concurrent requests)` run when none are given.
pub const DEFAULT_PLANS: [BenchPlan; 3] = [
    BenchPlan { total: 5, concurrency: 1 },
    BenchPlan { total: 10, concurrency: 2 },
    BenchPlan { total: 10, concurrency: 5 },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchPlan {
    pub total: usize,
    pub concurrency: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub elapsed_ms: f64,
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Latency {
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BenchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// `None` when every request failed.
    pub latency: Option<Latency>,
}

fn bench_request(id: usize) -> GenerateRequest {
    GenerateRequest::new(format!("Generate a short response for request {id}"))
        .with_max_tokens(50)
        .with_temperature(0.7)
}

async fn send_one(client: &ApiClient, id: usize) -> Sample {
    let started = Instant::now();
    let result = client.generate(&bench_request(id)).await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    if let Err(e) = &result {
        warn!("Request {id} failed: {e}");
    }
    Sample {
        elapsed_ms,
        success: result.is_ok(),
    }
}

/// Sends `plan.total` requests in batches of `plan.concurrency`, calling
/// `on_progress(completed, total)` after each batch.
pub async fn run(
    client: &ApiClient,
    plan: BenchPlan,
    mut on_progress: impl FnMut(usize, usize),
) -> Vec<Sample> {
    let concurrency = plan.concurrency.max(1);
    let mut samples = Vec::with_capacity(plan.total);

    let mut start = 0;
    while start < plan.total {
        let batch = concurrency.min(plan.total - start);
        let results = join_all((start..start + batch).map(|id| send_one(client, id))).await;
        samples.extend(results);

        start += batch;
        on_progress(start, plan.total);
    }

    samples
}

pub fn summarize(samples: &[Sample]) -> BenchSummary {
    let mut times: Vec<f64> = samples
        .iter()
        .filter(|s| s.success)
        .map(|s| s.elapsed_ms)
        .collect();
    times.sort_by(|a, b| a.total_cmp(b));

    let successful = times.len();
    let latency = (!times.is_empty()).then(|| {
        let n = times.len();
        let at = |q: f64| times[((n as f64 * q) as usize).min(n - 1)];
        Latency {
            average: times.iter().sum::<f64>() / n as f64,
            min: times[0],
            max: times[n - 1],
            p50: times[n / 2],
            p95: at(0.95),
            p99: at(0.99),
        }
    });

    BenchSummary {
        total: samples.len(),
        successful,
        failed: samples.len() - successful,
        latency,
    }
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

impl fmt::Display for BenchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(l) = &self.latency else {
            return writeln!(f, "All requests failed!");
        };

        let rule = "=".repeat(60);
        writeln!(f, "{rule}")?;
        writeln!(f, "Results:")?;
        writeln!(f, "{rule}")?;
        writeln!(f, "Total Requests:     {}", self.total)?;
        writeln!(
            f,
            "Successful:         {} ({:.1}%)",
            self.successful,
            percent(self.successful, self.total)
        )?;
        writeln!(
            f,
            "Failed:             {} ({:.1}%)",
            self.failed,
            percent(self.failed, self.total)
        )?;
        writeln!(f)?;
        writeln!(f, "Response Times (ms):")?;
        writeln!(f, "  Average:          {:.2}", l.average)?;
        writeln!(f, "  Min:              {:.2}", l.min)?;
        writeln!(f, "  Max:              {:.2}", l.max)?;
        writeln!(f, "  Median (P50):     {:.2}", l.p50)?;
        writeln!(f, "  P95:              {:.2}", l.p95)?;
        writeln!(f, "  P99:              {:.2}", l.p99)?;
        writeln!(f, "{rule}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(times: &[(f64, bool)]) -> Vec<Sample> {
        times
            .iter()
            .map(|&(elapsed_ms, success)| Sample {
                elapsed_ms,
                success,
            })
            .collect()
    }

    #[test]
    fn percentiles_index_into_sorted_successes() {
        let data: Vec<(f64, bool)> = (1..=20).rev().map(|i| (i as f64 * 10.0, true)).collect();
        let summary = summarize(&samples(&data));

        let l = summary.latency.unwrap();
        assert_eq!(summary.successful, 20);
        assert_eq!(l.min, 10.0);
        assert_eq!(l.max, 200.0);
        assert_eq!(l.p50, 110.0); // sorted[10]
        assert_eq!(l.p95, 200.0); // sorted[19]
        assert_eq!(l.p99, 200.0); // sorted[19]
        assert!((l.average - 105.0).abs() < 1e-9);
    }

    #[test]
    fn failures_are_excluded_from_latency() {
        let summary = summarize(&samples(&[(5.0, false), (40.0, true), (20.0, true)]));
        assert_eq!(summary.total, 3);
        assert_eq!(summary.failed, 1);
        let l = summary.latency.unwrap();
        assert_eq!(l.min, 20.0);
        assert_eq!(l.p50, 40.0);
    }

    #[test]
    fn all_failed_has_no_latency() {
        let summary = summarize(&samples(&[(5.0, false), (7.0, false)]));
        assert!(summary.latency.is_none());
        assert_eq!(summary.to_string(), "All requests failed!\n");
    }

    #[test]
    fn report_lists_percentages() {
        let summary = summarize(&samples(&[(10.0, true), (30.0, false)]));
        let text = summary.to_string();
        assert!(text.contains("Successful:         1 (50.0%)"));
        assert!(text.contains("Median (P50):     10.00"));
    }
}
