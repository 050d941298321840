// src/bin/circuit_bench.rs

use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::sync::{Barrier, Semaphore};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use circuit_guard::resilience::StaticFallback;
use circuit_guard::{CategorizedError, CircuitBreaker, CircuitConfig};

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "circuit_bench",
    about = "A throughput benchmark for protected calls"
)]
struct Opt {
    /// Number of concurrent callers
    #[structopt(short = "u", long, default_value = "10")]
    num_callers: usize,

    /// Number of calls per caller
    #[structopt(short = "r", long, default_value = "1000")]
    requests_per_caller: usize,

    /// Number of iterations to run
    #[structopt(short, long, default_value = "3")]
    iterations: usize,

    /// Maximum number of calls in flight
    #[structopt(short = "c", long, default_value = "100")]
    concurrency: usize,

    /// Probability that the protected operation fails
    #[structopt(short = "p", long, default_value = "0.0")]
    failure_probability: f64,

    /// Failures inside the window that trip the circuit
    #[structopt(short = "f", long, default_value = "50")]
    failure_threshold: usize,

    /// Serve a static value when the operation fails or the circuit is open
    #[structopt(long)]
    fallback: bool,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct CallerTally {
    succeeded: usize,
    degraded: usize,
    failed: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let log_level = if opt.disable_logs {
        "error"
    } else {
        match opt.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "circuit_bench={},circuit_guard={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let config = CircuitConfig {
        failure_threshold: opt.failure_threshold,
        max_retry_attempts: 1,
        timeout: Duration::from_millis(100),
        jitter: false,
        ..Default::default()
    };
    config.validate()?;

    let mut breaker = CircuitBreaker::new("bench", config);
    if opt.fallback {
        breaker = breaker.with_fallback(Arc::new(StaticFallback::new(0u64)));
    }

    let name = if opt.fallback {
        "execute (with fallback)"
    } else {
        "execute"
    };
    run_benchmark(Arc::new(breaker), name, opt).await
}

async fn run_benchmark(
    breaker: Arc<CircuitBreaker<u64>>,
    name: &str,
    opt: Opt,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("\nRunning benchmark: {}", name);
    println!("======================={}", "=".repeat(name.len()));

    let calls_per_iteration = (opt.num_callers * opt.requests_per_caller) as u64;
    let mut total_duration = Duration::from_secs(0);
    let mut totals = CallerTally::default();

    for iteration in 0..opt.iterations {
        info!("Starting iteration {} of {}", iteration + 1, opt.iterations);
        breaker.reset().await;

        let progress = ProgressBar::new(calls_per_iteration);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({per_sec})")?
                .progress_chars("#>-"),
        );
        if opt.disable_logs {
            progress.set_draw_target(indicatif::ProgressDrawTarget::hidden());
        }

        let start_time = Instant::now();
        let barrier = Arc::new(Barrier::new(opt.num_callers));
        let semaphore = Arc::new(Semaphore::new(opt.concurrency.max(1)));
        let mut handles = Vec::with_capacity(opt.num_callers);

        for _ in 0..opt.num_callers {
            let breaker = Arc::clone(&breaker);
            let barrier = Arc::clone(&barrier);
            let semaphore = Arc::clone(&semaphore);
            let progress = progress.clone();
            let requests = opt.requests_per_caller;
            let failure_probability = opt.failure_probability.clamp(0.0, 1.0);

            handles.push(tokio::spawn(async move {
                // Start every caller at once
                barrier.wait().await;
                let mut tally = CallerTally::default();

                for call in 0..requests {
                    let Ok(_permit) = semaphore.acquire().await else {
                        break;
                    };

                    let result = breaker
                        .execute(|| async move {
                            if failure_probability > 0.0 && rand::random_bool(failure_probability) {
                                Err(CategorizedError::transient("simulated failure"))
                            } else {
                                Ok(call as u64)
                            }
                        })
                        .await;

                    match (result.success, result.from_fallback) {
                        (true, false) => tally.succeeded += 1,
                        (true, true) => tally.degraded += 1,
                        _ => tally.failed += 1,
                    }
                    progress.inc(1);
                }

                tally
            }));
        }

        let results = join_all(handles).await;
        progress.finish_and_clear();

        let mut iteration_tally = CallerTally::default();
        for result in results {
            match result {
                Ok(tally) => {
                    iteration_tally.succeeded += tally.succeeded;
                    iteration_tally.degraded += tally.degraded;
                    iteration_tally.failed += tally.failed;
                }
                Err(e) => warn!("Caller task failed: {}", e),
            }
        }

        let elapsed = start_time.elapsed();
        total_duration += elapsed;
        totals.succeeded += iteration_tally.succeeded;
        totals.degraded += iteration_tally.degraded;
        totals.failed += iteration_tally.failed;

        let total_calls =
            iteration_tally.succeeded + iteration_tally.degraded + iteration_tally.failed;
        let metrics = breaker.metrics();
        println!(
            "Iteration {}: {:?}, {} ok, {} fallback, {} failed, {} opens, {:.2} calls/sec",
            iteration + 1,
            elapsed,
            iteration_tally.succeeded,
            iteration_tally.degraded,
            iteration_tally.failed,
            metrics.circuit_opens,
            total_calls as f64 / elapsed.as_secs_f64()
        );
    }

    let iterations = opt.iterations.max(1);
    let avg_duration = total_duration / iterations as u32;
    let total_calls = (totals.succeeded + totals.degraded + totals.failed).max(1);
    let percent = |n: usize| 100.0 * n as f64 / total_calls as f64;

    println!("\nBenchmark Results for {}:", name);
    println!("  Total Calls:        {}", total_calls);
    println!(
        "  Succeeded:          {} ({:.1}%)",
        totals.succeeded,
        percent(totals.succeeded)
    );
    println!(
        "  Fallback:           {} ({:.1}%)",
        totals.degraded,
        percent(totals.degraded)
    );
    println!(
        "  Failed:             {} ({:.1}%)",
        totals.failed,
        percent(totals.failed)
    );
    println!("  Avg. Duration:      {:?}", avg_duration);
    println!(
        "  Avg. Throughput:    {:.2} calls/second",
        total_calls as f64 / total_duration.as_secs_f64().max(f64::EPSILON)
    );

    Ok(())
}
