// src/bin/circuit_sim.rs

use prettytable::{row, Table};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;
use tokio::time::{self, Instant};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use circuit_guard::monitoring::{AlertMetric, AlertRule, AlertSeverity};
use circuit_guard::resilience::StaticFallback;
use circuit_guard::Fallback;
use circuit_guard::{
    CategorizedError, CircuitConfig, CircuitRegistry, Monitor, MonitorConfig, OperationResult,
};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "circuit_sim",
    about = "Drive a simulated flaky dependency through a circuit breaker"
)]
struct Opt {
    /// Failure pattern of the simulated dependency
    #[structopt(short, long, possible_values = &["steady", "outage", "flapping"], default_value = "outage")]
    scenario: String,

    /// Probability that a call fails outside an outage
    #[structopt(short = "p", long, default_value = "0.1")]
    failure_probability: f64,

    /// Number of calls to make
    #[structopt(short = "n", long, default_value = "200")]
    num_requests: usize,

    /// Time between calls in milliseconds
    #[structopt(short = "t", long, default_value = "50")]
    request_interval_ms: u64,

    /// Simulated latency of a healthy call in milliseconds
    #[structopt(long, default_value = "5")]
    latency_ms: u64,

    /// Failures inside the window that trip the circuit
    #[structopt(short = "f", long, default_value = "5")]
    failure_threshold: usize,

    /// Successes in half-open state that close the circuit
    #[structopt(long, default_value = "2")]
    success_threshold: usize,

    /// How long the circuit stays open, in milliseconds
    #[structopt(long, default_value = "1000")]
    open_timeout_ms: u64,

    /// Total attempts per call
    #[structopt(short = "r", long, default_value = "2")]
    max_attempts: usize,

    /// Serve a static value when the dependency is unavailable
    #[structopt(long)]
    fallback: bool,

    /// Monitoring interval in milliseconds
    #[structopt(long, default_value = "500")]
    monitor_interval_ms: u64,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

/// Simulated dependency whose health depends on the scenario and call number
struct FlakyDependency {
    scenario: String,
    failure_probability: f64,
    latency: Duration,
    total_calls: usize,
    calls: AtomicU64,
}

impl FlakyDependency {
    fn is_down(&self, call: usize) -> bool {
        let third = (self.total_calls / 3).max(1);
        match self.scenario.as_str() {
            "outage" => (third..2 * third).contains(&call),
            "flapping" => (call / 20) % 2 == 1,
            _ => false,
        }
    }

    async fn call(&self, call: usize) -> Result<String, CategorizedError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        time::sleep(self.latency).await;

        if self.is_down(call) {
            return Err(CategorizedError::transient("connection refused"));
        }
        if rand::random_bool(self.failure_probability.clamp(0.0, 1.0)) {
            return Err(CategorizedError::transient("server busy"));
        }
        Ok(format!("response #{}", call))
    }
}

#[derive(Debug, Default)]
struct Tally {
    primary: usize,
    fallback: usize,
    failed: usize,
}

impl Tally {
    fn record(&mut self, result: &OperationResult<String>) {
        match (result.success, result.from_fallback) {
            (true, false) => self.primary += 1,
            (true, true) => self.fallback += 1,
            _ => self.failed += 1,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let log_level = if opt.disable_logs {
        "error"
    } else {
        match opt.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "circuit_sim={},circuit_guard={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        stop_handler.store(true, Ordering::SeqCst);
    })?;

    let config = CircuitConfig {
        failure_threshold: opt.failure_threshold,
        success_threshold: opt.success_threshold,
        timeout: Duration::from_millis(opt.open_timeout_ms),
        time_window: Duration::from_secs(10),
        max_retry_attempts: opt.max_attempts,
        base_backoff_delay: Duration::from_millis(10),
        max_backoff_delay: Duration::from_millis(200),
        ..Default::default()
    };

    let registry: CircuitRegistry<String> = CircuitRegistry::new();
    let fallback = opt.fallback.then(|| {
        Arc::new(StaticFallback::new("cached response".to_string())) as Arc<dyn Fallback<String>>
    });
    let circuit = registry.register("simulated", config, fallback).await?;

    let monitor = Arc::new(Monitor::with_default_rules(MonitorConfig {
        monitoring_interval: Duration::from_millis(opt.monitor_interval_ms),
        ..Default::default()
    }));
    monitor.add_rule(
        AlertRule::new(
            "elevated_retries",
            AlertMetric::RetryRate,
            0.2,
            AlertSeverity::Info,
        )
        .repeat_every(Duration::from_secs(5)),
    );
    monitor.register_for_monitoring(Arc::clone(&circuit))?;
    monitor.start_monitoring()?;

    let dependency = FlakyDependency {
        scenario: opt.scenario.clone(),
        failure_probability: opt.failure_probability,
        latency: Duration::from_millis(opt.latency_ms),
        total_calls: opt.num_requests,
        calls: AtomicU64::new(0),
    };

    info!(
        scenario = %opt.scenario,
        requests = opt.num_requests,
        "Starting simulation"
    );

    let interval = Duration::from_millis(opt.request_interval_ms);
    let started = Instant::now();
    let mut tally = Tally::default();
    let mut issued = 0;

    for i in 0..opt.num_requests {
        if stop.load(Ordering::SeqCst) {
            warn!("Interrupted, stopping early");
            break;
        }

        let request_time = Instant::now();
        let result = circuit.execute(|| dependency.call(i)).await;
        tally.record(&result);
        issued += 1;

        if !opt.disable_logs && i % 25 == 0 {
            info!(
                call = i,
                state = %result.circuit_state,
                success = result.success,
                "Progress"
            );
        }

        let elapsed = request_time.elapsed();
        if elapsed < interval {
            time::sleep(interval - elapsed).await;
        }
    }

    monitor.stop_monitoring().await;
    let final_alerts = monitor.evaluate_now().await;
    let status = monitor.comprehensive_status().await;
    let metrics = circuit.metrics();

    println!("\nSimulation Results ({}):", opt.scenario);
    println!("-----------------------------------");

    let mut summary = Table::new();
    summary.add_row(row!["Calls issued", issued]);
    summary.add_row(row![
        "Dependency invocations",
        dependency.calls.load(Ordering::Relaxed)
    ]);
    summary.add_row(row!["Served by dependency", tally.primary]);
    summary.add_row(row!["Served by fallback", tally.fallback]);
    summary.add_row(row!["Failed", tally.failed]);
    summary.add_row(row!["Rejected by circuit", metrics.rejected_requests]);
    summary.add_row(row!["Retries", metrics.total_retries]);
    summary.add_row(row!["Circuit opens", metrics.circuit_opens]);
    summary.add_row(row!["Circuit closes", metrics.circuit_closes]);
    summary.add_row(row![
        "Failure rate",
        format!("{:.1}%", metrics.failure_rate() * 100.0)
    ]);
    summary.add_row(row![
        "p95 latency",
        format!("{:.1} ms", metrics.p95_response_time_ms)
    ]);
    summary.add_row(row!["Final state", circuit.state().await]);
    summary.add_row(row!["Elapsed", format!("{:?}", started.elapsed())]);
    summary.printstd();

    let alerts = monitor.alert_history();
    if alerts.is_empty() {
        println!("\nNo alerts fired.");
    } else {
        println!("\nAlerts ({} fired at shutdown):", final_alerts.len());
        let mut table = Table::new();
        table.add_row(row!["Time", "Rule", "Severity", "Message"]);
        for alert in alerts {
            table.add_row(row![
                alert.timestamp.format("%H:%M:%S%.3f"),
                alert.rule_name,
                alert.severity,
                alert.message
            ]);
        }
        table.printstd();
    }

    println!("\nOverall health: {:?}", status.overall_health);
    Ok(())
}
