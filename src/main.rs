use circuit_guard::probes::{RedisProbe, RedisProbeConfig};
use circuit_guard::{init_logging, CircuitRegistry, GuardConfig, Monitor};
use dotenv::dotenv;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_logging();
    info!("Circuit guard starting up");

    let config = GuardConfig::from_env()?;
    info!(
        failure_threshold = config.circuit.failure_threshold,
        timeout_ms = config.circuit.timeout.as_millis() as u64,
        interval_ms = config.monitor.monitoring_interval.as_millis() as u64,
        "Configuration loaded"
    );

    let registry: CircuitRegistry<String> = CircuitRegistry::new();
    let monitor = Arc::new(Monitor::with_default_rules(config.monitor.clone()));

    if let Some(url) = config.redis_url.as_deref() {
        let redis = registry.register("redis", config.circuit.clone(), None).await?;
        monitor.register_for_monitoring(Arc::clone(&redis))?;

        match RedisProbe::connect(RedisProbeConfig::new(url)).await {
            Ok(probe) => {
                let probe = Arc::new(probe);
                monitor.register_health_check("redis", probe.clone());

                // One protected round trip so the circuit has something to report
                let result = redis
                    .execute(|| {
                        let mut conn = probe.connection();
                        async move { redis::AsyncCommands::ping::<String>(&mut conn).await }
                    })
                    .await;
                info!(success = result.success, state = %result.circuit_state, "Initial Redis call");
            }
            Err(e) => warn!(url, error = %e, "Redis is unreachable, continuing without a probe"),
        }
    } else {
        info!("REDIS_URL not set, no dependency probes configured");
    }

    monitor.start_monitoring()?;
    info!("Monitoring running, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
    }

    monitor.stop_monitoring().await;
    let status = monitor.comprehensive_status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    info!("Circuit guard shut down");
    Ok(())
}
