//! Basic usage example for the sourcegate crate.
//!
//! Run with `RUST_LOG=sourcegate=debug cargo run --example basic` to see
//! the throttling decisions.

use sourcegate::{
    CoordinatorBuilder, KnownSource, RateLimitConfig, RateLimitCoordinator, RateLimitRegistry,
    SharedCoordinator, HOUSEKEEPING_INTERVAL,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Coordinated Rate Limiting Example ===\n");

    // Example 1: Per-source isolation
    isolation_example();

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 2: Custom limits
    custom_limits_example();

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 3: Waiting for capacity
    admission_example().await;

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 4: Monitoring
    monitoring_example();
}

fn isolation_example() {
    println!("1. Per-Source Isolation:");

    let coordinator = RateLimitCoordinator::new();
    println!(
        "   arxiv limit: {}",
        coordinator.registry().get_config(KnownSource::Arxiv.as_str())
    );

    for i in 1..=6 {
        if coordinator.consume("arxiv") {
            println!("   arxiv request {} - ✅ Allowed", i);
        } else {
            println!(
                "   arxiv request {} - ❌ Throttled (retry in {}ms)",
                i,
                coordinator.get_wait_time("arxiv")
            );
        }
    }

    let openalex = coordinator.consume("openalex");
    println!(
        "   openalex in the same instant - {}",
        if openalex { "✅ Allowed" } else { "❌ Throttled" }
    );
}

fn custom_limits_example() {
    println!("2. Custom Limits:");

    let yaml = "
global:
  requests_per_minute: 300
  requests_per_day: 50000
  burst_size: 30
sources:
  internal-mirror:
    requests_per_minute: 120
    burst_size: 10
";

    let registry = match RateLimitRegistry::from_yaml_str(yaml) {
        Ok(registry) => registry,
        Err(err) => {
            println!("   ❌ {}", err);
            return;
        }
    };

    let coordinator = CoordinatorBuilder::new()
        .registry(registry)
        .default_limit(RateLimitConfig::per_minute(10).with_burst(2))
        .build();

    println!("   Global: {}", coordinator.registry().global());
    println!("   internal-mirror: {}", coordinator.registry().get_config("internal-mirror"));
    println!("   unlisted: {}", coordinator.registry().get_config("unlisted"));

    let mut burst = 0;
    while coordinator.consume("internal-mirror") {
        burst += 1;
    }
    println!("   internal-mirror burst: {} requests admitted immediately", burst);

    let rejected = CoordinatorBuilder::new()
        .source_limit("broken", RateLimitConfig::per_minute(0))
        .try_build();
    if let Err(err) = rejected {
        println!("   Invalid limits rejected: {}", err);
    }
}

async fn admission_example() {
    println!("3. Waiting for Capacity:");

    let coordinator: SharedCoordinator = Arc::new(
        CoordinatorBuilder::new()
            .source_limit("fast-api", RateLimitConfig::per_minute(120))
            .global_limit(RateLimitConfig::per_minute(1_000))
            .build(),
    );
    while coordinator.consume("fast-api") {}
    println!(
        "   fast-api depleted, next token in {}ms",
        coordinator.get_wait_time("fast-api")
    );

    let shutdown = CancellationToken::new();
    let housekeeping = coordinator
        .clone()
        .spawn_housekeeping(HOUSEKEEPING_INTERVAL, shutdown.clone());

    // Willing to wait one second: succeeds after ~500ms
    match coordinator
        .execute_with_rate_limit("fast-api", || async { "payload" }, 1_000)
        .await
    {
        Ok(body) => println!("   ✅ Waited and fetched {:?}", body),
        Err(err) => println!("   ❌ {}", err),
    }

    // Not willing to wait: fails immediately
    while coordinator.consume("fast-api") {}
    match coordinator
        .execute_with_rate_limit("fast-api", || async { "payload" }, 10)
        .await
    {
        Ok(_) => println!("   ✅ Fetched without waiting"),
        Err(err) => println!(
            "   ❌ {} (retry after {:?}ms)",
            err,
            err.retry_after_ms()
        ),
    }

    shutdown.cancel();
    if let Err(err) = housekeeping.await {
        println!("   housekeeping task failed: {}", err);
    }
}

fn monitoring_example() {
    println!("4. Monitoring:");

    let coordinator = RateLimitCoordinator::new();
    for _ in 0..8 {
        coordinator.consume("arxiv");
    }
    for _ in 0..20 {
        coordinator.consume("openalex");
    }

    let status = coordinator.get_status("arxiv");
    println!(
        "   arxiv: {}/{} tokens, can proceed: {}, today: {}",
        status.bucket.available, status.bucket.capacity, status.can_proceed, status.daily_count
    );

    let stats = coordinator.get_stats();
    println!("{}", stats);

    let health = stats.health_status();
    println!("   - Health status: {:?}", health);
    println!("   - Suggested action: {}", health.suggested_action());
}
