use chrono::{TimeZone, Utc};
use sourcegate::{
    ConfigError, CoordinatorBuilder, ExceededReason, HealthStatus, KnownSource, MockClock,
    RateLimitConfig, RateLimitCoordinator, RateLimitRegistry, SharedCoordinator,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn mock_coordinator(registry: RateLimitRegistry) -> (SharedCoordinator, MockClock) {
    let clock = MockClock::new();
    let coordinator = CoordinatorBuilder::new()
        .registry(registry)
        .clock(Arc::new(clock.clone()))
        .build();
    (Arc::new(coordinator), clock)
}

#[test]
fn test_arxiv_burst_does_not_block_openalex() {
    let (coordinator, _) = mock_coordinator(RateLimitRegistry::default());

    for _ in 0..4 {
        assert!(coordinator.consume(KnownSource::Arxiv.as_str()));
    }
    assert!(!coordinator.can_proceed("arxiv"));
    assert!(!coordinator.consume("arxiv"));

    assert!(coordinator.get_status("openalex").bucket.capacity >= 20);
    assert!(coordinator.consume("openalex"));
}

#[test]
fn test_every_known_source_admits_exactly_its_capacity() {
    let registry = RateLimitRegistry::default().with_global(RateLimitConfig::per_minute(100_000));

    for source in KnownSource::ALL {
        let (coordinator, _) = mock_coordinator(registry.clone());
        let capacity = source.rate_limit().capacity();

        let admitted = (0..capacity + 5)
            .filter(|_| coordinator.consume(source.as_str()))
            .count() as u64;

        assert_eq!(admitted, capacity, "{}", source);
        assert_eq!(coordinator.daily_count(source.as_str()), capacity);
    }
}

#[test]
fn test_sustained_traffic_tracks_refill_rate() {
    let (coordinator, clock) = mock_coordinator(RateLimitRegistry::default());

    // drain the burst, then hammer pubmed every 250ms for two minutes
    while coordinator.consume("pubmed") {}
    let mut admitted = 0;
    for _ in 0..(2 * 60 * 4) {
        clock.advance_ms(250);
        if coordinator.consume("pubmed") {
            admitted += 1;
        }
    }

    // 12/min sustained
    assert_eq!(admitted, 24);
    let stats = coordinator.get_stats();
    assert_eq!(stats.by_source["pubmed"].requests, 15 + 24);
}

#[test]
fn test_daily_quota_resets_at_utc_midnight() {
    let clock = MockClock::starting_at(Utc.with_ymd_and_hms(2024, 12, 13, 23, 0, 0).unwrap());
    let coordinator = CoordinatorBuilder::new()
        .clock(Arc::new(clock.clone()))
        .source_limit("lens", RateLimitConfig::per_minute(10).with_daily_limit(3))
        .build();

    let mut admitted_today = 0;
    for _ in 0..10 {
        clock.advance_ms(6_000);
        if coordinator.consume("lens") {
            admitted_today += 1;
        }
    }
    assert_eq!(admitted_today, 3);
    assert_eq!(coordinator.get_status("lens").daily_remaining(), Some(0));

    clock.advance(Duration::from_secs(60 * 60));
    let status = coordinator.get_status("lens");
    assert!(status.can_proceed);
    assert_eq!(status.daily_count, 0);
    assert!(coordinator.consume("lens"));
}

#[test]
fn test_status_and_stats_are_read_only() {
    let (coordinator, _) = mock_coordinator(RateLimitRegistry::default());
    coordinator.consume("eia");

    let first = coordinator.get_status("eia");
    for _ in 0..10 {
        coordinator.get_status("eia");
        coordinator.get_stats();
        coordinator.can_proceed("eia");
        coordinator.get_wait_time("eia");
    }
    let second = coordinator.get_status("eia");

    assert_eq!(first, second);
    assert_eq!(coordinator.get_stats().total_requests, 1);
}

#[test]
fn test_health_degrades_under_throttling() {
    let (coordinator, _) = mock_coordinator(RateLimitRegistry::default());
    assert_eq!(coordinator.get_stats().health_status(), HealthStatus::Healthy);

    for _ in 0..10 {
        coordinator.consume("arxiv");
    }

    let stats = coordinator.get_stats();
    assert_eq!(stats.health_status(), HealthStatus::Critical);
    assert_eq!(stats.most_throttled_source().map(|(name, _)| name), Some("arxiv"));
    println!("{}", stats);
}

#[test]
fn test_stats_serialize_for_dashboards() {
    let (coordinator, _) = mock_coordinator(RateLimitRegistry::default());
    coordinator.consume("crossref");

    let json = serde_json::to_value(coordinator.get_stats()).unwrap();
    assert_eq!(json["total_requests"], 1);
    assert_eq!(json["by_source"]["crossref"]["requests"], 1);
    assert_eq!(json["global"]["capacity"], 110);

    let status = serde_json::to_value(coordinator.get_status("crossref")).unwrap();
    assert_eq!(status["config"]["requests_per_minute"], 50);
    assert_eq!(status["daily_count"], 1);
}

#[test]
fn test_registry_from_yaml_file() {
    let path = std::env::temp_dir().join(format!("sourcegate-limits-{}.yaml", std::process::id()));
    std::fs::write(
        &path,
        "global:\n  requests_per_minute: 20\n  burst_size: 0\nsources:\n  arxiv:\n    requests_per_minute: 1\n    burst_size: 0\n",
    )
    .unwrap();

    let registry = RateLimitRegistry::from_yaml_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    let (coordinator, _) = mock_coordinator(registry);
    assert!(coordinator.consume("arxiv"));
    assert!(!coordinator.consume("arxiv"));
    assert_eq!(coordinator.get_stats().global.capacity, 20);
    // untouched entries keep their built-in limits
    assert_eq!(coordinator.get_status("pubmed").bucket.capacity, 15);
}

#[test]
fn test_registry_from_missing_file() {
    let err = RateLimitRegistry::from_yaml_file("/nonexistent/sourcegate.yaml").unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_concurrent_adapters_never_oversell_global_budget() {
    let registry = RateLimitRegistry::default()
        .with_global(RateLimitConfig::per_minute(100).with_daily_limit(1_000));
    let (coordinator, _) = mock_coordinator(registry);
    let mut handles = vec![];

    for source in ["openalex", "crossref", "eia", "patentsview", "ember", "nrel"] {
        for _ in 0..4 {
            let coordinator = coordinator.clone();
            handles.push(thread::spawn(move || {
                (0..50).filter(|_| coordinator.consume(source)).count() as u64
            }));
        }
    }

    let admitted: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(admitted, 100);
    assert_eq!(coordinator.global_daily_count(), 100);

    let stats = coordinator.get_stats();
    assert_eq!(stats.total_requests, 24 * 50);
    assert_eq!(stats.throttled_requests, 24 * 50 - 100);
    assert_eq!(stats.global.available, 0);
}

#[tokio::test(start_paused = true)]
async fn test_depleted_source_fails_fast_under_small_bound() {
    let coordinator = RateLimitCoordinator::new();
    while coordinator.consume("pubmed") {}

    let started = tokio::time::Instant::now();
    let calls = AtomicUsize::new(0);
    let result = coordinator
        .execute_with_rate_limit(
            "pubmed",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
            },
            50,
        )
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.reason, ExceededReason::WaitTooLong { wait_ms: 5_000 });
    assert_eq!(err.retry_after_ms(), Some(5_000));
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_adapters_queue_behind_arxiv_limit() {
    let coordinator: SharedCoordinator = Arc::new(RateLimitCoordinator::new());
    let mut handles = vec![];

    // six sequential fetches from one adapter: four burst, then one per 20s
    let adapter = coordinator.clone();
    handles.push(tokio::spawn(async move {
        let mut done = 0;
        for page in 0..6 {
            let fetched = adapter
                .execute_with_rate_limit("arxiv", || async move { page }, 25_000)
                .await;
            if fetched.is_ok() {
                done += 1;
            }
        }
        done
    }));

    let started = tokio::time::Instant::now();
    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }

    assert_eq!(total, 6);
    assert!(started.elapsed() >= Duration::from_secs(40));
    assert_eq!(coordinator.get_stats().throttled_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_housekeeping_shuts_down_cleanly() {
    let coordinator: SharedCoordinator = Arc::new(RateLimitCoordinator::new());
    let shutdown = CancellationToken::new();
    let handle = coordinator
        .clone()
        .spawn_housekeeping(Duration::from_secs(30 * 60), shutdown.clone());

    coordinator.consume("iea");
    tokio::time::sleep(Duration::from_secs(2 * 60 * 60)).await;

    shutdown.cancel();
    handle.await.unwrap();
    assert_eq!(coordinator.daily_count("iea"), 1);
}
