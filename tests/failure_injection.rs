//! Failure injection tests: dead watches, refused connections, expired sessions.

use std::time::Duration;

use etcd_live_config::config::Settings;
use etcd_live_config::store::MemoryStore;
use etcd_live_config::{SupervisorState, Value};

mod common;

const TICK: Duration = Duration::from_secs(300);

fn seeded_store() -> MemoryStore {
    MemoryStore::with_entries([("/A/Port", "9999"), ("/A/Debug", "yes"), ("/A/Name", "svc1")])
}

#[tokio::test(start_paused = true)]
async fn test_silent_watch_restarts_once_per_threshold_crossing() {
    let store = seeded_store();
    let live = common::live_config(&store, common::remote_settings(), common::app_schema());
    live.start().await.unwrap();
    assert_eq!(store.watch_count(), 1);

    // 300s and 600s: not beyond the 600s threshold yet
    common::advance(TICK).await;
    common::advance(TICK).await;
    assert_eq!(store.watch_count(), 1);

    // 900s: stale, one restart on a fresh connection
    common::advance(TICK).await;
    assert_eq!(store.watch_count(), 2);
    assert_eq!(store.connect_count(), 2);
    assert_eq!(live.state(), SupervisorState::Watching);

    // the restart reset the clock; the next two ticks are quiet
    common::advance(TICK).await;
    common::advance(TICK).await;
    assert_eq!(store.watch_count(), 2);

    common::advance(TICK).await;
    assert_eq!(store.watch_count(), 3);

    live.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_events_keep_watch_alive() {
    let store = seeded_store();
    let live = common::live_config(&store, common::remote_settings(), common::app_schema());
    live.start().await.unwrap();

    for _ in 0..6 {
        common::advance(TICK).await;
        store.put("/A/Name", "svc1");
        common::settle().await;
    }
    assert_eq!(store.watch_count(), 1);
    assert_eq!(live.state(), SupervisorState::Watching);

    live.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_restart_retries_on_next_tick() {
    let store = seeded_store();
    let live = common::live_config(&store, common::remote_settings(), common::app_schema());
    live.start().await.unwrap();

    store.set_watch_refused(true);
    common::advance(TICK * 3).await;
    assert_eq!(live.state(), SupervisorState::Stale);
    assert_eq!(store.watch_count(), 1);
    let connects = store.connect_count();

    common::advance(TICK).await;
    assert_eq!(live.state(), SupervisorState::Stale);
    assert_eq!(store.connect_count(), connects + 1);

    store.set_watch_refused(false);
    common::advance(TICK).await;
    assert_eq!(live.state(), SupervisorState::Watching);
    assert_eq!(store.watch_count(), 2);

    // cached values survived the outage
    assert_eq!(live.get("port"), Some(Value::Int(9999)));

    common::advance(TICK).await;
    assert_eq!(store.watch_count(), 2);

    live.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_refused_watch_at_start_is_degraded() {
    let store = seeded_store();
    store.set_watch_refused(true);
    let live = common::live_config(&store, common::remote_settings(), common::app_schema());

    let report = live.start().await.unwrap();
    assert!(report.success);
    assert_eq!(live.state(), SupervisorState::Stale);
    assert_eq!(live.get_all().await.get_str("name"), Some("svc1"));

    store.set_watch_refused(false);
    common::advance(TICK).await;
    assert_eq!(live.state(), SupervisorState::Watching);

    store.put("/A/Name", "svc2");
    common::settle().await;
    assert_eq!(live.get("name"), Some(Value::Text("svc2".into())));

    live.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_ends_liveness_task() {
    let store = seeded_store();
    let live = common::live_config(&store, common::remote_settings(), common::app_schema());
    live.start().await.unwrap();
    live.stop().await;

    common::advance(TICK * 10).await;
    assert_eq!(store.watch_count(), 1);
    assert_eq!(store.connect_count(), 1);
    assert_eq!(live.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn test_expired_session_during_update() {
    let store = seeded_store();
    let live = common::live_config(&store, common::remote_settings(), common::app_schema());
    live.start().await.unwrap();

    store.expire_sessions();
    store.put("/A/Name", "svc2");
    assert!(common::eventually(|| live.get("name") == Some(Value::Text("svc2".into()))).await);
    assert_eq!(store.connect_count(), 2);

    live.stop().await;
}

#[tokio::test]
async fn test_unreachable_store_yields_defaults() {
    let store = seeded_store();
    store.set_connect_refused(true);
    let live = common::live_config(&store, common::remote_settings(), common::app_schema());

    let report = live.start().await.unwrap();
    assert!(!report.success);
    assert_eq!(report.loaded, 0);

    let snapshot = live.get_all().await;
    assert_eq!(snapshot.get_i64("port"), Some(5432));
    assert_eq!(snapshot.get_bool("debug"), Some(false));
    assert_eq!(snapshot.get("name"), Some(&Value::Null));
}

#[tokio::test]
async fn test_missing_endpoint_fails_fast() {
    let store = seeded_store();
    let live = common::live_config(&store, Settings::default(), common::app_schema());

    assert!(live.start().await.is_err());
    assert_eq!(store.connect_count(), 0);
    // nothing ever loaded
    assert!(live.get_all().await.is_empty());
}

#[tokio::test]
async fn test_out_of_range_initial_value_uses_default() {
    let store = MemoryStore::with_entries([("/A/Port", "70000"), ("/A/Debug", "no"), ("/A/Name", "svc1")]);
    let live = common::live_config(&store, common::remote_settings(), common::app_schema());

    let report = live.load_initial().await.unwrap();
    assert_eq!(report.rejected, vec!["port".to_string()]);
    assert_eq!(live.get("port"), Some(Value::Int(5432)));
    assert_eq!(live.get("name"), Some(Value::Text("svc1".into())));
}
