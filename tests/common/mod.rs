//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::time::Duration;

use etcd_live_config::config::{MapEnv, Settings};
use etcd_live_config::schema::{CoercionTable, KeyMapping, Rule, Schema};
use etcd_live_config::store::MemoryStore;
use etcd_live_config::LiveConfig;

pub const ENDPOINT: &str = "http://127.0.0.1:2379";

/// Settings pointing at an (in-memory) remote store.
pub fn remote_settings() -> Settings {
    let mut settings = Settings::default();
    settings.store.endpoint = Some(ENDPOINT.into());
    settings
}

/// `/A/Port` (int, default 5432, 1024..=65535), `/A/Debug` (bool), `/A/Name` (text).
pub fn app_schema() -> Schema {
    let mapping = KeyMapping::builder("/A")
        .key("Port", "port")
        .key("Debug", "debug")
        .key("Name", "name")
        .env("port", "APP_PORT")
        .env("debug", "APP_DEBUG")
        .env("name", "APP_NAME")
        .build()
        .unwrap();
    let table = CoercionTable::new()
        .with("port", Rule::int_in(5432, 1024, 65535))
        .with("debug", Rule::bool());
    Schema::new(mapping, table)
}

pub fn live_config(store: &MemoryStore, settings: Settings, schema: Schema) -> LiveConfig {
    LiveConfig::builder()
        .settings(settings)
        .schema(schema)
        .store(store.clone())
        .env(MapEnv::new())
        .build()
        .unwrap()
}

/// Let spawned tasks (watch delivery, liveness checks) run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Advance paused time, then let woken tasks run.
pub async fn advance(by: Duration) {
    tokio::time::advance(by).await;
    settle().await;
}

/// Poll `check` until it holds, yielding between attempts.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
