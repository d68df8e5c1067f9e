//! Trigger runtime tests against the in-memory store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use store_core::{MemoryStore, Store};
use tokio::sync::mpsc;
use trigger_bus::{
    Error, RuntimeConfig, ScheduledJob, TriggerEvent, TriggerHandler, TriggerKind, TriggerRuntime,
};

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<TriggerEvent>>,
}

#[async_trait]
impl TriggerHandler for Recorder {
    async fn handle(&self, event: TriggerEvent) -> anyhow::Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

struct Failing;

#[async_trait]
impl TriggerHandler for Failing {
    async fn handle(&self, _event: TriggerEvent) -> anyhow::Result<()> {
        anyhow::bail!("collaborator unavailable")
    }
}

struct Slow;

#[async_trait]
impl TriggerHandler for Slow {
    async fn handle(&self, _event: TriggerEvent) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

struct Forwarder(mpsc::UnboundedSender<TriggerEvent>);

#[async_trait]
impl TriggerHandler for Forwarder {
    async fn handle(&self, event: TriggerEvent) -> anyhow::Result<()> {
        self.0.send(event)?;
        Ok(())
    }
}

struct Ticker(mpsc::UnboundedSender<DateTime<Utc>>);

#[async_trait]
impl ScheduledJob for Ticker {
    async fn run(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        self.0.send(now)?;
        Ok(())
    }
}

#[tokio::test]
async fn test_field_trigger_fires_only_on_field_change() {
    let store = MemoryStore::new();
    let mut changes = store.subscribe();
    let recorder = Arc::new(Recorder::default());

    let mut runtime = TriggerRuntime::default();
    runtime
        .register("ride_otps/{rideId}/attempts", TriggerKind::OnWrite, recorder.clone())
        .unwrap();

    store
        .set("ride_otps/r1", json!({"hash": "h", "attempts": 0}))
        .await
        .unwrap();
    store.set("ride_otps/r1/used", json!(true)).await.unwrap();
    store.set("ride_otps/r1/attempts", json!(1)).await.unwrap();

    for _ in 0..3 {
        let change = changes.recv().await.unwrap();
        for outcome in runtime.dispatch(&change).await {
            outcome.unwrap();
        }
    }

    let events = recorder.events.lock();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].after, Some(json!(0)));
    assert_eq!(events[1].before, Some(json!(0)));
    assert_eq!(events[1].after, Some(json!(1)));
    assert_eq!(events[1].param("rideId"), Some("r1"));
    assert_eq!(events[1].path, "ride_otps/r1/attempts");
}

#[tokio::test]
async fn test_update_trigger_ignores_create_and_delete() {
    let store = MemoryStore::new();
    let mut changes = store.subscribe();
    let recorder = Arc::new(Recorder::default());

    let mut runtime = TriggerRuntime::default();
    runtime
        .register("rides/{rideId}", TriggerKind::OnUpdate, recorder.clone())
        .unwrap();

    store.set("rides/r1", json!({"status": "searching"})).await.unwrap();
    store.set("rides/r1/status", json!("cancelled")).await.unwrap();
    store.remove("rides/r1").await.unwrap();

    for _ in 0..3 {
        let change = changes.recv().await.unwrap();
        runtime.dispatch(&change).await;
    }

    let events = recorder.events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].before, Some(json!({"status": "searching"})));
    assert_eq!(events[0].after, Some(json!({"status": "cancelled"})));
}

#[tokio::test]
async fn test_handler_failure_is_reported_not_propagated() {
    let store = MemoryStore::new();
    let mut changes = store.subscribe();
    let recorder = Arc::new(Recorder::default());

    let mut runtime = TriggerRuntime::default();
    runtime
        .register("users/{uid}/deviceIds", TriggerKind::OnWrite, Arc::new(Failing))
        .unwrap()
        .register("users/{uid}/deviceIds", TriggerKind::OnWrite, recorder.clone())
        .unwrap();

    store.set("users/u1/deviceIds", json!({"d1": true})).await.unwrap();
    let change = changes.recv().await.unwrap();
    let outcomes = runtime.dispatch(&change).await;

    assert_eq!(outcomes.len(), 2);
    assert!(matches!(outcomes[0], Err(Error::Handler { .. })));
    assert!(outcomes[1].is_ok());
    assert_eq!(recorder.events.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_handler_timeout() {
    let store = MemoryStore::new();
    let mut changes = store.subscribe();

    let mut runtime = TriggerRuntime::new(RuntimeConfig {
        handler_timeout_ms: 50,
    });
    runtime
        .register("locations/{uid}", TriggerKind::OnWrite, Arc::new(Slow))
        .unwrap();

    store.set("locations/u1", json!({"lat": 1.0, "lng": 2.0})).await.unwrap();
    let change = changes.recv().await.unwrap();
    let outcomes = runtime.dispatch(&change).await;

    assert!(matches!(outcomes[0], Err(Error::HandlerTimeout { .. })));
}

#[tokio::test]
async fn test_run_spawns_handlers_from_feed() {
    let store = MemoryStore::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut runtime = TriggerRuntime::default();
    runtime
        .register("locations/{uid}", TriggerKind::OnWrite, Arc::new(Forwarder(tx)))
        .unwrap();
    let handle = Arc::new(runtime).run(store.subscribe());

    store.set("locations/u7", json!({"lat": 1.0, "lng": 2.0})).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.param("uid"), Some("u7"));

    drop(store);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_job_runs_on_interval() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = TriggerRuntime::schedule("tick", Duration::from_secs(60), Arc::new(Ticker(tx)));

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(rx.recv().await.is_some());

    handle.abort();
}
