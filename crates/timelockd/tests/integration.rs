//! Integration tests for timelockd
//!
//! Two engines stand in for the foreground and background contexts. They
//! share one SQLite file the way the CLI and the daemon do, and exchange
//! documents over an in-process sync channel.

use chrono::{DateTime, Local, TimeZone};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use timelock_api::{AppMetadata, AppState, ContextRole, PermissionStatus};
use timelock_config::{parse_config, EngineConfig};
use timelock_core::{
    CoreEvent, EventDeduplicator, LocalSyncChannel, PermissionGate, SessionEngine,
    StaticPermissions, SyncOutbox, SyncPublisher,
};
use timelock_store::{KvStore, MemoryStore, SessionStore, SqliteStore};
use timelock_util::{PackageId, RetryPolicy};
use tokio::sync::mpsc;

fn t0() -> DateTime<Local> {
    Local.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
}

fn at(offset: i64) -> DateTime<Local> {
    t0() + chrono::Duration::seconds(offset)
}

fn test_config() -> EngineConfig {
    EngineConfig {
        retry: RetryPolicy::no_retry(),
        ..Default::default()
    }
}

fn engine_on(
    kv: Arc<dyn KvStore>,
    role: ContextRole,
) -> (SessionEngine, mpsc::UnboundedReceiver<timelock_api::SyncPayload>, SyncOutbox) {
    let (outbox, rx) = SyncOutbox::channel();
    let engine = SessionEngine::new(
        test_config(),
        role,
        SessionStore::new(kv),
        PermissionGate::new(Arc::new(StaticPermissions(PermissionStatus::granted()))),
        outbox.clone(),
    );
    (engine, rx, outbox)
}

fn sqlite(path: &Path) -> Arc<dyn KvStore> {
    Arc::new(SqliteStore::open(path).unwrap())
}

fn record_events(engine: &SessionEngine) -> Arc<Mutex<Vec<CoreEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.dispatcher().register(move |e| {
        sink.lock().unwrap().push(e.clone());
        Ok(())
    });
    events
}

fn count_expiries(events: &[CoreEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, CoreEvent::TimeExpired { .. }))
        .count()
}

#[tokio::test]
async fn foreground_changes_reach_background_over_sync_channel() {
    let channel = LocalSyncChannel::new("session-sync", 16);
    let mut incoming = channel.subscribe();

    let (mut foreground, outbox_rx, outbox) =
        engine_on(Arc::new(MemoryStore::new()), ContextRole::Foreground);
    let publisher = SyncPublisher::new(Arc::new(channel.clone()), test_config().retry, &outbox);
    tokio::spawn(publisher.run(outbox_rx));

    let (mut background, _rx, _outbox) =
        engine_on(Arc::new(MemoryStore::new()), ContextRole::Background);

    let id = PackageId::new("com.x");
    foreground.select_app(AppMetadata::new("com.x", "X"), t0()).unwrap();
    foreground.activate(&id, 900, 3600, t0()).unwrap();

    // Coalescing may skip revision 1; revision 2 always arrives
    loop {
        let payload = tokio::time::timeout(Duration::from_secs(2), incoming.recv())
            .await
            .expect("no payload within timeout")
            .unwrap();
        assert_eq!(payload.origin, ContextRole::Foreground);
        background.apply_remote(payload);
        if background.revision() == 2 {
            break;
        }
    }

    let entry = background.document().get(&id).unwrap();
    assert_eq!(entry.state, AppState::Active);
    assert_eq!(entry.cycle_started_at, Some(t0()));
    assert!(background.monitoring_required());
}

#[test]
fn background_expiry_is_adopted_by_foreground() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("timelock.db");

    let (mut foreground, _frx, _fo) = engine_on(sqlite(&db), ContextRole::Foreground);
    let (mut background, _brx, _bo) = engine_on(sqlite(&db), ContextRole::Background);
    let foreground_events = record_events(&foreground);
    let background_events = record_events(&background);

    let id = PackageId::new("com.x");
    foreground.select_app(AppMetadata::new("com.x", "X"), t0()).unwrap();
    foreground.activate(&id, 60, 600, t0()).unwrap();

    background.recover(at(61));
    assert_eq!(background.document().get(&id).unwrap().state, AppState::Locked);
    assert_eq!(count_expiries(&background_events.lock().unwrap()), 1);

    // Foreground re-reads the store and sees the lock already applied
    foreground.tick_all(at(62));
    let entry = foreground.document().get(&id).unwrap();
    assert_eq!(entry.state, AppState::Locked);
    assert_eq!(entry.locked_at, Some(at(60)));
    assert_eq!(entry.remaining_seconds, 598);
    assert_eq!(foreground.revision(), background.revision());
    assert_eq!(count_expiries(&foreground_events.lock().unwrap()), 0);
}

#[test]
fn independent_observations_of_one_expiry_deduplicate() {
    let (mut foreground, _frx, _fo) =
        engine_on(Arc::new(MemoryStore::new()), ContextRole::Foreground);
    let (mut background, _brx, _bo) =
        engine_on(Arc::new(MemoryStore::new()), ContextRole::Background);

    let id = PackageId::new("com.x");
    foreground.select_app(AppMetadata::new("com.x", "X"), t0()).unwrap();
    foreground.activate(&id, 60, 600, t0()).unwrap();
    let payload = timelock_api::SyncPayload::new(
        foreground.document().clone(),
        ContextRole::Foreground,
        t0(),
    );
    assert!(background.apply_remote(payload));

    // Each context observes the expiry at a different moment
    let mut events = foreground.tick_all(at(65));
    events.extend(background.tick_all(at(90)));
    assert_eq!(count_expiries(&events), 2);

    let mut dedup = EventDeduplicator::new(64);
    let delivered = events
        .iter()
        .filter(|e| matches!(e, CoreEvent::TimeExpired { .. }))
        .filter(|e| dedup.first_delivery(e))
        .count();
    assert_eq!(delivered, 1);
}

#[test]
fn restart_resumes_running_cycle_from_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("timelock.db");
    let id = PackageId::new("com.x");

    {
        let (mut engine, _rx, _o) = engine_on(sqlite(&db), ContextRole::Foreground);
        engine.select_app(AppMetadata::new("com.x", "X"), t0()).unwrap();
        engine.activate(&id, 900, 3600, t0()).unwrap();
    }

    let (mut engine, _rx, _o) = engine_on(sqlite(&db), ContextRole::Background);
    let events = engine.recover(at(300));

    let entry = engine.document().get(&id).unwrap();
    assert_eq!(entry.state, AppState::Active);
    assert_eq!(entry.remaining_seconds, 600);
    assert_eq!(count_expiries(&events), 0);
    assert!(events.contains(&CoreEvent::MonitoringRequired));
}

#[test]
fn configured_capacity_is_enforced() {
    let config = parse_config(
        r#"
config_version = 1

[session]
max_controlled_apps = 2
"#,
    )
    .unwrap();

    let (outbox, _rx) = SyncOutbox::channel();
    let mut engine = SessionEngine::new(
        EngineConfig {
            retry: RetryPolicy::no_retry(),
            ..config
        },
        ContextRole::Foreground,
        SessionStore::new(Arc::new(MemoryStore::new())),
        PermissionGate::new(Arc::new(StaticPermissions(PermissionStatus::granted()))),
        outbox,
    );

    engine.select_app(AppMetadata::new("com.a", "A"), t0()).unwrap();
    engine.select_app(AppMetadata::new("com.b", "B"), t0()).unwrap();
    assert!(engine.select_app(AppMetadata::new("com.c", "C"), t0()).is_err());
}
