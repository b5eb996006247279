use cardsync_sync::{StatusBroadcaster, SyncStatus};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};

#[test]
fn status_strings() {
    assert_eq!(SyncStatus::Idle.to_string(), "idle");
    assert_eq!(SyncStatus::Syncing.to_string(), "syncing");
    assert_eq!(SyncStatus::Error.to_string(), "error");
    assert_eq!(SyncStatus::Offline.to_string(), "offline");
    assert_eq!(serde_json::to_string(&SyncStatus::Offline).unwrap(), "\"offline\"");
    assert_eq!(
        serde_json::from_str::<SyncStatus>("\"syncing\"").unwrap(),
        SyncStatus::Syncing
    );
    assert_eq!(SyncStatus::default(), SyncStatus::Idle);
}

#[test]
fn publish_updates_current_and_listeners() {
    let status = StatusBroadcaster::new(SyncStatus::Offline);
    assert_eq!(status.current(), SyncStatus::Offline);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _handle = status.subscribe(Arc::new(move |s: SyncStatus| sink.lock().unwrap().push(s)));

    status.publish(SyncStatus::Syncing);
    status.publish(SyncStatus::Idle);

    assert_eq!(status.current(), SyncStatus::Idle);
    assert_eq!(*seen.lock().unwrap(), vec![SyncStatus::Syncing, SyncStatus::Idle]);
}

#[test]
fn panicking_listener_is_isolated() {
    let status = StatusBroadcaster::default();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let _bad = status.subscribe(Arc::new(|_: SyncStatus| panic!("listener bug")));
    let _good = status.subscribe(Arc::new(move |s: SyncStatus| sink.lock().unwrap().push(s)));

    status.publish(SyncStatus::Error);
    assert_eq!(*seen.lock().unwrap(), vec![SyncStatus::Error]);
    assert_eq!(status.listener_count(), 2);
}

#[test]
fn listener_may_unsubscribe_itself() {
    let status = Arc::new(StatusBroadcaster::default());
    let slot: Arc<Mutex<Option<cardsync_sync::Unsubscribe>>> = Arc::new(Mutex::new(None));

    let own = slot.clone();
    let handle = status.subscribe(Arc::new(move |_: SyncStatus| {
        if let Some(handle) = own.lock().unwrap().take() {
            handle.unsubscribe();
        }
    }));
    *slot.lock().unwrap() = Some(handle);

    status.publish(SyncStatus::Syncing);
    assert_eq!(status.listener_count(), 0);
}

#[test]
fn clear_drops_listeners() {
    let status = StatusBroadcaster::default();
    let _a = status.subscribe(Arc::new(|_: SyncStatus| {}));
    let _b = status.subscribe(Arc::new(|_: SyncStatus| {}));
    status.clear();
    assert_eq!(status.listener_count(), 0);
}
