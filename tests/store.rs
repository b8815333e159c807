use serde_json::json;
use tempfile::tempdir;

use shakeq::config::AssociationConfig;
use shakeq::events::EventRecord;
use shakeq::events::store::{Amplitude, EventStore};

const T0: i64 = 1_704_067_200;

fn open_store(dir: &std::path::Path) -> EventStore {
    EventStore::open(&dir.join("queue.db")).unwrap()
}

fn event(id: &str, offset: i64, lat: f64, lon: f64) -> EventRecord {
    let time = chrono::DateTime::from_timestamp(T0 + offset, 0).unwrap();
    serde_json::from_value(json!({
        "id": id,
        "mag": 5.5,
        "lon": lon,
        "lat": lat,
        "time": shakeq::events::format_time(time),
        "depth": 8.2,
    }))
    .unwrap()
}

fn amp(station: &str, ts: i64, lat: f64, lon: f64) -> Amplitude {
    Amplitude {
        station: station.to_string(),
        channel: "HNZ".to_string(),
        ts,
        lat,
        lon,
        value: 0.02,
    }
}

#[test]
fn round_trip_preserves_opaque_fields() {
    let tmp = tempdir().unwrap();
    let store = open_store(tmp.path());
    let mut rec = event("e1", 0, 35.0, -120.0);
    rec.repeats = Some(vec![T0 + 60, T0 + 600]);
    rec.lastrun = Some(T0 + 30);

    store.insert_event(&rec, false).unwrap();
    let back = store.get_event("e1").unwrap().unwrap();

    assert_eq!(back.id, "e1");
    assert_eq!(back.repeats, Some(vec![T0 + 60, T0 + 600]));
    assert_eq!(back.lastrun, Some(T0 + 30));
    assert_eq!(back.extra.get("depth"), Some(&json!(8.2)));
}

#[test]
fn plain_insert_rejects_duplicates_and_upsert_replaces() {
    let tmp = tempdir().unwrap();
    let store = open_store(tmp.path());
    store.insert_event(&event("e1", 0, 35.0, -120.0), false).unwrap();
    assert!(store.insert_event(&event("e1", 0, 35.0, -120.0), false).is_err());

    let mut updated = event("e1", 0, 35.0, -120.0);
    updated.mag = 6.0;
    store.insert_event(&updated, true).unwrap();
    assert_eq!(store.get_event("e1").unwrap().unwrap().mag, 6.0);
}

#[test]
fn delete_removes_the_event() {
    let tmp = tempdir().unwrap();
    let store = open_store(tmp.path());
    store.insert_event(&event("e1", 0, 35.0, -120.0), false).unwrap();
    store.delete_event("e1").unwrap();
    assert!(store.get_event("e1").unwrap().is_none());
}

#[test]
fn get_repeats_lists_only_scheduled_events() {
    let tmp = tempdir().unwrap();
    let store = open_store(tmp.path());

    let mut scheduled = event("scheduled", 0, 35.0, -120.0);
    scheduled.repeats = Some(vec![T0 + 60]);
    store.insert_event(&scheduled, false).unwrap();
    store.insert_event(&event("bare", 10, 36.0, -121.0), false).unwrap();

    let rows = store.get_repeats().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, "scheduled");
    assert_eq!(rows[0].origin_time, T0);
    assert_eq!(rows[0].repeats, vec![T0 + 60]);
}

#[test]
fn associate_attaches_amps_inside_both_windows() {
    let tmp = tempdir().unwrap();
    let store = open_store(tmp.path());
    let assoc = AssociationConfig {
        time_window: 600,
        distance_km: 500.0,
    };

    store.insert_event(&event("near", 0, 35.0, -120.0), false).unwrap();
    store.insert_event(&event("far", 0, -35.0, 20.0), false).unwrap();

    // Close in both time and space.
    store.insert_amp(&amp("STA1", T0 + 100, 35.1, -120.1)).unwrap();
    // Close in space, outside the time window.
    store.insert_amp(&amp("STA2", T0 + 10_000, 35.1, -120.1)).unwrap();
    // Inside the time window, nowhere near either event.
    store.insert_amp(&amp("STA3", T0 + 100, 0.0, 60.0)).unwrap();

    let touched = store.associate_all(&assoc).unwrap();
    assert_eq!(touched, vec!["near".to_string()]);

    // Already-associated amps are not returned again.
    assert!(store.associate_all(&assoc).unwrap().is_empty());
}

#[test]
fn associate_prefers_the_nearest_event() {
    let tmp = tempdir().unwrap();
    let store = open_store(tmp.path());
    let assoc = AssociationConfig {
        time_window: 600,
        distance_km: 500.0,
    };

    store.insert_event(&event("closer", 0, 35.0, -120.0), false).unwrap();
    store.insert_event(&event("close", 0, 36.5, -120.0), false).unwrap();
    store.insert_amp(&amp("STA1", T0 + 50, 35.2, -120.0)).unwrap();

    assert_eq!(store.associate_all(&assoc).unwrap(), vec!["closer".to_string()]);
}

#[test]
fn clean_amps_drops_old_rows() {
    let tmp = tempdir().unwrap();
    let store = open_store(tmp.path());
    let now = T0 + 40 * 86_400;

    store.insert_amp(&amp("OLD", T0, 35.0, -120.0)).unwrap();
    store.insert_amp(&amp("NEW", now - 3_600, 35.0, -120.0)).unwrap();

    assert_eq!(store.clean_amps(30, now).unwrap(), 1);
    assert_eq!(store.clean_amps(30, now).unwrap(), 0);
}

#[test]
fn clean_events_drops_old_rows_and_their_associations() {
    let tmp = tempdir().unwrap();
    let store = open_store(tmp.path());
    let now = T0 + 400 * 86_400;

    store.insert_event(&event("ancient", 0, 35.0, -120.0), false).unwrap();
    store.insert_event(&event("recent", 399 * 86_400, 35.0, -120.0), false).unwrap();
    store.insert_amp(&amp("STA1", T0 + 50, 35.0, -120.0)).unwrap();
    let assoc = AssociationConfig {
        time_window: 600,
        distance_km: 500.0,
    };
    store.associate_all(&assoc).unwrap();

    assert_eq!(store.clean_events(365, now).unwrap(), 1);
    assert!(store.get_event("ancient").unwrap().is_none());
    assert!(store.get_event("recent").unwrap().is_some());
}
