use crate::config::QueueConfig;
use crate::events::store::EventStore;
use crate::events::{EventRecord, descriptor};
use crate::queue::{CANCEL_ACTION, repeats};
use crate::workers::ChildSet;
use anyhow::Result;
use std::fs;
use tracing::{error, info, warn};

/// Decide what to do with an incoming origin trigger: absorb a known
/// alias, filter, schedule, shelve, or dispatch.
pub fn process_origin(
    store: &EventStore,
    children: &mut ChildSet,
    cfg: &QueueConfig,
    mut rec: EventRecord,
    action: &str,
    now: i64,
) -> Result<()> {
    let existing = store.get_event(&rec.id)?;
    let mut force_run = false;
    if existing.is_none() {
        force_run = consume_alias(store, children, cfg, &rec)?;
    }

    let Some(stored) = existing else {
        if !force_run && magnitude_too_small(cfg, rec.mag, rec.lon, rec.lat) {
            info!(id = %rec.id, mag = rec.mag, "magnitude below threshold; ignoring");
            return Ok(());
        }
        let origin_time = match rec.origin_epoch() {
            Ok(t) => t,
            Err(err) => {
                error!(id = %rec.id, err = %err, "dropping trigger with unparseable time");
                return Ok(());
            }
        };
        if !force_run && event_age_out_of_range(cfg, origin_time, now) {
            info!(id = %rec.id, origin_time, "event outside age bounds; ignoring");
            return Ok(());
        }
        rec.repeats = repeats::compute_repeats(cfg, rec.mag, origin_time, now);
        return dispatch(store, children, cfg, rec, action, now, false);
    };

    // The incoming payload supersedes everything except scheduling state,
    // so its time must parse before it can be persisted.
    if let Err(err) = rec.origin_epoch() {
        error!(id = %rec.id, err = %err, "dropping trigger with unparseable time");
        return Ok(());
    }
    rec.lastrun = stored.lastrun;
    rec.repeats = stored.repeats;
    retrigger(store, children, cfg, rec, action, now)
}

/// Re-trigger decision for an event already in the database. Shelves the
/// trigger whenever a run is live, a repeat is imminent, or the event ran
/// within the hysteresis window; otherwise dispatches.
pub fn retrigger(
    store: &EventStore,
    children: &mut ChildSet,
    cfg: &QueueConfig,
    mut rec: EventRecord,
    action: &str,
    now: i64,
) -> Result<()> {
    let mtw = cfg.max_trigger_wait;

    if children.is_running(&rec.id) {
        ensure_repeat_by(&mut rec, now + mtw);
        store.insert_event(&rec, true)?;
        info!(id = %rec.id, action, "run in progress; shelving trigger behind a repeat");
        return Ok(());
    }

    if let Some(&head) = rec.repeats.as_ref().and_then(|r| r.first()) {
        if now - head > -mtw {
            store.insert_event(&rec, true)?;
            info!(id = %rec.id, action, "repeat due shortly; deferring to the schedule");
            return Ok(());
        }
    }

    if let Some(lastrun) = rec.lastrun {
        if now - lastrun < mtw {
            ensure_repeat_by(&mut rec, now + mtw);
            store.insert_event(&rec, true)?;
            info!(id = %rec.id, action, "ran recently; scheduled a follow-up instead");
            return Ok(());
        }
    }

    dispatch(store, children, cfg, rec, action, now, true)
}

/// A cancellation for a known event (or alias) launches the cancel run;
/// unknown events are ignored. No magnitude or age filtering.
pub fn process_cancel(
    store: &EventStore,
    children: &mut ChildSet,
    cfg: &QueueConfig,
    rec: EventRecord,
    now: i64,
) -> Result<()> {
    let mut target = None;
    if store.get_event(&rec.id)?.is_some() {
        target = Some(rec.id.clone());
    } else {
        for alias in rec.aliases() {
            if store.get_event(alias)?.is_some() {
                target = Some(alias.to_string());
                break;
            }
        }
    }
    match target {
        Some(id) => {
            children.spawn(&cfg.shake, &id, CANCEL_ACTION, now);
            info!(id = %id, "dispatched cancellation");
        }
        None => info!(id = %rec.id, "cancellation for unknown event; ignoring"),
    }
    Ok(())
}

/// Any other trigger type carries only an id; the stored record, not the
/// payload, flows through the re-trigger decision.
pub fn process_other(
    store: &EventStore,
    children: &mut ChildSet,
    cfg: &QueueConfig,
    rec: EventRecord,
    action: &str,
    now: i64,
) -> Result<()> {
    let mut stored = store.get_event(&rec.id)?;
    if stored.is_none() {
        for alias in rec.aliases() {
            stored = store.get_event(alias)?;
            if stored.is_some() {
                break;
            }
        }
    }
    let Some(stored) = stored else {
        info!(id = %rec.id, action, "trigger for unknown event; ignoring");
        return Ok(());
    };
    info!(id = %stored.id, action, "processing trigger for known event");
    retrigger(store, children, cfg, stored, action, now)
}

/// Absorb the first alias that exists in the database: terminate its run,
/// drop its row, and move its data directory under the primary id. The
/// caller bypasses the magnitude and age filters afterwards.
fn consume_alias(
    store: &EventStore,
    children: &mut ChildSet,
    cfg: &QueueConfig,
    rec: &EventRecord,
) -> Result<bool> {
    for alias in rec.aliases() {
        if store.get_event(alias)?.is_none() {
            continue;
        }
        if children.is_running(alias) {
            if let Err(err) = children.kill_and_wait(alias) {
                warn!(alias, err = %err, "could not terminate child of absorbed alias");
            }
        }
        store.delete_event(alias)?;

        let from = cfg.data_root.join(alias);
        let to = cfg.data_root.join(&rec.id);
        if from.exists() {
            if let Err(err) = fs::rename(&from, &to) {
                warn!(alias, id = %rec.id, err = %err, "could not rename event directory");
            }
        }
        info!(alias, id = %rec.id, "absorbed alias event");
        return Ok(true);
    }
    Ok(false)
}

/// Guarantee a repeat no later than `deadline`, keeping the schedule
/// strictly ascending.
fn ensure_repeat_by(rec: &mut EventRecord, deadline: i64) {
    let repeats = rec.repeats.get_or_insert_with(Vec::new);
    if repeats.first().map_or(true, |&head| head > deadline) {
        repeats.insert(0, deadline);
    }
}

/// An event passes on the global threshold, or on the threshold of the
/// first box containing it; a box can only lower the bar.
fn magnitude_too_small(cfg: &QueueConfig, mag: f64, lon: f64, lat: f64) -> bool {
    if mag >= cfg.minmag {
        return false;
    }
    for region in &cfg.boxes {
        if region.contains(lon, lat) {
            return mag < region.mag;
        }
    }
    true
}

fn event_age_out_of_range(cfg: &QueueConfig, origin_time: i64, now: i64) -> bool {
    now - origin_time > cfg.old_event_age || origin_time - now > cfg.future_event_age
}

fn dispatch(
    store: &EventStore,
    children: &mut ChildSet,
    cfg: &QueueConfig,
    mut rec: EventRecord,
    action: &str,
    now: i64,
    update: bool,
) -> Result<()> {
    rec.lastrun = Some(now);
    store.insert_event(&rec, update)?;
    if let Err(err) = descriptor::write_descriptor(&cfg.data_root, &rec) {
        error!(id = %rec.id, err = %err, "could not write event descriptor");
    }
    children.spawn(&cfg.shake, &rec.id, action, now);
    info!(id = %rec.id, action, "dispatched event");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegionBox;

    #[test]
    fn box_threshold_lowers_the_bar_inside_its_region() {
        let mut cfg = crate::queue::tests::test_config(std::path::Path::new("/tmp"));
        cfg.minmag = 4.0;
        cfg.boxes = vec![RegionBox {
            mag: 3.0,
            xmin: -121.0,
            xmax: -114.0,
            ymin: 32.0,
            ymax: 37.0,
        }];
        // Inside the box the lower threshold applies.
        assert!(!magnitude_too_small(&cfg, 3.5, -118.0, 34.0));
        assert!(magnitude_too_small(&cfg, 2.5, -118.0, 34.0));
        // Outside the box the global threshold applies.
        assert!(magnitude_too_small(&cfg, 3.5, 0.0, 0.0));
        assert!(!magnitude_too_small(&cfg, 4.5, 0.0, 0.0));
    }

    #[test]
    fn box_with_higher_threshold_never_raises_the_bar() {
        let mut cfg = crate::queue::tests::test_config(std::path::Path::new("/tmp"));
        cfg.minmag = 4.0;
        cfg.boxes = vec![RegionBox {
            mag: 5.0,
            xmin: -121.0,
            xmax: -114.0,
            ymin: 32.0,
            ymax: 37.0,
        }];
        // The global threshold still admits events inside the box.
        assert!(!magnitude_too_small(&cfg, 4.5, -118.0, 34.0));
        assert!(magnitude_too_small(&cfg, 3.5, -118.0, 34.0));
    }

    #[test]
    fn age_bounds() {
        let mut cfg = crate::queue::tests::test_config(std::path::Path::new("/tmp"));
        cfg.old_event_age = 86_400;
        cfg.future_event_age = 300;
        let now = 1_000_000;
        assert!(!event_age_out_of_range(&cfg, now - 86_400, now));
        assert!(event_age_out_of_range(&cfg, now - 86_401, now));
        assert!(!event_age_out_of_range(&cfg, now + 300, now));
        assert!(event_age_out_of_range(&cfg, now + 301, now));
    }
}
