use crate::config::QueueConfig;
use crate::events::store::EventStore;
use crate::events::{EventRecord, descriptor};
use crate::queue::REPEAT_ACTION;
use crate::workers::ChildSet;
use anyhow::Result;
use tracing::{debug, error, info};

/// Absolute reprocessing times for a fresh event: the offsets of the
/// highest tier strictly below `mag`, shifted by the origin time, with
/// entries already in the past pruned. Empty schedules are absent.
pub fn compute_repeats(cfg: &QueueConfig, mag: f64, origin_time: i64, now: i64) -> Option<Vec<i64>> {
    let mut tier = None;
    for candidate in &cfg.repeats {
        if candidate.mag < mag {
            tier = Some(candidate);
        } else {
            break;
        }
    }
    let times: Vec<i64> = tier?
        .offsets
        .iter()
        .map(|offset| origin_time + offset)
        .filter(|t| *t > now)
        .collect();
    if times.is_empty() { None } else { Some(times) }
}

/// One scheduler pass: fire every event whose head repeat has come due.
/// A live child covers its event's tick, so only the head is popped; the
/// pop and the child insertion happen back to back with no yield between
/// them.
pub fn scan_due(
    store: &EventStore,
    children: &mut ChildSet,
    cfg: &QueueConfig,
    now: i64,
) -> Result<()> {
    for row in store.get_repeats()? {
        let Some(&head) = row.repeats.first() else {
            continue;
        };
        if head >= now {
            continue;
        }
        let Some(mut rec) = store.get_event(&row.id)? else {
            continue;
        };

        if children.is_running(&row.id) {
            debug!(id = %row.id, "repeat due while run in progress; dropping this firing");
            pop_head(&mut rec);
            store.insert_event(&rec, true)?;
            continue;
        }

        // The stored record may be newer than the on-disk descriptor.
        if let Err(err) = descriptor::write_descriptor(&cfg.data_root, &rec) {
            error!(id = %row.id, err = %err, "could not refresh event descriptor");
        }
        children.spawn(&cfg.shake, &row.id, REPEAT_ACTION, now);
        pop_head(&mut rec);
        rec.lastrun = Some(now);
        store.insert_event(&rec, true)?;
        info!(id = %row.id, "fired scheduled repeat");
    }
    Ok(())
}

fn pop_head(rec: &mut EventRecord) {
    if let Some(repeats) = rec.repeats.as_mut() {
        if !repeats.is_empty() {
            repeats.remove(0);
        }
        if repeats.is_empty() {
            rec.repeats = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepeatTier;

    fn cfg_with_tiers() -> QueueConfig {
        let mut cfg = crate::queue::tests::test_config(std::path::Path::new("/tmp"));
        cfg.repeats = vec![
            RepeatTier {
                mag: 0.0,
                offsets: vec![300],
            },
            RepeatTier {
                mag: 5.0,
                offsets: vec![60, 600],
            },
            RepeatTier {
                mag: 7.0,
                offsets: vec![60, 600, 7200],
            },
        ];
        cfg
    }

    #[test]
    fn highest_tier_strictly_below_magnitude_wins() {
        let cfg = cfg_with_tiers();
        assert_eq!(compute_repeats(&cfg, 6.0, 1000, 0), Some(vec![1060, 1600]));
        assert_eq!(compute_repeats(&cfg, 4.0, 1000, 0), Some(vec![1300]));
        assert_eq!(
            compute_repeats(&cfg, 7.5, 1000, 0),
            Some(vec![1060, 1600, 8200])
        );
    }

    #[test]
    fn threshold_equal_to_magnitude_does_not_select() {
        let cfg = cfg_with_tiers();
        // mag exactly 5.0 falls back to the 0.0 tier.
        assert_eq!(compute_repeats(&cfg, 5.0, 1000, 0), Some(vec![1300]));
    }

    #[test]
    fn past_entries_are_pruned() {
        let cfg = cfg_with_tiers();
        assert_eq!(compute_repeats(&cfg, 6.0, 1000, 1200), Some(vec![1600]));
    }

    #[test]
    fn fully_elapsed_schedule_is_absent() {
        let cfg = cfg_with_tiers();
        assert_eq!(compute_repeats(&cfg, 6.0, 1000, 5000), None);
    }

    #[test]
    fn magnitude_below_every_tier_gets_no_schedule() {
        let mut cfg = cfg_with_tiers();
        cfg.repeats.remove(0);
        assert_eq!(compute_repeats(&cfg, 3.0, 1000, 0), None);
    }
}
