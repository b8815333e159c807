pub mod cadence;
pub mod listener;
pub mod repeats;
pub mod triggers;

use crate::config::QueueConfig;
use crate::events::EventRecord;
use crate::events::store::EventStore;
use crate::workers::ChildSet;
use anyhow::Result;
use cadence::{AMP_RETENTION_DAYS, Cadences, EVENT_RETENTION_DAYS};
use chrono::Utc;
use listener::{Listener, Trigger};
use std::time::Duration;
use tracing::{debug, info};

pub const ORIGIN_ACTION: &str = "origin";
pub const CANCEL_ACTION: &str = "cancel";
pub const REPEAT_ACTION: &str = "Scheduled repeat";
pub const ASSOCIATE_ACTION: &str = "Data association";

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// The daemon: one control thread interleaving trigger intake with the
/// periodic driver. Owns the store, the child table, and the cadence
/// stamps; nothing else mutates them.
pub struct Queue {
    cfg: QueueConfig,
    store: EventStore,
    children: ChildSet,
    cadences: Cadences,
}

impl Queue {
    pub fn new(cfg: QueueConfig) -> Result<Self> {
        let store = EventStore::open(&cfg.db)?;
        Ok(Self {
            cfg,
            store,
            children: ChildSet::new(),
            cadences: Cadences::new(),
        })
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn children(&self) -> &ChildSet {
        &self.children
    }

    /// Serve triggers until the process is terminated. Periodic tasks run
    /// whenever the socket has been idle for the accept window; under
    /// constant traffic they wait, which is accepted.
    pub fn run(&mut self) -> Result<()> {
        let mut listener = Listener::bind(self.cfg.port, &self.cfg.servers)?;
        info!(port = self.cfg.port, "queue ready");
        let mut last_tick = 0i64;
        loop {
            if let Some(trigger) = listener.poll() {
                let now = Utc::now().timestamp();
                self.handle(trigger, now)?;
                continue;
            }
            let now = Utc::now().timestamp();
            if now - last_tick >= listener::ACCEPT_TIMEOUT.as_secs() as i64 {
                self.tick(now, Some(&mut listener))?;
                last_tick = now;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Route one decoded trigger to the resolver.
    pub fn handle(&mut self, trigger: Trigger, now: i64) -> Result<()> {
        match trigger {
            Trigger::Origin { record, action } => triggers::process_origin(
                &self.store,
                &mut self.children,
                &self.cfg,
                record,
                &action,
                now,
            ),
            Trigger::Cancel { record } => {
                triggers::process_cancel(&self.store, &mut self.children, &self.cfg, record, now)
            }
            Trigger::Other { record, kind } => triggers::process_other(
                &self.store,
                &mut self.children,
                &self.cfg,
                record,
                &kind,
                now,
            ),
        }
    }

    /// One pass of the periodic driver: reap children, fire due repeats,
    /// then the slower cadences. Maintenance runs before the standalone
    /// associator check so its forced associate stamps that cadence.
    pub fn tick(&mut self, now: i64, listener: Option<&mut Listener>) -> Result<()> {
        self.children.reap(now);
        repeats::scan_due(&self.store, &mut self.children, &self.cfg, now)?;

        if self.cadences.memory_due(now) {
            if let Some(kb) = cadence::resident_set_kb() {
                info!(rss_kb = kb, "memory usage");
            }
        }

        if self.cadences.maintenance_due(now) {
            // Associate first so maintenance never discards amplitudes
            // that were about to attach.
            self.run_associator(now)?;
            self.cadences.stamp_associate(now);
            let amps = self.store.clean_amps(AMP_RETENTION_DAYS, now)?;
            let events = self.store.clean_events(EVENT_RETENTION_DAYS, now)?;
            info!(amps, events, "database maintenance complete");
            if let Some(listener) = listener {
                listener.refresh_allowlist(&self.cfg.servers);
            }
        }

        if self
            .cadences
            .associate_due(now, self.cfg.associate_interval)
        {
            self.run_associator(now)?;
        }
        Ok(())
    }

    fn run_associator(&mut self, now: i64) -> Result<()> {
        let touched = self.store.associate_all(&self.cfg.association)?;
        if touched.is_empty() {
            debug!("associator found nothing new");
            return Ok(());
        }
        info!(events = touched.len(), "associator attached new data");
        for id in touched {
            triggers::process_other(
                &self.store,
                &mut self.children,
                &self.cfg,
                EventRecord::with_id(id),
                ASSOCIATE_ACTION,
                now,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use crate::config::{AssociationConfig, QueueConfig, ShakeConfig};
    use std::path::Path;

    /// Baseline configuration for unit tests: ephemeral port, no repeat
    /// tiers, `true` as the shake stand-in.
    pub fn test_config(root: &Path) -> QueueConfig {
        QueueConfig {
            port: 0,
            servers: vec!["localhost".to_string()],
            associate_interval: -1,
            max_trigger_wait: 300,
            minmag: 4.0,
            boxes: Vec::new(),
            old_event_age: 365 * 86_400,
            future_event_age: 300,
            repeats: Vec::new(),
            data_root: root.to_path_buf(),
            db: root.join("queue.db"),
            shake: ShakeConfig {
                command: "true".to_string(),
                autorun_modules: Vec::new(),
                cancel_modules: Vec::new(),
            },
            association: AssociationConfig::default(),
        }
    }
}
