use std::fs;

pub const MEMORY_INTERVAL: i64 = 3_600;
pub const DB_MAINTENANCE_INTERVAL: i64 = 86_400;
pub const AMP_RETENTION_DAYS: i64 = 30;
pub const EVENT_RETENTION_DAYS: i64 = 365;

/// The three process-wide "last fired" stamps, owned by the control loop.
/// Every stamp starts at zero, so memory logging and database maintenance
/// fire on the first tick; the maintenance pass stamps the associator, so
/// a standalone associator run then waits a full interval.
#[derive(Debug, Default)]
pub struct Cadences {
    last_memory: i64,
    last_associate: i64,
    last_maintenance: i64,
}

impl Cadences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory_due(&mut self, now: i64) -> bool {
        if now - self.last_memory >= MEMORY_INTERVAL {
            self.last_memory = now;
            true
        } else {
            false
        }
    }

    pub fn maintenance_due(&mut self, now: i64) -> bool {
        if now - self.last_maintenance >= DB_MAINTENANCE_INTERVAL {
            self.last_maintenance = now;
            true
        } else {
            false
        }
    }

    pub fn associate_due(&mut self, now: i64, interval: i64) -> bool {
        if interval < 0 {
            return false;
        }
        if now - self.last_associate >= interval {
            self.last_associate = now;
            true
        } else {
            false
        }
    }

    pub fn stamp_associate(&mut self, now: i64) {
        self.last_associate = now;
    }
}

/// Resident set size in kilobytes, when the platform exposes it.
pub fn resident_set_kb() -> Option<u64> {
    let status = fs::read_to_string("/proc/self/status").ok()?;
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_fires_immediately_then_waits() {
        let mut c = Cadences::new();
        let now = 1_700_000_000;
        assert!(c.memory_due(now));
        assert!(!c.memory_due(now + MEMORY_INTERVAL - 1));
        assert!(c.memory_due(now + MEMORY_INTERVAL));
    }

    #[test]
    fn maintenance_fires_immediately_then_waits() {
        let mut c = Cadences::new();
        let now = 1_700_000_000;
        assert!(c.maintenance_due(now));
        assert!(!c.maintenance_due(now + DB_MAINTENANCE_INTERVAL - 1));
        assert!(c.maintenance_due(now + DB_MAINTENANCE_INTERVAL));
    }

    #[test]
    fn associator_waits_after_forced_stamp() {
        let mut c = Cadences::new();
        let now = 1_700_000_000;
        // The first maintenance pass forces an associate and stamps it.
        assert!(c.maintenance_due(now));
        c.stamp_associate(now);
        assert!(!c.associate_due(now, 600));
        assert!(!c.associate_due(now + 599, 600));
        assert!(c.associate_due(now + 600, 600));
    }

    #[test]
    fn negative_interval_disables_associator() {
        let mut c = Cadences::new();
        assert!(!c.associate_due(1_700_000_000, -1));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn resident_set_is_readable() {
        assert!(resident_set_kb().unwrap() > 0);
    }
}
