use crate::config::AssociationConfig;
use crate::events::{EventRecord, schema};
use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeSet;
use std::path::Path;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// One event with a non-empty repeat schedule.
#[derive(Debug, Clone)]
pub struct RepeatRow {
    pub id: String,
    pub origin_time: i64,
    pub repeats: Vec<i64>,
}

/// An unassociated amplitude observation.
#[derive(Debug, Clone)]
pub struct Amplitude {
    pub station: String,
    pub channel: String,
    pub ts: i64,
    pub lat: f64,
    pub lon: f64,
    pub value: f64,
}

/// SQLite-backed store of events and unassociated amplitudes. All
/// operations are single statements or transactions; callers treat any
/// failure as fatal.
pub struct EventStore {
    conn: Connection,
}

impl EventStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create db parent dir {}", parent.display()))?;
        }
        let conn =
            Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn get_event(&self, id: &str) -> Result<Option<EventRecord>> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT record_json FROM events WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match body {
            Some(body) => Ok(Some(
                serde_json::from_str(&body)
                    .with_context(|| format!("corrupt record for event {id}"))?,
            )),
            None => Ok(None),
        }
    }

    /// Persist an event. With `update` false the id must be new; with
    /// `update` true an existing row is replaced.
    pub fn insert_event(&self, rec: &EventRecord, update: bool) -> Result<()> {
        let origin_time = rec.origin_epoch()?;
        let repeats_json = match &rec.repeats {
            Some(repeats) if !repeats.is_empty() => Some(serde_json::to_string(repeats)?),
            _ => None,
        };
        let record_json = serde_json::to_string(rec)?;
        let sql = if update {
            "INSERT OR REPLACE INTO events (id, origin_time, mag, lat, lon, lastrun, repeats_json, record_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        } else {
            "INSERT INTO events (id, origin_time, mag, lat, lon, lastrun, repeats_json, record_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        };
        self.conn
            .execute(
                sql,
                params![
                    rec.id,
                    origin_time,
                    rec.mag,
                    rec.lat,
                    rec.lon,
                    rec.lastrun,
                    repeats_json,
                    record_json
                ],
            )
            .with_context(|| format!("persist event {}", rec.id))?;
        Ok(())
    }

    pub fn delete_event(&self, id: &str) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE amps SET event_id = NULL WHERE event_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM events WHERE id = ?1", params![id])
            .with_context(|| format!("delete event {id}"))?;
        tx.commit()?;
        Ok(())
    }

    /// Events with a non-empty repeat schedule.
    pub fn get_repeats(&self) -> Result<Vec<RepeatRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, origin_time, repeats_json FROM events
             WHERE repeats_json IS NOT NULL ORDER BY origin_time ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut out = Vec::with_capacity(rows.len());
        for (id, origin_time, repeats_json) in rows {
            let repeats: Vec<i64> = serde_json::from_str(&repeats_json)
                .with_context(|| format!("corrupt repeat schedule for event {id}"))?;
            if !repeats.is_empty() {
                out.push(RepeatRow {
                    id,
                    origin_time,
                    repeats,
                });
            }
        }
        Ok(out)
    }

    pub fn insert_amp(&self, amp: &Amplitude) -> Result<()> {
        if amp.station.is_empty() {
            bail!("amplitude is missing a station code");
        }
        self.conn.execute(
            "INSERT INTO amps (station, channel, ts, lat, lon, value)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![amp.station, amp.channel, amp.ts, amp.lat, amp.lon, amp.value],
        )?;
        Ok(())
    }

    /// Attach unassociated amps to the nearest event inside the configured
    /// time and distance windows. Returns the distinct ids of events that
    /// gained data, in id order.
    pub fn associate_all(&self, assoc: &AssociationConfig) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ts, lat, lon FROM amps WHERE event_id IS NULL ORDER BY id ASC",
        )?;
        let amps = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut touched = BTreeSet::new();
        let tx = self.conn.unchecked_transaction()?;
        for (amp_id, ts, lat, lon) in amps {
            let mut events = tx.prepare(
                "SELECT id, lat, lon FROM events WHERE origin_time BETWEEN ?1 AND ?2",
            )?;
            let candidates = events
                .query_map(params![ts - assoc.time_window, ts + assoc.time_window], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, f64>(2)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let nearest = candidates
                .into_iter()
                .map(|(id, ev_lat, ev_lon)| {
                    (haversine_km(lat, lon, ev_lat, ev_lon), id)
                })
                .filter(|(dist, _)| *dist <= assoc.distance_km)
                .min_by(|a, b| a.0.total_cmp(&b.0));

            if let Some((_, event_id)) = nearest {
                tx.execute(
                    "UPDATE amps SET event_id = ?1 WHERE id = ?2",
                    params![event_id, amp_id],
                )?;
                touched.insert(event_id);
            }
        }
        tx.commit()?;
        Ok(touched.into_iter().collect())
    }

    pub fn clean_amps(&self, days: i64, now: i64) -> Result<usize> {
        let horizon = now - days * 86_400;
        let removed = self
            .conn
            .execute("DELETE FROM amps WHERE ts < ?1", params![horizon])?;
        Ok(removed)
    }

    pub fn clean_events(&self, days: i64, now: i64) -> Result<usize> {
        let horizon = now - days * 86_400;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE amps SET event_id = NULL
             WHERE event_id IN (SELECT id FROM events WHERE origin_time < ?1)",
            params![horizon],
        )?;
        let removed = tx.execute(
            "DELETE FROM events WHERE origin_time < ?1",
            params![horizon],
        )?;
        tx.commit()?;
        Ok(removed)
    }
}

fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_known_distance() {
        // Los Angeles to San Francisco, roughly 559 km.
        let d = haversine_km(34.05, -118.24, 37.77, -122.42);
        assert!((d - 559.0).abs() < 10.0, "got {d}");
    }

    #[test]
    fn haversine_zero_at_same_point() {
        assert!(haversine_km(35.0, -118.0, 35.0, -118.0) < 1e-9);
    }
}
