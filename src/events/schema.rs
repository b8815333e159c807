use rusqlite::{Connection, Result};

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            origin_time INTEGER NOT NULL,
            mag REAL NOT NULL,
            lat REAL NOT NULL,
            lon REAL NOT NULL,
            lastrun INTEGER,
            repeats_json TEXT,
            record_json TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_events_origin_time ON events(origin_time);
        CREATE INDEX IF NOT EXISTS idx_events_repeats ON events(id) WHERE repeats_json IS NOT NULL;

        CREATE TABLE IF NOT EXISTS amps (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            station TEXT NOT NULL,
            channel TEXT NOT NULL,
            ts INTEGER NOT NULL,
            lat REAL NOT NULL,
            lon REAL NOT NULL,
            value REAL NOT NULL,
            event_id TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_amps_ts ON amps(ts);
        CREATE INDEX IF NOT EXISTS idx_amps_event ON amps(event_id);
        ",
    )?;

    Ok(())
}
