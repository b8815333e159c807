pub mod descriptor;
pub mod schema;
pub mod store;

use anyhow::{Result, bail};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Primary wire/descriptor time format.
pub const TIMEFMT: &str = "%Y-%m-%dT%H:%M:%SZ";
/// Fallback format carrying fractional seconds.
pub const ALT_TIMEFMT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// One seismic event. Typed fields cover everything the queue reasons
/// about; every other payload field lands in `extra` and is round-tripped
/// through persistence untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_eventids: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default)]
    pub mag: f64,
    #[serde(default)]
    pub lon: f64,
    #[serde(default)]
    pub lat: f64,
    /// Absolute epoch seconds at which the event should be reprocessed,
    /// ascending. Absent when nothing is scheduled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeats: Option<Vec<i64>>,
    /// Epoch seconds of the most recent dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lastrun: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EventRecord {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Alternate ids carried by the trigger, primary excluded.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.alt_eventids
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(move |alias| !alias.is_empty() && *alias != self.id)
    }

    pub fn origin_time(&self) -> Result<DateTime<Utc>> {
        match self.time.as_deref() {
            Some(text) => parse_time(text),
            None => bail!("event {} carries no origin time", self.id),
        }
    }

    pub fn origin_epoch(&self) -> Result<i64> {
        Ok(self.origin_time()?.timestamp())
    }
}

/// Parse an origin time string, primary format first, fallback second.
pub fn parse_time(text: &str) -> Result<DateTime<Utc>> {
    for fmt in [TIMEFMT, ALT_TIMEFMT] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Ok(naive.and_utc());
        }
    }
    bail!("unrecognized time format {text:?}")
}

pub fn format_time(time: DateTime<Utc>) -> String {
    time.format(TIMEFMT).to_string()
}
