use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const DEFAULT_PORT: u16 = 8796;
const DEFAULT_ASSOCIATE_INTERVAL: i64 = 600;
const DEFAULT_MAX_TRIGGER_WAIT: i64 = 300;
const DEFAULT_MINMAG: f64 = 4.0;
const DEFAULT_OLD_EVENT_AGE: i64 = 365 * 86_400;
const DEFAULT_FUTURE_EVENT_AGE: i64 = 300;
const DEFAULT_ASSOC_TIME_WINDOW: i64 = 600;
const DEFAULT_ASSOC_DISTANCE_KM: f64 = 500.0;

/// Validated daemon configuration. Loaded from TOML via the raw structs
/// below; invalid values are rejected at startup, not at first use.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub port: u16,
    pub servers: Vec<String>,
    /// Seconds between associator runs; negative disables.
    pub associate_interval: i64,
    /// Hysteresis window suppressing back-to-back dispatches, seconds.
    pub max_trigger_wait: i64,
    pub minmag: f64,
    pub boxes: Vec<RegionBox>,
    pub old_event_age: i64,
    pub future_event_age: i64,
    /// Magnitude tiers, ascending by threshold. Offsets are seconds past
    /// the event origin time.
    pub repeats: Vec<RepeatTier>,
    pub data_root: PathBuf,
    pub db: PathBuf,
    pub shake: ShakeConfig,
    pub association: AssociationConfig,
}

#[derive(Debug, Clone)]
pub struct RepeatTier {
    pub mag: f64,
    pub offsets: Vec<i64>,
}

/// Lon/lat rectangle carrying its own lower magnitude threshold.
#[derive(Debug, Clone, Deserialize)]
pub struct RegionBox {
    pub mag: f64,
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
}

impl RegionBox {
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.xmin && lon <= self.xmax && lat >= self.ymin && lat <= self.ymax
    }
}

#[derive(Debug, Clone)]
pub struct ShakeConfig {
    pub command: String,
    pub autorun_modules: Vec<String>,
    pub cancel_modules: Vec<String>,
}

impl Default for ShakeConfig {
    fn default() -> Self {
        Self {
            command: "shake".to_string(),
            autorun_modules: vec![
                "select".to_string(),
                "assemble".to_string(),
                "model".to_string(),
                "contour".to_string(),
            ],
            cancel_modules: vec!["cancel".to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssociationConfig {
    pub time_window: i64,
    pub distance_km: f64,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            time_window: DEFAULT_ASSOC_TIME_WINDOW,
            distance_km: DEFAULT_ASSOC_DISTANCE_KM,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    port: Option<u16>,
    servers: Option<Vec<String>>,
    associate_interval: Option<i64>,
    max_trigger_wait: Option<i64>,
    minmag: Option<f64>,
    old_event_age: Option<AgeValue>,
    future_event_age: Option<AgeValue>,
    data_root: Option<PathBuf>,
    db: Option<PathBuf>,
    repeats: Option<BTreeMap<String, Vec<i64>>>,
    boxes: Option<Vec<RegionBox>>,
    shake: Option<RawShake>,
    association: Option<RawAssociation>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawShake {
    command: Option<String>,
    autorun_modules: Option<Vec<String>>,
    cancel_modules: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAssociation {
    time_window: Option<i64>,
    distance_km: Option<f64>,
}

/// Age bounds accept integer seconds or human-readable text ("30 days").
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AgeValue {
    Seconds(i64),
    Text(String),
}

impl AgeValue {
    fn into_seconds(self, field: &str) -> Result<i64> {
        let secs = match self {
            AgeValue::Seconds(s) => s,
            AgeValue::Text(text) => parse_age_text(&text)
                .with_context(|| format!("invalid age string for `{field}`: {text:?}"))?,
        };
        if secs < 0 {
            bail!("`{field}` must not be negative");
        }
        Ok(secs)
    }
}

fn parse_age_text(text: &str) -> Result<i64> {
    let mut parts = text.split_whitespace();
    let (Some(count), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
        bail!("expected \"<count> <unit>\"");
    };
    let count: i64 = count.parse().context("count is not an integer")?;
    let unit_secs = match unit.trim_end_matches('s') {
        "second" => 1,
        "minute" => 60,
        "hour" => 3_600,
        "day" => 86_400,
        "week" => 7 * 86_400,
        "year" => 365 * 86_400,
        other => bail!("unknown age unit {other:?}"),
    };
    Ok(count * unit_secs)
}

impl QueueConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let raw: RawConfig = toml::from_str(&body)
            .with_context(|| format!("parse config file {}", path.display()))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let port = raw.port.unwrap_or(DEFAULT_PORT);
        if port == 0 {
            bail!("`port` must be non-zero");
        }
        let servers = raw
            .servers
            .unwrap_or_else(|| vec!["localhost".to_string()]);
        if servers.is_empty() {
            bail!("`servers` must list at least one allowed host");
        }
        let max_trigger_wait = raw.max_trigger_wait.unwrap_or(DEFAULT_MAX_TRIGGER_WAIT);
        if max_trigger_wait <= 0 {
            bail!("`max_trigger_wait` must be positive");
        }

        let mut repeats = Vec::new();
        for (key, offsets) in raw.repeats.unwrap_or_default() {
            let mag: f64 = key
                .parse()
                .with_context(|| format!("repeat threshold {key:?} is not a number"))?;
            if offsets.iter().any(|off| *off <= 0) {
                bail!("repeat offsets for threshold {key} must be positive");
            }
            if offsets.windows(2).any(|w| w[0] >= w[1]) {
                bail!("repeat offsets for threshold {key} must be strictly ascending");
            }
            repeats.push(RepeatTier { mag, offsets });
        }
        repeats.sort_by(|a, b| a.mag.total_cmp(&b.mag));

        let shake = raw.shake.map_or_else(ShakeConfig::default, |s| {
            let default = ShakeConfig::default();
            ShakeConfig {
                command: s.command.unwrap_or(default.command),
                autorun_modules: s.autorun_modules.unwrap_or(default.autorun_modules),
                cancel_modules: s.cancel_modules.unwrap_or(default.cancel_modules),
            }
        });
        if shake.command.trim().is_empty() {
            bail!("`shake.command` must not be empty");
        }

        let association = raw.association.map_or_else(AssociationConfig::default, |a| {
            AssociationConfig {
                time_window: a.time_window.unwrap_or(DEFAULT_ASSOC_TIME_WINDOW),
                distance_km: a.distance_km.unwrap_or(DEFAULT_ASSOC_DISTANCE_KM),
            }
        });
        if association.time_window < 0 || association.distance_km < 0.0 {
            bail!("`association` windows must not be negative");
        }

        let data_root = raw
            .data_root
            .unwrap_or_else(|| PathBuf::from("/var/lib/shakeq/data"));
        let db = raw.db.unwrap_or_else(|| data_root.join("queue.db"));

        Ok(Self {
            port,
            servers,
            associate_interval: raw
                .associate_interval
                .unwrap_or(DEFAULT_ASSOCIATE_INTERVAL),
            max_trigger_wait,
            minmag: raw.minmag.unwrap_or(DEFAULT_MINMAG),
            boxes: raw.boxes.unwrap_or_default(),
            old_event_age: raw
                .old_event_age
                .map_or(Ok(DEFAULT_OLD_EVENT_AGE), |a| {
                    a.into_seconds("old_event_age")
                })?,
            future_event_age: raw
                .future_event_age
                .map_or(Ok(DEFAULT_FUTURE_EVENT_AGE), |a| {
                    a.into_seconds("future_event_age")
                })?,
            repeats,
            data_root,
            db,
            shake,
            association,
        })
    }
}
