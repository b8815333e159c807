use crate::events::{EventRecord, format_time};
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Write `<data_root>/<id>/current/event.xml` describing the event. The
/// origin time attribute is serialized from the parsed value, never copied
/// from the raw string; an unparseable time fails the write. Scalar
/// passthrough fields become additional attributes; nested values are
/// skipped. Scheduling state (`repeats`, `lastrun`) is not part of the
/// descriptor.
pub fn write_descriptor(data_root: &Path, rec: &EventRecord) -> Result<PathBuf> {
    let origin_time = rec.origin_time()?;

    let mut attrs: Vec<(&str, String)> = vec![
        ("id", rec.id.clone()),
        ("time", format_time(origin_time)),
        ("lat", rec.lat.to_string()),
        ("lon", rec.lon.to_string()),
        ("mag", rec.mag.to_string()),
    ];
    for (key, value) in &rec.extra {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        attrs.push((key.as_str(), text));
    }

    let mut body = String::from("<earthquake");
    for (key, value) in &attrs {
        body.push_str(&format!(" {}=\"{}\"", key, xml_escape(value)));
    }
    body.push_str("/>\n");

    let dir = data_root.join(&rec.id).join("current");
    fs::create_dir_all(&dir)
        .with_context(|| format!("create event directory {}", dir.display()))?;
    let path = dir.join("event.xml");
    fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
