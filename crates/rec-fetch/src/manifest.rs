//! Recording manifest: which tracks exist and what they are called.

use anyhow::{Context, Result};
use rec_fetch_types::TrackDescriptor;
use serde_json::Value;

use crate::config::to_base36;
use crate::error::PipelineError;

/// `<base>/panel/rec/dl/?i=<id>&f=info`
pub fn manifest_url(base_url: &str, session_id: u32) -> String {
    format!(
        "{}/panel/rec/dl/?i={}&f=info",
        base_url.trim_end_matches('/'),
        to_base36(session_id)
    )
}

/// Fetch and parse the manifest. Any failure here aborts the whole download.
pub fn fetch_manifest(
    base_url: &str,
    session_id: u32,
) -> Result<Vec<TrackDescriptor>, PipelineError> {
    let url = manifest_url(base_url, session_id);
    tracing::debug!(%url, "fetching manifest");
    let body = fetch_json(&url).map_err(|e| PipelineError::Manifest(format!("{e:#}")))?;
    let tracks = parse_manifest(&body)?;
    tracing::info!(tracks = tracks.len(), "manifest loaded");
    Ok(tracks)
}

fn fetch_json(url: &str) -> Result<Value> {
    let mut resp = ureq::get(url).call().context("request manifest")?;
    let body = resp
        .body_mut()
        .read_to_string()
        .context("read manifest response body")?;
    serde_json::from_str(&body).context("decode manifest response")
}

/// Tracks are numbered from 1; counting stops at the first serial missing from `tracks`.
///
/// `tracks` may be an object keyed by serial or an array indexed by it.
pub fn parse_manifest(info: &Value) -> Result<Vec<TrackDescriptor>, PipelineError> {
    let tracks = info
        .get("tracks")
        .ok_or_else(|| PipelineError::Manifest("manifest has no tracks".to_string()))?;

    let mut out = Vec::new();
    for serial in 1u32.. {
        let entry = match tracks {
            Value::Object(map) => map.get(&serial.to_string()),
            Value::Array(items) => items.get(serial as usize),
            _ => {
                return Err(PipelineError::Manifest(
                    "manifest tracks is neither an object nor an array".to_string(),
                ));
            }
        };
        let Some(entry) = entry.filter(|e| is_present(e)) else {
            break;
        };
        let nick = entry
            .get("nick")
            .and_then(Value::as_str)
            .unwrap_or_default();
        out.push(TrackDescriptor::new(serial, nick));
    }
    Ok(out)
}

fn is_present(entry: &Value) -> bool {
    match entry {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}
