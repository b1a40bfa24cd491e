//! Fetch configuration and share-link parsing.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};

use crate::net::session::SessionParams;
use crate::pipeline::PipelineOptions;

/// Everything a fetch run needs. Built once by the CLI and passed down explicitly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchConfig {
    /// Base HTTP(S) URL of the recording server, e.g. `https://rec.example`.
    pub server: String,
    pub session_id: u32,
    pub session_key: u32,
    pub project: String,
    pub lanes: usize,
    pub pipeline: PipelineOptions,
    pub out_dir: PathBuf,
    /// Replace an existing project directory instead of refusing.
    pub replace: bool,
    /// Container hint for the decoder (file extension).
    pub format_hint: String,
    pub wizard: Option<WizardOptions>,
}

impl FetchConfig {
    /// WebSocket endpoint matching `server` (`https` → `wss`, `http` → `ws`).
    pub fn ws_url(&self) -> String {
        ws_endpoint(&self.server)
    }

    pub fn session_params(&self) -> SessionParams {
        SessionParams {
            url: self.ws_url(),
            session_id: self.session_id,
            session_key: self.session_key,
        }
    }
}

pub fn ws_endpoint(server: &str) -> String {
    let base = server.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}/panel/rec/ws")
}

/// Options the wizard collaborator reads from the `w` share parameter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WizardOptions {
    /// Index into [`WizardOptions::FORMATS`].
    pub format: u8,
    pub mix: bool,
    pub level: bool,
    pub noise_reduction: bool,
    pub keep: bool,
    pub ask: bool,
}

impl WizardOptions {
    pub const FORMATS: [&'static str; 7] = [
        "flac",
        "aac",
        "libvorbis",
        "libopus",
        "wavpack",
        "pcm_s16le",
        "alac",
    ];

    pub fn from_bits(bits: u32) -> Self {
        Self {
            format: (bits & 0xF) as u8,
            mix: bits & 0x10 != 0,
            level: bits & 0x20 != 0,
            noise_reduction: bits & 0x40 != 0,
            keep: bits & 0x100 != 0,
            ask: bits & 0x200 != 0,
        }
    }

    pub fn format_name(&self) -> Option<&'static str> {
        Self::FORMATS.get(self.format as usize).copied()
    }
}

/// Fields carried by a recording share link (`https://host/path?i=..&k=..`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShareLink {
    pub server: String,
    pub session_id: u32,
    pub session_key: u32,
    /// Raw `i` parameter; the project name falls back to it.
    pub id_text: String,
    pub project: Option<String>,
    pub threads: Option<usize>,
    pub wizard: Option<WizardOptions>,
}

pub fn parse_share_link(link: &str) -> Result<ShareLink> {
    let (scheme, rest) = link
        .split_once("://")
        .ok_or_else(|| anyhow!("share link {link:?} has no scheme"))?;
    let (authority, path_and_query) = match rest.find(|c: char| c == '/' || c == '?') {
        Some(at) => rest.split_at(at),
        None => (rest, ""),
    };
    if authority.is_empty() {
        bail!("share link {link:?} has no host");
    }
    let query = path_and_query
        .split_once('?')
        .map(|(_, q)| q.split('#').next().unwrap_or_default())
        .unwrap_or_default();

    let mut id = None;
    let mut key = None;
    let mut out = ShareLink {
        server: format!("{scheme}://{authority}"),
        ..ShareLink::default()
    };
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (name, raw) = pair.split_once('=').unwrap_or((pair, ""));
        let value = urlencoding::decode(&raw.replace('+', " "))
            .with_context(|| format!("decode share parameter {name:?}"))?
            .into_owned();
        match name {
            "i" => id = Some(value),
            "k" => key = Some(value),
            "nm" if !value.is_empty() => out.project = Some(value),
            "threads" => {
                out.threads = Some(value.parse().with_context(|| format!("threads={value:?}"))?)
            }
            "w" => out.wizard = Some(WizardOptions::from_bits(parse_base36(&value)?)),
            _ => {}
        }
    }

    let id = id.ok_or_else(|| anyhow!("share link is missing the recording id (i)"))?;
    let key = key.ok_or_else(|| anyhow!("share link is missing the key (k)"))?;
    out.session_id = parse_base36(&id)?;
    out.session_key = parse_base36(&key)?;
    out.id_text = id;
    Ok(out)
}

pub fn parse_base36(text: &str) -> Result<u32> {
    u32::from_str_radix(text.trim(), 36).with_context(|| format!("invalid base-36 value {text:?}"))
}

pub fn to_base36(mut value: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
