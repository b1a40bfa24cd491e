use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::Parser;
use rec_fetch_types::{LanePhase, LaneStatus, PipelineEvent, TrackResult};

use crate::config::{FetchConfig, parse_base36, parse_share_link};
use crate::pipeline::PipelineOptions;
use crate::pipeline::bootstrap::BOOTSTRAP_WINDOW;
use crate::pipeline::feeder::CHUNK_SIZE;
use crate::scheduler::default_lane_limit;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "rec-fetch", version = VERSION)]
pub struct Args {
    /// Recording share link, e.g. https://host/?i=<id>&k=<key>&nm=<name>
    #[arg(long)]
    pub url: Option<String>,

    /// Server base URL (overrides the share link host)
    #[arg(long)]
    pub server: Option<String>,

    /// Recording id, base 36
    #[arg(short = 'i', long)]
    pub id: Option<String>,

    /// Recording key, base 36
    #[arg(short = 'k', long)]
    pub key: Option<String>,

    /// Project name (defaults to the share link name, then the id)
    #[arg(long)]
    pub name: Option<String>,

    /// Concurrent track downloads (default: half the CPUs, at most 8)
    #[arg(long)]
    pub threads: Option<usize>,

    /// Directory the project folder is created in
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,

    /// Replace an existing project with the same name
    #[arg(long)]
    pub replace: bool,

    /// Bytes buffered before probing the container
    #[arg(long, default_value_t = BOOTSTRAP_WINDOW)]
    pub bootstrap_bytes: usize,

    /// Bytes accumulated per decoder delivery
    #[arg(long, default_value_t = CHUNK_SIZE)]
    pub chunk_bytes: usize,

    /// Container format hint for the decoder
    #[arg(long, default_value = "ogg")]
    pub format_hint: String,

    /// Print pipeline events as JSON lines instead of text
    #[arg(long)]
    pub json: bool,
}

impl Args {
    /// Merge the share link (if any) with explicit flags. Flags win.
    pub fn to_config(&self) -> Result<FetchConfig> {
        let link = self.url.as_deref().map(parse_share_link).transpose()?;

        let server = self
            .server
            .clone()
            .or_else(|| link.as_ref().map(|l| l.server.clone()))
            .ok_or_else(|| anyhow!("no server: pass --url or --server"))?;
        let (session_id, id_text) = match (&self.id, &link) {
            (Some(id), _) => (parse_base36(id)?, id.clone()),
            (None, Some(l)) => (l.session_id, l.id_text.clone()),
            (None, None) => return Err(anyhow!("no recording id: pass --url or --id")),
        };
        let session_key = match (&self.key, &link) {
            (Some(key), _) => parse_base36(key)?,
            (None, Some(l)) => l.session_key,
            (None, None) => return Err(anyhow!("no recording key: pass --url or --key")),
        };
        let project = self
            .name
            .clone()
            .or_else(|| link.as_ref().and_then(|l| l.project.clone()))
            .unwrap_or(id_text);
        let lanes = self
            .threads
            .or_else(|| link.as_ref().and_then(|l| l.threads))
            .unwrap_or_else(default_lane_limit)
            .max(1);

        Ok(FetchConfig {
            server,
            session_id,
            session_key,
            project,
            lanes,
            pipeline: PipelineOptions {
                bootstrap_window: self.bootstrap_bytes.max(1),
                chunk_size: self.chunk_bytes.max(1),
            },
            out_dir: self.out_dir.clone(),
            replace: self.replace,
            format_hint: self.format_hint.clone(),
            wizard: link.and_then(|l| l.wizard),
        })
    }
}

/// Human-readable line for an event, or `None` for events not worth a line.
///
/// Lane progress is not rendered here; it shows up on the board (see [`render_board`]).
pub fn render_event(event: &PipelineEvent) -> Option<String> {
    match event {
        PipelineEvent::LaneAssigned { lane, track } => {
            Some(format!("[lane {lane}] {}: starting", track.display_name()))
        }
        PipelineEvent::StreamOpened { lane, serial, info } => Some(format!(
            "[lane {lane}] track {serial}: {} {}",
            info.codec,
            match (info.sample_rate, info.channels) {
                (Some(rate), Some(ch)) => format!("{rate} Hz, {ch} ch"),
                (Some(rate), None) => format!("{rate} Hz"),
                _ => String::new(),
            }
        )
        .trim_end()
        .to_string()),
        PipelineEvent::LaneProgress { .. } => None,
        PipelineEvent::TrackFinished { outcome } => Some(match &outcome.result {
            TrackResult::Completed { frames, bytes, .. } => format!(
                "[lane {}] {}: done ({} frames, {} KiB)",
                outcome.lane,
                outcome.track.display_name(),
                frames,
                bytes / 1024
            ),
            TrackResult::Failed { kind, message } => format!(
                "[lane {}] {}: FAILED ({kind:?}): {message}",
                outcome.lane,
                outcome.track.display_name()
            ),
        }),
        PipelineEvent::PoolFinished { summary } => Some(format!(
            "finished: {} succeeded, {} failed",
            summary.succeeded(),
            summary.failed()
        )),
    }
}

/// The progress board: one row per lane that has run a track, in lane order.
pub fn render_board(lanes: &[LaneStatus]) -> String {
    let mut rows = Vec::with_capacity(lanes.len());
    for status in lanes {
        let Some(track) = &status.track else {
            continue;
        };
        let mut row = format!(
            "[lane {}] {:<20} {:<13} {:>8.1} MiB {:>10} frames",
            status.lane,
            track.display_name(),
            phase_label(status.phase),
            status.bytes_received as f64 / (1024.0 * 1024.0),
            status.frames_decoded
        );
        if let Some(error) = &status.error {
            row.push_str(": ");
            row.push_str(error);
        }
        rows.push(row.trim_end().to_string());
    }
    rows.join("\n")
}

fn phase_label(phase: LanePhase) -> &'static str {
    match phase {
        LanePhase::Idle => "idle",
        LanePhase::Connecting => "connecting",
        LanePhase::Handshaking => "handshaking",
        LanePhase::Bootstrapping => "bootstrapping",
        LanePhase::Streaming => "streaming",
        LanePhase::Draining => "draining",
        LanePhase::Done => "done",
        LanePhase::Failed => "failed",
    }
}
