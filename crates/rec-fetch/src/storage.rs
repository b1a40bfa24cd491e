//! Project storage: where decoded frames end up.
//!
//! The pipeline only sees [`ProjectStore`] / [`TrackSink`]. The CLI uses [`FileProjectStore`],
//! which writes one raw interleaved `f32` file per track plus a JSON sidecar.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rec_fetch_types::{StreamInfo, TrackDescriptor};
use serde::{Deserialize, Serialize};

use crate::decode::FrameBatch;
use crate::error::PipelineError;

/// Creates per-track frame sinks.
pub trait ProjectStore: Send + Sync {
    fn create_track(
        &self,
        track: &TrackDescriptor,
        info: &StreamInfo,
    ) -> Result<Box<dyn TrackSink>, PipelineError>;
}

/// Receives one track's decoded batches, in order, from its decode thread.
pub trait TrackSink: Send {
    fn write_batch(&mut self, batch: &FrameBatch) -> Result<(), PipelineError>;

    /// Flush and seal the track. Returns the number of frames stored.
    fn finish(self: Box<Self>) -> Result<u64, PipelineError>;
}

/// Sidecar describing a stored `.f32` file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackSidecar {
    pub serial: u32,
    pub label: String,
    pub codec: String,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub frames: u64,
}

/// On-disk project: `<out_dir>/<project>/`.
#[derive(Debug, Clone)]
pub struct FileProjectStore {
    dir: PathBuf,
}

impl FileProjectStore {
    /// Create the project directory. An existing one is only replaced when `replace` is set.
    pub fn create(out_dir: &Path, project: &str, replace: bool) -> Result<Self> {
        let dir = out_dir.join(sanitize(project));
        if dir.exists() {
            if !replace {
                bail!("project {:?} already exists (use --replace)", dir);
            }
            std::fs::remove_dir_all(&dir)
                .with_context(|| format!("remove existing project {:?}", dir))?;
            tracing::info!(path = ?dir, "replaced existing project");
        }
        std::fs::create_dir_all(&dir).with_context(|| format!("create project {:?}", dir))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Delete the partially created project.
    pub fn remove(&self) -> Result<()> {
        remove_project_dir(&self.dir)
    }

    pub fn track_path(&self, track: &TrackDescriptor) -> PathBuf {
        self.dir.join(format!("{}.f32", sanitize(&track.display_name())))
    }
}

/// Remove a project directory if present. Shared with the Ctrl-C handler.
pub fn remove_project_dir(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove project {:?}", dir)),
    }
}

impl ProjectStore for FileProjectStore {
    fn create_track(
        &self,
        track: &TrackDescriptor,
        info: &StreamInfo,
    ) -> Result<Box<dyn TrackSink>, PipelineError> {
        let path = self.track_path(track);
        let file = File::create(&path)
            .map_err(|e| PipelineError::Storage(format!("create {:?}: {e}", path)))?;
        Ok(Box::new(FileTrackSink {
            writer: BufWriter::new(file),
            path,
            sidecar: TrackSidecar {
                serial: track.serial,
                label: track.label.clone(),
                codec: info.codec.clone(),
                sample_rate: info.sample_rate,
                channels: info.channels,
                frames: 0,
            },
        }))
    }
}

struct FileTrackSink {
    writer: BufWriter<File>,
    path: PathBuf,
    sidecar: TrackSidecar,
}

impl TrackSink for FileTrackSink {
    fn write_batch(&mut self, batch: &FrameBatch) -> Result<(), PipelineError> {
        // The decoded signal spec wins over whatever the container declared.
        self.sidecar.sample_rate = Some(batch.sample_rate);
        self.sidecar.channels = Some(batch.channels);
        for sample in &batch.samples {
            self.writer
                .write_all(&sample.to_le_bytes())
                .map_err(|e| PipelineError::Storage(format!("write {:?}: {e}", self.path)))?;
        }
        self.sidecar.frames += batch.frames();
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<u64, PipelineError> {
        self.writer
            .flush()
            .map_err(|e| PipelineError::Storage(format!("flush {:?}: {e}", self.path)))?;
        let sidecar_path = self.path.with_extension("json");
        let file = File::create(&sidecar_path)
            .map_err(|e| PipelineError::Storage(format!("create {:?}: {e}", sidecar_path)))?;
        serde_json::to_writer_pretty(file, &self.sidecar)
            .map_err(|e| PipelineError::Storage(format!("write {:?}: {e}", sidecar_path)))?;
        Ok(self.sidecar.frames)
    }
}

/// Keep names usable as single path components.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "_".to_string(),
        trimmed => trimmed.to_string(),
    }
}
