use serde::{Deserialize, Serialize};

/// One track listed in the recording manifest.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TrackDescriptor {
    /// Server-side track serial, starting at 1.
    pub serial: u32,
    /// Speaker nickname from the manifest (may be empty).
    pub label: String,
}

impl TrackDescriptor {
    pub fn new(serial: u32, label: impl Into<String>) -> Self {
        Self {
            serial,
            label: label.into(),
        }
    }

    /// Display/storage name, `"<serial>-<label>"`, or just the serial when unlabeled.
    pub fn display_name(&self) -> String {
        if self.label.is_empty() {
            self.serial.to_string()
        } else {
            format!("{}-{}", self.serial, self.label)
        }
    }
}

/// Protocol state of a single track connection.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Handshaking,
    Streaming,
    /// The socket closed; buffered input is still being consumed.
    Draining,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

/// Coarse phase of a lane, as shown on the progress board.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LanePhase {
    #[default]
    Idle,
    Connecting,
    Handshaking,
    /// Collecting the initial window before the container probe.
    Bootstrapping,
    Streaming,
    Draining,
    Done,
    Failed,
}

impl From<SessionState> for LanePhase {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::Connecting => LanePhase::Connecting,
            SessionState::Handshaking => LanePhase::Handshaking,
            SessionState::Streaming => LanePhase::Streaming,
            SessionState::Draining => LanePhase::Draining,
            SessionState::Closed => LanePhase::Done,
            SessionState::Failed => LanePhase::Failed,
        }
    }
}

/// Per-lane progress snapshot. Writers overwrite their own slot.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaneStatus {
    pub lane: usize,
    pub track: Option<TrackDescriptor>,
    pub phase: LanePhase,
    /// Payload bytes consumed from the session so far.
    pub bytes_received: u64,
    /// Decoded sample-frames handed to storage so far.
    pub frames_decoded: u64,
    pub error: Option<String>,
}

/// Container/codec information established by the probe.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamInfo {
    /// Short codec name (for example `vorbis`, `flac`).
    pub codec: String,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    /// Total frames, when the container declares them.
    pub n_frames: Option<u64>,
}

/// Which stage of the pipeline rejected a track.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Connection,
    Handshake,
    DecodeInit,
    Decode,
    Storage,
}

/// Final result for one track.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TrackResult {
    Completed {
        messages: u64,
        bytes: u64,
        frames: u64,
    },
    Failed {
        kind: FailureKind,
        message: String,
    },
}

impl TrackResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TrackResult::Completed { .. })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackOutcome {
    pub lane: usize,
    pub track: TrackDescriptor,
    pub result: TrackResult,
}

/// Pool-wide completion report, in completion order.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolSummary {
    pub outcomes: Vec<TrackOutcome>,
}

impl PoolSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn outcome_for(&self, serial: u32) -> Option<&TrackOutcome> {
        self.outcomes.iter().find(|o| o.track.serial == serial)
    }
}

/// Structured events emitted by the pipeline. Rendering is left to the consumer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineEvent {
    LaneAssigned {
        lane: usize,
        track: TrackDescriptor,
    },
    LaneProgress {
        status: LaneStatus,
    },
    StreamOpened {
        lane: usize,
        serial: u32,
        info: StreamInfo,
    },
    TrackFinished {
        outcome: TrackOutcome,
    },
    PoolFinished {
        summary: PoolSummary,
    },
}
