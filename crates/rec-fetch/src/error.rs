//! Error taxonomy for the download/decode pipeline.
//!
//! Every per-lane failure is converted into a [`PipelineError`] at the lane boundary and from
//! there into a [`rec_fetch_types::TrackResult::Failed`]; none of them escape the scheduler.

use rec_fetch_types::FailureKind;
use thiserror::Error;

/// A wire message that could not be decoded.
///
/// Never fails a track on its own: malformed data messages are dropped by the session and a
/// malformed login ack becomes [`PipelineError::Handshake`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("{what} truncated: need {expected} bytes, got {actual}")]
    Truncated {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("unexpected opcode {found:#x} in {what} (expected {expected:#x})")]
    Opcode {
        what: &'static str,
        expected: u32,
        found: u32,
    },
}

/// Failure of the underlying message transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket: {0}")]
    WebSocket(#[from] Box<tungstenite::Error>),
    #[error("connection closed")]
    Closed,
    #[error("{0}")]
    Other(String),
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        TransportError::WebSocket(Box::new(err))
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Transport failed before or during the handshake.
    #[error("connection failed: {0}")]
    Connection(#[source] TransportError),
    /// Login ack was malformed or refused.
    #[error("handshake rejected: {0}")]
    Handshake(String),
    /// The decoder could not establish container/codec state from the bootstrap window.
    #[error("decoder init failed: {0}")]
    DecodeInit(String),
    #[error("decode failed: {0}")]
    Decode(String),
    /// The frame sink (project storage) refused decoded data.
    #[error("storage failed: {0}")]
    Storage(String),
    /// Startup failure before any track-specific state exists.
    #[error("manifest unavailable: {0}")]
    Manifest(String),
}

impl PipelineError {
    /// Classification used in track outcomes.
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Connection(_) | PipelineError::Manifest(_) => FailureKind::Connection,
            PipelineError::Handshake(_) => FailureKind::Handshake,
            PipelineError::DecodeInit(_) => FailureKind::DecodeInit,
            PipelineError::Decode(_) => FailureKind::Decode,
            PipelineError::Storage(_) => FailureKind::Storage,
        }
    }
}
