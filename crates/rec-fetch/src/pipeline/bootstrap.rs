//! Collect the initial window of a track and probe it.

use rec_fetch_types::StreamInfo;

use super::credit::CreditReceiver;
use crate::decode::{Container, Decoder, FeedReader};
use crate::error::PipelineError;
use crate::net::session::{ByteSource, Pulled};

/// Bytes buffered before the container probe.
pub const BOOTSTRAP_WINDOW: usize = 1 << 20;

pub struct Bootstrapped {
    pub container: Box<dyn Container>,
    pub info: StreamInfo,
    /// The session already reported end of stream; the window holds the whole track.
    pub end_of_stream: bool,
    pub bytes: usize,
}

/// Pull until `window` bytes are buffered or the stream ends, then open the decoder on them.
///
/// `receiver` must belong to a disarmed link, so a probe that wants more than the window fails
/// with [`PipelineError::DecodeInit`] rather than blocking the lane.
pub fn bootstrap(
    source: &mut dyn ByteSource,
    decoder: &dyn Decoder,
    receiver: CreditReceiver,
    window: usize,
) -> Result<Bootstrapped, PipelineError> {
    let mut buf: Vec<u8> = Vec::new();
    let mut end_of_stream = false;
    while buf.len() < window {
        match source.pull() {
            Pulled::Chunk(bytes) if buf.is_empty() => buf = bytes,
            Pulled::Chunk(bytes) => buf.extend_from_slice(&bytes),
            Pulled::EndOfStream => {
                end_of_stream = true;
                break;
            }
        }
    }

    let bytes = buf.len();
    tracing::debug!(bytes, end_of_stream, "bootstrap window collected");
    let container = decoder
        .open_from_buffer(FeedReader::new(buf, end_of_stream, receiver))
        .map_err(|e| match e {
            PipelineError::DecodeInit(_) => e,
            other => PipelineError::DecodeInit(other.to_string()),
        })?;
    let info = container.stream_info();
    Ok(Bootstrapped {
        container,
        info,
        end_of_stream,
        bytes,
    })
}
