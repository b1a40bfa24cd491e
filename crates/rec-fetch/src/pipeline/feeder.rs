//! Network side of the credit protocol.
//!
//! After bootstrap the feeder waits for the decoder's first "need more", then alternates:
//! accumulate one chunk from the session, spend the credit on it, wait for the next credit.
//! At end of stream the remainder goes out with the end marker and the feeder waits for the
//! decoder's terminal completion.

use super::credit::{CreditSender, Feed, Signal};
use crate::error::PipelineError;
use crate::net::session::{ByteSource, Pulled};

/// Payload bytes accumulated per delivery.
pub const CHUNK_SIZE: usize = 1 << 20;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeedReport {
    pub deliveries: u64,
    pub bytes: u64,
}

/// Drive `sender` from `source` until the decoder finishes.
///
/// `bootstrap_ended` is set when the whole track already went out with the bootstrap window;
/// the decoder then owes only its completion. `on_delivery` runs after each delivery resolves.
pub fn run_feeder(
    source: &mut dyn ByteSource,
    sender: &CreditSender,
    bootstrap_ended: bool,
    chunk_size: usize,
    mut on_delivery: impl FnMut(&FeedReport),
) -> Result<FeedReport, PipelineError> {
    let mut report = FeedReport::default();
    if bootstrap_ended {
        return match sender.wait() {
            Signal::Finished(result) => result.map(|()| report),
            Signal::NeedMore(_) => Err(input_after_end()),
        };
    }

    let mut credit = match sender.wait() {
        Signal::NeedMore(credit) => credit,
        Signal::Finished(result) => return result.map(|()| report),
    };

    loop {
        let mut chunk: Vec<u8> = Vec::new();
        let mut end_of_stream = false;
        while chunk.len() < chunk_size {
            match source.pull() {
                Pulled::Chunk(bytes) if chunk.is_empty() => chunk = bytes,
                Pulled::Chunk(bytes) => chunk.extend_from_slice(&bytes),
                Pulled::EndOfStream => {
                    end_of_stream = true;
                    break;
                }
            }
        }

        report.deliveries += 1;
        report.bytes += chunk.len() as u64;
        let feed = if end_of_stream {
            Feed::End(chunk)
        } else {
            Feed::Chunk(chunk)
        };
        let signal = sender.deliver(credit, feed);
        on_delivery(&report);

        match signal {
            Signal::NeedMore(next) if !end_of_stream => credit = next,
            Signal::NeedMore(_) => return Err(input_after_end()),
            Signal::Finished(result) => {
                if !end_of_stream {
                    tracing::debug!(bytes = report.bytes, "decoder finished before end of stream");
                }
                return result.map(|()| report);
            }
        }
    }
}

fn input_after_end() -> PipelineError {
    PipelineError::Decode("decoder asked for input after end of stream".to_string())
}
