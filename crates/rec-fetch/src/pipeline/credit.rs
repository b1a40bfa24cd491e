//! Single-credit hand-off between the network side and the decoder.
//!
//! The decoder mints a [`Credit`] each time it runs dry ([`CreditReceiver::need_more`]); the
//! network side must spend that credit to deliver the next [`Feed`]. `Credit` is neither `Clone`
//! nor constructible outside this module, so at most one delivery can be outstanding and the
//! network side can never run ahead of the decoder.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::error::PipelineError;

/// Permission to deliver exactly one more feed to the decoder.
#[derive(Debug)]
pub struct Credit {
    _private: (),
}

/// Input delivered to the decoder.
#[derive(Debug, PartialEq, Eq)]
pub enum Feed {
    Chunk(Vec<u8>),
    /// Final bytes followed by the end-of-input marker.
    End(Vec<u8>),
}

/// What the decoder side reported after consuming input.
#[derive(Debug)]
pub enum Signal {
    NeedMore(Credit),
    /// Terminal: the decoder flushed everything (or failed). No further credits follow.
    Finished(Result<(), PipelineError>),
}

/// Create a connected sender/receiver pair.
///
/// The link starts disarmed: until [`CreditSender::arm`] is called, a decoder that runs dry gets
/// an `UnexpectedEof` instead of blocking. Probing runs on the network thread, so blocking there
/// would deadlock.
pub fn link() -> (CreditSender, CreditReceiver) {
    let (feed_tx, feed_rx) = bounded(1);
    let (signal_tx, signal_rx) = bounded(1);
    let armed = Arc::new(AtomicBool::new(false));
    (
        CreditSender {
            feed_tx,
            signal_rx,
            armed: armed.clone(),
        },
        CreditReceiver {
            feed_rx,
            signal_tx,
            armed,
        },
    )
}

/// Network-side end of the link.
pub struct CreditSender {
    feed_tx: Sender<Feed>,
    signal_rx: Receiver<Signal>,
    armed: Arc<AtomicBool>,
}

impl CreditSender {
    /// Allow the decoder to block waiting for input.
    pub fn arm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    /// Wait for the decoder's next signal.
    pub fn wait(&self) -> Signal {
        self.signal_rx.recv().unwrap_or_else(|_| {
            Signal::Finished(Err(PipelineError::Decode(
                "decoder exited without signalling completion".to_string(),
            )))
        })
    }

    /// Spend `credit` on `feed`, then wait until the decoder asks for more or finishes.
    pub fn deliver(&self, credit: Credit, feed: Feed) -> Signal {
        drop(credit);
        if self.feed_tx.send(feed).is_err() {
            tracing::debug!("decoder input closed before delivery");
        }
        self.wait()
    }
}

/// Decoder-side end of the link.
pub struct CreditReceiver {
    feed_rx: Receiver<Feed>,
    signal_tx: Sender<Signal>,
    armed: Arc<AtomicBool>,
}

impl CreditReceiver {
    /// Report that buffered input is exhausted and block until the next feed arrives.
    pub fn need_more(&self) -> io::Result<Feed> {
        if !self.armed.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "input exhausted before streaming started",
            ));
        }
        self.signal_tx
            .send(Signal::NeedMore(Credit { _private: () }))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "feeder went away"))?;
        self.feed_rx
            .recv()
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "feeder went away"))
    }

    /// Feeds delivered but not yet taken. Never above zero while the decoder is working.
    pub fn pending(&self) -> usize {
        self.feed_rx.len()
    }

    /// Handle for reporting terminal completion from the decode loop.
    pub fn completion(&self) -> Completion {
        Completion {
            signal_tx: self.signal_tx.clone(),
        }
    }
}

/// Sends the terminal [`Signal::Finished`].
pub struct Completion {
    signal_tx: Sender<Signal>,
}

impl Completion {
    pub fn finish(self, result: Result<(), PipelineError>) {
        let _ = self.signal_tx.send(Signal::Finished(result));
    }
}
