//! Per-track download/decode wiring: session → bootstrap → feeder ⇄ decode thread → storage.

pub mod bootstrap;
pub mod credit;
pub mod feeder;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use rec_fetch_types::{LanePhase, TrackDescriptor, TrackResult};

use crate::decode::{Container, Decoder};
use crate::error::PipelineError;
use crate::net::session::{SessionParams, TrackSession};
use crate::net::transport::Connector;
use crate::scheduler::LaneWorker;
use crate::status::LaneReporter;
use crate::storage::{ProjectStore, TrackSink};
use bootstrap::{BOOTSTRAP_WINDOW, bootstrap};
use credit::Completion;
use feeder::{CHUNK_SIZE, run_feeder};

/// Buffer sizes for one track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineOptions {
    pub bootstrap_window: usize,
    pub chunk_size: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            bootstrap_window: BOOTSTRAP_WINDOW,
            chunk_size: CHUNK_SIZE,
        }
    }
}

/// Runs one track end to end on the calling (lane) thread.
pub struct TrackPipeline {
    connector: Arc<dyn Connector>,
    params: SessionParams,
    decoder: Arc<dyn Decoder>,
    store: Arc<dyn ProjectStore>,
    options: PipelineOptions,
}

struct Completed {
    messages: u64,
    bytes: u64,
    frames: u64,
}

impl TrackPipeline {
    pub fn new(
        connector: Arc<dyn Connector>,
        params: SessionParams,
        decoder: Arc<dyn Decoder>,
        store: Arc<dyn ProjectStore>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            connector,
            params,
            decoder,
            store,
            options,
        }
    }

    fn run_track(
        &self,
        track: &TrackDescriptor,
        lane: &mut LaneReporter,
    ) -> Result<Completed, PipelineError> {
        let mut session = TrackSession::open(self.connector.as_ref(), &self.params, track, |state| {
            lane.phase(state.into())
        })?;

        lane.phase(LanePhase::Bootstrapping);
        let (sender, receiver) = credit::link();
        let completion = receiver.completion();
        let boot = match bootstrap(
            &mut session,
            self.decoder.as_ref(),
            receiver,
            self.options.bootstrap_window,
        ) {
            Ok(boot) => boot,
            Err(e) => {
                session.fail();
                return Err(e);
            }
        };
        tracing::info!(
            lane = lane.lane(),
            serial = track.serial,
            codec = %boot.info.codec,
            rate = ?boot.info.sample_rate,
            bytes = boot.bytes,
            "stream opened"
        );
        lane.stream_opened(&boot.info);

        let sink = match self.store.create_track(track, &boot.info) {
            Ok(sink) => sink,
            Err(e) => {
                session.fail();
                return Err(e);
            }
        };

        let frames = Arc::new(AtomicU64::new(0));
        sender.arm();
        let decode = match spawn_decode_thread(
            track.serial,
            boot.container,
            sink,
            completion,
            frames.clone(),
        ) {
            Ok(handle) => handle,
            Err(e) => {
                session.fail();
                return Err(e);
            }
        };
        lane.phase(session.state().into());
        lane.progress(boot.bytes as u64, frames.load(Ordering::Relaxed));

        let bootstrap_bytes = boot.bytes as u64;
        let fed = run_feeder(
            &mut session,
            &sender,
            boot.end_of_stream,
            self.options.chunk_size,
            |report| {
                lane.progress(
                    bootstrap_bytes + report.bytes,
                    frames.load(Ordering::Relaxed),
                )
            },
        );
        // Unblocks a decoder still waiting for input after a feeder error.
        drop(sender);
        if decode.join().is_err() {
            session.fail();
            return Err(PipelineError::Decode("decode thread panicked".to_string()));
        }
        lane.phase(session.state().into());

        if let Err(e) = fed {
            session.fail();
            return Err(e);
        }
        if let Some(e) = session.take_stream_error() {
            session.fail();
            return Err(PipelineError::Connection(e));
        }
        session.finish();

        let completed = Completed {
            messages: session.messages_consumed(),
            bytes: session.bytes_consumed(),
            frames: frames.load(Ordering::Relaxed),
        };
        lane.progress(completed.bytes, completed.frames);
        Ok(completed)
    }
}

impl LaneWorker for TrackPipeline {
    fn run(&self, track: &TrackDescriptor, lane: &mut LaneReporter) -> TrackResult {
        match self.run_track(track, lane) {
            Ok(done) => {
                lane.phase(LanePhase::Done);
                tracing::info!(
                    lane = lane.lane(),
                    serial = track.serial,
                    messages = done.messages,
                    frames = done.frames,
                    "track complete"
                );
                TrackResult::Completed {
                    messages: done.messages,
                    bytes: done.bytes,
                    frames: done.frames,
                }
            }
            Err(e) => {
                tracing::warn!(
                    lane = lane.lane(),
                    serial = track.serial,
                    error = %e,
                    "track failed"
                );
                lane.failed(&e);
                TrackResult::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                }
            }
        }
    }
}

/// Decode `container` into `sink` on a dedicated thread, then report through `completion`.
fn spawn_decode_thread(
    serial: u32,
    container: Box<dyn Container>,
    sink: Box<dyn TrackSink>,
    completion: Completion,
    frames: Arc<AtomicU64>,
) -> Result<thread::JoinHandle<()>, PipelineError> {
    thread::Builder::new()
        .name(format!("decode-{serial}"))
        .spawn(move || {
            let result = decode_into(container, sink, &frames);
            if let Err(e) = &result {
                tracing::debug!(serial, error = %e, "decode loop ended with error");
            }
            completion.finish(result);
        })
        .map_err(|e| PipelineError::Decode(format!("spawn decode thread: {e}")))
}

fn decode_into(
    mut container: Box<dyn Container>,
    mut sink: Box<dyn TrackSink>,
    frames: &AtomicU64,
) -> Result<(), PipelineError> {
    while let Some(batch) = container.next_batch()? {
        sink.write_batch(&batch)?;
        frames.fetch_add(batch.frames(), Ordering::Relaxed);
    }
    // Release the input side before sealing storage.
    drop(container);
    let stored = sink.finish()?;
    frames.store(stored, Ordering::Relaxed);
    Ok(())
}
