//! Bounded download pool.
//!
//! Each lane slot runs at most one track at a time on its own OS thread. Whenever a lane frees,
//! the next unassigned track (manifest order) goes to it. Failed tracks are reported, never
//! retried, and never stop the other lanes.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::unbounded;
use rec_fetch_types::{
    FailureKind, PipelineEvent, PoolSummary, TrackDescriptor, TrackOutcome, TrackResult,
};

use crate::status::{LaneReporter, Reporter};

/// Work done by a lane for one track. Failures are part of the result, not a panic.
pub trait LaneWorker: Send + Sync {
    fn run(&self, track: &TrackDescriptor, lane: &mut LaneReporter) -> TrackResult;
}

#[derive(Default)]
struct LaneSlot {
    busy: bool,
    current: Option<TrackDescriptor>,
    handle: Option<thread::JoinHandle<()>>,
}

/// Default lane count: half the available parallelism, rounded up, at most 8.
pub fn default_lane_limit() -> usize {
    let cpus = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cpus.div_ceil(2).clamp(1, 8)
}

/// Run every track once with at most `limit` lanes busy. Blocks until all lanes are idle.
pub fn run_pool(
    tracks: &[TrackDescriptor],
    limit: usize,
    worker: Arc<dyn LaneWorker>,
    reporter: &Reporter,
) -> PoolSummary {
    let limit = limit.max(1);
    let (done_tx, done_rx) = unbounded::<(usize, TrackResult)>();
    let mut slots: Vec<LaneSlot> = (0..limit).map(|_| LaneSlot::default()).collect();
    let mut next = 0usize;
    let mut summary = PoolSummary::default();
    tracing::info!(tracks = tracks.len(), lanes = limit, "download pool starting");

    loop {
        for (lane, slot) in slots.iter_mut().enumerate() {
            if slot.busy || next >= tracks.len() {
                continue;
            }
            let track = tracks[next].clone();
            next += 1;
            slot.busy = true;
            slot.current = Some(track.clone());
            tracing::debug!(lane, serial = track.serial, "lane assigned");
            reporter.emit(PipelineEvent::LaneAssigned {
                lane,
                track: track.clone(),
            });

            let worker = worker.clone();
            let done = done_tx.clone();
            let mut lane_reporter = reporter.lane(lane, track.clone());
            let spawned = thread::Builder::new()
                .name(format!("lane-{lane}"))
                .spawn(move || {
                    let result = catch_unwind(AssertUnwindSafe(|| {
                        worker.run(&track, &mut lane_reporter)
                    }))
                    .unwrap_or_else(|_| {
                        lane_reporter.failed_with("lane panicked");
                        TrackResult::Failed {
                            kind: FailureKind::Decode,
                            message: "lane panicked".to_string(),
                        }
                    });
                    let _ = done.send((lane, result));
                });
            match spawned {
                Ok(handle) => slot.handle = Some(handle),
                Err(e) => {
                    let _ = done_tx.send((
                        lane,
                        TrackResult::Failed {
                            kind: FailureKind::Connection,
                            message: format!("spawn lane thread: {e}"),
                        },
                    ));
                }
            }
        }

        if slots.iter().all(|s| !s.busy) {
            break;
        }

        // First lane to finish wins.
        let Ok((lane, result)) = done_rx.recv() else {
            break;
        };
        let slot = &mut slots[lane];
        if let Some(handle) = slot.handle.take() {
            let _ = handle.join();
        }
        slot.busy = false;
        let Some(track) = slot.current.take() else {
            continue;
        };
        match &result {
            TrackResult::Completed { frames, .. } => {
                tracing::info!(lane, serial = track.serial, frames, "track finished")
            }
            TrackResult::Failed { kind, message } => {
                tracing::warn!(lane, serial = track.serial, ?kind, error = %message, "track failed")
            }
        }
        let outcome = TrackOutcome {
            lane,
            track,
            result,
        };
        reporter.emit(PipelineEvent::TrackFinished {
            outcome: outcome.clone(),
        });
        summary.outcomes.push(outcome);
    }

    tracing::info!(
        succeeded = summary.succeeded(),
        failed = summary.failed(),
        "download pool finished"
    );
    reporter.emit(PipelineEvent::PoolFinished {
        summary: summary.clone(),
    });
    summary
}
