use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;
use rec_fetch_types::{LanePhase, LaneStatus, PipelineEvent, StreamInfo, TrackDescriptor};

use crate::error::PipelineError;

/// One status slot per lane. Each lane only ever writes its own slot; the last write wins.
#[derive(Debug, Default)]
pub struct ProgressBoard {
    lanes: Vec<LaneStatus>,
}

impl ProgressBoard {
    pub fn shared(lanes: usize) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            lanes: (0..lanes)
                .map(|lane| LaneStatus {
                    lane,
                    ..LaneStatus::default()
                })
                .collect(),
        }))
    }

    pub fn update(&mut self, status: LaneStatus) {
        if status.lane >= self.lanes.len() {
            self.lanes.resize_with(status.lane + 1, LaneStatus::default);
        }
        let lane = status.lane;
        self.lanes[lane] = status;
    }

    pub fn snapshot(&self) -> Vec<LaneStatus> {
        self.lanes.clone()
    }
}

/// Publishes pipeline events and keeps the board current.
#[derive(Clone)]
pub struct Reporter {
    board: Arc<Mutex<ProgressBoard>>,
    events: Option<Sender<PipelineEvent>>,
}

impl Reporter {
    pub fn new(board: Arc<Mutex<ProgressBoard>>, events: Option<Sender<PipelineEvent>>) -> Self {
        Self { board, events }
    }

    pub fn board(&self) -> &Arc<Mutex<ProgressBoard>> {
        &self.board
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.events {
            // Nobody listening is fine.
            let _ = tx.send(event);
        }
    }

    /// Handle for the lane now running `track`. Resets the lane's slot.
    pub fn lane(&self, lane: usize, track: TrackDescriptor) -> LaneReporter {
        LaneReporter {
            reporter: self.clone(),
            status: LaneStatus {
                lane,
                track: Some(track),
                ..LaneStatus::default()
            },
        }
    }
}

pub struct LaneReporter {
    reporter: Reporter,
    status: LaneStatus,
}

impl LaneReporter {
    pub fn lane(&self) -> usize {
        self.status.lane
    }

    pub fn status(&self) -> &LaneStatus {
        &self.status
    }

    pub fn phase(&mut self, phase: LanePhase) {
        if self.status.phase == phase {
            return;
        }
        self.status.phase = phase;
        self.publish();
    }

    pub fn progress(&mut self, bytes_received: u64, frames_decoded: u64) {
        self.status.bytes_received = bytes_received;
        self.status.frames_decoded = frames_decoded;
        self.publish();
    }

    pub fn stream_opened(&self, info: &StreamInfo) {
        let serial = self.status.track.as_ref().map(|t| t.serial).unwrap_or_default();
        self.reporter.emit(PipelineEvent::StreamOpened {
            lane: self.status.lane,
            serial,
            info: info.clone(),
        });
    }

    pub fn failed(&mut self, err: &PipelineError) {
        self.status.phase = LanePhase::Failed;
        self.status.error = Some(err.to_string());
        self.publish();
    }

    pub fn failed_with(&mut self, message: &str) {
        self.status.phase = LanePhase::Failed;
        self.status.error = Some(message.to_string());
        self.publish();
    }

    fn publish(&self) {
        if let Ok(mut board) = self.reporter.board.lock() {
            board.update(self.status.clone());
        }
        self.reporter.emit(PipelineEvent::LaneProgress {
            status: self.status.clone(),
        });
    }
}
