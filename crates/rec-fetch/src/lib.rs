//! rec-fetch: concurrent multi-track download and streaming decode of server-side recordings.
//!
//! ## Pipeline
//! 1. **Manifest**: fetch the track list once, before any session opens.
//! 2. **Pool**: run up to N lanes; each lane drives one track session end to end.
//! 3. **Session**: log in over a WebSocket, consume data messages strictly in sequence, ack each.
//! 4. **Bootstrap**: buffer the first window and probe the container.
//! 5. **Feed**: hand further chunks to the track's decode thread, one per decoder request.
//!
//! The library only emits [`rec_fetch_types::PipelineEvent`]s; rendering is left to the binary.

pub mod cli;
pub mod config;
pub mod decode;
pub mod error;
pub mod manifest;
pub mod net;
pub mod pipeline;
pub mod runtime;
pub mod scheduler;
pub mod status;
pub mod storage;
pub mod wire;

#[cfg(test)]
pub(crate) mod testing;
