//! In-memory test doubles: transport, scripted server, stub decoder, memory store.

use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use rec_fetch_types::{StreamInfo, TrackDescriptor};

use crate::decode::{Container, Decoder, FeedReader, FrameBatch};
use crate::error::{PipelineError, TransportError};
use crate::net::session::{ByteSource, Pulled};
use crate::net::transport::{Connector, Transport};
use crate::storage::{ProjectStore, TrackSink};
use crate::wire::{self, LoginAck};

const WAIT: Duration = Duration::from_secs(5);

enum ServerFrame {
    Message(Vec<u8>),
    Error(String),
}

/// Client end of an in-memory connection.
pub(crate) struct MemoryTransport {
    inbound: Receiver<ServerFrame>,
    outbound: Option<Sender<Vec<u8>>>,
}

impl Transport for MemoryTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let tx = self.outbound.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame.to_vec()).map_err(|_| TransportError::Closed)
    }

    fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.outbound.is_none() {
            return Ok(None);
        }
        match self.inbound.recv() {
            Ok(ServerFrame::Message(frame)) => Ok(Some(frame)),
            Ok(ServerFrame::Error(msg)) => Err(TransportError::Other(msg)),
            Err(_) => Ok(None),
        }
    }

    fn close(&mut self) {
        self.outbound = None;
    }
}

/// Server end of an in-memory connection.
pub(crate) struct MemoryServer {
    to_client: Mutex<Option<Sender<ServerFrame>>>,
    from_client: Receiver<Vec<u8>>,
}

impl MemoryServer {
    pub(crate) fn send(&self, frame: Vec<u8>) {
        if let Some(tx) = self.to_client.lock().unwrap().as_ref() {
            let _ = tx.send(ServerFrame::Message(frame));
        }
    }

    /// Inject a transport error; the connection is unusable afterwards.
    pub(crate) fn fail(&self, msg: &str) {
        if let Some(tx) = self.to_client.lock().unwrap().take() {
            let _ = tx.send(ServerFrame::Error(msg.to_string()));
        }
    }

    pub(crate) fn close(&self) {
        self.to_client.lock().unwrap().take();
    }

    /// Next frame from the client, or `None` once the client closed and nothing is queued.
    pub(crate) fn recv(&self) -> Option<Vec<u8>> {
        self.from_client.recv_timeout(WAIT).ok()
    }

    /// Drain queued frames and report whether the client has closed its end.
    pub(crate) fn wait_client_closed(&self) -> bool {
        loop {
            match self.from_client.recv_timeout(WAIT) {
                Ok(_) => continue,
                Err(RecvTimeoutError::Disconnected) => return true,
                Err(RecvTimeoutError::Timeout) => return false,
            }
        }
    }
}

pub(crate) fn memory_pair() -> (MemoryTransport, MemoryServer) {
    let (to_client_tx, to_client_rx) = unbounded();
    let (from_client_tx, from_client_rx) = unbounded();
    (
        MemoryTransport {
            inbound: to_client_rx,
            outbound: Some(from_client_tx),
        },
        MemoryServer {
            to_client: Mutex::new(Some(to_client_tx)),
            from_client: from_client_rx,
        },
    )
}

/// Hands out a single pre-built connection.
pub(crate) struct MemoryConnector {
    transport: Mutex<Option<MemoryTransport>>,
}

impl MemoryConnector {
    pub(crate) fn single() -> (Self, MemoryServer) {
        let (transport, server) = memory_pair();
        (
            Self {
                transport: Mutex::new(Some(transport)),
            },
            server,
        )
    }

    pub(crate) fn refusing() -> Self {
        Self {
            transport: Mutex::new(None),
        }
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, _url: &str) -> Result<Box<dyn Transport>, TransportError> {
        match self.transport.lock().unwrap().take() {
            Some(t) => Ok(Box::new(t)),
            None => Err(TransportError::Other("connection refused".to_string())),
        }
    }
}

/// What the scripted server does for one track serial.
#[derive(Clone, Debug)]
pub(crate) enum Script {
    /// Reply with this login ack, then hang up.
    Reject(LoginAck),
    /// Accept, send the payloads with sequences 0.., then close.
    Serve(Vec<Vec<u8>>),
    /// Like `Serve`, but sequences are sent exactly as given.
    ServeRaw(Vec<(u32, Vec<u8>)>),
}

/// Spawns one fake server thread per connection and records logins/acks.
#[derive(Clone, Default)]
pub(crate) struct ScriptedConnector {
    scripts: Arc<HashMap<u32, Script>>,
    logins: Arc<Mutex<Vec<u32>>>,
    acks: Arc<Mutex<HashMap<u32, Vec<u32>>>>,
    hung_up: Arc<Mutex<Vec<u32>>>,
    refuse: bool,
}

impl ScriptedConnector {
    pub(crate) fn new(scripts: impl IntoIterator<Item = (u32, Script)>) -> Self {
        Self {
            scripts: Arc::new(scripts.into_iter().collect()),
            ..Self::default()
        }
    }

    pub(crate) fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub(crate) fn logins(&self) -> Vec<u32> {
        self.logins.lock().unwrap().clone()
    }

    /// Acks the client sent for `serial`, once its server thread saw the client hang up.
    pub(crate) fn acks_for(&self, serial: u32) -> Vec<u32> {
        let deadline = std::time::Instant::now() + WAIT;
        while !self.hung_up.lock().unwrap().contains(&serial)
            && std::time::Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(5));
        }
        self.acks
            .lock()
            .unwrap()
            .get(&serial)
            .cloned()
            .unwrap_or_default()
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, _url: &str) -> Result<Box<dyn Transport>, TransportError> {
        if self.refuse {
            return Err(TransportError::Other("connection refused".to_string()));
        }
        let (transport, server) = memory_pair();
        let scripts = self.scripts.clone();
        let logins = self.logins.clone();
        let acks = self.acks.clone();
        let hung_up = self.hung_up.clone();
        thread::spawn(move || {
            let Some(login) = server.recv().and_then(|f| wire::decode_login(&f).ok()) else {
                server.close();
                return;
            };
            let serial = login.track_serial as u32;
            logins.lock().unwrap().push(serial);

            match scripts.get(&serial).cloned() {
                Some(Script::Reject(ack)) => {
                    server.send(wire::encode_login_ack(ack).to_vec());
                    server.close();
                    return;
                }
                Some(Script::Serve(payloads)) => {
                    server.send(wire::encode_login_ack(LoginAck::ACCEPTED).to_vec());
                    for (seq, payload) in payloads.iter().enumerate() {
                        server.send(wire::encode_data_message(seq as u32, payload));
                    }
                }
                Some(Script::ServeRaw(messages)) => {
                    server.send(wire::encode_login_ack(LoginAck::ACCEPTED).to_vec());
                    for (seq, payload) in &messages {
                        server.send(wire::encode_data_message(*seq, payload));
                    }
                }
                None => {
                    server.send(wire::encode_login_ack(LoginAck::ACCEPTED).to_vec());
                }
            }
            server.close();

            while let Some(frame) = server.recv() {
                if let Ok(seq) = wire::decode_ack(&frame) {
                    acks.lock().unwrap().entry(serial).or_default().push(seq);
                }
            }
            hung_up.lock().unwrap().push(serial);
        });
        Ok(Box::new(transport))
    }
}

/// What the stub decoder saw for one opened stream.
#[derive(Debug, Default, Clone)]
pub(crate) struct StubRecord {
    pub(crate) bootstrap_len: usize,
    pub(crate) bytes_read: u64,
    pub(crate) feeds: u64,
    pub(crate) end_of_input: bool,
    /// Reads that found a second delivery already queued.
    pub(crate) overlapping_feeds: usize,
}

/// Treats every input byte as one mono sample. Bootstrap windows starting with `BAD` fail init.
#[derive(Clone, Default)]
pub(crate) struct StubDecoder {
    records: Arc<Mutex<Vec<Arc<Mutex<StubRecord>>>>>,
    read_size: usize,
}

impl StubDecoder {
    pub(crate) fn new() -> Self {
        Self::with_read_size(4096)
    }

    pub(crate) fn with_read_size(read_size: usize) -> Self {
        Self {
            records: Arc::default(),
            read_size,
        }
    }

    pub(crate) fn records(&self) -> Vec<StubRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.lock().unwrap().clone())
            .collect()
    }
}

impl Decoder for StubDecoder {
    fn open_from_buffer(&self, reader: FeedReader) -> Result<Box<dyn Container>, PipelineError> {
        if reader.buffered().starts_with(b"BAD") {
            return Err(PipelineError::DecodeInit("stub: bad header".to_string()));
        }
        let record = Arc::new(Mutex::new(StubRecord {
            bootstrap_len: reader.buffered().len(),
            ..StubRecord::default()
        }));
        self.records.lock().unwrap().push(record.clone());
        Ok(Box::new(StubContainer {
            reader,
            record,
            buf: vec![0; self.read_size.max(1)],
        }))
    }
}

struct StubContainer {
    reader: FeedReader,
    record: Arc<Mutex<StubRecord>>,
    buf: Vec<u8>,
}

impl Container for StubContainer {
    fn stream_info(&self) -> StreamInfo {
        StreamInfo {
            codec: "stub".to_string(),
            sample_rate: Some(8_000),
            channels: Some(1),
            n_frames: None,
        }
    }

    fn next_batch(&mut self) -> Result<Option<FrameBatch>, PipelineError> {
        let n = self
            .reader
            .read(&mut self.buf)
            .map_err(|e| PipelineError::Decode(e.to_string()))?;
        let mut record = self.record.lock().unwrap();
        record.feeds = self.reader.feeds_received();
        if self.reader.pending_feeds() > 0 {
            record.overlapping_feeds += 1;
        }
        if n == 0 {
            record.end_of_input = true;
            return Ok(None);
        }
        record.bytes_read += n as u64;
        Ok(Some(FrameBatch {
            samples: self.buf[..n].iter().map(|b| *b as f32).collect(),
            channels: 1,
            sample_rate: 8_000,
        }))
    }
}

/// Collects frames per track in memory.
#[derive(Clone, Default)]
pub(crate) struct MemoryStore {
    tracks: Arc<Mutex<HashMap<u32, Vec<f32>>>>,
    finished: Arc<Mutex<Vec<u32>>>,
}

impl MemoryStore {
    pub(crate) fn samples(&self, serial: u32) -> Vec<f32> {
        self.tracks
            .lock()
            .unwrap()
            .get(&serial)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn finished(&self) -> Vec<u32> {
        self.finished.lock().unwrap().clone()
    }
}

impl ProjectStore for MemoryStore {
    fn create_track(
        &self,
        track: &TrackDescriptor,
        _info: &StreamInfo,
    ) -> Result<Box<dyn TrackSink>, PipelineError> {
        self.tracks.lock().unwrap().insert(track.serial, Vec::new());
        Ok(Box::new(MemorySink {
            serial: track.serial,
            store: self.clone(),
            frames: 0,
        }))
    }
}

struct MemorySink {
    serial: u32,
    store: MemoryStore,
    frames: u64,
}

impl TrackSink for MemorySink {
    fn write_batch(&mut self, batch: &FrameBatch) -> Result<(), PipelineError> {
        self.frames += batch.frames();
        self.store
            .tracks
            .lock()
            .unwrap()
            .entry(self.serial)
            .or_default()
            .extend_from_slice(&batch.samples);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<u64, PipelineError> {
        self.store.finished.lock().unwrap().push(self.serial);
        Ok(self.frames)
    }
}

/// Byte source replaying fixed chunks, then end of stream. Counts pulls.
pub(crate) struct QueueSource {
    chunks: VecDeque<Vec<u8>>,
    pub(crate) pulls: usize,
}

impl QueueSource {
    pub(crate) fn new(chunks: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into_iter().collect(),
            pulls: 0,
        }
    }
}

impl ByteSource for QueueSource {
    fn pull(&mut self) -> Pulled {
        self.pulls += 1;
        match self.chunks.pop_front() {
            Some(c) => Pulled::Chunk(c),
            None => Pulled::EndOfStream,
        }
    }
}
