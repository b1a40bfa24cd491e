//! Per-track session: handshake, in-order consumption, acks, end-of-stream.

use std::collections::VecDeque;

use rec_fetch_types::{SessionState, TrackDescriptor};

use super::transport::{Connector, Transport};
use crate::error::{PipelineError, TransportError};
use crate::wire;

/// Where and as whom to log in. One value is shared by every lane.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionParams {
    /// WebSocket endpoint, e.g. `wss://host/panel/rec/ws`.
    pub url: String,
    pub session_id: u32,
    pub session_key: u32,
}

/// Result of pulling from a byte source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pulled {
    Chunk(Vec<u8>),
    EndOfStream,
}

/// Pull-style source of in-order payload bytes.
pub trait ByteSource {
    /// Block until the next in-order payload is available, or the stream ended.
    fn pull(&mut self) -> Pulled;
}

/// Protocol state for one track connection.
///
/// Inbound frames are queued in arrival order. [`TrackSession::pull`] scans the queue for the
/// frame carrying `expected_sequence` and discards everything else it passes over, so duplicates
/// and stale reorderings are dropped, never reordered forward. A sequence that never arrives
/// stalls `pull` until the socket closes.
pub struct TrackSession {
    transport: Box<dyn Transport>,
    serial: u32,
    state: SessionState,
    inbound: VecDeque<Vec<u8>>,
    expected_sequence: u32,
    socket_closed: bool,
    stream_error: Option<TransportError>,
    messages_consumed: u64,
    messages_discarded: u64,
    bytes_consumed: u64,
}

impl TrackSession {
    /// Connect, log in for `track`, and wait for the login ack.
    ///
    /// `on_state` observes every state transition, including the terminal `Failed`.
    pub fn open(
        connector: &dyn Connector,
        params: &SessionParams,
        track: &TrackDescriptor,
        mut on_state: impl FnMut(SessionState),
    ) -> Result<Self, PipelineError> {
        on_state(SessionState::Connecting);
        let mut transport = match connector.connect(&params.url) {
            Ok(t) => t,
            Err(e) => {
                on_state(SessionState::Failed);
                return Err(PipelineError::Connection(e));
            }
        };

        on_state(SessionState::Handshaking);
        match handshake(transport.as_mut(), params, track.serial) {
            Ok(()) => {}
            Err(e) => {
                transport.close();
                on_state(SessionState::Failed);
                return Err(e);
            }
        }

        tracing::debug!(serial = track.serial, "login accepted");
        on_state(SessionState::Streaming);
        Ok(Self {
            transport,
            serial: track.serial,
            state: SessionState::Streaming,
            inbound: VecDeque::new(),
            expected_sequence: 0,
            socket_closed: false,
            stream_error: None,
            messages_consumed: 0,
            messages_discarded: 0,
            bytes_consumed: 0,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn messages_consumed(&self) -> u64 {
        self.messages_consumed
    }

    pub fn messages_discarded(&self) -> u64 {
        self.messages_discarded
    }

    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed
    }

    /// Transport error observed after streaming began, if any. Such errors end the stream.
    pub fn take_stream_error(&mut self) -> Option<TransportError> {
        self.stream_error.take()
    }

    /// Decoder signalled end after the stream drained: close out normally.
    pub fn finish(&mut self) {
        self.transport.close();
        if !self.state.is_terminal() {
            self.state = SessionState::Closed;
        }
    }

    /// Tear the session down after a failure.
    pub fn fail(&mut self) {
        self.transport.close();
        self.state = SessionState::Failed;
    }

    /// Enter `Draining` only when data received before the close is still held for the
    /// consumer. A stream that closes with nothing delivered stays `Streaming` until `finish`.
    fn mark_socket_closed(&mut self) {
        self.socket_closed = true;
        let buffered = !self.inbound.is_empty() || self.messages_consumed > 0;
        if self.state == SessionState::Streaming && buffered {
            self.state = SessionState::Draining;
        }
    }

    /// Pop queued frames until the expected sequence is found; ack and return its payload.
    fn take_expected(&mut self) -> Option<Vec<u8>> {
        while let Some(mut frame) = self.inbound.pop_front() {
            let sequence = match wire::decode_data_message(&frame) {
                Ok(msg) => msg.sequence,
                Err(e) => {
                    tracing::warn!(
                        serial = self.serial,
                        error = %e,
                        "dropping malformed data message"
                    );
                    self.messages_discarded += 1;
                    continue;
                }
            };
            if sequence != self.expected_sequence {
                tracing::trace!(
                    serial = self.serial,
                    sequence,
                    expected = self.expected_sequence,
                    "discarding out-of-sequence message"
                );
                self.messages_discarded += 1;
                continue;
            }

            self.expected_sequence = self.expected_sequence.wrapping_add(1);
            // Best-effort: the server retransmits unacked data on its own timeout.
            if let Err(e) = self.transport.send(&wire::encode_ack(sequence)) {
                tracing::debug!(serial = self.serial, sequence, error = %e, "ack send failed");
            }

            frame.drain(..wire::SEQUENCE_LEN);
            self.messages_consumed += 1;
            self.bytes_consumed += frame.len() as u64;
            return Some(frame);
        }
        None
    }
}

impl ByteSource for TrackSession {
    fn pull(&mut self) -> Pulled {
        loop {
            if let Some(payload) = self.take_expected() {
                return Pulled::Chunk(payload);
            }
            if self.socket_closed {
                return Pulled::EndOfStream;
            }
            match self.transport.recv() {
                Ok(Some(frame)) => self.inbound.push_back(frame),
                Ok(None) => self.mark_socket_closed(),
                Err(e) => {
                    tracing::warn!(
                        serial = self.serial,
                        error = %e,
                        "transport error while streaming"
                    );
                    self.stream_error = Some(e);
                    self.mark_socket_closed();
                }
            }
        }
    }
}

impl Drop for TrackSession {
    fn drop(&mut self) {
        self.transport.close();
    }
}

fn handshake(
    transport: &mut dyn Transport,
    params: &SessionParams,
    serial: u32,
) -> Result<(), PipelineError> {
    let login = wire::encode_login(params.session_id, params.session_key, serial as i32);
    transport.send(&login).map_err(PipelineError::Connection)?;

    let reply = match transport.recv() {
        Ok(Some(frame)) => frame,
        Ok(None) => return Err(PipelineError::Connection(TransportError::Closed)),
        Err(e) => return Err(PipelineError::Connection(e)),
    };

    let ack = wire::decode_login_ack(&reply).map_err(|e| PipelineError::Handshake(e.to_string()))?;
    if !ack.is_accepted() {
        return Err(PipelineError::Handshake(format!(
            "status {} opcode {:#x}",
            ack.status, ack.opcode
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryConnector;
    use crate::wire::LoginAck;

    fn params() -> SessionParams {
        SessionParams {
            url: "ws://test/panel/rec/ws".to_string(),
            session_id: 42,
            session_key: 7,
        }
    }

    fn open_with(
        connector: &MemoryConnector,
        serial: u32,
    ) -> (Result<TrackSession, PipelineError>, Vec<SessionState>) {
        let mut states = Vec::new();
        let track = TrackDescriptor::new(serial, "t");
        let session = TrackSession::open(connector, &params(), &track, |s| states.push(s));
        (session, states)
    }

    #[test]
    fn open_sends_login_and_accepts_ack() {
        let (connector, server) = MemoryConnector::single();
        server.send(wire::encode_login_ack(LoginAck::ACCEPTED).to_vec());

        let (session, states) = open_with(&connector, 3);
        let session = session.expect("open");
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(
            states,
            vec![
                SessionState::Connecting,
                SessionState::Handshaking,
                SessionState::Streaming
            ]
        );

        let login = wire::decode_login(&server.recv().expect("login frame")).expect("login");
        assert_eq!(login.session_id, 42);
        assert_eq!(login.session_key, 7);
        assert_eq!(login.track_serial, 3);
    }

    #[test]
    fn mismatched_ack_opcode_fails_handshake_and_closes() {
        let (connector, server) = MemoryConnector::single();
        server.send(wire::encode_login_ack(LoginAck { status: 0, opcode: 0x12 }).to_vec());

        let (session, states) = open_with(&connector, 1);
        assert!(matches!(session, Err(PipelineError::Handshake(_))));
        assert_eq!(states.last(), Some(&SessionState::Failed));
        assert!(server.wait_client_closed());
    }

    #[test]
    fn short_ack_fails_handshake() {
        let (connector, server) = MemoryConnector::single();
        server.send(vec![0, 0, 0]);
        let (session, _) = open_with(&connector, 1);
        assert!(matches!(session, Err(PipelineError::Handshake(_))));
    }

    #[test]
    fn close_before_ack_is_connection_error() {
        let (connector, server) = MemoryConnector::single();
        server.close();
        let (session, _) = open_with(&connector, 1);
        assert!(matches!(session, Err(PipelineError::Connection(_))));
    }

    #[test]
    fn refused_connect_is_connection_error() {
        let connector = MemoryConnector::refusing();
        let (session, states) = open_with(&connector, 1);
        assert!(matches!(session, Err(PipelineError::Connection(_))));
        assert_eq!(states, vec![SessionState::Connecting, SessionState::Failed]);
    }

    #[test]
    fn duplicates_and_reorderings_yield_each_sequence_once_in_order() {
        let (connector, server) = MemoryConnector::single();
        server.send(wire::encode_login_ack(LoginAck::ACCEPTED).to_vec());
        for seq in [0u32, 0, 2, 1, 1, 2, 3] {
            server.send(wire::encode_data_message(seq, format!("p{seq}").as_bytes()));
        }
        server.close();

        let (session, _) = open_with(&connector, 1);
        let mut session = session.expect("open");
        let mut payloads = Vec::new();
        while let Pulled::Chunk(bytes) = session.pull() {
            payloads.push(String::from_utf8(bytes).expect("utf8"));
        }
        assert_eq!(payloads, vec!["p0", "p1", "p2", "p3"]);
        assert_eq!(session.messages_consumed(), 4);
        assert_eq!(session.messages_discarded(), 3);
        assert_eq!(session.state(), SessionState::Draining);

        let _login = server.recv().expect("login");
        let acks: Vec<u32> = (0..4)
            .map(|_| wire::decode_ack(&server.recv().expect("ack")).expect("ack frame"))
            .collect();
        assert_eq!(acks, vec![0, 1, 2, 3]);

        session.finish();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn pull_waits_for_late_messages() {
        let (connector, server) = MemoryConnector::single();
        server.send(wire::encode_login_ack(LoginAck::ACCEPTED).to_vec());
        let (session, _) = open_with(&connector, 1);
        let mut session = session.expect("open");

        let feeder = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            server.send(wire::encode_data_message(1, b"late-1"));
            server.send(wire::encode_data_message(0, b"late-0"));
            server.send(wire::encode_data_message(1, b"late-1"));
            server.close();
            server
        });

        assert_eq!(session.pull(), Pulled::Chunk(b"late-0".to_vec()));
        assert_eq!(session.pull(), Pulled::Chunk(b"late-1".to_vec()));
        assert_eq!(session.pull(), Pulled::EndOfStream);
        let _server = feeder.join().expect("server thread");
    }

    #[test]
    fn malformed_data_messages_are_dropped() {
        let (connector, server) = MemoryConnector::single();
        server.send(wire::encode_login_ack(LoginAck::ACCEPTED).to_vec());
        server.send(vec![0, 0]);
        server.send(wire::encode_data_message(0, b"ok"));
        server.close();

        let (session, _) = open_with(&connector, 1);
        let mut session = session.expect("open");
        assert_eq!(session.pull(), Pulled::Chunk(b"ok".to_vec()));
        assert_eq!(session.pull(), Pulled::EndOfStream);
        assert_eq!(session.messages_discarded(), 1);
    }

    #[test]
    fn empty_track_reaches_end_without_messages() {
        let (connector, server) = MemoryConnector::single();
        server.send(wire::encode_login_ack(LoginAck::ACCEPTED).to_vec());
        server.close();

        let (session, _) = open_with(&connector, 1);
        let mut session = session.expect("open");
        assert_eq!(session.pull(), Pulled::EndOfStream);
        assert_eq!(session.pull(), Pulled::EndOfStream);
        assert_eq!(session.messages_consumed(), 0);
        // Nothing was held for the decoder, so there is nothing to drain.
        assert_eq!(session.state(), SessionState::Streaming);
        session.finish();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn transport_error_after_streaming_ends_stream_and_is_recorded() {
        let (connector, server) = MemoryConnector::single();
        server.send(wire::encode_login_ack(LoginAck::ACCEPTED).to_vec());
        server.send(wire::encode_data_message(0, b"a"));
        server.fail("reset by peer");

        let (session, _) = open_with(&connector, 1);
        let mut session = session.expect("open");
        assert_eq!(session.pull(), Pulled::Chunk(b"a".to_vec()));
        assert_eq!(session.pull(), Pulled::EndOfStream);
        assert!(session.take_stream_error().is_some());
        drop(server);
    }
}
