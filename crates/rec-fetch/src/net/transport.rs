//! Message transport abstraction.
//!
//! A [`Transport`] carries whole binary messages in order. The production implementation is a
//! blocking WebSocket client; tests substitute an in-memory pair.

use std::net::TcpStream;

use tungstenite::Message;
use tungstenite::stream::MaybeTlsStream;

use crate::error::TransportError;

pub trait Transport: Send {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Block until the next binary message arrives. `Ok(None)` once the peer has closed.
    fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Close the connection. Idempotent.
    fn close(&mut self);
}

/// Opens one transport per track session.
pub trait Connector: Send + Sync {
    fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError>;
}

/// Blocking WebSocket connector (`ws://` or `wss://`).
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        let (socket, response) = tungstenite::connect(url)?;
        tracing::debug!(url, status = %response.status(), "websocket connected");
        if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
            stream.set_nodelay(true).ok(); // best-effort; not fatal
        }
        Ok(Box::new(WsTransport {
            socket,
            closed: false,
        }))
    }
}

struct WsTransport {
    socket: tungstenite::WebSocket<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

impl Transport for WsTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.socket.send(Message::Binary(frame.to_vec()))?;
        Ok(())
    }

    fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.closed {
            return Ok(None);
        }
        loop {
            match self.socket.read() {
                Ok(Message::Binary(data)) => return Ok(Some(data)),
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "websocket closed by peer");
                    self.closed = true;
                    self.flush_close_reply();
                    return Ok(None);
                }
                Ok(Message::Text(text)) => {
                    tracing::debug!(len = text.len(), "ignoring text message");
                }
                // Pings are answered by tungstenite on the next read/write.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    self.closed = true;
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.socket.close(None);
        self.flush_close_reply();
    }
}

impl WsTransport {
    /// Write out the queued close frame so the peer sees a completed closing handshake.
    fn flush_close_reply(&mut self) {
        match self.socket.flush() {
            Ok(()) => {}
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {}
            Err(e) => tracing::debug!(error = %e, "close frame flush failed"),
        }
    }
}
