//! Binary wire codec for the recording download socket.
//!
//! All integers are little-endian. Frames:
//!
//! | Message   | Dir | Size  | Layout                                            |
//! |-----------|-----|-------|---------------------------------------------------|
//! | Login     | c→s | 16    | `0x11` u32, session id u32, key u32, serial i32  |
//! | Login ack | s→c | 8     | status u32 (0 = ok), opcode u32 (echoes `0x11`)  |
//! | Data      | s→c | 4 + N | sequence u32, payload                             |
//! | Ack       | c→s | 8     | `0` u32, sequence u32                             |

use crate::error::ProtocolError;

pub const LOGIN_OPCODE: u32 = 0x11;
pub const ACK_OPCODE: u32 = 0;

pub const LOGIN_LEN: usize = 16;
pub const LOGIN_ACK_LEN: usize = 8;
pub const ACK_LEN: usize = 8;
pub const SEQUENCE_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Login {
    pub session_id: u32,
    pub session_key: u32,
    pub track_serial: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginAck {
    pub status: u32,
    pub opcode: u32,
}

impl LoginAck {
    pub const ACCEPTED: LoginAck = LoginAck {
        status: 0,
        opcode: LOGIN_OPCODE,
    };

    pub fn is_accepted(&self) -> bool {
        self.status == 0 && self.opcode == LOGIN_OPCODE
    }
}

/// A sequenced data frame borrowing its payload from the received buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataMessage<'a> {
    pub sequence: u32,
    pub payload: &'a [u8],
}

pub fn encode_login(session_id: u32, session_key: u32, track_serial: i32) -> [u8; LOGIN_LEN] {
    let mut buf = [0u8; LOGIN_LEN];
    buf[0..4].copy_from_slice(&LOGIN_OPCODE.to_le_bytes());
    buf[4..8].copy_from_slice(&session_id.to_le_bytes());
    buf[8..12].copy_from_slice(&session_key.to_le_bytes());
    buf[12..16].copy_from_slice(&track_serial.to_le_bytes());
    buf
}

pub fn decode_login(bytes: &[u8]) -> Result<Login, ProtocolError> {
    require_len("login", bytes, LOGIN_LEN)?;
    let opcode = read_u32(bytes, 0);
    if opcode != LOGIN_OPCODE {
        return Err(ProtocolError::Opcode {
            what: "login",
            expected: LOGIN_OPCODE,
            found: opcode,
        });
    }
    Ok(Login {
        session_id: read_u32(bytes, 4),
        session_key: read_u32(bytes, 8),
        track_serial: read_u32(bytes, 12) as i32,
    })
}

pub fn encode_login_ack(ack: LoginAck) -> [u8; LOGIN_ACK_LEN] {
    let mut buf = [0u8; LOGIN_ACK_LEN];
    buf[0..4].copy_from_slice(&ack.status.to_le_bytes());
    buf[4..8].copy_from_slice(&ack.opcode.to_le_bytes());
    buf
}

/// Decode a login acknowledgement. Trailing bytes are ignored.
pub fn decode_login_ack(bytes: &[u8]) -> Result<LoginAck, ProtocolError> {
    require_len("login ack", bytes, LOGIN_ACK_LEN)?;
    Ok(LoginAck {
        status: read_u32(bytes, 0),
        opcode: read_u32(bytes, 4),
    })
}

pub fn encode_data_message(sequence: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SEQUENCE_LEN + payload.len());
    buf.extend_from_slice(&sequence.to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

pub fn decode_data_message(bytes: &[u8]) -> Result<DataMessage<'_>, ProtocolError> {
    require_len("data message", bytes, SEQUENCE_LEN)?;
    Ok(DataMessage {
        sequence: read_u32(bytes, 0),
        payload: &bytes[SEQUENCE_LEN..],
    })
}

pub fn encode_ack(sequence: u32) -> [u8; ACK_LEN] {
    let mut buf = [0u8; ACK_LEN];
    buf[0..4].copy_from_slice(&ACK_OPCODE.to_le_bytes());
    buf[4..8].copy_from_slice(&sequence.to_le_bytes());
    buf
}

/// Decode a client ack, returning the acknowledged sequence.
pub fn decode_ack(bytes: &[u8]) -> Result<u32, ProtocolError> {
    require_len("ack", bytes, ACK_LEN)?;
    let opcode = read_u32(bytes, 0);
    if opcode != ACK_OPCODE {
        return Err(ProtocolError::Opcode {
            what: "ack",
            expected: ACK_OPCODE,
            found: opcode,
        });
    }
    Ok(read_u32(bytes, 4))
}

fn require_len(what: &'static str, bytes: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if bytes.len() < expected {
        return Err(ProtocolError::Truncated {
            what,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(b)
}
