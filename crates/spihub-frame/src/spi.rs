//! The asymmetric SPI frame pair.
//!
//! A single full-duplex exchange carries two unrelated frames: the host
//! shifts a request out while the device's previously-staged response shifts
//! in on the same clocks. The shared buffer is sized to whichever side needs
//! more room and zero-padded.
//!
//! Request, from byte 0:
//!
//! | off | size | field |
//! |-----|------|-------|
//! | 0   | 1    | target device id (0 = selection only) |
//! | 1   | 1    | next device id |
//! | 2   | 1    | command |
//! | 3   | 1    | channel id |
//! | 4   | 2    | payload length (LE) |
//! | 6   | L    | payload |
//!
//! Response, byte 0 is a bus-turnaround slot and is ignored:
//!
//! | off | size | field |
//! |-----|------|-------|
//! | 1   | 1    | device id |
//! | 2   | 1    | queued message count remaining on device |
//! | 3   | 2    | next advertised response length (LE) |
//! | 5   | 1    | command |
//! | 6   | 1    | channel id |
//! | 7   | 2    | payload length (LE) |
//! | 9   | L    | payload |

use bytes::Bytes;

use crate::error::WireError;

/// No command; the frame only carries addressing.
pub const SPI_CMD_NONE: u8 = 0;
/// Host-to-device application message.
pub const SPI_CMD_MSG_TO_DEVICE: u8 = 1;
/// Device-to-host application message.
pub const SPI_CMD_MSG_FROM_DEVICE: u8 = 2;

/// Request header length: everything before the payload.
pub const REQUEST_HEADER_LEN: usize = 6;
/// Response header length, counting the ignored turnaround byte.
pub const RESPONSE_HEADER_LEN: usize = 9;

/// One host-to-device request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiRequest<'a> {
    /// Addressed device, 0 for a selection-only frame.
    pub target: u8,
    /// The device expected to respond on the next transaction.
    pub next: u8,
    pub command: u8,
    pub channel: u8,
    pub payload: &'a [u8],
}

impl<'a> SpiRequest<'a> {
    /// A selection frame: no target, no payload, only the next-responder hint.
    pub fn selection(next: u8) -> Self {
        Self {
            target: 0,
            next,
            command: SPI_CMD_NONE,
            channel: 0,
            payload: &[],
        }
    }
}

/// One device-to-host response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiResponse {
    pub device_id: u8,
    /// Messages still queued on the device after this one.
    pub queued_count: u8,
    /// Length the device advertises for its next response frame.
    pub next_msg_len: u16,
    pub command: u8,
    pub channel: u8,
    /// Present only when the declared payload length is non-zero.
    pub payload: Option<Bytes>,
}

/// Encode a request into the shared full-duplex buffer.
///
/// The buffer is `max(tx_required, rx_required)` bytes, zero-filled past the
/// request. `tx_required = 6 + payload`; `rx_required = 9 +
/// expected_response_len` when a response is expected, else 0.
pub fn encode_request(req: &SpiRequest<'_>, expected_response_len: u16) -> Vec<u8> {
    let tx_required = REQUEST_HEADER_LEN + req.payload.len();
    let rx_required = if expected_response_len > 0 {
        RESPONSE_HEADER_LEN + expected_response_len as usize
    } else {
        0
    };

    let mut buf = vec![0u8; tx_required.max(rx_required)];
    buf[0] = req.target;
    buf[1] = req.next;
    buf[2] = req.command;
    buf[3] = req.channel;
    buf[4..6].copy_from_slice(&(req.payload.len() as u16).to_le_bytes());
    buf[REQUEST_HEADER_LEN..tx_required].copy_from_slice(req.payload);
    buf
}

/// Decode the request portion of an exchange buffer.
///
/// The broker never receives requests; this exists so tests and scripted
/// transceivers can assert what went onto the wire.
pub fn decode_request(buf: &[u8]) -> Result<(SpiRequest<'_>, u16), WireError> {
    if buf.len() < REQUEST_HEADER_LEN {
        return Err(WireError::MsgTooShort { len: buf.len() });
    }
    let declared = u16::from_le_bytes([buf[4], buf[5]]) as usize;
    let available = buf.len() - REQUEST_HEADER_LEN;
    if declared > available {
        return Err(WireError::MessageTruncated {
            declared,
            available,
        });
    }
    let req = SpiRequest {
        target: buf[0],
        next: buf[1],
        command: buf[2],
        channel: buf[3],
        payload: &buf[REQUEST_HEADER_LEN..REQUEST_HEADER_LEN + declared],
    };
    Ok((req, declared as u16))
}

/// Decode the response portion of an exchange buffer.
pub fn decode_response(buf: &[u8]) -> Result<SpiResponse, WireError> {
    if buf.len() < RESPONSE_HEADER_LEN {
        return Err(WireError::MsgTooShort { len: buf.len() });
    }

    let declared = u16::from_le_bytes([buf[7], buf[8]]) as usize;
    let available = buf.len() - RESPONSE_HEADER_LEN;
    if declared > available {
        return Err(WireError::MessageTruncated {
            declared,
            available,
        });
    }

    let payload = if declared > 0 {
        Some(Bytes::copy_from_slice(
            &buf[RESPONSE_HEADER_LEN..RESPONSE_HEADER_LEN + declared],
        ))
    } else {
        None
    };

    Ok(SpiResponse {
        device_id: buf[1],
        queued_count: buf[2],
        next_msg_len: u16::from_le_bytes([buf[3], buf[4]]),
        command: buf[5],
        channel: buf[6],
        payload,
    })
}

/// Write a response frame into the receive area of a buffer.
///
/// Test support for scripted transceivers: stages `resp` the way a device
/// would, starting at the turnaround byte.
pub fn encode_response_into(resp: &SpiResponse, buf: &mut [u8]) {
    let payload: &[u8] = resp.payload.as_deref().unwrap_or(&[]);
    buf[1] = resp.device_id;
    buf[2] = resp.queued_count;
    buf[3..5].copy_from_slice(&resp.next_msg_len.to_le_bytes());
    buf[5] = resp.command;
    buf[6] = resp.channel;
    buf[7..9].copy_from_slice(&(payload.len() as u16).to_le_bytes());
    buf[RESPONSE_HEADER_LEN..RESPONSE_HEADER_LEN + payload.len()].copy_from_slice(payload);
}
