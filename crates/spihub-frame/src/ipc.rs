//! The hub protocol, version 2.
//!
//! Every socket frame starts with `{ version: u8, command: u8 }`; multi-byte
//! integers are little-endian throughout.
//!
//! Inbound (client → broker), command 1: a `u16` count followed by that many
//! sub-records, each `preamble 0xA3, bus id, device id, channel, dedupe id
//! (u16), payload length (u16), payload`. A malformed sub-record aborts the
//! remainder of the frame; records decoded before it stand.
//!
//! Outbound (broker → client), command 2: `bus id, device id, channel,
//! dedupe id (u16, always 0)` then the raw payload to the end of the frame.
//!
//! Outbound bootstrap, command 100: a JSON document listing the detected
//! devices plus the host identity.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// The only protocol version this broker speaks.
pub const PROTOCOL_VERSION: u8 = 2;

/// Client → broker: a batch of messages bound for devices.
pub const CMD_MESSAGES_TO_DEVICES: u8 = 1;
/// Broker → client: one device-originated message.
pub const CMD_MESSAGE_FROM_DEVICE: u8 = 2;
/// Broker → client: the device-list bootstrap document.
pub const CMD_DEVICES_LIST: u8 = 100;

/// Guard byte opening every batch sub-record.
pub const MESSAGE_PREAMBLE: u8 = 0xA3;

const HEADER_LEN: usize = 2;
const SUB_RECORD_HEADER_LEN: usize = 8;
const FROM_DEVICE_HEADER_LEN: usize = 5;

/// One client message bound for a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceBoundMessage {
    pub bus_id: u8,
    pub device_id: u8,
    pub channel: u8,
    /// 0 means no deduplication.
    pub dedupe_id: u16,
    pub payload: Bytes,
}

/// One device-originated message on its way to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMessage {
    pub bus_id: u8,
    pub device_id: u8,
    pub channel: u8,
    pub payload: Bytes,
}

/// Split a frame into its command and body, validating the version.
pub fn parse_frame(frame: &[u8]) -> Result<(u8, &[u8]), WireError> {
    if frame.len() < HEADER_LEN {
        return Err(WireError::MsgTooShort { len: frame.len() });
    }
    if frame[0] != PROTOCOL_VERSION {
        return Err(WireError::Version { found: frame[0] });
    }
    Ok((frame[1], &frame[HEADER_LEN..]))
}

/// Iterator over the sub-records of an inbound batch body.
///
/// Yields `Err` for the first malformed sub-record and then fuses; the
/// caller keeps whatever it already consumed.
pub struct BatchIter<'a> {
    buf: &'a [u8],
    remaining: u16,
    poisoned: bool,
}

/// Begin decoding an inbound batch body (everything after the frame header).
pub fn decode_batch(body: &[u8]) -> Result<BatchIter<'_>, WireError> {
    if body.len() < 2 {
        return Err(WireError::MsgTooShort { len: body.len() });
    }
    let count = u16::from_le_bytes([body[0], body[1]]);
    Ok(BatchIter {
        buf: &body[2..],
        remaining: count,
        poisoned: false,
    })
}

impl BatchIter<'_> {
    fn next_record(&mut self) -> Result<DeviceBoundMessage, WireError> {
        if self.buf.len() < SUB_RECORD_HEADER_LEN {
            return Err(WireError::MsgTooShort { len: self.buf.len() });
        }
        if self.buf[0] != MESSAGE_PREAMBLE {
            return Err(WireError::Preamble { found: self.buf[0] });
        }
        let declared = u16::from_le_bytes([self.buf[6], self.buf[7]]) as usize;
        let available = self.buf.len() - SUB_RECORD_HEADER_LEN;
        if declared > available {
            return Err(WireError::MessageTruncated {
                declared,
                available,
            });
        }
        let msg = DeviceBoundMessage {
            bus_id: self.buf[1],
            device_id: self.buf[2],
            channel: self.buf[3],
            dedupe_id: u16::from_le_bytes([self.buf[4], self.buf[5]]),
            payload: Bytes::copy_from_slice(
                &self.buf[SUB_RECORD_HEADER_LEN..SUB_RECORD_HEADER_LEN + declared],
            ),
        };
        self.buf = &self.buf[SUB_RECORD_HEADER_LEN + declared..];
        Ok(msg)
    }
}

impl Iterator for BatchIter<'_> {
    type Item = Result<DeviceBoundMessage, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.poisoned || self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let result = self.next_record();
        if result.is_err() {
            self.poisoned = true;
        }
        Some(result)
    }
}

/// Encode an inbound batch frame (client side; the broker only decodes).
pub fn encode_batch(messages: &[DeviceBoundMessage]) -> Vec<u8> {
    let mut frame = vec![PROTOCOL_VERSION, CMD_MESSAGES_TO_DEVICES];
    frame.extend_from_slice(&(messages.len() as u16).to_le_bytes());
    for msg in messages {
        frame.push(MESSAGE_PREAMBLE);
        frame.push(msg.bus_id);
        frame.push(msg.device_id);
        frame.push(msg.channel);
        frame.extend_from_slice(&msg.dedupe_id.to_le_bytes());
        frame.extend_from_slice(&(msg.payload.len() as u16).to_le_bytes());
        frame.extend_from_slice(&msg.payload);
    }
    frame
}

/// Encode one device-originated message frame.
pub fn encode_device_message(msg: &DeviceMessage) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + FROM_DEVICE_HEADER_LEN + msg.payload.len());
    frame.push(PROTOCOL_VERSION);
    frame.push(CMD_MESSAGE_FROM_DEVICE);
    frame.push(msg.bus_id);
    frame.push(msg.device_id);
    frame.push(msg.channel);
    // Dedupe id is meaningless broker → client; always written as 0.
    frame.extend_from_slice(&0u16.to_le_bytes());
    frame.extend_from_slice(&msg.payload);
    frame
}

/// Decode a device-originated message body (client side).
pub fn decode_device_message(body: &[u8]) -> Result<DeviceMessage, WireError> {
    if body.len() < FROM_DEVICE_HEADER_LEN {
        return Err(WireError::MsgTooShort { len: body.len() });
    }
    Ok(DeviceMessage {
        bus_id: body[0],
        device_id: body[1],
        channel: body[2],
        payload: Bytes::copy_from_slice(&body[FROM_DEVICE_HEADER_LEN..]),
    })
}

/// Descriptive info for one detected device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub model: String,
    pub version: String,
}

/// One entry of the bootstrap document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEntry {
    pub bus_id: u8,
    pub device_id: u8,
    pub device_info: DeviceInfo,
}

/// The bootstrap document sent to every new client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicesList {
    pub devices: Vec<DeviceEntry>,
    pub serial_number: String,
    pub access_code: String,
}

/// Encode the bootstrap frame.
pub fn encode_devices_list(list: &DevicesList) -> Result<Vec<u8>, serde_json::Error> {
    let mut frame = vec![PROTOCOL_VERSION, CMD_DEVICES_LIST];
    serde_json::to_writer(&mut frame, list)?;
    Ok(frame)
}

/// Decode a bootstrap frame body (client side).
pub fn decode_devices_list(body: &[u8]) -> Result<DevicesList, serde_json::Error> {
    serde_json::from_slice(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message(device_id: u8, payload: &'static [u8]) -> DeviceBoundMessage {
        DeviceBoundMessage {
            bus_id: 0,
            device_id,
            channel: 4,
            dedupe_id: 0,
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn batch_roundtrip() {
        let messages = vec![sample_message(1, b"alpha"), sample_message(2, b"beta")];
        let frame = encode_batch(&messages);

        let (command, body) = parse_frame(&frame).unwrap();
        assert_eq!(command, CMD_MESSAGES_TO_DEVICES);

        let decoded: Vec<_> = decode_batch(body)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(decoded, messages);
    }

    #[test]
    fn bad_preamble_aborts_remainder() {
        let messages = vec![
            sample_message(1, b"first"),
            sample_message(2, b"second"),
            sample_message(3, b"third"),
        ];
        let mut frame = encode_batch(&messages);
        // Corrupt the second sub-record's preamble: header (2) + count (2) +
        // first record (8 + 5).
        frame[2 + 2 + 8 + 5] = 0x00;

        let (_, body) = parse_frame(&frame).unwrap();
        let mut iter = decode_batch(body).unwrap();

        assert_eq!(iter.next().unwrap().unwrap(), messages[0]);
        assert_eq!(
            iter.next().unwrap().unwrap_err(),
            WireError::Preamble { found: 0x00 }
        );
        assert!(iter.next().is_none(), "iterator must fuse after an error");
    }

    #[test]
    fn truncated_sub_record_rejected() {
        let mut frame = encode_batch(&[sample_message(1, b"payload")]);
        frame.truncate(frame.len() - 3);

        let (_, body) = parse_frame(&frame).unwrap();
        let err = decode_batch(body).unwrap().next().unwrap().unwrap_err();
        assert!(matches!(err, WireError::MessageTruncated { .. }));
    }

    #[test]
    fn version_one_rejected() {
        let frame = [1u8, CMD_MESSAGES_TO_DEVICES, 0, 0];
        let err = parse_frame(&frame).unwrap_err();
        assert_eq!(err, WireError::Version { found: 1 });
    }

    #[test]
    fn empty_frame_rejected() {
        assert_eq!(
            parse_frame(&[2u8]).unwrap_err(),
            WireError::MsgTooShort { len: 1 }
        );
    }

    #[test]
    fn dedupe_id_survives_batch_decode() {
        let msg = DeviceBoundMessage {
            dedupe_id: 0x1234,
            ..sample_message(1, b"x")
        };
        let frame = encode_batch(std::slice::from_ref(&msg));
        let (_, body) = parse_frame(&frame).unwrap();
        let decoded = decode_batch(body).unwrap().next().unwrap().unwrap();
        assert_eq!(decoded.dedupe_id, 0x1234);
    }

    #[test]
    fn device_message_roundtrip() {
        let msg = DeviceMessage {
            bus_id: 1,
            device_id: 3,
            channel: 9,
            payload: Bytes::from_static(b"reading"),
        };
        let frame = encode_device_message(&msg);

        let (command, body) = parse_frame(&frame).unwrap();
        assert_eq!(command, CMD_MESSAGE_FROM_DEVICE);
        // Dedupe field present but zeroed.
        assert_eq!(&body[3..5], &[0, 0]);

        let decoded = decode_device_message(body).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn empty_device_message_payload_allowed() {
        let msg = DeviceMessage {
            bus_id: 0,
            device_id: 1,
            channel: 0,
            payload: Bytes::new(),
        };
        let frame = encode_device_message(&msg);
        assert_eq!(frame.len(), 7);
    }

    #[test]
    fn devices_list_serializes_camel_case() {
        let list = DevicesList {
            devices: vec![DeviceEntry {
                bus_id: 0,
                device_id: 1,
                device_info: DeviceInfo {
                    model: "iron-pi-cm8".to_string(),
                    version: "1.0.0".to_string(),
                },
            }],
            serial_number: "SPF30001".to_string(),
            access_code: "c0ffee99".to_string(),
        };

        let frame = encode_devices_list(&list).unwrap();
        assert_eq!(&frame[..2], &[PROTOCOL_VERSION, CMD_DEVICES_LIST]);

        let json: serde_json::Value = serde_json::from_slice(&frame[2..]).unwrap();
        assert_eq!(json["devices"][0]["busId"], 0);
        assert_eq!(json["devices"][0]["deviceId"], 1);
        assert_eq!(json["devices"][0]["deviceInfo"]["model"], "iron-pi-cm8");
        assert_eq!(json["serialNumber"], "SPF30001");
        assert_eq!(json["accessCode"], "c0ffee99");

        assert_eq!(decode_devices_list(&frame[2..]).unwrap(), list);
    }
}
