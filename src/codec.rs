// ABOUTME: Wire codec for the streaming protocol's packet body (version, command, payload)
// ABOUTME: Pure and stateless; framing (length discovery) lives one layer below, in frame.rs

use crate::error::CodecError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::TryFromPrimitive;
use std::io::Cursor;

/// The single protocol version this server understands.
pub const PROTOCOL_VERSION: u32 = 1;

/// Command identifiers, bit-exact with the source protocol for wire compatibility.
#[derive(TryFromPrimitive, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommandId {
    OkStreamingResponse = 100,
    ErrorStreamingResponse = 101,
    IsNotStartedResponse = 102,

    StartStreaming = 200,
    EndStreaming = 201,
    RestoreStreaming = 202,
    StreamingData = 203,

    StartLiveStreamViewing = 300,

    StartFileStreamViewing = 400,
}

/// A decoded packet body: every request or response the server exchanges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    StartStreaming { stream_id: String },
    EndStreaming { stream_id: String },
    RestoreStreaming,
    StreamingData { chunk_index: u32, data: Bytes },
    StartLiveStreamViewing { stream_id: String },
    StartFileStreamViewing,
    OkStreamingResponse,
    ErrorStreamingResponse { message: String },
    IsNotStartedResponse,
}

impl Message {
    pub fn command_id(&self) -> CommandId {
        match self {
            Message::StartStreaming { .. } => CommandId::StartStreaming,
            Message::EndStreaming { .. } => CommandId::EndStreaming,
            Message::RestoreStreaming => CommandId::RestoreStreaming,
            Message::StreamingData { .. } => CommandId::StreamingData,
            Message::StartLiveStreamViewing { .. } => CommandId::StartLiveStreamViewing,
            Message::StartFileStreamViewing => CommandId::StartFileStreamViewing,
            Message::OkStreamingResponse => CommandId::OkStreamingResponse,
            Message::ErrorStreamingResponse { .. } => CommandId::ErrorStreamingResponse,
            Message::IsNotStartedResponse => CommandId::IsNotStartedResponse,
        }
    }

    /// Encode this message as a packet body: `version, command, payload`.
    ///
    /// The caller (the session's framer) is responsible for prefixing the
    /// result with a 4-byte length; this layer never touches framing.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32_le(PROTOCOL_VERSION);
        buf.put_u32_le(self.command_id() as u32);

        match self {
            Message::StartStreaming { stream_id } | Message::StartLiveStreamViewing { stream_id } => {
                encode_string(&mut buf, stream_id);
            }
            Message::EndStreaming { stream_id } => {
                encode_string(&mut buf, stream_id);
            }
            Message::StreamingData { chunk_index, data } => {
                buf.put_u32_le(*chunk_index);
                buf.put_u32_le(data.len() as u32);
                buf.put_slice(data);
            }
            Message::ErrorStreamingResponse { message } => {
                encode_string(&mut buf, message);
            }
            Message::RestoreStreaming
            | Message::StartFileStreamViewing
            | Message::OkStreamingResponse
            | Message::IsNotStartedResponse => {}
        }

        buf.freeze()
    }

    /// Decode a packet body (the bytes after the frame's length prefix).
    pub fn decode(body: &[u8]) -> Result<Self, CodecError> {
        let mut cur = Cursor::new(body);

        let version = decode_u32(&mut cur, "version")?;
        if version != PROTOCOL_VERSION {
            return Err(CodecError::VersionMismatch(version));
        }

        let command = decode_u32(&mut cur, "command")?;
        let command_id =
            CommandId::try_from(command).map_err(|_| CodecError::UnknownCommand(command))?;

        let message = match command_id {
            CommandId::StartStreaming => Message::StartStreaming {
                stream_id: decode_string(&mut cur, "stream_id")?,
            },
            CommandId::EndStreaming => Message::EndStreaming {
                stream_id: decode_string(&mut cur, "stream_id")?,
            },
            CommandId::RestoreStreaming => Message::RestoreStreaming,
            CommandId::StreamingData => {
                let chunk_index = decode_u32(&mut cur, "chunk_index")?;
                let data_len = decode_u32(&mut cur, "data_len")? as usize;
                if cur.remaining() < data_len {
                    return Err(CodecError::ShortPayload("data"));
                }
                let data = Bytes::copy_from_slice(&cur.chunk()[..data_len]);
                cur.advance(data_len);
                Message::StreamingData { chunk_index, data }
            }
            CommandId::StartLiveStreamViewing => Message::StartLiveStreamViewing {
                stream_id: decode_string(&mut cur, "stream_id")?,
            },
            CommandId::StartFileStreamViewing => Message::StartFileStreamViewing,
            CommandId::OkStreamingResponse => Message::OkStreamingResponse,
            CommandId::ErrorStreamingResponse => Message::ErrorStreamingResponse {
                message: decode_string(&mut cur, "message")?,
            },
            CommandId::IsNotStartedResponse => Message::IsNotStartedResponse,
        };

        Ok(message)
    }
}

fn decode_u32(cur: &mut Cursor<&[u8]>, field: &'static str) -> Result<u32, CodecError> {
    if cur.remaining() < 4 {
        return Err(CodecError::ShortPayload(field));
    }
    Ok(cur.get_u32_le())
}

fn decode_string(cur: &mut Cursor<&[u8]>, field: &'static str) -> Result<String, CodecError> {
    let len = decode_u32(cur, field)? as usize;
    if cur.remaining() < len {
        return Err(CodecError::ShortPayload(field));
    }
    let bytes = cur.chunk()[..len].to_vec();
    cur.advance(len);
    String::from_utf8(bytes).map_err(|_| CodecError::ShortPayload(field))
}

fn encode_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_start_streaming() {
        let msg = Message::StartStreaming {
            stream_id: "STREAM_ID_1".to_string(),
        };
        let encoded = msg.encode();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn round_trips_streaming_data() {
        let msg = Message::StreamingData {
            chunk_index: 42,
            data: Bytes::from_static(&[0xAA, 0xEE, 0xAA]),
        };
        let encoded = msg.encode();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn round_trips_error_response() {
        let msg = Message::ErrorStreamingResponse {
            message: "session already running".to_string(),
        };
        let encoded = msg.encode();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn round_trips_empty_payload_responses() {
        for msg in [Message::OkStreamingResponse, Message::IsNotStartedResponse] {
            let encoded = msg.encode();
            let decoded = Message::decode(&encoded).unwrap();
            assert_eq!(msg, decoded);
        }
    }

    #[test]
    fn rejects_version_mismatch() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(2);
        buf.put_u32_le(CommandId::OkStreamingResponse as u32);
        let err = Message::decode(&buf).unwrap_err();
        assert!(matches!(err, CodecError::VersionMismatch(2)));
    }

    #[test]
    fn rejects_unknown_command() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(PROTOCOL_VERSION);
        buf.put_u32_le(999);
        let err = Message::decode(&buf).unwrap_err();
        assert!(matches!(err, CodecError::UnknownCommand(999)));
    }

    #[test]
    fn rejects_short_payload() {
        // Only the header, no stream_id length prefix for START_STREAMING.
        let mut buf = BytesMut::new();
        buf.put_u32_le(PROTOCOL_VERSION);
        buf.put_u32_le(CommandId::StartStreaming as u32);
        let err = Message::decode(&buf).unwrap_err();
        assert!(matches!(err, CodecError::ShortPayload(_)));
    }

    #[test]
    fn minimum_frame_body_is_short_payload_for_command() {
        // L = 8 at the frame layer means a 4-byte body here: room for a
        // valid version but not a command.
        let err = Message::decode(&[1, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, CodecError::ShortPayload("command")));
    }
}
