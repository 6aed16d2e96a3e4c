use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Protocol version sent in the handshake; servers answer status
/// requests regardless of the version they actually speak.
pub const PROTOCOL_VERSION: i32 = 47;

/// Handshake `next_state` selecting the status flow
const NEXT_STATE_STATUS: i32 = 1;

pub const HANDSHAKE_ID: i32 = 0x00;
pub const STATUS_ID: i32 = 0x00;

/// Upper bound on a single frame, favicons included
pub const MAX_FRAME_LEN: usize = 2 * 1024 * 1024;

const MAX_VARINT_LEN: usize = 5;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid status JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ProbeResult<T> = Result<T, ProbeError>;

/// Body of the status response
#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub players: Option<Players>,
    #[serde(default)]
    pub favicon: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Players {
    pub online: u32,
}

/// Append a VarInt (LEB128 over the two's-complement bits)
pub fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut rest = value as u32;
    loop {
        if rest & !0x7F == 0 {
            buf.push(rest as u8);
            return;
        }
        buf.push((rest & 0x7F) as u8 | 0x80);
        rest >>= 7;
    }
}

/// Decode a VarInt from the front of `bytes`, returning it and its length
pub fn decode_varint(bytes: &[u8]) -> ProbeResult<(i32, usize)> {
    let mut value = 0u32;
    for (i, byte) in bytes.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value as i32, i + 1));
        }
    }

    if bytes.len() >= MAX_VARINT_LEN {
        Err(ProbeError::Protocol("VarInt too long".to_string()))
    } else {
        Err(ProbeError::Protocol("truncated VarInt".to_string()))
    }
}

/// Read a VarInt from a stream
pub async fn read_varint<R: AsyncRead + Unpin>(reader: &mut R) -> ProbeResult<i32> {
    let mut value = 0u32;
    for i in 0..MAX_VARINT_LEN {
        let byte = reader.read_u8().await?;
        value |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err(ProbeError::Protocol("VarInt too long".to_string()))
}

/// Append a length-prefixed UTF-8 string
pub fn write_string(buf: &mut Vec<u8>, value: &str) {
    write_varint(buf, value.len() as i32);
    buf.extend_from_slice(value.as_bytes());
}

/// Decode a length-prefixed UTF-8 string from the front of `bytes`
pub fn decode_string(bytes: &[u8]) -> ProbeResult<&str> {
    let (len, used) = decode_varint(bytes)?;
    let len = usize::try_from(len)
        .map_err(|_| ProbeError::Protocol(format!("negative string length: {}", len)))?;

    let body = bytes
        .get(used..used + len)
        .ok_or_else(|| ProbeError::Protocol("truncated string".to_string()))?;

    std::str::from_utf8(body).map_err(|e| ProbeError::Protocol(format!("invalid UTF-8: {}", e)))
}

/// Wrap a packet id and payload into a length-prefixed frame
pub fn frame(packet_id: i32, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(payload.len() + MAX_VARINT_LEN);
    write_varint(&mut body, packet_id);
    body.extend_from_slice(payload);

    let mut out = Vec::with_capacity(body.len() + MAX_VARINT_LEN);
    write_varint(&mut out, body.len() as i32);
    out.extend_from_slice(&body);
    out
}

/// Read one frame, returning its packet id and payload
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> ProbeResult<(i32, Vec<u8>)> {
    let len = read_varint(reader).await?;
    let len = match usize::try_from(len) {
        Ok(len) if (1..=MAX_FRAME_LEN).contains(&len) => len,
        _ => return Err(ProbeError::Protocol(format!("invalid frame length: {}", len))),
    };

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    let (packet_id, used) = decode_varint(&body)?;
    body.drain(..used);
    Ok((packet_id, body))
}

/// Handshake frame announcing a status query for `host:port`
pub fn handshake(host: &str, port: u16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(host.len() + 8);
    write_varint(&mut payload, PROTOCOL_VERSION);
    write_string(&mut payload, host);
    payload.extend_from_slice(&port.to_be_bytes());
    write_varint(&mut payload, NEXT_STATE_STATUS);
    frame(HANDSHAKE_ID, &payload)
}

pub fn status_request() -> Vec<u8> {
    frame(STATUS_ID, &[])
}

/// Parse the JSON carried by a status response payload
pub fn parse_status(payload: &[u8]) -> ProbeResult<StatusResponse> {
    Ok(serde_json::from_str(decode_string(payload)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn varint(value: i32) -> Vec<u8> {
        let mut buf = Vec::new();
        write_varint(&mut buf, value);
        buf
    }

    #[test]
    fn test_write_varint() {
        assert_eq!(varint(0), [0x00]);
        assert_eq!(varint(1), [0x01]);
        assert_eq!(varint(127), [0x7f]);
        assert_eq!(varint(128), [0x80, 0x01]);
        assert_eq!(varint(255), [0xff, 0x01]);
        assert_eq!(varint(25565), [0xdd, 0xc7, 0x01]);
        assert_eq!(varint(2_147_483_647), [0xff, 0xff, 0xff, 0xff, 0x07]);
        assert_eq!(varint(-1), [0xff, 0xff, 0xff, 0xff, 0x0f]);
    }

    #[test]
    fn test_decode_varint() {
        assert_eq!(decode_varint(&[0xdd, 0xc7, 0x01, 0xaa]).unwrap(), (25565, 3));
        assert_eq!(decode_varint(&[0xff, 0xff, 0xff, 0xff, 0x0f]).unwrap(), (-1, 5));
        assert!(decode_varint(&[0x80, 0x80]).is_err());
        assert!(decode_varint(&[0xff; 6]).is_err());
    }

    #[tokio::test]
    async fn test_read_varint_rejects_overlong() {
        let mut reader: &[u8] = &[0xff; 6];
        assert!(matches!(
            read_varint(&mut reader).await,
            Err(ProbeError::Protocol(_))
        ));
    }

    #[test]
    fn test_handshake_layout() {
        let mut expected = vec![0x0f, 0x00, 0x2f, 0x09];
        expected.extend_from_slice(b"localhost");
        expected.extend_from_slice(&[0x63, 0xdd, 0x01]);

        assert_eq!(handshake("localhost", 25565), expected);
        assert_eq!(status_request(), [0x01, 0x00]);
    }

    #[tokio::test]
    async fn test_read_frame() {
        let mut payload = Vec::new();
        write_string(&mut payload, "{}");
        let bytes = frame(STATUS_ID, &payload);

        let mut reader: &[u8] = &bytes;
        let (id, body) = read_frame(&mut reader).await.unwrap();
        assert_eq!(id, STATUS_ID);
        assert_eq!(decode_string(&body).unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_read_frame_rejects_bad_lengths() {
        let mut empty: &[u8] = &[0x00];
        assert!(read_frame(&mut empty).await.is_err());

        let mut huge = varint((MAX_FRAME_LEN + 1) as i32);
        huge.push(0x00);
        let mut reader: &[u8] = &huge;
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(ProbeError::Protocol(_))
        ));

        let mut truncated: &[u8] = &[0x05, 0x00, 0x01];
        assert!(matches!(
            read_frame(&mut truncated).await,
            Err(ProbeError::Io(_))
        ));
    }

    #[test]
    fn test_decode_string_rejects_truncation() {
        assert!(decode_string(&[0x05, b'a', b'b']).is_err());
        assert!(decode_string(&[0x02, 0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_parse_status() {
        let json = r#"{
            "version": {"name": "1.20.4", "protocol": 765},
            "players": {"max": 100, "online": 5, "sample": []},
            "description": {"text": "hello"},
            "favicon": "data:image/png;base64,AAAA"
        }"#;
        let mut payload = Vec::new();
        write_string(&mut payload, json);

        let status = parse_status(&payload).unwrap();
        assert_eq!(status.players.unwrap().online, 5);
        assert_eq!(status.favicon.as_deref(), Some("data:image/png;base64,AAAA"));
    }

    #[test]
    fn test_parse_status_without_players() {
        let mut payload = Vec::new();
        write_string(&mut payload, r#"{"description": "offline mode"}"#);

        let status = parse_status(&payload).unwrap();
        assert!(status.players.is_none());
        assert!(status.favicon.is_none());
    }
}
