//! Content-Length framing for envelope messages.
//!
//! Format: `Content-Length: N\r\n\r\n{json}`, where N is the byte length of
//! the JSON body. Header and body are written with a single `write_all` so a
//! frame is never split by another writer.
//!
//! A clean EOF before a header is reported as `Ok(None)`. A body that is not
//! valid JSON for the expected type yields `FrameError::Json`; the stream is
//! still aligned on the next frame in that case (see `FrameError::is_recoverable`).

use std::io::{BufRead, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FrameError;

const HEADER_PREFIX: &str = "Content-Length: ";

/// Largest body accepted from a header; anything above is treated as a
/// corrupted stream rather than allocated.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

impl FrameError {
    /// Whether the reader can continue with the next frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::Json(_))
    }
}

/// Serialize a message into a complete frame.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, FrameError> {
    let body = serde_json::to_vec(message)?;
    let mut frame = format!("{}{}\r\n\r\n", HEADER_PREFIX, body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}

fn parse_content_length(header_line: &str) -> Result<usize, FrameError> {
    let value = header_line
        .trim()
        .strip_prefix(HEADER_PREFIX)
        .ok_or_else(|| FrameError::MissingContentLength(header_line.to_string()))?;
    let length = value
        .parse::<usize>()
        .map_err(|_| FrameError::InvalidContentLength(value.to_string()))?;
    if length > MAX_FRAME_LEN {
        return Err(FrameError::InvalidContentLength(format!(
            "{} exceeds the {} byte limit",
            length, MAX_FRAME_LEN
        )));
    }
    Ok(length)
}

fn check_separator(separator: &str) -> Result<(), FrameError> {
    if separator.trim().is_empty() {
        Ok(())
    } else {
        Err(FrameError::InvalidSeparator(separator.to_string()))
    }
}

/// Write one framed message and flush.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, FrameError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut header_line = String::new();
    if reader.read_line(&mut header_line).await? == 0 {
        return Ok(None);
    }
    let content_length = parse_content_length(&header_line)?;

    let mut separator = String::new();
    reader.read_line(&mut separator).await?;
    check_separator(&separator)?;

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;

    Ok(Some(serde_json::from_slice(&body)?))
}

/// Blocking counterpart of [`write_frame`], used by the worker process.
pub fn write_frame_blocking<W, T>(writer: &mut W, message: &T) -> Result<(), FrameError>
where
    W: Write,
    T: Serialize,
{
    let frame = encode(message)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Blocking counterpart of [`read_frame`], used by the worker process.
pub fn read_frame_blocking<R, T>(reader: &mut R) -> Result<Option<T>, FrameError>
where
    R: BufRead,
    T: DeserializeOwned,
{
    let mut header_line = String::new();
    if reader.read_line(&mut header_line)? == 0 {
        return Ok(None);
    }
    let content_length = parse_content_length(&header_line)?;

    let mut separator = String::new();
    reader.read_line(&mut separator)?;
    check_separator(&separator)?;

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;

    Ok(Some(serde_json::from_slice(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn encode_prefixes_body_with_content_length() {
        let frame = encode(&json!({"key": "abc"})).unwrap();
        let text = String::from_utf8(frame).unwrap();

        let (header, body) = text.split_once("\r\n\r\n").expect("separator");
        let length: usize = header.strip_prefix("Content-Length: ").unwrap().parse().unwrap();
        assert_eq!(body.len(), length);
        assert_eq!(serde_json::from_str::<Value>(body).unwrap()["key"], "abc");
    }

    #[tokio::test]
    async fn async_reader_reads_consecutive_frames() {
        let mut bytes = encode(&json!({"n": 1})).unwrap();
        bytes.extend(encode(&json!({"n": 2})).unwrap());
        let mut reader = tokio::io::BufReader::new(&bytes[..]);

        let first: Value = read_frame(&mut reader).await.unwrap().unwrap();
        let second: Value = read_frame(&mut reader).await.unwrap().unwrap();
        let end: Option<Value> = read_frame(&mut reader).await.unwrap();

        assert_eq!(first["n"], 1);
        assert_eq!(second["n"], 2);
        assert!(end.is_none(), "clean EOF should yield None");
    }

    #[tokio::test]
    async fn async_writer_output_is_readable_by_blocking_reader() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &json!({"text": "héllo"})).await.unwrap();

        let mut cursor = std::io::Cursor::new(buffer);
        let message: Value = read_frame_blocking(&mut cursor).unwrap().unwrap();
        assert_eq!(message["text"], "héllo");
    }

    #[test]
    fn missing_header_is_rejected() {
        let mut cursor = std::io::Cursor::new(b"Invalid-Header: 12\r\n\r\n{}".to_vec());
        let result = read_frame_blocking::<_, Value>(&mut cursor);
        assert!(matches!(result, Err(FrameError::MissingContentLength(_))));
    }

    #[test]
    fn non_numeric_length_is_rejected() {
        let mut cursor = std::io::Cursor::new(b"Content-Length: abc\r\n\r\n{}".to_vec());
        let result = read_frame_blocking::<_, Value>(&mut cursor);
        assert!(matches!(result, Err(FrameError::InvalidContentLength(_))));
    }

    #[test]
    fn oversized_length_is_rejected_before_allocating() {
        let header = format!("Content-Length: {}\r\n\r\n{{}}", usize::MAX);
        let mut cursor = std::io::Cursor::new(header.into_bytes());
        let result = read_frame_blocking::<_, Value>(&mut cursor);
        match result {
            Err(FrameError::InvalidContentLength(message)) => {
                assert!(message.contains("limit"), "got: {}", message)
            }
            other => panic!("expected InvalidContentLength, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn async_reader_rejects_length_over_limit() {
        let header = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_LEN + 1);
        let mut reader = tokio::io::BufReader::new(header.as_bytes());
        let result = read_frame::<_, Value>(&mut reader).await;
        assert!(matches!(result, Err(FrameError::InvalidContentLength(_))));
    }

    #[test]
    fn non_empty_separator_is_rejected() {
        let mut cursor = std::io::Cursor::new(b"Content-Length: 2\r\nX: y\r\n{}".to_vec());
        let result = read_frame_blocking::<_, Value>(&mut cursor);
        assert!(matches!(result, Err(FrameError::InvalidSeparator(_))));
    }

    #[test]
    fn truncated_body_is_an_io_error() {
        let mut cursor = std::io::Cursor::new(b"Content-Length: 10\r\n\r\n{}".to_vec());
        let result = read_frame_blocking::<_, Value>(&mut cursor);
        let error = result.unwrap_err();
        assert!(matches!(error, FrameError::Io(_)));
        assert!(!error.is_recoverable());
    }

    #[test]
    fn bad_json_leaves_stream_aligned() {
        let mut bytes = b"Content-Length: 3\r\n\r\n{x}".to_vec();
        bytes.extend(encode(&json!({"ok": true})).unwrap());
        let mut cursor = std::io::Cursor::new(bytes);

        let error = read_frame_blocking::<_, Value>(&mut cursor).unwrap_err();
        assert!(error.is_recoverable());

        let next: Value = read_frame_blocking(&mut cursor).unwrap().unwrap();
        assert_eq!(next["ok"], true);
    }
}
