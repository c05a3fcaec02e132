//! Newline-delimited JSON framing.
//!
//! Every logical message on the wire is a single JSON object terminated by
//! a `\n` byte — no length prefix. Reading a message is "read until LF,
//! parse JSON". This module defines only framing; it imposes no field
//! schema beyond the outer `{"type": ..., "payload": ...}` shape shared by
//! plaintext and encrypted envelopes alike.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use super::MAX_LINE_BYTES;

/// The outer JSON object on the wire: `{"type": <string>, "payload": <object>}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("connection closed")]
    Eof,
    #[error("line exceeded {0} bytes")]
    TooLong(usize),
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads a single newline-terminated line and parses it as an [`Envelope`].
///
/// Returns [`FramingError::Eof`] on a clean close (including a close that
/// leaves a partial, unterminated line buffered — the spec treats this the
/// same as a clean EOF: no response, session closed) and
/// [`FramingError::TooLong`] once more than [`MAX_LINE_BYTES`] have been
/// buffered without finding the delimiter.
pub async fn read_envelope<R>(reader: &mut R) -> Result<Envelope, FramingError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Err(FramingError::Eof);
        }
        if let Some(pos) = available.iter().position(|&b| b == b'\n') {
            buf.extend_from_slice(&available[..=pos]);
            reader.consume(pos + 1);
            break;
        }
        buf.extend_from_slice(available);
        let consumed = available.len();
        reader.consume(consumed);
        if buf.len() > MAX_LINE_BYTES {
            return Err(FramingError::TooLong(MAX_LINE_BYTES));
        }
    }

    if buf.len() > MAX_LINE_BYTES {
        return Err(FramingError::TooLong(MAX_LINE_BYTES));
    }

    while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
        buf.pop();
    }

    let envelope: Envelope = serde_json::from_slice(&buf)?;
    Ok(envelope)
}

/// Serializes `envelope` as a single JSON line and writes + flushes it.
pub async fn write_envelope<W>(writer: &mut W, envelope: &Envelope) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(envelope)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn round_trips_a_simple_envelope() {
        let mut buf = Vec::new();
        let envelope = Envelope::new("ping", serde_json::json!({"n": 1}));
        write_envelope(&mut buf, &envelope).await.unwrap();
        assert_eq!(buf.last(), Some(&b'\n'));

        let mut reader = BufReader::new(Cursor::new(buf));
        let parsed = read_envelope(&mut reader).await.unwrap();
        assert_eq!(parsed.kind, "ping");
        assert_eq!(parsed.payload["n"], 1);
    }

    #[tokio::test]
    async fn eof_on_empty_stream() {
        let mut reader = BufReader::new(Cursor::new(Vec::<u8>::new()));
        let err = read_envelope(&mut reader).await.unwrap_err();
        assert!(matches!(err, FramingError::Eof));
    }

    #[tokio::test]
    async fn rejects_oversized_lines() {
        let mut line = vec![b'a'; MAX_LINE_BYTES + 10];
        line.push(b'\n');
        let mut reader = BufReader::new(Cursor::new(line));
        let err = read_envelope(&mut reader).await.unwrap_err();
        assert!(matches!(err, FramingError::TooLong(_)));
    }

    #[tokio::test]
    async fn rejects_malformed_json() {
        let mut reader = BufReader::new(Cursor::new(b"not json\n".to_vec()));
        let err = read_envelope(&mut reader).await.unwrap_err();
        assert!(matches!(err, FramingError::Json(_)));
    }
}
