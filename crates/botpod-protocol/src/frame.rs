//! Newline-delimited JSON framing.
//!
//! One frame is one JSON document followed by `\n`. The same framing is used
//! on process pipes and TCP sockets.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame. Anything larger is treated as a protocol
/// violation rather than buffered indefinitely.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame exceeds {MAX_FRAME_BYTES} bytes")]
    Oversize,
    #[error("frame is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reads one raw frame. Returns `Ok(None)` on a clean end of stream.
pub async fn read_frame_line<R>(reader: &mut R) -> Result<Option<String>, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            if buf.is_empty() {
                return Ok(None);
            }
            // Stream ended mid-frame; hand back what we have.
            break;
        }
        match chunk.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                buf.extend_from_slice(&chunk[..pos]);
                reader.consume(pos + 1);
                break;
            }
            None => {
                buf.extend_from_slice(chunk);
                let len = chunk.len();
                reader.consume(len);
            }
        }
        if buf.len() > MAX_FRAME_BYTES {
            return Err(FrameError::Oversize);
        }
    }
    if buf.len() > MAX_FRAME_BYTES {
        return Err(FrameError::Oversize);
    }
    let line = String::from_utf8_lossy(&buf).trim().to_string();
    Ok(Some(line))
}

/// Incremental frame reader whose partial-frame buffer survives a dropped
/// read future.
///
/// `read_frame_line` consumes bytes into a local buffer, so cancelling it
/// mid-frame (as a `select!` branch does) loses the consumed prefix. Use
/// this reader wherever frame reads race against other branches: bytes
/// already consumed are kept in `self` and the next call resumes the same
/// frame.
pub struct FrameReader<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R> FrameReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    /// Reads one raw frame. Cancel-safe: the only await point is
    /// `fill_buf`, which consumes nothing, and everything consumed so far
    /// lives in `self.buf`.
    pub async fn next_line(&mut self) -> Result<Option<String>, FrameError> {
        loop {
            let chunk = self.reader.fill_buf().await?;
            if chunk.is_empty() {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                break;
            }
            match chunk.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.buf.extend_from_slice(&chunk[..pos]);
                    self.reader.consume(pos + 1);
                    break;
                }
                None => {
                    self.buf.extend_from_slice(chunk);
                    let len = chunk.len();
                    self.reader.consume(len);
                }
            }
            if self.buf.len() > MAX_FRAME_BYTES {
                self.buf.clear();
                return Err(FrameError::Oversize);
            }
        }
        if self.buf.len() > MAX_FRAME_BYTES {
            self.buf.clear();
            return Err(FrameError::Oversize);
        }
        let line = String::from_utf8_lossy(&self.buf).trim().to_string();
        self.buf.clear();
        Ok(Some(line))
    }
}

/// Reads one frame and decodes it. Empty lines are skipped.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, FrameError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    loop {
        let Some(line) = read_frame_line(reader).await? else {
            return Ok(None);
        };
        if line.is_empty() {
            continue;
        }
        return Ok(Some(serde_json::from_str(&line)?));
    }
}

/// Encodes `value` and writes it as one frame.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(value)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActionRequest, WorkerMessage};
    use serde_json::json;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn frames_round_trip_over_a_duplex_pipe() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, _server_write) = tokio::io::split(server);
        let (_client_read, mut client_write) = tokio::io::split(client);

        let request = ActionRequest::new(1, "ping", json!({}));
        write_frame(&mut client_write, &request)
            .await
            .expect("write frame");
        write_frame(&mut client_write, &WorkerMessage::Heartbeat)
            .await
            .expect("write second frame");
        // Drop both halves so the duplex closes and the server sees EOF;
        // a leaked read half keeps the stream open.
        drop(client_write);
        drop(_client_read);

        let mut reader = BufReader::new(server_read);
        let parsed: ActionRequest = read_frame(&mut reader)
            .await
            .expect("read frame")
            .expect("frame present");
        assert_eq!(parsed, request);

        let heartbeat: WorkerMessage = read_frame(&mut reader)
            .await
            .expect("read frame")
            .expect("frame present");
        assert_eq!(heartbeat, WorkerMessage::Heartbeat);

        let end: Option<WorkerMessage> = read_frame(&mut reader).await.expect("read eof");
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let data = b"\n\n{\"type\":\"heartbeat\"}\n";
        let mut reader = BufReader::new(&data[..]);
        let message: WorkerMessage = read_frame(&mut reader)
            .await
            .expect("read frame")
            .expect("frame present");
        assert_eq!(message, WorkerMessage::Heartbeat);
    }

    #[tokio::test]
    async fn partial_frame_survives_a_dropped_read() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, _server_write) = tokio::io::split(server);
        let (_client_read, mut client_write) = tokio::io::split(client);
        let mut frames = FrameReader::new(BufReader::new(server_read));

        client_write
            .write_all(b"{\"seq_id\":2,\"act")
            .await
            .expect("write prefix");
        // The read future is dropped mid-frame, as a select! branch would
        // drop it when another branch wins.
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            frames.next_line(),
        )
        .await;
        assert!(pending.is_err());

        client_write
            .write_all(b"ion\":\"ping\",\"data\":{}}\n")
            .await
            .expect("write remainder");
        let line = frames
            .next_line()
            .await
            .expect("read frame")
            .expect("frame present");
        let parsed: ActionRequest = serde_json::from_str(&line).expect("parse resumed frame");
        assert_eq!(parsed.seq_id, 2);
        assert_eq!(parsed.action, "ping");
    }

    #[tokio::test]
    async fn oversize_frame_is_rejected() {
        let mut data = vec![b'x'; MAX_FRAME_BYTES + 2];
        data.push(b'\n');
        let mut reader = BufReader::new(&data[..]);
        let result = read_frame_line(&mut reader).await;
        assert!(matches!(result, Err(FrameError::Oversize)));
    }

    #[tokio::test]
    async fn invalid_json_is_a_frame_error() {
        let data = b"not json\n";
        let mut reader = BufReader::new(&data[..]);
        let result: Result<Option<WorkerMessage>, _> = read_frame(&mut reader).await;
        assert!(matches!(result, Err(FrameError::Json(_))));
    }
}
