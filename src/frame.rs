// ABOUTME: Length-delimited frame I/O over a split TCP stream
// ABOUTME: Reads/writes the 4-byte little-endian length prefix plus body, bounded by MaxFrameSize

use crate::error::FrameError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// Smallest legal frame: a 4-byte length field describing itself plus a
/// 4-byte version and 4-byte command (the codec's minimum header).
pub const MIN_FRAME_LEN: u32 = 8;

/// Default upper bound on a single frame, matching the source server's limit.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 10 * 1024 * 1024;

/// Reads complete frames off the read half of a connection.
///
/// Owns a growable buffer so a short socket read that lands mid-frame is
/// simply retried; no partial frame is ever handed to the caller.
#[derive(Debug)]
pub struct FrameReader {
    read: OwnedReadHalf,
    buf: BytesMut,
    max_frame_size: u32,
}

impl FrameReader {
    pub fn new(read: OwnedReadHalf, max_frame_size: u32) -> Self {
        Self {
            read,
            buf: BytesMut::with_capacity(4 * 1024),
            max_frame_size,
        }
    }

    /// Reads one complete frame and returns its body (the bytes after the
    /// length prefix). Returns `Ok(None)` on a clean EOF encountered before
    /// any byte of a new frame arrived.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        // Stage (a): the 4-byte length prefix.
        while self.buf.len() < 4 {
            if self.fill_buf().await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(FrameError::ShortRead);
            }
        }

        let declared_len = (&self.buf[..4]).get_u32_le();
        if declared_len < MIN_FRAME_LEN {
            return Err(FrameError::FrameTooSmall(declared_len));
        }
        if declared_len > self.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                length: declared_len,
                max: self.max_frame_size,
            });
        }

        // Stage (b): the remaining `declared_len - 4` body bytes.
        let total = declared_len as usize;
        while self.buf.len() < total {
            if self.fill_buf().await? == 0 {
                return Err(FrameError::ShortRead);
            }
        }

        let mut frame = self.buf.split_to(total);
        frame.advance(4);
        Ok(Some(frame.freeze()))
    }

    async fn fill_buf(&mut self) -> Result<usize, FrameError> {
        let n = self.read.read_buf(&mut self.buf).await?;
        Ok(n)
    }
}

/// Writes complete frames to the write half of a connection.
#[derive(Debug)]
pub struct FrameWriter {
    write: OwnedWriteHalf,
}

impl FrameWriter {
    pub fn new(write: OwnedWriteHalf) -> Self {
        Self { write }
    }

    /// Writes `body` as a single frame: a 4-byte little-endian length prefix
    /// (counting itself) followed by `body` verbatim. The entire buffer is
    /// transmitted before this returns.
    #[tracing::instrument(level = "trace", skip(self, body))]
    pub async fn write_frame(&mut self, body: &[u8]) -> Result<(), FrameError> {
        let total_len = body.len() as u32 + 4;
        let mut out = BytesMut::with_capacity(total_len as usize);
        out.put_u32_le(total_len);
        out.put_slice(body);
        self.write.write_all(&out).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let accept = listener.accept();
        let (client, (server, _)) = tokio::join!(connect, accept);
        (client.unwrap(), server)
    }

    #[tokio::test]
    async fn round_trips_a_frame() {
        let (client, server) = connected_pair().await;
        let (client_read, _client_write) = client.into_split();
        let (_server_read, server_write) = server.into_split();

        let mut writer = FrameWriter::new(server_write);
        writer.write_frame(b"hello").await.unwrap();

        let mut reader = FrameReader::new(client_read, DEFAULT_MAX_FRAME_SIZE);
        let body = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn rejects_frame_below_minimum_length() {
        let (client, server) = connected_pair().await;
        let (client_read, _client_write) = client.into_split();
        let (_server_read, mut server_write) = server.into_split();

        // L = 7, below the 8-byte minimum.
        server_write.write_all(&7u32.to_le_bytes()).await.unwrap();
        server_write.write_all(&[0u8; 3]).await.unwrap();

        let mut reader = FrameReader::new(client_read, DEFAULT_MAX_FRAME_SIZE);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::FrameTooSmall(7)));
    }

    #[tokio::test]
    async fn accepts_minimum_legal_frame() {
        // L = 8: a 4-byte body, just large enough to carry a version field
        // but nothing else; the codec layer is what rejects it as incomplete.
        let (client, server) = connected_pair().await;
        let (client_read, _client_write) = client.into_split();
        let (_server_read, server_write) = server.into_split();

        let mut writer = FrameWriter::new(server_write);
        writer.write_frame(&[0, 0, 0, 1]).await.unwrap();

        let mut reader = FrameReader::new(client_read, DEFAULT_MAX_FRAME_SIZE);
        let body = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(body.len(), 4);
    }

    #[tokio::test]
    async fn rejects_frame_above_maximum_length() {
        let (client, server) = connected_pair().await;
        let (client_read, _client_write) = client.into_split();
        let (_server_read, mut server_write) = server.into_split();

        let max = 16u32;
        server_write
            .write_all(&(max + 4 + 1).to_le_bytes())
            .await
            .unwrap();

        let mut reader = FrameReader::new(client_read, max);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn clean_eof_before_any_frame_byte() {
        let (client, server) = connected_pair().await;
        let (client_read, _client_write) = client.into_split();
        drop(server);

        let mut reader = FrameReader::new(client_read, DEFAULT_MAX_FRAME_SIZE);
        let result = reader.read_frame().await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn short_read_mid_frame_is_an_error() {
        let (client, server) = connected_pair().await;
        let (client_read, _client_write) = client.into_split();
        let (_server_read, mut server_write) = server.into_split();

        server_write.write_all(&20u32.to_le_bytes()).await.unwrap();
        server_write.write_all(b"abc").await.unwrap();
        drop(server_write);

        let mut reader = FrameReader::new(client_read, DEFAULT_MAX_FRAME_SIZE);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::ShortRead));
    }
}
