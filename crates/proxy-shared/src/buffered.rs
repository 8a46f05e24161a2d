//! A small peekable read buffer used to classify an incoming stream (by
//! looking at its first bytes/line) without losing any of the bytes it
//! already pulled in while doing so.
//!
//! `tokio::io::BufReader` does not expose a way to guarantee that a `peek`
//! call has actually filled the buffer with N bytes - it only ever returns
//! whatever a single underlying read produced. Proxy streams arrive over
//! QUIC in whatever chunk sizes the peer happened to write them in, so we
//! need our own loop-until-enough-or-eof peek. Bytes read during
//! classification stay in `buf` and are served back out before we ever touch
//! `inner` again, so nothing observed during framing is ever dropped on the
//! floor - in particular, bytes belonging to a tunnelled payload that arrive
//! packed together with the CONNECT request line are preserved intact.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use tokio::io::{self, AsyncRead, ReadBuf};

pub struct BufferedReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> BufferedReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
        }
    }

    /// Reads from `inner` until at least `at_least` bytes are buffered or
    /// the peer has closed the stream.
    async fn fill(&mut self, at_least: usize) -> io::Result<()> {
        use tokio::io::AsyncReadExt;
        while self.buf.len() < at_least {
            let mut tmp = [0u8; 4096];
            let n = self.inner.read(&mut tmp).await?;
            if n == 0 {
                break;
            }
            self.buf.extend_from_slice(&tmp[..n]);
        }
        Ok(())
    }

    /// Returns up to `n` bytes without consuming them. Returns fewer than
    /// `n` bytes only if the peer closed the stream first.
    pub async fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
        self.fill(n).await?;
        let avail = self.buf.len().min(n);
        Ok(&self.buf[..avail])
    }

    /// Reads and consumes a single `\n`-terminated line (CRLF or bare LF).
    /// Returns `None` if the stream closed without producing any more bytes.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        use tokio::io::AsyncReadExt;
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let line = self.buf.split_to(pos + 1);
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            let mut tmp = [0u8; 4096];
            let n = self.inner.read(&mut tmp).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let line = self.buf.split_to(self.buf.len());
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            self.buf.extend_from_slice(&tmp[..n]);
        }
    }

    /// Unwraps into the underlying reader and whatever bytes are still
    /// buffered but unconsumed.
    pub fn into_parts(self) -> (R, BytesMut) {
        (self.inner, self.buf)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for BufferedReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.buf.is_empty() {
            let n = buf.remaining().min(self.buf.len());
            let chunk = self.buf.split_to(n);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn peek_does_not_consume() {
        let mut r = BufferedReader::new(Cursor::new(b"HEARTBEAT\nrest".to_vec()));
        let peeked = r.peek(9).await.unwrap().to_vec();
        assert_eq!(&peeked, b"HEARTBEAT");
        let line = r.read_line().await.unwrap().unwrap();
        assert_eq!(line, "HEARTBEAT\n");
    }

    #[tokio::test]
    async fn read_line_then_passthrough_read_sees_remaining_bytes() {
        use tokio::io::AsyncReadExt;
        let mut r = BufferedReader::new(Cursor::new(b"CONNECT a:1 HTTP/1.1\r\nHost: a:1\r\n\r\npayload".to_vec()));
        let line = r.read_line().await.unwrap().unwrap();
        assert_eq!(line, "CONNECT a:1 HTTP/1.1\r\n");
        let mut rest = Vec::new();
        r.read_to_end(&mut rest).await.unwrap();
        assert_eq!(&rest, b"Host: a:1\r\n\r\npayload");
    }

    #[tokio::test]
    async fn peek_short_stream_returns_available_bytes() {
        let mut r = BufferedReader::new(Cursor::new(b"hi".to_vec()));
        let peeked = r.peek(9).await.unwrap().to_vec();
        assert_eq!(&peeked, b"hi");
    }
}
