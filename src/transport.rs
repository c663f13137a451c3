//! Byte transport abstraction.
//!
//! The link engine needs three primitives from the channel underneath it:
//! read one byte (or learn that none arrived yet), write a buffer, close.
//! [`Transport`] captures exactly that.  [`StreamTransport`] adapts any tokio
//! `AsyncRead + AsyncWrite` stream (an in-memory duplex pipe, a TCP stream, a
//! serial device file) and gives reads the "no byte within the poll interval"
//! semantics a serial line has, so the engine can interleave reads with its
//! retransmission timer.  All protocol logic lives elsewhere; this module owns
//! only byte I/O.

use std::future::Future;
use std::io;
use std::path::Path;
use std::time::Duration;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::DEFAULT_POLL_INTERVAL;

/// Size of the read-ahead buffer.
const READ_CHUNK: usize = 256;

/// The raw channel collaborator.
pub trait Transport: Send {
    /// Next byte, or `None` if nothing arrived within the poll interval.
    fn read_byte(&mut self) -> impl Future<Output = io::Result<Option<u8>>> + Send;

    /// Write `buf`; returns how many bytes the channel accepted.
    fn write_bytes(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Release the channel.
    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// A [`Transport`] over any async byte stream.
#[derive(Debug)]
pub struct StreamTransport<S> {
    inner: S,
    buf: [u8; READ_CHUNK],
    pos: usize,
    filled: usize,
    poll_interval: Duration,
}

impl<S> StreamTransport<S> {
    pub fn new(inner: S) -> Self {
        Self::with_poll_interval(inner, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(inner: S, poll_interval: Duration) -> Self {
        Self {
            inner,
            buf: [0; READ_CHUNK],
            pos: 0,
            filled: 0,
            poll_interval,
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if self.pos < self.filled {
            let byte = self.buf[self.pos];
            self.pos += 1;
            return Ok(Some(byte));
        }

        // `read` is cancel safe: on timeout no byte has been consumed.
        match tokio::time::timeout(self.poll_interval, self.inner.read(&mut self.buf)).await {
            Err(_elapsed) => Ok(None),
            Ok(Ok(0)) => {
                // A serial line has no end-of-stream; a hung-up peer looks
                // like silence.  Wait out the interval so callers never spin.
                tokio::time::sleep(self.poll_interval).await;
                Ok(None)
            }
            Ok(Ok(n)) => {
                self.filled = n;
                self.pos = 1;
                Ok(Some(self.buf[0]))
            }
            Ok(Err(e)) => Err(e),
        }
    }

    async fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write_all(buf).await?;
        self.inner.flush().await?;
        Ok(buf.len())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

/// Transport over a character device (serial port, pseudo-terminal).
pub type DeviceTransport = StreamTransport<File>;

/// Open `channel` for reading and writing.
///
/// Line discipline (raw mode, `rate`) belongs to the device configuration,
/// e.g. `stty -F /dev/ttyS0 raw 9600`; the rate is only reported here.
pub async fn open(
    channel: impl AsRef<Path>,
    rate: u32,
    poll_interval: Duration,
) -> io::Result<DeviceTransport> {
    let path = channel.as_ref();
    let file = OpenOptions::new().read(true).write(true).open(path).await?;
    log::info!("[transport] opened {} at {rate} baud", path.display());
    Ok(StreamTransport::with_poll_interval(file, poll_interval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test(start_paused = true)]
    async fn bytes_flow_in_order() {
        let (a, b) = duplex(64);
        let mut left = StreamTransport::new(a);
        let mut right = StreamTransport::new(b);

        assert_eq!(left.write_bytes(&[1, 2, 3]).await.unwrap(), 3);
        assert_eq!(right.read_byte().await.unwrap(), Some(1));
        assert_eq!(right.read_byte().await.unwrap(), Some(2));
        assert_eq!(right.read_byte().await.unwrap(), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn silence_yields_none_after_poll_interval() {
        let (_a, b) = duplex(64);
        let mut right = StreamTransport::with_poll_interval(b, Duration::from_millis(50));

        let started = tokio::time::Instant::now();
        assert_eq!(right.read_byte().await.unwrap(), None);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_up_peer_reads_as_silence() {
        let (mut a, b) = duplex(64);
        let mut right = StreamTransport::new(b);
        a.shutdown().await.unwrap();
        assert_eq!(right.read_byte().await.unwrap(), None);
        assert_eq!(right.read_byte().await.unwrap(), None);
    }

    #[tokio::test]
    async fn opening_a_missing_device_fails() {
        let result = open("/nonexistent/serial-link-test", 9600, DEFAULT_POLL_INTERVAL).await;
        assert!(result.is_err());
    }
}
