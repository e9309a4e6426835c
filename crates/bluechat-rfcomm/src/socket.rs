//! Stream-backed RFCOMM socket
//!
//! Wraps any tokio duplex stream so backends only have to produce a connected
//! byte stream. Close is synchronous: it trips a cancellation token that every
//! pending read and write observes.

use std::io;

use async_trait::async_trait;
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::adapter::RfcommSocket;

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "socket closed")
}

fn hangup_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "peer closed the connection")
}

// ----------------------------------------------------------------------------
// Stream Socket
// ----------------------------------------------------------------------------

/// Connected RFCOMM socket over a duplex byte stream
pub struct StreamSocket<S> {
    remote_address: String,
    reader: Mutex<ReadHalf<S>>,
    writer: Mutex<WriteHalf<S>>,
    /// Tripped by our own `close`
    closed: CancellationToken,
    /// Tripped when either end closes; shared between in-process peers
    hangup: CancellationToken,
}

impl<S> StreamSocket<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S, remote_address: impl Into<String>) -> Self {
        Self::with_hangup(stream, remote_address, CancellationToken::new())
    }

    /// Create a socket whose hang-up signal is shared with its peer
    pub fn with_hangup(
        stream: S,
        remote_address: impl Into<String>,
        hangup: CancellationToken,
    ) -> Self {
        let (reader, writer) = split(stream);
        Self {
            remote_address: remote_address.into(),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed: CancellationToken::new(),
            hangup,
        }
    }
}

#[async_trait]
impl<S> RfcommSocket for StreamSocket<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn connect(&self) -> io::Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(closed_error())
        }
    }

    fn is_connected(&self) -> bool {
        !self.closed.is_cancelled() && !self.hangup.is_cancelled()
    }

    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut reader = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(closed_error()),
            guard = self.reader.lock() => guard,
        };

        // Pending bytes win over a hang-up so the last frame is not lost
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(closed_error()),
            result = reader.read(buf) => result,
            _ = self.hangup.cancelled() => Ok(0),
        }
    }

    async fn write(&self, data: &[u8]) -> io::Result<()> {
        if self.closed.is_cancelled() {
            return Err(closed_error());
        }
        if self.hangup.is_cancelled() {
            return Err(hangup_error());
        }

        let mut writer = self.writer.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(closed_error()),
            _ = self.hangup.cancelled() => Err(hangup_error()),
            result = async {
                writer.write_all(data).await?;
                writer.flush().await
            } => result,
        }
    }

    fn remote_address(&self) -> String {
        self.remote_address.clone()
    }

    fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        self.hangup.cancel();
        debug!("Closed RFCOMM socket to {}", self.remote_address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_close_fails_pending_read() {
        let (local, _remote) = duplex(64);
        let socket = std::sync::Arc::new(StreamSocket::new(local, "AA"));

        let reader = {
            let socket = socket.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 16];
                socket.read(&mut buf).await
            })
        };
        tokio::task::yield_now().await;
        socket.close();
        socket.close();

        let result = reader.await.unwrap();
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::ConnectionAborted);
        assert!(!socket.is_connected());
        assert!(socket.write(b"late").await.is_err());
    }

    #[tokio::test]
    async fn test_shared_hangup_drains_then_ends() {
        let (a, b) = duplex(64);
        let hangup = CancellationToken::new();
        let left = StreamSocket::with_hangup(a, "B", hangup.clone());
        let right = StreamSocket::with_hangup(b, "A", hangup);

        left.write(b"bye#now").await.unwrap();
        left.close();

        let mut buf = [0u8; 16];
        let n = right.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"bye#now");
        assert_eq!(right.read(&mut buf).await.unwrap(), 0);
        assert!(!right.is_connected());
    }
}
