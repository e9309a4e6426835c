//! Transport session over one established RFCOMM socket
//!
//! Outbound messages become single frames; inbound reads become a lazy
//! stream of decoded messages. The stream cannot be restarted mid-session:
//! a new session is needed for a new stream.

use std::sync::Arc;

use bluechat_core::{codec, Message, TransportError};
use futures::stream::{self, Stream};
use tracing::{debug, error, warn};

use crate::adapter::RfcommSocket;

// ----------------------------------------------------------------------------
// Transport Session
// ----------------------------------------------------------------------------

/// Duplex message channel bound to one connected socket
pub struct TransportSession {
    socket: Arc<dyn RfcommSocket>,
    read_buffer_size: usize,
}

impl TransportSession {
    pub fn new(socket: Arc<dyn RfcommSocket>, read_buffer_size: usize) -> Self {
        Self {
            socket,
            read_buffer_size,
        }
    }

    pub fn socket(&self) -> &Arc<dyn RfcommSocket> {
        &self.socket
    }

    /// Write one frame; `false` means the message was not delivered
    pub async fn send(&self, message: &Message) -> bool {
        let frame = codec::encode(message);
        match self.socket.write(&frame).await {
            Ok(()) => {
                debug!(
                    "Sent {} byte frame to {}",
                    frame.len(),
                    self.socket.remote_address()
                );
                true
            }
            Err(e) => {
                error!(
                    "Failed to send frame to {}: {}",
                    self.socket.remote_address(),
                    e
                );
                false
            }
        }
    }

    /// Stream of inbound messages, one per successful read
    ///
    /// Ends quietly at end-of-stream. An I/O failure is yielded once as
    /// [`TransportError::Interrupted`] and ends the stream.
    pub fn receive(&self) -> impl Stream<Item = Result<Message, TransportError>> + Send + 'static {
        let initial = if self.socket.is_connected() {
            Some((
                Arc::clone(&self.socket),
                vec![0u8; self.read_buffer_size],
            ))
        } else {
            debug!("Socket not connected, nothing to receive");
            None
        };

        stream::unfold(initial, |state| async move {
            let (socket, mut buffer) = state?;
            match socket.read(&mut buffer).await {
                Ok(0) => {
                    debug!("Peer {} closed the stream", socket.remote_address());
                    None
                }
                Ok(count) => {
                    let message = codec::decode(&buffer, count, false);
                    debug!("Received {} byte frame from {}", count, socket.remote_address());
                    Some((Ok(message), Some((socket, buffer))))
                }
                Err(e) => {
                    warn!("Read from {} failed: {}", socket.remote_address(), e);
                    Some((Err(TransportError::interrupted(e)), None))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::StreamSocket;
    use bluechat_core::CONNECTION_INTERRUPTED;
    use futures::StreamExt;
    use std::io;
    use tokio_test::io::Builder;

    fn session_over(mock: tokio_test::io::Mock, buffer: usize) -> TransportSession {
        TransportSession::new(Arc::new(StreamSocket::new(mock, "00:11:22:33:44:55")), buffer)
    }

    #[tokio::test]
    async fn test_one_message_per_read() {
        let mock = Builder::new()
            .read(b"alice#hi")
            .read(b"alice#second #line")
            .read(b"no delimiter")
            .build();
        let session = session_over(mock, 1024);

        let received: Vec<_> = session.receive().collect().await;
        let messages: Vec<Message> = received.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(
            messages,
            vec![
                Message::incoming("hi", "alice"),
                Message::incoming("second #line", "alice"),
                Message::incoming("no delimiter", ""),
            ]
        );
    }

    #[tokio::test]
    async fn test_read_error_yields_single_interruption() {
        let mock = Builder::new()
            .read(b"bob#before")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let session = session_over(mock, 1024);

        let received: Vec<_> = session.receive().collect().await;
        assert_eq!(received.len(), 2);
        assert_eq!(
            received[0].as_ref().unwrap(),
            &Message::incoming("before", "bob")
        );
        let err = received[1].as_ref().unwrap_err();
        assert_eq!(err.to_string(), CONNECTION_INTERRUPTED);
    }

    #[tokio::test]
    async fn test_small_buffer_splits_frames() {
        let mock = Builder::new().read(b"eve#abcdef").build();
        let session = session_over(mock, 6);

        let received: Vec<Message> = session
            .receive()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(
            received,
            vec![Message::incoming("ab", "eve"), Message::incoming("cdef", "")]
        );
    }

    #[tokio::test]
    async fn test_closed_socket_receives_nothing() {
        let session = session_over(Builder::new().build(), 1024);
        session.socket().close();
        assert_eq!(session.receive().count().await, 0);
    }

    #[tokio::test]
    async fn test_send_writes_frame() {
        let mock = Builder::new().write(b"me#hello").build();
        let session = session_over(mock, 1024);
        assert!(session.send(&Message::outgoing("hello", "me")).await);
    }

    #[tokio::test]
    async fn test_send_failure_returns_false() {
        let mock = Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let session = session_over(mock, 1024);
        assert!(!session.send(&Message::outgoing("hello", "me")).await);
    }
}
