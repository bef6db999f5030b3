//! Message transport under a gateway connection
//!
//! A [`Transport`] is the duplex channel a [`super::Connection`] owns. The
//! WebSocket implementation splits the socket so reads never block writes.

use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock as StdRwLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};

/// Write timeout used when no explicit write deadline is set
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Invoked for every keep-alive acknowledgment received
pub type PongHandler = Arc<dyn Fn() + Send + Sync>;

/// Application frame read from a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// Peer closed the channel or the stream ended
    #[error("transport closed (code {code:?}): {reason}")]
    Closed { code: Option<u16>, reason: String },

    /// A read or write deadline passed
    #[error("transport deadline exceeded")]
    Timeout,

    #[error("transport protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Closed by the peer with a normal or going-away code. A stream that
    /// ends without a close frame, or a close frame without a status, is
    /// abnormal.
    pub fn is_expected_close(&self) -> bool {
        matches!(
            self,
            TransportError::Closed {
                code: Some(1000) | Some(1001),
                ..
            }
        )
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Send a close frame with `code` and `reason`
    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError>;

    /// Send a keep-alive ping
    async fn send_ping(&self) -> Result<(), TransportError>;

    fn set_pong_handler(&self, handler: PongHandler);

    /// Next application frame. Keep-alive frames are consumed internally.
    async fn read_message(&self) -> Result<TransportMessage, TransportError>;

    fn set_read_deadline(&self, deadline: Option<Instant>);

    fn set_write_deadline(&self, deadline: Option<Instant>);
}

/// [`Transport`] over an upgraded axum WebSocket
pub struct WebSocketTransport {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    stream: Mutex<SplitStream<WebSocket>>,
    pong_handler: StdRwLock<Option<PongHandler>>,
    read_deadline: StdMutex<Option<Instant>>,
    write_deadline: StdMutex<Option<Instant>>,
}

impl WebSocketTransport {
    pub fn new(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            pong_handler: StdRwLock::new(None),
            read_deadline: StdMutex::new(None),
            write_deadline: StdMutex::new(None),
        }
    }

    fn read_deadline(&self) -> Option<Instant> {
        *self
            .read_deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_deadline(&self) -> Instant {
        self.write_deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap_or_else(|| Instant::now() + DEFAULT_WRITE_TIMEOUT)
    }

    fn notify_pong(&self) {
        let handler = self
            .pong_handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    async fn write(&self, message: Message) -> Result<(), TransportError> {
        let deadline = self.write_deadline();
        let mut sink = self.sink.lock().await;
        timeout_at(deadline, sink.send(message))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let message = match std::str::from_utf8(data) {
            Ok(text) => Message::Text(text.into()),
            Err(_) => Message::Binary(data.to_vec().into()),
        };
        self.write(message).await
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        self.write(Message::Close(Some(frame))).await?;

        let mut sink = self.sink.lock().await;
        sink.close()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }

    async fn send_ping(&self) -> Result<(), TransportError> {
        self.write(Message::Ping(Default::default())).await
    }

    fn set_pong_handler(&self, handler: PongHandler) {
        *self
            .pong_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    async fn read_message(&self) -> Result<TransportMessage, TransportError> {
        let mut stream = self.stream.lock().await;
        loop {
            // Re-read each round, the pong handler may extend it
            let next = match self.read_deadline() {
                Some(deadline) => timeout_at(deadline, stream.next())
                    .await
                    .map_err(|_| TransportError::Timeout)?,
                None => stream.next().await,
            };

            match next {
                None => {
                    return Err(TransportError::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    })
                }
                Some(Err(e)) => return Err(TransportError::Protocol(e.to_string())),
                Some(Ok(Message::Text(text))) => {
                    return Ok(TransportMessage::Text(text.to_string()))
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(TransportMessage::Binary(data.to_vec()))
                }
                Some(Ok(Message::Close(frame))) => {
                    return Err(match frame {
                        Some(frame) => TransportError::Closed {
                            code: Some(frame.code),
                            reason: frame.reason.to_string(),
                        },
                        None => TransportError::Closed {
                            code: None,
                            reason: String::new(),
                        },
                    })
                }
                Some(Ok(Message::Pong(_))) => self.notify_pong(),
                // axum answers pings itself
                Some(Ok(Message::Ping(_))) => {}
            }
        }
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) {
        *self
            .read_deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = deadline;
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) {
        *self
            .write_deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = deadline;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport for registry and broadcast tests

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    pub struct FakeTransportLog {
        pub sent: StdMutex<Vec<Vec<u8>>>,
        pub sends: AtomicUsize,
        pub closes: AtomicUsize,
        pub pings: AtomicUsize,
        pub close_codes: StdMutex<Vec<u16>>,
        pub pong_handler: StdMutex<Option<PongHandler>>,
    }

    impl FakeTransportLog {
        pub fn sent_frames(&self) -> Vec<serde_json::Value> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|frame| serde_json::from_slice(frame).unwrap())
                .collect()
        }

        /// Simulate a keep-alive acknowledgment from the peer
        pub fn pong(&self) {
            let handler = self.pong_handler.lock().unwrap().clone();
            if let Some(handler) = handler {
                handler();
            }
        }
    }

    /// Records every call. Reads pop scripted frames, then wait until close.
    pub struct FakeTransport {
        wire: Arc<FakeTransportLog>,
        fail_sends: bool,
        fail_pings: bool,
        panic_on_read: bool,
        inbound: StdMutex<VecDeque<TransportMessage>>,
        closed: AtomicBool,
        closed_notify: tokio::sync::Notify,
    }

    impl FakeTransport {
        pub fn new() -> (Self, Arc<FakeTransportLog>) {
            let wire = Arc::new(FakeTransportLog::default());
            let transport = Self {
                wire: Arc::clone(&wire),
                fail_sends: false,
                fail_pings: false,
                panic_on_read: false,
                inbound: StdMutex::new(VecDeque::new()),
                closed: AtomicBool::new(false),
                closed_notify: tokio::sync::Notify::new(),
            };
            (transport, wire)
        }

        pub fn failing_sends(mut self) -> Self {
            self.fail_sends = true;
            self
        }

        pub fn failing_pings(mut self) -> Self {
            self.fail_pings = true;
            self
        }

        pub fn panicking_reads(mut self) -> Self {
            self.panic_on_read = true;
            self
        }

        pub fn with_inbound(self, message: TransportMessage) -> Self {
            self.inbound.lock().unwrap().push_back(message);
            self
        }

        pub fn boxed(self) -> Box<dyn Transport> {
            Box::new(self)
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
            self.wire.sends.fetch_add(1, Ordering::SeqCst);
            if self.fail_sends {
                return Err(TransportError::Protocol("broken pipe".to_string()));
            }
            self.wire.sent.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn close(&self, code: u16, _reason: &str) -> Result<(), TransportError> {
            self.wire.closes.fetch_add(1, Ordering::SeqCst);
            self.wire.close_codes.lock().unwrap().push(code);
            self.closed.store(true, Ordering::SeqCst);
            self.closed_notify.notify_waiters();
            Ok(())
        }

        async fn send_ping(&self) -> Result<(), TransportError> {
            self.wire.pings.fetch_add(1, Ordering::SeqCst);
            if self.fail_pings {
                return Err(TransportError::Protocol("ping failed".to_string()));
            }
            Ok(())
        }

        fn set_pong_handler(&self, handler: PongHandler) {
            *self.wire.pong_handler.lock().unwrap() = Some(handler);
        }

        async fn read_message(&self) -> Result<TransportMessage, TransportError> {
            if self.panic_on_read {
                panic!("malformed frame");
            }
            let scripted = self.inbound.lock().unwrap().pop_front();
            if let Some(message) = scripted {
                return Ok(message);
            }
            let notified = self.closed_notify.notified();
            if !self.closed.load(Ordering::SeqCst) {
                notified.await;
            }
            Err(TransportError::Closed {
                code: Some(1000),
                reason: "closed".to_string(),
            })
        }

        fn set_read_deadline(&self, _deadline: Option<Instant>) {}

        fn set_write_deadline(&self, _deadline: Option<Instant>) {}
    }
}
