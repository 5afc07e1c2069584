//! Transport contract and an in-memory transport.
//!
//! The engine only needs an ordered stream of inbound frames and a way to
//! send text frames and close. Any message-based duplex transport can be
//! adapted by implementing [`FrameSource`] and [`FrameSink`].

use std::future::Future;

use tokio::sync::mpsc;

use crate::error::PeerResult;

/// One inbound transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text carrying one message.
    Text(String),
    /// Binary payload; not part of the protocol.
    Binary(Vec<u8>),
}

/// Inbound half of a transport.
pub trait FrameSource: Send + 'static {
    /// Waits for the next frame. `None` means the transport is gone.
    fn recv(&mut self) -> impl Future<Output = Option<Frame>> + Send;
}

/// Outbound half of a transport.
pub trait FrameSink: Send + 'static {
    /// Sends one text frame.
    fn send(&mut self, text: &str) -> impl Future<Output = PeerResult<()>> + Send;

    /// Closes the transport with a close code and reason.
    fn close(&mut self, code: u16, reason: &str) -> impl Future<Output = PeerResult<()>> + Send;
}

/// In-process duplex transport over tokio channels.
pub mod memory {
    use super::*;
    use crate::error::PeerError;

    enum Event {
        Frame(Frame),
        Close { code: u16, reason: String },
    }

    /// Receiving end of an in-memory transport.
    pub struct MemorySource {
        rx: mpsc::UnboundedReceiver<Event>,
        close: Option<(u16, String)>,
    }

    /// Sending end of an in-memory transport.
    pub struct MemorySink {
        tx: mpsc::UnboundedSender<Event>,
    }

    /// Creates two connected endpoints, each a `(source, sink)` pair.
    pub fn pair() -> ((MemorySource, MemorySink), (MemorySource, MemorySink)) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            (MemorySource::new(a_rx), MemorySink { tx: b_tx }),
            (MemorySource::new(b_rx), MemorySink { tx: a_tx }),
        )
    }

    impl MemorySource {
        fn new(rx: mpsc::UnboundedReceiver<Event>) -> Self {
            Self { rx, close: None }
        }

        /// Close code and reason sent by the other side, once received.
        pub fn close_frame(&self) -> Option<(u16, &str)> {
            self.close.as_ref().map(|(code, reason)| (*code, reason.as_str()))
        }
    }

    impl FrameSource for MemorySource {
        async fn recv(&mut self) -> Option<Frame> {
            if self.close.is_some() {
                return None;
            }
            match self.rx.recv().await? {
                Event::Frame(frame) => Some(frame),
                Event::Close { code, reason } => {
                    self.close = Some((code, reason));
                    None
                }
            }
        }
    }

    impl MemorySink {
        /// Sends a binary frame.
        pub fn send_binary(&self, bytes: Vec<u8>) -> PeerResult<()> {
            self.tx
                .send(Event::Frame(Frame::Binary(bytes)))
                .map_err(|_| PeerError::Closed)
        }
    }

    impl FrameSink for MemorySink {
        async fn send(&mut self, text: &str) -> PeerResult<()> {
            self.tx
                .send(Event::Frame(Frame::Text(text.to_string())))
                .map_err(|_| PeerError::Closed)
        }

        async fn close(&mut self, code: u16, reason: &str) -> PeerResult<()> {
            self.tx
                .send(Event::Close {
                    code,
                    reason: reason.to_string(),
                })
                .map_err(|_| PeerError::Closed)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn frames_cross_in_order() {
            let ((mut a_source, mut a_sink), (mut b_source, mut b_sink)) = pair();

            a_sink.send("one").await.unwrap();
            a_sink.send("two").await.unwrap();
            b_sink.send("back").await.unwrap();

            assert_eq!(b_source.recv().await, Some(Frame::Text("one".to_string())));
            assert_eq!(b_source.recv().await, Some(Frame::Text("two".to_string())));
            assert_eq!(a_source.recv().await, Some(Frame::Text("back".to_string())));
        }

        #[tokio::test]
        async fn close_is_observed() {
            let ((_a_source, mut a_sink), (mut b_source, _b_sink)) = pair();
            a_sink.close(1002, "Bad JSON data").await.unwrap();

            assert_eq!(b_source.recv().await, None);
            assert_eq!(b_source.close_frame(), Some((1002, "Bad JSON data")));
            assert_eq!(b_source.recv().await, None);
        }

        #[tokio::test]
        async fn dropped_sink_ends_source() {
            let ((_a_source, a_sink), (mut b_source, _b_sink)) = pair();
            drop(a_sink);
            assert_eq!(b_source.recv().await, None);
            assert_eq!(b_source.close_frame(), None);
        }
    }
}
