//! Message codec and length-prefixed stream framing.
//!
//! Message-based transports carry the JSON text of a [`Message`] as-is.
//! Byte-stream transports frame each text with a 4-byte big-endian length
//! prefix:
//!
//! ```text
//! +----------------+------------------+
//! | length (4 BE)  |  JSON payload    |
//! +----------------+------------------+
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::MAX_MESSAGE_SIZE;
use crate::error::{ProtocolError, ProtocolResult};
use crate::types::Message;

/// Serializes a message to its JSON text.
pub fn encode_message(message: &Message) -> ProtocolResult<String> {
    Ok(serde_json::to_string(message)?)
}

/// Parses the JSON text of one frame.
///
/// # Example
///
/// ```rust
/// use webrpc_protocol::{Message, decode_message};
///
/// let message = decode_message(r#"{"type":"resolve","data":3,"id":"a"}"#).unwrap();
/// assert_eq!(message, Message::resolve("a", 3.into()));
/// ```
pub fn decode_message(text: &str) -> ProtocolResult<Message> {
    Ok(serde_json::from_str(text)?)
}

/// Prefixes a text frame with its big-endian length.
pub fn encode_frame(text: &str, max: usize) -> ProtocolResult<Vec<u8>> {
    let len = text.len();
    if len > max {
        return Err(ProtocolError::MessageTooLarge { size: len, max });
    }
    if len == 0 {
        return Err(ProtocolError::EmptyMessage);
    }

    let mut buffer = Vec::with_capacity(4 + len);
    buffer.extend_from_slice(&(len as u32).to_be_bytes());
    buffer.extend_from_slice(text.as_bytes());
    Ok(buffer)
}

/// Reads length-prefixed text frames from a byte stream.
pub struct FrameReader<R> {
    reader: R,
    max_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Creates a reader accepting frames up to [`MAX_MESSAGE_SIZE`].
    pub fn new(reader: R) -> Self {
        Self::with_max_size(reader, MAX_MESSAGE_SIZE)
    }

    /// Creates a reader with a custom frame size limit.
    pub fn with_max_size(reader: R, max_size: usize) -> Self {
        Self { reader, max_size }
    }

    /// Reads one frame.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between frames.
    pub async fn read_frame(&mut self) -> ProtocolResult<Option<String>> {
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > self.max_size {
            return Err(ProtocolError::MessageTooLarge {
                size: len,
                max: self.max_size,
            });
        }
        if len == 0 {
            return Err(ProtocolError::EmptyMessage);
        }

        let mut payload = vec![0u8; len];
        let mut received = 0;
        while received < len {
            let n = self.reader.read(&mut payload[received..]).await?;
            if n == 0 {
                return Err(ProtocolError::IncompleteMessage {
                    expected: len,
                    received,
                });
            }
            received += n;
        }

        Ok(Some(String::from_utf8(payload)?))
    }

    /// Unwraps this reader, returning the underlying stream.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writes length-prefixed text frames to a byte stream.
pub struct FrameWriter<W> {
    writer: W,
    max_size: usize,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Creates a writer accepting frames up to [`MAX_MESSAGE_SIZE`].
    pub fn new(writer: W) -> Self {
        Self::with_max_size(writer, MAX_MESSAGE_SIZE)
    }

    /// Creates a writer with a custom frame size limit.
    pub fn with_max_size(writer: W, max_size: usize) -> Self {
        Self { writer, max_size }
    }

    /// Writes and flushes one frame.
    pub async fn write_frame(&mut self, text: &str) -> ProtocolResult<()> {
        let data = encode_frame(text, self.max_size)?;
        self.writer.write_all(&data).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Shuts down the write half of the stream.
    pub async fn shutdown(&mut self) -> ProtocolResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Unwraps this writer, returning the underlying stream.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_frame_prefixes_length() {
        let bytes = encode_frame("{}", MAX_MESSAGE_SIZE).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 2, b'{', b'}']);
    }

    #[test]
    fn encode_frame_rejects_oversize() {
        let result = encode_frame("abcdef", 4);
        assert!(matches!(
            result,
            Err(ProtocolError::MessageTooLarge { size: 6, max: 4 })
        ));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode_message("not json"),
            Err(ProtocolError::Serialization(_))
        ));
        assert!(matches!(
            decode_message(r#"["call"]"#),
            Err(ProtocolError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn reader_and_writer_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        let first = encode_message(&Message::call("1", "hello", Vec::new())).unwrap();
        let second = encode_message(&Message::resolve("1", json!("hi"))).unwrap();
        writer.write_frame(&first).await.unwrap();
        writer.write_frame(&second).await.unwrap();
        drop(writer);

        assert_eq!(reader.read_frame().await.unwrap(), Some(first));
        assert_eq!(reader.read_frame().await.unwrap(), Some(second));
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn reader_empty_stream() {
        let mut reader = FrameReader::new(std::io::Cursor::new(Vec::<u8>::new()));
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn reader_incomplete_payload() {
        let mut data = vec![0, 0, 0, 100];
        data.extend_from_slice(&[b'x'; 10]);
        let mut reader = FrameReader::new(std::io::Cursor::new(data));

        let result = reader.read_frame().await;
        assert!(matches!(
            result,
            Err(ProtocolError::IncompleteMessage {
                expected: 100,
                received: 10
            })
        ));
    }

    #[tokio::test]
    async fn reader_rejects_empty_frame() {
        let mut reader = FrameReader::new(std::io::Cursor::new(vec![0u8, 0, 0, 0]));
        assert!(matches!(
            reader.read_frame().await,
            Err(ProtocolError::EmptyMessage)
        ));
    }

    #[tokio::test]
    async fn reader_rejects_oversize_frame() {
        let data = ((MAX_MESSAGE_SIZE + 1) as u32).to_be_bytes().to_vec();
        let mut reader = FrameReader::new(std::io::Cursor::new(data));
        assert!(matches!(
            reader.read_frame().await,
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn reader_rejects_invalid_utf8() {
        let data = vec![0u8, 0, 0, 2, 0xff, 0xfe];
        let mut reader = FrameReader::with_max_size(std::io::Cursor::new(data), 16);
        assert!(matches!(
            reader.read_frame().await,
            Err(ProtocolError::InvalidUtf8(_))
        ));
    }
}
