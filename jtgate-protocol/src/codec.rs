//! Encoder and decoder for JT/T 808 frames and messages.

use crate::body::BodyRegistry;
use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::message::Message;
use crate::subpackage;
use crate::SENTINEL;
use bytes::{Buf, Bytes, BytesMut};
use std::sync::Arc;

/// Default cap on a single buffered frame, sentinels and stuffing included.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4096;

/// Encodes messages into frames.
#[derive(Debug, Clone)]
pub struct Encoder {
    registry: Arc<BodyRegistry>,
}

impl Encoder {
    pub fn new(registry: Arc<BodyRegistry>) -> Self {
        Self { registry }
    }

    /// Encodes a message into a single frame.
    pub fn encode(&self, message: &Message) -> Result<BytesMut, ProtocolError> {
        let body = self.registry.encode(message.body.as_ref())?;
        Frame::new(message.header.clone(), body).encode()
    }

    /// Encodes a message, splitting bodies longer than `max_chunk` into
    /// subpackages with consecutive serial numbers.
    pub fn encode_split(
        &self,
        message: &Message,
        max_chunk: usize,
    ) -> Result<Vec<BytesMut>, ProtocolError> {
        let body = self.registry.encode(message.body.as_ref())?;
        subpackage::split(&message.header, &body, max_chunk)?
            .iter()
            .map(Frame::encode)
            .collect()
    }
}

/// Decodes frames into messages.
///
/// Stateless per call: each call takes exactly one complete frame.
#[derive(Debug, Clone)]
pub struct Decoder {
    registry: Arc<BodyRegistry>,
}

impl Decoder {
    pub fn new(registry: Arc<BodyRegistry>) -> Self {
        Self { registry }
    }

    /// Returns the body registry used to resolve message ids.
    pub fn registry(&self) -> &Arc<BodyRegistry> {
        &self.registry
    }

    /// Decodes one complete frame into its header and raw body.
    pub fn decode_frame(&self, bytes: &[u8]) -> Result<Frame, ProtocolError> {
        Frame::decode(bytes)
    }

    /// Resolves the body of a decoded frame through the registry.
    pub fn resolve(&self, frame: Frame) -> Result<Message, ProtocolError> {
        let body = self.registry.decode(frame.header.message_id, &frame.body)?;
        Ok(Message::from_parts(frame.header, body))
    }

    /// Decodes one complete frame into a message.
    pub fn decode(&self, bytes: &[u8]) -> Result<Message, ProtocolError> {
        self.resolve(self.decode_frame(bytes)?)
    }
}

/// Splits a connection's byte stream into sentinel-delimited frames.
#[derive(Debug)]
pub struct StreamDecoder {
    buffer: BytesMut,
    max_frame_len: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_frame_len,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns the next complete frame, sentinels included.
    ///
    /// Returns `Ok(None)` when more data is needed. Bytes before the first
    /// sentinel are discarded. A partial frame that grows past the size limit
    /// is dropped and reported as [`ProtocolError::FrameTooLarge`].
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        loop {
            let start = match self.buffer.iter().position(|&b| b == SENTINEL) {
                Some(pos) => pos,
                None => {
                    if !self.buffer.is_empty() {
                        tracing::trace!("Discarding {} bytes without sentinel", self.buffer.len());
                        self.buffer.clear();
                    }
                    return Ok(None);
                }
            };
            if start > 0 {
                tracing::trace!("Discarding {} bytes before sentinel", start);
                self.buffer.advance(start);
            }

            let end = match self.buffer[1..].iter().position(|&b| b == SENTINEL) {
                Some(pos) => pos + 1,
                None => {
                    if self.buffer.len() > self.max_frame_len {
                        let size = self.buffer.len();
                        self.buffer.clear();
                        return Err(ProtocolError::FrameTooLarge {
                            size,
                            max: self.max_frame_len,
                        });
                    }
                    return Ok(None);
                }
            };

            // Back-to-back sentinels: the first closed a frame we never saw
            // the start of, the second opens the next one.
            if end == 1 {
                self.buffer.advance(1);
                continue;
            }

            let frame = self.buffer.split_to(end + 1).freeze();
            if frame.len() > self.max_frame_len {
                return Err(ProtocolError::FrameTooLarge {
                    size: frame.len(),
                    max: self.max_frame_len,
                });
            }
            return Ok(Some(frame));
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{EmptyBody, GeneralResponse, RawBody};
    use crate::header::Header;
    use crate::message::msg_id;

    fn codec() -> (Encoder, Decoder) {
        let registry = Arc::new(BodyRegistry::with_defaults());
        (Encoder::new(registry.clone()), Decoder::new(registry))
    }

    fn heartbeat(serial: u16) -> Message {
        Message::new(Header::new(msg_id::HEARTBEAT, "13800138000", serial), EmptyBody)
    }

    #[test]
    fn test_encoder_decoder_roundtrip() {
        let (encoder, decoder) = codec();
        let message = Message::new(
            Header::new(msg_id::PLATFORM_GENERAL_RESPONSE, "13800138000", 5).with_version(1),
            GeneralResponse::new(4, msg_id::AUTHENTICATION, GeneralResponse::SUCCESS),
        );

        let encoded = encoder.encode(&message).unwrap();
        let decoded = decoder.decode(&encoded).unwrap();

        assert_eq!(decoded.header.protocol_version, Some(1));
        assert_eq!(decoded.serial_number(), 5);
        assert_eq!(
            decoded.body_as::<GeneralResponse>(),
            message.body_as::<GeneralResponse>()
        );
        assert_eq!(encoder.encode(&decoded).unwrap(), encoded);
    }

    #[test]
    fn test_unknown_message_decodes_to_raw_body() {
        let (encoder, decoder) = codec();
        let message = Message::new(
            Header::new(msg_id::LOCATION_REPORT, "13800138000", 1),
            RawBody::new(vec![0u8; 28]),
        );
        let decoded = decoder.decode(&encoder.encode(&message).unwrap()).unwrap();
        assert_eq!(decoded.body_as::<RawBody>().unwrap().data.len(), 28);
    }

    #[test]
    fn test_stream_decoder_splits_frames() {
        let (encoder, _) = codec();
        let mut data = Vec::new();
        data.extend_from_slice(&encoder.encode(&heartbeat(1)).unwrap());
        data.extend_from_slice(&encoder.encode(&heartbeat(2)).unwrap());

        let mut stream = StreamDecoder::new();
        stream.extend(&data);

        let first = stream.next_frame().unwrap().unwrap();
        let second = stream.next_frame().unwrap().unwrap();
        assert!(stream.next_frame().unwrap().is_none());
        assert_eq!(stream.buffered(), 0);

        assert_eq!(Frame::decode(&first).unwrap().header.serial_number, 1);
        assert_eq!(Frame::decode(&second).unwrap().header.serial_number, 2);
    }

    #[test]
    fn test_stream_decoder_partial_frame() {
        let (encoder, _) = codec();
        let encoded = encoder.encode(&heartbeat(1)).unwrap();

        let mut stream = StreamDecoder::new();
        stream.extend(&encoded[..6]);
        assert!(stream.next_frame().unwrap().is_none());

        stream.extend(&encoded[6..]);
        let frame = stream.next_frame().unwrap().unwrap();
        assert_eq!(frame.as_ref(), encoded.as_ref());
    }

    #[test]
    fn test_stream_decoder_skips_garbage() {
        let (encoder, _) = codec();
        let encoded = encoder.encode(&heartbeat(3)).unwrap();

        let mut stream = StreamDecoder::new();
        stream.extend(&[0x01, 0x02, 0x03]);
        assert!(stream.next_frame().unwrap().is_none());
        assert_eq!(stream.buffered(), 0);

        stream.extend(&[0xAA, 0xBB]);
        stream.extend(&encoded);
        let frame = stream.next_frame().unwrap().unwrap();
        assert_eq!(frame.as_ref(), encoded.as_ref());
    }

    #[test]
    fn test_stream_decoder_back_to_back_sentinels() {
        let (encoder, _) = codec();
        let encoded = encoder.encode(&heartbeat(4)).unwrap();

        // Tail of a lost frame, then a complete frame
        let mut stream = StreamDecoder::new();
        stream.extend(&[0x7E]);
        stream.extend(&encoded);
        let frame = stream.next_frame().unwrap().unwrap();
        assert_eq!(frame.as_ref(), encoded.as_ref());
    }

    #[test]
    fn test_stream_decoder_frame_too_large() {
        let mut stream = StreamDecoder::with_max_frame_len(16);
        stream.extend(&[0x7E]);
        stream.extend(&[0x01; 32]);
        assert!(matches!(
            stream.next_frame(),
            Err(ProtocolError::FrameTooLarge { max: 16, .. })
        ));
        assert_eq!(stream.buffered(), 0);
    }

    #[test]
    fn test_stream_decoder_clear() {
        let mut stream = StreamDecoder::default();
        stream.extend(&[0x7E, 0x00]);
        assert_eq!(stream.buffered(), 2);
        stream.clear();
        assert_eq!(stream.buffered(), 0);
    }
}
