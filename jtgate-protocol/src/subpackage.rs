//! Splitting long bodies into subpackages and merging them back.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::header::Header;
use crate::MAX_BODY_LEN;
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// Splits `body` into frames of at most `max_chunk` body bytes.
///
/// A body that fits in one chunk yields a single frame without subpackage
/// info. Otherwise every frame carries `total`/`seq` (1-based) and serial
/// numbers count up from the header's serial.
pub fn split(header: &Header, body: &[u8], max_chunk: usize) -> Result<Vec<Frame>, ProtocolError> {
    let max_chunk = max_chunk.clamp(1, MAX_BODY_LEN);
    if body.len() <= max_chunk {
        let mut single = header.clone();
        single.subpackage = None;
        single.properties = single.properties.with_subpackage(false);
        return Ok(vec![Frame::new(single, Bytes::copy_from_slice(body))]);
    }

    let chunks: Vec<&[u8]> = body.chunks(max_chunk).collect();
    let total = u16::try_from(chunks.len()).map_err(|_| ProtocolError::BodyTooLarge {
        size: body.len(),
        max: max_chunk * u16::MAX as usize,
    })?;

    Ok(chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let seq = i as u16 + 1;
            let mut part = header.clone().with_subpackage(total, seq);
            part.serial_number = header.serial_number.wrapping_add(i as u16);
            Frame::new(part, Bytes::copy_from_slice(chunk))
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PartialKey {
    terminal_id: String,
    message_id: u16,
    first_serial: u16,
}

/// Default cap on messages with pieces still missing, per connection.
pub const DEFAULT_MAX_PENDING: usize = 64;

/// Default cap on body bytes held for incomplete messages, per connection.
pub const DEFAULT_MAX_BUFFERED: usize = 256 * 1024;

#[derive(Debug)]
struct Partial {
    header: Header,
    total: u16,
    parts: BTreeMap<u16, Bytes>,
    bytes: usize,
    order: u64,
    started: Instant,
}

impl Partial {
    fn start(header: Header, total: u16, order: u64) -> Self {
        Self {
            header,
            total,
            parts: BTreeMap::new(),
            bytes: 0,
            order,
            started: Instant::now(),
        }
    }

    fn is_complete(&self) -> bool {
        self.parts.len() >= usize::from(self.total)
    }
}

/// Collects subpackaged frames until a message is complete.
///
/// Owned by a single connection; pieces are keyed by terminal id, message id
/// and the serial number of the first piece. At most `max_pending` messages
/// and `max_buffered` body bytes are held at once.
#[derive(Debug)]
pub struct Reassembler {
    pending: HashMap<PartialKey, Partial>,
    timeout: Duration,
    max_pending: usize,
    max_buffered: usize,
    buffered: usize,
    next_order: u64,
}

impl Reassembler {
    pub fn new(timeout: Duration) -> Self {
        Self::with_limits(timeout, DEFAULT_MAX_PENDING, DEFAULT_MAX_BUFFERED)
    }

    pub fn with_limits(timeout: Duration, max_pending: usize, max_buffered: usize) -> Self {
        Self {
            pending: HashMap::new(),
            timeout,
            max_pending: max_pending.max(1),
            max_buffered,
            buffered: 0,
            next_order: 0,
        }
    }

    /// Adds a frame.
    ///
    /// Frames without subpackage info pass straight through. Returns the
    /// merged frame once every piece has arrived, `None` while pieces are
    /// still missing. The merged body may exceed the 10-bit length field;
    /// `body.len()` is authoritative for it.
    ///
    /// Fails with `FrameTooLarge` when a limit is hit: a message that alone
    /// outgrows `max_buffered` is dropped, otherwise the oldest incomplete
    /// messages are dropped to make room and the new piece is kept.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Frame>, ProtocolError> {
        let info = match frame.header.subpackage {
            Some(info) => info,
            None => return Ok(Some(frame)),
        };
        if !info.is_valid() {
            return Err(ProtocolError::InvalidBody {
                message_id: frame.header.message_id,
                reason: format!("subpackage {} of {} out of range", info.seq, info.total),
            });
        }

        let key = PartialKey {
            terminal_id: frame.header.terminal_id.clone(),
            message_id: frame.header.message_id,
            first_serial: frame.header.serial_number.wrapping_sub(info.seq - 1),
        };

        let order = self.next_order;
        self.next_order += 1;
        let partial = self
            .pending
            .entry(key.clone())
            .or_insert_with(|| Partial::start(frame.header.clone(), info.total, order));
        if partial.total != info.total {
            tracing::warn!(
                "Subpackage total changed from {} to {} for message {:#06x} from {}; restarting",
                partial.total,
                info.total,
                key.message_id,
                key.terminal_id
            );
            self.buffered -= partial.bytes;
            *partial = Partial::start(frame.header.clone(), info.total, order);
        }
        if info.seq == 1 {
            partial.header = frame.header.clone();
        }
        let added = frame.body.len();
        if let Some(replaced) = partial.parts.insert(info.seq, frame.body) {
            partial.bytes -= replaced.len();
            self.buffered -= replaced.len();
        }
        partial.bytes += added;
        self.buffered += added;

        if partial.is_complete() {
            return Ok(self.take(&key).map(|partial| merge(partial, key.first_serial)));
        }

        if partial.bytes > self.max_buffered {
            let size = partial.bytes;
            self.take(&key);
            tracing::warn!(
                "Dropped subpackaged message {:#06x} from {}: {} bytes buffered",
                key.message_id,
                key.terminal_id,
                size
            );
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: self.max_buffered,
            });
        }

        let size = self.buffered;
        let mut dropped = 0;
        while self.pending.len() > self.max_pending || self.buffered > self.max_buffered {
            let oldest = self
                .pending
                .iter()
                .filter(|(k, _)| **k != key)
                .min_by_key(|(_, partial)| partial.order)
                .map(|(k, _)| k.clone());
            let Some(oldest) = oldest else {
                break;
            };
            self.take(&oldest);
            dropped += 1;
        }
        if dropped > 0 {
            tracing::warn!(
                "Dropped {} incomplete subpackaged messages to stay within limits",
                dropped
            );
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: self.max_buffered,
            });
        }
        Ok(None)
    }

    fn take(&mut self, key: &PartialKey) -> Option<Partial> {
        let partial = self.pending.remove(key)?;
        self.buffered -= partial.bytes;
        Some(partial)
    }

    /// Drops partial messages older than the timeout, returning how many.
    pub fn evict_expired(&mut self) -> usize {
        self.evict_older_than(Instant::now())
    }

    /// Drops partial messages that started before `now - timeout`.
    pub fn evict_older_than(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let before = self.pending.len();
        let mut freed = 0;
        self.pending.retain(|_, partial| {
            let keep = now.saturating_duration_since(partial.started) < timeout;
            if !keep {
                freed += partial.bytes;
            }
            keep
        });
        self.buffered -= freed;
        before - self.pending.len()
    }

    /// Number of messages with pieces still missing.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Body bytes held for incomplete messages.
    pub fn buffered(&self) -> usize {
        self.buffered
    }
}

fn merge(partial: Partial, first_serial: u16) -> Frame {
    let mut body = BytesMut::with_capacity(partial.bytes);
    for part in partial.parts.values() {
        body.extend_from_slice(part);
    }

    let mut header = partial.header;
    header.subpackage = None;
    header.properties = header.properties.with_subpackage(false);
    header.serial_number = first_serial;
    Frame::new(header, body.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Header {
        Header::new(0x0801, "13800138000", 100)
    }

    #[test]
    fn test_split_small_body_is_single_frame() {
        let frames = split(&header(), &[1, 2, 3], 512).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.subpackage, None);
        assert_eq!(frames[0].body.as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn test_split_assigns_sequence_and_serials() {
        let body: Vec<u8> = (0..250).map(|i| i as u8).collect();
        let frames = split(&header(), &body, 100).unwrap();

        assert_eq!(frames.len(), 3);
        for (i, frame) in frames.iter().enumerate() {
            let info = frame.header.subpackage.unwrap();
            assert_eq!(info.total, 3);
            assert_eq!(info.seq, i as u16 + 1);
            assert_eq!(frame.header.serial_number, 100 + i as u16);
            assert!(frame.header.properties.is_subpackage());
        }
        assert_eq!(frames[2].body.len(), 50);
    }

    #[test]
    fn test_reassemble_out_of_order() {
        let body: Vec<u8> = (0..250).map(|i| i as u8).collect();
        let mut frames = split(&header(), &body, 100).unwrap();
        frames.swap(0, 2);

        let mut reassembler = Reassembler::new(Duration::from_secs(60));
        let mut merged = None;
        for frame in frames {
            let encoded = frame.encode().unwrap();
            let decoded = Frame::decode(&encoded).unwrap();
            if let Some(frame) = reassembler.push(decoded).unwrap() {
                merged = Some(frame);
            }
        }

        let merged = merged.unwrap();
        assert_eq!(merged.body.as_ref(), body.as_slice());
        assert_eq!(merged.header.serial_number, 100);
        assert_eq!(merged.header.subpackage, None);
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_unsplit_frame_passes_through() {
        let mut reassembler = Reassembler::new(Duration::from_secs(60));
        let frame = Frame::new(header(), vec![1, 2]);
        assert_eq!(reassembler.push(frame.clone()).unwrap(), Some(frame));
    }

    #[test]
    fn test_invalid_sequence_rejected() {
        let mut reassembler = Reassembler::new(Duration::from_secs(60));
        let frame = Frame::new(header().with_subpackage(2, 3), vec![1]);
        assert!(matches!(
            reassembler.push(frame),
            Err(ProtocolError::InvalidBody { .. })
        ));
    }

    #[test]
    fn test_evict_expired_partials() {
        let body = vec![0u8; 300];
        let frames = split(&header(), &body, 100).unwrap();

        let mut reassembler = Reassembler::new(Duration::from_secs(10));
        assert!(reassembler.push(frames[0].clone()).unwrap().is_none());
        assert_eq!(reassembler.pending(), 1);

        assert_eq!(reassembler.evict_older_than(Instant::now()), 0);
        let later = Instant::now() + Duration::from_secs(11);
        assert_eq!(reassembler.evict_older_than(later), 1);
        assert_eq!(reassembler.pending(), 0);
    }

    fn first_piece(serial: u16, len: usize) -> Frame {
        Frame::new(header_with_serial(serial).with_subpackage(u16::MAX, 1), vec![0xAB; len])
    }

    fn header_with_serial(serial: u16) -> Header {
        Header::new(0x0801, "13800138000", serial)
    }

    #[test]
    fn test_pending_cap_drops_oldest_message() {
        let mut reassembler = Reassembler::with_limits(Duration::from_secs(60), 2, usize::MAX);
        assert!(reassembler.push(first_piece(10, 100)).unwrap().is_none());
        assert!(reassembler.push(first_piece(20, 100)).unwrap().is_none());

        assert!(matches!(
            reassembler.push(first_piece(30, 100)),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
        assert_eq!(reassembler.pending(), 2);
        assert_eq!(reassembler.buffered(), 200);

        // The message starting at serial 10 was the one dropped
        let second = Frame::new(header_with_serial(11).with_subpackage(u16::MAX, 2), vec![1]);
        assert!(reassembler.push(second).is_err());
        assert_eq!(reassembler.pending(), 2);
    }

    #[test]
    fn test_byte_cap_bounds_many_distinct_messages() {
        let mut reassembler = Reassembler::with_limits(Duration::from_secs(60), 10_000, 4_000);
        let mut rejected = 0;
        for i in 0..20_000u16 {
            if reassembler.push(first_piece(i.wrapping_mul(3), 1000)).is_err() {
                rejected += 1;
            }
            assert!(reassembler.buffered() <= 4_000);
        }
        assert!(rejected > 0);
        assert_eq!(reassembler.pending(), 4);
    }

    #[test]
    fn test_oversized_message_dropped() {
        let body = vec![0u8; 300];
        let frames = split(&header(), &body, 100).unwrap();

        let mut reassembler = Reassembler::with_limits(Duration::from_secs(60), 8, 150);
        assert!(reassembler.push(frames[0].clone()).unwrap().is_none());
        assert!(matches!(
            reassembler.push(frames[1].clone()),
            Err(ProtocolError::FrameTooLarge { size: 200, max: 150 })
        ));
        assert_eq!(reassembler.pending(), 0);
        assert_eq!(reassembler.buffered(), 0);
    }

    #[test]
    fn test_completion_releases_buffered_bytes() {
        let body = vec![7u8; 250];
        let frames = split(&header(), &body, 100).unwrap();

        let mut reassembler = Reassembler::with_limits(Duration::from_secs(60), 1, 250);
        assert!(reassembler.push(frames[0].clone()).unwrap().is_none());
        assert!(reassembler.push(frames[1].clone()).unwrap().is_none());
        assert_eq!(reassembler.buffered(), 200);
        let merged = reassembler.push(frames[2].clone()).unwrap().unwrap();
        assert_eq!(merged.body.len(), 250);
        assert_eq!(reassembler.buffered(), 0);

        let frames = split(&header_with_serial(500), &body, 100).unwrap();
        reassembler.push(frames[0].clone()).unwrap();
        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(reassembler.evict_older_than(later), 1);
        assert_eq!(reassembler.buffered(), 0);
    }
}
