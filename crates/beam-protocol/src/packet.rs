use std::collections::HashMap;

use tracing::trace;

use crate::error::ProtocolError;

/// Every media datagram starts with this fixed header, big-endian throughout.
///
/// Wire format:
/// ```text
/// [sequence: u16 BE] [timestamp: u32 BE] [flags: u8] [reserved: u8]
/// [fragment_index: u16 BE] [fragment_count: u16 BE] [payload: variable]
/// ```
pub const HEADER_SIZE: usize = 12;

/// Maximum total UDP datagram size.
pub const MAX_DATAGRAM: usize = 1400;

/// Maximum payload per fragment.
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM - HEADER_SIZE;

/// Flag bit: this NAL is part of a keyframe (SPS, PPS, or IDR).
pub const FLAG_KEYFRAME: u8 = 0b0000_0001;
/// Flag bit: first fragment of a NAL.
pub const FLAG_NAL_START: u8 = 0b0000_0010;
/// Flag bit: last fragment of a NAL.
pub const FLAG_NAL_END: u8 = 0b0000_0100;

/// Reassembly records older than this many 90 kHz ticks (~1 s) are evicted.
pub const REASSEMBLY_GC_WINDOW: u32 = 90_000;

/// The parsed 12-byte datagram header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Per-sender monotonic, wraps at u16::MAX.
    pub sequence: u16,
    /// 90 kHz media clock for video, opaque packet counter for audio.
    pub timestamp: u32,
    /// Combination of the `FLAG_*` bits.
    pub flags: u8,
    /// 0-based fragment position within this NAL.
    pub fragment_index: u16,
    /// Total fragments for this NAL, >= 1.
    pub fragment_count: u16,
}

impl PacketHeader {
    pub fn is_keyframe(&self) -> bool {
        self.flags & FLAG_KEYFRAME != 0
    }

    pub fn is_start(&self) -> bool {
        self.flags & FLAG_NAL_START != 0
    }

    pub fn is_end(&self) -> bool {
        self.flags & FLAG_NAL_END != 0
    }

    /// Serialize to the 12-byte wire layout. The reserved byte is always 0.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.sequence.to_be_bytes());
        buf[2..6].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[6] = self.flags;
        buf[7] = 0; // reserved
        buf[8..10].copy_from_slice(&self.fragment_index.to_be_bytes());
        buf[10..12].copy_from_slice(&self.fragment_count.to_be_bytes());
        buf
    }

    /// Parse the leading 12 bytes of a datagram. The reserved byte is ignored.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                expected: HEADER_SIZE,
                got: data.len(),
            });
        }
        Ok(Self {
            sequence: u16::from_be_bytes([data[0], data[1]]),
            timestamp: u32::from_be_bytes([data[2], data[3], data[4], data[5]]),
            flags: data[6],
            fragment_index: u16::from_be_bytes([data[8], data[9]]),
            fragment_count: u16::from_be_bytes([data[10], data[11]]),
        })
    }
}

/// Fragment one NAL unit into ready-to-send datagrams.
///
/// `sequence` is the sender's wrapping counter; it is advanced by the number
/// of datagrams produced. The keyframe flag is replicated on every fragment;
/// the first fragment carries `FLAG_NAL_START`, the last `FLAG_NAL_END`
/// (a single-fragment NAL carries both).
pub fn fragment_nal(
    nal: &[u8],
    is_keyframe: bool,
    timestamp: u32,
    sequence: &mut u16,
) -> Vec<Vec<u8>> {
    let count = nal.len().div_ceil(MAX_PAYLOAD).max(1);
    let mut datagrams = Vec::with_capacity(count);

    for i in 0..count {
        let start = i * MAX_PAYLOAD;
        let end = (start + MAX_PAYLOAD).min(nal.len());
        let chunk = &nal[start..end];

        let mut flags = 0u8;
        if is_keyframe {
            flags |= FLAG_KEYFRAME;
        }
        if i == 0 {
            flags |= FLAG_NAL_START;
        }
        if i == count - 1 {
            flags |= FLAG_NAL_END;
        }

        let header = PacketHeader {
            sequence: *sequence,
            timestamp,
            flags,
            fragment_index: i as u16,
            fragment_count: count as u16,
        };
        *sequence = sequence.wrapping_add(1);

        let mut datagram = Vec::with_capacity(HEADER_SIZE + chunk.len());
        datagram.extend_from_slice(&header.encode());
        datagram.extend_from_slice(chunk);
        datagrams.push(datagram);
    }

    datagrams
}

/// A NAL unit recovered from one or more datagrams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledNal {
    pub data: Vec<u8>,
    pub is_keyframe: bool,
    pub timestamp: u32,
}

/// In-flight reassembly state for one timestamp.
struct FragmentRecord {
    /// Declared total fragment count; last write wins, fragments of one NAL
    /// agree by protocol.
    expected: u16,
    /// Full flags byte of the fragment that carried `FLAG_NAL_START`.
    start_flags: Option<u8>,
    fragments: HashMap<u16, Vec<u8>>,
}

/// Reassembles fragmented NAL units from raw datagrams.
///
/// Records are keyed by the 90 kHz timestamp so NALs from different frames
/// can interleave on the wire. Index-slot insertion makes duplicate
/// fragments idempotent; completed NALs are emitted immediately, with no
/// attempt at cross-NAL timestamp ordering. Stale records are evicted one
/// GC window (~1 s) after a newer packet arrives.
pub struct Reassembler {
    records: HashMap<u32, FragmentRecord>,
    gc_window: u32,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::with_gc_window(REASSEMBLY_GC_WINDOW)
    }

    pub fn with_gc_window(gc_window: u32) -> Self {
        Self {
            records: HashMap::new(),
            gc_window,
        }
    }

    /// Feed one raw datagram (header + payload).
    ///
    /// Returns the completed NAL if this datagram finished one. Truncated
    /// datagrams are dropped silently.
    pub fn ingest(&mut self, datagram: &[u8]) -> Option<AssembledNal> {
        let header = match PacketHeader::decode(datagram) {
            Ok(h) => h,
            Err(_) => {
                trace!(len = datagram.len(), "dropping truncated datagram");
                return None;
            }
        };
        let payload = &datagram[HEADER_SIZE..];

        let record = self
            .records
            .entry(header.timestamp)
            .or_insert_with(|| FragmentRecord {
                expected: header.fragment_count,
                start_flags: None,
                fragments: HashMap::new(),
            });
        record.expected = header.fragment_count;
        if header.is_start() {
            record.start_flags = Some(header.flags);
        }
        record.fragments.insert(header.fragment_index, payload.to_vec());

        let completed = if record.fragments.len() == record.expected as usize {
            let record = self.records.remove(&header.timestamp).unwrap();
            let mut data = Vec::new();
            for i in 0..record.expected {
                if let Some(chunk) = record.fragments.get(&i) {
                    data.extend_from_slice(chunk);
                }
            }
            let flags = record.start_flags.unwrap_or(0);
            Some(AssembledNal {
                data,
                is_keyframe: flags & FLAG_KEYFRAME != 0,
                timestamp: header.timestamp,
            })
        } else {
            None
        };

        self.collect_garbage(header.timestamp);
        completed
    }

    /// Number of incomplete records currently held.
    pub fn pending(&self) -> usize {
        self.records.len()
    }

    /// Evict records more than one GC window older than `arrived`.
    ///
    /// The age comparison is wrap-aware: a record is "older" when the
    /// wrapping distance to `arrived` is below half the clock range, so a
    /// record whose timestamp is ahead of `arrived` is never evicted.
    fn collect_garbage(&mut self, arrived: u32) {
        let window = self.gc_window;
        self.records.retain(|&ts, _| {
            let age = arrived.wrapping_sub(ts);
            !(age > window && age < 0x8000_0000)
        });
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}
