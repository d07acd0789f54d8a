//! RLC AM Data PDU
//!
//! Header layout (TS 36.322 6.2.1.4 and 6.2.1.5), MSB first:
//!
//! ```text
//! D/C(1)=1 RF(1) P(1) FI(2) E(1) SN(10)
//! [LSF(1) SO(15)]                          if RF
//! { E(1) LI(11) }                          once per segment but the last
//! padding to the next octet, then the segment payloads in order
//! ```
//!
//! The last segment has no length indicator; its length is whatever is
//! left of the PDU.

use bitflags::bitflags;
use bytes::Bytes;
use common::bits::{BitReader, BitWriter, Field};
use common::utils::bits_to_bytes;
use common::SeqNum;

use crate::RlcError;

/// Sequence number width for AM data PDUs
pub const SN_BITS: u32 = 10;
/// Segment offset width
pub const SO_BITS: u32 = 15;
/// Length indicator width
pub const LI_BITS: u32 = 11;
/// Largest segment that can carry an explicit length
pub const MAX_LI: usize = (1 << LI_BITS) - 1;
/// Largest SDU pulled from the upper layer at once
pub const MAX_SDU_SIZE: usize = 9000;
/// Largest data PDU built, so every payload offset fits in SO
pub const MAX_PDU_SIZE: usize = (1 << SO_BITS) - 1;

const HEADER_BITS: usize = 16;
const RESEGMENT_HEADER_BITS: usize = 16;
const LI_ENTRY_BITS: usize = 12;

/// AM sequence number
pub type Sn = SeqNum<SN_BITS>;

bitflags! {
    /// Fixed bits of the first header octet
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FirstOctet: u8 {
        const DATA = 0x80;
        const RESEGMENT = 0x40;
        const POLL = 0x20;
    }
}

/// Fixed flags of a PDU without decoding it. Empty input has none set.
pub fn peek_flags(pdu: &[u8]) -> FirstOctet {
    pdu.first()
        .map(|&b| FirstOctet::from_bits_truncate(b))
        .unwrap_or(FirstOctet::empty())
}

/// True if `pdu` is a control PDU. Empty input is not.
pub fn is_control(pdu: &[u8]) -> bool {
    !pdu.is_empty() && !peek_flags(pdu).contains(FirstOctet::DATA)
}

/// Header size in bytes for `pieces` segments
pub fn header_size_for(pieces: usize, resegment: bool) -> usize {
    if pieces == 0 {
        return 0;
    }
    bits_to_bytes(
        HEADER_BITS + RESEGMENT_HEADER_BITS * resegment as usize + LI_ENTRY_BITS * (pieces - 1),
    )
}

/// Logical contents of one AM data PDU or PDU segment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataPdu {
    pub sn: Sn,
    pub poll: bool,
    /// First segment continues an SDU started in an earlier PDU
    pub f0: bool,
    /// Last segment continues into a later PDU
    pub f1: bool,
    pub segments: Vec<Bytes>,
    /// Byte offset into the original payload; `Some` marks a resegment
    pub segment_offset: Option<usize>,
    /// This resegment ends the original payload
    pub last_segment: bool,
}

impl DataPdu {
    pub fn is_resegment(&self) -> bool {
        self.segment_offset.is_some()
    }

    pub fn payload_size(&self) -> usize {
        self.segments.iter().map(Bytes::len).sum()
    }

    pub fn header_size(&self) -> usize {
        header_size_for(self.segments.len(), self.is_resegment())
    }

    pub fn total_size(&self) -> usize {
        self.header_size() + self.payload_size()
    }

    /// Serialize. The PDU must carry at least one segment.
    pub fn encode(&self) -> Bytes {
        debug_assert!(!self.segments.is_empty(), "encoding empty data PDU");
        let count = self.segments.len();
        let mut writer = BitWriter::with_capacity(self.total_size());

        writer.push(
            Field::flag(true)
                + Field::flag(self.is_resegment())
                + Field::flag(self.poll)
                + Field::flag(self.f0)
                + Field::flag(self.f1)
                + Field::flag(count > 1)
                + Field::new(SN_BITS, self.sn.value()),
        );

        if let Some(offset) = self.segment_offset {
            writer.push(Field::flag(self.last_segment) + Field::new(SO_BITS, offset as u32));
        }

        for (i, segment) in self.segments.iter().take(count.saturating_sub(1)).enumerate() {
            debug_assert!(segment.len() <= MAX_LI);
            writer.push(Field::flag(i + 2 < count) + Field::new(LI_BITS, segment.len() as u32));
        }
        writer.pad_to_octet();

        for segment in &self.segments {
            writer.put_slice(segment);
        }
        writer.freeze()
    }

    /// Parse a data PDU. Segments are zero-copy slices of `pdu`.
    pub fn decode(pdu: Bytes) -> Result<Self, RlcError> {
        let mut reader = BitReader::new(&pdu);

        if !reader.read_bit()? {
            return Err(RlcError::InvalidPdu("control PDU where data PDU expected"));
        }
        let resegment = reader.read_bit()?;
        let poll = reader.read_bit()?;
        let f0 = reader.read_bit()?;
        let f1 = reader.read_bit()?;
        let mut extension = reader.read_bit()?;
        let sn = Sn::new(reader.read_bits(SN_BITS)?);

        let (segment_offset, last_segment) = if resegment {
            let last_segment = reader.read_bit()?;
            let offset = reader.read_bits(SO_BITS)? as usize;
            (Some(offset), last_segment)
        } else {
            (None, false)
        };

        let mut lengths = Vec::new();
        while extension {
            extension = reader.read_bit()?;
            let length = reader.read_bits(LI_BITS)? as usize;
            if length == 0 {
                return Err(RlcError::InvalidPdu("zero length indicator"));
            }
            lengths.push(length);
        }

        let data_offset = reader.byte_offset();
        let explicit: usize = lengths.iter().sum();
        let implicit = pdu
            .len()
            .checked_sub(data_offset + explicit)
            .filter(|&n| n > 0)
            .ok_or(RlcError::InvalidPdu("length indicators exceed PDU size"))?;
        lengths.push(implicit);

        let mut segments = Vec::with_capacity(lengths.len());
        let mut position = data_offset;
        for length in lengths {
            segments.push(pdu.slice(position..position + length));
            position += length;
        }

        Ok(Self {
            sn,
            poll,
            f0,
            f1,
            segments,
            segment_offset,
            last_segment,
        })
    }

    /// Build a resegment carrying the payload bytes `[start, end)` of this
    /// PDU, or as much of the range as fits in `max_size` bytes.
    ///
    /// Returns `None` if the range is empty or `max_size` cannot hold a
    /// resegment header and one payload byte.
    pub fn resegment(&self, max_size: usize, start: usize, end: usize) -> Option<DataPdu> {
        let total = self.payload_size();
        let end = end.min(total);
        let max_size = max_size.min(MAX_PDU_SIZE);
        if start >= end || header_size_for(1, true) + 1 > max_size {
            return None;
        }

        let mut pdu = DataPdu {
            sn: self.sn,
            segment_offset: Some(start),
            ..Default::default()
        };
        let last_index = self.segments.len() - 1;
        let mut ends_sdu = false;
        let mut position = 0;

        for (i, segment) in self.segments.iter().enumerate() {
            let segment_start = position;
            let segment_end = position + segment.len();
            position = segment_end;

            if segment_end <= start {
                continue;
            }
            if segment_start >= end {
                break;
            }
            if let Some(previous) = pdu.segments.last() {
                let needed = pdu.payload_size() + 1 + header_size_for(pdu.segments.len() + 1, true);
                if previous.len() > MAX_LI || needed > max_size {
                    break;
                }
            }

            let from = start.max(segment_start) - segment_start;
            let to = end.min(segment_end) - segment_start;
            if pdu.segments.is_empty() {
                pdu.f0 = from > 0 || (i == 0 && self.f0);
            }
            pdu.segments.push(segment.slice(from..to));
            ends_sdu = to == segment.len() && !(i == last_index && self.f1);
        }

        let overflow = pdu.total_size().saturating_sub(max_size);
        if let Some(last) = pdu.segments.last_mut() {
            last.truncate(last.len() - overflow);
        }
        pdu.f1 = overflow > 0 || !ends_sdu;
        pdu.last_segment = start + pdu.payload_size() == total;
        Some(pdu)
    }
}

/// An SDU partly sent in earlier PDUs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SduInProgress {
    pub sdu: Bytes,
    /// Bytes of `sdu` already sent
    pub offset: usize,
}

/// Assembles one new data PDU from queued SDUs
#[derive(Debug)]
pub struct PduBuilder {
    pdu: DataPdu,
    max_size: usize,
    first_partial_sdu: Option<Bytes>,
}

impl PduBuilder {
    pub fn new(sn: Sn, max_size: usize) -> Self {
        Self {
            pdu: DataPdu {
                sn,
                ..Default::default()
            },
            max_size: max_size.min(MAX_PDU_SIZE),
            first_partial_sdu: None,
        }
    }

    /// True if one more segment of at least one byte would still fit
    pub fn room_for_more(&self) -> bool {
        if self.pdu.f1 {
            return false;
        }
        if self.pdu.segments.last().is_some_and(|s| s.len() > MAX_LI) {
            return false;
        }
        self.pdu.payload_size() + 1 + header_size_for(self.pdu.segments.len() + 1, false)
            <= self.max_size
    }

    /// Continue the SDU left over from the previous PDU, if any
    pub fn start(&mut self, carry: Option<&SduInProgress>) {
        let Some(carry) = carry else {
            return;
        };
        if !self.room_for_more() {
            return;
        }
        self.pdu.f0 = true;
        self.first_partial_sdu = Some(carry.sdu.clone());
        let rest = carry.sdu.slice(carry.offset..);
        if rest.len() > self.max_size.saturating_sub(header_size_for(1, false)) {
            self.pdu.f1 = true;
        }
        self.pdu.segments.push(rest);
    }

    pub fn add_sdu(&mut self, sdu: Bytes) {
        self.pdu.segments.push(sdu);
    }

    /// Cut the last segment to fit and update the carry-over state.
    ///
    /// Returns the PDU and, when it starts mid-SDU, the whole SDU its first
    /// segment belongs to. `None` if nothing was queued.
    pub fn finalize(
        mut self,
        carry: &mut Option<SduInProgress>,
    ) -> Option<(DataPdu, Option<Bytes>)> {
        let overflow = self.pdu.total_size().saturating_sub(self.max_size);
        self.pdu.f1 = overflow > 0;
        let continuation_only = self.pdu.segments.len() == 1 && self.pdu.f0 && self.pdu.f1;

        let last = self.pdu.segments.last_mut()?;
        debug_assert!(overflow < last.len());
        let kept = last.len() - overflow;

        if continuation_only {
            if let Some(carry) = carry.as_mut() {
                carry.offset += kept;
            }
        } else if self.pdu.f1 {
            *carry = Some(SduInProgress {
                sdu: last.clone(),
                offset: kept,
            });
        } else {
            *carry = None;
        }
        last.truncate(kept);

        Some((self.pdu, self.first_partial_sdu))
    }
}
