//! RLC AM STATUS PDU
//!
//! ```text
//! D/C(1)=0 CPT(3)=000 ACK_SN(10) E1(1)
//! { NACK_SN(10) E1(1) E2(1) [SOstart(15) SOend(15)] }
//! padding to the next octet
//! ```
//!
//! Segment NACK ranges are end-exclusive byte offsets into the original
//! PDU payload. An end of `0x7FFF` means "up to the end of the PDU".

use bytes::Bytes;
use common::bits::{BitReader, BitWriter, Field};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::pdu::{Sn, SN_BITS, SO_BITS};
use crate::RlcError;

/// Fixed part of a STATUS PDU in bits
pub const STATUS_HEADER_BITS: usize = 15;
/// One whole-PDU NACK in bits
pub const NACK_BITS: usize = 12;
/// One segment NACK in bits
pub const NACK_SEGMENT_BITS: usize = 42;
/// SOend value meaning "to the end of the PDU"
pub const SO_END: u32 = (1 << SO_BITS) - 1;

const CPT_BITS: u32 = 3;

/// Control PDU types
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum ControlPduType {
    Status = 0,
}

/// Byte range of a partially missing PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackSegment {
    pub start: usize,
    /// Exclusive end; `None` runs to the end of the PDU
    pub end: Option<usize>,
}

/// Negative acknowledgement for one sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nack {
    pub sn: Sn,
    /// `None` NACKs the whole PDU
    pub segment: Option<NackSegment>,
}

impl Nack {
    pub fn pdu(sn: Sn) -> Self {
        Self { sn, segment: None }
    }

    pub fn segment(sn: Sn, start: usize, end: Option<usize>) -> Self {
        Self {
            sn,
            segment: Some(NackSegment { start, end }),
        }
    }
}

/// ACK/NACK report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusPdu {
    /// Everything below this SN and not NACKed was received
    pub ack_sn: Sn,
    pub nacks: Vec<Nack>,
}

impl StatusPdu {
    /// Encoded size in bytes
    pub fn size(&self) -> usize {
        let bits: usize = STATUS_HEADER_BITS
            + self
                .nacks
                .iter()
                .map(|nack| match nack.segment {
                    Some(_) => NACK_SEGMENT_BITS,
                    None => NACK_BITS,
                })
                .sum::<usize>();
        common::bits_to_bytes(bits)
    }

    pub fn encode(&self) -> Bytes {
        let mut writer = BitWriter::with_capacity(self.size());
        writer.push(
            Field::flag(false)
                + Field::new(CPT_BITS, ControlPduType::Status as u32)
                + Field::new(SN_BITS, self.ack_sn.value())
                + Field::flag(!self.nacks.is_empty()),
        );

        for (i, nack) in self.nacks.iter().enumerate() {
            let more = i + 1 < self.nacks.len();
            writer.push(
                Field::new(SN_BITS, nack.sn.value())
                    + Field::flag(more)
                    + Field::flag(nack.segment.is_some()),
            );
            if let Some(segment) = nack.segment {
                let end = segment.end.map_or(SO_END, |end| (end as u32).min(SO_END));
                writer.push_bits(SO_BITS, segment.start as u32);
                writer.push_bits(SO_BITS, end);
            }
        }

        writer.pad_to_octet();
        writer.freeze()
    }

    pub fn decode(pdu: &[u8]) -> Result<Self, RlcError> {
        let mut reader = BitReader::new(pdu);

        if reader.read_bit()? {
            return Err(RlcError::InvalidPdu("data PDU where control PDU expected"));
        }
        let cpt = reader.read_bits(CPT_BITS)?;
        let Some(ControlPduType::Status) = ControlPduType::from_u32(cpt) else {
            return Err(RlcError::UnsupportedControlPdu(cpt));
        };

        let ack_sn = Sn::new(reader.read_bits(SN_BITS)?);
        let mut more = reader.read_bit()?;
        let mut nacks = Vec::new();

        while more {
            let sn = Sn::new(reader.read_bits(SN_BITS)?);
            more = reader.read_bit()?;
            let has_segment = reader.read_bit()?;
            if has_segment {
                let start = reader.read_bits(SO_BITS)? as usize;
                let end = reader.read_bits(SO_BITS)?;
                let end = (end != SO_END).then_some(end as usize);
                nacks.push(Nack::segment(sn, start, end));
            } else {
                nacks.push(Nack::pdu(sn));
            }
        }

        Ok(Self { ack_sn, nacks })
    }
}
