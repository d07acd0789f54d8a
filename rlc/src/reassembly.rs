//! Resegment reassembly
//!
//! Collects the byte ranges of one PDU that arrived as resegments until the
//! whole payload is known, then rebuilds the PDU with its SDU boundaries.

use bytes::Bytes;
use tracing::trace;

use crate::pdu::{DataPdu, Sn};

/// A PDU received only in parts so far
#[derive(Debug, Clone, Default)]
pub struct IncompletePdu {
    data: Vec<u8>,
    known: Vec<bool>,
    /// `boundaries[i]` is set when an SDU starts or ends at byte `i`
    boundaries: Vec<bool>,
    length_known: bool,
}

impl IncompletePdu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one resegment. Returns true if it contributed new bytes.
    pub fn add(&mut self, segment: &DataPdu) -> bool {
        let start = segment.segment_offset.unwrap_or(0);
        let end = start + segment.payload_size();
        let known_before = self.known_count();

        if end > self.data.len() {
            self.data.resize(end, 0);
            self.known.resize(end, false);
            self.boundaries.resize(end + 1, false);
        }
        if segment.last_segment {
            self.length_known = true;
        }

        let mut position = start;
        for (i, piece) in segment.segments.iter().enumerate() {
            if i > 0 || !segment.f0 {
                self.boundaries[position] = true;
            }
            self.data[position..position + piece.len()].copy_from_slice(piece);
            self.known[position..position + piece.len()].fill(true);
            position += piece.len();
        }
        if !segment.f1 {
            self.boundaries[end] = true;
        }

        let added = self.known_count() - known_before;
        trace!("Resegment {}: [{}, {}) added {} new bytes", segment.sn, start, end, added);
        added > 0
    }

    fn known_count(&self) -> usize {
        self.known.iter().filter(|&&k| k).count()
    }

    /// Bytes received so far, total length if known
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.length_known && self.known.iter().all(|&k| k)
    }

    /// First missing byte range at or after `from`.
    ///
    /// The end is exclusive; `None` means the gap runs to the end of the
    /// PDU. Returns `None` when nothing is missing past `from`.
    pub fn next_unknown_range(&self, from: usize) -> Option<(usize, Option<usize>)> {
        let len = self.known.len();
        let start = (from..len).find(|&i| !self.known[i]).unwrap_or(len.max(from));
        if start >= len {
            return (!self.length_known).then_some((start, None));
        }
        let end = (start..len).find(|&i| self.known[i]);
        Some((start, end))
    }

    /// Rebuild the complete PDU. Only meaningful once [`is_complete`].
    ///
    /// [`is_complete`]: IncompletePdu::is_complete
    pub fn into_pdu(self, sn: Sn) -> DataPdu {
        let len = self.data.len();
        let data = Bytes::from(self.data);

        let mut segments = Vec::new();
        let mut start = 0;
        for i in 1..len {
            if self.boundaries[i] {
                segments.push(data.slice(start..i));
                start = i;
            }
        }
        segments.push(data.slice(start..len));

        DataPdu {
            sn,
            f0: !self.boundaries.first().copied().unwrap_or(false),
            f1: !self.boundaries.last().copied().unwrap_or(false),
            segments,
            ..Default::default()
        }
    }
}
