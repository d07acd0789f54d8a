//! Common Utilities
//!
//! Small helpers shared by the codec and the protocol layers

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Number of bytes needed to hold `bits` bits
pub fn bits_to_bytes(bits: usize) -> usize {
    (bits + 7) / 8
}
