//! CRC-32 tagging for durable label records.
//!
//! IEEE 802.3 CRC-32: reflected polynomial `0xEDB88320`, initial value
//! `0xFFFFFFFF`, final XOR `0xFFFFFFFF`. This detects bit flips and torn
//! writes of label records; it is not a MAC and offers no tamper resistance.

/// CRC-32 over the label bytes, excluding any terminator.
#[must_use]
pub fn label_crc(label: &str) -> u32 {
    crc32fast::hash(label.as_bytes())
}
