//! Access-key obfuscation used by EPSON-CTRL EEPROM writes.
//!
//! The firmware expects the write key shifted by one position per byte.
//! The shift wraps modulo 256, so the transform is a bijection over all
//! byte values and [`deobfuscate`] is always its exact inverse.

/// Per-byte shift applied by the device firmware.
pub const SHIFT: u8 = 1;

/// Forward shift of a single byte.
pub fn obfuscate_byte(b: u8) -> u8 {
    b.wrapping_add(SHIFT)
}

/// Inverse of [`obfuscate_byte`].
pub fn deobfuscate_byte(b: u8) -> u8 {
    b.wrapping_sub(SHIFT)
}

/// Turn a key label into its on-wire form.
pub fn obfuscate(plain: &[u8]) -> Vec<u8> {
    plain.iter().map(|&b| obfuscate_byte(b)).collect()
}

/// Recover the key label from its on-wire form.
pub fn deobfuscate(cipher: &[u8]) -> Vec<u8> {
    cipher.iter().map(|&b| deobfuscate_byte(b)).collect()
}
