//! Useful traits and other utilities that don't really belong anywhere else.

/// Convenience methods for operating on `[u8]`s that hold flash contents
pub trait BlankExt {
    /// Does this slice contain only the erased (all-1s) bit pattern?
    fn is_blank(&self) -> bool;
}

impl BlankExt for [u8] {
    fn is_blank(&self) -> bool {
        self.iter().all(|&x| x == 0xFF)
    }
}

/// Split the low 24 bits of `value` into three bytes, most significant first.
pub fn be24(value: u32) -> [u8; 3] {
    let [_, hi, mid, lo] = value.to_be_bytes();
    [hi, mid, lo]
}

/// Join up to three bytes, most significant first, into one value.
pub fn from_be24(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .take(3)
        .fold(0, |acc, &byte| (acc << 8) | u32::from(byte))
}

#[test]
fn test_is_blank() {
    assert!([0xFFu8; 256][..].is_blank());
    assert!([0u8; 0][..].is_blank());
    assert!(![0xFF, 0xFF, 0xFE][..].is_blank());
}

#[test]
fn test_be24() {
    assert_eq!(be24(0x12_3456), [0x12, 0x34, 0x56]);
    assert_eq!(be24(0xAB12_3456), [0x12, 0x34, 0x56]);
    assert_eq!(from_be24(&[0xEF, 0x30, 0x11]), 0xEF3011);
    assert_eq!(from_be24(&[0x30, 0x11]), 0x3011);
    assert_eq!(from_be24(&be24(0x01_0203)), 0x01_0203);
}
