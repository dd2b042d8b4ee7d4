//! The table of known flash parts and per-manufacturer opcode defaults.
//!
//! Resolution is pure: a JEDEC ID either matches exactly one entry of [`PARTS`] or fails with
//! [`CatalogError::UnknownPart`]. Opcodes a part does not specify come from its manufacturer's
//! defaults, and manufacturers without an entry of their own fall through to
//! [`UNKNOWN_MANUFACTURER`], which supports nothing.

use super::{FlashProfile, OpcodeSet, Operation};
use crate::error::CatalogError;

/// Default opcodes for every part made by one manufacturer
#[derive(Debug, Copy, Clone)]
pub struct Manufacturer {
    /// Top byte of the JEDEC ID
    pub id: u8,
    pub name: &'static str,
    pub opcodes: OpcodeSet,
}

/// An entry of the part table
#[derive(Debug, Copy, Clone)]
pub struct FlashPart {
    pub name: &'static str,
    pub jedec_id: u32,
    pub size_kb: usize,
    pub page_size: usize,
    pub block_size_kb: usize,
    /// Part-specific opcodes; `None` entries defer to the manufacturer
    pub opcodes: OpcodeSet,
}

impl FlashPart {
    pub fn manufacturer_id(&self) -> u8 {
        (self.jedec_id >> 16) as u8
    }
}

const fn part(
    name: &'static str,
    jedec_id: u32,
    size_kb: usize,
    page_size: usize,
    block_size_kb: usize,
) -> FlashPart {
    FlashPart {
        name,
        jedec_id,
        size_kb,
        page_size,
        block_size_kb,
        opcodes: OpcodeSet::NONE,
    }
}

const fn manufacturer(
    id: u8,
    name: &'static str,
    opcodes: [Option<u8>; 7],
) -> Manufacturer {
    Manufacturer {
        id,
        name,
        opcodes: OpcodeSet {
            write_enable: opcodes[0],
            write_status_enable: opcodes[1],
            read: opcodes[2],
            fast_read: opcodes[3],
            program: opcodes[4],
            read_status: opcodes[5],
            chip_erase: opcodes[6],
        },
    }
}

//                           WREN        EWSR        READ        FREAD       PRGR        RDSR        CHER
pub const MANUFACTURERS: &[Manufacturer] = &[
    // M25P05 datasheet
    manufacturer(0x20, "ST", [Some(0x06), None, Some(0x03), None, Some(0x02), Some(0x05), None]),
    manufacturer(0xEF, "Winbond", [Some(0x06), Some(0x50), Some(0x03), Some(0x0B), Some(0x02), Some(0x05), Some(0xC7)]),
    manufacturer(0xC2, "Macronix", [Some(0x06), Some(0x50), Some(0x03), Some(0x0B), Some(0x02), Some(0x05), None]),
    // AT25DF041A datasheet
    manufacturer(0x1F, "Atmel", [Some(0x06), None, Some(0x03), Some(0x0B), Some(0x02), Some(0x05), Some(0x60)]),
    // SST25LF020A datasheet
    manufacturer(0xBF, "Microchip", [Some(0x06), Some(0x50), Some(0x03), Some(0x0B), Some(0x02), Some(0x05), None]),
];

/// Matched only when no entry of [`MANUFACTURERS`] has the requested ID
pub const UNKNOWN_MANUFACTURER: Manufacturer = Manufacturer {
    id: 0x00,
    name: "Unknown",
    opcodes: OpcodeSet::NONE,
};

pub const PARTS: &[FlashPart] = &[
    //   NAME            JEDEC ID   SIZE KB   PAGE  BLOCK KB
    part("AT25DF041A", 0x1F4401, 512, 256, 64),
    part("AT25DF161", 0x1F4602, 2 * 1024, 256, 64),
    part("AT26DF081A", 0x1F4501, 1024, 256, 64),
    part("AT26DF0161", 0x1F4600, 2 * 1024, 256, 64),
    part("AT26DF161A", 0x1F4601, 2 * 1024, 256, 64),
    part("AT25DF321", 0x1F4701, 4 * 1024, 256, 64),
    part("AT25DF512B", 0x1F6501, 64, 256, 32),
    part("AT25DF512B", 0x1F6500, 64, 256, 32),
    part("AT25DF021", 0x1F3200, 256, 256, 64),
    part("AT26DF641", 0x1F4800, 8 * 1024, 256, 64),
    part("M25P05", 0x202010, 64, 256, 32),
    part("M25P10", 0x202011, 128, 256, 32),
    part("M25P20", 0x202012, 256, 256, 64),
    part("M25P40", 0x202013, 512, 256, 64),
    part("M25P80", 0x202014, 1024, 256, 64),
    part("M25P16", 0x202015, 2 * 1024, 256, 64),
    part("M25P32", 0x202016, 4 * 1024, 256, 64),
    part("M25P64", 0x202017, 8 * 1024, 256, 64),
    part("W25X10", 0xEF3011, 128, 256, 64),
    part("W25X20", 0xEF3012, 256, 256, 64),
    part("W25X40", 0xEF3013, 512, 256, 64),
    part("W25X80", 0xEF3014, 1024, 256, 64),
    part("MX25L512", 0xC22010, 64, 256, 64),
    part("MX25L3205", 0xC22016, 4 * 1024, 256, 64),
    part("MX25L6405", 0xC22017, 8 * 1024, 256, 64),
    part("MX25L8005", 0xC22014, 1024, 256, 64),
    part("MX25L4005", 0xC22013, 512, 256, 64),
    part("SST25VF512", 0xBF4800, 64, 256, 32),
    part("SST25VF032", 0xBF4A00, 4 * 1024, 256, 32),
];

/// Look up a part by exact JEDEC ID.
pub fn find_part(jedec_id: u32) -> Option<&'static FlashPart> {
    PARTS.iter().find(|part| part.jedec_id == jedec_id)
}

/// Look up the defaults for a manufacturer byte. Never fails: unlisted manufacturers get
/// [`UNKNOWN_MANUFACTURER`].
pub fn find_manufacturer(id: u8) -> &'static Manufacturer {
    // A genuine manufacturer 0x00 is indistinguishable from the catch-all; listed IDs win.
    MANUFACTURERS
        .iter()
        .find(|manufacturer| manufacturer.id == id)
        .unwrap_or(&UNKNOWN_MANUFACTURER)
}

/// The effective opcode for `op`: the part's own, else the manufacturer default, else `None`.
pub fn resolve_opcode(part: &FlashPart, manufacturer: &Manufacturer, op: Operation) -> Option<u8> {
    part.opcodes.get(op).or(manufacturer.opcodes.get(op))
}

/// Resolve a JEDEC ID into a complete [`FlashProfile`].
pub fn resolve(jedec_id: u32) -> Result<FlashProfile, CatalogError> {
    let part = find_part(jedec_id).ok_or(CatalogError::UnknownPart { jedec_id })?;
    let manufacturer = find_manufacturer(part.manufacturer_id());

    Ok(FlashProfile {
        jedec_id: part.jedec_id,
        name: part.name,
        manufacturer: manufacturer.name,
        size_bytes: part.size_kb * 1024,
        page_size: part.page_size,
        block_size: part.block_size_kb * 1024,
        opcodes: part.opcodes.or(&manufacturer.opcodes),
    })
}

#[test]
fn test_resolve_every_known_part() {
    for part in PARTS {
        let profile = resolve(part.jedec_id).unwrap();
        assert_eq!(profile.jedec_id, part.jedec_id);
        assert_eq!(profile.name, part.name);
        assert_eq!(profile.size_bytes, part.size_kb * 1024);
    }
}

#[test]
fn test_resolve_unknown_part() {
    for jedec_id in [0x000000, 0xEF4018, 0xFFFFFF] {
        assert!(matches!(
            resolve(jedec_id),
            Err(CatalogError::UnknownPart { jedec_id: id }) if id == jedec_id
        ));
    }
}

#[test]
fn test_resolve_w25x10() {
    let profile = resolve(0xEF3011).unwrap();
    assert_eq!(profile.name, "W25X10");
    assert_eq!(profile.manufacturer, "Winbond");
    assert_eq!(profile.size_bytes, 131072);
    assert_eq!(profile.page_size, 256);
    assert_eq!(profile.block_size, 65536);
    assert_eq!(profile.opcode(Operation::ChipErase), Some(0xC7));
    assert_eq!(profile.opcode(Operation::WriteStatusEnable), Some(0x50));
}

#[test]
fn test_chip_erase_unsupported_is_not_an_error() {
    let profile = resolve(0xC22016).unwrap();
    assert!(!profile.has_chip_erase());
    assert_eq!(profile.opcode(Operation::Program), Some(0x02));

    let profile = resolve(0x202013).unwrap();
    assert_eq!(profile.opcode(Operation::WriteStatusEnable), None);
    assert_eq!(profile.opcode(Operation::FastRead), None);
}

#[test]
fn test_resolve_opcode_precedence() {
    let atmel = find_manufacturer(0x1F);
    let mut custom = part("custom", 0x1F0000, 64, 256, 32);
    custom.opcodes.chip_erase = Some(0xC7);

    // Part-specific value beats the manufacturer default
    assert_eq!(resolve_opcode(&custom, atmel, Operation::ChipErase), Some(0xC7));
    // Missing part value falls back to the manufacturer
    assert_eq!(resolve_opcode(&custom, atmel, Operation::Read), Some(0x03));
    // Neither defines it
    assert_eq!(resolve_opcode(&custom, atmel, Operation::WriteStatusEnable), None);
}

#[test]
fn test_manufacturer_fallback() {
    assert_eq!(find_manufacturer(0xEF).name, "Winbond");

    let unknown = find_manufacturer(0x9D);
    assert_eq!(unknown.name, "Unknown");
    let orphan = part("orphan", 0x9D1234, 64, 256, 32);
    for op in Operation::ALL {
        assert_eq!(resolve_opcode(&orphan, unknown, op), None);
    }
}

#[test]
fn test_manufacturer_zero_is_the_catch_all() {
    // 0x00 is both a possible manufacturer byte and the catch-all's id; it lands on the catch-all
    let zero = find_manufacturer(0x00);
    assert_eq!(zero.name, "Unknown");
    assert_eq!(zero.opcodes, OpcodeSet::NONE);
    assert!(MANUFACTURERS.iter().all(|m| m.id != 0x00));
}
