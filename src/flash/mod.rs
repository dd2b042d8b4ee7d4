//! Descriptions of the SPI NOR flash parts that can sit behind a scaler.

pub mod catalog;

use std::fmt;

pub use catalog::{resolve, FlashPart, Manufacturer};

/// Standard SPI flash opcodes that the programmer issues directly.
pub mod opcodes {
    /// Write Status Register
    pub const WRSR: u8 = 0x01;
    /// Read Data
    pub const READ: u8 = 0x03;
    /// Read JEDEC ID (manufacturer, memory type, capacity)
    pub const RDID: u8 = 0x9F;
}

/// The operations whose opcodes differ between flash parts
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Operation {
    WriteEnable,
    WriteStatusEnable,
    Read,
    FastRead,
    Program,
    ReadStatus,
    ChipErase,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::WriteEnable,
        Operation::WriteStatusEnable,
        Operation::Read,
        Operation::FastRead,
        Operation::Program,
        Operation::ReadStatus,
        Operation::ChipErase,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::WriteEnable => "wren",
            Operation::WriteStatusEnable => "ewsr",
            Operation::Read => "read",
            Operation::FastRead => "fast_read",
            Operation::Program => "program",
            Operation::ReadStatus => "read_status_register",
            Operation::ChipErase => "chip_erase",
        }
    }
}

/// One opcode per [`Operation`]; `None` means the operation is unsupported.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct OpcodeSet {
    pub write_enable: Option<u8>,
    pub write_status_enable: Option<u8>,
    pub read: Option<u8>,
    pub fast_read: Option<u8>,
    pub program: Option<u8>,
    pub read_status: Option<u8>,
    pub chip_erase: Option<u8>,
}

impl OpcodeSet {
    /// A set where every operation is unsupported
    pub const NONE: OpcodeSet = OpcodeSet {
        write_enable: None,
        write_status_enable: None,
        read: None,
        fast_read: None,
        program: None,
        read_status: None,
        chip_erase: None,
    };

    pub fn get(&self, op: Operation) -> Option<u8> {
        match op {
            Operation::WriteEnable => self.write_enable,
            Operation::WriteStatusEnable => self.write_status_enable,
            Operation::Read => self.read,
            Operation::FastRead => self.fast_read,
            Operation::Program => self.program,
            Operation::ReadStatus => self.read_status,
            Operation::ChipErase => self.chip_erase,
        }
    }

    /// Take every opcode from `self`, falling back to `defaults` where `self` has none.
    pub fn or(&self, defaults: &OpcodeSet) -> OpcodeSet {
        OpcodeSet {
            write_enable: self.write_enable.or(defaults.write_enable),
            write_status_enable: self.write_status_enable.or(defaults.write_status_enable),
            read: self.read.or(defaults.read),
            fast_read: self.fast_read.or(defaults.fast_read),
            program: self.program.or(defaults.program),
            read_status: self.read_status.or(defaults.read_status),
            chip_erase: self.chip_erase.or(defaults.chip_erase),
        }
    }
}

/// A flash part resolved from its JEDEC ID. Immutable once created.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FlashProfile {
    pub jedec_id: u32,
    pub name: &'static str,
    pub manufacturer: &'static str,
    pub size_bytes: usize,
    pub page_size: usize,
    pub block_size: usize,
    pub opcodes: OpcodeSet,
}

impl FlashProfile {
    pub fn opcode(&self, op: Operation) -> Option<u8> {
        self.opcodes.get(op)
    }

    pub fn has_chip_erase(&self) -> bool {
        self.opcodes.chip_erase.is_some()
    }
}

impl fmt::Display for FlashProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "jedec ID: {:06x} / Manufacturer: {} / Name: {} ({} KiB)",
            self.jedec_id,
            self.manufacturer,
            self.name,
            self.size_bytes / 1024
        )
    }
}

#[test]
fn test_opcode_set_or() {
    let part = OpcodeSet {
        read: Some(0x13),
        ..OpcodeSet::NONE
    };
    let defaults = OpcodeSet {
        write_enable: Some(0x06),
        read: Some(0x03),
        ..OpcodeSet::NONE
    };

    let merged = part.or(&defaults);
    assert_eq!(merged.get(Operation::Read), Some(0x13));
    assert_eq!(merged.get(Operation::WriteEnable), Some(0x06));
    assert_eq!(merged.get(Operation::ChipErase), None);
}
