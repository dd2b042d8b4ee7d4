//! The RTD2660 ISP register window.
//!
//! ```text
//! 0x60  common_inst_en        0x67..0x69  common_inst_read_port0..2
//! 0x61  common_op_code        0x6a  read_op_code
//! 0x62  wren_op_code          0x6b  fast_read_op_code
//! 0x63  ewsr_op_code          0x6d  program_op_code
//! 0x64..0x66  flash_prog_isp0..2   (also the CRC start address)
//! 0x6e  read_status_register_op_code
//! 0x6f  program_instruction   0x70  program_data_port
//! 0x71  program_length        0x72..0x74  CRC_end_addr0..2
//! 0x75  CRC_result
//! ```

use bitflags::bitflags;
use deku::prelude::*;

use crate::error::ProtocolError;
use crate::flash::Operation;

pub const COMMON_INST_EN: u8 = 0x60;
pub const COMMON_OP_CODE: u8 = 0x61;
pub const WREN_OP_CODE: u8 = 0x62;
pub const EWSR_OP_CODE: u8 = 0x63;
pub const FLASH_PROG_ISP: [u8; 3] = [0x64, 0x65, 0x66];
pub const COMMON_INST_READ_PORT: [u8; 3] = [0x67, 0x68, 0x69];
pub const READ_OP_CODE: u8 = 0x6A;
pub const FAST_READ_OP_CODE: u8 = 0x6B;
pub const PROGRAM_OP_CODE: u8 = 0x6D;
pub const READ_STATUS_REGISTER_OP_CODE: u8 = 0x6E;
pub const PROGRAM_INSTRUCTION: u8 = 0x6F;
pub const PROGRAM_DATA_PORT: u8 = 0x70;
pub const PROGRAM_LENGTH: u8 = 0x71;
pub const CRC_END_ADDR: [u8; 3] = [0x72, 0x73, 0x74];
pub const CRC_RESULT: u8 = 0x75;

/// The opcode register the bridge consults for each operation, if it has one
pub fn opcode_register(op: Operation) -> Option<u8> {
    match op {
        Operation::WriteEnable => Some(WREN_OP_CODE),
        Operation::WriteStatusEnable => Some(EWSR_OP_CODE),
        Operation::Read => Some(READ_OP_CODE),
        Operation::FastRead => Some(FAST_READ_OP_CODE),
        Operation::Program => Some(PROGRAM_OP_CODE),
        Operation::ReadStatus => Some(READ_STATUS_REGISTER_OP_CODE),
        Operation::ChipErase => None,
    }
}

bitflags! {
    /// Bits of the `program_instruction` register
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProgramInstruction: u8 {
        /// Software reset of the flash controller
        const RST_FLASH_CTRL = 1 << 0;
        /// Read-only; set when the CRC engine finishes, cleared by the next CRC_START
        const CRC_DONE       = 1 << 1;
        /// Start a CRC over flash_prog_isp..CRC_end_addr; auto-clears once CRC_DONE is set
        const CRC_START      = 1 << 2;
        /// Read-only; the program buffer can accept data
        const PROG_BUF_WR_EN = 1 << 4;
        /// Write 1 to start programming; auto-clears when finished
        const PROG_EN        = 1 << 5;
        /// 0: normal, 1: AAI
        const PROG_MODE      = 1 << 6;
        /// Every other register is inaccessible while this is clear
        const ISP_EN         = 1 << 7;
    }
}

/// The instruction types understood by `common_inst_en`
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum InstructionKind {
    Noop = 0b000,
    Write = 0b001,
    Read = 0b010,
    WriteAfterWren = 0b011,
    WriteAfterEwsr = 0b100,
    Erase = 0b101,
}

impl InstructionKind {
    pub fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            0b000 => Self::Noop,
            0b001 => Self::Write,
            0b010 => Self::Read,
            0b011 => Self::WriteAfterWren,
            0b100 => Self::WriteAfterEwsr,
            0b101 => Self::Erase,
            _ => return None,
        })
    }
}

/// The `common_inst_en` register, most significant field first
#[derive(Debug, Copy, Clone, Eq, PartialEq, DekuRead, DekuWrite)]
pub struct CommonInstControl {
    #[deku(bits = "3")]
    pub kind: u8,
    #[deku(bits = "2")]
    pub write_num: u8,
    #[deku(bits = "2")]
    pub read_num: u8,
    #[deku(bits = "1")]
    pub enable: u8,
}

impl CommonInstControl {
    /// Build a control value with the enable bit clear; counts are clamped to their 2-bit fields.
    pub fn new(kind: InstructionKind, read_num: u8, write_num: u8) -> Self {
        Self {
            kind: kind as u8,
            write_num: write_num & 0b11,
            read_num: read_num & 0b11,
            enable: 0,
        }
    }

    pub fn enabled(self) -> Self {
        Self { enable: 1, ..self }
    }

    pub fn instruction(&self) -> Option<InstructionKind> {
        InstructionKind::from_bits(self.kind)
    }

    pub fn encode(&self) -> Result<u8, ProtocolError> {
        let bytes = self
            .to_bytes()
            .map_err(|e| ProtocolError::Encoding(e.to_string()))?;
        bytes
            .first()
            .copied()
            .ok_or_else(|| ProtocolError::Encoding("empty control value".into()))
    }

    pub fn decode(value: u8) -> Result<Self, ProtocolError> {
        let (_, control) = Self::from_bytes((&[value][..], 0))
            .map_err(|e| ProtocolError::Encoding(e.to_string()))?;
        Ok(control)
    }
}

#[test]
fn test_common_inst_encoding() {
    let jedec = CommonInstControl::new(InstructionKind::Read, 3, 0);
    assert_eq!(jedec.encode().unwrap(), 0b010_00_11_0);
    assert_eq!(jedec.enabled().encode().unwrap(), 0b010_00_11_1);

    let erase = CommonInstControl::new(InstructionKind::Erase, 0, 0).enabled();
    assert_eq!(erase.encode().unwrap(), 0b101_00_00_1);

    let wrsr = CommonInstControl::new(InstructionKind::WriteAfterEwsr, 0, 1);
    assert_eq!(wrsr.encode().unwrap(), 0b100_01_00_0);
}

#[test]
fn test_common_inst_clamps_counts() {
    let control = CommonInstControl::new(InstructionKind::Write, 7, 6);
    assert_eq!(control.read_num, 3);
    assert_eq!(control.write_num, 2);
}

#[test]
fn test_common_inst_decode() {
    let control = CommonInstControl::decode(0b011_01_10_1).unwrap();
    assert_eq!(control.instruction(), Some(InstructionKind::WriteAfterWren));
    assert_eq!(control.write_num, 1);
    assert_eq!(control.read_num, 2);
    assert_eq!(control.enable, 1);
    assert_eq!(CommonInstControl::decode(0b111_00_00_0).unwrap().instruction(), None);
}
