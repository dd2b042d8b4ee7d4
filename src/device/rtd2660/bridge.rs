//! The "common instruction" SPI bridge.
//!
//! One SPI transaction is described by the instruction type, opcode, up to three address/data
//! bytes written out after the opcode, and up to three response bytes read back. The scaler runs
//! it when the enable bit of `common_inst_en` is written and clears that bit when done.
//!
//! Bulk data does not go through the common instruction ports: reads stream out of the
//! auto-incrementing `program_data_port` after a READ instruction sets the start address, and
//! programs fill the same port before `PROG_EN` is pulsed.

use retry::{retry, OperationResult};

use super::regs::{self, CommonInstControl, InstructionKind, ProgramInstruction};
use crate::device::PollConfig;
use crate::error::{ProtocolError, Result};
use crate::flash::{opcodes, FlashProfile, Operation};
use crate::transport::Registers;
use crate::util::{be24, from_be24};

/// Largest single block transfer through `program_data_port`
pub const BLOCK_TRANSFER: usize = 32;

/// Bytes the flash accepts per program cycle
pub const WRITE_LATCH: usize = 256;

/// Borrowed access to the bridge of a scaler that is in ISP mode
#[derive(Debug)]
pub struct SpiBridge<'a, R: Registers> {
    regs: &'a mut R,
    poll: PollConfig,
}

impl<'a, R: Registers> SpiBridge<'a, R> {
    pub(super) fn new(regs: &'a mut R, poll: PollConfig) -> Self {
        Self { regs, poll }
    }

    /// Run one common instruction and return its response, packed most significant byte first.
    ///
    /// `read_num` and `write_num` are clamped to 0..=3 and `write_value` to 24 bits.
    pub fn common_instruction(
        &mut self,
        kind: InstructionKind,
        opcode: u8,
        read_num: u8,
        write_num: u8,
        write_value: u32,
    ) -> Result<u32> {
        let control = CommonInstControl::new(kind, read_num, write_num);
        log::trace!(
            "Common instruction {kind:?} opcode {opcode:#04x} (read {}, write {} of {:#08x})",
            control.read_num,
            control.write_num,
            write_value & 0xFF_FFFF
        );

        self.regs.write(regs::COMMON_INST_EN, control.encode()?)?;
        self.regs.write(regs::COMMON_OP_CODE, opcode)?;

        let payload = be24(write_value);
        let payload = &payload[3 - control.write_num as usize..];
        for (register, &byte) in regs::FLASH_PROG_ISP.into_iter().zip(payload) {
            self.regs.write(register, byte)?;
        }

        self.regs
            .write(regs::COMMON_INST_EN, control.enabled().encode()?)?;
        self.wait_operation()?;

        let mut response = [0u8; 3];
        let response = &mut response[..control.read_num as usize];
        for (register, byte) in regs::COMMON_INST_READ_PORT.into_iter().zip(response.iter_mut()) {
            *byte = self.regs.read(register)?;
        }

        Ok(from_be24(response))
    }

    /// Wait for the scaler to finish the pending common instruction
    pub fn wait_operation(&mut self) -> Result<()> {
        log::trace!("Wait for common instruction enable bit to clear");
        self.wait_for(regs::COMMON_INST_EN, 1 << 0, false)?;
        Ok(())
    }

    /// Wait for a program (or erase) cycle to finish
    pub fn wait_program(&mut self) -> Result<()> {
        log::trace!("Wait for prog_en bit to clear");
        self.wait_for(
            regs::PROGRAM_INSTRUCTION,
            ProgramInstruction::PROG_EN.bits(),
            false,
        )?;
        Ok(())
    }

    /// Poll `register` until the bits in `mask` are all set (or all clear)
    fn wait_for(&mut self, register: u8, mask: u8, set: bool) -> Result<u8> {
        let regs = &mut *self.regs;
        let done = |value: u8| match set {
            true => (value & mask) == mask,
            false => (value & mask) == 0,
        };
        let result = retry(self.poll.delays(), || match regs.read(register) {
            Ok(value) if done(value) => OperationResult::Ok(value),
            Ok(_) => OperationResult::Retry(None),
            Err(error) => OperationResult::Err(Some(error)),
        });

        match result {
            Ok(value) => Ok(value),
            Err(retry::Error {
                error: Some(error), ..
            }) => Err(error.into()),
            Err(retry::Error {
                error: None, tries, ..
            }) => Err(ProtocolError::Timeout {
                register,
                mask,
                attempts: tries,
            }
            .into()),
        }
    }

    /// Query the flash's JEDEC ID
    pub fn jedec_id(&mut self) -> Result<u32> {
        let jedec_id = self.common_instruction(InstructionKind::Read, opcodes::RDID, 3, 0, 0)?;
        log::debug!("Flash device JEDEC ID: {jedec_id:06x}");
        Ok(jedec_id)
    }

    /// Load the profile's opcodes into the bridge's opcode registers
    ///
    /// Unsupported operations leave their register untouched.
    pub fn install_opcodes(&mut self, profile: &FlashProfile) -> Result<()> {
        for op in Operation::ALL {
            let Some(register) = regs::opcode_register(op) else {
                continue;
            };
            match profile.opcode(op) {
                Some(opcode) => self.regs.write(register, opcode)?,
                None => log::warn!("No flash opcode for {}", op.name()),
            }
        }
        Ok(())
    }

    /// Stream `buf.len()` bytes starting at `address` out of the data port.
    ///
    /// Returns how many bytes were actually delivered; the stream ends early if the scaler
    /// returns an empty block.
    pub fn read_stream(&mut self, address: u32, buf: &mut [u8]) -> Result<usize> {
        log::debug!("Read {} bytes through SPI from {address:#08x}", buf.len());
        self.common_instruction(InstructionKind::Read, opcodes::READ, 3, 3, address)?;

        let mut done = 0;
        while done < buf.len() {
            let end = buf.len().min(done + BLOCK_TRANSFER);
            let len = self.regs.read_block(regs::PROGRAM_DATA_PORT, &mut buf[done..end])?;
            if len == 0 {
                break;
            }
            done += len;
        }

        log::trace!("Read done ({done} bytes)");
        Ok(done)
    }

    /// Have the scaler compute the CRC-8 of `start..=end` from its own reads of the flash
    pub fn calculate_crc(&mut self, start: u32, end: u32) -> Result<u8> {
        log::debug!("Request CRC of {start:#08x}..={end:#08x} from the flash controller");

        let control = self.regs.read(regs::PROGRAM_INSTRUCTION)?;

        for (register, byte) in regs::FLASH_PROG_ISP.into_iter().zip(be24(start)) {
            self.regs.write(register, byte)?;
        }
        for (register, byte) in regs::CRC_END_ADDR.into_iter().zip(be24(end)) {
            self.regs.write(register, byte)?;
        }

        let control = ProgramInstruction::from_bits_retain(control) | ProgramInstruction::CRC_START;
        self.regs.write(regs::PROGRAM_INSTRUCTION, control.bits())?;

        log::trace!("Wait for crc_done bit to be set");
        self.wait_for(
            regs::PROGRAM_INSTRUCTION,
            ProgramInstruction::CRC_DONE.bits(),
            true,
        )?;

        Ok(self.regs.read(regs::CRC_RESULT)?)
    }

    /// Program `data` (at most one write-latch chunk) at `address` and wait for completion
    pub fn program(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let Some(last) = data.len().checked_sub(1) else {
            return Ok(());
        };
        let last = u8::try_from(last).map_err(|_| ProtocolError::ProgramTooLarge {
            size: data.len(),
            latch: WRITE_LATCH,
        })?;

        self.regs.write(regs::PROGRAM_LENGTH, last)?;
        for (register, byte) in regs::FLASH_PROG_ISP.into_iter().zip(be24(address)) {
            self.regs.write(register, byte)?;
        }

        for block in data.chunks(BLOCK_TRANSFER) {
            log::trace!(
                "Write {} bytes to the program data port (chunk of {})",
                block.len(),
                data.len()
            );
            self.regs.write_block(regs::PROGRAM_DATA_PORT, block)?;
        }

        let control = self.regs.read(regs::PROGRAM_INSTRUCTION)?;
        let control = ProgramInstruction::from_bits_retain(control) | ProgramInstruction::PROG_EN;
        self.regs.write(regs::PROGRAM_INSTRUCTION, control.bits())?;

        self.wait_program()
    }
}

#[cfg(test)]
use crate::{error::Error, transport::SimScaler};

#[cfg(test)]
fn with_bridge<T>(
    sim: &mut SimScaler,
    poll: PollConfig,
    f: impl FnOnce(SpiBridge<'_, SimScaler>) -> T,
) -> T {
    sim.write(regs::PROGRAM_INSTRUCTION, ProgramInstruction::ISP_EN.bits())
        .unwrap();
    f(SpiBridge::new(sim, poll))
}

#[cfg(test)]
const FAST_TIMEOUT: PollConfig = PollConfig {
    interval: std::time::Duration::ZERO,
    attempts: 3,
};

#[test]
fn test_jedec_id() {
    let mut sim = SimScaler::new(0xEF3011, 1024);
    let id = with_bridge(&mut sim, PollConfig::default(), |mut bridge| bridge.jedec_id()).unwrap();
    assert_eq!(id, 0xEF3011);

    let (kind, opcode, _) = sim.stats().instructions[0];
    assert_eq!((kind, opcode), (InstructionKind::Read, 0x9F));
    // Three read ports, no write bytes
    assert_eq!(sim.register(regs::COMMON_INST_EN), 0b010_00_11_0);
}

#[test]
fn test_common_instruction_payload_msb_first() {
    let mut sim = SimScaler::new(0xEF3011, 1024);
    with_bridge(&mut sim, PollConfig::default(), |mut bridge| {
        bridge.common_instruction(InstructionKind::Write, 0x42, 0, 2, 0xAB_CDEF)
    })
    .unwrap();

    assert_eq!(sim.register(regs::FLASH_PROG_ISP[0]), 0xCD);
    assert_eq!(sim.register(regs::FLASH_PROG_ISP[1]), 0xEF);
    assert_eq!(sim.stats().instructions[0], (InstructionKind::Write, 0x42, 0xCDEF));
}

#[test]
fn test_install_opcodes() {
    let mut sim = SimScaler::new(0x202013, 1024);
    let profile = crate::flash::resolve(0x202013).unwrap();
    with_bridge(&mut sim, PollConfig::default(), |mut bridge| {
        bridge.install_opcodes(&profile)
    })
    .unwrap();

    assert_eq!(sim.register(regs::WREN_OP_CODE), 0x06);
    assert_eq!(sim.register(regs::READ_OP_CODE), 0x03);
    assert_eq!(sim.register(regs::PROGRAM_OP_CODE), 0x02);
    assert_eq!(sim.register(regs::READ_STATUS_REGISTER_OP_CODE), 0x05);
    // ST parts have no EWSR or fast read; their registers stay untouched
    assert_eq!(sim.register(regs::EWSR_OP_CODE), 0x00);
    assert_eq!(sim.register(regs::FAST_READ_OP_CODE), 0x00);
}

#[test]
fn test_program_latch_limit() {
    let mut sim = SimScaler::new(0xEF3011, 1024);
    let result = with_bridge(&mut sim, PollConfig::default(), |mut bridge| {
        bridge.program(0, &[0x00; WRITE_LATCH + 1])
    });

    assert!(matches!(
        result,
        Err(Error::Protocol(ProtocolError::ProgramTooLarge {
            size: 257,
            latch: 256
        }))
    ));
    assert!(sim.stats().write_transfers.is_empty());
    assert!(sim.stats().program_cycles.is_empty());

    with_bridge(&mut sim, PollConfig::default(), |mut bridge| {
        bridge.program(0, &[0x00; WRITE_LATCH])
    })
    .unwrap();
    assert_eq!(sim.register(regs::PROGRAM_LENGTH), 0xFF);
    assert_eq!(sim.stats().program_cycles, [(0, 256)]);
}

#[test]
fn test_read_stream_block_transfers() {
    let contents: Vec<u8> = (0..2500u32).map(|i| (i * 7) as u8).collect();
    let mut sim = SimScaler::new(0xEF3011, contents.len()).contents(&contents);

    let mut buf = vec![0; 100];
    let len = with_bridge(&mut sim, PollConfig::default(), |mut bridge| {
        bridge.read_stream(1000, &mut buf)
    })
    .unwrap();

    assert_eq!(len, 100);
    assert_eq!(buf, contents[1000..1100]);
    assert_eq!(sim.stats().read_transfers, [32, 32, 32, 4]);
}

#[test]
fn test_read_stream_stops_on_stall() {
    let mut sim = SimScaler::new(0xEF3011, 1024).stall_reads_at(40);
    let mut buf = vec![0; 100];
    let len = with_bridge(&mut sim, PollConfig::default(), |mut bridge| {
        bridge.read_stream(0, &mut buf)
    })
    .unwrap();
    assert_eq!(len, 64);
}

#[test]
fn test_calculate_crc() {
    let contents: Vec<u8> = (0..=255).collect();
    let mut sim = SimScaler::new(0xEF3011, contents.len()).contents(&contents);
    let crc = with_bridge(&mut sim, PollConfig::default(), |mut bridge| {
        bridge.calculate_crc(0, 255)
    })
    .unwrap();

    assert_eq!(crc, crc::Crc::<u8>::new(&crc::CRC_8_SMBUS).checksum(&contents));
    // CRC start address shares the program address registers
    assert_eq!(sim.register(regs::CRC_END_ADDR[2]), 0xFF);
}

#[test]
fn test_stuck_device_times_out() {
    let mut sim = SimScaler::new(0xEF3011, 1024).stuck_busy();
    let result = with_bridge(&mut sim, FAST_TIMEOUT, |mut bridge| bridge.jedec_id());
    assert!(matches!(
        result,
        Err(Error::Protocol(ProtocolError::Timeout {
            register: regs::COMMON_INST_EN,
            ..
        }))
    ));

    let result = with_bridge(&mut sim, FAST_TIMEOUT, |mut bridge| bridge.calculate_crc(0, 15));
    assert!(matches!(
        result,
        Err(Error::Protocol(ProtocolError::Timeout {
            register: regs::PROGRAM_INSTRUCTION,
            ..
        }))
    ));
}

#[test]
fn test_transport_error_propagates() {
    let mut sim = SimScaler::new(0xEF3011, 1024);
    // Not in ISP mode, so the gated registers fail
    let mut bridge = SpiBridge::new(&mut sim, PollConfig::default());
    assert!(matches!(bridge.jedec_id(), Err(Error::Transport(_))));
}
