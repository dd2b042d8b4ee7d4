//! A simulated RTD2660 register window in front of an in-memory SPI NOR flash, for testing
//! purposes.
//!
//! The model follows the hardware closely enough to catch protocol mistakes: every register but
//! `program_instruction` is gated by the ISP bit, programming can only clear bits, the
//! block-protect bits in the flash status register make programs and erases no-ops, and the
//! common-instruction and program engines only run when their enable bit is written.

use std::io;

use crc::{Crc, CRC_8_SMBUS};

use super::Registers;
use crate::device::rtd2660::regs::{self, CommonInstControl, InstructionKind, ProgramInstruction};
use crate::error::TransportError;
use crate::flash::opcodes;
use crate::util::{be24, from_be24};

const SIM_CRC: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// Block-protect bits of the simulated flash status register
pub const STATUS_PROTECT: u8 = 0x1C;

/// Chip-erase opcodes the simulated flash accepts
const CHIP_ERASE_OPCODES: [u8; 2] = [0xC7, 0x60];

/// Counters and transfer logs collected by [`SimScaler`]
#[derive(Debug, Default, Clone)]
pub struct SimStats {
    /// Writes to `program_instruction`
    pub control_writes: usize,
    /// Times the MCU was restarted by leaving ISP mode
    pub restarts: usize,
    /// Every common instruction executed, as (kind, opcode, write payload)
    pub instructions: Vec<(InstructionKind, u8, u32)>,
    /// Size of every data-port block read
    pub read_transfers: Vec<usize>,
    /// (target address, size) of every data-port block write
    pub write_transfers: Vec<(u32, usize)>,
    /// (address, length) of every program cycle
    pub program_cycles: Vec<(u32, usize)>,
    pub chip_erases: usize,
    pub crc_requests: usize,
}

/// A simulated scaler plus flash
#[derive(Debug, Clone)]
pub struct SimScaler {
    regs: [u8; 256],
    control: ProgramInstruction,
    jedec_id: u32,
    flash: Vec<u8>,
    status: u8,
    stream: Option<u32>,
    program_buffer: Vec<u8>,

    refuse_isp: bool,
    refuse_isp_exit: bool,
    stuck_busy: bool,
    corrupt_crc: bool,
    stall_reads_at: Option<u32>,

    stats: SimStats,
}

impl SimScaler {
    /// Create a scaler whose flash reports `jedec_id` and holds `size` erased bytes. The flash
    /// starts out write-protected, as the scaler firmware leaves it.
    pub fn new(jedec_id: u32, size: usize) -> Self {
        Self {
            regs: [0; 256],
            control: ProgramInstruction::empty(),
            jedec_id,
            flash: vec![0xFF; size],
            status: STATUS_PROTECT,
            stream: None,
            program_buffer: Vec::new(),
            refuse_isp: false,
            refuse_isp_exit: false,
            stuck_busy: false,
            corrupt_crc: false,
            stall_reads_at: None,
            stats: SimStats::default(),
        }
    }

    /// Replace the flash contents
    pub fn contents(mut self, contents: &[u8]) -> Self {
        self.flash = contents.to_vec();
        self
    }

    /// Ignore attempts to set the ISP bit
    pub fn refuse_isp(mut self) -> Self {
        self.refuse_isp = true;
        self
    }

    /// Keep the ISP bit set once it has been set
    pub fn refuse_isp_exit(mut self) -> Self {
        self.refuse_isp_exit = true;
        self
    }

    /// Never clear the common-instruction enable, program enable, or report CRC done
    pub fn stuck_busy(mut self) -> Self {
        self.stuck_busy = true;
        self
    }

    /// Report a wrong hardware CRC
    pub fn corrupt_crc(mut self) -> Self {
        self.corrupt_crc = true;
        self
    }

    /// Return no data from the data port once the stream reaches `address`
    pub fn stall_reads_at(mut self, address: u32) -> Self {
        self.stall_reads_at = Some(address);
        self
    }

    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    /// The flash status register (block-protect bits)
    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    pub fn is_in_isp(&self) -> bool {
        self.control.contains(ProgramInstruction::ISP_EN)
    }

    /// Peek at a register without going through the ISP gate
    pub fn register(&self, register: u8) -> u8 {
        match register {
            regs::PROGRAM_INSTRUCTION => self.control.bits(),
            _ => self.regs[register as usize],
        }
    }

    fn check_gate(&self, register: u8) -> io::Result<()> {
        if register == regs::PROGRAM_INSTRUCTION || self.is_in_isp() {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "register window is gated while ISP is disabled",
            ))
        }
    }

    fn isp_address(&self) -> u32 {
        from_be24(&self.regs[regs::FLASH_PROG_ISP[0] as usize..][..3])
    }

    fn write_payload(&self, write_num: u8) -> u32 {
        let start = regs::FLASH_PROG_ISP[0] as usize;
        from_be24(&self.regs[start..start + write_num as usize])
    }

    fn is_protected(&self) -> bool {
        self.status & STATUS_PROTECT != 0
    }

    fn write_control(&mut self, value: u8) {
        self.stats.control_writes += 1;
        let requested = ProgramInstruction::from_bits_retain(value);
        let was_in_isp = self.is_in_isp();

        let mut control = requested & (ProgramInstruction::ISP_EN | ProgramInstruction::PROG_MODE);
        if self.refuse_isp {
            control.remove(ProgramInstruction::ISP_EN);
        }
        if self.refuse_isp_exit && was_in_isp {
            control.insert(ProgramInstruction::ISP_EN);
        }
        // CRC_DONE survives until the next CRC_START
        control |= self.control & ProgramInstruction::CRC_DONE;
        self.control = control;

        if !self.is_in_isp() {
            if was_in_isp {
                self.stream = None;
                self.program_buffer.clear();
                self.stats.restarts += 1;
            }
            return;
        }

        if requested.contains(ProgramInstruction::PROG_EN) {
            self.run_program();
            if self.stuck_busy {
                self.control.insert(ProgramInstruction::PROG_EN);
            }
        }

        if requested.contains(ProgramInstruction::CRC_START) {
            self.control.remove(ProgramInstruction::CRC_DONE);
            self.run_crc();
            if !self.stuck_busy {
                self.control.insert(ProgramInstruction::CRC_DONE);
            }
        }
    }

    fn run_program(&mut self) {
        let len = self.regs[regs::PROGRAM_LENGTH as usize] as usize + 1;
        let address = self.isp_address();
        let data: Vec<u8> = self.program_buffer.drain(..).take(len).collect();
        self.stats.program_cycles.push((address, len));

        if self.is_protected() || self.regs[regs::PROGRAM_OP_CODE as usize] == 0 {
            return;
        }

        for (offset, byte) in data.into_iter().enumerate() {
            if let Some(cell) = self.flash.get_mut(address as usize + offset) {
                *cell &= byte;
            }
        }
    }

    fn run_crc(&mut self) {
        self.stats.crc_requests += 1;
        let start = self.isp_address() as usize;
        let end = from_be24(&self.regs[regs::CRC_END_ADDR[0] as usize..][..3]) as usize;

        let crc = match self.flash.get(start..=end) {
            Some(range) => SIM_CRC.checksum(range),
            None => 0,
        };
        self.regs[regs::CRC_RESULT as usize] = if self.corrupt_crc { !crc } else { crc };
    }

    fn run_common_instruction(&mut self, control: CommonInstControl) {
        let opcode = self.regs[regs::COMMON_OP_CODE as usize];
        let payload = self.write_payload(control.write_num);
        let Some(kind) = control.instruction() else {
            return;
        };
        self.stats.instructions.push((kind, opcode, payload));

        match kind {
            InstructionKind::Read => {
                let response = match opcode {
                    opcodes::RDID => self.jedec_id,
                    opcodes::READ => {
                        self.stream = Some(payload);
                        let at = |offset: u32| {
                            self.flash
                                .get((payload + offset) as usize)
                                .copied()
                                .unwrap_or(0xFF)
                        };
                        u32::from_be_bytes([0, at(0), at(1), at(2)])
                    }
                    _ if opcode == self.regs[regs::READ_STATUS_REGISTER_OP_CODE as usize] => {
                        u32::from(self.status) << 16
                    }
                    _ => 0xFF_FFFF,
                };
                for (port, byte) in regs::COMMON_INST_READ_PORT.into_iter().zip(be24(response)) {
                    self.regs[port as usize] = byte;
                }
            }
            InstructionKind::WriteAfterWren | InstructionKind::WriteAfterEwsr => {
                let prefix = match kind {
                    InstructionKind::WriteAfterWren => regs::WREN_OP_CODE,
                    _ => regs::EWSR_OP_CODE,
                };
                if self.regs[prefix as usize] != 0 && opcode == opcodes::WRSR {
                    self.status = payload as u8;
                }
            }
            InstructionKind::Erase => {
                if CHIP_ERASE_OPCODES.contains(&opcode) && !self.is_protected() {
                    self.flash.fill(0xFF);
                    self.stats.chip_erases += 1;
                }
            }
            InstructionKind::Write | InstructionKind::Noop => (),
        }
    }
}

impl Registers for SimScaler {
    fn read(&mut self, register: u8) -> Result<u8, TransportError> {
        self.check_gate(register)
            .map_err(|source| TransportError::Read { register, source })?;
        Ok(self.register(register))
    }

    fn write(&mut self, register: u8, value: u8) -> Result<(), TransportError> {
        self.check_gate(register)
            .map_err(|source| TransportError::Write { register, source })?;

        match register {
            regs::PROGRAM_INSTRUCTION => self.write_control(value),
            regs::COMMON_INST_EN => {
                let control = CommonInstControl::decode(value).map_err(|e| {
                    TransportError::Write {
                        register,
                        source: io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
                    }
                })?;
                self.regs[register as usize] = value;
                if control.enable == 1 {
                    self.run_common_instruction(control);
                    if !self.stuck_busy {
                        self.regs[register as usize] = value & !1;
                    }
                }
            }
            _ => self.regs[register as usize] = value,
        }

        Ok(())
    }

    fn read_block(&mut self, register: u8, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.check_gate(register)
            .map_err(|source| TransportError::Read { register, source })?;

        if register != regs::PROGRAM_DATA_PORT {
            let len = buf.len().min(256 - register as usize);
            buf[..len].copy_from_slice(&self.regs[register as usize..][..len]);
            return Ok(len);
        }

        self.stats.read_transfers.push(buf.len());
        let Some(address) = self.stream else {
            return Ok(0);
        };
        if self.stall_reads_at.map_or(false, |stall| address >= stall) {
            return Ok(0);
        }

        let available = self.flash.get(address as usize..).unwrap_or(&[]);
        let len = buf.len().min(available.len());
        buf[..len].copy_from_slice(&available[..len]);
        self.stream = Some(address + len as u32);
        Ok(len)
    }

    fn write_block(&mut self, register: u8, data: &[u8]) -> Result<(), TransportError> {
        self.check_gate(register)
            .map_err(|source| TransportError::Write { register, source })?;

        if register == regs::PROGRAM_DATA_PORT {
            self.stats
                .write_transfers
                .push((self.isp_address(), data.len()));
            self.program_buffer.extend_from_slice(data);
        } else {
            for (offset, &byte) in data.iter().enumerate() {
                if let Some(reg) = self.regs.get_mut(register as usize + offset) {
                    *reg = byte;
                }
            }
        }

        Ok(())
    }
}

#[test]
fn test_sim_gates_registers() {
    let mut sim = SimScaler::new(0xEF3011, 1024);
    assert!(sim.read(regs::COMMON_INST_EN).is_err());
    assert!(sim.write(regs::COMMON_OP_CODE, 0x9F).is_err());
    assert_eq!(sim.read(regs::PROGRAM_INSTRUCTION).unwrap(), 0);

    sim.write(regs::PROGRAM_INSTRUCTION, 0x80).unwrap();
    assert!(sim.is_in_isp());
    sim.write(regs::COMMON_OP_CODE, 0x9F).unwrap();
    assert_eq!(sim.read(regs::COMMON_OP_CODE).unwrap(), 0x9F);
}

#[test]
fn test_sim_restart_on_isp_exit() {
    let mut sim = SimScaler::new(0xEF3011, 1024);
    sim.write(regs::PROGRAM_INSTRUCTION, 0x80).unwrap();
    sim.write(regs::PROGRAM_INSTRUCTION, 0x00).unwrap();
    assert!(!sim.is_in_isp());
    assert_eq!(sim.stats().restarts, 1);
    assert_eq!(sim.stats().control_writes, 2);
}

#[test]
fn test_sim_program_only_clears_bits() {
    let mut sim = SimScaler::new(0xEF3011, 1024).contents(&[0xF0; 1024]);
    sim.write(regs::PROGRAM_INSTRUCTION, 0x80).unwrap();
    sim.write(regs::PROGRAM_OP_CODE, 0x02).unwrap();

    // Still protected: nothing changes
    sim.write(regs::PROGRAM_LENGTH, 1).unwrap();
    sim.write_block(regs::PROGRAM_DATA_PORT, &[0x0F, 0x3C]).unwrap();
    sim.write(regs::PROGRAM_INSTRUCTION, 0xA0).unwrap();
    assert_eq!(&sim.flash()[..2], &[0xF0, 0xF0]);

    sim.status = 0;
    sim.write_block(regs::PROGRAM_DATA_PORT, &[0x0F, 0x3C]).unwrap();
    sim.write(regs::PROGRAM_INSTRUCTION, 0xA0).unwrap();
    assert_eq!(&sim.flash()[..2], &[0x00, 0x30]);
    assert_eq!(sim.register(regs::PROGRAM_INSTRUCTION), 0x80);
}
