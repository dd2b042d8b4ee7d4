//! Whole-chip read and write, verified by the scaler's CRC engine.

use crc::{Crc, CRC_8_SMBUS};

use super::bridge::{SpiBridge, WRITE_LATCH};
use super::regs::InstructionKind;
use crate::error::{ProtocolError, Result};
use crate::flash::{opcodes, FlashProfile, Operation};
use crate::image::check_fits;
use crate::transport::Registers;
use crate::util::BlankExt;

/// The CRC-8 the scaler computes (polynomial 0x07, no reflection, no final XOR)
pub const FLASH_CRC: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// Largest read issued as a single streaming instruction
pub const READ_CHUNK: usize = 1024;

/// Status register value with every block-protect bit set
const STATUS_PROTECT: u32 = 0x1C;
const STATUS_UNPROTECT: u32 = 0x00;

/// What a write actually did
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct WriteReport {
    pub erased: bool,
    pub programmed: usize,
    pub skipped: usize,
}

/// Runs whole-chip operations for one flash part over a bridge
pub struct FlashProgrammer<'a, 'p, R: Registers> {
    bridge: SpiBridge<'a, R>,
    profile: &'p FlashProfile,
}

impl<'a, 'p, R: Registers> FlashProgrammer<'a, 'p, R> {
    /// The profile's opcodes must already be installed in the bridge.
    pub fn new(bridge: SpiBridge<'a, R>, profile: &'p FlashProfile) -> Self {
        Self { bridge, profile }
    }

    /// Read the entire flash
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        self.read(self.profile.size_bytes)
    }

    /// Read the first `len` bytes of the flash
    pub fn read(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0; len];

        let rpt = howudoin::new()
            .label("Reading flash")
            .set_len(u64::try_from(len.div_ceil(READ_CHUNK)).ok());

        let mut done = 0;
        while done < len {
            let end = len.min(done + READ_CHUNK);
            let address = done as u32;
            log::debug!(
                "Read flash content ({} bytes from {address:#08x})",
                end - done
            );

            let read = self.bridge.read_stream(address, &mut buf[done..end])?;
            if read == 0 {
                return Err(ProtocolError::ShortRead {
                    address,
                    requested: end - done,
                }
                .into());
            }
            done += read;
            rpt.inc();
        }
        rpt.close();

        log::info!("Flash content read out, check CRC");
        self.verify(&buf)?;
        Ok(buf)
    }

    /// Write `image` starting at address 0
    ///
    /// With chip erase available the flash is erased first and all-0xFF latch chunks are skipped;
    /// without it every chunk is programmed over the existing contents.
    pub fn write_all(&mut self, image: &[u8]) -> Result<WriteReport> {
        check_fits(image, self.profile)?;

        let chip_erase = self.profile.opcode(Operation::ChipErase);
        let mut report = WriteReport::default();

        self.set_protection(STATUS_UNPROTECT)?;

        match chip_erase {
            Some(opcode) => {
                log::info!("Erasing flash content");
                self.bridge
                    .common_instruction(InstructionKind::Erase, opcode, 0, 0, 0)?;
                self.bridge.wait_program()?;
                report.erased = true;
                log::info!("Erase finished");
            }
            None => log::warn!(
                "Flash chip has no chip erase support, the write process will be slower"
            ),
        }

        let rpt = howudoin::new()
            .label("Writing flash")
            .set_len(u64::try_from(image.len().div_ceil(WRITE_LATCH)).ok());

        for (index, chunk) in image.chunks(WRITE_LATCH).enumerate() {
            let address = (index * WRITE_LATCH) as u32;

            if report.erased && chunk.is_blank() {
                log::trace!(
                    "Skip flash content ({} bytes at {address:#08x})",
                    chunk.len()
                );
                report.skipped += 1;
            } else {
                log::debug!(
                    "Write flash content ({} bytes to {address:#08x})",
                    chunk.len()
                );
                self.bridge.program(address, chunk)?;
                report.programmed += 1;
            }
            rpt.inc();
        }
        rpt.close();

        self.set_protection(STATUS_PROTECT)?;

        log::info!(
            "Write finished ({} chunks programmed, {} blank chunks skipped), check CRC",
            report.programmed,
            report.skipped
        );
        self.verify(image)?;
        Ok(report)
    }

    /// Write the status register through both the EWSR and the WREN paths
    fn set_protection(&mut self, status: u32) -> Result<()> {
        let unprotect = status == STATUS_UNPROTECT;

        if self.profile.opcode(Operation::WriteStatusEnable).is_some() || !unprotect {
            self.bridge.common_instruction(
                InstructionKind::WriteAfterEwsr,
                opcodes::WRSR,
                0,
                1,
                status,
            )?;
        } else {
            log::warn!("Flash chip has no EWSR opcode, write may be rejected by write protection");
        }

        self.bridge.common_instruction(
            InstructionKind::WriteAfterWren,
            opcodes::WRSR,
            0,
            1,
            status,
        )?;
        Ok(())
    }

    /// Compare the scaler's CRC over `0..data.len()` against one computed over `data`
    pub fn verify(&mut self, data: &[u8]) -> Result<()> {
        let Some(last) = data.len().checked_sub(1) else {
            return Ok(());
        };

        let end = last as u32;
        let hardware = self.bridge.calculate_crc(0, end)?;
        let local = FLASH_CRC.checksum(data);

        log::debug!("MCU CRC: {hardware:02x}");
        log::debug!("Generated CRC: {local:02x}");

        if hardware != local {
            return Err(ProtocolError::CrcMismatch {
                start: 0,
                end,
                hardware,
                local,
            }
            .into());
        }

        log::info!("CRC ok");
        Ok(())
    }
}

#[cfg(test)]
use crate::{
    device::{rtd2660::session::IspSession, PollConfig},
    error::{Error, UsageError},
    flash::resolve,
    transport::{sim::STATUS_PROTECT as SIM_PROTECTED, SimScaler},
};

#[cfg(test)]
fn open_session(sim: SimScaler, profile: &FlashProfile) -> IspSession<SimScaler> {
    let mut session = IspSession::new(sim, PollConfig::default());
    session.enter().unwrap();
    session.bridge().unwrap().install_opcodes(profile).unwrap();
    session
}

#[cfg(test)]
fn test_pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + i / 256) as u8).collect()
}

#[test]
fn test_read_all_blank_w25x10() -> Result<()> {
    let profile = resolve(0xEF3011)?;
    let mut session = open_session(SimScaler::new(0xEF3011, 128 * 1024), &profile);

    let data = FlashProgrammer::new(session.bridge()?, &profile).read_all()?;
    assert_eq!(data.len(), 131072);
    assert!(data.is_blank());
    assert_eq!(session.registers().stats().crc_requests, 1);
    Ok(())
}

#[test]
fn test_read_chunking() -> Result<()> {
    let profile = resolve(0xEF3011)?;
    let contents = test_pattern(128 * 1024);
    let sim = SimScaler::new(0xEF3011, contents.len()).contents(&contents);
    let mut session = open_session(sim, &profile);

    let data = FlashProgrammer::new(session.bridge()?, &profile).read(2500)?;
    assert_eq!(data, contents[..2500]);

    let stats = session.registers().stats();
    assert!(stats.read_transfers.iter().all(|&len| len <= 32));
    assert_eq!(stats.read_transfers.iter().sum::<usize>(), 2500);

    let reads: Vec<u32> = stats
        .instructions
        .iter()
        .filter(|(kind, opcode, _)| (*kind, *opcode) == (InstructionKind::Read, opcodes::READ))
        .map(|&(_, _, address)| address)
        .collect();
    assert_eq!(reads, [0, 1024, 2048]);
    Ok(())
}

#[test]
fn test_read_stall() -> Result<()> {
    let profile = resolve(0xEF3011)?;
    let sim = SimScaler::new(0xEF3011, 128 * 1024).stall_reads_at(2048);
    let mut session = open_session(sim, &profile);

    let result = FlashProgrammer::new(session.bridge()?, &profile).read_all();
    assert!(matches!(
        result,
        Err(Error::Protocol(ProtocolError::ShortRead {
            address: 2048,
            requested: 1024
        }))
    ));
    Ok(())
}

#[test]
fn test_read_crc_mismatch() -> Result<()> {
    let profile = resolve(0xEF3011)?;
    let sim = SimScaler::new(0xEF3011, 128 * 1024).corrupt_crc();
    let mut session = open_session(sim, &profile);

    let result = FlashProgrammer::new(session.bridge()?, &profile).read_all();
    assert!(matches!(
        result,
        Err(Error::Protocol(ProtocolError::CrcMismatch { start: 0, end: 0x1FFFF, .. }))
    ));
    Ok(())
}

#[test]
fn test_write_read_round_trip() -> Result<()> {
    let profile = resolve(0xEF3011)?;
    let image = test_pattern(2500);
    let sim = SimScaler::new(0xEF3011, 128 * 1024).contents(&[0x00; 128 * 1024]);
    let mut session = open_session(sim, &profile);

    let report = FlashProgrammer::new(session.bridge()?, &profile).write_all(&image)?;
    assert_eq!(
        report,
        WriteReport {
            erased: true,
            programmed: 10,
            skipped: 0
        }
    );

    let stats = session.registers().stats();
    assert_eq!(stats.chip_erases, 1);
    assert!(stats.program_cycles.iter().all(|&(_, len)| len <= 256));
    assert!(stats.write_transfers.iter().all(|&(_, len)| len <= 32));
    assert_eq!(stats.program_cycles.last(), Some(&(2304, 196)));
    assert_eq!(session.registers().status(), SIM_PROTECTED);

    let data = FlashProgrammer::new(session.bridge()?, &profile).read(image.len())?;
    assert_eq!(data, image);
    assert_eq!(
        session.registers().register(super::regs::CRC_RESULT),
        FLASH_CRC.checksum(&image)
    );
    Ok(())
}

#[test]
fn test_write_skips_blank_chunks() -> Result<()> {
    let profile = resolve(0xEF3011)?;
    let mut image = test_pattern(1024);
    image[256..512].fill(0xFF);
    let mut session = open_session(SimScaler::new(0xEF3011, 128 * 1024), &profile);

    let report = FlashProgrammer::new(session.bridge()?, &profile).write_all(&image)?;
    assert_eq!(report.programmed, 3);
    assert_eq!(report.skipped, 1);

    let stats = session.registers().stats();
    assert!(stats.write_transfers.iter().all(|&(address, _)| address != 256));
    assert!(stats.program_cycles.iter().all(|&(address, _)| address != 256));
    assert_eq!(&session.registers().flash()[..1024], &image[..]);
    Ok(())
}

#[test]
fn test_write_without_chip_erase() -> Result<()> {
    let profile = resolve(0xC22016)?;
    assert!(!profile.has_chip_erase());
    let mut image = test_pattern(1024);
    image[256..512].fill(0xFF);
    let mut session = open_session(SimScaler::new(0xC22016, 4096), &profile);

    let report = FlashProgrammer::new(session.bridge()?, &profile).write_all(&image)?;
    assert_eq!(
        report,
        WriteReport {
            erased: false,
            programmed: 4,
            skipped: 0
        }
    );
    assert_eq!(session.registers().stats().chip_erases, 0);
    Ok(())
}

#[test]
fn test_write_without_erase_over_stale_data() -> Result<()> {
    let profile = resolve(0xC22016)?;
    let sim = SimScaler::new(0xC22016, 4096).contents(&[0x00; 4096]);
    let mut session = open_session(sim, &profile);

    let result = FlashProgrammer::new(session.bridge()?, &profile).write_all(&[0xA5; 512]);
    assert!(matches!(
        result,
        Err(Error::Protocol(ProtocolError::CrcMismatch { .. }))
    ));
    Ok(())
}

#[test]
fn test_write_without_ewsr() -> Result<()> {
    let profile = resolve(0x202013)?;
    let image = test_pattern(600);
    let mut session = open_session(SimScaler::new(0x202013, 4096), &profile);

    FlashProgrammer::new(session.bridge()?, &profile).write_all(&image)?;
    assert_eq!(&session.registers().flash()[..600], &image[..]);

    let ewsr_writes = session
        .registers()
        .stats()
        .instructions
        .iter()
        .filter(|(kind, _, _)| *kind == InstructionKind::WriteAfterEwsr)
        .count();
    // Only the final re-protect goes through EWSR
    assert_eq!(ewsr_writes, 1);
    Ok(())
}

#[test]
fn test_write_rejects_bad_images() -> Result<()> {
    let profile = resolve(0x202010)?;
    let mut session = open_session(SimScaler::new(0x202010, 64 * 1024), &profile);

    let mut programmer = FlashProgrammer::new(session.bridge()?, &profile);
    assert!(matches!(
        programmer.write_all(&[]),
        Err(Error::Usage(UsageError::EmptyImage))
    ));
    assert!(matches!(
        programmer.write_all(&vec![0; 64 * 1024 + 1]),
        Err(Error::Usage(UsageError::ImageTooLarge {
            size: 65537,
            capacity: 65536
        }))
    ));
    assert!(session.registers().stats().program_cycles.is_empty());
    Ok(())
}
