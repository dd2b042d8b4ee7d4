//! Entry into and exit from ISP mode.

use super::bridge::SpiBridge;
use super::regs::{ProgramInstruction, PROGRAM_INSTRUCTION};
use crate::device::PollConfig;
use crate::error::{ProtocolError, Result};
use crate::transport::Registers;

/// Exclusive owner of a scaler's register window
///
/// The bridge can only be reached through [`IspSession::bridge`], which confirms that the ISP bit
/// is set first.
#[derive(Debug)]
pub struct IspSession<R: Registers> {
    regs: R,
    poll: PollConfig,
}

impl<R: Registers> IspSession<R> {
    pub fn new(regs: R, poll: PollConfig) -> Self {
        Self { regs, poll }
    }

    /// Read the ISP bit back from the scaler
    pub fn is_active(&mut self) -> Result<bool> {
        let value = self.regs.read(PROGRAM_INSTRUCTION)?;
        Ok(ProgramInstruction::from_bits_retain(value).contains(ProgramInstruction::ISP_EN))
    }

    pub fn enter(&mut self) -> Result<()> {
        log::debug!("Entering ISP mode");

        if self.is_active()? {
            log::warn!("Already in ISP mode");
            return Ok(());
        }

        self.regs
            .write(PROGRAM_INSTRUCTION, ProgramInstruction::ISP_EN.bits())?;

        let actual = self.regs.read(PROGRAM_INSTRUCTION)?;
        if !ProgramInstruction::from_bits_retain(actual).contains(ProgramInstruction::ISP_EN) {
            return Err(ProtocolError::IspEntryFailed {
                register: PROGRAM_INSTRUCTION,
                expected: ProgramInstruction::ISP_EN.bits(),
                actual,
            }
            .into());
        }

        log::info!("Device entered ISP mode");
        Ok(())
    }

    /// Leave ISP mode. The scaler's MCU restarts once the bit clears.
    pub fn exit(&mut self) -> Result<()> {
        log::debug!("Exiting ISP mode");

        if !self.is_active()? {
            log::warn!("Device is not in ISP mode");
            return Ok(());
        }

        self.regs.write(PROGRAM_INSTRUCTION, 0)?;

        let actual = self.regs.read(PROGRAM_INSTRUCTION)?;
        if ProgramInstruction::from_bits_retain(actual).contains(ProgramInstruction::ISP_EN) {
            return Err(ProtocolError::IspExitFailed {
                register: PROGRAM_INSTRUCTION,
                expected: ProgramInstruction::ISP_EN.bits(),
                actual,
            }
            .into());
        }

        log::info!("Device exited ISP mode");
        Ok(())
    }

    /// Borrow the SPI bridge, provided the scaler is confirmed to be in ISP mode
    pub fn bridge(&mut self) -> Result<SpiBridge<'_, R>> {
        if !self.is_active()? {
            return Err(ProtocolError::NotInIsp.into());
        }
        Ok(SpiBridge::new(&mut self.regs, self.poll))
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }

    pub fn into_inner(self) -> R {
        self.regs
    }
}

#[cfg(test)]
use crate::{error::Error, transport::SimScaler};

#[test]
fn test_enter_exit() -> Result<()> {
    let mut session = IspSession::new(SimScaler::new(0xEF3011, 1024), PollConfig::default());
    assert!(!session.is_active()?);

    session.enter()?;
    assert!(session.is_active()?);
    assert!(session.registers().is_in_isp());

    session.exit()?;
    assert!(!session.is_active()?);
    assert_eq!(session.registers().stats().restarts, 1);
    Ok(())
}

#[test]
fn test_enter_exit_idempotent() -> Result<()> {
    let mut session = IspSession::new(SimScaler::new(0xEF3011, 1024), PollConfig::default());

    session.enter()?;
    session.enter()?;
    assert_eq!(session.registers().stats().control_writes, 1);

    session.exit()?;
    session.exit()?;
    assert_eq!(session.registers().stats().control_writes, 2);
    assert_eq!(session.registers().stats().restarts, 1);
    Ok(())
}

#[test]
fn test_exit_when_never_entered() -> Result<()> {
    let mut session = IspSession::new(SimScaler::new(0xEF3011, 1024), PollConfig::default());
    session.exit()?;
    assert_eq!(session.registers().stats().control_writes, 0);
    Ok(())
}

#[test]
fn test_enter_refused() {
    let sim = SimScaler::new(0xEF3011, 1024).refuse_isp();
    let mut session = IspSession::new(sim, PollConfig::default());

    assert!(matches!(
        session.enter(),
        Err(Error::Protocol(ProtocolError::IspEntryFailed { actual: 0, .. }))
    ));
}

#[test]
fn test_bridge_requires_isp() {
    let mut session = IspSession::new(SimScaler::new(0xEF3011, 1024), PollConfig::default());
    assert!(matches!(
        session.bridge(),
        Err(Error::Protocol(ProtocolError::NotInIsp))
    ));
}

#[test]
fn test_exit_refused() -> Result<()> {
    let sim = SimScaler::new(0xEF3011, 1024).refuse_isp_exit();
    let mut session = IspSession::new(sim, PollConfig::default());
    session.enter()?;

    assert!(matches!(
        session.exit(),
        Err(Error::Protocol(ProtocolError::IspExitFailed { actual: 0x80, .. }))
    ));
    assert!(session.registers().is_in_isp());
    assert_eq!(session.registers().stats().restarts, 0);
    Ok(())
}
