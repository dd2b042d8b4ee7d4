//! Realtek RTD2660 and its register-compatible siblings.
//!
//! The scaler's ISP port exposes a small register window on the control bus. Setting the ISP bit
//! halts the scaler's MCU and hands its flash controller over to the bus master, which then drives
//! the SPI flash through the "common instruction" bridge and the bulk data port.

pub mod bridge;
pub mod programmer;
pub mod regs;
pub mod session;

pub use bridge::SpiBridge;
pub use programmer::{FlashProgrammer, WriteReport};
pub use session::IspSession;

use super::{PollConfig, Scaler};
use crate::error::{ProtocolError, Result};
use crate::flash::FlashProfile;
use crate::transport::Registers;

/// An RTD2660 reached through a register transport
#[derive(Debug)]
pub struct Rtd2660<R: Registers> {
    session: IspSession<R>,
    profile: Option<FlashProfile>,
}

impl<R: Registers> Rtd2660<R> {
    pub fn new(regs: R, poll: PollConfig) -> Self {
        Self {
            session: IspSession::new(regs, poll),
            profile: None,
        }
    }

    pub fn registers(&self) -> &R {
        self.session.registers()
    }

    pub fn into_inner(self) -> R {
        self.session.into_inner()
    }

    fn programmer(&mut self) -> Result<FlashProgrammer<'_, '_, R>> {
        let profile = self.profile.as_ref().ok_or(ProtocolError::NoFlashProfile)?;
        Ok(FlashProgrammer::new(self.session.bridge()?, profile))
    }
}

impl<R: Registers> Scaler for Rtd2660<R> {
    fn family(&self) -> &'static str {
        "RTD2660"
    }

    fn enter_isp(&mut self) -> Result<()> {
        self.session.enter()
    }

    fn is_in_isp(&mut self) -> Result<bool> {
        self.session.is_active()
    }

    fn exit_isp(&mut self) -> Result<()> {
        self.session.exit()
    }

    fn flash_jedec_id(&mut self) -> Result<u32> {
        self.session.bridge()?.jedec_id()
    }

    fn set_flash(&mut self, profile: FlashProfile) -> Result<()> {
        self.session.bridge()?.install_opcodes(&profile)?;
        log::debug!("Flash profile installed: {profile}");
        self.profile = Some(profile);
        Ok(())
    }

    fn flash(&self) -> Option<&FlashProfile> {
        self.profile.as_ref()
    }

    fn read_flash(&mut self) -> Result<Vec<u8>> {
        self.programmer()?.read_all()
    }

    fn write_flash(&mut self, image: &[u8]) -> Result<()> {
        self.programmer()?.write_all(image)?;
        Ok(())
    }
}

#[cfg(test)]
use crate::{error::Error, flash::resolve, transport::SimScaler};

#[test]
fn test_scaler_requires_profile() -> Result<()> {
    let mut scaler = Rtd2660::new(SimScaler::new(0xEF3011, 1024), PollConfig::default());
    scaler.enter_isp()?;

    assert!(scaler.flash().is_none());
    assert!(matches!(
        scaler.read_flash(),
        Err(Error::Protocol(ProtocolError::NoFlashProfile))
    ));
    assert!(matches!(
        scaler.write_flash(&[0; 16]),
        Err(Error::Protocol(ProtocolError::NoFlashProfile))
    ));
    Ok(())
}

#[test]
fn test_scaler_requires_isp() {
    let mut scaler = Rtd2660::new(SimScaler::new(0xEF3011, 1024), PollConfig::default());
    assert!(matches!(
        scaler.flash_jedec_id(),
        Err(Error::Protocol(ProtocolError::NotInIsp))
    ));
}

#[test]
fn test_scaler_through_trait_object() -> Result<()> {
    let mut sim = SimScaler::new(0xEF3011, 128 * 1024);
    {
        let mut scaler = super::DeviceType::Rtd2660.attach(&mut sim, PollConfig::default());
        assert_eq!(scaler.family(), "RTD2660");

        scaler.enter_isp()?;
        let profile = resolve(scaler.flash_jedec_id()?)?;
        scaler.set_flash(profile)?;
        assert_eq!(scaler.flash().map(|p| p.name), Some("W25X10"));

        scaler.write_flash(b"RTD2660 firmware")?;
        scaler.exit_isp()?;
    }

    assert_eq!(&sim.flash()[..16], b"RTD2660 firmware");
    assert!(!sim.is_in_isp());
    Ok(())
}
