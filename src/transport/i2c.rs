//! Register access over the Linux i2c-dev interface

use super::Registers;
use crate::error::TransportError;

use i2c_linux::I2c;

use std::fmt;
use std::fs::File;
use std::path::PathBuf;

/// Largest block the SMBus "I2C block" transfers can carry
const MAX_BLOCK: usize = 32;

/// An open `/dev/i2c-N` bus, bound to one slave address
pub struct I2cBus {
    i2c: I2c<File>,
    path: PathBuf,
    address: u16,
}

// `I2c` has no `Debug` of its own
impl fmt::Debug for I2cBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("I2cBus")
            .field("path", &self.path)
            .field("address", &format_args!("{:#04x}", self.address))
            .finish_non_exhaustive()
    }
}

impl I2cBus {
    /// Open a bus by number (e.g. 1 for "/dev/i2c-1") and select the slave at `address`
    pub fn open(bus: u32, address: u16) -> Result<Self, TransportError> {
        Self::open_path(format!("/dev/i2c-{bus}"), address)
    }

    /// Open a bus by path and select the slave at `address`
    pub fn open_path<P: Into<PathBuf>>(path: P, address: u16) -> Result<Self, TransportError> {
        let path = path.into();
        let mut i2c = I2c::from_path(&path).map_err(|source| TransportError::Open {
            path: path.clone(),
            source,
        })?;
        i2c.smbus_set_slave_address(address, false)
            .map_err(|source| TransportError::SlaveAddress { address, source })?;

        log::debug!("Opened {} (address {address:#04x})", path.display());

        Ok(Self { i2c, path, address })
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Registers for I2cBus {
    fn read(&mut self, register: u8) -> Result<u8, TransportError> {
        self.i2c
            .smbus_read_byte_data(register)
            .map_err(|source| TransportError::Read { register, source })
    }

    fn write(&mut self, register: u8, value: u8) -> Result<(), TransportError> {
        self.i2c
            .smbus_write_byte_data(register, value)
            .map_err(|source| TransportError::Write { register, source })
    }

    fn read_block(&mut self, register: u8, buf: &mut [u8]) -> Result<usize, TransportError> {
        let len = buf.len().min(MAX_BLOCK);
        self.i2c
            .i2c_read_block_data(register, &mut buf[..len])
            .map_err(|source| TransportError::Read { register, source })
    }

    fn write_block(&mut self, register: u8, data: &[u8]) -> Result<(), TransportError> {
        for chunk in data.chunks(MAX_BLOCK) {
            self.i2c
                .i2c_write_block_data(register, chunk)
                .map_err(|source| TransportError::Write { register, source })?;
        }
        Ok(())
    }
}

#[test]
fn test_open_missing_bus() {
    let result = I2cBus::open_path("/dev/i2c-rtd-flasher-missing", 0x4A);
    assert!(matches!(
        result,
        Err(TransportError::Open { path, .. }) if path == PathBuf::from("/dev/i2c-rtd-flasher-missing")
    ));
}

#[test]
fn test_bus_is_debug() {
    // Scalers built on the bus derive `Debug` through it
    fn assert_debug<T: fmt::Debug>() {}
    assert_debug::<I2cBus>();
    assert_debug::<crate::device::rtd2660::Rtd2660<I2cBus>>();
}
