//! Access to a scaler's 8-bit register window over the control bus.

#[cfg(target_os = "linux")]
pub mod i2c;
pub mod sim;

use crate::error::TransportError;

pub use sim::SimScaler;

/// The I2C slave address at which RTD scalers expose their ISP register window
pub const DEFAULT_ADDRESS: u16 = 0x4A;

/// Represents an open handle to a device's register window
///
/// Implementations are owned by exactly one session at a time; none of the methods are safe to
/// interleave with another user of the same bus.
pub trait Registers {
    /// Read a single register
    fn read(&mut self, register: u8) -> Result<u8, TransportError>;

    /// Write a single register
    fn write(&mut self, register: u8, value: u8) -> Result<(), TransportError>;

    /// Read up to `buf.len()` bytes from one register in a single block transfer
    ///
    /// Returns the number of bytes the device actually provided.
    fn read_block(&mut self, register: u8, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write `data` to one register in a single block transfer
    fn write_block(&mut self, register: u8, data: &[u8]) -> Result<(), TransportError>;
}

impl<R: Registers + ?Sized> Registers for &mut R {
    fn read(&mut self, register: u8) -> Result<u8, TransportError> {
        (**self).read(register)
    }
    fn write(&mut self, register: u8, value: u8) -> Result<(), TransportError> {
        (**self).write(register, value)
    }
    fn read_block(&mut self, register: u8, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).read_block(register, buf)
    }
    fn write_block(&mut self, register: u8, data: &[u8]) -> Result<(), TransportError> {
        (**self).write_block(register, data)
    }
}
