//! Scaler families that can bridge the control bus to their SPI flash.
//!
//! Every family implements [`Scaler`]; the front end picks one by [`DeviceType`] and never needs
//! to know which register protocol sits underneath.

pub mod rtd2660;

use std::time::Duration;

use retry::delay::Fixed;

use crate::error::{Result, UsageError};
use crate::flash::FlashProfile;
use crate::transport::Registers;

/// ISP and flash operations offered by a scaler
pub trait Scaler {
    /// Human-readable family name
    fn family(&self) -> &'static str;

    /// Put the scaler into ISP mode; a no-op if it already is
    fn enter_isp(&mut self) -> Result<()>;

    fn is_in_isp(&mut self) -> Result<bool>;

    /// Leave ISP mode; a no-op if not in it. This restarts the scaler's MCU.
    fn exit_isp(&mut self) -> Result<()>;

    /// Query the attached flash for its 24-bit JEDEC ID
    fn flash_jedec_id(&mut self) -> Result<u32>;

    /// Install a flash profile. Must precede [`Scaler::read_flash`] and [`Scaler::write_flash`].
    fn set_flash(&mut self, profile: FlashProfile) -> Result<()>;

    fn flash(&self) -> Option<&FlashProfile>;

    /// Read the whole flash, verified against the scaler's CRC
    fn read_flash(&mut self) -> Result<Vec<u8>>;

    /// Write `image` from address 0, verified against the scaler's CRC
    fn write_flash(&mut self, image: &[u8]) -> Result<()>;
}

/// The scaler families this programmer supports
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DeviceType {
    Rtd2660,
}

impl std::str::FromStr for DeviceType {
    type Err = UsageError;

    fn from_str(s: &str) -> std::result::Result<Self, UsageError> {
        match s.to_ascii_lowercase().as_str() {
            "rtd2660" => Ok(DeviceType::Rtd2660),
            _ => Err(UsageError::UnknownDevice(s.to_string())),
        }
    }
}

impl DeviceType {
    /// Wrap an open register transport in the matching [`Scaler`]
    pub fn attach<'a, R: Registers + 'a>(
        self,
        regs: R,
        poll: PollConfig,
    ) -> Box<dyn Scaler + 'a> {
        match self {
            DeviceType::Rtd2660 => Box::new(rtd2660::Rtd2660::new(regs, poll)),
        }
    }
}

/// How hardware completion bits are polled
///
/// Every wait is bounded: once `attempts` polls have seen the bit in the wrong state, the wait
/// fails with a timeout.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PollConfig {
    pub interval: Duration,
    pub attempts: usize,
}

impl PollConfig {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1);
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

    /// Poll every `interval` for at most `timeout`
    pub fn from_timeout(interval: Duration, timeout: Duration) -> Self {
        let attempts = match interval.as_micros() {
            0 => 1,
            step => timeout.as_micros() / step,
        };

        Self {
            interval,
            attempts: usize::try_from(attempts).unwrap_or(usize::MAX).max(1),
        }
    }

    /// The delays between successive polls
    pub fn delays(&self) -> std::iter::Take<Fixed> {
        Fixed::from(self.interval).take(self.attempts)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::from_timeout(Self::DEFAULT_INTERVAL, Self::DEFAULT_TIMEOUT)
    }
}

#[test]
fn test_poll_config() {
    let poll = PollConfig::default();
    assert_eq!(poll.interval, Duration::from_millis(1));
    assert_eq!(poll.attempts, 120_000);
    assert_eq!(poll.delays().count(), 120_000);

    let poll = PollConfig::from_timeout(Duration::from_millis(10), Duration::from_millis(5));
    assert_eq!(poll.attempts, 1);
}

#[test]
fn test_poll_config_sub_millisecond() {
    let poll = PollConfig::from_timeout(Duration::from_micros(250), Duration::from_millis(2));
    assert_eq!(poll.attempts, 8);

    let delays: Vec<Duration> = poll.delays().collect();
    assert_eq!(delays.len(), 8);
    assert!(delays.iter().all(|&d| d == Duration::from_micros(250)));
    assert_eq!(delays.iter().sum::<Duration>(), Duration::from_millis(2));
}

#[test]
fn test_device_type_from_str() {
    assert_eq!("rtd2660".parse::<DeviceType>().unwrap(), DeviceType::Rtd2660);
    assert_eq!("RTD2660".parse::<DeviceType>().unwrap(), DeviceType::Rtd2660);
    assert!(matches!(
        "rtd2662".parse::<DeviceType>(),
        Err(UsageError::UnknownDevice(name)) if name == "rtd2662"
    ));
}
