//! In-system programming of the SPI NOR flash behind RTD2660-family display scalers.
//!
//! The scaler is reached over its I2C ISP register window; see [`transport`] for the bus side,
//! [`device`] for the register protocol and [`firmware`] for the complete download/upload flows.

pub mod device;
pub mod error;
pub mod firmware;
pub mod flash;
pub mod image;
pub mod transport;
pub mod util;

pub use error::{Error, Result};
