//! Error types shared by every layer of the programmer.
//!
//! Failures are grouped by where they originate: the control bus, the scaler's ISP protocol, the
//! flash catalog, or the way the programmer was invoked. The top level reports the category
//! alongside the message, so each group is kept as its own enum.

use std::{io, path::PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Usage(#[from] UsageError),
}

impl Error {
    /// Short name of the category, as printed by the command-line front end
    pub fn category(&self) -> &'static str {
        match self {
            Error::Transport(_) => "transport",
            Error::Protocol(_) => "protocol",
            Error::Catalog(_) => "catalog",
            Error::Usage(_) => "usage",
        }
    }
}

/// Failures reported by the control-bus collaborator. These are never retried.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unable to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to select slave address {address:#04x}: {source}")]
    SlaveAddress {
        address: u16,
        #[source]
        source: io::Error,
    },

    #[error("unable to read register {register:#04x}: {source}")]
    Read {
        register: u8,
        #[source]
        source: io::Error,
    },

    #[error("unable to write register {register:#04x}: {source}")]
    Write {
        register: u8,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unable to enter ISP mode (register {register:#04x} reads {actual:#04x}, expected ISP bit {expected:#04x})")]
    IspEntryFailed { register: u8, expected: u8, actual: u8 },

    #[error("unable to exit ISP mode (register {register:#04x} reads {actual:#04x}, expected ISP bit {expected:#04x} clear)")]
    IspExitFailed { register: u8, expected: u8, actual: u8 },

    #[error("the scaler is not in ISP mode")]
    NotInIsp,

    #[error("no flash profile has been installed")]
    NoFlashProfile,

    #[error("flash read stalled at {address:#08x} ({requested} bytes requested, none returned)")]
    ShortRead { address: u32, requested: usize },

    #[error("CRC mismatch over {start:#08x}..={end:#08x} (scaler: {hardware:#04x}, computed: {local:#04x})")]
    CrcMismatch {
        start: u32,
        end: u32,
        hardware: u8,
        local: u8,
    },

    #[error("program of {size} bytes does not fit the {latch}-byte write latch")]
    ProgramTooLarge { size: usize, latch: usize },

    #[error("timed out after {attempts} polls of register {register:#04x} (mask {mask:#04x})")]
    Timeout { register: u8, mask: u8, attempts: u64 },

    #[error("unable to encode register value: {0}")]
    Encoding(String),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown flash device (JEDEC ID {jedec_id:#08x})")]
    UnknownPart { jedec_id: u32 },
}

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("unknown device type: {0}")]
    UnknownDevice(String),

    #[error("{path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("image is {size} bytes but the flash only holds {capacity}")]
    ImageTooLarge { size: usize, capacity: usize },

    #[error("image is empty")]
    EmptyImage,
}
