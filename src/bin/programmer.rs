//! Command-line front end: download, upload or probe the flash behind a scaler on an I2C bus.
//!
//! Exit status is 1 only when the bus cannot be opened or the device type is unknown. Every other
//! failure is logged with its category and the process still exits normally.

use anyhow::Result;
use clap::{Parser, ValueEnum};

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use rtd_flasher::{
    device::{DeviceType, PollConfig},
    error::{Error, TransportError, UsageError},
    firmware,
    transport::DEFAULT_ADDRESS,
};

#[derive(ValueEnum, Copy, Clone, Debug)]
enum Mode {
    /// Read the whole flash into the file
    Download,
    /// Program the file into the flash
    Upload,
    /// Identify the flash chip only
    Probe,
}

#[derive(ValueEnum, Copy, Clone, Debug)]
enum LogLevel {
    Info,
    Debug,
    Verbose,
}

impl LogLevel {
    fn filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Verbose => log::LevelFilter::Trace,
        }
    }
}

/// Parse a slave address given in decimal or as `0x`-prefixed hex
fn parse_address(s: &str) -> Result<u16> {
    let address = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16)?,
        None => s.parse()?,
    };
    anyhow::ensure!(address <= 0x7F, "{s} is not a 7-bit address");
    Ok(address)
}

#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about,
    after_help = "Example arguments: -t rtd2660 -d 2 -m upload -f firmware.bin"
)]
struct Cli {
    /// Device type (rtd2660)
    #[clap(short = 't', long)]
    device_type: String,

    /// Programmer mode
    #[clap(short, long, value_enum)]
    mode: Mode,

    /// Binary file for upload or download
    #[clap(short, long, required_if_eq_any([("mode", "download"), ("mode", "upload")]))]
    file: Option<PathBuf>,

    /// I2C bus ID (1 means /dev/i2c-1)
    #[clap(short = 'd', long)]
    bus: u32,

    /// Log level
    #[clap(short, long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// I2C slave address of the scaler's ISP port [default: 0x4a]
    #[clap(short, long, value_parser = parse_address)]
    address: Option<u16>,

    /// Give up waiting on the scaler after this many seconds
    #[clap(long, default_value_t = PollConfig::DEFAULT_TIMEOUT.as_secs())]
    poll_timeout: u64,

    /// Also append the log to this file
    #[clap(long, default_value = "programmer.log")]
    log_file: PathBuf,
}

impl Cli {
    fn run(&self) -> Result<()> {
        let device_type: DeviceType = self.device_type.parse().map_err(Error::from)?;
        let poll = PollConfig::from_timeout(
            PollConfig::DEFAULT_INTERVAL,
            Duration::from_secs(self.poll_timeout),
        );

        #[cfg(target_os = "linux")]
        let bus = rtd_flasher::transport::i2c::I2cBus::open(
            self.bus,
            self.address.unwrap_or(DEFAULT_ADDRESS),
        )
        .map_err(Error::from)?;

        #[cfg(not(target_os = "linux"))]
        let bus: rtd_flasher::transport::SimScaler =
            anyhow::bail!("I2C access is only supported on Linux");

        let mut scaler = device_type.attach(bus, poll);

        match (self.mode, &self.file) {
            (Mode::Download, Some(file)) => firmware::download(&mut *scaler, file)?,
            (Mode::Upload, Some(file)) => firmware::upload(&mut *scaler, file)?,
            (Mode::Probe, _) => println!("{}", firmware::probe(&mut *scaler)?),
            (_, None) => unreachable!(),
        }

        Ok(())
    }
}

/// Parse the command line. A rejected command line is reported and, like every other usage
/// problem, ends the process with status 0.
fn parse_args<I, T>(args: I) -> std::result::Result<Cli, u8>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::try_parse_from(args).map_err(|error| {
        let _ = error.print();
        0
    })
}

/// Writes everything to both sinks
struct Tee<A, B>(A, B);

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write_all(buf)?;
        self.1.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()?;
        self.1.flush()
    }
}

fn init_logging(args: &Cli) {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(args.log_level.filter().as_str()),
    );

    match File::options().create(true).append(true).open(&args.log_file) {
        Ok(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(Tee(io::stderr(), file))));
        }
        Err(e) => eprintln!("Unable to log to {}: {e}", args.log_file.display()),
    }

    builder.init();
}

/// Failures that end the process with a non-zero status
fn is_fatal(error: &Error) -> bool {
    matches!(
        error,
        Error::Transport(TransportError::Open { .. } | TransportError::SlaveAddress { .. })
            | Error::Usage(UsageError::UnknownDevice(_))
    )
}

fn main() -> ExitCode {
    let args = match parse_args(std::env::args_os()) {
        Ok(args) => args,
        Err(status) => return ExitCode::from(status),
    };

    init_logging(&args);
    howudoin::init(howudoin::consumers::TermLine::default());

    let result = args.run();
    howudoin::disable();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => match error.downcast_ref::<Error>() {
            Some(e) => {
                log::error!("{} error: {e}", e.category());
                if is_fatal(e) {
                    ExitCode::FAILURE
                } else {
                    ExitCode::SUCCESS
                }
            }
            None => {
                log::error!("{error:#}");
                ExitCode::SUCCESS
            }
        },
    }
}

#[test]
fn test_missing_file_argument_is_not_an_error_exit() {
    let status = parse_args(["rtd-prog", "-t", "rtd2660", "-m", "download", "-d", "99"]);
    assert_eq!(status.unwrap_err(), 0);

    let args = parse_args(["rtd-prog", "-t", "rtd2660", "-m", "probe", "-d", "1"]).unwrap();
    assert!(args.file.is_none());
    assert_eq!(args.address, None);
    assert_eq!(args.log_file, PathBuf::from("programmer.log"));
}

#[test]
fn test_tee_writes_both_sinks() {
    let mut tee = Tee(Vec::new(), Vec::new());
    writeln!(tee, "[INFO] Device entered ISP mode").unwrap();
    tee.flush().unwrap();

    assert_eq!(tee.0, b"[INFO] Device entered ISP mode\n");
    assert_eq!(tee.0, tee.1);
}

#[test]
fn test_exit_status_policy() {
    let unknown = Error::from(UsageError::UnknownDevice("rtd2662".into()));
    assert!(is_fatal(&unknown));

    let open = Error::from(TransportError::Open {
        path: PathBuf::from("/dev/i2c-99"),
        source: io::Error::from(io::ErrorKind::NotFound),
    });
    assert!(is_fatal(&open));

    let crc = Error::from(rtd_flasher::error::ProtocolError::CrcMismatch {
        start: 0,
        end: 0xFF,
        hardware: 0x12,
        local: 0x34,
    });
    assert!(!is_fatal(&crc));
}
