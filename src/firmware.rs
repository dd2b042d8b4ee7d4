//! Whole-firmware download, upload and probe against any [`Scaler`].
//!
//! Each flow enters ISP mode, identifies the flash, does its work and then leaves ISP mode, which
//! restarts the scaler. A failure while talking to the scaler leaves it in ISP mode so that the
//! state can be inspected; a failure on the file side still lets the scaler restart.

use std::path::Path;

use crate::device::Scaler;
use crate::error::Result;
use crate::flash::{resolve, FlashProfile};
use crate::image;

/// Read the JEDEC ID, resolve it and install the resulting profile into the scaler
pub fn detect_flash(scaler: &mut dyn Scaler) -> Result<FlashProfile> {
    log::info!("Query info about the flash chip");

    let jedec_id = scaler.flash_jedec_id()?;
    log::debug!("Flash JEDEC ID: {jedec_id:06x}");

    let profile = resolve(jedec_id)?;
    log::info!("Flash device detected ({profile})");

    scaler.set_flash(profile.clone())?;
    Ok(profile)
}

/// Leave ISP mode, then hand back `result`
///
/// If both the flow and the exit fail, the flow's error wins.
fn exit_after<T>(scaler: &mut dyn Scaler, result: Result<T>) -> Result<T> {
    log::info!("Exit from ISP mode, the device will restart after this");
    let exited = scaler.exit_isp();
    let value = result?;
    exited?;
    Ok(value)
}

/// Save the scaler's entire flash to `path`
pub fn download(scaler: &mut dyn Scaler, path: &Path) -> Result<()> {
    log::info!(
        "Download firmware from {}, enter ISP mode first",
        scaler.family()
    );
    scaler.enter_isp()?;

    let profile = detect_flash(scaler)?;
    let data = scaler.read_flash()?;
    if data.len() != profile.size_bytes {
        log::warn!(
            "Downloaded {} bytes but the flash holds {}, the file may be corrupt",
            data.len(),
            profile.size_bytes
        );
    }

    log::info!("Write downloaded data into {}", path.display());
    let saved = image::save(path, &data);
    exit_after(scaler, saved)
}

/// Program the image at `path` into the scaler's flash, starting at address 0
pub fn upload(scaler: &mut dyn Scaler, path: &Path) -> Result<()> {
    log::info!(
        "Upload firmware to {}, enter ISP mode first",
        scaler.family()
    );
    scaler.enter_isp()?;

    let profile = detect_flash(scaler)?;
    let loaded = image::load(path).and_then(|image| {
        image::check_fits(&image, &profile)?;
        Ok(image)
    });
    let image = match loaded {
        Ok(image) => image,
        // Nothing has touched the flash yet
        Err(e) => return exit_after(scaler, Err(e)),
    };

    log::info!("Write {} bytes from {}", image.len(), path.display());
    scaler.write_flash(&image)?;
    exit_after(scaler, Ok(()))
}

/// Identify the flash without touching its contents
pub fn probe(scaler: &mut dyn Scaler) -> Result<FlashProfile> {
    log::info!("Probe {}, enter ISP mode first", scaler.family());
    scaler.enter_isp()?;

    let profile = detect_flash(scaler);
    exit_after(scaler, profile)
}

#[cfg(test)]
use crate::{
    device::{DeviceType, PollConfig},
    error::{CatalogError, Error, ProtocolError, UsageError},
    transport::SimScaler,
};

#[cfg(test)]
fn scratch_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("rtd-flasher-fw-{}-{name}", std::process::id()))
}

#[test]
fn test_download() -> Result<()> {
    let contents: Vec<u8> = (0..128 * 1024).map(|i| (i % 251) as u8).collect();
    let mut sim = SimScaler::new(0xEF3011, contents.len()).contents(&contents);
    let path = scratch_path("download.bin");

    download(
        &mut *DeviceType::Rtd2660.attach(&mut sim, PollConfig::default()),
        &path,
    )?;

    assert_eq!(image::load(&path)?, contents);
    assert!(!sim.is_in_isp());
    assert_eq!(sim.stats().restarts, 1);

    std::fs::remove_file(&path).unwrap();
    Ok(())
}

#[test]
fn test_upload() -> Result<()> {
    let image: Vec<u8> = (0..5000).map(|i| (i % 13) as u8).collect();
    let path = scratch_path("upload.bin");
    image::save(&path, &image)?;

    let mut sim = SimScaler::new(0xEF3011, 128 * 1024).contents(&[0x55; 128 * 1024]);
    upload(
        &mut *DeviceType::Rtd2660.attach(&mut sim, PollConfig::default()),
        &path,
    )?;

    assert_eq!(&sim.flash()[..5000], &image[..]);
    assert!(sim.flash()[5000..].iter().all(|&b| b == 0xFF));
    assert!(!sim.is_in_isp());

    std::fs::remove_file(&path).unwrap();
    Ok(())
}

#[test]
fn test_upload_missing_file_still_exits_isp() {
    let mut sim = SimScaler::new(0xEF3011, 128 * 1024);
    let path = scratch_path("missing.bin");

    let result = upload(
        &mut *DeviceType::Rtd2660.attach(&mut sim, PollConfig::default()),
        &path,
    );
    assert!(matches!(result, Err(Error::Usage(UsageError::File { .. }))));
    assert!(!sim.is_in_isp());
    assert!(sim.stats().program_cycles.is_empty());
}

#[test]
fn test_upload_oversized_image() -> Result<()> {
    let path = scratch_path("oversized.bin");
    image::save(&path, &[0; 64 * 1024 + 1])?;

    let mut sim = SimScaler::new(0x202010, 64 * 1024);
    let result = upload(
        &mut *DeviceType::Rtd2660.attach(&mut sim, PollConfig::default()),
        &path,
    );
    assert!(matches!(
        result,
        Err(Error::Usage(UsageError::ImageTooLarge { .. }))
    ));
    assert!(!sim.is_in_isp());
    assert_eq!(sim.stats().chip_erases, 0);

    std::fs::remove_file(&path).unwrap();
    Ok(())
}

#[test]
fn test_crc_failure_stays_in_isp() -> Result<()> {
    let path = scratch_path("crc.bin");
    image::save(&path, &[0xA5; 1024])?;

    let mut sim = SimScaler::new(0xEF3011, 128 * 1024).corrupt_crc();
    let result = upload(
        &mut *DeviceType::Rtd2660.attach(&mut sim, PollConfig::default()),
        &path,
    );
    assert!(matches!(
        result,
        Err(Error::Protocol(ProtocolError::CrcMismatch { .. }))
    ));
    assert!(sim.is_in_isp());

    std::fs::remove_file(&path).unwrap();
    Ok(())
}

#[test]
fn test_probe() -> Result<()> {
    let mut sim = SimScaler::new(0xC22016, 4096);
    let profile = probe(&mut *DeviceType::Rtd2660.attach(&mut sim, PollConfig::default()))?;

    assert_eq!(profile.jedec_id, 0xC22016);
    assert_eq!(profile.manufacturer, "Macronix");
    assert!(!sim.is_in_isp());
    Ok(())
}

#[test]
fn test_probe_unknown_part() {
    let mut sim = SimScaler::new(0x000000, 4096);
    let result = probe(&mut *DeviceType::Rtd2660.attach(&mut sim, PollConfig::default()));

    assert!(matches!(
        result,
        Err(Error::Catalog(CatalogError::UnknownPart { jedec_id: 0 }))
    ));
    assert!(!sim.is_in_isp());
}
