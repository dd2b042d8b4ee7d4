//! Flat binary firmware images.
//!
//! An image is the raw flash contents starting at address 0, with no header or padding.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::error::{Result, UsageError};
use crate::flash::FlashProfile;

/// Read a whole image from an open stream
pub fn read_image<F: Read>(input: &mut F) -> io::Result<Vec<u8>> {
    let mut image = Vec::new();
    input.read_to_end(&mut image)?;
    Ok(image)
}

/// Write `image` out to an open stream
pub fn write_image<F: Write>(output: &mut F, image: &[u8]) -> io::Result<()> {
    output.write_all(image)?;
    output.flush()
}

/// Load the image file at `path`
pub fn load(path: &Path) -> Result<Vec<u8>> {
    let file_error = |source| UsageError::File {
        path: path.to_path_buf(),
        source,
    };

    let image = read_image(&mut File::open(path).map_err(file_error)?).map_err(file_error)?;
    log::debug!("Loaded {} bytes from {}", image.len(), path.display());
    Ok(image)
}

/// Save `image` to `path`, replacing any existing file
pub fn save(path: &Path, image: &[u8]) -> Result<()> {
    let file_error = |source| UsageError::File {
        path: path.to_path_buf(),
        source,
    };

    write_image(&mut File::create(path).map_err(file_error)?, image).map_err(file_error)?;
    log::debug!("Saved {} bytes to {}", image.len(), path.display());
    Ok(())
}

/// Check that `image` can be written to a flash described by `profile`
pub fn check_fits(image: &[u8], profile: &FlashProfile) -> std::result::Result<(), UsageError> {
    if image.is_empty() {
        return Err(UsageError::EmptyImage);
    }
    if image.len() > profile.size_bytes {
        return Err(UsageError::ImageTooLarge {
            size: image.len(),
            capacity: profile.size_bytes,
        });
    }
    Ok(())
}

#[cfg(test)]
use crate::error::Error;

#[cfg(test)]
fn scratch_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("rtd-flasher-{}-{name}", std::process::id()))
}

#[test]
fn test_stream_round_trip() {
    let mut buf = Vec::new();
    write_image(&mut buf, &[0x12, 0x34, 0xFF]).unwrap();
    assert_eq!(read_image(&mut buf.as_slice()).unwrap(), [0x12, 0x34, 0xFF]);
}

#[test]
fn test_save_then_load() -> Result<()> {
    let path = scratch_path("image.bin");
    let image: Vec<u8> = (0..=255).collect();

    save(&path, &image)?;
    assert_eq!(load(&path)?, image);

    std::fs::remove_file(&path).unwrap();
    Ok(())
}

#[test]
fn test_load_missing_file() {
    let path = scratch_path("does-not-exist.bin");
    assert!(matches!(
        load(&path),
        Err(Error::Usage(UsageError::File { path: p, .. })) if p == path
    ));
}
