//! The raw block-copy operation: image file in, device node out.
//!
//! The copy runs in fixed 4 MiB blocks with the device opened `O_SYNC`, so
//! every block reaches the medium before the next one is issued. Both are
//! deliberate, non-configurable constants: large blocks keep throughput up
//! on flash media, synchronous writes keep the progress numbers honest.
//! There is no way to abort a copy once it has started short of killing
//! the process.

use anyhow::{Result, anyhow};
use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// Fixed copy block size.
pub const BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Receives progress notifications from a running copy.
///
/// All methods have empty defaults so callers only implement what they
/// render.
pub trait CopyObserver {
    /// Called once before the first block, with the total byte count.
    fn copy_started(&mut self, _total_bytes: u64) {}
    /// Called after each block with the running total written so far.
    fn copy_progress(&mut self, _bytes_written: u64) {}
    /// Called once after the last block has been written.
    fn copy_finished(&mut self) {}
}

/// A [`CopyObserver`] that discards every notification.
pub struct SilentObserver;

impl CopyObserver for SilentObserver {}

/// Copies an image file onto a block device node.
///
/// Returns the number of bytes written, which on success always equals the
/// image length.
///
/// # Errors
///
/// Fails if the image or the device cannot be opened, if the image is
/// empty, or on any I/O error mid-copy. A failed copy leaves the device in
/// an unspecified, partially-written state.
pub fn copy_image(
    image_path: &Path,
    device_path: &Path,
    observer: &mut dyn CopyObserver,
) -> Result<u64> {
    let mut image_file = File::open(image_path)?;
    let image_len = image_file.metadata()?.len();
    if image_len == 0 {
        return Err(anyhow!("image '{}' is empty", image_path.display()));
    }

    let mut device_file = std::fs::OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_SYNC)
        .open(device_path)?;

    observer.copy_started(image_len);

    let mut buffer = vec![0u8; BLOCK_SIZE];
    let mut written: u64 = 0;
    while written < image_len {
        let chunk = std::cmp::min(BLOCK_SIZE as u64, image_len - written) as usize;
        image_file.read_exact(&mut buffer[..chunk])?;
        device_file.write_all(&buffer[..chunk])?;
        written += chunk as u64;
        observer.copy_progress(written);
    }

    device_file.flush()?;
    observer.copy_finished();
    Ok(written)
}
