//! The seam between the write pipeline and the operating system.
//!
//! Everything the pipeline asks the host to do goes through [`HostOps`]:
//! partition enumeration, mount lookup, unmounting, the raw copy, and the
//! final flush. The production implementation is [`LinuxHost`]; tests
//! substitute a scripted mock and never touch a real device.

use crate::device::{BlockDevice, DeviceKind};
use crate::write::{self, CopyObserver};
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Host-side operations consumed by the write pipeline.
pub trait HostOps {
    /// Partition device nodes of a disk, in the host's reported order.
    ///
    /// Defined only for disks; for any other kind this returns an empty
    /// list, which callers treat exactly like "no partitions".
    fn partitions(&self, disk: &BlockDevice) -> Vec<PathBuf>;

    /// Where a block node is currently mounted, if anywhere.
    ///
    /// Returns `None` both for an unmounted node and when the mount table
    /// cannot be queried: either way there is nothing to unmount.
    fn mount_point(&self, node: &Path) -> Option<PathBuf>;

    /// Unmounts a block node.
    fn unmount(&self, node: &Path) -> Result<()>;

    /// Copies an image file onto a device node, reporting progress.
    /// Returns the number of bytes written.
    fn copy_image(
        &self,
        image: &Path,
        device: &Path,
        observer: &mut dyn CopyObserver,
    ) -> Result<u64>;

    /// Flushes outstanding writes to the medium.
    fn flush(&self) -> Result<()>;
}

/// The production host: udev enumeration, the system mount table, and
/// direct syscalls.
pub struct LinuxHost;

impl HostOps for LinuxHost {
    fn partitions(&self, disk: &BlockDevice) -> Vec<PathBuf> {
        if disk.kind != DeviceKind::Disk {
            return Vec::new();
        }
        // Enumeration failures surface as "no partitions"; the pipeline
        // treats both identically.
        list_partitions(&disk.syspath).unwrap_or_default()
    }

    fn mount_point(&self, node: &Path) -> Option<PathBuf> {
        let disks = sysinfo::Disks::new_with_refreshed_list();
        for disk in disks.iter() {
            if Path::new("/dev").join(disk.name()) == node {
                let mount_point = disk.mount_point();
                if mount_point.as_os_str().is_empty() {
                    return None;
                }
                return Some(mount_point.to_path_buf());
            }
        }
        None
    }

    fn unmount(&self, node: &Path) -> Result<()> {
        nix::mount::umount(node)?;
        Ok(())
    }

    fn copy_image(
        &self,
        image: &Path,
        device: &Path,
        observer: &mut dyn CopyObserver,
    ) -> Result<u64> {
        write::copy_image(image, device, observer)
    }

    fn flush(&self) -> Result<()> {
        nix::unistd::sync();
        Ok(())
    }
}

/// Asks udev for the partition children of the disk at `syspath`.
fn list_partitions(syspath: &Path) -> std::io::Result<Vec<PathBuf>> {
    let parent = udev::Device::from_syspath(syspath)?;
    let mut enumerator = udev::Enumerator::new()?;
    enumerator.match_subsystem("block")?;
    enumerator.match_parent(&parent)?;

    let mut nodes: Vec<PathBuf> = enumerator
        .scan_devices()?
        .filter(|dev| dev.devtype().is_some_and(|t| t == "partition"))
        .filter_map(|dev| dev.devnode().map(Path::to_path_buf))
        .collect();
    // udev's scan order is stable but not guaranteed; pin it.
    nodes.sort();
    Ok(nodes)
}
