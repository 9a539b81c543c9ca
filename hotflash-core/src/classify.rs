//! Pure classification of block-subsystem devices and events.
//!
//! Nothing in this module touches the system; it operates entirely on
//! [`BlockDevice`] records so the decision logic can be tested without a
//! single USB port.

use crate::device::{BlockDevice, DeviceAction, DeviceKind};

const USB_BUS: &str = "usb";

/// Decides whether a device is USB-backed storage.
///
/// A device qualifies when it is a disk or a partition and either reports
/// the `usb` bus itself or has an ancestor that does. Devices of any other
/// kind never qualify, whatever their bus says.
pub fn is_usb_storage(device: &BlockDevice) -> bool {
    if device.kind == DeviceKind::Other {
        return false;
    }
    if device.bus.as_deref() == Some(USB_BUS) {
        return true;
    }
    device
        .ancestors
        .iter()
        .any(|ancestor| ancestor.bus.as_deref() == Some(USB_BUS))
}

/// What the event monitor should do with a device event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// A USB storage disk was attached: start an interactive write job.
    StartWriteJob,
    /// A USB storage partition was attached: report it. The disk's own
    /// attach event is the one that carries the write job.
    ReportAttached,
    /// A block device was detached: report it, nothing else to do.
    ReportDetached,
    /// Not an event this tool acts on.
    Ignore,
}

/// Maps a device event to the action the monitor takes for it.
///
/// Detachments are always reported, classified or not. Attachments only
/// matter for USB storage, and only a disk attachment starts a write job:
/// its partitions arrive as separate events of the same physical plug.
pub fn triage(device: &BlockDevice) -> Disposition {
    match device.action {
        Some(DeviceAction::Detached) => Disposition::ReportDetached,
        Some(DeviceAction::Attached) if is_usb_storage(device) => match device.kind {
            DeviceKind::Disk => Disposition::StartWriteJob,
            _ => Disposition::ReportAttached,
        },
        _ => Disposition::Ignore,
    }
}
