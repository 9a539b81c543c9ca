use std::fmt;
use std::path::PathBuf;

/// Coarse classification of a block-subsystem entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    /// A whole storage device (e.g. `/dev/sdb`).
    Disk,
    /// One addressable slice of a disk (e.g. `/dev/sdb1`).
    Partition,
    /// Anything else the block subsystem reports (loop devices, etc.).
    Other,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceKind::Disk => "disk",
            DeviceKind::Partition => "partition",
            DeviceKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// The hotplug action an event reports for a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceAction {
    Attached,
    Detached,
}

/// One parent in a device's chain, immediate parent up to the root.
///
/// Only the transport bus matters for classification; the sysfs path is
/// kept for reporting.
#[derive(Clone, Debug)]
pub struct Ancestor {
    pub syspath: PathBuf,
    /// The transport bus reported on this parent (udev `ID_BUS`), if any.
    pub bus: Option<String>,
}

/// A block-subsystem entity, as reported by the host.
///
/// Populated from udev events and enumerations by the [`crate::monitor`]
/// module; constructed directly in tests.
#[derive(Clone, Debug)]
pub struct BlockDevice {
    /// Path to the block special file (e.g. `/dev/sdb`).
    pub node: PathBuf,
    /// The device's sysfs path, the handle used for partition enumeration.
    pub syspath: PathBuf,
    pub kind: DeviceKind,
    /// The transport bus reported directly on this device (udev `ID_BUS`).
    pub bus: Option<String>,
    /// Parent devices, immediate parent first, each with its own bus.
    pub ancestors: Vec<Ancestor>,
    /// The hotplug action, for devices built from events. Devices obtained
    /// from a static enumeration carry no action.
    pub action: Option<DeviceAction>,
}

impl fmt::Display for BlockDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.node.display(), self.kind)
    }
}
