//! Subscribes to the block-device hotplug stream and delivers events.
//!
//! The monitor wraps a udev netlink socket filtered to the `block`
//! subsystem. [`Monitor::run`] polls it on a short tick and hands every
//! attach/detach event to the caller's handler as a [`BlockDevice`]
//! record, synchronously: one event's full handling, prompts included,
//! completes before the next event is read. A shared flag stops the loop
//! at the next tick.

use crate::device::{Ancestor, BlockDevice, DeviceAction, DeviceKind};
use anyhow::Result;
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::ffi::OsStr;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::atomic::{AtomicBool, Ordering};

/// How long one poll tick waits before re-checking the shutdown flag.
const POLL_TICK_MS: u16 = 500;

/// A live subscription to block-device hotplug events.
pub struct Monitor {
    socket: udev::MonitorSocket,
}

impl Monitor {
    /// Subscribes to the host's block-subsystem event stream.
    ///
    /// Failure here is fatal to the tool: there is nothing to watch
    /// without a subscription, and callers are expected to exit with a
    /// distinct status.
    pub fn subscribe() -> io::Result<Self> {
        let socket = udev::MonitorBuilder::new()?
            .match_subsystem("block")?
            .listen()?;
        Ok(Self { socket })
    }

    /// Delivers events to `handler` until `running` goes false.
    ///
    /// The handler is invoked on the calling thread, serially. Events
    /// other than attach/detach, and events without a device node, are
    /// skipped.
    pub fn run(
        &mut self,
        running: &AtomicBool,
        mut handler: impl FnMut(BlockDevice),
    ) -> Result<()> {
        while running.load(Ordering::SeqCst) {
            let ready = {
                let fd = unsafe { BorrowedFd::borrow_raw(self.socket.as_raw_fd()) };
                let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
                match poll(&mut fds, PollTimeout::from(POLL_TICK_MS)) {
                    Ok(n) => n,
                    Err(Errno::EINTR) => continue,
                    Err(e) => return Err(e.into()),
                }
            };
            if ready == 0 {
                continue; // tick expired, re-check the flag
            }

            while let Some(event) = self.socket.iter().next() {
                let action = match event.event_type() {
                    udev::EventType::Add => DeviceAction::Attached,
                    udev::EventType::Remove => DeviceAction::Detached,
                    _ => continue,
                };
                if let Some(device) = record(&event.device(), Some(action)) {
                    handler(device);
                }
            }
        }
        Ok(())
    }
}

/// One-shot enumeration of the USB storage disks currently attached.
pub fn enumerate_usb_disks() -> io::Result<Vec<BlockDevice>> {
    let mut enumerator = udev::Enumerator::new()?;
    enumerator.match_subsystem("block")?;

    let mut disks = Vec::new();
    for device in enumerator.scan_devices()? {
        if !device.devtype().is_some_and(|t| t == "disk") {
            continue;
        }
        if let Some(rec) = record(&device, None) {
            if crate::classify::is_usb_storage(&rec) {
                disks.push(rec);
            }
        }
    }
    Ok(disks)
}

/// Builds a [`BlockDevice`] record from a udev device.
///
/// Returns `None` for devices without a node; there is nothing to write
/// to or report on.
fn record(device: &udev::Device, action: Option<DeviceAction>) -> Option<BlockDevice> {
    let node = device.devnode()?.to_path_buf();

    let kind = match device.devtype().and_then(OsStr::to_str) {
        Some("disk") => DeviceKind::Disk,
        Some("partition") => DeviceKind::Partition,
        _ => DeviceKind::Other,
    };

    let mut ancestors = Vec::new();
    let mut next = device.parent();
    while let Some(parent) = next {
        ancestors.push(Ancestor {
            syspath: parent.syspath().to_path_buf(),
            bus: bus_of(&parent),
        });
        next = parent.parent();
    }

    Some(BlockDevice {
        node,
        syspath: device.syspath().to_path_buf(),
        kind,
        bus: bus_of(device),
        ancestors,
        action,
    })
}

fn bus_of(device: &udev::Device) -> Option<String> {
    device
        .property_value("ID_BUS")
        .and_then(OsStr::to_str)
        .map(str::to_owned)
}
