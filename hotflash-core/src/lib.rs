//! The core, UI-agnostic library for the `hotflash` utility.
//!
//! `hotflash-core` is designed to be used as a library by any front-end,
//! whether it's a command-line interface (like `hotflash`) or a graphical
//! user interface. It watches the Linux block-device hotplug stream,
//! decides which events are USB-backed storage, and drives the interactive
//! pipeline that writes a disk image to a freshly attached device.
//!
//! The library is structured into several key modules:
//! - [`device`]: The `BlockDevice` record events are reduced to.
//! - [`classify`]: Pure classification of devices and events.
//! - [`monitor`]: The udev subscription and serial event loop.
//! - [`host`]: The `HostOps` seam to the operating system.
//! - [`unmount`]: Best-effort unmounting of a disk's partitions.
//! - [`job`]: The `WriteJob` state machine, from path prompt to sync.
//! - [`write`]: The raw 4 MiB synchronous block copy.
//!
//! Events are delivered and handled strictly serially: one job runs to
//! completion before the next event is even read, so a slow prompt delays
//! all other hotplug handling. The copy itself has no timeout and no way
//! to be aborted once started; both are deliberate for whole-disk writes.
//!
//! ## Example: reacting to USB storage attachments
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//!
//! use hotflash_core::classify::{self, Disposition};
//! use hotflash_core::monitor::Monitor;
//!
//! fn main() -> anyhow::Result<()> {
//!     // Cleared by a signal handler to stop the loop.
//!     let running = Arc::new(AtomicBool::new(true));
//!
//!     let mut monitor = Monitor::subscribe()?;
//!     monitor.run(&running, |device| {
//!         if classify::triage(&device) == Disposition::StartWriteJob {
//!             println!("USB storage attached: {}", device.node.display());
//!             // Construct and run a `job::WriteJob` here.
//!         }
//!     })?;
//!
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod device;
pub mod host;
pub mod job;
pub mod monitor;
pub mod unmount;
pub mod write;
