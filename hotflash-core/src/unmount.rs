//! Best-effort unmounting of every partition on a disk.

use crate::device::BlockDevice;
use crate::host::HostOps;
use anyhow::Result;
use std::path::PathBuf;

/// The result of one unmount attempt.
pub struct UnmountOutcome {
    pub node: PathBuf,
    /// Where the partition was mounted before the attempt.
    pub mount_point: PathBuf,
    pub result: Result<()>,
}

/// Unmounts every mounted partition of `disk`, one attempt per partition.
///
/// Partitions that are not mounted produce no outcome and no attempt, so a
/// second pass over an already-unmounted disk does nothing. One
/// partition's failure never stops the remaining partitions; the caller
/// decides what a failed outcome means for the job.
pub fn unmount_all(host: &impl HostOps, disk: &BlockDevice) -> Vec<UnmountOutcome> {
    let mut outcomes = Vec::new();
    for node in host.partitions(disk) {
        let Some(mount_point) = host.mount_point(&node) else {
            continue;
        };
        let result = host.unmount(&node);
        outcomes.push(UnmountOutcome {
            node,
            mount_point,
            result,
        });
    }
    outcomes
}
