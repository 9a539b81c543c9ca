//! The interactive write job: one end-to-end attempt to overwrite a disk
//! with an image file.
//!
//! A job is a small state machine. It asks the user for an image path
//! (retrying until the path is valid or the user bows out), asks once for
//! explicit confirmation, unmounts the target's partitions, runs the raw
//! copy, and syncs. Everything before confirmation can be cancelled;
//! everything after it runs to completion or failure on its own.

use crate::device::BlockDevice;
use crate::host::HostOps;
use crate::unmount::unmount_all;
use crate::write::CopyObserver;
use anyhow::Result;
use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// The states a write job moves through.
///
/// `Succeeded`, `Failed` and `Cancelled` are terminal; a job is never
/// reused or retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    AwaitingPath,
    AwaitingConfirmation,
    Unmounting,
    Copying,
    Flushing,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::AwaitingPath => "awaiting path",
            JobState::AwaitingConfirmation => "awaiting confirmation",
            JobState::Unmounting => "unmounting",
            JobState::Copying => "copying",
            JobState::Flushing => "flushing",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Explicit job configuration, passed in at construction.
#[derive(Clone, Debug)]
pub struct WritePolicy {
    /// Required image file extension, compared case-insensitively.
    pub image_suffix: String,
    /// Answer that skips the device at the path prompt.
    pub cancel_word: String,
    /// The only answer that confirms the destructive write.
    pub confirm_word: String,
    /// When true, any failed unmount aborts the job instead of being
    /// advisory.
    pub strict_unmount: bool,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            image_suffix: "iso".to_string(),
            cancel_word: "skip".to_string(),
            confirm_word: "yes".to_string(),
            strict_unmount: false,
        }
    }
}

/// The interactive channel a job talks to the user through.
///
/// The CLI backs this with dialoguer prompts and styled output; tests
/// script the answers and capture the lines.
pub trait Interact {
    /// Asks a question and returns the user's raw answer.
    fn ask(&mut self, question: &str) -> Result<String>;
    /// Emits a human-readable status line.
    fn status(&mut self, line: &str);
}

/// One attempt to write an image to a disk.
pub struct WriteJob {
    target: BlockDevice,
    policy: WritePolicy,
    state: JobState,
}

impl WriteJob {
    pub fn new(target: BlockDevice, policy: WritePolicy) -> Self {
        Self {
            target,
            policy,
            state: JobState::AwaitingPath,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn target(&self) -> &BlockDevice {
        &self.target
    }

    /// Drives the job from `AwaitingPath` to a terminal state.
    ///
    /// Every transition is narrated through `ui`; copy progress goes to
    /// `observer`. External failures (unmount, copy, flush) become job
    /// outcomes, not errors: the only error this returns is a broken
    /// interaction channel.
    pub fn run(
        mut self,
        host: &impl HostOps,
        ui: &mut impl Interact,
        observer: &mut dyn CopyObserver,
    ) -> Result<JobState> {
        let image = match self.await_image_path(ui)? {
            Some(image) => image,
            None => return Ok(self.state),
        };

        if !self.await_confirmation(&image, ui)? {
            return Ok(self.state);
        }

        if !self.unmount_target(host, ui) {
            return Ok(self.state);
        }

        self.copy_and_flush(&image, host, ui, observer);
        Ok(self.state)
    }

    /// `AwaitingPath`: prompt until the answer is a valid image path or
    /// the cancel word. Returns `None` when the job was cancelled.
    fn await_image_path(&mut self, ui: &mut impl Interact) -> Result<Option<PathBuf>> {
        loop {
            let answer = ui.ask(&format!(
                "Path of the image to write to {} (or '{}' to ignore this device)",
                self.target.node.display(),
                self.policy.cancel_word
            ))?;
            let answer = answer.trim();

            if answer.eq_ignore_ascii_case(&self.policy.cancel_word) {
                ui.status(&format!(
                    "Skipping write to {}.",
                    self.target.node.display()
                ));
                self.state = JobState::Cancelled;
                return Ok(None);
            }

            match validate_image_path(Path::new(answer), &self.policy.image_suffix) {
                Ok(image) => {
                    self.state = JobState::AwaitingConfirmation;
                    return Ok(Some(image));
                }
                Err(reason) => ui.status(&reason),
            }
        }
    }

    /// `AwaitingConfirmation`: one question, one chance. Anything but the
    /// confirm word cancels.
    fn await_confirmation(&mut self, image: &Path, ui: &mut impl Interact) -> Result<bool> {
        ui.status(&format!(
            "You are about to write '{}' to '{}'. This will erase all data on the device.",
            image.display(),
            self.target.node.display()
        ));
        let answer = ui.ask(&format!(
            "Type '{}' to proceed, or anything else to cancel",
            self.policy.confirm_word
        ))?;

        if answer.trim().to_lowercase() != self.policy.confirm_word {
            ui.status("Operation cancelled.");
            self.state = JobState::Cancelled;
            return Ok(false);
        }
        Ok(true)
    }

    /// `Unmounting`: best-effort over every mounted partition. Returns
    /// false only when a failure is fatal under the strict policy.
    fn unmount_target(&mut self, host: &impl HostOps, ui: &mut impl Interact) -> bool {
        self.state = JobState::Unmounting;
        ui.status(&format!(
            "Unmounting partitions of {}...",
            self.target.node.display()
        ));

        let outcomes = unmount_all(host, &self.target);
        if outcomes.is_empty() {
            ui.status("Nothing to unmount.");
        }

        let mut any_failed = false;
        for outcome in &outcomes {
            match &outcome.result {
                Ok(()) => ui.status(&format!(
                    "Unmounted {} (was mounted at {}).",
                    outcome.node.display(),
                    outcome.mount_point.display()
                )),
                Err(e) => {
                    any_failed = true;
                    ui.status(&format!(
                        "Failed to unmount {}: {e:#}.",
                        outcome.node.display()
                    ));
                }
            }
        }

        if any_failed {
            if self.policy.strict_unmount {
                ui.status("Aborting: not all partitions could be unmounted.");
                self.state = JobState::Failed;
                return false;
            }
            ui.status("Continuing anyway; unmount the rest manually if needed.");
        }
        true
    }

    /// `Copying` then `Flushing`. A copy failure is terminal; a flush
    /// failure is reported but does not demote a finished write.
    fn copy_and_flush(
        &mut self,
        image: &Path,
        host: &impl HostOps,
        ui: &mut impl Interact,
        observer: &mut dyn CopyObserver,
    ) {
        self.state = JobState::Copying;
        ui.status(&format!(
            "Writing '{}' to {}...",
            image.display(),
            self.target.node.display()
        ));
        ui.status("This may take several minutes. Do not interrupt the process.");

        match host.copy_image(image, &self.target.node, observer) {
            Ok(written) => {
                self.state = JobState::Flushing;
                ui.status(&format!("Wrote {written} bytes. Syncing device..."));
                match host.flush() {
                    Ok(()) => ui.status("Sync complete."),
                    Err(e) => ui.status(&format!("Sync failed: {e:#}.")),
                }
                ui.status(&format!(
                    "Successfully wrote '{}' to {}.",
                    image.display(),
                    self.target.node.display()
                ));
                self.state = JobState::Succeeded;
            }
            Err(e) => {
                ui.status(&format!(
                    "Writing to {} failed: {e:#}.",
                    self.target.node.display()
                ));
                self.state = JobState::Failed;
            }
        }
    }
}

/// Checks that `path` names an existing regular file with the required
/// extension. The error is the line shown to the user before re-prompting.
fn validate_image_path(path: &Path, suffix: &str) -> Result<PathBuf, String> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(_) => {
            return Err(format!(
                "'{}' does not exist or cannot be read. Please try again.",
                path.display()
            ));
        }
    };
    if !metadata.is_file() {
        return Err(format!(
            "'{}' is not a regular file. Please try again.",
            path.display()
        ));
    }
    let has_suffix = path
        .extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| ext.eq_ignore_ascii_case(suffix));
    if !has_suffix {
        return Err(format!(
            "'{}' does not have a .{suffix} extension. Please provide a valid image file.",
            path.display()
        ));
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceAction, DeviceKind};
    use crate::host::mock::MockHost;
    use crate::write::SilentObserver;
    use anyhow::anyhow;
    use std::collections::VecDeque;
    use std::io::Write as _;

    /// Scripted [`Interact`]: pops canned answers, records everything.
    #[derive(Default)]
    struct Script {
        answers: VecDeque<String>,
        questions: Vec<String>,
        lines: Vec<String>,
    }

    impl Script {
        fn answering(answers: &[&str]) -> Self {
            Script {
                answers: answers.iter().map(|s| s.to_string()).collect(),
                ..Script::default()
            }
        }
    }

    impl Interact for Script {
        fn ask(&mut self, question: &str) -> Result<String> {
            self.questions.push(question.to_string());
            self.answers
                .pop_front()
                .ok_or_else(|| anyhow!("script ran out of answers"))
        }
        fn status(&mut self, line: &str) {
            self.lines.push(line.to_string());
        }
    }

    fn usb_disk() -> BlockDevice {
        BlockDevice {
            node: PathBuf::from("/dev/sdz"),
            syspath: PathBuf::from("/sys/class/block/sdz"),
            kind: DeviceKind::Disk,
            bus: Some("usb".into()),
            ancestors: Vec::new(),
            action: Some(DeviceAction::Attached),
        }
    }

    fn iso_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".iso")
            .tempfile()
            .unwrap();
        file.write_all(b"not really an iso").unwrap();
        file.flush().unwrap();
        file
    }

    fn run_job(policy: WritePolicy, host: &MockHost, ui: &mut Script) -> JobState {
        WriteJob::new(usb_disk(), policy)
            .run(host, ui, &mut SilentObserver)
            .unwrap()
    }

    #[test]
    fn new_job_awaits_a_path() {
        let job = WriteJob::new(usb_disk(), WritePolicy::default());
        assert_eq!(job.state(), JobState::AwaitingPath);
        assert!(!job.state().is_terminal());
    }

    #[test]
    fn nonexistent_path_reprompts() {
        let host = MockHost::default();
        let mut ui = Script::answering(&["/tmp/notfound.iso", "skip"]);

        let state = run_job(WritePolicy::default(), &host, &mut ui);

        assert_eq!(state, JobState::Cancelled);
        // The bad path did not advance the job; the same question was
        // asked again.
        assert_eq!(ui.questions.len(), 2);
        assert_eq!(ui.questions[0], ui.questions[1]);
        assert!(host.copy_calls.borrow().is_empty());
    }

    #[test]
    fn wrong_suffix_reprompts() {
        let img = tempfile::Builder::new().suffix(".img").tempfile().unwrap();
        let host = MockHost::default();
        let mut ui = Script::answering(&[img.path().to_str().unwrap(), "skip"]);

        let state = run_job(WritePolicy::default(), &host, &mut ui);

        assert_eq!(state, JobState::Cancelled);
        assert_eq!(ui.questions.len(), 2);
        assert!(ui.lines.iter().any(|l| l.contains(".iso extension")));
    }

    #[test]
    fn directory_path_reprompts() {
        let dir = tempfile::tempdir().unwrap();
        let host = MockHost::default();
        let mut ui = Script::answering(&[dir.path().to_str().unwrap(), "skip"]);

        let state = run_job(WritePolicy::default(), &host, &mut ui);

        assert_eq!(state, JobState::Cancelled);
        assert!(ui.lines.iter().any(|l| l.contains("not a regular file")));
    }

    #[test]
    fn cancel_word_cancels_before_anything_happens() {
        let host = MockHost::with_mounted(&[("/dev/sdz1", "/media/usb")]);
        let mut ui = Script::answering(&["skip"]);

        let state = run_job(WritePolicy::default(), &host, &mut ui);

        assert_eq!(state, JobState::Cancelled);
        assert!(host.unmount_calls.borrow().is_empty());
        assert!(host.copy_calls.borrow().is_empty());
    }

    #[test]
    fn declined_confirmation_cancels_without_side_effects() {
        let iso = iso_file();
        let host = MockHost::with_mounted(&[("/dev/sdz1", "/media/usb")]);
        let mut ui = Script::answering(&[iso.path().to_str().unwrap(), "no"]);

        let state = run_job(WritePolicy::default(), &host, &mut ui);

        assert_eq!(state, JobState::Cancelled);
        assert!(host.unmount_calls.borrow().is_empty());
        assert!(host.copy_calls.borrow().is_empty());
        assert_eq!(*host.flush_calls.borrow(), 0);
    }

    #[test]
    fn confirmed_write_runs_the_whole_pipeline() {
        let iso = iso_file();
        let host = MockHost::with_mounted(&[("/dev/sdz1", "/media/usb")]);
        let mut ui = Script::answering(&[iso.path().to_str().unwrap(), "yes"]);

        let state = run_job(WritePolicy::default(), &host, &mut ui);

        assert_eq!(state, JobState::Succeeded);
        assert_eq!(*host.unmount_calls.borrow(), vec![PathBuf::from("/dev/sdz1")]);
        assert_eq!(
            *host.copy_calls.borrow(),
            vec![(iso.path().to_path_buf(), PathBuf::from("/dev/sdz"))]
        );
        assert_eq!(*host.flush_calls.borrow(), 1);
    }

    #[test]
    fn confirmation_ignores_case_and_whitespace() {
        let iso = iso_file();
        let host = MockHost::default();
        let mut ui = Script::answering(&[iso.path().to_str().unwrap(), "  YES "]);

        let state = run_job(WritePolicy::default(), &host, &mut ui);

        assert_eq!(state, JobState::Succeeded);
    }

    #[test]
    fn near_miss_confirmation_cancels() {
        let iso = iso_file();
        let host = MockHost::default();
        let mut ui = Script::answering(&[iso.path().to_str().unwrap(), "yeah"]);

        let state = run_job(WritePolicy::default(), &host, &mut ui);

        assert_eq!(state, JobState::Cancelled);
        assert!(host.copy_calls.borrow().is_empty());
    }

    #[test]
    fn copy_failure_fails_the_job_without_flushing() {
        let iso = iso_file();
        let mut host = MockHost::default();
        host.copy_failure = Some("short write".into());
        let mut ui = Script::answering(&[iso.path().to_str().unwrap(), "yes"]);

        let state = run_job(WritePolicy::default(), &host, &mut ui);

        assert_eq!(state, JobState::Failed);
        assert_eq!(*host.flush_calls.borrow(), 0);
        assert!(ui.lines.iter().any(|l| l.contains("short write")));
    }

    #[test]
    fn flush_failure_does_not_demote_a_finished_write() {
        let iso = iso_file();
        let mut host = MockHost::default();
        host.flush_failure = true;
        let mut ui = Script::answering(&[iso.path().to_str().unwrap(), "yes"]);

        let state = run_job(WritePolicy::default(), &host, &mut ui);

        assert_eq!(state, JobState::Succeeded);
        assert!(ui.lines.iter().any(|l| l.contains("Sync failed")));
    }

    #[test]
    fn unmount_failure_is_advisory_by_default() {
        let iso = iso_file();
        let mut host = MockHost::with_mounted(&[("/dev/sdz1", "/media/usb")]);
        host.failing_unmounts.insert(PathBuf::from("/dev/sdz1"));
        let mut ui = Script::answering(&[iso.path().to_str().unwrap(), "yes"]);

        let state = run_job(WritePolicy::default(), &host, &mut ui);

        assert_eq!(state, JobState::Succeeded);
        assert_eq!(host.copy_calls.borrow().len(), 1);
    }

    #[test]
    fn strict_policy_makes_unmount_failure_fatal() {
        let iso = iso_file();
        let mut host = MockHost::with_mounted(&[("/dev/sdz1", "/media/usb")]);
        host.failing_unmounts.insert(PathBuf::from("/dev/sdz1"));
        let mut ui = Script::answering(&[iso.path().to_str().unwrap(), "yes"]);

        let policy = WritePolicy {
            strict_unmount: true,
            ..WritePolicy::default()
        };
        let state = run_job(policy, &host, &mut ui);

        assert_eq!(state, JobState::Failed);
        assert!(host.copy_calls.borrow().is_empty());
        assert_eq!(*host.flush_calls.borrow(), 0);
    }

    #[test]
    fn validate_accepts_only_existing_regular_iso_files() {
        let iso = iso_file();
        assert!(validate_image_path(iso.path(), "iso").is_ok());
        assert!(validate_image_path(Path::new("/tmp/notfound.iso"), "iso").is_err());
        assert!(validate_image_path(Path::new("/tmp"), "iso").is_err());
    }
}
