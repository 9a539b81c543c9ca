use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use dialoguer::{Input, theme::ColorfulTheme};
use hotflash_core::classify::{self, Disposition};
use hotflash_core::device::BlockDevice;
use hotflash_core::host::{HostOps, LinuxHost};
use hotflash_core::job::{Interact, JobState, WriteJob, WritePolicy};
use hotflash_core::monitor::{self, Monitor};
use hotflash_core::write::CopyObserver;
use indicatif::{ProgressBar, ProgressStyle};
use libc::ECHOCTL;
use std::io::{IsTerminal, stdout};
use std::os::unix::io::AsRawFd;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use termios::{TCSANOW, Termios, tcsetattr};

/// Exit status for a failed event-stream subscription, distinct from the
/// generic failure status so supervisors can tell the two apart.
const EXIT_SUBSCRIBE_FAILED: i32 = 2;

#[derive(Parser)]
#[command(name = "hotflash")]
#[command(
    about = "Watches for USB storage hotplug and interactively writes disk images",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor hotplug events and offer to write an image to each new device
    Watch {
        /// Abort a write job when any partition fails to unmount
        #[arg(long)]
        strict_unmount: bool,
    },
    /// List currently connected USB storage disks
    List,
}

/// A helper struct that disables `ECHOCTL` for the terminal.
///
/// `ECHOCTL` is the terminal flag that causes Ctrl+C to be printed as `^C`.
/// With it disabled the monitor can exit cleanly on its own line when the
/// user interrupts it. The original terminal state is restored when this
/// struct is dropped.
struct TermRestorer {
    original_termios: Option<Termios>,
}

impl TermRestorer {
    fn new() -> Self {
        if !stdout().is_terminal() {
            return Self {
                original_termios: None,
            };
        }

        let fd = stdout().as_raw_fd();
        let Ok(original_termios) = Termios::from_fd(fd) else {
            return Self {
                original_termios: None,
            };
        };

        let mut muted = original_termios;
        muted.c_lflag &= !ECHOCTL;
        if tcsetattr(fd, TCSANOW, &muted).is_err() {
            return Self {
                original_termios: None,
            };
        }

        Self {
            original_termios: Some(original_termios),
        }
    }
}

impl Drop for TermRestorer {
    fn drop(&mut self) {
        if let Some(ref original_termios) = self.original_termios {
            let fd = stdout().as_raw_fd();
            tcsetattr(fd, TCSANOW, original_termios).ok();
        }
    }
}

/// The interactive channel a write job talks through: dialoguer prompts
/// in, plain status lines out.
struct ConsoleUi;

impl Interact for ConsoleUi {
    fn ask(&mut self, question: &str) -> Result<String> {
        let answer = Input::<String>::with_theme(&ColorfulTheme::default())
            .with_prompt(question)
            .allow_empty(true)
            .interact_text()?;
        Ok(answer)
    }

    fn status(&mut self, line: &str) {
        println!("{line}");
    }
}

/// Renders copy progress on an indicatif bar.
struct CopyBar {
    bar: ProgressBar,
}

impl CopyObserver for CopyBar {
    fn copy_started(&mut self, total_bytes: u64) {
        self.bar.set_length(total_bytes);
        self.bar.set_prefix("Writing");
        self.bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{prefix:12} [{elapsed_precise}] [{bar:40.green/black}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
                )
                .unwrap()
                .progress_chars("■ "),
        );
    }

    fn copy_progress(&mut self, bytes_written: u64) {
        self.bar.set_position(bytes_written);
    }

    fn copy_finished(&mut self) {
        self.bar.finish();
    }
}

fn main() -> Result<()> {
    // This guard will be dropped when main() exits, restoring the terminal.
    let _term_restorer = TermRestorer::new();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch { strict_unmount } => watch(strict_unmount),
        Commands::List => list(),
    }
}

/// Runs the hotplug monitor until interrupted.
///
/// Events are handled on this thread, one at a time: while a write job is
/// prompting or copying, no other hotplug activity is observed. Ctrl+C
/// requests an orderly shutdown, which takes effect once the current job
/// (if any) has finished.
fn watch(strict_unmount: bool) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let mut monitor = match Monitor::subscribe() {
        Ok(monitor) => monitor,
        Err(e) => {
            eprintln!(
                "{} cannot subscribe to block device events: {e}",
                style("error:").red().bold()
            );
            process::exit(EXIT_SUBSCRIBE_FAILED);
        }
    };

    println!("Monitoring USB storage connections. Press Ctrl+C to exit.");

    let host = LinuxHost;
    monitor.run(&running, |device| {
        handle_event(&host, device, strict_unmount);
    })?;

    println!("\nExiting.");
    Ok(())
}

fn handle_event(host: &LinuxHost, device: BlockDevice, strict_unmount: bool) {
    match classify::triage(&device) {
        Disposition::Ignore => {}
        Disposition::ReportDetached => {
            println!(
                "\n{} Block device removed: {}",
                style("[-]").yellow().bold(),
                device.node.display()
            );
        }
        Disposition::ReportAttached => {
            println!(
                "\n{} USB storage partition connected: {}",
                style("[+]").green().bold(),
                device.node.display()
            );
        }
        Disposition::StartWriteJob => {
            println!(
                "\n{} USB storage device connected: {}",
                style("[+]").green().bold(),
                device.node.display()
            );
            report_partitions(host, &device);
            run_write_job(host, device, strict_unmount);
        }
    }
}

fn report_partitions(host: &LinuxHost, disk: &BlockDevice) {
    let partitions = host.partitions(disk);
    if partitions.is_empty() {
        println!("    no partitions found");
        return;
    }
    println!("    partitions:");
    for node in partitions {
        println!("      - {}", node.display());
    }
}

/// Creates and drives one write job to its terminal state. A failed or
/// aborted job never takes the monitor down with it.
fn run_write_job(host: &LinuxHost, device: BlockDevice, strict_unmount: bool) {
    let policy = WritePolicy {
        strict_unmount,
        ..WritePolicy::default()
    };
    let job = WriteJob::new(device, policy);

    let mut ui = ConsoleUi;
    let mut progress = CopyBar {
        bar: ProgressBar::new(0),
    };

    match job.run(host, &mut ui, &mut progress) {
        Ok(state) => {
            if !progress.bar.is_finished() {
                progress.bar.finish_and_clear();
            }
            if state == JobState::Failed {
                println!(
                    "{} the device was not fully written.",
                    style("warning:").yellow().bold()
                );
            }
        }
        Err(e) => {
            progress.bar.finish_and_clear();
            eprintln!("{} {e:#}", style("error:").red().bold());
        }
    }
}

/// One-shot listing of the currently connected USB storage disks.
fn list() -> Result<()> {
    let disks = monitor::enumerate_usb_disks()?;
    if disks.is_empty() {
        println!("No USB storage disks found.");
        return Ok(());
    }

    let host = LinuxHost;
    println!("Found {} USB storage disk(s):", disks.len());
    println!("\n  {:<14} {:<14} {}", "DEVICE", "PARTITION", "MOUNTED AT");
    println!("  {:-<14} {:-<14} {:-<20}", "", "", "");
    for disk in disks {
        let partitions = host.partitions(&disk);
        if partitions.is_empty() {
            println!("  {:<14} {:<14} -", disk.node.display().to_string(), "-");
            continue;
        }
        let mut device_cell = disk.node.display().to_string();
        for node in partitions {
            let mounted = host
                .mount_point(&node)
                .map(|m| m.display().to_string())
                .unwrap_or_else(|| "(not mounted)".to_string());
            println!(
                "  {:<14} {:<14} {}",
                device_cell,
                node.display().to_string(),
                mounted
            );
            device_cell = String::new();
        }
    }

    Ok(())
}
