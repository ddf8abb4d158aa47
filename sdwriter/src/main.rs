use anyhow::{Result, anyhow};
use clap::{ArgAction, Parser};
use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use sdwriter_core::device::{DeviceDescriptor, DeviceEnumerator};
use sdwriter_core::select::{self, Selection};
use sdwriter_core::transfer::{self, Mode, ProgressPlan, TransferConfig, TransferReport, TransferSession};
use sdwriter_core::{Error, platform};
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use term::{Shutdown, TermGuard};
use tracing::debug;

mod logging;
mod term;

#[derive(Parser)]
#[command(name = "sdwriter")]
#[command(about = "Write a raw disk image to an SD card or USB stick", version)]
struct Cli {
    /// Binary file with the SD card image
    #[arg(required_unless_present = "list")]
    image: Option<PathBuf>,

    /// Verify only: compare the device against the image without writing
    #[arg(short = 'v', long = "verify-only", conflicts_with = "no_verify")]
    verify_only: bool,

    /// Skip the verification pass after writing
    #[arg(short = 'n', long = "no-verify")]
    no_verify: bool,

    /// Use the specified disk device instead of asking
    #[arg(short = 'd', long = "device", value_name = "DEVICE")]
    device: Option<PathBuf>,

    /// Debug mode, repeat for more detail
    #[arg(short = 'D', long = "debug", action = ArgAction::Count)]
    debug: u8,

    /// Don't ask for confirmation before overwriting a device picked from the menu
    #[arg(short = 'y', long = "yes")]
    yes: bool,

    /// List available disk devices and exit
    #[arg(short = 'l', long = "list")]
    list: bool,
}

impl Cli {
    fn passes(&self) -> &'static [Mode] {
        if self.verify_only {
            &[Mode::Verify]
        } else if self.no_verify {
            &[Mode::Write]
        } else {
            &[Mode::Write, Mode::Verify]
        }
    }
}

fn list_devices(enumerator: &dyn DeviceEnumerator) -> Result<()> {
    let devices = enumerator.enumerate(platform::MAX_DEVICES)?;
    if devices.is_empty() {
        println!("No target disk devices available.");
        return Ok(());
    }

    println!("Available disk devices:\n");
    for device in devices {
        println!("        {device}");
    }
    println!();
    Ok(())
}

/// Presents a final "Yes/No" confirmation before a device is overwritten.
fn confirm_overwrite(device: &DeviceDescriptor) -> io::Result<bool> {
    println!(
        "{} This will erase all data on '{}' ({} MB).",
        style("WARNING:").red().bold(),
        device.path.display(),
        device.size_mb(),
    );

    let confirmation = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Are you sure you want to proceed?")
        .default(false)
        .interact()?;

    if !confirmation {
        println!("Write operation cancelled.");
    }
    Ok(confirmation)
}

/// The closing line of a pass when no progress bar is drawn (stdout is not
/// a terminal), so piped output still shows which pass finished.
fn plain_finish_line(pb: &ProgressBar, mode: Mode) -> Option<String> {
    pb.is_hidden().then(|| format!("{mode:>11}: done"))
}

/// Runs one write or verify pass with a `#` progress line.
fn run_pass(
    image: &Path,
    device: &Path,
    mode: Mode,
    config: &TransferConfig,
    running: Arc<AtomicBool>,
    show_header: bool,
) -> Result<TransferReport> {
    let pb = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stdout());

    // These closures connect the core library's progress reporting to our UI.
    let on_start = |session: &TransferSession, plan: &ProgressPlan| {
        if show_header {
            println!("     Source: {}", style(session.source_path().display()).cyan());
            println!("Destination: {}", style(session.target_path().display()).cyan());
            println!("       Size: {:.1} MB", session.total_bytes() as f64 / 1_000_000.0);
        }
        pb.set_length(plan.ticks);
        pb.set_prefix(format!("{mode:>11}"));
        let template = format!("{{prefix}}: {{bar:{}}} {{msg}}", plan.ticks.max(1));
        if let Ok(bar) = ProgressStyle::with_template(&template) {
            pb.set_style(bar.progress_chars("#."));
        }
    };
    let on_tick = |_: &TransferSession| pb.inc(1);

    let result = transfer::run(image, device, mode, config, running, on_start, on_tick);

    match result {
        Ok(report) => {
            pb.finish_with_message("done");
            if let Some(line) = plain_finish_line(&pb, mode) {
                println!("{line}");
            }
            Ok(report)
        }
        Err(e) => {
            pb.abandon();
            Err(e.into())
        }
    }
}

fn run(cli: &Cli, shutdown: &Shutdown) -> Result<()> {
    let enumerator = platform::enumerator();
    if cli.list {
        return list_devices(enumerator.as_ref());
    }

    let image = cli
        .image
        .as_deref()
        .ok_or_else(|| anyhow!("no image file given"))?;

    // Only a device picked from the menu is confirmed, and before its
    // volumes are released; an explicit --device is the scripted path.
    let ask = !cli.yes && !cli.verify_only && io::stdin().is_terminal();
    let selection = select::select_with(
        cli.device.as_deref(),
        &enumerator,
        io::stdin().lock(),
        io::stdout(),
        |descriptor| if ask { confirm_overwrite(descriptor) } else { Ok(true) },
    )?;
    let device = match selection {
        Selection::Device { path, .. } => path,
        Selection::Cancelled => return Ok(()),
    };
    debug!(device = %device.display(), image = %image.display(), "target resolved");

    let config = TransferConfig::default();
    let _armed = shutdown.arm();
    for (i, &mode) in cli.passes().iter().enumerate() {
        let report = run_pass(image, &device, mode, &config, shutdown.running(), i == 0)?;
        println!("      Speed: {:.1} MB/sec", report.throughput_mb_per_sec());
    }

    Ok(())
}

/// The diagnostic for an error without a dedicated presentation.
/// Core errors already carry their OS cause in their message.
fn diagnostic(err: &anyhow::Error) -> String {
    match err.downcast_ref::<Error>() {
        Some(e) => e.to_string(),
        None => format!("{err:#}"),
    }
}

/// Prints the diagnostic for a failed run and returns the exit status.
fn report(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        Some(Error::Interrupted) => {
            eprintln!("\n{err}");
            0
        }
        Some(e) if e.is_clean_exit() => {
            println!("{e}");
            0
        }
        Some(Error::Mismatch(mismatch)) => {
            eprintln!("{}", style("DATA ERROR!").red().bold());
            eprintln!("{mismatch}");
            1
        }
        _ => {
            eprintln!("{} {}", style("error:").red().bold(), diagnostic(err));
            1
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.debug);

    // This guard will be dropped when main() exits, restoring the terminal.
    let term = TermGuard::new();
    let shutdown = match Shutdown::install(term.snapshot()) {
        Ok(shutdown) => shutdown,
        Err(e) => {
            eprintln!("{} cannot install signal handler: {e}", style("error:").red().bold());
            return ExitCode::FAILURE;
        }
    };

    match run(&cli, &shutdown) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => ExitCode::from(report(&e)),
    }
}
