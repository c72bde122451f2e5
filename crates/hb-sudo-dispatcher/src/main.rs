// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use anyhow::{Context, Result};
use clap::Parser;
use hb_logging::CliLoggingArgs;
use hb_sudo_dispatcher::Dispatcher;
use hb_sudo_proto::Transaction;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::os::fd::{FromRawFd, RawFd};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Privileged helper serving hostbridge filesystem requests",
    long_about = None
)]
struct Args {
    /// Descriptor to read requests from (defaults to stdin)
    #[arg(long, env = "HB_SUDO_REQUEST_FD")]
    request_fd: Option<RawFd>,

    /// Descriptor to write replies to (defaults to stdout)
    #[arg(long, env = "HB_SUDO_REPLY_FD")]
    reply_fd: Option<RawFd>,

    #[command(flatten)]
    logging: CliLoggingArgs,
}

fn main() -> Result<()> {
    let args = Args::parse();

    args.logging.init("hb-sudo-dispatcher")?;

    let (request, reply) = match (args.request_fd, args.reply_fd) {
        (Some(request), Some(reply)) => unsafe {
            (File::from_raw_fd(request), File::from_raw_fd(reply))
        },
        (None, None) => detach_stdio().context("failed to set up request/reply streams")?,
        _ => anyhow::bail!("--request-fd and --reply-fd must be given together"),
    };

    info!(
        operation = "start_dispatcher",
        pid = std::process::id(),
        euid = unsafe { libc::geteuid() },
        "Starting hostbridge sudo dispatcher"
    );

    let mut tx = Transaction::new(BufReader::new(request), BufWriter::new(reply));
    Dispatcher::new()
        .serve(&mut tx)
        .context("dispatcher session aborted")?;
    Ok(())
}

/// Move stdin/stdout to private descriptors and point 0/1 at `/dev/null`.
///
/// Anything that later writes to stdout, a library or a command started by
/// `Execute`, lands in `/dev/null` instead of inside a reply frame.
fn detach_stdio() -> Result<(File, File)> {
    let request = dup_cloexec(libc::STDIN_FILENO).context("failed to duplicate stdin")?;
    let reply = dup_cloexec(libc::STDOUT_FILENO).context("failed to duplicate stdout")?;

    let null = File::options()
        .read(true)
        .write(true)
        .open("/dev/null")
        .context("failed to open /dev/null")?;
    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO] {
        let r = unsafe { libc::dup2(std::os::fd::AsRawFd::as_raw_fd(&null), target) };
        if r == -1 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("failed to redirect fd {} to /dev/null", target));
        }
    }

    Ok((request, reply))
}

fn dup_cloexec(fd: RawFd) -> std::io::Result<File> {
    let dup = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 3) };
    if dup == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(unsafe { File::from_raw_fd(dup) })
}
