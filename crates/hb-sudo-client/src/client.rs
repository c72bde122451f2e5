// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Connection to one privileged dispatcher

use crate::region::ElevationMode;
use anyhow::{Context, Result, anyhow};
use hb_sudo_proto::{Command, ProtoResult, Transaction};
use parking_lot::Mutex;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

pub(crate) type Link = Transaction<Box<dyn Read + Send>, Box<dyn Write + Send>>;

/// How to start the dispatcher process
#[derive(Clone, Debug)]
pub struct ClientConfig {
    program: PathBuf,
    launcher: Vec<String>,
    args: Vec<String>,
    mode: ElevationMode,
}

impl ClientConfig {
    /// Start building configuration for the dispatcher at `program`.
    pub fn builder(program: impl Into<PathBuf>) -> ClientConfigBuilder {
        ClientConfigBuilder {
            program: Some(program.into()),
            launcher: Vec::new(),
            args: Vec::new(),
            mode: ElevationMode::default(),
        }
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    pub fn mode(&self) -> ElevationMode {
        self.mode
    }

    /// The full command line: launcher words, the program, then its arguments.
    pub fn command(&self) -> std::process::Command {
        let mut words = self.launcher.iter();
        let mut command = match words.next() {
            Some(first) => {
                let mut command = std::process::Command::new(first);
                command.args(words).arg(&self.program);
                command
            }
            None => std::process::Command::new(&self.program),
        };
        command.args(&self.args);
        command
    }
}

/// Builder for [`ClientConfig`].
pub struct ClientConfigBuilder {
    program: Option<PathBuf>,
    launcher: Vec<String>,
    args: Vec<String>,
    mode: ElevationMode,
}

impl ClientConfigBuilder {
    /// Prefix the program with a launcher, e.g. `["sudo", "-n"]`.
    pub fn launcher<I, S>(mut self, launcher: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.launcher = launcher.into_iter().map(Into::into).collect();
        self
    }

    /// Add a single argument passed to the dispatcher.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Replace the dispatcher arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Mode used by regions entered without an explicit one.
    pub fn mode(mut self, mode: ElevationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Finalise the configuration.
    pub fn build(self) -> Result<ClientConfig> {
        let program = self
            .program
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| anyhow!("dispatcher program missing"))?;

        Ok(ClientConfig {
            program,
            launcher: self.launcher,
            args: self.args,
            mode: self.mode,
        })
    }
}

/// Client side of the dispatcher link
///
/// Calls are serialized: one frame is fully answered before the next is
/// sent. Once the link fails, the client is marked broken and every later
/// proxied call fails with `EIO` instead of touching the stream again.
pub struct SudoClient {
    link: Mutex<Option<Link>>,
    broken: AtomicBool,
    child: Mutex<Option<Child>>,
    mode: ElevationMode,
}

impl SudoClient {
    /// Launch the dispatcher and verify it answers.
    pub fn spawn(config: &ClientConfig) -> Result<Self> {
        let mut command = config.command();
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        debug!(operation = "spawn_dispatcher", command = ?command, "Launching dispatcher");
        let mut child = command
            .spawn()
            .with_context(|| format!("failed to launch {}", config.program.display()))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow!("dispatcher pipes were not created"));
        };

        let pid = child.id();
        let client = Self::from_link(
            Transaction::new(
                Box::new(BufReader::new(stdout)),
                Box::new(BufWriter::new(stdin)),
            ),
            config.mode,
        );
        *client.child.lock() = Some(child);

        client
            .ping()
            .with_context(|| format!("dispatcher (pid {}) did not answer ping", pid))?;
        info!(operation = "spawn_dispatcher", pid, "Dispatcher ready");
        Ok(client)
    }

    /// Use an already connected pair of streams and verify the peer answers.
    pub fn connect<R, W>(reader: R, writer: W, mode: ElevationMode) -> Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let client = Self::from_link(Transaction::new(Box::new(reader), Box::new(writer)), mode);
        client.ping().context("dispatcher did not answer ping")?;
        Ok(client)
    }

    fn from_link(link: Link, mode: ElevationMode) -> Self {
        Self {
            link: Mutex::new(Some(link)),
            broken: AtomicBool::new(false),
            child: Mutex::new(None),
            mode,
        }
    }

    pub fn mode(&self) -> ElevationMode {
        self.mode
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    pub fn ping(&self) -> io::Result<()> {
        self.call(Command::Ping, |_| Ok(Ok(())))
    }

    /// Run one frame.
    ///
    /// `body` sends the request fields and reads the reply fields; the tag
    /// and its echo are handled here. An OS failure reported by the
    /// dispatcher comes back as the inner `io::Error`.
    pub(crate) fn call<T>(
        &self,
        cmd: Command,
        body: impl FnOnce(&mut Link) -> ProtoResult<io::Result<T>>,
    ) -> io::Result<T> {
        let mut guard = self.link.lock();
        let link = match guard.as_mut() {
            Some(link) if !self.is_broken() => link,
            _ => return Err(io::Error::from_raw_os_error(libc::EIO)),
        };

        link.send_command(cmd);
        let outcome = body(link).and_then(|result| {
            link.expect_echo(cmd)?;
            Ok(result)
        });

        match outcome {
            Ok(result) => result,
            Err(err) => {
                error!(operation = "sudo_call", command = %cmd, error = %err, "Dispatcher link failed");
                self.broken.store(true, Ordering::Release);
                *guard = None;
                Err(io::Error::from_raw_os_error(libc::EIO))
            }
        }
    }
}

impl Drop for SudoClient {
    fn drop(&mut self) {
        // Closing the pipes is the dispatcher's signal to exit.
        self.link.lock().take();

        if let Some(mut child) = self.child.lock().take() {
            match child.wait() {
                Ok(status) => debug!(operation = "reap_dispatcher", status = %status, "Dispatcher exited"),
                Err(err) => warn!(operation = "reap_dispatcher", error = %err, "Failed to reap dispatcher"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_program() {
        assert!(ClientConfig::builder("").build().is_err());
    }

    #[test]
    fn command_line_puts_launcher_first() {
        let config = ClientConfig::builder("/usr/libexec/hb-sudo-dispatcher")
            .launcher(["sudo", "-n"])
            .arg("--log-level")
            .arg("debug")
            .build()
            .unwrap();

        let command = config.command();
        assert_eq!(command.get_program(), "sudo");
        let args: Vec<_> = command.get_args().collect();
        assert_eq!(
            args,
            vec!["-n", "/usr/libexec/hb-sudo-dispatcher", "--log-level", "debug"]
        );
    }

    #[test]
    fn command_line_without_launcher() {
        let config = ClientConfig::builder("/bin/dispatcher")
            .mode(ElevationMode::Always)
            .build()
            .unwrap();
        assert_eq!(config.command().get_program(), "/bin/dispatcher");
        assert_eq!(config.command().get_args().count(), 0);
        assert_eq!(config.mode(), ElevationMode::Always);
    }

    #[test]
    fn spawn_failure_is_reported() {
        let config = ClientConfig::builder("/nonexistent/hb-sudo-dispatcher")
            .build()
            .unwrap();
        let err = SudoClient::spawn(&config).err().unwrap();
        assert!(err.to_string().contains("failed to launch"));
    }

    #[test]
    fn peer_that_closes_immediately_fails_ping() {
        let (ours, theirs) = std::os::unix::net::UnixStream::pair().unwrap();
        drop(theirs);
        let result = SudoClient::connect(ours.try_clone().unwrap(), ours, ElevationMode::Always);
        assert!(result.is_err());
    }
}
