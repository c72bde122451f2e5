// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use crate::handlers;
use crate::registry::Handles;
use hb_sudo_proto::{Command, ProtoResult, Transaction};
use std::io::{Read, Write};
use tracing::{debug, error, info};

/// Serves one client, strictly one frame at a time
///
/// Each instance owns its own handle registries, so several dispatchers can
/// run side by side in one process without seeing each other's handles.
pub struct Dispatcher {
    handles: Handles,
    session_id: String,
    frames: u64,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handles: Handles::default(),
            session_id: hb_logging::correlation_id(),
            frames: 0,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn open_descriptors(&self) -> usize {
        self.handles.fds.len()
    }

    pub fn open_directories(&self) -> usize {
        self.handles.dirs.len()
    }

    /// Run until the client closes the request stream.
    ///
    /// A clean end of stream between frames returns `Ok`. An unknown tag, a
    /// stream that ends inside a frame, or any other transport failure is
    /// returned as an error and the session must be abandoned.
    pub fn serve<R: Read, W: Write>(&mut self, tx: &mut Transaction<R, W>) -> ProtoResult<()> {
        let span = tracing::info_span!("dispatcher", session_id = %self.session_id);
        let _enter = span.enter();

        info!(operation = "serve", "Dispatcher session started");
        loop {
            let cmd = match tx.recv_command() {
                Ok(Some(cmd)) => cmd,
                Ok(None) => {
                    info!(operation = "serve", frames = self.frames, "Client closed the session");
                    return Ok(());
                }
                Err(err) => {
                    error!(operation = "serve", error = %err, frames = self.frames, "Protocol violation");
                    return Err(err);
                }
            };

            if let Err(err) = self.dispatch(cmd, tx) {
                error!(operation = "serve", command = %cmd, error = %err, "Protocol violation");
                return Err(err);
            }
        }
    }

    /// Handle one frame whose tag has already been read.
    pub fn dispatch<R: Read, W: Write>(
        &mut self,
        cmd: Command,
        tx: &mut Transaction<R, W>,
    ) -> ProtoResult<()> {
        handlers::handle(cmd, &mut self.handles, tx)?;
        tx.finish_reply(cmd)?;
        self.frames += 1;
        debug!(operation = "dispatch", command = %cmd, "Reply sent");
        Ok(())
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
