// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the sudo protocol

use std::io;

/// Transport and framing failures
///
/// OS failures of the proxied operations are not protocol errors: they travel
/// inside the reply as an errno value. Everything here means the two peers can
/// no longer trust the stream.
#[derive(thiserror::Error, Debug)]
pub enum ProtoError {
    #[error("transport io error: {0}")]
    Io(#[from] io::Error),
    #[error("peer closed the stream in the middle of a frame")]
    Truncated,
    #[error("unknown command tag {0:#x}")]
    UnknownCommand(u32),
    #[error("reply desynchronized: expected tag {expected:#x}, got {actual:#x}")]
    Desync { expected: u32, actual: u32 },
    #[error("string of {0} bytes exceeds the protocol limit")]
    StringTooLong(usize),
    #[error("payload of {0} bytes exceeds the protocol limit")]
    PayloadTooLong(u64),
}

impl ProtoError {
    /// True when the peer went away, as opposed to sending garbage.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ProtoError::Truncated)
            || matches!(self, ProtoError::Io(e) if e.kind() == io::ErrorKind::BrokenPipe)
    }
}

pub type ProtoResult<T> = Result<T, ProtoError>;
