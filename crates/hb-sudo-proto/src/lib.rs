// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! hostbridge sudo protocol
//!
//! This crate defines everything the unprivileged client and the privileged
//! dispatcher must agree on: the [`Command`] opcodes, the fixed-layout values
//! exchanged on the wire, the [`Transaction`] framing over a pair of byte
//! streams, and the safe syscall wrappers both sides use to perform the
//! actual operations.
//!
//! A frame is the command tag, the request fields, the reply fields and the
//! command tag echoed back. There is no length prefix and no
//! self-description: both ends decode strictly by the schema of the command.

pub mod command;
pub mod error;
pub mod sys;
pub mod transaction;
pub mod wire;

pub use command::Command;
pub use error::{ProtoError, ProtoResult};
pub use transaction::Transaction;
pub use wire::{DirEntry, FileStat, FsStat, ParseBuf, Pod, Timespec, Timeval, VfsStat};

/// Longest string (paths, xattr names, commands) accepted from a peer.
pub const MAX_STR_LEN: usize = 64 * 1024;

/// Largest raw payload accepted from a peer in one command.
pub const MAX_IO_LEN: usize = 16 * 1024 * 1024;
