// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Privileged side of the hostbridge sudo link
//!
//! The dispatcher reads command frames from a request stream, performs each
//! operation with its own privileges and writes the reply frame back.
//! Descriptors and directory streams are only usable by the client after the
//! dispatcher itself opened them, see [`registry`].

mod dispatcher;
mod handlers;
pub mod registry;

pub use dispatcher::Dispatcher;
pub use registry::{HandleRegistry, Handles};
