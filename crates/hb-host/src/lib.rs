// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Host capability interface
//!
//! [`Host`] is the set of file operations higher layers aim at a site.
//! [`HostLocal`] implements it for the local filesystem; with the `mock`
//! feature a `MockHost` is generated for tests of code that drives hosts.

pub mod error;
pub mod host;
pub mod local;
pub mod types;

pub use error::{HostError, HostResult};
pub use host::{DirectoryEnumerator, FileReader, FileWriter, Host};
pub use local::HostLocal;
pub use types::{DirectoryEntry, FileInformation, Identity};

#[cfg(feature = "mock")]
pub use host::MockHost;
