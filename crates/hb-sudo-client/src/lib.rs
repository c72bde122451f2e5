// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Unprivileged side of the hostbridge sudo link.
//!
//! [`SudoClient`] owns the pipes to one dispatcher process. Once installed
//! with [`install`], code running inside an [`ElevationRegion`] has its
//! [`sdc`] calls carried out by that dispatcher; everywhere else the same
//! calls go straight to the OS.
//!
//! ```no_run
//! use hb_sudo_client::{ClientConfig, ElevationRegion, SudoClient, sdc};
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = ClientConfig::builder("/usr/libexec/hb-sudo-dispatcher")
//!     .launcher(["sudo", "-n"])
//!     .build()?;
//! hb_sudo_client::install(Arc::new(SudoClient::spawn(&config)?));
//!
//! let _elevated = ElevationRegion::enter();
//! sdc::mkdir(std::path::Path::new("/etc/hostbridge"), 0o755)?;
//! # Ok(())
//! # }
//! ```

mod client;
mod region;
mod remote;
pub mod sdc;

pub use client::{ClientConfig, ClientConfigBuilder, SudoClient};
pub use region::{ElevationMode, ElevationRegion, install, installed, is_elevated, uninstall};
