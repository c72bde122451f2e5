// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Operation runner
//!
//! An [`Operation`] runs one long, cancellable piece of [`hb_host::Host`]
//! work on a worker thread while the controller thread waits, services the
//! worker's requests and reports the result.
//!
//! ```no_run
//! use hb_host::HostLocal;
//! use hb_ops::{LogNotifier, OpMode, Operation, OpsConfig};
//! use std::sync::Arc;
//!
//! let mut op = Operation::new(
//!     OpMode::Normal,
//!     Arc::new(HostLocal::new()),
//!     "/var/tmp/cleanup",
//!     OpsConfig::default(),
//!     Arc::new(LogNotifier),
//! )
//! .with_notify_title("Cleanup");
//!
//! op.start(|ctx| {
//!     let mut entries = ctx.host().directory_enum(ctx.base_dir())?;
//!     while let Some(entry) = entries.next_entry()? {
//!         ctx.check_abort()?;
//!         ctx.host().file_delete(&ctx.base_dir().join(&entry.name))?;
//!         ctx.add_progress(1, entry.info.size);
//!     }
//!     Ok(())
//! })?;
//!
//! if !op.wait_thread_before_show_progress() {
//!     op.wait_thread(None);
//! }
//! # Ok::<(), hb_ops::OpError>(())
//! ```

pub mod config;
pub mod error;
pub mod notify;
mod operation;
pub mod state;

pub use config::OpsConfig;
pub use error::{OpError, OpResult};
pub use notify::{LogNotifier, Notifier};
pub use operation::{OpContext, Operation};
pub use state::{OpMode, OpOutcome, OpStats};
