// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! User-facing reporting hooks
//!
//! Always invoked on the controller thread.

use std::path::Path;
use tracing::{error, info};

#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    /// Tell the user an operation failed.
    fn show_failure(&self, message: &str);

    /// Desktop notification after an operation ends.
    fn display_notification(&self, action: &str, details: &Path);

    /// True while some dialog is waiting for the user.
    fn is_showing_ui(&self) -> bool;
}

/// Notifier that only writes to the log
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show_failure(&self, message: &str) {
        error!(operation = "notify", message, "Operation failed");
    }

    fn display_notification(&self, action: &str, details: &Path) {
        info!(operation = "notify", action, details = %details.display(), "Notification");
    }

    fn is_showing_ui(&self) -> bool {
        false
    }
}
