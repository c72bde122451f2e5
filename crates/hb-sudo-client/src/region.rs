// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Process-wide dispatcher client and per-thread elevation regions

use crate::client::SudoClient;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::io;
use std::marker::PhantomData;
use std::sync::Arc;

/// When calls inside a region go through the dispatcher
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ElevationMode {
    /// Try directly first; repeat through the dispatcher on `EACCES`/`EPERM`
    #[default]
    OnAccessDenied,
    /// Every call is proxied
    Always,
}

static CLIENT: RwLock<Option<Arc<SudoClient>>> = RwLock::new(None);

thread_local! {
    // `None` entries defer to the installed client's mode.
    static REGIONS: RefCell<Vec<Option<ElevationMode>>> = const { RefCell::new(Vec::new()) };
}

/// Make `client` the dispatcher used by elevated regions, returning the
/// previous one.
pub fn install(client: Arc<SudoClient>) -> Option<Arc<SudoClient>> {
    CLIENT.write().replace(client)
}

pub fn uninstall() -> Option<Arc<SudoClient>> {
    CLIENT.write().take()
}

pub fn installed() -> Option<Arc<SudoClient>> {
    CLIENT.read().clone()
}

/// Marks the current thread as elevated until dropped
///
/// Regions nest; the innermost one decides the mode. Without an installed
/// client, calls inside a region run directly.
pub struct ElevationRegion {
    // Regions are thread state and must be dropped on the thread that made them.
    _not_send: PhantomData<*const ()>,
}

impl ElevationRegion {
    /// Enter a region using the installed client's mode.
    pub fn enter() -> Self {
        Self::push(None)
    }

    pub fn with_mode(mode: ElevationMode) -> Self {
        Self::push(Some(mode))
    }

    fn push(mode: Option<ElevationMode>) -> Self {
        REGIONS.with(|regions| regions.borrow_mut().push(mode));
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Drop for ElevationRegion {
    fn drop(&mut self) {
        REGIONS.with(|regions| {
            regions.borrow_mut().pop();
        });
    }
}

/// True when the current thread is inside a region and a client is installed.
pub fn is_elevated() -> bool {
    current_route().is_some()
}

fn current_route() -> Option<(ElevationMode, Arc<SudoClient>)> {
    let requested = REGIONS.with(|regions| regions.borrow().last().copied())?;
    let client = installed()?;
    Some((requested.unwrap_or(client.mode()), client))
}

fn is_access_denied(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EACCES) | Some(libc::EPERM))
}

/// Run `direct` or `remote` according to the current thread's region.
pub(crate) fn route<T>(
    direct: impl FnOnce() -> io::Result<T>,
    remote: impl FnOnce(&Arc<SudoClient>) -> io::Result<T>,
) -> io::Result<T> {
    match current_route() {
        None => direct(),
        Some((ElevationMode::Always, client)) => remote(&client),
        Some((ElevationMode::OnAccessDenied, client)) => match direct() {
            Err(err) if is_access_denied(&err) => {
                tracing::debug!(operation = "elevate", error = %err, "Retrying through dispatcher");
                remote(&client)
            }
            other => other,
        },
    }
}
