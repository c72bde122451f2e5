// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use hb_host::HostError;

/// Error leaving an operation body
#[derive(thiserror::Error, Debug)]
pub enum OpError {
    /// Cancellation requested by the controller; not a failure.
    #[error("operation aborted")]
    Aborted,
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type OpResult<T> = Result<T, OpError>;
