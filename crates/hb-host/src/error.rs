// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for host operations

use std::io;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum HostError {
    /// An OS call failed; the error keeps the original code.
    #[error("{op} {path:?}: {source}")]
    Os {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("not supported by this host: {0}")]
    Unsupported(&'static str),
}

impl HostError {
    pub fn os(op: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Os {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// OS error code carried by this error, if any.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Os { source, .. } => source.raw_os_error(),
            Self::Unsupported(_) => Some(libc::ENOTSUP),
        }
    }
}

pub type HostResult<T> = Result<T, HostError>;
