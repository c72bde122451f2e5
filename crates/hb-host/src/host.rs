// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The host capability interface
//!
//! A host is anything file operations can be aimed at. Every backend offers
//! the same contract; failures come back as [`HostError`] carrying the OS
//! error code where there is one.

use crate::error::HostResult;
use crate::types::{DirectoryEntry, FileInformation, Identity};
use hb_sudo_proto::Timespec;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(feature = "mock")]
use crate::error::HostError;

#[cfg_attr(feature = "mock", mockall::automock)]
pub trait Host: Send + Sync {
    /// Short human-readable name of the site
    fn site_name(&self) -> String;

    fn identity(&self) -> Identity;

    /// Independent instance usable from another thread
    fn clone_host(&self) -> Arc<dyn Host>;

    /// Drop and re-establish any session state.
    fn reinitialize(&self) -> HostResult<()>;

    /// Interrupt whatever blocking call another thread is making on this host.
    fn abort(&self);

    fn get_mode(&self, path: &Path, follow_symlink: bool) -> HostResult<u32>;

    fn get_size(&self, path: &Path, follow_symlink: bool) -> HostResult<u64>;

    fn get_information(&self, path: &Path, follow_symlink: bool) -> HostResult<FileInformation>;

    fn file_delete(&self, path: &Path) -> HostResult<()>;

    fn directory_delete(&self, path: &Path) -> HostResult<()>;

    fn directory_create(&self, path: &Path, mode: u32) -> HostResult<()>;

    fn rename(&self, path_old: &Path, path_new: &Path) -> HostResult<()>;

    fn set_times(
        &self,
        path: &Path,
        access_time: Timespec,
        modification_time: Timespec,
    ) -> HostResult<()>;

    fn set_mode(&self, path: &Path, mode: u32) -> HostResult<()>;

    fn symlink_create(&self, link_path: &Path, link_target: &Path) -> HostResult<()>;

    fn symlink_query(&self, link_path: &Path) -> HostResult<PathBuf>;

    /// Start enumerating `path`; fails at once if it cannot be opened.
    fn directory_enum(&self, path: &Path) -> HostResult<Box<dyn DirectoryEnumerator>>;

    /// Open for reading, positioned at `resume_pos`.
    fn file_get(&self, path: &Path, resume_pos: u64) -> HostResult<Box<dyn FileReader>>;

    /// Open for writing. With `resume_pos == 0` the file is created or
    /// truncated; otherwise writing continues at `resume_pos`.
    fn file_put(
        &self,
        path: &Path,
        mode: u32,
        size_hint: u64,
        resume_pos: u64,
    ) -> HostResult<Box<dyn FileWriter>>;

    fn alive(&self) -> bool;
}

/// Live cursor over one directory
pub trait DirectoryEnumerator: Send {
    /// Next entry other than `.` and `..`; `None` once exhausted.
    fn next_entry(&mut self) -> HostResult<Option<DirectoryEntry>>;
}

pub trait FileReader: Send {
    /// Bytes produced by one underlying read; 0 means end of file.
    fn read(&mut self, buf: &mut [u8]) -> HostResult<usize>;
}

pub trait FileWriter: Send {
    /// Write all of `buf` or fail.
    fn write(&mut self, buf: &[u8]) -> HostResult<()>;

    /// Called once after the last `write`.
    fn write_complete(&mut self) -> HostResult<()>;
}

#[cfg(feature = "mock")]
impl MockHost {
    /// Mock whose `abort` and `alive` accept any number of calls.
    pub fn permissive() -> Self {
        let mut host = Self::new();
        host.expect_abort().return_const(());
        host.expect_alive().return_const(true);
        host
    }

    /// Fail `file_delete` with `errno` for any path.
    pub fn failing_delete(errno: i32) -> Self {
        let mut host = Self::permissive();
        host.expect_file_delete().returning(move |path| {
            Err(HostError::os(
                "file_delete",
                path,
                std::io::Error::from_raw_os_error(errno),
            ))
        });
        host
    }
}
