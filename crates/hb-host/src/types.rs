// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Value types shared by all host implementations

use hb_sudo_proto::{FileStat, Timespec};
use std::ffi::OsString;

/// Metadata of one filesystem object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileInformation {
    pub size: u64,
    /// Type and permission bits as in `st_mode`
    pub mode: u32,
    pub access_time: Timespec,
    pub modification_time: Timespec,
    pub status_change_time: Timespec,
}

impl FileInformation {
    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFLNK as u32
    }
}

impl From<FileStat> for FileInformation {
    fn from(st: FileStat) -> Self {
        Self {
            size: u64::try_from(st.size).unwrap_or(0),
            mode: st.mode,
            access_time: st.atime,
            modification_time: st.mtime,
            status_change_time: st.ctime,
        }
    }
}

/// Where a host lives. All fields are empty for the local host.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identity {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub username: String,
}

/// One item produced by a directory enumerator
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: OsString,
    /// Owner user name, empty when unknown
    pub owner: String,
    /// Owner group name, empty when unknown
    pub group: String,
    pub info: FileInformation,
}
