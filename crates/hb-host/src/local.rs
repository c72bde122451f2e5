// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Host backed by the local filesystem
//!
//! Every call goes through [`sdc`], so inside an elevation region the
//! privileged dispatcher performs it instead of this process.

use crate::error::{HostError, HostResult};
use crate::host::{DirectoryEnumerator, FileReader, FileWriter, Host};
use crate::types::{DirectoryEntry, FileInformation, Identity};
use hb_sudo_client::sdc;
use hb_sudo_proto::{FileStat, Timespec, Timeval};
use nix::unistd::{Gid, Group, Uid, User};
use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone, Debug, Default)]
pub struct HostLocal;

impl HostLocal {
    pub fn new() -> Self {
        Self
    }

    fn stat(&self, path: &Path, follow_symlink: bool) -> HostResult<FileStat> {
        let result = if follow_symlink {
            sdc::stat(path)
        } else {
            sdc::lstat(path)
        };
        result.map_err(|err| HostError::os("stat", path, err))
    }

    fn open_at(path: &Path, flags: i32, mode: u32, resume_pos: u64) -> HostResult<sdc::Fd> {
        let fd = sdc::open(path, flags, mode).map_err(|err| HostError::os("open", path, err))?;
        if resume_pos != 0 {
            let offset = i64::try_from(resume_pos)
                .map_err(|_| HostError::os("seek", path, io::Error::from_raw_os_error(libc::EOVERFLOW)))?;
            fd.lseek(offset, libc::SEEK_SET)
                .map_err(|err| HostError::os("seek", path, err))?;
        }
        Ok(fd)
    }
}

impl Host for HostLocal {
    fn site_name(&self) -> String {
        "local".to_string()
    }

    fn identity(&self) -> Identity {
        Identity::default()
    }

    fn clone_host(&self) -> Arc<dyn Host> {
        Arc::new(self.clone())
    }

    fn reinitialize(&self) -> HostResult<()> {
        Ok(())
    }

    fn abort(&self) {}

    fn get_mode(&self, path: &Path, follow_symlink: bool) -> HostResult<u32> {
        Ok(self.stat(path, follow_symlink)?.mode)
    }

    fn get_size(&self, path: &Path, follow_symlink: bool) -> HostResult<u64> {
        Ok(FileInformation::from(self.stat(path, follow_symlink)?).size)
    }

    fn get_information(&self, path: &Path, follow_symlink: bool) -> HostResult<FileInformation> {
        self.stat(path, follow_symlink).map(FileInformation::from)
    }

    fn file_delete(&self, path: &Path) -> HostResult<()> {
        sdc::unlink(path).map_err(|err| HostError::os("unlink", path, err))
    }

    fn directory_delete(&self, path: &Path) -> HostResult<()> {
        sdc::rmdir(path).map_err(|err| HostError::os("rmdir", path, err))
    }

    fn directory_create(&self, path: &Path, mode: u32) -> HostResult<()> {
        sdc::mkdir(path, mode).map_err(|err| HostError::os("mkdir", path, err))
    }

    fn rename(&self, path_old: &Path, path_new: &Path) -> HostResult<()> {
        sdc::rename(path_old, path_new).map_err(|err| HostError::os("rename", path_old, err))
    }

    fn set_times(
        &self,
        path: &Path,
        access_time: Timespec,
        modification_time: Timespec,
    ) -> HostResult<()> {
        sdc::utimes(
            path,
            Timeval::from_timespec(access_time),
            Timeval::from_timespec(modification_time),
        )
        .map_err(|err| HostError::os("utimes", path, err))
    }

    fn set_mode(&self, path: &Path, mode: u32) -> HostResult<()> {
        sdc::chmod(path, mode).map_err(|err| HostError::os("chmod", path, err))
    }

    fn symlink_create(&self, link_path: &Path, link_target: &Path) -> HostResult<()> {
        sdc::symlink(link_target, link_path).map_err(|err| HostError::os("symlink", link_path, err))
    }

    fn symlink_query(&self, link_path: &Path) -> HostResult<PathBuf> {
        let bufsiz = libc::PATH_MAX as usize;
        let target =
            sdc::readlink(link_path, bufsiz).map_err(|err| HostError::os("readlink", link_path, err))?;
        // A full buffer may be a truncated target.
        if target.len() >= bufsiz {
            return Err(HostError::os(
                "readlink",
                link_path,
                io::Error::from_raw_os_error(libc::ENAMETOOLONG),
            ));
        }
        Ok(PathBuf::from(OsString::from_vec(target)))
    }

    fn directory_enum(&self, path: &Path) -> HostResult<Box<dyn DirectoryEnumerator>> {
        Ok(Box::new(LocalDirectoryEnumerator::open(path)?))
    }

    fn file_get(&self, path: &Path, resume_pos: u64) -> HostResult<Box<dyn FileReader>> {
        let fd = Self::open_at(path, libc::O_RDONLY, 0, resume_pos)?;
        Ok(Box::new(LocalFile {
            path: path.to_path_buf(),
            fd,
        }))
    }

    fn file_put(
        &self,
        path: &Path,
        mode: u32,
        _size_hint: u64,
        resume_pos: u64,
    ) -> HostResult<Box<dyn FileWriter>> {
        let flags = if resume_pos == 0 {
            libc::O_CREAT | libc::O_TRUNC | libc::O_RDWR
        } else {
            libc::O_RDWR
        };
        let fd = Self::open_at(path, flags, mode, resume_pos)?;
        Ok(Box::new(LocalFile {
            path: path.to_path_buf(),
            fd,
        }))
    }

    fn alive(&self) -> bool {
        true
    }
}

pub struct LocalDirectoryEnumerator {
    path: PathBuf,
    dir: sdc::Dir,
    users: HashMap<u32, String>,
    groups: HashMap<u32, String>,
}

impl LocalDirectoryEnumerator {
    pub fn open(path: &Path) -> HostResult<Self> {
        let dir = sdc::opendir(path).map_err(|err| HostError::os("opendir", path, err))?;
        Ok(Self {
            path: path.to_path_buf(),
            dir,
            users: HashMap::new(),
            groups: HashMap::new(),
        })
    }

    fn user_name(&mut self, uid: u32) -> String {
        self.users
            .entry(uid)
            .or_insert_with(|| match User::from_uid(Uid::from_raw(uid)) {
                Ok(Some(user)) => user.name,
                _ => String::new(),
            })
            .clone()
    }

    fn group_name(&mut self, gid: u32) -> String {
        self.groups
            .entry(gid)
            .or_insert_with(|| match Group::from_gid(Gid::from_raw(gid)) {
                Ok(Some(group)) => group.name,
                _ => String::new(),
            })
            .clone()
    }
}

impl DirectoryEnumerator for LocalDirectoryEnumerator {
    fn next_entry(&mut self) -> HostResult<Option<DirectoryEntry>> {
        loop {
            let entry = self
                .dir
                .read_entry()
                .map_err(|err| HostError::os("readdir", &self.path, err))?;
            let Some(entry) = entry else {
                return Ok(None);
            };
            if entry.is_dot_or_dotdot() {
                continue;
            }

            let name = OsString::from_vec(entry.name);
            let full_path = self.path.join(&name);
            return Ok(Some(match sdc::lstat(&full_path) {
                Ok(st) => DirectoryEntry {
                    owner: self.user_name(st.uid),
                    group: self.group_name(st.gid),
                    info: FileInformation::from(st),
                    name,
                },
                Err(err) => {
                    debug!(
                        operation = "directory_enum",
                        path = %full_path.display(),
                        error = %err,
                        "Entry metadata unavailable"
                    );
                    DirectoryEntry {
                        name,
                        ..DirectoryEntry::default()
                    }
                }
            }));
        }
    }
}

/// Open file used for both directions
struct LocalFile {
    path: PathBuf,
    fd: sdc::Fd,
}

impl FileReader for LocalFile {
    fn read(&mut self, buf: &mut [u8]) -> HostResult<usize> {
        self.fd.read(buf).map_err(|err| HostError::os("read", &self.path, err))
    }
}

impl FileWriter for LocalFile {
    fn write(&mut self, mut buf: &[u8]) -> HostResult<()> {
        while !buf.is_empty() {
            match self.fd.write(buf) {
                Ok(0) => {
                    return Err(HostError::os(
                        "write",
                        &self.path,
                        io::Error::from(io::ErrorKind::WriteZero),
                    ))
                }
                Ok(n) => buf = &buf[n..],
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(HostError::os("write", &self.path, err)),
            }
        }
        Ok(())
    }

    fn write_complete(&mut self) -> HostResult<()> {
        Ok(())
    }
}
