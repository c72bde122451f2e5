// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Syscall facade
//!
//! Functions shaped like the OS primitives they stand for. Outside an
//! [`ElevationRegion`](crate::ElevationRegion) they call the OS directly;
//! inside one they are routed to the installed dispatcher according to the
//! region's mode. Descriptors and directory streams remember which side
//! opened them, so later calls on them never switch sides.

use crate::client::SudoClient;
use crate::region::route;
use hb_sudo_proto::sys::{self, DirStream};
use hb_sudo_proto::{DirEntry, FileStat, FsStat, Timeval, VfsStat};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// An open file descriptor, local or held by a dispatcher
pub enum Fd {
    Local(OwnedFd),
    Remote(RemoteFd),
}

/// Descriptor number valid only inside the dispatcher that returned it
pub struct RemoteFd {
    client: Arc<SudoClient>,
    fd: i32,
}

impl RemoteFd {
    pub fn raw(&self) -> i32 {
        self.fd
    }

    fn take(&mut self) -> i32 {
        std::mem::replace(&mut self.fd, -1)
    }
}

impl Drop for RemoteFd {
    fn drop(&mut self) {
        let fd = self.take();
        if fd >= 0 {
            if let Err(err) = self.client.close(fd) {
                warn!(operation = "close_remote_fd", fd, error = %err, "Failed to close dispatcher descriptor");
            }
        }
    }
}

macro_rules! on_fd {
    ($self:expr, $local:ident => $direct:expr, $remote:ident => $proxied:expr) => {
        match $self {
            Fd::Local(owned) => {
                let $local = owned.as_raw_fd();
                $direct
            }
            Fd::Remote(remote) => {
                let $remote = remote;
                $proxied
            }
        }
    };
}

impl Fd {
    pub fn is_remote(&self) -> bool {
        matches!(self, Fd::Remote(_))
    }

    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        on_fd!(self, fd => sys::read(fd, buf), r => r.client.read(r.fd, buf))
    }

    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        on_fd!(self, fd => sys::write(fd, buf), r => r.client.write(r.fd, buf))
    }

    pub fn pread(&self, buf: &mut [u8], offset: i64) -> io::Result<usize> {
        on_fd!(self, fd => sys::pread(fd, buf, offset), r => r.client.pread(r.fd, buf, offset))
    }

    pub fn pwrite(&self, buf: &[u8], offset: i64) -> io::Result<usize> {
        on_fd!(self, fd => sys::pwrite(fd, buf, offset), r => r.client.pwrite(r.fd, buf, offset))
    }

    pub fn lseek(&self, offset: i64, whence: i32) -> io::Result<i64> {
        on_fd!(self, fd => sys::lseek(fd, offset, whence), r => r.client.lseek(r.fd, offset, whence))
    }

    pub fn ftruncate(&self, len: i64) -> io::Result<()> {
        on_fd!(self, fd => sys::ftruncate(fd, len), r => r.client.ftruncate(r.fd, len))
    }

    pub fn fchmod(&self, mode: u32) -> io::Result<()> {
        on_fd!(self, fd => sys::fchmod(fd, mode), r => r.client.fchmod(r.fd, mode))
    }

    pub fn fstat(&self) -> io::Result<FileStat> {
        on_fd!(self, fd => sys::fstat(fd), r => r.client.fstat(r.fd))
    }

    pub fn futimes(&self, atime: Timeval, mtime: Timeval) -> io::Result<()> {
        on_fd!(self, fd => sys::futimes(fd, atime, mtime), r => r.client.futimes(r.fd, atime, mtime))
    }

    pub fn flistxattr(&self, buf: &mut [u8]) -> io::Result<usize> {
        on_fd!(self, fd => sys::flistxattr(fd, buf), r => r.client.flistxattr(r.fd, buf))
    }

    pub fn fgetxattr(&self, name: &[u8], buf: &mut [u8]) -> io::Result<usize> {
        on_fd!(self, fd => sys::fgetxattr(fd, name, buf), r => r.client.fgetxattr(r.fd, name, buf))
    }

    pub fn fsetxattr(&self, name: &[u8], value: &[u8], flags: i32) -> io::Result<()> {
        on_fd!(
            self,
            fd => sys::fsetxattr(fd, name, value, flags),
            r => r.client.fsetxattr(r.fd, name, value, flags)
        )
    }

    /// Close and report the result; dropping closes silently.
    pub fn close(self) -> io::Result<()> {
        match self {
            Fd::Local(owned) => sys::close(owned),
            Fd::Remote(mut remote) => {
                let fd = remote.take();
                remote.client.close(fd)
            }
        }
    }
}

/// An open directory stream, local or held by a dispatcher
pub enum Dir {
    Local(DirStream),
    Remote(RemoteDir),
}

pub struct RemoteDir {
    client: Arc<SudoClient>,
    handle: u64,
}

impl RemoteDir {
    fn take(&mut self) -> u64 {
        std::mem::replace(&mut self.handle, 0)
    }
}

impl Drop for RemoteDir {
    fn drop(&mut self) {
        let handle = self.take();
        if handle != 0 {
            if let Err(err) = self.client.closedir(handle) {
                warn!(operation = "close_remote_dir", error = %err, "Failed to close dispatcher directory stream");
            }
        }
    }
}

impl Dir {
    pub fn is_remote(&self) -> bool {
        matches!(self, Dir::Remote(_))
    }

    /// Next entry including `.` and `..`; `None` at the end.
    pub fn read_entry(&mut self) -> io::Result<Option<DirEntry>> {
        match self {
            Dir::Local(stream) => stream.read_entry(),
            Dir::Remote(remote) => remote.client.readdir(remote.handle),
        }
    }

    pub fn close(self) -> io::Result<()> {
        match self {
            Dir::Local(stream) => stream.close(),
            Dir::Remote(mut remote) => {
                let handle = remote.take();
                remote.client.closedir(handle)
            }
        }
    }
}

pub fn open(path: &Path, flags: i32, mode: u32) -> io::Result<Fd> {
    route(
        || sys::open(path, flags, mode).map(Fd::Local),
        |client| {
            client.open(path, flags, mode).map(|fd| {
                Fd::Remote(RemoteFd {
                    client: Arc::clone(client),
                    fd,
                })
            })
        },
    )
}

pub fn opendir(path: &Path) -> io::Result<Dir> {
    route(
        || DirStream::open(path).map(Dir::Local),
        |client| {
            client.opendir(path).map(|handle| {
                Dir::Remote(RemoteDir {
                    client: Arc::clone(client),
                    handle,
                })
            })
        },
    )
}

pub fn stat(path: &Path) -> io::Result<FileStat> {
    route(|| sys::stat(path), |c| c.stat(path))
}

pub fn lstat(path: &Path) -> io::Result<FileStat> {
    route(|| sys::lstat(path), |c| c.lstat(path))
}

pub fn statfs(path: &Path) -> io::Result<FsStat> {
    route(|| sys::statfs(path), |c| c.statfs(path))
}

pub fn statvfs(path: &Path) -> io::Result<VfsStat> {
    route(|| sys::statvfs(path), |c| c.statvfs(path))
}

pub fn mkdir(path: &Path, mode: u32) -> io::Result<()> {
    route(|| sys::mkdir(path, mode), |c| c.mkdir(path, mode))
}

pub fn rmdir(path: &Path) -> io::Result<()> {
    route(|| sys::rmdir(path), |c| c.rmdir(path))
}

pub fn remove(path: &Path) -> io::Result<()> {
    route(|| sys::remove(path), |c| c.remove(path))
}

pub fn unlink(path: &Path) -> io::Result<()> {
    route(|| sys::unlink(path), |c| c.unlink(path))
}

pub fn chmod(path: &Path, mode: u32) -> io::Result<()> {
    route(|| sys::chmod(path, mode), |c| c.chmod(path, mode))
}

pub fn chown(path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    route(|| sys::chown(path, uid, gid), |c| c.chown(path, uid, gid))
}

pub fn utimes(path: &Path, atime: Timeval, mtime: Timeval) -> io::Result<()> {
    route(
        || sys::utimes(path, atime, mtime),
        |c| c.utimes(path, atime, mtime),
    )
}

pub fn rename(from: &Path, to: &Path) -> io::Result<()> {
    route(|| sys::rename(from, to), |c| c.rename(from, to))
}

pub fn symlink(target: &Path, link_path: &Path) -> io::Result<()> {
    route(
        || sys::symlink(target, link_path),
        |c| c.symlink(target, link_path),
    )
}

pub fn link(existing: &Path, new: &Path) -> io::Result<()> {
    route(|| sys::link(existing, new), |c| c.link(existing, new))
}

pub fn realpath(path: &Path) -> io::Result<PathBuf> {
    route(|| sys::realpath(path), |c| c.realpath(path))
}

pub fn readlink(path: &Path, bufsiz: usize) -> io::Result<Vec<u8>> {
    route(|| sys::readlink(path, bufsiz), |c| c.readlink(path, bufsiz))
}

/// Change directory; returns the resulting working directory.
pub fn chdir(path: &Path) -> io::Result<PathBuf> {
    route(|| sys::chdir(path), |c| c.chdir(path))
}

pub fn fs_flags_get(path: &Path) -> io::Result<i32> {
    route(|| sys::fs_flags_get(path), |c| c.fs_flags_get(path))
}

pub fn fs_flags_set(path: &Path, flags: i32) -> io::Result<()> {
    route(|| sys::fs_flags_set(path, flags), |c| c.fs_flags_set(path, flags))
}

/// Run a shell command line; returns its raw wait status.
pub fn execute(cmd: &[u8], no_wait: bool) -> io::Result<i32> {
    route(|| sys::execute(cmd, no_wait), |c| c.execute(cmd, no_wait))
}
