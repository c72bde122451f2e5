// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Typed proxied operations
//!
//! Each method encodes one command frame and decodes the reply into the
//! same result the direct syscall would have produced.

use crate::client::{Link, SudoClient};
use hb_sudo_proto::{
    Command, DirEntry, FileStat, FsStat, Pod, ProtoResult, Timeval, VfsStat, MAX_IO_LEN,
    MAX_STR_LEN,
};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Fail with `errno` before sending a string the dispatcher would refuse.
///
/// The dispatcher treats an over-long string as a framing error and ends
/// the session, so it must never reach the link.
fn fits(bytes: &[u8], errno: i32) -> io::Result<&[u8]> {
    if bytes.len() > MAX_STR_LEN {
        Err(io::Error::from_raw_os_error(errno))
    } else {
        Ok(bytes)
    }
}

fn path_bytes(path: &Path) -> io::Result<&[u8]> {
    fits(path.as_os_str().as_bytes(), libc::ENAMETOOLONG)
}

/// `0`, or `-1` and an errno
fn recv_status(link: &mut Link) -> ProtoResult<io::Result<()>> {
    Ok(match link.recv_int()? {
        -1 => Err(link.recv_error()?),
        _ => Ok(()),
    })
}

/// `0` and a value, or `-1` and an errno
fn recv_value<T: Pod>(link: &mut Link) -> ProtoResult<io::Result<T>> {
    Ok(match link.recv_int()? {
        0 => Ok(link.recv_pod::<T>()?),
        _ => Err(link.recv_error()?),
    })
}

/// A byte count, or `-1` and an errno
fn recv_count(link: &mut Link) -> ProtoResult<io::Result<usize>> {
    Ok(match link.recv_pod::<i64>()? {
        -1 => Err(link.recv_error()?),
        n => Ok(n as usize),
    })
}

/// A byte count followed by that many bytes, copied into `buf`.
fn recv_into(link: &mut Link, buf: &mut [u8]) -> ProtoResult<io::Result<usize>> {
    Ok(match recv_count(link)? {
        Ok(n) if n > buf.len() => {
            // The dispatcher never sends more than requested; treat it as garbage.
            return Err(hb_sudo_proto::ProtoError::PayloadTooLong(n as u64));
        }
        Ok(n) => {
            link.recv_buf(&mut buf[..n])?;
            Ok(n)
        }
        Err(err) => Err(err),
    })
}

fn clamp(len: usize) -> usize {
    len.min(MAX_IO_LEN)
}

impl SudoClient {
    pub fn execute(&self, cmd: &[u8], no_wait: bool) -> io::Result<i32> {
        let cmd = fits(cmd, libc::E2BIG)?;
        self.call(Command::Execute, |link| {
            link.send_str(cmd);
            link.send_int(no_wait as i32);
            Ok(match link.recv_int()? {
                -1 => Err(link.recv_error()?),
                status => Ok(status),
            })
        })
    }

    pub fn open(&self, path: &Path, flags: i32, mode: u32) -> io::Result<i32> {
        let path = path_bytes(path)?;
        self.call(Command::Open, |link| {
            link.send_str(path);
            link.send_int(flags);
            link.send_pod(&mode);
            Ok(match link.recv_int()? {
                -1 => Err(link.recv_error()?),
                fd => Ok(fd),
            })
        })
    }

    pub fn close(&self, fd: i32) -> io::Result<()> {
        self.call(Command::Close, |link| {
            link.send_int(fd);
            recv_status(link)
        })
    }

    pub fn lseek(&self, fd: i32, offset: i64, whence: i32) -> io::Result<i64> {
        self.call(Command::LSeek, |link| {
            link.send_int(fd);
            link.send_pod(&offset);
            link.send_int(whence);
            Ok(match link.recv_pod::<i64>()? {
                -1 => Err(link.recv_error()?),
                pos => Ok(pos),
            })
        })
    }

    pub fn read(&self, fd: i32, buf: &mut [u8]) -> io::Result<usize> {
        let len = clamp(buf.len());
        self.call(Command::Read, |link| {
            link.send_int(fd);
            link.send_pod(&(len as u64));
            recv_into(link, &mut buf[..len])
        })
    }

    pub fn pread(&self, fd: i32, buf: &mut [u8], offset: i64) -> io::Result<usize> {
        let len = clamp(buf.len());
        self.call(Command::PRead, |link| {
            link.send_int(fd);
            link.send_pod(&offset);
            link.send_pod(&(len as u64));
            recv_into(link, &mut buf[..len])
        })
    }

    /// Writes at most `MAX_IO_LEN` bytes per call, like a short OS write.
    pub fn write(&self, fd: i32, buf: &[u8]) -> io::Result<usize> {
        let data = &buf[..clamp(buf.len())];
        self.call(Command::Write, |link| {
            link.send_int(fd);
            link.send_pod(&(data.len() as u64));
            link.send_buf(data);
            recv_count(link)
        })
    }

    pub fn pwrite(&self, fd: i32, buf: &[u8], offset: i64) -> io::Result<usize> {
        let data = &buf[..clamp(buf.len())];
        self.call(Command::PWrite, |link| {
            link.send_int(fd);
            link.send_pod(&offset);
            link.send_pod(&(data.len() as u64));
            link.send_buf(data);
            recv_count(link)
        })
    }

    pub fn ftruncate(&self, fd: i32, len: i64) -> io::Result<()> {
        self.call(Command::FTruncate, |link| {
            link.send_int(fd);
            link.send_pod(&len);
            recv_status(link)
        })
    }

    pub fn fchmod(&self, fd: i32, mode: u32) -> io::Result<()> {
        self.call(Command::FChmod, |link| {
            link.send_int(fd);
            link.send_pod(&mode);
            recv_status(link)
        })
    }

    pub fn fstat(&self, fd: i32) -> io::Result<FileStat> {
        self.call(Command::FStat, |link| {
            link.send_int(fd);
            recv_value(link)
        })
    }

    pub fn futimes(&self, fd: i32, atime: Timeval, mtime: Timeval) -> io::Result<()> {
        self.call(Command::FUTimes, |link| {
            link.send_int(fd);
            link.send_pod(&atime);
            link.send_pod(&mtime);
            recv_status(link)
        })
    }

    pub fn stat(&self, path: &Path) -> io::Result<FileStat> {
        self.path_value(Command::Stat, path)
    }

    pub fn lstat(&self, path: &Path) -> io::Result<FileStat> {
        self.path_value(Command::LStat, path)
    }

    pub fn statfs(&self, path: &Path) -> io::Result<FsStat> {
        self.path_value(Command::StatFs, path)
    }

    pub fn statvfs(&self, path: &Path) -> io::Result<VfsStat> {
        self.path_value(Command::StatVfs, path)
    }

    fn path_value<T: Pod>(&self, cmd: Command, path: &Path) -> io::Result<T> {
        let path = path_bytes(path)?;
        self.call(cmd, |link| {
            link.send_str(path);
            recv_value(link)
        })
    }

    fn path_status(&self, cmd: Command, path: &Path) -> io::Result<()> {
        let path = path_bytes(path)?;
        self.call(cmd, |link| {
            link.send_str(path);
            recv_status(link)
        })
    }

    fn two_paths_status(&self, cmd: Command, first: &Path, second: &Path) -> io::Result<()> {
        let first = path_bytes(first)?;
        let second = path_bytes(second)?;
        self.call(cmd, |link| {
            link.send_str(first);
            link.send_str(second);
            recv_status(link)
        })
    }

    /// Returns the non-zero stream handle.
    pub fn opendir(&self, path: &Path) -> io::Result<u64> {
        let path = path_bytes(path)?;
        self.call(Command::OpenDir, |link| {
            link.send_str(path);
            Ok(match link.recv_pod::<u64>()? {
                0 => Err(link.recv_error()?),
                handle => Ok(handle),
            })
        })
    }

    pub fn readdir(&self, handle: u64) -> io::Result<Option<DirEntry>> {
        self.call(Command::ReadDir, |link| {
            link.send_pod(&handle);
            Ok(match link.recv_int()? {
                0 => {
                    let ino = link.recv_pod::<u64>()?;
                    let d_type = link.recv_pod::<u8>()?;
                    let name = link.recv_str()?;
                    Ok(Some(DirEntry { ino, d_type, name }))
                }
                -1 => Ok(None),
                errno => Err(io::Error::from_raw_os_error(errno)),
            })
        })
    }

    pub fn closedir(&self, handle: u64) -> io::Result<()> {
        self.call(Command::CloseDir, |link| {
            link.send_pod(&handle);
            recv_status(link)
        })
    }

    pub fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        let path = path_bytes(path)?;
        self.call(Command::MkDir, |link| {
            link.send_str(path);
            link.send_pod(&mode);
            recv_status(link)
        })
    }

    pub fn rmdir(&self, path: &Path) -> io::Result<()> {
        self.path_status(Command::RmDir, path)
    }

    pub fn remove(&self, path: &Path) -> io::Result<()> {
        self.path_status(Command::Remove, path)
    }

    pub fn unlink(&self, path: &Path) -> io::Result<()> {
        self.path_status(Command::Unlink, path)
    }

    pub fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        let path = path_bytes(path)?;
        self.call(Command::ChMod, |link| {
            link.send_str(path);
            link.send_pod(&mode);
            recv_status(link)
        })
    }

    pub fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        let path = path_bytes(path)?;
        self.call(Command::ChOwn, |link| {
            link.send_str(path);
            link.send_pod(&uid);
            link.send_pod(&gid);
            recv_status(link)
        })
    }

    pub fn utimes(&self, path: &Path, atime: Timeval, mtime: Timeval) -> io::Result<()> {
        let path = path_bytes(path)?;
        self.call(Command::UTimes, |link| {
            link.send_str(path);
            link.send_pod(&atime);
            link.send_pod(&mtime);
            recv_status(link)
        })
    }

    pub fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.two_paths_status(Command::Rename, from, to)
    }

    pub fn symlink(&self, target: &Path, link_path: &Path) -> io::Result<()> {
        self.two_paths_status(Command::Symlink, target, link_path)
    }

    pub fn link(&self, existing: &Path, new: &Path) -> io::Result<()> {
        self.two_paths_status(Command::Link, existing, new)
    }

    pub fn realpath(&self, path: &Path) -> io::Result<PathBuf> {
        let path = path_bytes(path)?;
        self.call(Command::RealPath, |link| {
            link.send_str(path);
            Ok(match link.recv_int()? {
                0 => Ok(link.recv_path()?),
                errno => Err(io::Error::from_raw_os_error(errno)),
            })
        })
    }

    pub fn readlink(&self, path: &Path, bufsiz: usize) -> io::Result<Vec<u8>> {
        let path = path_bytes(path)?;
        let bufsiz = clamp(bufsiz);
        self.call(Command::ReadLink, |link| {
            link.send_str(path);
            link.send_pod(&(bufsiz as u64));
            Ok(match link.recv_pod::<i64>()? {
                n if n >= 0 => Ok(link.recv_vec(n as u64)?),
                _ => Err(link.recv_error()?),
            })
        })
    }

    pub fn chdir(&self, path: &Path) -> io::Result<PathBuf> {
        let path = path_bytes(path)?;
        self.call(Command::ChDir, |link| {
            link.send_str(path);
            Ok(match link.recv_int()? {
                -1 => Err(link.recv_error()?),
                _ => Ok(link.recv_path()?),
            })
        })
    }

    /// An empty `buf` asks for the size of the name list.
    pub fn flistxattr(&self, fd: i32, buf: &mut [u8]) -> io::Result<usize> {
        let len = clamp(buf.len());
        self.call(Command::FListXAttr, |link| {
            link.send_int(fd);
            link.send_pod(&(len as u64));
            xattr_reply(link, &mut buf[..len])
        })
    }

    pub fn fgetxattr(&self, fd: i32, name: &[u8], buf: &mut [u8]) -> io::Result<usize> {
        let name = fits(name, libc::ERANGE)?;
        let len = clamp(buf.len());
        self.call(Command::FGetXAttr, |link| {
            link.send_int(fd);
            link.send_str(name);
            link.send_pod(&(len as u64));
            xattr_reply(link, &mut buf[..len])
        })
    }

    pub fn fsetxattr(&self, fd: i32, name: &[u8], value: &[u8], flags: i32) -> io::Result<()> {
        let name = fits(name, libc::ERANGE)?;
        if value.len() > MAX_IO_LEN {
            return Err(io::Error::from_raw_os_error(libc::E2BIG));
        }
        self.call(Command::FSetXAttr, |link| {
            link.send_int(fd);
            link.send_str(name);
            link.send_pod(&(value.len() as u64));
            link.send_buf(value);
            link.send_int(flags);
            recv_status(link)
        })
    }

    pub fn fs_flags_get(&self, path: &Path) -> io::Result<i32> {
        let path = path_bytes(path)?;
        self.call(Command::FsFlagsGet, |link| {
            link.send_str(path);
            Ok(match link.recv_int()? {
                0 => Ok(link.recv_int()?),
                _ => Err(link.recv_error()?),
            })
        })
    }

    pub fn fs_flags_set(&self, path: &Path, flags: i32) -> io::Result<()> {
        let path = path_bytes(path)?;
        self.call(Command::FsFlagsSet, |link| {
            link.send_str(path);
            link.send_int(flags);
            recv_status(link)
        })
    }
}

/// Size queries (empty buffer) carry no payload.
fn xattr_reply(link: &mut Link, buf: &mut [u8]) -> ProtoResult<io::Result<usize>> {
    if buf.is_empty() {
        recv_count(link)
    } else {
        recv_into(link, buf)
    }
}
