// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! One handler per command
//!
//! A handler reads exactly its request fields, performs the operation and
//! writes its reply fields. OS failures are part of the reply; only transport
//! and framing problems are returned as errors.

use crate::registry::Handles;
use hb_sudo_proto::sys::{self, DirStream};
use hb_sudo_proto::{Command, FileStat, ProtoResult, Timeval, Transaction, MAX_IO_LEN};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use tracing::{debug, trace};

type Tx<R, W> = Transaction<R, W>;

fn ebadf() -> io::Error {
    io::Error::from_raw_os_error(libc::EBADF)
}

/// Registered descriptor, or `EBADF` without touching the OS.
fn lookup_fd(handles: &Handles, fd: RawFd) -> io::Result<RawFd> {
    match handles.fds.get(&fd) {
        Some(owned) => Ok(owned.as_raw_fd()),
        None => {
            debug!(operation = "lookup_fd", fd, "Rejecting unregistered descriptor");
            Err(ebadf())
        }
    }
}

/// Reply a status call: `0`, or `-1` followed by the errno.
fn reply_status<R: Read, W: Write>(tx: &mut Tx<R, W>, result: io::Result<()>) {
    match result {
        Ok(()) => tx.send_int(0),
        Err(err) => {
            tx.send_int(-1);
            tx.send_error(&err);
        }
    }
}

/// Reply a byte count as `i64`, or `-1` followed by the errno.
fn reply_count<R: Read, W: Write>(tx: &mut Tx<R, W>, result: &io::Result<usize>) {
    match result {
        Ok(n) => tx.send_pod(&(*n as i64)),
        Err(err) => {
            tx.send_pod(&-1i64);
            tx.send_error(err);
        }
    }
}

fn reply_stat<R: Read, W: Write>(tx: &mut Tx<R, W>, result: io::Result<FileStat>) {
    match result {
        Ok(st) => {
            tx.send_int(0);
            tx.send_pod(&st);
        }
        Err(err) => {
            tx.send_int(-1);
            tx.send_error(&err);
        }
    }
}

fn clamp_len(len: u64) -> usize {
    len.min(MAX_IO_LEN as u64) as usize
}

pub fn handle<R: Read, W: Write>(
    cmd: Command,
    handles: &mut Handles,
    tx: &mut Tx<R, W>,
) -> ProtoResult<()> {
    trace!(operation = "dispatch", command = %cmd, "Handling command");
    match cmd {
        Command::Ping => Ok(()),
        Command::Execute => on_execute(tx),
        Command::Open => on_open(handles, tx),
        Command::Close => on_close(handles, tx),
        Command::LSeek => on_lseek(handles, tx),
        Command::Read => on_read(handles, tx, false),
        Command::PRead => on_read(handles, tx, true),
        Command::Write => on_write(handles, tx, false),
        Command::PWrite => on_write(handles, tx, true),
        Command::FTruncate => on_ftruncate(handles, tx),
        Command::FChmod => on_fchmod(handles, tx),
        Command::FStat => on_fstat(handles, tx),
        Command::OpenDir => on_opendir(handles, tx),
        Command::ReadDir => on_readdir(handles, tx),
        Command::CloseDir => on_closedir(handles, tx),
        Command::MkDir => on_mkdir(tx),
        Command::RmDir => on_one_path(tx, sys::rmdir),
        Command::Remove => on_one_path(tx, sys::remove),
        Command::Unlink => on_one_path(tx, sys::unlink),
        Command::ChMod => on_chmod(tx),
        Command::ChOwn => on_chown(tx),
        Command::UTimes => on_utimes(tx),
        Command::FUTimes => on_futimes(handles, tx),
        Command::Rename => on_two_paths(tx, sys::rename),
        Command::Symlink => on_two_paths(tx, sys::symlink),
        Command::Link => on_two_paths(tx, sys::link),
        Command::RealPath => on_realpath(tx),
        Command::ReadLink => on_readlink(tx),
        Command::StatFs => on_statfs(tx),
        Command::StatVfs => on_statvfs(tx),
        Command::Stat => on_stat(tx, sys::stat),
        Command::LStat => on_stat(tx, sys::lstat),
        Command::FListXAttr => on_flistxattr(handles, tx),
        Command::FGetXAttr => on_fgetxattr(handles, tx),
        Command::FSetXAttr => on_fsetxattr(handles, tx),
        Command::FsFlagsGet => on_fs_flags_get(tx),
        Command::FsFlagsSet => on_fs_flags_set(tx),
        Command::ChDir => on_chdir(tx),
    }
}

fn on_execute<R: Read, W: Write>(tx: &mut Tx<R, W>) -> ProtoResult<()> {
    let cmd = tx.recv_str()?;
    let no_wait = tx.recv_int()? != 0;
    debug!(operation = "execute", command = %String::from_utf8_lossy(&cmd), no_wait, "Executing command");
    match sys::execute(&cmd, no_wait) {
        Ok(status) => tx.send_int(status),
        Err(err) => {
            tx.send_int(-1);
            tx.send_error(&err);
        }
    }
    Ok(())
}

fn on_open<R: Read, W: Write>(handles: &mut Handles, tx: &mut Tx<R, W>) -> ProtoResult<()> {
    let path = tx.recv_path()?;
    let flags = tx.recv_int()?;
    let mode = tx.recv_pod::<u32>()?;
    match sys::open(&path, flags, mode) {
        Ok(fd) => {
            let raw = fd.as_raw_fd();
            handles.fds.insert(raw, fd);
            debug!(operation = "open", path = %path.display(), fd = raw, "Opened descriptor");
            tx.send_int(raw);
        }
        Err(err) => {
            debug!(operation = "open", path = %path.display(), error = %err, "Open failed");
            tx.send_int(-1);
            tx.send_error(&err);
        }
    }
    Ok(())
}

fn on_close<R: Read, W: Write>(handles: &mut Handles, tx: &mut Tx<R, W>) -> ProtoResult<()> {
    let fd = tx.recv_int()?;
    let result = match handles.fds.remove(&fd) {
        Some(owned) => sys::close(owned),
        None => Err(ebadf()),
    };
    reply_status(tx, result);
    Ok(())
}

fn on_lseek<R: Read, W: Write>(handles: &mut Handles, tx: &mut Tx<R, W>) -> ProtoResult<()> {
    let fd = tx.recv_int()?;
    let offset = tx.recv_pod::<i64>()?;
    let whence = tx.recv_int()?;
    match lookup_fd(handles, fd).and_then(|fd| sys::lseek(fd, offset, whence)) {
        Ok(pos) => tx.send_pod(&pos),
        Err(err) => {
            tx.send_pod(&-1i64);
            tx.send_error(&err);
        }
    }
    Ok(())
}

fn on_read<R: Read, W: Write>(
    handles: &mut Handles,
    tx: &mut Tx<R, W>,
    positional: bool,
) -> ProtoResult<()> {
    let fd = tx.recv_int()?;
    let offset = if positional {
        Some(tx.recv_pod::<i64>()?)
    } else {
        None
    };
    let count = clamp_len(tx.recv_pod::<u64>()?);

    let mut buf = vec![0u8; count];
    let result = lookup_fd(handles, fd).and_then(|fd| match offset {
        Some(offset) => sys::pread(fd, &mut buf, offset),
        None => sys::read(fd, &mut buf),
    });
    reply_count(tx, &result);
    if let Ok(n) = result {
        tx.send_buf(&buf[..n]);
    }
    Ok(())
}

fn on_write<R: Read, W: Write>(
    handles: &mut Handles,
    tx: &mut Tx<R, W>,
    positional: bool,
) -> ProtoResult<()> {
    let fd = tx.recv_int()?;
    let offset = if positional {
        Some(tx.recv_pod::<i64>()?)
    } else {
        None
    };
    let count = tx.recv_pod::<u64>()?;
    let data = tx.recv_vec(count)?;

    let result = lookup_fd(handles, fd).and_then(|fd| match offset {
        Some(offset) => sys::pwrite(fd, &data, offset),
        None => sys::write(fd, &data),
    });
    reply_count(tx, &result);
    Ok(())
}

fn on_ftruncate<R: Read, W: Write>(handles: &mut Handles, tx: &mut Tx<R, W>) -> ProtoResult<()> {
    let fd = tx.recv_int()?;
    let len = tx.recv_pod::<i64>()?;
    reply_status(tx, lookup_fd(handles, fd).and_then(|fd| sys::ftruncate(fd, len)));
    Ok(())
}

fn on_fchmod<R: Read, W: Write>(handles: &mut Handles, tx: &mut Tx<R, W>) -> ProtoResult<()> {
    let fd = tx.recv_int()?;
    let mode = tx.recv_pod::<u32>()?;
    reply_status(tx, lookup_fd(handles, fd).and_then(|fd| sys::fchmod(fd, mode)));
    Ok(())
}

fn on_fstat<R: Read, W: Write>(handles: &mut Handles, tx: &mut Tx<R, W>) -> ProtoResult<()> {
    let fd = tx.recv_int()?;
    reply_stat(tx, lookup_fd(handles, fd).and_then(sys::fstat));
    Ok(())
}

fn on_stat<R: Read, W: Write>(
    tx: &mut Tx<R, W>,
    op: fn(&Path) -> io::Result<FileStat>,
) -> ProtoResult<()> {
    let path = tx.recv_path()?;
    reply_stat(tx, op(&path));
    Ok(())
}

fn on_opendir<R: Read, W: Write>(handles: &mut Handles, tx: &mut Tx<R, W>) -> ProtoResult<()> {
    let path = tx.recv_path()?;
    match DirStream::open(&path) {
        Ok(stream) => {
            let handle = stream.handle();
            handles.dirs.insert(handle, stream);
            tx.send_pod(&handle);
        }
        Err(err) => {
            tx.send_pod(&0u64);
            tx.send_error(&err);
        }
    }
    Ok(())
}

fn on_readdir<R: Read, W: Write>(handles: &mut Handles, tx: &mut Tx<R, W>) -> ProtoResult<()> {
    let handle = tx.recv_pod::<u64>()?;
    let result = match handles.dirs.get_mut(&handle) {
        Some(stream) => stream.read_entry(),
        None => Err(ebadf()),
    };
    match result {
        Ok(Some(entry)) => {
            tx.send_int(0);
            tx.send_pod(&entry.ino);
            tx.send_pod(&entry.d_type);
            tx.send_str(&entry.name);
        }
        Ok(None) => tx.send_int(-1),
        Err(err) => tx.send_errno(err.raw_os_error().unwrap_or(libc::EIO)),
    }
    Ok(())
}

fn on_closedir<R: Read, W: Write>(handles: &mut Handles, tx: &mut Tx<R, W>) -> ProtoResult<()> {
    let handle = tx.recv_pod::<u64>()?;
    let result = match handles.dirs.remove(&handle) {
        Some(stream) => stream.close(),
        None => Err(ebadf()),
    };
    reply_status(tx, result);
    Ok(())
}

fn on_mkdir<R: Read, W: Write>(tx: &mut Tx<R, W>) -> ProtoResult<()> {
    let path = tx.recv_path()?;
    let mode = tx.recv_pod::<u32>()?;
    reply_status(tx, sys::mkdir(&path, mode));
    Ok(())
}

fn on_one_path<R: Read, W: Write>(
    tx: &mut Tx<R, W>,
    op: fn(&Path) -> io::Result<()>,
) -> ProtoResult<()> {
    let path = tx.recv_path()?;
    reply_status(tx, op(&path));
    Ok(())
}

fn on_two_paths<R: Read, W: Write>(
    tx: &mut Tx<R, W>,
    op: fn(&Path, &Path) -> io::Result<()>,
) -> ProtoResult<()> {
    let first = tx.recv_path()?;
    let second = tx.recv_path()?;
    reply_status(tx, op(&first, &second));
    Ok(())
}

fn on_chmod<R: Read, W: Write>(tx: &mut Tx<R, W>) -> ProtoResult<()> {
    let path = tx.recv_path()?;
    let mode = tx.recv_pod::<u32>()?;
    reply_status(tx, sys::chmod(&path, mode));
    Ok(())
}

fn on_chown<R: Read, W: Write>(tx: &mut Tx<R, W>) -> ProtoResult<()> {
    let path = tx.recv_path()?;
    let uid = tx.recv_pod::<u32>()?;
    let gid = tx.recv_pod::<u32>()?;
    reply_status(tx, sys::chown(&path, uid, gid));
    Ok(())
}

fn on_utimes<R: Read, W: Write>(tx: &mut Tx<R, W>) -> ProtoResult<()> {
    let path = tx.recv_path()?;
    let atime = tx.recv_pod::<Timeval>()?;
    let mtime = tx.recv_pod::<Timeval>()?;
    reply_status(tx, sys::utimes(&path, atime, mtime));
    Ok(())
}

fn on_futimes<R: Read, W: Write>(handles: &mut Handles, tx: &mut Tx<R, W>) -> ProtoResult<()> {
    let fd = tx.recv_int()?;
    let atime = tx.recv_pod::<Timeval>()?;
    let mtime = tx.recv_pod::<Timeval>()?;
    reply_status(
        tx,
        lookup_fd(handles, fd).and_then(|fd| sys::futimes(fd, atime, mtime)),
    );
    Ok(())
}

fn on_realpath<R: Read, W: Write>(tx: &mut Tx<R, W>) -> ProtoResult<()> {
    use std::os::unix::ffi::OsStrExt;

    let path = tx.recv_path()?;
    match sys::realpath(&path) {
        Ok(resolved) => {
            tx.send_int(0);
            tx.send_str(resolved.as_os_str().as_bytes());
        }
        Err(err) => tx.send_errno(err.raw_os_error().unwrap_or(libc::EIO)),
    }
    Ok(())
}

fn on_readlink<R: Read, W: Write>(tx: &mut Tx<R, W>) -> ProtoResult<()> {
    let path = tx.recv_path()?;
    let bufsiz = clamp_len(tx.recv_pod::<u64>()?);
    match sys::readlink(&path, bufsiz) {
        Ok(target) => {
            tx.send_pod(&(target.len() as i64));
            tx.send_buf(&target);
        }
        Err(err) => {
            tx.send_pod(&-1i64);
            tx.send_error(&err);
        }
    }
    Ok(())
}

fn on_statfs<R: Read, W: Write>(tx: &mut Tx<R, W>) -> ProtoResult<()> {
    let path = tx.recv_path()?;
    match sys::statfs(&path) {
        Ok(st) => {
            tx.send_int(0);
            tx.send_pod(&st);
        }
        Err(err) => {
            tx.send_int(-1);
            tx.send_error(&err);
        }
    }
    Ok(())
}

fn on_statvfs<R: Read, W: Write>(tx: &mut Tx<R, W>) -> ProtoResult<()> {
    let path = tx.recv_path()?;
    match sys::statvfs(&path) {
        Ok(st) => {
            tx.send_int(0);
            tx.send_pod(&st);
        }
        Err(err) => {
            tx.send_int(-1);
            tx.send_error(&err);
        }
    }
    Ok(())
}

/// Shared tail of the two xattr queries: the count, then the bytes when the
/// caller supplied a buffer.
fn reply_xattr<R: Read, W: Write>(tx: &mut Tx<R, W>, result: io::Result<usize>, buf: &[u8]) {
    reply_count(tx, &result);
    if let Ok(n) = result {
        if !buf.is_empty() {
            tx.send_buf(&buf[..n.min(buf.len())]);
        }
    }
}

fn on_flistxattr<R: Read, W: Write>(handles: &mut Handles, tx: &mut Tx<R, W>) -> ProtoResult<()> {
    let fd = tx.recv_int()?;
    let size = clamp_len(tx.recv_pod::<u64>()?);
    let mut buf = vec![0u8; size];
    let result = lookup_fd(handles, fd).and_then(|fd| sys::flistxattr(fd, &mut buf));
    reply_xattr(tx, result, &buf);
    Ok(())
}

fn on_fgetxattr<R: Read, W: Write>(handles: &mut Handles, tx: &mut Tx<R, W>) -> ProtoResult<()> {
    let fd = tx.recv_int()?;
    let name = tx.recv_str()?;
    let size = clamp_len(tx.recv_pod::<u64>()?);
    let mut buf = vec![0u8; size];
    let result = lookup_fd(handles, fd).and_then(|fd| sys::fgetxattr(fd, &name, &mut buf));
    reply_xattr(tx, result, &buf);
    Ok(())
}

fn on_fsetxattr<R: Read, W: Write>(handles: &mut Handles, tx: &mut Tx<R, W>) -> ProtoResult<()> {
    let fd = tx.recv_int()?;
    let name = tx.recv_str()?;
    let size = tx.recv_pod::<u64>()?;
    let value = tx.recv_vec(size)?;
    let flags = tx.recv_int()?;
    reply_status(
        tx,
        lookup_fd(handles, fd).and_then(|fd| sys::fsetxattr(fd, &name, &value, flags)),
    );
    Ok(())
}

fn on_fs_flags_get<R: Read, W: Write>(tx: &mut Tx<R, W>) -> ProtoResult<()> {
    let path = tx.recv_path()?;
    match sys::fs_flags_get(&path) {
        Ok(flags) => {
            tx.send_int(0);
            tx.send_int(flags);
        }
        Err(err) => {
            tx.send_int(-1);
            tx.send_error(&err);
        }
    }
    Ok(())
}

fn on_fs_flags_set<R: Read, W: Write>(tx: &mut Tx<R, W>) -> ProtoResult<()> {
    let path = tx.recv_path()?;
    let flags = tx.recv_int()?;
    reply_status(tx, sys::fs_flags_set(&path, flags));
    Ok(())
}

fn on_chdir<R: Read, W: Write>(tx: &mut Tx<R, W>) -> ProtoResult<()> {
    use std::os::unix::ffi::OsStrExt;

    let path = tx.recv_path()?;
    match sys::chdir(&path) {
        Ok(cwd) => {
            tx.send_int(0);
            tx.send_str(cwd.as_os_str().as_bytes());
        }
        Err(err) => {
            tx.send_int(-1);
            tx.send_error(&err);
        }
    }
    Ok(())
}
