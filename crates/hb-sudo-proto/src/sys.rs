// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Safe wrappers over the syscalls the dispatcher proxies
//!
//! The dispatcher performs every command through these functions and the
//! client uses the same ones when it is not elevated, so a proxied call and a
//! direct call fail with the same `io::Error`.

use crate::wire::{DirEntry, FileStat, FsStat, Timespec, Timeval, VfsStat};
use nix::errno::Errno;
use std::ffi::{CStr, CString, OsStr};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

fn cstr(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}

fn cstr_bytes(data: &[u8]) -> io::Result<CString> {
    CString::new(data).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}

fn check(r: libc::c_int) -> io::Result<()> {
    if r == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn check_size(r: libc::ssize_t) -> io::Result<usize> {
    if r < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(r as usize)
    }
}

#[cfg(not(target_os = "linux"))]
fn unsupported() -> io::Error {
    io::Error::from_raw_os_error(libc::ENOTSUP)
}

impl From<&libc::stat> for FileStat {
    fn from(st: &libc::stat) -> Self {
        Self {
            dev: st.st_dev as u64,
            ino: st.st_ino as u64,
            mode: st.st_mode as u32,
            nlink: st.st_nlink as u64,
            uid: st.st_uid,
            gid: st.st_gid,
            rdev: st.st_rdev as u64,
            size: st.st_size as i64,
            blksize: st.st_blksize as i64,
            blocks: st.st_blocks as i64,
            atime: Timespec {
                sec: st.st_atime as i64,
                nsec: st.st_atime_nsec as i64,
            },
            mtime: Timespec {
                sec: st.st_mtime as i64,
                nsec: st.st_mtime_nsec as i64,
            },
            ctime: Timespec {
                sec: st.st_ctime as i64,
                nsec: st.st_ctime_nsec as i64,
            },
        }
    }
}

pub fn open(path: &Path, flags: i32, mode: u32) -> io::Result<OwnedFd> {
    let path = cstr(path)?;
    let fd = unsafe { libc::open(path.as_ptr(), flags | libc::O_CLOEXEC, mode as libc::c_uint) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Close and report the result, which dropping an `OwnedFd` would swallow.
pub fn close(fd: OwnedFd) -> io::Result<()> {
    check(unsafe { libc::close(fd.into_raw_fd()) })
}

pub fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    check_size(unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) })
}

pub fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    check_size(unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) })
}

pub fn pread(fd: RawFd, buf: &mut [u8], offset: i64) -> io::Result<usize> {
    check_size(unsafe {
        libc::pread(fd, buf.as_mut_ptr().cast(), buf.len(), offset as libc::off_t)
    })
}

pub fn pwrite(fd: RawFd, buf: &[u8], offset: i64) -> io::Result<usize> {
    check_size(unsafe { libc::pwrite(fd, buf.as_ptr().cast(), buf.len(), offset as libc::off_t) })
}

pub fn lseek(fd: RawFd, offset: i64, whence: i32) -> io::Result<i64> {
    let r = unsafe { libc::lseek(fd, offset as libc::off_t, whence) };
    if r == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(r as i64)
}

pub fn ftruncate(fd: RawFd, len: i64) -> io::Result<()> {
    check(unsafe { libc::ftruncate(fd, len as libc::off_t) })
}

pub fn fchmod(fd: RawFd, mode: u32) -> io::Result<()> {
    check(unsafe { libc::fchmod(fd, mode as libc::mode_t) })
}

pub fn fstat(fd: RawFd) -> io::Result<FileStat> {
    let mut st = std::mem::MaybeUninit::<libc::stat>::uninit();
    check(unsafe { libc::fstat(fd, st.as_mut_ptr()) })?;
    Ok(FileStat::from(unsafe { &st.assume_init() }))
}

pub fn stat(path: &Path) -> io::Result<FileStat> {
    let path = cstr(path)?;
    let mut st = std::mem::MaybeUninit::<libc::stat>::uninit();
    check(unsafe { libc::stat(path.as_ptr(), st.as_mut_ptr()) })?;
    Ok(FileStat::from(unsafe { &st.assume_init() }))
}

pub fn lstat(path: &Path) -> io::Result<FileStat> {
    let path = cstr(path)?;
    let mut st = std::mem::MaybeUninit::<libc::stat>::uninit();
    check(unsafe { libc::lstat(path.as_ptr(), st.as_mut_ptr()) })?;
    Ok(FileStat::from(unsafe { &st.assume_init() }))
}

pub fn statfs(path: &Path) -> io::Result<FsStat> {
    let path = cstr(path)?;
    let mut st = std::mem::MaybeUninit::<libc::statfs>::uninit();
    check(unsafe { libc::statfs(path.as_ptr(), st.as_mut_ptr()) })?;
    let st = unsafe { st.assume_init() };

    #[cfg(any(target_os = "linux", target_os = "android"))]
    let namelen = st.f_namelen as i64;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let namelen = 0i64;

    Ok(FsStat {
        fs_type: st.f_type as i64,
        bsize: st.f_bsize as i64,
        blocks: st.f_blocks as u64,
        bfree: st.f_bfree as u64,
        bavail: st.f_bavail as u64,
        files: st.f_files as u64,
        ffree: st.f_ffree as u64,
        namelen,
    })
}

pub fn statvfs(path: &Path) -> io::Result<VfsStat> {
    let path = cstr(path)?;
    let mut st = std::mem::MaybeUninit::<libc::statvfs>::uninit();
    check(unsafe { libc::statvfs(path.as_ptr(), st.as_mut_ptr()) })?;
    let st = unsafe { st.assume_init() };
    Ok(VfsStat {
        bsize: st.f_bsize as u64,
        frsize: st.f_frsize as u64,
        blocks: st.f_blocks as u64,
        bfree: st.f_bfree as u64,
        bavail: st.f_bavail as u64,
        files: st.f_files as u64,
        ffree: st.f_ffree as u64,
        favail: st.f_favail as u64,
        fsid: st.f_fsid as u64,
        flag: st.f_flag as u64,
        namemax: st.f_namemax as u64,
    })
}

pub fn mkdir(path: &Path, mode: u32) -> io::Result<()> {
    let path = cstr(path)?;
    check(unsafe { libc::mkdir(path.as_ptr(), mode as libc::mode_t) })
}

pub fn rmdir(path: &Path) -> io::Result<()> {
    let path = cstr(path)?;
    check(unsafe { libc::rmdir(path.as_ptr()) })
}

/// `remove(3)`: unlink a file or remove an empty directory
pub fn remove(path: &Path) -> io::Result<()> {
    let path = cstr(path)?;
    check(unsafe { libc::remove(path.as_ptr()) })
}

pub fn unlink(path: &Path) -> io::Result<()> {
    let path = cstr(path)?;
    check(unsafe { libc::unlink(path.as_ptr()) })
}

pub fn chmod(path: &Path, mode: u32) -> io::Result<()> {
    let path = cstr(path)?;
    check(unsafe { libc::chmod(path.as_ptr(), mode as libc::mode_t) })
}

pub fn chown(path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    let path = cstr(path)?;
    check(unsafe { libc::chown(path.as_ptr(), uid, gid) })
}

pub fn utimes(path: &Path, atime: Timeval, mtime: Timeval) -> io::Result<()> {
    let path = cstr(path)?;
    let times = [atime.to_libc(), mtime.to_libc()];
    check(unsafe { libc::utimes(path.as_ptr(), times.as_ptr()) })
}

pub fn futimes(fd: RawFd, atime: Timeval, mtime: Timeval) -> io::Result<()> {
    let times = [atime.to_libc(), mtime.to_libc()];
    check(unsafe { libc::futimes(fd, times.as_ptr()) })
}

pub fn rename(from: &Path, to: &Path) -> io::Result<()> {
    let (from, to) = (cstr(from)?, cstr(to)?);
    check(unsafe { libc::rename(from.as_ptr(), to.as_ptr()) })
}

/// Create `link_path` pointing at `target`.
pub fn symlink(target: &Path, link_path: &Path) -> io::Result<()> {
    let (target, link_path) = (cstr(target)?, cstr(link_path)?);
    check(unsafe { libc::symlink(target.as_ptr(), link_path.as_ptr()) })
}

pub fn link(existing: &Path, new: &Path) -> io::Result<()> {
    let (existing, new) = (cstr(existing)?, cstr(new)?);
    check(unsafe { libc::link(existing.as_ptr(), new.as_ptr()) })
}

pub fn realpath(path: &Path) -> io::Result<PathBuf> {
    std::fs::canonicalize(path)
}

/// Read at most `bufsiz` bytes of the link target, unterminated.
pub fn readlink(path: &Path, bufsiz: usize) -> io::Result<Vec<u8>> {
    let path = cstr(path)?;
    let mut buf = vec![0u8; bufsiz];
    let n = check_size(unsafe { libc::readlink(path.as_ptr(), buf.as_mut_ptr().cast(), bufsiz) })?;
    buf.truncate(n);
    Ok(buf)
}

pub fn chdir(path: &Path) -> io::Result<PathBuf> {
    let c = cstr(path)?;
    check(unsafe { libc::chdir(c.as_ptr()) })?;
    std::env::current_dir()
}

/// List extended attribute names into `buf`; an empty `buf` asks for the size.
pub fn flistxattr(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    #[cfg(target_os = "linux")]
    {
        check_size(unsafe { libc::flistxattr(fd, buf.as_mut_ptr().cast(), buf.len()) })
    }
    #[cfg(target_os = "macos")]
    {
        check_size(unsafe { libc::flistxattr(fd, buf.as_mut_ptr().cast(), buf.len(), 0) })
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        let _ = (fd, buf);
        Err(unsupported())
    }
}

pub fn fgetxattr(fd: RawFd, name: &[u8], buf: &mut [u8]) -> io::Result<usize> {
    let name = cstr_bytes(name)?;
    #[cfg(target_os = "linux")]
    {
        check_size(unsafe {
            libc::fgetxattr(fd, name.as_ptr(), buf.as_mut_ptr().cast(), buf.len())
        })
    }
    #[cfg(target_os = "macos")]
    {
        check_size(unsafe {
            libc::fgetxattr(fd, name.as_ptr(), buf.as_mut_ptr().cast(), buf.len(), 0, 0)
        })
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        let _ = (fd, name, buf);
        Err(unsupported())
    }
}

pub fn fsetxattr(fd: RawFd, name: &[u8], value: &[u8], flags: i32) -> io::Result<()> {
    let name = cstr_bytes(name)?;
    #[cfg(target_os = "linux")]
    {
        check(unsafe {
            libc::fsetxattr(fd, name.as_ptr(), value.as_ptr().cast(), value.len(), flags)
        })
    }
    #[cfg(target_os = "macos")]
    {
        check(unsafe {
            libc::fsetxattr(fd, name.as_ptr(), value.as_ptr().cast(), value.len(), 0, flags)
        })
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        let _ = (fd, name, value, flags);
        Err(unsupported())
    }
}

// The kernel reads and writes an int through these requests even though the
// request number encodes a long.
#[cfg(target_os = "linux")]
fn fs_flags_ioctl(path: &Path, request: libc::c_ulong, flags: &mut libc::c_int) -> io::Result<()> {
    let file = std::fs::File::open(path)?;
    check(unsafe { libc::ioctl(file.as_raw_fd(), request as _, flags as *mut libc::c_int) })
}

/// Inode flags as reported by `FS_IOC_GETFLAGS`
pub fn fs_flags_get(path: &Path) -> io::Result<i32> {
    #[cfg(target_os = "linux")]
    {
        let request = nix::request_code_read!(b'f', 1, std::mem::size_of::<libc::c_long>());
        let mut flags: libc::c_int = 0;
        fs_flags_ioctl(path, request as libc::c_ulong, &mut flags)?;
        Ok(flags)
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = path;
        Err(unsupported())
    }
}

pub fn fs_flags_set(path: &Path, flags: i32) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        let request = nix::request_code_write!(b'f', 2, std::mem::size_of::<libc::c_long>());
        let mut flags: libc::c_int = flags;
        fs_flags_ioctl(path, request as libc::c_ulong, &mut flags)
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (path, flags);
        Err(unsupported())
    }
}

/// Run `cmd` through `/bin/sh -c`
///
/// Returns the raw wait status. With `no_wait` the child is left running,
/// reaped by a background thread, and the call returns 0 once it started.
pub fn execute(cmd: &[u8], no_wait: bool) -> io::Result<i32> {
    use std::os::unix::process::ExitStatusExt;

    let mut command = std::process::Command::new("/bin/sh");
    command.arg("-c").arg(OsStr::from_bytes(cmd));

    if no_wait {
        let mut child = command.spawn()?;
        std::thread::Builder::new()
            .name("hb-reaper".to_string())
            .spawn(move || {
                let _ = child.wait();
            })?;
        return Ok(0);
    }

    Ok(command.status()?.into_raw())
}

/// An open `DIR*`
///
/// The stream is closed when dropped; [`DirStream::close`] reports the
/// result instead.
pub struct DirStream {
    dir: NonNull<libc::DIR>,
}

// A DIR* may move between threads, it just must not be shared.
unsafe impl Send for DirStream {}

impl DirStream {
    pub fn open(path: &Path) -> io::Result<Self> {
        let path = cstr(path)?;
        let dir = unsafe { libc::opendir(path.as_ptr()) };
        NonNull::new(dir)
            .map(|dir| Self { dir })
            .ok_or_else(io::Error::last_os_error)
    }

    /// Opaque non-zero value identifying this stream on the wire
    pub fn handle(&self) -> u64 {
        self.dir.as_ptr() as usize as u64
    }

    /// Next entry, `None` at the end of the stream.
    pub fn read_entry(&mut self) -> io::Result<Option<DirEntry>> {
        Errno::clear();
        let entry = unsafe { libc::readdir(self.dir.as_ptr()) };
        if entry.is_null() {
            return match Errno::last_raw() {
                0 => Ok(None),
                errno => Err(io::Error::from_raw_os_error(errno)),
            };
        }
        let entry = unsafe { &*entry };
        let name = unsafe { CStr::from_ptr(entry.d_name.as_ptr()) };
        Ok(Some(DirEntry {
            ino: entry.d_ino as u64,
            d_type: entry.d_type,
            name: name.to_bytes().to_vec(),
        }))
    }

    pub fn close(self) -> io::Result<()> {
        let dir = self.dir;
        std::mem::forget(self);
        check(unsafe { libc::closedir(dir.as_ptr()) })
    }
}

impl Drop for DirStream {
    fn drop(&mut self) {
        unsafe {
            libc::closedir(self.dir.as_ptr());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    #[test]
    fn open_write_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        let fd = open(&path, libc::O_CREAT | libc::O_TRUNC | libc::O_RDWR, 0o644).unwrap();
        assert_eq!(write(fd.as_raw_fd(), b"hello").unwrap(), 5);
        assert_eq!(lseek(fd.as_raw_fd(), 0, libc::SEEK_SET).unwrap(), 0);

        let mut buf = [0u8; 16];
        let n = read(fd.as_raw_fd(), &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");

        let n = pread(fd.as_raw_fd(), &mut buf, 1).unwrap();
        assert_eq!(&buf[..n], b"ello");

        assert_eq!(fstat(fd.as_raw_fd()).unwrap().size, 5);
        close(fd).unwrap();
    }

    #[test]
    fn stat_missing_carries_errno() {
        let dir = tempfile::tempdir().unwrap();
        let err = stat(&dir.path().join("missing")).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn interior_nul_is_einval() {
        let err = stat(Path::new(OsStr::from_bytes(b"a\0b"))).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
    }

    #[test]
    fn lstat_does_not_follow_links() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        let link_path = dir.path().join("link");
        std::fs::write(&target, b"x").unwrap();
        symlink(&target, &link_path).unwrap();

        assert!(lstat(&link_path).unwrap().is_symlink());
        assert!(!stat(&link_path).unwrap().is_symlink());

        let raw = readlink(&link_path, 4096).unwrap();
        assert_eq!(Path::new(OsStr::from_bytes(&raw)), target);
        assert_eq!(readlink(&link_path, 3).unwrap().len(), 3);
    }

    #[test]
    fn directory_stream_lists_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), b"").unwrap();
        std::fs::write(dir.path().join("b"), b"").unwrap();

        let mut stream = DirStream::open(dir.path()).unwrap();
        assert_ne!(stream.handle(), 0);
        let mut names = Vec::new();
        while let Some(entry) = stream.read_entry().unwrap() {
            if !entry.is_dot_or_dotdot() {
                names.push(entry.name);
            }
        }
        names.sort();
        assert_eq!(names, vec![b"a".to_vec(), b"b".to_vec()]);
        stream.close().unwrap();
    }

    #[test]
    fn opendir_missing_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = DirStream::open(&dir.path().join("nope")).err().unwrap();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn execute_reports_wait_status() {
        assert_eq!(execute(b"exit 0", false).unwrap(), 0);
        let status = execute(b"exit 3", false).unwrap();
        assert!(libc::WIFEXITED(status));
        assert_eq!(libc::WEXITSTATUS(status), 3);
        assert_eq!(execute(b"true", true).unwrap(), 0);
    }

    #[test]
    fn utimes_sets_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"").unwrap();
        let when = Timeval {
            sec: 1_000_000,
            usec: 0,
        };
        utimes(&path, when, when).unwrap();
        assert_eq!(stat(&path).unwrap().mtime.sec, 1_000_000);
    }
}
