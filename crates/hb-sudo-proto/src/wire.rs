// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Fixed-layout wire values
//!
//! Every value is written field by field as little-endian integers. The
//! in-memory layout of `libc` structures never reaches the wire, so the
//! encoding does not depend on the platform either peer was built for.

/// A value with a fixed wire size
pub trait Pod: Sized {
    const WIRE_SIZE: usize;

    fn encode(&self, out: &mut Vec<u8>);

    /// Decode from a buffer holding at least `WIRE_SIZE` unread bytes.
    fn decode(buf: &mut ParseBuf<'_>) -> Self;
}

/// Cursor over a received fixed-size block
pub struct ParseBuf<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ParseBuf<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    pub fn read_u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    pub fn read_u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    pub fn read_i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take())
    }

    pub fn read_u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }

    pub fn read_i64(&mut self) -> i64 {
        i64::from_le_bytes(self.take())
    }
}

macro_rules! int_pod {
    ($($ty:ty => $read:ident),+) => {
        $(
            impl Pod for $ty {
                const WIRE_SIZE: usize = std::mem::size_of::<$ty>();

                fn encode(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn decode(buf: &mut ParseBuf<'_>) -> Self {
                    buf.$read()
                }
            }
        )+
    };
}

int_pod!(u8 => read_u8, u32 => read_u32, i32 => read_i32, u64 => read_u64, i64 => read_i64);

/// Seconds and nanoseconds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Pod for Timespec {
    const WIRE_SIZE: usize = 16;

    fn encode(&self, out: &mut Vec<u8>) {
        self.sec.encode(out);
        self.nsec.encode(out);
    }

    fn decode(buf: &mut ParseBuf<'_>) -> Self {
        Self {
            sec: buf.read_i64(),
            nsec: buf.read_i64(),
        }
    }
}

/// Seconds and microseconds, as taken by `utimes`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timeval {
    pub sec: i64,
    pub usec: i64,
}

impl Timeval {
    pub fn from_timespec(ts: Timespec) -> Self {
        Self {
            sec: ts.sec,
            usec: ts.nsec / 1_000,
        }
    }

    pub(crate) fn to_libc(self) -> libc::timeval {
        libc::timeval {
            tv_sec: self.sec as libc::time_t,
            tv_usec: self.usec as libc::suseconds_t,
        }
    }
}

impl Pod for Timeval {
    const WIRE_SIZE: usize = 16;

    fn encode(&self, out: &mut Vec<u8>) {
        self.sec.encode(out);
        self.usec.encode(out);
    }

    fn decode(buf: &mut ParseBuf<'_>) -> Self {
        Self {
            sec: buf.read_i64(),
            usec: buf.read_i64(),
        }
    }
}

/// Result of `stat`, `lstat` and `fstat`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileStat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: i64,
    pub blksize: i64,
    pub blocks: i64,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
}

impl FileStat {
    pub fn file_type(&self) -> u32 {
        self.mode & libc::S_IFMT as u32
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == libc::S_IFDIR as u32
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == libc::S_IFLNK as u32
    }
}

impl Pod for FileStat {
    const WIRE_SIZE: usize = 8 + 8 + 4 + 8 + 4 + 4 + 8 + 8 + 8 + 8 + 3 * Timespec::WIRE_SIZE;

    fn encode(&self, out: &mut Vec<u8>) {
        self.dev.encode(out);
        self.ino.encode(out);
        self.mode.encode(out);
        self.nlink.encode(out);
        self.uid.encode(out);
        self.gid.encode(out);
        self.rdev.encode(out);
        self.size.encode(out);
        self.blksize.encode(out);
        self.blocks.encode(out);
        self.atime.encode(out);
        self.mtime.encode(out);
        self.ctime.encode(out);
    }

    fn decode(buf: &mut ParseBuf<'_>) -> Self {
        Self {
            dev: buf.read_u64(),
            ino: buf.read_u64(),
            mode: buf.read_u32(),
            nlink: buf.read_u64(),
            uid: buf.read_u32(),
            gid: buf.read_u32(),
            rdev: buf.read_u64(),
            size: buf.read_i64(),
            blksize: buf.read_i64(),
            blocks: buf.read_i64(),
            atime: Timespec::decode(buf),
            mtime: Timespec::decode(buf),
            ctime: Timespec::decode(buf),
        }
    }
}

/// Result of `statfs`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FsStat {
    pub fs_type: i64,
    pub bsize: i64,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub namelen: i64,
}

impl Pod for FsStat {
    const WIRE_SIZE: usize = 8 * 8;

    fn encode(&self, out: &mut Vec<u8>) {
        self.fs_type.encode(out);
        self.bsize.encode(out);
        self.blocks.encode(out);
        self.bfree.encode(out);
        self.bavail.encode(out);
        self.files.encode(out);
        self.ffree.encode(out);
        self.namelen.encode(out);
    }

    fn decode(buf: &mut ParseBuf<'_>) -> Self {
        Self {
            fs_type: buf.read_i64(),
            bsize: buf.read_i64(),
            blocks: buf.read_u64(),
            bfree: buf.read_u64(),
            bavail: buf.read_u64(),
            files: buf.read_u64(),
            ffree: buf.read_u64(),
            namelen: buf.read_i64(),
        }
    }
}

/// Result of `statvfs`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VfsStat {
    pub bsize: u64,
    pub frsize: u64,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub favail: u64,
    pub fsid: u64,
    pub flag: u64,
    pub namemax: u64,
}

impl Pod for VfsStat {
    const WIRE_SIZE: usize = 11 * 8;

    fn encode(&self, out: &mut Vec<u8>) {
        for v in [
            self.bsize,
            self.frsize,
            self.blocks,
            self.bfree,
            self.bavail,
            self.files,
            self.ffree,
            self.favail,
            self.fsid,
            self.flag,
            self.namemax,
        ] {
            v.encode(out);
        }
    }

    fn decode(buf: &mut ParseBuf<'_>) -> Self {
        Self {
            bsize: buf.read_u64(),
            frsize: buf.read_u64(),
            blocks: buf.read_u64(),
            bfree: buf.read_u64(),
            bavail: buf.read_u64(),
            files: buf.read_u64(),
            ffree: buf.read_u64(),
            favail: buf.read_u64(),
            fsid: buf.read_u64(),
            flag: buf.read_u64(),
            namemax: buf.read_u64(),
        }
    }
}

/// One directory entry as returned by `readdir`
///
/// Not a [`Pod`]: the name is sent as a length-prefixed string after the
/// fixed fields.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    pub d_type: u8,
    pub name: Vec<u8>,
}

impl DirEntry {
    pub fn is_dot_or_dotdot(&self) -> bool {
        self.name == b"." || self.name == b".."
    }
}
