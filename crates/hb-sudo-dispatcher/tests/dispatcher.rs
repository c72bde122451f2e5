// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Drives a dispatcher running on a thread through raw frames.

use hb_sudo_dispatcher::Dispatcher;
use hb_sudo_proto::{Command, FileStat, ProtoError, ProtoResult, Timeval, Transaction};
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::JoinHandle;

struct Session {
    tx: Transaction<UnixStream, UnixStream>,
    server: JoinHandle<ProtoResult<()>>,
}

impl Session {
    fn start() -> Self {
        let (client, server) = UnixStream::pair().unwrap();
        let server = std::thread::spawn(move || {
            let mut tx = Transaction::new(server.try_clone().unwrap(), server);
            Dispatcher::new().serve(&mut tx)
        });
        Self {
            tx: Transaction::new(client.try_clone().unwrap(), client),
            server,
        }
    }

    /// Close the client end and collect the dispatcher's verdict.
    fn finish(self) -> ProtoResult<()> {
        drop(self.tx);
        self.server.join().unwrap()
    }

    fn ping(&mut self) {
        self.tx.send_command(Command::Ping);
        self.tx.expect_echo(Command::Ping).unwrap();
    }

    /// Returns the descriptor or the errno.
    fn open(&mut self, path: &Path, flags: i32, mode: u32) -> Result<i32, i32> {
        self.tx.send_command(Command::Open);
        self.tx.send_str(path.as_os_str().as_bytes());
        self.tx.send_int(flags);
        self.tx.send_pod(&mode);
        let fd = self.tx.recv_int().unwrap();
        let result = if fd == -1 {
            Err(self.tx.recv_errno().unwrap())
        } else {
            Ok(fd)
        };
        self.tx.expect_echo(Command::Open).unwrap();
        result
    }

    fn close(&mut self, fd: i32) -> Result<(), i32> {
        self.tx.send_command(Command::Close);
        self.tx.send_int(fd);
        let result = self.status();
        self.tx.expect_echo(Command::Close).unwrap();
        result
    }

    fn write(&mut self, fd: i32, data: &[u8]) -> Result<i64, i32> {
        self.tx.send_command(Command::Write);
        self.tx.send_int(fd);
        self.tx.send_pod(&(data.len() as u64));
        self.tx.send_buf(data);
        let r = self.tx.recv_pod::<i64>().unwrap();
        let result = if r == -1 {
            Err(self.tx.recv_errno().unwrap())
        } else {
            Ok(r)
        };
        self.tx.expect_echo(Command::Write).unwrap();
        result
    }

    fn read(&mut self, fd: i32, count: u64) -> Result<Vec<u8>, i32> {
        self.tx.send_command(Command::Read);
        self.tx.send_int(fd);
        self.tx.send_pod(&count);
        let r = self.tx.recv_pod::<i64>().unwrap();
        let result = if r == -1 {
            Err(self.tx.recv_errno().unwrap())
        } else {
            Ok(self.tx.recv_vec(r as u64).unwrap())
        };
        self.tx.expect_echo(Command::Read).unwrap();
        result
    }

    /// Read all of `fd`, one dispatcher round trip per chunk.
    fn read_to_end(&mut self, fd: i32) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let chunk = self.read(fd, 16 * 1024).unwrap();
            if chunk.is_empty() {
                return out;
            }
            out.extend_from_slice(&chunk);
        }
    }

    fn stat(&mut self, path: &Path) -> Result<FileStat, i32> {
        self.tx.send_command(Command::Stat);
        self.tx.send_str(path.as_os_str().as_bytes());
        let r = self.tx.recv_int().unwrap();
        let result = if r == 0 {
            Ok(self.tx.recv_pod::<FileStat>().unwrap())
        } else {
            Err(self.tx.recv_errno().unwrap())
        };
        self.tx.expect_echo(Command::Stat).unwrap();
        result
    }

    fn opendir(&mut self, path: &Path) -> Result<u64, i32> {
        self.tx.send_command(Command::OpenDir);
        self.tx.send_str(path.as_os_str().as_bytes());
        let handle = self.tx.recv_pod::<u64>().unwrap();
        let result = if handle == 0 {
            Err(self.tx.recv_errno().unwrap())
        } else {
            Ok(handle)
        };
        self.tx.expect_echo(Command::OpenDir).unwrap();
        result
    }

    /// `Ok(None)` at the end of the stream.
    fn readdir(&mut self, handle: u64) -> Result<Option<Vec<u8>>, i32> {
        self.tx.send_command(Command::ReadDir);
        self.tx.send_pod(&handle);
        let status = self.tx.recv_int().unwrap();
        let result = match status {
            0 => {
                let _ino = self.tx.recv_pod::<u64>().unwrap();
                let _d_type = self.tx.recv_pod::<u8>().unwrap();
                Ok(Some(self.tx.recv_str().unwrap()))
            }
            -1 => Ok(None),
            errno => Err(errno),
        };
        self.tx.expect_echo(Command::ReadDir).unwrap();
        result
    }

    fn closedir(&mut self, handle: u64) -> Result<(), i32> {
        self.tx.send_command(Command::CloseDir);
        self.tx.send_pod(&handle);
        let result = self.status();
        self.tx.expect_echo(Command::CloseDir).unwrap();
        result
    }

    fn status(&mut self) -> Result<(), i32> {
        match self.tx.recv_int().unwrap() {
            0 => Ok(()),
            _ => Err(self.tx.recv_errno().unwrap()),
        }
    }
}

const CREATE_RW: i32 = libc::O_CREAT | libc::O_TRUNC | libc::O_RDWR;

#[test]
fn ping_echoes_tag() {
    let mut session = Session::start();
    session.ping();
    session.ping();
    session.finish().unwrap();
}

#[test]
fn unknown_descriptor_is_ebadf() {
    let mut session = Session::start();
    assert_eq!(session.read(12345, 10), Err(libc::EBADF));
    assert_eq!(session.write(12345, b"abc"), Err(libc::EBADF));
    assert_eq!(session.close(12345), Err(libc::EBADF));
    session.ping();
    session.finish().unwrap();
}

#[test]
fn descriptor_valid_in_process_but_not_registered_is_ebadf() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mine");
    std::fs::write(&path, b"secret").unwrap();
    let mine = std::fs::File::open(&path).unwrap();

    let mut session = Session::start();
    assert_eq!(session.read(mine.as_raw_fd(), 6), Err(libc::EBADF));
    session.finish().unwrap();
}

#[test]
fn close_twice_fails_the_second_time() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::start();
    let fd = session.open(&dir.path().join("f"), CREATE_RW, 0o644).unwrap();
    assert_eq!(session.close(fd), Ok(()));
    assert_eq!(session.close(fd), Err(libc::EBADF));
    assert_eq!(session.read(fd, 1), Err(libc::EBADF));
    session.finish().unwrap();
}

#[test]
fn open_failure_carries_errno() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::start();
    assert_eq!(
        session.open(&dir.path().join("missing"), libc::O_RDONLY, 0),
        Err(libc::ENOENT)
    );
    session.finish().unwrap();
}

#[test]
fn written_bytes_read_back_identically() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::start();

    for size in [0usize, 1, 65536] {
        let path = dir.path().join(format!("file-{size}"));
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();

        let fd = session.open(&path, CREATE_RW, 0o644).unwrap();
        assert_eq!(session.write(fd, &data), Ok(size as i64));
        session.close(fd).unwrap();

        let fd = session.open(&path, libc::O_RDONLY, 0).unwrap();
        assert_eq!(session.read_to_end(fd), data);
        session.close(fd).unwrap();
    }

    session.finish().unwrap();
}

#[test]
fn stat_reports_size_and_errno() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f");
    std::fs::write(&path, b"12345").unwrap();

    let mut session = Session::start();
    let st = session.stat(&path).unwrap();
    assert_eq!(st.size, 5);
    assert_eq!(session.stat(&dir.path().join("missing")), Err(libc::ENOENT));
    session.finish().unwrap();
}

#[test]
fn directory_streams_are_registered() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a"), b"").unwrap();
    std::fs::write(dir.path().join("b"), b"").unwrap();

    let mut session = Session::start();
    let handle = session.opendir(dir.path()).unwrap();

    let mut names = Vec::new();
    while let Some(name) = session.readdir(handle).unwrap() {
        if name != b"." && name != b".." {
            names.push(name);
        }
    }
    names.sort();
    assert_eq!(names, vec![b"a".to_vec(), b"b".to_vec()]);

    assert_eq!(session.closedir(handle), Ok(()));
    assert_eq!(session.closedir(handle), Err(libc::EBADF));
    assert_eq!(session.readdir(handle), Err(libc::EBADF));
    session.finish().unwrap();
}

#[test]
fn opendir_failure_returns_zero_handle() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::start();
    assert_eq!(
        session.opendir(&dir.path().join("missing")),
        Err(libc::ENOENT)
    );
    session.finish().unwrap();
}

#[test]
fn rejected_command_still_consumes_its_arguments() {
    let mut session = Session::start();

    session.tx.send_command(Command::FSetXAttr);
    session.tx.send_int(4242);
    session.tx.send_str("user.test");
    session.tx.send_pod(&3u64);
    session.tx.send_buf(b"xyz");
    session.tx.send_int(0);
    assert_eq!(session.status(), Err(libc::EBADF));
    session.tx.expect_echo(Command::FSetXAttr).unwrap();

    session.ping();
    session.finish().unwrap();
}

#[test]
fn mkdir_rename_and_rmdir() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first");
    let second = dir.path().join("second");
    let mut session = Session::start();

    session.tx.send_command(Command::MkDir);
    session.tx.send_str(first.as_os_str().as_bytes());
    session.tx.send_pod(&0o755u32);
    assert_eq!(session.status(), Ok(()));
    session.tx.expect_echo(Command::MkDir).unwrap();

    session.tx.send_command(Command::Rename);
    session.tx.send_str(first.as_os_str().as_bytes());
    session.tx.send_str(second.as_os_str().as_bytes());
    assert_eq!(session.status(), Ok(()));
    session.tx.expect_echo(Command::Rename).unwrap();
    assert!(second.is_dir());

    session.tx.send_command(Command::RmDir);
    session.tx.send_str(first.as_os_str().as_bytes());
    assert_eq!(session.status(), Err(libc::ENOENT));
    session.tx.expect_echo(Command::RmDir).unwrap();

    session.finish().unwrap();
}

#[test]
fn realpath_resolves_links() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("target");
    std::fs::write(&target, b"").unwrap();
    let link = dir.path().join("link");
    std::os::unix::fs::symlink(&target, &link).unwrap();

    let mut session = Session::start();
    session.tx.send_command(Command::RealPath);
    session.tx.send_str(link.as_os_str().as_bytes());
    assert_eq!(session.tx.recv_int().unwrap(), 0);
    let resolved = session.tx.recv_path().unwrap();
    session.tx.expect_echo(Command::RealPath).unwrap();
    assert_eq!(resolved, std::fs::canonicalize(&target).unwrap());
    session.finish().unwrap();
}

#[test]
fn execute_runs_through_the_shell() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("marker");
    let mut session = Session::start();

    session.tx.send_command(Command::Execute);
    session
        .tx
        .send_str(format!("touch '{}'", marker.display()));
    session.tx.send_int(0);
    assert_eq!(session.tx.recv_int().unwrap(), 0);
    session.tx.expect_echo(Command::Execute).unwrap();
    assert!(marker.exists());

    session.finish().unwrap();
}

#[test]
fn unknown_tag_is_fatal() {
    let mut session = Session::start();
    session.ping();
    session.tx.send_pod(&0xbad0_u32);
    session.tx.flush().unwrap();
    let result = session.finish();
    assert!(matches!(result, Err(ProtoError::UnknownCommand(0xbad0))));
}

#[test]
fn eof_inside_frame_is_fatal() {
    let mut session = Session::start();
    session.tx.send_command(Command::Close);
    session.tx.send_buf(&[1, 0]);
    session.tx.flush().unwrap();
    let result = session.finish();
    assert!(matches!(result, Err(ProtoError::Truncated)));
}

#[test]
fn oversized_write_payload_is_fatal() {
    let mut session = Session::start();
    session.tx.send_command(Command::Write);
    session.tx.send_int(3);
    session.tx.send_pod(&u64::MAX);
    session.tx.flush().unwrap();
    let result = session.finish();
    assert!(matches!(result, Err(ProtoError::PayloadTooLong(_))));
}

#[test]
fn sessions_do_not_share_handles() {
    let dir = tempfile::tempdir().unwrap();
    let mut first = Session::start();
    let mut second = Session::start();

    let fd = first.open(&dir.path().join("f"), CREATE_RW, 0o644).unwrap();
    assert_eq!(second.read(fd, 1), Err(libc::EBADF));
    assert_eq!(first.read(fd, 1), Ok(Vec::new()));

    first.finish().unwrap();
    second.finish().unwrap();
}

/// How a descriptor command reports failure
#[derive(Clone, Copy, Debug)]
enum Reply {
    /// `i64` count or offset, `-1` then errno
    Count,
    /// `i32` status, `-1` then errno
    Status,
}

/// Send `cmd` with well-formed arguments for descriptor `fd`.
fn send_fd_command(tx: &mut Transaction<UnixStream, UnixStream>, cmd: Command, fd: i32) -> Reply {
    tx.send_command(cmd);
    tx.send_int(fd);
    match cmd {
        Command::Close | Command::FStat => Reply::Status,
        Command::LSeek => {
            tx.send_pod(&0i64);
            tx.send_int(libc::SEEK_SET);
            Reply::Count
        }
        Command::Read => {
            tx.send_pod(&8u64);
            Reply::Count
        }
        Command::PRead => {
            tx.send_pod(&0i64);
            tx.send_pod(&8u64);
            Reply::Count
        }
        Command::Write => {
            tx.send_pod(&3u64);
            tx.send_buf(b"abc");
            Reply::Count
        }
        Command::PWrite => {
            tx.send_pod(&0i64);
            tx.send_pod(&3u64);
            tx.send_buf(b"abc");
            Reply::Count
        }
        Command::FTruncate => {
            tx.send_pod(&0i64);
            Reply::Status
        }
        Command::FChmod => {
            tx.send_pod(&0o600u32);
            Reply::Status
        }
        Command::FUTimes => {
            tx.send_pod(&Timeval::default());
            tx.send_pod(&Timeval::default());
            Reply::Status
        }
        Command::FListXAttr => {
            tx.send_pod(&64u64);
            Reply::Count
        }
        Command::FGetXAttr => {
            tx.send_str("user.test");
            tx.send_pod(&64u64);
            Reply::Count
        }
        Command::FSetXAttr => {
            tx.send_str("user.test");
            tx.send_pod(&1u64);
            tx.send_buf(b"v");
            tx.send_int(0);
            Reply::Status
        }
        other => panic!("{other} does not take a descriptor"),
    }
}

const FD_COMMANDS: [Command; 13] = [
    Command::Close,
    Command::LSeek,
    Command::Read,
    Command::PRead,
    Command::Write,
    Command::PWrite,
    Command::FTruncate,
    Command::FChmod,
    Command::FStat,
    Command::FUTimes,
    Command::FListXAttr,
    Command::FGetXAttr,
    Command::FSetXAttr,
];

fn expect_ebadf(session: &mut Session, cmd: Command, fd: i32) {
    let reply = send_fd_command(&mut session.tx, cmd, fd);
    let status = match reply {
        Reply::Count => session.tx.recv_pod::<i64>().unwrap(),
        Reply::Status => i64::from(session.tx.recv_int().unwrap()),
    };
    assert_eq!(status, -1, "{cmd} on fd {fd}");
    assert_eq!(session.tx.recv_errno().unwrap(), libc::EBADF, "{cmd} on fd {fd}");
    session.tx.expect_echo(cmd).unwrap();
}

#[test]
fn every_descriptor_command_rejects_unregistered_handles() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::start();

    let closed = session.open(&dir.path().join("f"), CREATE_RW, 0o644).unwrap();
    session.close(closed).unwrap();

    for cmd in FD_COMMANDS {
        for fd in [0, 1, 2, closed, -1] {
            expect_ebadf(&mut session, cmd, fd);
        }
    }

    // stdio of this process was never touched
    for fd in [0, 1, 2] {
        assert_ne!(unsafe { libc::fcntl(fd, libc::F_GETFD) }, -1);
    }
    session.ping();
    session.finish().unwrap();
}

#[test]
fn descriptor_commands_on_a_registered_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f");
    let mut session = Session::start();
    let fd = session.open(&path, CREATE_RW, 0o644).unwrap();

    session.tx.send_command(Command::PWrite);
    session.tx.send_int(fd);
    session.tx.send_pod(&4i64);
    session.tx.send_pod(&2u64);
    session.tx.send_buf(b"xy");
    assert_eq!(session.tx.recv_pod::<i64>().unwrap(), 2);
    session.tx.expect_echo(Command::PWrite).unwrap();

    session.tx.send_command(Command::FTruncate);
    session.tx.send_int(fd);
    session.tx.send_pod(&5i64);
    assert_eq!(session.status(), Ok(()));
    session.tx.expect_echo(Command::FTruncate).unwrap();

    session.tx.send_command(Command::FChmod);
    session.tx.send_int(fd);
    session.tx.send_pod(&0o600u32);
    assert_eq!(session.status(), Ok(()));
    session.tx.expect_echo(Command::FChmod).unwrap();

    session.tx.send_command(Command::FStat);
    session.tx.send_int(fd);
    assert_eq!(session.tx.recv_int().unwrap(), 0);
    let st = session.tx.recv_pod::<FileStat>().unwrap();
    session.tx.expect_echo(Command::FStat).unwrap();
    assert_eq!(st.size, 5);
    assert_eq!(st.mode & 0o777, 0o600);

    session.close(fd).unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"\0\0\0\0x");
    session.finish().unwrap();
}

#[test]
fn path_commands_report_missing_paths() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");
    let mut session = Session::start();

    session.tx.send_command(Command::ChDir);
    session.tx.send_str(missing.as_os_str().as_bytes());
    assert_eq!(session.status(), Err(libc::ENOENT));
    session.tx.expect_echo(Command::ChDir).unwrap();

    let flags_errno = if cfg!(target_os = "linux") { libc::ENOENT } else { libc::ENOTSUP };
    session.tx.send_command(Command::FsFlagsGet);
    session.tx.send_str(missing.as_os_str().as_bytes());
    assert_eq!(session.status(), Err(flags_errno));
    session.tx.expect_echo(Command::FsFlagsGet).unwrap();

    session.tx.send_command(Command::StatFs);
    session.tx.send_str(missing.as_os_str().as_bytes());
    assert_eq!(session.status(), Err(libc::ENOENT));
    session.tx.expect_echo(Command::StatFs).unwrap();

    session.tx.send_command(Command::ChOwn);
    session.tx.send_str(missing.as_os_str().as_bytes());
    session.tx.send_pod(&0u32);
    session.tx.send_pod(&0u32);
    assert_eq!(session.status(), Err(libc::ENOENT));
    session.tx.expect_echo(Command::ChOwn).unwrap();

    session.ping();
    session.finish().unwrap();
}
