// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Request/reply framing over a pair of byte streams

use crate::command::Command;
use crate::error::{ProtoError, ProtoResult};
use crate::wire::{ParseBuf, Pod};
use crate::{MAX_IO_LEN, MAX_STR_LEN};
use std::ffi::OsString;
use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::ffi::OsStringExt;
use std::path::PathBuf;

/// One end of the dispatcher link
///
/// Sends are buffered; the buffer is flushed before the first receive that
/// follows, so a request can never sit unsent while its sender waits for the
/// reply. Receives block until the declared number of bytes has arrived.
pub struct Transaction<R, W> {
    reader: R,
    writer: W,
    pending: Vec<u8>,
}

impl<R: Read, W: Write> Transaction<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            pending: Vec::with_capacity(256),
        }
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }

    pub fn send_pod<T: Pod>(&mut self, value: &T) {
        value.encode(&mut self.pending);
    }

    pub fn send_int(&mut self, value: i32) {
        self.send_pod(&value);
    }

    pub fn send_buf(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Length-prefixed byte string
    pub fn send_str(&mut self, data: impl AsRef<[u8]>) {
        let data = data.as_ref();
        self.send_pod(&(data.len() as u32));
        self.send_buf(data);
    }

    pub fn send_errno(&mut self, errno: i32) {
        self.send_int(errno);
    }

    /// Send the OS code carried by `err`, `EIO` when it has none.
    pub fn send_error(&mut self, err: &io::Error) {
        self.send_errno(err.raw_os_error().unwrap_or(libc::EIO));
    }

    pub fn send_command(&mut self, cmd: Command) {
        self.send_pod(&cmd.tag());
    }

    pub fn flush(&mut self) -> ProtoResult<()> {
        if !self.pending.is_empty() {
            self.writer.write_all(&self.pending)?;
            self.pending.clear();
        }
        self.writer.flush()?;
        Ok(())
    }

    fn flush_pending(&mut self) -> ProtoResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.flush()
    }

    pub fn recv_buf(&mut self, buf: &mut [u8]) -> ProtoResult<()> {
        self.flush_pending()?;
        self.reader.read_exact(buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => ProtoError::Truncated,
            _ => ProtoError::Io(e),
        })
    }

    pub fn recv_pod<T: Pod>(&mut self) -> ProtoResult<T> {
        let mut raw = vec![0u8; T::WIRE_SIZE];
        self.recv_buf(&mut raw)?;
        Ok(T::decode(&mut ParseBuf::new(&raw)))
    }

    pub fn recv_int(&mut self) -> ProtoResult<i32> {
        self.recv_pod()
    }

    pub fn recv_errno(&mut self) -> ProtoResult<i32> {
        self.recv_int()
    }

    /// Receive an errno and turn it into the error the OS call produced.
    pub fn recv_error(&mut self) -> ProtoResult<io::Error> {
        Ok(io::Error::from_raw_os_error(self.recv_errno()?))
    }

    /// Receive `len` raw bytes, refusing lengths above [`MAX_IO_LEN`].
    pub fn recv_vec(&mut self, len: u64) -> ProtoResult<Vec<u8>> {
        if len > MAX_IO_LEN as u64 {
            return Err(ProtoError::PayloadTooLong(len));
        }
        let mut data = vec![0u8; len as usize];
        self.recv_buf(&mut data)?;
        Ok(data)
    }

    pub fn recv_str(&mut self) -> ProtoResult<Vec<u8>> {
        let len = self.recv_pod::<u32>()? as usize;
        if len > MAX_STR_LEN {
            return Err(ProtoError::StringTooLong(len));
        }
        let mut data = vec![0u8; len];
        self.recv_buf(&mut data)?;
        Ok(data)
    }

    pub fn recv_path(&mut self) -> ProtoResult<PathBuf> {
        Ok(PathBuf::from(OsString::from_vec(self.recv_str()?)))
    }

    /// Read the tag that opens a frame.
    ///
    /// Returns `None` when the stream ends cleanly before the first byte of
    /// the tag, which is how a client signals it is done.
    pub fn recv_command(&mut self) -> ProtoResult<Option<Command>> {
        self.flush_pending()?;
        let mut raw = [0u8; 4];
        let mut got = 0;
        while got < raw.len() {
            match self.reader.read(&mut raw[got..]) {
                Ok(0) if got == 0 => return Ok(None),
                Ok(0) => return Err(ProtoError::Truncated),
                Ok(n) => got += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Command::try_from(u32::from_le_bytes(raw)).map(Some)
    }

    /// Read the tag that closes a reply and check it matches the request.
    pub fn expect_echo(&mut self, cmd: Command) -> ProtoResult<()> {
        let actual = self.recv_pod::<u32>()?;
        if actual != cmd.tag() {
            return Err(ProtoError::Desync {
                expected: cmd.tag(),
                actual,
            });
        }
        Ok(())
    }

    /// Close a reply frame: echo the tag and push everything out.
    pub fn finish_reply(&mut self, cmd: Command) -> ProtoResult<()> {
        self.send_command(cmd);
        self.flush()
    }
}
