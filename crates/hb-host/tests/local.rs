// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use hb_host::{DirectoryEntry, Host, HostLocal};
use hb_sudo_client::{ElevationMode, ElevationRegion, SudoClient};
use hb_sudo_dispatcher::Dispatcher;
use hb_sudo_proto::{Timespec, Transaction, MAX_IO_LEN};
use serial_test::serial;
use std::ffi::OsStr;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::Arc;

fn enumerate(host: &HostLocal, dir: &Path) -> Vec<DirectoryEntry> {
    let mut entries = Vec::new();
    let mut cursor = host.directory_enum(dir).unwrap();
    while let Some(entry) = cursor.next_entry().unwrap() {
        entries.push(entry);
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

fn read_to_end(host: &HostLocal, path: &Path, resume_pos: u64) -> Vec<u8> {
    let mut reader = host.file_get(path, resume_pos).unwrap();
    let mut out = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match reader.read(&mut buf).unwrap() {
            0 => return out,
            n => out.extend_from_slice(&buf[..n]),
        }
    }
}

#[test]
fn enumerates_exactly_the_directory_contents() {
    let host = HostLocal::new();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a"), b"12345").unwrap();
    std::fs::create_dir(dir.path().join("b")).unwrap();

    let entries = enumerate(&host, dir.path());
    let names: Vec<_> = entries.iter().map(|e| e.name.as_os_str()).collect();
    assert_eq!(names, vec![OsStr::new("a"), OsStr::new("b")]);

    assert_eq!(entries[0].info.size, 5);
    assert!(!entries[0].info.is_dir());
    assert!(entries[1].info.is_dir());
    assert_eq!(
        entries[0].info,
        host.get_information(&dir.path().join("a"), false).unwrap()
    );
}

#[test]
fn entry_without_metadata_is_still_yielded() {
    let host = HostLocal::new();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a"), b"").unwrap();
    std::fs::write(dir.path().join("b"), b"").unwrap();

    let mut cursor = host.directory_enum(dir.path()).unwrap();
    let first = cursor.next_entry().unwrap().unwrap();
    let other = if first.name == "a" { "b" } else { "a" };
    // The stream has already buffered the remaining name.
    std::fs::remove_file(dir.path().join(other)).unwrap();

    let second = cursor.next_entry().unwrap().unwrap();
    assert_eq!(second.name, other);
    assert!(second.owner.is_empty());
    assert!(second.group.is_empty());
    assert_eq!(second.info, Default::default());
    assert!(cursor.next_entry().unwrap().is_none());
}

#[test]
fn enumerating_missing_directory_fails_immediately() {
    let host = HostLocal::new();
    let dir = tempfile::tempdir().unwrap();
    let err = host.directory_enum(&dir.path().join("missing")).err().unwrap();
    assert_eq!(err.errno(), Some(libc::ENOENT));
}

#[test]
fn owner_names_resolve_for_the_current_user() {
    let host = HostLocal::new();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("mine"), b"").unwrap();

    let entries = enumerate(&host, dir.path());
    let expected = nix::unistd::User::from_uid(nix::unistd::getuid())
        .unwrap()
        .map(|u| u.name)
        .unwrap_or_default();
    assert_eq!(entries[0].owner, expected);
}

#[test]
fn writer_truncates_and_reader_resumes() {
    let host = HostLocal::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("file");
    std::fs::write(&path, b"previous contents that are long").unwrap();

    let mut writer = host.file_put(&path, 0o644, 10, 0).unwrap();
    writer.write(b"0123456789").unwrap();
    writer.write_complete().unwrap();
    drop(writer);

    assert_eq!(read_to_end(&host, &path, 0), b"0123456789");
    assert_eq!(read_to_end(&host, &path, 6), b"6789");
    assert!(read_to_end(&host, &path, 100).is_empty());
}

#[test]
fn writer_resume_overwrites_in_place() {
    let host = HostLocal::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("file");
    std::fs::write(&path, b"0123456789").unwrap();

    let mut writer = host.file_put(&path, 0o644, 0, 4).unwrap();
    writer.write(b"ab").unwrap();
    drop(writer);

    assert_eq!(std::fs::read(&path).unwrap(), b"0123ab6789");
}

#[test]
fn resume_on_missing_file_fails_open() {
    let host = HostLocal::new();
    let dir = tempfile::tempdir().unwrap();
    let err = host.file_put(&dir.path().join("missing"), 0o644, 0, 4).err().unwrap();
    assert_eq!(err.errno(), Some(libc::ENOENT));
}

#[test]
fn metadata_follows_or_not() {
    let host = HostLocal::new();
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("target");
    let link = dir.path().join("link");
    std::fs::write(&target, b"abc").unwrap();

    host.symlink_create(&link, Path::new("target")).unwrap();
    assert_eq!(host.symlink_query(&link).unwrap(), Path::new("target"));
    assert_eq!(host.get_size(&link, true).unwrap(), 3);
    assert!(host.get_information(&link, false).unwrap().is_symlink());
    assert_eq!(
        host.get_mode(&link, true).unwrap() & libc::S_IFMT as u32,
        libc::S_IFREG as u32
    );
}

#[test]
fn attribute_setters_apply() {
    let host = HostLocal::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("file");
    std::fs::write(&path, b"").unwrap();

    host.set_mode(&path, 0o600).unwrap();
    assert_eq!(host.get_mode(&path, true).unwrap() & 0o777, 0o600);

    let when = Timespec {
        sec: 1_000_000_000,
        nsec: 250_000_000,
    };
    host.set_times(&path, when, when).unwrap();
    let info = host.get_information(&path, true).unwrap();
    assert_eq!(info.modification_time.sec, when.sec);
    assert_eq!(info.access_time.sec, when.sec);
}

#[test]
fn path_operations_carry_errno() {
    let host = HostLocal::new();
    let dir = tempfile::tempdir().unwrap();
    let sub = dir.path().join("sub");
    let moved = dir.path().join("moved");

    host.directory_create(&sub, 0o755).unwrap();
    let err = host.directory_create(&sub, 0o755).unwrap_err();
    assert_eq!(err.errno(), Some(libc::EEXIST));

    host.rename(&sub, &moved).unwrap();
    let err = host.file_delete(&moved).unwrap_err();
    assert!(matches!(err.errno(), Some(libc::EISDIR) | Some(libc::EPERM)));
    host.directory_delete(&moved).unwrap();

    let err = host.get_information(&moved, true).unwrap_err();
    assert_eq!(err.errno(), Some(libc::ENOENT));
}

#[test]
fn identity_of_local_host() {
    let host = HostLocal::new();
    assert_eq!(host.site_name(), "local");
    assert_eq!(host.identity(), Default::default());
    assert!(host.alive());
    assert!(host.clone_host().alive());
}

fn start_dispatcher() -> Arc<SudoClient> {
    let (ours, theirs) = UnixStream::pair().unwrap();
    std::thread::spawn(move || {
        let mut tx = Transaction::new(theirs.try_clone().unwrap(), theirs);
        let _ = Dispatcher::new().serve(&mut tx);
    });
    Arc::new(SudoClient::connect(ours.try_clone().unwrap(), ours, ElevationMode::Always).unwrap())
}

#[test]
#[serial]
fn oversized_write_completes_through_the_dispatcher() {
    hb_sudo_client::install(start_dispatcher());
    let host = HostLocal::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big");
    // More than one proxied write accepts.
    let data: Vec<u8> = (0..MAX_IO_LEN + 4096).map(|i| (i % 251) as u8).collect();

    {
        let _region = ElevationRegion::enter();
        let mut writer = host.file_put(&path, 0o644, data.len() as u64, 0).unwrap();
        writer.write(&data).unwrap();
        writer.write_complete().unwrap();
    }
    hb_sudo_client::uninstall();

    assert_eq!(std::fs::read(&path).unwrap(), data);
}

#[test]
#[serial]
fn enumeration_through_the_dispatcher() {
    hb_sudo_client::install(start_dispatcher());
    let host = HostLocal::new();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a"), b"x").unwrap();
    std::fs::write(dir.path().join("b"), b"yy").unwrap();

    let entries = {
        let _region = ElevationRegion::enter();
        enumerate(&host, dir.path())
    };
    hb_sudo_client::uninstall();

    let sizes: Vec<_> = entries.iter().map(|e| e.info.size).collect();
    assert_eq!(sizes, vec![1, 2]);
}
