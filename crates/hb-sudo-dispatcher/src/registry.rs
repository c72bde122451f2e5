// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Capability sets of handles opened by the dispatcher

use hb_sudo_proto::sys::DirStream;
use std::collections::HashMap;
use std::hash::Hash;
use std::os::fd::{OwnedFd, RawFd};
use tracing::debug;

/// Handles a client is allowed to use
///
/// A key is present only between the successful open that produced it and
/// the matching close. Values own the underlying OS resource, so whatever is
/// still registered when the registry is dropped gets closed.
pub struct HandleRegistry<K, V> {
    live: HashMap<K, V>,
}

impl<K: Eq + Hash + Copy, V> HandleRegistry<K, V> {
    pub fn new() -> Self {
        Self {
            live: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.live.insert(key, value);
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.live.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.live.get_mut(key)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.live.remove(key)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

impl<K: Eq + Hash + Copy, V> Default for HandleRegistry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// The two registries one dispatcher owns
#[derive(Default)]
pub struct Handles {
    pub fds: HandleRegistry<RawFd, OwnedFd>,
    pub dirs: HandleRegistry<u64, DirStream>,
}

impl Drop for Handles {
    fn drop(&mut self) {
        if !self.fds.is_empty() || !self.dirs.is_empty() {
            debug!(
                operation = "release_handles",
                fds = self.fds.len(),
                dirs = self.dirs.len(),
                "Closing handles left open by the client"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::os::unix::net::UnixStream;

    #[test]
    fn membership_follows_insert_and_remove() {
        let mut reg: HandleRegistry<i32, &str> = HandleRegistry::new();
        assert_eq!(reg.get(&3), None);
        reg.insert(3, "three");
        assert_eq!(reg.get(&3), Some(&"three"));
        assert_eq!(reg.remove(&3), Some("three"));
        assert_eq!(reg.get(&3), None);
        assert_eq!(reg.remove(&3), None);
    }

    #[test]
    fn dropping_handles_closes_descriptors() {
        let (mut reader, writer) = UnixStream::pair().unwrap();
        let fd = OwnedFd::from(writer);

        let mut handles = Handles::default();
        handles.fds.insert(7, fd);
        assert_eq!(handles.fds.len(), 1);
        drop(handles);

        // The only write end is gone, so the reader sees end of stream.
        let mut buf = [0u8; 1];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }
}
