// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Command opcodes
//!
//! The numbering is fixed: both processes are built from this table and
//! nothing is negotiated at runtime. New commands are appended.

use crate::error::ProtoError;

macro_rules! commands {
    ($($(#[$meta:meta])* $name:ident = $value:literal,)+) => {
        /// One proxied operation
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum Command {
            $($(#[$meta])* $name = $value,)+
        }

        impl Command {
            /// Every command, in tag order
            pub const ALL: &'static [Command] = &[$(Command::$name,)+];

            /// Stable name used in log fields
            pub fn name(self) -> &'static str {
                match self {
                    $(Command::$name => stringify!($name),)+
                }
            }
        }

        impl TryFrom<u32> for Command {
            type Error = ProtoError;

            fn try_from(tag: u32) -> Result<Self, Self::Error> {
                match tag {
                    $($value => Ok(Command::$name),)+
                    other => Err(ProtoError::UnknownCommand(other)),
                }
            }
        }
    };
}

commands! {
    /// Liveness check, no arguments and no reply fields
    Ping = 1,
    /// Run a shell command line
    Execute = 2,
    Open = 3,
    Close = 4,
    LSeek = 5,
    Read = 6,
    Write = 7,
    PRead = 8,
    PWrite = 9,
    FTruncate = 10,
    FChmod = 11,
    FStat = 12,
    OpenDir = 13,
    ReadDir = 14,
    CloseDir = 15,
    MkDir = 16,
    RmDir = 17,
    Remove = 18,
    Unlink = 19,
    ChMod = 20,
    ChOwn = 21,
    UTimes = 22,
    FUTimes = 23,
    Rename = 24,
    Symlink = 25,
    Link = 26,
    RealPath = 27,
    ReadLink = 28,
    StatFs = 29,
    StatVfs = 30,
    Stat = 31,
    LStat = 32,
    FListXAttr = 33,
    FGetXAttr = 34,
    FSetXAttr = 35,
    /// Inode flags (`FS_IOC_GETFLAGS`)
    FsFlagsGet = 36,
    /// Inode flags (`FS_IOC_SETFLAGS`)
    FsFlagsSet = 37,
    ChDir = 38,
}

impl Command {
    pub fn tag(self) -> u32 {
        self as u32
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_unique_and_resolve_back() {
        let mut seen = std::collections::HashSet::new();
        for &cmd in Command::ALL {
            assert!(seen.insert(cmd.tag()), "duplicate tag for {cmd}");
            assert_eq!(Command::try_from(cmd.tag()).unwrap(), cmd);
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(matches!(
            Command::try_from(0),
            Err(ProtoError::UnknownCommand(0))
        ));
        assert!(matches!(
            Command::try_from(0xdead_beef),
            Err(ProtoError::UnknownCommand(0xdead_beef))
        ));
    }
}
