// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

/// Running totals reported by an operation body
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpStats {
    /// Items processed
    pub count_total: u64,
    /// Bytes processed
    pub all_total: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpOutcome {
    Completed,
    Aborted,
    Failed(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OpMode {
    #[default]
    Normal,
    /// Runs without desktop notifications and with a longer progress delay
    Silent,
}

/// State shared by the controller and the worker, always behind one lock
#[derive(Debug, Default)]
pub(crate) struct OpState {
    pub aborting: bool,
    pub finished: bool,
    pub stats: OpStats,
    pub outcome: Option<OpOutcome>,
}
