// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! One host operation running on its own worker thread
//!
//! The thread that creates an [`Operation`] is its controller. The worker
//! never talks to the user directly: failures and cross-thread calls are
//! posted to a queue the controller drains inside [`Operation::wait_thread`],
//! and the completion notification is raised by the controller once the
//! worker has exited.

use crate::config::OpsConfig;
use crate::error::{OpError, OpResult};
use crate::notify::Notifier;
use crate::state::{OpMode, OpOutcome, OpState, OpStats};
use anyhow::anyhow;
use crossbeam_channel as chan;
use hb_host::Host;
use hb_sudo_client::ElevationRegion;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const FIRST_POLL: Duration = Duration::from_millis(200);
const BUSY_POLL: Duration = Duration::from_millis(1);
const IDLE_POLL: Duration = Duration::from_millis(500);
const UI_RECHECK: Duration = Duration::from_millis(100);

type Job = Box<dyn FnOnce() + Send>;

enum ControllerMsg {
    Failure(String),
    Call(Job),
}

/// Handle given to the operation body on the worker thread
pub struct OpContext {
    host: Arc<dyn Host>,
    base_dir: PathBuf,
    mode: OpMode,
    state: Arc<Mutex<OpState>>,
    queue: chan::Sender<ControllerMsg>,
}

impl OpContext {
    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn mode(&self) -> OpMode {
        self.mode
    }

    pub fn is_aborting(&self) -> bool {
        self.state.lock().aborting
    }

    /// Cancellation checkpoint.
    pub fn check_abort(&self) -> OpResult<()> {
        if self.is_aborting() {
            Err(OpError::Aborted)
        } else {
            Ok(())
        }
    }

    pub fn add_progress(&self, count: u64, bytes: u64) {
        let mut state = self.state.lock();
        state.stats.count_total += count;
        state.stats.all_total += bytes;
    }

    /// Run `f` on the controller thread and wait for its result.
    ///
    /// The call is serviced the next time the controller waits on this
    /// operation.
    pub fn call<R, F>(&self, f: F) -> OpResult<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = chan::bounded(1);
        let job: Job = Box::new(move || {
            let _ = reply_tx.send(f());
        });
        self.queue
            .send(ControllerMsg::Call(job))
            .map_err(|_| anyhow!("operation controller is gone"))?;
        reply_rx
            .recv()
            .map_err(|_| OpError::Other(anyhow!("controller dropped the call")))
    }
}

pub struct Operation {
    host: Arc<dyn Host>,
    base_dir: PathBuf,
    mode: OpMode,
    notify_title: Option<String>,
    config: OpsConfig,
    notifier: Arc<dyn Notifier>,
    state: Arc<Mutex<OpState>>,
    queue_tx: chan::Sender<ControllerMsg>,
    queue_rx: chan::Receiver<ControllerMsg>,
    done_rx: Option<chan::Receiver<()>>,
    thread: Option<JoinHandle<()>>,
    started: bool,
    notified: bool,
}

impl Operation {
    pub fn new(
        mode: OpMode,
        host: Arc<dyn Host>,
        base_dir: impl Into<PathBuf>,
        config: OpsConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (queue_tx, queue_rx) = chan::unbounded();
        Self {
            host,
            base_dir: base_dir.into(),
            mode,
            notify_title: None,
            config,
            notifier,
            state: Arc::new(Mutex::new(OpState::default())),
            queue_tx,
            queue_rx,
            done_rx: None,
            thread: None,
            started: false,
            notified: false,
        }
    }

    /// Title used in the completion notification; without one none is shown.
    pub fn with_notify_title(mut self, title: impl Into<String>) -> Self {
        self.notify_title = Some(title.into());
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn mode(&self) -> OpMode {
        self.mode
    }

    /// Spawn the worker thread running `body`.
    pub fn start<F>(&mut self, body: F) -> OpResult<()>
    where
        F: FnOnce(&OpContext) -> OpResult<()> + Send + 'static,
    {
        if self.thread.is_some() || self.done_rx.is_some() {
            return Err(anyhow!("operation already started").into());
        }

        let ctx = OpContext {
            host: Arc::clone(&self.host),
            base_dir: self.base_dir.clone(),
            mode: self.mode,
            state: Arc::clone(&self.state),
            queue: self.queue_tx.clone(),
        };
        let (done_tx, done_rx) = chan::bounded::<()>(0);

        let thread = std::thread::Builder::new()
            .name("hb-op-worker".to_string())
            .spawn(move || {
                run_worker(&ctx, body);
                drop(done_tx);
            })
            .map_err(|err| anyhow!(err).context("Failed to spawn operation worker"))?;

        self.thread = Some(thread);
        self.done_rx = Some(done_rx);
        self.started = true;
        Ok(())
    }

    /// Ask the worker to stop at its next checkpoint and interrupt the host.
    pub fn forcefully_abort(&self) {
        info!(operation = "op_abort", base_dir = %self.base_dir.display(), "Aborting operation");
        self.state.lock().aborting = true;
        self.host.abort();
    }

    /// Wait up to `timeout` (forever with `None`) for the worker to exit,
    /// servicing its queued requests meanwhile. Returns true once it has;
    /// an operation that was never started has nothing to wait for and
    /// returns false.
    pub fn wait_thread(&mut self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut poll = FIRST_POLL;

        loop {
            let Some(done_rx) = self.done_rx.as_ref() else {
                return self.started;
            };
            let interval = match deadline {
                Some(deadline) => poll.min(deadline.saturating_duration_since(Instant::now())),
                None => poll,
            };

            let mut pumped = 0usize;
            let done = chan::select_biased! {
                recv(done_rx) -> _ => true,
                recv(self.queue_rx) -> msg => {
                    if let Ok(msg) = msg {
                        self.handle(msg);
                        pumped += 1;
                    }
                    false
                },
                default(interval) => false,
            };

            if done {
                self.reap_worker();
                return true;
            }

            pumped += self.pump();
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return false;
            }
            poll = if pumped > 0 { BUSY_POLL } else { IDLE_POLL };
        }
    }

    /// Give a short-lived operation the chance to finish before any progress
    /// display, and hold progress back while another dialog is up.
    pub fn wait_thread_before_show_progress(&mut self) -> bool {
        let delay = self.config.progress_delay(self.mode == OpMode::Silent);
        if self.wait_thread(Some(delay)) {
            return true;
        }
        while self.notifier.is_showing_ui() {
            if self.wait_thread(Some(UI_RECHECK)) {
                return true;
            }
        }
        false
    }

    /// True once the worker has set `finished` and its thread has exited.
    pub fn is_finished(&self) -> bool {
        let exited = self.thread.as_ref().map_or(true, JoinHandle::is_finished);
        exited && self.state.lock().finished
    }

    pub fn is_aborting(&self) -> bool {
        self.state.lock().aborting
    }

    pub fn stats(&self) -> OpStats {
        self.state.lock().stats
    }

    pub fn outcome(&self) -> Option<OpOutcome> {
        self.state.lock().outcome.clone()
    }

    fn handle(&self, msg: ControllerMsg) {
        match msg {
            ControllerMsg::Failure(message) => self.notifier.show_failure(&message),
            ControllerMsg::Call(job) => job(),
        }
    }

    fn pump(&self) -> usize {
        let mut count = 0;
        while let Ok(msg) = self.queue_rx.try_recv() {
            self.handle(msg);
            count += 1;
        }
        count
    }

    fn reap_worker(&mut self) {
        self.done_rx = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(operation = "op_wait", "Operation worker panicked outside its body");
            }
        }
        self.pump();
        self.notify_completion();
    }

    fn notify_completion(&mut self) {
        if self.notified {
            return;
        }
        self.notified = true;

        let Some(title) = self.notify_title.as_deref() else {
            return;
        };
        if self.mode == OpMode::Silent || !self.config.enable_desktop_notifications {
            return;
        }
        let action = match self.outcome() {
            Some(OpOutcome::Completed) => format!("{title} completed"),
            _ => format!("{title} failed"),
        };
        self.notifier.display_notification(&action, &self.base_dir);
    }
}

impl Drop for Operation {
    fn drop(&mut self) {
        if self.done_rx.is_some() {
            self.forcefully_abort();
            self.wait_thread(None);
        }
    }
}

fn run_worker<F>(ctx: &OpContext, body: F)
where
    F: FnOnce(&OpContext) -> OpResult<()>,
{
    ctx.state.lock().stats = OpStats::default();
    let base_dir = ctx.base_dir.display().to_string();

    let result = {
        let _elevated = ElevationRegion::enter();
        // Only effective when panics unwind; release builds abort instead.
        panic::catch_unwind(AssertUnwindSafe(|| body(ctx))).unwrap_or_else(|payload| {
            Err(anyhow!("operation panicked: {}", panic_message(&*payload)).into())
        })
    };

    let outcome = match result {
        Ok(()) => {
            let stats = ctx.state.lock().stats;
            info!(
                operation = "op_worker",
                base_dir = %base_dir,
                count_total = stats.count_total,
                all_total = stats.all_total,
                "Operation completed"
            );
            OpOutcome::Completed
        }
        Err(OpError::Aborted) => {
            debug!(operation = "op_worker", base_dir = %base_dir, "Operation aborted");
            OpOutcome::Aborted
        }
        Err(err) => {
            let message = err.to_string();
            error!(
                operation = "op_worker",
                base_dir = %base_dir,
                error = %message,
                "Operation failed"
            );
            if !ctx.is_aborting() {
                let _ = ctx.queue.send(ControllerMsg::Failure(message.clone()));
            }
            OpOutcome::Failed(message)
        }
    };

    let mut state = ctx.state.lock();
    state.outcome = Some(outcome);
    state.finished = true;
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
