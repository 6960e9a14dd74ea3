//! In-memory channel backend
//!
//! Requests are queued but no packets move; the owner decides when and how
//! each request finishes with [`LoopbackChannel::complete_next`]. Clones
//! share the same channel, so a test can keep one handle to drive
//! completions while a [`Channel`](super::Channel) owns another.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::channel::{timeout, ChannelBackend};
use super::request::{AnyRequest, IsochRequest, RequestKind, RequestStatus};
use crate::error::{BusError, Result};

/// In-memory channel backend
#[derive(Debug, Clone)]
pub struct LoopbackChannel {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    changed: Condvar,
}

#[derive(Debug)]
struct State {
    open: bool,
    subchannels: u64,
    pending: VecDeque<AnyRequest>,
    completed: VecDeque<AnyRequest>,
}

impl LoopbackChannel {
    /// Open channel reserving `subchannels` (subchannel `n` in bit `n`)
    pub fn new(subchannels: u64) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    open: true,
                    subchannels,
                    pending: VecDeque::new(),
                    completed: VecDeque::new(),
                }),
                changed: Condvar::new(),
            }),
        }
    }

    /// Finish the oldest pending request with `status`
    ///
    /// # Errors
    ///
    /// `NotReady` if `status` is not terminal or nothing is pending,
    /// `ChannelClosed` when closed.
    pub fn complete_next(
        &self,
        status: RequestStatus,
        packets: u32,
        bytes: u64,
    ) -> Result<RequestKind> {
        if !status.is_terminal() {
            return Err(BusError::not_ready(format!(
                "{status:?} is not a final status"
            )));
        }
        let mut state = self.shared.state.lock();
        if !state.open {
            return Err(BusError::ChannelClosed);
        }
        let request = state
            .pending
            .pop_front()
            .ok_or_else(|| BusError::not_ready("no request is pending"))?;
        request.finish(status, packets, bytes);
        let kind = request.kind();
        state.completed.push_back(request);
        drop(state);

        self.shared.changed.notify_all();
        Ok(kind)
    }

    /// Requests waiting for completion
    pub fn pending_len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Finished requests not yet dequeued
    pub fn completed_len(&self) -> usize {
        self.shared.state.lock().completed.len()
    }

    fn cancel_pending(state: &mut State) -> usize {
        let cancelled = state.pending.len();
        while let Some(request) = state.pending.pop_front() {
            request.finish(RequestStatus::Error, 0, 0);
            state.completed.push_back(request);
        }
        cancelled
    }

    fn check_open(state: &State) -> Result<()> {
        if state.open {
            Ok(())
        } else {
            Err(BusError::ChannelClosed)
        }
    }
}

impl ChannelBackend for LoopbackChannel {
    fn subchannels(&self) -> Result<u64> {
        let state = self.shared.state.lock();
        Self::check_open(&state)?;
        Ok(state.subchannels)
    }

    fn cancel(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        Self::check_open(&state)?;
        let cancelled = Self::cancel_pending(&mut state);
        drop(state);

        debug!("Cancelled {cancelled} pending requests");
        self.shared.changed.notify_all();
        Ok(())
    }

    fn prepare_request(&self, _kind: RequestKind) -> Result<()> {
        Self::check_open(&self.shared.state.lock())
    }

    fn queue(&self, request: AnyRequest) -> Result<()> {
        let mut state = self.shared.state.lock();
        Self::check_open(&state)?;
        let subchannel = request.subchannel();
        if state.subchannels & (1 << subchannel) == 0 {
            return Err(BusError::out_of_range("subchannel", subchannel));
        }
        request.begin()?;
        debug!("Queued {:?} request on subchannel {subchannel}", request.kind());
        state.pending.push_back(request);
        Ok(())
    }

    fn dequeue(&self, count: usize, timeout_us: u32) -> Result<Vec<AnyRequest>> {
        let deadline = Instant::now() + timeout(timeout_us)?;

        let mut state = self.shared.state.lock();
        Self::check_open(&state)?;
        while state.open && state.completed.len() < count {
            if self.shared.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        Self::check_open(&state)?;

        let take = count.min(state.completed.len());
        Ok(state.completed.drain(..take).collect())
    }

    fn wait(&self, timeout_us: u32) -> Result<bool> {
        let deadline = Instant::now() + timeout(timeout_us)?;

        let mut state = self.shared.state.lock();
        Self::check_open(&state)?;
        while state.open && !state.pending.is_empty() {
            if self.shared.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        Self::check_open(&state)?;
        Ok(state.pending.is_empty())
    }

    fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }

    fn close(&self) {
        let mut state = self.shared.state.lock();
        Self::cancel_pending(&mut state);
        state.open = false;
        drop(state);
        self.shared.changed.notify_all();
    }
}
