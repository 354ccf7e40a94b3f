//! Handle table shared between callers and the storage worker.
//!
//! Each slot carries its own lock, its own request gate and its own
//! completion signal, so callers on different handles never contend with
//! each other. The caller writes the request and clears the result; the
//! worker takes the request, writes the result and signals.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::debug;

use crate::buffer::SharedBuffer;
use crate::error::{Error, Result};

/// Caller-visible reference to a logical file slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(usize);

impl Handle {
    /// Slot index in the handle table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A request posted by a caller.
#[derive(Debug)]
pub(crate) enum Op {
    Read { seek: Option<u64>, len: usize },
    Write { seek: Option<u64>, data: Vec<u8> },
    Sync,
    Close,
}

impl Op {
    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
            Self::Sync => "sync",
            Self::Close => "close",
        }
    }
}

/// What the worker hands back for a completed request.
#[derive(Debug)]
pub(crate) enum Completion {
    Read(Vec<u8>),
    Written(usize),
    Done,
}

#[derive(Debug, Default)]
pub(crate) struct SlotState {
    pub(crate) allocated: bool,
    pub(crate) name: String,
    /// Set by the worker while it holds a device file for this slot.
    pub(crate) open: bool,
    pub(crate) stream: Option<SharedBuffer>,
    pub(crate) pending: Option<(u64, Op)>,
    /// The worker has taken a request and not yet completed it.
    in_flight: bool,
    result: Option<(u64, Result<Completion>)>,
    next_seq: u64,
    /// Bumped on every allocation, so the worker can tell a reused slot
    /// from the one its device file was opened for.
    pub(crate) generation: u64,
}

impl SlotState {
    /// Hand the pending request to the worker.
    pub(crate) fn take_pending(&mut self) -> Option<(u64, Op)> {
        let pending = self.pending.take();
        self.in_flight = pending.is_some();
        pending
    }

    /// Whether a request was posted that the worker has not finished, even
    /// if its caller has stopped waiting.
    fn busy(&self) -> bool {
        self.pending.is_some() || self.in_flight
    }

    fn release(&mut self) {
        let next_seq = self.next_seq;
        let generation = self.generation;
        *self = Self {
            next_seq,
            generation,
            ..Self::default()
        };
    }
}

#[derive(Debug, Default)]
pub(crate) struct Slot {
    state: Mutex<SlotState>,
    /// Serializes callers of the same handle so requests complete in the
    /// order they were posted.
    gate: AsyncMutex<()>,
    complete: Notify,
}

impl Slot {
    pub(crate) fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the outcome of request `seq` and wake its caller.
    pub(crate) fn complete(&self, seq: u64, result: Result<Completion>) {
        {
            let mut state = self.lock();
            state.in_flight = false;
            state.result = Some((seq, result));
        }
        self.complete.notify_one();
    }

    fn take_result(&self, seq: u64) -> Option<Result<Completion>> {
        let mut state = self.lock();
        match state.result {
            Some((done, _)) if done == seq => state.result.take().map(|(_, result)| result),
            _ => None,
        }
    }
}

/// Bounded table of logical file slots.
#[derive(Debug)]
pub(crate) struct HandleTable {
    slots: Box<[Slot]>,
    alloc: Mutex<()>,
    stopped: AtomicBool,
}

impl HandleTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Slot::default()).collect(),
            alloc: Mutex::new(()),
            stopped: AtomicBool::new(false),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    /// Resolve a handle to its slot, checking that it is allocated.
    pub(crate) fn get(&self, handle: Handle) -> Result<&Slot> {
        let slot = self.slots.get(handle.0).ok_or(Error::InvalidHandle { index: handle.0 })?;
        if !slot.lock().allocated {
            return Err(Error::HandleNotAllocated { index: handle.0 });
        }
        Ok(slot)
    }

    /// Find the slot already holding `name`, or claim the first free one.
    pub(crate) fn allocate(&self, name: &str) -> Result<Handle> {
        let _guard = self.alloc.lock().unwrap_or_else(PoisonError::into_inner);
        let mut free = None;
        for (index, slot) in self.slots.iter().enumerate() {
            let state = slot.lock();
            if state.allocated && state.name == name {
                return Ok(Handle(index));
            }
            if !state.allocated && free.is_none() {
                free = Some(index);
            }
        }
        let index = free.ok_or(Error::HandleExhausted {
            capacity: self.capacity(),
        })?;
        let mut state = self.slots[index].lock();
        state.allocated = true;
        state.name = name.to_string();
        state.generation += 1;
        debug!("Allocated handle #{index} for '{name}'");
        Ok(Handle(index))
    }

    /// Post a request on `handle` and wait for the worker to complete it.
    pub(crate) async fn request(&self, handle: Handle, op: Op, wake: &Notify) -> Result<Completion> {
        let slot = self.get(handle)?;
        let _turn = slot.gate.lock().await;
        self.post_and_wait(handle, slot, op, wake).await
    }

    /// Close `handle` and release its slot whatever the outcome.
    ///
    /// A slot that was never opened, is not streaming and has no request
    /// left over from an abandoned call is released without involving the
    /// worker. Otherwise the close queues behind whatever the worker is
    /// still doing for this slot.
    pub(crate) async fn close(&self, handle: Handle, wake: &Notify) -> Result<()> {
        let slot = self.get(handle)?;
        let _turn = slot.gate.lock().await;
        let needs_worker = {
            let state = slot.lock();
            state.open || state.stream.is_some() || state.busy()
        };
        let result = if needs_worker {
            self.post_and_wait(handle, slot, Op::Close, wake)
                .await
                .map(|_| ())
        } else {
            Ok(())
        };
        {
            let _guard = self.alloc.lock().unwrap_or_else(PoisonError::into_inner);
            slot.lock().release();
        }
        debug!("Released handle {handle}");
        result
    }

    async fn post_and_wait(
        &self,
        handle: Handle,
        slot: &Slot,
        op: Op,
        wake: &Notify,
    ) -> Result<Completion> {
        let seq = {
            let mut state = slot.lock();
            if !state.allocated {
                return Err(Error::HandleNotAllocated {
                    index: handle.index(),
                });
            }
            if self.stopped.load(Ordering::SeqCst) {
                return Err(Error::MediatorStopped);
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.result = None;
            state.pending = Some((seq, op));
            seq
        };
        wake.notify_one();
        loop {
            if let Some(result) = slot.take_result(seq) {
                return result;
            }
            slot.complete.notified().await;
        }
    }

    /// Fail every pending request and mark every slot closed.
    pub(crate) fn reset(&self, error: impl Fn(&str, &Op) -> Error) {
        for slot in self.slots() {
            let pending = {
                let mut state = slot.lock();
                state.open = false;
                state.in_flight = false;
                state
                    .pending
                    .take()
                    .map(|(seq, op)| (seq, error(&state.name, &op)))
            };
            if let Some((seq, err)) = pending {
                slot.complete(seq, Err(err));
            }
        }
    }

    /// Refuse all further requests and fail those still pending.
    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.reset(|_, _| Error::MediatorStopped);
    }
}
