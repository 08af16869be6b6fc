use std::sync::Mutex;

use crate::error::Result;
use crate::memory::Buffer;

pub(crate) type ReadCallback = Box<dyn FnOnce(Result<Buffer>) + Send + 'static>;
pub(crate) type WriteCallback = Box<dyn FnOnce(Result<()>) + Send + 'static>;

/// Context of an in-flight read: the buffer being filled, how much of it has
/// arrived so far, the fill level at which the read completes, and the
/// caller's callback.
pub(crate) struct PrimedRead {
    pub buf: Buffer,
    pub filled: usize,
    pub target_len: usize,
    pub cb: ReadCallback,
}

/// Context of an in-flight write: the payload, send progress, the chunk cap
/// applied to each submission, and stall bookkeeping for the zero-progress
/// bound.
pub(crate) struct PrimedWrite {
    pub buf: Buffer,
    pub sent: usize,
    pub chunk_cap: usize,
    pub stalls: u32,
    pub stall_limit: u32,
    pub cb: WriteCallback,
}

/// A permanent, re-armable continuation slot for one I/O direction. Two
/// states: idle (empty) and primed (holding the operation context). Priming
/// an already-primed slot violates the caller contract (the design relies
/// on at most one outstanding operation per direction) and panics.
///
/// The slot is allocated once per connection, not per operation, so repeated
/// reads and writes re-use it instead of churning the heap.
pub(crate) struct IoClosure<T> {
    slot: Mutex<Option<T>>,
    direction: &'static str,
}

impl<T> IoClosure<T> {
    pub fn new(direction: &'static str) -> IoClosure<T> {
        IoClosure {
            slot: Mutex::new(None),
            direction,
        }
    }

    /// Arm the slot with a new operation context.
    pub fn prime(&self, op: T) {
        let mut slot = self.lock();
        if slot.is_some() {
            panic!(
                "{} already in flight on this endpoint; one operation per direction",
                self.direction
            );
        }
        *slot = Some(op);
    }

    /// Disarm and return the operation context, leaving the slot idle and
    /// eligible for re-priming. Returns `None` if the slot was already idle.
    pub fn take(&self) -> Option<T> {
        self.lock().take()
    }

    pub fn is_primed(&self) -> bool {
        self.lock().is_some()
    }

    // Recover from poisoning: the slot is a plain `Option`, and the endpoint's
    // drop path still has to disarm it after a usage-error panic.
    fn lock(&self) -> std::sync::MutexGuard<'_, Option<T>> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
