//! Raw-pointer wrappers for buffer views handed to the kernel. Overlapped
//! submissions carry a pointer to the operation's backing storage across
//! threads: the submitting thread builds the entry, the reactor owns it while
//! pending, and a worker thread observes the completion. The pointee is the
//! heap block of a [crate::memory::Buffer] held by a primed closure, which
//! cannot be dropped or moved until the completion fires, so marking these
//! views `Send` is sound.

/// An immutable buffer view for outbound sends.
#[repr(transparent)]
pub struct SendPtr<T>(*const T);

impl<T> SendPtr<T> {
    /// # Safety
    /// The pointee must be heap storage that outlives every use of this view;
    /// here that is guaranteed by the primed closure owning the buffer until
    /// its completion has been delivered.
    pub unsafe fn new(ptr: *const T) -> SendPtr<T> {
        SendPtr(ptr)
    }

    pub fn as_ptr(&self) -> *const T {
        self.0
    }
}

// SAFETY: see module docs; the pointee is pinned-by-ownership for the life of
// the in-flight operation.
unsafe impl<T> Send for SendPtr<T> {}

/// A mutable buffer view for inbound receives.
#[repr(transparent)]
pub struct SendPtrMut<T>(*mut T);

impl<T> SendPtrMut<T> {
    /// # Safety
    /// Same contract as [SendPtr::new], plus exclusivity: nothing else may
    /// read or write the pointee until the operation completes. The
    /// one-outstanding-operation-per-direction invariant provides that.
    pub unsafe fn new(ptr: *mut T) -> SendPtrMut<T> {
        SendPtrMut(ptr)
    }

    pub fn as_ptr(&self) -> *mut T {
        self.0
    }
}

// SAFETY: see module docs.
unsafe impl<T> Send for SendPtrMut<T> {}
