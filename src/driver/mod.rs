//! The [crate::driver] module is the crate's view of the platform completion
//! ring. It distills the `io_uring` interaction down to two pieces:
//! - The [UringOp] trait, implemented per operation kind, which builds the
//!   submission entry and consumes the raw completion result.
//! - The [Driver], a reactor thread that owns the [io_uring::IoUring],
//!   tracks in-flight operations, and dispatches their completions.
//!
//! The reactor never learns about endpoints: each operation carries an
//! `Arc<dyn CompletionTarget>` (see [crate::socket]) and delivery goes
//! through that seam. Submissions arrive over a channel via the cloneable
//! [DriverHandle], exposed process-wide through [handle].

mod ring;
mod statics;

pub use ring::{Driver, DriverHandle};
pub use statics::handle;

use io_uring::squeue;

/// A single-shot unit of work submitted to the completion ring.
pub(crate) trait UringOp: Send {
    /// Build the submission entry. Called once, before the op is inserted
    /// into the in-flight table; `user_data` is attached by the driver.
    fn entry(&mut self) -> squeue::Entry;

    /// Consume the op with the raw cqe result (negative errno on failure).
    fn complete(self: Box<Self>, result: i32);
}
