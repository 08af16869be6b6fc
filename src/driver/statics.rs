use lazy_static::lazy_static;

use super::{Driver, DriverHandle};

/// Submission-queue depth for the process-wide ring.
const RING_ENTRIES: u32 = 4096;

lazy_static! {
    static ref DRIVER: DriverHandle = Driver::start(RING_ENTRIES);
}

/// The process-wide completion ring handle. The reactor thread is spawned on
/// first use and lives for the remainder of the process.
pub fn handle() -> &'static DriverHandle {
    &DRIVER
}
