use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Mutex;
use std::thread;

use io_uring::types::{CancelBuilder, SubmitArgs, Timespec};
use io_uring::{opcode, squeue, types, IoUring};
use nix::libc;
use slab::Slab;
use tracing::{error, trace};

use crate::error::{Error, Result};

use super::UringOp;

/// user_data attached to async-cancel entries, which carry no in-flight
/// state of their own. Slab indices stay well below this.
const CANCEL_TOKEN: u64 = u64::MAX;

enum Submission {
    Op(Box<dyn UringOp>),
    CancelFd(RawFd),
}

/// The submission side of the reactor. Cloneable and usable from any thread;
/// the reactor picks new submissions up within its submit timeout.
pub struct DriverHandle {
    tx: Mutex<Sender<Submission>>,
}

impl DriverHandle {
    pub(crate) fn submit(&self, op: Box<dyn UringOp>) {
        self.send(Submission::Op(op));
    }

    /// Request async cancellation of every pending operation on `fd`.
    /// Best-effort: operations already past the point of no return complete
    /// with their real result instead.
    pub(crate) fn cancel_fd(&self, fd: RawFd) {
        self.send(Submission::CancelFd(fd));
    }

    fn send(&self, submission: Submission) {
        self.tx
            .lock()
            .expect("driver submission lock poisoned")
            .send(submission)
            .expect("driver reactor thread gone");
    }
}

impl Clone for DriverHandle {
    fn clone(&self) -> Self {
        DriverHandle {
            tx: Mutex::new(
                self.tx
                    .lock()
                    .expect("driver submission lock poisoned")
                    .clone(),
            ),
        }
    }
}

/// The reactor: owns the ring, the in-flight operation table, and a local
/// backlog for entries that did not fit the submission queue.
pub struct Driver {
    ring: IoUring,
    rx: Receiver<Submission>,
    inflight: Slab<Box<dyn UringOp>>,
    backlog: VecDeque<squeue::Entry>,
    submit_timeout: Timespec,
}

impl Driver {
    /// Spawn the reactor thread and return the handle used to feed it. The
    /// thread runs for the life of the process; see [super::statics].
    pub(crate) fn start(entries: u32) -> DriverHandle {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("ringpoint-reactor".into())
            .spawn(move || {
                let mut driver = Driver::new(entries, rx).expect("failed to set up io_uring");
                loop {
                    if let Err(e) = driver.turn() {
                        error!(error = %e, "completion ring turn failed");
                    }
                }
            })
            .expect("failed to spawn reactor thread");
        DriverHandle { tx: Mutex::new(tx) }
    }

    fn new(entries: u32, rx: Receiver<Submission>) -> Result<Driver> {
        let ring = IoUring::builder().build(entries)?;
        Ok(Driver {
            ring,
            rx,
            inflight: Slab::with_capacity(1024),
            backlog: VecDeque::with_capacity(1024),
            submit_timeout: Timespec::new().nsec(100_000_000),
        })
    }

    /// One reactor iteration: take on new submissions, wait for the ring,
    /// then dispatch whatever completed.
    fn turn(&mut self) -> Result<()> {
        self.drain_submissions();

        let args = SubmitArgs::new().timespec(&self.submit_timeout);
        match self.ring.submitter().submit_with_args(1, &args) {
            Ok(_) => {}
            Err(e) => match e.raw_os_error() {
                Some(libc::EBUSY) | Some(libc::ETIME) => {}
                _ => return Err(Error::from(e)),
            },
        }

        self.flush_backlog()?;
        self.reap();
        Ok(())
    }

    fn drain_submissions(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(Submission::Op(mut op)) => {
                    let entry = op.entry();
                    let index = self.inflight.insert(op);
                    trace!(index, "arming overlapped operation");
                    self.push(entry.user_data(index as u64));
                }
                Ok(Submission::CancelFd(fd)) => {
                    let spec = CancelBuilder::fd(types::Fd(fd)).all();
                    self.push(opcode::AsyncCancel2::new(spec).build().user_data(CANCEL_TOKEN));
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    /// Push onto the submission queue, falling back to the local backlog when
    /// the queue is full; [Driver::flush_backlog] retries those.
    fn push(&mut self, entry: squeue::Entry) {
        unsafe {
            if self.ring.submission().push(&entry).is_err() {
                self.backlog.push_back(entry);
            }
        }
    }

    fn flush_backlog(&mut self) -> Result<()> {
        let (submitter, mut sq, _) = self.ring.split();
        loop {
            if sq.is_full() {
                match submitter.submit() {
                    Ok(_) => (),
                    Err(ref err) if err.raw_os_error() == Some(libc::EBUSY) => break,
                    Err(err) => return Err(err.into()),
                }
            }
            sq.sync();

            match self.backlog.pop_front() {
                Some(entry) => unsafe {
                    let _ = sq.push(&entry);
                },
                None => break,
            }
        }
        Ok(())
    }

    fn reap(&mut self) {
        let mut cq = self.ring.completion();
        cq.sync();
        let completed: Vec<(u64, i32)> = cq.map(|cqe| (cqe.user_data(), cqe.result())).collect();

        for (user_data, result) in completed {
            if user_data == CANCEL_TOKEN {
                // Result of the cancel request itself; ENOENT just means the
                // target had already completed.
                continue;
            }
            match self.inflight.try_remove(user_data as usize) {
                Some(op) => {
                    trace!(index = user_data, result, "overlapped operation completed");
                    op.complete(result);
                }
                None => error!(index = user_data, "completion for unknown operation"),
            }
        }
    }
}
