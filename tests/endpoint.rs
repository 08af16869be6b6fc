//! Integration tests for the endpoint lifetime and completion contract,
//! driven through a scripted socket so every completion is delivered exactly
//! when the test decides.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use nix::libc;

use ringpoint::executor::Job;
use ringpoint::ptr::{SendPtr, SendPtrMut};
use ringpoint::{
    experiments, Buffer, CompletionTarget, Direction, Endpoint, EndpointConfig, Error, Executor,
    MemoryAllocator, MemoryQuota, ReadArgs, SocketHandle, ThreadPool, WriteArgs,
};

/// Serializes tests that force process-wide experiment flags.
static FLAG_LOCK: Mutex<()> = Mutex::new(());

/// Route crate logging into the test harness capture; swapping the
/// subscriber is how tests control (or silence) log output.
fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Runs completion jobs on the delivering thread. Deterministic for tests;
/// the endpoint contract only requires that delivery is not inline with
/// `read`/`write` themselves, which the mock guarantees by never completing
/// during `start_*`.
struct InlineExecutor;

impl Executor for InlineExecutor {
    fn run(&self, job: Job) {
        job()
    }
}

/// Parks completion jobs until the test releases them, so teardown can be
/// interleaved between an operation's completion and its re-arm.
#[derive(Clone, Default)]
struct DeferredExecutor(Arc<Mutex<VecDeque<Job>>>);

impl Executor for DeferredExecutor {
    fn run(&self, job: Job) {
        self.0.lock().unwrap().push_back(job);
    }
}

impl DeferredExecutor {
    fn run_all(&self) {
        loop {
            let job = self.0.lock().unwrap().pop_front();
            match job {
                Some(job) => job(),
                None => break,
            }
        }
    }
}

struct PendingOp {
    dir: Direction,
    read_buf: Option<SendPtrMut<u8>>,
    len: usize,
    target: Arc<dyn CompletionTarget>,
}

#[derive(Default)]
struct MockInner {
    pending: VecDeque<PendingOp>,
    shutdown_calls: usize,
    /// Payload snapshot of every write chunk the endpoint submitted.
    writes_seen: Vec<Vec<u8>>,
}

struct MockState {
    inner: Mutex<MockInner>,
    peer: SocketAddr,
    local: SocketAddr,
    /// When set, `shutdown` completes every pending op with `ECANCELED`,
    /// mimicking a socket layer whose cancel always wins the race.
    auto_cancel_on_shutdown: bool,
}

#[derive(Clone)]
struct MockSocket(Arc<MockState>);

impl MockSocket {
    fn new(auto_cancel_on_shutdown: bool) -> MockSocket {
        MockSocket(Arc::new(MockState {
            inner: Mutex::new(MockInner::default()),
            peer: "10.0.0.2:443".parse().unwrap(),
            local: "10.0.0.1:50000".parse().unwrap(),
            auto_cancel_on_shutdown,
        }))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.0.inner.lock().unwrap()
    }

    fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    fn shutdown_calls(&self) -> usize {
        self.lock().shutdown_calls
    }

    fn writes_seen(&self) -> Vec<Vec<u8>> {
        self.lock().writes_seen.clone()
    }

    fn pop(&self, dir: Direction) -> PendingOp {
        let op = self
            .lock()
            .pending
            .pop_front()
            .expect("no pending operation");
        assert_eq!(op.dir, dir, "pending operation direction mismatch");
        op
    }

    /// Complete the oldest pending read by copying `data` into its buffer.
    fn complete_read(&self, data: &[u8]) {
        let op = self.pop(Direction::Read);
        assert!(data.len() <= op.len, "scripted read larger than buffer");
        if !data.is_empty() {
            let dst = op.read_buf.as_ref().unwrap().as_ptr();
            unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len()) };
        }
        op.target.complete(Direction::Read, Ok(data.len()));
    }

    fn fail_read(&self, errno: i32) {
        let op = self.pop(Direction::Read);
        op.target
            .complete(Direction::Read, Err(io::Error::from_raw_os_error(errno)));
    }

    /// Complete the oldest pending write as having accepted `n` bytes.
    fn complete_write(&self, n: usize) {
        let op = self.pop(Direction::Write);
        assert!(n <= op.len, "scripted write larger than chunk");
        op.target.complete(Direction::Write, Ok(n));
    }

    fn cancel_all(&self) {
        let drained: Vec<PendingOp> = self.lock().pending.drain(..).collect();
        for op in drained {
            let dir = op.dir;
            op.target
                .complete(dir, Err(io::Error::from_raw_os_error(libc::ECANCELED)));
        }
    }
}

impl SocketHandle for MockSocket {
    fn start_read(&self, buf: SendPtrMut<u8>, len: usize, target: Arc<dyn CompletionTarget>) {
        self.lock().pending.push_back(PendingOp {
            dir: Direction::Read,
            read_buf: Some(buf),
            len,
            target,
        });
    }

    fn start_write(&self, buf: SendPtr<u8>, len: usize, target: Arc<dyn CompletionTarget>) {
        let snapshot = unsafe { std::slice::from_raw_parts(buf.as_ptr(), len) }.to_vec();
        let mut inner = self.lock();
        inner.writes_seen.push(snapshot);
        inner.pending.push_back(PendingOp {
            dir: Direction::Write,
            read_buf: None,
            len,
            target,
        });
    }

    fn shutdown(&self) {
        self.lock().shutdown_calls += 1;
        if self.auto_cancel() {
            self.cancel_all();
        }
    }

    fn peer_addr(&self) -> SocketAddr {
        self.0.peer
    }

    fn local_addr(&self) -> SocketAddr {
        self.0.local
    }
}

impl MockSocket {
    fn auto_cancel(&self) -> bool {
        self.0.auto_cancel_on_shutdown
    }
}

fn endpoint_with(
    mock: &MockSocket,
    config: EndpointConfig,
    executor: Arc<dyn Executor>,
) -> (Endpoint, Arc<MemoryQuota>) {
    let quota = MemoryQuota::new(64 * 1024 * 1024);
    let endpoint = Endpoint::new(
        Box::new(mock.clone()),
        MemoryAllocator::new(quota.clone()),
        config,
        executor,
    );
    (endpoint, quota)
}

fn inline_endpoint(mock: &MockSocket) -> (Endpoint, Arc<MemoryQuota>) {
    endpoint_with(mock, EndpointConfig::default(), Arc::new(InlineExecutor))
}

#[test]
fn addresses_come_from_the_socket() {
    let mock = MockSocket::new(false);
    let (endpoint, _quota) = inline_endpoint(&mock);
    assert_eq!(endpoint.peer_addr(), "10.0.0.2:443".parse().unwrap());
    assert_eq!(endpoint.local_addr(), "10.0.0.1:50000".parse().unwrap());
}

#[test]
fn alternating_reads_and_writes_fire_once_in_order() {
    init_logging();
    let mock = MockSocket::new(false);
    let (endpoint, quota) = inline_endpoint(&mock);

    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    for round in 0..3 {
        let log_read = log.clone();
        endpoint
            .read(Buffer::with_capacity(0), &ReadArgs::default(), move |res| {
                let buf = res.unwrap();
                log_read
                    .lock()
                    .unwrap()
                    .push(format!("r{round}:{}", buf.len()));
            })
            .unwrap();
        mock.complete_read(b"abc");

        let log_write = log.clone();
        endpoint
            .write(
                Buffer::from_vec(vec![round as u8; 4]),
                &WriteArgs::default(),
                move |res| {
                    res.unwrap();
                    log_write.lock().unwrap().push(format!("w{round}"));
                },
            )
            .unwrap();
        mock.complete_write(4);
    }

    drop(endpoint);
    let got = log.lock().unwrap().clone();
    assert_eq!(got, vec!["r0:3", "w0", "r1:3", "w1", "r2:3", "w2"]);
    assert_eq!(quota.used(), 0, "read buffers must return their quota");
}

#[test]
fn drop_with_write_outstanding_still_completes_exactly_once() {
    let mock = MockSocket::new(false);
    let (endpoint, _quota) = inline_endpoint(&mock);

    let fired = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = channel();
    let fired_cb = fired.clone();
    endpoint
        .write(
            Buffer::from_vec(vec![1u8; 8]),
            &WriteArgs::default(),
            move |res| {
                fired_cb.fetch_add(1, Ordering::SeqCst);
                tx.send(res).unwrap();
            },
        )
        .unwrap();

    drop(endpoint);
    assert_eq!(mock.shutdown_calls(), 1);

    // The pending operation's share keeps the io state, and with it the
    // boxed socket handle, alive after the endpoint is gone.
    assert_eq!(Arc::strong_count(&mock.0), 2);

    mock.cancel_all();
    let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    // Callback delivered: the anchor has been released and the socket handle
    // dropped with it.
    assert_eq!(Arc::strong_count(&mock.0), 1);
}

#[test]
fn drop_without_outstanding_io_skips_cancellation() {
    let mock = MockSocket::new(false);
    let (endpoint, _quota) = inline_endpoint(&mock);
    drop(endpoint);
    assert_eq!(mock.shutdown_calls(), 0);
    assert_eq!(Arc::strong_count(&mock.0), 1);
}

#[test]
fn zero_byte_read_after_successful_read_is_orderly_close() {
    let mock = MockSocket::new(false);
    let (endpoint, _quota) = inline_endpoint(&mock);

    let (tx, rx) = channel();
    let tx2 = tx.clone();
    endpoint
        .read(Buffer::with_capacity(0), &ReadArgs::default(), move |res| {
            tx2.send(res.map(|b| b.len())).unwrap();
        })
        .unwrap();
    mock.complete_read(b"payload");
    assert_eq!(rx.try_recv().unwrap().unwrap(), 7);

    endpoint
        .read(Buffer::with_capacity(0), &ReadArgs::default(), move |res| {
            tx.send(res.map(|b| b.len())).unwrap();
        })
        .unwrap();
    mock.complete_read(b"");
    let result = rx.try_recv().unwrap();
    assert_eq!(result.unwrap(), 0, "orderly close is success with 0 bytes");
}

#[test]
fn transport_errors_surface_as_failures() {
    let mock = MockSocket::new(false);
    let (endpoint, quota) = inline_endpoint(&mock);

    let (tx, rx) = channel();
    endpoint
        .read(Buffer::with_capacity(0), &ReadArgs::default(), move |res| {
            tx.send(res.map(|b| b.len())).unwrap();
        })
        .unwrap();
    mock.fail_read(libc::ECONNRESET);

    let result = rx.try_recv().unwrap();
    assert!(matches!(result, Err(Error::Io(_))));
    assert_eq!(quota.used(), 0, "failed read must release its buffer");
}

#[test]
fn frame_size_estimation_accumulates_until_hint_is_met() {
    let _guard = FLAG_LOCK.lock().unwrap();
    experiments::force_set(experiments::FRAME_SIZE_ESTIMATION, true);

    let mock = MockSocket::new(false);
    let (endpoint, _quota) = inline_endpoint(&mock);

    let (tx, rx) = channel();
    let args = ReadArgs {
        frame_size_hint: Some(8),
    };
    endpoint
        .read(Buffer::with_capacity(0), &args, move |res| {
            tx.send(res).unwrap();
        })
        .unwrap();

    mock.complete_read(b"abcd");
    assert!(rx.try_recv().is_err(), "read must not complete below the hint");
    assert_eq!(mock.pending_count(), 1, "short read re-arms the receive");

    mock.complete_read(b"efgh");
    let buf = rx.try_recv().unwrap().unwrap();
    assert_eq!(buf.as_slice(), b"abcdefgh");
}

#[test]
fn without_estimation_any_bytes_complete_the_read() {
    let _guard = FLAG_LOCK.lock().unwrap();
    experiments::force_set(experiments::FRAME_SIZE_ESTIMATION, false);

    let mock = MockSocket::new(false);
    let (endpoint, _quota) = inline_endpoint(&mock);

    let (tx, rx) = channel();
    let args = ReadArgs {
        frame_size_hint: Some(1024),
    };
    endpoint
        .read(Buffer::with_capacity(0), &args, move |res| {
            tx.send(res).unwrap();
        })
        .unwrap();

    mock.complete_read(b"x");
    let buf = rx.try_recv().unwrap().unwrap();
    assert_eq!(buf.len(), 1, "hint must be ignored while the flag is off");
}

#[test]
fn low_watermark_delays_completion() {
    let _guard = FLAG_LOCK.lock().unwrap();
    experiments::force_set(experiments::FRAME_SIZE_ESTIMATION, false);
    experiments::force_set(experiments::READ_LOW_WATERMARK, true);

    let mock = MockSocket::new(false);
    let config = EndpointConfig {
        read_low_watermark: 8,
        ..EndpointConfig::default()
    };
    let (endpoint, _quota) = endpoint_with(&mock, config, Arc::new(InlineExecutor));

    let (tx, rx) = channel();
    endpoint
        .read(Buffer::with_capacity(0), &ReadArgs::default(), move |res| {
            tx.send(res).unwrap();
        })
        .unwrap();

    mock.complete_read(b"1234");
    assert!(rx.try_recv().is_err());
    mock.complete_read(b"5678");
    let buf = rx.try_recv().unwrap().unwrap();
    assert_eq!(buf.as_slice(), b"12345678");

    experiments::force_set(experiments::READ_LOW_WATERMARK, false);
}

#[test]
fn repriming_observes_no_stale_state() {
    let mock = MockSocket::new(false);
    let config = EndpointConfig {
        default_read_size: 16,
        ..EndpointConfig::default()
    };
    let (endpoint, _quota) = endpoint_with(&mock, config, Arc::new(InlineExecutor));

    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = channel::<Buffer>();

    let calls1 = calls.clone();
    let tx1 = tx.clone();
    endpoint
        .read(Buffer::with_capacity(0), &ReadArgs::default(), move |res| {
            calls1.fetch_add(1, Ordering::SeqCst);
            tx1.send(res.unwrap()).unwrap();
        })
        .unwrap();
    mock.complete_read(b"first");
    assert_eq!(rx.try_recv().unwrap().as_slice(), b"first");

    // Second, independent read with a sentinel-filled caller buffer: it must
    // see only the new operation's bytes and callback.
    let calls2 = calls.clone();
    endpoint
        .read(Buffer::from_vec(vec![0xAA; 64]), &ReadArgs::default(), move |res| {
            calls2.fetch_add(1, Ordering::SeqCst);
            tx.send(res.unwrap()).unwrap();
        })
        .unwrap();
    mock.complete_read(b"second");

    let buf = rx.try_recv().unwrap();
    assert_eq!(buf.as_slice(), b"second");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn partial_writes_are_continued_internally() {
    let mock = MockSocket::new(false);
    let (endpoint, _quota) = inline_endpoint(&mock);

    let payload: Vec<u8> = (0u8..10).collect();
    let (tx, rx) = channel();
    endpoint
        .write(Buffer::from_vec(payload.clone()), &WriteArgs::default(), move |res| {
            tx.send(res).unwrap();
        })
        .unwrap();

    mock.complete_write(4);
    assert!(rx.try_recv().is_err(), "callback must wait for the tail");
    mock.complete_write(6);
    rx.try_recv().unwrap().unwrap();

    let chunks = mock.writes_seen();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0], payload);
    assert_eq!(chunks[1], payload[4..]);
}

#[test]
fn stalled_writes_fail_after_the_configured_limit() {
    let mock = MockSocket::new(false);
    let config = EndpointConfig {
        stalled_write_limit: 2,
        ..EndpointConfig::default()
    };
    let (endpoint, _quota) = endpoint_with(&mock, config, Arc::new(InlineExecutor));

    let (tx, rx) = channel();
    endpoint
        .write(Buffer::from_vec(vec![7u8; 16]), &WriteArgs::default(), move |res| {
            tx.send(res).unwrap();
        })
        .unwrap();

    mock.complete_write(0);
    assert!(rx.try_recv().is_err(), "one stall is retried");
    mock.complete_write(0);

    let result = rx.try_recv().unwrap();
    match result {
        Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::WriteZero),
        other => panic!("expected WriteZero transport error, got {other:?}"),
    }
}

#[test]
fn peer_framing_caps_outbound_chunks() {
    let _guard = FLAG_LOCK.lock().unwrap();
    experiments::force_set(experiments::PEER_FRAMING, true);

    let mock = MockSocket::new(false);
    let (endpoint, _quota) = inline_endpoint(&mock);
    endpoint.record_peer_frame_size(4);

    let payload: Vec<u8> = (0u8..10).collect();
    let (tx, rx) = channel();
    endpoint
        .write(Buffer::from_vec(payload.clone()), &WriteArgs::default(), move |res| {
            tx.send(res).unwrap();
        })
        .unwrap();

    mock.complete_write(4);
    mock.complete_write(4);
    mock.complete_write(2);
    rx.try_recv().unwrap().unwrap();

    let chunks = mock.writes_seen();
    let lens: Vec<usize> = chunks.iter().map(Vec::len).collect();
    assert_eq!(lens, vec![4, 4, 2]);
    assert_eq!(chunks[2], payload[8..]);

    experiments::force_set(experiments::PEER_FRAMING, false);
}

#[test]
#[should_panic(expected = "read already in flight")]
fn second_concurrent_read_is_a_usage_error() {
    let mock = MockSocket::new(false);
    let (endpoint, _quota) = inline_endpoint(&mock);

    endpoint
        .read(Buffer::with_capacity(0), &ReadArgs::default(), |_| {})
        .unwrap();
    // First read is still pending; this violates the one-per-direction rule.
    let _ = endpoint.read(Buffer::with_capacity(0), &ReadArgs::default(), |_| {});
}

#[test]
fn empty_writes_are_rejected_without_arming() {
    let mock = MockSocket::new(false);
    let (endpoint, _quota) = inline_endpoint(&mock);
    let err = endpoint
        .write(Buffer::from_vec(Vec::new()), &WriteArgs::default(), |_| {
            panic!("callback must not fire for a rejected write");
        })
        .unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert_eq!(mock.pending_count(), 0);
}

#[test]
fn concurrent_completion_and_drop_deliver_exactly_once() {
    init_logging();
    let pool = ThreadPool::builder()
        .pool_size(2)
        .name_prefix("endpoint-test-")
        .create()
        .unwrap();

    for _ in 0..32 {
        let mock = MockSocket::new(false);
        let (endpoint, _quota) =
            endpoint_with(&mock, EndpointConfig::default(), Arc::new(pool.clone()));

        let fired = Arc::new(AtomicUsize::new(0));
        let (tx, rx): (Sender<ringpoint::Result<Buffer>>, _) = channel();
        let fired_cb = fired.clone();
        endpoint
            .read(Buffer::with_capacity(0), &ReadArgs::default(), move |res| {
                fired_cb.fetch_add(1, Ordering::SeqCst);
                tx.send(res).unwrap();
            })
            .unwrap();

        // Fire the completion from one thread while the owner drops the
        // endpoint on another.
        let completer = {
            let mock = mock.clone();
            thread::spawn(move || mock.complete_read(b"data"))
        };
        drop(endpoint);
        completer.join().unwrap();

        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        match result {
            Ok(buf) => assert_eq!(buf.as_slice(), b"data"),
            Err(Error::Cancelled) => {}
            Err(other) => panic!("unexpected completion result: {other:?}"),
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // The anchor must not be freed until the callback has returned;
        // once it has, the socket handle clone is released.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while Arc::strong_count(&mock.0) > 1 {
            assert!(std::time::Instant::now() < deadline, "io state leaked");
            thread::sleep(Duration::from_millis(1));
        }
    }
}

#[test]
fn teardown_during_accumulating_read_still_fires_the_callback() {
    let _guard = FLAG_LOCK.lock().unwrap();
    experiments::force_set(experiments::FRAME_SIZE_ESTIMATION, true);

    let mock = MockSocket::new(false);
    let deferred = DeferredExecutor::default();
    let (endpoint, quota) =
        endpoint_with(&mock, EndpointConfig::default(), Arc::new(deferred.clone()));

    let (tx, rx) = channel();
    let args = ReadArgs {
        frame_size_hint: Some(8),
    };
    endpoint
        .read(Buffer::with_capacity(0), &args, move |res| {
            tx.send(res).unwrap();
        })
        .unwrap();

    // Half the frame arrives; the fire-and-re-arm job is parked on the
    // executor when the owner drops the endpoint.
    mock.complete_read(b"abcd");
    drop(endpoint);
    assert_eq!(mock.shutdown_calls(), 1);

    deferred.run_all();
    let result = rx.try_recv().unwrap();
    assert!(matches!(result, Err(Error::Closed)));
    assert_eq!(
        mock.pending_count(),
        0,
        "no receive may be re-armed after teardown"
    );
    assert_eq!(quota.used(), 0, "the abandoned buffer must return its quota");
}

#[test]
fn teardown_during_partial_write_continuation_still_fires_the_callback() {
    let mock = MockSocket::new(false);
    let deferred = DeferredExecutor::default();
    let (endpoint, _quota) =
        endpoint_with(&mock, EndpointConfig::default(), Arc::new(deferred.clone()));

    let fired = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = channel();
    let fired_cb = fired.clone();
    endpoint
        .write(
            Buffer::from_vec(vec![3u8; 10]),
            &WriteArgs::default(),
            move |res| {
                fired_cb.fetch_add(1, Ordering::SeqCst);
                tx.send(res).unwrap();
            },
        )
        .unwrap();

    mock.complete_write(4);
    drop(endpoint);

    deferred.run_all();
    let result = rx.try_recv().unwrap();
    assert!(matches!(result, Err(Error::Closed)));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(mock.pending_count(), 0);

    // The parked job's share was the last one; the anchor and the boxed
    // socket handle are gone with it.
    assert_eq!(Arc::strong_count(&mock.0), 1);
}

#[test]
fn cancel_wins_when_socket_layer_aborts_everything() {
    let mock = MockSocket::new(true);
    let (endpoint, _quota) = inline_endpoint(&mock);

    let (tx, rx) = channel();
    endpoint
        .write(Buffer::from_vec(vec![9u8; 32]), &WriteArgs::default(), move |res| {
            tx.send(res).unwrap();
        })
        .unwrap();

    // Auto-cancelling mock: teardown synchronously aborts the pending write.
    drop(endpoint);

    let result = rx.try_recv().unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));
}
