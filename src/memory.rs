//! Quota-tracked buffer allocation. An endpoint never allocates receive
//! storage directly; it asks its [MemoryAllocator], which draws against a
//! shared [MemoryQuota] and hands out [Buffer]s that return their reservation
//! when dropped. Sizing hints come from the frame-size-estimation experiment
//! when enabled, otherwise from the endpoint's configured default.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::experiments;

/// Quota pressure above which pressure-aware allocation starts shrinking
/// grants instead of waiting for outright exhaustion.
const PRESSURE_SHRINK_THRESHOLD: f64 = 0.75;

/// Smallest grant pressure-aware shrinking will produce.
const MIN_GRANT: usize = 512;

/// A shared ceiling on outstanding buffer memory, updated atomically since
/// reservations and releases race across endpoint and executor threads.
pub struct MemoryQuota {
    limit: usize,
    used: AtomicUsize,
}

impl MemoryQuota {
    pub fn new(limit: usize) -> Arc<MemoryQuota> {
        Arc::new(MemoryQuota {
            limit,
            used: AtomicUsize::new(0),
        })
    }

    /// Reserve up to `want` bytes, clamping to what remains under the limit.
    /// Fails only when nothing at all is available.
    fn reserve(&self, want: usize) -> Result<usize> {
        let mut used = self.used.load(Ordering::Relaxed);
        loop {
            let available = self.limit.saturating_sub(used);
            let grant = want.min(available);
            if grant == 0 {
                return Err(Error::QuotaExhausted { requested: want });
            }
            match self.used.compare_exchange_weak(
                used,
                used + grant,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(grant),
                Err(actual) => used = actual,
            }
        }
    }

    fn release(&self, amount: usize) {
        self.used.fetch_sub(amount, Ordering::AcqRel);
    }

    /// Fraction of the quota currently reserved, in `0.0..=1.0`.
    pub fn pressure(&self) -> f64 {
        if self.limit == 0 {
            return 1.0;
        }
        self.used.load(Ordering::Relaxed) as f64 / self.limit as f64
    }

    /// Bytes currently reserved.
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }
}

/// A cloneable handle through which endpoints draw buffer quota.
#[derive(Clone)]
pub struct MemoryAllocator {
    quota: Arc<MemoryQuota>,
}

impl MemoryAllocator {
    pub fn new(quota: Arc<MemoryQuota>) -> MemoryAllocator {
        MemoryAllocator { quota }
    }

    /// Allocate a buffer of roughly `size_hint` bytes. The grant may be
    /// smaller than the hint when quota is short or, with the
    /// pressure-aware experiment enabled, when pressure is already high.
    pub fn allocate(&self, size_hint: usize) -> Result<Buffer> {
        let want = scaled_hint(
            size_hint,
            self.quota.pressure(),
            experiments::is_enabled(experiments::PRESSURE_AWARE_ALLOCATION),
        );
        let granted = self.quota.reserve(want)?;
        Ok(Buffer {
            data: vec![0u8; granted],
            len: 0,
            quota: Some(self.quota.clone()),
        })
    }
}

/// Shrink an allocation hint under memory pressure. Pure so the policy is
/// testable without touching the global experiment registry.
fn scaled_hint(hint: usize, pressure: f64, pressure_aware: bool) -> usize {
    if !pressure_aware || pressure < PRESSURE_SHRINK_THRESHOLD {
        return hint.max(1);
    }
    // Linear falloff: at the threshold the full hint, at full pressure the floor.
    let span = 1.0 - PRESSURE_SHRINK_THRESHOLD;
    let over = ((pressure - PRESSURE_SHRINK_THRESHOLD) / span).min(1.0);
    let scaled = (hint as f64 * (1.0 - over)) as usize;
    scaled.clamp(MIN_GRANT.min(hint.max(1)), hint.max(1))
}

/// An owned byte buffer with separate capacity (allocated storage) and filled
/// length. Receive buffers are filled by the kernel through a raw pointer
/// while a [Buffer] sits primed inside an I/O closure, which is what keeps
/// the storage alive for the duration of the operation.
pub struct Buffer {
    data: Vec<u8>,
    len: usize,
    quota: Option<Arc<MemoryQuota>>,
}

impl Buffer {
    /// Wrap an existing payload, e.g. outbound data produced by the protocol
    /// layer. Unquota'd: the caller already accounted for it.
    pub fn from_vec(data: Vec<u8>) -> Buffer {
        let len = data.len();
        Buffer {
            data,
            len,
            quota: None,
        }
    }

    /// Unquota'd zeroed buffer. Primarily useful in tests.
    pub fn with_capacity(capacity: usize) -> Buffer {
        Buffer {
            data: vec![0u8; capacity],
            len: 0,
            quota: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The filled portion.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub(crate) fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.data.len());
        self.len = len;
    }

    /// Pointer to the filled data at `offset`, for outbound sends.
    pub(crate) fn ptr_at(&self, offset: usize) -> *const u8 {
        debug_assert!(offset <= self.len);
        self.data[offset..].as_ptr()
    }

    /// Mutable pointer to the storage at `offset`, for inbound receives. The
    /// heap block never moves while the buffer is owned by a primed closure,
    /// so the pointer stays valid for the life of the operation.
    pub(crate) fn spare_ptr(&mut self, offset: usize) -> *mut u8 {
        debug_assert!(offset < self.data.len());
        self.data[offset..].as_mut_ptr()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(quota) = self.quota.take() {
            quota.release(self.data.len());
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len)
            .field("quota", &self.quota.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_and_release_balance() {
        let quota = MemoryQuota::new(1024);
        let allocator = MemoryAllocator::new(quota.clone());
        let buf = allocator.allocate(256).unwrap();
        assert_eq!(buf.capacity(), 256);
        assert_eq!(quota.used(), 256);
        drop(buf);
        assert_eq!(quota.used(), 0);
    }

    #[test]
    fn grants_clamp_to_remaining_quota() {
        let quota = MemoryQuota::new(300);
        let allocator = MemoryAllocator::new(quota.clone());
        let first = allocator.allocate(256).unwrap();
        let second = allocator.allocate(256).unwrap();
        assert_eq!(second.capacity(), 44);
        drop(first);
        drop(second);
        assert_eq!(quota.used(), 0);
    }

    #[test]
    fn exhausted_quota_is_an_error() {
        let quota = MemoryQuota::new(64);
        let allocator = MemoryAllocator::new(quota);
        let _held = allocator.allocate(64).unwrap();
        let err = allocator.allocate(1).unwrap_err();
        assert!(matches!(err, Error::QuotaExhausted { requested: 1 }));
    }

    #[test]
    fn pressure_scaling_shrinks_hints() {
        assert_eq!(scaled_hint(8192, 0.0, true), 8192);
        assert_eq!(scaled_hint(8192, 0.5, false), 8192);
        let squeezed = scaled_hint(8192, 0.9, true);
        assert!(squeezed < 8192);
        assert!(squeezed >= MIN_GRANT);
        assert_eq!(scaled_hint(8192, 1.0, true), MIN_GRANT);
    }

    #[test]
    fn buffer_tracks_filled_length() {
        let mut buf = Buffer::with_capacity(16);
        assert!(buf.is_empty());
        buf.set_len(4);
        assert_eq!(buf.as_slice().len(), 4);
    }
}
