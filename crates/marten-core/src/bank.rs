use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::device::Device;
use crate::dtype::Scalar;
use crate::error::{Error, Result};

// MemoryBank — Process-wide caching allocator for tensor buffers
//
// Avoids repeated allocator round-trips by maintaining per-device, per-size
// free lists of released buffers. When a SyncMemory is dropped its buffers
// are not freed; they are deposited here and handed back to future
// allocations of the same device and element count.
//
// Concurrency: one mutex guards the host free list and one guards the
// accelerator/fake free lists, so host-side recycling never contends with
// device-side recycling. Counters are atomics and stay off the lock.
//
// Buffers handed out by `allocate` have unspecified contents (either fresh
// zeroed memory or whatever the previous owner left behind); SyncMemory's
// clear-on-allocation flag decides whether they are zeroed before first use.

/// Snapshot of a bank's allocation statistics.
#[derive(Debug, Clone, Copy)]
pub struct BankStats {
    /// Number of buffers currently cached (not in use by any tensor).
    pub cached_buffers: usize,
    /// Total elements held in cached buffers.
    pub cached_elems: usize,
    /// Cumulative allocations that fell through to the system allocator.
    pub num_allocations: u64,
    /// Cumulative allocations served from the cache.
    pub hits: u64,
}

/// A per-element-type free list keyed by `(device, element count)`.
pub struct MemoryBank<R> {
    host: Mutex<HashMap<usize, Vec<Vec<R>>>>,
    device: Mutex<HashMap<(Device, usize), Vec<Vec<R>>>>,
    num_allocations: AtomicU64,
    hits: AtomicU64,
}

impl<R: Scalar> MemoryBank<R> {
    pub fn new() -> Self {
        MemoryBank {
            host: Mutex::new(HashMap::new()),
            device: Mutex::new(HashMap::new()),
            num_allocations: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    /// Hand out a buffer of exactly `total_elems` elements on `device`,
    /// reusing a cached buffer when one is available.
    ///
    /// `inner_dim` is the trailing dimension of the tensor this buffer backs;
    /// it must evenly divide `total_elems` (the bank's bookkeeping invariant,
    /// checked here so corrupt sizes surface at the allocation site).
    pub fn allocate(&self, device: Device, total_elems: usize, inner_dim: usize) -> Result<Vec<R>> {
        if inner_dim == 0 || total_elems % inner_dim != 0 {
            return Err(Error::InvariantViolated(format!(
                "buffer of {} elements is not divisible into rows of {}",
                total_elems, inner_dim
            )));
        }
        if !device.is_available() {
            return Err(Error::DeviceUnavailable { device });
        }

        let cached = if device.is_host() {
            let mut map = self.host.lock().expect("memory bank poisoned");
            map.get_mut(&total_elems).and_then(|stack| stack.pop())
        } else {
            let mut map = self.device.lock().expect("memory bank poisoned");
            map.get_mut(&(device, total_elems)).and_then(|stack| stack.pop())
        };

        if let Some(buf) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(buf);
        }

        self.num_allocations.fetch_add(1, Ordering::Relaxed);
        let mut buf = Vec::new();
        if buf.try_reserve_exact(total_elems).is_err() {
            return Err(Error::AllocationFailed {
                device,
                bytes: total_elems * std::mem::size_of::<R>(),
            });
        }
        buf.resize(total_elems, R::zero());
        Ok(buf)
    }

    /// Return a released buffer to the free list for its device and size.
    pub fn deposit(&self, device: Device, buf: Vec<R>) {
        let n = buf.len();
        if n == 0 {
            return;
        }
        if device.is_host() {
            let mut map = self.host.lock().expect("memory bank poisoned");
            map.entry(n).or_default().push(buf);
        } else {
            let mut map = self.device.lock().expect("memory bank poisoned");
            map.entry((device, n)).or_default().push(buf);
        }
    }

    /// Drop every cached buffer, returning memory to the system allocator.
    pub fn empty_cache(&self) {
        self.host.lock().expect("memory bank poisoned").clear();
        self.device.lock().expect("memory bank poisoned").clear();
    }

    /// Snapshot of the bank's counters and cache occupancy.
    pub fn stats(&self) -> BankStats {
        let mut cached_buffers = 0;
        let mut cached_elems = 0;
        {
            let map = self.host.lock().expect("memory bank poisoned");
            for (n, stack) in map.iter() {
                cached_buffers += stack.len();
                cached_elems += n * stack.len();
            }
        }
        {
            let map = self.device.lock().expect("memory bank poisoned");
            for ((_, n), stack) in map.iter() {
                cached_buffers += stack.len();
                cached_elems += n * stack.len();
            }
        }
        BankStats {
            cached_buffers,
            cached_elems,
            num_allocations: self.num_allocations.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
        }
    }
}

impl<R: Scalar> Default for MemoryBank<R> {
    fn default() -> Self {
        Self::new()
    }
}

// Per-type global instances. Rust has no generic statics, so each supported
// scalar gets its own slot; `Scalar::bank()` routes to the right one.

static BANK_F32: OnceLock<MemoryBank<f32>> = OnceLock::new();
static BANK_F64: OnceLock<MemoryBank<f64>> = OnceLock::new();
static BANK_I32: OnceLock<MemoryBank<i32>> = OnceLock::new();

pub fn bank_f32() -> &'static MemoryBank<f32> {
    BANK_F32.get_or_init(MemoryBank::new)
}

pub fn bank_f64() -> &'static MemoryBank<f64> {
    BANK_F64.get_or_init(MemoryBank::new)
}

pub fn bank_i32() -> &'static MemoryBank<i32> {
    BANK_I32.get_or_init(MemoryBank::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recycles_buffers_of_identical_size() {
        let bank = MemoryBank::<f32>::new();
        let before = bank.stats().num_allocations;
        for _ in 0..10 {
            let buf = bank.allocate(Device::Host, 64, 8).unwrap();
            bank.deposit(Device::Host, buf);
        }
        let stats = bank.stats();
        assert_eq!(stats.num_allocations - before, 1);
        assert_eq!(stats.hits, 9);
        assert_eq!(stats.cached_buffers, 1);
        assert_eq!(stats.cached_elems, 64);
    }

    #[test]
    fn distinct_sizes_use_distinct_buckets() {
        let bank = MemoryBank::<i32>::new();
        let a = bank.allocate(Device::Host, 16, 4).unwrap();
        let b = bank.allocate(Device::Host, 32, 4).unwrap();
        bank.deposit(Device::Host, a);
        bank.deposit(Device::Host, b);
        assert_eq!(bank.stats().cached_buffers, 2);
        // a 16-element request must not be served with the 32-element buffer
        let c = bank.allocate(Device::Host, 16, 4).unwrap();
        assert_eq!(c.len(), 16);
        assert_eq!(bank.stats().cached_buffers, 1);
    }

    #[test]
    fn device_buffers_are_keyed_separately() {
        let bank = MemoryBank::<f64>::new();
        let buf = bank.allocate(Device::Fake(0), 8, 2).unwrap();
        bank.deposit(Device::Fake(0), buf);
        // same size on a different fake device misses the cache
        let before = bank.stats().num_allocations;
        let _other = bank.allocate(Device::Fake(1), 8, 2).unwrap();
        assert_eq!(bank.stats().num_allocations, before + 1);
    }

    #[test]
    fn bad_inner_dim_is_rejected() {
        let bank = MemoryBank::<f32>::new();
        assert!(bank.allocate(Device::Host, 10, 3).is_err());
        assert!(bank.allocate(Device::Host, 10, 0).is_err());
    }

    #[test]
    fn empty_cache_releases_everything() {
        let bank = MemoryBank::<f32>::new();
        let buf = bank.allocate(Device::Host, 4, 1).unwrap();
        bank.deposit(Device::Host, buf);
        bank.empty_cache();
        assert_eq!(bank.stats().cached_buffers, 0);
    }
}
