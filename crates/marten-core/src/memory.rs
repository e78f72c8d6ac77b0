use std::sync::Mutex;

use crate::device::{self, Device};
use crate::dtype::Scalar;
use crate::error::{Error, Result};

// SyncMemory — A host/device buffer pair with freshness tracking
//
// Every tensor buffer in Marten is a SyncMemory: a flat run of `total_elems`
// elements that may be materialized on the host, on one non-host device, or
// both. Each side carries a "fresh" flag. The invariant, checked by
// `check_invariants`, is:
//
//   - nothing fresh           → the memory is uninitialized
//   - exactly one side fresh  → that side holds the current values
//   - both sides fresh        → both hold the same values
//
// Allocation is deferred: constructing a SyncMemory allocates nothing, and
// the first read or write pulls a buffer from the MemoryBank. When
// `clear_on_allocation` is set, a freshly pulled buffer is zero-filled
// before first use — this is what makes gradient buffers cheap: a Mat's
// `dw` is a SyncMemory with this flag set and no storage until the first
// backward pass touches it.
//
// A mutating access marks the touched side fresh and the other side stale.
// A read access makes the touched side fresh without staling the other.
//
// All per-buffer state lives behind one Mutex, which makes a SyncMemory
// shareable across Hogwild worker threads. Dropping the SyncMemory deposits
// live buffers back into the process-wide MemoryBank.

struct MemState<R> {
    host: Option<Vec<R>>,
    dev: Option<Vec<R>>,
    /// Which non-host device the `dev` side is bound to. Bound on first
    /// device access when the preferred device is the host.
    dev_device: Option<Device>,
    host_fresh: bool,
    dev_fresh: bool,
    clear_on_allocation: bool,
}

/// A lazily-allocated buffer of `R` elements synchronized between the host
/// and at most one non-host device.
pub struct SyncMemory<R: Scalar> {
    total_elems: usize,
    /// Trailing dimension of the owning tensor; rides along for the bank's
    /// row bookkeeping and must divide `total_elems`.
    inner_dim: usize,
    preferred_device: Device,
    state: Mutex<MemState<R>>,
}

impl<R: Scalar> SyncMemory<R> {
    pub fn new(
        total_elems: usize,
        inner_dim: usize,
        preferred_device: Device,
        clear_on_allocation: bool,
    ) -> Result<Self> {
        if inner_dim == 0 || total_elems % inner_dim != 0 {
            return Err(Error::InvariantViolated(format!(
                "memory of {} elements is not divisible into rows of {}",
                total_elems, inner_dim
            )));
        }
        if !preferred_device.is_available() {
            return Err(Error::DeviceUnavailable {
                device: preferred_device,
            });
        }
        Ok(SyncMemory {
            total_elems,
            inner_dim,
            preferred_device,
            state: Mutex::new(MemState {
                host: None,
                dev: None,
                dev_device: match preferred_device {
                    Device::Host => None,
                    d => Some(d),
                },
                host_fresh: false,
                dev_fresh: false,
                clear_on_allocation,
            }),
        })
    }

    pub fn total_elems(&self) -> usize {
        self.total_elems
    }

    pub fn inner_dim(&self) -> usize {
        self.inner_dim
    }

    pub fn preferred_device(&self) -> Device {
        self.preferred_device
    }

    pub fn prefers_host(&self) -> bool {
        self.preferred_device.is_host()
    }

    pub fn prefers_accel(&self) -> bool {
        !self.preferred_device.is_host()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemState<R>> {
        self.state.lock().expect("sync memory poisoned")
    }

    /// Whether the given side currently holds fresh values.
    pub fn is_fresh(&self, device: Device) -> bool {
        let st = self.lock();
        if device.is_host() {
            st.host_fresh
        } else {
            st.dev_fresh && st.dev_device == Some(device)
        }
    }

    /// Whether the given side has a live buffer.
    pub fn is_allocated(&self, device: Device) -> bool {
        let st = self.lock();
        if device.is_host() {
            st.host.is_some()
        } else {
            st.dev.is_some() && st.dev_device == Some(device)
        }
    }

    fn any_allocated(st: &MemState<R>) -> bool {
        st.host.is_some() || st.dev.is_some()
    }

    /// Verify the freshness invariant; both-fresh sides must be bit-equal.
    pub fn check_invariants(&self) -> Result<()> {
        let st = self.lock();
        if st.host_fresh && st.host.is_none() {
            return Err(Error::InvariantViolated(
                "host side marked fresh without a buffer".into(),
            ));
        }
        if st.dev_fresh && st.dev.is_none() {
            return Err(Error::InvariantViolated(
                "device side marked fresh without a buffer".into(),
            ));
        }
        if st.host_fresh && st.dev_fresh {
            let h = st.host.as_ref().expect("fresh host side has a buffer");
            let d = st.dev.as_ref().expect("fresh device side has a buffer");
            if h != d {
                return Err(Error::InvariantViolated(
                    "both sides fresh but contents differ".into(),
                ));
            }
        }
        Ok(())
    }

    // Side materialization.
    //
    // `to_host`/`to_dev` bring the requested side up to date: allocate if
    // needed, copy across if the opposite side is fresh, zero-fill if this
    // is a first allocation under clear_on_allocation.

    fn ensure_host(&self, st: &mut MemState<R>) -> Result<()> {
        if st.host_fresh {
            return Ok(());
        }
        let just_allocated = if st.host.is_none() {
            st.host = Some(R::bank().allocate(Device::Host, self.total_elems, self.inner_dim)?);
            true
        } else {
            false
        };
        if st.dev_fresh {
            let dev = st.dev.as_ref().expect("fresh device side has a buffer");
            st.host.as_mut().expect("just allocated").copy_from_slice(dev);
        } else if just_allocated && st.clear_on_allocation {
            st.host.as_mut().expect("just allocated").fill(R::zero());
        }
        st.host_fresh = true;
        Ok(())
    }

    fn ensure_dev(&self, st: &mut MemState<R>, device: Device) -> Result<()> {
        if device.is_host() || !device.is_available() {
            return Err(Error::DeviceUnavailable { device });
        }
        match st.dev_device {
            None => st.dev_device = Some(device),
            Some(bound) if bound != device => {
                return Err(Error::InvariantViolated(format!(
                    "memory is bound to {} but {} was requested",
                    bound, device
                )));
            }
            Some(_) => {}
        }
        if st.dev_fresh {
            return Ok(());
        }
        let just_allocated = if st.dev.is_none() {
            st.dev = Some(R::bank().allocate(device, self.total_elems, self.inner_dim)?);
            true
        } else {
            false
        };
        if st.host_fresh {
            let host = st.host.as_ref().expect("fresh host side has a buffer");
            st.dev.as_mut().expect("just allocated").copy_from_slice(host);
        } else if just_allocated && st.clear_on_allocation {
            st.dev.as_mut().expect("just allocated").fill(R::zero());
        }
        st.dev_fresh = true;
        Ok(())
    }

    /// Read access to the host side. Transfers from the device side if the
    /// host is stale; leaves device freshness untouched.
    pub fn read_host<T>(&self, f: impl FnOnce(&[R]) -> T) -> Result<T> {
        let mut st = self.lock();
        self.ensure_host(&mut st)?;
        Ok(f(st.host.as_ref().expect("host side ensured")))
    }

    /// Mutable access to the host side. As `read_host`, but marks the
    /// device side stale.
    pub fn write_host<T>(&self, f: impl FnOnce(&mut [R]) -> T) -> Result<T> {
        let mut st = self.lock();
        self.ensure_host(&mut st)?;
        st.dev_fresh = false;
        Ok(f(st.host.as_mut().expect("host side ensured")))
    }

    /// Read access to the given device side.
    pub fn read_device<T>(&self, device: Device, f: impl FnOnce(&[R]) -> T) -> Result<T> {
        let mut st = self.lock();
        self.ensure_dev(&mut st, device)?;
        Ok(f(st.dev.as_ref().expect("device side ensured")))
    }

    /// Mutable access to the given device side; marks the host stale.
    pub fn write_device<T>(&self, device: Device, f: impl FnOnce(&mut [R]) -> T) -> Result<T> {
        let mut st = self.lock();
        self.ensure_dev(&mut st, device)?;
        st.host_fresh = false;
        Ok(f(st.dev.as_mut().expect("device side ensured")))
    }

    /// Zero-fill on the preferred side; only that side ends up fresh.
    pub fn clear(&self) -> Result<()> {
        let mut st = self.lock();
        st.clear_on_allocation = true;
        if self.preferred_device.is_host() {
            if st.host.is_none() {
                st.host = Some(R::bank().allocate(Device::Host, self.total_elems, self.inner_dim)?);
            }
            st.host.as_mut().expect("just allocated").fill(R::zero());
            st.host_fresh = true;
            st.dev_fresh = false;
        } else {
            let device = self.preferred_device;
            if st.dev.is_none() {
                st.dev = Some(R::bank().allocate(device, self.total_elems, self.inner_dim)?);
            }
            st.dev.as_mut().expect("just allocated").fill(R::zero());
            st.dev_fresh = true;
            st.host_fresh = false;
        }
        Ok(())
    }

    /// Request a clear without forcing allocation: mark clear-on-allocation
    /// and, if some side is already live, clear immediately.
    pub fn lazy_clear(&self) -> Result<()> {
        {
            let mut st = self.lock();
            st.clear_on_allocation = true;
            if !Self::any_allocated(&st) {
                st.host_fresh = false;
                st.dev_fresh = false;
                return Ok(());
            }
        }
        self.clear()
    }

    /// Copy the fresh side of `other` into this memory, landing on this
    /// memory's preferred device. A completely uninitialized source leaves
    /// this memory uninitialized as well.
    pub fn copy_from(&self, other: &SyncMemory<R>) -> Result<()> {
        if other.total_elems != self.total_elems {
            return Err(Error::InvariantViolated(format!(
                "copy_from between mismatched sizes {} and {}",
                other.total_elems, self.total_elems
            )));
        }
        let values: Option<Vec<R>> = {
            let st = other.lock();
            if st.host_fresh {
                st.host.clone()
            } else if st.dev_fresh {
                st.dev.clone()
            } else {
                None
            }
        };
        let Some(values) = values else {
            return Ok(());
        };
        if self.preferred_device.is_host() {
            self.write_host(|buf| buf.copy_from_slice(&values))
        } else {
            self.write_device(self.preferred_device, |buf| buf.copy_from_slice(&values))
        }
    }
}

impl<R: Scalar> Drop for SyncMemory<R> {
    fn drop(&mut self) {
        let st = self.state.get_mut().expect("sync memory poisoned");
        if let Some(buf) = st.host.take() {
            R::bank().deposit(Device::Host, buf);
        }
        if let (Some(buf), Some(device)) = (st.dev.take(), st.dev_device) {
            R::bank().deposit(device, buf);
        }
    }
}

impl<R: Scalar> std::fmt::Debug for SyncMemory<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.lock();
        write!(
            f,
            "SyncMemory(elems={}, preferred={}, host={}{}, dev={}{})",
            self.total_elems,
            self.preferred_device,
            if st.host.is_some() { "alloc" } else { "-" },
            if st.host_fresh { "+fresh" } else { "" },
            if st.dev.is_some() { "alloc" } else { "-" },
            if st.dev_fresh { "+fresh" } else { "" },
        )
    }
}

/// Pick the device an op consuming `inputs` should run on.
///
/// One input: its preferred accelerator when the accelerator side is fresh
/// (or nothing is fresh yet), otherwise the host. Several inputs: host when
/// everyone prefers the host, the common accelerator when everyone prefers
/// the same one, and the process-wide tie-breaker for mixed preferences.
pub fn should_compute_on<R: Scalar>(inputs: &[&SyncMemory<R>]) -> Device {
    if inputs.is_empty() {
        return Device::Host;
    }
    if inputs.len() == 1 {
        let m = inputs[0];
        let preferred = m.preferred_device();
        if m.prefers_accel() && (m.is_fresh(preferred) || !m.is_fresh(Device::Host)) {
            return preferred;
        }
        return Device::Host;
    }
    let everybody_host = inputs.iter().all(|m| m.prefers_host());
    if everybody_host {
        return Device::Host;
    }
    let first = inputs[0].preferred_device();
    let everybody_same_accel = !first.is_host()
        && inputs.iter().all(|m| m.preferred_device() == first);
    if everybody_same_accel {
        return first;
    }
    device::tie_breaker_device()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_deferred() {
        let m = SyncMemory::<f32>::new(12, 4, Device::Host, false).unwrap();
        assert!(!m.is_allocated(Device::Host));
        m.read_host(|_| ()).unwrap();
        assert!(m.is_allocated(Device::Host));
        assert!(m.is_fresh(Device::Host));
    }

    #[test]
    fn clear_on_allocation_zeroes_first_use() {
        let m = SyncMemory::<f32>::new(6, 3, Device::Host, true).unwrap();
        let sum = m.read_host(|b| b.iter().sum::<f32>()).unwrap();
        assert_eq!(sum, 0.0);
    }

    #[test]
    fn write_host_stales_device_side() {
        let m = SyncMemory::<f32>::new(4, 2, Device::Fake(0), true).unwrap();
        m.read_device(Device::Fake(0), |_| ()).unwrap();
        assert!(m.is_fresh(Device::Fake(0)));
        m.write_host(|b| b[0] = 1.0).unwrap();
        assert!(m.is_fresh(Device::Host));
        assert!(!m.is_fresh(Device::Fake(0)));
        m.check_invariants().unwrap();
    }

    #[test]
    fn read_keeps_both_sides_fresh() {
        let m = SyncMemory::<f32>::new(4, 2, Device::Fake(0), false).unwrap();
        m.write_device(Device::Fake(0), |b| {
            for (i, v) in b.iter_mut().enumerate() {
                *v = i as f32;
            }
        })
        .unwrap();
        let host_copy = m.read_host(|b| b.to_vec()).unwrap();
        assert_eq!(host_copy, vec![0.0, 1.0, 2.0, 3.0]);
        assert!(m.is_fresh(Device::Host));
        assert!(m.is_fresh(Device::Fake(0)));
        m.check_invariants().unwrap();
    }

    #[test]
    fn lazy_clear_defers_until_allocated() {
        let m = SyncMemory::<f32>::new(4, 2, Device::Host, false).unwrap();
        m.lazy_clear().unwrap();
        assert!(!m.is_allocated(Device::Host));
        m.write_host(|b| b[1] = 5.0).unwrap();
        // the deferred clear happened at allocation, before the write
        let v = m.read_host(|b| b.to_vec()).unwrap();
        assert_eq!(v, vec![0.0, 5.0, 0.0, 0.0]);

        // once allocated, lazy_clear clears immediately
        m.lazy_clear().unwrap();
        let v = m.read_host(|b| b.to_vec()).unwrap();
        assert_eq!(v, vec![0.0; 4]);
    }

    #[test]
    fn copy_from_follows_source_freshness() {
        let src = SyncMemory::<f32>::new(3, 3, Device::Host, false).unwrap();
        src.write_host(|b| b.copy_from_slice(&[1.0, 2.0, 3.0])).unwrap();
        let dst = SyncMemory::<f32>::new(3, 3, Device::Host, false).unwrap();
        dst.copy_from(&src).unwrap();
        assert_eq!(dst.read_host(|b| b.to_vec()).unwrap(), vec![1.0, 2.0, 3.0]);

        // uninitialized source leaves destination uninitialized
        let blank = SyncMemory::<f32>::new(3, 3, Device::Host, false).unwrap();
        let dst2 = SyncMemory::<f32>::new(3, 3, Device::Host, false).unwrap();
        dst2.copy_from(&blank).unwrap();
        assert!(!dst2.is_fresh(Device::Host));
    }

    #[test]
    fn should_compute_on_single_input() {
        let host = SyncMemory::<f32>::new(2, 1, Device::Host, false).unwrap();
        assert_eq!(should_compute_on(&[&host]), Device::Host);

        let accel = SyncMemory::<f32>::new(2, 1, Device::Fake(0), false).unwrap();
        // nothing fresh yet: preferred side wins
        assert_eq!(should_compute_on(&[&accel]), Device::Fake(0));
        // host fresh, device stale: host wins
        accel.write_host(|_| ()).unwrap();
        assert_eq!(should_compute_on(&[&accel]), Device::Host);
    }

    #[test]
    fn should_compute_on_mixed_inputs_uses_tie_breaker() {
        let host = SyncMemory::<f32>::new(2, 1, Device::Host, false).unwrap();
        let accel = SyncMemory::<f32>::new(2, 1, Device::Fake(0), false).unwrap();
        crate::device::set_tie_breaker_device(Device::Fake(0));
        assert_eq!(should_compute_on(&[&host, &accel]), Device::Fake(0));
        crate::device::set_tie_breaker_device(Device::Host);
        assert_eq!(should_compute_on(&[&host, &accel]), Device::Host);

        let host2 = SyncMemory::<f32>::new(2, 1, Device::Host, false).unwrap();
        assert_eq!(should_compute_on(&[&host, &host2]), Device::Host);
        let accel2 = SyncMemory::<f32>::new(2, 1, Device::Fake(0), false).unwrap();
        assert_eq!(should_compute_on(&[&accel, &accel2]), Device::Fake(0));
    }
}
