use std::sync::atomic::{AtomicU16, Ordering};

// Device — Identifies where a buffer lives and where an op should run
//
// The device is plain data, not a compile-time parameter: a tagged enum with
// the host, an accelerator family (at most one, indexed), and "fake"
// accelerators. A fake device behaves exactly like an accelerator from the
// synchronization machinery's point of view but is backed by host memory,
// which lets the freshness/transfer protocol be exercised in tests on
// machines with no accelerator installed.
//
// Accelerator availability is process configuration: the embedder declares
// how many accelerator devices exist (`set_accel_count`). Fake devices are
// always available.

/// A compute device: the host, one of up to N accelerators, or a fake
/// accelerator used for testing the synchronization logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Host,
    Accel(u8),
    Fake(u8),
}

impl Device {
    pub fn is_host(&self) -> bool {
        matches!(self, Device::Host)
    }

    pub fn is_accel(&self) -> bool {
        matches!(self, Device::Accel(_))
    }

    pub fn is_fake(&self) -> bool {
        matches!(self, Device::Fake(_))
    }

    /// Index within the device family (0 for the host).
    pub fn index(&self) -> u8 {
        match self {
            Device::Host => 0,
            Device::Accel(i) | Device::Fake(i) => *i,
        }
    }

    /// A human-readable name for this device (e.g. "host", "accel:0").
    pub fn name(&self) -> String {
        match self {
            Device::Host => "host".to_string(),
            Device::Accel(i) => format!("accel:{}", i),
            Device::Fake(i) => format!("fake:{}", i),
        }
    }

    /// Whether this device can be used in the current process.
    pub fn is_available(&self) -> bool {
        match self {
            Device::Host => true,
            Device::Accel(i) => (*i as usize) < accel_count(),
            // fakes exist precisely so tests can run anywhere
            Device::Fake(_) => true,
        }
    }

    /// Every device usable in this process: the host, all fake devices that
    /// have been touched, and the registered accelerators.
    pub fn installed_accelerators() -> Vec<Device> {
        (0..accel_count() as u8).map(Device::Accel).collect()
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// Process-wide configuration
//
// Two globals: the number of registered accelerator devices, and the
// tie-breaker device used by `should_compute_on` when op inputs disagree
// about placement. Both are read on hot paths, so they are atomics rather
// than lock-guarded values.

static ACCEL_COUNT: AtomicU16 = AtomicU16::new(0);

// Encoded Device: kind in the high byte (0=host, 1=accel, 2=fake),
// index in the low byte.
static TIE_BREAKER: AtomicU16 = AtomicU16::new(u16::MAX);

fn encode(d: Device) -> u16 {
    match d {
        Device::Host => 0,
        Device::Accel(i) => 0x0100 | i as u16,
        Device::Fake(i) => 0x0200 | i as u16,
    }
}

fn decode(v: u16) -> Device {
    match v >> 8 {
        1 => Device::Accel((v & 0xff) as u8),
        2 => Device::Fake((v & 0xff) as u8),
        _ => Device::Host,
    }
}

/// Number of accelerator devices registered for this process.
pub fn accel_count() -> usize {
    ACCEL_COUNT.load(Ordering::Relaxed) as usize
}

/// Declare how many accelerator devices this process may use.
pub fn set_accel_count(n: usize) {
    ACCEL_COUNT.store(n as u16, Ordering::Relaxed);
}

/// The device that wins when op inputs have mixed placement preferences.
/// Defaults to the first accelerator when one is registered, else the host.
pub fn tie_breaker_device() -> Device {
    let raw = TIE_BREAKER.load(Ordering::Relaxed);
    if raw == u16::MAX {
        if accel_count() > 0 {
            Device::Accel(0)
        } else {
            Device::Host
        }
    } else {
        decode(raw)
    }
}

/// Override the process-wide tie-breaker device.
pub fn set_tie_breaker_device(d: Device) {
    TIE_BREAKER.store(encode(d), Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_always_available() {
        assert!(Device::Host.is_available());
        assert!(Device::Fake(3).is_available());
        assert!(!Device::Accel(200).is_available());
    }

    #[test]
    fn names() {
        assert_eq!(Device::Host.name(), "host");
        assert_eq!(Device::Accel(1).name(), "accel:1");
        assert_eq!(Device::Fake(0).name(), "fake:0");
    }

    #[test]
    fn encode_decode_roundtrip() {
        for d in [Device::Host, Device::Accel(7), Device::Fake(2)] {
            assert_eq!(decode(encode(d)), d);
        }
    }
}
