//! Pointer-stable numeric storage.

use std::sync::atomic::{AtomicU64, Ordering};

/// A numeric leaf cell with a stable address.
///
/// Documents hand these out behind `Arc` as the "stable double pointer" of the
/// interaction runtime: once an expression has bound a cell, every later write
/// to the same key goes through the same cell, so the hot evaluation loop can
/// read values without locks or map lookups.
///
/// The value is stored as `f64` bits in an `AtomicU64`. Reads and writes are
/// single word-sized atomic operations; the read-modify-write helpers use a
/// compare-exchange loop so concurrent `+=` from parallel pair batches never
/// lose updates.
#[derive(Debug)]
pub struct NumCell {
    bits: AtomicU64,
}

impl NumCell {
    #[must_use]
    pub fn new(value: f64) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    #[inline]
    #[must_use]
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }

    /// Atomically adds `delta`, returning the new value.
    pub fn fetch_add(&self, delta: f64) -> f64 {
        self.rmw(|current| current + delta)
    }

    /// Atomically multiplies by `factor`, returning the new value.
    pub fn fetch_mul(&self, factor: f64) -> f64 {
        self.rmw(|current| current * factor)
    }

    fn rmw(&self, op: impl Fn(f64) -> f64) -> f64 {
        let mut current = self.bits.load(Ordering::Acquire);
        loop {
            let next = op(f64::from_bits(current));
            match self.bits.compare_exchange_weak(
                current,
                next.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }
}

impl Default for NumCell {
    fn default() -> Self {
        Self::new(0.0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn set_and_get() {
        let cell = NumCell::new(1.5);
        assert_eq!(cell.get(), 1.5);
        cell.set(-3.25);
        assert_eq!(cell.get(), -3.25);
    }

    #[test]
    fn concurrent_adds_do_not_lose_updates() {
        let cell = Arc::new(NumCell::new(0.0));
        std::thread::scope(|scope| {
            for _ in 0..4 {
                let cell = Arc::clone(&cell);
                scope.spawn(move || {
                    for _ in 0..250 {
                        cell.fetch_add(1.0);
                    }
                });
            }
        });
        assert_eq!(cell.get(), 1000.0);
    }
}
