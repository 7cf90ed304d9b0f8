//! # Heap budget
//!
//! Memory accounting for queued outbound messages.
//!
//! A node runs against a fixed heap budget. Every message admitted to a
//! send queue holds a [`Reservation`] for its size; the reservation is
//! released when the message is written or discarded. Admission control
//! asks whether the free budget minus the new message would fall below a
//! safety margin.
//!
//! ## Thread Safety
//!
//! [`MemoryTracker`] uses atomic compare-and-swap, so it can be shared via
//! `Arc<MemoryTracker>` even though the mesh core itself is single-threaded.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use skein_core::memory::MemoryTracker;
//!
//! let tracker = Arc::new(MemoryTracker::new(8 * 1024));
//!
//! let reservation = tracker.try_reserve(1024, 4096).unwrap();
//! assert_eq!(tracker.allocated_bytes(), 1024);
//!
//! // Released when the reservation drops
//! drop(reservation);
//! assert_eq!(tracker.allocated_bytes(), 0);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::SendError;

/// Tracks bytes held by queued messages against a heap budget
#[derive(Debug)]
pub struct MemoryTracker {
    budget: usize,
    allocated: AtomicUsize,
}

impl MemoryTracker {
    /// Create a tracker for a heap budget in bytes
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            allocated: AtomicUsize::new(0),
        }
    }

    /// Total budget in bytes
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Bytes currently reserved
    pub fn allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    /// Bytes still available
    pub fn free_bytes(&self) -> usize {
        self.budget.saturating_sub(self.allocated_bytes())
    }

    /// Reserve `bytes` if at least `min_free` bytes remain afterwards
    ///
    /// Fails with [`SendError::OutOfMemory`] otherwise. Safe under
    /// concurrent use: the check and the reservation are one CAS.
    pub fn try_reserve(
        self: &Arc<Self>,
        bytes: usize,
        min_free: usize,
    ) -> Result<Reservation, SendError> {
        loop {
            let current = self.allocated.load(Ordering::Acquire);
            let free = self.budget.saturating_sub(current);

            if free < bytes || free - bytes < min_free {
                return Err(SendError::OutOfMemory {
                    needed: bytes,
                    free,
                });
            }

            match self.allocated.compare_exchange_weak(
                current,
                current + bytes,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Ok(Reservation {
                        tracker: Arc::clone(self),
                        bytes,
                    });
                }
                Err(_) => continue,
            }
        }
    }

    fn release(&self, bytes: usize) {
        self.allocated.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// RAII hold on part of the heap budget
#[derive(Debug)]
pub struct Reservation {
    tracker: Arc<MemoryTracker>,
    bytes: usize,
}

impl Reservation {
    /// Reserved size in bytes
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.tracker.release(self.bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_and_release() {
        let tracker = Arc::new(MemoryTracker::new(10_000));
        let a = tracker.try_reserve(1_000, 0).unwrap();
        let b = tracker.try_reserve(2_000, 0).unwrap();
        assert_eq!(tracker.allocated_bytes(), 3_000);
        assert_eq!(tracker.free_bytes(), 7_000);
        assert_eq!(a.bytes(), 1_000);

        drop(a);
        assert_eq!(tracker.allocated_bytes(), 2_000);
        drop(b);
        assert_eq!(tracker.allocated_bytes(), 0);
    }

    #[test]
    fn test_safety_margin() {
        let tracker = Arc::new(MemoryTracker::new(5_000));

        // 5000 - 1000 = 4000 >= 4000 is fine
        let held = tracker.try_reserve(1_000, 4_000).unwrap();

        // 4000 - 1 < 4000 is not
        let err = tracker.try_reserve(1, 4_000).unwrap_err();
        assert_eq!(
            err,
            SendError::OutOfMemory {
                needed: 1,
                free: 4_000
            }
        );
        assert_eq!(tracker.allocated_bytes(), 1_000);
        drop(held);
    }

    #[test]
    fn test_request_larger_than_budget() {
        let tracker = Arc::new(MemoryTracker::new(100));
        assert!(tracker.try_reserve(101, 0).is_err());
        assert_eq!(tracker.allocated_bytes(), 0);
    }

    #[test]
    fn test_concurrent_reservations_respect_budget() {
        let tracker = Arc::new(MemoryTracker::new(1_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    let mut held = Vec::new();
                    for _ in 0..50 {
                        if let Ok(r) = tracker.try_reserve(10, 0) {
                            held.push(r);
                        }
                    }
                    held
                })
            })
            .collect();

        let held: Vec<_> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(held.len(), 100);
        assert_eq!(tracker.allocated_bytes(), 1_000);
    }
}
