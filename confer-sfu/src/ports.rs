//! RTC port pool

use parking_lot::Mutex;
use std::collections::BTreeSet;

/// Free UDP ports of the configured range; lowest port is handed out first
pub struct PortPool {
    free: Mutex<BTreeSet<u16>>,
    capacity: usize,
}

impl PortPool {
    /// Pool over `min..=max`; empty when `min > max`
    #[must_use]
    pub fn new(min: u16, max: u16) -> Self {
        let free: BTreeSet<u16> = (min..=max).collect();
        let capacity = free.len();
        Self {
            free: Mutex::new(free),
            capacity,
        }
    }

    pub fn acquire(&self) -> Option<u16> {
        self.free.lock().pop_first()
    }

    pub fn release(&self, port: u16) {
        self.free.lock().insert(port);
    }

    #[must_use]
    pub fn in_use(&self) -> usize {
        self.capacity - self.free.lock().len()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
