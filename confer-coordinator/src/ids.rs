//! Identifier allocation
//!
//! Each entity kind draws from its own monotonically increasing counter that
//! wraps at a configurable modulus. Allocators are owned by a coordinator
//! instance, never process-wide.

use std::sync::atomic::{AtomicU64, Ordering};

use confer_core::{Error, MemberId, Result, RouterId, TransportId};
use tracing::error;

/// Wrapping counter for one entity kind
#[derive(Debug)]
pub struct IdAllocator {
    kind: &'static str,
    next: AtomicU64,
    modulus: u64,
}

impl IdAllocator {
    /// # Panics
    ///
    /// Panics if `modulus` is zero.
    #[must_use]
    pub fn new(kind: &'static str, modulus: u64) -> Self {
        Self::starting_at(kind, 0, modulus)
    }

    #[must_use]
    pub fn starting_at(kind: &'static str, start: u64, modulus: u64) -> Self {
        assert!(modulus > 0, "identifier modulus must be positive");
        Self {
            kind,
            next: AtomicU64::new(start % modulus),
            modulus,
        }
    }

    /// Take the next raw value, wrapping at the modulus
    pub fn next_raw(&self) -> u64 {
        let modulus = self.modulus;
        match self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some((n + 1) % modulus))
        {
            Ok(prev) | Err(prev) => prev,
        }
    }

    /// Take the next value, refusing one that still names a live entity
    pub fn allocate(&self, is_live: impl FnOnce(u64) -> bool) -> Result<u64> {
        let id = self.next_raw();
        if is_live(id) {
            error!(kind = self.kind, id, "Identifier counter wrapped onto a live entity");
            return Err(Error::IdCollision {
                kind: self.kind,
                id,
            });
        }
        Ok(id)
    }
}

/// The three allocators a coordinator owns
#[derive(Debug)]
pub struct IdAllocators {
    pub members: IdAllocator,
    pub routers: IdAllocator,
    pub transports: IdAllocator,
}

impl IdAllocators {
    #[must_use]
    pub fn new(modulus: u64) -> Self {
        Self {
            members: IdAllocator::new(MemberId::KIND, modulus),
            routers: IdAllocator::new(RouterId::KIND, modulus),
            transports: IdAllocator::new(TransportId::KIND, modulus),
        }
    }

    pub fn member(&self, is_live: impl FnOnce(MemberId) -> bool) -> Result<MemberId> {
        self.members
            .allocate(|raw| is_live(MemberId::new(raw)))
            .map(MemberId::new)
    }

    pub fn router(&self, is_live: impl FnOnce(RouterId) -> bool) -> Result<RouterId> {
        self.routers
            .allocate(|raw| is_live(RouterId::new(raw)))
            .map(RouterId::new)
    }

    pub fn transport(&self, is_live: impl FnOnce(TransportId) -> bool) -> Result<TransportId> {
        self.transports
            .allocate(|raw| is_live(TransportId::new(raw)))
            .map(TransportId::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_counters_are_independent() {
        let ids = IdAllocators::new(1 << 32);
        assert_eq!(ids.member(|_| false).unwrap(), MemberId::new(0));
        assert_eq!(ids.member(|_| false).unwrap(), MemberId::new(1));
        assert_eq!(ids.router(|_| false).unwrap(), RouterId::new(0));
        assert_eq!(ids.transport(|_| false).unwrap(), TransportId::new(0));
    }

    #[test]
    fn test_wraps_at_modulus() {
        let alloc = IdAllocator::starting_at("member", u64::from(u32::MAX), 1 << 32);
        assert_eq!(alloc.next_raw(), u64::from(u32::MAX));
        assert_eq!(alloc.next_raw(), 0);
    }

    #[test]
    fn test_wrap_onto_live_id_is_refused() {
        let alloc = IdAllocator::new("transport", 4);
        let live: HashSet<u64> = [0, 1, 2, 3].into_iter().map(|_| alloc.next_raw()).collect();

        let err = alloc.allocate(|id| live.contains(&id)).unwrap_err();
        assert_eq!(err, Error::IdCollision { kind: "transport", id: 0 });
    }

    #[test]
    fn test_allocation_is_injective_under_concurrency() {
        let alloc = std::sync::Arc::new(IdAllocator::new("member", 1 << 32));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let alloc = std::sync::Arc::clone(&alloc);
                std::thread::spawn(move || (0..1000).map(|_| alloc.next_raw()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 8000);
    }
}
