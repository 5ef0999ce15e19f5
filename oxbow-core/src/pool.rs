//! Fixed-capacity pool of provisions.
//!
//! Slots are allocated once at worker startup and reused forever. A borrow
//! takes the provision out of its slot (the connection task owns it while
//! driving I/O) and marks the slot dirty; release puts it back. `clean` is
//! what the accept loop's admission control keys on.

use crate::config::Config;
use crate::provision::Provision;

pub struct ProvisionPool {
    slots: Vec<Option<Provision>>,
    dirty: Vec<u64>,
    dirty_count: usize,
}

impl ProvisionPool {
    pub fn new(config: &Config) -> Self {
        let capacity = config.size_connections_max;
        ProvisionPool {
            slots: (0..capacity).map(|i| Some(Provision::new(i, config))).collect(),
            dirty: vec![0; capacity.div_ceil(64)],
            dirty_count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of free slots.
    pub fn clean(&self) -> usize {
        self.slots.len() - self.dirty_count
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty_count
    }

    pub fn is_dirty(&self, index: usize) -> bool {
        self.dirty[index / 64] & (1 << (index % 64)) != 0
    }

    /// Borrow the first clean provision scanning from `hint` (wrapping), for
    /// slot locality across a connection's lifetime. `None` when full.
    pub fn borrow(&mut self, hint: usize) -> Option<(usize, Provision)> {
        let capacity = self.slots.len();
        if capacity == 0 || self.dirty_count == capacity {
            return None;
        }
        let start = hint % capacity;
        for offset in 0..capacity {
            let index = (start + offset) % capacity;
            if !self.is_dirty(index) {
                let provision = self.slots[index]
                    .take()
                    .expect("clean slot holds a provision");
                debug_assert_eq!(provision.index, index);
                self.dirty[index / 64] |= 1 << (index % 64);
                self.dirty_count += 1;
                return Some((index, provision));
            }
        }
        None
    }

    /// Return a provision to its slot. The job must already be empty.
    pub fn release(&mut self, index: usize, provision: Provision) {
        debug_assert!(self.is_dirty(index), "release of a clean slot");
        debug_assert!(provision.job.is_empty(), "release with a live job");
        debug_assert_eq!(provision.index, index);
        self.slots[index] = Some(provision);
        self.dirty[index / 64] &= !(1 << (index % 64));
        self.dirty_count -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_of(capacity: usize) -> ProvisionPool {
        let config = Config {
            size_connections_max: capacity,
            ..Config::default()
        };
        ProvisionPool::new(&config)
    }

    #[test]
    fn borrow_release_balance() {
        let mut pool = pool_of(4);
        assert_eq!(pool.clean(), 4);

        let (i0, p0) = pool.borrow(0).unwrap();
        let (i1, p1) = pool.borrow(0).unwrap();
        assert_ne!(i0, i1);
        assert_eq!(pool.clean(), 2);
        assert_eq!(pool.dirty_count(), 2);

        pool.release(i0, p0);
        assert_eq!(pool.clean(), 3);
        pool.release(i1, p1);
        assert_eq!(pool.clean(), 4);
        assert_eq!(pool.dirty_count(), 0);
    }

    #[test]
    fn hint_biases_slot_choice() {
        let mut pool = pool_of(8);
        let (i, p) = pool.borrow(5).unwrap();
        assert_eq!(i, 5);
        pool.release(i, p);

        // Dirty hint slot falls through to the next clean one.
        let (a, pa) = pool.borrow(5).unwrap();
        let (b, pb) = pool.borrow(5).unwrap();
        assert_eq!(a, 5);
        assert_eq!(b, 6);
        pool.release(a, pa);
        pool.release(b, pb);
    }

    #[test]
    fn hint_wraps_around() {
        let mut pool = pool_of(3);
        let (a, _pa) = pool.borrow(2).unwrap();
        assert_eq!(a, 2);
        let (b, _pb) = pool.borrow(2).unwrap();
        assert_eq!(b, 0);
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut pool = pool_of(2);
        let (i0, p0) = pool.borrow(0).unwrap();
        let _keep = pool.borrow(0).unwrap();
        assert!(pool.borrow(0).is_none());
        assert_eq!(pool.clean(), 0);

        pool.release(i0, p0);
        assert!(pool.borrow(0).is_some());
    }

    #[test]
    fn provisions_keep_their_slot_index() {
        let mut pool = pool_of(70);
        let (i, p) = pool.borrow(65).unwrap();
        assert_eq!(i, 65);
        assert_eq!(p.index, 65);
        assert!(pool.is_dirty(65));
        pool.release(i, p);
        assert!(!pool.is_dirty(65));
    }
}
