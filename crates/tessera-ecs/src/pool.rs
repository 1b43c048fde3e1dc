//! Small fixed-capacity ID pools.
//!
//! [`BitPool`] recycles IDs in `0..MASK_TOTAL_BITS` through an implicit free
//! list, the same scheme [`EntityPool`](crate::entity::EntityPool) uses for
//! entities. It backs both the world lock ([`LockMask`]) and the filter cache
//! slot IDs.

use crate::bitmask::{Mask, MASK_TOTAL_BITS};
use crate::EcsError;

// ---------------------------------------------------------------------------
// BitPool
// ---------------------------------------------------------------------------

/// Pool of up to [`MASK_TOTAL_BITS`] recyclable 8-bit IDs.
#[derive(Debug, Clone)]
pub struct BitPool {
    /// For issued IDs, the ID itself. For free IDs, the next free ID.
    links: [u8; MASK_TOTAL_BITS],
    length: usize,
    next: u8,
    available: usize,
}

impl Default for BitPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BitPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            links: [0; MASK_TOTAL_BITS],
            length: 0,
            next: 0,
            available: 0,
        }
    }

    /// Take an ID, recycling a released one if possible.
    pub fn get(&mut self, what: &'static str) -> Result<u8, EcsError> {
        if self.available == 0 {
            if self.length >= MASK_TOTAL_BITS {
                return Err(EcsError::CapacityExceeded {
                    what,
                    limit: MASK_TOTAL_BITS,
                });
            }
            let id = self.length as u8;
            self.links[self.length] = id;
            self.length += 1;
            return Ok(id);
        }
        let id = self.next;
        self.next = self.links[id as usize];
        self.links[id as usize] = id;
        self.available -= 1;
        Ok(id)
    }

    /// Give `id` back to the pool. The caller guarantees it is issued.
    pub fn recycle(&mut self, id: u8) {
        self.links[id as usize] = self.next;
        self.next = id;
        self.available += 1;
    }

    /// Number of issued IDs.
    pub fn len(&self) -> usize {
        self.length - self.available
    }

    /// Whether no ID is issued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget all issued IDs.
    pub fn reset(&mut self) {
        self.length = 0;
        self.next = 0;
        self.available = 0;
    }
}

// ---------------------------------------------------------------------------
// LockMask
// ---------------------------------------------------------------------------

/// Reentrant lock made of up to [`MASK_TOTAL_BITS`] independent bits.
///
/// Each open query holds one bit. The owner counts as locked while any bit is
/// held.
#[derive(Debug, Clone, Default)]
pub struct LockMask {
    locks: Mask,
    bits: BitPool,
}

impl LockMask {
    /// Acquire a fresh lock bit.
    pub fn lock(&mut self) -> Result<u8, EcsError> {
        let bit = self.bits.get("lock bits")?;
        self.locks.set_bit(bit, true);
        Ok(bit)
    }

    /// Release `bit`. Fails if the bit is not currently held.
    pub fn unlock(&mut self, bit: u8) -> Result<(), EcsError> {
        if !self.locks.get_bit(bit) {
            return Err(EcsError::UnbalancedUnlock { bit });
        }
        self.locks.set_bit(bit, false);
        self.bits.recycle(bit);
        Ok(())
    }

    /// Whether any bit is held.
    #[inline]
    pub fn is_locked(&self) -> bool {
        !self.locks.is_zero()
    }

    /// Number of held bits.
    pub fn held(&self) -> usize {
        self.bits.len()
    }

    /// Drop every held bit.
    pub fn reset(&mut self) {
        self.locks.reset();
        self.bits.reset();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
