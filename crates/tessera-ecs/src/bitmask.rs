//! Fixed-width bit sets.
//!
//! A [`Mask`] is the schema of an archetype and the requirement of a filter.
//! Its width is fixed at [`MASK_TOTAL_BITS`], which is also the upper bound on
//! the number of component types, resource types, lock bits and cached
//! filters a world can hold.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitXor, Not};

use serde::{Deserialize, Serialize};

use crate::component::ComponentId;

/// Number of bits in a [`Mask`].
pub const MASK_TOTAL_BITS: usize = 256;

const WORD_BITS: usize = 64;
const WORDS: usize = MASK_TOTAL_BITS / WORD_BITS;

// ---------------------------------------------------------------------------
// Mask
// ---------------------------------------------------------------------------

/// A 256-bit set of component IDs.
///
/// Every operation is a fixed number of word operations, independent of how
/// many bits are set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Mask {
    bits: [u64; WORDS],
}

impl Mask {
    /// The empty mask.
    pub const ZERO: Mask = Mask { bits: [0; WORDS] };

    /// Build a mask with the given IDs set.
    pub fn new(ids: &[ComponentId]) -> Self {
        let mut mask = Self::ZERO;
        for &id in ids {
            mask.set(id, true);
        }
        mask
    }

    /// Whether the bit for `id` is set.
    #[inline]
    pub fn get(&self, id: ComponentId) -> bool {
        self.get_bit(id.index())
    }

    /// Set or clear the bit for `id`.
    #[inline]
    pub fn set(&mut self, id: ComponentId, value: bool) {
        self.set_bit(id.index(), value);
    }

    #[inline]
    pub(crate) fn get_bit(&self, bit: u8) -> bool {
        let bit = bit as usize;
        self.bits[bit / WORD_BITS] & (1 << (bit % WORD_BITS)) != 0
    }

    #[inline]
    pub(crate) fn set_bit(&mut self, bit: u8, value: bool) {
        let bit = bit as usize;
        let word = &mut self.bits[bit / WORD_BITS];
        if value {
            *word |= 1 << (bit % WORD_BITS);
        } else {
            *word &= !(1 << (bit % WORD_BITS));
        }
    }

    /// Clear all bits.
    #[inline]
    pub fn reset(&mut self) {
        self.bits = [0; WORDS];
    }

    /// Whether no bit is set.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.bits.iter().all(|w| *w == 0)
    }

    /// Whether every bit set in `other` is also set in `self`.
    #[inline]
    pub fn contains(&self, other: &Mask) -> bool {
        self.bits
            .iter()
            .zip(other.bits.iter())
            .all(|(a, b)| a & b == *b)
    }

    /// Whether `self` and `other` share at least one bit.
    #[inline]
    pub fn contains_any(&self, other: &Mask) -> bool {
        self.bits
            .iter()
            .zip(other.bits.iter())
            .any(|(a, b)| a & b != 0)
    }

    /// Number of bits set.
    #[inline]
    pub fn total_bits_set(&self) -> u32 {
        self.bits.iter().map(|w| w.count_ones()).sum()
    }

    /// Bitwise AND.
    #[inline]
    pub fn and(&self, other: &Mask) -> Mask {
        self.zip_with(other, |a, b| a & b)
    }

    /// Bitwise OR.
    #[inline]
    pub fn or(&self, other: &Mask) -> Mask {
        self.zip_with(other, |a, b| a | b)
    }

    /// Bitwise XOR.
    #[inline]
    pub fn xor(&self, other: &Mask) -> Mask {
        self.zip_with(other, |a, b| a ^ b)
    }

    /// Bitwise NOT.
    #[inline]
    pub fn not(&self) -> Mask {
        let mut out = *self;
        for w in &mut out.bits {
            *w = !*w;
        }
        out
    }

    #[inline]
    fn zip_with(&self, other: &Mask, f: impl Fn(u64, u64) -> u64) -> Mask {
        let mut out = Mask::ZERO;
        for (i, w) in out.bits.iter_mut().enumerate() {
            *w = f(self.bits[i], other.bits[i]);
        }
        out
    }

    /// Iterate the set IDs in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.bits.iter().enumerate().flat_map(|(word_index, &word)| {
            let mut rest = word;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(ComponentId((word_index * WORD_BITS + bit) as u8))
            })
        })
    }

    /// The index of the lowest set bit, if any.
    pub(crate) fn first_id(&self) -> Option<ComponentId> {
        self.ids().next()
    }
}

impl BitAnd for Mask {
    type Output = Mask;
    fn bitand(self, rhs: Mask) -> Mask {
        Mask::and(&self, &rhs)
    }
}

impl BitOr for Mask {
    type Output = Mask;
    fn bitor(self, rhs: Mask) -> Mask {
        Mask::or(&self, &rhs)
    }
}

impl BitXor for Mask {
    type Output = Mask;
    fn bitxor(self, rhs: Mask) -> Mask {
        Mask::xor(&self, &rhs)
    }
}

impl Not for Mask {
    type Output = Mask;
    fn not(self) -> Mask {
        Mask::not(&self)
    }
}

impl fmt::Debug for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ids().map(|id| id.0)).finish()
    }
}

// ---------------------------------------------------------------------------
// BitSet
// ---------------------------------------------------------------------------

/// Growable bit set indexed by entity index.
#[derive(Debug, Clone, Default)]
pub(crate) struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    pub(crate) fn get(&self, index: u32) -> bool {
        let index = index as usize;
        self.words
            .get(index / WORD_BITS)
            .is_some_and(|w| w & (1 << (index % WORD_BITS)) != 0)
    }

    pub(crate) fn set(&mut self, index: u32, value: bool) {
        let index = index as usize;
        let word = index / WORD_BITS;
        if word >= self.words.len() {
            if !value {
                return;
            }
            self.words.resize(word + 1, 0);
        }
        if value {
            self.words[word] |= 1 << (index % WORD_BITS);
        } else {
            self.words[word] &= !(1 << (index % WORD_BITS));
        }
    }

    pub(crate) fn reset(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn id(i: u8) -> ComponentId {
        ComponentId(i)
    }

    #[test]
    fn set_get_reset() {
        let mut mask = Mask::ZERO;
        assert!(mask.is_zero());
        mask.set(id(0), true);
        mask.set(id(63), true);
        mask.set(id(64), true);
        mask.set(id(255), true);
        assert!(mask.get(id(0)));
        assert!(mask.get(id(64)));
        assert!(mask.get(id(255)));
        assert!(!mask.get(id(1)));
        assert_eq!(mask.total_bits_set(), 4);

        mask.set(id(63), false);
        assert!(!mask.get(id(63)));
        assert_eq!(mask.total_bits_set(), 3);

        mask.reset();
        assert!(mask.is_zero());
    }

    #[test]
    fn contains_and_contains_any() {
        let ab = Mask::new(&[id(1), id(2)]);
        let a = Mask::new(&[id(1)]);
        let c = Mask::new(&[id(200)]);

        assert!(ab.contains(&a));
        assert!(!a.contains(&ab));
        assert!(ab.contains(&Mask::ZERO));
        assert!(ab.contains_any(&a));
        assert!(!ab.contains_any(&c));
        assert!(!ab.contains_any(&Mask::ZERO));
    }

    #[test]
    fn boolean_combinators() {
        let a = Mask::new(&[id(1), id(100)]);
        let b = Mask::new(&[id(100), id(200)]);

        assert_eq!(a & b, Mask::new(&[id(100)]));
        assert_eq!(a | b, Mask::new(&[id(1), id(100), id(200)]));
        assert_eq!(a ^ b, Mask::new(&[id(1), id(200)]));
        assert_eq!((!a).total_bits_set(), MASK_TOTAL_BITS as u32 - 2);
        assert!(!(!a).get(id(1)));
    }

    #[test]
    fn ids_iterate_in_order() {
        let mask = Mask::new(&[id(130), id(3), id(64), id(255)]);
        let ids: Vec<u8> = mask.ids().map(|i| i.0).collect();
        assert_eq!(ids, vec![3, 64, 130, 255]);
        assert_eq!(mask.first_id(), Some(id(3)));
        assert_eq!(Mask::ZERO.first_id(), None);
    }

    #[test]
    fn bitset_grows_on_demand() {
        let mut set = BitSet::default();
        assert!(!set.get(1000));
        set.set(1000, false);
        assert!(!set.get(1000));
        set.set(1000, true);
        assert!(set.get(1000));
        assert!(!set.get(999));
        set.reset();
        assert!(!set.get(1000));
    }
}
