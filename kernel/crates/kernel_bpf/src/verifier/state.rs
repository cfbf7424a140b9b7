//! Verifier State Tracking
//!
//! The only state the verifier tracks per instruction is which scratch
//! slots are known to hold a stored value on every path to it.

use core::fmt;

use kernel_abi::BPF_MEMWORDS;

const _: () = assert!(BPF_MEMWORDS <= u16::BITS as usize);

/// Set of scratch slots proven initialized, one bit per slot.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct SlotMask(u16);

impl SlotMask {
    /// No slot initialized, the state at program entry.
    pub const EMPTY: Self = Self(0);

    /// Mark `slot` initialized. The slot must be below `BPF_MEMWORDS`.
    #[inline]
    pub const fn with(self, slot: u32) -> Self {
        Self(self.0 | (1 << slot))
    }

    #[inline]
    pub const fn contains(self, slot: u32) -> bool {
        (self.0 >> slot) & 1 != 0
    }

    /// State where two paths join: only slots initialized on both.
    #[inline]
    pub const fn meet(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    #[inline]
    pub const fn bits(self) -> u16 {
        self.0
    }
}

impl fmt::Debug for SlotMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotMask({:#018b})", self.0)
    }
}
