//! Ring-qualified addresses, byte pointers and bit pointers.
//!
//! Every memory access names its ring explicitly: an [`Addr`] is a
//! `(ring, word offset)` pair, never a merged integer. Conversions from the
//! raw legacy encodings live here so handlers never do the bit surgery
//! themselves.

use std::fmt;

/// Mask of the ring bits in a 32-bit logical word address.
pub const RING_MASK: u32 = 0x7000_0000;
/// Mask of the word-offset bits in a 32-bit logical word address.
pub const OFFSET_MASK: u32 = 0x0FFF_FFFF;
/// Word offset reachable by a 16-bit program.
pub const NARROW_OFFSET_MASK: u32 = 0x7FFF;

/// Privilege ring / segment, 0..=7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ring(u8);

impl Ring {
    /// Ring that unprivileged user programs run in.
    pub const USER: Ring = Ring(7);

    pub fn new(ring: u8) -> Self {
        Ring(ring & 7)
    }

    /// Ring selected by the high-order bits of a logical address.
    pub fn of(logical: u32) -> Self {
        Ring(((logical & RING_MASK) >> 28) as u8)
    }

    pub fn number(self) -> u8 {
        self.0
    }

    /// The ring expressed as the high-order mask bits of a logical address.
    pub fn mask(self) -> u32 {
        (self.0 as u32) << 28
    }
}

impl fmt::Display for Ring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ring {}", self.0)
    }
}

/// A word address inside one ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Addr {
    pub ring: Ring,
    pub offset: u32,
}

impl Addr {
    pub fn new(ring: Ring, offset: u32) -> Self {
        Self {
            ring,
            offset: offset & OFFSET_MASK,
        }
    }

    /// Split a 32-bit logical word address. The indirect bit is ignored.
    pub fn from_logical(logical: u32) -> Self {
        Self::new(Ring::of(logical), logical & OFFSET_MASK)
    }

    /// Resolve a 16-bit word address against the task's ring.
    pub fn from_narrow(ring: Ring, word: u32) -> Self {
        Self::new(ring, word & NARROW_OFFSET_MASK)
    }

    /// Merge back into the legacy 32-bit logical encoding.
    pub fn logical(self) -> u32 {
        self.ring.mask() | self.offset
    }

    /// Address `words` further on in the same ring.
    pub fn add(self, words: u32) -> Self {
        Self::new(self.ring, self.offset.wrapping_add(words))
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:o}", self.ring.0, self.offset)
    }
}

/// A byte inside a word: the left byte is the high-order one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BytePtr {
    pub word: Addr,
    pub low: bool,
}

impl BytePtr {
    /// Decode a 32-bit byte pointer (ring in bits 29..31).
    pub fn from_wide(raw: u32) -> Self {
        let ring = Ring::new((raw >> 29) as u8);
        Self {
            word: Addr::new(ring, (raw >> 1) & OFFSET_MASK),
            low: raw & 1 == 1,
        }
    }

    /// Decode a 16-bit byte pointer; the ring comes from the task.
    pub fn from_narrow(ring: Ring, raw: u32) -> Self {
        Self {
            word: Addr::from_narrow(ring, (raw & 0xFFFF) >> 1),
            low: raw & 1 == 1,
        }
    }

    pub fn to_wide(self) -> u32 {
        ((self.word.ring.number() as u32) << 29) | (self.word.offset << 1) | self.low as u32
    }

    /// The pointer `n` bytes further on.
    pub fn add(self, n: u32) -> Self {
        let index = (self.word.offset << 1 | self.low as u32).wrapping_add(n);
        Self {
            word: Addr::new(self.word.ring, index >> 1),
            low: index & 1 == 1,
        }
    }
}

/// A single bit of a word, numbered from the most significant bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitPtr {
    pub word: Addr,
    pub bit: u8,
}

impl BitPtr {
    pub fn new(word: Addr, bit: u8) -> Self {
        Self { word, bit: bit & 15 }
    }

    pub fn mask(self) -> u16 {
        word_bit(self.bit)
    }
}

/// Mask for bit `n` of a word in legacy numbering (bit 0 is the MSB).
pub const fn word_bit(n: u8) -> u16 {
    1 << (15 - (n & 15))
}

/// Extract `count` bits of a word starting at legacy bit `first`.
pub fn word_bits(word: u16, first: u8, count: u8) -> u16 {
    debug_assert!(first + count <= 16);
    let shift = 16 - (first + count) as u32;
    (word >> shift) & ((1u32 << count) - 1) as u16
}

/// Extract `count` bits of a doubleword starting at legacy bit `first`.
pub fn dword_bits(dword: u32, first: u8, count: u8) -> u32 {
    debug_assert!(first + count <= 32);
    let shift = 32 - (first + count) as u32;
    let mask = if count >= 32 { u32::MAX } else { (1u32 << count) - 1 };
    (dword >> shift) & mask
}
