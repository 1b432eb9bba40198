//! Emulated memory access.
//!
//! The physical memory model belongs to the CPU subsystem; this layer only
//! needs the [`Memory`] primitives. Implementations serialize concurrent
//! access themselves, so every method takes `&self`.
//!
//! Words are big-endian: the left (even) byte of a word is its high byte.

use crate::addr::{Addr, BitPtr, BytePtr, Ring};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Word/doubleword/byte/bit access to ring-qualified emulated memory.
pub trait Memory: Send + Sync {
    fn read_word(&self, addr: Addr) -> u16;

    fn write_word(&self, addr: Addr, value: u16);

    fn read_dword(&self, addr: Addr) -> u32 {
        ((self.read_word(addr) as u32) << 16) | self.read_word(addr.add(1)) as u32
    }

    fn write_dword(&self, addr: Addr, value: u32) {
        self.write_word(addr, (value >> 16) as u16);
        self.write_word(addr.add(1), value as u16);
    }

    fn read_byte(&self, ptr: BytePtr) -> u8 {
        let word = self.read_word(ptr.word);
        if ptr.low {
            word as u8
        } else {
            (word >> 8) as u8
        }
    }

    fn write_byte(&self, ptr: BytePtr, value: u8) {
        let word = self.read_word(ptr.word);
        let word = if ptr.low {
            (word & 0xFF00) | value as u16
        } else {
            (word & 0x00FF) | ((value as u16) << 8)
        };
        self.write_word(ptr.word, word);
    }

    fn read_bytes(&self, ptr: BytePtr, len: usize) -> Vec<u8> {
        (0..len).map(|i| self.read_byte(ptr.add(i as u32))).collect()
    }

    fn write_bytes(&self, ptr: BytePtr, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            self.write_byte(ptr.add(i as u32), *b);
        }
    }

    /// Test a single bit (legacy numbering, bit 0 is the MSB).
    fn test_bit(&self, ptr: BitPtr) -> bool {
        self.read_word(ptr.word) & ptr.mask() != 0
    }

    /// Copy a program image into consecutive words.
    fn load_words(&self, start: Addr, words: &[u16]) {
        for (i, w) in words.iter().enumerate() {
            self.write_word(start.add(i as u32), *w);
        }
    }
}

/// Read a NUL-terminated legacy string, stopping after `max` bytes.
pub fn read_string(mem: &dyn Memory, ptr: BytePtr, max: usize) -> String {
    let mut out = Vec::new();
    for i in 0..max {
        let b = mem.read_byte(ptr.add(i as u32));
        if b == 0 {
            break;
        }
        out.push(b);
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Write `s` followed by a NUL terminator.
pub fn write_string(mem: &dyn Memory, ptr: BytePtr, s: &str) {
    mem.write_bytes(ptr, s.as_bytes());
    mem.write_byte(ptr.add(s.len() as u32), 0);
}

/// Flat word store, one lazily allocated segment per ring.
///
/// Accesses beyond the segment size read as zero and drop writes.
pub struct SegmentedMemory {
    words_per_ring: usize,
    segments: RwLock<HashMap<Ring, Vec<u16>>>,
}

impl SegmentedMemory {
    pub fn new(words_per_ring: usize) -> Self {
        Self {
            words_per_ring,
            segments: RwLock::new(HashMap::new()),
        }
    }
}

impl Memory for SegmentedMemory {
    fn read_word(&self, addr: Addr) -> u16 {
        let segments = self.segments.read();
        segments
            .get(&addr.ring)
            .and_then(|seg| seg.get(addr.offset as usize))
            .copied()
            .unwrap_or(0)
    }

    fn write_word(&self, addr: Addr, value: u16) {
        let index = addr.offset as usize;
        if index >= self.words_per_ring {
            log::warn!("write outside {} segment dropped at {}", addr.ring, addr);
            return;
        }
        let mut segments = self.segments.write();
        let seg = segments
            .entry(addr.ring)
            .or_insert_with(|| vec![0; self.words_per_ring]);
        seg[index] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(offset: u32) -> Addr {
        Addr::new(Ring::USER, offset)
    }

    #[test]
    fn dwords_are_big_endian_word_pairs() {
        let mem = SegmentedMemory::new(64);
        mem.write_dword(user(4), 0x1234_5678);
        assert_eq!(mem.read_word(user(4)), 0x1234);
        assert_eq!(mem.read_word(user(5)), 0x5678);
        assert_eq!(mem.read_dword(user(4)), 0x1234_5678);
    }

    #[test]
    fn bytes_pack_left_byte_high() {
        let mem = SegmentedMemory::new(64);
        let ptr = BytePtr { word: user(8), low: false };
        mem.write_bytes(ptr, b"ABC");
        assert_eq!(mem.read_word(user(8)), 0x4142);
        assert_eq!(mem.read_word(user(9)) >> 8, 0x43);
        assert_eq!(mem.read_bytes(ptr.add(1), 2), b"BC");
    }

    #[test]
    fn rings_are_separate_segments() {
        let mem = SegmentedMemory::new(16);
        mem.write_word(Addr::new(Ring::new(3), 2), 7);
        assert_eq!(mem.read_word(Addr::new(Ring::USER, 2)), 0);
        assert_eq!(mem.read_word(Addr::new(Ring::new(3), 2)), 7);
    }

    #[test]
    fn out_of_range_access_is_harmless() {
        let mem = SegmentedMemory::new(4);
        mem.write_word(user(100), 0xFFFF);
        assert_eq!(mem.read_word(user(100)), 0);
    }

    #[test]
    fn strings_stop_at_nul() {
        let mem = SegmentedMemory::new(64);
        let ptr = BytePtr { word: user(0), low: true };
        write_string(&mem, ptr, "HI");
        assert_eq!(read_string(&mem, ptr, 32), "HI");
        assert_eq!(read_string(&mem, ptr, 1), "H");
    }

    #[test]
    fn bit_test_uses_legacy_numbering() {
        let mem = SegmentedMemory::new(8);
        mem.write_word(user(1), 0x2000);
        assert!(mem.test_bit(BitPtr::new(user(1), 2)));
        assert!(!mem.test_bit(BitPtr::new(user(1), 3)));
    }
}
