//! Typed access to a syscall packet in emulated memory.

use crate::addr::{word_bits, Addr, BitPtr, BytePtr, Ring};
use crate::layout::{Field, FieldBit, PacketFormat, SubField, Width};
use crate::memory::{read_string, Memory};

/// Longest pathname or message accepted from a packet.
pub const MAX_STRING: usize = 256;

/// A packet anchored at `base`, read through the task's format.
pub struct Packet<'a> {
    mem: &'a dyn Memory,
    format: &'a dyn PacketFormat,
    ring: Ring,
    base: Addr,
}

impl<'a> Packet<'a> {
    pub fn new(mem: &'a dyn Memory, format: &'a dyn PacketFormat, ring: Ring, base: Addr) -> Self {
        Self {
            mem,
            format,
            ring,
            base,
        }
    }

    pub fn get(&self, field: Field) -> u32 {
        let at = self.base.add(field.offset as u32);
        match field.width {
            Width::Word => self.mem.read_word(at) as u32,
            Width::Dword => self.mem.read_dword(at),
        }
    }

    pub fn set(&self, field: Field, value: u32) {
        let at = self.base.add(field.offset as u32);
        match field.width {
            Width::Word => self.mem.write_word(at, value as u16),
            Width::Dword => self.mem.write_dword(at, value),
        }
    }

    pub fn flag(&self, bit: FieldBit) -> bool {
        self.mem
            .test_bit(BitPtr::new(self.base.add(bit.word as u32), bit.bit))
    }

    pub fn sub(&self, sub: SubField) -> u16 {
        let word = self.mem.read_word(self.base.add(sub.word as u32));
        word_bits(word, sub.first, sub.count)
    }

    /// Decode a byte-pointer field.
    pub fn byte_ptr(&self, field: Field) -> BytePtr {
        self.format.byte_ptr(self.ring, self.get(field))
    }

    /// Read the NUL-terminated string a byte-pointer field points at.
    pub fn string(&self, field: Field) -> String {
        read_string(self.mem, self.byte_ptr(field), MAX_STRING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::Mode;
    use crate::layout::{format_for, isti, rec, IO_NARROW, IO_WIDE};
    use crate::memory::{write_string, SegmentedMemory};
    use crate::addr::word_bit;

    #[test]
    fn wide_packet_reads_dword_pointers() {
        let mem = SegmentedMemory::new(256);
        let base = Addr::new(Ring::USER, 0x40);
        let name = BytePtr { word: Addr::new(Ring::USER, 0x80), low: false };
        write_string(&mem, name, ":UDD:TEST");
        mem.write_dword(base.add(IO_WIDE.ifnp.offset as u32), name.to_wide());

        let pkt = Packet::new(&mem, format_for(Mode::Wide), Ring::USER, base);
        assert_eq!(pkt.string(IO_WIDE.ifnp), ":UDD:TEST");

        pkt.set(IO_WIDE.irlr, 42);
        assert_eq!(mem.read_word(base.add(8)), 42);
    }

    #[test]
    fn narrow_packet_resolves_pointers_in_task_ring() {
        let mem = SegmentedMemory::new(256);
        let ring = Ring::new(7);
        let base = Addr::new(ring, 0x20);
        write_string(&mem, BytePtr { word: Addr::new(ring, 0x60), low: false }, "FOO");
        mem.write_word(base.add(IO_NARROW.ifnp.offset as u32), 0x60 << 1);

        let pkt = Packet::new(&mem, format_for(Mode::Narrow), ring, base);
        assert_eq!(pkt.string(IO_NARROW.ifnp), "FOO");
    }

    #[test]
    fn option_flags_and_record_format() {
        let mem = SegmentedMemory::new(64);
        let base = Addr::new(Ring::USER, 0);
        mem.write_word(base.add(1), word_bit(isti::OFIN) | rec::RTDS);
        let pkt = Packet::new(&mem, format_for(Mode::Wide), Ring::USER, base);
        assert_eq!(pkt.sub(IO_WIDE.rec_format), rec::RTDS);
        assert!(pkt.flag(FieldBit { word: 1, bit: isti::OFIN }));
        assert!(!pkt.flag(FieldBit { word: 1, bit: isti::OFOT }));
    }
}
