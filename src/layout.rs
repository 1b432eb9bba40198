//! Packet layouts shared with unmodified legacy binaries.
//!
//! Each packet has a 16-bit (narrow) and a 32-bit (wide) table. Handlers
//! never branch on program mode: they ask the task's [`PacketFormat`] for
//! the table and read fields through it.

use crate::addr::{Addr, BytePtr, Ring};
use crate::cpu::Mode;

/// Storage width of a packet field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Word,
    Dword,
}

/// A packet field: word offset from the packet base plus width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub offset: u16,
    pub width: Width,
}

const fn word(offset: u16) -> Field {
    Field {
        offset,
        width: Width::Word,
    }
}

const fn dword(offset: u16) -> Field {
    Field {
        offset,
        width: Width::Dword,
    }
}

/// A flag bit inside a packet: word offset plus legacy bit number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldBit {
    pub word: u16,
    pub bit: u8,
}

/// A bit range inside one packet word (legacy numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubField {
    pub word: u16,
    pub first: u8,
    pub count: u8,
}

// ============================================================================
// GENERAL I/O PACKET (?OPEN, ?CLOSE, ?READ, ?WRITE, ?RECREATE)
// ============================================================================

#[derive(Debug)]
pub struct IoPacket {
    /// Channel number
    pub ich: Field,
    /// Options in / file status
    pub isti: Field,
    /// File type
    pub isto: Field,
    /// Physical record size
    pub imrs: Field,
    /// Byte pointer to the record buffer
    pub ibad: Field,
    pub ires: Field,
    /// Record length
    pub ircl: Field,
    /// Record length returned
    pub irlr: Field,
    pub irnw: Field,
    /// Record number, high and low words
    pub irnh: Field,
    pub irnl: Field,
    /// Byte pointer to the pathname
    pub ifnp: Field,
    /// Delimiter table address
    pub idel: Field,
    /// Record format bits of `isti`
    pub rec_format: SubField,
    pub size: u16,
}

/// Option bits of the `?ISTI` word (legacy bit numbers).
pub mod isti {
    /// Change record format
    pub const ICRF: u8 = 0;
    /// Append
    pub const APND: u8 = 1;
    /// Create if missing, open if present
    pub const OFCR: u8 = 2;
    /// Create; an existing file is an error
    pub const OFCE: u8 = 3;
    /// Open for input
    pub const OFIN: u8 = 4;
    /// Open for output
    pub const OFOT: u8 = 5;
    /// Delete an existing file first
    pub const OFDE: u8 = 6;
}

/// Record formats held in the low bits of `?ISTI`.
pub mod rec {
    pub const RTDY: u16 = 1;
    /// Data sensitive: records end at a delimiter
    pub const RTDS: u16 = 2;
    pub const RTFX: u16 = 3;
    pub const RTVR: u16 = 4;
    pub const RTUN: u16 = 5;
    pub const RTVB: u16 = 6;
}

pub static IO_NARROW: IoPacket = IoPacket {
    ich: word(0),
    isti: word(1),
    isto: word(2),
    imrs: word(3),
    ibad: word(4),
    ires: word(5),
    ircl: word(6),
    irlr: word(7),
    irnw: word(8),
    irnh: word(9),
    irnl: word(10),
    ifnp: word(11),
    idel: word(12),
    rec_format: SubField {
        word: 1,
        first: 13,
        count: 3,
    },
    size: 13,
};

pub static IO_WIDE: IoPacket = IoPacket {
    ich: word(0),
    isti: word(1),
    isto: word(2),
    imrs: word(3),
    ibad: dword(4),
    ires: word(6),
    ircl: word(7),
    irlr: word(8),
    irnw: word(9),
    irnh: word(10),
    irnl: word(11),
    ifnp: dword(12),
    idel: dword(14),
    rec_format: SubField {
        word: 1,
        first: 13,
        count: 3,
    },
    size: 16,
};

// ============================================================================
// GET INITIAL MESSAGE PACKET (?GTMES)
// ============================================================================

#[derive(Debug)]
pub struct GtmesPacket {
    /// Request type
    pub greq: Field,
    /// Argument number
    pub gnum: Field,
    /// Byte pointer to a switch name
    pub gsw: Field,
    /// Byte pointer to the result buffer
    pub gres: Field,
    pub size: u16,
}

/// `?GREQ` request types.
pub mod greq {
    /// Entire message
    pub const GMES: u32 = 0;
    /// Command line without the program name
    pub const GCMD: u32 = 1;
    /// Argument count
    pub const GCNT: u32 = 2;
    /// Argument `?GNUM`
    pub const GARG: u32 = 3;
    /// Test for a switch
    pub const GTSW: u32 = 4;
    /// Get all switches
    pub const GSWS: u32 = 5;
}

pub static GTMES_NARROW: GtmesPacket = GtmesPacket {
    greq: word(0),
    gnum: word(1),
    gsw: word(2),
    gres: word(3),
    size: 4,
};

pub static GTMES_WIDE: GtmesPacket = GtmesPacket {
    greq: word(0),
    gnum: word(1),
    gsw: dword(2),
    gres: dword(4),
    size: 6,
};

// ============================================================================
// PRIVILEGE PACKET (?SYSPRV)
// ============================================================================

#[derive(Debug)]
pub struct SysprvPacket {
    /// Function code
    pub func: Field,
    pub flags: Field,
    /// Privilege mode (returned)
    pub mode: Field,
    /// Sub-packet pointer
    pub subpkt: Field,
    /// Exclusive-access flag
    pub exclusive: FieldBit,
    pub size: u16,
}

/// `?SYSPRV` function codes.
pub mod sysprv {
    pub const GET: u32 = 0;
    pub const ENTER: u32 = 1;
    pub const LEAVE: u32 = 2;

    /// No privilege asserted
    pub const MODE_NONE: u32 = 0;
    pub const MODE_SUPERUSER: u32 = 1;
    pub const MODE_SUPERPROCESS: u32 = 2;
    pub const MODE_SYSMGR: u32 = 3;
}

pub static SYSPRV_NARROW: SysprvPacket = SysprvPacket {
    func: word(0),
    flags: word(1),
    mode: word(2),
    subpkt: word(3),
    exclusive: FieldBit { word: 1, bit: 0 },
    size: 4,
};

pub static SYSPRV_WIDE: SysprvPacket = SysprvPacket {
    func: word(0),
    flags: word(1),
    mode: word(2),
    subpkt: dword(3),
    exclusive: FieldBit { word: 1, bit: 0 },
    size: 5,
};

// ============================================================================
// SYSTEM INFORMATION PACKET (?SINFO)
// ============================================================================

#[derive(Debug)]
pub struct SinfoPacket {
    /// System revision
    pub sirn: Field,
    /// Physical memory size in pages
    pub simm: Field,
    /// Byte pointer receiving the master LDU name
    pub siln: Field,
    /// Byte pointer receiving the system identifier
    pub siid: Field,
    /// Byte pointer receiving the operating system name
    pub sios: Field,
    pub size: u16,
}

pub static SINFO_NARROW: SinfoPacket = SinfoPacket {
    sirn: word(0),
    simm: dword(1),
    siln: word(3),
    siid: word(4),
    sios: word(5),
    size: 6,
};

pub static SINFO_WIDE: SinfoPacket = SinfoPacket {
    sirn: word(0),
    simm: dword(1),
    siln: dword(3),
    siid: dword(5),
    sios: dword(7),
    size: 9,
};

// ============================================================================
// CREATE PACKET (?CREATE)
// ============================================================================

#[derive(Debug)]
pub struct CreatePacket {
    /// Record format (left byte) and file type (right byte)
    pub cftyp: Field,
    /// Local IPC port number
    pub cpor: Field,
    pub size: u16,
}

/// IPC file type, also the type tag returned by `?ILKUP`.
pub const FIPC: u16 = 0o63;

pub static CREATE_PACKET: CreatePacket = CreatePacket {
    cftyp: word(0),
    cpor: word(1),
    size: 2,
};

// ============================================================================
// TASK DEFINITION PACKET (?TASK), 32-bit only
// ============================================================================

#[derive(Debug)]
pub struct TaskPacket {
    /// Link to the next definition; must be zero
    pub dlnk: Field,
    pub dpri: Field,
    /// Requested TID, zero for any
    pub did: Field,
    /// Start address
    pub dpc: Field,
    /// Initial AC2
    pub dac2: Field,
    /// Stack base
    pub dstb: Field,
    /// Stack size in words
    pub dsts: Field,
    /// Stack-fault handler
    pub dsfh: Field,
    pub size: u16,
}

pub static TASK_WIDE: TaskPacket = TaskPacket {
    dlnk: dword(0),
    dpri: word(2),
    did: word(3),
    dpc: dword(4),
    dac2: dword(6),
    dstb: dword(8),
    dsts: dword(10),
    dsfh: dword(12),
    size: 14,
};

// ============================================================================
// FORMAT SELECTION
// ============================================================================

/// Packet tables and pointer decoding for one program mode.
pub trait PacketFormat: Send + Sync {
    fn mode(&self) -> Mode;

    fn io(&self) -> &'static IoPacket;

    fn gtmes(&self) -> &'static GtmesPacket;

    fn sysprv(&self) -> &'static SysprvPacket;

    fn sinfo(&self) -> &'static SinfoPacket;

    fn create(&self) -> &'static CreatePacket {
        &CREATE_PACKET
    }

    /// `None` when the mode has no task-definition packet.
    fn task(&self) -> Option<&'static TaskPacket>;

    /// Decode a word address held in an accumulator or packet field.
    fn word_ptr(&self, ring: Ring, raw: u32) -> Addr;

    /// Decode a byte pointer held in an accumulator or packet field.
    fn byte_ptr(&self, ring: Ring, raw: u32) -> BytePtr;

    /// Encode a word address the way the program expects it back.
    fn word_value(&self, addr: Addr) -> u32;

    /// Accumulator contents as a signed number.
    fn signed(&self, raw: u32) -> i32;
}

pub struct NarrowFormat;

pub struct WideFormat;

impl PacketFormat for NarrowFormat {
    fn mode(&self) -> Mode {
        Mode::Narrow
    }

    fn io(&self) -> &'static IoPacket {
        &IO_NARROW
    }

    fn gtmes(&self) -> &'static GtmesPacket {
        &GTMES_NARROW
    }

    fn sysprv(&self) -> &'static SysprvPacket {
        &SYSPRV_NARROW
    }

    fn sinfo(&self) -> &'static SinfoPacket {
        &SINFO_NARROW
    }

    fn task(&self) -> Option<&'static TaskPacket> {
        None
    }

    fn word_ptr(&self, ring: Ring, raw: u32) -> Addr {
        Addr::from_narrow(ring, raw)
    }

    fn byte_ptr(&self, ring: Ring, raw: u32) -> BytePtr {
        BytePtr::from_narrow(ring, raw)
    }

    fn word_value(&self, addr: Addr) -> u32 {
        addr.offset & crate::addr::NARROW_OFFSET_MASK
    }

    fn signed(&self, raw: u32) -> i32 {
        raw as u16 as i16 as i32
    }
}

impl PacketFormat for WideFormat {
    fn mode(&self) -> Mode {
        Mode::Wide
    }

    fn io(&self) -> &'static IoPacket {
        &IO_WIDE
    }

    fn gtmes(&self) -> &'static GtmesPacket {
        &GTMES_WIDE
    }

    fn sysprv(&self) -> &'static SysprvPacket {
        &SYSPRV_WIDE
    }

    fn sinfo(&self) -> &'static SinfoPacket {
        &SINFO_WIDE
    }

    fn task(&self) -> Option<&'static TaskPacket> {
        Some(&TASK_WIDE)
    }

    fn word_ptr(&self, _ring: Ring, raw: u32) -> Addr {
        Addr::from_logical(raw)
    }

    fn byte_ptr(&self, _ring: Ring, raw: u32) -> BytePtr {
        BytePtr::from_wide(raw)
    }

    fn word_value(&self, addr: Addr) -> u32 {
        addr.logical()
    }

    fn signed(&self, raw: u32) -> i32 {
        raw as i32
    }
}

static NARROW: NarrowFormat = NarrowFormat;
static WIDE: WideFormat = WideFormat;

/// The packet format matching a task's mode flag.
pub fn format_for(mode: Mode) -> &'static dyn PacketFormat {
    match mode {
        Mode::Narrow => &NARROW,
        Mode::Wide => &WIDE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(f: Field) -> u16 {
        match f.width {
            Width::Word => f.offset + 1,
            Width::Dword => f.offset + 2,
        }
    }

    #[test]
    fn io_fields_fit_inside_packet() {
        for table in [&IO_NARROW, &IO_WIDE] {
            let fields = [
                table.ich, table.isti, table.isto, table.imrs, table.ibad, table.ires,
                table.ircl, table.irlr, table.irnw, table.irnh, table.irnl, table.ifnp,
                table.idel,
            ];
            let end = fields.iter().map(|f| span(*f)).max().unwrap();
            assert_eq!(end, table.size);
        }
    }

    #[test]
    fn wide_pointers_are_doublewords() {
        assert_eq!(IO_WIDE.ibad.width, Width::Dword);
        assert_eq!(IO_WIDE.ifnp, dword(12));
        assert_eq!(GTMES_WIDE.gres, dword(4));
        assert_eq!(IO_NARROW.ifnp, word(11));
        assert_eq!(GTMES_NARROW.gres, word(3));
    }

    #[test]
    fn format_selection_follows_mode() {
        assert_eq!(format_for(Mode::Narrow).mode(), Mode::Narrow);
        assert!(format_for(Mode::Narrow).task().is_none());
        assert_eq!(format_for(Mode::Wide).task().map(|t| t.size), Some(14));
    }

    #[test]
    fn narrow_pointers_resolve_in_task_ring() {
        let f = format_for(Mode::Narrow);
        let bp = f.byte_ptr(Ring::new(5), 0x0021);
        assert_eq!(bp.word, Addr::new(Ring::new(5), 0x10));
        assert!(bp.low);
        let wide = format_for(Mode::Wide).word_ptr(Ring::new(5), 0x7000_0040);
        assert_eq!(wide.ring, Ring::USER);
    }

    #[test]
    fn accumulators_sign_extend_by_width() {
        assert_eq!(format_for(Mode::Narrow).signed(0xFFFF), -1);
        assert_eq!(format_for(Mode::Wide).signed(0x0000_FFFF), 0xFFFF);
        assert_eq!(format_for(Mode::Wide).signed(u32::MAX), -1);
        let top = Addr::new(Ring::USER, 0x3FF);
        assert_eq!(format_for(Mode::Narrow).word_value(top), 0x3FF);
        assert_eq!(format_for(Mode::Wide).word_value(top), 0x7000_03FF);
    }
}
