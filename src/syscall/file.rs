//! ?OPEN ?CLOSE ?READ ?WRITE ?RECREATE

use super::{SyscallCtx, SyscallResult};
use crate::layout::rec;
use crate::packet::MAX_STRING;

/// Bytes that end a data-sensitive record.
const DELIMITERS: [u8; 3] = [b'\n', 0o14, b'\r'];

pub(super) fn open(ctx: &mut SyscallCtx<'_>) -> SyscallResult {
    let io = ctx.format.io();
    let (path, options, file_type) = {
        let pkt = ctx.packet();
        (pkt.string(io.ifnp), pkt.get(io.isti) as u16, pkt.get(io.isto))
    };
    log::debug!("?OPEN {} options {:#o} type {:#o}", path, options, file_type);

    match ctx.agent.open(ctx.pid, &path, options) {
        Ok(channel) => {
            ctx.packet().set(io.ich, channel as u32);
            Ok(true)
        }
        Err(e) => ctx.agent_failure(e),
    }
}

pub(super) fn close(ctx: &mut SyscallCtx<'_>) -> SyscallResult {
    let channel = ctx.packet().get(ctx.format.io().ich) as u16;
    match ctx.agent.close(ctx.pid, channel) {
        Ok(()) => Ok(true),
        Err(e) => ctx.agent_failure(e),
    }
}

pub(super) fn read(ctx: &mut SyscallCtx<'_>) -> SyscallResult {
    let io = ctx.format.io();
    let (channel, format, max, buffer) = {
        let pkt = ctx.packet();
        (
            pkt.get(io.ich) as u16,
            pkt.sub(io.rec_format),
            pkt.get(io.ircl) as usize,
            pkt.byte_ptr(io.ibad),
        )
    };
    let line = format == rec::RTDS;

    let bytes = match ctx.agent.read(ctx.pid, channel, line, max) {
        Ok(b) => b,
        Err(e) => return ctx.agent_failure(e),
    };
    ctx.mem.write_bytes(buffer, &bytes);
    ctx.packet().set(io.irlr, bytes.len() as u32);
    log::trace!("?READ channel {} returned {} bytes", channel, bytes.len());
    Ok(true)
}

pub(super) fn write(ctx: &mut SyscallCtx<'_>) -> SyscallResult {
    let io = ctx.format.io();
    let (channel, format, length, buffer) = {
        let pkt = ctx.packet();
        (
            pkt.get(io.ich) as u16,
            pkt.sub(io.rec_format),
            pkt.get(io.ircl) as usize,
            pkt.byte_ptr(io.ibad),
        )
    };

    let bytes = if format == rec::RTDS {
        let limit = if length == 0 { MAX_STRING } else { length };
        data_sensitive_record(&ctx.mem.read_bytes(buffer, limit))
    } else {
        ctx.mem.read_bytes(buffer, length)
    };

    match ctx.agent.write(ctx.pid, channel, bytes) {
        Ok(n) => {
            ctx.packet().set(io.irlr, n as u32);
            Ok(true)
        }
        Err(e) => ctx.agent_failure(e),
    }
}

/// Cut a data-sensitive record after its delimiter, or before a NUL.
fn data_sensitive_record(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    for &b in raw {
        if b == 0 {
            break;
        }
        out.push(b);
        if DELIMITERS.contains(&b) {
            break;
        }
    }
    out
}

/// AC0 holds a byte pointer to the pathname.
pub(super) fn recreate(ctx: &mut SyscallCtx<'_>) -> SyscallResult {
    let path = ctx.ac_string(0);
    log::debug!("?RECREATE {}", path);
    match ctx.agent.recreate(ctx.pid, &path) {
        Ok(()) => Ok(true),
        Err(e) => ctx.agent_failure(e),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;
    use super::*;
    use crate::addr::{word_bit, BytePtr};
    use crate::cpu::Mode;
    use crate::error::{codes, Fatal};
    use crate::layout::{format_for, isti};
    use crate::memory::{write_string, Memory};

    const PKT: u32 = 0o100;
    const NAME: u32 = 0o200;
    const BUF: u32 = 0o300;

    fn setup_io(h: &mut Harness, channel: u16, rec_format: u16, ircl: u16) {
        let io = format_for(h.mode).io();
        let base = h.user(PKT);
        h.mem.write_word(base.add(io.ich.offset as u32), channel);
        h.mem.write_word(base.add(io.isti.offset as u32), rec_format);
        h.mem.write_word(base.add(io.ircl.offset as u32), ircl);
        let buf = h.byte_ptr_raw(BUF, false);
        match io.ibad.width {
            crate::layout::Width::Word => h.mem.write_word(base.add(io.ibad.offset as u32), buf as u16),
            crate::layout::Width::Dword => h.mem.write_dword(base.add(io.ibad.offset as u32), buf),
        }
        h.regs.ac[2] = h.word_ptr_raw(PKT);
    }

    fn irlr(h: &Harness) -> u16 {
        let io = format_for(h.mode).io();
        h.mem.read_word(h.user(PKT).add(io.irlr.offset as u32))
    }

    #[test]
    fn data_sensitive_records_end_at_delimiter_or_nul() {
        assert_eq!(data_sensitive_record(b"HI\nMORE"), b"HI\n".to_vec());
        assert_eq!(data_sensitive_record(b"HI\0MORE"), b"HI".to_vec());
        assert_eq!(data_sensitive_record(b"ABC"), b"ABC".to_vec());
    }

    #[test]
    fn console_line_read_fills_buffer_in_both_modes() {
        for mode in [Mode::Narrow, Mode::Wide] {
            let dir = tempfile::tempdir().unwrap();
            let mut h = Harness::new(mode, b"HELLO\n", dir.path());
            setup_io(&mut h, 0, rec::RTDS, 80);
            assert!(h.call(0o025).unwrap());
            assert_eq!(irlr(&h), 5);
            let buf = BytePtr { word: h.user(BUF), low: false };
            assert_eq!(h.mem.read_bytes(buf, 5), b"HELLO".to_vec());
        }
    }

    #[test]
    fn console_eof_is_reportable() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = Harness::new(Mode::Wide, b"", dir.path());
        setup_io(&mut h, 0, rec::RTDS, 80);
        assert!(!h.call(0o025).unwrap());
        assert_eq!(h.regs.ac[0], codes::EREOF);
    }

    #[test]
    fn console_write_reports_length() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = Harness::new(Mode::Wide, b"", dir.path());
        write_string(&h.mem, BytePtr { word: h.user(BUF), low: false }, "DONE!\nIGNORED");
        setup_io(&mut h, 0, rec::RTDS, 0);
        assert!(h.call(0o026).unwrap());
        assert_eq!(irlr(&h), 6);
        assert_eq!(h.out.0.lock().as_slice(), b"DONE!\n");
    }

    #[test]
    fn fixed_length_write_sends_exact_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = Harness::new(Mode::Narrow, b"", dir.path());
        write_string(&h.mem, BytePtr { word: h.user(BUF), low: false }, "ABCDEF");
        setup_io(&mut h, 0, rec::RTDY, 4);
        assert!(h.call(0o026).unwrap());
        assert_eq!(h.out.0.lock().as_slice(), b"ABCD");
    }

    #[test]
    fn read_on_unopened_channel_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = Harness::new(Mode::Wide, b"x\n", dir.path());
        setup_io(&mut h, 9, rec::RTDS, 80);
        assert!(matches!(h.call(0o025), Err(Fatal::Protocol { .. })));
    }

    #[test]
    fn open_creates_file_and_stores_channel() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = Harness::new(Mode::Wide, b"", dir.path());
        let io = format_for(h.mode).io();
        let base = h.user(PKT);
        write_string(&h.mem, BytePtr { word: h.user(NAME), low: false }, "OUT.DAT");
        h.mem.write_word(base.add(io.isti.offset as u32), word_bit(isti::OFCR) | word_bit(isti::OFOT));
        h.mem.write_dword(base.add(io.ifnp.offset as u32), h.byte_ptr_raw(NAME, false));
        h.regs.ac[2] = h.word_ptr_raw(PKT);

        assert!(h.call(0o023).unwrap());
        assert_eq!(h.mem.read_word(base.add(io.ich.offset as u32)), 1);
        assert!(dir.path().join("OUT.DAT").exists());
    }

    #[test]
    fn open_missing_file_sets_ac0() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = Harness::new(Mode::Narrow, b"", dir.path());
        let io = format_for(h.mode).io();
        let base = h.user(PKT);
        write_string(&h.mem, BytePtr { word: h.user(NAME), low: false }, "NOPE");
        h.mem.write_word(base.add(io.isti.offset as u32), word_bit(isti::OFIN));
        h.mem.write_word(base.add(io.ifnp.offset as u32), h.byte_ptr_raw(NAME, false) as u16);
        h.regs.ac[2] = h.word_ptr_raw(PKT);

        assert!(!h.call(0o023).unwrap());
        assert_eq!(h.regs.ac[0], codes::ERFDE);
    }

    #[test]
    fn recreate_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("LOG"), b"old contents").unwrap();
        let mut h = Harness::new(Mode::Wide, b"", dir.path());
        write_string(&h.mem, BytePtr { word: h.user(NAME), low: false }, "LOG");
        h.regs.ac[0] = h.byte_ptr_raw(NAME, false);
        assert!(h.call(0o251).unwrap());
        assert_eq!(std::fs::metadata(dir.path().join("LOG")).unwrap().len(), 0);
    }

    #[test]
    fn close_console_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = Harness::new(Mode::Wide, b"", dir.path());
        setup_io(&mut h, 0, 0, 0);
        assert!(h.call(0o024).unwrap());
    }
}
