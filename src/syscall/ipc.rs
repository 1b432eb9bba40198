//! ?CREATE (IPC files only) and ?ILKUP

use super::{SyscallCtx, SyscallResult};
use crate::error::Fatal;
use crate::layout::FIPC;

/// AC0 = byte pointer to the filename, AC2 = creation packet.
pub(super) fn create(ctx: &mut SyscallCtx<'_>) -> SyscallResult {
    let name = ctx.ac_string(0).to_uppercase();
    let layout = ctx.format.create();
    let (file_type, local_port) = {
        let pkt = ctx.packet();
        ((pkt.get(layout.cftyp) & 0xFF) as u16, pkt.get(layout.cpor) as u16)
    };

    if file_type != FIPC {
        return Err(Fatal::unimplemented(
            "?CREATE",
            format!("file type {:#o} for {}", file_type, name),
        ));
    }

    log::debug!("?CREATE IPC {} on local port {}", name, local_port);
    match ctx.agent.create_ipc(ctx.pid, &name, local_port) {
        Ok(()) => Ok(true),
        Err(e) => ctx.agent_failure(e),
    }
}

/// AC0 = byte pointer to the filename. Returns the global port in AC1 and
/// the file type in AC2.
pub(super) fn ilkup(ctx: &mut SyscallCtx<'_>) -> SyscallResult {
    let name = ctx.ac_string(0).to_uppercase();
    match ctx.agent.ipc_lookup(ctx.pid, &name) {
        Ok((global_port, ipc_type)) => {
            ctx.cpu.set_ac(1, global_port);
            ctx.cpu.set_ac(2, ipc_type as u32);
            Ok(true)
        }
        Err(e) => ctx.agent_failure(e),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;
    use crate::addr::BytePtr;
    use crate::cpu::Mode;
    use crate::error::codes;
    use crate::layout::{CREATE_PACKET, FIPC};
    use crate::memory::{write_string, Memory};

    const NAME: u32 = 0o200;
    const PKT: u32 = 0o100;

    fn prepare(h: &mut Harness, name: &str, file_type: u16, port: u16) {
        write_string(&h.mem, BytePtr { word: h.user(NAME), low: false }, name);
        let base = h.user(PKT);
        h.mem.write_word(base.add(CREATE_PACKET.cftyp.offset as u32), file_type);
        h.mem.write_word(base.add(CREATE_PACKET.cpor.offset as u32), port);
        h.regs.ac[0] = h.byte_ptr_raw(NAME, false);
        h.regs.ac[2] = h.word_ptr_raw(PKT);
    }

    #[test]
    fn create_then_lookup_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = Harness::new(Mode::Wide, b"", dir.path());
        prepare(&mut h, "server", FIPC, 12);
        assert!(h.call(0o000).unwrap());

        prepare(&mut h, "SERVER", 0, 0);
        assert!(h.call(0o263).unwrap());
        assert_eq!(h.regs.ac[1], ((h.pid as u32) << 16) | 12);
        assert_eq!(h.regs.ac[2], FIPC as u32);
    }

    #[test]
    fn duplicate_create_reports_name_exists() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = Harness::new(Mode::Narrow, b"", dir.path());
        prepare(&mut h, "PIPE", FIPC, 1);
        assert!(h.call(0o000).unwrap());
        assert!(!h.call(0o000).unwrap());
        assert_eq!(h.regs.ac[0], codes::ERNAE);
    }

    #[test]
    fn lookup_of_unknown_name_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = Harness::new(Mode::Wide, b"", dir.path());
        prepare(&mut h, "GHOST", 0, 0);
        assert!(!h.call(0o263).unwrap());
        assert_eq!(h.regs.ac[0], codes::ERFDE);
    }

    #[test]
    fn non_ipc_create_is_unimplemented() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = Harness::new(Mode::Wide, b"", dir.path());
        prepare(&mut h, "DATA", 0o104, 0);
        assert!(h.call(0o000).unwrap_err().is_unimplemented());
    }
}
