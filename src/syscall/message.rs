//! ?GTMES: fetch parts of the initial message.

use super::{SyscallCtx, SyscallResult};
use crate::agent::{AgentReply, MessageQuery};
use crate::error::{codes, Fatal};
use crate::layout::greq;
use crate::memory::write_string;

pub(super) fn gtmes(ctx: &mut SyscallCtx<'_>) -> SyscallResult {
    let layout = ctx.format.gtmes();
    let (request, number, result) = {
        let pkt = ctx.packet();
        (pkt.get(layout.greq), pkt.get(layout.gnum) as u16, pkt.byte_ptr(layout.gres))
    };

    let query = match request {
        greq::GMES => MessageQuery::Whole,
        greq::GCMD => MessageQuery::Command,
        greq::GCNT => MessageQuery::Count,
        greq::GARG => MessageQuery::Arg(number),
        greq::GTSW | greq::GSWS => {
            return Err(Fatal::unimplemented("?GTMES", "switch requests"));
        }
        other => {
            log::warn!("?GTMES request {} not recognised", other);
            return ctx.fail(codes::ERICM);
        }
    };

    match ctx.agent.get_message(ctx.pid, query) {
        Ok(AgentReply::Count(n)) => {
            ctx.cpu.set_ac(0, n as u32);
            Ok(true)
        }
        Ok(AgentReply::Text(text)) => {
            write_string(ctx.mem, result, &text);
            ctx.cpu.set_ac(1, text.len() as u32);
            Ok(true)
        }
        Ok(other) => Err(Fatal::protocol("?GTMES", format!("agent answered with {:?}", other))),
        Err(e) => ctx.agent_failure(e),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;
    use super::*;
    use crate::addr::BytePtr;
    use crate::cpu::Mode;
    use crate::layout::{format_for, Width};
    use crate::memory::{read_string, Memory};

    const PKT: u32 = 0o100;
    const RES: u32 = 0o400;

    fn request(h: &mut Harness, req: u32, num: u16) {
        let layout = format_for(h.mode).gtmes();
        let base = h.user(PKT);
        h.mem.write_word(base.add(layout.greq.offset as u32), req as u16);
        h.mem.write_word(base.add(layout.gnum.offset as u32), num);
        let res = h.byte_ptr_raw(RES, false);
        match layout.gres.width {
            Width::Word => h.mem.write_word(base.add(layout.gres.offset as u32), res as u16),
            Width::Dword => h.mem.write_dword(base.add(layout.gres.offset as u32), res),
        }
        h.regs.ac[2] = h.word_ptr_raw(PKT);
    }

    fn result(h: &Harness) -> String {
        read_string(&h.mem, BytePtr { word: h.user(RES), low: false }, 256)
    }

    #[test]
    fn returns_message_parts_in_both_modes() {
        for mode in [Mode::Narrow, Mode::Wide] {
            let dir = tempfile::tempdir().unwrap();
            let mut h = Harness::new(mode, b"", dir.path());

            request(&mut h, greq::GMES, 0);
            assert!(h.call(0o166).unwrap());
            assert_eq!(result(&h), "TEST ONE TWO");
            assert_eq!(h.regs.ac[1], 12);

            request(&mut h, greq::GCNT, 0);
            assert!(h.call(0o166).unwrap());
            assert_eq!(h.regs.ac[0], 2);

            request(&mut h, greq::GARG, 2);
            assert!(h.call(0o166).unwrap());
            assert_eq!(result(&h), "TWO");
        }
    }

    #[test]
    fn missing_argument_is_reportable() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = Harness::new(Mode::Wide, b"", dir.path());
        request(&mut h, greq::GARG, 5);
        assert!(!h.call(0o166).unwrap());
        assert_eq!(h.regs.ac[0], codes::ERARG);
    }

    #[test]
    fn switch_requests_are_unimplemented() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = Harness::new(Mode::Wide, b"", dir.path());
        request(&mut h, greq::GTSW, 0);
        assert!(h.call(0o166).unwrap_err().is_unimplemented());
    }
}
