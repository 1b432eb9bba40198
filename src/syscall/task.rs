//! ?TASK: start another task in the calling process.

use super::{SyscallCtx, SyscallResult};
use crate::addr::Addr;
use crate::cpu::WideStack;
use crate::error::Fatal;
use crate::task::TaskSpec;

pub(super) fn task(ctx: &mut SyscallCtx<'_>) -> SyscallResult {
    let layout = ctx
        .format
        .task()
        .ok_or_else(|| Fatal::unimplemented("?TASK", "task creation from 16-bit programs"))?;
    let launcher = ctx
        .launcher
        .ok_or_else(|| Fatal::unimplemented("?TASK", "task creation outside a process"))?;

    let spec = {
        let pkt = ctx.packet();
        if pkt.get(layout.dlnk) != 0 {
            return Err(Fatal::unimplemented("?TASK", "chained task definitions"));
        }
        let base = pkt.get(layout.dstb);
        let size = pkt.get(layout.dsts);
        TaskSpec {
            start: Addr::from_logical(pkt.get(layout.dpc)),
            ac2: pkt.get(layout.dac2),
            stack: WideStack {
                wfp: base,
                wsp: base,
                wsb: base,
                wsl: base.wrapping_add(size),
                wsfh: pkt.get(layout.dsfh),
            },
            priority: pkt.get(layout.dpri) as u16,
        }
    };

    let start = spec.start;
    let tid = launcher.launch(spec)?;
    log::debug!("PID {} TID {} started TID {} at {}", ctx.pid, ctx.tid, tid, start);
    ctx.cpu.set_ac(1, tid as u32);
    Ok(true)
}
