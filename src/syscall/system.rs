//! Clock, system information, privilege, delay and memory calls.

use super::{SyscallCtx, SyscallResult};
use crate::addr::Addr;
use crate::error::{codes, Fatal};
use crate::layout::sysprv;
use crate::memory::write_string;
use crate::PAGE_WORDS;
use chrono::{Datelike, Local, Timelike};
use std::thread;
use std::time::Duration;

/// Revision reported by ?SINFO: major in the left byte, minor in the right.
pub const SYSTEM_REVISION: u32 = (7 << 8) | 73;
/// ?GHRZ code for a 100 Hz real-time clock.
pub const RTC_100HZ: u32 = 2;

const OS_NAME: &str = "AOS/VS";
const MASTER_LDU: &str = "ROOT";

/// AC0 = seconds, AC1 = minutes, AC2 = hours.
pub(super) fn gtod(ctx: &mut SyscallCtx<'_>) -> SyscallResult {
    let now = Local::now();
    ctx.cpu.set_ac(0, now.second());
    ctx.cpu.set_ac(1, now.minute());
    ctx.cpu.set_ac(2, now.hour());
    Ok(true)
}

/// AC0 = day of month, AC1 = month, AC2 = years since 1900.
pub(super) fn gday(ctx: &mut SyscallCtx<'_>) -> SyscallResult {
    let now = Local::now();
    ctx.cpu.set_ac(0, now.day());
    ctx.cpu.set_ac(1, now.month());
    ctx.cpu.set_ac(2, (now.year() - 1900) as u32);
    Ok(true)
}

pub(super) fn ghrz(ctx: &mut SyscallCtx<'_>) -> SyscallResult {
    ctx.cpu.set_ac(0, RTC_100HZ);
    Ok(true)
}

pub(super) fn sinfo(ctx: &mut SyscallCtx<'_>) -> SyscallResult {
    let layout = ctx.format.sinfo();
    let pkt = ctx.packet();
    pkt.set(layout.sirn, SYSTEM_REVISION);
    pkt.set(layout.simm, ctx.config.max_unshared_pages);
    // each string is only returned when the caller supplied a buffer
    for (field, text) in [
        (layout.siln, MASTER_LDU),
        (layout.siid, ctx.config.system_name.as_str()),
        (layout.sios, OS_NAME),
    ] {
        if pkt.get(field) != 0 {
            write_string(ctx.mem, pkt.byte_ptr(field), text);
        }
    }
    Ok(true)
}

pub(super) fn sysprv(ctx: &mut SyscallCtx<'_>) -> SyscallResult {
    let layout = ctx.format.sysprv();
    let pkt = ctx.packet();
    match pkt.get(layout.func) {
        sysprv::GET => {
            pkt.set(layout.mode, sysprv::MODE_NONE);
            Ok(true)
        }
        sysprv::ENTER if pkt.flag(layout.exclusive) => {
            Err(Fatal::unimplemented("?SYSPRV", "exclusive privilege"))
        }
        sysprv::ENTER => Err(Fatal::unimplemented("?SYSPRV", "entering a privilege mode")),
        sysprv::LEAVE => {
            log::info!("PID {} TID {} left privilege mode", ctx.pid, ctx.tid);
            Ok(true)
        }
        other => {
            log::warn!("?SYSPRV function {} not recognised", other);
            ctx.fail(codes::ERICM)
        }
    }
}

/// Sleep for AC0 milliseconds.
pub(super) fn wdelay(ctx: &mut SyscallCtx<'_>) -> SyscallResult {
    let ms = ctx.cpu.ac(0);
    log::trace!("TID {} delaying {} ms", ctx.tid, ms);
    thread::sleep(Duration::from_millis(ms as u64));
    Ok(true)
}

/// No floating-point state to initialise.
pub(super) fn ifpu(_ctx: &mut SyscallCtx<'_>) -> SyscallResult {
    Ok(true)
}

/// AC1 = TID, AC2 = priority.
pub(super) fn mytid(ctx: &mut SyscallCtx<'_>) -> SyscallResult {
    ctx.cpu.set_ac(1, ctx.tid as u32);
    ctx.cpu.set_ac(2, 0);
    Ok(true)
}

fn highest_address(ctx: &SyscallCtx<'_>, unshared: u32) -> u32 {
    let words = (unshared as usize * PAGE_WORDS).saturating_sub(1) as u32;
    ctx.format.word_value(Addr::new(ctx.ring, words))
}

/// AC0 = pages still available, AC1 = unshared pages in use,
/// AC2 = highest unshared address.
pub(super) fn mem(ctx: &mut SyscallCtx<'_>) -> SyscallResult {
    let (unshared, max) = match ctx.agent.memory(ctx.pid, 0) {
        Ok(m) => m,
        Err(e) => return ctx.agent_failure(e),
    };
    let top = highest_address(ctx, unshared);
    ctx.cpu.set_ac(0, max - unshared);
    ctx.cpu.set_ac(1, unshared);
    ctx.cpu.set_ac(2, top);
    Ok(true)
}

/// AC0 = signed page increment. Returns the new highest address in AC1.
pub(super) fn memi(ctx: &mut SyscallCtx<'_>) -> SyscallResult {
    let pages = ctx.format.signed(ctx.cpu.ac(0));
    let (unshared, _) = match ctx.agent.memory(ctx.pid, pages) {
        Ok(m) => m,
        Err(e) => return ctx.agent_failure(e),
    };
    log::debug!("PID {} now has {} unshared pages", ctx.pid, unshared);
    let top = highest_address(ctx, unshared);
    ctx.cpu.set_ac(1, top);
    Ok(true)
}
