//! System-call dispatch
//!
//! Maps a legacy call number to its handler. A handler reads its packet
//! through the task's [`PacketFormat`], talks to the Agent when shared state
//! is involved, and returns whether the call succeeded. On failure the
//! legacy error code is already in AC0.
//!
//! An unknown call number, or a known one with no handler bound, ends the
//! emulator run.

mod file;
mod ipc;
mod message;
mod system;
mod task;

use crate::addr::{Addr, BytePtr, Ring};
use crate::agent::AgentHandle;
use crate::config::EmulatorConfig;
use crate::cpu::Cpu;
use crate::error::{AgentError, ErrorCode, Fatal};
use crate::layout::PacketFormat;
use crate::memory::{read_string, Memory};
use crate::packet::{Packet, MAX_STRING};
use crate::task::TaskLauncher;
use crate::{Pid, Tid};

/// Handler result: `Ok(true)` success, `Ok(false)` legacy failure.
pub type SyscallResult = Result<bool, Fatal>;

pub type Handler = fn(&mut SyscallCtx<'_>) -> SyscallResult;

/// Call number of `?RETURN`, which the task loop handles itself.
pub const RETURN: u16 = 0o310;

/// A call the emulator knows about.
pub struct Syscall {
    pub id: u16,
    pub name: &'static str,
    pub alias: &'static str,
    pub handler: Option<Handler>,
}

macro_rules! call {
    ($id:expr, $name:expr, $alias:expr, $handler:expr) => {
        Syscall {
            id: $id,
            name: $name,
            alias: $alias,
            handler: $handler,
        }
    };
}

/// Known calls, ordered by number.
pub static SYSCALLS: &[Syscall] = &[
    call!(0o000, "?CREATE", "CREA", Some(ipc::create)),
    call!(0o001, "?DELETE", "DELE", None),
    call!(0o002, "?RENAME", "RENA", None),
    call!(0o003, "?MEM", "MEM", Some(system::mem)),
    call!(0o014, "?MEMI", "MEMI", Some(system::memi)),
    call!(0o023, "?OPEN", "OPEN", Some(file::open)),
    call!(0o024, "?CLOSE", "CLOS", Some(file::close)),
    call!(0o025, "?READ", "READ", Some(file::read)),
    call!(0o026, "?WRITE", "WRIT", Some(file::write)),
    call!(0o073, "?GTOD", "GTOD", Some(system::gtod)),
    call!(0o074, "?GDAY", "GDAY", Some(system::gday)),
    call!(0o113, "?GHRZ", "GHRZ", Some(system::ghrz)),
    call!(0o166, "?GTMES", "GTME", Some(message::gtmes)),
    call!(0o170, "?IFPU", "IFPU", Some(system::ifpu)),
    call!(0o233, "?SINFO", "SINF", Some(system::sinfo)),
    call!(0o245, "?TASK", "TASK", Some(task::task)),
    call!(0o251, "?RECREATE", "RECR", Some(file::recreate)),
    call!(0o263, "?ILKUP", "ILKU", Some(ipc::ilkup)),
    call!(0o267, "?MYTID", "MYTI", Some(system::mytid)),
    call!(RETURN, "?RETURN", "RETU", None),
    call!(0o336, "?WDELAY", "WDEL", Some(system::wdelay)),
    call!(0o527, "?SYSPRV", "SYSP", Some(system::sysprv)),
];

pub fn lookup(id: u16) -> Option<&'static Syscall> {
    SYSCALLS
        .binary_search_by_key(&id, |s| s.id)
        .ok()
        .map(|i| &SYSCALLS[i])
}

/// Human-readable name for logs.
pub fn call_name(id: u16) -> String {
    match lookup(id) {
        Some(s) => s.name.to_string(),
        None => format!("call {:#o}", id),
    }
}

/// Run the handler bound to `id`.
pub fn dispatch(id: u16, ctx: &mut SyscallCtx<'_>) -> SyscallResult {
    let desc = lookup(id).ok_or_else(|| Fatal::protocol(format!("call {:#o}", id), "unknown system call"))?;
    let handler = desc
        .handler
        .ok_or_else(|| Fatal::unimplemented(desc.name, "no handler bound"))?;
    handler(ctx)
}

/// Everything a handler may touch.
pub struct SyscallCtx<'a> {
    pub cpu: &'a mut dyn Cpu,
    pub mem: &'a dyn Memory,
    pub agent: &'a mut AgentHandle,
    pub format: &'static dyn PacketFormat,
    pub ring: Ring,
    pub pid: Pid,
    pub tid: Tid,
    pub config: &'a EmulatorConfig,
    pub launcher: Option<&'a dyn TaskLauncher>,
}

impl<'a> SyscallCtx<'a> {
    /// The packet AC2 points at.
    pub fn packet(&self) -> Packet<'_> {
        let base = self.word_ptr(self.cpu.ac(2));
        Packet::new(self.mem, self.format, self.ring, base)
    }

    pub fn word_ptr(&self, raw: u32) -> Addr {
        self.format.word_ptr(self.ring, raw)
    }

    pub fn byte_ptr(&self, raw: u32) -> BytePtr {
        self.format.byte_ptr(self.ring, raw)
    }

    /// String addressed by the byte pointer in accumulator `ac`.
    pub fn ac_string(&self, ac: usize) -> String {
        read_string(self.mem, self.byte_ptr(self.cpu.ac(ac)), MAX_STRING)
    }

    /// Report a legacy error to the program.
    pub fn fail(&mut self, code: ErrorCode) -> SyscallResult {
        self.cpu.set_ac(0, code);
        Ok(false)
    }

    /// Turn an Agent failure into the handler outcome.
    pub fn agent_failure(&mut self, err: AgentError) -> SyscallResult {
        match err {
            AgentError::Legacy(code) => self.fail(code),
            AgentError::Fatal(f) => Err(f),
        }
    }
}
