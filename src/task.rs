//! Task execution loop
//!
//! A Task drives one CPU context until the program terminates. Each time
//! the interpreter reports a system-call trap, the Task decodes the call
//! number from the trap site, dispatches it, and resumes at the normal or
//! error return depending on the handler's outcome.

use crate::addr::{dword_bits, Addr};
use crate::agent::AgentHandle;
use crate::config::EmulatorConfig;
use crate::cpu::{Cpu, Mode, WideStack};
use crate::error::Fatal;
use crate::layout::{format_for, PacketFormat};
use crate::memory::Memory;
use crate::syscall::{self, SyscallCtx, RETURN};
use crate::{Pid, Tid};
use std::sync::Arc;

/// Where and how a new task starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub start: Addr,
    /// Initial AC2
    pub ac2: u32,
    pub stack: WideStack,
    pub priority: u16,
}

/// Starts further tasks on behalf of a running one.
pub trait TaskLauncher: Send + Sync {
    /// Returns the TID the new task runs under.
    fn launch(&self, spec: TaskSpec) -> Result<Tid, Fatal>;
}

/// How a task ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Termination {
    pub code: u32,
    pub flags: u8,
    pub message: Option<String>,
    /// The interpreter halted without a termination call.
    pub halted: bool,
}

impl Termination {
    fn halted() -> Self {
        Self {
            halted: true,
            ..Default::default()
        }
    }
}

/// Lifecycle state, traced on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Initialized,
    Running,
    Trapped,
    Terminated,
}

pub struct Task {
    pid: Pid,
    tid: Option<Tid>,
    agent: AgentHandle,
    cpu: Box<dyn Cpu>,
    memory: Arc<dyn Memory>,
    config: Arc<EmulatorConfig>,
    start: Addr,
    ac2: u32,
    stack: WideStack,
    mode: Mode,
    debug_logging: bool,
    launcher: Option<Arc<dyn TaskLauncher>>,
    state: TaskState,
}

impl Task {
    pub fn new(
        pid: Pid,
        spec: TaskSpec,
        mode: Mode,
        cpu: Box<dyn Cpu>,
        memory: Arc<dyn Memory>,
        agent: AgentHandle,
        config: Arc<EmulatorConfig>,
    ) -> Self {
        Self {
            pid,
            tid: None,
            agent,
            cpu,
            memory,
            debug_logging: config.debug_logging,
            config,
            start: spec.start,
            ac2: spec.ac2,
            stack: spec.stack,
            mode,
            launcher: None,
            state: TaskState::Initialized,
        }
    }

    /// Run under an already allocated TID.
    pub fn with_tid(mut self, tid: Tid) -> Self {
        self.tid = Some(tid);
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn TaskLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Override the configured debug flag for this task only.
    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }

    fn enter(&mut self, state: TaskState) {
        if self.state != state {
            log::trace!("PID {} TID {:?} {:?} -> {:?}", self.pid, self.tid, self.state, state);
            self.state = state;
        }
    }

    /// Run to termination. The TID goes back to the Agent either way.
    pub fn run(mut self) -> Result<Termination, Fatal> {
        self.cpu.set_ring(self.start.ring);
        self.cpu.set_pc(self.start);
        self.cpu.setup_stack(self.stack);
        self.cpu.set_ac(2, self.ac2);
        self.cpu.set_translation(true);
        self.cpu.set_debug_logging(self.debug_logging);

        let tid = match self.tid {
            Some(tid) => tid,
            None => {
                let tid = self
                    .agent
                    .allocate_tid(self.pid)
                    .map_err(|e| e.into_fatal("allocate-tid"))?;
                if tid == 0 {
                    return Err(Fatal::protocol("allocate-tid", format!("no TID free for PID {}", self.pid)));
                }
                self.tid = Some(tid);
                tid
            }
        };

        log::debug!("PID {} TID {} starting at {} ({:?})", self.pid, tid, self.start, self.mode);
        let result = self.run_loop(tid);
        self.enter(TaskState::Terminated);

        if let Err(e) = self.agent.release_tid(self.pid, tid) {
            log::warn!("PID {} could not release TID {}: {}", self.pid, tid, e);
        }
        match &result {
            Ok(t) => log::debug!("PID {} TID {} terminated with code {:#o}", self.pid, tid, t.code),
            Err(e) => log::error!("PID {} TID {} aborted: {}", self.pid, tid, e),
        }
        result
    }

    fn run_loop(&mut self, tid: Tid) -> Result<Termination, Fatal> {
        let format = format_for(self.mode);
        let mut instructions = 0u64;

        loop {
            self.enter(TaskState::Running);
            let outcome = self.cpu.run();
            instructions += outcome.instructions;
            if !outcome.trapped {
                log::info!("PID {} TID {} halted after {} instructions", self.pid, tid, instructions);
                return Ok(Termination::halted());
            }
            self.enter(TaskState::Trapped);

            let (call_id, error_return) = self.trap_site()?;
            if call_id == RETURN {
                return Ok(self.termination(format));
            }

            let ok = {
                let mut ctx = SyscallCtx {
                    cpu: self.cpu.as_mut(),
                    mem: self.memory.as_ref(),
                    agent: &mut self.agent,
                    format,
                    ring: self.start.ring,
                    pid: self.pid,
                    tid,
                    config: &self.config,
                    launcher: self.launcher.as_deref(),
                };
                syscall::dispatch(call_id, &mut ctx)?
            };

            if self.debug_logging {
                let alias = syscall::lookup(call_id).map(|s| s.alias).unwrap_or("????");
                log::debug!(
                    "TID {} {} ({}) at {} -> {}",
                    tid,
                    syscall::call_name(call_id),
                    alias,
                    error_return,
                    if ok { "ok" } else { "error" }
                );
            }

            let resume = if ok {
                error_return.add(self.return_step())
            } else {
                error_return
            };
            self.cpu.set_pc(resume);
        }
    }

    /// Words between the error return and the normal return.
    fn return_step(&self) -> u32 {
        match self.mode {
            Mode::Narrow => 1,
            Mode::Wide => 2,
        }
    }

    /// Call number and error-return address of the pending trap.
    fn trap_site(&mut self) -> Result<(u16, Addr), Fatal> {
        match self.mode {
            Mode::Wide => {
                let at = Addr::from_logical(self.cpu.ac(3));
                let raw = self.memory.read_dword(at);
                let id = u16::try_from(raw)
                    .map_err(|_| Fatal::protocol(format!("call {:#o}", raw), "unknown system call"))?;
                Ok((id, at.add(2)))
            }
            Mode::Narrow => {
                // the gate left the call-word address on the stack
                let raw = self.cpu.wide_pop();
                self.cpu.wide_push(raw);
                let at = Addr::from_narrow(self.start.ring, raw);
                Ok((self.memory.read_word(at), at.add(1)))
            }
        }
    }

    fn termination(&self, format: &dyn PacketFormat) -> Termination {
        let ac2 = self.cpu.ac(2);
        let length = dword_bits(ac2, 24, 8) as usize;
        let message = if length > 0 {
            let ptr = format.byte_ptr(self.start.ring, self.cpu.ac(1));
            let bytes = self.memory.read_bytes(ptr, length);
            Some(String::from_utf8_lossy(&bytes).into_owned())
        } else {
            None
        };
        Termination {
            code: self.cpu.ac(0),
            flags: dword_bits(ac2, 16, 8) as u8,
            message,
            halted: false,
        }
    }
}
