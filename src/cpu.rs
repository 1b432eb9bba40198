//! Interface to the instruction interpreter.
//!
//! The interpreter is an external collaborator: it executes opcodes and
//! returns control whenever the program raises a system-call trap or halts.
//! A Task owns its CPU context exclusively.

use crate::addr::{Addr, Ring};
use crate::memory::Memory;
use std::sync::Arc;

/// Register/stack width of a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// 16-bit program: word pointers, narrow packets.
    Narrow,
    /// 32-bit program: doubleword pointers, wide packets.
    Wide,
}

/// Why the interpreter handed control back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// A system-call trap is pending.
    pub trapped: bool,
    /// Instructions executed during this run.
    pub instructions: u64,
}

impl RunOutcome {
    pub fn trap(instructions: u64) -> Self {
        Self {
            trapped: true,
            instructions,
        }
    }

    pub fn halt(instructions: u64) -> Self {
        Self {
            trapped: false,
            instructions,
        }
    }
}

/// Wide-stack parameters of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WideStack {
    /// Frame pointer
    pub wfp: u32,
    /// Stack pointer
    pub wsp: u32,
    /// Stack base
    pub wsb: u32,
    /// Stack limit
    pub wsl: u32,
    /// Stack-fault handler address
    pub wsfh: u32,
}

/// One CPU execution context.
pub trait Cpu: Send {
    /// Execute until a system-call trap or a halt.
    fn run(&mut self) -> RunOutcome;

    fn ac(&self, n: usize) -> u32;

    fn set_ac(&mut self, n: usize, value: u32);

    fn pc(&self) -> Addr;

    fn set_pc(&mut self, pc: Addr);

    /// Ring whose segment unqualified addresses resolve to.
    fn set_ring(&mut self, ring: Ring);

    fn setup_stack(&mut self, stack: WideStack);

    fn wide_push(&mut self, value: u32);

    fn wide_pop(&mut self) -> u32;

    fn set_translation(&mut self, enabled: bool);

    fn set_debug_logging(&mut self, enabled: bool);
}

/// Creates CPU contexts bound to a shared memory.
pub trait CpuFactory: Send + Sync {
    fn create(&self, memory: Arc<dyn Memory>, mode: Mode) -> Box<dyn Cpu>;
}
