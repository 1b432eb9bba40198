//! vscompat - legacy system-call compatibility layer for a minicomputer emulator
//!
//! Emulated programs raise system-call traps; a [`task::Task`] decodes each
//! trap, the [`syscall`] dispatcher runs the matching handler, and every
//! change to shared kernel tables goes through the serialized
//! [`agent::Agent`].
//!
//! The instruction interpreter is supplied from outside through the
//! [`cpu::Cpu`] and [`cpu::CpuFactory`] traits.

pub mod addr;
pub mod agent;
pub mod config;
pub mod cpu;
pub mod error;
pub mod layout;
pub mod memory;
pub mod packet;
pub mod process;
pub mod syscall;
pub mod task;

/// Legacy process identifier.
pub type Pid = u16;
/// Legacy task identifier; zero means none.
pub type Tid = u16;

/// Words per memory page.
pub const PAGE_WORDS: usize = 1024;

pub use agent::{Agent, AgentHandle};
pub use config::EmulatorConfig;
pub use error::{AgentError, Fatal};
pub use process::{Process, ProgramImage};
pub use task::{Task, TaskSpec, Termination};
