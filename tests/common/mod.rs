//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use vscompat::addr::{Addr, Ring};
use vscompat::agent::channels::Console;
use vscompat::agent::{Agent, AgentHandle};
use vscompat::cpu::{Cpu, CpuFactory, Mode, RunOutcome, WideStack};
use vscompat::memory::Memory;
use vscompat::EmulatorConfig;

/// One scripted return from `Cpu::run`.
#[derive(Debug, Clone)]
pub struct Step {
    pub trap: bool,
    pub acs: Vec<(usize, u32)>,
    /// Narrow traps leave the call-word address on the stack
    pub push: Option<u32>,
}

impl Step {
    /// Trap with AC3 pointing at the call doubleword.
    pub fn wide_trap(site: Addr, acs: &[(usize, u32)]) -> Self {
        let mut acs = acs.to_vec();
        acs.push((3, site.logical()));
        Self {
            trap: true,
            acs,
            push: None,
        }
    }

    /// Trap with the call-word address pushed on the stack.
    pub fn narrow_trap(site_word: u32, acs: &[(usize, u32)]) -> Self {
        Self {
            trap: true,
            acs: acs.to_vec(),
            push: Some(site_word),
        }
    }

    pub fn halt() -> Self {
        Self {
            trap: false,
            acs: Vec::new(),
            push: None,
        }
    }
}

/// What the task did to its CPU, readable after the task is gone.
#[derive(Debug, Default)]
pub struct CpuLog {
    pub pcs: Vec<Addr>,
    pub ring: Option<Ring>,
    pub stack: Option<WideStack>,
    pub initial_ac2: Option<u32>,
    pub translation: bool,
    pub debug: bool,
}

/// CPU double that replays a fixed list of traps.
pub struct ScriptCpu {
    ac: [u32; 4],
    pc: Addr,
    stack: Vec<u32>,
    steps: VecDeque<Step>,
    log: Arc<Mutex<CpuLog>>,
    started: bool,
}

impl ScriptCpu {
    pub fn new(steps: Vec<Step>) -> (Self, Arc<Mutex<CpuLog>>) {
        let log = Arc::new(Mutex::new(CpuLog::default()));
        let cpu = Self {
            ac: [0; 4],
            pc: Addr::new(Ring::USER, 0),
            stack: Vec::new(),
            steps: steps.into(),
            log: log.clone(),
            started: false,
        };
        (cpu, log)
    }
}

impl Cpu for ScriptCpu {
    fn run(&mut self) -> RunOutcome {
        if !self.started {
            self.started = true;
            self.log.lock().initial_ac2 = Some(self.ac[2]);
        }
        match self.steps.pop_front() {
            Some(step) => {
                for (n, v) in &step.acs {
                    self.ac[*n] = *v;
                }
                if let Some(site) = step.push {
                    self.stack.push(site);
                }
                if step.trap {
                    RunOutcome::trap(10)
                } else {
                    RunOutcome::halt(1)
                }
            }
            None => RunOutcome::halt(0),
        }
    }

    fn ac(&self, n: usize) -> u32 {
        self.ac[n]
    }

    fn set_ac(&mut self, n: usize, value: u32) {
        self.ac[n] = value;
    }

    fn pc(&self) -> Addr {
        self.pc
    }

    fn set_pc(&mut self, pc: Addr) {
        self.pc = pc;
        self.log.lock().pcs.push(pc);
    }

    fn set_ring(&mut self, ring: Ring) {
        self.log.lock().ring = Some(ring);
    }

    fn setup_stack(&mut self, stack: WideStack) {
        self.log.lock().stack = Some(stack);
    }

    fn wide_push(&mut self, value: u32) {
        self.stack.push(value);
    }

    fn wide_pop(&mut self) -> u32 {
        self.stack.pop().unwrap_or(0)
    }

    fn set_translation(&mut self, enabled: bool) {
        self.log.lock().translation = enabled;
    }

    fn set_debug_logging(&mut self, enabled: bool) {
        self.log.lock().debug = enabled;
    }
}

/// Hands out scripted CPUs in creation order.
#[derive(Default)]
pub struct ScriptFactory {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    pub logs: Mutex<Vec<Arc<Mutex<CpuLog>>>>,
}

impl ScriptFactory {
    pub fn new(scripts: Vec<Vec<Step>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            logs: Mutex::new(Vec::new()),
        }
    }
}

impl CpuFactory for ScriptFactory {
    fn create(&self, _memory: Arc<dyn Memory>, _mode: Mode) -> Box<dyn Cpu> {
        let steps = self.scripts.lock().pop_front().unwrap_or_default();
        let (cpu, log) = ScriptCpu::new(steps);
        self.logs.lock().push(log);
        Box::new(cpu)
    }
}

/// Console output captured in memory.
#[derive(Clone, Default)]
pub struct CapturedOutput(pub Arc<Mutex<Vec<u8>>>);

impl CapturedOutput {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().clone()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn config_for(root: &Path) -> EmulatorConfig {
    EmulatorConfig {
        virtual_root: root.to_path_buf(),
        ..Default::default()
    }
}

/// Start an Agent whose console reads `input`.
pub fn start_agent(config: &EmulatorConfig, input: &[u8]) -> (AgentHandle, CapturedOutput) {
    let out = CapturedOutput::default();
    let console = Console::new(Box::new(Cursor::new(input.to_vec())), Box::new(out.clone()));
    let (handle, _join) = Agent::new(config, console).spawn().expect("spawn agent");
    (handle, out)
}

pub fn user(offset: u32) -> Addr {
    Addr::new(Ring::USER, offset)
}
