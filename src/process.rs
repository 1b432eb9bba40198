//! Processes: a loaded program image plus the tasks running it.

use crate::addr::{Addr, Ring};
use crate::agent::{AgentHandle, ProcessInfo};
use crate::config::EmulatorConfig;
use crate::cpu::{CpuFactory, Mode, WideStack};
use crate::error::Fatal;
use crate::memory::Memory;
use crate::task::{Task, TaskLauncher, TaskSpec, Termination};
use crate::{Pid, Tid};
use anyhow::{bail, Context, Result};
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

/// Word offsets of the program-file preamble.
mod preamble {
    pub const REVISION: usize = 0o400;
    pub const FLAGS: usize = 0o401;
    pub const START: usize = 0o406;
    pub const WFP: usize = 0o410;
    pub const WSP: usize = 0o412;
    pub const WSB: usize = 0o414;
    pub const WSL: usize = 0o416;
    pub const WSFH: usize = 0o420;
    /// Words a valid image must at least contain
    pub const END: usize = 0o422;
    /// Program-flags bit marking a 16-bit program
    pub const NARROW_FLAG: u16 = 0x8000;
}

/// Entry conditions read from a program file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preamble {
    pub revision: u16,
    pub mode: Mode,
    pub start: u32,
    pub stack: WideStack,
}

impl Preamble {
    pub fn parse(words: &[u16]) -> Result<Self> {
        if words.len() < preamble::END {
            bail!(
                "program image has {} words, preamble needs {}",
                words.len(),
                preamble::END
            );
        }
        let dword = |at: usize| ((words[at] as u32) << 16) | words[at + 1] as u32;
        let mode = if words[preamble::FLAGS] & preamble::NARROW_FLAG != 0 {
            Mode::Narrow
        } else {
            Mode::Wide
        };
        Ok(Self {
            revision: words[preamble::REVISION],
            mode,
            start: dword(preamble::START),
            stack: WideStack {
                wfp: dword(preamble::WFP),
                wsp: dword(preamble::WSP),
                wsb: dword(preamble::WSB),
                wsl: dword(preamble::WSL),
                wsfh: dword(preamble::WSFH),
            },
        })
    }
}

/// A program file read into big-endian words.
#[derive(Debug, Clone)]
pub struct ProgramImage {
    pub path: PathBuf,
    pub words: Vec<u16>,
    pub preamble: Preamble,
}

impl ProgramImage {
    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("read program {}", path.display()))?;
        Self::from_bytes(path, &bytes)
    }

    pub fn from_bytes(path: &Path, bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            bail!("program file {} is empty", path.display());
        }
        let words: Vec<u16> = bytes
            .chunks(2)
            .map(|pair| ((pair[0] as u16) << 8) | pair.get(1).copied().unwrap_or(0) as u16)
            .collect();
        let preamble = Preamble::parse(&words).with_context(|| format!("parse program {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            words,
            preamble,
        })
    }

    /// Program name as the initial message reports it.
    pub fn program_name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_uppercase())
            .unwrap_or_default()
    }
}

/// An emulated program invocation.
pub struct Process {
    pid: Pid,
    image: ProgramImage,
    config: Arc<EmulatorConfig>,
    agent: AgentHandle,
}

impl Process {
    /// Read the program and register it with the Agent.
    pub fn load(path: &Path, args: Vec<String>, config: Arc<EmulatorConfig>, mut agent: AgentHandle) -> Result<Self> {
        let image = ProgramImage::read(path)?;
        let info = ProcessInfo {
            program: image.program_name(),
            args,
            virtual_root: config.virtual_root.clone(),
        };
        let pid = agent.register_process(info).context("register process with agent")?;
        log::info!(
            "Loaded {} as PID {} ({} words, {:?})",
            path.display(),
            pid,
            image.words.len(),
            image.preamble.mode
        );
        Ok(Self {
            pid,
            image,
            config,
            agent,
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn image(&self) -> &ProgramImage {
        &self.image
    }

    /// Load the image, run the initial task, and wait for every task.
    ///
    /// The first fatal condition from any task ends the run.
    pub fn run(self, cpus: Arc<dyn CpuFactory>, memory: Arc<dyn Memory>) -> Result<Termination, Fatal> {
        let ring = Ring::new(self.config.user_ring);
        memory.load_words(Addr::new(ring, 0), &self.image.words);

        let (done_tx, done_rx) = unbounded();
        let launcher = Launcher::new(
            self.pid,
            self.image.preamble.mode,
            cpus,
            memory,
            self.agent.clone(),
            self.config.clone(),
            done_tx,
        );

        let start = Addr::new(ring, self.image.preamble.start);
        let spec = TaskSpec {
            start,
            ac2: 0,
            stack: self.image.preamble.stack,
            priority: 0,
        };
        let initial = launcher.task(spec, self.agent);
        launcher.spawn(initial, None, true)?;

        wait_for_tasks(&launcher, &done_rx)
    }
}

struct Finished {
    initial: bool,
    result: Result<Termination, Fatal>,
}

fn wait_for_tasks(launcher: &Launcher, done: &Receiver<Finished>) -> Result<Termination, Fatal> {
    let mut outcome = None;
    while launcher.running.load(Ordering::SeqCst) > 0 {
        let finished = done.recv().map_err(|_| Fatal::protocol("process", "task completion channel closed"))?;
        launcher.running.fetch_sub(1, Ordering::SeqCst);
        let termination = finished.result?;
        if finished.initial {
            outcome = Some(termination);
        }
    }
    outcome.ok_or_else(|| Fatal::protocol("process", "initial task never reported"))
}

/// Starts tasks for one process, each on its own thread.
struct Launcher {
    me: Weak<Launcher>,
    pid: Pid,
    mode: Mode,
    cpus: Arc<dyn CpuFactory>,
    memory: Arc<dyn Memory>,
    agent: Mutex<AgentHandle>,
    config: Arc<EmulatorConfig>,
    done: Sender<Finished>,
    running: AtomicUsize,
}

impl Launcher {
    fn new(
        pid: Pid,
        mode: Mode,
        cpus: Arc<dyn CpuFactory>,
        memory: Arc<dyn Memory>,
        agent: AgentHandle,
        config: Arc<EmulatorConfig>,
        done: Sender<Finished>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            pid,
            mode,
            cpus,
            memory,
            agent: Mutex::new(agent),
            config,
            done,
            running: AtomicUsize::new(0),
        })
    }

    fn task(&self, spec: TaskSpec, agent: AgentHandle) -> Task {
        let cpu = self.cpus.create(self.memory.clone(), self.mode);
        let task = Task::new(
            self.pid,
            spec,
            self.mode,
            cpu,
            self.memory.clone(),
            agent,
            self.config.clone(),
        );
        match self.me.upgrade() {
            Some(me) => task.with_launcher(me),
            None => task,
        }
    }

    fn spawn(&self, task: Task, tid: Option<Tid>, initial: bool) -> Result<(), Fatal> {
        let name = match tid {
            Some(tid) => format!("pid{}-tid{}", self.pid, tid),
            None => format!("pid{}-initial", self.pid),
        };
        let done = self.done.clone();
        self.running.fetch_add(1, Ordering::SeqCst);
        let spawned = thread::Builder::new().name(name).spawn(move || {
            let result = task.run();
            let _ = done.send(Finished { initial, result });
        });
        if let Err(e) = spawned {
            self.running.fetch_sub(1, Ordering::SeqCst);
            return Err(Fatal::Io(e));
        }
        Ok(())
    }
}

impl TaskLauncher for Launcher {
    fn launch(&self, spec: TaskSpec) -> Result<Tid, Fatal> {
        let mut agent = self.agent.lock().clone();
        let tid = agent.allocate_tid(self.pid).map_err(|e| e.into_fatal("?TASK"))?;
        if tid == 0 {
            return Err(Fatal::protocol("?TASK", format!("no TID free for PID {}", self.pid)));
        }
        let task = self.task(spec, agent).with_tid(tid);
        self.spawn(task, Some(tid), false)?;
        Ok(tid)
    }
}
