//! The Agent - serialized owner of shared kernel tables
//!
//! Every mutation of the channel table, the IPC table, the TID pool and the
//! per-process records happens on the Agent's own thread. Tasks reach it
//! through one unbuffered channel: a caller hands over an envelope, blocks
//! until the Agent has filled its result slot, and gets the same envelope
//! back on its private reply channel. The Agent finishes one envelope
//! before it accepts the next, so requests are totally ordered.

pub mod channels;
pub mod ipc;

use crate::config::EmulatorConfig;
use crate::error::{codes, AgentError, Fatal};
use crate::{Pid, Tid};
use channels::{file_error_code, host_path, is_console_name, ChannelTable, Console, HostOpenFlags, CONSOLE_CHANNEL};
use crossbeam::channel::{bounded, Receiver, Sender};
use ipc::{virtual_path, IpcTable};
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::PathBuf;
use std::thread;

/// What a process tells the Agent when it registers.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub program: String,
    pub args: Vec<String>,
    pub virtual_root: PathBuf,
}

/// Parts of the initial message a program can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageQuery {
    Whole,
    Command,
    Count,
    Arg(u16),
}

/// Action tag plus its parameters.
#[derive(Debug)]
pub enum AgentAction {
    RegisterProcess(ProcessInfo),
    AllocateTid,
    ReleaseTid(Tid),
    Open { path: String, options: u16 },
    Close { channel: u16 },
    Read { channel: u16, line: bool, max: usize },
    Write { channel: u16, bytes: Vec<u8> },
    CreateIpc { filename: String, local_port: u16 },
    IpcLookup { filename: String },
    GetMessage(MessageQuery),
    Recreate { path: String },
    MemoryInfo,
    MemoryIncrement { pages: i32 },
}

impl AgentAction {
    fn name(&self) -> &'static str {
        match self {
            AgentAction::RegisterProcess(_) => "register-process",
            AgentAction::AllocateTid => "allocate-tid",
            AgentAction::ReleaseTid(_) => "release-tid",
            AgentAction::Open { .. } => "open",
            AgentAction::Close { .. } => "close",
            AgentAction::Read { .. } => "read",
            AgentAction::Write { .. } => "write",
            AgentAction::CreateIpc { .. } => "create-ipc",
            AgentAction::IpcLookup { .. } => "ipc-lookup",
            AgentAction::GetMessage(_) => "get-message",
            AgentAction::Recreate { .. } => "recreate-file",
            AgentAction::MemoryInfo => "memory-info",
            AgentAction::MemoryIncrement { .. } => "memory-increment",
        }
    }
}

/// Successful results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentReply {
    Pid(Pid),
    /// Zero when no TID is free
    Tid(Tid),
    Channel(u16),
    Bytes(Vec<u8>),
    Count(usize),
    Ipc { global_port: u32, ipc_type: u16 },
    Text(String),
    Memory { unshared: u32, max: u32 },
    Done,
}

pub type AgentResult = Result<AgentReply, AgentError>;

/// The envelope that travels to the Agent and back.
pub struct AgentRequest {
    pub pid: Pid,
    pub action: AgentAction,
    pub result: Option<AgentResult>,
    reply_to: Sender<AgentRequest>,
}

/// A requester's end of the Agent channel.
///
/// Each handle owns a private reply channel; cloning makes a new one.
pub struct AgentHandle {
    requests: Sender<AgentRequest>,
    reply_tx: Sender<AgentRequest>,
    reply_rx: Receiver<AgentRequest>,
}

impl Clone for AgentHandle {
    fn clone(&self) -> Self {
        Self::with_sender(self.requests.clone())
    }
}

impl AgentHandle {
    fn with_sender(requests: Sender<AgentRequest>) -> Self {
        let (reply_tx, reply_rx) = bounded(1);
        Self {
            requests,
            reply_tx,
            reply_rx,
        }
    }

    /// Round-trip one envelope.
    pub fn submit(&mut self, pid: Pid, action: AgentAction) -> AgentResult {
        let envelope = AgentRequest {
            pid,
            action,
            result: None,
            reply_to: self.reply_tx.clone(),
        };
        self.requests
            .send(envelope)
            .map_err(|_| Fatal::AgentDisconnected)?;
        let envelope = self.reply_rx.recv().map_err(|_| Fatal::AgentDisconnected)?;
        envelope
            .result
            .unwrap_or_else(|| Err(Fatal::protocol("agent", "envelope returned without a result").into()))
    }

    pub fn register_process(&mut self, info: ProcessInfo) -> Result<Pid, AgentError> {
        match self.submit(0, AgentAction::RegisterProcess(info))? {
            AgentReply::Pid(pid) => Ok(pid),
            other => Err(unexpected("register-process", other)),
        }
    }

    pub fn allocate_tid(&mut self, pid: Pid) -> Result<Tid, AgentError> {
        match self.submit(pid, AgentAction::AllocateTid)? {
            AgentReply::Tid(tid) => Ok(tid),
            other => Err(unexpected("allocate-tid", other)),
        }
    }

    pub fn release_tid(&mut self, pid: Pid, tid: Tid) -> Result<(), AgentError> {
        self.submit(pid, AgentAction::ReleaseTid(tid)).map(|_| ())
    }

    pub fn open(&mut self, pid: Pid, path: &str, options: u16) -> Result<u16, AgentError> {
        let action = AgentAction::Open {
            path: path.to_string(),
            options,
        };
        match self.submit(pid, action)? {
            AgentReply::Channel(n) => Ok(n),
            other => Err(unexpected("open", other)),
        }
    }

    pub fn close(&mut self, pid: Pid, channel: u16) -> Result<(), AgentError> {
        self.submit(pid, AgentAction::Close { channel }).map(|_| ())
    }

    pub fn read_line(&mut self, pid: Pid, channel: u16, max: usize) -> Result<Vec<u8>, AgentError> {
        self.read(pid, channel, true, max)
    }

    pub fn read(&mut self, pid: Pid, channel: u16, line: bool, max: usize) -> Result<Vec<u8>, AgentError> {
        match self.submit(pid, AgentAction::Read { channel, line, max })? {
            AgentReply::Bytes(b) => Ok(b),
            other => Err(unexpected("read", other)),
        }
    }

    pub fn write(&mut self, pid: Pid, channel: u16, bytes: Vec<u8>) -> Result<usize, AgentError> {
        match self.submit(pid, AgentAction::Write { channel, bytes })? {
            AgentReply::Count(n) => Ok(n),
            other => Err(unexpected("write", other)),
        }
    }

    pub fn create_ipc(&mut self, pid: Pid, filename: &str, local_port: u16) -> Result<(), AgentError> {
        let action = AgentAction::CreateIpc {
            filename: filename.to_string(),
            local_port,
        };
        self.submit(pid, action).map(|_| ())
    }

    /// Returns `(global_port, ipc_type)`.
    pub fn ipc_lookup(&mut self, pid: Pid, filename: &str) -> Result<(u32, u16), AgentError> {
        let action = AgentAction::IpcLookup {
            filename: filename.to_string(),
        };
        match self.submit(pid, action)? {
            AgentReply::Ipc { global_port, ipc_type } => Ok((global_port, ipc_type)),
            other => Err(unexpected("ipc-lookup", other)),
        }
    }

    pub fn get_message(&mut self, pid: Pid, query: MessageQuery) -> Result<AgentReply, AgentError> {
        self.submit(pid, AgentAction::GetMessage(query))
    }

    pub fn recreate(&mut self, pid: Pid, path: &str) -> Result<(), AgentError> {
        let action = AgentAction::Recreate {
            path: path.to_string(),
        };
        self.submit(pid, action).map(|_| ())
    }

    /// Returns `(unshared, max)` pages.
    pub fn memory(&mut self, pid: Pid, increment: i32) -> Result<(u32, u32), AgentError> {
        let action = if increment == 0 {
            AgentAction::MemoryInfo
        } else {
            AgentAction::MemoryIncrement { pages: increment }
        };
        match self.submit(pid, action)? {
            AgentReply::Memory { unshared, max } => Ok((unshared, max)),
            other => Err(unexpected("memory", other)),
        }
    }
}

fn unexpected(action: &str, reply: AgentReply) -> AgentError {
    Fatal::protocol("agent", format!("{} answered with {:?}", action, reply)).into()
}

struct ProcessRecord {
    info: ProcessInfo,
    unshared_pages: u32,
}

/// The Agent's exclusively owned state.
pub struct Agent {
    console: Console,
    channels: ChannelTable,
    ipcs: IpcTable,
    processes: HashMap<Pid, ProcessRecord>,
    next_pid: Pid,
    tids: BTreeSet<Tid>,
    max_tasks: u32,
    initial_pages: u32,
    max_pages: u32,
}

impl Agent {
    pub fn new(config: &EmulatorConfig, console: Console) -> Self {
        Self {
            console,
            channels: ChannelTable::new(),
            ipcs: IpcTable::new(),
            processes: HashMap::new(),
            next_pid: 1,
            tids: BTreeSet::new(),
            max_tasks: config.max_tasks.min(Tid::MAX as u32),
            initial_pages: config.initial_unshared_pages,
            max_pages: config.max_unshared_pages,
        }
    }

    /// Start the service loop on its own thread.
    ///
    /// The loop ends once every [`AgentHandle`] has been dropped.
    pub fn spawn(self) -> io::Result<(AgentHandle, thread::JoinHandle<()>)> {
        let (tx, rx) = bounded::<AgentRequest>(0);
        let handle = thread::Builder::new()
            .name("agent".to_string())
            .spawn(move || self.serve(rx))?;
        Ok((AgentHandle::with_sender(tx), handle))
    }

    fn serve(mut self, requests: Receiver<AgentRequest>) {
        log::debug!("Agent started");
        for mut envelope in requests.iter() {
            let result = self.handle(envelope.pid, &envelope.action);
            match &result {
                Err(AgentError::Fatal(e)) => {
                    log::error!("Agent {} for PID {}: {}", envelope.action.name(), envelope.pid, e)
                }
                _ => log::trace!("Agent {} for PID {} done", envelope.action.name(), envelope.pid),
            }
            envelope.result = Some(result);
            let reply_to = envelope.reply_to.clone();
            if reply_to.send(envelope).is_err() {
                log::warn!("Agent reply dropped: requester went away");
            }
        }
        log::debug!("Agent stopped");
    }

    pub(crate) fn handle(&mut self, pid: Pid, action: &AgentAction) -> AgentResult {
        match action {
            AgentAction::RegisterProcess(info) => self.register_process(info),
            AgentAction::AllocateTid => self.allocate_tid(pid),
            AgentAction::ReleaseTid(tid) => {
                self.tids.remove(tid);
                Ok(AgentReply::Done)
            }
            AgentAction::Open { path, options } => self.open(pid, path, *options),
            AgentAction::Close { channel } => self.close(*channel),
            AgentAction::Read { channel, line, max } => self.read(*channel, *line, *max),
            AgentAction::Write { channel, bytes } => self.write(*channel, bytes),
            AgentAction::CreateIpc { filename, local_port } => self.create_ipc(pid, filename, *local_port),
            AgentAction::IpcLookup { filename } => self.ipc_lookup(pid, filename),
            AgentAction::GetMessage(query) => self.get_message(pid, *query),
            AgentAction::Recreate { path } => self.recreate(pid, path),
            AgentAction::MemoryInfo => self.memory(pid, 0),
            AgentAction::MemoryIncrement { pages } => self.memory(pid, *pages),
        }
    }

    fn process(&self, pid: Pid, action: &str) -> Result<&ProcessRecord, AgentError> {
        self.processes
            .get(&pid)
            .ok_or_else(|| Fatal::protocol(action, format!("PID {} is not registered", pid)).into())
    }

    fn register_process(&mut self, info: &ProcessInfo) -> AgentResult {
        let pid = self.next_pid;
        self.next_pid = self
            .next_pid
            .checked_add(1)
            .ok_or_else(|| Fatal::protocol("register-process", "PID space exhausted"))?;
        log::info!("Registered PID {} for {}", pid, info.program);
        self.processes.insert(
            pid,
            ProcessRecord {
                info: info.clone(),
                unshared_pages: self.initial_pages,
            },
        );
        Ok(AgentReply::Pid(pid))
    }

    fn allocate_tid(&mut self, pid: Pid) -> AgentResult {
        self.process(pid, "allocate-tid")?;
        let free = (1..=self.max_tasks as Tid).find(|t| !self.tids.contains(t));
        match free {
            Some(tid) => {
                self.tids.insert(tid);
                Ok(AgentReply::Tid(tid))
            }
            None => {
                log::warn!("No TID free for PID {}", pid);
                Ok(AgentReply::Tid(0))
            }
        }
    }

    fn open(&mut self, pid: Pid, path: &str, options: u16) -> AgentResult {
        if is_console_name(path) {
            return Ok(AgentReply::Channel(CONSOLE_CHANNEL));
        }
        let root = self.process(pid, "open")?.info.virtual_root.clone();
        let flags = HostOpenFlags::from_options(options);
        let host = host_path(&root, path);
        let file = match flags.to_open_options().open(&host) {
            Ok(f) => f,
            Err(e) => {
                log::debug!("Open of {} failed: {}", host.display(), e);
                return Err(AgentError::Legacy(file_error_code(&e)));
            }
        };
        let number = self
            .channels
            .insert_file(path.to_string(), flags, file)
            .map_err(AgentError::Legacy)?;
        log::debug!("Opened {} as channel {}", host.display(), number);
        Ok(AgentReply::Channel(number))
    }

    fn close(&mut self, channel: u16) -> AgentResult {
        if channel == CONSOLE_CHANNEL {
            return Ok(AgentReply::Done);
        }
        Err(Fatal::unimplemented("?CLOSE", format!("closing non-console channel {}", channel)).into())
    }

    fn read(&mut self, channel: u16, line: bool, max: usize) -> AgentResult {
        let chan = self
            .channels
            .get(channel)
            .ok_or_else(|| Fatal::protocol("?READ", format!("channel {} is not open", channel)))?;
        if !chan.readable {
            log::debug!("Channel {} ({}) not open for reading", channel, chan.path);
            return Err(AgentError::Legacy(codes::ERFAD));
        }
        if !chan.is_console() {
            return Err(Fatal::unimplemented("?READ", format!("reading non-console channel {}", channel)).into());
        }
        if !line {
            return Err(Fatal::unimplemented("?READ", "fixed-length console reads").into());
        }
        match self.console.read_line().map_err(Fatal::Io)? {
            Some(mut bytes) => {
                bytes.truncate(max);
                Ok(AgentReply::Bytes(bytes))
            }
            None => Err(AgentError::Legacy(codes::EREOF)),
        }
    }

    fn write(&mut self, channel: u16, bytes: &[u8]) -> AgentResult {
        let chan = self
            .channels
            .get(channel)
            .ok_or_else(|| Fatal::protocol("?WRITE", format!("channel {} is not open", channel)))?;
        if !chan.writable {
            log::debug!("Channel {} ({}) not open for writing", channel, chan.path);
            return Err(AgentError::Legacy(codes::ERFAD));
        }
        if !chan.is_console() {
            log::warn!("Write to non-console channel {} ({}) ignored", channel, chan.path);
            return Ok(AgentReply::Count(0));
        }
        let n = self.console.write(bytes).map_err(Fatal::Io)?;
        Ok(AgentReply::Count(n))
    }

    fn create_ipc(&mut self, pid: Pid, filename: &str, local_port: u16) -> AgentResult {
        let path = virtual_path(&self.process(pid, "create-ipc")?.info.virtual_root, filename);
        let entry = self
            .ipcs
            .create(path.clone(), pid, local_port, filename)
            .map_err(AgentError::Legacy)?;
        log::debug!("IPC {} created with global port {:#x}", path, entry.global_port);
        Ok(AgentReply::Done)
    }

    fn ipc_lookup(&mut self, pid: Pid, filename: &str) -> AgentResult {
        let path = virtual_path(&self.process(pid, "ipc-lookup")?.info.virtual_root, filename);
        let entry = self.ipcs.lookup(&path).map_err(AgentError::Legacy)?;
        Ok(AgentReply::Ipc {
            global_port: entry.global_port,
            ipc_type: crate::layout::FIPC,
        })
    }

    fn get_message(&mut self, pid: Pid, query: MessageQuery) -> AgentResult {
        let info = &self.process(pid, "get-message")?.info;
        let reply = match query {
            MessageQuery::Whole => {
                let mut parts = vec![info.program.clone()];
                parts.extend(info.args.iter().cloned());
                AgentReply::Text(parts.join(" "))
            }
            MessageQuery::Command => AgentReply::Text(info.args.join(" ")),
            MessageQuery::Count => AgentReply::Count(info.args.len()),
            MessageQuery::Arg(0) => AgentReply::Text(info.program.clone()),
            MessageQuery::Arg(n) => match info.args.get(n as usize - 1) {
                Some(arg) => AgentReply::Text(arg.clone()),
                None => return Err(AgentError::Legacy(codes::ERARG)),
            },
        };
        Ok(reply)
    }

    fn recreate(&mut self, pid: Pid, path: &str) -> AgentResult {
        let host = host_path(&self.process(pid, "recreate-file")?.info.virtual_root, path);
        match std::fs::remove_file(&host) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(AgentError::Legacy(file_error_code(&e))),
        }
        std::fs::File::create(&host).map_err(|e| AgentError::Legacy(file_error_code(&e)))?;
        log::debug!("Recreated {}", host.display());
        Ok(AgentReply::Done)
    }

    fn memory(&mut self, pid: Pid, increment: i32) -> AgentResult {
        let max = self.max_pages;
        let record = self
            .processes
            .get_mut(&pid)
            .ok_or_else(|| Fatal::protocol("memory", format!("PID {} is not registered", pid)))?;
        let wanted = record.unshared_pages as i64 + increment as i64;
        if wanted < 0 || wanted > max as i64 {
            return Err(AgentError::Legacy(codes::ERMEM));
        }
        record.unshared_pages = wanted as u32;
        Ok(AgentReply::Memory {
            unshared: record.unshared_pages,
            max,
        })
    }

    #[cfg(test)]
    pub(crate) fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
