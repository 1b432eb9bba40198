//! IPC port table keyed by virtual path.

use crate::error::{codes, ErrorCode};
use crate::Pid;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcEntry {
    pub owner: Pid,
    pub local_port: u16,
    pub global_port: u32,
    pub name: String,
}

/// Global port number of `local_port` owned by `pid`.
pub fn global_port(pid: Pid, local_port: u16) -> u32 {
    ((pid as u32) << 16) | local_port as u32
}

/// Key under which a process's IPC file is stored.
pub fn virtual_path(virtual_root: &Path, filename: &str) -> String {
    format!("{}/{}", virtual_root.display(), filename)
}

#[derive(Debug, Default)]
pub struct IpcTable {
    entries: HashMap<String, IpcEntry>,
}

impl IpcTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new entry; an existing path is never overwritten.
    pub fn create(&mut self, path: String, owner: Pid, local_port: u16, name: &str) -> Result<&IpcEntry, ErrorCode> {
        if self.entries.contains_key(&path) {
            return Err(codes::ERNAE);
        }
        let entry = IpcEntry {
            owner,
            local_port,
            global_port: global_port(owner, local_port),
            name: name.to_string(),
        };
        Ok(self.entries.entry(path).or_insert(entry))
    }

    pub fn lookup(&self, path: &str) -> Result<&IpcEntry, ErrorCode> {
        self.entries.get(path).ok_or(codes::ERFDE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_port_packs_pid_and_local() {
        assert_eq!(global_port(3, 0x0010), 0x0003_0010);
    }

    #[test]
    fn duplicate_create_is_rejected_without_mutation() {
        let mut table = IpcTable::new();
        let path = virtual_path(Path::new("/vs"), "SERVER");
        table.create(path.clone(), 2, 5, "SERVER").unwrap();
        assert_eq!(table.create(path.clone(), 9, 7, "OTHER"), Err(codes::ERNAE));

        let entry = table.lookup(&path).unwrap();
        assert_eq!(entry.owner, 2);
        assert_eq!(entry.global_port, global_port(2, 5));
        assert_eq!(entry.name, "SERVER");
    }

    #[test]
    fn missing_lookup_is_not_found() {
        let table = IpcTable::new();
        assert_eq!(table.lookup("/vs/NOPE").err(), Some(codes::ERFDE));
    }
}
