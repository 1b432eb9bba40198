//! Channel table, console endpoint and legacy open-mode translation.

use crate::addr::word_bit;
use crate::error::{codes, ErrorCode};
use crate::layout::isti;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Channel permanently bound to the console.
pub const CONSOLE_CHANNEL: u16 = 0;
/// Channel numbers handed out are below this.
pub const MAX_CHANNELS: u16 = 128;
/// Legacy root marker and path separator.
pub const ROOT_MARKER: char = ':';

const CONSOLE_NAMES: [&str; 3] = ["@CONSOLE", "@OUTPUT", "@INPUT"];

/// True for the generic names that always mean the console.
pub fn is_console_name(name: &str) -> bool {
    CONSOLE_NAMES.iter().any(|c| c.eq_ignore_ascii_case(name))
}

/// Map a legacy pathname onto the host.
///
/// Root-qualified names (`:UDD:X`) become absolute host paths; anything
/// else is placed under the process's virtual root.
pub fn host_path(virtual_root: &Path, legacy: &str) -> PathBuf {
    let translated = legacy.replace(ROOT_MARKER, "/");
    if legacy.starts_with(ROOT_MARKER) {
        PathBuf::from(translated)
    } else {
        virtual_root.join(translated)
    }
}

/// Legacy error code for a failed host file operation.
pub fn file_error_code(err: &io::Error) -> ErrorCode {
    match err.kind() {
        io::ErrorKind::NotFound => codes::ERFDE,
        io::ErrorKind::AlreadyExists => codes::ERNAE,
        _ => codes::ERFAD,
    }
}

/// Host open flags derived from the `?ISTI` option word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostOpenFlags {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub create_new: bool,
    pub truncate: bool,
}

impl HostOpenFlags {
    pub fn from_options(options: u16) -> Self {
        let has = |bit: u8| options & word_bit(bit) != 0;
        let (ofce, ofcr, ofde) = (has(isti::OFCE), has(isti::OFCR), has(isti::OFDE));
        let (ofin, ofot) = (has(isti::OFIN), has(isti::OFOT));

        let mut flags = HostOpenFlags {
            append: has(isti::APND),
            ..Default::default()
        };

        if ofce && ofde {
            flags.create = true;
            flags.truncate = true;
        } else if ofce {
            flags.create_new = true;
        } else if ofcr {
            flags.create = true;
            flags.truncate = ofde;
        } else if ofde {
            flags.truncate = true;
        }

        match (ofin, ofot) {
            (true, true) => {
                flags.read = true;
                flags.write = true;
            }
            (false, true) => flags.write = true,
            _ => flags.read = true,
        }

        flags
    }

    pub fn to_open_options(self) -> OpenOptions {
        let mut opts = OpenOptions::new();
        // the host refuses to create or truncate without write access
        let needs_write = (self.create || self.create_new || self.truncate) && !self.append;
        opts.read(self.read)
            .write(self.write || needs_write)
            .append(self.append)
            .create(self.create)
            .create_new(self.create_new)
            .truncate(self.truncate && !self.append);
        opts
    }
}

/// Byte streams bound to channel 0.
pub struct Console {
    input: Box<dyn Read + Send>,
    output: Box<dyn Write + Send>,
}

impl Console {
    pub fn new(input: Box<dyn Read + Send>, output: Box<dyn Write + Send>) -> Self {
        Self { input, output }
    }

    pub fn stdio() -> Self {
        Self::new(Box::new(io::stdin()), Box::new(io::stdout()))
    }

    /// Read one byte at a time up to a line terminator, which is dropped.
    ///
    /// Returns `None` at end of input with nothing read.
    pub fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.input.read(&mut byte) {
                Ok(0) if line.is_empty() => return Ok(None),
                Ok(0) => return Ok(Some(line)),
                Ok(_) => match byte[0] {
                    b'\n' | b'\r' => return Ok(Some(line)),
                    b => line.push(b),
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.output.write_all(bytes)?;
        self.output.flush()?;
        Ok(bytes.len())
    }
}

pub enum Endpoint {
    Console,
    File(File),
}

/// An open I/O handle.
pub struct Channel {
    pub number: u16,
    pub path: String,
    pub readable: bool,
    pub writable: bool,
    pub endpoint: Endpoint,
}

impl Channel {
    pub fn is_console(&self) -> bool {
        matches!(self.endpoint, Endpoint::Console)
    }
}

/// All open channels, keyed by number. Channel 0 is always the console.
pub struct ChannelTable {
    channels: BTreeMap<u16, Channel>,
}

impl ChannelTable {
    pub fn new() -> Self {
        let mut channels = BTreeMap::new();
        channels.insert(
            CONSOLE_CHANNEL,
            Channel {
                number: CONSOLE_CHANNEL,
                path: "@CONSOLE".to_string(),
                readable: true,
                writable: true,
                endpoint: Endpoint::Console,
            },
        );
        Self { channels }
    }

    /// Lowest free channel number above the console.
    pub fn next_free(&self) -> Option<u16> {
        (1..MAX_CHANNELS).find(|n| !self.channels.contains_key(n))
    }

    /// Store an opened file under the next free number.
    pub fn insert_file(&mut self, path: String, flags: HostOpenFlags, file: File) -> Result<u16, ErrorCode> {
        let number = self.next_free().ok_or(codes::ERTMC)?;
        self.channels.insert(
            number,
            Channel {
                number,
                path,
                readable: flags.read,
                writable: flags.write || flags.append,
                endpoint: Endpoint::File(file),
            },
        );
        Ok(number)
    }

    pub fn get(&self, number: u16) -> Option<&Channel> {
        self.channels.get(&number)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.channels.len()
    }
}

impl Default for ChannelTable {
    fn default() -> Self {
        Self::new()
    }
}
