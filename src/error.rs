//! Error taxonomy for the compatibility layer.
//!
//! Three severities exist. Reportable failures never become a Rust error:
//! the handler stores a legacy error code in AC0 and the program decides
//! what to do. Unimplemented legacy features and protocol violations are
//! [`Fatal`] and end the whole emulator run.

use std::io;

/// Legacy error code as seen by the emulated program in AC0.
pub type ErrorCode = u32;

/// Legacy error codes returned to programs.
pub mod codes {
    use super::ErrorCode;

    /// Illegal system command
    pub const ERICM: ErrorCode = 0o1;
    /// File name already exists (creation not allowed)
    pub const ERNAE: ErrorCode = 0o22;
    /// File does not exist
    pub const ERFDE: ErrorCode = 0o25;
    /// Insufficient memory available
    pub const ERMEM: ErrorCode = 0o26;
    /// End of file
    pub const EREOF: ErrorCode = 0o30;
    /// File access denied
    pub const ERFAD: ErrorCode = 0o45;
    /// Too many channels open
    pub const ERTMC: ErrorCode = 0o50;
    /// No such argument in the initial message
    pub const ERARG: ErrorCode = 0o51;
}

/// Conditions that terminate the emulator.
#[derive(Debug, thiserror::Error)]
pub enum Fatal {
    /// A real legacy feature that has not been ported yet.
    #[error("unimplemented legacy feature in {call}: {feature}")]
    Unimplemented { call: String, feature: String },

    /// The program and the emulator disagree about the state of the world.
    #[error("protocol violation in {call}: {detail}")]
    Protocol { call: String, detail: String },

    #[error("agent service is no longer running")]
    AgentDisconnected,

    #[error("host I/O failure: {0}")]
    Io(#[from] io::Error),
}

impl Fatal {
    pub fn unimplemented(call: impl Into<String>, feature: impl Into<String>) -> Self {
        Fatal::Unimplemented {
            call: call.into(),
            feature: feature.into(),
        }
    }

    pub fn protocol(call: impl Into<String>, detail: impl Into<String>) -> Self {
        Fatal::Protocol {
            call: call.into(),
            detail: detail.into(),
        }
    }

    /// True for the "needs engineering" category rather than bad state.
    pub fn is_unimplemented(&self) -> bool {
        matches!(self, Fatal::Unimplemented { .. })
    }
}

/// Result slot of an Agent envelope when the action did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("legacy error code {0:#o}")]
    Legacy(ErrorCode),

    #[error(transparent)]
    Fatal(#[from] Fatal),
}

impl AgentError {
    /// For callers with no program to report a legacy code to.
    pub fn into_fatal(self, call: &str) -> Fatal {
        match self {
            AgentError::Legacy(code) => Fatal::protocol(call, format!("agent refused with code {:#o}", code)),
            AgentError::Fatal(f) => f,
        }
    }
}
