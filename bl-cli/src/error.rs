/*!
 * Error types for bl
 * Config problems are reported before any device interaction. Session
 * errors come from the interactive control utility. Everything is folded
 * into `ActionError` at the command level, which knows its exit code.
 */

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Exit code for a crashed control utility
pub const EXIT_CRASHED: u8 = 2;
/// Exit code for an unresponsive control utility
pub const EXIT_TIMEOUT: u8 = 3;
/// Exit code after Ctrl-C
pub const EXIT_INTERRUPTED: u8 = 130;

/// A single broken rule in the device configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    #[error("the default device key is empty")]
    EmptyDefaultKey,

    #[error("the default device '{0}' has no entry in [Name]")]
    DefaultWithoutName(String),

    #[error("the default device '{0}' has no entry in [Address]")]
    DefaultWithoutAddress(String),

    #[error("device '{0}' has a name but no address")]
    NameWithoutAddress(String),

    #[error("device '{0}' has an address but no name")]
    AddressWithoutName(String),

    #[error("device '{key}' has a malformed address '{address}'")]
    MalformedAddress { key: String, address: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("cannot read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config file {}:{}", .path.display(), format_issues(.issues))]
    Invalid {
        path: PathBuf,
        issues: Vec<ConfigIssue>,
    },
}

fn format_issues(issues: &[ConfigIssue]) -> String {
    issues.iter().map(|issue| format!("\n  - {}", issue)).collect()
}

/// Failures of the interactive session itself. A matched failure pattern is
/// not an error here, see `session::Outcome`.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("cannot start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("no answer from the bluetooth daemon after {}s", .0.as_secs_f32())]
    Timeout(Duration),

    #[error("the bluetooth control utility terminated unexpectedly")]
    Crashed,

    #[error("interrupted")]
    Interrupted,

    #[error("session i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ActionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    /// A failure pattern matched; the message is the user-facing one.
    #[error("{0}")]
    Refused(String),

    #[error("{step} failed ({status})")]
    OsCommand { step: String, status: ExitStatus },

    #[error("bad output pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("{step} could not be run: {source}")]
    OsCommandSpawn {
        step: String,
        source: std::io::Error,
    },
}

impl ActionError {
    pub fn exit_code(&self) -> u8 {
        match self {
            ActionError::Session(SessionError::Crashed) => EXIT_CRASHED,
            ActionError::Session(SessionError::Timeout(_)) => EXIT_TIMEOUT,
            ActionError::Session(SessionError::Interrupted) => EXIT_INTERRUPTED,
            _ => 1,
        }
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, ActionError::Session(SessionError::Interrupted))
    }
}
