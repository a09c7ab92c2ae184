//! FocuserLink wire protocol: verbs, commands and line limits.
//!
//! Protocol overview:
//! - ASCII, one newline-terminated line per command and per response
//! - Fields are colon-delimited; field 0 is a one-character verb
//! - Every response echoes the verb of its command as its first character
//! - Lines are at most [`MAX_LINE_LEN`] bytes in either direction
//!
//! | Verb | Meaning |
//! |---|---|
//! | `#` | handshake, answers `#:FocuserLink` |
//! | `q` | status record |
//! | `u` / `U` | read / write settings record |
//! | `f` / `F` | read / set hand-controller flag |
//! | `R` | absolute move, `R:0:<ticks>` |
//! | `P` | sync position, `P:<ticks>` |
//! | `H` | abort |
//! | `S` | compensate now, `S:<threshold>` |

use focuserlink_core::error::LinkError;
use std::fmt;
use std::time::Duration;

/// Line buffer size of the device, terminator included.
pub const MAX_LINE_LEN: usize = 100;

/// Line terminator.
pub const TERMINATOR: u8 = b'\n';

/// Field delimiter.
pub const DELIMITER: char = ':';

/// Default read budget for one response.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default poll cadence.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Prefix of the handshake answer.
pub const HANDSHAKE_SIGNATURE: &str = "#:FocuserLink";

/// Compensation cycle written with every focuser-settings patch, in seconds.
pub const COMPENSATION_CYCLE_SECS: u32 = 30;

/// One-character command tag, echoed as field 0 of the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// `#`
    Handshake,
    /// `q`
    Status,
    /// `u`
    ReadSettings,
    /// `U`
    WriteSettings,
    /// `f`
    ReadManual,
    /// `F`
    SetManual,
    /// `R`
    Move,
    /// `P`
    Sync,
    /// `H`
    Abort,
    /// `S`
    CompensateNow,
}

impl Verb {
    /// Wire character.
    pub fn as_char(self) -> char {
        match self {
            Verb::Handshake => '#',
            Verb::Status => 'q',
            Verb::ReadSettings => 'u',
            Verb::WriteSettings => 'U',
            Verb::ReadManual => 'f',
            Verb::SetManual => 'F',
            Verb::Move => 'R',
            Verb::Sync => 'P',
            Verb::Abort => 'H',
            Verb::CompensateNow => 'S',
        }
    }

    /// Verb for a wire character.
    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            '#' => Verb::Handshake,
            'q' => Verb::Status,
            'u' => Verb::ReadSettings,
            'U' => Verb::WriteSettings,
            'f' => Verb::ReadManual,
            'F' => Verb::SetManual,
            'R' => Verb::Move,
            'P' => Verb::Sync,
            'H' => Verb::Abort,
            'S' => Verb::CompensateNow,
            _ => return None,
        })
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// An outbound command line, without terminator.
///
/// Construction validates that the text is non-empty, has no embedded
/// terminator and fits the device line buffer once terminated, so the link
/// never has to truncate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
}

impl Command {
    /// Validate raw command text.
    pub fn new(text: impl Into<String>) -> Result<Self, LinkError> {
        let text = text.into();
        if text.is_empty() || text.contains(['\n', '\r']) {
            return Err(LinkError::InvalidCommand(text));
        }
        let len = text.len() + 1;
        if len > MAX_LINE_LEN {
            return Err(LinkError::CommandTooLong {
                len,
                max: MAX_LINE_LEN,
            });
        }
        Ok(Self { text })
    }

    fn fixed(text: String) -> Self {
        Self { text }
    }

    /// `#`
    pub fn handshake() -> Self {
        Self::fixed("#".into())
    }

    /// `q`
    pub fn status() -> Self {
        Self::fixed("q".into())
    }

    /// `u`
    pub fn read_settings() -> Self {
        Self::fixed("u".into())
    }

    /// `f`
    pub fn read_manual() -> Self {
        Self::fixed("f".into())
    }

    /// `R:0:<ticks>`
    pub fn move_absolute(ticks: u32) -> Self {
        Self::fixed(format!("R:0:{}", ticks))
    }

    /// `P:<ticks>`
    pub fn sync(ticks: u32) -> Self {
        Self::fixed(format!("P:{}", ticks))
    }

    /// `H`
    pub fn abort() -> Self {
        Self::fixed("H".into())
    }

    /// `S:<threshold>`
    pub fn compensate_now(threshold: u16) -> Self {
        Self::fixed(format!("S:{}", threshold))
    }

    /// `F:1` or `F:0`
    pub fn set_manual(enabled: bool) -> Self {
        Self::fixed(format!("F:{}", u8::from(enabled)))
    }

    /// Command text without terminator.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// First character of the command, which the response must echo.
    pub fn tag(&self) -> char {
        self.text.chars().next().unwrap_or('\0')
    }

    /// Verb, when the tag is a known one.
    pub fn verb(&self) -> Option<Verb> {
        Verb::from_char(self.tag())
    }

    /// Wire bytes including the terminator.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.text.len() + 1);
        bytes.extend_from_slice(self.text.as_bytes());
        bytes.push(TERMINATOR);
        bytes
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
