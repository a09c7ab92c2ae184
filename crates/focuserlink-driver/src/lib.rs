//! FocuserLink focuser driver.
//!
//! Controls a FocuserLink stepper focuser with an optional temperature and
//! humidity sensor over a newline-framed ASCII serial protocol.
//!
//! # Layers
//!
//! - [`protocol`]: verbs, validated commands, line limits
//! - [`record`]: colon-delimited record codec and typed per-verb records
//! - [`link`]: one command line out, at most one response line back
//! - [`settings`]: read-modify-write of the settings record
//! - [`motion`]: absolute positioning with backlash compensation
//! - [`poller`]: the telemetry poll tick
//! - [`driver`]: [`FocuserLinkDriver`], the connected session
//! - [`mock_serial`]: scriptable in-memory port for tests
//!
//! Default serial settings: 38400 baud, 8N1, no flow control.

pub mod driver;
pub mod link;
pub mod mock_serial;
pub mod motion;
pub mod poller;
pub mod protocol;
pub mod record;
mod session;
pub mod settings;

pub use driver::{DriverOptions, FocuserLinkDriver};
pub use poller::TickReport;
