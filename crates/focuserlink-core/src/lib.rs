//! Core types and traits shared by the FocuserLink driver and its host application.
//!
//! - [`error`]: link-level and driver-level error enums
//! - [`state`]: cached logical focuser state and the published snapshot
//! - [`capabilities`]: narrow collaborator traits (focuser control, connection, config store)
//! - [`serial`]: async serial stream helpers

pub mod capabilities;
pub mod error;
pub mod serial;
pub mod state;

pub use error::{FocuserError, FocuserResult, LinkError};
