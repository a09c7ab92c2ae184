//! FocuserLink host application.
//!
//! Wires the [`focuserlink_driver`] engine to real hardware and the local
//! machine:
//!
//! - [`config`]: Figment configuration (TOML file + `FOCUSERLINK_` environment)
//! - [`tracing_init`]: tracing-subscriber setup
//! - [`store`]: TOML-file [`ConfigStore`](focuserlink_core::capabilities::ConfigStore)
//! - [`connection`]: serial [`ConnectionProvider`](focuserlink_core::capabilities::ConnectionProvider)

pub mod config;
pub mod connection;
pub mod store;
pub mod tracing_init;
