//! Devtools session layer on top of `vdt-rpc`
//!
//! [`host::HostSession`] runs next to the inspected app, [`panel::PanelSession`]
//! in the devtools panel. The [`server`] module is the optional build-tool
//! server and its client.

pub mod cli;
pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod panel;
pub mod server;
pub mod types;
