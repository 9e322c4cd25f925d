//! Build-tool server
//!
//! A separate rpc surface next to the app bridge: the panel asks it for the
//! project's static assets and module graph, and it pushes file changes.

pub mod assets;
pub mod client;
pub mod graph;
mod runtime;

pub use assets::{AssetInfo, AssetType, ImageMeta};
pub use client::BuildServerClient;
pub use graph::ModuleInfo;
pub use runtime::{BuildServer, ServerNotification};
