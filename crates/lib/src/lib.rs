//! # nydusify-build
//!
//! A thin wrapper around the `nydus-image` tool: it turns option
//! structs into `nydus-image create` and `nydus-image compact`
//! invocations and runs them, forwarding stdio.

mod builder;
pub mod cli;
mod config;

pub use builder::{compact_args, create_args, Builder};
pub use cli::{CompactOpts, CreateOpts};
pub use config::{BuildConfig, CONFIG_VAR};
pub use nydusify_utils::OutputSink;
