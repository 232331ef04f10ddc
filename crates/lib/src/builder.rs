//! Invoke `nydus-image` to build and compact nydus bootstraps.
//!
//! Everything here is argument assembly; the tool itself does all of
//! the work and reports through its `--output-json` file, which we
//! never read.

use std::process::Command;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use nydusify_utils::{CommandRunExt, OutputSink};

use crate::cli::{CompactOpts, CreateOpts};

/// Wraps a `nydus-image` executable.
///
/// Cloning is cheap, and a builder can be shared across threads; each
/// call spawns its own child process.
#[derive(Debug, Clone)]
pub struct Builder {
    binary: Utf8PathBuf,
    stdout: OutputSink,
    stderr: OutputSink,
}

/// Treat an empty path the same as an absent one.
fn nonempty(p: &Option<Utf8PathBuf>) -> Option<&Utf8Path> {
    p.as_deref().filter(|p| !p.as_str().is_empty())
}

fn prefetch_patterns(opts: &CreateOpts) -> Option<&str> {
    opts.prefetch_patterns.as_deref().filter(|p| !p.is_empty())
}

/// Arguments for `nydus-image create`.
///
/// Note `--prefetch-policy` is appended after the positional rootfs.
pub fn create_args(opts: &CreateOpts) -> Vec<String> {
    let mut argv = vec!["create".to_string()];

    if let Some(parent) = nonempty(&opts.parent_bootstrap) {
        argv.push("--parent-bootstrap".to_string());
        argv.push(parent.to_string());
    }
    if opts.aligned_chunk {
        argv.push("--aligned-chunk".to_string());
    }
    if let Some(dict) = nonempty(&opts.chunk_dict) {
        argv.push("--chunk-dict".to_string());
        argv.push(dict.to_string());
    }

    argv.extend(
        [
            "--bootstrap",
            opts.bootstrap.as_str(),
            "--log-level",
            "warn",
            "--whiteout-spec",
            opts.whiteout_spec.as_str(),
            "--output-json",
            opts.output_json.as_str(),
            "--blob",
            opts.blob.as_str(),
            opts.rootfs.as_str(),
        ]
        .map(String::from),
    );

    if prefetch_patterns(opts).is_some() {
        argv.push("--prefetch-policy".to_string());
        argv.push("fs".to_string());
    }
    argv
}

/// Arguments for `nydus-image compact`.
pub fn compact_args(opts: &CompactOpts) -> Vec<String> {
    let mut argv: Vec<String> = [
        "compact",
        "--bootstrap",
        opts.bootstrap.as_str(),
        "--config",
        opts.compact_config.as_str(),
        "--backend-type",
        opts.backend_type.as_str(),
        "--backend-config-file",
        opts.backend_config_file.as_str(),
        "--log-level",
        "info",
        "--output-json",
        opts.output_json.as_str(),
    ]
    .map(String::from)
    .into();

    // Without an output bootstrap the input is rewritten in place.
    if let Some(output) = nonempty(&opts.output_bootstrap) {
        argv.push("--output-bootstrap".to_string());
        argv.push(output.to_string());
    }
    if let Some(dict) = nonempty(&opts.chunk_dict) {
        argv.push("--chunk-dict".to_string());
        argv.push(dict.to_string());
    }
    argv
}

impl Builder {
    /// Create a builder for the given executable, sharing our stdout and stderr.
    pub fn new(binary: impl Into<Utf8PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            stdout: OutputSink::Inherit,
            stderr: OutputSink::Inherit,
        }
    }

    /// Send the child's stdout here.
    pub fn with_stdout(mut self, sink: OutputSink) -> Self {
        self.stdout = sink;
        self
    }

    /// Send the child's stderr here.
    pub fn with_stderr(mut self, sink: OutputSink) -> Self {
        self.stderr = sink;
        self
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        cmd
    }

    /// The command [`Self::create`] would run, without its stdin.
    pub fn create_command(&self, opts: &CreateOpts) -> Command {
        self.command(&create_args(opts))
    }

    /// The command [`Self::compact`] would run.
    pub fn compact_command(&self, opts: &CompactOpts) -> Command {
        self.command(&compact_args(opts))
    }

    /// Build a bootstrap and blob from `opts.rootfs`, optionally as a
    /// layer on top of a parent bootstrap.
    ///
    /// Prefetch patterns, if any, are passed to the tool on stdin.
    #[context("Creating nydus image from {}", opts.rootfs)]
    pub fn create(&self, opts: &CreateOpts) -> Result<()> {
        self.run(&create_args(opts), prefetch_patterns(opts).unwrap_or_default())
    }

    /// Compact a bootstrap.
    #[context("Compacting bootstrap {}", opts.bootstrap)]
    pub fn compact(&self, opts: &CompactOpts) -> Result<()> {
        self.run(&compact_args(opts), "")
    }

    fn run(&self, args: &[String], stdin: &str) -> Result<()> {
        let mut cmd = self.command(args);
        cmd.log_debug()
            .run_with_io(stdin.as_bytes(), &self.stdout, &self.stderr)
            .inspect_err(|e| tracing::error!("Failed to run {}: {e:#}", cmd.to_string_pretty()))
    }
}
