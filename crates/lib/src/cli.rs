//! # nydusify-build command line and option structures
//!
//! The option structs double as the programmatic API for [`crate::Builder`].

use std::io::Read;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use fn_error_context::context;
use nydusify_utils::CommandRunExt;

use crate::builder::Builder;
use crate::config::BuildConfig;

/// The executable used when nothing else is configured.
pub const DEFAULT_NYDUS_IMAGE: &str = "nydus-image";

/// Options for building a nydus image layer.
#[derive(Debug, Default, Clone, Parser, PartialEq, Eq)]
pub struct CreateOpts {
    /// Build an incremental layer on top of this parent bootstrap
    #[clap(long)]
    pub parent_bootstrap: Option<Utf8PathBuf>,

    /// Deduplicate chunks against this chunk dictionary
    #[clap(long)]
    pub chunk_dict: Option<Utf8PathBuf>,

    /// Path of the bootstrap to generate
    #[clap(long)]
    pub bootstrap: Utf8PathBuf,

    /// Storage backend type.
    ///
    /// Not consumed by `create`; kept alongside the other layer settings.
    #[clap(long, default_value = "")]
    pub backend_type: String,

    /// Storage backend configuration
    #[clap(long, default_value = "")]
    pub backend_config: String,

    /// Whiteout convention of the source layer (oci, overlayfs, none)
    #[clap(long)]
    pub whiteout_spec: String,

    /// File receiving the tool's JSON build report
    #[clap(long)]
    pub output_json: Utf8PathBuf,

    /// Newline separated prefetch patterns; `-` reads them from stdin
    #[clap(long)]
    pub prefetch_patterns: Option<String>,

    /// Regular file or fifo into which blob data is dumped
    #[clap(long)]
    pub blob: Utf8PathBuf,

    /// Align uncompressed chunk data to 4K
    #[clap(long)]
    pub aligned_chunk: bool,

    /// Source directory of the layer
    pub rootfs: Utf8PathBuf,
}

/// Options for compacting a bootstrap.
#[derive(Debug, Default, Clone, Parser, PartialEq, Eq)]
pub struct CompactOpts {
    /// Deduplicate chunks against this chunk dictionary
    #[clap(long)]
    pub chunk_dict: Option<Utf8PathBuf>,

    /// Bootstrap to compact
    #[clap(long)]
    pub bootstrap: Utf8PathBuf,

    /// Write the result here instead of overwriting the input bootstrap
    #[clap(long)]
    pub output_bootstrap: Option<Utf8PathBuf>,

    /// Storage backend type
    #[clap(long)]
    pub backend_type: String,

    /// Storage backend configuration file
    #[clap(long)]
    pub backend_config_file: Utf8PathBuf,

    /// File receiving the tool's JSON report
    #[clap(long)]
    pub output_json: Utf8PathBuf,

    /// Compaction configuration file
    #[clap(long = "config")]
    pub compact_config: Utf8PathBuf,
}

/// Drive the nydus-image builder.
#[derive(Debug, Parser, PartialEq, Eq)]
#[clap(name = nydusify_utils::NAME, version)]
pub struct Opt {
    /// Path to the nydus-image executable
    #[clap(long, global = true, env = "NYDUS_IMAGE")]
    pub nydus_image: Option<Utf8PathBuf>,

    /// Print the command that would be executed instead of running it
    #[clap(long, global = true)]
    pub dry_run: bool,

    /// Enable debug logging
    #[clap(long, short = 'v', global = true)]
    pub verbose: bool,

    #[clap(subcommand)]
    #[allow(missing_docs)]
    pub cmd: Command,
}

/// Builder operations
#[derive(Debug, clap::Subcommand, PartialEq, Eq)]
pub enum Command {
    /// Build a nydus bootstrap and blob from a directory
    Create(CreateOpts),
    /// Compact a bootstrap, merging small blobs
    Compact(CompactOpts),
}

/// Pick the executable: explicit option, then config file, then the default.
fn resolve_binary(explicit: Option<&Utf8PathBuf>, config: Option<BuildConfig>) -> Utf8PathBuf {
    explicit
        .cloned()
        .or_else(|| config.and_then(|c| c.nydus_image))
        .unwrap_or_else(|| DEFAULT_NYDUS_IMAGE.into())
}

/// Replace a `-` prefetch pattern argument with the content of our stdin.
#[context("Reading prefetch patterns from stdin")]
fn read_stdin_patterns(opts: &mut CreateOpts) -> Result<()> {
    if opts.prefetch_patterns.as_deref() == Some("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        opts.prefetch_patterns = Some(buf);
    }
    Ok(())
}

/// Execute already parsed options.
pub fn run_from_opt(opt: Opt) -> Result<()> {
    let config = BuildConfig::load().context("Loading config")?;
    let builder = Builder::new(resolve_binary(opt.nydus_image.as_ref(), config));
    tracing::trace!("using {:?}", builder);

    match opt.cmd {
        Command::Create(mut opts) => {
            // A `-` pattern argument is printed as-is rather than consuming stdin.
            if opt.dry_run {
                println!("{}", builder.create_command(&opts).to_string_pretty());
                return Ok(());
            }
            read_stdin_patterns(&mut opts)?;
            builder.create(&opts)
        }
        Command::Compact(opts) => {
            if opt.dry_run {
                println!("{}", builder.compact_command(&opts).to_string_pretty());
                return Ok(());
            }
            builder.compact(&opts)
        }
    }
}
