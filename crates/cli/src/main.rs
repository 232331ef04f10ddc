//! The main entrypoint for nydusify-build, a thin wrapper around `nydus-image`.

use anyhow::Result;
use clap::Parser;
use nydusify_build_lib::cli::{run_from_opt, Opt};

fn run() -> Result<()> {
    let opt = Opt::parse();
    nydusify_utils::initialize_tracing(opt.verbose);
    tracing::trace!("starting {}", env!("CARGO_PKG_NAME"));
    run_from_opt(opt)
}

fn main() {
    nydusify_utils::run_main(run)
}
