//! Stratus CLI - run ONNX models locally or on a cloud endpoint
//!
//! # Commands
//!
//! - `inspect` - Show a model's signature and nodes
//! - `run` - Run a model once, optionally on a Triton endpoint
//!
//! Logging goes to stderr and honors `RUST_LOG`.

use std::process;

use clap::Parser;
use stratus::cli::{entrypoint, Cli};
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() {
    init_logging();

    if let Err(e) = entrypoint(Cli::parse()) {
        tracing::debug!(error = ?e, "command failed");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// Install the global subscriber; `RUST_LOG` overrides the warn default
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(Level::WARN.into()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
    }
}
